//! Shared types and utilities for cutrace
//!
//! This crate contains the activity record model produced by the GPU
//! profiling runtime, the normalized trace records handed to callers, and
//! small helpers used by the tracer.

pub mod types;
pub mod utils;

// Re-export commonly used types
pub use types::{activity::*, record::*, summary::*};
