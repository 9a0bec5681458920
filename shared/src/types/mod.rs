//! Core type definitions

pub mod activity;
pub mod record;
pub mod summary;
