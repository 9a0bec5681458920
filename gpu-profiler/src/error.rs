//! Error types for the tracer

use thiserror::Error;

use crate::tracer::SessionPhase;

/// Failures reported by an activity runtime
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// A CUPTI call returned something other than success
    #[error("{call} failed with error {code}: {message}")]
    Cupti {
        call: &'static str,
        code: u32,
        message: String,
    },

    /// The runtime refused an operation
    #[error("{call} rejected: {reason}")]
    Rejected { call: &'static str, reason: String },

    /// Buffer callbacks were used before a buffer client was registered
    #[error("no buffer client registered with the runtime")]
    NotInitialized,

    /// A record in a completed buffer could not be decoded
    #[error("corrupt activity record at offset {offset}: {reason}")]
    CorruptRecord { offset: usize, reason: String },

    /// A single record does not fit in an empty buffer
    #[error("record of {needed} bytes does not fit in a {capacity} byte buffer")]
    RecordTooLarge { needed: usize, capacity: usize },
}

/// Failures while turning an activity record into a trace record
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("{kind} record ends before it starts ({start} > {end})")]
    InvertedInterval {
        kind: &'static str,
        start: u64,
        end: u64,
    },
}

/// Errors returned by the tracing session API
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("cannot {operation} while {phase}")]
    InvalidStateTransition {
        phase: SessionPhase,
        operation: &'static str,
    },

    #[error("profiling runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("trace log I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T, E = TraceError> = std::result::Result<T, E>;
