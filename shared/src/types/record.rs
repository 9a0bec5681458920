//! Normalized trace records
//!
//! A [`TraceRecord`] is the flat form of an activity record that callers get
//! back from a tracing session.

use serde::{Deserialize, Serialize};

use super::activity::{CorrelationId, Timestamp};

/// A normalized trace record
///
/// For kernels and memory operations `process_id` holds the device ID and
/// `thread_id` the stream ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceRecord {
    /// Kind label, e.g. `KERNEL` or `MEMCPY`
    pub kind: String,

    /// Kernel name, empty for other kinds
    pub name: String,

    pub start: Timestamp,
    pub end: Timestamp,
    pub process_id: u32,
    pub thread_id: u32,
    pub correlation_id: CorrelationId,
}

impl TraceRecord {
    /// Duration of the record in nanoseconds
    pub fn duration_ns(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }
}
