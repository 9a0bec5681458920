//! Activity record decoding
//!
//! Turns an [`ActivityRecord`] into a [`TraceRecord`] and the text entry that
//! goes to the trace log. Fields shared between kinds (`device=`, `context=`,
//! `stream=`, `correlation=`, `duration=`) use the same labels and order in
//! every entry.

use cutrace_shared::utils::time::duration_ns;
use cutrace_shared::{ActivityRecord, ApiActivity, KernelActivity, TraceRecord};

use crate::error::DecodeError;

pub const LABEL_MEMCPY: &str = "MEMCPY";
pub const LABEL_MEMSET: &str = "MEMSET";
pub const LABEL_DRIVER: &str = "DRIVER";
pub const LABEL_RUNTIME: &str = "RUNTIME";
pub const LABEL_KERNEL: &str = "KERNEL";
pub const LABEL_CONCURRENT_KERNEL: &str = "CONC KERNEL";

/// Result of decoding one activity record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    /// Normalized record, `None` for kinds without one
    pub record: Option<TraceRecord>,

    /// Log entry, including its trailing blank line
    pub entry: String,
}

/// Kind label used in trace records and log entries
pub fn label(activity: &ActivityRecord) -> Option<&'static str> {
    match activity {
        ActivityRecord::Memcpy(_) => Some(LABEL_MEMCPY),
        ActivityRecord::Memset(_) => Some(LABEL_MEMSET),
        ActivityRecord::Driver(_) => Some(LABEL_DRIVER),
        ActivityRecord::Runtime(_) => Some(LABEL_RUNTIME),
        ActivityRecord::Kernel(_) => Some(LABEL_KERNEL),
        ActivityRecord::ConcurrentKernel(_) => Some(LABEL_CONCURRENT_KERNEL),
        ActivityRecord::Unknown { .. } => None,
    }
}

/// Decode an activity record
///
/// Records whose end precedes their start are rejected. Unknown kinds decode
/// to a sentinel entry and no trace record.
pub fn decode(activity: &ActivityRecord) -> Result<Decoded, DecodeError> {
    let duration = match (activity.interval(), label(activity)) {
        (Some((start, end)), Some(kind)) => {
            duration_ns(start, end).ok_or(DecodeError::InvertedInterval { kind, start, end })?
        }
        _ => 0,
    };

    let decoded = match activity {
        ActivityRecord::Memcpy(m) => Decoded {
            record: Some(TraceRecord {
                kind: LABEL_MEMCPY.to_string(),
                name: String::new(),
                start: m.start,
                end: m.end,
                process_id: m.device_id,
                thread_id: m.stream_id,
                correlation_id: m.correlation_id,
            }),
            entry: format!(
                "MEMCPY copyKind={} [ {} - {} ] device={} context={} stream={} correlation={} runtime_correlation={} duration={} bytes={}\n\n",
                m.copy_kind,
                m.start,
                m.end,
                m.device_id,
                m.context_id,
                m.stream_id,
                m.correlation_id,
                m.runtime_correlation_id,
                duration,
                m.bytes
            ),
        },
        ActivityRecord::Memset(m) => Decoded {
            record: Some(TraceRecord {
                kind: LABEL_MEMSET.to_string(),
                name: String::new(),
                start: m.start,
                end: m.end,
                process_id: m.device_id,
                thread_id: m.stream_id,
                correlation_id: m.correlation_id,
            }),
            entry: format!(
                "MEMSET memoryKind={} [ {} - {} ] device={} context={} stream={} correlation={} duration={} bytes={}\n\n",
                m.memory_kind,
                m.start,
                m.end,
                m.device_id,
                m.context_id,
                m.stream_id,
                m.correlation_id,
                duration,
                m.bytes
            ),
        },
        ActivityRecord::Driver(api) => decode_api(LABEL_DRIVER, api, duration),
        ActivityRecord::Runtime(api) => decode_api(LABEL_RUNTIME, api, duration),
        ActivityRecord::Kernel(k) => decode_kernel(LABEL_KERNEL, k, duration),
        ActivityRecord::ConcurrentKernel(k) => decode_kernel(LABEL_CONCURRENT_KERNEL, k, duration),
        ActivityRecord::Unknown { kind } => Decoded {
            record: None,
            entry: format!("    Unknown Activity {}\n\n", kind),
        },
    };

    Ok(decoded)
}

fn decode_api(label: &'static str, api: &ApiActivity, duration: u64) -> Decoded {
    Decoded {
        record: Some(TraceRecord {
            kind: label.to_string(),
            name: String::new(),
            start: api.start,
            end: api.end,
            process_id: api.process_id,
            thread_id: api.thread_id,
            correlation_id: api.correlation_id,
        }),
        entry: format!(
            "{} cbid={} [ {} - {} ] process={} thread={} correlation={} duration={}\n\n",
            label, api.cbid, api.start, api.end, api.process_id, api.thread_id, api.correlation_id, duration
        ),
    }
}

fn decode_kernel(label: &'static str, k: &KernelActivity, duration: u64) -> Decoded {
    let (grid_x, grid_y, grid_z) = k.grid;
    let (block_x, block_y, block_z) = k.block;

    Decoded {
        record: Some(TraceRecord {
            kind: label.to_string(),
            name: k.name.clone(),
            start: k.start,
            end: k.end,
            process_id: k.device_id,
            thread_id: k.stream_id,
            correlation_id: k.correlation_id,
        }),
        entry: format!(
            "{} \"{}\" [ {} - {} ] device={} context={} stream={} correlation={} duration={}\n\n    grid=[{},{},{}], block=[{},{},{}], shared memory (static {}, dynamic {})\n\n",
            label,
            k.name,
            k.start,
            k.end,
            k.device_id,
            k.context_id,
            k.stream_id,
            k.correlation_id,
            duration,
            grid_x,
            grid_y,
            grid_z,
            block_x,
            block_y,
            block_z,
            k.static_shared_memory,
            k.dynamic_shared_memory
        ),
    }
}
