//! Activity record definitions
//!
//! These types are the decoded form of the records the GPU profiling runtime
//! writes into activity buffers. The runtime layer validates the kind tag of
//! every raw record before it produces one of these values.

use serde::{Deserialize, Serialize};

/// Timestamp in nanoseconds, as reported by the profiling runtime
pub type Timestamp = u64;

/// Correlation ID linking an API call to the GPU work it launched
pub type CorrelationId = u32;

pub type DeviceId = u32;
pub type ContextId = u32;
pub type StreamId = u32;
pub type ProcessId = u32;
pub type ThreadId = u32;

/// Activity kinds known to the tracer, numbered as the runtime numbers them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum ActivityKind {
    Memcpy = 1,
    Memset = 2,
    Kernel = 3,
    Driver = 4,
    Runtime = 5,
    Context = 9,
    ConcurrentKernel = 10,
    Name = 11,
    Marker = 12,
    Overhead = 17,
}

impl ActivityKind {
    /// Map a raw kind tag to a known kind
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::Memcpy),
            2 => Some(Self::Memset),
            3 => Some(Self::Kernel),
            4 => Some(Self::Driver),
            5 => Some(Self::Runtime),
            9 => Some(Self::Context),
            10 => Some(Self::ConcurrentKernel),
            11 => Some(Self::Name),
            12 => Some(Self::Marker),
            17 => Some(Self::Overhead),
            _ => None,
        }
    }

    /// The raw kind tag
    pub fn as_raw(self) -> u32 {
        self as u32
    }
}

impl std::fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Memcpy => "memcpy",
            Self::Memset => "memset",
            Self::Kernel => "kernel",
            Self::Driver => "driver",
            Self::Runtime => "runtime",
            Self::Context => "context",
            Self::ConcurrentKernel => "concurrent_kernel",
            Self::Name => "name",
            Self::Marker => "marker",
            Self::Overhead => "overhead",
        };
        f.write_str(name)
    }
}

/// Memory copy activity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemcpyActivity {
    /// Direction of the copy (host to device, device to host, ...)
    pub copy_kind: u8,
    pub start: Timestamp,
    pub end: Timestamp,
    pub device_id: DeviceId,
    pub context_id: ContextId,
    pub stream_id: StreamId,
    pub correlation_id: CorrelationId,

    /// Correlation ID of the runtime API call that issued the copy
    pub runtime_correlation_id: CorrelationId,
    pub bytes: u64,
}

/// Memory set activity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemsetActivity {
    /// Kind of memory that was set (device, pinned, managed, ...)
    pub memory_kind: u16,
    pub start: Timestamp,
    pub end: Timestamp,
    pub device_id: DeviceId,
    pub context_id: ContextId,
    pub stream_id: StreamId,
    pub correlation_id: CorrelationId,
    pub bytes: u64,
}

/// Driver or runtime API call activity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiActivity {
    /// Callback ID of the API function that was called
    pub cbid: u32,
    pub start: Timestamp,
    pub end: Timestamp,
    pub process_id: ProcessId,
    pub thread_id: ThreadId,
    pub correlation_id: CorrelationId,
}

/// Kernel execution activity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelActivity {
    pub name: String,
    pub start: Timestamp,
    pub end: Timestamp,
    pub device_id: DeviceId,
    pub context_id: ContextId,
    pub stream_id: StreamId,
    pub correlation_id: CorrelationId,
    pub grid: (i32, i32, i32),
    pub block: (i32, i32, i32),
    pub static_shared_memory: i32,
    pub dynamic_shared_memory: i32,
}

/// A decoded activity record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityRecord {
    Memcpy(MemcpyActivity),
    Memset(MemsetActivity),
    Driver(ApiActivity),
    Runtime(ApiActivity),
    Kernel(KernelActivity),
    ConcurrentKernel(KernelActivity),

    /// A record whose kind has no dedicated variant, carrying its raw tag
    Unknown { kind: u32 },
}

impl ActivityRecord {
    /// Raw kind tag of the record
    pub fn raw_kind(&self) -> u32 {
        match self {
            ActivityRecord::Memcpy(_) => ActivityKind::Memcpy.as_raw(),
            ActivityRecord::Memset(_) => ActivityKind::Memset.as_raw(),
            ActivityRecord::Driver(_) => ActivityKind::Driver.as_raw(),
            ActivityRecord::Runtime(_) => ActivityKind::Runtime.as_raw(),
            ActivityRecord::Kernel(_) => ActivityKind::Kernel.as_raw(),
            ActivityRecord::ConcurrentKernel(_) => ActivityKind::ConcurrentKernel.as_raw(),
            ActivityRecord::Unknown { kind } => *kind,
        }
    }

    /// Known kind of the record, if any
    pub fn kind(&self) -> Option<ActivityKind> {
        ActivityKind::from_raw(self.raw_kind())
    }

    /// Start and end timestamps, if the record carries them
    pub fn interval(&self) -> Option<(Timestamp, Timestamp)> {
        match self {
            ActivityRecord::Memcpy(r) => Some((r.start, r.end)),
            ActivityRecord::Memset(r) => Some((r.start, r.end)),
            ActivityRecord::Driver(r) | ActivityRecord::Runtime(r) => Some((r.start, r.end)),
            ActivityRecord::Kernel(r) | ActivityRecord::ConcurrentKernel(r) => {
                Some((r.start, r.end))
            }
            ActivityRecord::Unknown { .. } => None,
        }
    }
}
