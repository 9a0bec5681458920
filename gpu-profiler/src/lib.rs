//! GPU activity tracing
//!
//! Traces GPU kernels, memory transfers and driver/runtime API calls through
//! a profiling runtime's activity buffers. The [`ActivityManager`] brokers
//! buffers between the runtime and the [`Tracer`], which controls sessions,
//! decodes records and writes them to a text log and an in-memory list.

pub mod buffer;
pub mod collector;
pub mod config;
pub mod decode;
pub mod error;
pub mod fatal;
pub mod hooks;
pub mod manager;
pub mod metrics;
pub mod runtime;
pub mod sink;
pub mod tracer;

pub use buffer::{ActivityBuffer, BufferAllocator, BufferStats, DEFAULT_BUFFER_SIZE};
pub use config::TracerConfig;
pub use decode::Decoded;
pub use error::{DecodeError, Result, RuntimeError, TraceError};
pub use fatal::OrExit;
pub use hooks::{LoggingApiHook, NoopApiHook};
pub use manager::{ActivityHandler, ActivityManager, BufferReport};
pub use runtime::{
    ActivityRuntime, ApiCallInfo, ApiHook, BufferClient, CallbackDomain, CallbackSite,
    SimulatedRuntime,
};
pub use tracer::{SessionPhase, Tracer, SESSION_KINDS};

#[cfg(feature = "cuda")]
pub use runtime::cupti::CuptiRuntime;

pub use cutrace_shared::{ActivityKind, ActivityRecord, ActivitySummary, TraceRecord};
