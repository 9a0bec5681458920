//! Profiling runtime seam
//!
//! The tracer never captures activity itself. It talks to a profiling
//! runtime through [`ActivityRuntime`]: enabling activity kinds, subscribing
//! to API callbacks, registering the buffer broker and walking the records of
//! completed buffers. [`cupti::CuptiRuntime`] (feature `cuda`) is the real
//! backend; [`SimulatedRuntime`] implements the same contract in-process.

#[cfg(feature = "cuda")]
pub mod cupti;
pub mod simulated;

pub use simulated::{RuntimeCall, SimulatedRuntime};

use cutrace_shared::{ActivityKind, ActivityRecord};
use std::ptr::NonNull;
use std::sync::Arc;

use crate::buffer::ActivityBuffer;
use crate::error::RuntimeError;

/// API callback domains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackDomain {
    DriverApi,
    RuntimeApi,
    Resource,
    Synchronize,
    Nvtx,
    Other(u32),
}

impl CallbackDomain {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::DriverApi,
            2 => Self::RuntimeApi,
            3 => Self::Resource,
            4 => Self::Synchronize,
            5 => Self::Nvtx,
            other => Self::Other(other),
        }
    }
}

/// Whether an API callback fires on entry to or exit from the call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackSite {
    Enter,
    Exit,
}

/// What the runtime tells us about an intercepted API call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiCallInfo {
    pub site: Option<CallbackSite>,
    pub function_name: Option<String>,
    pub symbol_name: Option<String>,
    pub correlation_id: Option<u32>,
}

/// Hook invoked for every intercepted API call of a subscribed session
pub trait ApiHook: Send + Sync {
    fn on_api_call(&self, domain: CallbackDomain, callback_id: u32, info: &ApiCallInfo);
}

/// Receiver of the runtime's buffer requests and completions
pub trait BufferClient: Send + Sync {
    /// Hand out an empty buffer for the runtime to fill
    fn buffer_requested(&self) -> ActivityBuffer;

    /// Take back a filled buffer; `valid_size` bytes hold records
    fn buffer_completed(&self, buffer: ActivityBuffer, valid_size: usize);

    /// Rebuild a buffer that crossed the FFI boundary as a raw pointer
    ///
    /// # Safety
    /// `ptr` and `capacity` must come from [`ActivityBuffer::into_raw`] on a
    /// buffer produced by `buffer_requested` of this client, reclaimed once.
    unsafe fn reclaim(&self, ptr: NonNull<u8>, capacity: usize) -> ActivityBuffer;
}

/// Handle for an API callback subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Subscription(u64);

impl Subscription {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Position of the last record returned from a buffer
///
/// A fresh cursor points before the first record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordCursor {
    last: Option<usize>,
}

impl RecordCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Byte offset of the last returned record
    pub fn position(&self) -> Option<usize> {
        self.last
    }

    pub fn advance_to(&mut self, offset: usize) {
        self.last = Some(offset);
    }
}

/// The capability set of a GPU profiling runtime
///
/// Implementations hold their buffer client weakly, so a dropped manager
/// stops receiving callbacks instead of being kept alive by the runtime.
pub trait ActivityRuntime: Send + Sync {
    fn enable_kind(&self, kind: ActivityKind) -> Result<(), RuntimeError>;

    fn disable_kind(&self, kind: ActivityKind) -> Result<(), RuntimeError>;

    /// Subscribe `hook` to every API callback domain
    fn subscribe(&self, hook: Arc<dyn ApiHook>) -> Result<Subscription, RuntimeError>;

    fn unsubscribe(&self, subscription: Subscription) -> Result<(), RuntimeError>;

    /// Route buffer requests and completions to `client`
    fn register_buffer_client(&self, client: Arc<dyn BufferClient>) -> Result<(), RuntimeError>;

    /// Deliver every buffer holding undelivered records, blocking until the
    /// completions have run
    fn flush_all(&self) -> Result<(), RuntimeError>;

    /// Decode the record after `cursor` in `buffer`
    ///
    /// Returns `Ok(None)` once the buffer holds no more records.
    fn next_record(
        &self,
        buffer: &[u8],
        cursor: &mut RecordCursor,
    ) -> Result<Option<ActivityRecord>, RuntimeError>;
}

/// Iterator over the records of a completed buffer
pub struct Records<'a> {
    runtime: &'a dyn ActivityRuntime,
    buffer: &'a [u8],
    cursor: RecordCursor,
    done: bool,
}

impl<'a> Records<'a> {
    pub fn new(runtime: &'a dyn ActivityRuntime, buffer: &'a [u8]) -> Self {
        Self {
            runtime,
            buffer,
            cursor: RecordCursor::new(),
            done: false,
        }
    }
}

impl Iterator for Records<'_> {
    type Item = Result<ActivityRecord, RuntimeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.runtime.next_record(self.buffer, &mut self.cursor) {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_domain_mapping() {
        assert_eq!(CallbackDomain::from_raw(1), CallbackDomain::DriverApi);
        assert_eq!(CallbackDomain::from_raw(2), CallbackDomain::RuntimeApi);
        assert_eq!(CallbackDomain::from_raw(5), CallbackDomain::Nvtx);
        assert_eq!(CallbackDomain::from_raw(77), CallbackDomain::Other(77));
    }

    #[test]
    fn test_cursor_starts_before_first_record() {
        let mut cursor = RecordCursor::new();
        assert_eq!(cursor.position(), None);
        cursor.advance_to(48);
        assert_eq!(cursor.position(), Some(48));
    }
}
