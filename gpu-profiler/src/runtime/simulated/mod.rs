//! In-process profiling runtime
//!
//! `SimulatedRuntime` follows the same buffer protocol as the vendor runtime:
//! it asks its buffer client for empty buffers, packs emitted records into
//! them, and hands buffers back either when they are sealed and delivered or
//! when everything is flushed. It also keeps a log of the calls made against
//! it so callers can check how a session drove the runtime.

pub mod codec;

use cutrace_shared::{ActivityKind, ActivityRecord};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, trace};

use super::{
    ActivityRuntime, ApiCallInfo, ApiHook, BufferClient, CallbackDomain, RecordCursor,
    Subscription,
};
use crate::buffer::ActivityBuffer;
use crate::error::RuntimeError;

/// A call made against the simulated runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Enable(ActivityKind),
    Disable(ActivityKind),
    Subscribe(Subscription),
    Unsubscribe(Subscription),
    RegisterCallbacks,
    FlushAll,
}

/// A buffer owned by the runtime, with the number of bytes written so far
struct PendingBuffer {
    buffer: ActivityBuffer,
    used: usize,
}

#[derive(Default)]
struct SimState {
    enabled: BTreeSet<ActivityKind>,
    calls: Vec<RuntimeCall>,
    client: Option<Weak<dyn BufferClient>>,
    hooks: BTreeMap<Subscription, Arc<dyn ApiHook>>,
    next_subscription: u64,
    filling: Option<PendingBuffer>,
    sealed: Vec<PendingBuffer>,
    failing_enable: BTreeSet<ActivityKind>,
    deliveries: u64,
}

impl SimState {
    fn client(&self) -> Result<Arc<dyn BufferClient>, RuntimeError> {
        self.client
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or(RuntimeError::NotInitialized)
    }

    fn seal(&mut self) {
        if let Some(pending) = self.filling.take() {
            self.sealed.push(pending);
        }
    }
}

/// Simulated GPU profiling runtime
#[derive(Default)]
pub struct SimulatedRuntime {
    state: Mutex<SimState>,
}

impl SimulatedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make every later attempt to enable `kind` fail
    pub fn fail_enable_of(&self, kind: ActivityKind) {
        self.state().failing_enable.insert(kind);
    }

    /// Kinds currently enabled
    pub fn enabled_kinds(&self) -> Vec<ActivityKind> {
        self.state().enabled.iter().copied().collect()
    }

    /// Every call made against the runtime, in order
    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.state().calls.clone()
    }

    pub fn is_subscribed(&self) -> bool {
        !self.state().hooks.is_empty()
    }

    /// Completed buffers handed back to the client so far
    pub fn deliveries(&self) -> u64 {
        self.state().deliveries
    }

    /// Buffers requested from the client and not yet handed back
    pub fn outstanding_buffers(&self) -> usize {
        let state = self.state();
        state.sealed.len() + usize::from(state.filling.is_some())
    }

    /// Record an activity as the runtime would while a kind is enabled
    ///
    /// Returns `Ok(false)` when the record's kind is not enabled. Records with
    /// a kind tag the tracer does not know are always recorded, as a newer
    /// runtime would produce them.
    pub fn emit(&self, record: &ActivityRecord) -> Result<bool, RuntimeError> {
        let mut state = self.state();
        if let Some(kind) = record.kind() {
            if !state.enabled.contains(&kind) {
                trace!("dropping {} record, kind not enabled", kind);
                return Ok(false);
            }
        }

        let bytes = codec::encode(record);
        let fits = state
            .filling
            .as_ref()
            .map(|p| p.buffer.capacity() - p.used >= bytes.len())
            .unwrap_or(false);

        if !fits {
            state.seal();
            let buffer = state.client()?.buffer_requested();
            if bytes.len() > buffer.capacity() {
                return Err(RuntimeError::RecordTooLarge {
                    needed: bytes.len(),
                    capacity: buffer.capacity(),
                });
            }
            state.filling = Some(PendingBuffer { buffer, used: 0 });
        }

        if let Some(pending) = state.filling.as_mut() {
            let start = pending.used;
            pending.buffer.as_mut_slice()[start..start + bytes.len()].copy_from_slice(&bytes);
            pending.used += bytes.len();
        }
        Ok(true)
    }

    /// Close the buffer being filled; the next record goes to a fresh buffer
    pub fn seal_buffer(&self) {
        self.state().seal();
    }

    /// Hand back sealed buffers, as the runtime does asynchronously while
    /// tracing. The buffer being filled is kept.
    pub fn deliver_completed(&self) -> usize {
        let (client, pending) = {
            let mut state = self.state();
            let pending = std::mem::take(&mut state.sealed);
            (state.client(), pending)
        };
        self.deliver(client, pending)
    }

    /// Invoke every subscribed API hook
    pub fn invoke_api(&self, domain: CallbackDomain, callback_id: u32, info: &ApiCallInfo) {
        let hooks: Vec<_> = self.state().hooks.values().cloned().collect();
        for hook in hooks {
            hook.on_api_call(domain, callback_id, info);
        }
    }

    /// Runs completions without holding the state lock, so clients may call
    /// back into the runtime.
    fn deliver(
        &self,
        client: Result<Arc<dyn BufferClient>, RuntimeError>,
        pending: Vec<PendingBuffer>,
    ) -> usize {
        let count = pending.len();
        match client {
            Ok(client) => {
                for PendingBuffer { buffer, used } in pending {
                    client.buffer_completed(buffer, used);
                }
                self.state().deliveries += count as u64;
                count
            }
            Err(_) => {
                debug!("no buffer client, dropping {} completed buffers", count);
                0
            }
        }
    }
}

impl ActivityRuntime for SimulatedRuntime {
    fn enable_kind(&self, kind: ActivityKind) -> Result<(), RuntimeError> {
        let mut state = self.state();
        if state.failing_enable.contains(&kind) {
            return Err(RuntimeError::Rejected {
                call: "enable_kind",
                reason: format!("{} activity is not supported", kind),
            });
        }
        state.enabled.insert(kind);
        state.calls.push(RuntimeCall::Enable(kind));
        Ok(())
    }

    fn disable_kind(&self, kind: ActivityKind) -> Result<(), RuntimeError> {
        let mut state = self.state();
        state.enabled.remove(&kind);
        state.calls.push(RuntimeCall::Disable(kind));
        Ok(())
    }

    fn subscribe(&self, hook: Arc<dyn ApiHook>) -> Result<Subscription, RuntimeError> {
        let mut state = self.state();
        if !state.hooks.is_empty() {
            return Err(RuntimeError::Rejected {
                call: "subscribe",
                reason: "multiple subscribers not supported".into(),
            });
        }
        state.next_subscription += 1;
        let subscription = Subscription::new(state.next_subscription);
        state.hooks.insert(subscription, hook);
        state.calls.push(RuntimeCall::Subscribe(subscription));
        Ok(subscription)
    }

    fn unsubscribe(&self, subscription: Subscription) -> Result<(), RuntimeError> {
        let mut state = self.state();
        if state.hooks.remove(&subscription).is_none() {
            return Err(RuntimeError::Rejected {
                call: "unsubscribe",
                reason: format!("unknown subscription {}", subscription.raw()),
            });
        }
        state.calls.push(RuntimeCall::Unsubscribe(subscription));
        Ok(())
    }

    fn register_buffer_client(&self, client: Arc<dyn BufferClient>) -> Result<(), RuntimeError> {
        let mut state = self.state();
        state.client = Some(Arc::downgrade(&client));
        state.calls.push(RuntimeCall::RegisterCallbacks);
        Ok(())
    }

    fn flush_all(&self) -> Result<(), RuntimeError> {
        let (client, pending) = {
            let mut state = self.state();
            state.calls.push(RuntimeCall::FlushAll);
            state.seal();
            let pending = std::mem::take(&mut state.sealed);
            (state.client(), pending)
        };
        let delivered = self.deliver(client, pending);
        debug!("flushed {} activity buffers", delivered);
        Ok(())
    }

    fn next_record(
        &self,
        buffer: &[u8],
        cursor: &mut RecordCursor,
    ) -> Result<Option<ActivityRecord>, RuntimeError> {
        let offset = match cursor.position() {
            None => 0,
            Some(last) => codec::next_offset(buffer, last)?,
        };
        if offset >= buffer.len() {
            return Ok(None);
        }

        let record = codec::decode_at(buffer, offset)?;
        cursor.advance_to(offset);
        Ok(Some(record))
    }
}
