//! Activity buffer broker
//!
//! The profiling runtime pushes work at us through two callbacks: it asks for
//! an empty buffer, and later hands the buffer back filled with records. The
//! [`ActivityManager`] answers both, walks the records of every completed
//! buffer in order and forwards them to the bound [`ActivityHandler`].

use cutrace_shared::utils::format_bytes;
use cutrace_shared::ActivityRecord;
use std::ptr::NonNull;
use std::sync::{Arc, RwLock};
use tracing::{debug, trace, warn};

use crate::buffer::{ActivityBuffer, BufferAllocator, BufferStats};
use crate::error::{RuntimeError, TraceError};
use crate::fatal;
use crate::runtime::{ActivityRuntime, BufferClient, Records};

/// Receiver of decoded activity records
pub trait ActivityHandler: Send + Sync {
    fn handle_activity(&self, activity: ActivityRecord);
}

/// Outcome of processing one completed buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferReport {
    /// Records forwarded to the handler
    pub records: usize,

    /// Bytes of the buffer that held records
    pub valid_size: usize,
}

/// Broker between the profiling runtime and the tracer
pub struct ActivityManager {
    runtime: Arc<dyn ActivityRuntime>,
    allocator: BufferAllocator,
    handler: RwLock<Option<Arc<dyn ActivityHandler>>>,
}

impl ActivityManager {
    /// Create a manager handing out buffers of `buffer_size` bytes
    pub fn new(runtime: Arc<dyn ActivityRuntime>, buffer_size: usize) -> Result<Arc<Self>, TraceError> {
        let allocator = BufferAllocator::new(buffer_size)?;
        debug!("activity buffers of {}", format_bytes(buffer_size as u64));

        Ok(Arc::new(Self {
            runtime,
            allocator,
            handler: RwLock::new(None),
        }))
    }

    /// Bind `handler` and register this manager's buffer callbacks
    ///
    /// A later call replaces the binding.
    pub fn initialize(self: &Arc<Self>, handler: Arc<dyn ActivityHandler>) -> Result<(), TraceError> {
        {
            let mut bound = self.handler.write().unwrap_or_else(|e| e.into_inner());
            if bound.is_some() {
                debug!("replacing bound activity handler");
            }
            *bound = Some(handler);
        }

        let client: Arc<dyn BufferClient> = Arc::clone(self) as Arc<dyn BufferClient>;
        self.runtime.register_buffer_client(client)?;
        Ok(())
    }

    /// Answer a buffer request: `(buffer, capacity, max_records)`
    ///
    /// `max_records` is always 0, letting the runtime fill the buffer.
    pub fn on_buffer_requested(&self) -> (ActivityBuffer, usize, usize) {
        let buffer = self.allocator.acquire();
        let capacity = buffer.capacity();
        (buffer, capacity, 0)
    }

    /// Decode a completed buffer and forward its records in order
    ///
    /// The buffer is released when this returns, whether decoding succeeded
    /// or not.
    pub fn on_buffer_completed(
        &self,
        buffer: ActivityBuffer,
        valid_size: usize,
    ) -> Result<BufferReport, RuntimeError> {
        trace!(
            "buffer completed: {:p}, capacity {}, valid {}",
            buffer.as_ptr(),
            buffer.capacity(),
            valid_size
        );

        if valid_size == 0 {
            return Ok(BufferReport::default());
        }
        if valid_size > buffer.capacity() {
            return Err(RuntimeError::CorruptRecord {
                offset: buffer.capacity(),
                reason: format!(
                    "valid size {} exceeds buffer capacity {}",
                    valid_size,
                    buffer.capacity()
                ),
            });
        }

        let handler = self
            .handler
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let Some(handler) = handler else {
            warn!("activity buffer completed with no handler bound, dropping it");
            return Ok(BufferReport {
                records: 0,
                valid_size,
            });
        };

        let mut records = 0;
        for record in Records::new(self.runtime.as_ref(), &buffer.as_slice()[..valid_size]) {
            handler.handle_activity(record?);
            records += 1;
        }

        trace!("decoded {} records", records);
        Ok(BufferReport {
            records,
            valid_size,
        })
    }

    pub fn buffer_stats(&self) -> &Arc<BufferStats> {
        self.allocator.stats()
    }
}

impl BufferClient for ActivityManager {
    fn buffer_requested(&self) -> ActivityBuffer {
        self.on_buffer_requested().0
    }

    fn buffer_completed(&self, buffer: ActivityBuffer, valid_size: usize) {
        if let Err(e) = self.on_buffer_completed(buffer, valid_size) {
            fatal::terminate("decoding completed activity buffer", &e);
        }
    }

    unsafe fn reclaim(&self, ptr: NonNull<u8>, capacity: usize) -> ActivityBuffer {
        self.allocator.reclaim(ptr, capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::simulated::codec;
    use crate::runtime::SimulatedRuntime;
    use cutrace_shared::{ApiActivity, MemcpyActivity};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<ActivityRecord>>);

    impl ActivityHandler for Collect {
        fn handle_activity(&self, activity: ActivityRecord) {
            self.0.lock().unwrap().push(activity);
        }
    }

    fn setup() -> (Arc<ActivityManager>, Arc<Collect>) {
        let runtime = Arc::new(SimulatedRuntime::new());
        let manager = ActivityManager::new(runtime, 4096).unwrap();
        let collect = Arc::new(Collect::default());
        manager.initialize(collect.clone()).unwrap();
        (manager, collect)
    }

    fn driver(correlation_id: u32) -> ActivityRecord {
        ActivityRecord::Driver(ApiActivity {
            cbid: 5,
            start: 10,
            end: 20,
            process_id: 1,
            thread_id: 2,
            correlation_id,
        })
    }

    fn fill(buffer: &mut ActivityBuffer, records: &[ActivityRecord]) -> usize {
        let mut used = 0;
        for record in records {
            let bytes = codec::encode(record);
            buffer.as_mut_slice()[used..used + bytes.len()].copy_from_slice(&bytes);
            used += bytes.len();
        }
        used
    }

    #[test]
    fn test_buffer_request_contract() {
        let (manager, _) = setup();
        let (buffer, capacity, max_records) = manager.on_buffer_requested();

        assert_eq!(capacity, 4096);
        assert_eq!(buffer.capacity(), capacity);
        assert_eq!(max_records, 0);
        assert_eq!(buffer.as_ptr() as usize % 8, 0);
    }

    #[test]
    fn test_two_requests_are_distinct() {
        let (manager, _) = setup();
        let (first, cap, _) = manager.on_buffer_requested();
        let (second, _, _) = manager.on_buffer_requested();

        let a = first.as_ptr() as usize;
        let b = second.as_ptr() as usize;
        assert!(a + cap <= b || b + cap <= a, "buffers overlap");
        assert_eq!(manager.buffer_stats().outstanding(), 2);

        manager.on_buffer_completed(second, 0).unwrap();
        assert_eq!(manager.buffer_stats().released(), 1);
        manager.on_buffer_completed(first, 0).unwrap();
        assert_eq!(manager.buffer_stats().released(), 2);
    }

    #[test]
    fn test_records_forwarded_in_order() {
        let (manager, collect) = setup();
        let (mut buffer, _, _) = manager.on_buffer_requested();
        let records: Vec<_> = (0..10).map(driver).collect();
        let used = fill(&mut buffer, &records);

        let report = manager.on_buffer_completed(buffer, used).unwrap();
        assert_eq!(report.records, 10);
        assert_eq!(*collect.0.lock().unwrap(), records);
        assert_eq!(manager.buffer_stats().outstanding(), 0);
    }

    #[test]
    fn test_empty_buffer_released_without_decode() {
        let (manager, collect) = setup();
        let (buffer, _, _) = manager.on_buffer_requested();

        let report = manager.on_buffer_completed(buffer, 0).unwrap();
        assert_eq!(report, BufferReport::default());
        assert!(collect.0.lock().unwrap().is_empty());
        assert_eq!(manager.buffer_stats().released(), 1);
    }

    #[test]
    fn test_corrupt_buffer_still_released() {
        let (manager, collect) = setup();
        let (mut buffer, _, _) = manager.on_buffer_requested();
        let mut used = fill(
            &mut buffer,
            &[ActivityRecord::Memcpy(MemcpyActivity {
                copy_kind: 1,
                start: 100,
                end: 300,
                device_id: 0,
                context_id: 1,
                stream_id: 2,
                correlation_id: 3,
                runtime_correlation_id: 4,
                bytes: 4096,
            })],
        );
        // A header claiming a payload far past the valid region
        let garbage = codec::encode_raw(4, &[]);
        buffer.as_mut_slice()[used..used + 8].copy_from_slice(&garbage);
        buffer.as_mut_slice()[used + 4] = 0xFF;
        used += 8;

        let result = manager.on_buffer_completed(buffer, used);
        assert!(matches!(result, Err(RuntimeError::CorruptRecord { .. })));
        // The record before the corruption was still forwarded
        assert_eq!(collect.0.lock().unwrap().len(), 1);
        assert_eq!(manager.buffer_stats().released(), 1);
    }

    #[test]
    fn test_valid_size_past_capacity_rejected() {
        let (manager, _) = setup();
        let (buffer, capacity, _) = manager.on_buffer_requested();
        assert!(manager.on_buffer_completed(buffer, capacity + 1).is_err());
        assert_eq!(manager.buffer_stats().released(), 1);
    }

    #[test]
    fn test_no_handler_drops_buffer() {
        let runtime = Arc::new(SimulatedRuntime::new());
        let manager = ActivityManager::new(runtime, 1024).unwrap();
        let (mut buffer, _, _) = manager.on_buffer_requested();
        let used = fill(&mut buffer, &[driver(1)]);

        let report = manager.on_buffer_completed(buffer, used).unwrap();
        assert_eq!(report.records, 0);
        assert_eq!(manager.buffer_stats().released(), 1);
    }

    #[test]
    fn test_rebinding_replaces_handler() {
        let (manager, first) = setup();
        let second = Arc::new(Collect::default());
        manager.initialize(second.clone()).unwrap();

        let (mut buffer, _, _) = manager.on_buffer_requested();
        let used = fill(&mut buffer, &[driver(7)]);
        manager.on_buffer_completed(buffer, used).unwrap();

        assert!(first.0.lock().unwrap().is_empty());
        assert_eq!(second.0.lock().unwrap().len(), 1);
    }
}
