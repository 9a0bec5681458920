//! Trace record collector
//!
//! Decodes activity records delivered by the manager and appends the results
//! to the in-memory record list and the session's trace log.

use cutrace_shared::{ActivityRecord, TraceRecord};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{trace, warn};

use crate::decode::decode;
use crate::manager::ActivityHandler;
use crate::metrics;
use crate::sink::LogSink;

/// Sink side of a tracing session
#[derive(Debug, Default)]
pub struct TraceCollector {
    keep_records: bool,
    records: Mutex<Vec<TraceRecord>>,
    log: Mutex<Option<LogSink>>,
    unknown: AtomicU64,
    rejected: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl TraceCollector {
    pub fn new(keep_records: bool) -> Self {
        Self {
            keep_records,
            ..Self::default()
        }
    }

    /// Open the trace log for this session
    pub fn open_log(&self, path: &Path, flush_per_entry: bool) -> std::io::Result<()> {
        let sink = LogSink::open(path, flush_per_entry)?;
        *lock(&self.log) = Some(sink);
        Ok(())
    }

    /// Flush and close the trace log, if one is open
    pub fn close_log(&self) -> std::io::Result<()> {
        match lock(&self.log).take() {
            Some(sink) => sink.close(),
            None => Ok(()),
        }
    }

    /// Snapshot of the records collected so far
    pub fn records(&self) -> Vec<TraceRecord> {
        lock(&self.records).clone()
    }

    pub fn record_count(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn clear(&self) {
        lock(&self.records).clear();
    }

    /// Records with a kind the decoder has no variant for
    pub fn unknown_count(&self) -> u64 {
        self.unknown.load(Ordering::Relaxed)
    }

    /// Records dropped because they end before they start
    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    fn ingest(&self, activity: &ActivityRecord) {
        let decoded = match decode(activity) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("skipping activity record: {}", e);
                self.rejected.fetch_add(1, Ordering::Relaxed);
                metrics::RECORDS_REJECTED.inc();
                return;
            }
        };

        match decoded.record {
            Some(record) => {
                metrics::RECORDS_DECODED
                    .with_label_values(&[record.kind.as_str()])
                    .inc();
                if self.keep_records {
                    lock(&self.records).push(record);
                }
            }
            None => {
                trace!("unknown activity kind {}", activity.raw_kind());
                self.unknown.fetch_add(1, Ordering::Relaxed);
                metrics::RECORDS_UNKNOWN.inc();
            }
        }

        if let Some(sink) = lock(&self.log).as_mut() {
            if let Err(e) = sink.append(&decoded.entry) {
                warn!("failed to append to trace log {}: {}", sink.path().display(), e);
            }
        }
    }
}

impl ActivityHandler for TraceCollector {
    fn handle_activity(&self, activity: ActivityRecord) {
        self.ingest(&activity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cutrace_shared::{KernelActivity, MemcpyActivity};

    fn kernel(start: u64, end: u64) -> ActivityRecord {
        ActivityRecord::Kernel(KernelActivity {
            name: "matmul".to_string(),
            start,
            end,
            device_id: 0,
            context_id: 1,
            stream_id: 2,
            correlation_id: 42,
            grid: (1, 1, 1),
            block: (32, 1, 1),
            static_shared_memory: 0,
            dynamic_shared_memory: 0,
        })
    }

    #[test]
    fn test_collects_and_logs() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("trace.txt");

        let collector = TraceCollector::new(true);
        collector.open_log(&path, false).unwrap();
        collector.handle_activity(kernel(1000, 1500));
        collector.handle_activity(ActivityRecord::Memcpy(MemcpyActivity {
            copy_kind: 2,
            start: 100,
            end: 300,
            device_id: 0,
            context_id: 1,
            stream_id: 2,
            correlation_id: 43,
            runtime_correlation_id: 41,
            bytes: 4096,
        }));
        collector.close_log().unwrap();

        let records = collector.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].kind, "KERNEL");
        assert_eq!(records[1].kind, "MEMCPY");

        let log = std::fs::read_to_string(&path).unwrap();
        assert!(log.contains("duration=500"));
        assert!(log.contains("duration=200 bytes=4096"));
        assert!(log.find("KERNEL").unwrap() < log.find("MEMCPY").unwrap());
    }

    #[test]
    fn test_unknown_logged_not_recorded() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("trace.txt");

        let collector = TraceCollector::new(true);
        collector.open_log(&path, true).unwrap();
        collector.handle_activity(ActivityRecord::Unknown { kind: 77 });

        assert_eq!(collector.record_count(), 0);
        assert_eq!(collector.unknown_count(), 1);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "    Unknown Activity 77\n\n"
        );
    }

    #[test]
    fn test_inverted_interval_rejected() {
        let collector = TraceCollector::new(true);
        collector.handle_activity(kernel(2000, 1000));

        assert_eq!(collector.record_count(), 0);
        assert_eq!(collector.rejected_count(), 1);
    }

    #[test]
    fn test_keep_records_disabled() {
        let collector = TraceCollector::new(false);
        collector.handle_activity(kernel(0, 10));
        assert!(collector.records().is_empty());
    }
}
