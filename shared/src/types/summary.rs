//! Aggregates over the records of a tracing session

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::record::TraceRecord;
use crate::utils::time::format_duration_ns;

/// Kind labels that represent work executed on the device
const DEVICE_KINDS: [&str; 4] = ["KERNEL", "CONC KERNEL", "MEMCPY", "MEMSET"];

/// Record count and accumulated duration for one kind label
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindStats {
    pub count: u64,
    pub total_duration_ns: u64,
}

/// Summary of a tracing session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivitySummary {
    /// Stats keyed by record kind label
    pub kinds: BTreeMap<String, KindStats>,

    /// Total number of records
    pub total_records: u64,
}

impl ActivitySummary {
    /// Create an empty summary
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a summary from a slice of records
    pub fn from_records(records: &[TraceRecord]) -> Self {
        let mut summary = Self::new();
        for record in records {
            summary.add_record(record);
        }
        summary
    }

    /// Add a record
    pub fn add_record(&mut self, record: &TraceRecord) {
        let stats = self.kinds.entry(record.kind.clone()).or_default();
        stats.count = stats.count.saturating_add(1);
        stats.total_duration_ns = stats.total_duration_ns.saturating_add(record.duration_ns());
        self.total_records = self.total_records.saturating_add(1);
    }

    /// Time spent in kernels and memory operations
    pub fn total_gpu_time_ns(&self) -> u64 {
        DEVICE_KINDS
            .iter()
            .filter_map(|kind| self.kinds.get(*kind))
            .fold(0u64, |total, stats| total.saturating_add(stats.total_duration_ns))
    }

    /// Number of kernel executions, serialized and concurrent
    pub fn kernel_count(&self) -> u64 {
        ["KERNEL", "CONC KERNEL"]
            .iter()
            .filter_map(|kind| self.kinds.get(*kind))
            .fold(0u64, |total, stats| total.saturating_add(stats.count))
    }
}

impl std::fmt::Display for ActivitySummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{} records, {} kernels, GPU time {}",
            self.total_records,
            self.kernel_count(),
            format_duration_ns(self.total_gpu_time_ns())
        )?;
        for (kind, stats) in &self.kinds {
            writeln!(
                f,
                "  {:<12} {:>8} {:>12}",
                kind,
                stats.count,
                format_duration_ns(stats.total_duration_ns)
            )?;
        }
        Ok(())
    }
}
