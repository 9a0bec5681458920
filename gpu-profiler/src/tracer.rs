//! Tracing session controller
//!
//! A [`Tracer`] drives one profiling runtime through sessions. `start` turns
//! on the fixed set of activity kinds and subscribes to API callbacks, `stop`
//! turns them off again and flushes every outstanding buffer, so that all
//! records of the session are decoded by the time it returns.

use anyhow::Context;
use cutrace_shared::{ActivityKind, ActivityRecord, ActivitySummary, TraceRecord};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::buffer::BufferStats;
use crate::collector::TraceCollector;
use crate::config::TracerConfig;
use crate::decode::{self, Decoded};
use crate::error::{DecodeError, Result, TraceError};
use crate::hooks::NoopApiHook;
use crate::manager::ActivityManager;
use crate::runtime::{ActivityRuntime, ApiCallInfo, ApiHook, CallbackDomain, Subscription};

/// Activity kinds enabled for every session, in enable order
pub const SESSION_KINDS: &[ActivityKind] = &[
    ActivityKind::Context,
    ActivityKind::Driver,
    ActivityKind::Runtime,
    ActivityKind::Memcpy,
    ActivityKind::Memset,
    ActivityKind::Name,
    ActivityKind::Marker,
    ActivityKind::Kernel,
    ActivityKind::Overhead,
];

/// Lifecycle phase of a tracer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Tracing,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Tracing => f.write_str("tracing"),
        }
    }
}

/// GPU activity tracer
pub struct Tracer {
    runtime: Arc<dyn ActivityRuntime>,
    config: TracerConfig,
    manager: Arc<ActivityManager>,
    collector: Arc<TraceCollector>,
    hook: Arc<dyn ApiHook>,
    phase: SessionPhase,
    enabled: Vec<ActivityKind>,
    subscription: Option<Subscription>,
}

impl Tracer {
    /// Create a tracer and bind its buffer broker to `runtime`
    pub fn new(runtime: Arc<dyn ActivityRuntime>, config: TracerConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| TraceError::Config(e.to_string()))?;

        let manager = ActivityManager::new(Arc::clone(&runtime), config.buffer_size)?;
        let collector = Arc::new(TraceCollector::new(config.keep_records));
        manager.initialize(collector.clone())?;

        Ok(Self {
            runtime,
            config,
            manager,
            collector,
            hook: Arc::new(NoopApiHook),
            phase: SessionPhase::Idle,
            enabled: Vec::new(),
            subscription: None,
        })
    }

    /// Use `hook` for API callbacks of later sessions
    pub fn with_api_hook(mut self, hook: Arc<dyn ApiHook>) -> Self {
        self.hook = hook;
        self
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn buffer_stats(&self) -> &Arc<BufferStats> {
        self.manager.buffer_stats()
    }

    /// Start a tracing session
    ///
    /// On failure every kind enabled so far is disabled again and the tracer
    /// stays idle.
    pub fn start(&mut self) -> Result<()> {
        if self.phase != SessionPhase::Idle {
            return Err(TraceError::InvalidStateTransition {
                phase: self.phase,
                operation: "start",
            });
        }

        if let Some(path) = &self.config.log_path {
            self.collector
                .open_log(path, self.config.flush_per_record)?;
        }

        for &kind in SESSION_KINDS {
            if let Err(e) = self.runtime.enable_kind(kind) {
                warn!("failed to enable {} activity: {}", kind, e);
                self.rollback();
                return Err(e.into());
            }
            self.enabled.push(kind);
        }

        match self.runtime.subscribe(Arc::clone(&self.hook)) {
            Ok(subscription) => self.subscription = Some(subscription),
            Err(e) => {
                warn!("failed to subscribe to API callbacks: {}", e);
                self.rollback();
                return Err(e.into());
            }
        }

        self.phase = SessionPhase::Tracing;
        info!("Tracing started ({} activity kinds)", self.enabled.len());
        Ok(())
    }

    /// Undo a partial `start`
    fn rollback(&mut self) {
        for kind in self.enabled.drain(..) {
            if let Err(e) = self.runtime.disable_kind(kind) {
                warn!("failed to disable {} activity during rollback: {}", kind, e);
            }
        }
        if let Err(e) = self.collector.close_log() {
            warn!("failed to close trace log: {}", e);
        }
    }

    /// Stop the session and decode every outstanding record
    ///
    /// Teardown runs to the end even when a step fails; the first failure is
    /// returned and the tracer is idle afterwards.
    pub fn stop(&mut self) -> Result<()> {
        if self.phase != SessionPhase::Tracing {
            return Err(TraceError::InvalidStateTransition {
                phase: self.phase,
                operation: "stop",
            });
        }
        self.phase = SessionPhase::Idle;

        let mut first_error: Option<TraceError> = None;
        let mut keep = |result: Result<()>| {
            if let Err(e) = result {
                warn!("error while stopping tracer: {}", e);
                first_error.get_or_insert(e);
            }
        };

        for kind in self.enabled.drain(..) {
            keep(self.runtime.disable_kind(kind).map_err(Into::into));
        }
        if let Some(subscription) = self.subscription.take() {
            keep(self.runtime.unsubscribe(subscription).map_err(Into::into));
        }
        keep(self.runtime.flush_all().map_err(Into::into));
        keep(self.collector.close_log().map_err(Into::into));

        info!(
            "Tracing stopped: {} records, {} unknown, {} rejected",
            self.collector.record_count(),
            self.collector.unknown_count(),
            self.collector.rejected_count()
        );

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Decode a single activity record
    pub fn decode(&self, activity: &ActivityRecord) -> std::result::Result<Decoded, DecodeError> {
        decode::decode(activity)
    }

    /// Forward one intercepted API call to the session hook
    pub fn api_callback(&self, domain: CallbackDomain, callback_id: u32, info: &ApiCallInfo) {
        self.hook.on_api_call(domain, callback_id, info);
    }

    /// Snapshot of the records decoded so far
    pub fn get_records(&self) -> Vec<TraceRecord> {
        self.collector.records()
    }

    /// Drop the accumulated records
    pub fn clear_records(&self) {
        self.collector.clear();
    }

    pub fn summary(&self) -> ActivitySummary {
        ActivitySummary::from_records(&self.collector.records())
    }

    /// Write the record listing to `writer`
    pub fn write_trace<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        let records = self.collector.records();
        writeln!(writer, "{} records", records.len())?;
        for record in &records {
            writeln!(
                writer,
                "{} {} [{} - {}]",
                record.kind, record.name, record.start, record.end
            )?;
        }
        Ok(())
    }

    /// Print the record listing to stderr
    pub fn print_trace(&self) {
        let stderr = std::io::stderr();
        if let Err(e) = self.write_trace(&mut stderr.lock()) {
            warn!("failed to print trace: {}", e);
        }
    }

    /// Write the accumulated records to `path` as a JSON array
    pub fn export_json(&self, path: &Path) -> anyhow::Result<()> {
        info!("Exporting trace records to {}", path.display());

        let file = File::create(path)
            .with_context(|| format!("Failed to create output file: {}", path.display()))?;
        let writer = BufWriter::new(file);

        serde_json::to_writer_pretty(writer, &self.collector.records())
            .context("Failed to serialize trace records to JSON")?;

        Ok(())
    }
}

impl Drop for Tracer {
    fn drop(&mut self) {
        if self.phase == SessionPhase::Tracing {
            debug!("tracer dropped while tracing, stopping session");
            if let Err(e) = self.stop() {
                warn!("failed to stop tracing session on drop: {}", e);
            }
        }
    }
}
