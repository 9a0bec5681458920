use anyhow::Result;
use cutrace::runtime::{ActivityRuntime, RuntimeCall};
use cutrace::{
    ActivityKind, ActivityRecord, ApiCallInfo, ApiHook, CallbackDomain, SessionPhase,
    SimulatedRuntime, TraceError, Tracer, TracerConfig, SESSION_KINDS,
};
use cutrace_shared::{ApiActivity, KernelActivity};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn tracer_with(config: TracerConfig) -> (Arc<SimulatedRuntime>, Tracer) {
    let runtime = Arc::new(SimulatedRuntime::new());
    let tracer = Tracer::new(runtime.clone() as Arc<dyn ActivityRuntime>, config).unwrap();
    (runtime, tracer)
}

fn runtime_call(correlation_id: u32) -> ActivityRecord {
    ActivityRecord::Runtime(ApiActivity {
        cbid: 211,
        start: 100 + u64::from(correlation_id),
        end: 200 + u64::from(correlation_id),
        process_id: 1,
        thread_id: 1,
        correlation_id,
    })
}

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
        block: (1, 1, 1),
        static_shared_memory: 0,
        dynamic_shared_memory: 0,
    })
}

#[test]
fn test_stop_disables_what_start_enabled() -> Result<()> {
    let (runtime, mut tracer) = tracer_with(TracerConfig::in_memory());
    tracer.start()?;
    tracer.stop()?;

    let calls = runtime.calls();
    let enabled: BTreeSet<_> = calls
        .iter()
        .filter_map(|c| match c {
            RuntimeCall::Enable(kind) => Some(*kind),
            _ => None,
        })
        .collect();
    let disabled: BTreeSet<_> = calls
        .iter()
        .filter_map(|c| match c {
            RuntimeCall::Disable(kind) => Some(*kind),
            _ => None,
        })
        .collect();

    assert_eq!(enabled, disabled);
    assert_eq!(enabled, SESSION_KINDS.iter().copied().collect::<BTreeSet<_>>());

    // Flush comes after teardown of the enabled kinds and the subscription
    let flush = calls.iter().position(|c| *c == RuntimeCall::FlushAll).unwrap();
    let unsubscribe = calls
        .iter()
        .position(|c| matches!(c, RuntimeCall::Unsubscribe(_)))
        .unwrap();
    assert!(unsubscribe < flush);
    Ok(())
}

#[test]
fn test_outstanding_buffers_decoded_before_stop_returns() -> Result<()> {
    let (runtime, mut tracer) = tracer_with(TracerConfig::in_memory());
    tracer.start()?;

    const BUFFERS: u32 = 5;
    for i in 0..BUFFERS {
        runtime.emit(&runtime_call(i))?;
        runtime.seal_buffer();
    }
    assert_eq!(runtime.outstanding_buffers(), BUFFERS as usize);
    assert!(tracer.get_records().is_empty());

    tracer.stop()?;

    assert_eq!(runtime.deliveries(), u64::from(BUFFERS));
    assert_eq!(runtime.outstanding_buffers(), 0);
    assert_eq!(tracer.get_records().len(), BUFFERS as usize);
    assert_eq!(tracer.buffer_stats().outstanding(), 0);
    assert_eq!(tracer.buffer_stats().acquired(), u64::from(BUFFERS));
    Ok(())
}

#[test]
fn test_records_keep_buffer_order_across_buffers() -> Result<()> {
    let config = TracerConfig {
        buffer_size: 1024,
        ..TracerConfig::in_memory()
    };
    let (runtime, mut tracer) = tracer_with(config);
    tracer.start()?;

    for i in 0..100 {
        runtime.emit(&runtime_call(i))?;
        if i == 60 {
            runtime.deliver_completed();
        }
    }
    tracer.stop()?;

    let ids: Vec<u32> = tracer
        .get_records()
        .iter()
        .map(|r| r.correlation_id)
        .collect();
    assert_eq!(ids, (0..100).collect::<Vec<_>>());
    assert!(runtime.deliveries() > 1);
    Ok(())
}

#[test]
fn test_invalid_transitions() {
    let (_runtime, mut tracer) = tracer_with(TracerConfig::in_memory());

    assert!(matches!(
        tracer.stop(),
        Err(TraceError::InvalidStateTransition { .. })
    ));

    tracer.start().unwrap();
    assert!(matches!(
        tracer.start(),
        Err(TraceError::InvalidStateTransition { .. })
    ));
    assert_eq!(tracer.phase(), SessionPhase::Tracing);

    tracer.stop().unwrap();
    assert!(tracer.stop().is_err());
}

#[test]
fn test_failed_enable_rolls_back() {
    let (runtime, mut tracer) = tracer_with(TracerConfig::in_memory());
    runtime.fail_enable_of(ActivityKind::Kernel);

    let result = tracer.start();
    assert!(matches!(result, Err(TraceError::Runtime(_))));
    assert_eq!(tracer.phase(), SessionPhase::Idle);
    assert!(runtime.enabled_kinds().is_empty());
    assert!(!runtime.is_subscribed());

    let disabled: Vec<_> = runtime
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            RuntimeCall::Disable(kind) => Some(kind),
            _ => None,
        })
        .collect();
    let before_kernel: Vec<_> = SESSION_KINDS
        .iter()
        .copied()
        .take_while(|k| *k != ActivityKind::Kernel)
        .collect();
    assert_eq!(disabled, before_kernel);

    // Stop has nothing to undo
    assert!(tracer.stop().is_err());
}

#[test]
fn test_restart_after_failed_start() -> Result<()> {
    let (runtime, mut tracer) = tracer_with(TracerConfig::in_memory());
    runtime.fail_enable_of(ActivityKind::Overhead);
    assert!(tracer.start().is_err());

    let runtime = Arc::new(SimulatedRuntime::new());
    let mut tracer = Tracer::new(runtime.clone(), TracerConfig::in_memory())?;
    tracer.start()?;
    assert_eq!(runtime.enabled_kinds().len(), SESSION_KINDS.len());
    tracer.stop()?;
    Ok(())
}

#[derive(Default)]
struct CountingHook {
    calls: AtomicUsize,
}

impl ApiHook for CountingHook {
    fn on_api_call(&self, domain: CallbackDomain, callback_id: u32, _info: &ApiCallInfo) {
        assert_eq!(domain, CallbackDomain::DriverApi);
        assert_eq!(callback_id, 307);
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_api_hook_sees_calls_while_tracing() -> Result<()> {
    let hook = Arc::new(CountingHook::default());
    let (runtime, tracer) = tracer_with(TracerConfig::in_memory());
    let mut tracer = tracer.with_api_hook(hook.clone());

    runtime.invoke_api(CallbackDomain::DriverApi, 307, &ApiCallInfo::default());
    assert_eq!(hook.calls.load(Ordering::SeqCst), 0);

    tracer.start()?;
    runtime.invoke_api(CallbackDomain::DriverApi, 307, &ApiCallInfo::default());
    tracer.api_callback(CallbackDomain::DriverApi, 307, &ApiCallInfo::default());
    tracer.stop()?;

    runtime.invoke_api(CallbackDomain::DriverApi, 307, &ApiCallInfo::default());
    assert_eq!(hook.calls.load(Ordering::SeqCst), 2);
    Ok(())
}

#[test]
fn test_inverted_record_rejected() -> Result<()> {
    let (runtime, mut tracer) = tracer_with(TracerConfig::in_memory());
    tracer.start()?;
    runtime.emit(&kernel(2000, 1000))?;
    runtime.emit(&kernel(1000, 1500))?;
    tracer.stop()?;

    let records = tracer.get_records();
    assert_eq!(records.len(), 1);
    assert!(records.iter().all(|r| r.end >= r.start));
    Ok(())
}

#[test]
fn test_records_accumulate_until_cleared() -> Result<()> {
    let (runtime, mut tracer) = tracer_with(TracerConfig::in_memory());

    for session in 0..2 {
        tracer.start()?;
        runtime.emit(&runtime_call(session))?;
        tracer.stop()?;
    }
    assert_eq!(tracer.get_records().len(), 2);
    assert_eq!(tracer.summary().total_records, 2);

    tracer.clear_records();
    assert!(tracer.get_records().is_empty());
    Ok(())
}

#[test]
fn test_records_outside_session_not_recorded() -> Result<()> {
    let (runtime, mut tracer) = tracer_with(TracerConfig::in_memory());
    assert!(!runtime.emit(&kernel(0, 10))?);

    tracer.start()?;
    tracer.stop()?;
    assert!(!runtime.emit(&kernel(0, 10))?);
    assert!(tracer.get_records().is_empty());
    Ok(())
}

#[test]
fn test_concurrent_emit_and_delivery() -> Result<()> {
    const THREADS: u32 = 8;
    const PER_THREAD: u32 = 500;

    let config = TracerConfig {
        buffer_size: 1024,
        ..TracerConfig::in_memory()
    };
    let (runtime, mut tracer) = tracer_with(config);
    tracer.start()?;

    let emitting = AtomicUsize::new(THREADS as usize);
    std::thread::scope(|scope| {
        for t in 0..THREADS {
            let runtime = &runtime;
            let emitting = &emitting;
            scope.spawn(move || {
                for i in 0..PER_THREAD {
                    assert!(runtime.emit(&runtime_call(t * PER_THREAD + i)).unwrap());
                }
                emitting.fetch_sub(1, Ordering::SeqCst);
            });
        }

        let runtime = &runtime;
        let emitting = &emitting;
        scope.spawn(move || {
            while emitting.load(Ordering::SeqCst) > 0 {
                runtime.deliver_completed();
                std::thread::yield_now();
            }
        });
    });

    tracer.stop()?;

    let records = tracer.get_records();
    assert_eq!(records.len(), (THREADS * PER_THREAD) as usize);

    let ids: BTreeSet<u32> = records.iter().map(|r| r.correlation_id).collect();
    assert_eq!(ids, (0..THREADS * PER_THREAD).collect::<BTreeSet<_>>());

    // Each thread's records keep the order they were emitted in
    for t in 0..THREADS {
        let range = t * PER_THREAD..(t + 1) * PER_THREAD;
        let mine: Vec<u32> = records
            .iter()
            .map(|r| r.correlation_id)
            .filter(|id| range.contains(id))
            .collect();
        assert_eq!(mine, range.collect::<Vec<_>>());
    }

    assert_eq!(runtime.outstanding_buffers(), 0);
    assert_eq!(tracer.buffer_stats().outstanding(), 0);
    assert_eq!(
        tracer.buffer_stats().acquired(),
        tracer.buffer_stats().released()
    );
    Ok(())
}
