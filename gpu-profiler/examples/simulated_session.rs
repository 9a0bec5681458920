//! Run one tracing session against the simulated runtime
//!
//! Usage: simulated_session [config.toml]
//!
//! Set RUST_LOG=debug to see API callbacks and buffer traffic.

use anyhow::{Context, Result};
use cutrace::runtime::{ActivityRuntime, CallbackDomain, CallbackSite};
use cutrace::{
    metrics, ActivityRecord, ApiCallInfo, LoggingApiHook, OrExit, SimulatedRuntime, Tracer,
    TracerConfig,
};
use cutrace_shared::{ApiActivity, KernelActivity, MemcpyActivity, MemsetActivity};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn load_config() -> Result<TracerConfig> {
    match std::env::args().nth(1) {
        Some(path) => {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path))?;
            TracerConfig::from_toml_str(&contents)
                .with_context(|| format!("Failed to load config file: {}", path))
        }
        None => Ok(TracerConfig::default()),
    }
}

/// A small workload: copy in, memset, launch, copy out
fn workload(correlation: u32, base: u64) -> Vec<ActivityRecord> {
    let launch = ApiActivity {
        cbid: 211,
        start: base,
        end: base + 40,
        process_id: std::process::id(),
        thread_id: 1,
        correlation_id: correlation,
    };

    vec![
        ActivityRecord::Runtime(launch.clone()),
        ActivityRecord::Driver(ApiActivity {
            cbid: 307,
            start: base + 5,
            end: base + 30,
            ..launch
        }),
        ActivityRecord::Memcpy(MemcpyActivity {
            copy_kind: 1,
            start: base + 50,
            end: base + 250,
            device_id: 0,
            context_id: 1,
            stream_id: 7,
            correlation_id: correlation + 1,
            runtime_correlation_id: correlation,
            bytes: 1 << 20,
        }),
        ActivityRecord::Memset(MemsetActivity {
            memory_kind: 3,
            start: base + 260,
            end: base + 300,
            device_id: 0,
            context_id: 1,
            stream_id: 7,
            correlation_id: correlation + 2,
            bytes: 4096,
        }),
        ActivityRecord::Kernel(KernelActivity {
            name: "matmul".to_string(),
            start: base + 310,
            end: base + 810,
            device_id: 0,
            context_id: 1,
            stream_id: 7,
            correlation_id: correlation + 3,
            grid: (64, 64, 1),
            block: (16, 16, 1),
            static_shared_memory: 2048,
            dynamic_shared_memory: 0,
        }),
        ActivityRecord::Unknown { kind: 41 },
    ]
}

fn main() -> Result<()> {
    init_tracing();

    let config = load_config()?;
    info!("Writing trace log to {:?}", config.log_path);

    let runtime = Arc::new(SimulatedRuntime::new());
    let mut tracer = Tracer::new(runtime.clone() as Arc<dyn ActivityRuntime>, config)
        .or_exit("creating tracer")
        .with_api_hook(Arc::new(LoggingApiHook));

    tracer.start().or_exit("starting trace session");

    for iteration in 0..4u32 {
        let correlation = iteration * 10;
        runtime.invoke_api(
            CallbackDomain::RuntimeApi,
            211,
            &ApiCallInfo {
                site: Some(CallbackSite::Enter),
                function_name: Some("cudaLaunchKernel".to_string()),
                symbol_name: Some("matmul".to_string()),
                correlation_id: Some(correlation),
            },
        );

        for record in workload(correlation, u64::from(iteration) * 1_000) {
            runtime.emit(&record).or_exit("recording activity");
        }
        runtime.seal_buffer();
        if iteration % 2 == 1 {
            runtime.deliver_completed();
        }
    }

    tracer.stop().or_exit("stopping trace session");

    tracer.print_trace();
    println!("{}", tracer.summary());
    print!("{}", metrics::encode_metrics()?);

    Ok(())
}
