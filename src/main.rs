use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use hsa_trace::{
    ApiId, ApiInfoManager, Collaborators, Payload, TraceConfig, TraceEntry,
    collector::temp_file_name,
    runtime::{AgentHandle, AsyncCopyTime, KernelTime, QueueHandle, SignalHandle},
    sim::SimulatedRuntime,
    store::MemoryTraceStore,
    symbols::{StaticDeviceCatalog, SymbolTable},
};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt};

const API_TRACE_EXT: &str = ".atp";

/// Runs a simulated compute workload through the trace manager and writes the
/// per-process trace files.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// TOML file with trace settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Application threads issuing API calls
    #[arg(short, long, default_value_t = 4)]
    threads: usize,

    /// API calls per application thread
    #[arg(long, default_value_t = 64)]
    calls: u64,

    /// Async copies completed per application thread
    #[arg(long, default_value_t = 8)]
    copies: u64,

    /// How long the simulated application runs
    #[arg(long, default_value_t = 500)]
    run_ms: u64,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hsa_trace=info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    let cfg = TraceConfig::load(args.config.as_deref()).context("failed to load trace config")?;

    // timers only; application threads below are plain OS threads
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .context("failed to build timer runtime")?;

    let runtime = Arc::new(SimulatedRuntime::new());
    let store = Arc::new(MemoryTraceStore::new());
    let symbols = Arc::new(SymbolTable::new());
    let manager = Arc::new(ApiInfoManager::new(
        &cfg,
        Collaborators::new(
            runtime.clone(),
            store.clone(),
            symbols.clone(),
            Arc::new(StaticDeviceCatalog::new()),
        ),
        Some(rt.handle().clone()),
    ));
    manager.start();

    let agent = AgentHandle(0x1000);
    runtime.add_agent(agent, 0x67df);
    symbols.insert_code_symbol(0xc0de, 1);
    symbols.insert_symbol_name(1, "&__OpenCL_vector_add_kernel");

    let deadline = std::time::Instant::now() + Duration::from_millis(args.run_ms);
    let workers: Vec<_> = (0..args.threads)
        .map(|worker| {
            let manager = manager.clone();
            let runtime = runtime.clone();
            let (calls, copies) = (args.calls, args.copies);
            std::thread::spawn(move || {
                run_worker(
                    worker as u64,
                    &manager,
                    &runtime,
                    agent,
                    calls,
                    copies,
                    deadline,
                )
            })
        })
        .collect();
    for worker in workers {
        if worker.join().is_err() {
            tracing::error!("worker thread panicked");
        }
    }

    let pid = std::process::id();
    let summary = manager.flush_non_api_timestamp_data(pid);

    let api_path = temp_file_name(&cfg.temp_dir, pid, API_TRACE_EXT);
    let mut out = std::io::BufWriter::new(
        std::fs::File::create(&api_path)
            .with_context(|| format!("failed to create {}", api_path.display()))?,
    );
    let api_records = store.write_api_trace(&mut out)?;
    out.flush()?;

    manager.shutdown();
    tracing::info!(
        api_records,
        kernel_records = summary.kernel_records,
        async_copy_records = summary.async_copy_records,
        "trace written to {}",
        cfg.temp_dir.display()
    );
    Ok(())
}

fn run_worker(
    worker: u64,
    manager: &ApiInfoManager,
    runtime: &SimulatedRuntime,
    agent: AgentHandle,
    calls: u64,
    copies: u64,
    deadline: std::time::Instant,
) {
    let queue = QueueHandle(0x7f00_0000 + worker * 0x1000);
    if manager.should_intercept(ApiId::QueueCreate) {
        manager.add_queue(queue);
        manager.admit_entry(TraceEntry::new(
            ApiId::QueueCreate,
            0,
            0,
            Payload::QueueCreate { queue },
        ));
    }

    let pause = Duration::from_millis(1);
    for call in 0..calls {
        let start = call * 10;
        if manager.should_intercept(ApiId::SignalWaitScacquire) {
            manager.admit_entry(TraceEntry::call(ApiId::SignalWaitScacquire, start, start + 5));
        }
        runtime.push_kernel_time(KernelTime {
            kernel: 0xc0de,
            start,
            end: start + 7,
            agent,
            queue,
        });
        std::thread::sleep(pause);
    }

    for copy in 0..copies {
        let signal = SignalHandle((worker << 32) | copy);
        runtime.create_signal(signal, 1);
        manager.add_async_copy_completion_signal(signal);
        manager.admit_entry(TraceEntry::new(
            ApiId::AmdMemoryAsyncCopy,
            copy,
            copy + 1,
            Payload::AsyncCopy { completion: signal },
        ));

        // completion arrives on a thread the manager does not own
        let time = AsyncCopyTime {
            start: copy * 100,
            end: copy * 100 + 42,
        };
        let completer = std::thread::scope(|s| {
            s.spawn(|| runtime.complete_async_copy(signal, Some(time))).join()
        });
        if completer.is_err() {
            tracing::error!("completion thread panicked");
        }
    }

    if let Some(left) = deadline.checked_duration_since(std::time::Instant::now()) {
        std::thread::sleep(left);
    }
}
