use anyhow::Context as _;
use phasebench::{BenchmarkParams, IterationRunner, WallClockProfiler, workload_fn};
use std::hint::black_box;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::EnvFilter;

/// Runs a contended-counter benchmark. An optional argument names a JSON file
/// with benchmark parameters; otherwise one worker per core is used.
fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let params = match std::env::args().nth(1) {
        Some(path) => BenchmarkParams::from_json_file(&path)
            .with_context(|| format!("failed to load benchmark parameters from {path}"))?,
        None => BenchmarkParams::builder()
            .name("shared-counter")
            .threads(num_cpus::get())
            .build(),
    };

    let counter = AtomicU64::new(0);
    let workload = workload_fn(move |ctx| {
        ctx.measure("increment", || {
            black_box(counter.fetch_add(1, Ordering::Relaxed));
            Ok(())
        })
    });

    let mut runner = IterationRunner::new(params, workload)
        .context("failed to start the runner")?
        .with_profiler(WallClockProfiler::new());
    let run = runner.run_benchmark().context("benchmark failed")?;
    runner.shutdown()?;

    println!("{}", serde_json::to_string_pretty(&run)?);
    Ok(())
}
