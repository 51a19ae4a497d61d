//! # phasebench - Phase-Synchronized Concurrent Iteration Engine
//!
//! The engine inside a multi-threaded benchmark harness. It runs one workload
//! on many worker threads at once and makes sure they are measured over the
//! same window of time.
//!
//! ## Architecture
//!
//! Every iteration moves all workers through the same phases:
//!
//! - **Setup**: each worker prepares, then announces that it is ready. Workers
//!   keep spinning the operation (warmup) until every peer is ready.
//! - **Measurement**: counted from the setup release until the runner
//!   requests stop.
//! - **Teardown**: each worker announces that it left the measured region and
//!   keeps spinning (warmdown) until every peer left too.
//!
//! Key components:
//!
//! - **Distributor** ([`distribute`]): maps threads onto weighted thread groups
//!   for asymmetric workloads such as producer/consumer pairs.
//! - **Iteration control** ([`IterationControl`]): stop and failure signals plus
//!   the two rendezvous gates. A failing worker force-releases both gates, so
//!   one failure never strands its peers.
//! - **Worker pool** ([`worker::WorkerPool`]): fixed OS threads, reused across
//!   iterations, optionally pinned to cores.
//! - **Runner** ([`IterationRunner`]): drives an iteration from submission to
//!   aggregation, escalating to thread interruption when workers overrun the
//!   timeout.
//!
//! ## Example
//!
//! ```no_run
//! use phasebench::{BenchmarkParams, IterationRunner, workload_fn};
//! use std::time::Duration;
//!
//! let params = BenchmarkParams::builder()
//!     .name("counter")
//!     .threads(4)
//!     .timeout(Duration::from_secs(10))
//!     .build();
//!
//! let workload = workload_fn(|ctx| {
//!     ctx.measure("increment", || {
//!         std::hint::black_box(1 + 1);
//!         Ok(())
//!     })
//! });
//!
//! let mut runner = IterationRunner::new(params, workload)?;
//! let run = runner.run_benchmark()?;
//! for iteration in &run.measurement {
//!     println!("{:.0} ops/s", iteration.total("increment"));
//! }
//! # Ok::<(), phasebench::HarnessError>(())
//! ```

pub mod context;
pub mod control;
pub mod distribution;
pub mod error;
pub mod gate;
pub mod interrupt;
pub mod job;
pub mod metrics;
pub mod params;
pub mod profiler;
pub mod result;
pub mod runner;
pub mod state;
mod task;
pub mod worker;
pub mod workload;

pub use context::WorkerContext;
pub use control::{IterationControl, Phase};
pub use distribution::{ThreadAssignment, distribute};
pub use error::{HarnessError, Result, WorkerFailure, WorkloadError};
pub use params::{
    BenchmarkParams, IterationKind, IterationParams, Mode, PinningStrategy, ProfilerTiming,
    ThreadingModel,
};
pub use profiler::{Profiler, ProfilerError, WallClockProfiler};
pub use result::{BenchmarkRun, IterationResult, Measurement, ResultEntry, WorkerResults};
pub use runner::IterationRunner;
pub use workload::{FnWorkload, Workload, workload_fn};
