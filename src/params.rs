//! Benchmark and iteration configuration.
//!
//! Parameters are plain values handed to the runner at construction; nothing
//! is read from process-wide state. They can be built in code through the
//! typed builders or loaded from JSON.

use crate::error::{HarnessError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use typed_builder::TypedBuilder;

/// How a benchmark measures its workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Mode {
    /// Operations per unit of time over a timed window.
    #[default]
    Throughput,
    /// Time per operation over a timed window.
    AverageTime,
    /// Sampled operation times over a timed window.
    SampleTime,
    /// One batch per worker, no timed window.
    SingleShotTime,
}

impl Mode {
    pub fn is_single_shot(self) -> bool {
        matches!(self, Mode::SingleShotTime)
    }
}

/// How tasks are mapped onto the worker pool's threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ThreadingModel {
    /// Slot `i` always runs on pool thread `i`. Thread identity is stable
    /// across iterations.
    #[default]
    Pinned,
    /// Any idle pool thread takes the next task. Thread identity may change
    /// between iterations.
    Shared,
}

impl ThreadingModel {
    pub fn stable_threads(self) -> bool {
        matches!(self, ThreadingModel::Pinned)
    }
}

/// Strategy for pinning worker threads to CPU cores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PinningStrategy {
    /// No pinning (standard OS scheduling).
    #[default]
    None,
    /// Linear pinning (worker i -> logical processor i).
    Linear,
    /// Pin to physical cores only (even-numbered logical processors), avoiding SMT contention.
    AvoidSMT,
}

/// When profilers are started relative to the workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProfilerTiming {
    /// Before any task is submitted, so submission and setup costs are seen.
    #[default]
    BeforeSubmit,
    /// Once every worker has passed setup.
    AfterSetup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IterationKind {
    Warmup,
    Measurement,
}

/// Shape of the iterations of one kind.
#[derive(Debug, Clone, PartialEq, Eq, TypedBuilder, Serialize, Deserialize)]
#[serde(default)]
pub struct IterationParams {
    #[builder(default = IterationKind::Measurement)]
    pub kind: IterationKind,
    /// Number of iterations.
    #[builder(default = 5)]
    pub count: usize,
    /// Length of the measurement window of duration-based modes.
    #[builder(default = Duration::from_secs(1))]
    pub time: Duration,
    /// Operations per invocation in single-shot mode.
    #[builder(default = 1)]
    pub batch_size: usize,
}

impl Default for IterationParams {
    fn default() -> Self {
        IterationParams::builder().build()
    }
}

impl IterationParams {
    pub fn warmup(count: usize, time: Duration) -> Self {
        IterationParams::builder()
            .kind(IterationKind::Warmup)
            .count(count)
            .time(time)
            .build()
    }

    pub fn measurement(count: usize, time: Duration) -> Self {
        IterationParams::builder()
            .kind(IterationKind::Measurement)
            .count(count)
            .time(time)
            .build()
    }
}

/// Configuration of one benchmark.
///
/// # Example
///
/// ```
/// use phasebench::{BenchmarkParams, Mode};
/// use std::time::Duration;
///
/// let params = BenchmarkParams::builder()
///     .name("queue")
///     .threads(4)
///     .thread_groups(vec![3, 1])
///     .mode(Mode::Throughput)
///     .timeout(Duration::from_secs(30))
///     .build();
/// assert!(params.validate().is_ok());
/// assert_eq!(params.pool_size(), 4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, TypedBuilder, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkParams {
    #[builder(default = String::from("benchmark"), setter(into))]
    pub name: String,
    /// Number of worker tasks per iteration.
    #[builder(default = 1)]
    pub threads: usize,
    /// Subgroup weights, see [`distribute`](crate::distribute).
    #[builder(default = vec![1])]
    pub thread_groups: Vec<usize>,
    #[builder(default)]
    pub mode: Mode,
    /// Budget for all workers to complete after stop is signaled.
    #[builder(default = Duration::from_secs(600))]
    pub timeout: Duration,
    /// Whether workers rendezvous at the setup and teardown phases.
    #[builder(default = true)]
    pub synchronize_iterations: bool,
    #[builder(default)]
    pub threading: ThreadingModel,
    /// Pool size; defaults to the thread count.
    #[builder(default, setter(strip_option))]
    pub pool_threads: Option<usize>,
    #[builder(default)]
    pub pinning: PinningStrategy,
    #[builder(default)]
    pub profiler_timing: ProfilerTiming,
    #[builder(default = IterationParams::warmup(5, Duration::from_secs(1)))]
    pub warmup: IterationParams,
    #[builder(default = IterationParams::measurement(5, Duration::from_secs(1)))]
    pub measurement: IterationParams,
}

impl Default for BenchmarkParams {
    fn default() -> Self {
        BenchmarkParams::builder().build()
    }
}

impl BenchmarkParams {
    /// Single-shot iterations never synchronize: each worker's timing starts
    /// as soon as it runs.
    pub fn should_synchronize(&self) -> bool {
        self.synchronize_iterations && !self.mode.is_single_shot()
    }

    pub fn pool_size(&self) -> usize {
        self.pool_threads.unwrap_or(self.threads)
    }

    /// Checks the parameters for values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(HarnessError::config("threads must be positive"));
        }
        if self.thread_groups.is_empty() {
            return Err(HarnessError::config("thread_groups must not be empty"));
        }
        if self.thread_groups.contains(&0) {
            return Err(HarnessError::config("thread_groups weights must be positive"));
        }
        if self.timeout.is_zero() {
            return Err(HarnessError::config("timeout must be positive"));
        }
        if self.pool_size() < self.threads {
            return Err(HarnessError::config(format!(
                "pool of {} threads cannot host {} concurrent workers",
                self.pool_size(),
                self.threads
            )));
        }
        for iteration in [&self.warmup, &self.measurement] {
            if iteration.batch_size == 0 {
                return Err(HarnessError::config("batch_size must be positive"));
            }
        }
        if self.measurement.count == 0 {
            return Err(HarnessError::config("at least one measurement iteration is required"));
        }
        Ok(())
    }

    /// Parses and validates parameters from JSON. Missing fields take their
    /// defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let params: BenchmarkParams = serde_json::from_str(json)?;
        params.validate()?;
        Ok(params)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }
}
