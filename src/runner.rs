//! Iteration orchestration.
//!
//! [`IterationRunner`] owns the worker pool, the cached thread assignments
//! and the per-worker states. Each call to [`IterationRunner::run_iteration`]
//! walks through the same sequence:
//!
//! 1. **Build** a fresh [`IterationControl`] for the iteration.
//! 2. **Submit** one [`WorkerTask`] per thread.
//! 3. **Await setup**: wait until every worker is past its setup checkpoint.
//! 4. **Run window**: let the measurement window elapse. A worker completing
//!    inside the window ends it early.
//! 5. **Signal stop** and **await teardown**.
//! 6. **Collect** every completion before a deadline, interrupting stuck
//!    workers on a fixed cadence once it has passed.
//! 7. **Aggregate** the results, stop the profilers, and report.
//!
//! The runner's own waiting happens outside the window workers measure, so
//! submission and collection costs never land inside a measurement.

use crate::control::{IterationControl, Phase};
use crate::distribution::{ThreadAssignment, distribute};
use crate::error::{HarnessError, Result, WorkerFailure};
use crate::interrupt::TaskBinding;
use crate::params::{BenchmarkParams, IterationKind, IterationParams, ProfilerTiming};
use crate::profiler::{Profiler, ProfilerSession};
use crate::result::{BenchmarkRun, IterationResult, ResultEntry};
use crate::state::StateCache;
use crate::task::{Completion, WorkerTask};
use crate::worker::WorkerPool;
use crate::workload::Workload;
use crossbeam::channel::{self, Receiver, RecvTimeoutError};
#[cfg(feature = "metrics")]
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shortest wait between two collection polls.
const COLLECT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Runs the iterations of one benchmark on a pool of worker threads.
///
/// # Example
///
/// ```no_run
/// use phasebench::{BenchmarkParams, IterationParams, IterationRunner, workload_fn};
/// use std::time::Duration;
///
/// let params = BenchmarkParams::builder().threads(4).build();
/// let workload = workload_fn(|ctx| ctx.measure("noop", || Ok(())));
///
/// let mut runner = IterationRunner::new(params, workload)?;
/// let result = runner.run_iteration(&IterationParams::measurement(1, Duration::from_millis(100)), true)?;
/// println!("{} ops/s", result.total("noop"));
/// runner.shutdown()?;
/// # Ok::<(), phasebench::HarnessError>(())
/// ```
pub struct IterationRunner<W: Workload> {
    params: BenchmarkParams,
    workload: Arc<W>,
    cache: Arc<StateCache<W::State>>,
    pool: Option<WorkerPool>,
    profilers: Vec<Box<dyn Profiler>>,
    warmups_run: usize,
    measurements_run: usize,
}

/// Completions gathered for one iteration.
struct Collected {
    completions: Vec<Completion>,
    interrupt_rounds: usize,
}

/// Worker outcomes merged across the iteration.
#[derive(Default)]
struct Aggregate {
    results: Vec<ResultEntry>,
    ops_total: u64,
    ops_measured: u64,
    failures: Vec<WorkerFailure>,
    benign: usize,
    internal: Option<String>,
}

impl Aggregate {
    fn from_completions(mut completions: Vec<Completion>) -> Self {
        completions.sort_by_key(|c| c.slot);
        let mut aggregate = Aggregate::default();
        for completion in completions {
            match completion.outcome {
                Ok(mut worker) => {
                    aggregate.results.append(&mut worker.results);
                    aggregate.ops_total += worker.ops_total;
                    aggregate.ops_measured += worker.ops_measured;
                }
                Err(failure) if failure.error.is_internal() => {
                    if aggregate.internal.is_none() {
                        aggregate.internal = Some(failure.to_string());
                    }
                }
                Err(failure) if failure.benign => aggregate.benign += 1,
                Err(failure) => aggregate.failures.push(failure),
            }
        }
        aggregate
    }
}

impl<W: Workload> IterationRunner<W> {
    /// Validates `params`, distributes the threads, and starts the pool.
    pub fn new(params: BenchmarkParams, workload: W) -> Result<Self> {
        params.validate()?;
        let assignments = distribute(params.threads, &params.thread_groups)?;
        let pool = WorkerPool::with_config(params.pool_size(), params.threading, params.pinning)?;
        let cache = Arc::new(StateCache::new(
            assignments,
            params.threading.stable_threads(),
        ));

        tracing::debug!(
            benchmark = %params.name,
            threads = params.threads,
            pool = params.pool_size(),
            groups = ?params.thread_groups,
            "runner created"
        );
        Ok(IterationRunner {
            params,
            workload: Arc::new(workload),
            cache,
            pool: Some(pool),
            profilers: Vec::new(),
            warmups_run: 0,
            measurements_run: 0,
        })
    }

    /// Adds a profiler. Profilers start in the order they were added.
    pub fn with_profiler(mut self, profiler: impl Profiler + 'static) -> Self {
        self.add_profiler(Box::new(profiler));
        self
    }

    pub fn add_profiler(&mut self, profiler: Box<dyn Profiler>) {
        self.profilers.push(profiler);
    }

    pub fn params(&self) -> &BenchmarkParams {
        &self.params
    }

    pub fn workload(&self) -> &W {
        &self.workload
    }

    /// Thread assignments, computed once for the whole benchmark.
    pub fn assignments(&self) -> &[ThreadAssignment] {
        self.cache.assignments()
    }

    pub fn state_cache(&self) -> &StateCache<W::State> {
        &self.cache
    }

    #[cfg(feature = "metrics")]
    pub fn metrics(&self) -> Option<crate::metrics::MetricsSnapshot> {
        self.pool.as_ref().map(|pool| pool.metrics().snapshot())
    }

    /// Runs all warmup iterations, then all measurement iterations. The final
    /// measurement iteration is flagged as the last one.
    pub fn run_benchmark(&mut self) -> Result<BenchmarkRun> {
        let warmup = IterationParams {
            kind: IterationKind::Warmup,
            ..self.params.warmup.clone()
        };
        let measurement = IterationParams {
            kind: IterationKind::Measurement,
            ..self.params.measurement.clone()
        };

        tracing::info!(
            benchmark = %self.params.name,
            warmup = warmup.count,
            measurement = measurement.count,
            "benchmark started"
        );
        let mut run = BenchmarkRun {
            name: self.params.name.clone(),
            ..BenchmarkRun::default()
        };
        for _ in 0..warmup.count {
            run.warmup.push(self.run_iteration(&warmup, false)?);
        }
        for i in 0..measurement.count {
            let last = i + 1 == measurement.count;
            run.measurement.push(self.run_iteration(&measurement, last)?);
        }
        tracing::info!(
            benchmark = %self.params.name,
            interrupt_rounds = run.interrupt_rounds(),
            "benchmark finished"
        );
        Ok(run)
    }

    /// Runs one iteration across all worker threads.
    pub fn run_iteration(
        &mut self,
        iteration: &IterationParams,
        last_iteration: bool,
    ) -> Result<IterationResult> {
        if iteration.batch_size == 0 {
            return Err(HarnessError::config("batch_size must be positive"));
        }
        let index = match iteration.kind {
            IterationKind::Warmup => &mut self.warmups_run,
            IterationKind::Measurement => &mut self.measurements_run,
        };
        let current = *index;
        *index += 1;

        let outcome = self.execute_iteration(iteration, current, last_iteration);

        #[cfg(feature = "metrics")]
        if let Some(pool) = &self.pool {
            let metrics = pool.metrics();
            match &outcome {
                Ok(result) => {
                    metrics.iterations_completed.fetch_add(1, Ordering::Relaxed);
                    metrics
                        .interrupt_rounds
                        .fetch_add(result.interrupt_rounds as u64, Ordering::Relaxed);
                }
                Err(e) => {
                    metrics.iterations_failed.fetch_add(1, Ordering::Relaxed);
                    if let HarnessError::Workload { interrupt_rounds, .. } = e {
                        metrics
                            .interrupt_rounds
                            .fetch_add(*interrupt_rounds as u64, Ordering::Relaxed);
                    }
                }
            }
        }

        outcome
    }

    fn execute_iteration(
        &mut self,
        iteration: &IterationParams,
        index: usize,
        last_iteration: bool,
    ) -> Result<IterationResult> {
        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| HarnessError::Pool("runner is shut down".into()))?;
        let params = &self.params;
        let threads = params.threads;
        let started = Instant::now();
        tracing::info!(kind = ?iteration.kind, index, threads, last_iteration, "iteration started");

        // BUILD
        let control = Arc::new(IterationControl::new(
            threads,
            params.should_synchronize(),
            last_iteration,
        ));
        let bindings: Vec<Arc<TaskBinding>> =
            (0..threads).map(|_| Arc::new(TaskBinding::new())).collect();
        let (tx, rx) = channel::unbounded();
        let mut profilers = ProfilerSession::new(&mut self.profilers);

        if params.profiler_timing == ProfilerTiming::BeforeSubmit {
            profilers.start(params, iteration)?;
        }

        // SUBMIT
        let plan = self.cache.plan_iteration();
        for (slot, binding) in bindings.iter().enumerate() {
            let task = WorkerTask {
                slot,
                control: Arc::clone(&control),
                binding: Arc::clone(binding),
                cache: Arc::clone(&self.cache),
                workload: Arc::clone(&self.workload),
                plan: plan.clone(),
                mode: params.mode,
                batch_size: iteration.batch_size,
                completions: tx.clone(),
            };
            if let Err(e) = pool.submit(slot, task.into_job()) {
                // Tasks already submitted see the failure and wind down on
                // their own; the pool is unusable from here on.
                tracing::error!(slot, error = %e, "failed to submit worker task");
                control.mark_failing();
                control.force_release(Phase::Setup);
                control.force_release(Phase::Teardown);
                control.request_stop();
                let _ = profilers.stop(params, iteration, None);
                return Err(e);
            }
        }
        drop(tx);
        #[cfg(feature = "metrics")]
        pool.metrics().iterations_started.fetch_add(1, Ordering::Relaxed);

        // AWAIT_SETUP
        let setup_deadline = Instant::now() + params.timeout;
        let setup_released = control.await_release_until(Phase::Setup, setup_deadline);
        if setup_released {
            tracing::debug!("setup released");
        } else {
            tracing::warn!(
                arrived = control.arrivals(Phase::Setup),
                threads,
                "setup not released within the timeout, stopping iteration"
            );
            // The timeout is spent: let the workers that made it through
            // setup wind down, and start interrupting the rest right away.
            control.request_stop();
            control.force_release(Phase::Setup);
            control.force_release(Phase::Teardown);
        }

        let mut start_error = None;
        if params.profiler_timing == ProfilerTiming::AfterSetup {
            if let Err(e) = profilers.start(params, iteration) {
                control.mark_failing();
                control.force_release(Phase::Setup);
                control.force_release(Phase::Teardown);
                start_error = Some(e);
            }
        }

        // RUN_WINDOW
        let mut early = Vec::new();
        if setup_released && start_error.is_none() && !params.mode.is_single_shot() {
            match rx.recv_timeout(iteration.time) {
                Ok(completion) => {
                    tracing::warn!(
                        slot = completion.slot,
                        "worker completed inside the measurement window, ending it early"
                    );
                    early.push(completion);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {}
            }
        }

        // SIGNAL_STOP
        control.request_stop();
        let deadline = if setup_released {
            Instant::now() + params.timeout
        } else {
            setup_deadline
        };

        // AWAIT_TEARDOWN
        if !control.await_release_until(Phase::Teardown, deadline) {
            tracing::debug!("teardown not released by the collection deadline");
        }

        // COLLECT
        let collected = collect(&rx, early, &bindings, deadline);

        // AGGREGATE
        let outcome = collected.and_then(|collected| {
            let aggregate = Aggregate::from_completions(collected.completions);
            if let Some(message) = aggregate.internal {
                return Err(HarnessError::Internal(message));
            }
            if aggregate.benign > 0 {
                tracing::debug!(benign = aggregate.benign, "cascaded worker failures discarded");
            }
            if !aggregate.failures.is_empty() {
                #[cfg(feature = "metrics")]
                {
                    let metrics = pool.metrics();
                    metrics
                        .primary_failures
                        .fetch_add(aggregate.failures.len() as u64, Ordering::Relaxed);
                    metrics
                        .benign_failures
                        .fetch_add(aggregate.benign as u64, Ordering::Relaxed);
                }
                return Err(HarnessError::Workload {
                    failures: aggregate.failures,
                    interrupt_rounds: collected.interrupt_rounds,
                    profiler_results: Vec::new(),
                });
            }
            if let Some(e) = start_error {
                return Err(e);
            }
            Ok(IterationResult {
                kind: iteration.kind,
                index,
                thread_count: threads,
                mode: params.mode,
                results: aggregate.results,
                ops_total: aggregate.ops_total,
                ops_measured: aggregate.ops_measured,
                interrupt_rounds: collected.interrupt_rounds,
                profiler_results: Vec::new(),
                elapsed: started.elapsed(),
            })
        });

        // DONE
        let (profiler_results, stop_error) =
            profilers.stop(params, iteration, outcome.as_ref().ok());
        let outcome = match outcome {
            Ok(mut result) => match stop_error {
                Some(e) => Err(e),
                None => {
                    result.profiler_results = profiler_results;
                    Ok(result)
                }
            },
            Err(HarnessError::Workload {
                failures,
                interrupt_rounds,
                ..
            }) => Err(HarnessError::Workload {
                failures,
                interrupt_rounds,
                profiler_results,
            }),
            Err(e) => Err(e),
        };

        match &outcome {
            Ok(result) => tracing::info!(
                kind = ?iteration.kind,
                index,
                ops = result.ops_measured,
                interrupt_rounds = result.interrupt_rounds,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "iteration finished"
            ),
            Err(e) => tracing::warn!(kind = ?iteration.kind, index, error = %e, "iteration failed"),
        }
        outcome
    }

    /// Stops the worker pool. Queued work still runs first.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop_pool()
    }

    fn stop_pool(&mut self) -> Result<()> {
        match self.pool.take() {
            Some(pool) => pool.shutdown().map_err(|failed| {
                HarnessError::Pool(format!("{failed} worker thread(s) panicked"))
            }),
            None => Ok(()),
        }
    }
}

impl<W: Workload> Drop for IterationRunner<W> {
    fn drop(&mut self) {
        if let Err(e) = self.stop_pool() {
            tracing::error!(error = %e, "worker pool did not shut down cleanly");
        }
    }
}

/// Waits for every worker to report. Once `deadline` has passed, each poll
/// that times out interrupts the workers still running and counts one
/// interrupt round.
fn collect(
    rx: &Receiver<Completion>,
    early: Vec<Completion>,
    bindings: &[Arc<TaskBinding>],
    deadline: Instant,
) -> Result<Collected> {
    let expected = bindings.len();
    let mut running = vec![true; expected];
    for completion in &early {
        running[completion.slot] = false;
    }
    let mut collected = Collected {
        completions: early,
        interrupt_rounds: 0,
    };

    while collected.completions.len() < expected {
        let wait = deadline
            .saturating_duration_since(Instant::now())
            .max(COLLECT_POLL_INTERVAL);
        match rx.recv_timeout(wait) {
            Ok(completion) => {
                running[completion.slot] = false;
                collected.completions.push(completion);
            }
            Err(RecvTimeoutError::Timeout) => {
                collected.interrupt_rounds += 1;
                let still_running = running.iter().filter(|r| **r).count();
                let interrupted = bindings
                    .iter()
                    .zip(&running)
                    .filter(|(_, running)| **running)
                    .filter(|(binding, _)| binding.interrupt())
                    .count();
                tracing::warn!(
                    round = collected.interrupt_rounds,
                    still_running,
                    interrupted,
                    "workers did not finish before the deadline, interrupting"
                );
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(HarnessError::internal(format!(
                    "completion channel closed with {} of {expected} workers unreported",
                    expected - collected.completions.len()
                )));
            }
        }
    }
    Ok(collected)
}
