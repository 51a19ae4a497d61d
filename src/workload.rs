//! Workloads: the user code a benchmark measures.

use crate::context::WorkerContext;
use crate::distribution::ThreadAssignment;
use crate::error::WorkloadError;
use crate::result::WorkerResults;

/// A unit of measured work, invoked once per worker per iteration.
///
/// Each worker owns one `State` instance for the whole benchmark. It is
/// created on the first iteration and handed back on every later one, so
/// expensive setup happens once per worker.
pub trait Workload: Send + Sync + 'static {
    type State: Send + 'static;

    /// Creates the per-worker state for the worker at `assignment`.
    fn new_state(&self, assignment: &ThreadAssignment) -> Self::State;

    /// Runs one iteration on the calling worker.
    ///
    /// With synchronization enabled the implementation announces the setup
    /// and teardown phases through `ctx` (the measured-loop helpers do this).
    /// It should poll [`WorkerContext::is_stop_requested`] and return soon
    /// after stop is requested.
    fn run(
        &self,
        state: &mut Self::State,
        ctx: &WorkerContext<'_>,
    ) -> Result<WorkerResults, WorkloadError>;
}

/// A stateless workload backed by a closure, see [`workload_fn`].
pub struct FnWorkload<F> {
    f: F,
}

impl<F> Workload for FnWorkload<F>
where
    F: Fn(&WorkerContext<'_>) -> Result<WorkerResults, WorkloadError> + Send + Sync + 'static,
{
    type State = ();

    fn new_state(&self, _assignment: &ThreadAssignment) -> Self::State {}

    fn run(&self, _state: &mut (), ctx: &WorkerContext<'_>) -> Result<WorkerResults, WorkloadError> {
        (self.f)(ctx)
    }
}

/// Wraps a closure as a [`Workload`] without per-worker state.
///
/// # Example
///
/// ```
/// use phasebench::{workload_fn, Mode};
///
/// let workload = workload_fn(|ctx| {
///     let m = ctx.run_measured_loop(|| {
///         std::hint::black_box(1 + 1);
///         Ok(())
///     })?;
///     Ok(m.into_results("add", Mode::Throughput))
/// });
/// # let _ = workload;
/// ```
pub fn workload_fn<F>(f: F) -> FnWorkload<F>
where
    F: Fn(&WorkerContext<'_>) -> Result<WorkerResults, WorkloadError> + Send + Sync + 'static,
{
    FnWorkload { f }
}
