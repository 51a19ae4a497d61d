//! The task each worker runs once per iteration.

use crate::context::WorkerContext;
use crate::control::{IterationControl, Phase};
use crate::error::{WorkerFailure, WorkloadError};
use crate::interrupt::TaskBinding;
use crate::job::{Job, panic_message};
use crate::params::Mode;
use crate::result::WorkerResults;
use crate::state::{IterationPlan, StateCache};
use crate::workload::Workload;
use crossbeam::channel::Sender;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// What a task reports back to the runner.
#[derive(Debug)]
pub(crate) struct Completion {
    pub(crate) slot: usize,
    pub(crate) outcome: Result<WorkerResults, WorkerFailure>,
}

/// Sends exactly one completion per task. If the task ends without
/// reporting, an internal failure is sent on its behalf and the gates are
/// opened so no peer waits for it.
struct CompletionGuard {
    slot: usize,
    control: Arc<IterationControl>,
    sender: Sender<Completion>,
    sent: bool,
}

impl CompletionGuard {
    fn complete(mut self, outcome: Result<WorkerResults, WorkerFailure>) {
        self.sent = true;
        // The runner only hangs up after it collected every completion.
        let _ = self.sender.send(Completion {
            slot: self.slot,
            outcome,
        });
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if self.sent {
            return;
        }
        tracing::error!(slot = self.slot, "worker task ended without reporting");
        self.control.record_primary_failure();
        self.control.mark_failing();
        self.control.force_release(Phase::Setup);
        self.control.force_release(Phase::Teardown);
        let _ = self.sender.send(Completion {
            slot: self.slot,
            outcome: Err(WorkerFailure {
                slot: self.slot,
                error: WorkloadError::Internal("worker task ended without reporting".into()),
                benign: false,
            }),
        });
    }
}

pub(crate) struct WorkerTask<W: Workload> {
    pub(crate) slot: usize,
    pub(crate) control: Arc<IterationControl>,
    pub(crate) binding: Arc<TaskBinding>,
    pub(crate) cache: Arc<StateCache<W::State>>,
    pub(crate) workload: Arc<W>,
    pub(crate) plan: IterationPlan,
    pub(crate) mode: Mode,
    pub(crate) batch_size: usize,
    pub(crate) completions: Sender<Completion>,
}

impl<W: Workload> WorkerTask<W> {
    pub(crate) fn into_job(self) -> Job {
        Job::new(move || self.run())
    }

    fn run(self) {
        let guard = CompletionGuard {
            slot: self.slot,
            control: Arc::clone(&self.control),
            sender: self.completions.clone(),
            sent: false,
        };
        let outcome = self.execute();
        guard.complete(outcome);
    }

    fn execute(&self) -> Result<WorkerResults, WorkerFailure> {
        let _bound = self.binding.bind();

        let acquired = panic::catch_unwind(AssertUnwindSafe(|| {
            self.cache
                .acquire(self.slot, &self.plan, |assignment| self.workload.new_state(assignment))
        }));
        let mut state = match acquired {
            Ok(Ok(state)) => state,
            Ok(Err(e)) => return Err(self.fail(e.into())),
            Err(payload) => return Err(self.fail(WorkloadError::Panicked(panic_message(&*payload)))),
        };

        let result = {
            let ctx = WorkerContext::new(&self.control, &state.assignment, &self.binding)
                .with_iteration(self.mode, self.batch_size);
            panic::catch_unwind(AssertUnwindSafe(|| {
                self.workload.run(&mut state.instance, &ctx)
            }))
            .unwrap_or_else(|payload| Err(WorkloadError::Panicked(panic_message(&*payload))))
            .and_then(|results| {
                ctx.finish()?;
                Ok(results)
            })
        };

        if let Err(e) = self.cache.release(self.slot, state) {
            return Err(self.fail(e.into()));
        }
        result.map_err(|e| self.fail(e))
    }

    /// Takes the failure path: flags the iteration as failing and opens both
    /// gates before the failure is reported.
    fn fail(&self, error: WorkloadError) -> WorkerFailure {
        let benign = error.is_benign(self.control.has_primary_failure());
        if benign {
            tracing::debug!(slot = self.slot, %error, "worker stopped after a peer failed");
        } else {
            tracing::warn!(slot = self.slot, %error, "worker failed");
            self.control.record_primary_failure();
        }

        self.control.mark_failing();
        self.control.force_release(Phase::Setup);
        self.control.force_release(Phase::Teardown);

        WorkerFailure {
            slot: self.slot,
            error,
            benign,
        }
    }
}
