//! Per-iteration phase-synchronization controller.
//!
//! One [`IterationControl`] is created for every iteration and shared by the
//! orchestrator and all worker tasks. It carries the advisory stop signal, the
//! failure signal, and the two rendezvous gates workers pass on their way into
//! and out of the measured region.
//!
//! A plain barrier per phase would deadlock as soon as one worker fails before
//! reaching it. Here the failure path forces both gates open, so peers blocked
//! on a gate are always let through.

use crate::error::{HarnessError, Result};
use crate::gate::Gate;
use crate::interrupt::{self, TaskBinding};
use crossbeam::utils::CachePadded;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// The two rendezvous points of an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// All workers finished setup and warmup; measurement may begin.
    Setup,
    /// All workers left the measured region; results may be read.
    Teardown,
}

#[derive(Debug)]
pub struct IterationControl {
    // Polled by every worker on every operation; kept on their own lines.
    stop_requested: CachePadded<AtomicBool>,
    failing: CachePadded<AtomicBool>,
    primary_failure: AtomicBool,
    thread_count: usize,
    synchronize: bool,
    last_iteration: bool,
    setup: Gate,
    teardown: Gate,
}

impl IterationControl {
    /// Creates the controller for an iteration of `thread_count` workers.
    ///
    /// Without synchronization both gates start open and arrivals are ignored.
    pub fn new(thread_count: usize, synchronize: bool, last_iteration: bool) -> Self {
        let gate = || {
            if synchronize {
                Gate::new(thread_count)
            } else {
                Gate::open()
            }
        };
        IterationControl {
            stop_requested: CachePadded::new(AtomicBool::new(false)),
            failing: CachePadded::new(AtomicBool::new(false)),
            primary_failure: AtomicBool::new(false),
            thread_count,
            synchronize,
            last_iteration,
            setup: gate(),
            teardown: gate(),
        }
    }

    pub(crate) fn gate(&self, phase: Phase) -> &Gate {
        match phase {
            Phase::Setup => &self.setup,
            Phase::Teardown => &self.teardown,
        }
    }

    /// Announces that the calling worker reached `phase`.
    ///
    /// Inside a worker task the arrival is recorded against the task, so a
    /// task announcing the same phase twice is rejected before it can count
    /// against its peers' quorum.
    pub fn announce_arrival(&self, phase: Phase) -> Result<()> {
        self.announce_arrival_for(phase, interrupt::current().as_deref())
    }

    pub(crate) fn announce_arrival_for(&self, phase: Phase, task: Option<&TaskBinding>) -> Result<()> {
        if !self.synchronize {
            return Ok(());
        }
        if let Some(task) = task {
            if !task.record_arrival(phase) {
                return Err(HarnessError::internal(format!(
                    "worker announced {phase:?} more than once"
                )));
            }
        }
        if self.gate(phase).arrive()? {
            tracing::debug!(?phase, threads = self.thread_count, "all workers arrived");
        }
        Ok(())
    }

    /// Blocks until `phase` is released.
    pub fn await_release(&self, phase: Phase) {
        self.gate(phase).wait();
    }

    /// Blocks until `phase` is released or the deadline passes. Returns true
    /// if the phase is released.
    pub fn await_release_until(&self, phase: Phase, deadline: Instant) -> bool {
        self.gate(phase).wait_until(deadline)
    }

    pub fn is_released(&self, phase: Phase) -> bool {
        self.gate(phase).is_released()
    }

    /// Releases `phase` without waiting for the remaining arrivals.
    pub fn force_release(&self, phase: Phase) {
        if self.gate(phase).release() {
            tracing::debug!(?phase, "phase force-released");
        }
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Marks the iteration as failing. Returns true for the first caller.
    pub fn mark_failing(&self) -> bool {
        !self.failing.swap(true, Ordering::AcqRel)
    }

    pub fn is_failing(&self) -> bool {
        self.failing.load(Ordering::Acquire)
    }

    /// Records that a worker failed for its own reasons, as opposed to
    /// reacting to someone else's failure.
    pub(crate) fn record_primary_failure(&self) {
        self.primary_failure.store(true, Ordering::Release);
    }

    pub(crate) fn has_primary_failure(&self) -> bool {
        self.primary_failure.load(Ordering::Acquire)
    }

    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    pub fn should_synchronize(&self) -> bool {
        self.synchronize
    }

    /// True during the final measurement iteration of a benchmark run.
    pub fn is_last_iteration(&self) -> bool {
        self.last_iteration
    }

    /// Number of workers that reached `phase`.
    pub fn arrivals(&self, phase: Phase) -> usize {
        self.gate(phase).arrived()
    }
}
