//! Per-worker state reused across iterations.
//!
//! Every worker keeps one workload state and one [`ThreadAssignment`] for the
//! whole benchmark. How a task finds its state depends on the threading model:
//!
//! - **Stable threads**: states live in an arena indexed by submission slot.
//!   Slot `i` always runs on the same thread, so lookup is direct.
//! - **Unstable threads**: states are bound to the thread that last used them.
//!   A task running on a thread that did not take part in the previous
//!   iteration finds nothing. Once every task has tried its own lookup, a
//!   sweep barrier moves all unclaimed states into an unused pool, and the
//!   tasks that came up empty draw from it. Every task of the iteration holds
//!   its thread at the barrier, so no thread resolves state twice.

use crate::distribution::ThreadAssignment;
use crate::error::{HarnessError, Result};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier, Mutex, PoisonError};
use std::thread::{self, ThreadId};

/// A worker's cached workload state and its fixed assignment.
#[derive(Debug)]
pub struct ThreadLocalState<S> {
    pub instance: S,
    pub assignment: ThreadAssignment,
}

/// Barrier whose leader reclaims unclaimed states before anyone proceeds.
#[derive(Debug)]
pub(crate) struct SweepBarrier {
    barrier: Barrier,
    swept: AtomicBool,
}

impl SweepBarrier {
    pub(crate) fn new(parties: usize) -> Self {
        SweepBarrier {
            barrier: Barrier::new(parties),
            swept: AtomicBool::new(false),
        }
    }

    /// Waits for all parties; exactly one of them runs `sweep`, and nobody
    /// returns before it finished.
    fn wait(&self, sweep: impl FnOnce()) {
        if self.barrier.wait().is_leader() {
            sweep();
            self.swept.store(true, Ordering::Release);
        }
        self.barrier.wait();
    }

    fn is_swept(&self) -> bool {
        self.swept.load(Ordering::Acquire)
    }
}

/// How tasks of one iteration obtain their state.
#[derive(Debug, Clone)]
pub(crate) struct IterationPlan {
    /// First iteration: every task allocates a fresh state.
    pub(crate) first: bool,
    /// Present when tasks run on unstable threads.
    pub(crate) sweep: Option<Arc<SweepBarrier>>,
}

pub struct StateCache<S> {
    stable: bool,
    assignments: Vec<ThreadAssignment>,
    initialized: AtomicBool,
    slots: Vec<Mutex<Option<ThreadLocalState<S>>>>,
    bound: Mutex<HashMap<ThreadId, ThreadLocalState<S>>>,
    unused: Mutex<Vec<ThreadLocalState<S>>>,
    fresh: Mutex<VecDeque<ThreadAssignment>>,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<S> StateCache<S> {
    pub fn new(assignments: Vec<ThreadAssignment>, stable_threads: bool) -> Self {
        let slots = if stable_threads {
            assignments.iter().map(|_| Mutex::new(None)).collect()
        } else {
            Vec::new()
        };
        StateCache {
            stable: stable_threads,
            assignments,
            initialized: AtomicBool::new(false),
            slots,
            bound: Mutex::new(HashMap::new()),
            unused: Mutex::new(Vec::new()),
            fresh: Mutex::new(VecDeque::new()),
        }
    }

    pub fn assignments(&self) -> &[ThreadAssignment] {
        &self.assignments
    }

    /// Number of states currently at rest in the cache.
    pub fn cached(&self) -> usize {
        let in_slots = self.slots.iter().filter(|slot| lock(slot).is_some()).count();
        in_slots + lock(&self.bound).len() + lock(&self.unused).len()
    }

    /// Number of states bound to a thread (unstable model only).
    pub fn bound_threads(&self) -> usize {
        lock(&self.bound).len()
    }

    /// Prepares the resolution plan for the next iteration. Must be called
    /// once per iteration, right before its tasks are submitted.
    pub(crate) fn plan_iteration(&self) -> IterationPlan {
        let first = !self.initialized.swap(true, Ordering::AcqRel);
        if first && !self.stable {
            *lock(&self.fresh) = self.assignments.iter().copied().collect();
        }
        let sweep = (!self.stable).then(|| Arc::new(SweepBarrier::new(self.assignments.len())));
        IterationPlan { first, sweep }
    }

    /// Resolves the state for the task in `slot` running on the calling
    /// thread. `make` allocates a fresh workload state on the first iteration.
    pub(crate) fn acquire(
        &self,
        slot: usize,
        plan: &IterationPlan,
        make: impl FnOnce(&ThreadAssignment) -> S,
    ) -> Result<ThreadLocalState<S>> {
        if self.stable {
            return self.acquire_slot(slot, plan, make);
        }

        let sweep = plan
            .sweep
            .as_ref()
            .ok_or_else(|| HarnessError::internal("unstable threads require a sweep barrier"))?;

        let me = thread::current().id();
        let own = if plan.first {
            None
        } else {
            lock(&self.bound).remove(&me)
        };
        sweep.wait(|| self.sweep_unclaimed());

        if plan.first {
            let assignment = lock(&self.fresh).pop_front().ok_or_else(|| {
                HarnessError::internal("more workers than thread assignments")
            })?;
            return Ok(ThreadLocalState {
                instance: make(&assignment),
                assignment,
            });
        }

        match own {
            Some(state) => Ok(state),
            None => self.draw_unused(sweep, me),
        }
    }

    fn acquire_slot(
        &self,
        slot: usize,
        plan: &IterationPlan,
        make: impl FnOnce(&ThreadAssignment) -> S,
    ) -> Result<ThreadLocalState<S>> {
        let cell = self
            .slots
            .get(slot)
            .ok_or_else(|| HarnessError::internal(format!("slot {slot} out of range")))?;
        let mut cell = lock(cell);
        if let Some(state) = cell.take() {
            return Ok(state);
        }
        if plan.first {
            let assignment = self.assignments[slot];
            return Ok(ThreadLocalState {
                instance: make(&assignment),
                assignment,
            });
        }
        Err(HarnessError::internal(format!(
            "no thread data found for slot {slot}"
        )))
    }

    fn sweep_unclaimed(&self) {
        let mut bound = lock(&self.bound);
        if bound.is_empty() {
            return;
        }
        let mut unused = lock(&self.unused);
        tracing::debug!(reclaimed = bound.len(), "sweeping thread states of absent threads");
        unused.extend(bound.drain().map(|(_, state)| state));
    }

    fn draw_unused(&self, sweep: &SweepBarrier, me: ThreadId) -> Result<ThreadLocalState<S>> {
        if !sweep.is_swept() {
            return Err(HarnessError::internal(
                "unused thread states drawn before the sweep ran",
            ));
        }
        lock(&self.unused).pop().ok_or_else(|| {
            HarnessError::internal(format!("no thread data found for thread {me:?}"))
        })
    }

    /// Returns the state after the task ran. Binding a second state to the
    /// same slot or thread is an internal consistency violation.
    pub(crate) fn release(&self, slot: usize, state: ThreadLocalState<S>) -> Result<()> {
        if self.stable {
            let mut cell = lock(&self.slots[slot]);
            if cell.is_some() {
                return Err(HarnessError::internal(format!(
                    "duplicate thread state binding for slot {slot}"
                )));
            }
            *cell = Some(state);
            return Ok(());
        }

        let me = thread::current().id();
        match lock(&self.bound).entry(me) {
            Entry::Occupied(_) => Err(HarnessError::internal(format!(
                "duplicate thread state binding for thread {me:?}"
            ))),
            Entry::Vacant(entry) => {
                entry.insert(state);
                Ok(())
            }
        }
    }
}
