//! Worker thread implementation.
//!
//! The pool owns a fixed set of named OS threads. Each thread waits on two
//! channels: its own, used when tasks must land on a stable thread, and one
//! shared by the whole pool, where any idle thread takes the next job.

use crate::error::{HarnessError, Result};
use crate::job::Job;
#[cfg(feature = "metrics")]
use crate::metrics::Metrics;
use crate::params::{PinningStrategy, ThreadingModel};
use crossbeam::channel::{self, Receiver, Sender};
#[cfg(feature = "metrics")]
use std::sync::Arc;
#[cfg(feature = "metrics")]
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};

/// A pool thread executing jobs from its queues.
pub struct Worker {
    id: usize,
    handle: Option<JoinHandle<()>>,
}

/// What a worker thread needs besides its queues.
struct WorkerSetup {
    id: usize,
    core: Option<core_affinity::CoreId>,
    #[cfg(feature = "metrics")]
    metrics: Arc<Metrics>,
}

impl Worker {
    fn spawn(setup: WorkerSetup, local: Receiver<Job>, shared: Receiver<Job>) -> Result<Self> {
        let id = setup.id;
        let handle = thread::Builder::new()
            .name(format!("phasebench-worker-{id}"))
            .spawn(move || {
                if let Some(core) = setup.core {
                    if !core_affinity::set_for_current(core) {
                        tracing::debug!(worker = id, core = core.id, "failed to pin worker thread");
                    }
                }
                Worker::run_loop(&setup, local, shared);
            })
            .map_err(|e| HarnessError::Pool(format!("failed to spawn worker {id}: {e}")))?;

        Ok(Worker {
            id,
            handle: Some(handle),
        })
    }

    /// Runs jobs until the pool hangs up, then drains what is left.
    fn run_loop(setup: &WorkerSetup, local: Receiver<Job>, shared: Receiver<Job>) {
        loop {
            let job = crossbeam::select! {
                recv(local) -> job => job,
                recv(shared) -> job => job,
            };
            match job {
                Ok(job) => Worker::execute(setup, job),
                Err(_) => break,
            }
        }

        for job in local.try_iter().chain(shared.try_iter()) {
            Worker::execute(setup, job);
        }
    }

    fn execute(setup: &WorkerSetup, job: Job) {
        let outcome = job.execute();
        if let Err(message) = &outcome {
            tracing::error!(worker = setup.id, %message, "job panicked");
        }
        #[cfg(feature = "metrics")]
        {
            setup.metrics.jobs_completed.fetch_add(1, Ordering::Relaxed);
            if outcome.is_err() {
                setup.metrics.jobs_panicked.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Returns the worker's ID.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Waits for the worker thread to finish.
    pub fn join(mut self) -> thread::Result<()> {
        if let Some(handle) = self.handle.take() {
            handle.join()
        } else {
            Ok(())
        }
    }
}

/// Picks the core for worker `id`, if the strategy pins at all.
fn core_for(id: usize, strategy: PinningStrategy, cores: &[core_affinity::CoreId]) -> Option<core_affinity::CoreId> {
    if cores.is_empty() {
        return None;
    }
    match strategy {
        PinningStrategy::None => None,
        PinningStrategy::Linear => Some(cores[id % cores.len()]),
        PinningStrategy::AvoidSMT => {
            let physical = cores.len().div_ceil(2);
            Some(cores[(id % physical) * 2])
        }
    }
}

/// A fixed-size pool of worker threads.
pub struct WorkerPool {
    workers: Vec<Worker>,
    local: Vec<Sender<Job>>,
    shared: Sender<Job>,
    threading: ThreadingModel,
    #[cfg(feature = "metrics")]
    metrics: Arc<Metrics>,
}

impl WorkerPool {
    /// Creates a pool where any idle thread takes the next job.
    pub fn new(num_threads: usize) -> Result<Self> {
        Self::with_config(num_threads, ThreadingModel::Shared, PinningStrategy::None)
    }

    /// Creates a pool with the given threading model and CPU pinning.
    pub fn with_config(
        num_threads: usize,
        threading: ThreadingModel,
        pinning: PinningStrategy,
    ) -> Result<Self> {
        if num_threads == 0 {
            return Err(HarnessError::Pool("pool needs at least one thread".into()));
        }

        let cores = match pinning {
            PinningStrategy::None => Vec::new(),
            _ => core_affinity::get_core_ids().unwrap_or_default(),
        };
        if pinning != PinningStrategy::None && cores.is_empty() {
            tracing::warn!(?pinning, "core ids unavailable, worker threads stay unpinned");
        }

        #[cfg(feature = "metrics")]
        let metrics = Arc::new(Metrics::new());

        let (shared, shared_rx) = channel::unbounded();
        let mut local = Vec::with_capacity(num_threads);
        let mut workers = Vec::with_capacity(num_threads);
        for id in 0..num_threads {
            let (tx, rx) = channel::unbounded();
            let setup = WorkerSetup {
                id,
                core: core_for(id, pinning, &cores),
                #[cfg(feature = "metrics")]
                metrics: Arc::clone(&metrics),
            };
            workers.push(Worker::spawn(setup, rx, shared_rx.clone())?);
            local.push(tx);
        }

        tracing::debug!(threads = num_threads, ?threading, ?pinning, "worker pool started");
        Ok(WorkerPool {
            workers,
            local,
            shared,
            threading,
            #[cfg(feature = "metrics")]
            metrics,
        })
    }

    /// Submits the job for submission slot `slot`. With stable threads the
    /// slot selects the pool thread; otherwise the slot is ignored.
    pub fn submit(&self, slot: usize, job: Job) -> Result<()> {
        let sender = if self.threading.stable_threads() {
            self.local.get(slot).ok_or_else(|| {
                HarnessError::Pool(format!(
                    "slot {slot} exceeds pool of {} threads",
                    self.local.len()
                ))
            })?
        } else {
            &self.shared
        };
        sender
            .send(job)
            .map_err(|_| HarnessError::Pool("worker pool is shut down".into()))?;
        #[cfg(feature = "metrics")]
        self.metrics.jobs_submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Returns the number of worker threads in the pool.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    #[cfg(feature = "metrics")]
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Shuts down the worker pool and waits for all threads to finish.
    /// Queued jobs still run before the threads exit.
    ///
    /// Returns Ok if all workers shut down successfully, or Err with the
    /// number of workers that panicked.
    pub fn shutdown(self) -> std::result::Result<(), usize> {
        let WorkerPool {
            workers,
            local,
            shared,
            ..
        } = self;
        drop(local);
        drop(shared);

        let mut failed_count = 0;
        for worker in workers {
            let worker_id = worker.id();
            if worker.join().is_err() {
                failed_count += 1;
                tracing::error!(worker = worker_id, "worker panicked during execution");
            }
        }

        if failed_count > 0 {
            Err(failed_count)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_worker_pool_creation() {
        let pool = WorkerPool::new(4).unwrap();
        assert_eq!(pool.size(), 4);
        pool.shutdown().expect("Shutdown failed");
    }

    #[test]
    fn test_zero_threads_rejected() {
        assert!(matches!(WorkerPool::new(0), Err(HarnessError::Pool(_))));
    }

    #[test]
    fn test_shutdown_runs_queued_jobs() {
        let pool = WorkerPool::new(2).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let num_jobs = 10;
        for _ in 0..num_jobs {
            let counter_clone = counter.clone();
            let job = Job::new(move || {
                thread::sleep(Duration::from_millis(1));
                counter_clone.fetch_add(1, Ordering::SeqCst);
            });
            pool.submit(0, job).unwrap();
        }

        pool.shutdown().expect("Shutdown failed");
        assert_eq!(counter.load(Ordering::SeqCst), num_jobs);
    }

    #[test]
    fn test_stable_slots_keep_their_thread() {
        let pool = WorkerPool::with_config(3, ThreadingModel::Pinned, PinningStrategy::None).unwrap();
        let (tx, rx) = channel::unbounded();

        for round in 0..3 {
            for slot in 0..3 {
                let tx = tx.clone();
                pool.submit(
                    slot,
                    Job::new(move || {
                        let name = thread::current().name().map(str::to_owned);
                        tx.send((round, slot, name)).unwrap();
                    }),
                )
                .unwrap();
            }
        }
        drop(tx);

        let mut seen = HashSet::new();
        while let Ok((_, slot, name)) = rx.recv_timeout(Duration::from_secs(5)) {
            seen.insert((slot, name.unwrap()));
        }
        assert_eq!(seen.len(), 3);
        assert!(seen.contains(&(1, "phasebench-worker-1".to_string())));
        pool.shutdown().expect("Shutdown failed");
    }

    #[test]
    fn test_stable_slot_out_of_range() {
        let pool = WorkerPool::with_config(2, ThreadingModel::Pinned, PinningStrategy::None).unwrap();
        assert!(matches!(pool.submit(2, Job::new(|| {})), Err(HarnessError::Pool(_))));
        pool.shutdown().expect("Shutdown failed");
    }

    #[test]
    fn test_worker_survives_panicking_job() {
        let pool = WorkerPool::with_config(1, ThreadingModel::Pinned, PinningStrategy::None).unwrap();
        let (tx, rx) = channel::bounded(1);

        pool.submit(0, Job::new(|| panic!("Boom"))).unwrap();
        pool.submit(0, Job::new(move || tx.send(()).unwrap())).unwrap();

        assert!(
            rx.recv_timeout(Duration::from_secs(5)).is_ok(),
            "worker did not process subsequent job"
        );
        pool.shutdown().expect("Shutdown failed");
    }

    #[test]
    fn test_core_selection() {
        let cores: Vec<_> = (0..4).map(|id| core_affinity::CoreId { id }).collect();
        assert_eq!(core_for(5, PinningStrategy::Linear, &cores).map(|c| c.id), Some(1));
        assert_eq!(core_for(1, PinningStrategy::AvoidSMT, &cores).map(|c| c.id), Some(2));
        assert_eq!(core_for(2, PinningStrategy::AvoidSMT, &cores).map(|c| c.id), Some(0));
        assert!(core_for(0, PinningStrategy::None, &cores).is_none());
        assert!(core_for(0, PinningStrategy::Linear, &[]).is_none());
    }
}
