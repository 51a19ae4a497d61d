#[cfg(feature = "metrics")]
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(feature = "metrics")]
use std::time::Instant;

/// Optional counters for the worker pool and the iteration engine.
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct Metrics {
    /// Jobs handed to the pool.
    pub jobs_submitted: AtomicU64,
    /// Jobs that finished, including those that panicked.
    pub jobs_completed: AtomicU64,
    /// Jobs whose panic was caught by a pool thread.
    pub jobs_panicked: AtomicU64,
    /// Iterations whose tasks were submitted.
    pub iterations_started: AtomicU64,
    /// Iterations that returned results.
    pub iterations_completed: AtomicU64,
    /// Iterations that ended with an error.
    pub iterations_failed: AtomicU64,
    /// Worker failures that caused an iteration to fail.
    pub primary_failures: AtomicU64,
    /// Worker failures that only followed another worker's failure.
    pub benign_failures: AtomicU64,
    /// Interrupt rounds issued while collecting worker results.
    pub interrupt_rounds: AtomicU64,
    /// Time when metrics collection started.
    pub start_time: Instant,
}

#[cfg(feature = "metrics")]
impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "metrics")]
impl Metrics {
    /// Creates a new metrics instance.
    pub fn new() -> Self {
        Self {
            jobs_submitted: AtomicU64::new(0),
            jobs_completed: AtomicU64::new(0),
            jobs_panicked: AtomicU64::new(0),
            iterations_started: AtomicU64::new(0),
            iterations_completed: AtomicU64::new(0),
            iterations_failed: AtomicU64::new(0),
            primary_failures: AtomicU64::new(0),
            benign_failures: AtomicU64::new(0),
            interrupt_rounds: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Returns a snapshot of current metrics values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_panicked: self.jobs_panicked.load(Ordering::Relaxed),
            iterations_started: self.iterations_started.load(Ordering::Relaxed),
            iterations_completed: self.iterations_completed.load(Ordering::Relaxed),
            iterations_failed: self.iterations_failed.load(Ordering::Relaxed),
            primary_failures: self.primary_failures.load(Ordering::Relaxed),
            benign_failures: self.benign_failures.load(Ordering::Relaxed),
            interrupt_rounds: self.interrupt_rounds.load(Ordering::Relaxed),
            elapsed_seconds: self.start_time.elapsed().as_secs_f64(),
        }
    }
}

/// Snapshot of metrics at a point in time.
#[cfg(feature = "metrics")]
#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    pub jobs_submitted: u64,
    pub jobs_completed: u64,
    pub jobs_panicked: u64,
    pub iterations_started: u64,
    pub iterations_completed: u64,
    pub iterations_failed: u64,
    pub primary_failures: u64,
    pub benign_failures: u64,
    pub interrupt_rounds: u64,
    pub elapsed_seconds: f64,
}

#[cfg(feature = "metrics")]
impl MetricsSnapshot {
    /// Calculates jobs per second throughput.
    pub fn jobs_per_second(&self) -> f64 {
        if self.elapsed_seconds > 0.0 {
            self.jobs_completed as f64 / self.elapsed_seconds
        } else {
            0.0
        }
    }

    /// Jobs submitted but not finished yet.
    pub fn pending_jobs(&self) -> i64 {
        self.jobs_submitted as i64 - self.jobs_completed as i64
    }
}
