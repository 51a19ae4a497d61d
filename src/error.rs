//! Error types for the harness and for workloads running inside it.
//!
//! Two layers exist. [`WorkloadError`] is what a workload (or the worker task
//! wrapping it) produces on one thread. [`HarnessError`] is what the caller of
//! the runner sees: configuration problems, engine defects, profiler failures,
//! or the aggregate of all worker failures of one iteration.

use crate::result::ResultEntry;
use thiserror::Error;

/// Errors surfaced by the harness to its caller.
#[derive(Error, Debug)]
pub enum HarnessError {
    /// Invalid benchmark or iteration parameters.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The engine broke one of its own invariants (gate overflow, duplicate
    /// thread-state binding, missing thread data). Never recoverable.
    #[error("internal consistency violation: {0}")]
    Internal(String),

    /// The worker pool could not spawn threads or accept work.
    #[error("worker pool error: {0}")]
    Pool(String),

    /// A profiler hook failed.
    #[error("profiler `{label}` failed: {message}")]
    Profiler { label: String, message: String },

    /// One or more workers failed during the iteration.
    #[error(
        "benchmark error during the run: {} worker failure(s), {interrupt_rounds} interrupt round(s)",
        failures.len()
    )]
    Workload {
        failures: Vec<WorkerFailure>,
        interrupt_rounds: usize,
        profiler_results: Vec<ResultEntry>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Type alias for results using [`HarnessError`].
pub type Result<T> = std::result::Result<T, HarnessError>;

impl HarnessError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an internal consistency error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a profiler error.
    pub fn profiler(label: impl Into<String>, message: impl ToString) -> Self {
        Self::Profiler {
            label: label.into(),
            message: message.to_string(),
        }
    }
}

/// Errors produced on a worker thread.
#[derive(Error, Debug)]
pub enum WorkloadError {
    /// The workload failed with its own error.
    #[error("workload failed: {0}")]
    Failed(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The workload failed with a plain message.
    #[error("workload failed: {0}")]
    Message(String),

    /// The workload panicked; the payload message is captured.
    #[error("workload panicked: {0}")]
    Panicked(String),

    /// The worker observed an interruption request.
    #[error("worker thread was interrupted")]
    Interrupted,

    /// The worker stopped because another worker had already failed.
    #[error("worker stopped to assist the failure of another worker")]
    FailureAssist,

    /// The engine detected a broken invariant while running this worker.
    #[error("internal consistency violation: {0}")]
    Internal(String),
}

impl WorkloadError {
    /// Wrap an arbitrary error raised by workload code.
    pub fn failed<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Failed(Box::new(error))
    }

    /// Fail with a message.
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    /// Whether this error only follows from another worker's failure.
    ///
    /// `FailureAssist` always does. `Interrupted` does once some worker has
    /// already failed for its own reasons; an interruption by the collection
    /// timeout alone is a failure in its own right.
    pub(crate) fn is_benign(&self, primary_recorded: bool) -> bool {
        match self {
            Self::FailureAssist => true,
            Self::Interrupted => primary_recorded,
            _ => false,
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }
}

impl From<HarnessError> for WorkloadError {
    fn from(error: HarnessError) -> Self {
        match error {
            HarnessError::Internal(message) => Self::Internal(message),
            other => Self::Message(other.to_string()),
        }
    }
}

impl From<crate::interrupt::Interrupted> for WorkloadError {
    fn from(_: crate::interrupt::Interrupted) -> Self {
        Self::Interrupted
    }
}

/// A failed worker, tagged at the point of catch.
#[derive(Debug)]
pub struct WorkerFailure {
    /// Submission slot of the worker (0..threads).
    pub slot: usize,
    pub error: WorkloadError,
    /// True when the failure is only a consequence of another worker failing.
    pub benign: bool,
}

impl std::fmt::Display for WorkerFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "worker {}: {}", self.slot, self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_benign_classification() {
        assert!(WorkloadError::FailureAssist.is_benign(false));
        assert!(WorkloadError::FailureAssist.is_benign(true));
        assert!(!WorkloadError::Interrupted.is_benign(false));
        assert!(WorkloadError::Interrupted.is_benign(true));
        assert!(!WorkloadError::message("boom").is_benign(true));
        assert!(!WorkloadError::Panicked("boom".into()).is_benign(true));
    }

    #[test]
    fn test_internal_conversion() {
        let err: WorkloadError = HarnessError::internal("gate overflow").into();
        assert!(err.is_internal());

        let err: WorkloadError = HarnessError::config("bad").into();
        assert!(!err.is_internal());
    }

    #[test]
    fn test_workload_error_display() {
        let err = HarnessError::Workload {
            failures: vec![WorkerFailure {
                slot: 2,
                error: WorkloadError::message("boom"),
                benign: false,
            }],
            interrupt_rounds: 0,
            profiler_results: Vec::new(),
        };
        assert!(err.to_string().contains("1 worker failure(s)"));
        if let HarnessError::Workload { failures, .. } = &err {
            assert_eq!(failures[0].to_string(), "worker 2: workload failed: boom");
        }
    }
}
