//! Job definitions and execution logic.
//!
//! A job is a boxed closure handed to the worker pool. Worker tasks are
//! wrapped in jobs; the pool never looks inside.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

/// A unit of work to be executed on a pool thread.
pub struct Job {
    work: Box<dyn FnOnce() + Send + 'static>,
}

impl Job {
    /// Creates a new job with the given work function.
    pub fn new<F>(work: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Job {
            work: Box::new(work),
        }
    }

    /// Executes the job. A panic escaping the work is caught so the pool
    /// thread survives it; the payload message is returned.
    pub fn execute(self) -> Result<(), String> {
        panic::catch_unwind(AssertUnwindSafe(self.work)).map_err(|payload| panic_message(&*payload))
    }
}

/// Extracts the message of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_job_execution() {
        let executed = Arc::new(AtomicBool::new(false));
        let executed_clone = executed.clone();

        let job = Job::new(move || {
            executed_clone.store(true, Ordering::SeqCst);
        });

        assert!(job.execute().is_ok());
        assert!(executed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_job_panic_is_caught() {
        let job = Job::new(|| panic!("boom"));
        assert_eq!(job.execute().unwrap_err(), "boom");

        let job = Job::new(|| panic!("{} failed", 42));
        assert_eq!(job.execute().unwrap_err(), "42 failed");
    }
}
