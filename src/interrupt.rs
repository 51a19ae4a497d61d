//! Cooperative interruption of worker threads.
//!
//! A worker task binds its [`TaskBinding`] to the thread executing it. The
//! orchestrator interrupts a stuck worker by raising the binding's flag and
//! unparking the bound thread; the worker notices at its next interruption
//! check, interruptible sleep, or gate wait. Tasks that are not bound yet
//! cannot be interrupted.
//!
//! The binding also remembers which phases its task announced, whichever way
//! the announcement was made, so the task can make up for missing arrivals
//! when it returns.

use crate::control::Phase;
use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, Thread};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Returned by interruptible operations when an interruption was observed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("worker thread was interrupted")]
pub struct Interrupted;

thread_local! {
    static CURRENT: RefCell<Option<Arc<TaskBinding>>> = const { RefCell::new(None) };
}

/// Link between one worker task and the thread currently running it.
#[derive(Debug, Default)]
pub struct TaskBinding {
    thread: Mutex<Option<Thread>>,
    interrupted: AtomicBool,
    setup_arrived: AtomicBool,
    teardown_arrived: AtomicBool,
}

impl TaskBinding {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds this task to the calling thread until the guard is dropped.
    ///
    /// Any interruption left over from a previous run is cleared on bind and
    /// again on unbind.
    pub fn bind(self: &Arc<Self>) -> BindGuard {
        self.interrupted.store(false, Ordering::SeqCst);
        *self.thread.lock().unwrap_or_else(PoisonError::into_inner) = Some(thread::current());
        CURRENT.with(|current| *current.borrow_mut() = Some(Arc::clone(self)));
        BindGuard {
            binding: Arc::clone(self),
        }
    }

    fn arrival(&self, phase: Phase) -> &AtomicBool {
        match phase {
            Phase::Setup => &self.setup_arrived,
            Phase::Teardown => &self.teardown_arrived,
        }
    }

    /// Records that the task announced `phase`. Returns false if it already
    /// had.
    pub(crate) fn record_arrival(&self, phase: Phase) -> bool {
        !self.arrival(phase).swap(true, Ordering::AcqRel)
    }

    /// Returns true if the task announced `phase`.
    pub fn has_arrived(&self, phase: Phase) -> bool {
        self.arrival(phase).load(Ordering::Acquire)
    }

    /// Returns true when a thread is currently bound.
    pub fn is_bound(&self) -> bool {
        self.thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Interrupts the bound thread. Returns false when nothing is bound.
    pub fn interrupt(&self) -> bool {
        let bound = self.thread.lock().unwrap_or_else(PoisonError::into_inner);
        match bound.as_ref() {
            Some(thread) => {
                self.interrupted.store(true, Ordering::SeqCst);
                thread.unpark();
                true
            }
            None => false,
        }
    }

    /// Checks the interruption flag without clearing it.
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Checks and clears the interruption flag.
    pub fn take_interrupt(&self) -> bool {
        self.interrupted.swap(false, Ordering::SeqCst)
    }

    /// Fails with [`Interrupted`] if an interruption is pending, clearing it.
    pub fn check(&self) -> Result<(), Interrupted> {
        if self.take_interrupt() {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }

    /// Sleeps for `duration`, waking early with [`Interrupted`].
    pub fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        let deadline = Instant::now() + duration;
        loop {
            self.check()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            thread::park_timeout(deadline - now);
        }
    }

    fn unbind(&self) {
        *self.thread.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.interrupted.store(false, Ordering::SeqCst);
    }
}

/// Unbinds the task from its thread when dropped.
#[must_use = "the task is unbound as soon as the guard is dropped"]
pub struct BindGuard {
    binding: Arc<TaskBinding>,
}

impl Drop for BindGuard {
    fn drop(&mut self) {
        self.binding.unbind();
        CURRENT.with(|current| *current.borrow_mut() = None);
    }
}

/// Returns the binding of the task running on this thread, if any.
pub(crate) fn current() -> Option<Arc<TaskBinding>> {
    CURRENT.with(|current| current.borrow().clone())
}
