//! One-way rendezvous gate.
//!
//! A gate starts closed and opens exactly once: either when the expected
//! number of parties have arrived, or when it is forced open. Once open it
//! never closes again, so late or redundant waiters return immediately.
//! Waiting threads register themselves and park; whoever opens the gate
//! unparks all of them.

use crate::error::{HarnessError, Result};
use crate::interrupt::{Interrupted, TaskBinding};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, Thread};
use std::time::Instant;

#[derive(Debug)]
pub struct Gate {
    parties: usize,
    arrived: AtomicUsize,
    released: AtomicBool,
    waiters: Mutex<Vec<Thread>>,
}

impl Gate {
    /// Creates a closed gate expecting `parties` arrivals.
    pub fn new(parties: usize) -> Self {
        Gate {
            parties,
            arrived: AtomicUsize::new(0),
            released: AtomicBool::new(parties == 0),
            waiters: Mutex::new(Vec::new()),
        }
    }

    /// Creates a gate that is already open.
    pub fn open() -> Self {
        Gate::new(0)
    }

    /// Records one arrival and opens the gate when the quorum is reached.
    ///
    /// Returns true if this arrival opened the gate. Arriving more often than
    /// there are parties is an internal consistency violation.
    pub fn arrive(&self) -> Result<bool> {
        let previous = self.arrived.fetch_add(1, Ordering::AcqRel);
        if previous >= self.parties {
            return Err(HarnessError::internal(format!(
                "gate arrival {} exceeds the {} provisioned parties",
                previous + 1,
                self.parties
            )));
        }
        if previous + 1 == self.parties {
            Ok(self.release())
        } else {
            Ok(false)
        }
    }

    /// Opens the gate regardless of arrivals. Returns true if this call
    /// opened it; redundant calls are no-ops.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        let waiters = std::mem::take(&mut *self.waiters.lock().unwrap_or_else(PoisonError::into_inner));
        for waiter in waiters {
            waiter.unpark();
        }
        true
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    pub fn arrived(&self) -> usize {
        self.arrived.load(Ordering::Acquire).min(self.parties)
    }

    pub fn parties(&self) -> usize {
        self.parties
    }

    /// Blocks until the gate opens.
    pub fn wait(&self) {
        while !self.register() {
            thread::park();
        }
    }

    /// Blocks until the gate opens or `deadline` passes. Returns true if the
    /// gate is open.
    pub fn wait_until(&self, deadline: Instant) -> bool {
        loop {
            if self.register() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return self.is_released();
            }
            thread::park_timeout(deadline - now);
        }
    }

    /// Blocks until the gate opens, giving up when the task bound to this
    /// thread is interrupted.
    pub fn wait_interruptibly(&self, binding: &TaskBinding) -> std::result::Result<(), Interrupted> {
        loop {
            if self.register() {
                return Ok(());
            }
            binding.check()?;
            thread::park();
        }
    }

    /// Returns true if the gate is open; otherwise registers the calling
    /// thread for wake-up. The second check covers a release racing with
    /// registration.
    fn register(&self) -> bool {
        if self.is_released() {
            return true;
        }
        {
            let mut waiters = self.waiters.lock().unwrap_or_else(PoisonError::into_inner);
            let me = thread::current();
            if !waiters.iter().any(|t| t.id() == me.id()) {
                waiters.push(me);
            }
        }
        self.is_released()
    }
}
