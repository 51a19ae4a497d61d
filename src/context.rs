//! Context handed to a workload for one run on one worker.
//!
//! The context gives the workload its [`ThreadAssignment`] and access to the
//! iteration's [`IterationControl`], plus the helpers a measured loop needs:
//! phase announcements, interruptible waits, and ready-made loops that follow
//! the warmup / measure / warmdown protocol.

use crate::control::{IterationControl, Phase};
use crate::distribution::ThreadAssignment;
use crate::error::WorkloadError;
use crate::interrupt::TaskBinding;
use crate::params::Mode;
use crate::result::{Measurement, WorkerResults};
use std::time::{Duration, Instant};

pub struct WorkerContext<'a> {
    control: &'a IterationControl,
    assignment: &'a ThreadAssignment,
    binding: &'a TaskBinding,
    mode: Mode,
    batch_size: usize,
}

impl<'a> WorkerContext<'a> {
    pub(crate) fn new(
        control: &'a IterationControl,
        assignment: &'a ThreadAssignment,
        binding: &'a TaskBinding,
    ) -> Self {
        WorkerContext {
            control,
            assignment,
            binding,
            mode: Mode::default(),
            batch_size: 1,
        }
    }

    pub(crate) fn with_iteration(mut self, mode: Mode, batch_size: usize) -> Self {
        self.mode = mode;
        self.batch_size = batch_size;
        self
    }

    pub fn control(&self) -> &IterationControl {
        self.control
    }

    pub fn assignment(&self) -> &ThreadAssignment {
        self.assignment
    }

    /// Benchmark mode of the running iteration.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Invocations per single-shot batch.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn is_stop_requested(&self) -> bool {
        self.control.is_stop_requested()
    }

    pub fn is_failing(&self) -> bool {
        self.control.is_failing()
    }

    /// Announces that this worker finished setup.
    pub fn announce_setup_ready(&self) -> Result<(), WorkloadError> {
        Ok(self.control.announce_arrival_for(Phase::Setup, Some(self.binding))?)
    }

    /// Announces that this worker left the measured region.
    pub fn announce_teardown_ready(&self) -> Result<(), WorkloadError> {
        Ok(self.control.announce_arrival_for(Phase::Teardown, Some(self.binding))?)
    }

    /// Waits for every peer to finish setup. Fails with
    /// [`WorkloadError::FailureAssist`] if the gate was opened because a peer
    /// failed.
    pub fn await_setup_release(&self) -> Result<(), WorkloadError> {
        self.await_phase(Phase::Setup)
    }

    /// Waits for every peer to leave the measured region.
    pub fn await_teardown_release(&self) -> Result<(), WorkloadError> {
        self.await_phase(Phase::Teardown)
    }

    fn await_phase(&self, phase: Phase) -> Result<(), WorkloadError> {
        self.control.gate(phase).wait_interruptibly(self.binding)?;
        self.assist_failure()
    }

    fn assist_failure(&self) -> Result<(), WorkloadError> {
        if self.control.is_failing() {
            Err(WorkloadError::FailureAssist)
        } else {
            Ok(())
        }
    }

    /// Fails if the orchestrator interrupted this worker.
    pub fn check_interrupt(&self) -> Result<(), WorkloadError> {
        Ok(self.binding.check()?)
    }

    /// Sleeps, waking early if interrupted.
    pub fn sleep(&self, duration: Duration) -> Result<(), WorkloadError> {
        Ok(self.binding.sleep(duration)?)
    }

    /// Runs `op` under the full phase protocol of a duration-based mode.
    ///
    /// The operation keeps running while peers are still in setup (warmup),
    /// is counted from the setup release until stop is requested (measured),
    /// and keeps running until every peer has left the measured region
    /// (warmdown), so no worker measures while another sits idle.
    pub fn run_measured_loop<F>(&self, mut op: F) -> Result<Measurement, WorkloadError>
    where
        F: FnMut() -> Result<(), WorkloadError>,
    {
        let mut ops_total = 0u64;

        self.announce_setup_ready()?;
        while !self.control.is_released(Phase::Setup) {
            op()?;
            ops_total += 1;
            self.check_interrupt()?;
        }
        self.assist_failure()?;

        let mut ops_measured = 0u64;
        let start = Instant::now();
        while !self.control.is_stop_requested() {
            op()?;
            ops_measured += 1;
            self.check_interrupt()?;
        }
        let elapsed = start.elapsed();
        ops_total += ops_measured;

        self.announce_teardown_ready()?;
        while !self.control.is_released(Phase::Teardown) {
            op()?;
            ops_total += 1;
            self.check_interrupt()?;
        }
        self.assist_failure()?;

        Ok(Measurement {
            ops_total,
            ops_measured,
            elapsed,
        })
    }

    /// Times a single batch of `batch_size` invocations of `op`.
    pub fn run_single_shot<F>(&self, batch_size: usize, mut op: F) -> Result<Measurement, WorkloadError>
    where
        F: FnMut() -> Result<(), WorkloadError>,
    {
        self.announce_setup_ready()?;
        self.await_setup_release()?;

        let start = Instant::now();
        for _ in 0..batch_size {
            op()?;
        }
        let elapsed = start.elapsed();

        self.announce_teardown_ready()?;
        Ok(Measurement {
            ops_total: batch_size as u64,
            ops_measured: batch_size as u64,
            elapsed,
        })
    }

    /// Runs `op` the way the iteration's mode asks for and reports the score
    /// under `label`.
    pub fn measure<F>(&self, label: &str, op: F) -> Result<WorkerResults, WorkloadError>
    where
        F: FnMut() -> Result<(), WorkloadError>,
    {
        let measurement = if self.mode.is_single_shot() {
            self.run_single_shot(self.batch_size, op)?
        } else {
            self.run_measured_loop(op)?
        };
        Ok(measurement.into_results(label, self.mode))
    }

    /// Announces the phases the workload skipped, so a worker that returned
    /// early never leaves its peers waiting on it. Announcements made through
    /// [`control`](Self::control) count as well.
    pub(crate) fn finish(&self) -> Result<(), WorkloadError> {
        if !self.binding.has_arrived(Phase::Setup) {
            self.announce_setup_ready()?;
        }
        if !self.binding.has_arrived(Phase::Teardown) {
            self.announce_teardown_ready()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::distribute;
    use std::sync::Arc;
    use std::thread;

    fn assignment() -> ThreadAssignment {
        distribute(1, &[1]).unwrap()[0]
    }

    #[test]
    fn test_measured_loop_single_worker() {
        let control = Arc::new(IterationControl::new(1, true, false));
        let binding = Arc::new(TaskBinding::new());
        let a = assignment();

        let stopper = {
            let control = control.clone();
            thread::spawn(move || {
                control.await_release(Phase::Setup);
                thread::sleep(Duration::from_millis(20));
                control.request_stop();
            })
        };

        let _guard = binding.bind();
        let ctx = WorkerContext::new(&control, &a, &binding);
        let m = ctx.run_measured_loop(|| Ok(())).unwrap();
        stopper.join().unwrap();

        assert!(m.ops_measured > 0);
        assert!(m.ops_total >= m.ops_measured);
        assert!(m.elapsed >= Duration::from_millis(10));
        assert!(control.is_released(Phase::Teardown));
        // Already announced both phases; nothing left to compensate.
        ctx.finish().unwrap();
    }

    #[test]
    fn test_finish_compensates_missing_arrivals() {
        let control = IterationControl::new(1, true, false);
        let binding = Arc::new(TaskBinding::new());
        let a = assignment();
        let ctx = WorkerContext::new(&control, &a, &binding);

        ctx.finish().unwrap();
        assert!(control.is_released(Phase::Setup));
        assert!(control.is_released(Phase::Teardown));
    }

    #[test]
    fn test_finish_counts_announcements_through_control() {
        let control = IterationControl::new(1, true, false);
        let binding = Arc::new(TaskBinding::new());
        let a = assignment();
        let _guard = binding.bind();
        let ctx = WorkerContext::new(&control, &a, &binding);

        ctx.control().announce_arrival(Phase::Setup).unwrap();
        ctx.control().announce_arrival(Phase::Teardown).unwrap();
        ctx.finish().unwrap();
        assert_eq!(control.arrivals(Phase::Setup), 1);
        assert_eq!(control.arrivals(Phase::Teardown), 1);
    }

    #[test]
    fn test_double_announce_is_internal() {
        let control = IterationControl::new(1, true, false);
        let binding = Arc::new(TaskBinding::new());
        let a = assignment();
        let ctx = WorkerContext::new(&control, &a, &binding);

        ctx.announce_setup_ready().unwrap();
        let err = ctx.announce_setup_ready().unwrap_err();
        assert!(err.is_internal());
    }

    #[test]
    fn test_await_after_forced_release_assists() {
        let control = IterationControl::new(2, true, false);
        let binding = Arc::new(TaskBinding::new());
        let a = assignment();
        let ctx = WorkerContext::new(&control, &a, &binding);

        control.mark_failing();
        control.force_release(Phase::Setup);
        assert!(matches!(
            ctx.await_setup_release(),
            Err(WorkloadError::FailureAssist)
        ));
    }

    #[test]
    fn test_measure_dispatches_on_mode() {
        let control = IterationControl::new(1, false, false);
        let binding = Arc::new(TaskBinding::new());
        let a = assignment();
        let ctx = WorkerContext::new(&control, &a, &binding).with_iteration(Mode::SingleShotTime, 3);

        let results = ctx.measure("op", || Ok(())).unwrap();
        assert_eq!(results.ops_measured, 3);
        assert_eq!(results.results[0].unit, "ns");
    }

    #[test]
    fn test_single_shot_counts_batch() {
        let control = IterationControl::new(1, false, false);
        let binding = Arc::new(TaskBinding::new());
        let a = assignment();
        let ctx = WorkerContext::new(&control, &a, &binding);

        let mut calls = 0;
        let m = ctx
            .run_single_shot(7, || {
                calls += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(calls, 7);
        assert_eq!(m.ops_measured, 7);
    }
}
