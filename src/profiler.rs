//! Profiler hooks around iterations.
//!
//! Profilers are started in registration order and stopped in reverse, on
//! every path out of an iteration. A hook that fails is fatal to the
//! iteration; the error is reported, not swallowed.

use crate::error::{HarnessError, Result};
use crate::params::{BenchmarkParams, IterationParams};
use crate::result::{IterationResult, ResultEntry};
use std::time::Instant;

/// Error type returned by profiler hooks.
pub type ProfilerError = Box<dyn std::error::Error + Send + Sync>;

pub trait Profiler: Send {
    /// Name used in results and error reports.
    fn label(&self) -> &str;

    fn before_iteration(
        &mut self,
        benchmark: &BenchmarkParams,
        iteration: &IterationParams,
    ) -> std::result::Result<(), ProfilerError>;

    /// Called once the iteration ended. `result` is `None` when the
    /// iteration failed.
    fn after_iteration(
        &mut self,
        benchmark: &BenchmarkParams,
        iteration: &IterationParams,
        result: Option<&IterationResult>,
    ) -> std::result::Result<Vec<ResultEntry>, ProfilerError>;
}

/// Profilers started for one iteration.
pub(crate) struct ProfilerSession<'a> {
    profilers: &'a mut [Box<dyn Profiler>],
    started: usize,
}

impl<'a> ProfilerSession<'a> {
    pub(crate) fn new(profilers: &'a mut [Box<dyn Profiler>]) -> Self {
        ProfilerSession {
            profilers,
            started: 0,
        }
    }

    /// Starts every profiler in order. If one fails, those already started
    /// are stopped in reverse before the error is returned.
    pub(crate) fn start(&mut self, benchmark: &BenchmarkParams, iteration: &IterationParams) -> Result<()> {
        while self.started < self.profilers.len() {
            let profiler = &mut self.profilers[self.started];
            if let Err(e) = profiler.before_iteration(benchmark, iteration) {
                let error = HarnessError::profiler(profiler.label(), e);
                let _ = self.stop(benchmark, iteration, None);
                return Err(error);
            }
            self.started += 1;
        }
        Ok(())
    }

    /// Stops every started profiler in reverse order. All of them are stopped
    /// even if one fails; the first failure is returned alongside the entries
    /// of the others.
    pub(crate) fn stop(
        &mut self,
        benchmark: &BenchmarkParams,
        iteration: &IterationParams,
        result: Option<&IterationResult>,
    ) -> (Vec<ResultEntry>, Option<HarnessError>) {
        let mut entries = Vec::new();
        let mut first_error = None;
        while self.started > 0 {
            self.started -= 1;
            let profiler = &mut self.profilers[self.started];
            match profiler.after_iteration(benchmark, iteration, result) {
                Ok(mut more) => entries.append(&mut more),
                Err(e) => {
                    tracing::warn!(profiler = profiler.label(), error = %e, "profiler failed to stop");
                    if first_error.is_none() {
                        first_error = Some(HarnessError::profiler(profiler.label(), e));
                    }
                }
            }
        }
        (entries, first_error)
    }
}

/// Reports the wall-clock time between the start and stop hooks.
#[derive(Debug, Default)]
pub struct WallClockProfiler {
    started: Option<Instant>,
}

impl WallClockProfiler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Profiler for WallClockProfiler {
    fn label(&self) -> &str {
        "wall-clock"
    }

    fn before_iteration(
        &mut self,
        _benchmark: &BenchmarkParams,
        _iteration: &IterationParams,
    ) -> std::result::Result<(), ProfilerError> {
        self.started = Some(Instant::now());
        Ok(())
    }

    fn after_iteration(
        &mut self,
        _benchmark: &BenchmarkParams,
        _iteration: &IterationParams,
        _result: Option<&IterationResult>,
    ) -> std::result::Result<Vec<ResultEntry>, ProfilerError> {
        let started = self.started.take().ok_or("stopped without being started")?;
        let millis = started.elapsed().as_secs_f64() * 1e3;
        Ok(vec![ResultEntry::new("wall-clock", millis, "ms")])
    }
}
