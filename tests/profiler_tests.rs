use phasebench::{
    BenchmarkParams, HarnessError, IterationParams, IterationResult, IterationRunner, Profiler,
    ProfilerError, ProfilerTiming, ResultEntry, WallClockProfiler, WorkloadError, workload_fn,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Log = Arc<Mutex<Vec<String>>>;

struct Tracer {
    name: &'static str,
    log: Log,
    fail_start: bool,
}

impl Tracer {
    fn new(name: &'static str, log: &Log) -> Self {
        Tracer {
            name,
            log: log.clone(),
            fail_start: false,
        }
    }

    fn failing(name: &'static str, log: &Log) -> Self {
        Tracer {
            fail_start: true,
            ..Tracer::new(name, log)
        }
    }
}

impl Profiler for Tracer {
    fn label(&self) -> &str {
        self.name
    }

    fn before_iteration(
        &mut self,
        _: &BenchmarkParams,
        _: &IterationParams,
    ) -> Result<(), ProfilerError> {
        self.log.lock().unwrap().push(format!("start {}", self.name));
        if self.fail_start {
            return Err("counter unavailable".into());
        }
        Ok(())
    }

    fn after_iteration(
        &mut self,
        _: &BenchmarkParams,
        _: &IterationParams,
        result: Option<&IterationResult>,
    ) -> Result<Vec<ResultEntry>, ProfilerError> {
        let outcome = if result.is_some() { "ok" } else { "failed" };
        self.log
            .lock()
            .unwrap()
            .push(format!("stop {} {outcome}", self.name));
        Ok(vec![ResultEntry::new(self.name, 1.0, "#")])
    }
}

fn window() -> IterationParams {
    IterationParams::measurement(1, Duration::from_millis(20))
}

#[test]
fn test_profilers_stop_in_reverse_order() {
    let log = Log::default();
    let params = BenchmarkParams::builder().threads(2).build();
    let workload = workload_fn(|ctx| ctx.measure("spin", || Ok(())));
    let mut runner = IterationRunner::new(params, workload)
        .unwrap()
        .with_profiler(Tracer::new("outer", &log))
        .with_profiler(Tracer::new("inner", &log));

    let result = runner.run_iteration(&window(), true).unwrap();

    assert_eq!(
        *log.lock().unwrap(),
        ["start outer", "start inner", "stop inner ok", "stop outer ok"]
    );
    let labels: Vec<_> = result.profiler_results.iter().map(|e| e.label.as_str()).collect();
    assert_eq!(labels, ["inner", "outer"]);
}

#[test]
fn test_failed_iteration_still_reports_profiler_results() {
    let log = Log::default();
    let params = BenchmarkParams::builder().threads(2).build();
    let workload = workload_fn(|ctx| {
        if ctx.assignment().global_index == 0 {
            return Err(WorkloadError::message("boom"));
        }
        ctx.measure("spin", || Ok(()))
    });
    let mut runner = IterationRunner::new(params, workload)
        .unwrap()
        .with_profiler(WallClockProfiler::new())
        .with_profiler(Tracer::new("tracer", &log));

    match runner.run_iteration(&window(), true).unwrap_err() {
        HarnessError::Workload {
            failures,
            profiler_results,
            ..
        } => {
            assert_eq!(failures.len(), 1);
            let labels: Vec<_> = profiler_results.iter().map(|e| e.label.as_str()).collect();
            assert_eq!(labels, ["tracer", "wall-clock"]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(*log.lock().unwrap(), ["start tracer", "stop tracer failed"]);
}

#[test]
fn test_failing_start_before_submit() {
    let log = Log::default();
    let params = BenchmarkParams::builder().threads(2).build();
    let workload = workload_fn(|ctx| ctx.measure("spin", || Ok(())));
    let mut runner = IterationRunner::new(params, workload)
        .unwrap()
        .with_profiler(Tracer::new("first", &log))
        .with_profiler(Tracer::failing("second", &log));

    let err = runner.run_iteration(&window(), true).unwrap_err();
    assert!(matches!(err, HarnessError::Profiler { ref label, .. } if label == "second"));
    assert_eq!(
        *log.lock().unwrap(),
        ["start first", "start second", "stop first failed"]
    );
}

#[test]
fn test_failing_start_after_setup_winds_down_workers() {
    let log = Log::default();
    let params = BenchmarkParams::builder()
        .threads(3)
        .profiler_timing(ProfilerTiming::AfterSetup)
        .timeout(Duration::from_secs(30))
        .build();
    let workload = workload_fn(|ctx| ctx.measure("spin", || Ok(())));
    let mut runner = IterationRunner::new(params, workload)
        .unwrap()
        .with_profiler(Tracer::failing("late", &log));

    let err = runner.run_iteration(&window(), true).unwrap_err();
    assert!(matches!(err, HarnessError::Profiler { ref label, .. } if label == "late"));

    // The workers were wound down and their states returned; the runner
    // stays usable once the profiler is fixed.
    assert_eq!(runner.state_cache().cached(), 3);
}
