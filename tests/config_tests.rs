use phasebench::{
    BenchmarkParams, HarnessError, IterationRunner, Mode, PinningStrategy, ThreadingModel,
    workload_fn,
};
use std::time::Duration;

fn noop() -> impl phasebench::Workload {
    workload_fn(|ctx| ctx.measure("noop", || Ok(())))
}

#[test]
fn test_runner_rejects_invalid_params() {
    let cases = [
        BenchmarkParams::builder().threads(0).build(),
        BenchmarkParams::builder().thread_groups(vec![2, 0]).build(),
        BenchmarkParams::builder()
            .threads(4)
            .threading(ThreadingModel::Shared)
            .pool_threads(3)
            .build(),
    ];
    for params in cases {
        assert!(matches!(
            IterationRunner::new(params, noop()),
            Err(HarnessError::Config(_))
        ));
    }
}

#[test]
fn test_assignments_are_cached_at_construction() {
    let params = BenchmarkParams::builder()
        .threads(5)
        .thread_groups(vec![2, 1])
        .build();
    let runner = IterationRunner::new(params, noop()).unwrap();

    let subgroups: Vec<_> = runner
        .assignments()
        .iter()
        .map(|a| (a.group_index, a.subgroup_index, a.position_in_subgroup))
        .collect();
    assert_eq!(
        subgroups,
        vec![(0, 0, 0), (0, 0, 1), (0, 1, 0), (1, 0, 0), (1, 0, 1)]
    );
    runner.shutdown().unwrap();
}

#[test]
fn test_json_file_round_trip() {
    let params = BenchmarkParams::builder()
        .name("from-file")
        .threads(2)
        .mode(Mode::AverageTime)
        .pinning(PinningStrategy::Linear)
        .timeout(Duration::from_secs(5))
        .build();

    let path = std::env::temp_dir().join(format!("phasebench-params-{}.json", std::process::id()));
    std::fs::write(&path, serde_json::to_string_pretty(&params).unwrap()).unwrap();
    let loaded = BenchmarkParams::from_json_file(&path);
    std::fs::remove_file(&path).unwrap();

    assert_eq!(loaded.unwrap(), params);
}

#[test]
fn test_missing_json_file() {
    let err = BenchmarkParams::from_json_file("/nonexistent/phasebench.json").unwrap_err();
    assert!(matches!(err, HarnessError::Io(_)));
}

#[test]
fn test_pinning_strategies_run() {
    for pinning in [
        PinningStrategy::None,
        PinningStrategy::Linear,
        PinningStrategy::AvoidSMT,
    ] {
        let params = BenchmarkParams::builder().threads(2).pinning(pinning).build();
        let mut runner = IterationRunner::new(params, noop()).unwrap();
        let result = runner
            .run_iteration(
                &phasebench::IterationParams::measurement(1, Duration::from_millis(10)),
                true,
            )
            .unwrap();
        assert_eq!(result.results.len(), 2);
        runner.shutdown().unwrap();
    }
}
