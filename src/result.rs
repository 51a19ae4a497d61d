//! Result shapes produced by workers and by the runner.

use crate::params::{IterationKind, Mode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One named contribution to an iteration's results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEntry {
    pub label: String,
    pub value: f64,
    pub unit: String,
}

impl ResultEntry {
    pub fn new(label: impl Into<String>, value: f64, unit: impl Into<String>) -> Self {
        ResultEntry {
            label: label.into(),
            value,
            unit: unit.into(),
        }
    }
}

/// What one worker hands back after a successful run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerResults {
    pub results: Vec<ResultEntry>,
    /// Operations executed, including warmup and warmdown spins.
    pub ops_total: u64,
    /// Operations executed inside the measured region.
    pub ops_measured: u64,
}

impl WorkerResults {
    pub fn new(results: Vec<ResultEntry>, ops_total: u64, ops_measured: u64) -> Self {
        WorkerResults {
            results,
            ops_total,
            ops_measured,
        }
    }

    /// A single entry result.
    pub fn single(entry: ResultEntry, ops_total: u64, ops_measured: u64) -> Self {
        Self::new(vec![entry], ops_total, ops_measured)
    }
}

/// Raw counters of a measured loop, see
/// [`WorkerContext::run_measured_loop`](crate::WorkerContext::run_measured_loop).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Measurement {
    pub ops_total: u64,
    pub ops_measured: u64,
    pub elapsed: Duration,
}

impl Measurement {
    /// Converts the counters to the score the benchmark mode reports.
    pub fn to_entry(&self, label: impl Into<String>, mode: Mode) -> ResultEntry {
        let secs = self.elapsed.as_secs_f64();
        match mode {
            Mode::Throughput => {
                let rate = if secs > 0.0 {
                    self.ops_measured as f64 / secs
                } else {
                    0.0
                };
                ResultEntry::new(label, rate, "ops/s")
            }
            Mode::AverageTime | Mode::SampleTime => {
                let per_op = if self.ops_measured > 0 {
                    self.elapsed.as_nanos() as f64 / self.ops_measured as f64
                } else {
                    0.0
                };
                ResultEntry::new(label, per_op, "ns/op")
            }
            Mode::SingleShotTime => {
                ResultEntry::new(label, self.elapsed.as_nanos() as f64, "ns")
            }
        }
    }

    /// Packages the counters and their score as a worker result.
    pub fn into_results(self, label: impl Into<String>, mode: Mode) -> WorkerResults {
        WorkerResults::single(self.to_entry(label, mode), self.ops_total, self.ops_measured)
    }
}

/// Aggregated outcome of one iteration across all workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationResult {
    pub kind: IterationKind,
    /// Index within its kind, starting at 0.
    pub index: usize,
    pub thread_count: usize,
    pub mode: Mode,
    pub results: Vec<ResultEntry>,
    pub ops_total: u64,
    pub ops_measured: u64,
    /// Rounds of interruption needed to reclaim stuck workers.
    pub interrupt_rounds: usize,
    /// Entries contributed by profilers when the iteration stopped.
    pub profiler_results: Vec<ResultEntry>,
    pub elapsed: Duration,
}

impl IterationResult {
    /// Sum of all per-thread values carrying `label`.
    pub fn total(&self, label: &str) -> f64 {
        self.results
            .iter()
            .filter(|entry| entry.label == label)
            .map(|entry| entry.value)
            .sum()
    }
}

/// All iterations of one benchmark run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkRun {
    pub name: String,
    pub warmup: Vec<IterationResult>,
    pub measurement: Vec<IterationResult>,
}

impl BenchmarkRun {
    pub fn interrupt_rounds(&self) -> usize {
        self.warmup
            .iter()
            .chain(&self.measurement)
            .map(|r| r.interrupt_rounds)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throughput_entry() {
        let m = Measurement {
            ops_total: 150,
            ops_measured: 100,
            elapsed: Duration::from_millis(500),
        };
        let entry = m.to_entry("op", Mode::Throughput);
        assert_eq!(entry.unit, "ops/s");
        assert!((entry.value - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_average_time_entry() {
        let m = Measurement {
            ops_total: 10,
            ops_measured: 10,
            elapsed: Duration::from_micros(10),
        };
        let entry = m.to_entry("op", Mode::AverageTime);
        assert_eq!(entry.unit, "ns/op");
        assert!((entry.value - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_elapsed_is_not_nan() {
        let m = Measurement::default();
        assert_eq!(m.to_entry("op", Mode::Throughput).value, 0.0);
        assert_eq!(m.to_entry("op", Mode::AverageTime).value, 0.0);
    }

    #[test]
    fn test_total_by_label() {
        let result = IterationResult {
            kind: IterationKind::Measurement,
            index: 0,
            thread_count: 2,
            mode: Mode::Throughput,
            results: vec![
                ResultEntry::new("a", 1.0, "ops/s"),
                ResultEntry::new("a", 2.0, "ops/s"),
                ResultEntry::new("b", 5.0, "ops/s"),
            ],
            ops_total: 0,
            ops_measured: 0,
            interrupt_rounds: 0,
            profiler_results: Vec::new(),
            elapsed: Duration::ZERO,
        };
        assert_eq!(result.total("a"), 3.0);
        assert_eq!(result.total("missing"), 0.0);
    }
}
