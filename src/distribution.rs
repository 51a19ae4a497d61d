//! Thread-group distribution.
//!
//! Workers are partitioned into groups, each group made of subgroups whose
//! sizes are the declared weights. Asymmetric benchmarks use this to give
//! threads roles: with weights `[3, 1]`, every group has three producers
//! followed by one consumer.

use crate::error::{HarnessError, Result};
use serde::{Deserialize, Serialize};

/// Position of one worker within the thread layout of a benchmark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadAssignment {
    pub global_index: usize,
    pub total_threads: usize,
    pub group_index: usize,
    pub total_groups: usize,
    pub subgroup_index: usize,
    pub total_subgroups: usize,
    pub position_in_group: usize,
    /// Threads in one full group (sum of the weights).
    pub group_size: usize,
    pub position_in_subgroup: usize,
    /// Declared weight of this worker's subgroup.
    pub subgroup_size: usize,
}

/// Assigns every worker its position in the group layout.
///
/// Threads are taken in index order. Each subgroup is filled up to its weight
/// before moving on to the next one; once the last subgroup is full a new group
/// starts from the first subgroup again. A thread count that is not a multiple
/// of the weight sum leaves the last group partially filled.
///
/// # Example
///
/// ```
/// use phasebench::distribute;
///
/// let layout = distribute(5, &[2, 1]).unwrap();
/// let subgroups: Vec<_> = layout.iter().map(|a| (a.group_index, a.subgroup_index)).collect();
/// assert_eq!(subgroups, vec![(0, 0), (0, 0), (0, 1), (1, 0), (1, 0)]);
/// ```
pub fn distribute(thread_count: usize, group_weights: &[usize]) -> Result<Vec<ThreadAssignment>> {
    if thread_count == 0 {
        return Err(HarnessError::config("thread count must be positive"));
    }
    if group_weights.is_empty() {
        return Err(HarnessError::config("thread groups must not be empty"));
    }
    if let Some(index) = group_weights.iter().position(|&w| w == 0) {
        return Err(HarnessError::config(format!(
            "thread group weight at index {index} must be positive"
        )));
    }

    let group_size: usize = group_weights.iter().sum();
    let total_groups = thread_count.div_ceil(group_size);
    let total_subgroups = group_weights.len();

    let mut layout = Vec::with_capacity(thread_count);
    let mut group = 0;
    let mut subgroup = 0;
    let mut in_group = 0;
    let mut in_subgroup = 0;

    for global_index in 0..thread_count {
        if in_subgroup == group_weights[subgroup] {
            subgroup += 1;
            in_subgroup = 0;
            if subgroup == total_subgroups {
                subgroup = 0;
                group += 1;
                in_group = 0;
            }
        }

        layout.push(ThreadAssignment {
            global_index,
            total_threads: thread_count,
            group_index: group,
            total_groups,
            subgroup_index: subgroup,
            total_subgroups,
            position_in_group: in_group,
            group_size,
            position_in_subgroup: in_subgroup,
            subgroup_size: group_weights[subgroup],
        });

        in_group += 1;
        in_subgroup += 1;
    }

    Ok(layout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symmetric_layout() {
        let layout = distribute(4, &[1]).unwrap();
        assert_eq!(layout.len(), 4);
        for (i, a) in layout.iter().enumerate() {
            assert_eq!(a.global_index, i);
            assert_eq!(a.group_index, i);
            assert_eq!(a.total_groups, 4);
            assert_eq!(a.subgroup_index, 0);
            assert_eq!(a.position_in_subgroup, 0);
            assert_eq!(a.subgroup_size, 1);
        }
    }

    #[test]
    fn test_partial_last_group() {
        let layout = distribute(5, &[2, 1]).unwrap();
        let positions: Vec<_> = layout
            .iter()
            .map(|a| {
                (
                    a.group_index,
                    a.subgroup_index,
                    a.position_in_group,
                    a.position_in_subgroup,
                )
            })
            .collect();
        assert_eq!(
            positions,
            vec![(0, 0, 0, 0), (0, 0, 1, 1), (0, 1, 2, 0), (1, 0, 0, 0), (1, 0, 1, 1)]
        );
        assert!(layout.iter().all(|a| a.total_groups == 2));
        assert!(layout.iter().all(|a| a.group_size == 3));
        assert!(layout.iter().all(|a| a.total_subgroups == 2));
    }

    #[test]
    fn test_single_group_weights() {
        let layout = distribute(4, &[1, 1, 1, 1]).unwrap();
        assert!(layout.iter().all(|a| a.group_index == 0 && a.total_groups == 1));
        let subgroups: Vec<_> = layout.iter().map(|a| a.subgroup_index).collect();
        assert_eq!(subgroups, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_fewer_threads_than_weights() {
        let layout = distribute(2, &[3, 1]).unwrap();
        assert_eq!(layout.len(), 2);
        assert!(layout.iter().all(|a| a.subgroup_index == 0));
        assert_eq!(layout[1].position_in_subgroup, 1);
        assert_eq!(layout[1].subgroup_size, 3);
    }

    #[test]
    fn test_rejects_invalid_input() {
        assert!(matches!(distribute(0, &[1]), Err(HarnessError::Config(_))));
        assert!(matches!(distribute(4, &[]), Err(HarnessError::Config(_))));
        assert!(matches!(distribute(4, &[2, 0]), Err(HarnessError::Config(_))));
    }

    #[test]
    fn test_deterministic() {
        let a = distribute(17, &[3, 2, 1]).unwrap();
        let b = distribute(17, &[3, 2, 1]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_invariants_over_many_shapes() {
        let weight_sets: [&[usize]; 5] = [&[1], &[2, 1], &[3, 1], &[1, 2, 3], &[4, 4]];
        for weights in weight_sets {
            for threads in 1..=25 {
                let layout = distribute(threads, weights).unwrap();
                assert_eq!(layout.len(), threads);

                for a in &layout {
                    assert!(a.position_in_subgroup < a.subgroup_size);
                    assert!(a.position_in_group < a.group_size);
                    assert_eq!(a.subgroup_size, weights[a.subgroup_index]);
                    assert!(a.group_index < a.total_groups);
                }

                // Subgroup sequence cycles through the declared order.
                let mut expected = Vec::new();
                'outer: loop {
                    for (sg, &w) in weights.iter().enumerate() {
                        for _ in 0..w {
                            if expected.len() == threads {
                                break 'outer;
                            }
                            expected.push(sg);
                        }
                    }
                }
                let actual: Vec<_> = layout.iter().map(|a| a.subgroup_index).collect();
                assert_eq!(actual, expected, "weights {weights:?}, threads {threads}");
            }
        }
    }
}
