// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Read planning.
//!
//! The requested total is split evenly over the partitions. The share is
//! computed once from the requested total; each partition then clamps it to
//! what it actually retains:
//!
//! - a share of zero (fewer requested than partitions) reads the whole
//!   partition
//! - `Oldest` starts at the low watermark
//! - `Latest` starts `read_count` below the high watermark, never below low

use crate::message::{Direction, PartitionOverride, PartitionWindow, ReadPlan, TopicWindow};

pub fn plan_reads(window: &TopicWindow, requested_count: i64, direction: Direction) -> Vec<ReadPlan> {
    if window.partitions.is_empty() {
        return Vec::new();
    }
    let fair_share = requested_count.max(0) / window.partitions.len() as i64;

    window
        .partitions
        .iter()
        .map(|partition| plan_partition(partition, fair_share, direction))
        .collect()
}

fn plan_partition(partition: &PartitionWindow, fair_share: i64, direction: Direction) -> ReadPlan {
    let read_count = if fair_share == 0 {
        partition.count
    } else {
        fair_share.min(partition.count)
    };

    let start_offset = match direction {
        Direction::Oldest => partition.low,
        Direction::Latest => (partition.high - read_count).max(partition.low),
    };

    ReadPlan {
        partition: partition.partition,
        start_offset: partition.clamp_offset(start_offset),
        read_count,
    }
}

/// Continues a previous fetch on one partition: start at the override offset
/// and stop at the high watermark that fetch captured.
///
/// The start is clamped into the partition's current range, so an offset
/// already removed by retention starts at `low`. The stop never moves past
/// the captured high, even when the partition has grown since.
pub fn plan_override(
    partition_override: &PartitionOverride,
    partition: &PartitionWindow,
    requested_count: i64,
) -> ReadPlan {
    let start_offset = partition.clamp_offset(partition_override.offset);
    let stop_offset = partition_override.high_at_capture.min(partition.high);
    ReadPlan {
        partition: partition.partition,
        start_offset,
        read_count: requested_count.min(stop_offset - start_offset).max(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn window(bounds: &[(i64, i64)]) -> TopicWindow {
        TopicWindow::from_partitions(
            bounds
                .iter()
                .enumerate()
                .map(|(id, (low, high))| PartitionWindow::new(id as i32, *low, *high))
                .collect(),
        )
    }

    fn plan(partition: i32, start_offset: i64, read_count: i64) -> ReadPlan {
        ReadPlan {
            partition,
            start_offset,
            read_count,
        }
    }

    #[test]
    fn test_fair_share_with_empty_partition() {
        let plans = plan_reads(&window(&[(0, 10), (0, 0)]), 4, Direction::Oldest);
        assert_eq!(plans, vec![plan(0, 0, 2), plan(1, 0, 0)]);
    }

    #[test]
    fn test_latest_beyond_available_reads_everything() {
        let plans = plan_reads(&window(&[(100, 200)]), 500, Direction::Latest);
        assert_eq!(plans, vec![plan(0, 100, 100)]);
    }

    #[test]
    fn test_share_does_not_shrink_across_partitions() {
        // every partition gets 12 / 3 = 4, including the last one
        let plans = plan_reads(
            &window(&[(0, 100), (0, 100), (0, 100)]),
            12,
            Direction::Latest,
        );
        assert_eq!(plans, vec![plan(0, 96, 4), plan(1, 96, 4), plan(2, 96, 4)]);
    }

    #[rstest]
    #[case::fewer_than_partitions(2, vec![plan(0, 0, 5), plan(1, 10, 3), plan(2, 0, 0)])]
    #[case::zero_requested(0, vec![plan(0, 0, 5), plan(1, 10, 3), plan(2, 0, 0)])]
    #[case::negative_requested(-7, vec![plan(0, 0, 5), plan(1, 10, 3), plan(2, 0, 0)])]
    #[case::share_larger_than_partition(30, vec![plan(0, 0, 5), plan(1, 10, 3), plan(2, 0, 0)])]
    #[case::share_smaller_than_partition(6, vec![plan(0, 0, 2), plan(1, 10, 2), plan(2, 0, 0)])]
    fn test_oldest_plans(#[case] requested: i64, #[case] expected: Vec<ReadPlan>) {
        let plans = plan_reads(&window(&[(0, 5), (10, 13), (0, 0)]), requested, Direction::Oldest);
        assert_eq!(plans, expected);
    }

    #[rstest]
    #[case::fewer_than_partitions(1, vec![plan(0, 0, 5), plan(1, 10, 3)])]
    #[case::one_each(2, vec![plan(0, 4, 1), plan(1, 12, 1)])]
    #[case::partial(4, vec![plan(0, 3, 2), plan(1, 11, 2)])]
    #[case::exact(10, vec![plan(0, 0, 5), plan(1, 10, 3)])]
    fn test_latest_plans(#[case] requested: i64, #[case] expected: Vec<ReadPlan>) {
        let plans = plan_reads(&window(&[(0, 5), (10, 13)]), requested, Direction::Latest);
        assert_eq!(plans, expected);
    }

    #[test]
    fn test_no_partitions_no_plan() {
        assert!(plan_reads(&TopicWindow::default(), 10, Direction::Oldest).is_empty());
    }

    #[rstest]
    #[case::bounded_by_request(10, 5, 100, plan(3, 10, 5))]
    #[case::bounded_by_capture(10, 50, 25, plan(3, 10, 15))]
    #[case::already_at_capture(25, 50, 25, plan(3, 25, 0))]
    #[case::past_capture(30, 50, 25, plan(3, 30, 0))]
    #[case::retention_passed_offset(0, 100, 25, plan(3, 5, 20))]
    #[case::negative_offset(-5, 100, 25, plan(3, 5, 20))]
    #[case::capture_above_current_high(10, 100, 80, plan(3, 10, 30))]
    #[case::zero_requested(10, 0, 25, plan(3, 10, 0))]
    fn test_override_plan(
        #[case] offset: i64,
        #[case] requested: i64,
        #[case] high_at_capture: i64,
        #[case] expected: ReadPlan,
    ) {
        // partition 3 currently retains [5, 40)
        let partition = PartitionWindow::new(3, 5, 40);
        let partition_override = PartitionOverride {
            partition: 3,
            offset,
            high_at_capture,
        };
        assert_eq!(
            plan_override(&partition_override, &partition, requested),
            expected
        );
    }

    proptest! {
        #[test]
        fn prop_override_stays_below_capture(
            low in 0i64..1_000,
            count in 0i64..1_000,
            offset in -1_000i64..3_000,
            high_at_capture in 0i64..3_000,
            requested in 0i64..5_000,
        ) {
            let partition = PartitionWindow::new(0, low, low + count);
            let partition_override = PartitionOverride { partition: 0, offset, high_at_capture };
            let plan = plan_override(&partition_override, &partition, requested);

            prop_assert!(plan.start_offset >= partition.low);
            prop_assert!(plan.start_offset <= partition.high);
            prop_assert!(plan.read_count >= 0);
            prop_assert!(plan.read_count <= requested);
            if plan.read_count > 0 {
                prop_assert!(plan.start_offset + plan.read_count <= high_at_capture);
                prop_assert!(plan.start_offset + plan.read_count <= partition.high);
            }
        }
    }

    proptest! {
        #[test]
        fn prop_plan_stays_inside_watermarks(
            bounds in prop::collection::vec((0i64..10_000, 0i64..10_000), 1..16),
            requested in 0i64..100_000,
            latest in any::<bool>(),
        ) {
            let direction = if latest { Direction::Latest } else { Direction::Oldest };
            let window = window(&bounds);
            let plans = plan_reads(&window, requested, direction);
            let fair_share = requested / bounds.len() as i64;

            prop_assert_eq!(plans.len(), window.partitions.len());
            for (plan, partition) in plans.iter().zip(&window.partitions) {
                prop_assert_eq!(plan.partition, partition.partition);
                prop_assert!(plan.start_offset >= partition.low);
                prop_assert!(plan.start_offset <= partition.high);
                prop_assert!(plan.read_count >= 0);
                prop_assert!(plan.read_count <= partition.count);
                prop_assert!(plan.start_offset + plan.read_count <= partition.high);
                if direction == Direction::Oldest {
                    prop_assert_eq!(plan.start_offset, partition.low);
                }
                let reads_everything = fair_share == 0 || fair_share >= partition.count;
                if direction == Direction::Latest && reads_everything {
                    prop_assert_eq!(plan.start_offset, partition.low);
                    prop_assert_eq!(plan.read_count, partition.count);
                }
            }
        }
    }
}
