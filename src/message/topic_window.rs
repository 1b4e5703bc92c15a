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

use serde::{Deserialize, Serialize};

/// Retained offset range of a single partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct PartitionWindow {
    pub partition: i32,
    pub low: i64,
    /// offset the next record will be written at
    pub high: i64,
    pub count: i64,
}

impl PartitionWindow {
    /// A broker may briefly report `high < low` while retention runs; such a
    /// partition is treated as empty at `low`.
    pub fn new(partition: i32, low: i64, high: i64) -> Self {
        let low = low.max(0);
        let high = high.max(low);
        PartitionWindow {
            partition,
            low,
            high,
            count: high - low,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn clamp_offset(&self, offset: i64) -> i64 {
        offset.clamp(self.low, self.high)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct TopicWindow {
    pub total_message_count: i64,
    pub partition_count: usize,
    /// indexed by partition id
    pub partitions: Vec<PartitionWindow>,
}

impl TopicWindow {
    pub fn from_partitions(mut partitions: Vec<PartitionWindow>) -> Self {
        partitions.sort_by_key(|p| p.partition);
        let total_message_count = partitions.iter().map(|p| p.count).sum();
        TopicWindow {
            total_message_count,
            partition_count: partitions.len(),
            partitions,
        }
    }

    pub fn partition(&self, partition: i32) -> Option<&PartitionWindow> {
        self.partitions.iter().find(|p| p.partition == partition)
    }
}
