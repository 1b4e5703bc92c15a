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

//! Value types passed between the watermark collector, the planner, the
//! fetcher and the caller. All of them live for a single call.

pub use record::{ProduceAck, ProduceMessage, RawRecord, Record, RecordHeader};
pub use topic_window::{PartitionWindow, TopicWindow};

mod record;
mod topic_window;

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// read forward from the low watermark
    #[default]
    Oldest,
    /// read the most recent records, newest first in the result
    Latest,
}

/// Pins a fetch to one partition, starting where a previous fetch stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct PartitionOverride {
    pub partition: i32,
    pub offset: i64,
    /// high watermark observed by the fetch being continued
    pub high_at_capture: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FetchRequest {
    pub topic: String,
    pub requested_count: i64,
    pub direction: Direction,
    pub partition_override: Option<PartitionOverride>,
}

impl FetchRequest {
    pub fn new(topic: impl Into<String>, requested_count: i64, direction: Direction) -> Self {
        FetchRequest {
            topic: topic.into(),
            requested_count,
            direction,
            partition_override: None,
        }
    }

    pub fn with_override(mut self, partition_override: PartitionOverride) -> Self {
        self.partition_override = Some(partition_override);
        self
    }
}

/// Where and how much to read on one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReadPlan {
    pub partition: i32,
    pub start_offset: i64,
    pub read_count: i64,
}

impl Display for ReadPlan {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "(partition={}, start={}, count={})",
            self.partition, self.start_offset, self.read_count
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchResult {
    pub metadata: TopicWindow,
    pub messages: Vec<Record>,
}
