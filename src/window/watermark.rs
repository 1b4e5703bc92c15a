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

use tracing::{debug, trace};

use crate::broker::BrokerSession;
use crate::message::{PartitionWindow, TopicWindow};
use crate::AppResult;

/// Queries live low/high watermarks for every partition of `topic`.
///
/// Nothing is cached, so two calls may see different values while the topic
/// is being written to. A single failed partition query fails the whole call:
/// planning needs every partition.
pub async fn collect_topic_window<S: BrokerSession>(
    session: &S,
    topic: &str,
) -> AppResult<TopicWindow> {
    let partition_ids = session.partition_ids(topic).await?;

    let mut partitions = Vec::with_capacity(partition_ids.len());
    for partition in partition_ids {
        let (low, high) = session.watermarks(topic, partition).await?;
        trace!("{}-{} watermarks low={} high={}", topic, partition, low, high);
        partitions.push(PartitionWindow::new(partition, low, high));
    }

    let window = TopicWindow::from_partitions(partitions);
    debug!(
        "topic {} has {} messages across {} partitions",
        topic, window.total_message_count, window.partition_count
    );
    Ok(window)
}
