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

use std::any::type_name;
use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::broker::BrokerSession;
use crate::fetch::fetch_partition;
use crate::message::{Direction, FetchRequest, FetchResult, ReadPlan, Record, TopicWindow};
use crate::service::FetchSettings;
use crate::window::{collect_topic_window, plan_override, plan_reads};
use crate::{AppError, AppResult};

/// Runs one windowed fetch over a broker session.
///
/// The window is captured first, turned into per-partition read plans, and
/// the plans are read concurrently, at most `max_in_flight_partitions` at a
/// time. Partition results are merged in ascending partition order whatever
/// order they finish in. The first hard error cancels every sibling read and
/// is returned as the result of the whole fetch.
pub struct FetchOrchestrator<S: BrokerSession> {
    session: Arc<S>,
    settings: FetchSettings,
}

impl<S: BrokerSession + 'static> FetchOrchestrator<S> {
    pub fn new(session: Arc<S>, settings: FetchSettings) -> Self {
        FetchOrchestrator { session, settings }
    }

    pub async fn fetch(
        &self,
        request: &FetchRequest,
        cancel: &CancellationToken,
    ) -> AppResult<FetchResult> {
        if request.topic.is_empty() {
            return Err(AppError::InvalidRequest("topic must not be empty".to_string()));
        }

        let window = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            window = collect_topic_window(self.session.as_ref(), &request.topic) => window?,
        };

        let plans = self.plan(request, &window)?;
        debug!(
            "fetch {} {:?} requested={} plans={}",
            request.topic,
            request.direction,
            request.requested_count,
            plans.len()
        );

        let mut messages = self.read_all(&request.topic, plans, cancel).await?;
        if request.direction == Direction::Latest {
            messages.reverse();
        }

        info!(
            "fetched {} messages from {} ({} in window)",
            messages.len(),
            request.topic,
            window.total_message_count
        );
        Ok(FetchResult {
            metadata: window,
            messages,
        })
    }

    fn plan(&self, request: &FetchRequest, window: &TopicWindow) -> AppResult<Vec<ReadPlan>> {
        match &request.partition_override {
            Some(partition_override) => {
                let partition = window.partition(partition_override.partition).ok_or_else(|| {
                    AppError::InvalidRequest(format!(
                        "topic {} has no partition {}",
                        request.topic, partition_override.partition
                    ))
                })?;
                Ok(vec![plan_override(
                    partition_override,
                    partition,
                    request.requested_count,
                )])
            }
            None => Ok(plan_reads(
                window,
                request.requested_count,
                request.direction,
            )),
        }
    }

    async fn read_all(
        &self,
        topic: &str,
        plans: Vec<ReadPlan>,
        cancel: &CancellationToken,
    ) -> AppResult<Vec<Record>> {
        let reads = cancel.child_token();
        let limit = Arc::new(Semaphore::new(self.settings.fetch_parallelism()));
        let message_timeout = self.settings.message_timeout();
        let mut join_set = JoinSet::new();

        for plan in plans.into_iter().filter(|plan| plan.read_count > 0) {
            let session = self.session.clone();
            let limit = limit.clone();
            let reads = reads.clone();
            let topic = topic.to_string();

            join_set.spawn(async move {
                let result = async {
                    let _permit = tokio::select! {
                        biased;
                        _ = reads.cancelled() => return Err(AppError::Cancelled),
                        permit = limit.acquire_owned() => permit.map_err(|e| {
                            AppError::IllegalState(format!("fetch limit closed: {e}"))
                        })?,
                    };
                    fetch_partition(session.as_ref(), &topic, plan, message_timeout, &reads)
                        .await
                }
                .await;
                (plan.partition, result)
            });
        }

        let mut by_partition = BTreeMap::new();
        let mut failure = None;
        while let Some(joined) = join_set.join_next().await {
            let outcome = match joined {
                Ok((partition, Ok(records))) => {
                    by_partition.insert(partition, records);
                    continue;
                }
                Ok((_, Err(e))) => e,
                Err(join_error) => task_failure(join_error),
            };
            error!("fetch on {} failed, cancelling remaining reads: {}", topic, outcome);
            failure = Some(outcome);
            break;
        }

        if let Some(e) = failure {
            reads.cancel();
            join_set.shutdown().await;
            return Err(e);
        }

        Ok(by_partition.into_values().flatten().collect())
    }
}

fn task_failure(join_error: JoinError) -> AppError {
    if !join_error.is_panic() {
        return AppError::Cancelled;
    }
    let payload = join_error.into_panic();
    let message = if let Some(message) = payload.downcast_ref::<&'static str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        format!("unknown panic payload {}", get_type_name(&payload))
    };
    AppError::IllegalState(format!("partition read panicked: {message}"))
}

#[inline]
fn get_type_name<R>(_: &R) -> &'static str {
    type_name::<R>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Connector, MemoryBroker};
    use crate::message::PartitionOverride;
    use crate::service::ConnectionConfig;
    use std::time::Duration;

    fn orchestrator(
        broker: &MemoryBroker,
        settings: FetchSettings,
    ) -> FetchOrchestrator<<MemoryBroker as Connector>::Session> {
        let session = broker
            .connect(&ConnectionConfig::new("memory:9092"), &settings)
            .unwrap();
        FetchOrchestrator::new(Arc::new(session), settings)
    }

    fn offsets(result: &FetchResult) -> Vec<(i32, i64)> {
        result.messages.iter().map(|r| (r.partition, r.offset)).collect()
    }

    #[tokio::test]
    async fn test_merge_is_partition_ordered_regardless_of_completion() -> AppResult<()> {
        let broker = MemoryBroker::new();
        broker.create_topic("events", 3);
        for partition in 0..3 {
            broker.fill("events", partition, 2)?;
        }
        broker.slow_down("events", 0, Duration::from_millis(30));

        let result = orchestrator(&broker, FetchSettings::default())
            .fetch(
                &FetchRequest::new("events", 6, Direction::Oldest),
                &CancellationToken::new(),
            )
            .await?;

        assert_eq!(
            offsets(&result),
            vec![(0, 0), (0, 1), (1, 0), (1, 1), (2, 0), (2, 1)]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_latest_reverses_merged_sequence() -> AppResult<()> {
        let broker = MemoryBroker::new();
        broker.create_topic("events", 2);
        broker.fill("events", 0, 5)?;
        broker.fill("events", 1, 5)?;

        let result = orchestrator(&broker, FetchSettings::default())
            .fetch(
                &FetchRequest::new("events", 4, Direction::Latest),
                &CancellationToken::new(),
            )
            .await?;

        assert_eq!(offsets(&result), vec![(1, 4), (1, 3), (0, 4), (0, 3)]);
        Ok(())
    }

    #[tokio::test]
    async fn test_in_flight_partitions_are_bounded() -> AppResult<()> {
        let broker = MemoryBroker::new();
        broker.create_topic("events", 6);
        for partition in 0..6 {
            broker.fill("events", partition, 3)?;
            broker.slow_down("events", partition, Duration::from_millis(5));
        }
        let settings = FetchSettings {
            max_in_flight_partitions: 2,
            ..FetchSettings::default()
        };

        let result = orchestrator(&broker, settings)
            .fetch(
                &FetchRequest::new("events", 18, Direction::Oldest),
                &CancellationToken::new(),
            )
            .await?;

        assert_eq!(result.messages.len(), 18);
        assert!(broker.peak_cursors() <= 2);
        assert_eq!(broker.open_cursors(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_override_for_unknown_partition_is_rejected() -> AppResult<()> {
        let broker = MemoryBroker::new();
        broker.create_topic("events", 2);

        let request = FetchRequest::new("events", 5, Direction::Oldest).with_override(
            PartitionOverride {
                partition: 7,
                offset: 0,
                high_at_capture: 10,
            },
        );
        let result = orchestrator(&broker, FetchSettings::default())
            .fetch(&request, &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(AppError::InvalidRequest(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_topic_name_is_rejected() {
        let broker = MemoryBroker::new();
        let result = orchestrator(&broker, FetchSettings::default())
            .fetch(
                &FetchRequest::new("", 5, Direction::Oldest),
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(AppError::InvalidRequest(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_cancels_siblings() -> AppResult<()> {
        let broker = MemoryBroker::new();
        broker.create_topic("events", 3);
        for partition in 0..3 {
            broker.fill("events", partition, 10)?;
        }
        broker.stall_at("events", 0, 1);
        broker.stall_at("events", 2, 1);
        broker.fail_reads("events", 1);

        let result = orchestrator(&broker, FetchSettings::default())
            .fetch(
                &FetchRequest::new("events", 30, Direction::Oldest),
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(
            result,
            Err(AppError::PartitionFetchFailed { partition: 1, .. })
        ));
        assert_eq!(broker.open_cursors(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_panic_payload_becomes_illegal_state() {
        let join_error = tokio::spawn(async { panic!("boom") }).await.unwrap_err();
        match task_failure(join_error) {
            AppError::IllegalState(message) => assert!(message.contains("boom")),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
