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

//! In-process broker with the same session semantics as a real cluster.
//!
//! Records live in plain vectors per partition. Faults (unreachable cluster,
//! failing metadata/watermark/read calls, stalled or slow partitions) can be
//! injected per topic-partition, and open sessions and cursors are counted so
//! callers can check that every one of them was released.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::trace;

use super::{BrokerSession, Connector, PartitionCursor};
use crate::message::{ProduceAck, ProduceMessage, RawRecord, RecordHeader};
use crate::service::{AppError, AppResult, ConnectionConfig, FetchSettings};

type PartitionKey = (String, i32);

#[derive(Debug, Default)]
struct MemoryPartition {
    /// offset of `records[0]`, i.e. the low watermark
    base_offset: i64,
    records: Vec<RawRecord>,
}

impl MemoryPartition {
    fn high(&self) -> i64 {
        self.base_offset + self.records.len() as i64
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    topics: BTreeMap<String, Vec<MemoryPartition>>,
    unreachable: bool,
    failing_metadata: HashSet<String>,
    failing_watermarks: HashSet<PartitionKey>,
    failing_reads: HashSet<PartitionKey>,
    /// cursors stop delivering once they reach this offset
    stalls: HashMap<PartitionKey, i64>,
    read_delays: HashMap<PartitionKey, Duration>,
    open_sessions: usize,
    open_cursors: usize,
    peak_cursors: usize,
    produce_counter: usize,
}

impl BrokerState {
    fn partition(&self, topic: &str, partition: i32) -> Option<&MemoryPartition> {
        self.topics
            .get(topic)
            .and_then(|partitions| partitions.get(usize::try_from(partition).ok()?))
    }

    fn partition_mut(&mut self, topic: &str, partition: i32) -> Option<&mut MemoryPartition> {
        self.topics
            .get_mut(topic)
            .and_then(|partitions| partitions.get_mut(usize::try_from(partition).ok()?))
    }
}

/// Cheap to clone; clones share the same cluster state.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_topic(&self, topic: &str, partitions: usize) {
        let mut state = self.state.lock();
        let entry = state.topics.entry(topic.to_string()).or_default();
        entry.resize_with(partitions.max(entry.len()), MemoryPartition::default);
    }

    /// Appends one record and returns its offset.
    pub fn append(
        &self,
        topic: &str,
        partition: i32,
        key: Option<&[u8]>,
        value: &[u8],
        headers: &[(&str, &str)],
    ) -> AppResult<i64> {
        let mut state = self.state.lock();
        let target = state.partition_mut(topic, partition).ok_or_else(|| {
            AppError::InvalidValue("topic partition", format!("{topic}-{partition}"))
        })?;
        let offset = target.high();
        target.records.push(RawRecord {
            topic: topic.to_string(),
            partition,
            offset,
            key: key.map(Bytes::copy_from_slice),
            payload: Some(Bytes::copy_from_slice(value)),
            timestamp_ms: Some(chrono::Utc::now().timestamp_millis()),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), Some(Bytes::copy_from_slice(v.as_bytes()))))
                .collect(),
        });
        Ok(offset)
    }

    /// Appends `count` records valued `"{topic}-{partition}-{offset}"`.
    pub fn fill(&self, topic: &str, partition: i32, count: usize) -> AppResult<()> {
        for _ in 0..count {
            let offset = self.high_watermark(topic, partition).unwrap_or(0);
            let value = format!("{topic}-{partition}-{offset}");
            self.append(topic, partition, None, value.as_bytes(), &[])?;
        }
        Ok(())
    }

    /// Drops records below `offset`, as retention would.
    pub fn delete_records_before(&self, topic: &str, partition: i32, offset: i64) {
        let mut state = self.state.lock();
        if let Some(target) = state.partition_mut(topic, partition) {
            let drop_count = (offset - target.base_offset).clamp(0, target.records.len() as i64);
            target.records.drain(..drop_count as usize);
            target.base_offset += drop_count;
        }
    }

    pub fn high_watermark(&self, topic: &str, partition: i32) -> Option<i64> {
        self.state
            .lock()
            .partition(topic, partition)
            .map(MemoryPartition::high)
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().unreachable = !reachable;
    }

    pub fn fail_metadata(&self, topic: &str) {
        self.state.lock().failing_metadata.insert(topic.to_string());
    }

    pub fn fail_watermarks(&self, topic: &str, partition: i32) {
        self.state
            .lock()
            .failing_watermarks
            .insert((topic.to_string(), partition));
    }

    pub fn fail_reads(&self, topic: &str, partition: i32) {
        self.state
            .lock()
            .failing_reads
            .insert((topic.to_string(), partition));
    }

    /// Cursors on this partition go silent once they reach `offset`.
    pub fn stall_at(&self, topic: &str, partition: i32, offset: i64) {
        self.state
            .lock()
            .stalls
            .insert((topic.to_string(), partition), offset);
    }

    /// Every record read from this partition takes `delay`.
    pub fn slow_down(&self, topic: &str, partition: i32, delay: Duration) {
        self.state
            .lock()
            .read_delays
            .insert((topic.to_string(), partition), delay);
    }

    pub fn open_sessions(&self) -> usize {
        self.state.lock().open_sessions
    }

    pub fn open_cursors(&self) -> usize {
        self.state.lock().open_cursors
    }

    /// Highest number of cursors that were open at the same time.
    pub fn peak_cursors(&self) -> usize {
        self.state.lock().peak_cursors
    }

    /// Decoded values currently stored in a partition, low to high.
    pub fn values(&self, topic: &str, partition: i32) -> Vec<String> {
        self.state
            .lock()
            .partition(topic, partition)
            .map(|p| {
                p.records
                    .iter()
                    .map(|r| {
                        r.payload
                            .as_ref()
                            .map(|v| String::from_utf8_lossy(v).into_owned())
                            .unwrap_or_default()
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn ensure_reachable(&self) -> AppResult<()> {
        if self.state.lock().unreachable {
            return Err(AppError::ConnectionFailed(
                "memory broker is unreachable".to_string(),
            ));
        }
        Ok(())
    }
}

impl Connector for MemoryBroker {
    type Session = MemorySession;

    fn connect(
        &self,
        config: &ConnectionConfig,
        _settings: &FetchSettings,
    ) -> AppResult<MemorySession> {
        config.validate()?;
        self.ensure_reachable()?;
        self.state.lock().open_sessions += 1;
        Ok(MemorySession {
            broker: self.clone(),
        })
    }
}

pub struct MemorySession {
    broker: MemoryBroker,
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        let mut state = self.broker.state.lock();
        state.open_sessions = state.open_sessions.saturating_sub(1);
    }
}

impl BrokerSession for MemorySession {
    type Cursor = MemoryCursor;

    fn probe(&self) -> impl Future<Output = AppResult<()>> + Send {
        let result = self.broker.ensure_reachable();
        async move { result }
    }

    fn list_topics(&self) -> impl Future<Output = AppResult<Vec<String>>> + Send {
        let result: AppResult<Vec<String>> = self
            .broker
            .ensure_reachable()
            .map(|_| self.broker.state.lock().topics.keys().cloned().collect());
        async move { result }
    }

    fn partition_ids(&self, topic: &str) -> impl Future<Output = AppResult<Vec<i32>>> + Send {
        let result: AppResult<Vec<i32>> = {
            let state = self.broker.state.lock();
            let unavailable = |detail: &str| AppError::MetadataUnavailable {
                topic: topic.to_string(),
                detail: detail.to_string(),
            };
            if state.unreachable || state.failing_metadata.contains(topic) {
                Err(unavailable("metadata request failed"))
            } else {
                state
                    .topics
                    .get(topic)
                    .map(|partitions| (0..partitions.len() as i32).collect())
                    .ok_or_else(|| unavailable("unknown topic"))
            }
        };
        async move { result }
    }

    fn watermarks(
        &self,
        topic: &str,
        partition: i32,
    ) -> impl Future<Output = AppResult<(i64, i64)>> + Send {
        let result = {
            let state = self.broker.state.lock();
            let failed = |detail: &str| AppError::WatermarkQueryFailed {
                topic: topic.to_string(),
                partition,
                detail: detail.to_string(),
            };
            if state
                .failing_watermarks
                .contains(&(topic.to_string(), partition))
            {
                Err(failed("offset query failed"))
            } else {
                state
                    .partition(topic, partition)
                    .map(|p| (p.base_offset, p.high()))
                    .ok_or_else(|| failed("unknown partition"))
            }
        };
        async move { result }
    }

    fn open_cursor(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
    ) -> impl Future<Output = AppResult<MemoryCursor>> + Send {
        let result = {
            let mut state = self.broker.state.lock();
            if state.partition(topic, partition).is_none() {
                Err(AppError::PartitionFetchFailed {
                    topic: topic.to_string(),
                    partition,
                    detail: "unknown partition".to_string(),
                })
            } else {
                state.open_cursors += 1;
                state.peak_cursors = state.peak_cursors.max(state.open_cursors);
                trace!("memory cursor opened on {}-{} at {}", topic, partition, offset);
                Ok(MemoryCursor {
                    broker: self.broker.clone(),
                    topic: topic.to_string(),
                    partition,
                    next_offset: offset,
                })
            }
        };
        async move { result }
    }

    fn produce(
        &self,
        message: ProduceMessage,
    ) -> impl Future<Output = AppResult<ProduceAck>> + Send {
        let result = self.broker.ensure_reachable().and_then(|_| {
            let partition = {
                let mut state = self.broker.state.lock();
                let partition_count = state.topics.get(&message.topic).map_or(0, Vec::len);
                if partition_count == 0 {
                    return Err(AppError::ProduceFailed {
                        topic: message.topic.clone(),
                        detail: "unknown topic".to_string(),
                    });
                }
                state.produce_counter += 1;
                (state.produce_counter % partition_count) as i32
            };
            let headers: Vec<(&str, &str)> = message
                .headers
                .iter()
                .map(|RecordHeader { key, value }| (key.as_str(), value.as_str()))
                .collect();
            let offset = self.broker.append(
                &message.topic,
                partition,
                message.key.as_deref(),
                &message.value,
                &headers,
            )?;
            Ok(ProduceAck { partition, offset })
        });
        async move { result }
    }
}

pub struct MemoryCursor {
    broker: MemoryBroker,
    topic: String,
    partition: i32,
    next_offset: i64,
}

impl MemoryCursor {
    /// `Ok(None)` when the partition has nothing to deliver right now.
    fn poll_record(&mut self) -> AppResult<(Option<RawRecord>, Option<Duration>)> {
        let state = self.broker.state.lock();
        let key = (self.topic.clone(), self.partition);
        if state.failing_reads.contains(&key) {
            return Err(AppError::PartitionFetchFailed {
                topic: self.topic.clone(),
                partition: self.partition,
                detail: "read failed".to_string(),
            });
        }
        let Some(partition) = state.partition(&self.topic, self.partition) else {
            return Ok((None, None));
        };
        // out of range positions snap to the earliest retained record
        let position = self.next_offset.max(partition.base_offset);
        let stalled = state.stalls.get(&key).is_some_and(|stall| position >= *stall);
        if stalled || position >= partition.high() {
            return Ok((None, None));
        }
        let record = partition.records[(position - partition.base_offset) as usize].clone();
        Ok((Some(record), state.read_delays.get(&key).copied()))
    }
}

impl PartitionCursor for MemoryCursor {
    fn next_record(&mut self) -> impl Future<Output = AppResult<RawRecord>> + Send + '_ {
        async move {
            let (record, delay) = self.poll_record()?;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            match record {
                Some(record) => {
                    self.next_offset = record.offset + 1;
                    Ok(record)
                }
                None => std::future::pending().await,
            }
        }
    }
}

impl Drop for MemoryCursor {
    fn drop(&mut self) {
        let mut state = self.broker.state.lock();
        state.open_cursors = state.open_cursors.saturating_sub(1);
        trace!("memory cursor on {}-{} released", self.topic, self.partition);
    }
}
