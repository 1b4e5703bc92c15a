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

//! Boundary between the windowing engine and a concrete broker client.
//!
//! A [`Connector`] opens a [`BrokerSession`] per operation; the session is
//! released when it is dropped, so every early return releases it too.
//! Cursors opened from a session follow the same rule.

pub use kafka::KafkaConnector;
pub use memory::MemoryBroker;

mod kafka;
pub mod memory;

use std::future::Future;

use crate::message::{ProduceAck, ProduceMessage, RawRecord};
use crate::service::{AppResult, ConnectionConfig, FetchSettings};

pub trait Connector: Send + Sync {
    type Session: BrokerSession + 'static;

    fn connect(
        &self,
        config: &ConnectionConfig,
        settings: &FetchSettings,
    ) -> AppResult<Self::Session>;
}

pub trait BrokerSession: Send + Sync {
    type Cursor: PartitionCursor + 'static;

    /// One metadata round trip, proving the cluster is reachable.
    fn probe(&self) -> impl Future<Output = AppResult<()>> + Send;

    fn list_topics(&self) -> impl Future<Output = AppResult<Vec<String>>> + Send;

    /// Partition ids of `topic`, ascending.
    fn partition_ids(&self, topic: &str) -> impl Future<Output = AppResult<Vec<i32>>> + Send;

    /// `(low, high)` watermarks of one partition.
    fn watermarks(
        &self,
        topic: &str,
        partition: i32,
    ) -> impl Future<Output = AppResult<(i64, i64)>> + Send;

    /// Positions a non-committing cursor at `offset`.
    fn open_cursor(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
    ) -> impl Future<Output = AppResult<Self::Cursor>> + Send;

    fn produce(
        &self,
        message: ProduceMessage,
    ) -> impl Future<Output = AppResult<ProduceAck>> + Send;
}

pub trait PartitionCursor: Send {
    /// Next record at or after the cursor position. Stays pending while the
    /// partition has nothing more to deliver; callers bound the wait.
    fn next_record(&mut self) -> impl Future<Output = AppResult<RawRecord>> + Send + '_;
}
