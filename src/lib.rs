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

//! Windowed, non-committing reads over Kafka topics.
//!
//! A fetch captures the low/high watermarks of every partition, splits the
//! requested message count across partitions, reads each partition's slice
//! concurrently and merges the results in ascending partition order
//! (reversed for [`Direction::Latest`]). Reads never commit offsets.

pub mod broker;
pub mod fetch;
pub mod message;
pub mod service;
pub mod window;

pub use broker::{Connector, KafkaConnector, MemoryBroker};
pub use message::{
    Direction, FetchRequest, FetchResult, PartitionOverride, PartitionWindow, ProduceAck,
    ProduceMessage, Record, RecordHeader, TopicWindow,
};
pub use service::{
    setup_local_tracing, setup_tracing, AppConfig, AppError, AppResult, ConnectionConfig,
    ErrorKind, ErrorReport, FetchSettings, TrailService,
};
