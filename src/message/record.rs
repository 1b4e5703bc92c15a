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

use bytes::Bytes;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RecordHeader {
    pub key: String,
    pub value: String,
}

impl RecordHeader {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        RecordHeader {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A record as handed over by a partition cursor, before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Bytes>,
    pub payload: Option<Bytes>,
    /// create or log-append time in milliseconds, if the broker supplied one
    pub timestamp_ms: Option<i64>,
    /// in wire order, duplicates kept
    pub headers: Vec<(String, Option<Bytes>)>,
}

/// Canonical, immutable view of one fetched record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Bytes,
    pub value: Bytes,
    /// unix seconds
    pub timestamp: i64,
    pub headers: Vec<RecordHeader>,
    pub value_size: i64,
    pub key_size: i64,
}

impl From<RawRecord> for Record {
    fn from(raw: RawRecord) -> Self {
        let key = raw.key.unwrap_or_default();
        let value = raw.payload.unwrap_or_default();
        let headers = raw
            .headers
            .into_iter()
            .map(|(key, value)| RecordHeader {
                key,
                value: value
                    .map(|v| String::from_utf8_lossy(&v).into_owned())
                    .unwrap_or_default(),
            })
            .collect();

        Record {
            topic: raw.topic,
            partition: raw.partition,
            offset: raw.offset,
            key_size: key.len() as i64,
            value_size: value.len() as i64,
            key,
            value,
            timestamp: raw.timestamp_ms.map(|ms| ms.div_euclid(1000)).unwrap_or(0),
            headers,
        }
    }
}

/// One message to publish.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProduceMessage {
    pub topic: String,
    #[serde(default)]
    pub key: Option<Bytes>,
    pub value: Bytes,
    #[serde(default)]
    pub headers: Vec<RecordHeader>,
}

/// Where the broker stored a produced message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProduceAck {
    pub partition: i32,
    pub offset: i64,
}
