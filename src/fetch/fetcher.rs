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

use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::broker::{BrokerSession, PartitionCursor};
use crate::message::{ReadPlan, Record};
use crate::{AppError, AppResult};

/// Caps the up-front allocation; a plan may ask for far more than arrives.
const MAX_PREALLOCATED_RECORDS: i64 = 4096;

/// Reads up to `plan.read_count` records from one partition.
///
/// Each record is awaited for at most `message_timeout`. When that elapses
/// the partition is considered drained for now and whatever was read so far
/// is returned. Hard read errors and cancellation are returned as errors. The
/// cursor is dropped, and so released, on every path out of this function.
pub async fn fetch_partition<S: BrokerSession>(
    session: &S,
    topic: &str,
    plan: ReadPlan,
    message_timeout: Duration,
    cancel: &CancellationToken,
) -> AppResult<Vec<Record>> {
    if plan.read_count <= 0 {
        return Ok(Vec::new());
    }

    let mut cursor = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(AppError::Cancelled),
        cursor = session.open_cursor(topic, plan.partition, plan.start_offset) => cursor?,
    };
    trace!("fetching {}-{} {}", topic, plan.partition, plan);

    let mut records = Vec::with_capacity(plan.read_count.min(MAX_PREALLOCATED_RECORDS) as usize);
    while (records.len() as i64) < plan.read_count {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            next = time::timeout(message_timeout, cursor.next_record()) => next,
        };
        match next {
            Ok(raw) => records.push(Record::from(raw?)),
            Err(_elapsed) => {
                warn!(
                    "{}-{}: no record within {:?}, returning {} of {} planned",
                    topic,
                    plan.partition,
                    message_timeout,
                    records.len(),
                    plan.read_count
                );
                break;
            }
        }
    }

    Ok(records)
}
