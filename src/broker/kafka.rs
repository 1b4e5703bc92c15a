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

//! librdkafka-backed sessions.
//!
//! Metadata and watermark queries are blocking calls in librdkafka, so they
//! run on the blocking pool. Every cursor is its own `StreamConsumer` with a
//! manual assignment: nothing subscribes, nothing commits.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer, StreamConsumer};
use rdkafka::error::{KafkaResult, RDKafkaErrorCode};
use rdkafka::message::{Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{Offset, TopicPartitionList};
use tracing::{debug, trace};

use super::{BrokerSession, Connector, PartitionCursor};
use crate::message::{ProduceAck, ProduceMessage, RawRecord};
use crate::service::{AppError, AppResult, ConnectionConfig, FetchSettings};

/// Opens sessions against a real cluster.
#[derive(Debug, Clone, Copy, Default)]
pub struct KafkaConnector;

impl Connector for KafkaConnector {
    type Session = KafkaSession;

    fn connect(
        &self,
        config: &ConnectionConfig,
        settings: &FetchSettings,
    ) -> AppResult<KafkaSession> {
        config.validate()?;
        let consumer_config = consumer_config(config);
        let consumer: BaseConsumer = consumer_config
            .create()
            .map_err(|err| AppError::ConnectionFailed(err.to_string()))?;
        debug!(
            "session opened against {} ({})",
            config.bootstrap_servers,
            config.connection_name.as_deref().unwrap_or("unnamed")
        );

        Ok(KafkaSession {
            consumer: Arc::new(consumer),
            consumer_config,
            producer_config: producer_config(config, settings),
            settings: settings.clone(),
        })
    }
}

/// Parameters shared by consumers and producers. Absent SASL fields are
/// simply not set.
fn client_config(config: &ConnectionConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.bootstrap_servers)
        .set("security.protocol", config.security_protocol.as_str());

    if let Some(sasl) = &config.sasl {
        client_config.set("sasl.mechanism", sasl.mechanism.as_str());
        if let Some(username) = &sasl.username {
            client_config.set("sasl.username", username);
        }
        if let Some(password) = &sasl.password {
            client_config.set("sasl.password", password);
        }
    }
    client_config
}

fn consumer_config(config: &ConnectionConfig) -> ClientConfig {
    let mut consumer_config = client_config(config);
    consumer_config
        .set("group.id", config.effective_group_id())
        .set("auto.offset.reset", config.auto_offset_reset.as_str())
        .set("enable.auto.commit", "false")
        .set("enable.auto.offset.store", "false")
        .set("enable.partition.eof", "false");
    consumer_config
}

fn producer_config(config: &ConnectionConfig, settings: &FetchSettings) -> ClientConfig {
    let mut producer_config = client_config(config);
    producer_config
        .set("acks", "all")
        .set("message.send.max.retries", settings.produce_retries.to_string())
        .set("message.timeout.ms", settings.produce_timeout_ms.to_string());
    producer_config
}

/// Runs a blocking librdkafka call off the async workers.
async fn run_blocking<T, F>(call: F) -> Result<T, String>
where
    F: FnOnce() -> KafkaResult<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(err.to_string()),
        Err(join_err) => Err(format!("blocking client call failed: {join_err}")),
    }
}

pub struct KafkaSession {
    consumer: Arc<BaseConsumer>,
    consumer_config: ClientConfig,
    producer_config: ClientConfig,
    settings: FetchSettings,
}

impl BrokerSession for KafkaSession {
    type Cursor = KafkaCursor;

    fn probe(&self) -> impl Future<Output = AppResult<()>> + Send {
        let consumer = self.consumer.clone();
        let timeout = self.settings.metadata_timeout();
        async move {
            run_blocking(move || consumer.fetch_metadata(None, timeout).map(|_| ()))
                .await
                .map_err(AppError::ConnectionFailed)
        }
    }

    fn list_topics(&self) -> impl Future<Output = AppResult<Vec<String>>> + Send {
        let consumer = self.consumer.clone();
        let timeout = self.settings.metadata_timeout();
        async move {
            run_blocking(move || {
                consumer.fetch_metadata(None, timeout).map(|metadata| {
                    metadata
                        .topics()
                        .iter()
                        .map(|topic| topic.name().to_string())
                        .collect::<Vec<_>>()
                })
            })
            .await
            .map_err(AppError::ConnectionFailed)
        }
    }

    fn partition_ids(&self, topic: &str) -> impl Future<Output = AppResult<Vec<i32>>> + Send {
        let consumer = self.consumer.clone();
        let timeout = self.settings.metadata_timeout();
        let topic = topic.to_string();
        async move {
            let query_topic = topic.clone();
            let lookup = run_blocking(move || {
                consumer
                    .fetch_metadata(Some(query_topic.as_str()), timeout)
                    .map(|metadata| {
                        let Some(found) = metadata
                            .topics()
                            .iter()
                            .find(|t| t.name() == query_topic)
                        else {
                            return Err("topic not present in metadata".to_string());
                        };
                        if let Some(err) = found.error() {
                            return Err(RDKafkaErrorCode::from(err).to_string());
                        }
                        let mut ids: Vec<i32> = found.partitions().iter().map(|p| p.id()).collect();
                        ids.sort_unstable();
                        Ok(ids)
                    })
            })
            .await;

            match lookup {
                Ok(Ok(ids)) => Ok(ids),
                Ok(Err(detail)) | Err(detail) => Err(AppError::MetadataUnavailable { topic, detail }),
            }
        }
    }

    fn watermarks(
        &self,
        topic: &str,
        partition: i32,
    ) -> impl Future<Output = AppResult<(i64, i64)>> + Send {
        let consumer = self.consumer.clone();
        let timeout = self.settings.metadata_timeout();
        let topic = topic.to_string();
        async move {
            let query_topic = topic.clone();
            run_blocking(move || consumer.fetch_watermarks(&query_topic, partition, timeout))
                .await
                .map_err(|detail| AppError::WatermarkQueryFailed {
                    topic,
                    partition,
                    detail,
                })
        }
    }

    fn open_cursor(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
    ) -> impl Future<Output = AppResult<KafkaCursor>> + Send {
        let fetch_error = |detail: String| AppError::PartitionFetchFailed {
            topic: topic.to_string(),
            partition,
            detail,
        };
        let cursor = self
            .consumer_config
            .create::<StreamConsumer>()
            .and_then(|consumer| {
                let mut assignment = TopicPartitionList::new();
                assignment.add_partition_offset(topic, partition, Offset::Offset(offset))?;
                consumer.assign(&assignment)?;
                Ok(consumer)
            })
            .map(|consumer| {
                trace!("cursor opened on {}-{} at {}", topic, partition, offset);
                KafkaCursor {
                    consumer,
                    topic: topic.to_string(),
                    partition,
                }
            })
            .map_err(|err| fetch_error(err.to_string()));
        async move { cursor }
    }

    fn produce(
        &self,
        message: ProduceMessage,
    ) -> impl Future<Output = AppResult<ProduceAck>> + Send {
        let producer_config = self.producer_config.clone();
        let queue_timeout = self.settings.produce_timeout();
        async move {
            let produce_error = |detail: String| AppError::ProduceFailed {
                topic: message.topic.clone(),
                detail,
            };
            let producer: FutureProducer = producer_config
                .create()
                .map_err(|err| produce_error(err.to_string()))?;

            let mut headers = OwnedHeaders::new_with_capacity(message.headers.len());
            for header in &message.headers {
                headers = headers.insert(Header {
                    key: &header.key,
                    value: Some(header.value.as_bytes()),
                });
            }

            let mut record: FutureRecord<'_, [u8], [u8]> = FutureRecord::to(&message.topic)
                .payload(&message.value[..])
                .headers(headers);
            if let Some(key) = message.key.as_deref() {
                record = record.key(key);
            }

            let (partition, offset) = producer
                .send(record, queue_timeout)
                .await
                .map_err(|(err, _)| produce_error(err.to_string()))?;
            debug!(
                "produced to {}-{} at offset {}",
                message.topic, partition, offset
            );
            Ok(ProduceAck { partition, offset })
        }
    }
}

pub struct KafkaCursor {
    consumer: StreamConsumer,
    topic: String,
    partition: i32,
}

impl PartitionCursor for KafkaCursor {
    fn next_record(&mut self) -> impl Future<Output = AppResult<RawRecord>> + Send + '_ {
        async move {
            let message = self
                .consumer
                .recv()
                .await
                .map_err(|err| AppError::PartitionFetchFailed {
                    topic: self.topic.clone(),
                    partition: self.partition,
                    detail: err.to_string(),
                })?;
            Ok(raw_record(&message))
        }
    }
}

impl Drop for KafkaCursor {
    fn drop(&mut self) {
        if let Err(err) = self.consumer.unassign() {
            debug!("unassign {}-{} failed: {}", self.topic, self.partition, err);
        }
        trace!("cursor on {}-{} released", self.topic, self.partition);
    }
}

fn raw_record<M: Message>(message: &M) -> RawRecord {
    let headers = message
        .headers()
        .map(|headers| {
            headers
                .iter()
                .map(|header| (header.key.to_string(), header.value.map(Bytes::copy_from_slice)))
                .collect()
        })
        .unwrap_or_default();

    RawRecord {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(Bytes::copy_from_slice),
        payload: message.payload().map(Bytes::copy_from_slice),
        timestamp_ms: message.timestamp().to_millis(),
        headers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{SaslCredentials, SaslMechanism, SecurityProtocol};
    use rdkafka::message::{OwnedMessage, Timestamp};

    #[test]
    fn test_absent_sasl_fields_are_not_set() {
        let config = ConnectionConfig::new("localhost:9092");
        let client_config = consumer_config(&config);

        assert_eq!(client_config.get("bootstrap.servers"), Some("localhost:9092"));
        assert_eq!(client_config.get("security.protocol"), Some("PLAINTEXT"));
        assert_eq!(client_config.get("enable.auto.commit"), Some("false"));
        assert_eq!(client_config.get("enable.auto.offset.store"), Some("false"));
        assert!(client_config.get("sasl.mechanism").is_none());
        assert!(client_config.get("sasl.username").is_none());
        assert!(client_config.get("sasl.password").is_none());
    }

    #[test]
    fn test_partial_sasl_credentials() {
        let mut config = ConnectionConfig::new("broker:9093");
        config.security_protocol = SecurityProtocol::SaslSsl;
        config.group_id = Some("viewer".to_string());
        config.sasl = Some(SaslCredentials {
            mechanism: SaslMechanism::ScramSha256,
            username: Some("alice".to_string()),
            password: None,
        });

        let client_config = consumer_config(&config);
        assert_eq!(client_config.get("security.protocol"), Some("SASL_SSL"));
        assert_eq!(client_config.get("sasl.mechanism"), Some("SCRAM-SHA-256"));
        assert_eq!(client_config.get("sasl.username"), Some("alice"));
        assert!(client_config.get("sasl.password").is_none());
        assert_eq!(client_config.get("group.id"), Some("viewer"));
    }

    #[test]
    fn test_producer_waits_for_all_replicas() {
        let settings = FetchSettings {
            produce_retries: 2,
            ..FetchSettings::default()
        };
        let client_config = producer_config(&ConnectionConfig::new("localhost:9092"), &settings);
        assert_eq!(client_config.get("acks"), Some("all"));
        assert_eq!(client_config.get("message.send.max.retries"), Some("2"));
        assert!(client_config.get("group.id").is_none());
    }

    #[test]
    fn test_raw_record_from_message() {
        let headers = OwnedHeaders::new()
            .insert(Header {
                key: "source",
                value: Some("billing"),
            })
            .insert(Header {
                key: "source",
                value: Some("audit"),
            });
        let message = OwnedMessage::new(
            Some(b"value".to_vec()),
            Some(b"key".to_vec()),
            "payments".to_string(),
            Timestamp::CreateTime(1_700_000_000_500),
            4,
            77,
            Some(headers),
        );

        let raw = raw_record(&message);
        assert_eq!(raw.topic, "payments");
        assert_eq!(raw.partition, 4);
        assert_eq!(raw.offset, 77);
        assert_eq!(raw.key.as_deref(), Some(&b"key"[..]));
        assert_eq!(raw.timestamp_ms, Some(1_700_000_000_500));
        assert_eq!(
            raw.headers,
            vec![
                ("source".to_string(), Some(Bytes::from_static(b"billing"))),
                ("source".to_string(), Some(Bytes::from_static(b"audit"))),
            ]
        );
    }
}
