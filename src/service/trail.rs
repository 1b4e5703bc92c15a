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

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::broker::{BrokerSession, Connector, KafkaConnector};
use crate::fetch::FetchOrchestrator;
use crate::message::{FetchRequest, FetchResult, ProduceAck, ProduceMessage, TopicWindow};
use crate::service::{ConnectionConfig, FetchSettings};
use crate::window::collect_topic_window;
use crate::{AppError, AppResult};

/// Entry point for callers.
///
/// Every operation opens its own broker session from the given connection
/// config and drops it before returning, on success and on every error path.
/// Nothing is shared between calls, so one `TrailService` can serve
/// concurrent callers.
#[derive(Debug, Clone)]
pub struct TrailService<C: Connector> {
    connector: C,
    settings: FetchSettings,
}

impl TrailService<KafkaConnector> {
    pub fn kafka(settings: FetchSettings) -> Self {
        TrailService::new(KafkaConnector, settings)
    }
}

impl<C: Connector> TrailService<C> {
    pub fn new(connector: C, settings: FetchSettings) -> Self {
        TrailService {
            connector,
            settings,
        }
    }

    /// Connectivity probe: opens a session, does one metadata round trip and
    /// closes it again.
    pub async fn validate_connection(&self, config: &ConnectionConfig) -> AppResult<()> {
        let session = self.open(config)?;
        session.probe().await?;
        info!("connection to {} is valid", config.bootstrap_servers);
        Ok(())
    }

    /// Topic names, sorted.
    pub async fn list_topics(&self, config: &ConnectionConfig) -> AppResult<Vec<String>> {
        let session = self.open(config)?;
        let mut topics = session.list_topics().await?;
        topics.sort();
        debug!("{} lists {} topics", config.bootstrap_servers, topics.len());
        Ok(topics)
    }

    pub async fn get_topic_window(
        &self,
        config: &ConnectionConfig,
        topic: &str,
    ) -> AppResult<TopicWindow> {
        if topic.is_empty() {
            return Err(AppError::InvalidRequest("topic must not be empty".to_string()));
        }
        let session = self.open(config)?;
        collect_topic_window(&session, topic).await
    }

    pub async fn fetch(
        &self,
        config: &ConnectionConfig,
        request: &FetchRequest,
        cancel: &CancellationToken,
    ) -> AppResult<FetchResult> {
        let session = Arc::new(self.open(config)?);
        FetchOrchestrator::new(session, self.settings.clone())
            .fetch(request, cancel)
            .await
    }

    /// Sends one record and waits for it to be acknowledged by all in-sync
    /// replicas.
    pub async fn produce(
        &self,
        config: &ConnectionConfig,
        message: ProduceMessage,
    ) -> AppResult<ProduceAck> {
        if message.topic.is_empty() {
            return Err(AppError::InvalidRequest("topic must not be empty".to_string()));
        }
        let session = self.open(config)?;
        let topic = message.topic.clone();
        let ack = session.produce(message).await?;
        info!(
            "produced to {}-{} at offset {}",
            topic, ack.partition, ack.offset
        );
        Ok(ack)
    }

    fn open(&self, config: &ConnectionConfig) -> AppResult<C::Session> {
        config.validate()?;
        self.connector.connect(config, &self.settings)
    }
}
