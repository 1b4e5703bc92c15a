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

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{AppError, AppResult};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityProtocol {
    #[default]
    Plaintext,
    Ssl,
    SaslPlaintext,
    SaslSsl,
}

impl SecurityProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityProtocol::Plaintext => "PLAINTEXT",
            SecurityProtocol::Ssl => "SSL",
            SecurityProtocol::SaslPlaintext => "SASL_PLAINTEXT",
            SecurityProtocol::SaslSsl => "SASL_SSL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum SaslMechanism {
    #[serde(rename = "PLAIN")]
    Plain,
    #[serde(rename = "GSSAPI")]
    Gssapi,
    #[serde(rename = "SCRAM-SHA-256")]
    ScramSha256,
    #[serde(rename = "SCRAM-SHA-512")]
    ScramSha512,
    #[serde(rename = "OAUTHBEARER")]
    OauthBearer,
}

impl SaslMechanism {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaslMechanism::Plain => "PLAIN",
            SaslMechanism::Gssapi => "GSSAPI",
            SaslMechanism::ScramSha256 => "SCRAM-SHA-256",
            SaslMechanism::ScramSha512 => "SCRAM-SHA-512",
            SaslMechanism::OauthBearer => "OAUTHBEARER",
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OffsetReset {
    #[default]
    Earliest,
    Latest,
}

impl OffsetReset {
    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
        }
    }
}

/// SASL settings. Fields left out of the config file stay `None` and are
/// never handed to the client library.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SaslCredentials {
    pub mechanism: SaslMechanism,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Everything needed to open a session against one cluster.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConnectionConfig {
    /// display name only
    #[serde(default)]
    pub connection_name: Option<String>,
    pub bootstrap_servers: String,
    /// Required by the client library. Offsets are never committed under it.
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub auto_offset_reset: OffsetReset,
    #[serde(default)]
    pub security_protocol: SecurityProtocol,
    #[serde(default)]
    pub sasl: Option<SaslCredentials>,
}

impl ConnectionConfig {
    pub fn new(bootstrap_servers: impl Into<String>) -> Self {
        ConnectionConfig {
            connection_name: None,
            bootstrap_servers: bootstrap_servers.into(),
            group_id: None,
            auto_offset_reset: OffsetReset::default(),
            security_protocol: SecurityProtocol::default(),
            sasl: None,
        }
    }

    /// The configured group id, or a throwaway one unique to this process.
    pub fn effective_group_id(&self) -> String {
        match self.group_id.as_deref().map(str::trim) {
            Some(group_id) if !group_id.is_empty() => group_id.to_string(),
            _ => format!("kafka-trail-{}", uuid::Uuid::new_v4()),
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.bootstrap_servers.trim().is_empty() {
            return Err(AppError::InvalidValue(
                "bootstrap_servers",
                self.bootstrap_servers.clone(),
            ));
        }
        let needs_sasl = matches!(
            self.security_protocol,
            SecurityProtocol::SaslPlaintext | SecurityProtocol::SaslSsl
        );
        if needs_sasl && self.sasl.is_none() {
            return Err(AppError::InvalidValue(
                "sasl",
                format!(
                    "security protocol {} requires sasl credentials",
                    self.security_protocol.as_str()
                ),
            ));
        }
        Ok(())
    }
}

fn default_message_timeout_ms() -> u64 {
    5000
}
fn default_metadata_timeout_ms() -> u64 {
    5000
}
fn default_max_in_flight_partitions() -> usize {
    num_cpus::get()
}
fn default_produce_timeout_ms() -> u64 {
    5000
}
fn default_produce_retries() -> u32 {
    3
}

/// Timeouts and limits applied to every operation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FetchSettings {
    /// upper bound on waiting for any single record
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u64,
    /// upper bound on a metadata or watermark round trip
    #[serde(default = "default_metadata_timeout_ms")]
    pub metadata_timeout_ms: u64,
    #[serde(default = "default_max_in_flight_partitions")]
    pub max_in_flight_partitions: usize,
    #[serde(default = "default_produce_timeout_ms")]
    pub produce_timeout_ms: u64,
    #[serde(default = "default_produce_retries")]
    pub produce_retries: u32,
}

impl Default for FetchSettings {
    fn default() -> Self {
        FetchSettings {
            message_timeout_ms: default_message_timeout_ms(),
            metadata_timeout_ms: default_metadata_timeout_ms(),
            max_in_flight_partitions: default_max_in_flight_partitions(),
            produce_timeout_ms: default_produce_timeout_ms(),
            produce_retries: default_produce_retries(),
        }
    }
}

impl FetchSettings {
    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms)
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_millis(self.metadata_timeout_ms)
    }

    pub fn produce_timeout(&self) -> Duration {
        Duration::from_millis(self.produce_timeout_ms)
    }

    /// never zero, so the fetch fan-out always makes progress
    pub fn fetch_parallelism(&self) -> usize {
        self.max_in_flight_partitions.max(1)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub fetch: FetchSettings,
}

impl AppConfig {
    pub fn set_up_config<P: AsRef<Path>>(path: P) -> AppResult<AppConfig> {
        let path_str = path
            .as_ref()
            .to_str()
            .ok_or(AppError::InvalidValue(
                "config file path",
                path.as_ref().to_string_lossy().to_string(),
            ))?;
        let config = config::Config::builder()
            .add_source(config::File::with_name(path_str))
            .build()?;

        let app_config: AppConfig = config.try_deserialize()?;
        app_config.connection.validate()?;

        Ok(app_config)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use tempfile::Builder;

    fn write_conf(content: &str) -> tempfile::NamedTempFile {
        let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_full_config() -> AppResult<()> {
        let file = write_conf(
            r#"
[connection]
connection_name = "staging"
bootstrap_servers = "kafka-1:9092,kafka-2:9092"
group_id = "trail-browser"
auto_offset_reset = "latest"
security_protocol = "SASL_SSL"

[connection.sasl]
mechanism = "SCRAM-SHA-512"
username = "alice"
password = "secret"

[fetch]
message_timeout_ms = 1500
max_in_flight_partitions = 8
"#,
        );

        let config = AppConfig::set_up_config(file.path())?;
        assert_eq!(config.connection.connection_name.as_deref(), Some("staging"));
        assert_eq!(config.connection.auto_offset_reset, OffsetReset::Latest);
        assert_eq!(config.connection.security_protocol, SecurityProtocol::SaslSsl);
        let sasl = config.connection.sasl.unwrap();
        assert_eq!(sasl.mechanism, SaslMechanism::ScramSha512);
        assert_eq!(sasl.username.as_deref(), Some("alice"));
        assert_eq!(config.fetch.message_timeout(), Duration::from_millis(1500));
        assert_eq!(config.fetch.max_in_flight_partitions, 8);
        // omitted fields fall back to defaults
        assert_eq!(config.fetch.metadata_timeout_ms, 5000);
        assert_eq!(config.fetch.produce_retries, 3);
        Ok(())
    }

    #[test]
    fn test_fetch_section_optional() -> AppResult<()> {
        let file = write_conf(
            r#"
[connection]
bootstrap_servers = "localhost:9092"
"#,
        );

        let config = AppConfig::set_up_config(file.path())?;
        assert_eq!(config.connection.security_protocol, SecurityProtocol::Plaintext);
        assert!(config.connection.sasl.is_none());
        assert!(config.connection.group_id.is_none());
        assert!(config.fetch.fetch_parallelism() >= 1);
        Ok(())
    }

    #[test]
    fn test_sasl_protocol_requires_credentials() {
        let file = write_conf(
            r#"
[connection]
bootstrap_servers = "localhost:9092"
security_protocol = "SASL_PLAINTEXT"
"#,
        );

        let result = AppConfig::set_up_config(file.path());
        assert!(matches!(result, Err(AppError::InvalidValue("sasl", _))));
    }

    #[test]
    fn test_missing_config_file() {
        let result = AppConfig::set_up_config("/nonexistent/kafka-trail/conf.toml");
        assert!(matches!(result, Err(AppError::ConfigFileError(_))));
    }

    #[test]
    fn test_effective_group_id() {
        let mut config = ConnectionConfig::new("localhost:9092");
        assert!(config.effective_group_id().starts_with("kafka-trail-"));

        config.group_id = Some("   ".to_string());
        assert!(config.effective_group_id().starts_with("kafka-trail-"));

        config.group_id = Some("browser".to_string());
        assert_eq!(config.effective_group_id(), "browser");
    }

    #[test]
    fn test_zero_parallelism_is_raised() {
        let settings = FetchSettings {
            max_in_flight_partitions: 0,
            ..FetchSettings::default()
        };
        assert_eq!(settings.fetch_parallelism(), 1);
    }
}
