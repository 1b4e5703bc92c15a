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

use std::path::PathBuf;
use std::process::ExitCode;

use bytes::Bytes;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use kafka_trail::{
    setup_local_tracing, setup_tracing, AppConfig, AppError, AppResult, ConnectionConfig,
    Direction, ErrorReport, FetchRequest, FetchSettings, PartitionOverride, ProduceMessage,
    Record, RecordHeader, TopicWindow, TrailService,
};
use serde::Serialize;
use tokio::{runtime, signal};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Parser)]
#[command(version, about = "Browse Kafka topics without committing offsets")]
pub struct CommandLine {
    /// path to config file
    #[arg(short, long)]
    pub conf: Option<String>,
    /// bootstrap servers, overrides the config file
    #[arg(short, long)]
    pub bootstrap: Option<String>,
    /// also write logs to an hourly rolling file in this directory
    #[arg(long)]
    pub log_dir: Option<String>,
    /// log level (v: info, vv: debug, vvv: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Check that the cluster is reachable
    Validate,
    /// List topic names
    Topics,
    /// Show low/high watermarks of every partition
    Window { topic: String },
    /// Read a window of messages
    Fetch {
        topic: String,
        #[arg(short = 'n', long, default_value_t = 100)]
        count: i64,
        /// newest messages first
        #[arg(long)]
        latest: bool,
        /// continue a previous fetch on this partition
        #[arg(long, requires_all = ["offset", "high"])]
        partition: Option<i32>,
        #[arg(long, requires = "partition")]
        offset: Option<i64>,
        /// high watermark captured by the previous fetch
        #[arg(long, requires = "partition")]
        high: Option<i64>,
    },
    /// Send one message
    Produce {
        topic: String,
        value: String,
        #[arg(short, long)]
        key: Option<String>,
        /// repeatable, `name=value`
        #[arg(long = "header", value_parser = parse_header)]
        headers: Vec<RecordHeader>,
    },
    PrintConfig,
}

fn parse_header(raw: &str) -> Result<RecordHeader, String> {
    raw.split_once('=')
        .map(|(key, value)| RecordHeader::new(key, value))
        .ok_or_else(|| format!("expected name=value, got {raw}"))
}

/// Record as printed: bytes rendered as lossy utf-8.
#[derive(Serialize)]
struct RecordView<'a> {
    partition: i32,
    offset: i64,
    timestamp: i64,
    key: String,
    value: String,
    headers: &'a [RecordHeader],
    key_size: i64,
    value_size: i64,
}

impl<'a> From<&'a Record> for RecordView<'a> {
    fn from(record: &'a Record) -> Self {
        RecordView {
            partition: record.partition,
            offset: record.offset,
            timestamp: record.timestamp,
            key: String::from_utf8_lossy(&record.key).into_owned(),
            value: String::from_utf8_lossy(&record.value).into_owned(),
            headers: &record.headers,
            key_size: record.key_size,
            value_size: record.value_size,
        }
    }
}

#[derive(Serialize)]
struct FetchView<'a> {
    metadata: &'a TopicWindow,
    messages: Vec<RecordView<'a>>,
}

fn main() -> ExitCode {
    dotenv().ok();
    let commandline = CommandLine::parse();

    if std::env::var_os("RUST_LOG").is_none() {
        let level = match commandline.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        std::env::set_var("RUST_LOG", format!("kafka_trail={level}"));
    }
    let _log_guard = match &commandline.log_dir {
        Some(dir) => Some(setup_tracing(dir)),
        None => {
            setup_local_tracing();
            None
        }
    };

    match run(commandline) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let report = ErrorReport::from(&e);
            match serde_json::to_string(&report) {
                Ok(json) => eprintln!("{json}"),
                Err(_) => eprintln!("{e}"),
            }
            ExitCode::FAILURE
        }
    }
}

fn run(commandline: CommandLine) -> AppResult<()> {
    let app_config = load_config(&commandline)?;
    let rt = runtime::Builder::new_multi_thread().enable_all().build()?;
    let service = TrailService::kafka(app_config.fetch.clone());
    let connection = &app_config.connection;

    rt.block_on(async {
        match commandline.command {
            Command::Validate => {
                service.validate_connection(connection).await?;
                print_json(&serde_json::json!({ "ok": true }))
            }
            Command::Topics => print_json(&service.list_topics(connection).await?),
            Command::Window { topic } => {
                print_json(&service.get_topic_window(connection, &topic).await?)
            }
            Command::Fetch {
                topic,
                count,
                latest,
                partition,
                offset,
                high,
            } => {
                let direction = if latest {
                    Direction::Latest
                } else {
                    Direction::Oldest
                };
                let mut request = FetchRequest::new(topic, count, direction);
                if let (Some(partition), Some(offset), Some(high_at_capture)) =
                    (partition, offset, high)
                {
                    request = request.with_override(PartitionOverride {
                        partition,
                        offset,
                        high_at_capture,
                    });
                }

                let cancel = CancellationToken::new();
                let on_interrupt = cancel.clone();
                tokio::spawn(async move {
                    if signal::ctrl_c().await.is_ok() {
                        warn!("interrupted, cancelling fetch");
                        on_interrupt.cancel();
                    }
                });

                let result = service.fetch(connection, &request, &cancel).await?;
                print_json(&FetchView {
                    metadata: &result.metadata,
                    messages: result.messages.iter().map(RecordView::from).collect(),
                })
            }
            Command::Produce {
                topic,
                value,
                key,
                headers,
            } => {
                let message = ProduceMessage {
                    topic,
                    key: key.map(Bytes::from),
                    value: Bytes::from(value),
                    headers,
                };
                print_json(&service.produce(connection, message).await?)
            }
            Command::PrintConfig => print_json(&masked(&app_config)),
        }
    })
}

/// The config file is optional when `--bootstrap` is given.
fn load_config(commandline: &CommandLine) -> AppResult<AppConfig> {
    let config_path = commandline
        .conf
        .as_ref()
        .map_or_else(|| PathBuf::from("./conf.toml"), PathBuf::from);

    let mut app_config = match (&commandline.bootstrap, config_path.exists()) {
        (Some(bootstrap), false) => AppConfig {
            connection: ConnectionConfig::new(bootstrap.as_str()),
            fetch: FetchSettings::default(),
        },
        _ => AppConfig::set_up_config(&config_path)?,
    };
    if let Some(bootstrap) = &commandline.bootstrap {
        app_config.connection.bootstrap_servers = bootstrap.clone();
    }
    app_config.connection.validate()?;
    debug!("using config {:?}", config_path);
    Ok(app_config)
}

fn masked(app_config: &AppConfig) -> AppConfig {
    let mut app_config = app_config.clone();
    if let Some(sasl) = app_config.connection.sasl.as_mut() {
        if sasl.password.is_some() {
            sasl.password = Some("******".to_string());
        }
    }
    app_config
}

fn print_json<T: Serialize>(value: &T) -> AppResult<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| AppError::IllegalState(format!("cannot render output: {e}")))?;
    println!("{json}");
    Ok(())
}
