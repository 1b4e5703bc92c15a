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

use std::fmt::{Display, Formatter};

use serde::Serialize;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// broker errors
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("metadata unavailable for topic {topic}: {detail}")]
    MetadataUnavailable { topic: String, detail: String },

    #[error("watermark query failed for {topic}-{partition}: {detail}")]
    WatermarkQueryFailed {
        topic: String,
        partition: i32,
        detail: String,
    },

    #[error("fetch failed for {topic}-{partition}: {detail}")]
    PartitionFetchFailed {
        topic: String,
        partition: i32,
        detail: String,
    },

    #[error("produce to {topic} failed: {detail}")]
    ProduceFailed { topic: String, detail: String },

    #[error("operation cancelled")]
    Cancelled,

    /// general errors
    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("config file error: {0}")]
    ConfigFileError(#[from] config::ConfigError),
}

/// Error category surfaced to callers alongside the display message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ConnectionFailed,
    MetadataUnavailable,
    WatermarkQueryFailed,
    PartitionFetchFailed,
    ProduceFailed,
    Cancelled,
    InvalidRequest,
    Internal,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::ConnectionFailed => "connection_failed",
            ErrorKind::MetadataUnavailable => "metadata_unavailable",
            ErrorKind::WatermarkQueryFailed => "watermark_query_failed",
            ErrorKind::PartitionFetchFailed => "partition_fetch_failed",
            ErrorKind::ProduceFailed => "produce_failed",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::ConnectionFailed(_) => ErrorKind::ConnectionFailed,
            AppError::MetadataUnavailable { .. } => ErrorKind::MetadataUnavailable,
            AppError::WatermarkQueryFailed { .. } => ErrorKind::WatermarkQueryFailed,
            AppError::PartitionFetchFailed { .. } => ErrorKind::PartitionFetchFailed,
            AppError::ProduceFailed { .. } => ErrorKind::ProduceFailed,
            AppError::Cancelled => ErrorKind::Cancelled,
            AppError::InvalidRequest(_) | AppError::InvalidValue(..) => ErrorKind::InvalidRequest,
            AppError::IllegalState(_) | AppError::IoError(_) | AppError::ConfigFileError(_) => {
                ErrorKind::Internal
            }
        }
    }
}

/// Serializable `kind + detail` pair handed to the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub detail: String,
}

impl From<&AppError> for ErrorReport {
    fn from(value: &AppError) -> Self {
        ErrorReport {
            kind: value.kind(),
            detail: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_mapping() {
        let err = AppError::WatermarkQueryFailed {
            topic: "orders".to_string(),
            partition: 3,
            detail: "timed out".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::WatermarkQueryFailed);
        assert_eq!(
            err.to_string(),
            "watermark query failed for orders-3: timed out"
        );

        let report = ErrorReport::from(&AppError::InvalidValue("count", "-1".to_string()));
        assert_eq!(report.kind, ErrorKind::InvalidRequest);
        assert_eq!(report.detail, "invalid value for count: -1");
    }

    #[test]
    fn test_error_kind_display() {
        assert_eq!(ErrorKind::PartitionFetchFailed.to_string(), "partition_fetch_failed");
        assert_eq!(AppError::Cancelled.kind().to_string(), "cancelled");
    }
}
