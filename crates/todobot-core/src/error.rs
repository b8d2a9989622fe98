// SPDX-FileCopyrightText: 2026 Todobot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for todobot.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

use crate::types::BatchState;

/// Which collaborator call of the delivery pipeline produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Extraction,
    Delivery,
}

/// The primary error type used across todobot crates.
#[derive(Debug, Error)]
pub enum TodobotError {
    /// Invalid configuration or policy values. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Durable store errors (I/O, corruption, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Network or rate-limit failure from a collaborator; worth retrying.
    #[error("{stage} failed (retryable): {message}")]
    Transient { stage: Stage, message: String },

    /// Malformed input, refusal, or auth failure from a collaborator.
    #[error("{stage} failed permanently: {message}")]
    Permanent { stage: Stage, message: String },

    /// A collaborator call exceeded its per-attempt deadline.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// A record that was expected to exist is absent.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A batch is not in the state an operation requires.
    #[error("batch {id} is {state}")]
    InvalidState { id: String, state: BatchState },

    /// The queue no longer accepts inbound messages.
    #[error("queue is shutting down")]
    ShuttingDown,

    /// Chat transport errors.
    #[error("channel error: {message}")]
    Channel {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl TodobotError {
    pub fn transient(stage: Stage, message: impl Into<String>) -> Self {
        Self::Transient {
            stage,
            message: message.into(),
        }
    }

    pub fn permanent(stage: Stage, message: impl Into<String>) -> Self {
        Self::Permanent {
            stage,
            message: message.into(),
        }
    }

    /// Whether the delivery queue should schedule another attempt.
    ///
    /// Storage errors count as retryable here: a failed runtime write leaves
    /// the batch in a state that a later attempt (or restart recovery) redoes.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transient { .. } | Self::Timeout { .. } | Self::Storage { .. }
        )
    }

    /// Classify a non-success HTTP status from a collaborator.
    ///
    /// 408, 429 and 5xx are worth retrying; every other status means the
    /// same request would fail again.
    pub fn from_http_status(stage: Stage, status: u16, body: &str) -> Self {
        let message = if body.is_empty() {
            format!("HTTP {status}")
        } else {
            format!("HTTP {status}: {body}")
        };
        if is_transient_status(status) {
            Self::transient(stage, message)
        } else {
            Self::permanent(stage, message)
        }
    }
}

/// HTTP statuses that indicate a transient collaborator failure.
pub fn is_transient_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500..=599)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(TodobotError::transient(Stage::Extraction, "429").is_retryable());
        assert!(
            TodobotError::Timeout {
                duration: std::time::Duration::from_secs(1)
            }
            .is_retryable()
        );
        assert!(
            TodobotError::Storage {
                source: Box::new(std::io::Error::other("disk"))
            }
            .is_retryable()
        );
        assert!(!TodobotError::permanent(Stage::Delivery, "401").is_retryable());
        assert!(!TodobotError::Config("bad".into()).is_retryable());
        assert!(!TodobotError::ShuttingDown.is_retryable());
    }

    #[test]
    fn display_names_the_stage() {
        let err = TodobotError::transient(Stage::Delivery, "503 from sink");
        assert_eq!(err.to_string(), "delivery failed (retryable): 503 from sink");

        let err = TodobotError::permanent(Stage::Extraction, "refused");
        assert_eq!(err.to_string(), "extraction failed permanently: refused");
    }

    #[test]
    fn http_status_classification() {
        for status in [408, 429, 500, 502, 503, 529] {
            assert!(
                TodobotError::from_http_status(Stage::Delivery, status, "").is_retryable(),
                "{status} should be transient"
            );
        }
        for status in [400, 401, 403, 404, 422] {
            assert!(
                !TodobotError::from_http_status(Stage::Delivery, status, "").is_retryable(),
                "{status} should be permanent"
            );
        }
        let err = TodobotError::from_http_status(Stage::Extraction, 401, "bad key");
        assert_eq!(err.to_string(), "extraction failed permanently: HTTP 401: bad key");
    }
}
