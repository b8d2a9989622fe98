// SPDX-FileCopyrightText: 2026 Todobot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Record types shared across the queue, storage, and adapter crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::TodobotError;

/// A message handed over by the chat transport, before it is assigned an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub conversation_id: String,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

/// A stored chat message. Never mutated after it is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

/// Lifecycle state of a [`Batch`].
///
/// DELIVERED is terminal and never stored as a row: a delivered batch is
/// deleted together with its messages, and only its receipt remains.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BatchState {
    Open,
    Closed,
    Processing,
    Delivered,
    Failed,
}

/// An ordered group of messages from one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub batch_id: String,
    pub conversation_id: String,
    pub message_ids: Vec<String>,
    pub state: BatchState,
    pub attempt_count: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Message of the most recent failed attempt, kept for dead-letter triage.
    pub last_error: Option<String>,
}

impl Batch {
    /// A fresh OPEN batch with no messages.
    pub fn open(
        batch_id: impl Into<String>,
        conversation_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            batch_id: batch_id.into(),
            conversation_id: conversation_id.into(),
            message_ids: Vec::new(),
            state: BatchState::Open,
            attempt_count: 0,
            next_attempt_at: now,
            created_at: now,
            last_error: None,
        }
    }

    pub fn is_dead_letter(&self) -> bool {
        self.state == BatchState::Failed
    }
}

/// One task extracted from a batch's text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskItem {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl TaskItem {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            due_date: None,
            notes: None,
        }
    }
}

/// Proof that a batch's items reached the sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub batch_id: String,
    pub item_count: usize,
    pub delivered_at: DateTime<Utc>,
}

/// Outcome of one pipeline run. Only logged, never persisted.
#[derive(Debug)]
pub struct DeliveryResult {
    pub batch_id: String,
    pub items: Vec<TaskItem>,
    pub error: Option<TodobotError>,
    /// The sink call was skipped because a receipt already existed.
    pub replayed: bool,
}

impl DeliveryResult {
    pub fn delivered(batch_id: impl Into<String>, items: Vec<TaskItem>) -> Self {
        Self {
            batch_id: batch_id.into(),
            items,
            error: None,
            replayed: false,
        }
    }

    pub fn replayed(batch_id: impl Into<String>) -> Self {
        Self {
            batch_id: batch_id.into(),
            items: Vec::new(),
            error: None,
            replayed: true,
        }
    }

    pub fn failed(batch_id: impl Into<String>, error: TodobotError) -> Self {
        Self {
            batch_id: batch_id.into(),
            items: Vec::new(),
            error: Some(error),
            replayed: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn batch_state_text_round_trip() {
        for state in [
            BatchState::Open,
            BatchState::Closed,
            BatchState::Processing,
            BatchState::Delivered,
            BatchState::Failed,
        ] {
            let text = state.to_string();
            assert_eq!(text, text.to_lowercase());
            assert_eq!(BatchState::from_str(&text).unwrap(), state);
        }
    }

    #[test]
    fn open_batch_starts_empty() {
        let now = Utc::now();
        let batch = Batch::open("b1", "c1", now);
        assert_eq!(batch.state, BatchState::Open);
        assert!(batch.message_ids.is_empty());
        assert_eq!(batch.attempt_count, 0);
        assert_eq!(batch.created_at, now);
        assert!(!batch.is_dead_letter());
    }

    #[test]
    fn task_item_omits_empty_optionals() {
        let json = serde_json::to_string(&TaskItem::titled("buy milk")).unwrap();
        assert_eq!(json, r#"{"title":"buy milk"}"#);

        let parsed: TaskItem =
            serde_json::from_str(r#"{"title":"call mom","due_date":"2026-10-18"}"#).unwrap();
        assert_eq!(parsed.due_date.as_deref(), Some("2026-10-18"));
        assert!(parsed.notes.is_none());
    }
}
