// SPDX-FileCopyrightText: 2026 Todobot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared helpers for queue integration tests.

#![allow(dead_code)]

use std::time::Duration;

use chrono::{DateTime, Utc};
use todobot_core::{Batch, BatchState, BatchStore, Message};
use todobot_storage::SqliteStore;

/// Generous upper bound for anything the fast settings should finish.
pub const SETTLE: Duration = Duration::from_secs(5);

/// Write a batch with one message per text, the way the accumulator would
/// have left it, then force its state.
pub async fn seed_batch(
    store: &SqliteStore,
    batch_id: &str,
    conversation_id: &str,
    texts: &[&str],
    state: BatchState,
    attempt_count: u32,
    created_at: DateTime<Utc>,
) -> Batch {
    let mut batch = Batch::open(batch_id, conversation_id, created_at);
    for (i, text) in texts.iter().enumerate() {
        let message = Message {
            id: format!("{batch_id}-m{i}"),
            conversation_id: conversation_id.to_string(),
            text: text.to_string(),
            received_at: created_at,
        };
        batch.message_ids.push(message.id.clone());
        store.append_to_batch(&message, &batch).await.unwrap();
    }
    batch.state = state;
    batch.attempt_count = attempt_count;
    if state == BatchState::Failed {
        batch.last_error = Some("extraction failed permanently: refused".into());
    }
    store.put_batch(&batch).await.unwrap();
    batch
}
