// SPDX-FileCopyrightText: 2026 Todobot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock delivery sink that deduplicates on batch id, like the real
//! spreadsheet script does.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use todobot_core::{Stage, TaskItem, TaskSink, TodobotError};

/// One scripted sink reply. An empty script means success.
#[derive(Debug, Clone)]
pub enum AppendReply {
    Ok,
    Transient(String),
    Permanent(String),
    Hang,
}

/// A row written to the fake spreadsheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkRow {
    pub batch_id: String,
    pub item: TaskItem,
}

pub struct MockSink {
    script: Mutex<VecDeque<AppendReply>>,
    rows: Mutex<Vec<SinkRow>>,
    seen: Mutex<HashSet<String>>,
    calls: AtomicUsize,
}

impl MockSink {
    pub fn new() -> Self {
        Self::with_replies(Vec::new())
    }

    pub fn with_replies(replies: Vec<AppendReply>) -> Self {
        Self {
            script: Mutex::new(VecDeque::from(replies)),
            rows: Mutex::new(Vec::new()),
            seen: Mutex::new(HashSet::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub async fn push(&self, reply: AppendReply) {
        self.script.lock().await.push_back(reply);
    }

    /// Number of `append` calls, including failed and deduplicated ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn rows(&self) -> Vec<SinkRow> {
        self.rows.lock().await.clone()
    }

    pub async fn row_count(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn titles(&self) -> Vec<String> {
        self.rows
            .lock()
            .await
            .iter()
            .map(|row| row.item.title.clone())
            .collect()
    }

    pub async fn has_batch(&self, batch_id: &str) -> bool {
        self.seen.lock().await.contains(batch_id)
    }
}

impl Default for MockSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskSink for MockSink {
    fn name(&self) -> &str {
        "mock"
    }

    async fn append(&self, batch_id: &str, items: &[TaskItem]) -> Result<(), TodobotError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let reply = self.script.lock().await.pop_front();
        match reply {
            None | Some(AppendReply::Ok) => {}
            Some(AppendReply::Transient(message)) => {
                return Err(TodobotError::transient(Stage::Delivery, message));
            }
            Some(AppendReply::Permanent(message)) => {
                return Err(TodobotError::permanent(Stage::Delivery, message));
            }
            Some(AppendReply::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
        }

        if !self.seen.lock().await.insert(batch_id.to_string()) {
            tracing::debug!(batch_id, "duplicate append ignored");
            return Ok(());
        }
        self.rows
            .lock()
            .await
            .extend(items.iter().cloned().map(|item| SinkRow {
                batch_id: batch_id.to_string(),
                item,
            }));
        Ok(())
    }
}
