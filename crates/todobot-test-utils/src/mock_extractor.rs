// SPDX-FileCopyrightText: 2026 Todobot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock extraction collaborator for deterministic testing.
//!
//! Replies are popped from a FIFO script. When the script is empty, every
//! non-empty input line becomes one task titled with that line.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use todobot_core::{Extractor, Stage, TaskItem, TodobotError};

/// One scripted extractor reply.
#[derive(Debug, Clone)]
pub enum ExtractReply {
    Items(Vec<TaskItem>),
    Transient(String),
    Permanent(String),
    /// Sleep far past any test deadline before answering.
    Hang,
    /// Sleep, then answer with the default one-task-per-line reply.
    Delayed(Duration),
}

pub struct MockExtractor {
    script: Mutex<VecDeque<ExtractReply>>,
    inputs: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl MockExtractor {
    pub fn new() -> Self {
        Self::with_replies(Vec::new())
    }

    pub fn with_replies(replies: Vec<ExtractReply>) -> Self {
        Self {
            script: Mutex::new(VecDeque::from(replies)),
            inputs: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Always fails with a retryable error.
    pub fn always_transient(times: usize) -> Self {
        Self::with_replies(vec![ExtractReply::Transient("rate limited".into()); times])
    }

    pub async fn push(&self, reply: ExtractReply) {
        self.script.lock().await.push_back(reply);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every text passed to `extract`, in call order.
    pub async fn inputs(&self) -> Vec<String> {
        self.inputs.lock().await.clone()
    }
}

impl Default for MockExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Extractor for MockExtractor {
    fn name(&self) -> &str {
        "mock"
    }

    async fn extract(&self, text: &str) -> Result<Vec<TaskItem>, TodobotError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inputs.lock().await.push(text.to_string());

        let reply = self.script.lock().await.pop_front();
        match reply {
            Some(ExtractReply::Items(items)) => Ok(items),
            Some(ExtractReply::Transient(message)) => {
                Err(TodobotError::transient(Stage::Extraction, message))
            }
            Some(ExtractReply::Permanent(message)) => {
                Err(TodobotError::permanent(Stage::Extraction, message))
            }
            Some(ExtractReply::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Vec::new())
            }
            Some(ExtractReply::Delayed(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(line_tasks(text))
            }
            None => Ok(line_tasks(text)),
        }
    }
}

fn line_tasks(text: &str) -> Vec<TaskItem> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(TaskItem::titled)
        .collect()
}
