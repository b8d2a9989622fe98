// SPDX-FileCopyrightText: 2026 Todobot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Delivery collaborator: durable append of extracted tasks.

use async_trait::async_trait;

use crate::error::TodobotError;
use crate::types::TaskItem;

/// Appends a batch's items to the external task store.
///
/// `batch_id` is an idempotency key: appending the same batch twice must not
/// produce a second set of rows. The queue may repeat a call after a crash
/// that happened between a successful append and the receipt write.
#[async_trait]
pub trait TaskSink: Send + Sync + 'static {
    /// Human-readable name used in logs.
    fn name(&self) -> &str;

    async fn append(&self, batch_id: &str, items: &[TaskItem]) -> Result<(), TodobotError>;
}
