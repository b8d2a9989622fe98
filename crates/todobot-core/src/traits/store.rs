// SPDX-FileCopyrightText: 2026 Todobot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable store trait for messages, batches, and delivery receipts.

use async_trait::async_trait;

use crate::error::TodobotError;
use crate::types::{Batch, DeliveryReceipt, Message};

/// Crash-safe record store backing the delivery queue.
///
/// Every method is individually atomic: a crash mid-call leaves either the
/// previous or the new value, never a torn record. Lookups of absent ids
/// return `None`; deletes of absent ids are no-ops.
#[async_trait]
pub trait BatchStore: Send + Sync + 'static {
    /// Opens the backend and applies pending schema migrations.
    async fn initialize(&self) -> Result<(), TodobotError>;

    /// Flushes pending writes to disk and releases the backend.
    async fn close(&self) -> Result<(), TodobotError>;

    // --- Messages ---

    async fn put_message(&self, message: &Message) -> Result<(), TodobotError>;

    async fn get_message(&self, id: &str) -> Result<Option<Message>, TodobotError>;

    async fn delete_message(&self, id: &str) -> Result<(), TodobotError>;

    // --- Batches ---

    /// Inserts or replaces a batch record.
    async fn put_batch(&self, batch: &Batch) -> Result<(), TodobotError>;

    async fn get_batch(&self, id: &str) -> Result<Option<Batch>, TodobotError>;

    async fn delete_batch(&self, id: &str) -> Result<(), TodobotError>;

    /// Writes a new message and the batch that now references it in one
    /// transaction.
    async fn append_to_batch(&self, message: &Message, batch: &Batch)
    -> Result<(), TodobotError>;

    /// Every batch not yet delivered, oldest first. Includes dead letters.
    async fn list_pending(&self) -> Result<Vec<Batch>, TodobotError>;

    /// Batches in the FAILED state, oldest first.
    async fn list_dead_letters(&self) -> Result<Vec<Batch>, TodobotError>;

    // --- Delivery ledger ---

    async fn record_delivery(&self, batch_id: &str, item_count: usize)
    -> Result<(), TodobotError>;

    async fn delivery_receipt(&self, batch_id: &str)
    -> Result<Option<DeliveryReceipt>, TodobotError>;

    /// Deletes a delivered batch and all of its messages in one transaction.
    async fn finalize_delivered(&self, batch_id: &str) -> Result<(), TodobotError>;
}
