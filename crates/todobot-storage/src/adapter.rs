// SPDX-FileCopyrightText: 2026 Todobot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of the BatchStore trait.

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::debug;

use todobot_config::model::StorageConfig;
use todobot_core::{Batch, BatchStore, DeliveryReceipt, Message, TodobotError};

use crate::database::Database;
use crate::queries;

/// SQLite-backed batch store.
///
/// Wraps a [`Database`] handle and delegates to the typed query modules.
/// The database is opened on the first call to [`BatchStore::initialize`].
pub struct SqliteStore {
    config: StorageConfig,
    db: OnceCell<Database>,
}

impl SqliteStore {
    /// Create a store for the configured path without opening it.
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            db: OnceCell::new(),
        }
    }

    /// Returns the underlying Database, or an error if not initialized.
    pub fn database(&self) -> Result<&Database, TodobotError> {
        self.db.get().ok_or_else(|| TodobotError::Storage {
            source: "storage not initialized -- call initialize() first".into(),
        })
    }

    /// Runs a trivial query to check the connection is usable.
    pub async fn ping(&self) -> Result<(), TodobotError> {
        self.database()?
            .connection()
            .call(|conn| -> Result<(), rusqlite::Error> { conn.execute_batch("SELECT 1;") })
            .await
            .map_err(crate::database::map_tr_err)
    }

    /// Number of batches delivered over the lifetime of this database.
    pub async fn delivered_count(&self) -> Result<u64, TodobotError> {
        queries::deliveries::count_deliveries(self.database()?).await
    }
}

#[async_trait]
impl BatchStore for SqliteStore {
    async fn initialize(&self) -> Result<(), TodobotError> {
        let db = Database::open_with_options(&self.config.database_path, self.config.wal_mode)
            .await?;
        self.db.set(db).map_err(|_| TodobotError::Storage {
            source: "storage already initialized".into(),
        })?;
        debug!(path = %self.config.database_path, "SQLite store initialized");
        Ok(())
    }

    async fn close(&self) -> Result<(), TodobotError> {
        self.database()?.close().await
    }

    // --- Messages ---

    async fn put_message(&self, message: &Message) -> Result<(), TodobotError> {
        queries::messages::put_message(self.database()?, message).await
    }

    async fn get_message(&self, id: &str) -> Result<Option<Message>, TodobotError> {
        queries::messages::get_message(self.database()?, id).await
    }

    async fn delete_message(&self, id: &str) -> Result<(), TodobotError> {
        queries::messages::delete_message(self.database()?, id).await
    }

    // --- Batches ---

    async fn put_batch(&self, batch: &Batch) -> Result<(), TodobotError> {
        queries::batches::put_batch(self.database()?, batch).await
    }

    async fn get_batch(&self, id: &str) -> Result<Option<Batch>, TodobotError> {
        queries::batches::get_batch(self.database()?, id).await
    }

    async fn delete_batch(&self, id: &str) -> Result<(), TodobotError> {
        queries::batches::delete_batch(self.database()?, id).await
    }

    async fn append_to_batch(
        &self,
        message: &Message,
        batch: &Batch,
    ) -> Result<(), TodobotError> {
        queries::batches::append_to_batch(self.database()?, message, batch).await
    }

    async fn list_pending(&self) -> Result<Vec<Batch>, TodobotError> {
        queries::batches::list_pending(self.database()?).await
    }

    async fn list_dead_letters(&self) -> Result<Vec<Batch>, TodobotError> {
        queries::batches::list_dead_letters(self.database()?).await
    }

    // --- Delivery ledger ---

    async fn record_delivery(&self, batch_id: &str, item_count: usize) -> Result<(), TodobotError> {
        queries::deliveries::record_delivery(self.database()?, batch_id, item_count).await
    }

    async fn delivery_receipt(
        &self,
        batch_id: &str,
    ) -> Result<Option<DeliveryReceipt>, TodobotError> {
        queries::deliveries::delivery_receipt(self.database()?, batch_id).await
    }

    async fn finalize_delivered(&self, batch_id: &str) -> Result<(), TodobotError> {
        queries::batches::finalize_delivered(self.database()?, batch_id).await
    }
}
