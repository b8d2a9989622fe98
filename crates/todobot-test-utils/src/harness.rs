// SPDX-FileCopyrightText: 2026 Todobot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end queue testing.
//!
//! `TestHarness` owns a temporary SQLite file and the mock collaborators.
//! Each [`TestHarness::start`] builds a fresh store and queue manager over
//! the same file, so a test can shut down (or seed the store the way a crash
//! would leave it) and start again.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;

use todobot_config::model::StorageConfig;
use todobot_core::{BatchStore, InboundMessage, TodobotError};
use todobot_queue::{BatchPolicy, QueueManager, QueueSettings, RetryPolicy};
use todobot_storage::SqliteStore;

use crate::mock_extractor::MockExtractor;
use crate::mock_sink::MockSink;

pub struct TestHarness {
    _dir: TempDir,
    db_path: PathBuf,
    pub extractor: Arc<MockExtractor>,
    pub sink: Arc<MockSink>,
    pub settings: QueueSettings,
    store: Option<Arc<SqliteStore>>,
}

impl TestHarness {
    /// Harness with default mocks and [`TestHarness::fast_settings`].
    pub fn new() -> Result<Self, TodobotError> {
        Self::with_mocks(MockExtractor::new(), MockSink::new())
    }

    pub fn with_mocks(extractor: MockExtractor, sink: MockSink) -> Result<Self, TodobotError> {
        let dir = TempDir::new().map_err(|e| TodobotError::Storage { source: e.into() })?;
        let db_path = dir.path().join("todobot-test.db");
        Ok(Self {
            _dir: dir,
            db_path,
            extractor: Arc::new(extractor),
            sink: Arc::new(sink),
            settings: Self::fast_settings(),
            store: None,
        })
    }

    /// Settings scaled down so real-time tests finish in well under a
    /// second: 200ms idle window, 20ms ticks, 10ms backoff base.
    pub fn fast_settings() -> QueueSettings {
        QueueSettings {
            batch: BatchPolicy {
                idle_window: Duration::from_millis(200),
                max_batch_size: 10,
                poll_interval: Duration::from_millis(20),
            },
            retry: RetryPolicy {
                max_attempts: 3,
                base: Duration::from_millis(10),
                max: Duration::from_millis(80),
            },
            workers: 2,
            work_queue_capacity: 16,
            attempt_timeout: Duration::from_millis(500),
        }
    }

    fn storage_config(&self) -> StorageConfig {
        StorageConfig {
            database_path: self.db_path.to_string_lossy().to_string(),
            wal_mode: true,
        }
    }

    /// Start a queue manager over the harness database.
    pub async fn start(&mut self) -> Result<QueueManager, TodobotError> {
        let store = Arc::new(SqliteStore::new(self.storage_config()));
        let manager = QueueManager::builder(
            Arc::clone(&store) as Arc<dyn BatchStore>,
            Arc::clone(&self.extractor) as _,
            Arc::clone(&self.sink) as _,
        )
        .settings(self.settings)
        .start()
        .await?;
        self.store = Some(store);
        Ok(manager)
    }

    /// The store of the most recently started manager. Only valid until
    /// that manager shuts down.
    pub fn store(&self) -> &SqliteStore {
        self.store
            .as_deref()
            .expect("start() must be called before store()")
    }

    /// A separately opened store over the harness database, for seeding
    /// state before a start or inspecting it after a shutdown. Close it
    /// before starting a manager.
    pub async fn open_store(&self) -> Result<SqliteStore, TodobotError> {
        let store = SqliteStore::new(self.storage_config());
        store.initialize().await?;
        Ok(store)
    }

    /// An inbound message received now.
    pub fn inbound(conversation_id: &str, text: &str) -> InboundMessage {
        InboundMessage {
            conversation_id: conversation_id.to_string(),
            text: text.to_string(),
            received_at: Utc::now(),
        }
    }
}

/// Poll `check` every 10ms until it returns true or `timeout` elapses.
/// Returns the last result.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
