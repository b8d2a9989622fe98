// SPDX-FileCopyrightText: 2026 Todobot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Operator commands: `dead-letters`, `requeue`, and `status`.
//!
//! These open the database directly. A running service picks up a requeued
//! batch at its next restart; requeueing through a live manager dispatches
//! it immediately.

use std::io::Write;

use serde::Serialize;

use todobot_config::model::TodobotConfig;
use todobot_core::{Batch, BatchState, BatchStore, Clock, TodobotError};
use todobot_queue::{pending_summary, requeue_dead_letter};
use todobot_storage::SqliteStore;

/// Structured status output for `--json` mode.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub database_path: String,
    pub open: usize,
    pub closed: usize,
    pub processing: usize,
    pub failed: usize,
    pub delivered: u64,
}

pub async fn run_dead_letters(config: &TodobotConfig, json: bool) -> Result<(), TodobotError> {
    with_store(config, |store| async move {
        let mut out = std::io::stdout();
        write_dead_letters(&store, json, &mut out).await?;
        Ok(store)
    })
    .await
}

pub async fn run_requeue(config: &TodobotConfig, batch_id: &str) -> Result<(), TodobotError> {
    with_store(config, |store| async move {
        let batch = requeue_dead_letter(&store, &Clock::new(), batch_id).await?;
        println!(
            "requeued {} ({} messages); it will be delivered when the service next starts",
            batch.batch_id,
            batch.message_ids.len()
        );
        Ok(store)
    })
    .await
}

pub async fn run_status(config: &TodobotConfig, json: bool) -> Result<(), TodobotError> {
    with_store(config, |store| async move {
        let report = status_report(&store, &config.storage.database_path).await?;
        let mut out = std::io::stdout();
        write_status(&report, json, &mut out)?;
        Ok(store)
    })
    .await
}

/// Open and initialize the store, run `f`, and close the store again.
async fn with_store<F, Fut>(config: &TodobotConfig, f: F) -> Result<(), TodobotError>
where
    F: FnOnce(SqliteStore) -> Fut,
    Fut: std::future::Future<Output = Result<SqliteStore, TodobotError>>,
{
    let store = SqliteStore::new(config.storage.clone());
    store.initialize().await?;
    let store = f(store).await?;
    store.close().await
}

pub async fn status_report(
    store: &SqliteStore,
    database_path: &str,
) -> Result<StatusReport, TodobotError> {
    let summary = pending_summary(store).await?;
    let count = |state: BatchState| summary.get(&state).copied().unwrap_or(0);
    Ok(StatusReport {
        database_path: database_path.to_string(),
        open: count(BatchState::Open),
        closed: count(BatchState::Closed),
        processing: count(BatchState::Processing),
        failed: count(BatchState::Failed),
        delivered: store.delivered_count().await?,
    })
}

pub fn write_status(
    report: &StatusReport,
    json: bool,
    out: &mut impl Write,
) -> Result<(), TodobotError> {
    if json {
        let text = serde_json::to_string_pretty(report)
            .map_err(|e| TodobotError::Internal(format!("failed to render status: {e}")))?;
        return writeln!(out, "{text}").map_err(io_err);
    }
    writeln!(out, "database:   {}", report.database_path).map_err(io_err)?;
    writeln!(out, "open:       {}", report.open).map_err(io_err)?;
    writeln!(out, "closed:     {}", report.closed).map_err(io_err)?;
    writeln!(out, "processing: {}", report.processing).map_err(io_err)?;
    writeln!(out, "failed:     {}", report.failed).map_err(io_err)?;
    writeln!(out, "delivered:  {}", report.delivered).map_err(io_err)
}

pub async fn write_dead_letters(
    store: &SqliteStore,
    json: bool,
    out: &mut impl Write,
) -> Result<(), TodobotError> {
    let dead = store.list_dead_letters().await?;
    if json {
        let text = serde_json::to_string_pretty(&dead)
            .map_err(|e| TodobotError::Internal(format!("failed to render dead letters: {e}")))?;
        return writeln!(out, "{text}").map_err(io_err);
    }
    if dead.is_empty() {
        return writeln!(out, "no dead letters").map_err(io_err);
    }
    for batch in &dead {
        writeln!(out, "{}", dead_letter_line(batch)).map_err(io_err)?;
    }
    Ok(())
}

fn dead_letter_line(batch: &Batch) -> String {
    format!(
        "{}  conversation={}  messages={}  attempts={}  created={}  error={}",
        batch.batch_id,
        batch.conversation_id,
        batch.message_ids.len(),
        batch.attempt_count,
        batch.created_at.format("%Y-%m-%d %H:%M:%S"),
        batch.last_error.as_deref().unwrap_or("-"),
    )
}

fn io_err(e: std::io::Error) -> TodobotError {
    TodobotError::Internal(format!("failed to write output: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Utc;
    use todobot_config::model::StorageConfig;
    use todobot_core::Message;

    async fn temp_store(dir: &tempfile::TempDir) -> SqliteStore {
        let store = SqliteStore::new(StorageConfig {
            database_path: dir.path().join("admin.db").to_string_lossy().to_string(),
            wal_mode: true,
        });
        store.initialize().await.unwrap();
        store
    }

    async fn seed(store: &SqliteStore, id: &str, state: BatchState) {
        let now = Utc::now();
        let mut batch = Batch::open(id, "c1", now);
        let message = Message {
            id: format!("{id}-m0"),
            conversation_id: "c1".into(),
            text: "buy milk".into(),
            received_at: now,
        };
        batch.message_ids.push(message.id.clone());
        store.append_to_batch(&message, &batch).await.unwrap();
        batch.state = state;
        if state == BatchState::Failed {
            batch.attempt_count = 5;
            batch.last_error = Some("extraction failed permanently: refused".into());
        }
        store.put_batch(&batch).await.unwrap();
    }

    #[tokio::test]
    async fn status_counts_states_and_receipts() {
        let dir = tempfile::tempdir().unwrap();
        let store = temp_store(&dir).await;
        seed(&store, "b1", BatchState::Open).await;
        seed(&store, "b2", BatchState::Closed).await;
        seed(&store, "b3", BatchState::Failed).await;
        store.record_delivery("b0", 2).await.unwrap();

        let report = status_report(&store, "admin.db").await.unwrap();
        assert_eq!(
            (report.open, report.closed, report.processing, report.failed, report.delivered),
            (1, 1, 0, 1, 1)
        );

        let mut out = Vec::new();
        write_status(&report, true, &mut out).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(json["failed"], 1);
        assert_eq!(json["delivered"], 1);
    }

    #[tokio::test]
    async fn dead_letters_are_listed() {
        let dir = tempfile::tempdir().unwrap();
        let store = temp_store(&dir).await;

        let mut out = Vec::new();
        write_dead_letters(&store, false, &mut out).await.unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "no dead letters\n");

        seed(&store, "b-dead", BatchState::Failed).await;
        seed(&store, "b-live", BatchState::Closed).await;

        let mut out = Vec::new();
        write_dead_letters(&store, false, &mut out).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("b-dead  conversation=c1  messages=1  attempts=5"));
        assert!(text.contains("error=extraction failed permanently: refused"));
        assert!(!text.contains("b-live"));

        let mut out = Vec::new();
        write_dead_letters(&store, true, &mut out).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(json[0]["batch_id"], "b-dead");
        assert_eq!(json[0]["state"], "failed");
    }
}
