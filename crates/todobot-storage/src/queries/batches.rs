// SPDX-FileCopyrightText: 2026 Todobot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Batch operations, including the multi-row transactions the queue relies
//! on for crash safety.

use std::str::FromStr;

use rusqlite::types::Type;
use rusqlite::{OptionalExtension, Row, params};
use todobot_core::{Batch, BatchState, Message, TodobotError};

use crate::database::{Database, map_tr_err};
use crate::queries::messages::INSERT_MESSAGE;

const SELECT_BATCH: &str = "SELECT batch_id, conversation_id, message_ids, state, attempt_count,
            next_attempt_at, created_at, last_error
     FROM batches";

// Upsert keeps the rowid stable so ties on created_at still list in insert order.
const UPSERT_BATCH: &str = "INSERT INTO batches (batch_id, conversation_id, message_ids, state,
            attempt_count, next_attempt_at, created_at, last_error)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
     ON CONFLICT(batch_id) DO UPDATE SET
        conversation_id = excluded.conversation_id,
        message_ids = excluded.message_ids,
        state = excluded.state,
        attempt_count = excluded.attempt_count,
        next_attempt_at = excluded.next_attempt_at,
        created_at = excluded.created_at,
        last_error = excluded.last_error";

/// Column values for one batch row, serialized outside the writer thread.
struct BatchRow {
    batch_id: String,
    conversation_id: String,
    message_ids: String,
    state: String,
    attempt_count: u32,
    next_attempt_at: chrono::DateTime<chrono::Utc>,
    created_at: chrono::DateTime<chrono::Utc>,
    last_error: Option<String>,
}

impl BatchRow {
    fn from_batch(batch: &Batch) -> Result<Self, TodobotError> {
        if batch.state == BatchState::Delivered {
            return Err(TodobotError::InvalidState {
                id: batch.batch_id.clone(),
                state: batch.state,
            });
        }
        let message_ids =
            serde_json::to_string(&batch.message_ids).map_err(|e| TodobotError::Storage {
                source: Box::new(e),
            })?;
        Ok(Self {
            batch_id: batch.batch_id.clone(),
            conversation_id: batch.conversation_id.clone(),
            message_ids,
            state: batch.state.to_string(),
            attempt_count: batch.attempt_count,
            next_attempt_at: batch.next_attempt_at,
            created_at: batch.created_at,
            last_error: batch.last_error.clone(),
        })
    }

    fn upsert(&self, conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
        conn.execute(
            UPSERT_BATCH,
            params![
                self.batch_id,
                self.conversation_id,
                self.message_ids,
                self.state,
                self.attempt_count,
                self.next_attempt_at,
                self.created_at,
                self.last_error,
            ],
        )?;
        Ok(())
    }
}

fn row_to_batch(row: &Row<'_>) -> Result<Batch, rusqlite::Error> {
    let message_ids: String = row.get(2)?;
    let message_ids = serde_json::from_str(&message_ids)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;
    let state: String = row.get(3)?;
    let state = BatchState::from_str(&state)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;
    Ok(Batch {
        batch_id: row.get(0)?,
        conversation_id: row.get(1)?,
        message_ids,
        state,
        attempt_count: row.get(4)?,
        next_attempt_at: row.get(5)?,
        created_at: row.get(6)?,
        last_error: row.get(7)?,
    })
}

/// Insert or replace a batch. DELIVERED batches are rejected: delivery is
/// recorded through [`finalize_delivered`].
pub async fn put_batch(db: &Database, batch: &Batch) -> Result<(), TodobotError> {
    let row = BatchRow::from_batch(batch)?;
    db.connection()
        .call(move |conn| row.upsert(conn))
        .await
        .map_err(map_tr_err)
}

/// Get a batch by id.
pub async fn get_batch(db: &Database, id: &str) -> Result<Option<Batch>, TodobotError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("{SELECT_BATCH} WHERE batch_id = ?1"),
                params![id],
                row_to_batch,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Delete a batch row. Its messages are left alone.
pub async fn delete_batch(db: &Database, id: &str) -> Result<(), TodobotError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute("DELETE FROM batches WHERE batch_id = ?1", params![id])?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Write a message and the batch that references it in one transaction.
pub async fn append_to_batch(
    db: &Database,
    message: &Message,
    batch: &Batch,
) -> Result<(), TodobotError> {
    let row = BatchRow::from_batch(batch)?;
    let msg = message.clone();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                INSERT_MESSAGE,
                params![msg.id, msg.conversation_id, msg.text, msg.received_at],
            )?;
            row.upsert(&tx)?;
            tx.commit()
        })
        .await
        .map_err(map_tr_err)
}

/// Every stored batch, oldest first. Includes dead letters.
pub async fn list_pending(db: &Database) -> Result<Vec<Batch>, TodobotError> {
    list_where(db, "").await
}

/// FAILED batches, oldest first.
pub async fn list_dead_letters(db: &Database) -> Result<Vec<Batch>, TodobotError> {
    list_where(db, "WHERE state = 'failed'").await
}

async fn list_where(db: &Database, filter: &'static str) -> Result<Vec<Batch>, TodobotError> {
    db.connection()
        .call(move |conn| {
            let mut stmt =
                conn.prepare(&format!("{SELECT_BATCH} {filter} ORDER BY created_at ASC, rowid ASC"))?;
            let rows = stmt.query_map([], row_to_batch)?;
            let mut batches = Vec::new();
            for row in rows {
                batches.push(row?);
            }
            Ok(batches)
        })
        .await
        .map_err(map_tr_err)
}

/// Delete a delivered batch and every message it references in one
/// transaction. A missing batch is a no-op.
pub async fn finalize_delivered(db: &Database, id: &str) -> Result<(), TodobotError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let message_ids: Option<String> = tx
                .query_row(
                    "SELECT message_ids FROM batches WHERE batch_id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(message_ids) = message_ids {
                let message_ids: Vec<String> = serde_json::from_str(&message_ids).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e))
                })?;
                for message_id in &message_ids {
                    tx.execute("DELETE FROM messages WHERE id = ?1", params![message_id])?;
                }
                tx.execute("DELETE FROM batches WHERE batch_id = ?1", params![id])?;
            }
            tx.commit()
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::messages::get_message;
    use chrono::{Duration, TimeZone, Utc};
    use tempfile::tempdir;

    async fn setup_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = Database::open(db_path.to_str().unwrap()).await.unwrap();
        (db, dir)
    }

    fn t0() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn make_message(id: &str, text: &str) -> Message {
        Message {
            id: id.to_string(),
            conversation_id: "chat-1".to_string(),
            text: text.to_string(),
            received_at: t0(),
        }
    }

    #[tokio::test]
    async fn put_and_get_batch_roundtrip() {
        let (db, _dir) = setup_db().await;
        let mut batch = Batch::open("b1", "chat-1", t0());
        batch.message_ids = vec!["m1".into(), "m2".into()];
        batch.state = BatchState::Processing;
        batch.attempt_count = 2;
        batch.last_error = Some("extraction failed (retryable): 503".into());

        put_batch(&db, &batch).await.unwrap();
        assert_eq!(get_batch(&db, "b1").await.unwrap(), Some(batch));

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn put_batch_replaces_existing_row() {
        let (db, _dir) = setup_db().await;
        let mut batch = Batch::open("b1", "chat-1", t0());
        put_batch(&db, &batch).await.unwrap();

        batch.state = BatchState::Closed;
        batch.message_ids.push("m1".into());
        put_batch(&db, &batch).await.unwrap();

        let loaded = get_batch(&db, "b1").await.unwrap().unwrap();
        assert_eq!(loaded.state, BatchState::Closed);
        assert_eq!(loaded.message_ids, vec!["m1"]);
        assert_eq!(list_pending(&db).await.unwrap().len(), 1);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn delivered_state_is_never_stored() {
        let (db, _dir) = setup_db().await;
        let mut batch = Batch::open("b1", "chat-1", t0());
        batch.state = BatchState::Delivered;

        let err = put_batch(&db, &batch).await.unwrap_err();
        assert!(matches!(err, TodobotError::InvalidState { .. }));
        assert!(get_batch(&db, "b1").await.unwrap().is_none());

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn append_writes_message_and_batch_together() {
        let (db, _dir) = setup_db().await;
        let msg = make_message("m1", "buy milk");
        let mut batch = Batch::open("b1", "chat-1", t0());
        batch.message_ids.push(msg.id.clone());

        append_to_batch(&db, &msg, &batch).await.unwrap();

        assert_eq!(get_message(&db, "m1").await.unwrap(), Some(msg));
        assert_eq!(get_batch(&db, "b1").await.unwrap(), Some(batch));

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn append_rolls_back_when_batch_is_rejected() {
        let (db, _dir) = setup_db().await;
        let msg = make_message("m1", "buy milk");
        let mut batch = Batch::open("b1", "chat-1", t0());
        batch.state = BatchState::Delivered;

        assert!(append_to_batch(&db, &msg, &batch).await.is_err());
        assert!(get_message(&db, "m1").await.unwrap().is_none());

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn list_pending_orders_by_creation() {
        let (db, _dir) = setup_db().await;
        let later = Batch::open("b-later", "chat-2", t0() + Duration::seconds(10));
        let earlier = Batch::open("b-earlier", "chat-1", t0());
        let mut failed = Batch::open("b-failed", "chat-3", t0() + Duration::seconds(20));
        failed.state = BatchState::Failed;

        put_batch(&db, &later).await.unwrap();
        put_batch(&db, &earlier).await.unwrap();
        put_batch(&db, &failed).await.unwrap();

        let ids: Vec<String> = list_pending(&db)
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.batch_id)
            .collect();
        assert_eq!(ids, vec!["b-earlier", "b-later", "b-failed"]);

        let dead: Vec<String> = list_dead_letters(&db)
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.batch_id)
            .collect();
        assert_eq!(dead, vec!["b-failed"]);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn finalize_removes_batch_and_its_messages_only() {
        let (db, _dir) = setup_db().await;
        let m1 = make_message("m1", "buy milk");
        let m2 = make_message("m2", "call mom");
        let other = make_message("m3", "unrelated");
        let mut batch = Batch::open("b1", "chat-1", t0());
        batch.message_ids.push(m1.id.clone());
        append_to_batch(&db, &m1, &batch).await.unwrap();
        batch.message_ids.push(m2.id.clone());
        append_to_batch(&db, &m2, &batch).await.unwrap();
        crate::queries::messages::put_message(&db, &other).await.unwrap();

        finalize_delivered(&db, "b1").await.unwrap();

        assert!(get_batch(&db, "b1").await.unwrap().is_none());
        assert!(get_message(&db, "m1").await.unwrap().is_none());
        assert!(get_message(&db, "m2").await.unwrap().is_none());
        assert!(get_message(&db, "m3").await.unwrap().is_some());

        // Second finalize is a no-op.
        finalize_delivered(&db, "b1").await.unwrap();

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn delete_batch_keeps_messages() {
        let (db, _dir) = setup_db().await;
        let msg = make_message("m1", "buy milk");
        let mut batch = Batch::open("b1", "chat-1", t0());
        batch.message_ids.push(msg.id.clone());
        append_to_batch(&db, &msg, &batch).await.unwrap();

        delete_batch(&db, "b1").await.unwrap();
        delete_batch(&db, "b1").await.unwrap();

        assert!(get_batch(&db, "b1").await.unwrap().is_none());
        assert!(get_message(&db, "m1").await.unwrap().is_some());

        db.close().await.unwrap();
    }
}
