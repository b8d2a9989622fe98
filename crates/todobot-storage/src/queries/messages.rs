// SPDX-FileCopyrightText: 2026 Todobot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message operations.

use rusqlite::{OptionalExtension, params};
use todobot_core::{Message, TodobotError};

use crate::database::{Database, map_tr_err};

pub(crate) const INSERT_MESSAGE: &str =
    "INSERT OR REPLACE INTO messages (id, conversation_id, text, received_at)
     VALUES (?1, ?2, ?3, ?4)";

/// Insert a message, replacing any row with the same id.
pub async fn put_message(db: &Database, msg: &Message) -> Result<(), TodobotError> {
    let msg = msg.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                INSERT_MESSAGE,
                params![msg.id, msg.conversation_id, msg.text, msg.received_at],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Get a message by id.
pub async fn get_message(db: &Database, id: &str) -> Result<Option<Message>, TodobotError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT id, conversation_id, text, received_at FROM messages WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Message {
                        id: row.get(0)?,
                        conversation_id: row.get(1)?,
                        text: row.get(2)?,
                        received_at: row.get(3)?,
                    })
                },
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Delete a message. Absent ids are a no-op.
pub async fn delete_message(db: &Database, id: &str) -> Result<(), TodobotError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute("DELETE FROM messages WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    async fn setup_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = Database::open(db_path.to_str().unwrap()).await.unwrap();
        (db, dir)
    }

    fn make_message(id: &str, text: &str) -> Message {
        Message {
            id: id.to_string(),
            conversation_id: "chat-1".to_string(),
            text: text.to_string(),
            received_at: Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn put_and_get_message() {
        let (db, _dir) = setup_db().await;
        let msg = make_message("m1", "buy milk");

        put_message(&db, &msg).await.unwrap();
        let loaded = get_message(&db, "m1").await.unwrap();
        assert_eq!(loaded, Some(msg));

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn get_missing_message_returns_none() {
        let (db, _dir) = setup_db().await;
        assert!(get_message(&db, "nope").await.unwrap().is_none());
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn delete_message_is_idempotent() {
        let (db, _dir) = setup_db().await;
        put_message(&db, &make_message("m1", "call mom")).await.unwrap();

        delete_message(&db, "m1").await.unwrap();
        delete_message(&db, "m1").await.unwrap();
        assert!(get_message(&db, "m1").await.unwrap().is_none());

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn text_is_stored_verbatim() {
        let (db, _dir) = setup_db().await;
        let text = "  línea 1\n\tline 2 'quoted' \"double\" 🥛  ";
        put_message(&db, &make_message("m1", text)).await.unwrap();

        let loaded = get_message(&db, "m1").await.unwrap().unwrap();
        assert_eq!(loaded.text, text);

        db.close().await.unwrap();
    }
}
