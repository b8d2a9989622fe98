// SPDX-FileCopyrightText: 2026 Todobot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Delivery receipt ledger.

use rusqlite::{OptionalExtension, params};
use todobot_core::{DeliveryReceipt, TodobotError};

use crate::database::{Database, map_tr_err};

/// Record that a batch reached the sink. The first receipt wins; repeated
/// calls leave it untouched.
pub async fn record_delivery(
    db: &Database,
    batch_id: &str,
    item_count: usize,
) -> Result<(), TodobotError> {
    let batch_id = batch_id.to_string();
    let item_count = i64::try_from(item_count)
        .map_err(|_| TodobotError::Internal(format!("item count {item_count} overflows")))?;
    let delivered_at = chrono::Utc::now();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO deliveries (batch_id, item_count, delivered_at)
                 VALUES (?1, ?2, ?3)",
                params![batch_id, item_count, delivered_at],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// The receipt for a batch, if it was delivered.
pub async fn delivery_receipt(
    db: &Database,
    batch_id: &str,
) -> Result<Option<DeliveryReceipt>, TodobotError> {
    let batch_id = batch_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT batch_id, item_count, delivered_at FROM deliveries WHERE batch_id = ?1",
                params![batch_id],
                |row| {
                    let item_count: i64 = row.get(1)?;
                    Ok(DeliveryReceipt {
                        batch_id: row.get(0)?,
                        item_count: usize::try_from(item_count).unwrap_or_default(),
                        delivered_at: row.get(2)?,
                    })
                },
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Number of receipts on file.
pub async fn count_deliveries(db: &Database) -> Result<u64, TodobotError> {
    db.connection()
        .call(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM deliveries", [], |row| row.get(0))?;
            Ok(count.max(0) as u64)
        })
        .await
        .map_err(map_tr_err)
}
