// SPDX-FileCopyrightText: 2026 Todobot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Operator actions that work directly against a store, with or without a
//! running queue manager.

use std::collections::BTreeMap;

use tracing::info;

use todobot_core::{Batch, BatchState, BatchStore, Clock, TodobotError};

/// Reset a dead-lettered batch to CLOSED with a fresh attempt budget.
///
/// The batch is due immediately. A running manager dispatches it right away;
/// otherwise the next startup recovery picks it up.
pub async fn requeue_dead_letter(
    store: &dyn BatchStore,
    clock: &Clock,
    batch_id: &str,
) -> Result<Batch, TodobotError> {
    let mut batch = store
        .get_batch(batch_id)
        .await?
        .ok_or_else(|| TodobotError::NotFound {
            kind: "batch",
            id: batch_id.to_string(),
        })?;

    if batch.state != BatchState::Failed {
        return Err(TodobotError::InvalidState {
            id: batch.batch_id,
            state: batch.state,
        });
    }

    batch.state = BatchState::Closed;
    batch.attempt_count = 0;
    batch.next_attempt_at = clock.now();
    batch.last_error = None;
    store.put_batch(&batch).await?;

    info!(batch_id = %batch.batch_id, "dead letter requeued");
    Ok(batch)
}

/// Number of stored batches per state.
pub async fn pending_summary(
    store: &dyn BatchStore,
) -> Result<BTreeMap<BatchState, usize>, TodobotError> {
    let mut summary = BTreeMap::new();
    for batch in store.list_pending().await? {
        *summary.entry(batch.state).or_insert(0) += 1;
    }
    Ok(summary)
}
