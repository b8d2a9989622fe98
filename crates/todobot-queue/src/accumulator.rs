// SPDX-FileCopyrightText: 2026 Todobot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-conversation batch accumulation.
//!
//! Each conversation has at most one OPEN batch, held in a slot behind its
//! own async mutex so conversations never wait on each other. Every change
//! is written through a caller-supplied `persist` closure before the
//! in-memory slot is updated: if the write fails, memory still matches the
//! store and the error goes back to the caller.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use todobot_core::{Batch, BatchState, Clock, Message, TodobotError};

use crate::policy::BatchPolicy;

/// Result of adding one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddOutcome {
    pub batch_id: String,
    /// The message filled the batch and it was closed immediately.
    pub flushed: bool,
    /// The batch as persisted after this message.
    pub batch: Batch,
}

struct OpenBatch {
    batch: Batch,
    deadline: Instant,
}

#[derive(Default)]
struct Slot {
    open: Option<OpenBatch>,
}

/// Owns the OPEN batch of every conversation.
pub struct BatchAccumulator {
    policy: BatchPolicy,
    clock: Clock,
    slots: DashMap<String, Arc<Mutex<Slot>>>,
    /// Slots holding an OPEN batch. Updated under the slot's lock.
    open_count: AtomicUsize,
}

impl BatchAccumulator {
    pub fn new(policy: BatchPolicy, clock: Clock) -> Self {
        Self {
            policy,
            clock,
            slots: DashMap::new(),
            open_count: AtomicUsize::new(0),
        }
    }

    pub fn policy(&self) -> &BatchPolicy {
        &self.policy
    }

    fn slot(&self, conversation_id: &str) -> Arc<Mutex<Slot>> {
        if let Some(slot) = self.slots.get(conversation_id) {
            return Arc::clone(slot.value());
        }
        Arc::clone(
            self.slots
                .entry(conversation_id.to_string())
                .or_default()
                .value(),
        )
    }

    /// Append `message` to its conversation's OPEN batch, opening one if
    /// needed, and push the idle deadline out by the idle window.
    ///
    /// `persist` receives the batch as it will look after the append (state
    /// CLOSED if the message filled it) and must make it durable.
    pub async fn add<F, Fut>(&self, message: &Message, persist: F) -> Result<AddOutcome, TodobotError>
    where
        F: FnOnce(Batch) -> Fut,
        Fut: Future<Output = Result<(), TodobotError>>,
    {
        let slot = self.slot(&message.conversation_id);
        let mut slot = slot.lock().await;

        let now = self.clock.now();
        let mut candidate = match &slot.open {
            Some(open) => open.batch.clone(),
            None => Batch::open(
                uuid::Uuid::new_v4().to_string(),
                message.conversation_id.clone(),
                now,
            ),
        };
        candidate.message_ids.push(message.id.clone());

        let flushed = candidate.message_ids.len() >= self.policy.max_batch_size;
        if flushed {
            candidate.state = BatchState::Closed;
            candidate.next_attempt_at = now;
        }

        persist(candidate.clone()).await?;

        let was_open = slot.open.is_some();
        match (was_open, flushed) {
            (false, false) => {
                self.open_count.fetch_add(1, Ordering::SeqCst);
            }
            (true, true) => {
                self.open_count.fetch_sub(1, Ordering::SeqCst);
            }
            _ => {}
        }
        slot.open = if flushed {
            None
        } else {
            Some(OpenBatch {
                batch: candidate.clone(),
                deadline: Instant::now() + self.policy.idle_window,
            })
        };

        debug!(
            conversation_id = %message.conversation_id,
            batch_id = %candidate.batch_id,
            size = candidate.message_ids.len(),
            flushed,
            "message accumulated"
        );

        Ok(AddOutcome {
            batch_id: candidate.batch_id.clone(),
            flushed,
            batch: candidate,
        })
    }

    /// Close every OPEN batch whose idle deadline is at or before `now`.
    ///
    /// Returns the ids of the batches that were closed and persisted. A batch
    /// whose close could not be persisted stays OPEN and is tried again on
    /// the next tick.
    pub async fn tick_expired<F, Fut>(&self, now: Instant, persist: F) -> Vec<String>
    where
        F: FnMut(Batch) -> Fut,
        Fut: Future<Output = Result<(), TodobotError>>,
    {
        let closed = self.close_where(|open| open.deadline <= now, persist).await;
        self.prune_idle();
        closed
    }

    /// Close every OPEN batch regardless of its deadline.
    pub async fn flush_all<F, Fut>(&self, persist: F) -> Vec<String>
    where
        F: FnMut(Batch) -> Fut,
        Fut: Future<Output = Result<(), TodobotError>>,
    {
        let closed = self.close_where(|_| true, persist).await;
        self.prune_idle();
        closed
    }

    /// Number of conversations with an OPEN batch. A slot busy with an
    /// `add` is counted by its state before that call.
    pub fn open_batches(&self) -> usize {
        self.open_count.load(Ordering::SeqCst)
    }

    async fn close_where<P, F, Fut>(&self, should_close: P, mut persist: F) -> Vec<String>
    where
        P: Fn(&OpenBatch) -> bool,
        F: FnMut(Batch) -> Fut,
        Fut: Future<Output = Result<(), TodobotError>>,
    {
        // Snapshot so no DashMap shard lock is held across an await.
        let slots: Vec<Arc<Mutex<Slot>>> = self
            .slots
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut closed = Vec::new();
        for slot in slots {
            let mut slot = slot.lock().await;
            let Some(open) = slot.open.as_ref() else {
                continue;
            };
            if !should_close(open) {
                continue;
            }

            let mut batch = open.batch.clone();
            batch.state = BatchState::Closed;
            batch.next_attempt_at = self.clock.now();
            let batch_id = batch.batch_id.clone();

            match persist(batch).await {
                Ok(()) => {
                    slot.open = None;
                    self.open_count.fetch_sub(1, Ordering::SeqCst);
                    debug!(batch_id = %batch_id, "batch closed");
                    closed.push(batch_id);
                }
                Err(e) => {
                    warn!(batch_id = %batch_id, error = %e, "failed to persist batch close");
                }
            }
        }
        closed
    }

    /// Drop slots that hold no batch and that nobody else is using.
    fn prune_idle(&self) {
        self.slots.retain(|_, slot| {
            Arc::strong_count(slot) > 1
                || slot
                    .try_lock()
                    .map(|slot| slot.open.is_some())
                    .unwrap_or(true)
        });
    }

    #[cfg(test)]
    fn tracked_conversations(&self) -> usize {
        self.slots.len()
    }
}
