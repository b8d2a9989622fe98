// SPDX-FileCopyrightText: 2026 Todobot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Queue manager: ties the accumulator, the store and the delivery pipeline
//! together and drives every batch through its state machine.
//!
//! ```text
//! OPEN --idle/size--> CLOSED --claim--> PROCESSING --ok--> DELIVERED (row deleted)
//!                       ^                   |
//!                       +---retryable-------+--permanent/exhausted--> FAILED
//! ```
//!
//! Workers pull batch ids from a bounded channel. A batch id is only ever
//! processed by one worker at a time: the in-flight set rejects a second
//! claim, and a claimed batch whose stored state is not CLOSED is skipped.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashSet;
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use todobot_core::{
    Batch, BatchState, BatchStore, Clock, DeliveryResult, Extractor, InboundMessage, Message,
    TaskSink, TodobotError,
};

use crate::accumulator::{AddOutcome, BatchAccumulator};
use crate::admin;
use crate::pipeline::DeliveryPipeline;
use crate::policy::QueueSettings;

/// Attempts for a store write made by a worker before giving up and leaving
/// the batch to restart recovery.
const STORE_WRITE_ATTEMPTS: u32 = 3;
const STORE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// What startup recovery found in the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// OPEN batches left by a crash, closed and dispatched.
    pub reopened: usize,
    /// CLOSED batches dispatched at their scheduled time.
    pub resumed: usize,
    /// PROCESSING batches interrupted mid-delivery and rescheduled.
    pub interrupted: usize,
    /// PROCESSING batches that already had a receipt and were finalized.
    pub finalized: usize,
    /// FAILED batches left as dead letters.
    pub dead_letters: usize,
}

impl RecoveryReport {
    pub fn total(&self) -> usize {
        self.reopened + self.resumed + self.interrupted + self.finalized + self.dead_letters
    }
}

/// Counters since startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub delivered: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub open_batches: usize,
    pub in_flight: usize,
}

#[derive(Default)]
struct Counters {
    delivered: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
}

/// Removes a batch id from the in-flight set when dropped.
struct InFlight<'a> {
    set: &'a DashSet<String>,
    batch_id: String,
}

impl<'a> InFlight<'a> {
    fn claim(set: &'a DashSet<String>, batch_id: &str) -> Option<Self> {
        set.insert(batch_id.to_string()).then(|| Self {
            set,
            batch_id: batch_id.to_string(),
        })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.batch_id);
    }
}

struct Inner {
    store: Arc<dyn BatchStore>,
    accumulator: BatchAccumulator,
    pipeline: DeliveryPipeline,
    settings: QueueSettings,
    clock: Clock,
    accepting: AtomicBool,
    stopping: AtomicBool,
    in_flight: DashSet<String>,
    work_tx: mpsc::Sender<String>,
    work_rx: Mutex<mpsc::Receiver<String>>,
    cancel: CancellationToken,
    tasks: TaskTracker,
    counters: Counters,
}

/// Handle to a running delivery queue. Cheap to clone.
#[derive(Clone)]
pub struct QueueManager {
    inner: Arc<Inner>,
    recovery: RecoveryReport,
}

/// Collects the collaborators and settings for a [`QueueManager`].
pub struct QueueManagerBuilder {
    store: Arc<dyn BatchStore>,
    extractor: Arc<dyn Extractor>,
    sink: Arc<dyn TaskSink>,
    settings: QueueSettings,
    clock: Option<Clock>,
}

impl QueueManagerBuilder {
    pub fn settings(mut self, settings: QueueSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Clock used for persisted timestamps. Defaults to [`Clock::new`].
    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Initialize the store, recover unfinished batches, then start the
    /// workers and the idle ticker. Traffic is accepted only once recovery
    /// has completed.
    pub async fn start(self) -> Result<QueueManager, TodobotError> {
        validate(&self.settings)?;

        self.store.initialize().await?;

        let clock = self.clock.unwrap_or_default();
        let (work_tx, work_rx) = mpsc::channel(self.settings.work_queue_capacity);
        let inner = Arc::new(Inner {
            accumulator: BatchAccumulator::new(self.settings.batch, clock),
            pipeline: DeliveryPipeline::new(
                Arc::clone(&self.store),
                self.extractor,
                self.sink,
                self.settings.attempt_timeout,
            ),
            store: self.store,
            settings: self.settings,
            clock,
            accepting: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            in_flight: DashSet::new(),
            work_tx,
            work_rx: Mutex::new(work_rx),
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
            counters: Counters::default(),
        });

        let recovery = inner.recover().await?;

        for worker in 0..inner.settings.workers {
            inner.tasks.spawn(Arc::clone(&inner).worker_loop(worker));
        }
        inner.tasks.spawn(Arc::clone(&inner).ticker_loop());

        inner.accepting.store(true, Ordering::SeqCst);
        info!(
            workers = inner.settings.workers,
            reopened = recovery.reopened,
            resumed = recovery.resumed,
            interrupted = recovery.interrupted,
            finalized = recovery.finalized,
            dead_letters = recovery.dead_letters,
            "delivery queue started"
        );

        Ok(QueueManager { inner, recovery })
    }
}

fn validate(settings: &QueueSettings) -> Result<(), TodobotError> {
    let problem = if settings.workers == 0 {
        Some("workers must be at least 1")
    } else if settings.work_queue_capacity == 0 {
        Some("work_queue_capacity must be at least 1")
    } else if settings.batch.max_batch_size == 0 {
        Some("max_batch_size must be at least 1")
    } else if settings.batch.poll_interval.is_zero() {
        Some("poll_interval must be non-zero")
    } else if settings.retry.max_attempts == 0 {
        Some("max_attempts must be at least 1")
    } else if settings.retry.base.is_zero() || settings.retry.base > settings.retry.max {
        Some("backoff base must be non-zero and not exceed the backoff cap")
    } else {
        None
    };
    match problem {
        Some(message) => Err(TodobotError::Config(message.to_string())),
        None => Ok(()),
    }
}

impl QueueManager {
    pub fn builder(
        store: Arc<dyn BatchStore>,
        extractor: Arc<dyn Extractor>,
        sink: Arc<dyn TaskSink>,
    ) -> QueueManagerBuilder {
        QueueManagerBuilder {
            store,
            extractor,
            sink,
            settings: QueueSettings::default(),
            clock: None,
        }
    }

    /// Persist an inbound message and add it to its conversation's OPEN
    /// batch. Returns once the message is durable.
    pub async fn add(&self, inbound: InboundMessage) -> Result<AddOutcome, TodobotError> {
        if !self.is_accepting() {
            return Err(TodobotError::ShuttingDown);
        }

        let message = Message {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: inbound.conversation_id,
            text: inbound.text,
            received_at: inbound.received_at,
        };

        let store = Arc::clone(&self.inner.store);
        let persisted = message.clone();
        let outcome = self
            .inner
            .accumulator
            .add(&message, move |batch| async move {
                store.append_to_batch(&persisted, &batch).await
            })
            .await?;

        if outcome.flushed {
            info!(
                batch_id = %outcome.batch_id,
                size = outcome.batch.message_ids.len(),
                "batch full, closed"
            );
            self.inner.dispatch(outcome.batch_id.clone());
        }
        Ok(outcome)
    }

    /// Whether new messages are accepted. False before startup recovery
    /// finishes and after shutdown begins.
    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::SeqCst)
    }

    pub fn recovery_report(&self) -> RecoveryReport {
        self.recovery
    }

    pub fn stats(&self) -> QueueStats {
        let counters = &self.inner.counters;
        QueueStats {
            delivered: counters.delivered.load(Ordering::Relaxed),
            retried: counters.retried.load(Ordering::Relaxed),
            dead_lettered: counters.dead_lettered.load(Ordering::Relaxed),
            open_batches: self.inner.accumulator.open_batches(),
            in_flight: self.inner.in_flight.len(),
        }
    }

    /// FAILED batches, oldest first.
    pub async fn dead_letters(&self) -> Result<Vec<Batch>, TodobotError> {
        self.inner.store.list_dead_letters().await
    }

    /// Reset a dead letter to CLOSED with a fresh attempt budget and
    /// dispatch it.
    pub async fn requeue(&self, batch_id: &str) -> Result<Batch, TodobotError> {
        if self.inner.stopping.load(Ordering::SeqCst) {
            return Err(TodobotError::ShuttingDown);
        }
        let batch =
            admin::requeue_dead_letter(self.inner.store.as_ref(), &self.inner.clock, batch_id)
                .await?;
        self.inner.dispatch(batch.batch_id.clone());
        Ok(batch)
    }

    /// Stop accepting messages, persist every OPEN batch as CLOSED, let
    /// workers finish their current batch, then close the store.
    ///
    /// Safe to call more than once; later calls return immediately.
    pub async fn shutdown(&self) -> Result<(), TodobotError> {
        let inner = &self.inner;
        if inner.stopping.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        inner.accepting.store(false, Ordering::SeqCst);
        info!("delivery queue shutting down");

        let flushed = inner
            .accumulator
            .flush_all(|batch| {
                let store = Arc::clone(&inner.store);
                async move { store.put_batch(&batch).await }
            })
            .await;
        let unflushed = inner.accumulator.open_batches();
        if unflushed > 0 {
            warn!(
                unflushed,
                "open batches could not be closed in the store, restart recovery will reopen them"
            );
        }

        inner.cancel.cancel();
        inner.tasks.close();
        inner.tasks.wait().await;

        inner.store.close().await?;
        info!(flushed = flushed.len(), unflushed, "delivery queue stopped");
        Ok(())
    }
}

impl Inner {
    /// Reload every unfinished batch and schedule it. Runs once, before
    /// workers start and before traffic is accepted.
    async fn recover(self: &Arc<Self>) -> Result<RecoveryReport, TodobotError> {
        let mut report = RecoveryReport::default();

        for mut batch in self.store.list_pending().await? {
            match batch.state {
                BatchState::Open => {
                    batch.state = BatchState::Closed;
                    batch.next_attempt_at = self.clock.now();
                    self.store.put_batch(&batch).await?;
                    report.reopened += 1;
                    self.dispatch(batch.batch_id);
                }
                BatchState::Closed => {
                    report.resumed += 1;
                    let delay = self.clock.until(batch.next_attempt_at);
                    self.schedule(batch.batch_id, delay);
                }
                BatchState::Processing => {
                    if self.store.delivery_receipt(&batch.batch_id).await?.is_some() {
                        self.store.finalize_delivered(&batch.batch_id).await?;
                        report.finalized += 1;
                        info!(batch_id = %batch.batch_id, "interrupted batch already delivered, finalized");
                        continue;
                    }

                    let interrupted = "interrupted by restart during delivery".to_string();
                    if self.settings.retry.is_exhausted(batch.attempt_count) {
                        batch.state = BatchState::Failed;
                        batch.last_error = Some(interrupted);
                        self.store.put_batch(&batch).await?;
                        report.dead_letters += 1;
                        warn!(
                            batch_id = %batch.batch_id,
                            attempts = batch.attempt_count,
                            "interrupted batch out of attempts, dead-lettered"
                        );
                        continue;
                    }

                    let delay = self.settings.retry.delay_for_attempt(batch.attempt_count);
                    batch.state = BatchState::Closed;
                    batch.next_attempt_at = self.clock.after(delay);
                    batch.last_error = Some(interrupted);
                    self.store.put_batch(&batch).await?;
                    report.interrupted += 1;
                    self.schedule(batch.batch_id, delay);
                }
                BatchState::Failed => {
                    report.dead_letters += 1;
                    warn!(
                        batch_id = %batch.batch_id,
                        conversation_id = %batch.conversation_id,
                        attempts = batch.attempt_count,
                        last_error = batch.last_error.as_deref().unwrap_or(""),
                        "dead letter awaiting operator"
                    );
                }
                BatchState::Delivered => {
                    // Never stored; tolerate a foreign row by finalizing it.
                    self.store.finalize_delivered(&batch.batch_id).await?;
                }
            }
        }

        Ok(report)
    }

    /// Queue a batch id for the workers without blocking the caller.
    fn dispatch(self: &Arc<Self>, batch_id: String) {
        match self.work_tx.try_send(batch_id) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(batch_id)) => {
                debug!(batch_id = %batch_id, "work queue full, handing off send");
                let inner = Arc::clone(self);
                self.tasks.spawn(async move {
                    tokio::select! {
                        biased;
                        _ = inner.cancel.cancelled() => {}
                        _ = inner.work_tx.send(batch_id) => {}
                    }
                });
            }
            Err(mpsc::error::TrySendError::Closed(batch_id)) => {
                debug!(batch_id = %batch_id, "work queue closed, batch left for recovery");
            }
        }
    }

    /// Dispatch a batch id after `delay`, unless shutdown starts first.
    fn schedule(self: &Arc<Self>, batch_id: String, delay: Duration) {
        if delay.is_zero() {
            self.dispatch(batch_id);
            return;
        }
        let inner = Arc::clone(self);
        self.tasks.spawn(async move {
            tokio::select! {
                biased;
                _ = inner.cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => inner.dispatch(batch_id),
            }
        });
    }

    async fn worker_loop(self: Arc<Self>, worker: usize) {
        debug!(worker, "worker started");
        loop {
            let next = {
                let mut rx = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break,
                    rx = self.work_rx.lock() => rx,
                };
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => None,
                    batch_id = rx.recv() => batch_id,
                }
            };
            let Some(batch_id) = next else {
                break;
            };
            self.handle(batch_id).await;
        }
        debug!(worker, "worker stopped");
    }

    async fn ticker_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.settings.batch.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            let closed = self
                .accumulator
                .tick_expired(Instant::now(), |batch| {
                    let store = Arc::clone(&self.store);
                    async move { store.put_batch(&batch).await }
                })
                .await;
            for batch_id in closed {
                info!(batch_id = %batch_id, "idle window elapsed, batch closed");
                self.dispatch(batch_id);
            }
        }
    }

    /// Claim, process and settle one batch.
    async fn handle(self: &Arc<Self>, batch_id: String) {
        let redispatch = {
            let Some(_claim) = InFlight::claim(&self.in_flight, &batch_id) else {
                debug!(batch_id = %batch_id, "batch already in flight, dropping duplicate");
                return;
            };
            self.process_claimed(&batch_id).await
        };
        // Scheduled after the claim is released so the retry can claim it.
        if let Some(delay) = redispatch {
            self.schedule(batch_id, delay);
        }
    }

    /// Returns the delay after which the batch must be dispatched again.
    async fn process_claimed(&self, batch_id: &str) -> Option<Duration> {
        let mut batch = match self.store.get_batch(batch_id).await {
            Ok(Some(batch)) => batch,
            Ok(None) => {
                debug!(batch_id, "batch no longer stored, skipping");
                return None;
            }
            Err(e) => {
                warn!(batch_id, error = %e, "failed to load batch, retrying later");
                return Some(self.settings.retry.ceiling(1));
            }
        };
        if batch.state != BatchState::Closed {
            debug!(batch_id, state = %batch.state, "batch not claimable, skipping");
            return None;
        }

        batch.state = BatchState::Processing;
        batch.attempt_count += 1;
        if let Err(e) = self.write_with_retry(|| self.store.put_batch(&batch)).await {
            error!(batch_id, error = %e, "failed to claim batch, retrying later");
            return Some(self.settings.retry.ceiling(1));
        }

        debug!(batch_id, attempt = batch.attempt_count, "processing batch");
        let result = self.pipeline.process(&batch).await;
        self.settle(batch, result).await
    }

    /// Apply a pipeline result to the batch's stored state.
    async fn settle(&self, mut batch: Batch, result: DeliveryResult) -> Option<Duration> {
        let batch_id = batch.batch_id.clone();

        let Some(err) = result.error else {
            if let Err(e) = self
                .write_with_retry(|| self.store.finalize_delivered(&batch_id))
                .await
            {
                // The receipt is on file; recovery finalizes without a resend.
                error!(batch_id = %batch_id, error = %e, "failed to finalize delivered batch");
            }
            self.counters.delivered.fetch_add(1, Ordering::Relaxed);
            info!(
                batch_id = %batch_id,
                items = result.items.len(),
                attempts = batch.attempt_count,
                replayed = result.replayed,
                "batch delivered"
            );
            return None;
        };

        batch.last_error = Some(err.to_string());
        if err.is_retryable() && !self.settings.retry.is_exhausted(batch.attempt_count) {
            let delay = self.settings.retry.delay_for_attempt(batch.attempt_count);
            batch.state = BatchState::Closed;
            batch.next_attempt_at = self.clock.after(delay);
            if let Err(e) = self.write_with_retry(|| self.store.put_batch(&batch)).await {
                error!(batch_id = %batch_id, error = %e, "failed to persist retry, left for recovery");
                return None;
            }
            self.counters.retried.fetch_add(1, Ordering::Relaxed);
            warn!(
                batch_id = %batch_id,
                attempt = batch.attempt_count,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "delivery attempt failed, will retry"
            );
            return Some(delay);
        }

        batch.state = BatchState::Failed;
        if let Err(e) = self.write_with_retry(|| self.store.put_batch(&batch)).await {
            error!(batch_id = %batch_id, error = %e, "failed to persist dead letter, left for recovery");
            return None;
        }
        self.counters.dead_lettered.fetch_add(1, Ordering::Relaxed);
        warn!(
            batch_id = %batch_id,
            attempts = batch.attempt_count,
            retryable = err.is_retryable(),
            error = %err,
            "batch dead-lettered"
        );
        None
    }

    async fn write_with_retry<F, Fut>(&self, mut op: F) -> Result<(), TodobotError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), TodobotError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < STORE_WRITE_ATTEMPTS => {
                    warn!(attempt, error = %e, "store write failed, retrying");
                    tokio::time::sleep(STORE_RETRY_DELAY * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
