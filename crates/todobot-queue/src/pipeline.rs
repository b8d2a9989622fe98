// SPDX-FileCopyrightText: 2026 Todobot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Extraction-then-delivery for one closed batch.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use todobot_core::{
    Batch, BatchStore, DeliveryResult, Extractor, Stage, TaskItem, TaskSink, TodobotError,
};

/// Runs a batch through the extractor and the sink.
pub struct DeliveryPipeline {
    store: Arc<dyn BatchStore>,
    extractor: Arc<dyn Extractor>,
    sink: Arc<dyn TaskSink>,
    attempt_timeout: Duration,
}

impl DeliveryPipeline {
    pub fn new(
        store: Arc<dyn BatchStore>,
        extractor: Arc<dyn Extractor>,
        sink: Arc<dyn TaskSink>,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            store,
            extractor,
            sink,
            attempt_timeout,
        }
    }

    /// Process one batch. Never returns an error directly: failures are
    /// carried in [`DeliveryResult::error`] for the state machine to classify.
    ///
    /// A batch that already has a delivery receipt is reported as a replayed
    /// success without calling the extractor or the sink.
    pub async fn process(&self, batch: &Batch) -> DeliveryResult {
        match self.store.delivery_receipt(&batch.batch_id).await {
            Ok(Some(receipt)) => {
                info!(
                    batch_id = %batch.batch_id,
                    items = receipt.item_count,
                    "batch already delivered, skipping sink"
                );
                return DeliveryResult::replayed(&batch.batch_id);
            }
            Ok(None) => {}
            Err(e) => return DeliveryResult::failed(&batch.batch_id, e),
        }

        match self.run(batch).await {
            Ok(items) => DeliveryResult::delivered(&batch.batch_id, items),
            Err(e) => DeliveryResult::failed(&batch.batch_id, e),
        }
    }

    async fn run(&self, batch: &Batch) -> Result<Vec<TaskItem>, TodobotError> {
        let text = self.collect_text(batch).await?;

        let items = self
            .with_deadline(self.extractor.extract(&text))
            .await?;
        debug!(
            batch_id = %batch.batch_id,
            extractor = self.extractor.name(),
            items = items.len(),
            "extraction complete"
        );

        if items.is_empty() {
            debug!(batch_id = %batch.batch_id, "no tasks extracted, nothing to append");
        } else {
            self.with_deadline(self.sink.append(&batch.batch_id, &items))
                .await?;
            debug!(
                batch_id = %batch.batch_id,
                sink = self.sink.name(),
                items = items.len(),
                "items appended"
            );
        }

        self.store
            .record_delivery(&batch.batch_id, items.len())
            .await?;
        Ok(items)
    }

    /// The batch's message texts in batch order, joined by newlines.
    ///
    /// Messages missing from the store are skipped; a batch with no text left
    /// cannot succeed on retry and fails permanently.
    pub async fn collect_text(&self, batch: &Batch) -> Result<String, TodobotError> {
        let mut texts = Vec::with_capacity(batch.message_ids.len());
        for id in &batch.message_ids {
            match self.store.get_message(id).await? {
                Some(message) => texts.push(message.text),
                None => warn!(batch_id = %batch.batch_id, message_id = %id, "batch references missing message"),
            }
        }

        if texts.iter().all(|t| t.trim().is_empty()) {
            return Err(TodobotError::permanent(
                Stage::Extraction,
                format!("batch {} has no message text", batch.batch_id),
            ));
        }
        Ok(texts.join("\n"))
    }

    async fn with_deadline<T>(
        &self,
        call: impl Future<Output = Result<T, TodobotError>>,
    ) -> Result<T, TodobotError> {
        tokio::time::timeout(self.attempt_timeout, call)
            .await
            .map_err(|_| TodobotError::Timeout {
                duration: self.attempt_timeout,
            })?
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;
    use todobot_core::{DeliveryReceipt, Message};
    use tracing_test::traced_test;

    use super::*;

    /// Minimal in-memory store; only the calls the pipeline makes are backed.
    #[derive(Default)]
    struct MemStore {
        messages: Mutex<HashMap<String, Message>>,
        receipts: Mutex<HashMap<String, usize>>,
    }

    #[async_trait]
    impl BatchStore for MemStore {
        async fn initialize(&self) -> Result<(), TodobotError> {
            Ok(())
        }
        async fn close(&self) -> Result<(), TodobotError> {
            Ok(())
        }
        async fn put_message(&self, message: &Message) -> Result<(), TodobotError> {
            self.messages
                .lock()
                .unwrap()
                .insert(message.id.clone(), message.clone());
            Ok(())
        }
        async fn get_message(&self, id: &str) -> Result<Option<Message>, TodobotError> {
            Ok(self.messages.lock().unwrap().get(id).cloned())
        }
        async fn delete_message(&self, _id: &str) -> Result<(), TodobotError> {
            Ok(())
        }
        async fn put_batch(&self, _batch: &Batch) -> Result<(), TodobotError> {
            Ok(())
        }
        async fn get_batch(&self, _id: &str) -> Result<Option<Batch>, TodobotError> {
            Ok(None)
        }
        async fn delete_batch(&self, _id: &str) -> Result<(), TodobotError> {
            Ok(())
        }
        async fn append_to_batch(&self, message: &Message, _batch: &Batch) -> Result<(), TodobotError> {
            self.put_message(message).await
        }
        async fn list_pending(&self) -> Result<Vec<Batch>, TodobotError> {
            Ok(Vec::new())
        }
        async fn list_dead_letters(&self) -> Result<Vec<Batch>, TodobotError> {
            Ok(Vec::new())
        }
        async fn record_delivery(&self, batch_id: &str, item_count: usize) -> Result<(), TodobotError> {
            self.receipts
                .lock()
                .unwrap()
                .entry(batch_id.to_string())
                .or_insert(item_count);
            Ok(())
        }
        async fn delivery_receipt(&self, batch_id: &str) -> Result<Option<DeliveryReceipt>, TodobotError> {
            Ok(self.receipts.lock().unwrap().get(batch_id).map(|count| DeliveryReceipt {
                batch_id: batch_id.to_string(),
                item_count: *count,
                delivered_at: Utc::now(),
            }))
        }
        async fn finalize_delivered(&self, _batch_id: &str) -> Result<(), TodobotError> {
            Ok(())
        }
    }

    /// One task per non-empty line.
    struct LineExtractor;

    #[async_trait]
    impl Extractor for LineExtractor {
        fn name(&self) -> &str {
            "lines"
        }
        async fn extract(&self, text: &str) -> Result<Vec<TaskItem>, TodobotError> {
            Ok(text
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(TaskItem::titled)
                .collect())
        }
    }

    struct FailingExtractor {
        retryable: bool,
    }

    #[async_trait]
    impl Extractor for FailingExtractor {
        fn name(&self) -> &str {
            "failing"
        }
        async fn extract(&self, _text: &str) -> Result<Vec<TaskItem>, TodobotError> {
            if self.retryable {
                Err(TodobotError::transient(Stage::Extraction, "503"))
            } else {
                Err(TodobotError::permanent(Stage::Extraction, "refused"))
            }
        }
    }

    struct SlowExtractor;

    #[async_trait]
    impl Extractor for SlowExtractor {
        fn name(&self) -> &str {
            "slow"
        }
        async fn extract(&self, _text: &str) -> Result<Vec<TaskItem>, TodobotError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct CountingSink {
        calls: AtomicUsize,
        rows: Mutex<Vec<(String, TaskItem)>>,
    }

    #[async_trait]
    impl TaskSink for CountingSink {
        fn name(&self) -> &str {
            "counting"
        }
        async fn append(&self, batch_id: &str, items: &[TaskItem]) -> Result<(), TodobotError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut rows = self.rows.lock().unwrap();
            rows.extend(items.iter().map(|i| (batch_id.to_string(), i.clone())));
            Ok(())
        }
    }

    async fn seeded(texts: &[&str]) -> (Arc<MemStore>, Batch) {
        let store = Arc::new(MemStore::default());
        let mut batch = Batch::open("b1", "c1", Utc::now());
        for (i, text) in texts.iter().enumerate() {
            let msg = Message {
                id: format!("m{i}"),
                conversation_id: "c1".into(),
                text: text.to_string(),
                received_at: Utc::now(),
            };
            store.put_message(&msg).await.unwrap();
            batch.message_ids.push(msg.id);
        }
        (store, batch)
    }

    fn pipeline(
        store: Arc<MemStore>,
        extractor: Arc<dyn Extractor>,
        sink: Arc<CountingSink>,
    ) -> DeliveryPipeline {
        DeliveryPipeline::new(store, extractor, sink, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn extracts_and_appends_in_message_order() {
        let (store, batch) = seeded(&["buy milk", "call mom"]).await;
        let sink = Arc::new(CountingSink::default());
        let p = pipeline(store.clone(), Arc::new(LineExtractor), sink.clone());

        let result = p.process(&batch).await;

        assert!(result.is_success());
        assert!(!result.replayed);
        let titles: Vec<String> = result.items.iter().map(|i| i.title.clone()).collect();
        assert_eq!(titles, vec!["buy milk", "call mom"]);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
        assert!(store.delivery_receipt("b1").await.unwrap().is_some());
    }

    #[tokio::test]
    #[traced_test]
    async fn receipt_short_circuits_sink() {
        let (store, batch) = seeded(&["buy milk"]).await;
        store.record_delivery("b1", 1).await.unwrap();
        let sink = Arc::new(CountingSink::default());
        let p = pipeline(store, Arc::new(LineExtractor), sink.clone());

        let result = p.process(&batch).await;

        assert!(result.is_success());
        assert!(result.replayed);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 0);
        assert!(logs_contain("batch already delivered, skipping sink"));
    }

    #[tokio::test]
    async fn empty_extraction_skips_sink_but_records_receipt() {
        let (store, batch) = seeded(&["thanks!"]).await;

        struct Nothing;
        #[async_trait]
        impl Extractor for Nothing {
            fn name(&self) -> &str {
                "nothing"
            }
            async fn extract(&self, _text: &str) -> Result<Vec<TaskItem>, TodobotError> {
                Ok(Vec::new())
            }
        }

        let sink = Arc::new(CountingSink::default());
        let p = pipeline(store.clone(), Arc::new(Nothing), sink.clone());
        let result = p.process(&batch).await;

        assert!(result.is_success());
        assert!(result.items.is_empty());
        assert_eq!(sink.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            store.delivery_receipt("b1").await.unwrap().unwrap().item_count,
            0
        );
    }

    #[tokio::test]
    async fn missing_messages_are_skipped() {
        let (store, mut batch) = seeded(&["buy milk"]).await;
        batch.message_ids.insert(0, "ghost".into());
        let sink = Arc::new(CountingSink::default());
        let p = pipeline(store, Arc::new(LineExtractor), sink);

        assert_eq!(p.collect_text(&batch).await.unwrap(), "buy milk");
    }

    #[tokio::test]
    async fn batch_without_text_fails_permanently() {
        let (store, mut batch) = seeded(&[]).await;
        batch.message_ids.push("ghost".into());
        let sink = Arc::new(CountingSink::default());
        let p = pipeline(store, Arc::new(LineExtractor), sink);

        let result = p.process(&batch).await;
        let err = result.error.expect("should fail");
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn extractor_errors_keep_their_class() {
        let (store, batch) = seeded(&["buy milk"]).await;
        let sink = Arc::new(CountingSink::default());

        let transient = pipeline(
            store.clone(),
            Arc::new(FailingExtractor { retryable: true }),
            sink.clone(),
        )
        .process(&batch)
        .await;
        assert!(transient.error.unwrap().is_retryable());

        let permanent = pipeline(
            store.clone(),
            Arc::new(FailingExtractor { retryable: false }),
            sink.clone(),
        )
        .process(&batch)
        .await;
        assert!(!permanent.error.unwrap().is_retryable());
        assert_eq!(sink.calls.load(Ordering::SeqCst), 0);
        assert!(store.delivery_receipt("b1").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_extractor_times_out() {
        let (store, batch) = seeded(&["buy milk"]).await;
        let sink = Arc::new(CountingSink::default());
        let p = pipeline(store, Arc::new(SlowExtractor), sink);

        let result = p.process(&batch).await;
        let err = result.error.expect("should time out");
        assert!(matches!(err, TodobotError::Timeout { duration } if duration == Duration::from_secs(5)));
        assert!(err.is_retryable());
    }
}
