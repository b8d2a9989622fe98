// SPDX-FileCopyrightText: 2026 Todobot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for todobot.
//!
//! Holds the record types shared by the queue, the storage layer and the
//! adapters, the [`TodobotError`] taxonomy, the [`Clock`] used for every
//! persisted timestamp, and the collaborator traits ([`Extractor`],
//! [`TaskSink`], [`BatchStore`]) the delivery queue is written against.

pub mod clock;
pub mod error;
pub mod traits;
pub mod types;

pub use clock::Clock;
pub use error::{Stage, TodobotError, is_transient_status};
pub use traits::{BatchStore, Extractor, TaskSink};
pub use types::{
    Batch, BatchState, DeliveryReceipt, DeliveryResult, InboundMessage, Message, TaskItem,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn todobot_error_variants_construct() {
        let _config = TodobotError::Config("test".into());
        let _storage = TodobotError::Storage {
            source: Box::new(std::io::Error::other("test")),
        };
        let _transient = TodobotError::transient(Stage::Extraction, "rate limited");
        let _permanent = TodobotError::permanent(Stage::Delivery, "unauthorized");
        let _timeout = TodobotError::Timeout {
            duration: std::time::Duration::from_secs(30),
        };
        let _not_found = TodobotError::NotFound {
            kind: "batch",
            id: "b1".into(),
        };
        let _state = TodobotError::InvalidState {
            id: "b1".into(),
            state: BatchState::Open,
        };
        let _shutdown = TodobotError::ShuttingDown;
        let _channel = TodobotError::Channel {
            message: "test".into(),
            source: None,
        };
        let _internal = TodobotError::Internal("test".into());
    }

    #[test]
    fn all_traits_are_exported() {
        fn _assert_extractor<T: Extractor>() {}
        fn _assert_sink<T: TaskSink>() {}
        fn _assert_store<T: BatchStore>() {}
    }
}
