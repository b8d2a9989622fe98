// SPDX-FileCopyrightText: 2026 Todobot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Collaborator traits the delivery queue is written against.
//!
//! All traits use `#[async_trait]` so they can be held as trait objects.

pub mod extractor;
pub mod sink;
pub mod store;

pub use extractor::Extractor;
pub use sink::TaskSink;
pub use store::BatchStore;
