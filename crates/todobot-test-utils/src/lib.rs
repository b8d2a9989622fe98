// SPDX-FileCopyrightText: 2026 Todobot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for todobot integration tests.
//!
//! Provides [`MockExtractor`] and [`MockSink`] for deterministic collaborator
//! behavior, and [`TestHarness`] which runs a real [`QueueManager`] over a
//! temporary SQLite database and can restart it against the same file.
//!
//! [`QueueManager`]: todobot_queue::QueueManager

pub mod harness;
pub mod mock_extractor;
pub mod mock_sink;

pub use harness::{TestHarness, eventually};
pub use mock_extractor::{ExtractReply, MockExtractor};
pub use mock_sink::{AppendReply, MockSink, SinkRow};
