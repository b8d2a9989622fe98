// SPDX-FileCopyrightText: 2026 Todobot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message batching and durable delivery queue.
//!
//! Inbound chat messages are persisted, grouped per conversation into
//! batches by [`BatchAccumulator`], and delivered by a worker pool that runs
//! each closed batch through [`DeliveryPipeline`] with retry and backoff.
//! [`QueueManager`] owns the lifecycle: startup recovery, intake, shutdown.

pub mod accumulator;
pub mod admin;
pub mod manager;
pub mod pipeline;
pub mod policy;

pub use accumulator::{AddOutcome, BatchAccumulator};
pub use admin::{pending_summary, requeue_dead_letter};
pub use manager::{QueueManager, QueueManagerBuilder, QueueStats, RecoveryReport};
pub use pipeline::DeliveryPipeline;
pub use policy::{BatchPolicy, QueueSettings, RetryPolicy};
