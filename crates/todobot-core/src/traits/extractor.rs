// SPDX-FileCopyrightText: 2026 Todobot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Extraction collaborator: free text in, structured tasks out.

use async_trait::async_trait;

use crate::error::TodobotError;
use crate::types::TaskItem;

/// Turns the concatenated text of a batch into task items.
///
/// Implementations classify their failures: network and rate-limit problems
/// as [`TodobotError::Transient`], malformed or refused requests as
/// [`TodobotError::Permanent`].
#[async_trait]
pub trait Extractor: Send + Sync + 'static {
    /// Human-readable name used in logs.
    fn name(&self) -> &str;

    async fn extract(&self, text: &str) -> Result<Vec<TaskItem>, TodobotError>;
}
