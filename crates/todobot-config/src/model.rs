// SPDX-FileCopyrightText: 2026 Todobot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for todobot.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level todobot configuration.
///
/// Every section is optional and defaults to values that let the queue run
/// locally; the adapters stay disabled until their credentials are set.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TodobotConfig {
    /// Process-level settings (logging, health endpoint).
    #[serde(default)]
    pub service: ServiceConfig,

    /// Telegram chat transport.
    #[serde(default)]
    pub telegram: TelegramConfig,

    /// OpenRouter extraction model.
    #[serde(default)]
    pub openrouter: OpenRouterConfig,

    /// Google Sheets (Apps Script) delivery sink.
    #[serde(default)]
    pub sheets: SheetsConfig,

    /// Durable store.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Batching, retry, and worker policy.
    #[serde(default)]
    pub queue: QueueConfig,
}

/// Process-level settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Address the liveness endpoint binds to.
    #[serde(default = "default_health_host")]
    pub health_host: String,

    /// Port of the liveness endpoint.
    #[serde(default = "default_health_port")]
    pub health_port: u16,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            health_host: default_health_host(),
            health_port: default_health_port(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_health_host() -> String {
    "0.0.0.0".to_string()
}

fn default_health_port() -> u16 {
    10000
}

/// Telegram transport configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TelegramConfig {
    /// Bot API token. `None` runs the service without a chat transport.
    #[serde(default)]
    pub bot_token: Option<String>,

    /// Telegram user IDs or usernames allowed to submit tasks.
    #[serde(default)]
    pub allowed_users: Vec<String>,
}

/// OpenRouter extraction configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OpenRouterConfig {
    /// API key. `None` falls back to the `OPENROUTER_API_KEY` variable.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Model used for task extraction.
    #[serde(default = "default_model")]
    pub model: String,

    /// Chat-completions endpoint.
    #[serde(default = "default_openrouter_url")]
    pub base_url: String,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            base_url: default_openrouter_url(),
        }
    }
}

fn default_model() -> String {
    "openai/gpt-4o-mini".to_string()
}

fn default_openrouter_url() -> String {
    "https://openrouter.ai/api/v1/chat/completions".to_string()
}

/// Google Sheets sink configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SheetsConfig {
    /// Deployed Apps Script web app URL that appends task rows.
    #[serde(default)]
    pub script_url: Option<String>,
}

/// Durable store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL journal mode.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: true,
        }
    }
}

fn default_database_path() -> String {
    dirs::data_local_dir()
        .map(|d| d.join("todobot").join("todobot.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("todobot.db"))
        .to_string_lossy()
        .to_string()
}

fn default_true() -> bool {
    true
}

/// Batching, retry, and worker policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    /// Inactivity after which an open batch closes.
    #[serde(default = "default_idle_window_secs")]
    pub idle_window_secs: u64,

    /// Message count that closes a batch immediately.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// How often open batches are checked for expiry.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Number of concurrent delivery workers.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Capacity of the in-process work queue of closed batch ids.
    #[serde(default = "default_work_queue_capacity")]
    pub work_queue_capacity: usize,

    /// Attempts before a batch is dead-lettered.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff for the first retry.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Upper bound for any single backoff delay.
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,

    /// Deadline for each extraction or delivery call.
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            idle_window_secs: default_idle_window_secs(),
            max_batch_size: default_max_batch_size(),
            poll_interval_ms: default_poll_interval_ms(),
            workers: default_workers(),
            work_queue_capacity: default_work_queue_capacity(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_secs: default_backoff_max_secs(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
        }
    }
}

impl QueueConfig {
    pub fn idle_window(&self) -> Duration {
        Duration::from_secs(self.idle_window_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}

fn default_idle_window_secs() -> u64 {
    30
}

fn default_max_batch_size() -> usize {
    10
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_workers() -> usize {
    4
}

fn default_work_queue_capacity() -> usize {
    256
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_base_ms() -> u64 {
    2000
}

fn default_backoff_max_secs() -> u64 {
    300
}

fn default_attempt_timeout_secs() -> u64 {
    60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_defaults_match_documented_policy() {
        let queue = QueueConfig::default();
        assert_eq!(queue.idle_window(), Duration::from_secs(30));
        assert_eq!(queue.max_batch_size, 10);
        assert_eq!(queue.poll_interval(), Duration::from_secs(1));
        assert_eq!(queue.max_attempts, 5);
        assert_eq!(queue.backoff_base(), Duration::from_secs(2));
        assert_eq!(queue.backoff_max(), Duration::from_secs(300));
    }

    #[test]
    fn database_path_defaults_to_todobot_db() {
        let storage = StorageConfig::default();
        assert!(storage.database_path.ends_with("todobot.db"));
        assert!(storage.wal_mode);
    }

    #[test]
    fn adapters_are_disabled_by_default() {
        let config = TodobotConfig::default();
        assert!(config.telegram.bot_token.is_none());
        assert!(config.openrouter.api_key.is_none());
        assert!(config.sheets.script_url.is_none());
    }
}
