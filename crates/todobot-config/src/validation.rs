// SPDX-FileCopyrightText: 2026 Todobot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Catches policy values serde accepts but the queue cannot run with, such
//! as a zero idle window or a backoff base above its cap.

use crate::diagnostic::ConfigError;
use crate::model::TodobotConfig;

/// Validate a deserialized configuration.
///
/// Collects every violation instead of failing on the first one.
pub fn validate_config(config: &TodobotConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut fail = |message: String| errors.push(ConfigError::Validation { message });

    let host = config.service.health_host.trim();
    if host.is_empty() {
        fail("service.health_host must not be empty".to_string());
    } else if host.parse::<std::net::IpAddr>().is_err()
        && !host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
    {
        fail(format!(
            "service.health_host `{host}` is not a valid IP address or hostname"
        ));
    }

    if config.storage.database_path.trim().is_empty() {
        fail("storage.database_path must not be empty".to_string());
    }

    let queue = &config.queue;
    if queue.idle_window_secs == 0 {
        fail("queue.idle_window_secs must be at least 1".to_string());
    }
    if queue.max_batch_size == 0 {
        fail("queue.max_batch_size must be at least 1".to_string());
    }
    if queue.poll_interval_ms == 0 {
        fail("queue.poll_interval_ms must be at least 1".to_string());
    }
    if queue.workers == 0 {
        fail("queue.workers must be at least 1".to_string());
    }
    if queue.work_queue_capacity == 0 {
        fail("queue.work_queue_capacity must be at least 1".to_string());
    }
    if queue.max_attempts == 0 {
        fail("queue.max_attempts must be at least 1".to_string());
    }
    if queue.backoff_base_ms == 0 {
        fail("queue.backoff_base_ms must be at least 1".to_string());
    }
    if queue.backoff_base() > queue.backoff_max() {
        fail(format!(
            "queue.backoff_base_ms ({}ms) exceeds queue.backoff_max_secs ({}s)",
            queue.backoff_base_ms, queue.backoff_max_secs
        ));
    }
    if queue.attempt_timeout_secs == 0 {
        fail("queue.attempt_timeout_secs must be at least 1".to_string());
    }

    if let Some(token) = &config.telegram.bot_token
        && token.trim().is_empty()
    {
        fail("telegram.bot_token must not be empty when set".to_string());
    }

    if let Some(url) = &config.sheets.script_url
        && !(url.starts_with("https://") || url.starts_with("http://"))
    {
        fail(format!("sheets.script_url `{url}` must be an http(s) URL"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
