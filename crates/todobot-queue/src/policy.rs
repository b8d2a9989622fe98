// SPDX-FileCopyrightText: 2026 Todobot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Flush and retry policies derived from the `[queue]` config section.

use std::time::Duration;

use rand::Rng;
use todobot_config::model::QueueConfig;

/// When an OPEN batch closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    /// Inactivity after the last message before the batch closes.
    pub idle_window: Duration,
    /// A batch closes as soon as it holds this many messages.
    pub max_batch_size: usize,
    /// How often the ticker looks for expired batches.
    pub poll_interval: Duration,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            idle_window: Duration::from_secs(30),
            max_batch_size: 10,
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Retry schedule for failed delivery attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base: Duration::from_secs(2),
            max: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Upper bound of the delay after the given (1-based) attempt:
    /// `min(base * 2^(attempt - 1), max)`.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        self.base.saturating_mul(1 << exponent).min(self.max)
    }

    /// Jittered delay after the given attempt, drawn uniformly from
    /// `[ceiling / 2, ceiling]`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let cap = self.ceiling(attempt);
        let cap_nanos = u64::try_from(cap.as_nanos()).unwrap_or(u64::MAX);
        let floor_nanos = cap_nanos / 2;
        if cap_nanos == floor_nanos {
            return cap;
        }
        Duration::from_nanos(rand::thread_rng().gen_range(floor_nanos..=cap_nanos))
    }

    /// Whether a batch that has used `attempt_count` attempts may not be
    /// retried again. Retries stop once the count exceeds `max_attempts`,
    /// so a batch gets `max_attempts + 1` attempts in total.
    pub fn is_exhausted(&self, attempt_count: u32) -> bool {
        attempt_count > self.max_attempts
    }
}

/// Everything the queue manager needs from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSettings {
    pub batch: BatchPolicy,
    pub retry: RetryPolicy,
    pub workers: usize,
    pub work_queue_capacity: usize,
    /// Deadline for each extraction or delivery call.
    pub attempt_timeout: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            batch: BatchPolicy::default(),
            retry: RetryPolicy::default(),
            workers: 4,
            work_queue_capacity: 256,
            attempt_timeout: Duration::from_secs(60),
        }
    }
}

impl From<&QueueConfig> for QueueSettings {
    fn from(config: &QueueConfig) -> Self {
        Self {
            batch: BatchPolicy {
                idle_window: config.idle_window(),
                max_batch_size: config.max_batch_size,
                poll_interval: config.poll_interval(),
            },
            retry: RetryPolicy {
                max_attempts: config.max_attempts,
                base: config.backoff_base(),
                max: config.backoff_max(),
            },
            workers: config.workers,
            work_queue_capacity: config.work_queue_capacity,
            attempt_timeout: config.attempt_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceiling_doubles_until_cap() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base: Duration::from_secs(2),
            max: Duration::from_secs(20),
        };
        assert_eq!(policy.ceiling(1), Duration::from_secs(2));
        assert_eq!(policy.ceiling(2), Duration::from_secs(4));
        assert_eq!(policy.ceiling(3), Duration::from_secs(8));
        assert_eq!(policy.ceiling(4), Duration::from_secs(16));
        assert_eq!(policy.ceiling(5), Duration::from_secs(20));
        assert_eq!(policy.ceiling(60), Duration::from_secs(20));
    }

    #[test]
    fn attempt_zero_uses_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.ceiling(0), policy.base);
    }

    #[test]
    fn jittered_delay_stays_in_upper_half() {
        let policy = RetryPolicy::default();
        for attempt in 1..=8 {
            let cap = policy.ceiling(attempt);
            for _ in 0..50 {
                let delay = policy.delay_for_attempt(attempt);
                assert!(delay <= cap, "attempt {attempt}: {delay:?} > {cap:?}");
                assert!(delay >= cap / 2, "attempt {attempt}: {delay:?} < {:?}", cap / 2);
            }
        }
    }

    #[test]
    fn exhaustion_only_past_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        };
        assert!(!policy.is_exhausted(0));
        assert!(!policy.is_exhausted(3));
        assert!(policy.is_exhausted(4));
        assert!(policy.is_exhausted(10));
    }

    #[test]
    fn single_attempt_budget_still_allows_one_retry() {
        let policy = RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        };
        assert!(!policy.is_exhausted(1));
        assert!(policy.is_exhausted(2));
    }

    #[test]
    fn settings_from_config() {
        let config = QueueConfig {
            idle_window_secs: 12,
            max_batch_size: 3,
            poll_interval_ms: 250,
            workers: 2,
            work_queue_capacity: 8,
            max_attempts: 7,
            backoff_base_ms: 100,
            backoff_max_secs: 9,
            attempt_timeout_secs: 15,
        };
        let settings = QueueSettings::from(&config);
        assert_eq!(settings.batch.idle_window, Duration::from_secs(12));
        assert_eq!(settings.batch.max_batch_size, 3);
        assert_eq!(settings.batch.poll_interval, Duration::from_millis(250));
        assert_eq!(settings.retry.max_attempts, 7);
        assert_eq!(settings.retry.base, Duration::from_millis(100));
        assert_eq!(settings.retry.max, Duration::from_secs(9));
        assert_eq!(settings.workers, 2);
        assert_eq!(settings.work_queue_capacity, 8);
        assert_eq!(settings.attempt_timeout, Duration::from_secs(15));
    }

    #[test]
    fn defaults_match_config_defaults() {
        assert_eq!(QueueSettings::from(&QueueConfig::default()), QueueSettings::default());
    }
}
