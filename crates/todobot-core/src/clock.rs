// SPDX-FileCopyrightText: 2026 Todobot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wall-clock timestamps anchored to the tokio clock.
//!
//! Persisted timestamps (`created_at`, `next_attempt_at`) are computed as a
//! wall-clock origin plus the elapsed tokio [`Instant`]. In production this
//! tracks real time; under `tokio::time::pause` it advances with the paused
//! clock, so retry schedules stay deterministic in tests.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct Clock {
    wall_origin: DateTime<Utc>,
    origin: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self::anchored_at(Utc::now())
    }

    /// A clock whose current time is `wall_origin`.
    pub fn anchored_at(wall_origin: DateTime<Utc>) -> Self {
        Self {
            wall_origin,
            origin: Instant::now(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = TimeDelta::from_std(self.origin.elapsed()).unwrap_or(TimeDelta::zero());
        self.wall_origin + elapsed
    }

    /// `now + delay`.
    pub fn after(&self, delay: Duration) -> DateTime<Utc> {
        self.now() + TimeDelta::from_std(delay).unwrap_or(TimeDelta::zero())
    }

    /// Time left until `at`, zero if it already passed.
    pub fn until(&self, at: DateTime<Utc>) -> Duration {
        (at - self.now()).to_std().unwrap_or(Duration::ZERO)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
