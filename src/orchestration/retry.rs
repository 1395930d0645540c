//! Bounded exponential backoff for calls to the workload manager.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy: attempt ceiling plus exponential backoff with optional jitter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts allowed, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry in milliseconds.
    pub initial_interval_ms: u64,
    /// Upper bound on any single delay in milliseconds.
    pub max_interval_ms: u64,
    /// Growth factor applied per retry.
    pub multiplier: f64,
    /// Jitter fraction in [0.0, 1.0]; 0.25 means +/-25%.
    pub jitter_percent: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval_ms: 500,
            max_interval_ms: 30_000,
            multiplier: 2.0,
            jitter_percent: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Policy with the given ceiling and a fixed tiny delay, for tests and local runs.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_interval_ms: 1,
            max_interval_ms: 1,
            multiplier: 1.0,
            jitter_percent: 0.0,
        }
    }

    /// Whether another attempt is allowed after `attempts` have been made.
    pub fn allows_another(&self, attempts: u32) -> bool {
        attempts < self.max_attempts.max(1)
    }

    /// Delay before retry number `retry` (0-indexed).
    pub fn delay(&self, retry: u32) -> Duration {
        let base = self.base_delay_ms(retry);
        let jitter = self.jitter_percent.clamp(0.0, 1.0);
        let factor = if jitter == 0.0 {
            1.0
        } else {
            1.0 + rand::thread_rng().gen_range(-jitter..=jitter)
        };
        Duration::from_millis((base * factor).max(0.0) as u64)
    }

    fn base_delay_ms(&self, retry: u32) -> f64 {
        // 2^30 already exceeds any sane max_interval
        const MAX_EXP: i32 = 30;
        let exp = i32::try_from(retry).map_or(MAX_EXP, |e| e.min(MAX_EXP));
        let raw = self.initial_interval_ms as f64 * self.multiplier.max(1.0).powi(exp);
        raw.min(self.max_interval_ms as f64)
    }
}
