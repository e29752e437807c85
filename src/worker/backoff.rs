use rand::Rng;
use std::time::Duration;

use crate::config::BackoffConfig;

/// Exponential backoff state for one retrying task
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay before the next retry, advancing the attempt counter
    pub fn next_delay(&mut self) -> Duration {
        let delay = delay_for(&self.config, self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// Delay for the given zero-based attempt: `initial * multiplier^attempt`,
/// capped at `max_delay_ms`, with optional jitter
pub fn delay_for(config: &BackoffConfig, attempt: u32) -> Duration {
    let initial = config.initial_delay_ms as f64;
    let max = config.max_delay_ms as f64;
    let exponent = attempt.min(64) as i32;
    let mut delay_ms = (initial * config.multiplier.max(1.0).powi(exponent)).min(max);

    if config.jitter > 0.0 && delay_ms > 0.0 {
        let spread = config.jitter.min(1.0);
        let factor = rand::rng().random_range((1.0 - spread)..=(1.0 + spread));
        delay_ms = (delay_ms * factor).min(max);
    }

    Duration::from_millis(delay_ms.max(0.0) as u64)
}
