//! Reconnect backoff: capped doubling with random jitter.

use crate::domain::config::BackoffConfig;
use rand::Rng;
use std::time::Duration;

/// Delay generator for reconnect attempts.
///
/// Each call to [`Backoff::next_delay`] doubles the base delay up to the
/// configured maximum, then removes a random fraction (up to `jitter`) so
/// that several gateways restarting together do not reconnect in lockstep.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    jitter: f64,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new(config: &BackoffConfig) -> Self {
        Self {
            initial: config.initial,
            max: config.max.max(config.initial),
            jitter: config.jitter.clamp(0.0, 1.0),
            current: config.initial,
            attempts: 0,
        }
    }

    /// Delay before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current.min(self.max);
        self.current = base.saturating_mul(2).min(self.max);
        self.attempts = self.attempts.saturating_add(1);

        if self.jitter == 0.0 {
            return base;
        }
        let cut = rand::thread_rng().gen_range(0.0..=self.jitter);
        base.mul_f64(1.0 - cut)
    }

    /// Consecutive failed attempts since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Start over after a healthy session.
    pub fn reset(&mut self) {
        self.current = self.initial;
        self.attempts = 0;
    }
}
