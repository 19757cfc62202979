//! Reconnect backoff schedule
//!
//! The timing decision is kept pure so it can be tested without timers:
//! the connection manager asks for the next delay and sleeps on whatever
//! comes back.

use std::time::Duration;

/// Knobs for the reconnect schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound on any retry delay
    pub max_delay: Duration,
    /// Automatic retries before settling until a manual reconnect
    pub max_retries: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: 5,
        }
    }
}

/// Capped exponential backoff: `initial * 2^(n-1)`, at most `max_delay`,
/// `None` once `max_retries` attempts have been handed out
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    retries: u32,
}

impl ReconnectPolicy {
    pub fn new(config: ReconnectConfig) -> Self {
        Self { config, retries: 0 }
    }

    /// Delay before the next attempt, or `None` when retries are exhausted
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.retries >= self.config.max_retries {
            return None;
        }
        self.retries += 1;

        let exponent = (self.retries - 1).min(16);
        let delay = self
            .config
            .initial_delay
            .saturating_mul(1u32 << exponent)
            .min(self.config.max_delay);
        Some(delay)
    }

    /// Attempts handed out since the last reset
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn exhausted(&self) -> bool {
        self.retries >= self.config.max_retries
    }

    /// Start over, e.g. after a successful handshake or a manual reconnect
    pub fn reset(&mut self) {
        self.retries = 0;
    }
}
