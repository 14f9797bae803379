//! Reconnection controller
//!
//! Counts consecutive failed connection attempts against a fixed budget and
//! decides how long to wait before the next one. The counter resets on every
//! successful connection, so the budget only limits back-to-back failures.

use std::time::{Duration, Instant};

use super::config::{Backoff, ClientConfig};

/// What to do after a failed connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Wait `delay`, then make attempt number `attempt`
    Retry { attempt: u32, delay: Duration },
    /// Budget spent; stop for good
    Exhausted { attempts: u32 },
}

/// Bounded-retry state for the receive loop
#[derive(Debug, Clone)]
pub struct ReconnectController {
    max_attempts: u32,
    base_delay: Duration,
    backoff: Backoff,
    attempts: u32,
    last_failure: Option<Instant>,
}

impl ReconnectController {
    pub fn new(max_attempts: u32, base_delay: Duration, backoff: Backoff) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff,
            attempts: 0,
            last_failure: None,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(
            config.max_reconnect_attempts,
            config.reconnect_delay,
            config.backoff,
        )
    }

    /// Consecutive failed attempts since the last successful connection
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// When the most recent failure was recorded
    pub fn last_failure(&self) -> Option<Instant> {
        self.last_failure
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Delay before the next attempt
    pub fn delay(&self) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Exponential { max } => {
                let factor = 1u32.checked_shl(self.attempts).unwrap_or(u32::MAX);
                self.base_delay.saturating_mul(factor).min(max)
            }
        }
    }

    /// Record a failed connection attempt
    pub fn on_connect_failed(&mut self) -> Decision {
        self.attempts = self.attempts.saturating_add(1);
        self.last_failure = Some(Instant::now());

        if self.is_exhausted() {
            Decision::Exhausted {
                attempts: self.attempts,
            }
        } else {
            Decision::Retry {
                attempt: self.attempts + 1,
                delay: self.delay(),
            }
        }
    }

    /// Record loss of an established stream.
    ///
    /// Returns the delay before the first reconnection attempt.
    pub fn on_stream_lost(&mut self) -> Duration {
        self.last_failure = Some(Instant::now());
        self.delay()
    }

    /// Record a successful connection
    pub fn on_connected(&mut self) {
        self.attempts = 0;
    }
}
