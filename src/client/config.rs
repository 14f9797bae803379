//! Client configuration

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::DEFAULT_MAX_PAYLOAD_SIZE;
use crate::server::config::DEFAULT_PORT;

/// Delay policy between connection attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Wait the base delay before every attempt
    Fixed,
    /// Double the delay after each failed attempt, capped at `max`
    Exponential { max: Duration },
}

/// Client configuration options
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Sender address to connect to
    pub server_addr: SocketAddr,

    /// Deadline for establishing a TCP connection
    pub connect_timeout: Duration,

    /// Deadline for each socket read; an idle stream past this is a failure
    pub read_timeout: Duration,

    /// Consecutive failed connection attempts before giving up
    pub max_reconnect_attempts: u32,

    /// Base delay before each reconnection attempt
    pub reconnect_delay: Duration,

    /// Delay growth policy
    pub backoff: Backoff,

    /// Largest declared payload accepted from the sender
    pub max_payload_size: u64,

    /// Enable TCP_NODELAY
    pub tcp_nodelay: bool,

    /// Log a progress line every this many frames (0 disables)
    pub stats_log_interval: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(5),
            max_reconnect_attempts: 5,
            reconnect_delay: Duration::from_secs(2),
            backoff: Backoff::Fixed,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            tcp_nodelay: true,
            stats_log_interval: 30,
        }
    }
}

impl ClientConfig {
    /// Create a config targeting the given sender address
    pub fn new(server_addr: SocketAddr) -> Self {
        Self {
            server_addr,
            ..Default::default()
        }
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Double the delay after each failure, up to `max`
    pub fn exponential_backoff(mut self, max: Duration) -> Self {
        self.backoff = Backoff::Exponential { max };
        self
    }

    pub fn max_payload_size(mut self, max: u64) -> Self {
        self.max_payload_size = max;
        self
    }

    pub fn stats_log_interval(mut self, frames: u64) -> Self {
        self.stats_log_interval = frames;
        self
    }

    /// Check every value is usable
    pub fn validate(&self) -> Result<()> {
        if self.max_reconnect_attempts == 0 {
            return Err(Error::invalid_config("max_reconnect_attempts must be at least 1"));
        }
        if self.connect_timeout.is_zero() {
            return Err(Error::invalid_config("connect_timeout must be non-zero"));
        }
        if self.read_timeout.is_zero() {
            return Err(Error::invalid_config("read_timeout must be non-zero"));
        }
        if self.max_payload_size == 0 {
            return Err(Error::invalid_config("max_payload_size must be non-zero"));
        }
        if let Backoff::Exponential { max } = self.backoff {
            if max < self.reconnect_delay {
                return Err(Error::invalid_config(
                    "backoff ceiling must not be below reconnect_delay",
                ));
            }
        }
        Ok(())
    }
}
