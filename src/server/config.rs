//! Server configuration

use std::net::SocketAddr;
use std::time::Duration;

use crate::channel::DEFAULT_CAPACITY;
use crate::error::{Error, Result};
use crate::protocol::DEFAULT_MAX_PAYLOAD_SIZE;

/// Default listen port
pub const DEFAULT_PORT: u16 = 8002;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent sessions; further connections are rejected
    pub max_sessions: usize,

    /// Frames held by the channel (about one second at 30 fps)
    pub channel_capacity: usize,

    /// How long a session waits for a new frame before its liveness check
    pub frame_timeout: Duration,

    /// Deadline for writing one envelope
    pub write_timeout: Duration,

    /// Upper bound on payload size accepted for publishing
    pub max_payload_size: u64,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// Envelope writes slower than this are logged as high latency
    pub high_latency_threshold: Duration,

    /// Interval between session statistics log lines
    pub stats_interval: Duration,

    /// Start new sessions at the oldest resident frame instead of the next
    /// one published. A reconnecting receiver is a new session, so with this
    /// set it is sent frames it may already have consumed.
    pub replay_history: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            max_sessions: 10,
            channel_capacity: DEFAULT_CAPACITY,
            frame_timeout: Duration::from_secs(1),
            write_timeout: Duration::from_secs(5),
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            tcp_nodelay: true, // Important for low latency
            high_latency_threshold: Duration::from_millis(100),
            stats_interval: Duration::from_secs(10),
            replay_history: false,
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set maximum concurrent sessions
    pub fn max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    /// Set channel capacity
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Set the frame wait timeout
    pub fn frame_timeout(mut self, timeout: Duration) -> Self {
        self.frame_timeout = timeout;
        self
    }

    /// Set the write timeout
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the payload size ceiling
    pub fn max_payload_size(mut self, max: u64) -> Self {
        self.max_payload_size = max;
        self
    }

    /// Set the statistics log interval
    pub fn stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = interval;
        self
    }

    /// Send resident frames to sessions when they start
    pub fn replay_history(mut self, replay: bool) -> Self {
        self.replay_history = replay;
        self
    }

    /// Check every value is usable
    pub fn validate(&self) -> Result<()> {
        if self.max_sessions == 0 {
            return Err(Error::invalid_config("max_sessions must be at least 1"));
        }
        if self.channel_capacity == 0 {
            return Err(Error::invalid_config("channel_capacity must be at least 1"));
        }
        if self.frame_timeout.is_zero() {
            return Err(Error::invalid_config("frame_timeout must be non-zero"));
        }
        if self.write_timeout.is_zero() {
            return Err(Error::invalid_config("write_timeout must be non-zero"));
        }
        if self.max_payload_size == 0 {
            return Err(Error::invalid_config("max_payload_size must be non-zero"));
        }
        if self.stats_interval.is_zero() {
            return Err(Error::invalid_config("stats_interval must be non-zero"));
        }
        Ok(())
    }
}
