//! Session state machine
//!
//! Tracks a sender-side session from accept to socket close. A session never
//! outlives its socket: reaching [`SessionPhase::Closed`] means the socket
//! has been released.

use std::net::SocketAddr;
use std::time::Instant;

/// Session lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Writing frames to the peer
    Streaming,
    /// Stop requested or failure detected, releasing the socket
    Closing,
    /// Socket released
    Closed,
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Server shutting down
    Shutdown,
    /// Closed on request through the dispatcher
    Disconnected,
    /// Socket write failed (reset, broken pipe)
    WriteFailed,
    /// Socket write did not complete in time
    WriteTimeout,
    /// Producer closed the frame channel
    ChannelClosed,
}

impl CloseReason {
    /// Whether the session ended because of a fault on its connection
    pub fn is_failure(&self) -> bool {
        matches!(self, CloseReason::WriteFailed | CloseReason::WriteTimeout)
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            CloseReason::Shutdown => "server shutdown",
            CloseReason::Disconnected => "disconnected",
            CloseReason::WriteFailed => "write failed",
            CloseReason::WriteTimeout => "write timed out",
            CloseReason::ChannelClosed => "channel closed",
        };
        f.write_str(reason)
    }
}

/// Lifecycle state of one session
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Unique session ID
    pub id: u64,

    /// Remote peer address
    pub peer_addr: SocketAddr,

    /// Current phase
    pub phase: SessionPhase,

    /// Connection start time
    pub connected_at: Instant,

    /// Set once the session starts closing
    pub close_reason: Option<CloseReason>,
}

impl SessionState {
    /// Create a new session state
    pub fn new(id: u64, peer_addr: SocketAddr) -> Self {
        Self {
            id,
            peer_addr,
            phase: SessionPhase::Streaming,
            connected_at: Instant::now(),
            close_reason: None,
        }
    }

    /// Begin closing. The first reason recorded wins.
    pub fn close(&mut self, reason: CloseReason) {
        if self.phase == SessionPhase::Streaming {
            self.phase = SessionPhase::Closing;
            self.close_reason = Some(reason);
        }
    }

    /// Mark the socket released
    pub fn finish(&mut self) {
        if self.close_reason.is_none() {
            self.close_reason = Some(CloseReason::Shutdown);
        }
        self.phase = SessionPhase::Closed;
    }

    /// Get session duration
    pub fn duration(&self) -> std::time::Duration {
        self.connected_at.elapsed()
    }

    /// Check if session is streaming
    pub fn is_streaming(&self) -> bool {
        self.phase == SessionPhase::Streaming
    }
}
