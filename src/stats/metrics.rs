//! Statistics and metrics for sessions and receivers
//!
//! Metrics records are owned and mutated by exactly one loop (a session or
//! the receive loop). Reporters only ever see the immutable snapshot types.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::client::ReceiverState;
use crate::session::SessionPhase;

/// Number of samples kept by a [`LatencyWindow`]
pub const LATENCY_WINDOW: usize = 100;

/// Rolling window of the most recent latency samples
#[derive(Debug, Clone)]
pub struct LatencyWindow {
    samples: VecDeque<Duration>,
    total: Duration,
}

impl LatencyWindow {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(LATENCY_WINDOW),
            total: Duration::ZERO,
        }
    }

    /// Record a sample, dropping the oldest once the window is full
    pub fn record(&mut self, sample: Duration) {
        if self.samples.len() == LATENCY_WINDOW {
            if let Some(old) = self.samples.pop_front() {
                self.total -= old;
            }
        }
        self.samples.push_back(sample);
        self.total += sample;
    }

    /// Mean of the samples in the window
    pub fn average(&self) -> Option<Duration> {
        if self.samples.is_empty() {
            None
        } else {
            Some(self.total / self.samples.len() as u32)
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.total = Duration::ZERO;
    }
}

impl Default for LatencyWindow {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-session counters on the sender side
#[derive(Debug, Clone)]
pub struct SessionMetrics {
    pub frames_sent: u64,
    pub bytes_sent: u64,
    /// Frames this session lost to channel eviction
    pub dropped_frames: u64,
    pub errors: u64,
    /// Time spent writing each envelope
    pub send_latency: LatencyWindow,
    pub connected_at: Instant,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self {
            frames_sent: 0,
            bytes_sent: 0,
            dropped_frames: 0,
            errors: 0,
            send_latency: LatencyWindow::new(),
            connected_at: Instant::now(),
        }
    }

    /// Update metrics after writing a frame
    pub fn on_frame_sent(&mut self, bytes: usize, latency: Duration) {
        self.frames_sent += 1;
        self.bytes_sent += bytes as u64;
        self.send_latency.record(latency);
    }

    pub fn on_frames_dropped(&mut self, count: u64) {
        self.dropped_frames += count;
    }

    pub fn on_error(&mut self) {
        self.errors += 1;
    }

    /// Build a read-only snapshot
    pub fn snapshot(
        &self,
        session_id: u64,
        peer_addr: SocketAddr,
        phase: SessionPhase,
    ) -> SessionStats {
        SessionStats {
            session_id,
            peer_addr,
            phase,
            frames_sent: self.frames_sent,
            bytes_sent: self.bytes_sent,
            dropped_frames: self.dropped_frames,
            errors: self.errors,
            avg_latency: self.send_latency.average(),
            duration: self.connected_at.elapsed(),
        }
    }
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of one sender-side session
#[derive(Debug, Clone)]
pub struct SessionStats {
    pub session_id: u64,
    pub peer_addr: SocketAddr,
    pub phase: SessionPhase,
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub dropped_frames: u64,
    pub errors: u64,
    /// Mean envelope write time over the recent window
    pub avg_latency: Option<Duration>,
    /// Connection age
    pub duration: Duration,
}

impl SessionStats {
    /// Average frames per second over the connection lifetime
    pub fn fps(&self) -> f64 {
        rate(self.frames_sent, self.duration)
    }
}

/// Counters for the client receive loop
///
/// Spans reconnections: frame and byte counts accumulate across every
/// connection the loop establishes.
#[derive(Debug, Clone)]
pub struct ClientMetrics {
    pub frames_received: u64,
    pub bytes_received: u64,
    /// Frames the consumer sink could not accept
    pub dropped_frames: u64,
    /// Stream failures detected while connected
    pub errors: u64,
    pub reconnections: u64,
    pub connect_failures: u64,
    /// Inter-frame receive interval
    pub frame_interval: LatencyWindow,
    pub started_at: Instant,
    pub connected_at: Option<Instant>,
    last_frame_at: Option<Instant>,
}

impl ClientMetrics {
    pub fn new() -> Self {
        Self {
            frames_received: 0,
            bytes_received: 0,
            dropped_frames: 0,
            errors: 0,
            reconnections: 0,
            connect_failures: 0,
            frame_interval: LatencyWindow::new(),
            started_at: Instant::now(),
            connected_at: None,
            last_frame_at: None,
        }
    }

    /// Mark a freshly established connection
    pub fn on_connected(&mut self, is_reconnect: bool) {
        self.connected_at = Some(Instant::now());
        self.last_frame_at = None;
        if is_reconnect {
            self.reconnections += 1;
        }
    }

    pub fn on_disconnected(&mut self) {
        self.connected_at = None;
        self.last_frame_at = None;
    }

    /// Update metrics after reassembling a frame
    pub fn on_frame_received(&mut self, bytes: usize) {
        let now = Instant::now();
        if let Some(last) = self.last_frame_at {
            self.frame_interval.record(now.duration_since(last));
        }
        self.last_frame_at = Some(now);
        self.frames_received += 1;
        self.bytes_received += bytes as u64;
    }

    pub fn on_frame_dropped(&mut self) {
        self.dropped_frames += 1;
    }

    pub fn on_stream_error(&mut self) {
        self.errors += 1;
    }

    pub fn on_connect_failed(&mut self) {
        self.connect_failures += 1;
    }

    /// Build a read-only snapshot
    pub fn snapshot(&self, state: ReceiverState, attempts: u32) -> ClientStats {
        ClientStats {
            state,
            attempts,
            frames_received: self.frames_received,
            bytes_received: self.bytes_received,
            dropped_frames: self.dropped_frames,
            errors: self.errors,
            reconnections: self.reconnections,
            connect_failures: self.connect_failures,
            avg_latency: self.frame_interval.average(),
            duration: self.started_at.elapsed(),
            connection_age: self.connected_at.map(|t| t.elapsed()),
        }
    }
}

impl Default for ClientMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of the client receive loop
#[derive(Debug, Clone)]
pub struct ClientStats {
    pub state: ReceiverState,
    /// Current consecutive failed connection attempts
    pub attempts: u32,
    pub frames_received: u64,
    pub bytes_received: u64,
    pub dropped_frames: u64,
    pub errors: u64,
    pub reconnections: u64,
    pub connect_failures: u64,
    /// Mean inter-frame receive interval over the recent window
    pub avg_latency: Option<Duration>,
    /// Time since the receive loop started
    pub duration: Duration,
    /// Age of the current connection, if connected
    pub connection_age: Option<Duration>,
}

impl ClientStats {
    pub fn average_fps(&self) -> f64 {
        rate(self.frames_received, self.duration)
    }

    /// Data rate in megabits per second
    pub fn data_rate_mbps(&self) -> f64 {
        rate(self.bytes_received * 8, self.duration) / 1_000_000.0
    }

    /// Overall stream quality grade
    pub fn quality(&self) -> StreamQuality {
        let frames = self.frames_received as f64;
        let dropped = self.dropped_frames as f64;

        if dropped > frames * 0.05 {
            StreamQuality::Poor
        } else if dropped > frames * 0.01 {
            StreamQuality::Fair
        } else if self
            .avg_latency
            .is_some_and(|l| l > Duration::from_millis(100))
        {
            StreamQuality::Good
        } else {
            StreamQuality::Excellent
        }
    }
}

/// Coarse quality grade reported in the client summary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamQuality {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl std::fmt::Display for StreamQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StreamQuality::Excellent => "Excellent",
            StreamQuality::Good => "Good",
            StreamQuality::Fair => "Fair",
            StreamQuality::Poor => "Poor",
        };
        f.write_str(name)
    }
}

/// Server-wide statistics
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    /// Sessions accepted since start
    pub total_sessions: u64,
    /// Sessions currently live
    pub active_sessions: u64,
    /// Connections turned away at the session ceiling
    pub rejected_connections: u64,
    /// Frames written by sessions that have closed
    pub total_frames_sent: u64,
    /// Bytes written by sessions that have closed
    pub total_bytes_sent: u64,
    pub uptime: Duration,
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a closed session's final counters into the totals
    pub fn absorb(&mut self, session: &SessionStats) {
        self.total_frames_sent += session.frames_sent;
        self.total_bytes_sent += session.bytes_sent;
    }
}

fn rate(count: u64, over: Duration) -> f64 {
    let secs = over.as_secs_f64();
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}
