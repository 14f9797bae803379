//! Per-connection session loop
//!
//! Pulls frames from its own channel cursor and writes them out as
//! envelopes. Any write failure ends this session only; other sessions
//! never observe it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::AsyncWrite;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::channel::{Cursor, FrameChannel, Received};
use crate::error::Error;
use crate::protocol::FrameWriter;
use crate::server::config::ServerConfig;
use crate::session::{CloseReason, SessionState};
use crate::stats::{SessionMetrics, SessionStats};

/// One accepted connection and its outbound stream
pub struct Connection<W> {
    state: SessionState,
    writer: FrameWriter<W>,
    channel: Arc<FrameChannel>,
    cursor: Cursor,
    config: ServerConfig,
    metrics: SessionMetrics,
    stats_tx: watch::Sender<SessionStats>,
    /// Stops this session only
    cancel: CancellationToken,
    /// Server-wide token, consulted to tell shutdown from a targeted disconnect
    shutdown: CancellationToken,
}

impl<W: AsyncWrite + Unpin> Connection<W> {
    /// Create a session over `writer`.
    ///
    /// Returns the session and a receiver for its live statistics.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: u64,
        peer_addr: SocketAddr,
        writer: W,
        channel: Arc<FrameChannel>,
        cursor: Cursor,
        config: ServerConfig,
        cancel: CancellationToken,
        shutdown: CancellationToken,
    ) -> (Self, watch::Receiver<SessionStats>) {
        let state = SessionState::new(session_id, peer_addr);
        let metrics = SessionMetrics::new();
        let (stats_tx, stats_rx) =
            watch::channel(metrics.snapshot(session_id, peer_addr, state.phase));

        let connection = Self {
            state,
            writer: FrameWriter::new(writer),
            channel,
            cursor,
            config,
            metrics,
            stats_tx,
            cancel,
            shutdown,
        };

        (connection, stats_rx)
    }

    /// Session ID
    pub fn id(&self) -> u64 {
        self.state.id
    }

    /// Run until the socket fails, the channel closes or a stop is requested.
    ///
    /// Returns the final statistics and the reason the session ended.
    pub async fn run(mut self) -> (SessionStats, CloseReason) {
        let frame_timeout = self.config.frame_timeout;

        while self.state.is_streaming() {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                next = tokio::time::timeout(
                    frame_timeout,
                    self.channel.next(&mut self.cursor),
                ) => Some(next),
            };

            match next {
                None => {
                    let reason = self.stop_reason();
                    self.state.close(reason);
                }
                // No frame within the timeout: refresh stats and loop back to the stop check
                Some(Err(_elapsed)) => self.publish_stats(),
                Some(Ok(Err(Error::ChannelClosed))) => self.state.close(CloseReason::ChannelClosed),
                Some(Ok(Err(e))) => {
                    tracing::warn!(session_id = self.state.id, error = %e, "Frame channel error");
                    self.state.close(CloseReason::ChannelClosed);
                }
                Some(Ok(Ok(received))) => self.send(received).await,
            }
        }

        self.finish().await
    }

    async fn send(&mut self, received: Received) {
        let Received { frame, skipped } = received;

        if skipped > 0 {
            self.metrics.on_frames_dropped(skipped);
            tracing::debug!(
                session_id = self.state.id,
                skipped = skipped,
                "Session fell behind, frames evicted before send"
            );
        }

        if frame.len() as u64 > self.config.max_payload_size {
            self.metrics.on_frames_dropped(1);
            tracing::warn!(
                session_id = self.state.id,
                size = frame.len(),
                max = self.config.max_payload_size,
                "Frame exceeds payload limit, not sent"
            );
            return;
        }

        let started = Instant::now();
        let write_timeout = self.config.write_timeout;
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            result = tokio::time::timeout(
                write_timeout,
                self.writer.write_frame(frame.payload()),
            ) => Some(result),
        };

        match result {
            None => {
                let reason = self.stop_reason();
                self.state.close(reason);
            }
            Some(Ok(Ok(written))) => {
                let latency = started.elapsed();
                self.metrics.on_frame_sent(written, latency);

                if latency > self.config.high_latency_threshold {
                    tracing::warn!(
                        session_id = self.state.id,
                        latency_ms = latency.as_millis() as u64,
                        "High send latency"
                    );
                }
                tracing::trace!(
                    session_id = self.state.id,
                    sequence = frame.sequence(),
                    bytes = written,
                    "Frame sent"
                );
                self.publish_stats();
            }
            Some(Ok(Err(e))) => {
                self.metrics.on_error();
                tracing::warn!(
                    session_id = self.state.id,
                    peer = %self.state.peer_addr,
                    error = %e,
                    "Write failed, closing session"
                );
                self.state.close(CloseReason::WriteFailed);
            }
            Some(Err(_elapsed)) => {
                self.metrics.on_error();
                tracing::warn!(
                    session_id = self.state.id,
                    peer = %self.state.peer_addr,
                    timeout_ms = write_timeout.as_millis() as u64,
                    "Write timed out, closing session"
                );
                self.state.close(CloseReason::WriteTimeout);
            }
        }
    }

    fn stop_reason(&self) -> CloseReason {
        if self.shutdown.is_cancelled() {
            CloseReason::Shutdown
        } else {
            CloseReason::Disconnected
        }
    }

    fn publish_stats(&self) {
        self.stats_tx.send_replace(self.snapshot());
    }

    fn snapshot(&self) -> SessionStats {
        self.metrics
            .snapshot(self.state.id, self.state.peer_addr, self.state.phase)
    }

    async fn finish(mut self) -> (SessionStats, CloseReason) {
        // Best effort: the peer may already be gone
        let _ = tokio::time::timeout(self.config.write_timeout, self.writer.shutdown()).await;

        self.state.finish();
        let reason = self.state.close_reason.unwrap_or(CloseReason::Shutdown);
        let stats = self.snapshot();
        self.stats_tx.send_replace(stats.clone());

        tracing::info!(
            session_id = stats.session_id,
            peer = %stats.peer_addr,
            reason = %reason,
            frames_sent = stats.frames_sent,
            bytes_sent = stats.bytes_sent,
            dropped_frames = stats.dropped_frames,
            errors = stats.errors,
            duration_secs = stats.duration.as_secs_f64(),
            fps = stats.fps(),
            avg_latency_ms = stats.avg_latency.map(|l| l.as_secs_f64() * 1000.0).unwrap_or(0.0),
            "Session closed"
        );

        (stats, reason)
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    use bytes::Bytes;
    use tokio::io::DuplexStream;
    use tokio_test::io::Builder;

    use super::*;
    use crate::protocol::{encode, FrameReader};
    use crate::session::SessionPhase;

    fn config() -> ServerConfig {
        ServerConfig::default().frame_timeout(Duration::from_millis(20))
    }

    fn session<W: AsyncWrite + Unpin>(
        id: u64,
        writer: W,
        channel: &Arc<FrameChannel>,
        config: ServerConfig,
        shutdown: &CancellationToken,
    ) -> (Connection<W>, watch::Receiver<SessionStats>, CancellationToken) {
        let cancel = shutdown.child_token();
        let peer = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 40000 + id as u16);
        let (connection, stats) = Connection::new(
            id,
            peer,
            writer,
            Arc::clone(channel),
            channel.subscribe(),
            config,
            cancel.clone(),
            shutdown.clone(),
        );
        (connection, stats, cancel)
    }

    fn frame(i: usize) -> Bytes {
        Bytes::from(format!("frame-{i}"))
    }

    async fn read_frames(reader: &mut FrameReader<DuplexStream>, count: usize) -> Vec<Bytes> {
        let mut frames = Vec::with_capacity(count);
        for _ in 0..count {
            frames.push(reader.read_frame().await.unwrap());
        }
        frames
    }

    #[tokio::test]
    async fn test_write_failure_is_isolated() {
        let channel = Arc::new(FrameChannel::new(16).unwrap());
        let shutdown = CancellationToken::new();

        // Session A accepts one envelope, then its socket breaks
        let failing = Builder::new()
            .write(&encode(&frame(0)))
            .write_error(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
            .build();
        let (session_a, _, _) = session(1, failing, &channel, config(), &shutdown);

        let (client_b, server_b) = tokio::io::duplex(64 * 1024);
        let (session_b, stats_b, cancel_b) = session(2, server_b, &channel, config(), &shutdown);

        for i in 0..5 {
            channel.publish(frame(i)).unwrap();
        }

        let task_a = tokio::spawn(session_a.run());
        let task_b = tokio::spawn(session_b.run());

        let (stats_a, reason_a) = task_a.await.unwrap();
        assert_eq!(reason_a, CloseReason::WriteFailed);
        assert_eq!(stats_a.frames_sent, 1);
        assert_eq!(stats_a.errors, 1);
        assert_eq!(stats_a.phase, SessionPhase::Closed);

        let mut reader = FrameReader::new(client_b, 1024);
        let received = read_frames(&mut reader, 5).await;
        assert_eq!(received, (0..5).map(frame).collect::<Vec<_>>());

        // B is still streaming and its counters are untouched by A's failure
        let live = stats_b.borrow().clone();
        assert_eq!(live.phase, SessionPhase::Streaming);
        assert_eq!(live.errors, 0);

        cancel_b.cancel();
        let (final_b, reason_b) = task_b.await.unwrap();
        assert_eq!(reason_b, CloseReason::Disconnected);
        assert_eq!(final_b.frames_sent, 5);
        assert_eq!(final_b.errors, 0);
        assert_eq!(final_b.dropped_frames, 0);
    }

    #[tokio::test]
    async fn test_lagging_session_counts_drops() {
        let channel = Arc::new(FrameChannel::new(2).unwrap());
        let shutdown = CancellationToken::new();
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (connection, _, _) = session(1, server, &channel, config(), &shutdown);

        for i in 0..5 {
            channel.publish(frame(i)).unwrap();
        }
        channel.close();

        let (stats, reason) = connection.run().await;
        assert_eq!(reason, CloseReason::ChannelClosed);
        assert_eq!(stats.frames_sent, 2);
        assert_eq!(stats.dropped_frames, 3);

        let mut reader = FrameReader::new(client, 1024);
        assert_eq!(read_frames(&mut reader, 2).await, vec![frame(3), frame(4)]);
        assert!(matches!(reader.read_frame().await, Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_shutdown_stops_idle_session() {
        let channel = Arc::new(FrameChannel::new(4).unwrap());
        let shutdown = CancellationToken::new();
        let (_client, server) = tokio::io::duplex(1024);
        let (connection, _, _) = session(1, server, &channel, config(), &shutdown);

        let task = tokio::spawn(connection.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();

        let (stats, reason) = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("session did not stop")
            .unwrap();
        assert_eq!(reason, CloseReason::Shutdown);
        assert_eq!(stats.frames_sent, 0);
    }

    #[tokio::test]
    async fn test_write_timeout_closes_session() {
        let channel = Arc::new(FrameChannel::new(4).unwrap());
        let shutdown = CancellationToken::new();
        // Room for the header only; nobody drains the other end
        let (_client, server) = tokio::io::duplex(8);
        let config = config().write_timeout(Duration::from_millis(50));
        let (connection, _, _) = session(1, server, &channel, config, &shutdown);

        channel.publish(Bytes::from(vec![0u8; 256])).unwrap();

        let (stats, reason) = connection.run().await;
        assert_eq!(reason, CloseReason::WriteTimeout);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.frames_sent, 0);
    }

    #[tokio::test]
    async fn test_oversized_frame_is_skipped() {
        let channel = Arc::new(FrameChannel::new(4).unwrap());
        let shutdown = CancellationToken::new();
        let (client, server) = tokio::io::duplex(1024);
        let config = config().max_payload_size(4);
        let (connection, _, _) = session(1, server, &channel, config, &shutdown);

        channel.publish(Bytes::from_static(b"too long")).unwrap();
        channel.publish(Bytes::from_static(b"ok")).unwrap();
        channel.close();

        let (stats, _) = connection.run().await;
        assert_eq!(stats.frames_sent, 1);
        assert_eq!(stats.dropped_frames, 1);

        let mut reader = FrameReader::new(client, 4);
        assert_eq!(reader.read_frame().await.unwrap(), &b"ok"[..]);
    }
}
