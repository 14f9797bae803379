//! Frame server listener
//!
//! Handles the TCP accept loop, enforces the session ceiling and spawns a
//! [`Connection`] per accepted socket.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use bytes::Bytes;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::channel::{FrameChannel, Published};
use crate::error::{Error, Result};
use crate::server::config::ServerConfig;
use crate::server::connection::Connection;
use crate::server::sessions::{SessionHandle, SessionRegistry};
use crate::session::CloseReason;
use crate::stats::{ServerStats, SessionStats};

/// Capacity of the server event queue
const EVENT_QUEUE_SIZE: usize = 256;

/// Events from the frame server
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A connection was accepted and its session started
    SessionOpened {
        session_id: u64,
        peer_addr: SocketAddr,
    },

    /// A session ended and released its socket
    SessionClosed {
        stats: SessionStats,
        reason: CloseReason,
    },

    /// A connection was closed unread because the session ceiling was reached
    CapacityExceeded { peer_addr: SocketAddr },
}

/// Frame server
///
/// Owns the listening socket, the frame channel and the registry of live
/// sessions.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use bytes::Bytes;
/// use framecast::{FrameServer, ServerConfig};
///
/// # async fn example() -> framecast::Result<()> {
/// let (server, mut events) = FrameServer::bind(ServerConfig::default()).await?;
/// let server = Arc::new(server);
///
/// tokio::spawn(async move {
///     while let Some(event) = events.recv().await {
///         println!("Event: {:?}", event);
///     }
/// });
///
/// let runner = Arc::clone(&server);
/// tokio::spawn(async move { runner.run().await });
///
/// server.publish(Bytes::from_static(b"jpeg bytes"))?;
/// # Ok(())
/// # }
/// ```
pub struct FrameServer {
    config: ServerConfig,
    channel: Arc<FrameChannel>,
    listener: Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
    sessions: Arc<SessionRegistry>,
    stats: Arc<Mutex<ServerStats>>,
    next_session_id: AtomicU64,
    session_semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    event_tx: mpsc::Sender<ServerEvent>,
    started_at: Instant,
}

impl FrameServer {
    /// Bind the listening socket, creating a frame channel sized from the
    /// configuration.
    ///
    /// Returns the server and a receiver for its events.
    pub async fn bind(config: ServerConfig) -> Result<(Self, mpsc::Receiver<ServerEvent>)> {
        config.validate()?;
        let channel = Arc::new(FrameChannel::new(config.channel_capacity)?);
        Self::bind_with_channel(config, channel).await
    }

    /// Bind the listening socket, serving frames from an existing channel
    pub async fn bind_with_channel(
        config: ServerConfig,
        channel: Arc<FrameChannel>,
    ) -> Result<(Self, mpsc::Receiver<ServerEvent>)> {
        config.validate()?;

        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_SIZE);

        let server = Self {
            session_semaphore: Arc::new(Semaphore::new(config.max_sessions)),
            config,
            channel,
            listener: Mutex::new(Some(listener)),
            local_addr,
            sessions: Arc::new(SessionRegistry::new()),
            stats: Arc::new(Mutex::new(ServerStats::new())),
            next_session_id: AtomicU64::new(1),
            cancel: CancellationToken::new(),
            event_tx,
            started_at: Instant::now(),
        };

        Ok((server, event_rx))
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The frame channel feeding every session
    pub fn channel(&self) -> &Arc<FrameChannel> {
        &self.channel
    }

    /// Publish a frame to every session
    pub fn publish(&self, payload: Bytes) -> Result<Published> {
        self.channel.publish(payload)
    }

    /// Token cancelled when the server shuts down
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request shutdown. [`run`](Self::run) closes every session and returns.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Close one session's socket. Returns false if it is not live.
    pub fn disconnect(&self, session_id: u64) -> bool {
        let found = self.sessions.disconnect(session_id);
        if found {
            tracing::info!(session_id = session_id, "Disconnect requested");
        }
        found
    }

    /// Statistics for every live session
    pub fn sessions(&self) -> Vec<SessionStats> {
        self.sessions.snapshots()
    }

    /// Number of live sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Server-wide statistics
    pub fn stats(&self) -> ServerStats {
        let mut stats = lock(&self.stats).clone();
        stats.active_sessions = self.sessions.len() as u64;
        stats.uptime = self.started_at.elapsed();
        stats
    }

    /// Run the accept loop until [`shutdown`](Self::shutdown) is called.
    ///
    /// On return every session has been stopped and joined and the listening
    /// socket is closed. May only be called once.
    pub async fn run(&self) -> Result<()> {
        let listener = lock(&self.listener).take().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::AddrInUse,
                "frame server is already running",
            ))
        })?;

        tracing::info!(
            addr = %self.local_addr,
            max_sessions = self.config.max_sessions,
            channel_capacity = self.channel.capacity(),
            "Frame server listening"
        );

        let monitor = self.spawn_monitor();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((socket, peer_addr)) => self.handle_connection(socket, peer_addr),
                    Err(e) => tracing::error!(error = %e, "Failed to accept connection"),
                },
            }
        }

        drop(listener);
        monitor.abort();
        tracing::info!("Shutdown signal received, closing sessions");

        self.close_all_sessions().await;
        self.log_summary();
        Ok(())
    }

    /// Run the server until `shutdown` completes
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let run = self.run();
        tokio::pin!(run);

        tokio::select! {
            result = &mut run => return result,
            _ = shutdown => self.shutdown(),
        }

        run.await
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        // Check session limit; reject without reading
        let permit = match Arc::clone(&self.session_semaphore).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::warn!(peer = %peer_addr, "Connection rejected: session limit reached");
                lock(&self.stats).rejected_connections += 1;
                self.emit(ServerEvent::CapacityExceeded { peer_addr });
                return;
            }
        };

        if self.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::error!(peer = %peer_addr, error = %e, "Failed to configure socket");
                return;
            }
        }

        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let cancel = self.cancel.child_token();
        let cursor = if self.config.replay_history {
            self.channel.subscribe()
        } else {
            self.channel.subscribe_latest()
        };

        let (connection, stats_rx) = Connection::new(
            session_id,
            peer_addr,
            socket,
            Arc::clone(&self.channel),
            cursor,
            self.config.clone(),
            cancel.clone(),
            self.cancel.clone(),
        );

        self.sessions
            .insert(session_id, SessionHandle::new(peer_addr, cancel, stats_rx));
        lock(&self.stats).total_sessions += 1;

        tracing::info!(session_id = session_id, peer = %peer_addr, "Session opened");
        self.emit(ServerEvent::SessionOpened {
            session_id,
            peer_addr,
        });

        let sessions = Arc::clone(&self.sessions);
        let server_stats = Arc::clone(&self.stats);
        let events = self.event_tx.clone();

        let task = tokio::spawn(async move {
            let _permit = permit;
            let (stats, reason) = connection.run().await;

            // Totals first: once the entry is gone shutdown no longer joins this task
            lock(&server_stats).absorb(&stats);
            sessions.remove(session_id);
            let _ = events.try_send(ServerEvent::SessionClosed { stats, reason });
        });

        self.sessions.attach(session_id, task);
    }

    fn emit(&self, event: ServerEvent) {
        // Never let a slow event consumer stall the accept loop
        if let Err(e) = self.event_tx.try_send(event) {
            tracing::debug!(error = %e, "Server event dropped");
        }
    }

    fn spawn_monitor(&self) -> JoinHandle<()> {
        let sessions = Arc::clone(&self.sessions);
        let interval = self.config.stats_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let snapshots = sessions.snapshots();
                if snapshots.is_empty() {
                    continue;
                }

                tracing::info!(active_sessions = snapshots.len(), "Session report");
                for stats in snapshots {
                    let avg_latency_ms = stats
                        .avg_latency
                        .map(|l| l.as_secs_f64() * 1000.0)
                        .unwrap_or(0.0);
                    tracing::info!(
                        session_id = stats.session_id,
                        peer = %stats.peer_addr,
                        frames_sent = stats.frames_sent,
                        dropped_frames = stats.dropped_frames,
                        fps = stats.fps(),
                        avg_latency_ms = avg_latency_ms,
                        "Session stats"
                    );
                }
            }
        })
    }

    async fn close_all_sessions(&self) {
        self.cancel.cancel();
        for handle in self.sessions.drain() {
            handle.cancel();
            handle.join().await;
        }
    }

    fn log_summary(&self) {
        let stats = self.stats();
        tracing::info!(
            total_sessions = stats.total_sessions,
            rejected_connections = stats.rejected_connections,
            total_frames_sent = stats.total_frames_sent,
            total_mb_sent = stats.total_bytes_sent as f64 / (1024.0 * 1024.0),
            uptime_secs = stats.uptime.as_secs_f64(),
            "Frame server stopped"
        );
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
