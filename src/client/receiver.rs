//! Client receive loop
//!
//! Connects to a sender, reassembles envelopes from the byte stream and
//! hands each payload to a [`FrameSink`]. A lost or refused connection is
//! handed to the [`ReconnectController`], which decides whether and when to
//! try again.

use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::config::ClientConfig;
use super::connector::{Connector, TcpConnector};
use super::reconnect::{Decision, ReconnectController};
use super::sink::{FrameSink, SinkError};
use super::state::ReceiverState;
use crate::error::{Error, Result};
use crate::protocol::{FrameReader, HEADER_SIZE};
use crate::stats::{ClientMetrics, ClientStats};

/// Average inter-frame interval above which the progress log warns
const HIGH_LATENCY: Duration = Duration::from_millis(100);

/// How a streaming phase ended
enum StreamEnd {
    /// Stop requested
    Cancelled,
    /// The consumer went away
    SinkClosed,
    /// Read error, timeout, protocol violation or sender close
    Failed(Error),
}

/// Client receive loop
///
/// # Example
/// ```no_run
/// use framecast::{frame_sink, ClientConfig, FrameReceiver};
///
/// # async fn example() -> framecast::Result<()> {
/// let config = ClientConfig::new("127.0.0.1:8002".parse().unwrap());
/// let (sink, mut frames) = frame_sink(30)?;
/// let (receiver, _stats) = FrameReceiver::new(config, sink)?;
///
/// tokio::spawn(async move {
///     while let Some(jpeg) = frames.recv().await {
///         println!("frame: {} bytes", jpeg.len());
///     }
/// });
///
/// let stats = receiver.run().await?;
/// println!("received {} frames", stats.frames_received);
/// # Ok(())
/// # }
/// ```
pub struct FrameReceiver<C: Connector, K: FrameSink> {
    config: ClientConfig,
    connector: C,
    sink: K,
    controller: ReconnectController,
    metrics: ClientMetrics,
    state: ReceiverState,
    stats_tx: watch::Sender<ClientStats>,
    cancel: CancellationToken,
}

impl<K: FrameSink> FrameReceiver<TcpConnector, K> {
    /// Create a receiver that connects over TCP to `config.server_addr`.
    ///
    /// Returns the receiver and a watch channel carrying its latest
    /// statistics.
    pub fn new(config: ClientConfig, sink: K) -> Result<(Self, watch::Receiver<ClientStats>)> {
        let connector = TcpConnector::from_config(&config);
        Self::with_connector(config, connector, sink)
    }
}

impl<C: Connector, K: FrameSink> FrameReceiver<C, K> {
    /// Create a receiver using a custom connector
    pub fn with_connector(
        config: ClientConfig,
        connector: C,
        sink: K,
    ) -> Result<(Self, watch::Receiver<ClientStats>)> {
        config.validate()?;

        let controller = ReconnectController::from_config(&config);
        let metrics = ClientMetrics::new();
        let state = ReceiverState::Connecting;
        let (stats_tx, stats_rx) = watch::channel(metrics.snapshot(state, 0));

        let receiver = Self {
            config,
            connector,
            sink,
            controller,
            metrics,
            state,
            stats_tx,
            cancel: CancellationToken::new(),
        };

        Ok((receiver, stats_rx))
    }

    /// Stop on an externally owned token instead of a private one
    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops the receive loop when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until stopped, the consumer closes, or the attempt budget is spent.
    ///
    /// Returns the final statistics on a requested stop, or
    /// [`Error::ConnectionExhausted`] once consecutive connection attempts
    /// run out.
    pub async fn run(mut self) -> Result<ClientStats> {
        let endpoint = self.connector.endpoint();
        let mut had_stream = false;

        let outcome = loop {
            self.set_state(ReceiverState::Connecting);
            let attempt = self.controller.attempts() + 1;
            tracing::info!(
                endpoint = %endpoint,
                attempt = attempt,
                max_attempts = self.controller.max_attempts(),
                "Connecting to sender"
            );

            let connected = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break Ok(()),
                result = self.connector.connect() => result,
            };

            let stream = match connected {
                Ok(stream) => stream,
                Err(e) => {
                    self.metrics.on_connect_failed();
                    self.set_state(ReceiverState::Failed);
                    tracing::warn!(
                        endpoint = %endpoint,
                        attempt = attempt,
                        error = %e,
                        "Connection attempt failed"
                    );

                    match self.controller.on_connect_failed() {
                        Decision::Exhausted { attempts } => {
                            tracing::error!(
                                endpoint = %endpoint,
                                attempts = attempts,
                                "Giving up: connection attempts exhausted"
                            );
                            break Err(Error::ConnectionExhausted { attempts });
                        }
                        Decision::Retry { attempt, delay } => {
                            if !self.wait_before(attempt, delay).await {
                                break Ok(());
                            }
                            continue;
                        }
                    }
                }
            };

            self.controller.on_connected();
            self.metrics.on_connected(had_stream);
            if had_stream {
                tracing::info!(
                    endpoint = %endpoint,
                    reconnections = self.metrics.reconnections,
                    "Reconnected to sender"
                );
            } else {
                tracing::info!(endpoint = %endpoint, "Connected to sender");
            }
            had_stream = true;
            self.set_state(ReceiverState::Streaming);
            let frames_before = self.metrics.frames_received;

            match self.stream(stream).await {
                StreamEnd::Cancelled => break Ok(()),
                StreamEnd::SinkClosed => {
                    tracing::info!("Frame consumer closed, stopping");
                    break Ok(());
                }
                StreamEnd::Failed(e) => {
                    self.metrics.on_stream_error();
                    self.metrics.on_disconnected();
                    self.set_state(ReceiverState::Failed);
                    tracing::warn!(endpoint = %endpoint, error = %e, "Stream lost");
                    if self.metrics.frames_received == frames_before {
                        // A sender at its session ceiling accepts and closes; the budget
                        // was reset on connect, so this repeats until cancelled
                        tracing::warn!(
                            endpoint = %endpoint,
                            "Connection closed before the first frame"
                        );
                    }

                    let delay = self.controller.on_stream_lost();
                    if !self.wait_before(1, delay).await {
                        break Ok(());
                    }
                }
            }
        };

        self.metrics.on_disconnected();
        self.set_state(ReceiverState::Stopped);
        self.log_summary();

        outcome.map(|()| self.snapshot())
    }

    /// Read envelopes until the stream fails or the loop is told to stop
    async fn stream(&mut self, stream: C::Stream) -> StreamEnd {
        let mut reader = FrameReader::new(stream, self.config.max_payload_size);
        let read_timeout = self.config.read_timeout;

        loop {
            let read = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return StreamEnd::Cancelled,
                read = tokio::time::timeout(read_timeout, reader.read_frame()) => read,
            };

            let payload = match read {
                Ok(Ok(payload)) => payload,
                Ok(Err(e)) => return StreamEnd::Failed(e),
                Err(_) => return StreamEnd::Failed(Error::timeout("frame read", read_timeout)),
            };

            self.metrics.on_frame_received(HEADER_SIZE + payload.len());

            match self.sink.deliver(payload) {
                Ok(()) => {}
                Err(SinkError::Full) => {
                    self.metrics.on_frame_dropped();
                    tracing::debug!(
                        dropped_frames = self.metrics.dropped_frames,
                        "Consumer behind, frame dropped"
                    );
                }
                Err(SinkError::Closed) => return StreamEnd::SinkClosed,
            }

            self.publish();
            self.log_progress();
        }
    }

    /// Wait out a reconnection delay. Returns false if stopped meanwhile.
    async fn wait_before(&mut self, attempt: u32, delay: Duration) -> bool {
        self.set_state(ReceiverState::Reconnecting);
        tracing::info!(
            attempt = attempt,
            max_attempts = self.controller.max_attempts(),
            delay_ms = delay.as_millis() as u64,
            "Reconnecting"
        );

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    fn log_progress(&self) {
        let every = self.config.stats_log_interval;
        if every == 0 || self.metrics.frames_received % every != 0 {
            return;
        }

        let stats = self.snapshot();
        let avg_latency_ms = stats
            .avg_latency
            .map(|l| l.as_secs_f64() * 1000.0)
            .unwrap_or(0.0);

        tracing::info!(
            frames_received = stats.frames_received,
            fps = stats.average_fps(),
            avg_latency_ms = avg_latency_ms,
            dropped_frames = stats.dropped_frames,
            "Receive progress"
        );

        if stats.avg_latency.is_some_and(|l| l > HIGH_LATENCY) {
            tracing::warn!(avg_latency_ms = avg_latency_ms, "High frame latency");
        }
    }

    fn log_summary(&self) {
        let stats = self.snapshot();
        tracing::info!(
            duration_secs = stats.duration.as_secs_f64(),
            frames_received = stats.frames_received,
            mb_received = stats.bytes_received as f64 / (1024.0 * 1024.0),
            avg_fps = stats.average_fps(),
            data_rate_mbps = stats.data_rate_mbps(),
            dropped_frames = stats.dropped_frames,
            errors = stats.errors,
            reconnections = stats.reconnections,
            quality = %stats.quality(),
            "Receiver stopped"
        );
    }

    fn set_state(&mut self, state: ReceiverState) {
        self.state = state;
        self.publish();
    }

    fn publish(&self) {
        self.stats_tx.send_replace(self.snapshot());
    }

    fn snapshot(&self) -> ClientStats {
        self.metrics.snapshot(self.state, self.controller.attempts())
    }
}
