//! Frame producer
//!
//! Pulls encoded frames from a [`FrameSource`] at a target rate and
//! publishes them to a [`FrameChannel`]. Capture never waits on the network:
//! publishing evicts the oldest resident frame when the channel is full.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::channel::FrameChannel;
use crate::error::{Error, Result};

/// Default capture rate
pub const DEFAULT_TARGET_FPS: u32 = 30;

/// Log capture rate every this many frames
const FPS_LOG_INTERVAL: u64 = 30;

/// Supplier of encoded frames
pub trait FrameSource: Send {
    /// Next encoded frame, or `None` when the source is finished
    fn next_frame(&mut self) -> impl Future<Output = Option<Bytes>> + Send;
}

impl FrameSource for mpsc::Receiver<Bytes> {
    async fn next_frame(&mut self) -> Option<Bytes> {
        self.recv().await
    }
}

/// Producer totals
#[derive(Debug, Clone, Default)]
pub struct ProducerStats {
    pub frames_published: u64,
    pub bytes_published: u64,
    /// Frames evicted unread to make room for newer ones
    pub evicted: u64,
    pub duration: Duration,
}

impl ProducerStats {
    pub fn fps(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.frames_published as f64 / secs
        } else {
            0.0
        }
    }
}

/// Publish frames from `source` until it ends or `cancel` fires.
///
/// Paces at `target_fps`, skipping ticks that were missed while the source
/// was slow. The channel is closed on return so sessions drain what is
/// resident and end.
pub async fn run_producer<S: FrameSource>(
    mut source: S,
    channel: Arc<FrameChannel>,
    target_fps: u32,
    cancel: CancellationToken,
) -> Result<ProducerStats> {
    if target_fps == 0 {
        return Err(Error::invalid_config("target_fps must be at least 1"));
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(1) / target_fps);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let started = Instant::now();
    let mut stats = ProducerStats::default();
    let mut window_start = started;

    tracing::info!(target_fps = target_fps, capacity = channel.capacity(), "Producer started");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let payload = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            frame = source.next_frame() => match frame {
                Some(payload) => payload,
                None => {
                    tracing::info!("Frame source finished");
                    break;
                }
            },
        };

        let size = payload.len();
        match channel.publish(payload) {
            Ok(published) => {
                stats.frames_published += 1;
                stats.bytes_published += size as u64;
                if published.evicted {
                    stats.evicted += 1;
                }
            }
            Err(Error::ChannelClosed) => {
                tracing::info!("Frame channel closed, producer stopping");
                break;
            }
            Err(e) => return Err(e),
        }

        if stats.frames_published % FPS_LOG_INTERVAL == 0 {
            let elapsed = window_start.elapsed().as_secs_f64();
            if elapsed > 0.0 {
                tracing::debug!(
                    capture_fps = FPS_LOG_INTERVAL as f64 / elapsed,
                    frames_published = stats.frames_published,
                    evicted = stats.evicted,
                    "Capture rate"
                );
            }
            window_start = Instant::now();
        }
    }

    channel.close();
    stats.duration = started.elapsed();

    tracing::info!(
        frames_published = stats.frames_published,
        evicted = stats.evicted,
        fps = stats.fps(),
        "Producer stopped"
    );

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ListSource(std::vec::IntoIter<&'static [u8]>);

    impl FrameSource for ListSource {
        async fn next_frame(&mut self) -> Option<Bytes> {
            self.0.next().map(Bytes::from_static)
        }
    }

    struct PendingSource;

    impl FrameSource for PendingSource {
        async fn next_frame(&mut self) -> Option<Bytes> {
            std::future::pending().await
        }
    }

    fn list(items: &[&'static [u8]]) -> ListSource {
        ListSource(items.to_vec().into_iter())
    }

    #[tokio::test]
    async fn test_publishes_until_source_ends() {
        let channel = Arc::new(FrameChannel::new(3).unwrap());
        let source = list(&[b"A", b"B", b"C", b"D", b"E"]);

        let stats = run_producer(source, Arc::clone(&channel), 1000, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stats.frames_published, 5);
        assert_eq!(stats.bytes_published, 5);
        assert_eq!(stats.evicted, 2);
        assert!(channel.is_closed());

        let mut cursor = channel.subscribe();
        let mut resident = Vec::new();
        while let Ok(received) = channel.next(&mut cursor).await {
            resident.push(received.frame.payload().clone());
        }
        assert_eq!(resident, vec!["C", "D", "E"]);
    }

    #[tokio::test]
    async fn test_paces_to_target_rate() {
        let channel = Arc::new(FrameChannel::new(8).unwrap());
        let source = list(&[b"1", b"2", b"3", b"4", b"5"]);

        let started = Instant::now();
        run_producer(source, channel, 100, CancellationToken::new())
            .await
            .unwrap();

        // First tick is immediate, the other four are 10ms apart
        assert!(started.elapsed() >= Duration::from_millis(35));
    }

    #[tokio::test]
    async fn test_cancel_stops_waiting_source() {
        let channel = Arc::new(FrameChannel::new(3).unwrap());
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_producer(
            PendingSource,
            Arc::clone(&channel),
            30,
            cancel.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats.frames_published, 0);
        assert!(channel.is_closed());
    }

    #[tokio::test]
    async fn test_stops_when_channel_closed() {
        let channel = Arc::new(FrameChannel::new(3).unwrap());
        channel.close();

        let stats = run_producer(list(&[b"x"]), channel, 1000, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stats.frames_published, 0);
    }

    #[tokio::test]
    async fn test_mpsc_source() {
        let channel = Arc::new(FrameChannel::new(4).unwrap());
        let (tx, rx) = mpsc::channel(4);
        tx.send(Bytes::from_static(b"jpeg")).await.unwrap();
        drop(tx);

        let stats = run_producer(rx, channel, 1000, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(stats.frames_published, 1);
    }

    #[tokio::test]
    async fn test_rejects_zero_rate() {
        let channel = Arc::new(FrameChannel::new(3).unwrap());
        let result = run_producer(list(&[]), channel, 0, CancellationToken::new()).await;

        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }
}
