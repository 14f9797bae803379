//! Bounded frame ring
//!
//! The ring and its counters sit behind one mutex; readers are woken through
//! a `watch` channel carrying the next sequence number to be assigned.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::watch;

use super::frame::{ChannelStats, Frame, Published, Received};
use crate::error::{Error, Result};

/// Default capacity: about one second of video at 30 fps
pub const DEFAULT_CAPACITY: usize = 30;

struct Ring {
    /// Resident frames, oldest at the front
    slots: VecDeque<Frame>,
    /// Sequence number the next published frame receives
    next_sequence: u64,
    evicted: u64,
    closed: bool,
}

impl Ring {
    fn oldest_sequence(&self) -> u64 {
        self.next_sequence - self.slots.len() as u64
    }
}

/// Independent read position into a [`FrameChannel`]
#[derive(Debug)]
pub struct Cursor {
    next: u64,
    wake: watch::Receiver<u64>,
}

impl Cursor {
    /// Sequence number this cursor will read next
    pub fn position(&self) -> u64 {
        self.next
    }
}

/// Bounded, drop-oldest frame buffer shared by one producer and any number
/// of cursors.
///
/// `publish` never blocks. When the ring is full the oldest frame is evicted;
/// a cursor that falls behind the eviction point jumps forward and reports
/// the gap through [`Received::skipped`].
pub struct FrameChannel {
    ring: Mutex<Ring>,
    notify: watch::Sender<u64>,
    capacity: usize,
}

impl FrameChannel {
    /// Create a channel holding at most `capacity` frames
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::invalid_config("channel capacity must be at least 1"));
        }

        let (notify, _) = watch::channel(0);
        Ok(Self {
            ring: Mutex::new(Ring {
                slots: VecDeque::with_capacity(capacity),
                next_sequence: 0,
                evicted: 0,
                closed: false,
            }),
            notify,
            capacity,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Ring> {
        // Ring invariants hold between statements, so a poisoned lock is still usable
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Maximum number of resident frames
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of frames currently resident
    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Publish a frame, evicting the oldest one if the ring is full.
    ///
    /// Publishing to a closed channel fails with [`Error::ChannelClosed`].
    pub fn publish(&self, payload: Bytes) -> Result<Published> {
        let published = {
            let mut ring = self.lock();
            if ring.closed {
                return Err(Error::ChannelClosed);
            }

            let evicted = if ring.slots.len() == self.capacity {
                ring.slots.pop_front();
                ring.evicted += 1;
                true
            } else {
                false
            };

            let sequence = ring.next_sequence;
            ring.slots.push_back(Frame::new(sequence, payload));
            ring.next_sequence += 1;

            Published { sequence, evicted }
        };

        if published.evicted {
            tracing::trace!(sequence = published.sequence, "Frame channel full, evicted oldest");
        }

        self.notify.send_replace(published.sequence + 1);
        Ok(published)
    }

    /// Obtain a cursor starting at the oldest resident frame
    pub fn subscribe(&self) -> Cursor {
        let ring = self.lock();
        Cursor {
            next: ring.oldest_sequence(),
            wake: self.notify.subscribe(),
        }
    }

    /// Obtain a cursor that only sees frames published from now on
    pub fn subscribe_latest(&self) -> Cursor {
        let ring = self.lock();
        Cursor {
            next: ring.next_sequence,
            wake: self.notify.subscribe(),
        }
    }

    /// Read the next frame for `cursor` without waiting.
    ///
    /// Returns `Ok(None)` when the cursor has caught up with the producer,
    /// and [`Error::ChannelClosed`] once the channel is closed and drained.
    pub fn try_next(&self, cursor: &mut Cursor) -> Result<Option<Received>> {
        let ring = self.lock();

        let oldest = ring.oldest_sequence();
        let skipped = oldest.saturating_sub(cursor.next);
        if skipped > 0 {
            cursor.next = oldest;
        }

        if cursor.next < ring.next_sequence {
            let index = (cursor.next - oldest) as usize;
            let frame = ring.slots[index].clone();
            cursor.next += 1;
            return Ok(Some(Received { frame, skipped }));
        }

        if ring.closed {
            return Err(Error::ChannelClosed);
        }

        Ok(None)
    }

    /// Wait for the next frame for `cursor`.
    ///
    /// Cancel safe: dropping the future leaves the cursor where it was, so
    /// callers can race it against a timeout or a cancellation token.
    pub async fn next(&self, cursor: &mut Cursor) -> Result<Received> {
        loop {
            // Mark the current version seen before checking, so a publish that
            // lands between the check and the wait still wakes us.
            cursor.wake.borrow_and_update();

            if let Some(received) = self.try_next(cursor)? {
                return Ok(received);
            }

            if cursor.wake.changed().await.is_err() {
                return Err(Error::ChannelClosed);
            }
        }
    }

    /// Close the channel, waking every waiting cursor.
    ///
    /// Cursors still drain resident frames before seeing
    /// [`Error::ChannelClosed`].
    pub fn close(&self) {
        let next = {
            let mut ring = self.lock();
            ring.closed = true;
            ring.next_sequence
        };
        self.notify.send_modify(|value| *value = next);
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Snapshot of occupancy and counters
    pub fn stats(&self) -> ChannelStats {
        let ring = self.lock();
        ChannelStats {
            capacity: self.capacity,
            resident: ring.slots.len(),
            published: ring.next_sequence,
            evicted: ring.evicted,
            closed: ring.closed,
        }
    }
}

impl std::fmt::Debug for FrameChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameChannel")
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    fn payload(tag: &'static str) -> Bytes {
        Bytes::from_static(tag.as_bytes())
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(FrameChannel::new(0), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_publish_reports_eviction() {
        let channel = FrameChannel::new(2).unwrap();

        assert!(!channel.publish(payload("a")).unwrap().evicted);
        assert!(!channel.publish(payload("b")).unwrap().evicted);

        let published = channel.publish(payload("c")).unwrap();
        assert!(published.evicted);
        assert_eq!(published.sequence, 2);

        let stats = channel.stats();
        assert_eq!(stats.resident, 2);
        assert_eq!(stats.published, 3);
        assert_eq!(stats.evicted, 1);
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let channel = FrameChannel::new(5).unwrap();
        for i in 0..100u32 {
            channel.publish(Bytes::from(i.to_be_bytes().to_vec())).unwrap();
            assert!(channel.len() <= 5);
        }
        assert_eq!(channel.len(), 5);
    }

    #[test]
    fn test_late_subscriber_sees_newest_frames() {
        let channel = FrameChannel::new(3).unwrap();
        for tag in ["A", "B", "C", "D", "E"] {
            channel.publish(payload(tag)).unwrap();
        }

        let mut cursor = channel.subscribe();
        let reads: Vec<Bytes> = (0..3)
            .map(|_| channel.try_next(&mut cursor).unwrap().unwrap().frame.payload().clone())
            .collect();

        assert_eq!(reads, vec![payload("C"), payload("D"), payload("E")]);
        assert!(channel.try_next(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn test_oldest_evicted_for_every_cursor() {
        let channel = FrameChannel::new(3).unwrap();
        let mut early = channel.subscribe();

        for tag in ["F1", "F2", "F3"] {
            channel.publish(payload(tag)).unwrap();
        }
        channel.publish(payload("F4")).unwrap();

        // F1 is gone: the early cursor skips it and starts at F2
        let first = channel.try_next(&mut early).unwrap().unwrap();
        assert_eq!(first.frame.payload(), &payload("F2"));
        assert_eq!(first.skipped, 1);

        let mut late = channel.subscribe();
        let first = channel.try_next(&mut late).unwrap().unwrap();
        assert_eq!(first.frame.payload(), &payload("F2"));
        assert_eq!(first.skipped, 0);
    }

    #[test]
    fn test_cursors_are_independent() {
        let channel = FrameChannel::new(4).unwrap();
        let mut fast = channel.subscribe();
        let mut slow = channel.subscribe();

        channel.publish(payload("1")).unwrap();
        channel.publish(payload("2")).unwrap();

        assert_eq!(channel.try_next(&mut fast).unwrap().unwrap().frame.sequence(), 0);
        assert_eq!(channel.try_next(&mut fast).unwrap().unwrap().frame.sequence(), 1);
        assert!(channel.try_next(&mut fast).unwrap().is_none());

        assert_eq!(channel.try_next(&mut slow).unwrap().unwrap().frame.sequence(), 0);
        assert_eq!(slow.position(), 1);
    }

    #[test]
    fn test_slow_cursor_counts_skipped_frames() {
        let channel = FrameChannel::new(2).unwrap();
        let mut cursor = channel.subscribe();

        for i in 0..10u8 {
            channel.publish(Bytes::from(vec![i])).unwrap();
        }

        let received = channel.try_next(&mut cursor).unwrap().unwrap();
        assert_eq!(received.skipped, 8);
        assert_eq!(received.frame.sequence(), 8);
        let received = channel.try_next(&mut cursor).unwrap().unwrap();
        assert_eq!(received.skipped, 0);
        assert_eq!(received.frame.sequence(), 9);
    }

    #[test]
    fn test_subscribe_latest_skips_history() {
        let channel = FrameChannel::new(3).unwrap();
        channel.publish(payload("old")).unwrap();

        let mut cursor = channel.subscribe_latest();
        assert!(channel.try_next(&mut cursor).unwrap().is_none());

        channel.publish(payload("new")).unwrap();
        let received = channel.try_next(&mut cursor).unwrap().unwrap();
        assert_eq!(received.frame.payload(), &payload("new"));
    }

    #[test]
    fn test_close_drains_then_fails() {
        let channel = FrameChannel::new(3).unwrap();
        let mut cursor = channel.subscribe();
        channel.publish(payload("last")).unwrap();
        channel.close();

        assert!(matches!(channel.publish(payload("late")), Err(Error::ChannelClosed)));
        assert!(channel.try_next(&mut cursor).unwrap().is_some());
        assert!(matches!(channel.try_next(&mut cursor), Err(Error::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_next_waits_for_publish() {
        let channel = Arc::new(FrameChannel::new(3).unwrap());
        let mut cursor = channel.subscribe();

        let reader = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.next(&mut cursor).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        channel.publish(payload("wake")).unwrap();

        let received = reader.await.unwrap().unwrap();
        assert_eq!(received.frame.payload(), &payload("wake"));
    }

    #[tokio::test]
    async fn test_next_is_cancellable() {
        let channel = FrameChannel::new(3).unwrap();
        let mut cursor = channel.subscribe();

        let result =
            tokio::time::timeout(Duration::from_millis(20), channel.next(&mut cursor)).await;
        assert!(result.is_err());

        // The cursor is still usable after the abandoned wait
        channel.publish(payload("after")).unwrap();
        let received = channel.next(&mut cursor).await.unwrap();
        assert_eq!(received.frame.sequence(), 0);
    }

    #[tokio::test]
    async fn test_close_wakes_waiting_cursor() {
        let channel = Arc::new(FrameChannel::new(3).unwrap());
        let mut cursor = channel.subscribe();

        let reader = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.next(&mut cursor).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        channel.close();

        assert!(matches!(reader.await.unwrap(), Err(Error::ChannelClosed)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_readers_never_see_torn_frames() {
        let channel = Arc::new(FrameChannel::new(8).unwrap());
        let mut readers = Vec::new();

        for _ in 0..4 {
            let channel = Arc::clone(&channel);
            let mut cursor = channel.subscribe();
            readers.push(tokio::spawn(async move {
                let mut last = None;
                loop {
                    match channel.next(&mut cursor).await {
                        Ok(received) => {
                            let frame = received.frame;
                            // Every byte of a frame carries its sequence number
                            let tag = (frame.sequence() % 256) as u8;
                            assert!(frame.payload().iter().all(|b| *b == tag));
                            assert_eq!(frame.len(), 512);
                            if let Some(prev) = last {
                                assert!(frame.sequence() > prev);
                            }
                            last = Some(frame.sequence());
                        }
                        Err(Error::ChannelClosed) => return last,
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
            }));
        }

        for seq in 0..2000u64 {
            channel.publish(Bytes::from(vec![(seq % 256) as u8; 512])).unwrap();
            if seq % 100 == 0 {
                tokio::task::yield_now().await;
            }
        }
        channel.close();

        for reader in readers {
            assert_eq!(reader.await.unwrap(), Some(1999));
        }
    }
}
