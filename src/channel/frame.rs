//! Frame types held by the channel

use std::time::Instant;

use bytes::Bytes;

/// A published frame
///
/// Immutable once created. Cloning only bumps the reference count on the
/// payload, so every reader shares the producer's allocation and no reader
/// can observe a partially overwritten frame.
#[derive(Debug, Clone)]
pub struct Frame {
    sequence: u64,
    payload: Bytes,
    published_at: Instant,
}

impl Frame {
    pub(super) fn new(sequence: u64, payload: Bytes) -> Self {
        Self {
            sequence,
            payload,
            published_at: Instant::now(),
        }
    }

    /// Position of this frame in the publish order, starting at 0
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Opaque encoded payload
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// When the frame entered the channel
    pub fn published_at(&self) -> Instant {
        self.published_at
    }
}

/// A frame handed to a cursor, along with how many frames that cursor lost
/// to eviction since its previous read.
#[derive(Debug, Clone)]
pub struct Received {
    pub frame: Frame,
    pub skipped: u64,
}

/// Result of a publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Published {
    /// Sequence number assigned to the new frame
    pub sequence: u64,
    /// Whether the oldest resident frame was evicted to make room
    pub evicted: bool,
}

/// Channel occupancy and throughput counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelStats {
    pub capacity: usize,
    pub resident: usize,
    pub published: u64,
    pub evicted: u64,
    pub closed: bool,
}
