//! Consumer sink interface
//!
//! The receive loop hands each reassembled payload to a [`FrameSink`]. The
//! hand-off must not block: decoding and rendering happen elsewhere, on the
//! far side of a queue.

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::error::Result;

/// Why a sink refused a payload
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkError {
    /// Consumer is behind; the payload is dropped
    #[error("consumer queue full")]
    Full,
    /// Consumer is gone; the receive loop stops
    #[error("consumer closed")]
    Closed,
}

/// Destination for reassembled payloads, in delivery order
pub trait FrameSink: Send {
    /// Hand over one payload without blocking
    fn deliver(&mut self, payload: Bytes) -> Result<(), SinkError>;
}

/// Sink backed by a bounded `mpsc` queue
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Bytes>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx }
    }
}

impl FrameSink for ChannelSink {
    fn deliver(&mut self, payload: Bytes) -> Result<(), SinkError> {
        self.tx.try_send(payload).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::Full,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

/// Create a queue-backed sink and the consumer end of its queue.
///
/// A zero capacity is rejected with
/// [`Error::InvalidConfig`](crate::Error::InvalidConfig).
pub fn frame_sink(capacity: usize) -> Result<(ChannelSink, mpsc::Receiver<Bytes>)> {
    if capacity == 0 {
        return Err(crate::Error::invalid_config("sink capacity must be at least 1"));
    }
    let (tx, rx) = mpsc::channel(capacity);
    Ok((ChannelSink::new(tx), rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivers_in_order() {
        let (mut sink, mut rx) = frame_sink(4).unwrap();
        sink.deliver(Bytes::from_static(b"1")).unwrap();
        sink.deliver(Bytes::from_static(b"2")).unwrap();

        assert_eq!(rx.try_recv().unwrap(), &b"1"[..]);
        assert_eq!(rx.try_recv().unwrap(), &b"2"[..]);
    }

    #[test]
    fn test_full_queue() {
        let (mut sink, _rx) = frame_sink(1).unwrap();
        sink.deliver(Bytes::from_static(b"1")).unwrap();

        assert_eq!(sink.deliver(Bytes::from_static(b"2")), Err(SinkError::Full));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(frame_sink(0), Err(crate::Error::InvalidConfig(_))));
    }

    #[test]
    fn test_closed_consumer() {
        let (mut sink, rx) = frame_sink(1).unwrap();
        drop(rx);

        assert_eq!(sink.deliver(Bytes::from_static(b"1")), Err(SinkError::Closed));
    }
}
