//! framecast: live video frame transport over TCP
//!
//! A sender publishes encoded frames (typically JPEG) into a bounded
//! [`FrameChannel`] that drops its oldest frame when full, and a
//! [`FrameServer`] streams them to every connected receiver. Each receiver
//! runs a [`FrameReceiver`] that reassembles length-prefixed envelopes,
//! hands payloads to a consumer and reconnects within a bounded budget.
//!
//! ```text
//!  FrameSource ──► run_producer ──► FrameChannel ──► Connection ─┐
//!                                  (drop-oldest)   ──► Connection ─┤ TCP
//!                                                                  │
//!  FrameSink ◄── FrameReceiver ◄── FrameReader ◄───────────────────┘
//! ```
//!
//! Every payload travels as an 8-byte big-endian length followed by the
//! payload bytes; see [`protocol`].

pub mod channel;
pub mod client;
pub mod error;
pub mod producer;
pub mod protocol;
pub mod server;
pub mod session;
pub mod stats;

pub use channel::{Frame, FrameChannel};
pub use client::{frame_sink, ClientConfig, FrameReceiver, FrameSink, ReceiverState};
pub use error::{Error, ProtocolError, Result};
pub use producer::{run_producer, FrameSource, ProducerStats};
pub use server::{FrameServer, ServerConfig, ServerEvent};
pub use session::CloseReason;
pub use stats::{ClientStats, ServerStats, SessionStats, StreamQuality};
