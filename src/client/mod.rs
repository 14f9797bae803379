//! Frame receiving client
//!
//! Connects to a frame server, reassembles envelopes and delivers payloads
//! to a consumer, reconnecting within a bounded attempt budget when the
//! stream is lost.

pub mod config;
pub mod connector;
pub mod reconnect;
pub mod receiver;
pub mod sink;
pub mod state;

pub use config::{Backoff, ClientConfig};
pub use connector::{Connector, TcpConnector};
pub use reconnect::{Decision, ReconnectController};
pub use receiver::FrameReceiver;
pub use sink::{frame_sink, ChannelSink, FrameSink, SinkError};
pub use state::ReceiverState;
