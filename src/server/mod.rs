//! Sender side: session dispatcher and per-connection sessions

pub mod config;
pub mod connection;
pub mod listener;
pub mod sessions;

pub use config::ServerConfig;
pub use connection::Connection;
pub use listener::{FrameServer, ServerEvent};
pub use sessions::{SessionHandle, SessionRegistry};
