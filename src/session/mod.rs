//! Sender-side session lifecycle

pub mod state;

pub use state::{CloseReason, SessionPhase, SessionState};
