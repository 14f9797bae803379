//! Receive loop states

/// State of the client receive loop
///
/// ```text
/// Connecting ──ok──► Streaming ──read error / close──► Failed
///     ▲  │                                               │
///     │  └──────────────────connect error────────────────┤
///     │                                                  ▼
///     └──────────────── Reconnecting ◄── budget left ── (controller)
///                                                        │
///                                      budget spent ──► Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    /// Opening a connection to the sender
    Connecting,
    /// Reading and delivering frames
    Streaming,
    /// Connection lost or refused; handing off to the reconnection controller
    Failed,
    /// Waiting out the delay before the next attempt
    Reconnecting,
    /// Terminal: stopped by request or attempts exhausted
    Stopped,
}

impl ReceiverState {
    /// Whether the loop holds a live connection
    pub fn is_connected(&self) -> bool {
        *self == ReceiverState::Streaming
    }

    pub fn is_terminal(&self) -> bool {
        *self == ReceiverState::Stopped
    }
}

impl std::fmt::Display for ReceiverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ReceiverState::Connecting => "connecting",
            ReceiverState::Streaming => "streaming",
            ReceiverState::Failed => "failed",
            ReceiverState::Reconnecting => "reconnecting",
            ReceiverState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}
