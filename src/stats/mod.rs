//! Metrics records and read-only snapshots

pub mod metrics;

pub use metrics::{
    ClientMetrics, ClientStats, LatencyWindow, ServerStats, SessionMetrics, SessionStats,
    StreamQuality,
};
