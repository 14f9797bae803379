//! Frame channel bridging the producer and every session
//!
//! A fixed-capacity ring of the most recent frames. The producer publishes
//! without ever blocking; each session reads through its own [`Cursor`] at
//! its own pace.
//!
//! # Architecture
//!
//! ```text
//!                 Arc<FrameChannel>
//!           ┌───────────────────────────┐
//!  publish  │ Mutex<Ring {              │
//!  ───────► │   slots: [F5 F6 F7 F8],   │  oldest evicted when full
//!           │   next_sequence: 9,       │
//!           │ }>                        │
//!           │ watch::Sender<u64> ───────┼──► wakes cursors
//!           └─────────────┬─────────────┘
//!                         │
//!         ┌───────────────┼───────────────┐
//!         ▼               ▼               ▼
//!    Cursor { 9 }    Cursor { 7 }    Cursor { 3 }
//!    (caught up)     (reading F7)    (lagging: skips F3, F4)
//! ```
//!
//! # Zero-Copy Design
//!
//! Payloads are `bytes::Bytes`, so every cursor shares the producer's
//! allocation. Frames are never mutated after publish.

pub mod frame;
pub mod store;

pub use frame::{ChannelStats, Frame, Published, Received};
pub use store::{Cursor, FrameChannel, DEFAULT_CAPACITY};
