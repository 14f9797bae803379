//! Wire protocol
//!
//! Length-prefixed envelopes (see [`envelope`]) and the exact-length I/O
//! primitives that move them over a byte stream (see [`io`]).

pub mod envelope;
pub mod io;

pub use envelope::{decode, decode_header, encode, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE};
pub use io::{read_full, FrameReader, FrameWriter, ShortRead};
