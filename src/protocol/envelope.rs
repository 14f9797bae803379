//! Envelope codec
//!
//! Every frame travels as an envelope: an 8-byte big-endian unsigned length
//! followed by exactly that many payload bytes. There is no magic number,
//! version or checksum.
//!
//! ```text
//! +------------------------+---------------------------+
//! | length: u64 (BE, 8 B)  | payload: `length` bytes   |
//! +------------------------+---------------------------+
//! ```
//!
//! The codec performs no I/O. Callers obtain exactly [`HEADER_SIZE`] bytes,
//! call [`decode_header`], then obtain exactly that many payload bytes.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Size of the length prefix in bytes
pub const HEADER_SIZE: usize = 8;

/// Default ceiling on a declared payload length (32 MiB)
pub const DEFAULT_MAX_PAYLOAD_SIZE: u64 = 32 * 1024 * 1024;

/// Encode the length prefix for a payload of `len` bytes.
#[inline]
pub fn encode_header(len: u64) -> [u8; HEADER_SIZE] {
    len.to_be_bytes()
}

/// Wrap a payload in an envelope.
pub fn encode(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_u64(payload.len() as u64);
    buf.put_slice(payload);
    buf.freeze()
}

/// Parse a length prefix.
///
/// Only the first [`HEADER_SIZE`] bytes are examined; anything shorter is
/// rejected outright.
pub fn decode_header(bytes: &[u8]) -> Result<u64, ProtocolError> {
    let header: [u8; HEADER_SIZE] = bytes
        .get(..HEADER_SIZE)
        .and_then(|h| h.try_into().ok())
        .ok_or(ProtocolError::MalformedHeader { got: bytes.len() })?;
    Ok(u64::from_be_bytes(header))
}

/// Check a declared length against the sanity ceiling.
pub fn check_length(length: u64, max: u64) -> Result<usize, ProtocolError> {
    if length > max {
        return Err(ProtocolError::PayloadTooLarge { length, max });
    }
    usize::try_from(length).map_err(|_| ProtocolError::PayloadTooLarge { length, max })
}

/// Decode a complete in-memory envelope back into its payload.
pub fn decode(envelope: &Bytes) -> Result<Bytes, ProtocolError> {
    let declared = decode_header(envelope)?;
    let actual = envelope.len() - HEADER_SIZE;
    if declared != actual as u64 {
        return Err(ProtocolError::LengthMismatch { declared, actual });
    }
    Ok(envelope.slice(HEADER_SIZE..))
}
