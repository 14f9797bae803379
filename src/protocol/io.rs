//! Envelope I/O over async byte streams
//!
//! [`read_full`] is the single "read exactly N bytes or fail" primitive: a
//! socket read may return fewer bytes than requested, so it keeps reading
//! until the buffer is filled or the peer closes. [`FrameReader`] and
//! [`FrameWriter`] layer the envelope codec on top of it.

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::envelope::{check_length, decode_header, encode_header, HEADER_SIZE};
use crate::error::{Error, ProtocolError, Result};

/// Outcome of an exact-length read that hit end of stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortRead {
    /// Bytes accumulated before the stream closed
    pub received: usize,
}

/// Fill `buf` completely from `reader`.
///
/// Returns `Ok(Err(ShortRead))` when the stream ends first, so callers can
/// tell an orderly close on a frame boundary (`received == 0`) from a frame
/// truncated in flight.
pub async fn read_full<R>(
    reader: &mut R,
    buf: &mut [u8],
) -> std::io::Result<Result<(), ShortRead>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = match reader.read(&mut buf[filled..]).await {
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if n == 0 {
            return Ok(Err(ShortRead { received: filled }));
        }
        filled += n;
    }
    Ok(Ok(()))
}

/// Reads envelopes from a byte stream.
pub struct FrameReader<R> {
    reader: R,
    max_payload_size: u64,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Create a reader enforcing the given payload ceiling.
    pub fn new(reader: R, max_payload_size: u64) -> Self {
        Self {
            reader,
            max_payload_size,
        }
    }

    /// Read the next complete payload.
    ///
    /// A close before any header byte is [`Error::ConnectionClosed`]; a close
    /// anywhere inside an envelope is [`ProtocolError::TruncatedFrame`].
    pub async fn read_frame(&mut self) -> Result<Bytes> {
        let mut header = [0u8; HEADER_SIZE];
        if let Err(short) = read_full(&mut self.reader, &mut header).await? {
            if short.received == 0 {
                return Err(Error::ConnectionClosed);
            }
            return Err(ProtocolError::TruncatedFrame {
                expected: HEADER_SIZE,
                received: short.received,
            }
            .into());
        }

        let length = check_length(decode_header(&header)?, self.max_payload_size)?;

        let mut payload = BytesMut::zeroed(length);
        if let Err(short) = read_full(&mut self.reader, &mut payload).await? {
            return Err(ProtocolError::TruncatedFrame {
                expected: length,
                received: short.received,
            }
            .into());
        }

        Ok(payload.freeze())
    }

    /// Get a reference to the underlying stream
    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    /// Consume the reader, returning the underlying stream
    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Writes envelopes to a byte stream.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write one full envelope and flush.
    ///
    /// Header and payload go out as one vectored write where the stream
    /// supports it, so the header never travels in a segment of its own.
    /// Partial writes are retried until every byte is accepted or the stream
    /// reports an error. Returns the number of bytes put on the wire.
    pub async fn write_frame(&mut self, payload: &[u8]) -> std::io::Result<usize> {
        let header = encode_header(payload.len() as u64);
        let mut envelope = Buf::chain(&header[..], payload);
        self.writer.write_all_buf(&mut envelope).await?;
        self.writer.flush().await?;
        Ok(HEADER_SIZE + payload.len())
    }

    /// Shut down the write side of the stream
    pub async fn shutdown(&mut self) -> std::io::Result<()> {
        self.writer.shutdown().await
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }
}
