//! Length-prefixed frame reading over any async byte stream.
//!
//! The reader trusts nothing but the size field: it validates it before
//! allocating, then reads exactly the declared number of bytes.  The
//! resulting buffer still has to go through
//! [`decode_message`](crate::protocol::decode_message).

use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::protocol::codec::{validate_declared_size, ProtocolError};

/// Errors produced while reading one frame.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The peer closed the stream cleanly between frames.
    #[error("connection closed by peer")]
    Closed,

    /// The size field was rejected; the stream can no longer be trusted.
    #[error("framing error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Transport failure, including EOF in the middle of a frame.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Reads one complete frame into a freshly allocated buffer.
///
/// # Errors
///
/// See [`read_frame_into`].
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    read_frame_into(reader, &mut buf).await?;
    Ok(buf)
}

/// Reads one complete frame into `buf`, growing it when needed.
///
/// On success `buf` holds exactly the frame bytes (header included) and the
/// frame length is returned.  Reusing one buffer across calls avoids a
/// per-message allocation on the receive path.
///
/// # Errors
///
/// - [`FrameError::Closed`] if the stream ends before any byte of a new frame.
/// - [`FrameError::Protocol`] if the size field is zero, smaller than the
///   header, or larger than the maximum message size.
/// - [`FrameError::Io`] on any other read failure, including EOF mid-frame.
pub async fn read_frame_into<R>(reader: &mut R, buf: &mut Vec<u8>) -> Result<usize, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut size_bytes = [0u8; 4];
    let first = reader.read(&mut size_bytes).await?;
    if first == 0 {
        return Err(FrameError::Closed);
    }
    if first < size_bytes.len() {
        reader.read_exact(&mut size_bytes[first..]).await?;
    }

    let declared = u32::from_le_bytes(size_bytes) as usize;
    validate_declared_size(declared)?;

    buf.clear();
    buf.resize(declared, 0);
    buf[..4].copy_from_slice(&size_bytes);
    reader.read_exact(&mut buf[4..]).await?;
    Ok(declared)
}
