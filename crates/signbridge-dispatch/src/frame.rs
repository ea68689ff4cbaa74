//! Native-messaging framing: a 4-byte little-endian length followed by the
//! UTF-8 JSON body.

use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest body accepted in either direction.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

const LENGTH_PREFIX_BYTES: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    TooLarge { len: usize, max: usize },
    #[error("stream ended inside a frame")]
    Truncated,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Prefixes `payload` with its length.
pub fn encode_frame(payload: &[u8]) -> Result<Bytes, FrameError> {
    check_len(payload.len())?;
    let mut frame = BytesMut::with_capacity(LENGTH_PREFIX_BYTES + payload.len());
    // check_len bounds the length well below u32::MAX.
    frame.put_u32_le(payload.len() as u32);
    frame.put_slice(payload);
    Ok(frame.freeze())
}

pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(payload)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame body. `Ok(None)` means the stream ended cleanly between
/// frames.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Bytes>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0_u8; LENGTH_PREFIX_BYTES];
    let mut filled = 0;
    while filled < LENGTH_PREFIX_BYTES {
        let read = reader.read(&mut prefix[filled..]).await?;
        if read == 0 {
            return if filled == 0 {
                Ok(None)
            } else {
                Err(FrameError::Truncated)
            };
        }
        filled += read;
    }

    let len = u32::from_le_bytes(prefix) as usize;
    check_len(len)?;

    let mut body = BytesMut::zeroed(len);
    reader.read_exact(&mut body).await.map_err(|error| {
        if error.kind() == io::ErrorKind::UnexpectedEof {
            FrameError::Truncated
        } else {
            FrameError::Io(error)
        }
    })?;
    Ok(Some(body.freeze()))
}

fn check_len(len: usize) -> Result<(), FrameError> {
    match len {
        0 => Err(FrameError::Empty),
        len if len > MAX_FRAME_BYTES => Err(FrameError::TooLarge {
            len,
            max: MAX_FRAME_BYTES,
        }),
        _ => Ok(()),
    }
}
