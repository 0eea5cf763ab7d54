//! Length-prefixed framing for the wire.
//!
//! Each frame on the wire is a 16-bit big-endian length prefix, counting the
//! payload bytes only, followed by that many opaque payload bytes. The
//! payload is opaque to this module; [`crate::protocol`] interprets it.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest payload a single frame can carry, bounded by the 16-bit length
/// prefix.
pub const MAX_FRAME_PAYLOAD: usize = u16::MAX as usize;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame payload of {0} bytes exceeds the 16-bit length prefix")]
    TooLarge(usize),
    #[error("short or invalid frame: {0}")]
    Io(#[from] std::io::Error),
}

/// Reads exactly one frame's payload from `reader`, or `Ok(None)` on a clean
/// EOF at a frame boundary (the peer closed the socket between frames).
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u16().await {
        Ok(len) => len,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    Ok(Some(buf))
}

/// Writes one frame carrying `payload` to `writer`.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_PAYLOAD {
        return Err(FrameError::TooLarge(payload.len()));
    }
    writer.write_u16(payload.len() as u16).await?;
    writer.write_all(payload).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_frame() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hello").await.unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let got = read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(got, b"hello");
    }

    #[tokio::test]
    async fn eof_at_boundary_is_none() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        let got = read_frame(&mut cursor).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn short_frame_is_an_error() {
        // length prefix claims 10 bytes, body supplies only 2.
        let mut cursor = std::io::Cursor::new(vec![0u8, 10, 1, 2]);
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert!(matches!(err, FrameError::Io(_)));
    }

    #[tokio::test]
    async fn oversized_payload_is_rejected_before_writing() {
        let mut buf = Vec::new();
        let payload = vec![0u8; MAX_FRAME_PAYLOAD + 1];
        let err = write_frame(&mut buf, &payload).await.unwrap_err();
        assert!(matches!(err, FrameError::TooLarge(_)));
        assert!(buf.is_empty());
    }
}
