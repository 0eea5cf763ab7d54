//! Reassembles encoded protocol messages that don't fit in a single wire
//! frame's 16-bit length budget (call bodies can run into the hundreds of
//! kilobytes). A message larger than one frame is split into consecutive
//! frames, each tagged with a 1-byte continuation marker. A connection's
//! writer task fully drains one message's frames before starting the next,
//! so the reader never needs per-call bookkeeping to reassemble them —
//! frames simply accumulate until a terminal marker is seen.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::frame::{self, FrameError, MAX_FRAME_PAYLOAD};

const MARKER_SINGLE: u8 = 0;
const MARKER_MORE: u8 = 1;
const MARKER_LAST: u8 = 2;

const CHUNK_CAPACITY: usize = MAX_FRAME_PAYLOAD - 1;

/// Writes `encoded` as one frame if it fits, otherwise as a run of
/// continuation frames.
pub async fn write_message<W>(writer: &mut W, encoded: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    if encoded.len() <= CHUNK_CAPACITY {
        let mut framed = Vec::with_capacity(encoded.len() + 1);
        framed.push(MARKER_SINGLE);
        framed.extend_from_slice(encoded);
        return frame::write_frame(writer, &framed).await;
    }

    let mut offset = 0;
    while offset < encoded.len() {
        let end = (offset + CHUNK_CAPACITY).min(encoded.len());
        let marker = if end == encoded.len() { MARKER_LAST } else { MARKER_MORE };
        let mut framed = Vec::with_capacity(end - offset + 1);
        framed.push(marker);
        framed.extend_from_slice(&encoded[offset..end]);
        frame::write_frame(writer, &framed).await?;
        offset = end;
    }
    Ok(())
}

/// Reads one full message, accumulating continuation frames as needed.
/// `Ok(None)` means the peer closed the socket at a frame boundary.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<Vec<u8>>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut assembled = Vec::new();
    loop {
        let payload = match frame::read_frame(reader).await? {
            Some(p) => p,
            None => return Ok(None),
        };
        let (marker, rest) = payload.split_first().ok_or_else(|| {
            FrameError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "empty frame payload",
            ))
        })?;
        match *marker {
            MARKER_SINGLE | MARKER_LAST => {
                assembled.extend_from_slice(rest);
                return Ok(Some(assembled));
            }
            MARKER_MORE => assembled.extend_from_slice(rest),
            other => {
                return Err(FrameError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("unknown continuation marker {other}"),
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_small_message() {
        let mut buf = Vec::new();
        write_message(&mut buf, b"hello").await.unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let got = read_message(&mut cursor).await.unwrap().unwrap();
        assert_eq!(got, b"hello");
    }

    #[tokio::test]
    async fn round_trips_a_message_spanning_many_frames() {
        let payload: Vec<u8> = (0..CHUNK_CAPACITY * 3 + 17).map(|i| (i % 251) as u8).collect();
        let mut buf = Vec::new();
        write_message(&mut buf, &payload).await.unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let got = read_message(&mut cursor).await.unwrap().unwrap();
        assert_eq!(got, payload);
    }

    #[tokio::test]
    async fn eof_between_messages_is_none() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        assert!(read_message(&mut cursor).await.unwrap().is_none());
    }
}
