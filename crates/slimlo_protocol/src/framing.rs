//! Length-prefixed frame codec.
//!
//! Synchronous variants serve the worker child, which reads its stdin with
//! plain blocking I/O; the async variants serve the host supervisor, which
//! must be able to abandon a read on timeout or cancellation.

use std::io::{ErrorKind, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ProtocolError, Result};

/// Hard cap on a declared frame length (256 MiB). A longer declaration means
/// the stream has desynced; the conversation must be torn down, never
/// silently extended.
pub const MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

/// Write one frame and flush it.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<()> {
    check_len(payload.len() as u64)?;
    writer.write_u32::<LittleEndian>(payload.len() as u32)?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

/// Read one frame.
///
/// `Ok(None)` means the peer closed the stream: either the 4-byte length
/// header never arrived in full, or the payload was cut short mid-frame.
/// Reads are exact; partial reads loop until the frame is assembled.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let len = match reader.read_u32::<LittleEndian>() {
        Ok(len) => len as usize,
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    check_len(len as u64)?;

    let mut payload = vec![0u8; len];
    match reader.read_exact(&mut payload) {
        Ok(()) => Ok(Some(payload)),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Async variant of [`write_frame`].
pub async fn write_frame_async<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> Result<()> {
    check_len(payload.len() as u64)?;
    writer.write_u32_le(payload.len() as u32).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Async variant of [`read_frame`]; the same end-of-stream semantics apply.
pub async fn read_frame_async<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let len = match reader.read_u32_le().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    check_len(len as u64)?;

    let mut payload = vec![0u8; len];
    match reader.read_exact(&mut payload).await {
        Ok(_) => Ok(Some(payload)),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn check_len(len: u64) -> Result<()> {
    if len > MAX_FRAME_LEN as u64 {
        return Err(ProtocolError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_frame_roundtrip() {
        let payload = b"the quick brown fox".to_vec();
        let mut buf = Vec::new();
        write_frame(&mut buf, &payload).unwrap();

        assert_eq!(&buf[..4], &(payload.len() as u32).to_le_bytes());

        let mut cursor = Cursor::new(buf);
        let read = read_frame(&mut cursor).unwrap();
        assert_eq!(read, Some(payload));
    }

    #[test]
    fn test_empty_frame_preserved() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &[]).unwrap();
        assert_eq!(buf, vec![0, 0, 0, 0]);

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_frame(&mut cursor).unwrap(), Some(Vec::new()));
    }

    #[test]
    fn test_eos_on_empty_stream() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        assert!(read_frame(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn test_eos_on_truncated_header() {
        let mut cursor = Cursor::new(vec![0x10, 0x00]);
        assert!(read_frame(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn test_eos_on_truncated_payload() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&8u32.to_le_bytes());
        buf.extend_from_slice(b"abc"); // 3 of 8 declared bytes
        let mut cursor = Cursor::new(buf);
        assert!(read_frame(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn test_oversized_declaration_is_hard_error() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME_LEN as u32 + 1).to_le_bytes());
        let mut cursor = Cursor::new(buf);
        let err = read_frame(&mut cursor).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { .. }));
    }

    #[test]
    fn test_two_frames_back_to_back() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"first").unwrap();
        write_frame(&mut buf, b"second").unwrap();

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_frame(&mut cursor).unwrap().unwrap(), b"first");
        assert_eq!(read_frame(&mut cursor).unwrap().unwrap(), b"second");
        assert!(read_frame(&mut cursor).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_async_roundtrip() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        write_frame_async(&mut client, b"hello worker").await.unwrap();
        let read = read_frame_async(&mut server).await.unwrap();
        assert_eq!(read.unwrap(), b"hello worker");
    }

    #[tokio::test]
    async fn test_async_eos_on_peer_close() {
        let (client, mut server) = tokio::io::duplex(1024);
        drop(client);
        assert!(read_frame_async(&mut server).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_async_eos_on_truncated_payload() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        client.write_all(&16u32.to_le_bytes()).await.unwrap();
        client.write_all(b"short").await.unwrap();
        drop(client);
        assert!(read_frame_async(&mut server).await.unwrap().is_none());
    }
}
