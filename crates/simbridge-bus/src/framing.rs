//! Length-prefixed JSON framing for the TCP gateway.
//!
//! Every frame is a 4-byte **little-endian** `u32` length followed by that
//! many bytes of UTF-8 JSON.
//!
//! ```text
//! +----------------+------------------+
//! | Length (4B LE) | JSON Payload     |
//! +----------------+------------------+
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::BusError;

/// Largest accepted payload (16 MiB).
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Read one frame.
///
/// Returns `Ok(None)` on a clean EOF before the length prefix.
pub async fn read_message<T, R>(reader: &mut R) -> Result<Option<T>, BusError>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(BusError::Io(e)),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(BusError::PayloadTooLarge {
            size: len,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(serde_json::from_slice(&payload)?))
}

/// Write one frame and flush.
pub async fn write_message<T, W>(writer: &mut W, msg: &T) -> Result<(), BusError>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    let payload = serde_json::to_vec(msg)?;
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|_| payload.len() <= MAX_MESSAGE_SIZE)
        .ok_or(BusError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_MESSAGE_SIZE,
        })?;

    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::{CommandMode, JointCommand};

    #[tokio::test]
    async fn test_frame_layout() {
        let mut buf = Vec::new();
        write_message(&mut buf, &serde_json::json!({"type": "ack"}))
            .await
            .unwrap();
        assert_eq!(&buf[..4], &14u32.to_le_bytes());
        assert_eq!(&buf[4..], br#"{"type":"ack"}"#);
    }

    #[tokio::test]
    async fn test_read_back() {
        let cmd = JointCommand {
            mode: CommandMode::Effort,
            name: vec!["wrist".into()],
            values: vec![-1.5],
        };
        let mut buf = Vec::new();
        write_message(&mut buf, &cmd).await.unwrap();
        write_message(&mut buf, &cmd).await.unwrap();

        let mut reader = buf.as_slice();
        let first: Option<JointCommand> = read_message(&mut reader).await.unwrap();
        assert_eq!(first.as_ref(), Some(&cmd));
        let second: Option<JointCommand> = read_message(&mut reader).await.unwrap();
        assert!(second.is_some());
        let end: Option<JointCommand> = read_message(&mut reader).await.unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn test_oversized_prefix_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_MESSAGE_SIZE as u32 + 1).to_le_bytes());
        let mut reader = buf.as_slice();
        let err = read_message::<serde_json::Value, _>(&mut reader)
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::PayloadTooLarge { .. }));
    }

    #[tokio::test]
    async fn test_truncated_payload() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&10u32.to_le_bytes());
        buf.extend_from_slice(b"{}");
        let mut reader = buf.as_slice();
        let err = read_message::<serde_json::Value, _>(&mut reader)
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Io(_)));
    }
}
