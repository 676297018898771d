//! Length-prefixed wire framing
//!
//! Every message between client and server is a single string payload
//! wrapped in a JSON envelope and prefixed with a 4-byte big-endian
//! length header. One [`write_frame`] call on one side is read back as
//! exactly one [`read_frame`] call on the other; partial frames never
//! interleave. This module is the only place raw socket bytes are
//! touched -- everything above it works on decoded command and
//! response strings.

use crate::error::Result;
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Serialize `payload`, write the length header then the envelope,
/// and flush.
///
/// # Errors
///
/// Returns an error if the payload exceeds `u32::MAX` bytes once
/// serialized, or on any socket write failure.
pub async fn write_frame<S>(stream: &mut S, payload: &str) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let envelope = serde_json::to_vec(payload)?;
    let len = u32::try_from(envelope.len())
        .map_err(|_| crate::Error::Protocol("Frame too large".to_string()))?;

    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(&envelope).await?;
    stream.flush().await?;
    Ok(())
}

/// Read one framed payload from the stream.
///
/// Blocks until the 4-byte header and then the full envelope have
/// arrived, absorbing partial reads. Returns `Ok(None)` if the peer
/// closed the connection before a complete header -- the orderly
/// disconnect sentinel, not an error.
///
/// # Errors
///
/// Returns an error on a socket failure, on a connection closed in
/// the middle of an envelope, or if the envelope is not valid JSON.
pub async fn read_frame<S>(stream: &mut S) -> Result<Option<String>>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    match stream.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = usize::try_from(u32::from_be_bytes(header))
        .map_err(|_| crate::Error::Protocol("Frame too large".to_string()))?;
    let mut envelope = vec![0u8; len];
    stream.read_exact(&mut envelope).await?;

    let payload: String = serde_json::from_slice(&envelope)?;
    Ok(Some(payload))
}
