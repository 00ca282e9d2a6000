//! Length-prefixed JSON framing for the RPC wire protocol.
//!
//! ```text
//! [u32 LE: payload_len] [JSON payload]
//! ```
//!
//! Every frame on a connection is either a [`CallFrame`] (client → server)
//! or a [`ReplyFrame`] (server → client); method dispatch happens by
//! name, not by a wire type tag (spec.md §6, §9 "Dynamic dispatch by
//! method name"). Grounded on the teacher's `src/socket/framing.rs` /
//! `src/broker/protocol.rs` length-prefixed frame shape, simplified since
//! every call on a connection carries exactly one logical request/reply.

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Maximum payload size accepted on the wire. Matches the teacher's
/// framing cap (16 MiB) — generous for a line-oriented protocol, but
/// bounds a malicious or runaway peer.
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

#[derive(Debug, Serialize, Deserialize)]
pub struct CallFrame {
    pub method: String,
    pub argument: Value,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyFrame {
    Ok(Value),
    Err(String),
}

/// Write a single length-prefixed JSON frame.
pub async fn write_frame<S, T>(stream: &mut S, value: &T) -> std::io::Result<()>
where
    S: AsyncWriteExt + Unpin,
    T: Serialize,
{
    let payload = serde_json::to_vec(value)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "frame too large"))?;

    let mut framed = BytesMut::with_capacity(4 + payload.len());
    framed.put_u32_le(len);
    framed.put_slice(&payload);

    stream.write_all(&framed).await?;
    stream.flush().await?;
    Ok(())
}

/// Read a single length-prefixed JSON frame, rejecting anything over
/// [`MAX_FRAME_SIZE`].
pub async fn read_frame<S, T>(stream: &mut S) -> std::io::Result<T>
where
    S: AsyncReadExt + Unpin,
    T: for<'de> Deserialize<'de>,
{
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf);
    if len > MAX_FRAME_SIZE {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds max {MAX_FRAME_SIZE}"),
        ));
    }
    let mut payload = vec![0u8; len as usize];
    stream.read_exact(&mut payload).await?;
    serde_json::from_slice(&payload)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}
