//! Message framing
//!
//! Every message is an 8-byte header followed by the payload:
//!
//! ```text
//! +------------------+----------------------+------------------+
//! | type tag (4B BE) | payload size (4B BE) | payload          |
//! +------------------+----------------------+------------------+
//! ```

use bytes::{Buf, BufMut, BytesMut};
use morlglue_common::{GlueError, Result, MAX_FRAME_PAYLOAD};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{error, trace};

use crate::buffer::WireBuffer;
use crate::transport::{recv_all, send_all};

/// Size of the frame header in bytes
pub const FRAME_HEADER_LEN: usize = 8;

/// Decoded frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub tag: u32,
    pub payload_len: u32,
}

impl FrameHeader {
    pub fn encode(&self) -> [u8; FRAME_HEADER_LEN] {
        let mut out = [0u8; FRAME_HEADER_LEN];
        let mut cursor = &mut out[..];
        cursor.put_u32(self.tag);
        cursor.put_u32(self.payload_len);
        out
    }

    pub fn decode(bytes: &[u8; FRAME_HEADER_LEN]) -> Self {
        let mut cursor = &bytes[..];
        let tag = cursor.get_u32();
        let payload_len = cursor.get_u32();
        Self { tag, payload_len }
    }

    /// Header plus payload
    pub fn frame_len(&self) -> usize {
        FRAME_HEADER_LEN + self.payload_len as usize
    }
}

/// Send the logical contents of `buffer` as one frame tagged `tag`.
///
/// Returns the number of bytes written (header included).
pub async fn send_framed<W>(stream: &mut W, buffer: &WireBuffer, tag: u32) -> Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let header = FrameHeader {
        tag,
        payload_len: buffer.size(),
    };

    let mut frame = BytesMut::with_capacity(header.frame_len());
    frame.put_slice(&header.encode());
    frame.put_slice(buffer.as_bytes());

    let sent = send_all(stream, &frame).await;
    if sent != frame.len() {
        return Err(GlueError::ShortTransfer {
            context: "frame send",
            expected: frame.len(),
            actual: sent,
        });
    }

    trace!(tag, payload_len = header.payload_len, "Frame sent");
    Ok(sent)
}

/// Receive one frame, replacing the contents of `buffer` with its payload.
///
/// Returns `Ok(None)` if the peer closed before any header byte arrived.
/// A partial header or payload is a [`GlueError::ShortTransfer`].
pub async fn recv_framed<R>(stream: &mut R, buffer: &mut WireBuffer) -> Result<Option<FrameHeader>>
where
    R: AsyncRead + Unpin,
{
    let mut raw = [0u8; FRAME_HEADER_LEN];
    let got = recv_all(stream, &mut raw).await;
    if got == 0 {
        return Ok(None);
    }
    if got < FRAME_HEADER_LEN {
        return Err(GlueError::ShortTransfer {
            context: "frame header",
            expected: FRAME_HEADER_LEN,
            actual: got,
        });
    }

    let header = FrameHeader::decode(&raw);
    if header.payload_len > MAX_FRAME_PAYLOAD {
        error!(
            tag = header.tag,
            payload_len = header.payload_len,
            "Frame header announces an oversized payload"
        );
        return Err(GlueError::PayloadTooLarge(u64::from(header.payload_len)));
    }
    let payload = buffer.prepare_payload(header.payload_len)?;
    let got = recv_all(stream, payload).await;
    if got < payload.len() {
        return Err(GlueError::ShortTransfer {
            context: "frame payload",
            expected: payload.len(),
            actual: got,
        });
    }

    trace!(tag = header.tag, payload_len = header.payload_len, "Frame received");
    Ok(Some(header))
}
