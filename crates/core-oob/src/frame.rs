//! Wire codec for the OOB side channel.
//!
//! # Frame Format
//!
//! ```text
//! +------+--------+------+
//! | Type | Length | JSON |
//! | 1B   | 4B BE  | var  |
//! +------+--------+------+
//! ```
//!
//! Frame types:
//! - `0x01`: Request `{"request_id", "data": hostname}`
//! - `0x02`: Response `{"request_id", "payload": hex}`
//! - `0x03`: Error `{"request_id", "error"}`
//!
//! One connection carries one request and at most one reply. A connection
//! that closes before any frame is a liveness probe.

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::RequestId;

/// Maximum frame body size (1 MB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

pub const FRAME_HEADER_LEN: usize = 5;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame encoding failed: {0}")]
    EncodeFailed(String),

    #[error("frame decoding failed: {0}")]
    DecodeFailed(String),

    #[error("frame too large: {size} bytes (max {MAX_FRAME_SIZE})")]
    FrameTooLarge { size: usize },

    #[error("unknown frame type: {0}")]
    UnknownFrameType(u8),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The peer closed mid-frame
    #[error("stream closed unexpectedly")]
    StreamClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Request = 0x01,
    Response = 0x02,
    Error = 0x03,
}

impl TryFrom<u8> for FrameType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, FrameError> {
        match value {
            0x01 => Ok(FrameType::Request),
            0x02 => Ok(FrameType::Response),
            0x03 => Ok(FrameType::Error),
            _ => Err(FrameError::UnknownFrameType(value)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostnameRequest {
    pub request_id: RequestId,
    #[serde(rename = "data")]
    pub hostname: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostnameResponse {
    pub request_id: RequestId,
    /// Destination handshake bytes, hex on the wire
    #[serde(with = "hex::serde")]
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub request_id: RequestId,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OobFrame {
    Request(HostnameRequest),
    Response(HostnameResponse),
    Error(ErrorReply),
}

impl OobFrame {
    pub fn frame_type(&self) -> FrameType {
        match self {
            OobFrame::Request(_) => FrameType::Request,
            OobFrame::Response(_) => FrameType::Response,
            OobFrame::Error(_) => FrameType::Error,
        }
    }

    pub fn request_id(&self) -> &RequestId {
        match self {
            OobFrame::Request(r) => &r.request_id,
            OobFrame::Response(r) => &r.request_id,
            OobFrame::Error(r) => &r.request_id,
        }
    }

    /// Encode the frame to bytes.
    ///
    /// Format: [type: 1 byte][length: 4 bytes BE][json: variable]
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let body = match self {
            OobFrame::Request(r) => serde_json::to_vec(r),
            OobFrame::Response(r) => serde_json::to_vec(r),
            OobFrame::Error(r) => serde_json::to_vec(r),
        }
        .map_err(|e| FrameError::EncodeFailed(e.to_string()))?;

        if body.len() > MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLarge { size: body.len() });
        }

        let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
        buf.push(self.frame_type() as u8);
        buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    /// Decode one complete frame from `buf`; trailing bytes are an error.
    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < FRAME_HEADER_LEN {
            return Err(FrameError::DecodeFailed(format!(
                "frame too short (need at least {} bytes)",
                FRAME_HEADER_LEN
            )));
        }

        let frame_type = FrameType::try_from(buf[0])?;
        let len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLarge { size: len });
        }
        if buf.len() != FRAME_HEADER_LEN + len {
            return Err(FrameError::DecodeFailed(format!(
                "frame length mismatch: header says {} bytes, got {}",
                len,
                buf.len() - FRAME_HEADER_LEN
            )));
        }

        Self::from_body(frame_type, &buf[FRAME_HEADER_LEN..])
    }

    fn from_body(frame_type: FrameType, body: &[u8]) -> Result<Self, FrameError> {
        let decoded = match frame_type {
            FrameType::Request => serde_json::from_slice(body).map(OobFrame::Request),
            FrameType::Response => serde_json::from_slice(body).map(OobFrame::Response),
            FrameType::Error => serde_json::from_slice(body).map(OobFrame::Error),
        };
        decoded.map_err(|e| FrameError::DecodeFailed(e.to_string()))
    }
}

/// Write a frame to an async stream and flush it.
pub async fn write_frame<T>(stream: &mut T, frame: &OobFrame) -> Result<(), FrameError>
where
    T: AsyncWrite + Unpin,
{
    let encoded = frame.encode()?;
    stream.write_all(&encoded).await?;
    stream.flush().await?;
    Ok(())
}

/// Read one frame from an async stream.
///
/// Returns `Ok(None)` when the stream ends cleanly before the first byte,
/// which is how probe connections look.
pub async fn read_frame<T>(stream: &mut T) -> Result<Option<OobFrame>, FrameError>
where
    T: AsyncRead + Unpin,
{
    let mut type_buf = [0u8; 1];
    if stream.read(&mut type_buf).await? == 0 {
        return Ok(None);
    }
    let frame_type = FrameType::try_from(type_buf[0])?;

    let mut len_buf = [0u8; 4];
    read_exact_or_closed(stream, &mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge { size: len });
    }

    let mut body = vec![0u8; len];
    read_exact_or_closed(stream, &mut body).await?;
    OobFrame::from_body(frame_type, &body).map(Some)
}

async fn read_exact_or_closed<T>(stream: &mut T, buf: &mut [u8]) -> Result<(), FrameError>
where
    T: AsyncRead + Unpin,
{
    match stream.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(FrameError::StreamClosed),
        Err(e) => Err(e.into()),
    }
}
