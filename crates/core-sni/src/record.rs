//! TLS record layer helpers shared by the extractor and handshake capture.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{extract_hostname, SniError, Status};

pub const RECORD_HEADER_LEN: usize = 5;

/// Largest record body accepted (TLSCiphertext bound: 2^14 + 2048).
pub const MAX_RECORD_LEN: usize = (1 << 14) + 2048;

/// TLS record content types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ContentType {
    ChangeCipherSpec = 20,
    Alert = 21,
    Handshake = 22,
    ApplicationData = 23,
}

impl TryFrom<u8> for ContentType {
    type Error = SniError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            20 => Ok(ContentType::ChangeCipherSpec),
            21 => Ok(ContentType::Alert),
            22 => Ok(ContentType::Handshake),
            23 => Ok(ContentType::ApplicationData),
            _ => Err(SniError::MalformedHandshake("unknown record content type")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub content_type: ContentType,
    pub version: u16,
    /// Body length, header excluded
    pub length: usize,
}

impl RecordHeader {
    /// Parse the 5-byte record header at the start of `buf`.
    ///
    /// Returns `Ok(None)` when fewer than five bytes are available.
    pub fn parse(buf: &[u8]) -> Result<Option<Self>, SniError> {
        if buf.len() < RECORD_HEADER_LEN {
            return Ok(None);
        }
        let content_type = ContentType::try_from(buf[0])?;
        if buf[1] != 0x03 {
            return Err(SniError::MalformedHandshake("unexpected record version"));
        }
        let version = u16::from_be_bytes([buf[1], buf[2]]);
        let length = u16::from_be_bytes([buf[3], buf[4]]) as usize;
        if length == 0 || length > MAX_RECORD_LEN {
            return Err(SniError::MalformedHandshake("record length out of range"));
        }
        Ok(Some(Self {
            content_type,
            version,
            length,
        }))
    }
}

/// Read exactly one record and return it verbatim, header included.
pub async fn read_record<R>(reader: &mut R) -> Result<(RecordHeader, Vec<u8>), SniError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; RECORD_HEADER_LEN];
    reader.read_exact(&mut header).await?;
    let parsed = RecordHeader::parse(&header)?
        .ok_or(SniError::MalformedHandshake("short record header"))?;

    let mut record = vec![0u8; RECORD_HEADER_LEN + parsed.length];
    record[..RECORD_HEADER_LEN].copy_from_slice(&header);
    reader.read_exact(&mut record[RECORD_HEADER_LEN..]).await?;
    Ok((parsed, record))
}

/// A client's opening flight.
#[derive(Debug, Clone)]
pub struct ClientHello {
    pub hostname: String,
    /// Everything read from the client so far, possibly past the hello.
    pub raw: Bytes,
}

/// Buffer reads from `reader` until [`extract_hostname`] succeeds or fails.
///
/// Reads are sized from the parser's `needed` hint; the buffer never grows
/// past what `max` allows the handshake to declare.
pub async fn read_client_hello<R>(reader: &mut R, max: usize) -> Result<ClientHello, SniError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(1024);
    loop {
        match extract_hostname(&buf, max)? {
            Status::Complete(hostname) => {
                return Ok(ClientHello {
                    hostname,
                    raw: buf.freeze(),
                })
            }
            Status::Partial { needed } => {
                buf.reserve(needed);
                if reader.read_buf(&mut buf).await? == 0 {
                    return Err(SniError::MalformedHandshake(
                        "connection closed before the ClientHello completed",
                    ));
                }
            }
        }
    }
}
