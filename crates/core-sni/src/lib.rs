//! TLS ClientHello inspection: locate the Server Name Indication.
//!
//! The extractor works on the raw bytes a client sends before the server says
//! anything. A ClientHello may be fragmented over several handshake records, so
//! [`extract_hostname`] concatenates record payloads and reports
//! [`Status::Partial`] until the whole handshake message is buffered. Nothing
//! here allocates beyond the reassembly buffer or touches the network;
//! [`read_client_hello`] is the async driver that feeds it from a socket.
//!
//! # Wire layout
//!
//! ```text
//! record:     | type=22 | version (2) | length (2) | fragment ... |
//! handshake:  | msg_type=1 | length (3) | ClientHello body ... |
//! body:       version(2) random(32) session_id<0..32> cipher_suites<2..>
//!             compression<1..> extensions<0..>
//! server_name extension (type 0):
//!             list_len(2) { name_type(1) name_len(2) name }*
//! ```

mod record;

pub use record::{
    read_client_hello, read_record, ClientHello, ContentType, RecordHeader, MAX_RECORD_LEN,
    RECORD_HEADER_LEN,
};

use thiserror::Error;

/// Default cap on a buffered ClientHello, record headers included.
pub const DEFAULT_MAX_HANDSHAKE: usize = 64 * 1024;

const HANDSHAKE_CLIENT_HELLO: u8 = 0x01;
const HANDSHAKE_HEADER_LEN: usize = 4;
const EXT_SERVER_NAME: u16 = 0x0000;
const NAME_TYPE_HOST: u8 = 0x00;
const MAX_SESSION_ID_LEN: usize = 32;

/// Errors produced while inspecting a client's opening handshake.
#[derive(Debug, Error)]
pub enum SniError {
    /// A length or type field disagrees with the bytes around it
    #[error("malformed handshake: {0}")]
    MalformedHandshake(&'static str),

    /// The ClientHello is well formed but names no host
    #[error("ClientHello carries no server_name extension")]
    NoSni,

    /// Reassembly would grow past the configured cap
    #[error("handshake too large: {size} bytes (max {max})")]
    HandshakeTooLarge { size: usize, max: usize },

    /// I/O error while reading from the client
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of an incremental parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status<T> {
    Complete(T),
    /// At least `needed` more bytes must arrive before parsing can continue.
    Partial { needed: usize },
}

impl<T> Status<T> {
    pub fn is_partial(&self) -> bool {
        matches!(self, Status::Partial { .. })
    }
}

/// Extract the SNI host name from the start of a client byte stream.
///
/// `buf` must begin at the first TLS record. Bytes past the end of the
/// ClientHello are ignored. `max` bounds how much of `buf` may be consumed by
/// the handshake before giving up with [`SniError::HandshakeTooLarge`].
///
/// # Errors
///
/// - [`SniError::MalformedHandshake`] on any inconsistent length or type field
/// - [`SniError::NoSni`] if the ClientHello has no `host_name` entry
/// - [`SniError::HandshakeTooLarge`] if the declared sizes exceed `max`
pub fn extract_hostname(buf: &[u8], max: usize) -> Result<Status<String>, SniError> {
    let mut handshake: Vec<u8> = Vec::new();
    let mut pos = 0usize;

    loop {
        let rest = &buf[pos..];
        let header = match RecordHeader::parse(rest)? {
            Some(h) => h,
            None => {
                return Ok(Status::Partial {
                    needed: RECORD_HEADER_LEN - rest.len(),
                })
            }
        };
        if header.content_type != ContentType::Handshake {
            return Err(SniError::MalformedHandshake(
                "expected a handshake record before the ClientHello completed",
            ));
        }

        let record_end = RECORD_HEADER_LEN + header.length;
        if pos + record_end > max {
            return Err(SniError::HandshakeTooLarge {
                size: pos + record_end,
                max,
            });
        }
        if rest.len() < record_end {
            return Ok(Status::Partial {
                needed: record_end - rest.len(),
            });
        }
        handshake.extend_from_slice(&rest[RECORD_HEADER_LEN..record_end]);
        pos += record_end;

        if handshake.len() < HANDSHAKE_HEADER_LEN {
            continue;
        }
        if handshake[0] != HANDSHAKE_CLIENT_HELLO {
            return Err(SniError::MalformedHandshake(
                "first handshake message is not a ClientHello",
            ));
        }
        let body_len = u24(&handshake[1..HANDSHAKE_HEADER_LEN]);
        let msg_len = HANDSHAKE_HEADER_LEN + body_len;
        if msg_len > max {
            return Err(SniError::HandshakeTooLarge { size: msg_len, max });
        }
        if handshake.len() >= msg_len {
            let body = &handshake[HANDSHAKE_HEADER_LEN..msg_len];
            return parse_client_hello(body).map(Status::Complete);
        }
    }
}

fn parse_client_hello(body: &[u8]) -> Result<String, SniError> {
    let mut r = Reader::new(body);
    r.take(2)?; // legacy_version
    r.take(32)?; // random

    let session_id_len = r.u8()? as usize;
    if session_id_len > MAX_SESSION_ID_LEN {
        return Err(SniError::MalformedHandshake("session id longer than 32 bytes"));
    }
    r.take(session_id_len)?;

    let suites_len = r.u16()? as usize;
    if suites_len < 2 || suites_len % 2 != 0 {
        return Err(SniError::MalformedHandshake("bad cipher suite list length"));
    }
    r.take(suites_len)?;

    let compression_len = r.u8()? as usize;
    if compression_len == 0 {
        return Err(SniError::MalformedHandshake("empty compression method list"));
    }
    r.take(compression_len)?;

    // Pre-extension hellos are legal; they simply cannot carry SNI.
    if r.is_empty() {
        return Err(SniError::NoSni);
    }

    let extensions_len = r.u16()? as usize;
    let mut extensions = Reader::new(r.take(extensions_len)?);
    if !r.is_empty() {
        return Err(SniError::MalformedHandshake("trailing bytes after extension block"));
    }

    while !extensions.is_empty() {
        let ext_type = extensions.u16()?;
        let ext_len = extensions.u16()? as usize;
        let data = extensions.take(ext_len)?;
        if ext_type == EXT_SERVER_NAME {
            return parse_server_name(data);
        }
    }
    Err(SniError::NoSni)
}

fn parse_server_name(data: &[u8]) -> Result<String, SniError> {
    let mut r = Reader::new(data);
    let list_len = r.u16()? as usize;
    let mut list = Reader::new(r.take(list_len)?);
    if !r.is_empty() {
        return Err(SniError::MalformedHandshake("server_name length mismatch"));
    }

    // Walk the whole list so a truncated entry cannot pass as a shorter name.
    let mut host = None;
    while !list.is_empty() {
        let name_type = list.u8()?;
        let name_len = list.u16()? as usize;
        let name = list.take(name_len)?;
        if name_type == NAME_TYPE_HOST && host.is_none() {
            host = Some(name);
        }
    }

    let name = host.ok_or(SniError::NoSni)?;
    if name.is_empty() {
        return Err(SniError::MalformedHandshake("empty host_name"));
    }
    if !name.iter().all(u8::is_ascii_graphic) {
        return Err(SniError::MalformedHandshake("host_name is not printable ASCII"));
    }
    String::from_utf8(name.to_vec())
        .map_err(|_| SniError::MalformedHandshake("host_name is not printable ASCII"))
}

fn u24(b: &[u8]) -> usize {
    ((b[0] as usize) << 16) | ((b[1] as usize) << 8) | (b[2] as usize)
}

/// Bounds-checked cursor; every overrun is a malformed length field.
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], SniError> {
        if self.buf.len() < n {
            return Err(SniError::MalformedHandshake(
                "length field overruns its container",
            ));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8, SniError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, SniError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }
}
