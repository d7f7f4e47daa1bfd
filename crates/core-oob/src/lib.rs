//! Out-of-band hostname exchange over an overlay network.
//!
//! A proxy that has intercepted a client's ClientHello sends the real host
//! name to a remote peer over a side channel; the peer performs the genuine
//! TLS opening with the destination and returns what the destination said.
//!
//! # Architecture
//!
//! - **[`PendingTable`]**: correlates outbound requests with asynchronous
//!   responses, one single-slot waiter per [`RequestId`]
//! - **[`PeerProber`]**: picks the first reachable peer from an ordered list
//! - **[`OobClient`]**: one request, one overlay connection, bounded wait
//! - **[`OobServer`]**: answers requests using a [`HandshakeSource`]
//! - **[`frame`]**: the wire codec shared by both roles
//!
//! Client and server may share one table in a single process; whichever
//! delivers first wins and the other delivery is a no-op.

pub mod capture;
pub mod client;
pub mod frame;
pub mod pending;
pub mod probe;
pub mod server;
pub mod tls;
pub mod transport;

pub use capture::{AckResponder, CaptureError, HandshakeSource, TlsCapture};
pub use client::{OobClient, OobRequestFailed, RequestFailure, DEFAULT_REQUEST_TIMEOUT};
pub use frame::{ErrorReply, FrameError, HostnameRequest, HostnameResponse, OobFrame};
pub use pending::{CorrelationError, PendingTable, Waiter, DEFAULT_ENTRY_TTL};
pub use probe::{PeerProber, ProbeError, DEFAULT_PROBE_TIMEOUT};
pub use server::{OobServer, DEFAULT_HANDSHAKE_TIMEOUT};
pub use transport::{OverlayStream, OverlayTransport, RawStream, TcpOverlay};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque overlay identifier of a remote OOB peer.
///
/// The overlay network resolves it; nothing here inspects its format.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerAddress(String);

impl PeerAddress {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerAddress {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for PeerAddress {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Correlation token carried by every OOB frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// 128 bits from the thread-local CSPRNG, hex encoded.
    pub fn generate() -> Self {
        let bytes: [u8; 16] = rand::random();
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
