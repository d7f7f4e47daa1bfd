//! Overlay transport seam.
//!
//! Peers are dialed through an [`OverlayTransport`]; the production
//! implementation is plain TCP to the peer's overlay IPv6 address (the
//! overlay daemon routes it), tests substitute in-memory pipes.

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::PeerAddress;

pub trait RawStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> RawStream for T {}

/// A connected, full-duplex overlay stream.
pub type OverlayStream = Box<dyn RawStream>;

#[async_trait]
pub trait OverlayTransport: Send + Sync {
    async fn dial(&self, peer: &PeerAddress) -> io::Result<OverlayStream>;
}

/// Dials `(peer, port)` over TCP.
#[derive(Debug, Clone, Copy)]
pub struct TcpOverlay {
    port: u16,
}

impl TcpOverlay {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

/// Accepts `200::1` and `[200::1]` alike.
fn host_part(peer: &PeerAddress) -> &str {
    let s = peer.as_str();
    s.strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(s)
}

#[async_trait]
impl OverlayTransport for TcpOverlay {
    async fn dial(&self, peer: &PeerAddress) -> io::Result<OverlayStream> {
        let stream = TcpStream::connect((host_part(peer), self.port)).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}
