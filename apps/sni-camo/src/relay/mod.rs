//! Client-facing connection relay.
//!
//! # Session states
//!
//! `ReadingHandshake → ResolvingHostname → InjectingResponse → Relaying → Closed`
//!
//! A failure in any state goes straight to `Closed`. Only OOB resolution is
//! time bounded; relaying lasts until one side closes.
//!
//! # Known limitation
//!
//! The injected artifact is the destination's genuine ServerHello, but the
//! relay then opens a separate TLS session to the destination with its own
//! keys. A client completing its handshake against the injected ServerHello
//! will not agree on keys with the bytes that follow.

mod dialer;
mod errors;
mod forwarder;
mod handler;

pub use dialer::{DestinationDialer, DestinationStream, TlsDialer};
pub use errors::{RelayError, Result};
pub use forwarder::{relay_bidirectional, RelayStats};
pub use handler::{handle_client, SessionState};

use core_oob::{OobClient, PeerAddress, PeerProber};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Shared, cheaply cloned state for every session.
#[derive(Clone)]
pub struct Relay {
    peers: Arc<[PeerAddress]>,
    prober: PeerProber,
    client: OobClient,
    dialer: Arc<dyn DestinationDialer>,
    max_handshake: usize,
}

impl Relay {
    pub fn new(
        peers: Vec<PeerAddress>,
        prober: PeerProber,
        client: OobClient,
        dialer: Arc<dyn DestinationDialer>,
    ) -> Self {
        Self {
            peers: peers.into(),
            prober,
            client,
            dialer,
            max_handshake: core_sni::DEFAULT_MAX_HANDSHAKE,
        }
    }

    pub fn with_max_handshake(mut self, max: usize) -> Self {
        self.max_handshake = max;
        self
    }

    /// Accept clients forever, one task per connection.
    pub async fn serve(self, listener: TcpListener) -> io::Result<()> {
        info!(addr = ?listener.local_addr().ok(), "relay listening");
        loop {
            let (stream, remote) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };
            let _ = stream.set_nodelay(true);
            debug!(%remote, "client accepted");
            let relay = self.clone();
            tokio::spawn(async move {
                // outcome already logged by the session
                let _ = handle_client(stream, &relay).await;
            });
        }
    }
}
