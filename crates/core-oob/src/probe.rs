//! Peer liveness probing.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::transport::OverlayTransport;
use crate::PeerAddress;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("no reachable OOB peer among {tried} candidates")]
    NoReachablePeer { tried: usize },
}

/// Checks reachability by opening and immediately closing a connection.
///
/// The remote server treats a connection without a request as a probe.
#[derive(Clone)]
pub struct PeerProber {
    transport: Arc<dyn OverlayTransport>,
    timeout: Duration,
}

impl PeerProber {
    pub fn new(transport: Arc<dyn OverlayTransport>) -> Self {
        Self {
            transport,
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn is_reachable(&self, peer: &PeerAddress) -> bool {
        match tokio::time::timeout(self.timeout, self.transport.dial(peer)).await {
            Ok(Ok(_stream)) => true,
            Ok(Err(e)) => {
                debug!(%peer, error = %e, "OOB peer unreachable");
                false
            }
            Err(_) => {
                debug!(%peer, timeout_ms = self.timeout.as_millis() as u64, "OOB peer probe timed out");
                false
            }
        }
    }

    /// First peer in `peers` that answers, checked strictly in order.
    ///
    /// Stops at the first success, so at most `peers.len()` dials are made.
    pub async fn first_reachable(&self, peers: &[PeerAddress]) -> Result<PeerAddress, ProbeError> {
        for peer in peers {
            if self.is_reachable(peer).await {
                info!(%peer, "selected OOB peer");
                return Ok(peer.clone());
            }
        }
        Err(ProbeError::NoReachablePeer { tried: peers.len() })
    }
}
