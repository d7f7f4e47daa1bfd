//! Peer verification: probe configured peers and send one test request.

use anyhow::{bail, Context, Result};
use core_oob::{OobClient, OverlayTransport, PeerAddress, PeerProber, PendingTable};
use std::sync::Arc;
use tracing::info;

use crate::config::Config;

pub const DEFAULT_CHECK_HOSTNAME: &str = "test.example.com";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerStatus {
    pub peer: PeerAddress,
    pub reachable: bool,
}

#[derive(Debug, Clone)]
pub struct CheckReport {
    /// One entry per peer probed, in configuration order
    pub probed: Vec<PeerStatus>,
    pub selected: PeerAddress,
    pub artifact: Vec<u8>,
}

/// Probe `config.oob_peers` in order, stopping at the first reachable one,
/// then request the artifact for `hostname` from it.
pub async fn run_check(
    config: &Config,
    transport: Arc<dyn OverlayTransport>,
    hostname: &str,
) -> Result<CheckReport> {
    if config.oob_peers.is_empty() {
        bail!("no OOB peers configured");
    }

    let prober = PeerProber::new(Arc::clone(&transport)).with_timeout(config.probe_timeout());
    let mut probed = Vec::new();
    let mut selected = None;
    for peer in &config.oob_peers {
        let reachable = prober.is_reachable(peer).await;
        info!(%peer, reachable, "probed OOB peer");
        probed.push(PeerStatus {
            peer: peer.clone(),
            reachable,
        });
        if reachable {
            selected = Some(peer.clone());
            break;
        }
    }
    let Some(selected) = selected else {
        bail!("none of the {} configured OOB peers is reachable", probed.len());
    };

    let client = OobClient::new(transport, PendingTable::new()).with_timeout(config.oob_timeout());
    let artifact = client
        .request(&selected, hostname)
        .await
        .with_context(|| format!("test request to {}", selected))?;
    info!(peer = %selected, bytes = artifact.len(), "test request answered");

    Ok(CheckReport {
        probed,
        selected,
        artifact,
    })
}
