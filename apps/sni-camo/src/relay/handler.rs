//! Per-connection relay session.

use core_sni::read_client_hello;
use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::errors::{RelayError, Result};
use super::forwarder::{relay_bidirectional, RelayStats};
use super::Relay;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    ReadingHandshake,
    ResolvingHostname,
    InjectingResponse,
    Relaying,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::ReadingHandshake => "reading_handshake",
            SessionState::ResolvingHostname => "resolving_hostname",
            SessionState::InjectingResponse => "injecting_response",
            SessionState::Relaying => "relaying",
            SessionState::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle a single client connection.
///
/// Flow:
/// 1. Buffer the ClientHello and extract the SNI host name
/// 2. Pick the first reachable peer and fetch the destination's handshake
///    artifact over OOB
/// 3. Write the artifact to the client
/// 4. Open TLS to the destination
/// 5. Relay bytes both ways until either side closes
///
/// Any failure ends the session; both sockets are dropped on every path.
/// Nothing is written to the client unless step 2 succeeded.
pub async fn handle_client<S>(client: S, relay: &Relay) -> Result<RelayStats>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut state = SessionState::ReadingHandshake;
    let result = drive(client, relay, &mut state).await;

    match &result {
        Ok(stats) => info!(
            bytes_to_dest = stats.bytes_to_dest,
            bytes_from_dest = stats.bytes_from_dest,
            "session closed"
        ),
        Err(e) => warn!(
            state = %state,
            error_kind = e.type_name(),
            error = %e,
            "session failed"
        ),
    }
    debug!(state = %SessionState::Closed, "session released");
    result
}

async fn drive<S>(mut client: S, relay: &Relay, state: &mut SessionState) -> Result<RelayStats>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    // Step 1: ClientHello
    let hello = read_client_hello(&mut client, relay.max_handshake).await?;
    let hostname = hello.hostname;
    info!(%hostname, hello_bytes = hello.raw.len(), "ClientHello parsed");

    // Step 2: OOB resolution, peers re-probed for every session
    *state = SessionState::ResolvingHostname;
    let peer = relay.prober.first_reachable(&relay.peers).await?;
    let artifact = relay.client.request(&peer, &hostname).await?;
    debug!(%peer, %hostname, artifact_bytes = artifact.len(), "artifact received");

    // Step 3: inject
    *state = SessionState::InjectingResponse;
    client.write_all(&artifact).await?;
    client.flush().await?;

    // Step 4: destination
    *state = SessionState::Relaying;
    let dest = relay
        .dialer
        .connect(&hostname)
        .await
        .map_err(|source| RelayError::DestinationDial {
            host: hostname.clone(),
            source,
        })?;
    info!(%hostname, "relaying");

    // Step 5: full duplex
    let (stats, outcome) = relay_bidirectional(client, dest).await;
    if let Err(e) = outcome {
        debug!(
            bytes_to_dest = stats.bytes_to_dest,
            bytes_from_dest = stats.bytes_from_dest,
            "relay ended with error"
        );
        return Err(RelayError::Io(e));
    }
    *state = SessionState::Closed;
    Ok(stats)
}
