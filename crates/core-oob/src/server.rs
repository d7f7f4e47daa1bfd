//! Answering side of the OOB exchange.
//!
//! One request per connection: read the request, produce the destination's
//! handshake artifact, reply with a response or error frame, close. When the
//! server shares its pending table with a local client, it also resolves the
//! local waiter directly.

use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::capture::{CaptureError, HandshakeSource};
use crate::frame::{read_frame, write_frame, ErrorReply, FrameError, HostnameResponse, OobFrame};
use crate::pending::PendingTable;

/// Bound on receiving the request, and separately on producing one artifact
/// from the destination.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(4);

pub struct OobServer {
    source: Arc<dyn HandshakeSource>,
    table: Option<PendingTable>,
    handshake_timeout: Duration,
}

impl OobServer {
    pub fn new(source: Arc<dyn HandshakeSource>) -> Self {
        Self {
            source,
            table: None,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// Resolve waiters in `table` as well as replying on the wire.
    pub fn with_colocated_table(mut self, table: PendingTable) -> Self {
        self.table = Some(table);
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Accept connections forever; accept errors are logged and retried.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> io::Result<()> {
        info!(addr = ?listener.local_addr().ok(), "OOB server listening");
        loop {
            let (stream, remote) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    // EMFILE and friends are transient; keep accepting
                    warn!(error = %e, "OOB accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };
            let _ = stream.set_nodelay(true);
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream).await {
                    warn!(%remote, error = %e, "OOB session failed");
                }
            });
        }
    }

    /// Serve one connection.
    ///
    /// A connection that closes before sending a frame is a probe and is
    /// closed without reply.
    pub async fn handle_connection<S>(&self, mut stream: S) -> Result<(), FrameError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let first = tokio::time::timeout(self.handshake_timeout, read_frame(&mut stream))
            .await
            .map_err(|_| {
                FrameError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "no request frame before the handshake timeout",
                ))
            })??;
        let request = match first {
            None => {
                debug!("OOB probe connection");
                return Ok(());
            }
            Some(OobFrame::Request(request)) => request,
            Some(other) => {
                return Err(FrameError::DecodeFailed(format!(
                    "expected request frame, got {:?}",
                    other.frame_type()
                )))
            }
        };
        let request_id = request.request_id;
        info!(%request_id, hostname = %request.hostname, "OOB request received");

        let (reply, artifact) = match self.capture(&request.hostname).await {
            Ok(artifact) => {
                debug!(%request_id, bytes = artifact.len(), "destination handshake captured");
                let reply = OobFrame::Response(HostnameResponse {
                    request_id: request_id.clone(),
                    payload: artifact.clone(),
                });
                (reply, Some(artifact))
            }
            Err(e) => {
                warn!(%request_id, hostname = %request.hostname, error = %e, "destination handshake failed");
                let reply = OobFrame::Error(ErrorReply {
                    request_id: request_id.clone(),
                    error: e.to_string(),
                });
                (reply, None)
            }
        };

        let written = write_frame(&mut stream, &reply).await;

        if let (Some(table), Some(artifact)) = (&self.table, artifact) {
            if table.deliver(&request_id, artifact) {
                debug!(%request_id, "resolved co-located waiter");
            }
        }

        written?;
        stream.shutdown().await?;
        Ok(())
    }

    async fn capture(&self, hostname: &str) -> Result<Vec<u8>, CaptureError> {
        match tokio::time::timeout(self.handshake_timeout, self.source.fetch(hostname)).await {
            Ok(result) => result,
            Err(_) => Err(CaptureError::Timeout(self.handshake_timeout)),
        }
    }
}
