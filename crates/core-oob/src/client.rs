//! Requesting side of the OOB exchange.

use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};

use crate::frame::{read_frame, write_frame, FrameError, HostnameRequest, OobFrame};
use crate::pending::{CorrelationError, PendingTable};
use crate::transport::OverlayTransport;
use crate::{PeerAddress, RequestId};

/// Upper bound on one request, dial included.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum RequestFailure {
    #[error(transparent)]
    Correlation(#[from] CorrelationError),

    #[error("overlay dial failed: {0}")]
    Dial(#[source] io::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("peer closed the connection without replying")]
    NoReply,

    #[error("peer could not reach the destination: {0}")]
    Destination(String),

    #[error("peer sent a request frame")]
    UnexpectedRequest,

    #[error("response carries foreign request id {0}")]
    ForeignResponse(RequestId),
}

#[derive(Debug, Error)]
#[error("OOB request {request_id} to {peer} failed: {cause}")]
pub struct OobRequestFailed {
    pub peer: PeerAddress,
    pub request_id: RequestId,
    #[source]
    pub cause: RequestFailure,
}

impl OobRequestFailed {
    pub fn is_timeout(&self) -> bool {
        matches!(
            self.cause,
            RequestFailure::Correlation(CorrelationError::Timeout(_))
        )
    }
}

/// Sends one hostname request per call and waits for the matching reply.
#[derive(Clone)]
pub struct OobClient {
    transport: Arc<dyn OverlayTransport>,
    table: PendingTable,
    timeout: Duration,
}

impl OobClient {
    pub fn new(transport: Arc<dyn OverlayTransport>, table: PendingTable) -> Self {
        Self {
            transport,
            table,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn table(&self) -> &PendingTable {
        &self.table
    }

    /// Ask `peer` for the handshake artifact of `hostname`.
    ///
    /// The reply is matched to this call through the pending table, so a
    /// co-located server sharing the table may resolve it first. The whole
    /// exchange is bounded by the client timeout; on failure nothing is left
    /// behind in the table.
    pub async fn request(
        &self,
        peer: &PeerAddress,
        hostname: &str,
    ) -> Result<Vec<u8>, OobRequestFailed> {
        let request_id = RequestId::generate();
        let fail = |cause: RequestFailure| OobRequestFailed {
            peer: peer.clone(),
            request_id: request_id.clone(),
            cause,
        };

        let waiter = self
            .table
            .register_for(request_id.clone(), self.timeout)
            .map_err(|e| fail(e.into()))?;
        debug!(%peer, %request_id, hostname, "OOB request sent");

        let exchange = self.exchange(peer, &request_id, hostname);
        let wait = waiter.wait(self.timeout);
        tokio::pin!(exchange, wait);

        // exchange finishing Ok only means the reply went to the table
        let outcome = tokio::select! {
            res = &mut wait => res.map_err(RequestFailure::from),
            Err(cause) = &mut exchange => Err(cause),
        };

        match &outcome {
            Ok(payload) => debug!(%peer, %request_id, bytes = payload.len(), "OOB response received"),
            Err(cause) => debug!(%peer, %request_id, error = %cause, "OOB request failed"),
        }
        outcome.map_err(fail)
    }

    async fn exchange(
        &self,
        peer: &PeerAddress,
        request_id: &RequestId,
        hostname: &str,
    ) -> Result<(), RequestFailure> {
        let mut stream = self
            .transport
            .dial(peer)
            .await
            .map_err(RequestFailure::Dial)?;

        let request = OobFrame::Request(HostnameRequest {
            request_id: request_id.clone(),
            hostname: hostname.to_string(),
        });
        write_frame(&mut stream, &request).await?;

        match read_frame(&mut stream).await? {
            Some(OobFrame::Response(response)) => {
                if &response.request_id != request_id {
                    return Err(RequestFailure::ForeignResponse(response.request_id));
                }
                if !self.table.deliver(&response.request_id, response.payload) {
                    trace!(%request_id, "response already delivered locally");
                }
                Ok(())
            }
            Some(OobFrame::Error(reply)) => Err(RequestFailure::Destination(reply.error)),
            Some(OobFrame::Request(_)) => Err(RequestFailure::UnexpectedRequest),
            None => Err(RequestFailure::NoReply),
        }
    }
}
