//! Sources of the handshake artifact a peer returns for a host name.

use async_trait::async_trait;
use core_sni::{read_record, ContentType, SniError, RECORD_HEADER_LEN};
use rustls::{ClientConfig, ClientConnection, ServerName};
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

use crate::tls::{insecure_client_config, BROWSER_ALPN};

const HANDSHAKE_SERVER_HELLO: u8 = 0x02;
const HTTPS_PORT: u16 = 443;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("invalid destination name '{0}'")]
    InvalidName(String),

    #[error("TLS client setup failed: {0}")]
    Tls(#[from] rustls::Error),

    #[error("connect to {host}:{port} failed: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("destination sent alert (level {level}, description {description})")]
    Alert { level: u8, description: u8 },

    #[error("destination answered with a {0:?} record")]
    UnexpectedRecord(ContentType),

    #[error("destination handshake record is not a ServerHello")]
    NotServerHello,

    #[error("reading destination response: {0}")]
    Record(#[from] SniError),

    #[error("destination did not answer within {0:?}")]
    Timeout(std::time::Duration),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Produces the bytes a destination sends in response to a client's opening.
#[async_trait]
pub trait HandshakeSource: Send + Sync {
    async fn fetch(&self, hostname: &str) -> Result<Vec<u8>, CaptureError>;
}

/// Performs a real TLS opening against `hostname` and returns the first
/// server record (the ServerHello) exactly as received.
#[derive(Clone)]
pub struct TlsCapture {
    config: Arc<ClientConfig>,
    port: u16,
}

impl Default for TlsCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl TlsCapture {
    pub fn new() -> Self {
        Self {
            config: insecure_client_config(BROWSER_ALPN),
            port: HTTPS_PORT,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    fn client_hello(&self, hostname: &str) -> Result<Vec<u8>, CaptureError> {
        let name = ServerName::try_from(hostname)
            .map_err(|_| CaptureError::InvalidName(hostname.to_string()))?;
        let mut conn = ClientConnection::new(Arc::clone(&self.config), name)?;
        let mut hello = Vec::new();
        while conn.wants_write() {
            conn.write_tls(&mut hello)?;
        }
        Ok(hello)
    }
}

#[async_trait]
impl HandshakeSource for TlsCapture {
    async fn fetch(&self, hostname: &str) -> Result<Vec<u8>, CaptureError> {
        let hello = self.client_hello(hostname)?;
        let mut stream = TcpStream::connect((hostname, self.port))
            .await
            .map_err(|source| CaptureError::Connect {
                host: hostname.to_string(),
                port: self.port,
                source,
            })?;
        stream.set_nodelay(true)?;
        stream.write_all(&hello).await?;

        let (header, record) = read_record(&mut stream).await?;
        debug!(hostname, bytes = record.len(), content_type = ?header.content_type, "destination replied");
        match header.content_type {
            ContentType::Handshake => {
                if record.get(RECORD_HEADER_LEN) != Some(&HANDSHAKE_SERVER_HELLO) {
                    return Err(CaptureError::NotServerHello);
                }
                Ok(record)
            }
            ContentType::Alert => Err(CaptureError::Alert {
                level: record.get(RECORD_HEADER_LEN).copied().unwrap_or_default(),
                description: record.get(RECORD_HEADER_LEN + 1).copied().unwrap_or_default(),
            }),
            other => Err(CaptureError::UnexpectedRecord(other)),
        }
    }
}

/// Test-mode source: answers with `"ACK: <hostname>"` and touches no network.
#[derive(Debug, Clone, Copy, Default)]
pub struct AckResponder;

#[async_trait]
impl HandshakeSource for AckResponder {
    async fn fetch(&self, hostname: &str) -> Result<Vec<u8>, CaptureError> {
        Ok(format!("ACK: {}", hostname).into_bytes())
    }
}
