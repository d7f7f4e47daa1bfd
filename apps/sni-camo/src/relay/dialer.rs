//! Outbound connection to the real destination.

use async_trait::async_trait;
use core_oob::tls::insecure_client_config;
use core_oob::RawStream;
use std::io;
use tokio::net::TcpStream;
use tokio_rustls::rustls::ServerName;
use tokio_rustls::TlsConnector;
use tracing::debug;

const HTTPS_PORT: u16 = 443;

pub type DestinationStream = Box<dyn RawStream>;

#[async_trait]
pub trait DestinationDialer: Send + Sync {
    async fn connect(&self, hostname: &str) -> io::Result<DestinationStream>;
}

/// TLS to `hostname:443` without certificate validation.
///
/// When `fake_sni` is set it is sent as the server name in place of the
/// real host, so an on-path observer sees only the camouflage name.
#[derive(Clone)]
pub struct TlsDialer {
    connector: TlsConnector,
    fake_sni: Option<String>,
    port: u16,
}

impl TlsDialer {
    pub fn new(fake_sni: Option<String>) -> Self {
        Self {
            connector: TlsConnector::from(insecure_client_config(&[b"http/1.1"])),
            fake_sni,
            port: HTTPS_PORT,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    fn server_name(&self, hostname: &str) -> io::Result<ServerName> {
        let presented = self.fake_sni.as_deref().unwrap_or(hostname);
        ServerName::try_from(presented).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid server name '{}'", presented),
            )
        })
    }
}

#[async_trait]
impl DestinationDialer for TlsDialer {
    async fn connect(&self, hostname: &str) -> io::Result<DestinationStream> {
        let name = self.server_name(hostname)?;
        let tcp = TcpStream::connect((hostname, self.port)).await?;
        tcp.set_nodelay(true)?;
        let tls = self.connector.connect(name, tcp).await?;
        debug!(hostname, sni = ?self.fake_sni, "destination TLS established");
        Ok(Box::new(tls))
    }
}
