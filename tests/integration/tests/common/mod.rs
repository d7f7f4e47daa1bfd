//! Shared fixtures: in-memory overlay, fixed handshake source, recording
//! client stream and destination dialer.
#![allow(dead_code)]

use async_trait::async_trait;
use core_oob::{
    CaptureError, HandshakeSource, OobServer, OverlayStream, OverlayTransport, PeerAddress,
};
use sni_camo::relay::{DestinationDialer, DestinationStream};
use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};

pub enum PeerBehavior {
    /// Hands the connection to an OOB server
    Serve(Arc<OobServer>),
    /// Accepts the connection and never says anything
    Silent,
    /// Dial never completes
    Hang,
    /// Dial is refused
    Down,
}

pub struct InMemoryOverlay {
    peers: HashMap<String, PeerBehavior>,
    dials: Mutex<Vec<String>>,
    held: Mutex<Vec<DuplexStream>>,
}

impl InMemoryOverlay {
    pub fn new() -> Self {
        Self {
            peers: HashMap::new(),
            dials: Mutex::new(Vec::new()),
            held: Mutex::new(Vec::new()),
        }
    }

    pub fn with_peer(mut self, name: &str, behavior: PeerBehavior) -> Self {
        self.peers.insert(name.to_string(), behavior);
        self
    }

    pub fn dials(&self) -> Vec<String> {
        self.dials.lock().unwrap().clone()
    }
}

#[async_trait]
impl OverlayTransport for InMemoryOverlay {
    async fn dial(&self, peer: &PeerAddress) -> io::Result<OverlayStream> {
        self.dials.lock().unwrap().push(peer.to_string());
        match self.peers.get(peer.as_str()) {
            None | Some(PeerBehavior::Down) => {
                Err(io::Error::new(io::ErrorKind::ConnectionRefused, "peer down"))
            }
            Some(PeerBehavior::Hang) => std::future::pending().await,
            Some(PeerBehavior::Silent) => {
                let (local, remote) = tokio::io::duplex(4096);
                self.held.lock().unwrap().push(remote);
                Ok(Box::new(local))
            }
            Some(PeerBehavior::Serve(server)) => {
                let (local, remote) = tokio::io::duplex(4096);
                let server = Arc::clone(server);
                tokio::spawn(async move {
                    let _ = server.handle_connection(remote).await;
                });
                Ok(Box::new(local))
            }
        }
    }
}

/// Always answers with the same artifact.
pub struct FixedSource(pub Vec<u8>);

#[async_trait]
impl HandshakeSource for FixedSource {
    async fn fetch(&self, _hostname: &str) -> Result<Vec<u8>, CaptureError> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    ClientWrite(Vec<u8>),
    Dial(String),
}

pub type EventLog = Arc<Mutex<Vec<Event>>>;

/// Client-side socket wrapper recording every successful write.
pub struct RecordingStream<S> {
    inner: S,
    log: EventLog,
}

impl<S> RecordingStream<S> {
    pub fn new(inner: S, log: EventLog) -> Self {
        Self { inner, log }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for RecordingStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for RecordingStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let polled = Pin::new(&mut self.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = &polled {
            if *n > 0 {
                self.log
                    .lock()
                    .unwrap()
                    .push(Event::ClientWrite(buf[..*n].to_vec()));
            }
        }
        polled
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Records the dial, then returns a destination that closes immediately.
pub struct RecordingDialer {
    log: EventLog,
}

impl RecordingDialer {
    pub fn new(log: EventLog) -> Self {
        Self { log }
    }
}

#[async_trait]
impl DestinationDialer for RecordingDialer {
    async fn connect(&self, hostname: &str) -> io::Result<DestinationStream> {
        self.log
            .lock()
            .unwrap()
            .push(Event::Dial(hostname.to_string()));
        let (relay_end, _far_end) = tokio::io::duplex(1024);
        Ok(Box::new(relay_end))
    }
}

/// A single-record ClientHello naming `host`.
pub fn client_hello(host: &str) -> Vec<u8> {
    let name = host.as_bytes();
    let mut server_name = Vec::new();
    server_name.extend_from_slice(&((name.len() + 3) as u16).to_be_bytes());
    server_name.push(0);
    server_name.extend_from_slice(&(name.len() as u16).to_be_bytes());
    server_name.extend_from_slice(name);

    let mut exts = Vec::new();
    // supported_versions ahead of SNI
    exts.extend_from_slice(&[0x00, 0x2b, 0x00, 0x03, 0x02, 0x03, 0x04]);
    exts.extend_from_slice(&[0x00, 0x00]);
    exts.extend_from_slice(&(server_name.len() as u16).to_be_bytes());
    exts.extend_from_slice(&server_name);

    let mut body = vec![0x03, 0x03];
    body.extend_from_slice(&[0x42; 32]);
    body.push(32);
    body.extend_from_slice(&[0x24; 32]);
    body.extend_from_slice(&[0x00, 0x04, 0x13, 0x01, 0x13, 0x02, 0x01, 0x00]);
    body.extend_from_slice(&(exts.len() as u16).to_be_bytes());
    body.extend_from_slice(&exts);

    let mut msg = vec![0x01];
    msg.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
    msg.extend_from_slice(&body);

    let mut record = vec![0x16, 0x03, 0x01];
    record.extend_from_slice(&(msg.len() as u16).to_be_bytes());
    record.extend_from_slice(&msg);
    record
}
