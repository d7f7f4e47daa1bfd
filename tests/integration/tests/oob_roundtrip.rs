//! OOB client, server, table and prober working together.

mod common;

use common::{FixedSource, InMemoryOverlay, PeerBehavior};
use core_oob::{
    AckResponder, OobClient, OobServer, OverlayTransport, PeerAddress, PeerProber, PendingTable,
    RequestId, TcpOverlay,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

#[tokio::test]
async fn test_payload_roundtrip_is_unmodified() {
    let payload: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
    let overlay = Arc::new(InMemoryOverlay::new().with_peer(
        "p",
        PeerBehavior::Serve(Arc::new(OobServer::new(Arc::new(FixedSource(
            payload.clone(),
        ))))),
    ));
    let client = OobClient::new(overlay, PendingTable::new());
    let out = client.request(&"p".into(), "any.example").await.unwrap();
    assert_eq!(out, payload);
    assert!(client.table().is_empty());
}

#[tokio::test]
async fn test_table_delivers_exact_payload_for_id() {
    let table = PendingTable::new();
    let id = RequestId::from("X");
    let waiter = table.register(id.clone()).unwrap();
    let p = vec![0x00, 0xff, 0x10, 0x80];
    let deliverer = {
        let table = table.clone();
        let p = p.clone();
        tokio::spawn(async move { table.deliver(&id, p) })
    };
    assert!(deliverer.await.unwrap());
    assert_eq!(waiter.wait(Duration::from_secs(1)).await.unwrap(), p);
}

#[tokio::test]
async fn test_colocated_server_and_client_share_one_table() {
    let table = PendingTable::new();
    let server = OobServer::new(Arc::new(AckResponder)).with_colocated_table(table.clone());
    let overlay = Arc::new(
        InMemoryOverlay::new().with_peer("self", PeerBehavior::Serve(Arc::new(server))),
    );
    let client = OobClient::new(overlay, table.clone());
    let out = client.request(&"self".into(), "local.example").await.unwrap();
    assert_eq!(out, b"ACK: local.example");
    assert!(table.is_empty());
}

#[tokio::test]
async fn test_prober_returns_kth_peer_after_k_checks() {
    let serve = || PeerBehavior::Serve(Arc::new(OobServer::new(Arc::new(AckResponder))));
    let overlay = Arc::new(
        InMemoryOverlay::new()
            .with_peer("p1", PeerBehavior::Down)
            .with_peer("p2", PeerBehavior::Down)
            .with_peer("p3", serve())
            .with_peer("p4", serve())
            .with_peer("p5", PeerBehavior::Down),
    );
    let peers: Vec<PeerAddress> = ["p1", "p2", "p3", "p4", "p5"]
        .iter()
        .map(|p| PeerAddress::from(*p))
        .collect();
    let transport: Arc<dyn OverlayTransport> = overlay.clone();
    let chosen = PeerProber::new(transport).first_reachable(&peers).await.unwrap();
    assert_eq!(chosen.as_str(), "p3");
    assert_eq!(overlay.dials().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_server_fails_after_timeout() {
    let overlay = Arc::new(InMemoryOverlay::new().with_peer("far", PeerBehavior::Hang));
    let client = OobClient::new(overlay, PendingTable::new());
    let started = tokio::time::Instant::now();
    let err = client.request(&"far".into(), "x.example").await.unwrap_err();
    assert!(err.is_timeout());
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert!(client.table().is_empty());
}

#[tokio::test]
async fn test_tcp_overlay_against_listening_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = Arc::new(OobServer::new(Arc::new(AckResponder)));
    let serving = tokio::spawn(server.serve(listener));

    let transport: Arc<dyn OverlayTransport> = Arc::new(TcpOverlay::new(port));
    let peer = PeerAddress::from("127.0.0.1");
    assert!(PeerProber::new(Arc::clone(&transport)).is_reachable(&peer).await);

    let client = OobClient::new(transport, PendingTable::new());
    let out = client.request(&peer, "tcp.example").await.unwrap();
    assert_eq!(out, b"ACK: tcp.example");
    serving.abort();
}
