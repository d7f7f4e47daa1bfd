//! End-to-end relay sessions over an in-memory overlay.

mod common;

use common::{
    client_hello, Event, EventLog, FixedSource, InMemoryOverlay, PeerBehavior, RecordingDialer,
    RecordingStream,
};
use core_oob::{OobClient, OobServer, OverlayTransport, PeerAddress, PeerProber, PendingTable};
use sni_camo::relay::{handle_client, Relay, RelayError};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

fn relay(overlay: Arc<InMemoryOverlay>, peers: &[&str], log: EventLog) -> Relay {
    let transport: Arc<dyn OverlayTransport> = overlay;
    Relay::new(
        peers.iter().map(|p| PeerAddress::from(*p)).collect(),
        PeerProber::new(Arc::clone(&transport)).with_timeout(Duration::from_secs(2)),
        OobClient::new(transport, PendingTable::new()).with_timeout(Duration::from_secs(5)),
        Arc::new(RecordingDialer::new(log)),
    )
}

fn serving(artifact: &[u8]) -> PeerBehavior {
    PeerBehavior::Serve(Arc::new(OobServer::new(Arc::new(FixedSource(
        artifact.to_vec(),
    )))))
}

/// Artifact 0xAA 0xBB reaches the client, unmodified, before the destination is dialed
#[tokio::test]
async fn test_artifact_written_before_destination_dial() {
    let overlay = Arc::new(
        InMemoryOverlay::new()
            .with_peer("peer-down", PeerBehavior::Down)
            .with_peer("peer-up", serving(&[0xAA, 0xBB])),
    );
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let relay = relay(Arc::clone(&overlay), &["peer-down", "peer-up"], Arc::clone(&log));

    let (mut client_app, client_relay) = tokio::io::duplex(4096);
    let recorded = RecordingStream::new(client_relay, Arc::clone(&log));
    let session = tokio::spawn(async move { handle_client(recorded, &relay).await });

    client_app
        .write_all(&client_hello("test.example.com"))
        .await
        .unwrap();

    let mut received = Vec::new();
    client_app.read_to_end(&mut received).await.unwrap();
    assert_eq!(received, vec![0xAA, 0xBB]);

    let stats = session.await.unwrap().unwrap();
    assert_eq!(stats.bytes_from_dest, 0);

    let events = log.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            Event::ClientWrite(vec![0xAA, 0xBB]),
            Event::Dial("test.example.com".to_string()),
        ]
    );
    // probe a, probe b, then one OOB request to b
    assert_eq!(overlay.dials(), vec!["peer-down", "peer-up", "peer-up"]);
}

/// A peer that accepts but never answers: the request fails after the
/// 5 s bound and the client is closed without a single byte
#[tokio::test(start_paused = true)]
async fn test_silent_peer_closes_client_without_writing() {
    let overlay = Arc::new(InMemoryOverlay::new().with_peer("mute", PeerBehavior::Silent));
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let relay = relay(overlay, &["mute"], Arc::clone(&log));

    let (mut client_app, client_relay) = tokio::io::duplex(4096);
    let recorded = RecordingStream::new(client_relay, Arc::clone(&log));
    client_app
        .write_all(&client_hello("test.example.com"))
        .await
        .unwrap();

    let started = tokio::time::Instant::now();
    let err = handle_client(recorded, &relay).await.unwrap_err();
    assert!(started.elapsed() >= Duration::from_secs(5));
    match &err {
        RelayError::Oob(failed) => {
            assert!(failed.is_timeout());
            assert_eq!(failed.peer.as_str(), "mute");
        }
        other => panic!("expected OOB failure, got {other:?}"),
    }
    assert_eq!(err.type_name(), "oob_timeout");

    let mut received = Vec::new();
    client_app.read_to_end(&mut received).await.unwrap();
    assert!(received.is_empty());
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_no_reachable_peer_ends_session() {
    let overlay = Arc::new(
        InMemoryOverlay::new()
            .with_peer("a", PeerBehavior::Down)
            .with_peer("b", PeerBehavior::Hang),
    );
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let relay = relay(Arc::clone(&overlay), &["a", "b"], Arc::clone(&log));

    let (mut client_app, client_relay) = tokio::io::duplex(4096);
    client_app
        .write_all(&client_hello("blocked.example.org"))
        .await
        .unwrap();
    let err = handle_client(RecordingStream::new(client_relay, Arc::clone(&log)), &relay)
        .await
        .unwrap_err();
    assert_eq!(err.type_name(), "no_reachable_peer");
    assert_eq!(overlay.dials(), vec!["a", "b"]);

    let mut received = Vec::new();
    client_app.read_to_end(&mut received).await.unwrap();
    assert!(received.is_empty());
}

#[tokio::test]
async fn test_client_without_sni_is_dropped_before_oob() {
    let overlay = Arc::new(InMemoryOverlay::new().with_peer("p", serving(b"unused")));
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let relay = relay(Arc::clone(&overlay), &["p"], Arc::clone(&log));

    let mut hello = client_hello("x.example");
    // rename the server_name extension (type 0) to an unknown type
    let sni_offset = hello
        .windows(4)
        .position(|w| w == [0x00, 0x00, 0x00, 0x0e])
        .unwrap();
    hello[sni_offset + 1] = 0x99;

    let (mut client_app, client_relay) = tokio::io::duplex(4096);
    client_app.write_all(&hello).await.unwrap();
    let err = handle_client(client_relay, &relay).await.unwrap_err();
    assert_eq!(err.type_name(), "no_sni");
    assert!(overlay.dials().is_empty());
}

#[tokio::test]
async fn test_concurrent_sessions_get_their_own_artifacts() {
    let overlay = Arc::new(InMemoryOverlay::new().with_peer(
        "echo",
        PeerBehavior::Serve(Arc::new(OobServer::new(Arc::new(core_oob::AckResponder)))),
    ));
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let relay = relay(overlay, &["echo"], log);

    let mut sessions = Vec::new();
    for i in 0..8 {
        let relay = relay.clone();
        sessions.push(tokio::spawn(async move {
            let host = format!("site{}.example.com", i);
            let (mut client_app, client_relay) = tokio::io::duplex(4096);
            let session = tokio::spawn(async move { handle_client(client_relay, &relay).await });
            client_app.write_all(&client_hello(&host)).await.unwrap();
            let mut received = Vec::new();
            client_app.read_to_end(&mut received).await.unwrap();
            session.await.unwrap().unwrap();
            assert_eq!(received, format!("ACK: {}", host).into_bytes());
        }));
    }
    for s in sessions {
        s.await.unwrap();
    }
}
