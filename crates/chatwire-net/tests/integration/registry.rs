//! Registry semantics: ordering, idempotent removal, addressed delivery,
//! skip-on-closed, parallel shutdown. Wired by hand (no accept loop) so the
//! tests control exactly when sessions enter and leave the live set.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chatwire_net::config::NetConfig;
use chatwire_net::{
    event_channel, ConnectionRegistry, Event, EventSender, PeerSession, SessionConfig, SessionId,
};
use chatwire_protocol::Message;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::harness::{assert_quiet, connect_client, init_tracing, next_event, TestClient};

const EVENT_TIMEOUT: Duration = Duration::from_secs(2);
const QUIET_WINDOW: Duration = Duration::from_millis(300);

/// One hand-wired peer: a real client on one end, a server-role session on
/// the other, registered with the registry.
async fn join_peer(
    listener: &TcpListener,
    registry: &ConnectionRegistry,
    config: &NetConfig,
    events: EventSender,
    closed_tx: mpsc::UnboundedSender<SessionId>,
) -> (TestClient, Arc<PeerSession>) {
    let client = connect_client(listener.local_addr().unwrap())
        .await
        .unwrap();
    let (stream, _) = listener.accept().await.unwrap();
    let session = PeerSession::from_accepted(stream, SessionConfig::peer(config), events, closed_tx);
    registry.on_accepted(session.clone()).await;
    (client, session)
}

fn quick_config() -> NetConfig {
    let mut cfg = NetConfig::default();
    cfg.session.peer_disconnect_timeout_ms = 300;
    cfg
}

#[tokio::test]
async fn test_acceptance_order_is_preserved() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let cfg = quick_config();
    let (tx, mut server_events) = event_channel();
    let registry = ConnectionRegistry::new(&cfg.encoding, tx.clone());
    let (closed_tx, _closed_rx) = mpsc::unbounded_channel();

    let mut sessions = Vec::new();
    for _ in 0..3 {
        let (_client, session) =
            join_peer(&listener, &registry, &cfg, tx.clone(), closed_tx.clone()).await;
        sessions.push(session);
    }

    let expected: Vec<String> = sessions.iter().map(|s| s.identity().to_owned()).collect();
    assert_eq!(registry.peers().await, expected);
    assert_eq!(registry.peer_count().await, 3);

    // PeerConnected events arrive in acceptance order too
    for identity in &expected {
        match next_event(&mut server_events, EVENT_TIMEOUT).await {
            Event::PeerConnected { peer } => assert_eq!(&peer, identity),
            other => panic!("expected PeerConnected, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_removal_is_idempotent() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let cfg = quick_config();
    let (tx, mut server_events) = event_channel();
    let registry = ConnectionRegistry::new(&cfg.encoding, tx.clone());
    let (closed_tx, _closed_rx) = mpsc::unbounded_channel();

    let (_client, session) =
        join_peer(&listener, &registry, &cfg, tx.clone(), closed_tx.clone()).await;
    let _ = next_event(&mut server_events, EVENT_TIMEOUT).await; // PeerConnected

    registry.on_peer_disconnected(session.id()).await;
    match next_event(&mut server_events, EVENT_TIMEOUT).await {
        Event::PeerDisconnected { peer } => assert_eq!(peer, session.identity()),
        other => panic!("expected PeerDisconnected, got {other:?}"),
    }
    assert!(registry.is_empty().await);

    // Second removal of the same id: silent no-op
    registry.on_peer_disconnected(session.id()).await;
    assert_quiet(&mut server_events, QUIET_WINDOW).await;
}

#[tokio::test]
async fn test_broadcast_skips_closed_peer_without_error() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let cfg = quick_config();
    let (tx, mut server_events) = event_channel();
    let registry = ConnectionRegistry::new(&cfg.encoding, tx.clone());
    let (closed_tx, _closed_rx) = mpsc::unbounded_channel();

    let (mut alice, _) = join_peer(&listener, &registry, &cfg, tx.clone(), closed_tx.clone()).await;
    let (mut bob, _) = join_peer(&listener, &registry, &cfg, tx.clone(), closed_tx.clone()).await;
    let (mut carol, carol_session) =
        join_peer(&listener, &registry, &cfg, tx.clone(), closed_tx.clone()).await;
    for _ in 0..3 {
        let _ = next_event(&mut server_events, EVENT_TIMEOUT).await; // PeerConnected
    }

    // Close carol's transport but leave her in the live set: the closed
    // channel is deliberately not drained here
    carol_session.disconnect().await;
    match next_event(&mut carol.events, EVENT_TIMEOUT).await {
        Event::Disconnected => {}
        other => panic!("expected Disconnected, got {other:?}"),
    }
    assert_eq!(registry.peer_count().await, 3);

    registry.broadcast(&Message::text("to whoever is left")).await;

    for events in [&mut alice.events, &mut bob.events] {
        match next_event(events, EVENT_TIMEOUT).await {
            Event::TextReceived { text, .. } => assert_eq!(text, "to whoever is left"),
            other => panic!("expected TextReceived, got {other:?}"),
        }
    }
    assert_quiet(&mut carol.events, QUIET_WINDOW).await;
    // Skipping the closed peer is not an error
    assert_quiet(&mut server_events, QUIET_WINDOW).await;
}

#[tokio::test]
async fn test_send_to_targets_first_identity_match() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let cfg = quick_config();
    let (tx, mut server_events) = event_channel();
    let registry = ConnectionRegistry::new(&cfg.encoding, tx.clone());
    let (closed_tx, _closed_rx) = mpsc::unbounded_channel();

    let (mut alice, _) = join_peer(&listener, &registry, &cfg, tx.clone(), closed_tx.clone()).await;
    let (mut bob, bob_session) =
        join_peer(&listener, &registry, &cfg, tx.clone(), closed_tx.clone()).await;
    for _ in 0..2 {
        let _ = next_event(&mut server_events, EVENT_TIMEOUT).await;
    }

    registry
        .send_to(bob_session.identity(), &Message::text("just for bob"))
        .await;

    match next_event(&mut bob.events, EVENT_TIMEOUT).await {
        Event::TextReceived { text, .. } => assert_eq!(text, "just for bob"),
        other => panic!("expected TextReceived, got {other:?}"),
    }
    assert_quiet(&mut alice.events, QUIET_WINDOW).await;
}

#[tokio::test]
async fn test_shutdown_disconnects_every_peer_in_parallel() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let cfg = quick_config();
    let (tx, _server_events) = event_channel();
    let registry = ConnectionRegistry::new(&cfg.encoding, tx.clone());
    let (closed_tx, _closed_rx) = mpsc::unbounded_channel();

    let mut clients = Vec::new();
    for _ in 0..3 {
        let (client, _) =
            join_peer(&listener, &registry, &cfg, tx.clone(), closed_tx.clone()).await;
        clients.push(client);
    }

    let started = Instant::now();
    registry.shutdown().await;
    // Bounded by one per-peer timeout, not one per peer in sequence
    assert!(started.elapsed() < Duration::from_millis(900));
    assert!(registry.is_empty().await);

    for client in &mut clients {
        match next_event(&mut client.events, EVENT_TIMEOUT).await {
            Event::Disconnected => {}
            other => panic!("expected Disconnected, got {other:?}"),
        }
    }
}
