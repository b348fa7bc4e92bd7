//! Integration tests for the hosted store over real WebSockets.
//!
//! These start a real server and connect real clients, verifying the
//! full read/write/subscribe pipeline and sessions syncing through it.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use shareroom::{
    ChannelEvent, ParticipantId, RemoteChannel, RoomId, RoomSession, ServerConfig, SessionConfig,
    SessionEvent, StoreServer, WsChannel,
};
use tokio::time::timeout;

/// Start a server on an ephemeral port, return its URL.
async fn start_test_server() -> String {
    let server = StoreServer::new(ServerConfig {
        bind_addr: "127.0.0.1:0".to_string(),
    });
    let (listener, addr) = server.bind().await.unwrap();
    tokio::spawn(async move {
        server.serve(listener).await.unwrap();
    });
    format!("ws://{addr}")
}

async fn wait_for_event<F>(session: &mut RoomSession, mut matches: F) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    timeout(Duration::from_secs(5), async {
        loop {
            let event = session.next_event().await.expect("event loop ended");
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for session event")
}

#[tokio::test]
async fn test_read_write_remove_roundtrip() {
    let url = start_test_server().await;
    let channel = WsChannel::connect(&url).await.unwrap();

    assert_eq!(channel.read("rooms/a/content").await.unwrap(), None);

    channel
        .write("rooms/a/content", json!({ "content": "hello" }))
        .await
        .unwrap();
    assert_eq!(
        channel.read("rooms/a/content").await.unwrap(),
        Some(json!({ "content": "hello" }))
    );

    channel.remove("rooms/a/content").await.unwrap();
    assert_eq!(channel.read("rooms/a/content").await.unwrap(), None);
}

#[tokio::test]
async fn test_subscription_sees_other_clients_writes() {
    let url = start_test_server().await;
    let watcher = WsChannel::connect(&url).await.unwrap();
    let writer = WsChannel::connect(&url).await.unwrap();

    let mut sub = watcher.subscribe("rooms/a/content").await.unwrap();

    writer
        .write("rooms/a/content", json!("from the other client"))
        .await
        .unwrap();

    let event = timeout(Duration::from_secs(2), sub.recv())
        .await
        .unwrap()
        .unwrap();
    match event {
        ChannelEvent::Changed(v) => assert_eq!(v, json!("from the other client")),
        other => panic!("expected Changed, got {other:?}"),
    }

    writer.remove("rooms/a/content").await.unwrap();
    let event = timeout(Duration::from_secs(2), sub.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, ChannelEvent::Removed));
}

#[tokio::test]
async fn test_subscription_echoes_own_writes() {
    let url = start_test_server().await;
    let channel = WsChannel::connect(&url).await.unwrap();

    let mut sub = channel.subscribe("rooms/a/content").await.unwrap();
    channel.write("rooms/a/content", json!("mine")).await.unwrap();

    let event = timeout(Duration::from_secs(2), sub.recv())
        .await
        .unwrap()
        .unwrap();
    match event {
        ChannelEvent::Changed(v) => assert_eq!(v, json!("mine")),
        other => panic!("expected Changed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unsubscribe_on_drop() {
    let url = start_test_server().await;
    let channel = WsChannel::connect(&url).await.unwrap();

    {
        let _sub = channel.subscribe("rooms/a/content").await.unwrap();
    }
    // After the handle is gone, writes must not error out against the
    // dropped subscription.
    channel.write("rooms/a/content", json!("x")).await.unwrap();
    assert_eq!(
        channel.read("rooms/a/content").await.unwrap(),
        Some(json!("x"))
    );
}

#[tokio::test]
async fn test_two_sessions_sync_through_store() {
    let url = start_test_server().await;
    let room = RoomId::parse("shareroom").unwrap();

    let alice_channel = WsChannel::connect(&url).await.unwrap();
    let alice = RoomSession::attach(
        Arc::new(alice_channel),
        room.clone(),
        ParticipantId::parse("Alice").unwrap(),
        SessionConfig::default(),
    )
    .await
    .unwrap();

    let bob_channel = WsChannel::connect(&url).await.unwrap();
    let mut bob = RoomSession::attach(
        Arc::new(bob_channel),
        room,
        ParticipantId::parse("Bob").unwrap(),
        SessionConfig::default(),
    )
    .await
    .unwrap();

    alice.local_change("hello from alice").await.unwrap();
    alice.save_now().await.unwrap();

    let event = wait_for_event(&mut bob, |e| {
        matches!(e, SessionEvent::RemoteApplied { .. })
    })
    .await;
    assert_eq!(
        event,
        SessionEvent::RemoteApplied {
            content: "hello from alice".to_string()
        }
    );
    assert_eq!(bob.content().await.unwrap(), "hello from alice");

    alice.detach().await.unwrap();
    bob.detach().await.unwrap();
}

#[tokio::test]
async fn test_presence_visible_across_clients() {
    let url = start_test_server().await;
    let room = RoomId::parse("shareroom").unwrap();

    let alice = RoomSession::attach(
        Arc::new(WsChannel::connect(&url).await.unwrap()),
        room.clone(),
        ParticipantId::parse("Alice").unwrap(),
        SessionConfig::default(),
    )
    .await
    .unwrap();

    let bob = RoomSession::attach(
        Arc::new(WsChannel::connect(&url).await.unwrap()),
        room,
        ParticipantId::parse("Bob").unwrap(),
        SessionConfig::default(),
    )
    .await
    .unwrap();

    let mut members = alice.members();
    timeout(Duration::from_secs(5), async {
        loop {
            let names: Vec<String> = members
                .borrow_and_update()
                .iter()
                .map(|m| m.to_string())
                .collect();
            if names == ["Alice", "Bob"] {
                break;
            }
            members.changed().await.unwrap();
        }
    })
    .await
    .expect("both participants should become visible");

    bob.detach().await.unwrap();

    timeout(Duration::from_secs(5), async {
        loop {
            let names: Vec<String> = members
                .borrow_and_update()
                .iter()
                .map(|m| m.to_string())
                .collect();
            if names == ["Alice"] {
                break;
            }
            members.changed().await.unwrap();
        }
    })
    .await
    .expect("departed participant should disappear");

    alice.detach().await.unwrap();
}

#[tokio::test]
async fn test_connect_to_dead_server_fails() {
    // Bind a port and drop the listener so nothing is serving it.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = WsChannel::connect(&format!("ws://{addr}")).await;
    assert!(result.is_err());
}
