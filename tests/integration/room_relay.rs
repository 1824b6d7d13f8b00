//! Integration tests for the room relay.
//!
//! Drives a live relay over WebSocket and plain HTTP: room creation and
//! joining, message fan-out and ordering, departure notices, room deletion,
//! and the room status endpoint.
//!
//! Verification command: `cargo test --test room_relay`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_tungstenite::tungstenite;

use roomchat_proto::code;
use roomchat_proto::codec;
use roomchat_proto::event::{ClientEvent, RoomStatus, ServerEvent};
use roomchat_relay::relay::{RelayState, start_server, start_server_with_state};
use roomchat_relay::rooms::RoomRegistry;

// =============================================================================
// Type aliases and helpers
// =============================================================================

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Starts a relay whose registry hands out the given codes in order.
async fn start_relay_with_codes(
    codes: &[&str],
) -> (std::net::SocketAddr, Arc<RelayState>, tokio::task::JoinHandle<()>) {
    start_relay_with_limit(64 * 1024, codes).await
}

/// Like [`start_relay_with_codes`], with a custom inbound frame limit.
async fn start_relay_with_limit(
    max_message_size: usize,
    codes: &[&str],
) -> (std::net::SocketAddr, Arc<RelayState>, tokio::task::JoinHandle<()>) {
    let mut codes: std::collections::VecDeque<String> =
        codes.iter().map(ToString::to_string).collect();
    let registry = RoomRegistry::with_code_generator(move || {
        codes.pop_front().unwrap_or_else(code::generate)
    });
    let state = Arc::new(RelayState::with_config(max_message_size, registry));
    let (addr, handle) = start_server_with_state(
        "127.0.0.1:0",
        Arc::clone(&state),
        None,
        std::future::pending::<()>(),
    )
    .await
    .expect("failed to start test relay");
    (addr, state, handle)
}

async fn connect(addr: std::net::SocketAddr) -> WsStream {
    let url = format!("ws://{addr}/ws");
    let (ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    ws
}

async fn send_event(ws: &mut WsStream, event: &ClientEvent) {
    let text = codec::encode(event).unwrap();
    ws.send(tungstenite::Message::Text(text.into())).await.unwrap();
}

async fn recv_event(ws: &mut WsStream) -> ServerEvent {
    let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("recv timed out")
        .unwrap()
        .unwrap();
    codec::decode(msg.to_text().unwrap()).unwrap()
}

async fn join(ws: &mut WsStream, username: &str, room_code: Option<&str>) -> ServerEvent {
    send_event(
        ws,
        &ClientEvent::JoinRoom {
            username: username.to_string(),
            room_code: room_code.map(ToString::to_string),
        },
    )
    .await;
    recv_event(ws).await
}

async fn say(ws: &mut WsStream, text: &str) {
    send_event(
        ws,
        &ClientEvent::SendMessage {
            message: text.to_string(),
        },
    )
    .await;
}

/// Minimal HTTP/1.1 GET returning (status line, body).
async fn http_get(addr: std::net::SocketAddr, path: &str) -> (String, String) {
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut raw = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut raw))
        .await
        .expect("http read timed out")
        .unwrap();
    let raw = String::from_utf8(raw).unwrap();
    let (head, body) = raw.split_once("\r\n\r\n").unwrap();
    let status = head.lines().next().unwrap_or_default().to_string();
    (status, body.to_string())
}

async fn room_exists(addr: std::net::SocketAddr, code: &str) -> bool {
    let (status, body) = http_get(addr, &format!("/api/room/{code}")).await;
    assert!(status.contains("200"), "unexpected status: {status}");
    let parsed: RoomStatus = serde_json::from_str(&body).unwrap();
    parsed.exists
}

/// Polls the status endpoint until it reports `expected` or gives up.
async fn wait_for_exists(addr: std::net::SocketAddr, code: &str, expected: bool) -> bool {
    for _ in 0..50 {
        if room_exists(addr, code).await == expected {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

fn users(list: &[&str]) -> Vec<String> {
    list.iter().map(ToString::to_string).collect()
}

// =============================================================================
// Full scenario
// =============================================================================

/// Alice creates a room, Bob joins by code, they chat, Bob leaves (room
/// survives), Alice leaves (room is gone).
#[tokio::test]
async fn alice_and_bob_scenario() {
    let (addr, _state, _handle) = start_relay_with_codes(&["ABC123"]).await;

    let mut alice = connect(addr).await;
    let joined = join(&mut alice, "Alice", None).await;
    assert_eq!(
        joined,
        ServerEvent::RoomJoined {
            room_code: "ABC123".to_string(),
            users: users(&["Alice"]),
            messages: Vec::new(),
        }
    );
    assert!(room_exists(addr, "ABC123").await);

    let mut bob = connect(addr).await;
    let joined = join(&mut bob, "Bob", Some("ABC123")).await;
    assert_eq!(
        joined,
        ServerEvent::RoomJoined {
            room_code: "ABC123".to_string(),
            users: users(&["Alice", "Bob"]),
            messages: Vec::new(),
        }
    );
    assert_eq!(
        recv_event(&mut alice).await,
        ServerEvent::UserJoined {
            username: "Bob".to_string(),
            users: users(&["Alice", "Bob"]),
        }
    );

    say(&mut alice, "hi").await;
    for ws in [&mut alice, &mut bob] {
        match recv_event(ws).await {
            ServerEvent::NewMessage(msg) => {
                assert_eq!(msg.username, "Alice");
                assert_eq!(msg.message, "hi");
            }
            other => panic!("expected NewMessage, got {other:?}"),
        }
    }

    bob.close(None).await.unwrap();
    assert_eq!(
        recv_event(&mut alice).await,
        ServerEvent::UserLeft {
            username: "Bob".to_string(),
            users: users(&["Alice"]),
        }
    );
    assert!(room_exists(addr, "ABC123").await);

    alice.close(None).await.unwrap();
    assert!(wait_for_exists(addr, "ABC123", false).await);
}

// =============================================================================
// Join validation
// =============================================================================

#[tokio::test]
async fn join_unknown_room_fails() {
    let (addr, state, _handle) = start_relay_with_codes(&[]).await;
    let mut ws = connect(addr).await;

    let reply = join(&mut ws, "Bob", Some("ZZZZZZ")).await;
    assert_eq!(
        reply,
        ServerEvent::Error {
            reason: "Room does not exist!".to_string()
        }
    );
    assert_eq!(state.room_count(), 0);
    assert!(!room_exists(addr, "ZZZZZZ").await);
}

#[tokio::test]
async fn join_blank_username_fails() {
    let (addr, state, _handle) = start_relay_with_codes(&[]).await;
    let mut ws = connect(addr).await;

    let reply = join(&mut ws, "   ", None).await;
    assert_eq!(
        reply,
        ServerEvent::Error {
            reason: "Username is required!".to_string()
        }
    );
    assert_eq!(state.room_count(), 0);
}

#[tokio::test]
async fn failed_join_leaves_connection_usable() {
    let (addr, _state, _handle) = start_relay_with_codes(&["FACE01"]).await;
    let mut ws = connect(addr).await;

    assert!(matches!(
        join(&mut ws, "", None).await,
        ServerEvent::Error { .. }
    ));
    match join(&mut ws, "Carol", None).await {
        ServerEvent::RoomJoined { room_code, .. } => assert_eq!(room_code, "FACE01"),
        other => panic!("expected RoomJoined, got {other:?}"),
    }
}

#[tokio::test]
async fn generated_codes_are_distinct() {
    let (addr, _handle) = start_server("127.0.0.1:0").await.unwrap();

    let mut seen = std::collections::HashSet::new();
    let mut sockets = Vec::new();
    for i in 0..10 {
        let mut ws = connect(addr).await;
        match join(&mut ws, &format!("user-{i}"), None).await {
            ServerEvent::RoomJoined { room_code, .. } => {
                assert!(code::is_well_formed(&room_code), "bad code {room_code}");
                assert!(seen.insert(room_code), "duplicate live room code");
            }
            other => panic!("expected RoomJoined, got {other:?}"),
        }
        sockets.push(ws);
    }
}

// =============================================================================
// Messaging
// =============================================================================

#[tokio::test]
async fn send_before_join_is_dropped() {
    let (addr, _state, _handle) = start_relay_with_codes(&["BEEF00"]).await;
    let mut ws = connect(addr).await;

    say(&mut ws, "nobody hears this").await;
    let reply = join(&mut ws, "Dave", None).await;
    match reply {
        ServerEvent::RoomJoined { messages, .. } => assert!(messages.is_empty()),
        other => panic!("expected RoomJoined, got {other:?}"),
    }
}

#[tokio::test]
async fn messages_arrive_in_send_order_for_every_member() {
    let (addr, _state, _handle) = start_relay_with_codes(&["ORDER1"]).await;
    let mut alice = connect(addr).await;
    let mut bob = connect(addr).await;
    join(&mut alice, "Alice", None).await;
    join(&mut bob, "Bob", Some("ORDER1")).await;
    let _bob_joined = recv_event(&mut alice).await;

    for i in 0..20 {
        say(&mut alice, &format!("m{i}")).await;
    }

    for ws in [&mut alice, &mut bob] {
        for i in 0..20 {
            match recv_event(ws).await {
                ServerEvent::NewMessage(msg) => assert_eq!(msg.message, format!("m{i}")),
                other => panic!("expected NewMessage, got {other:?}"),
            }
        }
    }
}

#[tokio::test]
async fn late_joiner_receives_history() {
    let (addr, _state, _handle) = start_relay_with_codes(&["HIST01"]).await;
    let mut alice = connect(addr).await;
    join(&mut alice, "Alice", None).await;
    say(&mut alice, "first").await;
    say(&mut alice, "second").await;
    let _ = recv_event(&mut alice).await;
    let _ = recv_event(&mut alice).await;

    let mut bob = connect(addr).await;
    match join(&mut bob, "Bob", Some("HIST01")).await {
        ServerEvent::RoomJoined { messages, .. } => {
            let texts: Vec<&str> = messages.iter().map(|m| m.message.as_str()).collect();
            assert_eq!(texts, vec!["first", "second"]);
            assert!(messages.iter().all(|m| m.username == "Alice"));
        }
        other => panic!("expected RoomJoined, got {other:?}"),
    }
}

#[tokio::test]
async fn rooms_are_isolated() {
    let (addr, _state, _handle) = start_relay_with_codes(&["ROOMA1", "ROOMB2"]).await;
    let mut alice = connect(addr).await;
    let mut bob = connect(addr).await;
    join(&mut alice, "Alice", None).await;
    join(&mut bob, "Bob", None).await;

    say(&mut alice, "only for room A").await;
    let _ = recv_event(&mut alice).await;
    say(&mut bob, "only for room B").await;

    match recv_event(&mut bob).await {
        ServerEvent::NewMessage(msg) => assert_eq!(msg.message, "only for room B"),
        other => panic!("expected NewMessage, got {other:?}"),
    }
}

// =============================================================================
// HTTP surface
// =============================================================================

#[tokio::test]
async fn status_endpoint_unknown_room() {
    let (addr, _handle) = start_server("127.0.0.1:0").await.unwrap();
    let (status, body) = http_get(addr, "/api/room/NOPE00").await;
    assert!(status.contains("200"), "unexpected status: {status}");
    assert_eq!(body, r#"{"exists":false}"#);
}

#[tokio::test]
async fn static_dir_served_as_fallback() {
    let dir: PathBuf =
        std::env::temp_dir().join(format!("roomchat-static-{}", uuid::Uuid::now_v7()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("index.html"), "<h1>room chat</h1>").unwrap();

    let state = Arc::new(RelayState::new());
    let (addr, _handle) = start_server_with_state(
        "127.0.0.1:0",
        state,
        Some(dir.clone()),
        std::future::pending::<()>(),
    )
    .await
    .unwrap();

    let (status, body) = http_get(addr, "/index.html").await;
    assert!(status.contains("200"), "unexpected status: {status}");
    assert_eq!(body, "<h1>room chat</h1>");

    // API routes still win over the fallback.
    let (_, body) = http_get(addr, "/api/room/ABCDEF").await;
    assert_eq!(body, r#"{"exists":false}"#);

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn graceful_shutdown_stops_server() {
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let state = Arc::new(RelayState::new());
    let (_addr, handle) = start_server_with_state("127.0.0.1:0", state, None, async move {
        let _ = rx.await;
    })
    .await
    .unwrap();

    tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("server did not stop")
        .unwrap();
}

// =============================================================================
// Re-join and frame limits
// =============================================================================

#[tokio::test]
async fn rename_in_room_hides_old_name() {
    let (addr, _state, _handle) = start_relay_with_codes(&["REN001"]).await;
    let mut alice = connect(addr).await;
    let mut bob = connect(addr).await;
    join(&mut alice, "Alice", None).await;
    join(&mut bob, "Bob", Some("REN001")).await;
    recv_event(&mut alice).await; // user-joined Bob

    let reply = join(&mut alice, "Alicia", Some("REN001")).await;
    assert_eq!(
        reply,
        ServerEvent::RoomJoined {
            room_code: "REN001".to_string(),
            users: users(&["Bob", "Alicia"]),
            messages: Vec::new(),
        }
    );
    assert_eq!(
        recv_event(&mut bob).await,
        ServerEvent::UserLeft {
            username: "Alice".to_string(),
            users: users(&["Bob"]),
        }
    );
    assert_eq!(
        recv_event(&mut bob).await,
        ServerEvent::UserJoined {
            username: "Alicia".to_string(),
            users: users(&["Bob", "Alicia"]),
        }
    );

    // Nothing about the old name is queued for the renamed connection.
    say(&mut alice, "hi").await;
    match recv_event(&mut alice).await {
        ServerEvent::NewMessage(msg) => assert_eq!(msg.username, "Alicia"),
        other => panic!("expected new-message, got {other:?}"),
    }
}

#[tokio::test]
async fn oversized_frame_closes_socket_and_frees_room() {
    let (addr, state, _handle) = start_relay_with_limit(1024, &["BIG001"]).await;
    let mut alice = connect(addr).await;
    join(&mut alice, "Alice", None).await;
    assert_eq!(state.room_count(), 1);

    say(&mut alice, &"x".repeat(4096)).await;

    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match alice.next().await {
                None | Some(Err(_) | Ok(tungstenite::Message::Close(_))) => break,
                Some(Ok(other)) => panic!("unexpected frame after oversized send: {other:?}"),
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "socket stayed open after oversized frame");
    assert!(wait_for_exists(addr, "BIG001", false).await);
    assert_eq!(state.room_count(), 0);
}
