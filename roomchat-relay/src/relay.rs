//! Relay server core: shared state, WebSocket handler, and HTTP routes.
//!
//! Each WebSocket connection gets a [`ConnectionId`] and an outbound channel
//! drained by a dedicated writer task. Incoming frames are decoded into
//! [`ClientEvent`]s and applied to the [`RoomRegistry`]; the resulting
//! events are pushed onto recipients' channels before the registry lock is
//! released, so every member of a room sees that room's events in the same
//! order.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Json;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use roomchat_proto::codec;
use roomchat_proto::event::{ClientEvent, RoomStatus, ServerEvent};
use tokio::sync::mpsc;
use tower_http::services::ServeDir;

use crate::rooms::{ConnectionId, Delivery, RoomRegistry};

/// Default maximum accepted WebSocket message size in bytes (64 KB).
const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

type Outbound = mpsc::UnboundedSender<Message>;

/// Registry plus the outbound channel of every live connection.
///
/// Kept behind a single lock so that mutating a room and queueing the
/// resulting events happen as one step.
struct Relay {
    registry: RoomRegistry,
    connections: HashMap<ConnectionId, Outbound>,
}

impl Relay {
    fn dispatch(&self, deliveries: Vec<Delivery>) {
        for Delivery { to, event } in deliveries {
            self.push(to, &event);
        }
    }

    fn push(&self, to: ConnectionId, event: &ServerEvent) {
        let Some(sender) = self.connections.get(&to) else {
            return;
        };
        match codec::encode_server(event) {
            Ok(text) => {
                // A closed channel means the peer is going away; its reader
                // will run the leave.
                let _ = sender.send(Message::Text(text.into()));
            }
            Err(e) => {
                tracing::error!(connection_id = %to, event = event.name(), error = %e, "failed to encode event");
            }
        }
    }
}

/// Shared relay server state holding the room registry and live connections.
pub struct RelayState {
    inner: Mutex<Relay>,
    /// Maximum accepted WebSocket message size in bytes.
    max_message_size: usize,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Creates a relay state with an empty registry and default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DEFAULT_MAX_MESSAGE_SIZE, RoomRegistry::new())
    }

    /// Creates a relay state around a pre-built registry.
    #[must_use]
    pub fn with_config(max_message_size: usize, registry: RoomRegistry) -> Self {
        Self {
            inner: Mutex::new(Relay {
                registry,
                connections: HashMap::new(),
            }),
            max_message_size,
        }
    }

    /// Registers the outbound channel of a newly upgraded connection.
    pub fn register(&self, conn: ConnectionId, sender: Outbound) {
        self.inner.lock().connections.insert(conn, sender);
    }

    /// Handles a `join-room` request from `conn`.
    ///
    /// On success the joiner gets `room-joined` and the other members get
    /// `user-joined`. On failure only the joiner hears about it.
    pub fn join(&self, conn: ConnectionId, username: &str, room_code: Option<&str>) {
        let mut relay = self.inner.lock();
        match relay.registry.join(conn, username, room_code) {
            Ok(outcome) => {
                if outcome.created {
                    tracing::info!(room_code = %outcome.room_code, "room created");
                }
                tracing::info!(
                    connection_id = %conn,
                    username = %username,
                    room_code = %outcome.room_code,
                    members = outcome.users.len(),
                    "user joined room"
                );
                relay.push(conn, &outcome.reply());
                relay.dispatch(outcome.deliveries);
            }
            Err(e) => {
                tracing::info!(connection_id = %conn, error = %e, "join rejected");
                relay.push(conn, &ServerEvent::error(e));
            }
        }
    }

    /// Handles a `send-message` request from `conn`.
    pub fn send(&self, conn: ConnectionId, text: &str) {
        let mut relay = self.inner.lock();
        let deliveries = relay.registry.send(conn, text, chrono::Utc::now());
        if deliveries.is_empty() {
            tracing::debug!(connection_id = %conn, "dropping message from unbound connection");
            return;
        }
        tracing::debug!(
            connection_id = %conn,
            recipients = deliveries.len(),
            len = text.len(),
            "relaying message"
        );
        relay.dispatch(deliveries);
    }

    /// Pushes a single event to `conn`.
    pub fn reply(&self, conn: ConnectionId, event: &ServerEvent) {
        self.inner.lock().push(conn, event);
    }

    /// Drops the outbound channel of `conn` and releases its room binding.
    ///
    /// Safe to call more than once.
    pub fn disconnect(&self, conn: ConnectionId) {
        let mut relay = self.inner.lock();
        relay.connections.remove(&conn);
        if let Some(left) = relay.registry.leave(conn) {
            tracing::info!(
                connection_id = %conn,
                username = %left.username,
                room_code = %left.room_code,
                "user left room"
            );
            if left.room_deleted {
                tracing::info!(room_code = %left.room_code, "room empty, deleted");
            }
            relay.dispatch(left.deliveries);
        }
    }

    /// Returns `true` if a live room exists under `code`.
    #[must_use]
    pub fn room_exists(&self, code: &str) -> bool {
        self.inner.lock().registry.exists(code)
    }

    /// Number of live rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.inner.lock().registry.room_count()
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.inner.lock().connections.len()
    }

    /// Send a WebSocket Close frame to all connected clients.
    ///
    /// Each writer task forwards the frame and the client side closes the
    /// socket, which ends the reader and runs the normal leave path.
    pub fn close_all_connections(&self) {
        let relay = self.inner.lock();
        for (conn, sender) in &relay.connections {
            tracing::info!(connection_id = %conn, "sending close frame");
            let _ = sender.send(Message::Close(None));
        }
    }
}

/// Handles an upgraded WebSocket connection.
///
/// The connection lifecycle:
/// 1. Allocate a [`ConnectionId`] and register its outbound channel.
/// 2. Spawn a writer task draining the channel into the socket.
/// 3. Read frames, applying each decoded event to the registry in order.
/// 4. On close or error, release the binding and notify the room.
pub async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let conn = ConnectionId::new();
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    state.register(conn, tx);
    tracing::info!(connection_id = %conn, "connection opened");

    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(connection_id = %conn, "WebSocket write failed");
                break;
            }
        }
    });

    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_text_message(conn, text.as_str(), &reader_state);
                }
                Message::Binary(data) => {
                    tracing::warn!(connection_id = %conn, len = data.len(), "binary frame rejected");
                    reader_state.reply(conn, &ServerEvent::error("binary frames are not supported"));
                }
                Message::Close(_) => {
                    tracing::info!(connection_id = %conn, "received close frame");
                    break;
                }
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    state.disconnect(conn);
    tracing::info!(connection_id = %conn, "connection closed");
}

/// Decodes one text frame and applies it.
fn handle_text_message(conn: ConnectionId, text: &str, state: &RelayState) {
    let event = match codec::decode_client(text) {
        Ok(ev) => ev,
        Err(e) => {
            tracing::warn!(connection_id = %conn, error = %e, "failed to decode event");
            state.reply(conn, &ServerEvent::error(format!("invalid event: {e}")));
            return;
        }
    };

    match event {
        ClientEvent::JoinRoom {
            username,
            room_code,
        } => state.join(conn, &username, room_code.as_deref()),
        ClientEvent::SendMessage { message } => state.send(conn, &message),
    }
}

/// Builds the axum router: `/ws`, `/api/room/{code}`, and an optional
/// static file fallback.
pub fn router(state: Arc<RelayState>, static_dir: Option<PathBuf>) -> axum::Router {
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .route("/api/room/{code}", axum::routing::get(room_status));

    let app = match static_dir {
        Some(dir) => app.fallback_service(ServeDir::new(dir)),
        None => app,
    };

    app.with_state(state)
}

/// Starts the relay server on the given address and returns the bound address
/// and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(
        addr,
        Arc::new(RelayState::new()),
        None,
        std::future::pending::<()>(),
    )
    .await
}

/// Starts the relay server with a pre-configured [`RelayState`].
///
/// The server stops accepting connections once `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
    static_dir: Option<PathBuf>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = router(state, static_dir);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            tracing::error!(error = %e, "relay server error");
        }
    });

    Ok((bound_addr, handle))
}

/// Starts the relay server in-process for testing.
///
/// Binds to `127.0.0.1:0` (OS-assigned port) and returns the bound address,
/// the shared state, and a join handle.
#[cfg(test)]
pub async fn start_test_server() -> (
    std::net::SocketAddr,
    Arc<RelayState>,
    tokio::task::JoinHandle<()>,
) {
    let state = Arc::new(RelayState::new());
    let (addr, handle) = start_server_with_state(
        "127.0.0.1:0",
        Arc::clone(&state),
        None,
        std::future::pending::<()>(),
    )
    .await
    .expect("failed to start test server");
    (addr, state, handle)
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<RelayState>>,
) -> impl axum::response::IntoResponse {
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

/// `GET /api/room/{code}`: reports whether a live room has this code.
async fn room_status(
    Path(code): Path<String>,
    State(state): State<Arc<RelayState>>,
) -> Json<RoomStatus> {
    Json(RoomStatus {
        exists: state.room_exists(&code),
    })
}
