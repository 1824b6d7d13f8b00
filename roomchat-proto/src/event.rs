//! Event types exchanged over the relay WebSocket.
//!
//! Every frame is a JSON object with an `event` name and a `data` payload,
//! e.g. `{"event":"join-room","data":{"username":"Alice"}}`. Each event name
//! maps to exactly one enum variant, so a frame that decodes is already
//! structurally valid by the time it reaches the room registry.

use serde::{Deserialize, Serialize};

use crate::message::ChatMessage;

/// Events a client sends to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Join an existing room, or create a new one when no code is given.
    JoinRoom {
        /// Display name to join under. Must not be blank.
        username: String,
        /// Code of the room to join. `None` or blank creates a fresh room.
        #[serde(
            rename = "roomCode",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        room_code: Option<String>,
    },

    /// Post a message to the room this connection is bound to.
    SendMessage {
        /// Message text.
        message: String,
    },
}

/// Events the relay pushes to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Reply to a successful `join-room`, sent only to the joiner.
    RoomJoined {
        /// The room the connection is now bound to.
        #[serde(rename = "roomCode")]
        room_code: String,
        /// Current members, in join order.
        users: Vec<String>,
        /// Full message history for backfill.
        messages: Vec<ChatMessage>,
    },

    /// Another member joined the room.
    UserJoined {
        /// Display name of the new member.
        username: String,
        /// Updated member list.
        users: Vec<String>,
    },

    /// A member left the room.
    UserLeft {
        /// Display name of the departed member.
        username: String,
        /// Updated member list.
        users: Vec<String>,
    },

    /// A message was posted to the room (echoed to the sender too).
    NewMessage(ChatMessage),

    /// The request from this connection was rejected.
    Error {
        /// Human-readable reason.
        reason: String,
    },
}

impl ServerEvent {
    /// Builds an [`ServerEvent::Error`] from anything displayable.
    #[must_use]
    pub fn error(reason: impl std::fmt::Display) -> Self {
        Self::Error {
            reason: reason.to_string(),
        }
    }

    /// Returns the wire event name, for logging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::RoomJoined { .. } => "room-joined",
            Self::UserJoined { .. } => "user-joined",
            Self::UserLeft { .. } => "user-left",
            Self::NewMessage(_) => "new-message",
            Self::Error { .. } => "error",
        }
    }
}

/// Body of `GET /api/room/{code}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomStatus {
    /// Whether a live room exists under the requested code.
    pub exists: bool,
}
