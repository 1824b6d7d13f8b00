//! Chat message record as stored in a room's history and sent to clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single chat message appended to a room's log.
///
/// Messages are immutable once created. On the wire this is the body of a
/// `new-message` event and the element type of the `room-joined` history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Display name of the author at the time of sending.
    pub username: String,
    /// Message text, relayed verbatim.
    pub message: String,
    /// When the relay accepted the message (RFC 3339, UTC).
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// Creates a message authored by `username` at `timestamp`.
    #[must_use]
    pub fn new(
        username: impl Into<String>,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            username: username.into(),
            message: message.into(),
            timestamp,
        }
    }
}
