//! Room registry for the relay server.
//!
//! Owns every live room (member names plus message log) and the binding of
//! each live connection to its (display name, room code) pair. All
//! operations are synchronous and return the events the caller must push to
//! other connections; the registry itself never touches a socket.
//!
//! Room entries are ephemeral: a room is deleted as soon as its last member
//! leaves, and nothing survives a relay restart.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use roomchat_proto::code;
use roomchat_proto::event::ServerEvent;
use roomchat_proto::message::ChatMessage;
use uuid::Uuid;

/// Number of fresh codes drawn before a room creation gives up.
const MAX_CODE_ATTEMPTS: usize = 64;

/// Identifies one live WebSocket connection, assigned at upgrade time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Allocates a new time-ordered connection identifier (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors reported back to a connection whose join was rejected.
///
/// None of these mutate the registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    /// The display name was empty or whitespace only.
    #[error("Username is required!")]
    EmptyUsername,
    /// A room code was supplied but no live room has it.
    #[error("Room does not exist!")]
    RoomNotFound,
    /// No unused room code could be drawn.
    #[error("could not allocate a unique room code after {0} attempts")]
    CodeSpaceExhausted(usize),
}

/// An event addressed to one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Recipient connection.
    pub to: ConnectionId,
    /// Event to push.
    pub event: ServerEvent,
}

/// Result of a successful [`RoomRegistry::join`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    /// Code of the room the connection is now bound to.
    pub room_code: String,
    /// Whether the room was created by this join.
    pub created: bool,
    /// Member list after the join, in join order.
    pub users: Vec<String>,
    /// Message history for client backfill.
    pub messages: Vec<ChatMessage>,
    /// Notifications for other connections.
    pub deliveries: Vec<Delivery>,
}

impl JoinOutcome {
    /// The `room-joined` reply for the joining connection.
    #[must_use]
    pub fn reply(&self) -> ServerEvent {
        ServerEvent::RoomJoined {
            room_code: self.room_code.clone(),
            users: self.users.clone(),
            messages: self.messages.clone(),
        }
    }
}

/// Result of removing a connection's binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveOutcome {
    /// Display name the connection was bound under.
    pub username: String,
    /// Room the connection was bound to.
    pub room_code: String,
    /// Whether the room became empty and was deleted.
    pub room_deleted: bool,
    /// `user-left` notifications for the remaining connections.
    pub deliveries: Vec<Delivery>,
}

/// A display name in a room, with the number of connections holding it.
#[derive(Debug)]
struct Member {
    name: String,
    holders: usize,
}

#[derive(Debug, Default)]
struct Room {
    members: Vec<Member>,
    connections: Vec<ConnectionId>,
    messages: Vec<ChatMessage>,
}

impl Room {
    fn users(&self) -> Vec<String> {
        self.members.iter().map(|m| m.name.clone()).collect()
    }

    fn add(&mut self, conn: ConnectionId, name: &str) {
        if let Some(member) = self.members.iter_mut().find(|m| m.name == name) {
            member.holders += 1;
        } else {
            self.members.push(Member {
                name: name.to_string(),
                holders: 1,
            });
        }
        self.connections.push(conn);
    }

    fn remove(&mut self, conn: ConnectionId, name: &str) {
        if let Some(idx) = self.members.iter().position(|m| m.name == name) {
            self.members[idx].holders -= 1;
            if self.members[idx].holders == 0 {
                self.members.remove(idx);
            }
        }
        if let Some(idx) = self.connections.iter().position(|c| *c == conn) {
            self.connections.remove(idx);
        }
    }

    fn broadcast(&self, event: &ServerEvent, skip: Option<ConnectionId>) -> Vec<Delivery> {
        self.connections
            .iter()
            .filter(|c| Some(**c) != skip)
            .map(|c| Delivery {
                to: *c,
                event: event.clone(),
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
struct Binding {
    username: String,
    room_code: String,
}

/// In-memory directory of live rooms and connection bindings.
///
/// Not internally synchronized: the relay wraps it in a mutex so every
/// operation runs to completion before the next one starts.
pub struct RoomRegistry {
    rooms: HashMap<String, Room>,
    bindings: HashMap<ConnectionId, Binding>,
    generate_code: Box<dyn FnMut() -> String + Send>,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RoomRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomRegistry")
            .field("rooms", &self.rooms.len())
            .field("bindings", &self.bindings.len())
            .finish_non_exhaustive()
    }
}

impl RoomRegistry {
    /// Creates an empty registry drawing random six-character codes.
    #[must_use]
    pub fn new() -> Self {
        Self::with_code_generator(code::generate)
    }

    /// Creates an empty registry with a custom room code source.
    #[must_use]
    pub fn with_code_generator(generate_code: impl FnMut() -> String + Send + 'static) -> Self {
        Self {
            rooms: HashMap::new(),
            bindings: HashMap::new(),
            generate_code: Box::new(generate_code),
        }
    }

    /// Binds `conn` to a room under `username`.
    ///
    /// A blank or missing `room_code` creates a new room under a fresh code.
    /// A supplied code is looked up exactly as given.
    ///
    /// If `conn` was already bound, that binding is released first and its
    /// `user-left` notifications lead the returned deliveries. Re-joining
    /// the current room under another name keeps the room alive even when
    /// `conn` was its only member.
    ///
    /// # Errors
    ///
    /// Returns [`JoinError::EmptyUsername`] for a blank name,
    /// [`JoinError::RoomNotFound`] for an unknown code, or
    /// [`JoinError::CodeSpaceExhausted`] if no free code could be drawn.
    pub fn join(
        &mut self,
        conn: ConnectionId,
        username: &str,
        room_code: Option<&str>,
    ) -> Result<JoinOutcome, JoinError> {
        if username.trim().is_empty() {
            return Err(JoinError::EmptyUsername);
        }

        let requested = room_code.filter(|c| !c.trim().is_empty());
        let (target, created) = match requested {
            Some(code) if self.rooms.contains_key(code) => (code.to_string(), false),
            Some(_) => return Err(JoinError::RoomNotFound),
            None => (self.fresh_code()?, true),
        };

        if let Some(existing) = self.bindings.get(&conn)
            && existing.room_code == target
            && existing.username == username
            && let Some(room) = self.rooms.get(&target)
        {
            return Ok(JoinOutcome {
                room_code: target,
                created: false,
                users: room.users(),
                messages: room.messages.clone(),
                deliveries: Vec::new(),
            });
        }

        let mut deliveries = Vec::new();
        if let Some(previous) = self.bindings.remove(&conn) {
            if previous.room_code == target {
                if let Some(room) = self.rooms.get_mut(&target) {
                    room.remove(conn, &previous.username);
                    let notice = ServerEvent::UserLeft {
                        username: previous.username,
                        users: room.users(),
                    };
                    deliveries = room.broadcast(&notice, Some(conn));
                }
            } else {
                deliveries = self.release(conn, previous).deliveries;
            }
        }

        let room = self.rooms.entry(target.clone()).or_default();
        room.add(conn, username);
        let users = room.users();
        let notice = ServerEvent::UserJoined {
            username: username.to_string(),
            users: users.clone(),
        };
        deliveries.extend(room.broadcast(&notice, Some(conn)));
        let messages = room.messages.clone();

        self.bindings.insert(
            conn,
            Binding {
                username: username.to_string(),
                room_code: target.clone(),
            },
        );

        Ok(JoinOutcome {
            room_code: target,
            created,
            users,
            messages,
            deliveries,
        })
    }

    /// Appends a message from `conn` to its room and fans it out to every
    /// connection in the room, the sender included.
    ///
    /// Returns no deliveries if `conn` is not bound; the message is dropped.
    pub fn send(&mut self, conn: ConnectionId, text: &str, now: DateTime<Utc>) -> Vec<Delivery> {
        let Some(binding) = self.bindings.get(&conn) else {
            return Vec::new();
        };
        let Some(room) = self.rooms.get_mut(&binding.room_code) else {
            return Vec::new();
        };

        let msg = ChatMessage::new(binding.username.clone(), text, now);
        room.messages.push(msg.clone());
        room.broadcast(&ServerEvent::NewMessage(msg), None)
    }

    /// Removes the binding of `conn`, deleting its room if it became empty.
    ///
    /// Returns `None` if `conn` had no binding.
    pub fn leave(&mut self, conn: ConnectionId) -> Option<LeaveOutcome> {
        let binding = self.bindings.remove(&conn)?;
        Some(self.release(conn, binding))
    }

    /// Returns `true` if a live room exists under `code`.
    #[must_use]
    pub fn exists(&self, code: &str) -> bool {
        self.rooms.contains_key(code)
    }

    /// Number of live rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Member list of a room, in join order.
    #[must_use]
    pub fn members(&self, code: &str) -> Option<Vec<String>> {
        self.rooms.get(code).map(Room::users)
    }

    /// Message log of a room, oldest first.
    #[must_use]
    pub fn history(&self, code: &str) -> Option<&[ChatMessage]> {
        self.rooms.get(code).map(|r| r.messages.as_slice())
    }

    /// The (display name, room code) `conn` is bound to, if any.
    #[must_use]
    pub fn binding(&self, conn: ConnectionId) -> Option<(&str, &str)> {
        self.bindings
            .get(&conn)
            .map(|b| (b.username.as_str(), b.room_code.as_str()))
    }

    fn release(&mut self, conn: ConnectionId, binding: Binding) -> LeaveOutcome {
        let Binding {
            username,
            room_code,
        } = binding;

        let mut deliveries = Vec::new();
        let mut room_deleted = false;
        if let Some(room) = self.rooms.get_mut(&room_code) {
            room.remove(conn, &username);
            if room.members.is_empty() {
                self.rooms.remove(&room_code);
                room_deleted = true;
            } else {
                let notice = ServerEvent::UserLeft {
                    username: username.clone(),
                    users: room.users(),
                };
                deliveries = room.broadcast(&notice, None);
            }
        }

        LeaveOutcome {
            username,
            room_code,
            room_deleted,
            deliveries,
        }
    }

    fn fresh_code(&mut self) -> Result<String, JoinError> {
        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = (self.generate_code)();
            if !code.is_empty() && !self.rooms.contains_key(&code) {
                return Ok(code);
            }
        }
        Err(JoinError::CodeSpaceExhausted(MAX_CODE_ATTEMPTS))
    }
}
