//! `RoomChat` Relay Server library.
//!
//! Exposes the relay server for use in tests and embedding.
//! The relay accepts WebSocket connections, binds each one to a
//! (display name, room) pair, and fans chat events out to the room.

pub mod config;
pub mod relay;
pub mod rooms;
