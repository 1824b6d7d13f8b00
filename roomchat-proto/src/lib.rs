//! Shared protocol definitions for the `RoomChat` relay wire format.

pub mod code;
pub mod codec;
pub mod event;
pub mod message;
