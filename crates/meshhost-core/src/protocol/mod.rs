//! Protocol Module
//!
//! - `wire`: bit-exact framing of game messages
//! - `message`: election and heartbeat messages carried in that framing

pub mod message;
pub mod wire;

pub use message::{CoordinationBody, CoordinationKind, CoordinationMessage, InboundMessage};
pub use wire::{GameMessage, MAX_FIELD_LEN, MAX_PAYLOAD_LEN};
