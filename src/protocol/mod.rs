//! Wire formats.
//!
//! - `action` - the compact BCN action token (`b:e2e4`, `m:e7e8q`)
//! - `message` - JSON frames exchanged with the game server

pub mod action;
pub mod message;

pub use action::{Action, ActionKind, Promotion, Square};
pub use message::{ClientMessage, InboundEnvelope, MessageKind, ServerMessage, Topic};
