//! Error types.
//!
//! Only two kinds of failure ever reach a caller: codec errors for bad action
//! tokens and locally rejected actions. Transport failures and malformed
//! inbound frames are absorbed by the connection manager and surfaced through
//! connection state and logs instead.

use thiserror::Error;

use crate::protocol::action::ActionKind;
use crate::state::role::Role;

/// Failure to encode or decode a BCN action token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("unknown action prefix in {0:?}")]
    UnknownPrefix(String),

    #[error("invalid square {0:?}")]
    InvalidSquare(String),

    #[error("invalid promotion piece {0:?}")]
    InvalidPromotion(char),

    #[error("malformed action token {0:?}")]
    Malformed(String),
}

/// Failure to decode or encode a wire frame.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to decode frame: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Failure reported by the host transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("failed to open transport: {0}")]
    Open(String),

    #[error("failed to write frame: {0}")]
    Send(String),
}

/// Reason an action was not handed to the connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendActionError {
    #[error("{action} not permitted in game {game_id} for {role}")]
    NotPermitted {
        game_id: String,
        action: ActionKind,
        role: Role,
    },

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Failure to load a [`SyncConfig`](crate::config::SyncConfig).
#[derive(Debug, Error)]
#[error("invalid sync config: {0}")]
pub struct ConfigError(#[from] serde_json::Error);
