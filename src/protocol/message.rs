//! Wire messages.
//!
//! Every frame is a flat JSON object with a `type` tag and an optional
//! `messageId`. Inbound frames decode into [`InboundEnvelope`] in one step, so
//! an unknown `type` or a missing required field is a single decode error.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ProtocolError;
use crate::state::game::{Clocks, Color, GameEvent, GameState, PlayerInfo};

/// Server -> client messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Full authoritative snapshot of one game.
    State(GameState),

    #[serde(rename_all = "camelCase")]
    Joined {
        game_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        color: Option<Color>,
    },

    #[serde(rename_all = "camelCase")]
    Authenticated {
        user_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
    },

    Queued {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<u32>,
    },

    #[serde(rename_all = "camelCase")]
    Matched {
        game_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        color: Option<Color>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        opponent: Option<PlayerInfo>,
    },

    #[serde(rename_all = "camelCase")]
    SoloGameCreated { game_id: String },

    #[serde(rename_all = "camelCase")]
    ClockUpdate { game_id: String, clocks: Clocks },

    #[serde(rename_all = "camelCase")]
    Timeout {
        game_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        player: Option<Color>,
    },

    #[serde(rename_all = "camelCase")]
    GameEvent { game_id: String, event: GameEvent },

    #[serde(rename_all = "camelCase")]
    GameEnded {
        game_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },

    QueueExpired {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    Pong,
}

impl ServerMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::State(_) => MessageKind::State,
            Self::Joined { .. } => MessageKind::Joined,
            Self::Authenticated { .. } => MessageKind::Authenticated,
            Self::Queued { .. } => MessageKind::Queued,
            Self::Matched { .. } => MessageKind::Matched,
            Self::SoloGameCreated { .. } => MessageKind::SoloGameCreated,
            Self::ClockUpdate { .. } => MessageKind::ClockUpdate,
            Self::Timeout { .. } => MessageKind::Timeout,
            Self::GameEvent { .. } => MessageKind::GameEvent,
            Self::GameEnded { .. } => MessageKind::GameEnded,
            Self::Error { .. } => MessageKind::Error,
            Self::QueueExpired { .. } => MessageKind::QueueExpired,
            Self::Pong => MessageKind::Pong,
        }
    }

    /// Game this message refers to, if any.
    pub fn game_id(&self) -> Option<&str> {
        match self {
            Self::State(state) => Some(&state.game_id),
            Self::Joined { game_id, .. }
            | Self::Matched { game_id, .. }
            | Self::SoloGameCreated { game_id }
            | Self::ClockUpdate { game_id, .. }
            | Self::Timeout { game_id, .. }
            | Self::GameEvent { game_id, .. }
            | Self::GameEnded { game_id, .. } => Some(game_id),
            _ => None,
        }
    }
}

/// Discriminant of [`ServerMessage`], used as a subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    State,
    Joined,
    Authenticated,
    Queued,
    Matched,
    SoloGameCreated,
    ClockUpdate,
    Timeout,
    GameEvent,
    GameEnded,
    Error,
    QueueExpired,
    Pong,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::State => "state",
            Self::Joined => "joined",
            Self::Authenticated => "authenticated",
            Self::Queued => "queued",
            Self::Matched => "matched",
            Self::SoloGameCreated => "solo-game-created",
            Self::ClockUpdate => "clock-update",
            Self::Timeout => "timeout",
            Self::GameEvent => "game-event",
            Self::GameEnded => "game-ended",
            Self::Error => "error",
            Self::QueueExpired => "queue-expired",
            Self::Pong => "pong",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subscription key: one message kind, or every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    All,
    Kind(MessageKind),
}

impl From<MessageKind> for Topic {
    fn from(kind: MessageKind) -> Self {
        Self::Kind(kind)
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEnvelope {
    #[serde(
        rename = "messageId",
        default,
        deserialize_with = "message_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub message_id: Option<String>,

    #[serde(flatten)]
    pub message: ServerMessage,
}

impl InboundEnvelope {
    pub fn new(message: ServerMessage) -> Self {
        Self {
            message_id: None,
            message,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }
}

/// Servers emit both string and numeric ids; normalize to a string.
fn message_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(u64),
    }

    Ok(Option::<RawId>::deserialize(deserializer)?.map(|id| match id {
        RawId::Text(s) => s,
        RawId::Number(n) => n.to_string(),
    }))
}

/// Client -> server messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    Authenticate {
        user_id: String,
        username: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    JoinGame { game_id: String },

    JoinQueue,

    LeaveQueue,

    CreateSoloGame,

    /// `action` is a BCN token.
    #[serde(rename_all = "camelCase")]
    Action { game_id: String, action: String },

    #[serde(rename_all = "camelCase")]
    GiveTime { game_id: String, seconds: u32 },

    Ping,
}

impl ClientMessage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authenticate { .. } => "authenticate",
            Self::JoinGame { .. } => "join-game",
            Self::JoinQueue => "join-queue",
            Self::LeaveQueue => "leave-queue",
            Self::CreateSoloGame => "create-solo-game",
            Self::Action { .. } => "action",
            Self::GiveTime { .. } => "give-time",
            Self::Ping => "ping",
        }
    }
}

/// Decode one inbound text frame.
pub fn decode_frame(text: &str) -> Result<InboundEnvelope, ProtocolError> {
    serde_json::from_str(text).map_err(ProtocolError::Decode)
}

/// Encode one outbound message as a text frame.
pub fn encode_message(message: &ClientMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(message).map_err(ProtocolError::Encode)
}
