//! Game state snapshots.
//!
//! A [`GameState`] is the server's authoritative view of one game. The client
//! never edits it locally except for the two narrow patches the server sends
//! separately: clock updates and game end.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::protocol::action::{self, Action};

/// Side of the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    #[default]
    White,
    Black,
}

impl Color {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::White => "white",
            Self::Black => "black",
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Self::White => Self::Black,
            Self::Black => Self::White,
        }
    }
}

/// Half of a full turn: the ban comes first, then the move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Ban,
    Move,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ban => "ban",
            Self::Move => "move",
        }
    }

    /// Phase of the next action when `ply` actions have been played.
    /// Actions alternate ban, move, ban, move, starting with a ban.
    pub fn from_ply(ply: u32) -> Self {
        if ply % 2 == 0 {
            Self::Ban
        } else {
            Self::Move
        }
    }
}

/// A seated player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<u32>,
}

impl PlayerInfo {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: None,
            rating: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Players {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub white: Option<PlayerInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub black: Option<PlayerInfo>,
}

impl Players {
    pub fn get(&self, color: Color) -> Option<&PlayerInfo> {
        match color {
            Color::White => self.white.as_ref(),
            Color::Black => self.black.as_ref(),
        }
    }

    /// Which side a user is seated on, if any.
    pub fn color_of(&self, user_id: &str) -> Option<Color> {
        [Color::White, Color::Black]
            .into_iter()
            .find(|c| self.get(*c).is_some_and(|p| p.id == user_id))
    }
}

/// Remaining time per side, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Clocks {
    pub white: u64,
    pub black: u64,
    /// Server timestamp (ms since epoch) the values were taken at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<i64>,
}

impl Clocks {
    pub fn remaining(&self, color: Color) -> u64 {
        match color {
            Color::White => self.white,
            Color::Black => self.black,
        }
    }
}

/// Initial time and increment, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeControl {
    pub initial: u64,
    pub increment: u64,
}

/// One ply of history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub ply: u32,
    /// BCN token of the action played.
    pub bcn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub san: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fen: Option<String>,
}

impl HistoryEntry {
    pub fn action(&self) -> Result<Action, CodecError> {
        action::decode(&self.bcn)
    }
}

/// Authoritative snapshot of a single game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    pub game_id: String,

    /// Position in the rules engine's encoding. Opaque here.
    pub fen: String,

    #[serde(default)]
    pub players: Players,

    /// Side expected to act next
    pub active_player: Color,

    /// Whether the active side bans or moves next. Servers that omit it
    /// leave it to be derived from `ply`; read it through [`GameState::phase`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,

    /// Half-turn counter; never decreases for a game
    pub ply: u32,

    #[serde(default)]
    pub game_over: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_reason: Option<String>,

    #[serde(default)]
    pub in_check: bool,

    #[serde(default)]
    pub history: Vec<HistoryEntry>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clocks: Option<Clocks>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_control: Option<TimeControl>,
}

impl GameState {
    /// Phase of the next action, as sent or derived from `ply`.
    pub fn phase(&self) -> Phase {
        self.phase.unwrap_or_else(|| Phase::from_ply(self.ply))
    }

    pub fn apply_clocks(&mut self, clocks: Clocks) {
        self.clocks = Some(clocks);
    }

    pub fn apply_end(&mut self, result: Option<String>, reason: Option<String>) {
        self.game_over = true;
        self.result = result;
        self.result_reason = reason;
    }

    pub fn last_action(&self) -> Option<&HistoryEntry> {
        self.history.last()
    }
}

/// Activity-feed entry sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player: Option<Color>,
    /// Server timestamp, ms since epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

impl GameEvent {
    pub fn occurred_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp.and_then(DateTime::<Utc>::from_timestamp_millis)
    }
}

/// A game event as recorded in the local log.
#[derive(Debug, Clone, PartialEq)]
pub struct EventLogEntry {
    pub event: GameEvent,
    pub received_at: DateTime<Utc>,
}


#[cfg(test)]
mod tests {
    use super::fixtures::game;
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_color_of() {
        let state = game("g1", 0);
        assert_eq!(state.players.color_of("white-user"), Some(Color::White));
        assert_eq!(state.players.color_of("black-user"), Some(Color::Black));
        assert_eq!(state.players.color_of("someone"), None);
    }

    #[test]
    fn test_phase_derived_from_ply_when_absent() {
        let mut state = game("g1", 4);
        state.phase = None;
        assert_eq!(state.phase(), Phase::Ban);
        state.ply = 5;
        assert_eq!(state.phase(), Phase::Move);
        state.phase = Some(Phase::Ban);
        assert_eq!(state.phase(), Phase::Ban);
    }

    #[test]
    fn test_state_without_phase_decodes() {
        let state: GameState = serde_json::from_value(serde_json::json!({
            "gameId": "g1",
            "fen": "start",
            "players": {"white": {"id": "white-user"}, "black": {"id": "black-user"}},
            "activePlayer": "black",
            "ply": 0,
            "gameOver": false,
            "inCheck": false,
            "history": []
        }))
        .unwrap();
        assert_eq!(state.phase, None);
        assert_eq!(state.phase(), Phase::Ban);
    }

    #[test]
    fn test_apply_end() {
        let mut state = game("g1", 12);
        state.apply_end(Some("0-1".to_string()), Some("checkmate".to_string()));
        assert!(state.game_over);
        assert_eq!(state.result.as_deref(), Some("0-1"));
        assert_eq!(state.result_reason.as_deref(), Some("checkmate"));
        assert_eq!(state.ply, 12);
    }

    #[test]
    fn test_apply_clocks() {
        let mut state = game("g1", 2);
        state.apply_clocks(Clocks {
            white: 59_000,
            black: 60_000,
            last_update: None,
        });
        assert_eq!(state.clocks.unwrap().remaining(Color::White), 59_000);
    }

    #[test]
    fn test_history_entry_decodes() {
        let entry = HistoryEntry {
            ply: 1,
            bcn: "b:e2e4".to_string(),
            san: None,
            fen: None,
        };
        assert_eq!(entry.action().unwrap().to_token(), "b:e2e4");
    }

    #[test]
    fn test_event_timestamp() {
        let event: GameEvent =
            serde_json::from_str(r#"{"type":"draw-offer","player":"white","timestamp":0}"#).unwrap();
        assert_eq!(event.kind, "draw-offer");
        assert_eq!(event.occurred_at(), DateTime::<Utc>::from_timestamp_millis(0));
        assert!(event.data.is_null());
    }

    #[test]
    fn test_color_opposite() {
        assert_eq!(Color::White.opposite(), Color::Black);
        assert_eq!(Color::default(), Color::White);
    }
}
