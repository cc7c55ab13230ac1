//! Local user role and permissions.
//!
//! A [`UserRole`] is never stored. It is derived from the latest snapshot and
//! the local identity every time it is needed, so it cannot drift from the
//! server's view.
//!
//! ```text
//! role        = white | black | spectator   (seat lookup by user id)
//! my turn     = role != spectator && active_player == role
//! can_move    = my turn && phase == move && !game_over
//! can_ban     = my turn && phase == ban  && !game_over
//! orientation = black if role == black, else white
//! ```

use std::fmt;

use crate::protocol::action::ActionKind;
use crate::state::game::{Color, GameState, Phase};

/// Seat of the local user in a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Role {
    White,
    Black,
    #[default]
    Spectator,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::White => "white",
            Self::Black => "black",
            Self::Spectator => "spectator",
        }
    }

    pub fn color(&self) -> Option<Color> {
        match self {
            Self::White => Some(Color::White),
            Self::Black => Some(Color::Black),
            Self::Spectator => None,
        }
    }

    pub fn is_player(&self) -> bool {
        !matches!(self, Self::Spectator)
    }
}

impl From<Color> for Role {
    fn from(color: Color) -> Self {
        match color {
            Color::White => Self::White,
            Color::Black => Self::Black,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the local user may do in one game right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserRole {
    pub role: Role,
    pub can_move: bool,
    pub can_ban: bool,
    /// Side shown at the bottom of the board.
    pub orientation: Color,
}

impl Default for UserRole {
    fn default() -> Self {
        Self::spectator()
    }
}

impl UserRole {
    pub fn spectator() -> Self {
        Self {
            role: Role::Spectator,
            can_move: false,
            can_ban: false,
            orientation: Color::White,
        }
    }

    /// Whether an action of `kind` is currently allowed.
    pub fn permits(&self, kind: ActionKind) -> bool {
        match kind {
            ActionKind::Move => self.can_move,
            ActionKind::Ban => self.can_ban,
        }
    }

    pub fn can_act(&self) -> bool {
        self.can_move || self.can_ban
    }
}

/// Derive the local user's role. Pure: same inputs, same output.
pub fn derive_role(state: Option<&GameState>, user_id: Option<&str>) -> UserRole {
    let (Some(state), Some(user_id)) = (state, user_id) else {
        return UserRole::spectator();
    };

    let role = state
        .players
        .color_of(user_id)
        .map(Role::from)
        .unwrap_or(Role::Spectator);

    let my_turn = role.color() == Some(state.active_player);
    let live = !state.game_over;
    let phase = state.phase();

    UserRole {
        role,
        can_move: my_turn && live && phase == Phase::Move,
        can_ban: my_turn && live && phase == Phase::Ban,
        orientation: if role == Role::Black {
            Color::Black
        } else {
            Color::White
        },
    }
}
