//! Action codec.
//!
//! Maps structured actions to compact BCN tokens and back:
//!
//! ```text
//! Move { e7, e8, Some(Queen) }  <->  "m:e7e8q"
//! Ban  { e2, e4 }               <->  "b:e2e4"
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CodecError;

const MOVE_PREFIX: &str = "m:";
const BAN_PREFIX: &str = "b:";

/// A board square, `a1` through `h8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Square {
    file: u8,
    rank: u8,
}

impl Square {
    /// Build from zero-based file and rank indices.
    pub fn new(file: u8, rank: u8) -> Option<Self> {
        (file < 8 && rank < 8).then_some(Self { file, rank })
    }

    pub fn file(&self) -> u8 {
        self.file
    }

    pub fn rank(&self) -> u8 {
        self.rank
    }

    fn from_bytes(file: u8, rank: u8) -> Option<Self> {
        if !(b'a'..=b'h').contains(&file) || !(b'1'..=b'8').contains(&rank) {
            return None;
        }
        Some(Self {
            file: file - b'a',
            rank: rank - b'1',
        })
    }
}

impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", (b'a' + self.file) as char, (b'1' + self.rank) as char)
    }
}

impl FromStr for Square {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.as_bytes() {
            [file, rank] => {
                Self::from_bytes(*file, *rank).ok_or_else(|| CodecError::InvalidSquare(s.to_string()))
            }
            _ => Err(CodecError::InvalidSquare(s.to_string())),
        }
    }
}

/// Piece a pawn promotes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Promotion {
    Queen,
    Rook,
    Bishop,
    Knight,
}

impl Promotion {
    pub fn as_char(&self) -> char {
        match self {
            Self::Queen => 'q',
            Self::Rook => 'r',
            Self::Bishop => 'b',
            Self::Knight => 'n',
        }
    }

    pub fn from_char(c: char) -> Result<Self, CodecError> {
        match c {
            'q' => Ok(Self::Queen),
            'r' => Ok(Self::Rook),
            'b' => Ok(Self::Bishop),
            'n' => Ok(Self::Knight),
            other => Err(CodecError::InvalidPromotion(other)),
        }
    }
}

/// Which half of a turn an action belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Ban,
    Move,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ban => "ban",
            Self::Move => "move",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured player action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Move {
        from: Square,
        to: Square,
        promotion: Option<Promotion>,
    },
    Ban {
        from: Square,
        to: Square,
    },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Move { .. } => ActionKind::Move,
            Self::Ban { .. } => ActionKind::Ban,
        }
    }

    /// Encode as a BCN token.
    pub fn to_token(&self) -> String {
        encode(self)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode(self))
    }
}

impl FromStr for Action {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode(s)
    }
}

impl Serialize for Action {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Action {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let token = String::deserialize(deserializer)?;
        decode(&token).map_err(de::Error::custom)
    }
}

/// Encode an action as a BCN token.
pub fn encode(action: &Action) -> String {
    match action {
        Action::Move {
            from,
            to,
            promotion,
        } => {
            let mut token = format!("{MOVE_PREFIX}{from}{to}");
            if let Some(p) = promotion {
                token.push(p.as_char());
            }
            token
        }
        Action::Ban { from, to } => format!("{BAN_PREFIX}{from}{to}"),
    }
}

/// Decode a BCN token into an action.
pub fn decode(token: &str) -> Result<Action, CodecError> {
    if let Some(body) = token.strip_prefix(MOVE_PREFIX) {
        let (from, to, rest) = split_squares(token, body)?;
        let promotion = match rest {
            [] => None,
            [p] => Some(Promotion::from_char(*p as char)?),
            _ => return Err(CodecError::Malformed(token.to_string())),
        };
        return Ok(Action::Move {
            from,
            to,
            promotion,
        });
    }

    if let Some(body) = token.strip_prefix(BAN_PREFIX) {
        let (from, to, rest) = split_squares(token, body)?;
        if !rest.is_empty() {
            return Err(CodecError::Malformed(token.to_string()));
        }
        return Ok(Action::Ban { from, to });
    }

    Err(CodecError::UnknownPrefix(token.to_string()))
}

fn split_squares<'a>(token: &str, body: &'a str) -> Result<(Square, Square, &'a [u8]), CodecError> {
    match body.as_bytes() {
        [f1, r1, f2, r2, rest @ ..] => {
            let from = Square::from_bytes(*f1, *r1)
                .ok_or_else(|| CodecError::InvalidSquare(String::from_utf8_lossy(&[*f1, *r1]).into_owned()))?;
            let to = Square::from_bytes(*f2, *r2)
                .ok_or_else(|| CodecError::InvalidSquare(String::from_utf8_lossy(&[*f2, *r2]).into_owned()))?;
            Ok((from, to, rest))
        }
        _ => Err(CodecError::Malformed(token.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn sq(s: &str) -> Square {
        s.parse().unwrap()
    }

    #[test]
    fn test_action_serde_as_token() {
        let action = Action::Ban {
            from: sq("d7"),
            to: sq("d5"),
        };
        assert_eq!(serde_json::to_string(&action).unwrap(), r#""b:d7d5""#);
        let back: Action = serde_json::from_str(r#""b:d7d5""#).unwrap();
        assert_eq!(back, action);
        assert!(serde_json::from_str::<Action>(r#""x:d7d5""#).is_err());
    }

    #[test]
    fn test_encode_move() {
        let action = Action::Move {
            from: sq("e2"),
            to: sq("e4"),
            promotion: None,
        };
        assert_eq!(encode(&action), "m:e2e4");
    }

    #[test]
    fn test_encode_promotion() {
        let action = Action::Move {
            from: sq("e7"),
            to: sq("e8"),
            promotion: Some(Promotion::Queen),
        };
        assert_eq!(action.to_token(), "m:e7e8q");
    }

    #[test]
    fn test_encode_ban() {
        let action = Action::Ban {
            from: sq("e7"),
            to: sq("e5"),
        };
        assert_eq!(action.to_string(), "b:e7e5");
    }

    #[test]
    fn test_decode() {
        assert_eq!(
            decode("b:g1f3").unwrap(),
            Action::Ban {
                from: sq("g1"),
                to: sq("f3")
            }
        );
        assert_eq!(
            "m:a7a8n".parse::<Action>().unwrap(),
            Action::Move {
                from: sq("a7"),
                to: sq("a8"),
                promotion: Some(Promotion::Knight)
            }
        );
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(
            decode("x:e2e4"),
            Err(CodecError::UnknownPrefix("x:e2e4".to_string()))
        );
        assert_eq!(decode("e2e4"), Err(CodecError::UnknownPrefix("e2e4".to_string())));
        assert_eq!(decode("m:e2"), Err(CodecError::Malformed("m:e2".to_string())));
        assert_eq!(decode("m:e2e9"), Err(CodecError::InvalidSquare("e9".to_string())));
        assert_eq!(decode("m:e7e8k"), Err(CodecError::InvalidPromotion('k')));
        assert_eq!(decode("b:e7e8q"), Err(CodecError::Malformed("b:e7e8q".to_string())));
        assert_eq!(decode("m:e7e8qq"), Err(CodecError::Malformed("m:e7e8qq".to_string())));
    }

    #[test]
    fn test_square_bounds() {
        assert!(Square::new(7, 7).is_some());
        assert!(Square::new(8, 0).is_none());
        assert!("i1".parse::<Square>().is_err());
        assert!("a10".parse::<Square>().is_err());
        assert_eq!(Square::new(0, 0).unwrap().to_string(), "a1");
    }

    fn square() -> impl Strategy<Value = Square> {
        (0u8..8, 0u8..8).prop_map(|(f, r)| Square { file: f, rank: r })
    }

    fn promotion() -> impl Strategy<Value = Option<Promotion>> {
        prop_oneof![
            Just(None),
            Just(Some(Promotion::Queen)),
            Just(Some(Promotion::Rook)),
            Just(Some(Promotion::Bishop)),
            Just(Some(Promotion::Knight)),
        ]
    }

    fn action() -> impl Strategy<Value = Action> {
        prop_oneof![
            (square(), square(), promotion()).prop_map(|(from, to, promotion)| Action::Move {
                from,
                to,
                promotion
            }),
            (square(), square()).prop_map(|(from, to)| Action::Ban { from, to }),
        ]
    }

    proptest! {
        #[test]
        fn prop_decode_inverts_encode(action in action()) {
            prop_assert_eq!(decode(&encode(&action)), Ok(action));
        }

        #[test]
        fn prop_decode_never_panics(token in ".{0,12}") {
            let _ = decode(&token);
        }
    }
}
