//! Common types for the Rookery environment abstraction.
//!
//! These are the decoded, transport-independent shapes of everything the
//! remote game service sends: account-level events (`Event`) and per-game
//! notifications (`GameEvent`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Identifier of a contest (game) on the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameId(pub String);

impl GameId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a challenge (offer).
///
/// On lichess an accepted challenge becomes a game with the same id,
/// see [`OfferId::game_id`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OfferId(pub String);

impl OfferId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The contest an accepted offer turns into.
    pub fn game_id(&self) -> GameId {
        GameId(self.0.clone())
    }
}

impl fmt::Display for OfferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier for a spawned contest worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub Uuid);

impl WorkerId {
    /// Creates a new random WorkerId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a deterministic WorkerId from a seed (for simulation).
    pub fn from_seed(seed: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&seed.to_le_bytes());
        bytes[8..16].copy_from_slice(&seed.wrapping_mul(0x517cc1b727220a95).to_le_bytes());
        Self(Uuid::from_bytes(bytes))
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Show first 8 chars for readability
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Side assignment in a contest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    White,
    Black,
}

impl Color {
    pub fn opposite(self) -> Self {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Color::White => f.write_str("white"),
            Color::Black => f.write_str("black"),
        }
    }
}

/// Reasons a move token is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoveParseError {
    #[error("move token must be 4 or 5 characters, got {0:?}")]
    Length(String),

    #[error("invalid square in move token {0:?}")]
    Square(String),

    #[error("invalid promotion piece in move token {0:?}")]
    Promotion(String),
}

/// A move in compact algebraic (UCI) notation: `e2e4`, `e7e8q`.
///
/// Only the token shape is validated; legality is the oracle's business.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Move(String);

impl Move {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Source square, e.g. `e2`.
    pub fn from_square(&self) -> &str {
        &self.0[0..2]
    }

    /// Destination square, e.g. `e4`.
    pub fn to_square(&self) -> &str {
        &self.0[2..4]
    }

    /// Promotion piece letter, if any.
    pub fn promotion(&self) -> Option<char> {
        self.0.chars().nth(4)
    }
}

fn is_square(file: u8, rank: u8) -> bool {
    (b'a'..=b'h').contains(&file) && (b'1'..=b'8').contains(&rank)
}

impl FromStr for Move {
    type Err = MoveParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if !(bytes.len() == 4 || bytes.len() == 5) || !s.is_ascii() {
            return Err(MoveParseError::Length(s.to_string()));
        }
        if !is_square(bytes[0], bytes[1]) || !is_square(bytes[2], bytes[3]) {
            return Err(MoveParseError::Square(s.to_string()));
        }
        if bytes.len() == 5 && !matches!(bytes[4], b'q' | b'r' | b'b' | b'n') {
            return Err(MoveParseError::Promotion(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for Move {
    type Error = MoveParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Move> for String {
    fn from(mv: Move) -> Self {
        mv.0
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A participant in a contest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInfo {
    /// Account id (lowercase username); absent for built-in AI opponents
    pub id: Option<String>,

    /// Display name
    pub name: Option<String>,

    pub rating: Option<u32>,
}

impl PlayerInfo {
    pub fn named(id: &str) -> Self {
        Self {
            id: Some(id.to_lowercase()),
            name: Some(id.to_string()),
            rating: None,
        }
    }

    /// Returns true if this player is the account `username`.
    pub fn is(&self, username: &str) -> bool {
        self.id
            .as_deref()
            .map(|id| id.eq_ignore_ascii_case(username))
            .unwrap_or(false)
    }
}

/// Remaining time per side, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clock {
    pub white_ms: u64,
    pub black_ms: u64,
}

impl Clock {
    pub fn new(white_ms: u64, black_ms: u64) -> Self {
        Self { white_ms, black_ms }
    }

    pub fn remaining_for(&self, color: Color) -> u64 {
        match color {
            Color::White => self.white_ms,
            Color::Black => self.black_ms,
        }
    }
}

/// Snapshot of a contest as carried by `gameState` notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameState {
    /// Every half-move played so far, in order
    pub moves: Vec<Move>,

    pub clock: Clock,

    /// Status string; only `"started"` means in progress
    pub status: String,
}

impl GameState {
    pub fn new(moves: Vec<Move>, clock: Clock, status: impl Into<String>) -> Self {
        Self {
            moves,
            clock,
            status: status.into(),
        }
    }

    /// Number of half-moves recorded.
    pub fn half_moves(&self) -> usize {
        self.moves.len()
    }

    pub fn last_move(&self) -> Option<&Move> {
        self.moves.last()
    }

    pub fn is_in_progress(&self) -> bool {
        self.status == "started"
    }
}

/// Full description of a contest, sent once when a game stream opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameFull {
    pub white: PlayerInfo,
    pub black: PlayerInfo,

    /// Initial clock per side in milliseconds (None for correspondence)
    pub initial_ms: Option<u64>,

    pub increment_ms: Option<u64>,

    /// State embedded in the full notification
    pub state: GameState,
}

impl GameFull {
    /// Side played by `username`, if it takes part in the contest at all.
    pub fn color_of(&self, username: &str) -> Option<Color> {
        if self.white.is(username) {
            Some(Color::White)
        } else if self.black.is(username) {
            Some(Color::Black)
        } else {
            None
        }
    }
}

/// A chat message inside a contest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatLine {
    pub username: String,
    pub room: String,
    pub text: String,
}

/// A proposed contest as announced on the account event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeInfo {
    pub id: OfferId,

    /// Name of the requesting account
    pub challenger: String,

    /// Variant key, e.g. `standard`
    pub variant: String,

    pub rated: bool,

    /// Speed category, e.g. `blitz`
    pub speed: String,
}

/// Account-level notifications consumed by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Challenge(ChallengeInfo),
    ChallengeCanceled { id: OfferId },
    ChallengeDeclined { id: OfferId },
    GameStart { game_id: GameId },
    GameFinish { game_id: GameId },

    /// Any notification carrying an error marker
    Error { message: String },

    /// A notification type this crate does not know
    Unknown { kind: String },
}

impl Event {
    /// Short name used in logs.
    pub fn kind(&self) -> &str {
        match self {
            Event::Challenge(_) => "challenge",
            Event::ChallengeCanceled { .. } => "challengeCanceled",
            Event::ChallengeDeclined { .. } => "challengeDeclined",
            Event::GameStart { .. } => "gameStart",
            Event::GameFinish { .. } => "gameFinish",
            Event::Error { .. } => "error",
            Event::Unknown { kind } => kind,
        }
    }
}

/// Per-contest notifications consumed by a contest session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameEvent {
    Full(GameFull),
    State(GameState),
    Chat(ChatLine),
    OpponentGone {
        gone: bool,
        claim_win_in_seconds: Option<u64>,
    },
    Error {
        message: String,
    },
    Unknown {
        kind: String,
    },
}

impl GameEvent {
    pub fn kind(&self) -> &str {
        match self {
            GameEvent::Full(_) => "gameFull",
            GameEvent::State(_) => "gameState",
            GameEvent::Chat(_) => "chatLine",
            GameEvent::OpponentGone { .. } => "opponentGone",
            GameEvent::Error { .. } => "error",
            GameEvent::Unknown { kind } => kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_move_parse() {
        let mv: Move = "e2e4".parse().unwrap();
        assert_eq!(mv.from_square(), "e2");
        assert_eq!(mv.to_square(), "e4");
        assert_eq!(mv.promotion(), None);

        let promo: Move = "e7e8q".parse().unwrap();
        assert_eq!(promo.promotion(), Some('q'));
    }

    #[test]
    fn test_move_parse_rejects_bad_tokens() {
        assert!(matches!("e2".parse::<Move>(), Err(MoveParseError::Length(_))));
        assert!(matches!("i2e4".parse::<Move>(), Err(MoveParseError::Square(_))));
        assert!(matches!("e2e9".parse::<Move>(), Err(MoveParseError::Square(_))));
        assert!(matches!("e7e8k".parse::<Move>(), Err(MoveParseError::Promotion(_))));
        assert!("é2e4".parse::<Move>().is_err());
    }

    #[test]
    fn test_player_identity_is_case_insensitive() {
        let player = PlayerInfo::named("Queen_Bot");
        assert!(player.is("queen_bot"));
        assert!(player.is("QUEEN_BOT"));
        assert!(!player.is("someone_else"));
        assert!(!PlayerInfo::default().is("queen_bot"));
    }

    #[test]
    fn test_color_of() {
        let full = GameFull {
            white: PlayerInfo::named("alice"),
            black: PlayerInfo::named("bot"),
            initial_ms: Some(300_000),
            increment_ms: Some(0),
            state: GameState::new(vec![], Clock::new(300_000, 300_000), "started"),
        };
        assert_eq!(full.color_of("bot"), Some(Color::Black));
        assert_eq!(full.color_of("alice"), Some(Color::White));
        assert_eq!(full.color_of("carol"), None);
    }

    #[test]
    fn test_game_state_helpers() {
        let moves = vec!["e2e4".parse().unwrap(), "e7e5".parse().unwrap()];
        let state = GameState::new(moves, Clock::new(1_000, 2_000), "started");
        assert_eq!(state.half_moves(), 2);
        assert_eq!(state.last_move().map(Move::as_str), Some("e7e5"));
        assert!(state.is_in_progress());
        assert_eq!(state.clock.remaining_for(Color::Black), 2_000);

        let ended = GameState::new(vec![], Clock::default(), "mate");
        assert!(!ended.is_in_progress());
    }

    #[test]
    fn test_worker_id_from_seed_is_deterministic() {
        assert_eq!(WorkerId::from_seed(3), WorkerId::from_seed(3));
        assert_ne!(WorkerId::from_seed(3), WorkerId::from_seed(4));
        assert_eq!(WorkerId::from_seed(3).to_string().len(), 8);
    }

    #[test]
    fn test_offer_becomes_game() {
        let offer = OfferId::new("abcd1234");
        assert_eq!(offer.game_id(), GameId::new("abcd1234"));
    }
}
