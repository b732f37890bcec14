//! Lichess ndjson wire format.
//!
//! Every line of a lichess stream is one JSON object with a `type` key.
//! Objects carrying an `error` key are error markers whatever their type.

use rookery_env::{
    ChallengeInfo, ChatLine, Clock, EnvError, Event, GameEvent, GameFull, GameId, GameState, Move,
    OfferId, PlayerInfo,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct WireUser {
    id: Option<String>,
    name: Option<String>,
    rating: Option<u32>,
}

impl From<WireUser> for PlayerInfo {
    fn from(user: WireUser) -> Self {
        PlayerInfo {
            id: user.id,
            name: user.name,
            rating: user.rating,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireVariant {
    key: String,
}

#[derive(Debug, Deserialize)]
struct WireChallenge {
    id: String,
    challenger: Option<WireUser>,
    variant: Option<WireVariant>,
    #[serde(default)]
    rated: bool,
    #[serde(default)]
    speed: String,
}

#[derive(Debug, Deserialize)]
struct ChallengeEnvelope {
    challenge: WireChallenge,
}

#[derive(Debug, Deserialize)]
struct WireGame {
    #[serde(rename = "gameId")]
    game_id: Option<String>,
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GameEnvelope {
    game: WireGame,
}

fn started() -> String {
    "started".to_string()
}

#[derive(Debug, Deserialize)]
struct WireState {
    #[serde(default)]
    moves: String,
    #[serde(default)]
    wtime: u64,
    #[serde(default)]
    btime: u64,
    #[serde(default = "started")]
    status: String,
}

#[derive(Debug, Deserialize)]
struct WireClock {
    initial: Option<u64>,
    increment: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct WireGameFull {
    white: WireUser,
    black: WireUser,
    clock: Option<WireClock>,
    state: WireState,
}

#[derive(Debug, Deserialize)]
struct WireChat {
    username: String,
    text: String,
    #[serde(default)]
    room: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireGone {
    gone: bool,
    claim_win_in_seconds: Option<u64>,
}

/// The bot account as returned by `/api/account`.
#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    pub username: String,
    pub title: Option<String>,
}

impl Account {
    pub fn is_bot(&self) -> bool {
        self.title.as_deref() == Some("BOT")
    }
}

fn parse_line(line: &str) -> Result<Value, EnvError> {
    serde_json::from_str(line).map_err(EnvError::decode)
}

fn error_marker(value: &Value) -> Option<String> {
    value.get("error").map(|e| match e {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

fn kind_of(value: &Value) -> String {
    value
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("untyped")
        .to_string()
}

fn from_value<T: DeserializeOwned>(value: Value) -> Result<T, EnvError> {
    serde_json::from_value(value).map_err(EnvError::decode)
}

fn parse_moves(moves: &str) -> Result<Vec<Move>, EnvError> {
    moves
        .split_whitespace()
        .map(|token| token.parse::<Move>().map_err(EnvError::decode))
        .collect()
}

fn game_state(state: WireState) -> Result<GameState, EnvError> {
    Ok(GameState::new(
        parse_moves(&state.moves)?,
        Clock::new(state.wtime, state.btime),
        state.status,
    ))
}

/// Decodes one line of the account event stream.
pub fn decode_event(line: &str) -> Result<Event, EnvError> {
    let value = parse_line(line)?;
    if let Some(message) = error_marker(&value) {
        return Ok(Event::Error { message });
    }

    let kind = kind_of(&value);
    let event = match kind.as_str() {
        "challenge" => {
            let challenge = from_value::<ChallengeEnvelope>(value)?.challenge;
            let challenger = challenge
                .challenger
                .and_then(|c| c.name.or(c.id))
                .unwrap_or_else(|| "anonymous".to_string());
            Event::Challenge(ChallengeInfo {
                id: OfferId::new(challenge.id),
                challenger,
                variant: challenge
                    .variant
                    .map(|v| v.key)
                    .unwrap_or_else(|| "standard".to_string()),
                rated: challenge.rated,
                speed: challenge.speed,
            })
        }
        "challengeCanceled" => Event::ChallengeCanceled {
            id: OfferId::new(from_value::<ChallengeEnvelope>(value)?.challenge.id),
        },
        "challengeDeclined" => Event::ChallengeDeclined {
            id: OfferId::new(from_value::<ChallengeEnvelope>(value)?.challenge.id),
        },
        "gameStart" | "gameFinish" => {
            let game = from_value::<GameEnvelope>(value)?.game;
            let game_id = game
                .game_id
                .or(game.id)
                .map(GameId::new)
                .ok_or_else(|| EnvError::decode(format!("{} without game id", kind)))?;
            if kind == "gameStart" {
                Event::GameStart { game_id }
            } else {
                Event::GameFinish { game_id }
            }
        }
        _ => Event::Unknown { kind },
    };
    Ok(event)
}

/// Decodes one line of a game stream.
pub fn decode_game_event(line: &str) -> Result<GameEvent, EnvError> {
    let value = parse_line(line)?;
    if let Some(message) = error_marker(&value) {
        return Ok(GameEvent::Error { message });
    }

    let kind = kind_of(&value);
    let event = match kind.as_str() {
        "gameFull" => {
            let full: WireGameFull = from_value(value)?;
            let (initial_ms, increment_ms) = match full.clock {
                Some(clock) => (clock.initial, clock.increment),
                None => (None, None),
            };
            GameEvent::Full(GameFull {
                white: full.white.into(),
                black: full.black.into(),
                initial_ms,
                increment_ms,
                state: game_state(full.state)?,
            })
        }
        "gameState" => GameEvent::State(game_state(from_value(value)?)?),
        "chatLine" => {
            let chat: WireChat = from_value(value)?;
            GameEvent::Chat(ChatLine {
                username: chat.username,
                room: chat.room,
                text: chat.text,
            })
        }
        "opponentGone" => {
            let gone: WireGone = from_value(value)?;
            GameEvent::OpponentGone {
                gone: gone.gone,
                claim_win_in_seconds: gone.claim_win_in_seconds,
            }
        }
        _ => GameEvent::Unknown { kind },
    };
    Ok(event)
}
