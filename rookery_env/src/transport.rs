//! Transport abstraction for the remote game service.

use crate::error::EnvError;
use crate::types::{Event, GameEvent, GameId, Move, OfferId};
use async_trait::async_trait;
use futures_util::stream::BoxStream;

/// Lazy, possibly infinite sequence of account events.
///
/// An `Err` item is an unrecoverable stream failure; error *markers* sent by
/// the service arrive as `Ok(Event::Error { .. })`.
pub type EventStream = BoxStream<'static, Result<Event, EnvError>>;

/// Ordered notifications for one contest.
pub type GameEventStream = BoxStream<'static, Result<GameEvent, EnvError>>;

/// Abstraction for the remote matchmaking/game service.
///
/// # Implementations
///
/// - **Production**: lichess bot API over HTTPS (ndjson streams)
/// - **Simulation**: channel-fed scripted streams with recorded actions
///
/// # Flow
///
/// ```text
/// Service                 Dispatcher                 Worker
///   |-- stream_events() ----->|                          |
///   |<-- respond_to_offer ----|                          |
///   |-- stream_game(id) ------------------------------->|
///   |<-- submit_move / resign / post_message -----------|
/// ```
///
/// Implementations are shared by reference between the dispatcher and all
/// workers, so every method takes `&self`.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Opens the account event stream.
    async fn stream_events(&self) -> Result<EventStream, EnvError>;

    /// Opens the notification stream of a single contest.
    async fn stream_game(&self, game_id: &GameId) -> Result<GameEventStream, EnvError>;

    /// Accepts or declines an offer.
    async fn respond_to_offer(&self, offer_id: &OfferId, accept: bool) -> Result<(), EnvError>;

    /// Submits a move for a contest.
    async fn submit_move(&self, game_id: &GameId, mv: &Move) -> Result<(), EnvError>;

    /// Resigns a contest.
    async fn resign(&self, game_id: &GameId) -> Result<(), EnvError>;

    /// Posts a chat line to a contest.
    ///
    /// # Note
    /// Callers treat this as best-effort and ignore failures.
    async fn post_message(&self, game_id: &GameId, text: &str) -> Result<(), EnvError>;
}
