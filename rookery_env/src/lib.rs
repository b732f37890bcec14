//! Rookery Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" abstraction allowing the Rookery
//! orchestrator to run against both **Production** collaborators (lichess
//! over HTTP, a UCI engine process) and **Simulation** collaborators
//! (scripted event feeds, scripted oracles, a virtual clock).
//!
//! # Collaborators
//!
//! Everything the orchestration core touches in the outside world goes
//! through one of three seams:
//! - Time and task spawning (`BotContext`)
//! - The remote game service (`Transport`)
//! - The move-decision engine (`Oracle`, created per contest by an `OracleFactory`)
//!
//! # Example
//!
//! ```ignore
//! use futures_util::StreamExt;
//! use rookery_env::{Event, Transport};
//!
//! async fn print_offers<T: Transport>(transport: &T) -> Result<(), rookery_env::EnvError> {
//!     let mut events = transport.stream_events().await?;
//!     while let Some(event) = events.next().await {
//!         if let Event::Challenge(challenge) = event? {
//!             println!("{} wants to play", challenge.challenger);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

mod context;
mod error;
mod oracle;
mod tokio_impl;
mod transport;
mod types;

pub use context::BotContext;
pub use error::EnvError;
pub use oracle::{MoveOutcome, Oracle, OracleFactory, Telemetry, ThinkBudget};
pub use tokio_impl::TokioContext;
pub use transport::{EventStream, GameEventStream, Transport};
pub use types::{
    ChallengeInfo, ChatLine, Clock, Color, Event, GameEvent, GameFull, GameId, GameState, Move,
    MoveParseError, OfferId, PlayerInfo, WorkerId,
};
