//! Rookery Core - contest orchestration for an online game bot
//!
//! This library holds the scheduling logic of the bot:
//! 1. **Dispatcher**: one ordered loop over account events
//! 2. **Contest Pool**: FIFO queue of offers and a bounded array of worker slots
//! 3. **Contest Session**: per-game state machine deciding when and how long to think
//!
//! ```text
//!  Transport ──► Dispatcher ──► Pool ──► worker task ──► Session ──► Oracle
//!                                                           │
//!                                                           └──► Transport (moves, chat)
//! ```
//!
//! All I/O goes through the `rookery_env` traits, so the same code runs
//! against lichess in production and against `rookery_sim` in tests.

pub mod config;
pub mod dispatcher;
pub mod offer;
pub mod pool;
pub mod session;
pub mod turn;

#[cfg(test)]
mod test_support;

// Re-export key types for convenience
pub use config::{BotConfig, ChallengePolicy, PoolConfig, SessionConfig};
pub use dispatcher::{DispatchStats, Dispatcher, Routed};
pub use offer::{DeclineReason, Offer, Verdict};
pub use pool::{ContestPool, PoolStats, Reconciled, SessionLauncher, WorkerLauncher, WorkerSlot};
pub use session::{
    play_contest, ChatCommand, ContestSession, ContestState, Phase, SessionOutcome, SessionReport,
};
pub use turn::{is_our_turn, think_budget};
