//! Move-decision engine ("oracle") abstraction.

use crate::error::EnvError;
use crate::types::{GameId, Move};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Thinking time granted for one move, in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ThinkBudget(pub u64);

impl ThinkBudget {
    pub fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    pub fn secs(&self) -> u64 {
        self.0
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.0)
    }
}

impl fmt::Display for ThinkBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}

/// Result of a move request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    /// A move to submit
    Move(Move),

    /// The position has no legal move (mate/stalemate already on the board)
    NoMoveAvailable,

    /// The engine failed or timed out
    EngineError(String),
}

/// Search statistics from the most recent move request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Telemetry {
    /// Nodes explored
    pub nodes: u64,

    /// Human-readable evaluation, e.g. `+0.35` or `#3`
    pub evaluation: Option<String>,

    /// Wall time spent on the request
    pub elapsed: Duration,
}

impl Telemetry {
    /// Nodes per second, if any time elapsed.
    pub fn nodes_per_second(&self) -> Option<f64> {
        let secs = self.elapsed.as_secs_f64();
        (secs > 0.0).then(|| self.nodes as f64 / secs)
    }
}

/// Stateful per-contest engine client.
///
/// Each contest owns exactly one oracle; it is never shared between workers.
#[async_trait]
pub trait Oracle: Send + 'static {
    /// Advances the internal position by the opponent's move.
    ///
    /// Failures are not reported here; an oracle that cannot apply the move
    /// answers the next `request_move` with `EngineError`.
    async fn register_opponent_move(&mut self, mv: &Move);

    /// Asks for a move within the given budget.
    ///
    /// A returned move is also applied to the oracle's internal position.
    async fn request_move(&mut self, budget: ThinkBudget) -> MoveOutcome;

    /// Statistics of the last request, used only for progress reports.
    fn telemetry(&self) -> Option<Telemetry> {
        None
    }
}

/// Creates one isolated oracle per contest.
#[async_trait]
pub trait OracleFactory: Send + Sync + 'static {
    type Oracle: Oracle;

    async fn create(&self, game_id: &GameId) -> Result<Self::Oracle, EnvError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_display() {
        let budget = ThinkBudget::from_secs(15);
        assert_eq!(budget.to_string(), "15s");
        assert_eq!(budget.as_duration(), Duration::from_secs(15));
    }

    #[test]
    fn test_nodes_per_second() {
        let telemetry = Telemetry {
            nodes: 20_000,
            evaluation: Some("+0.20".to_string()),
            elapsed: Duration::from_secs(2),
        };
        assert_eq!(telemetry.nodes_per_second(), Some(10_000.0));
        assert_eq!(Telemetry::default().nodes_per_second(), None);
    }
}
