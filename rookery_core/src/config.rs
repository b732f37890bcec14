//! Configuration for the dispatcher, the contest pool and contest sessions.

use rookery_env::ThinkBudget;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a contest session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Account name of the bot (compared against the players of each contest)
    pub username: String,

    /// Fraction of our remaining clock spent on the next move (default: 0.025)
    pub think_proportion: f64,

    /// Budget for the opening move when playing White (default: 5s)
    pub opening_budget: ThinkBudget,

    /// Extra time past the budget before the oracle is considered dead (default: 10s)
    pub hard_timeout_grace: Duration,

    /// Whether progress lines are posted after each move until muted (default: true)
    pub progress_reports: bool,

    /// Chat line posted when a session starts
    pub greeting: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            username: "rookery-bot".to_string(),
            think_proportion: 0.025,
            opening_budget: ThinkBudget::from_secs(5),
            hard_timeout_grace: Duration::from_secs(10),
            progress_reports: true,
            greeting: Some("Hello there!".to_string()),
        }
    }
}

impl SessionConfig {
    pub fn for_user(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Self::default()
        }
    }

    pub fn with_think_proportion(mut self, proportion: f64) -> Self {
        self.think_proportion = proportion;
        self
    }

    pub fn with_greeting(mut self, greeting: Option<String>) -> Self {
        self.greeting = greeting;
        self
    }

    pub fn with_progress_reports(mut self, enabled: bool) -> Self {
        self.progress_reports = enabled;
        self
    }

    pub fn with_hard_timeout_grace(mut self, grace: Duration) -> Self {
        self.hard_timeout_grace = grace;
        self
    }
}

/// Configuration for the contest pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of contests played at once (default: 5)
    pub capacity: usize,

    /// Minimum spacing between two accepts (default: 500ms)
    pub settle_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 5,
            settle_interval: Duration::from_millis(500),
        }
    }
}

impl PoolConfig {
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_settle_interval(mut self, interval: Duration) -> Self {
        self.settle_interval = interval;
        self
    }
}

/// Which offers are worth queueing at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengePolicy {
    /// Accepted variant keys (default: `standard`)
    pub variants: Vec<String>,

    pub accept_rated: bool,

    pub accept_casual: bool,
}

impl Default for ChallengePolicy {
    fn default() -> Self {
        Self {
            variants: vec!["standard".to_string()],
            accept_rated: true,
            accept_casual: true,
        }
    }
}

/// Everything needed to assemble a dispatcher.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BotConfig {
    pub session: SessionConfig,
    pub pool: PoolConfig,
    pub policy: ChallengePolicy,
}
