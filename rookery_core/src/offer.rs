//! Offers (proposed contests) and the acceptance policy applied to them.

use crate::config::ChallengePolicy;
use rookery_env::{ChallengeInfo, OfferId};

/// A proposed contest waiting for a worker slot.
///
/// Immutable once created; `arrival` is the dispatcher's arrival counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Offer {
    pub id: OfferId,
    pub requester: String,
    pub arrival: u64,
    pub variant: String,
    pub rated: bool,
    pub speed: String,
}

impl Offer {
    pub fn from_challenge(challenge: ChallengeInfo, arrival: u64) -> Self {
        Self {
            id: challenge.id,
            requester: challenge.challenger,
            arrival,
            variant: challenge.variant,
            rated: challenge.rated,
            speed: challenge.speed,
        }
    }

    /// Bare offer with standard settings.
    pub fn new(id: &str, requester: &str, arrival: u64) -> Self {
        Self {
            id: OfferId::new(id),
            requester: requester.to_string(),
            arrival,
            variant: "standard".to_string(),
            rated: false,
            speed: "blitz".to_string(),
        }
    }
}

/// Outcome of the acceptance policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Queue,
    Decline(DeclineReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclineReason {
    Variant(String),
    Rated,
    Casual,
    SelfChallenge,
}

impl std::fmt::Display for DeclineReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeclineReason::Variant(v) => write!(f, "variant {} not played", v),
            DeclineReason::Rated => write!(f, "rated games not accepted"),
            DeclineReason::Casual => write!(f, "casual games not accepted"),
            DeclineReason::SelfChallenge => write!(f, "challenge from own account"),
        }
    }
}

impl ChallengePolicy {
    /// Decides whether a challenge may enter the queue.
    pub fn evaluate(&self, challenge: &ChallengeInfo, username: &str) -> Verdict {
        if challenge.challenger.eq_ignore_ascii_case(username) {
            return Verdict::Decline(DeclineReason::SelfChallenge);
        }
        if !self
            .variants
            .iter()
            .any(|v| v.eq_ignore_ascii_case(&challenge.variant))
        {
            return Verdict::Decline(DeclineReason::Variant(challenge.variant.clone()));
        }
        if challenge.rated && !self.accept_rated {
            return Verdict::Decline(DeclineReason::Rated);
        }
        if !challenge.rated && !self.accept_casual {
            return Verdict::Decline(DeclineReason::Casual);
        }
        Verdict::Queue
    }
}
