//! Scripted move oracle for simulation.
//!
//! The simulated oracle does not know the rules of the game. It produces
//! well-formed move tokens from a seeded RNG and can be told to fail in the
//! ways a real engine process fails.

use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rookery_env::{EnvError, GameId, Move, MoveOutcome, Oracle, OracleFactory, Telemetry, ThinkBudget};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// Failure modes injected into simulated oracles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OracleFault {
    /// Always answers with a move
    None,

    /// Answers `n` moves, then reports an engine error
    ErrorAfter(u32),

    /// Answers `n` moves, then never answers again
    HangAfter(u32),

    /// The engine cannot be started at all
    Unavailable,
}

/// Oracle answering with seeded pseudo-random move tokens.
pub struct ScriptedOracle {
    rng: ChaCha8Rng,
    fault: OracleFault,

    /// Moves answered so far
    answered: u32,

    /// Opponent moves registered so far
    seen: Vec<Move>,

    last: Option<Telemetry>,
}

impl ScriptedOracle {
    pub fn new(seed: u64, fault: OracleFault) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            fault,
            answered: 0,
            seen: Vec::new(),
            last: None,
        }
    }

    pub fn seen(&self) -> &[Move] {
        &self.seen
    }

    fn square(&mut self) -> (char, char) {
        let file = (b'a' + self.rng.gen_range(0..8u8)) as char;
        let rank = (b'1' + self.rng.gen_range(0..8u8)) as char;
        (file, rank)
    }

    fn random_move(&mut self) -> Option<Move> {
        let (f1, r1) = self.square();
        let (f2, r2) = self.square();
        format!("{f1}{r1}{f2}{r2}").parse().ok()
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn register_opponent_move(&mut self, mv: &Move) {
        self.seen.push(mv.clone());
    }

    async fn request_move(&mut self, budget: ThinkBudget) -> MoveOutcome {
        match self.fault {
            OracleFault::ErrorAfter(n) if self.answered >= n => {
                return MoveOutcome::EngineError("engine process exited".to_string());
            }
            OracleFault::HangAfter(n) if self.answered >= n => {
                debug!("Simulated engine stops answering");
                std::future::pending::<()>().await;
            }
            _ => {}
        }

        let Some(mv) = self.random_move() else {
            return MoveOutcome::NoMoveAvailable;
        };
        self.answered += 1;

        let nodes = self.rng.gen_range(1_000..500_000u64);
        let elapsed = Duration::from_millis(self.rng.gen_range(50..=budget.secs().max(1) * 1000));
        self.last = Some(Telemetry {
            nodes,
            evaluation: Some(format!("{:+.2}", self.rng.gen_range(-300i32..300) as f64 / 100.0)),
            elapsed,
        });
        MoveOutcome::Move(mv)
    }

    fn telemetry(&self) -> Option<Telemetry> {
        self.last.clone()
    }
}

/// Creates one `ScriptedOracle` per game, seeded from the game id.
pub struct SimOracleFactory {
    seed: u64,
    fault: OracleFault,
    created: AtomicU64,
}

impl SimOracleFactory {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            fault: OracleFault::None,
            created: AtomicU64::new(0),
        }
    }

    pub fn with_fault(mut self, fault: OracleFault) -> Self {
        self.fault = fault;
        self
    }

    /// Number of oracles handed out.
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }
}

fn game_seed(seed: u64, game_id: &GameId) -> u64 {
    game_id
        .as_str()
        .bytes()
        .fold(seed, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64))
}

#[async_trait]
impl OracleFactory for SimOracleFactory {
    type Oracle = ScriptedOracle;

    async fn create(&self, game_id: &GameId) -> Result<ScriptedOracle, EnvError> {
        if self.fault == OracleFault::Unavailable {
            return Err(EnvError::engine("engine binary not found"));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedOracle::new(game_seed(self.seed, game_id), self.fault))
    }
}
