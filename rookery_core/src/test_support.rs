//! In-memory collaborators for unit tests.

use async_trait::async_trait;
use futures_util::stream;
use rookery_env::{
    Clock, EnvError, EventStream, GameEvent, GameEventStream, GameId, GameState, Move,
    MoveOutcome, OfferId, Oracle, OracleFactory, Telemetry, ThinkBudget, Transport,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn mv(token: &str) -> Move {
    token.parse().unwrap()
}

pub fn state(moves: &[&str], white_ms: u64, black_ms: u64, status: &str) -> GameState {
    GameState::new(
        moves.iter().map(|m| mv(m)).collect(),
        Clock::new(white_ms, black_ms),
        status,
    )
}

/// Outbound requests observed by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Accept(OfferId),
    Decline(OfferId),
    Move(GameId, Move),
    Resign(GameId),
    Chat(GameId, String),
}

#[derive(Default)]
pub struct RecordingTransport {
    actions: Mutex<Vec<Action>>,
    failing_accepts: Mutex<HashSet<OfferId>>,
    fail_submits: AtomicBool,
    fail_chat: AtomicBool,
    fail_resign: AtomicBool,
    games: Mutex<HashMap<GameId, Vec<GameEvent>>>,
}

impl RecordingTransport {
    pub fn actions(&self) -> Vec<Action> {
        self.actions.lock().unwrap().clone()
    }

    pub fn accepted(&self) -> Vec<OfferId> {
        self.actions()
            .into_iter()
            .filter_map(|a| match a {
                Action::Accept(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn fail_accept(&self, id: &str) {
        self.failing_accepts.lock().unwrap().insert(OfferId::new(id));
    }

    pub fn fail_submits(&self, fail: bool) {
        self.fail_submits.store(fail, Ordering::SeqCst);
    }

    /// Chat posts fail and are not recorded.
    pub fn fail_chat(&self, fail: bool) {
        self.fail_chat.store(fail, Ordering::SeqCst);
    }

    /// Resign requests are recorded, then fail.
    pub fn fail_resign(&self, fail: bool) {
        self.fail_resign.store(fail, Ordering::SeqCst);
    }

    pub fn script_game(&self, game_id: GameId, events: Vec<GameEvent>) {
        self.games.lock().unwrap().insert(game_id, events);
    }

    fn record(&self, action: Action) {
        self.actions.lock().unwrap().push(action);
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn stream_events(&self) -> Result<EventStream, EnvError> {
        Ok(Box::pin(stream::empty()))
    }

    async fn stream_game(&self, game_id: &GameId) -> Result<GameEventStream, EnvError> {
        let events = self.games.lock().unwrap().remove(game_id).unwrap_or_default();
        Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
    }

    async fn respond_to_offer(&self, offer_id: &OfferId, accept: bool) -> Result<(), EnvError> {
        if accept && self.failing_accepts.lock().unwrap().contains(offer_id) {
            return Err(EnvError::Rejected {
                status: 404,
                body: "challenge not found".to_string(),
            });
        }
        self.record(if accept {
            Action::Accept(offer_id.clone())
        } else {
            Action::Decline(offer_id.clone())
        });
        Ok(())
    }

    async fn submit_move(&self, game_id: &GameId, mv: &Move) -> Result<(), EnvError> {
        if self.fail_submits.load(Ordering::SeqCst) {
            return Err(EnvError::Rejected {
                status: 400,
                body: "illegal move".to_string(),
            });
        }
        self.record(Action::Move(game_id.clone(), mv.clone()));
        Ok(())
    }

    async fn resign(&self, game_id: &GameId) -> Result<(), EnvError> {
        self.record(Action::Resign(game_id.clone()));
        if self.fail_resign.load(Ordering::SeqCst) {
            return Err(EnvError::transport("connection reset"));
        }
        Ok(())
    }

    async fn post_message(&self, game_id: &GameId, text: &str) -> Result<(), EnvError> {
        if self.fail_chat.load(Ordering::SeqCst) {
            return Err(EnvError::Rejected {
                status: 429,
                body: "too many requests".to_string(),
            });
        }
        self.record(Action::Chat(game_id.clone(), text.to_string()));
        Ok(())
    }
}

/// Oracle answering from a fixed script; `NoMoveAvailable` once exhausted.
pub struct ScriptOracle {
    outcomes: VecDeque<MoveOutcome>,
    hang: bool,
    registered: Arc<Mutex<Vec<Move>>>,
    budgets: Arc<Mutex<Vec<ThinkBudget>>>,
    requests: Arc<Mutex<usize>>,
}

impl ScriptOracle {
    pub fn new(outcomes: Vec<MoveOutcome>) -> Self {
        Self {
            outcomes: outcomes.into(),
            hang: false,
            registered: Arc::default(),
            budgets: Arc::default(),
            requests: Arc::default(),
        }
    }

    /// An oracle that never answers.
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::new(vec![])
        }
    }

    pub fn registered(&self) -> Arc<Mutex<Vec<Move>>> {
        self.registered.clone()
    }

    pub fn budgets(&self) -> Arc<Mutex<Vec<ThinkBudget>>> {
        self.budgets.clone()
    }

    pub fn requests(&self) -> Arc<Mutex<usize>> {
        self.requests.clone()
    }
}

#[async_trait]
impl Oracle for ScriptOracle {
    async fn register_opponent_move(&mut self, mv: &Move) {
        self.registered.lock().unwrap().push(mv.clone());
    }

    async fn request_move(&mut self, budget: ThinkBudget) -> MoveOutcome {
        *self.requests.lock().unwrap() += 1;
        self.budgets.lock().unwrap().push(budget);
        if self.hang {
            std::future::pending::<()>().await;
        }
        self.outcomes.pop_front().unwrap_or(MoveOutcome::NoMoveAvailable)
    }

    fn telemetry(&self) -> Option<Telemetry> {
        Some(Telemetry {
            nodes: 12_000,
            evaluation: Some("+0.10".to_string()),
            elapsed: Duration::from_secs(1),
        })
    }
}

/// Hands out `ScriptOracle`s playing the same move list.
#[derive(Default)]
pub struct ScriptFactory {
    moves: Vec<MoveOutcome>,
    fail: bool,
}

impl ScriptFactory {
    pub fn playing(moves: &[&str]) -> Self {
        Self {
            moves: moves.iter().map(|m| MoveOutcome::Move(mv(m))).collect(),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            moves: vec![],
            fail: true,
        }
    }
}

#[async_trait]
impl OracleFactory for ScriptFactory {
    type Oracle = ScriptOracle;

    async fn create(&self, _game_id: &GameId) -> Result<ScriptOracle, EnvError> {
        if self.fail {
            return Err(EnvError::engine("engine binary missing"));
        }
        Ok(ScriptOracle::new(self.moves.clone()))
    }
}
