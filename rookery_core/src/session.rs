//! Contest Session - the per-contest turn/time-budget state machine.
//!
//! # States
//!
//! ```text
//!                gameFull                status != started, gameFinish,
//! AwaitingFull ───────────► Active ───────────────────────────────────► Ended
//!      │                     │        engine error / error marker (resign)
//!      └─────────────────────┴──── stream closed / not a participant ──► Ended
//! ```
//!
//! A session owns exactly one oracle and talks to the outside world only
//! through its own transport handle. It never touches the pool; the pool
//! learns about the end of a session from the `SessionReport` it returns.

use crate::config::SessionConfig;
use crate::turn::{is_our_turn, think_budget};

use futures_util::StreamExt;
use rookery_env::{
    ChatLine, Clock, Color, GameEvent, GameEventStream, GameFull, GameId, GameState, Move,
    MoveOutcome, Oracle, OracleFactory, Telemetry, ThinkBudget, Transport,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Lifecycle phase of a contest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingFull,
    Active,
    Ended,
}

/// What a contest looks like from the session's point of view.
#[derive(Debug, Clone, PartialEq)]
pub struct ContestState {
    pub game_id: GameId,

    /// Assigned once the full-state notification arrives
    pub color: Option<Color>,

    pub half_moves: usize,

    pub clock: Clock,

    pub progress_enabled: bool,

    pub phase: Phase,
}

impl ContestState {
    pub fn new(game_id: GameId, progress_enabled: bool) -> Self {
        Self {
            game_id,
            color: None,
            half_moves: 0,
            clock: Clock::default(),
            progress_enabled,
            phase: Phase::AwaitingFull,
        }
    }

    /// Returns true if the session should move now.
    pub fn is_our_turn(&self) -> bool {
        match (self.phase, self.color) {
            (Phase::Active, Some(color)) => is_our_turn(color, self.half_moves),
            _ => false,
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The service reported a terminal status (mate, resign, draw, ...)
    Finished { status: String },

    /// We resigned
    Resigned { reason: String },

    /// The game stream ended before a terminal status
    StreamClosed,

    /// The game stream could not be opened or failed before the game started
    StreamFailed { reason: String },

    /// The bot is not one of the two players
    NotParticipant,
}

/// Summary handed back to the pool when a worker finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub game_id: GameId,
    pub color: Option<Color>,
    pub moves_played: u32,
    pub outcome: SessionOutcome,
}

/// Chat commands understood by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatCommand {
    Mute,
    Unmute,
}

/// Parses `m`, `mute` and `unmute` (trimmed, any case).
pub fn parse_chat_command(text: &str) -> Option<ChatCommand> {
    match text.trim().to_ascii_lowercase().as_str() {
        "m" | "mute" => Some(ChatCommand::Mute),
        "unmute" => Some(ChatCommand::Unmute),
        _ => None,
    }
}

/// Formats the progress line posted after a move.
pub fn format_progress(telemetry: &Telemetry) -> String {
    let speed = telemetry
        .nodes_per_second()
        .map(|nps| format!("{:.1} kN/s", nps / 1000.0))
        .unwrap_or_else(|| "n/a".to_string());
    let eval = telemetry.evaluation.as_deref().unwrap_or("?");
    format!(
        "{} nodes in {:.1}s ({}), eval {}",
        telemetry.nodes,
        telemetry.elapsed.as_secs_f64(),
        speed,
        eval
    )
}

/// A running contest.
///
/// Generic over the oracle and transport implementations, so the same
/// state machine runs against lichess or against the simulator.
pub struct ContestSession<O, T>
where
    O: Oracle,
    T: Transport,
{
    state: ContestState,
    config: Arc<SessionConfig>,
    oracle: O,
    transport: Arc<T>,

    /// Half-moves the oracle already knows about (its own moves included)
    oracle_plies: usize,

    /// Half-move count at which we last took a turn
    answered_ply: Option<usize>,

    moves_played: u32,
    outcome: Option<SessionOutcome>,
}

impl<O, T> ContestSession<O, T>
where
    O: Oracle,
    T: Transport,
{
    pub fn new(game_id: GameId, oracle: O, transport: Arc<T>, config: Arc<SessionConfig>) -> Self {
        Self {
            state: ContestState::new(game_id, config.progress_reports),
            config,
            oracle,
            transport,
            oracle_plies: 0,
            answered_ply: None,
            moves_played: 0,
            outcome: None,
        }
    }

    pub fn state(&self) -> &ContestState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn moves_played(&self) -> u32 {
        self.moves_played
    }

    pub fn outcome(&self) -> Option<&SessionOutcome> {
        self.outcome.as_ref()
    }

    /// Processes a single notification and returns the resulting phase.
    pub async fn handle(&mut self, event: GameEvent) -> Phase {
        if self.state.phase == Phase::Ended {
            debug!("Game {} already ended, ignoring {}", self.state.game_id, event.kind());
            return Phase::Ended;
        }

        match event {
            GameEvent::Full(full) => self.on_full(full).await,
            GameEvent::State(state) => match self.state.phase {
                Phase::Active => self.on_state(state).await,
                _ => debug!("Game {}: state before full information, ignored", self.state.game_id),
            },
            GameEvent::Chat(line) => self.on_chat(&line),
            GameEvent::OpponentGone {
                gone,
                claim_win_in_seconds,
            } => {
                info!(
                    "Game {}: opponent gone={} (claim in {:?}s)",
                    self.state.game_id, gone, claim_win_in_seconds
                );
            }
            GameEvent::Error { message } => {
                warn!("Game {} received error: {}", self.state.game_id, message);
                if self.state.phase == Phase::Active {
                    self.resign(format!("transport error: {}", message)).await;
                } else {
                    self.end(SessionOutcome::StreamFailed { reason: message });
                }
            }
            GameEvent::Unknown { kind } => {
                debug!("Game {}: ignoring event of type {}", self.state.game_id, kind);
            }
        }

        self.state.phase
    }

    async fn on_full(&mut self, full: GameFull) {
        if self.state.phase == Phase::Active {
            debug!("Game {}: repeated full information, resyncing", self.state.game_id);
            self.on_state(full.state).await;
            return;
        }

        let Some(color) = full.color_of(&self.config.username) else {
            warn!(
                "Game {}: {} is not playing ({:?} vs {:?})",
                self.state.game_id, self.config.username, full.white.id, full.black.id
            );
            self.end(SessionOutcome::NotParticipant);
            return;
        };

        info!("Game {}: received full game information, playing {}", self.state.game_id, color);
        self.state.color = Some(color);
        self.state.phase = Phase::Active;

        let state = full.state;
        self.state.half_moves = state.half_moves();
        self.state.clock = state.clock;

        if !state.is_in_progress() {
            self.finish(state.status);
            return;
        }

        if color == Color::White && state.half_moves() == 0 {
            let budget = self.config.opening_budget;
            self.take_turn(&state.moves, budget).await;
        } else if self.state.is_our_turn() {
            let budget = think_budget(state.clock.remaining_for(color), self.config.think_proportion);
            self.take_turn(&state.moves, budget).await;
        } else {
            self.sync_oracle(&state.moves).await;
        }
    }

    async fn on_state(&mut self, state: GameState) {
        self.state.half_moves = state.half_moves();
        self.state.clock = state.clock;

        if !state.is_in_progress() {
            self.finish(state.status);
            return;
        }

        if let Some(last) = state.last_move() {
            debug!("Game {}: {} played, {} half moves", self.state.game_id, last, state.half_moves());
        }

        let Some(color) = self.state.color else {
            return;
        };
        if !self.state.is_our_turn() {
            return;
        }
        if self.answered_ply == Some(state.half_moves()) {
            debug!("Game {}: ply {} already answered", self.state.game_id, state.half_moves());
            return;
        }

        let budget = think_budget(state.clock.remaining_for(color), self.config.think_proportion);
        self.take_turn(&state.moves, budget).await;
    }

    fn on_chat(&mut self, line: &ChatLine) {
        if line.username.eq_ignore_ascii_case(&self.config.username) {
            return;
        }
        match parse_chat_command(&line.text) {
            Some(ChatCommand::Mute) => {
                info!("Game {}: progress reports muted by {}", self.state.game_id, line.username);
                self.state.progress_enabled = false;
            }
            Some(ChatCommand::Unmute) => {
                info!("Game {}: progress reports unmuted by {}", self.state.game_id, line.username);
                self.state.progress_enabled = true;
            }
            None => {}
        }
    }

    /// Tells the oracle about every half-move it has not seen yet.
    async fn sync_oracle(&mut self, moves: &[Move]) {
        let unseen = moves.get(self.oracle_plies..).unwrap_or(&[]);
        for mv in unseen {
            self.oracle.register_opponent_move(mv).await;
        }
        self.oracle_plies = self.oracle_plies.max(moves.len());
    }

    async fn take_turn(&mut self, moves: &[Move], budget: ThinkBudget) {
        self.answered_ply = Some(moves.len());
        self.sync_oracle(moves).await;

        debug!("Game {}: thinking for {}", self.state.game_id, budget);
        let deadline = budget.as_duration().saturating_add(self.config.hard_timeout_grace);
        let outcome = match tokio::time::timeout(deadline, self.oracle.request_move(budget)).await {
            Ok(outcome) => outcome,
            Err(_) => MoveOutcome::EngineError(format!(
                "no answer within {}ms",
                deadline.as_millis()
            )),
        };

        match outcome {
            MoveOutcome::Move(mv) => {
                self.oracle_plies += 1;
                match self.transport.submit_move(&self.state.game_id, &mv).await {
                    Ok(()) => {
                        self.moves_played += 1;
                        info!("Game {}: played {}", self.state.game_id, mv);
                        self.report_progress().await;
                    }
                    Err(e) => {
                        error!("Game {}: submitting {} failed: {}", self.state.game_id, mv, e);
                        self.resign(format!("move submission failed: {}", e)).await;
                    }
                }
            }
            MoveOutcome::NoMoveAvailable => {
                info!("Game {}: no move possible", self.state.game_id);
            }
            MoveOutcome::EngineError(reason) => {
                error!("Game {}: encountered engine error: {}", self.state.game_id, reason);
                self.resign(format!("engine error: {}", reason)).await;
            }
        }
    }

    async fn report_progress(&mut self) {
        if !self.state.progress_enabled {
            return;
        }
        let Some(telemetry) = self.oracle.telemetry() else {
            return;
        };
        let text = format_progress(&telemetry);
        if let Err(e) = self.transport.post_message(&self.state.game_id, &text).await {
            debug!("Game {}: progress report not posted: {}", self.state.game_id, e);
        }
    }

    async fn resign(&mut self, reason: String) {
        warn!("Game {}: resigning ({})", self.state.game_id, reason);
        if let Err(e) = self.transport.resign(&self.state.game_id).await {
            warn!("Game {}: resign request failed: {}", self.state.game_id, e);
        }
        self.end(SessionOutcome::Resigned { reason });
    }

    fn finish(&mut self, status: String) {
        info!("Game {} has ended ({})", self.state.game_id, status);
        self.end(SessionOutcome::Finished { status });
    }

    fn end(&mut self, outcome: SessionOutcome) {
        self.state.phase = Phase::Ended;
        self.outcome.get_or_insert(outcome);
    }

    /// Drives the session over its game stream until it ends.
    pub async fn run(mut self, mut events: GameEventStream) -> SessionReport {
        if let Some(greeting) = self.config.greeting.clone() {
            if let Err(e) = self.transport.post_message(&self.state.game_id, &greeting).await {
                debug!("Game {}: greeting not posted: {}", self.state.game_id, e);
            }
        }

        while let Some(item) = events.next().await {
            match item {
                Ok(event) => {
                    if self.handle(event).await == Phase::Ended {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Game {}: stream failed: {}", self.state.game_id, e);
                    if self.state.phase == Phase::Active {
                        self.resign(format!("game stream failed: {}", e)).await;
                    } else {
                        self.end(SessionOutcome::StreamFailed {
                            reason: e.to_string(),
                        });
                    }
                    break;
                }
            }
        }

        if self.state.phase != Phase::Ended {
            info!("Game {}: stream closed", self.state.game_id);
            self.end(SessionOutcome::StreamClosed);
        }
        self.into_report()
    }

    pub fn into_report(self) -> SessionReport {
        SessionReport {
            game_id: self.state.game_id,
            color: self.state.color,
            moves_played: self.moves_played,
            outcome: self.outcome.unwrap_or(SessionOutcome::StreamClosed),
        }
    }
}

/// Creates the oracle, opens the game stream and plays the contest to its end.
///
/// This is the body of every pool worker.
pub async fn play_contest<T, F>(
    game_id: GameId,
    transport: Arc<T>,
    factory: Arc<F>,
    config: Arc<SessionConfig>,
) -> SessionReport
where
    T: Transport,
    F: OracleFactory,
{
    info!("Starting game {}", game_id);

    let oracle = match factory.create(&game_id).await {
        Ok(oracle) => oracle,
        Err(e) => {
            error!("Game {}: oracle unavailable: {}", game_id, e);
            if let Err(e) = transport.resign(&game_id).await {
                warn!("Game {}: resign request failed: {}", game_id, e);
            }
            return SessionReport {
                game_id,
                color: None,
                moves_played: 0,
                outcome: SessionOutcome::Resigned {
                    reason: format!("oracle unavailable: {}", e),
                },
            };
        }
    };

    let events = match transport.stream_game(&game_id).await {
        Ok(events) => events,
        Err(e) => {
            error!("Game {}: could not open game stream: {}", game_id, e);
            return SessionReport {
                game_id,
                color: None,
                moves_played: 0,
                outcome: SessionOutcome::StreamFailed {
                    reason: e.to_string(),
                },
            };
        }
    };

    ContestSession::new(game_id, oracle, transport, config)
        .run(events)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{mv, state, Action, RecordingTransport, ScriptOracle};
    use rookery_env::PlayerInfo;
    use std::time::Duration;

    const BOT: &str = "rookery-bot";

    /// Quiet session: no greeting and no progress lines.
    fn config() -> Arc<SessionConfig> {
        Arc::new(
            SessionConfig::for_user(BOT)
                .with_greeting(None)
                .with_progress_reports(false),
        )
    }

    fn chatty_config() -> Arc<SessionConfig> {
        Arc::new(SessionConfig::for_user(BOT).with_greeting(None))
    }

    fn full(white: &str, black: &str, moves: &[&str]) -> GameEvent {
        GameEvent::Full(GameFull {
            white: PlayerInfo::named(white),
            black: PlayerInfo::named(black),
            initial_ms: Some(600_000),
            increment_ms: Some(0),
            state: state(moves, 600_000, 600_000, "started"),
        })
    }

    fn session(
        oracle: ScriptOracle,
    ) -> (ContestSession<ScriptOracle, RecordingTransport>, Arc<RecordingTransport>) {
        session_with(oracle, config())
    }

    fn session_with(
        oracle: ScriptOracle,
        config: Arc<SessionConfig>,
    ) -> (ContestSession<ScriptOracle, RecordingTransport>, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::default());
        let session = ContestSession::new(GameId::new("g1"), oracle, transport.clone(), config);
        (session, transport)
    }

    fn chat(text: &str) -> GameEvent {
        GameEvent::Chat(ChatLine {
            username: "alice".to_string(),
            room: "player".to_string(),
            text: text.to_string(),
        })
    }

    #[tokio::test]
    async fn test_white_plays_opening_move_on_full() {
        let oracle = ScriptOracle::new(vec![MoveOutcome::Move(mv("e2e4"))]);
        let budgets = oracle.budgets();
        let (mut session, transport) = session(oracle);

        assert_eq!(session.phase(), Phase::AwaitingFull);
        let phase = session.handle(full(BOT, "alice", &[])).await;

        assert_eq!(phase, Phase::Active);
        assert_eq!(session.state().color, Some(Color::White));
        assert_eq!(transport.actions(), vec![Action::Move(GameId::new("g1"), mv("e2e4"))]);
        assert_eq!(budgets.lock().unwrap().as_slice(), &[ThinkBudget::from_secs(5)]);
    }

    #[tokio::test]
    async fn test_black_waits_then_answers_with_clock_budget() {
        let oracle = ScriptOracle::new(vec![MoveOutcome::Move(mv("e7e5"))]);
        let budgets = oracle.budgets();
        let registered = oracle.registered();
        let (mut session, transport) = session(oracle);

        session.handle(full("alice", BOT, &[])).await;
        assert_eq!(session.state().color, Some(Color::Black));
        assert!(transport.actions().is_empty());

        session
            .handle(GameEvent::State(state(&["e2e4"], 600_000, 600_000, "started")))
            .await;

        assert_eq!(registered.lock().unwrap().as_slice(), &[mv("e2e4")]);
        assert_eq!(budgets.lock().unwrap().as_slice(), &[ThinkBudget::from_secs(15)]);
        assert_eq!(transport.actions(), vec![Action::Move(GameId::new("g1"), mv("e7e5"))]);
        assert_eq!(session.moves_played(), 1);
    }

    #[tokio::test]
    async fn test_only_unseen_opponent_moves_are_registered() {
        let oracle = ScriptOracle::new(vec![
            MoveOutcome::Move(mv("e2e4")),
            MoveOutcome::Move(mv("g1f3")),
        ]);
        let registered = oracle.registered();
        let (mut session, _transport) = session(oracle);

        session.handle(full(BOT, "alice", &[])).await;
        // Echo of our own move: not our turn
        session
            .handle(GameEvent::State(state(&["e2e4"], 600_000, 600_000, "started")))
            .await;
        session
            .handle(GameEvent::State(state(&["e2e4", "e7e5"], 595_000, 600_000, "started")))
            .await;

        assert_eq!(registered.lock().unwrap().as_slice(), &[mv("e7e5")]);
        assert_eq!(session.moves_played(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_state_is_answered_once() {
        let oracle = ScriptOracle::new(vec![MoveOutcome::Move(mv("e7e5")), MoveOutcome::Move(mv("d7d5"))]);
        let (mut session, transport) = session(oracle);

        session.handle(full("alice", BOT, &[])).await;
        let same = state(&["e2e4"], 600_000, 600_000, "started");
        session.handle(GameEvent::State(same.clone())).await;
        session.handle(GameEvent::State(same)).await;

        assert_eq!(transport.actions().len(), 1);
    }

    #[tokio::test]
    async fn test_engine_error_resigns_exactly_once() {
        let oracle = ScriptOracle::new(vec![MoveOutcome::EngineError("crashed".to_string())]);
        let requests = oracle.requests();
        let (mut session, transport) = session(oracle);

        session.handle(full("alice", BOT, &[])).await;
        let phase = session
            .handle(GameEvent::State(state(&["e2e4"], 600_000, 600_000, "started")))
            .await;
        assert_eq!(phase, Phase::Ended);

        // Further notifications cause no more requests or resigns
        session
            .handle(GameEvent::State(state(&["e2e4", "e7e5", "d2d4"], 600_000, 600_000, "started")))
            .await;

        assert_eq!(transport.actions(), vec![Action::Resign(GameId::new("g1"))]);
        assert_eq!(*requests.lock().unwrap(), 1);
        assert!(matches!(session.outcome(), Some(SessionOutcome::Resigned { .. })));
    }

    #[tokio::test]
    async fn test_no_move_available_keeps_waiting() {
        let oracle = ScriptOracle::new(vec![MoveOutcome::NoMoveAvailable]);
        let (mut session, transport) = session(oracle);

        session.handle(full("alice", BOT, &[])).await;
        let phase = session
            .handle(GameEvent::State(state(&["f2f3"], 600_000, 600_000, "started")))
            .await;

        assert_eq!(phase, Phase::Active);
        assert!(transport.actions().is_empty());
        assert!(session.outcome().is_none());
    }

    #[tokio::test]
    async fn test_terminal_status_ends_session() {
        let (mut session, transport) = session(ScriptOracle::new(vec![]));

        session.handle(full("alice", BOT, &[])).await;
        let phase = session
            .handle(GameEvent::State(state(&["f2f3", "e7e5", "g2g4", "d8h4"], 1, 1, "mate")))
            .await;

        assert_eq!(phase, Phase::Ended);
        assert_eq!(
            session.outcome(),
            Some(&SessionOutcome::Finished {
                status: "mate".to_string()
            })
        );
        assert!(transport.actions().is_empty());
    }

    #[tokio::test]
    async fn test_mute_unmute_toggles_reporting_only() {
        let oracle = ScriptOracle::new(vec![MoveOutcome::Move(mv("e7e5")), MoveOutcome::Move(mv("b8c6"))]);
        let requests = oracle.requests();
        let (mut session, transport) = session_with(oracle, chatty_config());
        session.handle(full("alice", BOT, &[])).await;

        assert!(session.state().progress_enabled);
        assert_eq!(session.handle(chat("mute")).await, Phase::Active);
        assert!(!session.state().progress_enabled);

        session
            .handle(GameEvent::State(state(&["e2e4"], 600_000, 600_000, "started")))
            .await;
        // Muted: only the move, no progress line
        assert_eq!(transport.actions().len(), 1);

        assert_eq!(session.handle(chat("unmute")).await, Phase::Active);
        assert!(session.state().progress_enabled);
        assert_eq!(session.state().half_moves, 1);
        // The toggle does not re-answer the ply already played
        assert_eq!(*requests.lock().unwrap(), 1);
        assert_eq!(transport.actions().len(), 1);

        session
            .handle(GameEvent::State(state(&["e2e4", "e7e5", "g1f3"], 600_000, 600_000, "started")))
            .await;
        let actions = transport.actions();
        assert_eq!(actions.len(), 3);
        assert!(matches!(&actions[2], Action::Chat(_, text) if text.contains("nodes")));
    }

    #[tokio::test]
    async fn test_own_chat_lines_are_ignored() {
        let (mut session, _transport) = session(ScriptOracle::new(vec![]));
        session
            .handle(GameEvent::Chat(ChatLine {
                username: BOT.to_string(),
                room: "player".to_string(),
                text: "mute".to_string(),
            }))
            .await;
        assert!(session.state().progress_enabled);
    }

    #[tokio::test]
    async fn test_error_marker_while_active_resigns() {
        let (mut session, transport) = session(ScriptOracle::new(vec![]));
        session.handle(full("alice", BOT, &[])).await;

        let phase = session
            .handle(GameEvent::Error {
                message: "boom".to_string(),
            })
            .await;

        assert_eq!(phase, Phase::Ended);
        assert_eq!(transport.actions(), vec![Action::Resign(GameId::new("g1"))]);
    }

    #[tokio::test]
    async fn test_error_marker_before_full_ends_without_resign() {
        let (mut session, transport) = session(ScriptOracle::new(vec![]));
        let phase = session
            .handle(GameEvent::Error {
                message: "boom".to_string(),
            })
            .await;

        assert_eq!(phase, Phase::Ended);
        assert!(transport.actions().is_empty());
    }

    #[tokio::test]
    async fn test_not_participant_ends() {
        let (mut session, transport) = session(ScriptOracle::new(vec![]));
        let phase = session.handle(full("alice", "carol", &[])).await;

        assert_eq!(phase, Phase::Ended);
        assert_eq!(session.outcome(), Some(&SessionOutcome::NotParticipant));
        assert!(transport.actions().is_empty());
    }

    #[tokio::test]
    async fn test_submit_failure_resigns() {
        let oracle = ScriptOracle::new(vec![MoveOutcome::Move(mv("e2e4"))]);
        let (mut session, transport) = session(oracle);
        transport.fail_submits(true);

        let phase = session.handle(full(BOT, "alice", &[])).await;

        assert_eq!(phase, Phase::Ended);
        assert_eq!(transport.actions(), vec![Action::Resign(GameId::new("g1"))]);
    }

    #[tokio::test]
    async fn test_resumed_game_moves_with_clock_budget() {
        let oracle = ScriptOracle::new(vec![MoveOutcome::Move(mv("g1f3"))]);
        let registered = oracle.registered();
        let budgets = oracle.budgets();
        let (mut session, transport) = session(oracle);

        session.handle(full(BOT, "alice", &["e2e4", "e7e5"])).await;

        assert_eq!(registered.lock().unwrap().as_slice(), &[mv("e2e4"), mv("e7e5")]);
        assert_eq!(budgets.lock().unwrap().as_slice(), &[ThinkBudget::from_secs(15)]);
        assert_eq!(transport.actions().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_oracle_counts_as_engine_error() {
        let oracle = ScriptOracle::hanging();
        let transport = Arc::new(RecordingTransport::default());
        let config = Arc::new(
            SessionConfig::for_user(BOT)
                .with_greeting(None)
                .with_hard_timeout_grace(Duration::from_secs(1)),
        );
        let mut session = ContestSession::new(GameId::new("g1"), oracle, transport.clone(), config);

        let phase = session.handle(full(BOT, "alice", &[])).await;

        assert_eq!(phase, Phase::Ended);
        assert_eq!(transport.actions(), vec![Action::Resign(GameId::new("g1"))]);
    }

    #[tokio::test]
    async fn test_run_posts_greeting_and_reports_stream_close() {
        let transport = Arc::new(RecordingTransport::default());
        transport.script_game(
            GameId::new("g1"),
            vec![
                full("alice", BOT, &[]),
                GameEvent::State(state(&["e2e4"], 600_000, 600_000, "started")),
            ],
        );
        let oracle = ScriptOracle::new(vec![MoveOutcome::Move(mv("c7c5"))]);
        let config = Arc::new(SessionConfig::for_user(BOT).with_progress_reports(false));
        let session = ContestSession::new(GameId::new("g1"), oracle, transport.clone(), config);
        let events = transport.stream_game(&GameId::new("g1")).await.unwrap();

        let report = session.run(events).await;

        assert_eq!(report.outcome, SessionOutcome::StreamClosed);
        assert_eq!(report.moves_played, 1);
        assert_eq!(report.color, Some(Color::Black));
        assert_eq!(
            transport.actions(),
            vec![
                Action::Chat(GameId::new("g1"), "Hello there!".to_string()),
                Action::Move(GameId::new("g1"), mv("c7c5")),
            ]
        );
    }

    #[tokio::test]
    async fn test_progress_line_follows_each_move() {
        let oracle = ScriptOracle::new(vec![MoveOutcome::Move(mv("e7e5"))]);
        let (mut session, transport) = session_with(oracle, chatty_config());

        session.handle(full("alice", BOT, &[])).await;
        session
            .handle(GameEvent::State(state(&["e2e4"], 600_000, 600_000, "started")))
            .await;

        assert_eq!(
            transport.actions(),
            vec![
                Action::Move(GameId::new("g1"), mv("e7e5")),
                Action::Chat(
                    GameId::new("g1"),
                    "12000 nodes in 1.0s (12.0 kN/s), eval +0.10".to_string()
                ),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_progress_post_is_ignored() {
        let oracle = ScriptOracle::new(vec![MoveOutcome::Move(mv("e7e5")), MoveOutcome::Move(mv("g8f6"))]);
        let (mut session, transport) = session_with(oracle, chatty_config());
        transport.fail_chat(true);

        session.handle(full("alice", BOT, &[])).await;
        let phase = session
            .handle(GameEvent::State(state(&["e2e4"], 600_000, 600_000, "started")))
            .await;

        assert_eq!(phase, Phase::Active);
        assert_eq!(session.moves_played(), 1);
        assert!(session.outcome().is_none());
        assert_eq!(transport.actions(), vec![Action::Move(GameId::new("g1"), mv("e7e5"))]);

        // Play continues on the next ply
        session
            .handle(GameEvent::State(state(&["e2e4", "e7e5", "g1f3"], 600_000, 600_000, "started")))
            .await;
        assert_eq!(session.moves_played(), 2);
    }

    #[tokio::test]
    async fn test_failed_greeting_does_not_stop_the_game() {
        let transport = Arc::new(RecordingTransport::default());
        transport.fail_chat(true);
        transport.script_game(
            GameId::new("g1"),
            vec![
                full(BOT, "alice", &[]),
                GameEvent::State(state(&["e2e4", "e7e5"], 600_000, 600_000, "started")),
                GameEvent::State(state(&["e2e4", "e7e5", "g1f3", "b8c6"], 600_000, 600_000, "resign")),
            ],
        );
        let oracle = ScriptOracle::new(vec![MoveOutcome::Move(mv("e2e4")), MoveOutcome::Move(mv("g1f3"))]);
        let config = Arc::new(SessionConfig::for_user(BOT));
        let session = ContestSession::new(GameId::new("g1"), oracle, transport.clone(), config);
        let events = transport.stream_game(&GameId::new("g1")).await.unwrap();

        let report = session.run(events).await;

        assert_eq!(report.moves_played, 2);
        assert_eq!(
            report.outcome,
            SessionOutcome::Finished {
                status: "resign".to_string()
            }
        );
        assert!(!transport
            .actions()
            .iter()
            .any(|a| matches!(a, Action::Chat(..) | Action::Resign(_))));
    }

    #[tokio::test]
    async fn test_failed_resign_still_ends_session() {
        let oracle = ScriptOracle::new(vec![MoveOutcome::EngineError("crashed".to_string())]);
        let requests = oracle.requests();
        let (mut session, transport) = session(oracle);
        transport.fail_resign(true);

        let phase = session.handle(full(BOT, "alice", &[])).await;
        assert_eq!(phase, Phase::Ended);

        session
            .handle(GameEvent::State(state(&["e2e4", "e7e5"], 600_000, 600_000, "started")))
            .await;

        assert_eq!(transport.actions(), vec![Action::Resign(GameId::new("g1"))]);
        assert_eq!(*requests.lock().unwrap(), 1);
        assert!(matches!(session.outcome(), Some(SessionOutcome::Resigned { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_budget_does_not_overflow_deadline() {
        let oracle = ScriptOracle::new(vec![MoveOutcome::Move(mv("e7e5"))]);
        let config = Arc::new(
            SessionConfig::for_user(BOT)
                .with_greeting(None)
                .with_progress_reports(false)
                .with_think_proportion(1e30),
        );
        let budgets = oracle.budgets();
        let (mut session, transport) = session_with(oracle, config);

        session.handle(full("alice", BOT, &[])).await;
        session
            .handle(GameEvent::State(state(&["e2e4"], 600_000, 600_000, "started")))
            .await;

        assert_eq!(budgets.lock().unwrap().as_slice(), &[ThinkBudget::from_secs(u64::MAX)]);
        assert_eq!(transport.actions(), vec![Action::Move(GameId::new("g1"), mv("e7e5"))]);
    }

    #[test]
    fn test_parse_chat_command() {
        assert_eq!(parse_chat_command("m"), Some(ChatCommand::Mute));
        assert_eq!(parse_chat_command(" MUTE "), Some(ChatCommand::Mute));
        assert_eq!(parse_chat_command("unmute"), Some(ChatCommand::Unmute));
        assert_eq!(parse_chat_command("good game"), None);
    }

    #[test]
    fn test_format_progress() {
        let line = format_progress(&Telemetry {
            nodes: 250_000,
            evaluation: Some("+0.35".to_string()),
            elapsed: Duration::from_millis(2500),
        });
        assert_eq!(line, "250000 nodes in 2.5s (100.0 kN/s), eval +0.35");
    }
}
