//! Scenario runner - executes chaos scenarios against the real dispatcher.
//!
//! Every scenario runs on a fresh current-thread Tokio runtime with a paused
//! clock, so session deadlines elapse instantly and runs are reproducible
//! from the seed alone.

use crate::context::SimContext;
use crate::oracle::{OracleFault, SimOracleFactory};
use crate::scenarios::ScenarioId;
use crate::transport::{OpponentStep, SimAction, SimTransport};

use rookery_core::{BotConfig, Dispatcher, PoolConfig, SessionConfig, SessionLauncher};
use rookery_env::{BotContext, ChallengeInfo, Color, Event, Move, OfferId, Transport};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Account name the simulated bot plays under.
pub const SIM_BOT: &str = "rookery-sim";

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Virtual time on the simulation clock at the end of the run
    pub final_time_secs: f64,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMetrics {
    /// Challenge events seen by the dispatcher
    pub offers: u64,

    pub accepted: usize,

    pub declined: usize,

    /// Games closed by the simulated service
    pub games_finished: usize,

    /// Moves submitted by the bot
    pub moves: usize,

    pub resigns: usize,

    /// Chat lines posted by the bot (greetings and progress)
    pub chat_lines: usize,

    /// Most games in play at once
    pub max_concurrent: usize,

    /// Account stream reconnects
    pub reconnects: u64,
}

type SimDispatcher = Dispatcher<SimContext, SimTransport, SessionLauncher<SimTransport, SimOracleFactory>>;

/// Per-scenario wiring choices.
struct Setup {
    pool: PoolConfig,
    fault: OracleFault,
}

/// One dispatcher wired to the simulated service.
struct Harness {
    context: Arc<SimContext>,
    transport: Arc<SimTransport>,
    dispatcher: SimDispatcher,
    capacity: usize,
    next_offer: u64,
    reconnects: u64,
}

impl Harness {
    fn new(context: Arc<SimContext>, setup: Setup) -> Self {
        let transport = Arc::new(SimTransport::new(context.clone()));
        let factory = Arc::new(SimOracleFactory::new(context.seed()).with_fault(setup.fault));
        let capacity = setup.pool.capacity;
        let config = BotConfig {
            session: SessionConfig::for_user(SIM_BOT),
            pool: setup.pool,
            ..BotConfig::default()
        };
        let dispatcher = Dispatcher::with_sessions(context.clone(), transport.clone(), factory, config);

        Self {
            context,
            transport,
            dispatcher,
            capacity,
            next_offer: 0,
            reconnects: 0,
        }
    }

    fn random_move(&self) -> Option<Move> {
        let square = |ctx: &SimContext| {
            let file = (b'a' + ctx.gen_range(0, 8) as u8) as char;
            let rank = (b'1' + ctx.gen_range(0, 8) as u8) as char;
            format!("{file}{rank}")
        };
        format!("{}{}", square(&self.context), square(&self.context)).parse().ok()
    }

    fn random_color(&self) -> Color {
        if self.context.gen_range(0, 2) == 0 {
            Color::White
        } else {
            Color::Black
        }
    }

    /// Opponent script of `replies` moves.
    fn replies(&self, replies: u64) -> Vec<OpponentStep> {
        (0..replies)
            .filter_map(|_| self.random_move())
            .map(OpponentStep::Move)
            .collect()
    }

    fn next_id(&mut self) -> OfferId {
        self.next_offer += 1;
        OfferId::new(format!("g{:04}", self.next_offer))
    }

    fn challenge(&self, id: &OfferId, challenger: &str, variant: &str) {
        self.transport.push_event(Event::Challenge(ChallengeInfo {
            id: id.clone(),
            challenger: challenger.to_string(),
            variant: variant.to_string(),
            rated: self.context.gen_range(0, 2) == 1,
            speed: "blitz".to_string(),
        }));
    }

    /// Hosts a game with a scripted opponent and announces the offer.
    fn offer_game(&mut self, color: Color, steps: Vec<OpponentStep>) -> OfferId {
        let id = self.next_id();
        self.transport.host_game(&id.game_id(), SIM_BOT, color, "sparring", steps);
        self.challenge(&id, "sparring", "standard");
        id
    }

    /// Hosts a game of random color and length (at least one reply).
    fn offer_random_game(&mut self, min_replies: u64) -> OfferId {
        let color = self.random_color();
        let steps = self.replies(min_replies.max(1) + self.context.gen_range(0, 5));
        self.offer_game(color, steps)
    }

    /// Runs the dispatcher until `games` hosted games have closed, reconnecting
    /// whenever the account stream breaks, then drains the pool.
    async fn run_until_finished(&mut self, games: usize) -> Result<(), String> {
        let transport = self.transport.clone();
        let done = transport.wait_for_finished(games);
        tokio::pin!(done);
        let deadline = tokio::time::sleep(Duration::from_secs(3_600));
        tokio::pin!(deadline);

        loop {
            let events = self.transport.stream_events().await.map_err(|e| e.to_string())?;
            tokio::select! {
                biased;

                result = self.dispatcher.run_stream(events) => match result {
                    Ok(()) => return Err("account stream ended".to_string()),
                    Err(e) => {
                        self.reconnects += 1;
                        debug!("Reconnecting after: {}", e);
                    }
                },
                _ = &mut done => break,
                _ = &mut deadline => {
                    return Err(format!(
                        "timed out with {}/{} games finished",
                        self.transport.finished().len(),
                        games
                    ));
                }
            }
        }

        self.dispatcher.drain().await;
        Ok(())
    }

    fn metrics(&self) -> ScenarioMetrics {
        let actions = self.transport.actions();
        let count = |f: fn(&SimAction) -> bool| actions.iter().filter(|a| f(a)).count();

        ScenarioMetrics {
            offers: self.dispatcher.stats().offers,
            accepted: count(|a| matches!(a, SimAction::Accept(_))),
            declined: count(|a| matches!(a, SimAction::Decline(_))),
            games_finished: self.transport.finished().len(),
            moves: count(|a| matches!(a, SimAction::Move(..))),
            resigns: count(|a| matches!(a, SimAction::Resign(_))),
            chat_lines: count(|a| matches!(a, SimAction::Chat(..))),
            max_concurrent: self.transport.max_concurrent(),
            reconnects: self.reconnects,
        }
    }

    /// Bot moves and resigns in one game.
    fn tally(&self, id: &OfferId) -> (usize, usize) {
        let actions = self.transport.game_actions(&id.game_id());
        let moves = actions.iter().filter(|a| matches!(a, SimAction::Move(..))).count();
        let resigns = actions.iter().filter(|a| matches!(a, SimAction::Resign(_))).count();
        (moves, resigns)
    }

    fn check_pool_empty(&self) -> Result<(), String> {
        let pool = self.dispatcher.pool();
        ensure(pool.occupied() == 0, format!("{} slots still bound after drain", pool.occupied()))?;
        ensure(
            pool.stats().crashed == 0,
            format!("{} workers exited without a report", pool.stats().crashed),
        )
    }
}

fn ensure(condition: bool, reason: impl Into<String>) -> Result<(), String> {
    if condition {
        Ok(())
    } else {
        Err(reason.into())
    }
}

/// Runs chaos scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build();

        match runtime {
            Ok(runtime) => runtime.block_on(self.run_async(scenario)),
            Err(e) => ScenarioResult {
                scenario,
                seed: self.seed,
                passed: false,
                final_time_secs: 0.0,
                failure_reason: Some(format!("runtime: {}", e)),
                metrics: ScenarioMetrics::default(),
            },
        }
    }

    fn setup(&self, scenario: ScenarioId, context: &SimContext) -> Setup {
        let capacity = 1 + context.gen_range(0, 3) as usize;
        let pool = PoolConfig::default().with_capacity(capacity);
        let fault = match scenario {
            ScenarioId::EngineFailure => OracleFault::ErrorAfter(context.gen_range(0, 3) as u32),
            ScenarioId::EngineHang => OracleFault::HangAfter(context.gen_range(0, 3) as u32),
            _ => OracleFault::None,
        };
        Setup { pool, fault }
    }

    async fn run_async(&self, scenario: ScenarioId) -> ScenarioResult {
        let context = SimContext::shared(self.seed);
        let setup = self.setup(scenario, &context);
        let fault = setup.fault;
        let mut harness = Harness::new(context, setup);

        let verdict = match scenario {
            ScenarioId::CapacityOverflow => self.run_capacity_overflow(&mut harness).await,
            ScenarioId::FifoOrder => self.run_fifo_order(&mut harness).await,
            ScenarioId::PolicyFilter => self.run_policy_filter(&mut harness).await,
            ScenarioId::EngineFailure | ScenarioId::EngineHang => {
                self.run_engine_fault(&mut harness, fault).await
            }
            ScenarioId::MuteToggle => self.run_mute_toggle(&mut harness).await,
            ScenarioId::ErrorMarker => self.run_error_marker(&mut harness).await,
            ScenarioId::AcceptFailure => self.run_accept_failure(&mut harness).await,
            ScenarioId::Reconnect => self.run_reconnect(&mut harness).await,
            ScenarioId::SettleThrottle => self.run_settle_throttle(&mut harness).await,
            ScenarioId::RejectedMoves => self.run_rejected_moves(&mut harness).await,
        };

        let metrics = harness.metrics();
        debug!("Metrics: {:?}", metrics);

        ScenarioResult {
            scenario,
            seed: self.seed,
            passed: verdict.is_ok(),
            final_time_secs: harness.context.now().as_secs_f64(),
            failure_reason: verdict.err(),
            metrics,
        }
    }

    /// SIM-001: more offers than slots.
    async fn run_capacity_overflow(&self, h: &mut Harness) -> Result<(), String> {
        let games = h.capacity + 2 + h.context.gen_range(0, 4) as usize;
        for _ in 0..games {
            h.offer_random_game(1);
        }
        info!("  {} offers into {} slots", games, h.capacity);

        h.run_until_finished(games).await?;

        let metrics = h.metrics();
        ensure(
            metrics.max_concurrent <= h.capacity,
            format!("{} games in play with capacity {}", metrics.max_concurrent, h.capacity),
        )?;
        ensure(metrics.accepted == games, format!("accepted {}/{} offers", metrics.accepted, games))?;
        ensure(
            h.dispatcher.pool().stats().completed == games as u64,
            "not every worker reported completion",
        )?;
        h.check_pool_empty()
    }

    /// SIM-002: accepts follow arrival order, duplicates are dropped.
    async fn run_fifo_order(&self, h: &mut Harness) -> Result<(), String> {
        let games = 3 + h.context.gen_range(0, 5) as usize;
        let mut order = Vec::new();
        for _ in 0..games {
            let id = h.offer_random_game(0);
            order.push(id.clone());

            // Repeat notifications and noise must not disturb the queue
            if h.context.gen_range(0, 3) == 0 {
                h.challenge(&id, "sparring", "standard");
            }
            if h.context.gen_range(0, 3) == 0 {
                h.transport.push_event(Event::Unknown {
                    kind: "gameStateUnknown".to_string(),
                });
            }
        }

        h.run_until_finished(games).await?;

        let accepted = h.transport.accepted();
        ensure(accepted == order, format!("accept order {:?} != arrival order {:?}", accepted, order))?;
        h.check_pool_empty()
    }

    /// SIM-003: declined offers never reach the queue.
    async fn run_policy_filter(&self, h: &mut Harness) -> Result<(), String> {
        let mut wanted = Vec::new();
        let mut unwanted = Vec::new();

        for round in 0..4 {
            wanted.push(h.offer_random_game(0));

            let id = h.next_id();
            if round % 2 == 0 {
                h.challenge(&id, "sparring", "chess960");
            } else {
                h.challenge(&id, SIM_BOT, "standard");
            }
            unwanted.push(id);
        }

        h.run_until_finished(wanted.len()).await?;

        let actions = h.transport.actions();
        for id in &unwanted {
            ensure(
                actions.contains(&SimAction::Decline(id.clone())),
                format!("offer {} was not declined", id),
            )?;
        }
        ensure(h.transport.accepted() == wanted, "accepted offers differ from the acceptable ones")?;
        ensure(h.dispatcher.stats().declined == unwanted.len() as u64, "decline count mismatch")
    }

    /// SIM-004 / SIM-005: engine failures resign exactly once per game.
    async fn run_engine_fault(&self, h: &mut Harness, fault: OracleFault) -> Result<(), String> {
        let good_moves = match fault {
            OracleFault::ErrorAfter(n) | OracleFault::HangAfter(n) => n as usize,
            _ => 0,
        };
        let games = 1 + h.context.gen_range(0, 3) as usize;
        let ids: Vec<OfferId> = (0..games)
            .map(|_| h.offer_random_game(good_moves as u64 + 2))
            .collect();

        h.run_until_finished(games).await?;

        for id in &ids {
            let (moves, resigns) = h.tally(id);
            ensure(moves == good_moves, format!("{}: {} moves, expected {}", id, moves, good_moves))?;
            ensure(resigns == 1, format!("{}: {} resigns", id, resigns))?;

            let actions = h.transport.game_actions(&id.game_id());
            let resign_at = actions.iter().position(|a| matches!(a, SimAction::Resign(_)));
            let last_move = actions.iter().rposition(|a| matches!(a, SimAction::Move(..)));
            if let (Some(resign), Some(mv)) = (resign_at, last_move) {
                ensure(mv < resign, format!("{}: move submitted after resign", id))?;
            }
        }
        h.check_pool_empty()
    }

    /// SIM-006: mute and unmute only affect progress lines.
    async fn run_mute_toggle(&self, h: &mut Harness) -> Result<(), String> {
        // mute, reply, reply, unmute, reply
        let mut steps = h.replies(3);
        steps.insert(0, OpponentStep::Say("mute".to_string()));
        steps.insert(3, OpponentStep::Say(" UNMUTE ".to_string()));
        let id = h.offer_game(Color::White, steps);

        h.run_until_finished(1).await?;

        let actions = h.transport.game_actions(&id.game_id());
        let progress = actions
            .iter()
            .filter(|a| matches!(a, SimAction::Chat(_, text) if text.contains(" nodes in ")))
            .count();
        let (moves, resigns) = h.tally(&id);

        // Reports after moves 1 and 4; moves 2 and 3 were muted
        ensure(moves == 4, format!("{} moves, expected 4", moves))?;
        ensure(progress == 2, format!("{} progress lines, expected 2", progress))?;
        ensure(resigns == 0, "bot resigned a won game")
    }

    /// SIM-007: error marker resigns the active game.
    async fn run_error_marker(&self, h: &mut Harness) -> Result<(), String> {
        let mut steps = h.replies(1);
        steps.push(OpponentStep::Fail("internal error".to_string()));
        let id = h.offer_game(Color::White, steps);
        let bystander = h.offer_random_game(1);

        h.run_until_finished(2).await?;

        let (moves, resigns) = h.tally(&id);
        ensure(moves == 2, format!("{} moves before the error, expected 2", moves))?;
        ensure(resigns == 1, format!("{} resigns, expected 1", resigns))?;

        // The other game is unaffected
        let (_, bystander_resigns) = h.tally(&bystander);
        ensure(bystander_resigns == 0, "error leaked into another game")
    }

    /// SIM-008: a rejected accept drops only that offer.
    async fn run_accept_failure(&self, h: &mut Harness) -> Result<(), String> {
        let games = 3 + h.context.gen_range(0, 3) as usize;
        // Never last: a later offer can only be accepted after the failing
        // one was tried, so finishing every expected game implies the attempt
        let failing = h.context.gen_range(0, games as u64 - 1) as usize;
        let mut expected = Vec::new();

        for i in 0..games {
            let id = h.offer_random_game(0);
            if i == failing {
                h.transport.fail_accept(&id);
            } else {
                expected.push(id);
            }
        }

        h.run_until_finished(expected.len()).await?;

        ensure(h.transport.accepted() == expected, "accepted offers differ from expected")?;
        ensure(h.dispatcher.pool().stats().accept_failures == 1, "accept failure not counted")?;
        ensure(h.dispatcher.pool().queue_len() == 0, "failed offer left in queue")?;
        h.check_pool_empty()
    }

    /// SIM-009: the pool survives an account stream reconnect.
    async fn run_reconnect(&self, h: &mut Harness) -> Result<(), String> {
        let mut order = vec![h.offer_random_game(3), h.offer_random_game(3)];
        h.transport.break_event_stream("connection reset by peer");
        order.push(h.offer_random_game(0));
        order.push(h.offer_random_game(0));

        h.run_until_finished(order.len()).await?;

        ensure(h.reconnects >= 1, "stream break did not trigger a reconnect")?;
        ensure(h.transport.accepted() == order, "accept order changed across the reconnect")?;
        ensure(h.transport.finished().len() == order.len(), "not every game finished")?;
        h.check_pool_empty()
    }

    /// SIM-010: accepts are spaced by the settle interval.
    async fn run_settle_throttle(&self, h: &mut Harness) -> Result<(), String> {
        let games = h.capacity + 1 + h.context.gen_range(0, 3) as usize;
        for _ in 0..games {
            h.offer_random_game(0);
        }

        h.run_until_finished(games).await?;

        let interval = PoolConfig::default().settle_interval;
        let accepts: Vec<Duration> = h
            .transport
            .log()
            .into_iter()
            .filter(|r| matches!(r.action, SimAction::Accept(_)))
            .map(|r| r.at)
            .collect();
        for pair in accepts.windows(2) {
            ensure(
                pair[1] - pair[0] >= interval,
                format!("accepts {:?} apart, interval {:?}", pair[1] - pair[0], interval),
            )?;
        }
        ensure(accepts.len() == games, "not every offer was accepted")
    }

    /// SIM-011: failed submissions resign.
    async fn run_rejected_moves(&self, h: &mut Harness) -> Result<(), String> {
        h.transport.reject_moves(true);
        let games = 1 + h.context.gen_range(0, 3) as usize;
        let ids: Vec<OfferId> = (0..games).map(|_| h.offer_random_game(2)).collect();

        h.run_until_finished(games).await?;

        for id in &ids {
            let (moves, resigns) = h.tally(id);
            ensure(moves == 0, format!("{}: rejected moves were recorded", id))?;
            ensure(resigns == 1, format!("{}: {} resigns", id, resigns))?;
        }
        h.check_pool_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_passes(scenario: ScenarioId, seed: u64) {
        let result = ScenarioRunner::new(seed).run(scenario);
        assert!(
            result.passed,
            "{} failed with seed {}: {:?}",
            scenario,
            seed,
            result.failure_reason
        );
    }

    #[test]
    fn test_capacity_overflow() {
        assert_passes(ScenarioId::CapacityOverflow, 42);
    }

    #[test]
    fn test_fifo_order() {
        assert_passes(ScenarioId::FifoOrder, 42);
    }

    #[test]
    fn test_engine_faults() {
        assert_passes(ScenarioId::EngineFailure, 7);
        assert_passes(ScenarioId::EngineHang, 7);
    }

    #[test]
    fn test_mute_toggle() {
        assert_passes(ScenarioId::MuteToggle, 1);
    }

    #[test]
    fn test_reconnect() {
        assert_passes(ScenarioId::Reconnect, 3);
    }

    #[test]
    fn test_all_scenarios_across_seeds() {
        for seed in 0..8 {
            for scenario in ScenarioId::all() {
                assert_passes(scenario, seed);
            }
        }
    }

    #[test]
    fn test_runs_are_deterministic() {
        let a = ScenarioRunner::new(11).run(ScenarioId::CapacityOverflow);
        let b = ScenarioRunner::new(11).run(ScenarioId::CapacityOverflow);
        assert_eq!(a.metrics.moves, b.metrics.moves);
        assert_eq!(a.metrics.accepted, b.metrics.accepted);
        assert_eq!(a.metrics.games_finished, b.metrics.games_finished);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(16))]

            #[test]
            fn prop_capacity_never_exceeded(seed in any::<u64>()) {
                let result = ScenarioRunner::new(seed).run(ScenarioId::CapacityOverflow);
                prop_assert!(result.passed, "{:?}", result.failure_reason);
            }
        }
    }
}
