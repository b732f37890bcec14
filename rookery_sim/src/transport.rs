//! Simulated game service with fault injection.
//!
//! `SimTransport` plays the remote service: scenarios push account events
//! into a feed, host games against a scripted opponent, and inspect every
//! request the bot made. Hosted games answer the bot's moves on their own,
//! so a scenario only describes what the opponent does.

use crate::context::SimContext;

use async_trait::async_trait;
use futures_util::stream;
use rookery_env::{
    BotContext, ChatLine, Clock, Color, EnvError, Event, EventStream, GameEvent, GameEventStream,
    GameFull, GameId, GameState, Move, OfferId, PlayerInfo, Transport,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

/// Starting clock of hosted games.
const INITIAL_MS: u64 = 300_000;

/// Clock time a simulated move costs the mover.
const MOVE_COST_MS: u64 = 1_500;

/// Unbounded feed that a stream can be re-opened on.
struct Feed<T> {
    items: Mutex<(VecDeque<T>, bool)>,
    ready: Notify,
}

impl<T> Feed<T> {
    fn new() -> Self {
        Self {
            items: Mutex::new((VecDeque::new(), false)),
            ready: Notify::new(),
        }
    }

    fn push(&self, item: T) {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).0.push_back(item);
        self.ready.notify_waiters();
    }

    fn close(&self) {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).1 = true;
        self.ready.notify_waiters();
    }

    /// `Some(None)` once the feed is closed and empty.
    fn take(&self) -> Option<Option<T>> {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        match items.0.pop_front() {
            Some(item) => Some(Some(item)),
            None if items.1 => Some(None),
            None => None,
        }
    }

    async fn next(&self) -> Option<T> {
        loop {
            let notified = self.ready.notified();
            if let Some(item) = self.take() {
                return item;
            }
            notified.await;
        }
    }
}

fn feed_stream<T: Send + 'static>(feed: Arc<Feed<T>>) -> stream::BoxStream<'static, T> {
    Box::pin(stream::unfold(feed, |feed| async move {
        let item = feed.next().await?;
        Some((item, feed))
    }))
}

/// What the scripted opponent does after each bot move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpponentStep {
    /// Plays a move; the bot is on turn again
    Move(Move),

    /// Writes a chat line
    Say(String),

    /// The service sends an error marker on the game stream
    Fail(String),

    /// The game stream closes without a terminal status
    Vanish,
}

/// A request the bot sent to the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimAction {
    Accept(OfferId),
    Decline(OfferId),
    Move(GameId, Move),
    Resign(GameId),
    Chat(GameId, String),
}

/// A request and the virtual time it arrived at.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub at: Duration,
    pub action: SimAction,
}

struct HostedGame {
    opponent: String,
    bot_color: Color,
    moves: Vec<Move>,
    clock: Clock,
    steps: VecDeque<OpponentStep>,
    over: bool,
}

impl HostedGame {
    fn spend(&mut self, color: Color) {
        let ms = match color {
            Color::White => &mut self.clock.white_ms,
            Color::Black => &mut self.clock.black_ms,
        };
        *ms = ms.saturating_sub(MOVE_COST_MS);
    }

    fn snapshot(&self, status: &str) -> GameEvent {
        GameEvent::State(GameState::new(self.moves.clone(), self.clock, status))
    }
}

#[derive(Default)]
struct SimState {
    games: HashMap<GameId, HostedGame>,
    feeds: HashMap<GameId, Arc<Feed<Result<GameEvent, EnvError>>>>,
    opened: HashSet<GameId>,
    log: Vec<Recorded>,
    failing_accepts: HashSet<OfferId>,
    reject_moves: bool,
    live: HashSet<GameId>,
    max_live: usize,
    finished: Vec<GameId>,
}

impl SimState {
    fn feed(&mut self, game_id: &GameId) -> Arc<Feed<Result<GameEvent, EnvError>>> {
        self.feeds
            .entry(game_id.clone())
            .or_insert_with(|| Arc::new(Feed::new()))
            .clone()
    }

    /// Runs opponent steps until the bot is on turn or the game is over.
    fn opponent_turn(&mut self, game_id: &GameId) {
        let feed = self.feed(game_id);
        let Some(game) = self.games.get_mut(game_id) else {
            return;
        };

        loop {
            match game.steps.pop_front() {
                Some(OpponentStep::Move(mv)) => {
                    game.moves.push(mv);
                    game.spend(game.bot_color.opposite());
                    feed.push(Ok(game.snapshot("started")));
                    return;
                }
                Some(OpponentStep::Say(text)) => {
                    feed.push(Ok(GameEvent::Chat(ChatLine {
                        username: game.opponent.clone(),
                        room: "player".to_string(),
                        text,
                    })));
                }
                Some(OpponentStep::Fail(message)) => {
                    feed.push(Ok(GameEvent::Error { message }));
                    return;
                }
                Some(OpponentStep::Vanish) => {
                    self.close(game_id, None);
                    return;
                }
                None => {
                    self.close(game_id, Some("resign"));
                    return;
                }
            }
        }
    }

    fn close(&mut self, game_id: &GameId, status: Option<&str>) {
        let feed = self.feed(game_id);
        let Some(game) = self.games.get_mut(game_id) else {
            return;
        };
        if game.over {
            return;
        }
        if let Some(status) = status {
            feed.push(Ok(game.snapshot(status)));
        }
        feed.close();
        game.over = true;
        self.live.remove(game_id);
        self.finished.push(game_id.clone());
        debug!("Simulated game {} closed", game_id);
    }
}

/// In-memory stand-in for the remote game service.
pub struct SimTransport {
    context: Arc<SimContext>,
    events: Arc<Feed<Result<Event, EnvError>>>,
    state: Mutex<SimState>,
    changed: Notify,
}

impl SimTransport {
    pub fn new(context: Arc<SimContext>) -> Self {
        Self {
            context,
            events: Arc::new(Feed::new()),
            state: Mutex::new(SimState::default()),
            changed: Notify::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delivers an event on the account stream.
    pub fn push_event(&self, event: Event) {
        self.events.push(Ok(event));
    }

    /// Breaks the current account stream; the next `stream_events` call reconnects.
    pub fn break_event_stream(&self, reason: &str) {
        self.events.push(Err(EnvError::StreamClosed(reason.to_string())));
    }

    /// Makes accept requests for `offer_id` fail.
    pub fn fail_accept(&self, offer_id: &OfferId) {
        self.state().failing_accepts.insert(offer_id.clone());
    }

    /// Makes every move submission fail.
    pub fn reject_moves(&self, reject: bool) {
        self.state().reject_moves = reject;
    }

    /// Hosts a game against a scripted opponent.
    ///
    /// The game stream starts with `gameFull`; if the bot is Black the
    /// opponent's steps run until its first move.
    pub fn host_game(&self, game_id: &GameId, bot: &str, bot_color: Color, opponent: &str, steps: Vec<OpponentStep>) {
        let (white, black) = match bot_color {
            Color::White => (PlayerInfo::named(bot), PlayerInfo::named(opponent)),
            Color::Black => (PlayerInfo::named(opponent), PlayerInfo::named(bot)),
        };
        let clock = Clock::new(INITIAL_MS, INITIAL_MS);

        let mut state = self.state();
        let feed = state.feed(game_id);
        feed.push(Ok(GameEvent::Full(GameFull {
            white,
            black,
            initial_ms: Some(INITIAL_MS),
            increment_ms: Some(0),
            state: GameState::new(vec![], clock, "started"),
        })));
        state.games.insert(
            game_id.clone(),
            HostedGame {
                opponent: opponent.to_string(),
                bot_color,
                moves: Vec::new(),
                clock,
                steps: steps.into(),
                over: false,
            },
        );
        if bot_color == Color::Black {
            state.opponent_turn(game_id);
        }
    }

    /// Every request received so far.
    pub fn log(&self) -> Vec<Recorded> {
        self.state().log.clone()
    }

    pub fn actions(&self) -> Vec<SimAction> {
        self.log().into_iter().map(|r| r.action).collect()
    }

    pub fn accepted(&self) -> Vec<OfferId> {
        self.actions()
            .into_iter()
            .filter_map(|a| match a {
                SimAction::Accept(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Requests concerning one game, in order.
    pub fn game_actions(&self, game_id: &GameId) -> Vec<SimAction> {
        self.actions()
            .into_iter()
            .filter(|a| match a {
                SimAction::Move(id, _) | SimAction::Resign(id) | SimAction::Chat(id, _) => id == game_id,
                SimAction::Accept(id) | SimAction::Decline(id) => id.as_str() == game_id.as_str(),
            })
            .collect()
    }

    /// Games closed by the service, in order.
    pub fn finished(&self) -> Vec<GameId> {
        self.state().finished.clone()
    }

    /// Most games accepted and not yet closed at any one time.
    pub fn max_concurrent(&self) -> usize {
        self.state().max_live
    }

    /// Resolves once `n` hosted games have closed.
    pub async fn wait_for_finished(&self, n: usize) {
        loop {
            let notified = self.changed.notified();
            if self.state().finished.len() >= n {
                return;
            }
            notified.await;
        }
    }

    fn record(&self, state: &mut SimState, action: SimAction) {
        state.log.push(Recorded {
            at: self.context.now(),
            action,
        });
    }
}

#[async_trait]
impl Transport for SimTransport {
    async fn stream_events(&self) -> Result<EventStream, EnvError> {
        let events = feed_stream(self.events.clone());
        Ok(events)
    }

    async fn stream_game(&self, game_id: &GameId) -> Result<GameEventStream, EnvError> {
        let mut state = self.state();
        if !state.opened.insert(game_id.clone()) {
            return Err(EnvError::Rejected {
                status: 429,
                body: "game stream already open".to_string(),
            });
        }
        let feed = state.feed(game_id);
        Ok(feed_stream(feed))
    }

    async fn respond_to_offer(&self, offer_id: &OfferId, accept: bool) -> Result<(), EnvError> {
        {
            let mut state = self.state();
            if accept && state.failing_accepts.contains(offer_id) {
                return Err(EnvError::Rejected {
                    status: 404,
                    body: "challenge not found".to_string(),
                });
            }
            if accept {
                self.record(&mut state, SimAction::Accept(offer_id.clone()));
                let game_id = offer_id.game_id();
                if !state.games.get(&game_id).is_some_and(|g| g.over) {
                    state.live.insert(game_id);
                    state.max_live = state.max_live.max(state.live.len());
                }
            } else {
                self.record(&mut state, SimAction::Decline(offer_id.clone()));
            }
        }
        self.changed.notify_waiters();
        Ok(())
    }

    async fn submit_move(&self, game_id: &GameId, mv: &Move) -> Result<(), EnvError> {
        {
            let mut state = self.state();
            if state.reject_moves {
                return Err(EnvError::Rejected {
                    status: 400,
                    body: format!("illegal move {}", mv),
                });
            }
            self.record(&mut state, SimAction::Move(game_id.clone(), mv.clone()));

            let feed = state.feed(game_id);
            if let Some(game) = state.games.get_mut(game_id).filter(|g| !g.over) {
                game.moves.push(mv.clone());
                game.spend(game.bot_color);
                feed.push(Ok(game.snapshot("started")));
                state.opponent_turn(game_id);
            }
        }
        self.changed.notify_waiters();
        Ok(())
    }

    async fn resign(&self, game_id: &GameId) -> Result<(), EnvError> {
        {
            let mut state = self.state();
            self.record(&mut state, SimAction::Resign(game_id.clone()));
            state.close(game_id, Some("resign"));
        }
        self.changed.notify_waiters();
        Ok(())
    }

    async fn post_message(&self, game_id: &GameId, text: &str) -> Result<(), EnvError> {
        let mut state = self.state();
        self.record(&mut state, SimAction::Chat(game_id.clone(), text.to_string()));
        Ok(())
    }
}
