//! Dispatcher - the single event loop in front of the contest pool.
//!
//! Reads the account event stream strictly in order and routes each event:
//! challenges go through the acceptance policy into the pool, everything
//! else is noted. The pool is reconciled once after every event, and
//! additionally whenever a worker reports completion or the accept rate
//! limiter opens, so a finished contest frees its slot without waiting for
//! unrelated traffic.
//!
//! ```text
//!            ┌────────────┐  event   ┌────────────┐ enqueue/reconcile ┌──────┐
//!  stream ──►│ run_stream │ ───────► │   handle   │ ────────────────► │ pool │
//!            └────────────┘          └────────────┘                   └──┬───┘
//!                  ▲        completion / accept wakeup                   │
//!                  └─────────────────────────────────────────────────────┘
//! ```

use crate::config::{BotConfig, ChallengePolicy, PoolConfig};
use crate::offer::{DeclineReason, Offer, Verdict};
use crate::pool::{ContestPool, Reconciled, SessionLauncher, WorkerLauncher};

use futures_util::StreamExt;
use rookery_env::{BotContext, EnvError, Event, EventStream, OracleFactory, Transport};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How the dispatcher routed a single event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    /// Offer appended to the pool queue
    Enqueued,

    /// Offer id already queued or playing
    Duplicate,

    /// Offer refused by the acceptance policy
    Declined(DeclineReason),

    /// Lifecycle or error notification, logged only
    Noted,

    /// Unknown event kind
    Ignored,
}

/// Counters kept by the dispatcher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub events: u64,
    pub offers: u64,
    pub declined: u64,
    pub games_started: u64,
    pub games_finished: u64,
    pub errors: u64,
    pub unknown: u64,
}

pub struct Dispatcher<C, T, L>
where
    C: BotContext,
    T: Transport,
    L: WorkerLauncher,
{
    context: Arc<C>,
    transport: Arc<T>,
    pool: ContestPool<C, T, L>,
    policy: ChallengePolicy,

    /// Bot account name, used to refuse self-challenges
    username: String,

    /// Arrival counter stamped on offers
    arrivals: u64,

    stats: DispatchStats,
}

impl<C, T, F> Dispatcher<C, T, SessionLauncher<T, F>>
where
    C: BotContext,
    T: Transport,
    F: OracleFactory,
{
    /// Dispatcher whose workers play full contest sessions.
    pub fn with_sessions(context: Arc<C>, transport: Arc<T>, factory: Arc<F>, config: BotConfig) -> Self {
        let username = config.session.username.clone();
        let launcher = SessionLauncher::new(transport.clone(), factory, config.session);
        Self::new(context, transport, launcher, config.pool, config.policy, username)
    }
}

impl<C, T, L> Dispatcher<C, T, L>
where
    C: BotContext,
    T: Transport,
    L: WorkerLauncher,
{
    pub fn new(
        context: Arc<C>,
        transport: Arc<T>,
        launcher: L,
        pool: PoolConfig,
        policy: ChallengePolicy,
        username: impl Into<String>,
    ) -> Self {
        let pool = ContestPool::new(context.clone(), transport.clone(), launcher, pool);
        Self {
            context,
            transport,
            pool,
            policy,
            username: username.into(),
            arrivals: 0,
            stats: DispatchStats::default(),
        }
    }

    pub fn pool(&self) -> &ContestPool<C, T, L> {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut ContestPool<C, T, L> {
        &mut self.pool
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Routes one event. Does not reconcile.
    pub async fn handle(&mut self, event: Event) -> Routed {
        self.stats.events += 1;

        match event {
            Event::Challenge(challenge) => {
                self.stats.offers += 1;
                match self.policy.evaluate(&challenge, &self.username) {
                    Verdict::Queue => {
                        let offer = Offer::from_challenge(challenge, self.arrivals);
                        self.arrivals += 1;
                        if self.pool.enqueue(offer) {
                            Routed::Enqueued
                        } else {
                            debug!("Challenge already known, skipping");
                            Routed::Duplicate
                        }
                    }
                    Verdict::Decline(reason) => {
                        info!("Declining challenge {} from {}: {}", challenge.id, challenge.challenger, reason);
                        self.stats.declined += 1;
                        if let Err(e) = self.transport.respond_to_offer(&challenge.id, false).await {
                            warn!("Declining challenge {} failed: {}", challenge.id, e);
                        }
                        Routed::Declined(reason)
                    }
                }
            }
            Event::GameStart { game_id } => {
                self.stats.games_started += 1;
                debug!("Game {} started", game_id);
                Routed::Noted
            }
            Event::GameFinish { game_id } => {
                self.stats.games_finished += 1;
                debug!("Game {} finished", game_id);
                Routed::Noted
            }
            Event::ChallengeCanceled { id } | Event::ChallengeDeclined { id } => {
                debug!("Challenge {} withdrawn", id);
                Routed::Noted
            }
            Event::Error { message } => {
                self.stats.errors += 1;
                warn!("Error event on account stream: {}", message);
                Routed::Noted
            }
            Event::Unknown { kind } => {
                self.stats.unknown += 1;
                debug!("Ignoring unknown event type {}", kind);
                Routed::Ignored
            }
        }
    }

    async fn reconcile(&mut self) -> Reconciled {
        let result = self.pool.reconcile().await;
        for report in self.pool.take_reports() {
            debug!("Game {}: {} move(s) played", report.game_id, report.moves_played);
        }
        result
    }

    /// Consumes one event stream until it ends or fails.
    ///
    /// The pool survives across calls, so a caller may reconnect and keep
    /// the running contests.
    pub async fn run_stream(&mut self, mut events: EventStream) -> Result<(), EnvError> {
        self.reconcile().await;

        loop {
            let wakeup = self.pool.next_accept_in();

            tokio::select! {
                biased;

                item = events.next() => match item {
                    Some(Ok(event)) => {
                        debug!("Received {} event", event.kind());
                        self.handle(event).await;
                        self.reconcile().await;
                    }
                    Some(Err(e)) => {
                        warn!("Event stream failed: {}", e);
                        return Err(e);
                    }
                    None => {
                        info!("Event stream ended");
                        return Ok(());
                    }
                },
                Some(freed) = self.pool.await_completion() => {
                    debug!("Slot freed by {}", freed);
                    self.reconcile().await;
                }
                _ = self.context.sleep(wakeup.unwrap_or_default()), if wakeup.is_some() => {
                    self.reconcile().await;
                }
            }
        }
    }

    /// Waits for every running contest to finish.
    pub async fn drain(&mut self) {
        self.pool.drain().await;
        for report in self.pool.take_reports() {
            info!("Game {} closed: {:?}", report.game_id, report.outcome);
        }
    }
}
