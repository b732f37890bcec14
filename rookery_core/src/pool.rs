//! Contest Pool - bounded scheduler for contest workers.
//!
//! The pool owns a FIFO queue of pending offers and a fixed array of worker
//! slots. It is only ever touched from the dispatcher task; workers report
//! back by message, never by shared state.
//!
//! # Slot lifecycle
//!
//! ```text
//!  enqueue ──► [queue] ──reconcile──► accept ──► bind slot ──► spawn worker
//!                                                    ▲               │
//!                                                    └── reconcile ◄─┘ (completion / exit)
//! ```
//!
//! Accepts are spaced by a non-blocking rate limiter: when the settle
//! interval has not elapsed yet, `reconcile` leaves the offer queued and
//! `next_accept_in` tells the dispatcher when to come back.

use crate::config::{PoolConfig, SessionConfig};
use crate::offer::Offer;
use crate::session::{play_contest, SessionReport};

use futures_util::future::BoxFuture;
use rookery_env::{BotContext, OfferId, OracleFactory, Transport, WorkerId};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Builds the future a worker runs for an accepted offer.
pub trait WorkerLauncher: Send + Sync + 'static {
    fn launch(&self, offer: &Offer) -> BoxFuture<'static, SessionReport>;
}

/// Launches a full contest session per offer.
pub struct SessionLauncher<T, F> {
    transport: Arc<T>,
    factory: Arc<F>,
    config: Arc<SessionConfig>,
}

impl<T, F> SessionLauncher<T, F> {
    pub fn new(transport: Arc<T>, factory: Arc<F>, config: SessionConfig) -> Self {
        Self {
            transport,
            factory,
            config: Arc::new(config),
        }
    }
}

impl<T, F> WorkerLauncher for SessionLauncher<T, F>
where
    T: Transport,
    F: OracleFactory,
{
    fn launch(&self, offer: &Offer) -> BoxFuture<'static, SessionReport> {
        Box::pin(play_contest(
            offer.id.game_id(),
            self.transport.clone(),
            self.factory.clone(),
            self.config.clone(),
        ))
    }
}

/// A running worker bound to a slot.
struct Worker {
    id: WorkerId,
    offer: Offer,
    handle: JoinHandle<()>,
}

/// One unit of concurrency capacity.
pub struct WorkerSlot {
    index: usize,
    worker: Option<Worker>,
}

impl WorkerSlot {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_empty(&self) -> bool {
        self.worker.is_none()
    }

    /// Offer bound to this slot, if any.
    pub fn offer_id(&self) -> Option<&OfferId> {
        self.worker.as_ref().map(|w| &w.offer.id)
    }
}

/// Message sent by a worker right before it exits.
#[derive(Debug)]
pub struct Completion {
    pub slot: usize,
    pub worker: WorkerId,
    pub report: SessionReport,
}

/// Counters kept by the pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub enqueued: u64,
    pub duplicates: u64,
    pub accepted: u64,
    pub accept_failures: u64,
    pub completed: u64,
    pub crashed: u64,
}

/// What a single `reconcile` call changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciled {
    /// Offers whose workers exited and whose slots were cleared
    pub freed: Vec<OfferId>,

    /// Offers accepted and bound in this pass
    pub accepted: Vec<OfferId>,

    /// Offers dropped because the accept request failed
    pub dropped: Vec<OfferId>,
}

/// The bounded contest scheduler.
pub struct ContestPool<C, T, L>
where
    C: BotContext,
    T: Transport,
    L: WorkerLauncher,
{
    config: PoolConfig,
    context: Arc<C>,
    transport: Arc<T>,
    launcher: L,

    queue: VecDeque<Offer>,
    slots: Vec<WorkerSlot>,

    done_tx: mpsc::UnboundedSender<Completion>,
    done_rx: mpsc::UnboundedReceiver<Completion>,

    /// Context time of the last accept request
    last_accept: Option<Duration>,

    spawned: u64,
    reports: Vec<SessionReport>,
    stats: PoolStats,
}

impl<C, T, L> ContestPool<C, T, L>
where
    C: BotContext,
    T: Transport,
    L: WorkerLauncher,
{
    /// Creates a pool; a capacity of 0 is raised to 1.
    pub fn new(context: Arc<C>, transport: Arc<T>, launcher: L, config: PoolConfig) -> Self {
        let capacity = config.capacity.max(1);
        let slots = (0..capacity)
            .map(|index| WorkerSlot {
                index,
                worker: None,
            })
            .collect();
        let (done_tx, done_rx) = mpsc::unbounded_channel();

        Self {
            config: PoolConfig { capacity, ..config },
            context,
            transport,
            launcher,
            queue: VecDeque::new(),
            slots,
            done_tx,
            done_rx,
            last_accept: None,
            spawned: 0,
            reports: Vec::new(),
            stats: PoolStats::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    pub fn slots(&self) -> &[WorkerSlot] {
        &self.slots
    }

    /// Number of slots bound to a worker.
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| !s.is_empty()).count()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Offer ids still waiting, head first.
    pub fn queued(&self) -> Vec<OfferId> {
        self.queue.iter().map(|o| o.id.clone()).collect()
    }

    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// Reports of workers that finished since the last call.
    pub fn take_reports(&mut self) -> Vec<SessionReport> {
        std::mem::take(&mut self.reports)
    }

    fn is_known(&self, id: &OfferId) -> bool {
        self.queue.iter().any(|o| &o.id == id) || self.slots.iter().any(|s| s.offer_id() == Some(id))
    }

    /// Appends an offer to the queue tail.
    ///
    /// Returns false if the id is already queued or bound to a slot.
    pub fn enqueue(&mut self, offer: Offer) -> bool {
        if self.is_known(&offer.id) {
            self.stats.duplicates += 1;
            return false;
        }
        self.queue.push_back(offer);
        if let Some(offer) = self.queue.back() {
            debug!(
                "Queued challenge {} from {} ({} waiting)",
                offer.id,
                offer.requester,
                self.queue.len()
            );
        }
        self.stats.enqueued += 1;
        true
    }

    /// Time left before the rate limiter allows the next accept.
    fn accept_wait(&self) -> Duration {
        match self.last_accept {
            Some(last) => (last + self.config.settle_interval).saturating_sub(self.context.now()),
            None => Duration::ZERO,
        }
    }

    /// When a queued offer is only held back by the rate limiter, returns
    /// how long until it may be accepted.
    pub fn next_accept_in(&self) -> Option<Duration> {
        let free = self.slots.iter().any(WorkerSlot::is_empty);
        if self.queue.is_empty() || !free {
            return None;
        }
        Some(self.accept_wait())
    }

    /// Frees finished slots, then accepts queued offers into free slots.
    pub async fn reconcile(&mut self) -> Reconciled {
        let mut result = Reconciled {
            freed: self.collect_finished(),
            ..Reconciled::default()
        };

        loop {
            if self.queue.is_empty() {
                break;
            }
            let Some(index) = self.slots.iter().position(WorkerSlot::is_empty) else {
                break;
            };
            if !self.accept_wait().is_zero() {
                break;
            }
            let Some(offer) = self.queue.pop_front() else {
                break;
            };

            match self.transport.respond_to_offer(&offer.id, true).await {
                Ok(()) => {
                    // Only successful accepts start the settle interval
                    self.last_accept = Some(self.context.now());
                    info!("Accepted challenge from {} ({})", offer.requester, offer.id);
                    self.stats.accepted += 1;
                    result.accepted.push(offer.id.clone());
                    self.bind(index, offer);
                }
                Err(e) => {
                    warn!("Accepting challenge {} failed, dropping it: {}", offer.id, e);
                    self.stats.accept_failures += 1;
                    result.dropped.push(offer.id);
                }
            }
        }

        if !self.queue.is_empty() {
            debug!(
                "{} challenge(s) waiting, {}/{} games in play",
                self.queue.len(),
                self.occupied(),
                self.capacity()
            );
        }
        result
    }

    fn bind(&mut self, index: usize, offer: Offer) {
        let id = WorkerId::from_seed(self.context.seed() ^ self.spawned);
        self.spawned += 1;

        let work = self.launcher.launch(&offer);
        let done_tx = self.done_tx.clone();
        let handle = self.context.spawn(offer.id.as_str(), async move {
            let report = work.await;
            let _ = done_tx.send(Completion {
                slot: index,
                worker: id,
                report,
            });
        });

        debug!("Worker {} bound to slot {} for {}", id, index, offer.id);
        self.slots[index].worker = Some(Worker { id, offer, handle });
    }

    /// Clears slots whose workers exited. Idempotent.
    fn collect_finished(&mut self) -> Vec<OfferId> {
        // Snapshot exits first: a worker sends its completion before it exits,
        // so every exited worker's message is in the channel drained below.
        let exited: Vec<(usize, WorkerId)> = self
            .slots
            .iter()
            .filter_map(|s| match &s.worker {
                Some(w) if w.handle.is_finished() => Some((s.index, w.id)),
                _ => None,
            })
            .collect();

        let mut freed = Vec::new();
        while let Ok(done) = self.done_rx.try_recv() {
            if let Some(id) = self.release(done) {
                freed.push(id);
            }
        }

        for (index, worker) in exited {
            let slot = &mut self.slots[index];
            if slot.worker.as_ref().map(|w| w.id) != Some(worker) {
                continue;
            }
            if let Some(w) = slot.worker.take() {
                warn!("Game {} worker exited without a report", w.offer.id);
                self.stats.crashed += 1;
                freed.push(w.offer.id);
            }
        }
        freed
    }

    /// Applies a completion message; returns the freed offer id.
    fn release(&mut self, done: Completion) -> Option<OfferId> {
        let slot = self.slots.get_mut(done.slot)?;
        let freed = match &slot.worker {
            Some(w) if w.id == done.worker => slot.worker.take().map(|w| w.offer.id),
            _ => None,
        };
        info!("Game {} has finished ({:?})", done.report.game_id, done.report.outcome);
        self.stats.completed += 1;
        self.reports.push(done.report);
        freed
    }

    /// Waits for the next worker completion and releases its slot.
    ///
    /// Cancel-safe: a completion is only consumed when this future resolves.
    pub async fn await_completion(&mut self) -> Option<OfferId> {
        let done = self.done_rx.recv().await?;
        self.release(done)
    }

    /// Waits for every running worker to exit. Queued offers stay queued.
    pub async fn drain(&mut self) {
        let workers: Vec<Worker> = self.slots.iter_mut().filter_map(|s| s.worker.take()).collect();
        info!("Draining {} running game(s)", workers.len());

        for worker in workers {
            if let Err(e) = worker.handle.await {
                warn!("Game {} worker failed: {}", worker.offer.id, e);
                self.stats.crashed += 1;
            }
        }
        while let Ok(done) = self.done_rx.try_recv() {
            self.release(done);
        }
        if !self.queue.is_empty() {
            info!("{} challenge(s) left unaccepted", self.queue.len());
        }
    }
}
