//! Core environment context trait for the Rookery orchestrator.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// The central interface for time and task management.
///
/// This trait abstracts the clock and the task spawner so that the pool's
/// accept rate limiter and its worker bookkeeping can run against real time
/// in production and against a virtual clock in simulation.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time` and `tokio::spawn`
/// - **Simulation**: `SimContext` - virtual clock advanced by `sleep`
#[async_trait]
pub trait BotContext: Send + Sync + 'static {
    /// Returns the current monotonic time since context creation.
    ///
    /// Used by the accept rate limiter. In simulation, this is the virtual clock.
    fn now(&self) -> Duration;

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: advances the virtual clock and yields
    async fn sleep(&self, duration: Duration);

    /// Spawns an isolated worker task.
    ///
    /// The returned handle is the pool's liveness probe for the worker.
    /// `name` is attached to the worker's tracing span.
    fn spawn<F>(&self, name: &str, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static;

    /// Returns the context's seed (for logging/debugging).
    ///
    /// In production, returns 0 (not seeded).
    fn seed(&self) -> u64 {
        0
    }
}
