//! Rookery Deterministic Simulation Harness
//!
//! This crate runs the real dispatcher, pool and sessions from
//! `rookery_core` against a simulated game service, so scheduling and
//! failure handling can be exercised without a network or an engine.
//!
//! # Core Principle
//!
//! All sources of non-determinism are intercepted and controlled:
//! - **Time**: the pool's clock is virtual; session deadlines run on a paused Tokio clock
//! - **Service**: `SimTransport` scripts every event and records every request
//! - **Engine**: `ScriptedOracle` moves come from a seeded RNG
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     ScenarioRunner                       │
//! │  ┌────────────┐  events   ┌────────────┐                 │
//! │  │    Sim     │──────────►│ Dispatcher │──► Pool         │
//! │  │ Transport  │◄──────────│  (core)    │     │           │
//! │  │ (opponent) │  accept,  └────────────┘     ▼           │
//! │  │            │  moves,              Session workers     │
//! │  │            │◄──────────────────── (ScriptedOracle)    │
//! │  └────────────┘  resign, chat                            │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use rookery_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::CapacityOverflow);
//! assert!(result.passed);
//! ```

mod context;
mod oracle;
mod runner;
mod transport;
pub mod scenarios;

pub use context::SimContext;
pub use oracle::{OracleFault, ScriptedOracle, SimOracleFactory};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner, SIM_BOT};
pub use transport::{OpponentStep, Recorded, SimAction, SimTransport};
