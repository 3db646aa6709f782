//! # IADS Core - Integrated Adaptive Detection System
//!
//! Adaptive health estimation for programmable (OpenFlow-style) networks.
//! Each (entity, metric) pair is tracked as a Bayesian latent state, and
//! every round a bounded top-K of measurements is scheduled to maximize
//! expected information gain under contextual and event-driven policy.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                                                          │
//! │  ESM (state table)  ←──────────────  RFU (result fusion) │
//! │    │         │                             ↑             │
//! │    ↓         ↓                             │             │
//! │  UQ (EIG)  EM (events/triggers)      ProbeExecutor       │
//! │    │         │                             ↑             │
//! │    └────┬────┘                             │             │
//! │         ↓                                  │             │
//! │  APS = CMAB + CTLC + PRIO  ───── top-K ────┘             │
//! │         ↑                                                │
//! │         └───────── reward (closes the loop) ─────────────│
//! │                                                          │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! One scheduler loop drives rounds in the fixed order
//! `EM.detect → APS.select → RFU.snapshot → PE.execute → RFU.process →
//! CMAB.update`; a periodic analyzer task re-runs event detection
//! between rounds.
//!
//! ## Example
//!
//! ```rust,no_run
//! use iads_core::{IadsConfig, IadsController, TopologyEvent};
//! use std::sync::Arc;
//!
//! # async fn example(executor: Arc<dyn iads_core::ProbeExecutor>) -> anyhow::Result<()> {
//! let config = IadsConfig::default().with_top_k(5);
//! config.validate()?;
//!
//! let (tx, rx) = tokio::sync::mpsc::channel(64);
//! let mut controller = IadsController::new(config, executor, rx);
//!
//! tx.send(TopologyEvent::link_add(1, 1, 2, 1)).await?;
//! controller.run().await?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod aps;
pub mod clock;
pub mod config;
pub mod controller;
pub mod distribution;
pub mod em;
pub mod error;
pub mod esm;
pub mod pe;
pub mod rfu;
pub mod types;
pub mod uq;

// Re-export main types
pub use aps::{ActiveProbingScheduler, SelectionOutcome, Strategy};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    ApsConfig, EventThresholds, IadsConfig, InitialDistributions, MeasurementNoise,
    PriorityWeights, RewardConfig, SystemConfig,
};
pub use controller::{
    IadsController, IadsCore, RoundOutcome, ShutdownHandle, SystemReport, SystemStatus,
};
pub use distribution::Distribution;
pub use em::{Event, EventManager, EventType};
pub use error::{IadsError, Result};
pub use esm::{EntityState, EntityStateManager};
pub use pe::ProbeExecutor;
pub use rfu::{FusionOutcome, ResultFusionUnit};
pub use types::{
    ContextVector, EntityId, LinkEndpoints, Metric, PriorityComponents, ProbeResult, ProbeTask,
    ScheduledProbe, TopologyEvent,
};
pub use uq::UncertaintyQuantifier;

/// Crate version (aligned with workspace)
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Number of context features fed to the contextual bandit
pub const CONTEXT_DIM: usize = 4;

/// Variance floor for Gaussian states; posteriors never collapse below it
pub const EPSILON_VARIANCE: f64 = 1e-9;
