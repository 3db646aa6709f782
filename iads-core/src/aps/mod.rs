//! # Active Probing Scheduler
//!
//! Three cooperating engines produce each round's top-K selection:
//!
//! - [`Cmab`]: a contextual bandit picks the round's probing strategy
//!   from the normalized system context
//! - [`Ctlc`]: a proportional controller retunes every state's probe
//!   interval against its stability
//! - [`Prio`]: a weighted ranking function scores the task pool and
//!   keeps the top K
//!
//! The reward computed by result fusion closes the loop through
//! [`ActiveProbingScheduler::update_reward`].

pub mod cmab;
pub mod ctlc;
pub mod prio;

pub use cmab::{Cmab, CmabStatistics};
pub use ctlc::{Ctlc, IntervalAdjustment};
pub use prio::Prio;

use crate::config::IadsConfig;
use crate::em::EventManager;
use crate::esm::EntityStateManager;
use crate::types::{ContextVector, ScheduledProbe};
use crate::uq::UncertaintyQuantifier;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use tracing::{debug, instrument};

/// How many past strategy picks the scheduler remembers
const STRATEGY_HISTORY_LIMIT: usize = 100;

/// Probing strategy played by one bandit arm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(usize)]
pub enum Strategy {
    /// Concentrate the budget on high-entropy states
    FocusUncertainty = 0,
    /// Probe unstable states at high frequency
    HighfreqUnstable = 1,
    /// Spread the budget evenly across the pool
    CoverageBalancer = 2,
    /// Chase states flagged by event detection
    EventTrigger = 3,
}

impl Strategy {
    /// All strategies, in arm order
    pub const ALL: [Strategy; 4] = [
        Strategy::FocusUncertainty,
        Strategy::HighfreqUnstable,
        Strategy::CoverageBalancer,
        Strategy::EventTrigger,
    ];

    /// Number of bandit arms
    pub const COUNT: usize = Self::ALL.len();

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::FocusUncertainty => "focus_uncertainty",
            Strategy::HighfreqUnstable => "highfreq_unstable",
            Strategy::CoverageBalancer => "coverage_balancer",
            Strategy::EventTrigger => "event_trigger",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one round's selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionOutcome {
    /// Top-K tasks with their priority breakdown, highest first
    pub tasks: Vec<ScheduledProbe>,
    /// Strategy the bandit played this round
    pub strategy: Strategy,
    /// Context the selection was made against
    pub context: ContextVector,
    /// Interval changes applied by the controller sweep
    pub interval_adjustments: Vec<IntervalAdjustment>,
}

/// Scheduler statistics for `status()`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApsStatistics {
    pub total_rounds: u64,
    pub total_tasks_selected: u64,
    /// Most recent strategy picks, newest last
    pub recent_strategies: Vec<String>,
    pub cmab: CmabStatistics,
}

/// The scheduler aggregate; see module docs
pub struct ActiveProbingScheduler {
    config: IadsConfig,
    cmab: Cmab,
    ctlc: Ctlc,
    prio: Prio,
    total_rounds: u64,
    total_tasks_selected: u64,
    strategy_history: VecDeque<Strategy>,
}

impl ActiveProbingScheduler {
    pub fn new(config: IadsConfig) -> Self {
        let cmab = Cmab::new(config.aps.reward_noise);
        Self::with_cmab(config, cmab)
    }

    /// Scheduler with a deterministic bandit for tests and replay
    pub fn with_seed(config: IadsConfig, seed: u64) -> Self {
        let cmab = Cmab::with_seed(config.aps.reward_noise, seed);
        Self::with_cmab(config, cmab)
    }

    fn with_cmab(config: IadsConfig, cmab: Cmab) -> Self {
        let ctlc = Ctlc::new(
            config.aps.kp,
            config.aps.target_stability,
            config.system.probe_interval_min,
            config.system.probe_interval_max,
        );
        let prio = Prio::new(config.aps.priority_weights);
        Self {
            config,
            cmab,
            ctlc,
            prio,
            total_rounds: 0,
            total_tasks_selected: 0,
            strategy_history: VecDeque::new(),
        }
    }

    /// Run one selection: context → strategy → interval sweep → top-K.
    ///
    /// `k` defaults to the configured `top_k`. The interval sweep is a
    /// side effect on the state table and its changes are reported in
    /// the outcome.
    #[instrument(skip_all)]
    pub fn select_tasks(
        &mut self,
        k: Option<usize>,
        esm: &mut EntityStateManager,
        uq: &mut UncertaintyQuantifier,
        em: &EventManager,
    ) -> SelectionOutcome {
        let k = k.unwrap_or(self.config.system.top_k);

        let context = esm.context_vector(em.recent_event_count_normalized());
        let strategy = self.cmab.select_strategy(&context);
        let interval_adjustments = self.ctlc.batch_adjust(esm);

        let pool = uq.get_task_pool_with_eig(esm, &self.config.noise);
        let tasks = self
            .prio
            .select_top_k(&pool, esm, em, strategy, &self.config.aps, k);

        self.total_rounds += 1;
        self.total_tasks_selected += tasks.len() as u64;
        self.strategy_history.push_back(strategy);
        while self.strategy_history.len() > STRATEGY_HISTORY_LIMIT {
            self.strategy_history.pop_front();
        }

        debug!(
            strategy = %strategy,
            selected = tasks.len(),
            adjusted = interval_adjustments.len(),
            "selection complete"
        );

        SelectionOutcome {
            tasks,
            strategy,
            context,
            interval_adjustments,
        }
    }

    /// Feed the round's reward back into the bandit arm recorded at
    /// selection time
    #[instrument(skip(self))]
    pub fn update_reward(&mut self, reward: f64) {
        self.cmab.update(reward);
    }

    /// Posterior-mean score of a strategy against a context
    pub fn mean_score(&self, strategy: Strategy, context: &ContextVector) -> f64 {
        self.cmab.mean_score(strategy, context)
    }

    pub fn get_statistics(&self) -> ApsStatistics {
        ApsStatistics {
            total_rounds: self.total_rounds,
            total_tasks_selected: self.total_tasks_selected,
            recent_strategies: self
                .strategy_history
                .iter()
                .rev()
                .take(10)
                .rev()
                .map(|s| s.as_str().to_string())
                .collect(),
            cmab: self.cmab.strategy_stats(),
        }
    }
}
