//! # Entity State Manager
//!
//! The single mutable store of the pipeline. Holds one [`EntityState`]
//! per (entity, metric), performs Bayesian posterior updates, maintains
//! the bounded measurement history and the stability estimate derived
//! from it, and computes the normalized context vector consumed by the
//! scheduler.
//!
//! ## Responsibilities
//!
//! - Create states idempotently as topology reports entities
//! - Fold measurements into posteriors (family-specific conjugate updates)
//! - Track stability (windowed variance) and urgency (overdue ratio)
//! - Expose population summaries: context vector, statistics, top-N lists

use crate::clock::Clock;
use crate::config::IadsConfig;
use crate::distribution::Distribution;
use crate::error::Result;
use crate::types::{ContextVector, EntityId, Metric};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Tracked state of one (entity, metric) pair
#[derive(Debug, Clone)]
pub struct EntityState {
    entity_id: EntityId,
    metric: Metric,
    /// Current posterior over the metric value
    pub distribution: Distribution,
    /// Windowed variance of recent measurements, clamped to `[0, max_stability]`
    stability: f64,
    /// Suggested seconds between probes, clamped to `[min, max]`
    probe_interval: f64,
    /// Wall clock of the last successful measurement (creation time until then)
    last_probe_time: f64,
    /// Recent raw measurements (success indicator for Beta states)
    history: VecDeque<f64>,
    probe_count: u64,
}

impl EntityState {
    fn new(entity_id: EntityId, metric: Metric, config: &IadsConfig, now: f64) -> Self {
        Self {
            entity_id,
            metric,
            distribution: config.initial.for_metric(metric),
            stability: 0.0,
            probe_interval: config.system.probe_interval_default,
            last_probe_time: now,
            history: VecDeque::with_capacity(config.system.history_capacity),
            probe_count: 0,
        }
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// Posterior entropy clamped into `[0, max_uncertainty]` for scheduling
    pub fn uncertainty(&self, max_uncertainty: f64) -> f64 {
        self.distribution.entropy().clamp(0.0, max_uncertainty)
    }

    /// Unclamped posterior entropy (may be negative)
    pub fn raw_entropy(&self) -> f64 {
        self.distribution.entropy()
    }

    /// Raw stability estimate in `[0, max_stability]`
    pub fn stability(&self) -> f64 {
        self.stability
    }

    /// Stability scaled into `[0, 1]`
    pub fn normalized_stability(&self, max_stability: f64) -> f64 {
        (self.stability / max_stability).clamp(0.0, 1.0)
    }

    /// Current probe interval in seconds
    pub fn probe_interval(&self) -> f64 {
        self.probe_interval
    }

    /// Wall clock of the last successful measurement
    pub fn last_probe_time(&self) -> f64 {
        self.last_probe_time
    }

    /// Number of successful measurements folded into this state
    pub fn probe_count(&self) -> u64 {
        self.probe_count
    }

    /// How overdue the state is relative to its interval, capped at 2.0
    pub fn urgency(&self, now: f64) -> f64 {
        let elapsed = (now - self.last_probe_time).max(0.0);
        (elapsed / self.probe_interval).min(2.0)
    }

    /// Recent measurements, oldest first
    pub fn history(&self) -> impl Iterator<Item = f64> + '_ {
        self.history.iter().copied()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Store an interval the caller has already clamped
    pub(crate) fn set_probe_interval_clamped(&mut self, interval: f64) {
        self.probe_interval = interval;
    }

    fn record(&mut self, measurement: f64, noise_var: f64, config: &IadsConfig, now: f64) {
        // Beta states remember the indicator, not the raw value
        let recorded = if self.distribution.is_beta() {
            if measurement > 0.5 {
                1.0
            } else {
                0.0
            }
        } else {
            measurement
        };

        self.distribution.update(measurement, noise_var);

        self.history.push_back(recorded);
        while self.history.len() > config.system.history_capacity {
            self.history.pop_front();
        }

        self.stability = self.windowed_variance(config.system.stability_window)
            .clamp(0.0, config.aps.max_stability);
        self.last_probe_time = now;
        self.probe_count += 1;
    }

    /// Variance over the last `window` history entries; 0 with fewer than 2
    fn windowed_variance(&self, window: usize) -> f64 {
        let len = self.history.len();
        let take = len.min(window);
        if take < 2 {
            return 0.0;
        }
        let recent = self.history.iter().skip(len - take);
        let mean: f64 = recent.clone().sum::<f64>() / take as f64;
        recent.map(|v| (v - mean).powi(2)).sum::<f64>() / take as f64
    }
}

/// Population summary exposed through `status()`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EsmStatistics {
    pub entity_count: usize,
    pub state_count: usize,
    pub total_probes: u64,
    /// Mean normalized uncertainty per metric
    pub mean_uncertainty: HashMap<String, f64>,
    /// Mean normalized stability per metric
    pub mean_stability: HashMap<String, f64>,
}

/// Owner of the state table; see module docs
pub struct EntityStateManager {
    config: IadsConfig,
    clock: Arc<dyn Clock>,
    states: HashMap<(EntityId, Metric), EntityState>,
    entities: BTreeSet<EntityId>,
    /// (entity, metric) pairs already reported missing, to log only once
    missing_reported: HashSet<(EntityId, Metric)>,
}

impl EntityStateManager {
    pub fn new(config: IadsConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            states: HashMap::new(),
            entities: BTreeSet::new(),
            missing_reported: HashSet::new(),
        }
    }

    /// Register an entity, creating one state per metric. Idempotent.
    #[instrument(skip(self), fields(entity = %entity_id))]
    pub fn add_entity(&mut self, entity_id: EntityId) -> bool {
        if self.entities.contains(&entity_id) {
            return false;
        }

        let now = self.clock.now();
        for metric in Metric::ALL {
            self.states.insert(
                (entity_id.clone(), metric),
                EntityState::new(entity_id.clone(), metric, &self.config, now),
            );
        }
        self.entities.insert(entity_id.clone());
        debug!(states = self.states.len(), "registered entity");
        true
    }

    pub fn get_state(&self, entity_id: &EntityId, metric: Metric) -> Option<&EntityState> {
        self.states.get(&(entity_id.clone(), metric))
    }

    /// Fold one successful measurement into the matching state.
    ///
    /// Returns `Ok(true)` when a state was updated; a missing state is
    /// ignored (logged once per pair) and yields `Ok(false)`.
    #[instrument(skip(self), fields(entity = %entity_id, metric = %metric))]
    pub fn update_distribution(
        &mut self,
        entity_id: &EntityId,
        metric: Metric,
        measurement: f64,
    ) -> Result<bool> {
        let key = (entity_id.clone(), metric);
        let Some(state) = self.states.get_mut(&key) else {
            if self.missing_reported.insert(key) {
                warn!("measurement for unregistered state, ignoring");
            }
            return Ok(false);
        };

        let noise = self.config.noise.for_metric(metric);
        let now = self.clock.now();
        state.record(measurement, noise, &self.config, now);
        Ok(true)
    }

    /// Clamp and store a probe interval; returns the clamped value
    pub fn set_probe_interval(&mut self, entity_id: &EntityId, metric: Metric, interval: f64) -> f64 {
        let clamped = interval.clamp(
            self.config.system.probe_interval_min,
            self.config.system.probe_interval_max,
        );
        if let Some(state) = self.states.get_mut(&(entity_id.clone(), metric)) {
            state.probe_interval = clamped;
        }
        clamped
    }

    /// Normalized population snapshot for the bandit.
    ///
    /// `event_rate` is supplied by the caller from the event manager's
    /// recent-events window, keeping the borrow one-way.
    pub fn context_vector(&self, event_rate: f64) -> ContextVector {
        if self.states.is_empty() {
            return ContextVector {
                event_rate: event_rate.clamp(0.0, 1.0),
                ..ContextVector::default()
            };
        }

        let now = self.clock.now();
        let max_u = self.config.aps.max_uncertainty;
        let max_s = self.config.aps.max_stability;
        let n = self.states.len() as f64;

        let mut u_sum = 0.0;
        let mut s_sum = 0.0;
        let mut urgency_sum = 0.0;
        for state in self.states.values() {
            u_sum += state.uncertainty(max_u) / max_u;
            s_sum += state.normalized_stability(max_s);
            urgency_sum += state.urgency(now);
        }

        ContextVector {
            uncertainty_mean: u_sum / n,
            stability_mean: s_sum / n,
            urgency_mean: urgency_sum / n,
            event_rate: event_rate.clamp(0.0, 1.0),
        }
    }

    /// Registered entities in lexicographic order
    pub fn entities(&self) -> impl Iterator<Item = &EntityId> {
        self.entities.iter()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// All states, unordered
    pub fn states(&self) -> impl Iterator<Item = &EntityState> {
        self.states.values()
    }

    pub(crate) fn states_mut(&mut self) -> impl Iterator<Item = &mut EntityState> {
        self.states.values_mut()
    }

    /// Entities ranked by mean clamped entropy, highest first
    pub fn top_uncertain(&self, limit: usize) -> Vec<(EntityId, f64)> {
        self.top_by(limit, |state| {
            state.uncertainty(self.config.aps.max_uncertainty)
        })
    }

    /// Entities ranked by mean stability, highest (least stable) first
    pub fn top_unstable(&self, limit: usize) -> Vec<(EntityId, f64)> {
        self.top_by(limit, |state| state.stability())
    }

    fn top_by(&self, limit: usize, score: impl Fn(&EntityState) -> f64) -> Vec<(EntityId, f64)> {
        let mut per_entity: HashMap<&EntityId, (f64, usize)> = HashMap::new();
        for state in self.states.values() {
            let entry = per_entity.entry(&state.entity_id).or_insert((0.0, 0));
            entry.0 += score(state);
            entry.1 += 1;
        }
        let mut ranked: Vec<(EntityId, f64)> = per_entity
            .into_iter()
            .map(|(id, (sum, n))| (id.clone(), sum / n as f64))
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(limit);
        ranked
    }

    /// Population statistics for `status()`
    pub fn get_statistics(&self) -> EsmStatistics {
        let max_u = self.config.aps.max_uncertainty;
        let max_s = self.config.aps.max_stability;

        let mut uncertainty: HashMap<String, (f64, usize)> = HashMap::new();
        let mut stability: HashMap<String, (f64, usize)> = HashMap::new();
        let mut total_probes = 0;
        for state in self.states.values() {
            let key = state.metric.as_str().to_string();
            let u = uncertainty.entry(key.clone()).or_insert((0.0, 0));
            u.0 += state.uncertainty(max_u) / max_u;
            u.1 += 1;
            let s = stability.entry(key).or_insert((0.0, 0));
            s.0 += state.normalized_stability(max_s);
            s.1 += 1;
            total_probes += state.probe_count;
        }

        let finish = |m: HashMap<String, (f64, usize)>| {
            m.into_iter()
                .map(|(k, (sum, n))| (k, sum / n.max(1) as f64))
                .collect()
        };

        EsmStatistics {
            entity_count: self.entities.len(),
            state_count: self.states.len(),
            total_probes,
            mean_uncertainty: finish(uncertainty),
            mean_stability: finish(stability),
        }
    }

    pub fn config(&self) -> &IadsConfig {
        &self.config
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}
