//! # Event Manager
//!
//! Periodically inspects the state table and raises short-lived events:
//!
//! | metric          | rule                                   | event              |
//! |-----------------|----------------------------------------|--------------------|
//! | liveness        | `P(up) < liveness_threshold`           | `liveness_low`     |
//! | rtt/plr/bw      | stability above threshold              | `high_instability` |
//! | rtt             | posterior mean departs its own history | `rtt_spike`        |
//!
//! Every fired event raises the matching event trigger for the current
//! round; core entities escalate rtt and liveness trouble onto their
//! plr and bandwidth states. Triggers are cleared at the start of every
//! detection pass.

use crate::clock::Clock;
use crate::config::IadsConfig;
use crate::esm::EntityStateManager;
use crate::types::{EntityId, Metric};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Hard cap on retained events
const EVENT_CAPACITY: usize = 10_000;

/// Per-state cap on the spike-detection baseline
const SPIKE_HISTORY_CAPACITY: usize = 100;

/// Minimum baseline points before spike detection engages
const SPIKE_MIN_HISTORY: usize = 10;

/// Observations a liveness posterior needs before the threshold rule
/// applies; keeps fresh Beta(1,1) priors from reading as outages
const LIVENESS_MIN_OBSERVATIONS: u64 = 5;

/// Kind of anomaly an event reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Liveness posterior dropped below the up-probability threshold
    LivenessLow,
    /// Windowed variance exceeded the stability threshold
    HighInstability,
    /// Posterior mean jumped relative to its recent baseline
    RttSpike,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::LivenessLow => "liveness_low",
            EventType::HighInstability => "high_instability",
            EventType::RttSpike => "rtt_spike",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detected anomaly. Events are immutable once created and are
/// evicted by age or capacity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub entity_id: EntityId,
    pub metric: Metric,
    pub event_type: EventType,
    /// Severity in `[0, 1]`
    pub severity: f64,
    /// Wall-clock seconds when the event fired
    pub timestamp: f64,
    pub details: serde_json::Value,
}

/// Event statistics for `status()`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmStatistics {
    pub total_events: u64,
    pub recent_event_count: usize,
    /// Events per second over the span of the recent window
    pub event_rate: f64,
    pub events_by_type: HashMap<String, u64>,
    pub events_by_metric: HashMap<String, u64>,
    /// Entities with the most events, busiest first
    pub top_entities: Vec<(String, u64)>,
    pub active_triggers: usize,
}

/// Grouped view of recent anomalies for `report()`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnomalySummary {
    pub liveness_issues: Vec<Event>,
    pub instability_issues: Vec<Event>,
    pub value_spikes: Vec<Event>,
}

/// The detector; see module docs
pub struct EventManager {
    config: IadsConfig,
    clock: Arc<dyn Clock>,
    /// All retained events, oldest first
    events: VecDeque<Event>,
    /// Events inside the sliding window, oldest first
    recent: VecDeque<Event>,
    /// Event triggers for the current round: 0.0 or 1.0 per state
    triggers: HashMap<(EntityId, Metric), f64>,
    /// Entities whose trouble escalates across metrics
    core_entities: HashSet<EntityId>,
    /// Posterior-mean baseline per state for spike detection
    spike_history: HashMap<(EntityId, Metric), VecDeque<f64>>,
    total_events: u64,
    events_by_type: HashMap<String, u64>,
    events_by_metric: HashMap<String, u64>,
    events_by_entity: HashMap<EntityId, u64>,
}

impl EventManager {
    pub fn new(config: IadsConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            events: VecDeque::new(),
            recent: VecDeque::new(),
            triggers: HashMap::new(),
            core_entities: HashSet::new(),
            spike_history: HashMap::new(),
            total_events: 0,
            events_by_type: HashMap::new(),
            events_by_metric: HashMap::new(),
            events_by_entity: HashMap::new(),
        }
    }

    /// Mark an entity as core; its rtt and liveness events escalate
    /// triggers onto plr and bandwidth.
    pub fn add_core_entity(&mut self, entity_id: EntityId) {
        self.core_entities.insert(entity_id);
    }

    pub fn is_core_entity(&self, entity_id: &EntityId) -> bool {
        self.core_entities.contains(entity_id)
    }

    /// Run one detection pass over the whole state table.
    ///
    /// Clears all triggers, evicts aged events, applies the three
    /// detection rules and re-raises triggers for everything that
    /// fired. Returns the newly created events.
    #[instrument(skip_all)]
    pub fn detect_events(&mut self, esm: &EntityStateManager) -> Vec<Event> {
        let now = self.clock.now();
        self.evict_recent(now);
        self.triggers.clear();

        let mut fired = Vec::new();
        for state in esm.states() {
            let entity_id = state.entity_id().clone();
            let metric = state.metric();

            match metric {
                Metric::Liveness => {
                    let p_up = state.distribution.confidence();
                    if state.probe_count() >= LIVENESS_MIN_OBSERVATIONS
                        && p_up < self.config.events.liveness_threshold
                    {
                        fired.push(Event {
                            entity_id: entity_id.clone(),
                            metric,
                            event_type: EventType::LivenessLow,
                            severity: (1.0 - p_up).clamp(0.0, 1.0),
                            timestamp: now,
                            details: serde_json::json!({ "p_up": p_up }),
                        });
                    }
                }
                Metric::Rtt | Metric::Plr | Metric::Bandwidth => {
                    let normalized = state.normalized_stability(self.config.aps.max_stability);
                    let threshold =
                        self.config.events.stability_threshold / self.config.aps.max_stability;
                    if normalized > threshold {
                        fired.push(Event {
                            entity_id: entity_id.clone(),
                            metric,
                            event_type: EventType::HighInstability,
                            severity: normalized.min(1.0),
                            timestamp: now,
                            details: serde_json::json!({ "stability": normalized }),
                        });
                    }

                    if metric == Metric::Rtt {
                        if let Some(event) =
                            self.check_rtt_spike(&entity_id, state.distribution.mean(), now)
                        {
                            fired.push(event);
                        }
                    }
                }
            }
        }

        for event in &fired {
            self.raise(event);
        }
        if !fired.is_empty() {
            debug!(fired = fired.len(), "detection pass raised events");
        }
        fired
    }

    /// Spike rule: the current posterior mean against the baseline of
    /// means recorded by previous passes. The baseline includes the
    /// current point so a constant history followed by one jump remains
    /// detectable.
    fn check_rtt_spike(&mut self, entity_id: &EntityId, current: f64, now: f64) -> Option<Event> {
        let history = self
            .spike_history
            .entry((entity_id.clone(), Metric::Rtt))
            .or_default();
        history.push_back(current);
        while history.len() > SPIKE_HISTORY_CAPACITY {
            history.pop_front();
        }
        if history.len() < SPIKE_MIN_HISTORY {
            return None;
        }

        let n = history.len() as f64;
        let mean = history.iter().sum::<f64>() / n;
        let std = (history.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
        if std <= 0.0 {
            return None;
        }

        let deviation = (current - mean).abs();
        if deviation <= self.config.events.rtt_spike_factor * std {
            return None;
        }

        Some(Event {
            entity_id: entity_id.clone(),
            metric: Metric::Rtt,
            event_type: EventType::RttSpike,
            severity: (deviation / (5.0 * std)).min(1.0),
            timestamp: now,
            details: serde_json::json!({
                "current": current,
                "historical_mean": mean,
                "deviation": deviation,
            }),
        })
    }

    /// Record a fired event and raise its triggers
    fn raise(&mut self, event: &Event) {
        if event.severity >= 0.9 {
            warn!(
                entity = %event.entity_id,
                metric = %event.metric,
                kind = %event.event_type,
                severity = event.severity,
                "severe anomaly"
            );
        }

        self.events.push_back(event.clone());
        while self.events.len() > EVENT_CAPACITY {
            self.events.pop_front();
        }
        self.recent.push_back(event.clone());

        self.total_events += 1;
        *self
            .events_by_type
            .entry(event.event_type.as_str().to_string())
            .or_default() += 1;
        *self
            .events_by_metric
            .entry(event.metric.as_str().to_string())
            .or_default() += 1;
        *self
            .events_by_entity
            .entry(event.entity_id.clone())
            .or_default() += 1;

        self.triggers
            .insert((event.entity_id.clone(), event.metric), 1.0);

        // cross-metric escalation on core entities
        if self.core_entities.contains(&event.entity_id)
            && matches!(event.metric, Metric::Rtt | Metric::Liveness)
        {
            for metric in [Metric::Plr, Metric::Bandwidth] {
                self.triggers.insert((event.entity_id.clone(), metric), 1.0);
            }
        }
    }

    fn evict_recent(&mut self, now: f64) {
        let cutoff = now - self.config.system.sliding_window;
        while self
            .recent
            .front()
            .map(|event| event.timestamp < cutoff)
            .unwrap_or(false)
        {
            self.recent.pop_front();
        }
    }

    /// Trigger signal for one state: 1.0 if an event fired for it this
    /// round (directly or by escalation), else 0.0
    pub fn get_event_trigger(&self, entity_id: &EntityId, metric: Metric) -> f64 {
        self.triggers
            .get(&(entity_id.clone(), metric))
            .copied()
            .unwrap_or(0.0)
    }

    /// Events currently inside the sliding window
    pub fn recent_event_count(&self) -> usize {
        self.recent.len()
    }

    /// Recent events normalized against the configured ceiling, in `[0, 1]`
    pub fn recent_event_count_normalized(&self) -> f64 {
        (self.recent.len() as f64 / self.config.events.max_recent_events as f64).min(1.0)
    }

    /// Most recent events, newest first
    pub fn recent_events(&self, limit: usize) -> Vec<Event> {
        self.recent.iter().rev().take(limit).cloned().collect()
    }

    /// Retained events for one entity, newest first
    pub fn events_for_entity(&self, entity_id: &EntityId, limit: usize) -> Vec<Event> {
        self.events
            .iter()
            .rev()
            .filter(|event| &event.entity_id == entity_id)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn get_statistics(&self) -> EmStatistics {
        let event_rate = match (self.recent.front(), self.recent.back()) {
            (Some(first), Some(last)) if last.timestamp > first.timestamp => {
                self.recent.len() as f64 / (last.timestamp - first.timestamp)
            }
            _ => 0.0,
        };

        let mut top_entities: Vec<(String, u64)> = self
            .events_by_entity
            .iter()
            .map(|(id, count)| (id.to_string(), *count))
            .collect();
        top_entities.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top_entities.truncate(10);

        EmStatistics {
            total_events: self.total_events,
            recent_event_count: self.recent.len(),
            event_rate,
            events_by_type: self.events_by_type.clone(),
            events_by_metric: self.events_by_metric.clone(),
            top_entities,
            active_triggers: self.triggers.values().filter(|v| **v > 0.0).count(),
        }
    }

    /// Recent anomalies grouped by kind
    pub fn anomaly_summary(&self) -> AnomalySummary {
        let mut summary = AnomalySummary::default();
        for event in &self.recent {
            match event.event_type {
                EventType::LivenessLow => summary.liveness_issues.push(event.clone()),
                EventType::HighInstability => summary.instability_issues.push(event.clone()),
                EventType::RttSpike => summary.value_spikes.push(event.clone()),
            }
        }
        summary
    }

    #[cfg(test)]
    pub(crate) fn set_trigger_for_test(&mut self, entity_id: EntityId, metric: Metric) {
        self.triggers.insert((entity_id, metric), 1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn setup(entities: &[&str]) -> (EntityStateManager, EventManager, Arc<ManualClock>) {
        let config = IadsConfig::default();
        let clock = ManualClock::shared(1_000.0);
        let mut esm = EntityStateManager::new(config.clone(), clock.clone());
        for id in entities {
            esm.add_entity(EntityId::from(*id));
        }
        let em = EventManager::new(config, clock.clone());
        (esm, em, clock)
    }

    #[test]
    fn healthy_table_raises_nothing() {
        let (esm, mut em, _) = setup(&["1-1:2-1"]);
        assert!(em.detect_events(&esm).is_empty());
        assert_eq!(em.recent_event_count(), 0);
    }

    #[test]
    fn barely_observed_liveness_stays_silent() {
        // Beta(2,1) has P(up) ≈ 0.67 but one observation is not an outage
        let (mut esm, mut em, _) = setup(&["1-1:2-1"]);
        let id = EntityId::from("1-1:2-1");
        esm.update_distribution(&id, Metric::Liveness, 1.0).unwrap();

        let fired = em.detect_events(&esm);
        assert!(fired.iter().all(|e| e.event_type != EventType::LivenessLow));
    }

    #[test]
    fn liveness_low_fires_with_matching_severity() {
        // Beta(1, 9) → P(up) = 0.1, severity 0.9
        let (mut esm, mut em, _) = setup(&["1-2:3-1"]);
        let id = EntityId::from("1-2:3-1");
        for _ in 0..8 {
            esm.update_distribution(&id, Metric::Liveness, 0.0).unwrap();
        }

        let fired = em.detect_events(&esm);
        let event = fired
            .iter()
            .find(|e| e.event_type == EventType::LivenessLow)
            .expect("liveness_low expected");
        assert!((event.severity - 0.9).abs() < 1e-9);
        assert_eq!(em.get_event_trigger(&id, Metric::Liveness), 1.0);
    }

    #[test]
    fn core_entity_escalates_to_plr_and_bandwidth() {
        let (mut esm, mut em, _) = setup(&["1-2:3-1"]);
        let id = EntityId::from("1-2:3-1");
        em.add_core_entity(id.clone());
        for _ in 0..8 {
            esm.update_distribution(&id, Metric::Liveness, 0.0).unwrap();
        }

        em.detect_events(&esm);
        assert_eq!(em.get_event_trigger(&id, Metric::Plr), 1.0);
        assert_eq!(em.get_event_trigger(&id, Metric::Bandwidth), 1.0);
    }

    #[test]
    fn non_core_entity_does_not_escalate() {
        let (mut esm, mut em, _) = setup(&["1-2:3-1"]);
        let id = EntityId::from("1-2:3-1");
        for _ in 0..8 {
            esm.update_distribution(&id, Metric::Liveness, 0.0).unwrap();
        }

        em.detect_events(&esm);
        assert_eq!(em.get_event_trigger(&id, Metric::Plr), 0.0);
        assert_eq!(em.get_event_trigger(&id, Metric::Bandwidth), 0.0);
    }

    #[test]
    fn unstable_state_raises_high_instability() {
        let (mut esm, mut em, _) = setup(&["1-1:2-1"]);
        let id = EntityId::from("1-1:2-1");
        for i in 0..20 {
            let v = if i % 2 == 0 { 0.0 } else { 100.0 };
            esm.update_distribution(&id, Metric::Bandwidth, v).unwrap();
        }

        let fired = em.detect_events(&esm);
        let event = fired
            .iter()
            .find(|e| e.event_type == EventType::HighInstability && e.metric == Metric::Bandwidth)
            .expect("high_instability expected");
        assert_eq!(event.severity, 1.0);
    }

    #[test]
    fn rtt_spike_fires_after_constant_baseline() {
        // ten quiet 10 ms rounds, then one 40 ms measurement
        let (mut esm, mut em, _) = setup(&["1-1:2-1"]);
        let id = EntityId::from("1-1:2-1");

        for _ in 0..10 {
            esm.update_distribution(&id, Metric::Rtt, 10.0).unwrap();
            let fired = em.detect_events(&esm);
            assert!(fired.iter().all(|e| e.event_type != EventType::RttSpike));
        }

        esm.update_distribution(&id, Metric::Rtt, 40.0).unwrap();
        let fired = em.detect_events(&esm);
        let spike = fired
            .iter()
            .find(|e| e.event_type == EventType::RttSpike)
            .expect("rtt_spike expected");
        assert!(spike.severity >= 0.6, "severity too low: {}", spike.severity);
        assert_eq!(em.get_event_trigger(&id, Metric::Rtt), 1.0);
    }

    #[test]
    fn triggers_clear_at_each_pass() {
        let (mut esm, mut em, _) = setup(&["1-2:3-1"]);
        let id = EntityId::from("1-2:3-1");
        for _ in 0..8 {
            esm.update_distribution(&id, Metric::Liveness, 0.0).unwrap();
        }
        em.detect_events(&esm);
        assert_eq!(em.get_event_trigger(&id, Metric::Liveness), 1.0);

        // recover the link; the next pass must drop the trigger
        for _ in 0..80 {
            esm.update_distribution(&id, Metric::Liveness, 1.0).unwrap();
        }
        em.detect_events(&esm);
        assert_eq!(em.get_event_trigger(&id, Metric::Liveness), 0.0);
    }

    #[test]
    fn sliding_window_evicts_old_events() {
        let (mut esm, mut em, clock) = setup(&["1-2:3-1"]);
        let id = EntityId::from("1-2:3-1");
        for _ in 0..8 {
            esm.update_distribution(&id, Metric::Liveness, 0.0).unwrap();
        }

        em.detect_events(&esm);
        assert!(em.recent_event_count() > 0);

        clock.advance(301.0);
        em.detect_events(&esm);
        // the old event left the window; this pass re-raised a fresh one
        assert!(em.recent_events(10).iter().all(|e| e.timestamp >= clock.now()));
    }

    #[test]
    fn normalized_recent_count_caps_at_one() {
        let (esm, mut em, _) = setup(&[]);
        for i in 0..500 {
            em.raise(&Event {
                entity_id: EntityId::from("1-1:2-1"),
                metric: Metric::Rtt,
                event_type: EventType::RttSpike,
                severity: 0.5,
                timestamp: 1_000.0 + i as f64,
                details: serde_json::Value::Null,
            });
        }
        let _ = esm;
        assert_eq!(em.recent_event_count_normalized(), 1.0);
    }

    #[test]
    fn statistics_aggregate_by_type_and_entity() {
        let (mut esm, mut em, _) = setup(&["1-2:3-1"]);
        let id = EntityId::from("1-2:3-1");
        for _ in 0..8 {
            esm.update_distribution(&id, Metric::Liveness, 0.0).unwrap();
        }
        em.detect_events(&esm);
        em.detect_events(&esm);

        let stats = em.get_statistics();
        assert_eq!(stats.total_events, 2);
        assert_eq!(stats.events_by_type.get("liveness_low"), Some(&2));
        assert_eq!(stats.top_entities[0].0, "1-2:3-1");
        assert_eq!(stats.active_triggers, 1);
    }

    #[test]
    fn anomaly_summary_groups_by_kind() {
        let (mut esm, mut em, _) = setup(&["1-2:3-1"]);
        let id = EntityId::from("1-2:3-1");
        for _ in 0..8 {
            esm.update_distribution(&id, Metric::Liveness, 0.0).unwrap();
        }
        em.detect_events(&esm);

        let summary = em.anomaly_summary();
        assert_eq!(summary.liveness_issues.len(), 1);
        assert!(summary.instability_issues.is_empty());
        assert!(summary.value_spikes.is_empty());
    }
}
