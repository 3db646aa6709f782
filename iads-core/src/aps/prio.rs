//! Priority ranker
//!
//! Scores every task in the pool with a weighted linear mix of
//! expected information gain, urgency, strategy match and event
//! trigger, then keeps the top K. Ties break on EIG, then on entity id.

use crate::config::{ApsConfig, PriorityWeights};
use crate::em::EventManager;
use crate::esm::EntityStateManager;
use crate::types::{PriorityComponents, ProbeTask, ScheduledProbe};
use tracing::instrument;

use super::Strategy;

/// The ranking engine; see module docs
#[derive(Debug, Clone)]
pub struct Prio {
    weights: PriorityWeights,
}

impl Prio {
    pub fn new(weights: PriorityWeights) -> Self {
        Self { weights }
    }

    /// How well a task fits the round's strategy, in `[0, 1]`
    fn policy_match(
        task: &ProbeTask,
        strategy: Strategy,
        esm: &EntityStateManager,
        aps: &ApsConfig,
        event_triggered: bool,
    ) -> f64 {
        let Some(state) = esm.get_state(&task.entity_id, task.metric) else {
            return 0.0;
        };

        match strategy {
            Strategy::FocusUncertainty => {
                state.uncertainty(aps.max_uncertainty) / aps.max_uncertainty
            }
            Strategy::HighfreqUnstable => state.normalized_stability(aps.max_stability),
            Strategy::CoverageBalancer => 1.0,
            Strategy::EventTrigger => {
                if event_triggered {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    /// Weighted priority from precomputed components
    fn priority(&self, components: &PriorityComponents) -> f64 {
        self.weights.eig * components.eig
            + self.weights.urgency * components.urgency
            + self.weights.policy_match * components.policy_match
            + self.weights.event_trig * components.event_trig
    }

    /// Score the pool and keep the `k` highest-priority tasks.
    ///
    /// The result is sorted by priority descending; ties break on EIG,
    /// then entity id lexicographic, so the ranking is deterministic.
    #[instrument(skip_all, fields(pool = task_pool.len(), k = k))]
    pub fn select_top_k(
        &self,
        task_pool: &[ProbeTask],
        esm: &EntityStateManager,
        em: &EventManager,
        strategy: Strategy,
        aps: &ApsConfig,
        k: usize,
    ) -> Vec<ScheduledProbe> {
        let now = esm.clock().now();

        let mut scored: Vec<ScheduledProbe> = task_pool
            .iter()
            .filter_map(|task| {
                let state = esm.get_state(&task.entity_id, task.metric)?;
                let event_trig = em.get_event_trigger(&task.entity_id, task.metric);
                let components = PriorityComponents {
                    eig: task.eig,
                    urgency: state.urgency(now),
                    policy_match: Self::policy_match(task, strategy, esm, aps, event_trig > 0.0),
                    event_trig,
                };
                Some(ScheduledProbe {
                    priority: self.priority(&components),
                    components,
                    task: task.clone(),
                })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.priority
                .partial_cmp(&a.priority)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.components
                        .eig
                        .partial_cmp(&a.components.eig)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.task.entity_id.cmp(&b.task.entity_id))
                .then_with(|| a.task.metric.cmp(&b.task.metric))
        });
        scored.truncate(k);
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::IadsConfig;
    use crate::types::{EntityId, Metric};
    use crate::uq::UncertaintyQuantifier;
    use std::sync::Arc;

    struct Fixture {
        esm: EntityStateManager,
        em: EventManager,
        pool: Vec<ProbeTask>,
        aps: ApsConfig,
        clock: Arc<ManualClock>,
    }

    fn fixture(entities: &[&str]) -> Fixture {
        let config = IadsConfig::default();
        let clock = ManualClock::shared(1_000.0);
        let mut esm = EntityStateManager::new(config.clone(), clock.clone());
        for id in entities {
            esm.add_entity(EntityId::from(*id));
        }
        let em = EventManager::new(config.clone(), clock.clone());
        let mut uq = UncertaintyQuantifier::new();
        uq.update_entity_list(&esm);
        let pool = uq.get_task_pool_with_eig(&esm, &config.noise);
        Fixture {
            esm,
            em,
            pool,
            aps: config.aps,
            clock,
        }
    }

    #[test]
    fn returns_at_most_k_tasks_sorted_desc() {
        let f = fixture(&["1-1:2-1", "1-2:3-1"]);
        let prio = Prio::new(PriorityWeights::default());
        let selected = prio.select_top_k(&f.pool, &f.esm, &f.em, Strategy::CoverageBalancer, &f.aps, 5);

        assert_eq!(selected.len(), 5);
        for pair in selected.windows(2) {
            assert!(pair[0].priority >= pair[1].priority);
        }
        // every selection came from the pool
        for probe in &selected {
            assert!(f.pool.iter().any(|t| t.key() == probe.task.key()));
        }
    }

    #[test]
    fn k_larger_than_pool_returns_whole_pool() {
        let f = fixture(&["1-1:2-1"]);
        let prio = Prio::new(PriorityWeights::default());
        let selected = prio.select_top_k(&f.pool, &f.esm, &f.em, Strategy::CoverageBalancer, &f.aps, 50);
        assert_eq!(selected.len(), 4);
    }

    #[test]
    fn ties_break_on_entity_id() {
        let f = fixture(&["1-1:2-1", "1-2:3-1"]);
        let prio = Prio::new(PriorityWeights::default());
        let selected = prio.select_top_k(&f.pool, &f.esm, &f.em, Strategy::CoverageBalancer, &f.aps, 8);

        // rtt and bandwidth share priority on both fresh entities; the
        // lexicographically smaller entity must come first within a tie
        let same: Vec<&ScheduledProbe> = selected
            .iter()
            .filter(|p| (p.priority - selected[0].priority).abs() < 1e-12)
            .collect();
        for pair in same.windows(2) {
            if (pair[0].components.eig - pair[1].components.eig).abs() < 1e-12 {
                assert!(pair[0].task.entity_id <= pair[1].task.entity_id);
            }
        }
    }

    #[test]
    fn event_trigger_strategy_ranks_triggered_task_first() {
        let mut f = fixture(&["1-1:2-1", "1-2:3-1"]);
        let id = EntityId::from("1-2:3-1");
        f.em.set_trigger_for_test(id.clone(), Metric::Rtt);

        let prio = Prio::new(PriorityWeights::default());
        let selected = prio.select_top_k(&f.pool, &f.esm, &f.em, Strategy::EventTrigger, &f.aps, 8);

        assert_eq!(selected[0].task.entity_id, id);
        assert_eq!(selected[0].task.metric, Metric::Rtt);
        assert_eq!(selected[0].components.event_trig, 1.0);
        assert_eq!(selected[0].components.policy_match, 1.0);
    }

    #[test]
    fn focus_uncertainty_prefers_wide_posteriors() {
        let mut f = fixture(&["1-1:2-1", "1-2:3-1"]);
        // collapse every state on the first entity
        for _ in 0..200 {
            for metric in [Metric::Rtt, Metric::Plr, Metric::Bandwidth] {
                f.esm
                    .update_distribution(&EntityId::from("1-1:2-1"), metric, 1.0)
                    .unwrap();
            }
        }
        let mut uq = UncertaintyQuantifier::new();
        uq.update_entity_list(&f.esm);
        let pool = uq.get_task_pool_with_eig(&f.esm, &IadsConfig::default().noise);

        let prio = Prio::new(PriorityWeights::default());
        let selected =
            prio.select_top_k(&pool, &f.esm, &f.em, Strategy::FocusUncertainty, &f.aps, 2);
        for probe in &selected {
            assert_eq!(probe.task.entity_id, EntityId::from("1-2:3-1"));
        }
    }

    #[test]
    fn urgency_component_reflects_overdue_states() {
        let f = fixture(&["1-1:2-1"]);
        f.clock.advance(1_000.0);

        let prio = Prio::new(PriorityWeights::default());
        let selected = prio.select_top_k(&f.pool, &f.esm, &f.em, Strategy::CoverageBalancer, &f.aps, 4);
        for probe in &selected {
            assert_eq!(probe.components.urgency, 2.0);
        }
    }
}
