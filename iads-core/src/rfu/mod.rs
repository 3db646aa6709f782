//! # Result Fusion Unit
//!
//! Closes the learning loop. Before a batch executes, the unit
//! snapshots posterior entropy for every selected state; after results
//! return it folds successful measurements into the state table,
//! credits the realized uncertainty reduction, debits probing cost and
//! produces the scalar reward the bandit learns from:
//!
//! ```text
//! reward = w_unc · Σ ΔU / (|selected| · ΔU_max) − w_cost · |selected| / K_max
//! ```
//!
//! Failed probes contribute no uncertainty reduction but still count
//! toward cost.

use crate::config::IadsConfig;
use crate::esm::EntityStateManager;
use crate::error::Result;
use crate::types::{EntityId, Metric, ProbeResult, ScheduledProbe};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, instrument};

/// Bounded history of per-round fusion records
const ROUND_HISTORY_LIMIT: usize = 100;

/// Realized entropy reduction for one state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaRecord {
    pub entity_id: EntityId,
    pub metric: Metric,
    pub delta: f64,
}

/// Result of fusing one round's probe batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionOutcome {
    /// States whose posterior absorbed a measurement
    pub updated_states: usize,
    /// Probes that failed outright
    pub failed: usize,
    /// Reward for the bandit, in `[−w_cost, w_unc]`
    pub reward: f64,
    /// Per-state entropy reduction, uncapped
    pub delta_uncertainty: Vec<DeltaRecord>,
}

/// One round's bookkeeping, kept for `report()`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundRecord {
    pub round: u64,
    pub selected: usize,
    pub updated: usize,
    pub failed: usize,
    pub reward: f64,
}

/// Fusion statistics for `status()`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RfuStatistics {
    pub total_rounds: u64,
    pub total_updated: u64,
    pub total_failed: u64,
    pub mean_reward: f64,
    /// Most recent rewards, newest last
    pub recent_rewards: Vec<f64>,
}

/// The fusion unit; see module docs
pub struct ResultFusionUnit {
    config: IadsConfig,
    /// Raw entropy per selected state, captured before the batch ran
    before: HashMap<(EntityId, Metric), f64>,
    selected_count: usize,
    rounds: u64,
    total_updated: u64,
    total_failed: u64,
    reward_sum: f64,
    history: VecDeque<RoundRecord>,
}

impl ResultFusionUnit {
    pub fn new(config: IadsConfig) -> Self {
        Self {
            config,
            before: HashMap::new(),
            selected_count: 0,
            rounds: 0,
            total_updated: 0,
            total_failed: 0,
            reward_sum: 0.0,
            history: VecDeque::new(),
        }
    }

    /// Snapshot posterior entropy of every selected state.
    ///
    /// Must run after selection and before the batch executes; the
    /// following [`ResultFusionUnit::process_results`] call computes ΔU
    /// against these values.
    #[instrument(skip_all, fields(selected = selected.len()))]
    pub fn cache_states_before_probe(
        &mut self,
        selected: &[ScheduledProbe],
        esm: &EntityStateManager,
    ) {
        self.before.clear();
        self.selected_count = selected.len();
        for probe in selected {
            if let Some(state) = esm.get_state(&probe.task.entity_id, probe.task.metric) {
                self.before
                    .insert(probe.task.key(), state.raw_entropy());
            }
        }
    }

    /// Fold a batch of results into the state table and compute the
    /// round's reward.
    #[instrument(skip_all, fields(results = results.len()))]
    pub fn process_results(
        &mut self,
        results: &[ProbeResult],
        esm: &mut EntityStateManager,
    ) -> Result<FusionOutcome> {
        let selected = if self.selected_count > 0 {
            self.selected_count
        } else {
            results.len()
        };

        let mut updated_states = 0;
        let mut failed = 0;
        let mut delta_records = Vec::new();
        let mut capped_delta_sum = 0.0;

        for result in results {
            if !result.success {
                failed += 1;
                continue;
            }

            if !esm.update_distribution(&result.entity_id, result.metric, result.value)? {
                continue;
            }
            updated_states += 1;

            let key = (result.entity_id.clone(), result.metric);
            if let (Some(&before), Some(state)) = (self.before.get(&key), esm.get_state(&result.entity_id, result.metric)) {
                let delta = (before - state.raw_entropy()).max(0.0);
                capped_delta_sum += delta.min(self.config.reward.max_uncertainty_reduction);
                delta_records.push(DeltaRecord {
                    entity_id: result.entity_id.clone(),
                    metric: result.metric,
                    delta,
                });
            }
        }

        let reward = self.reward(selected, capped_delta_sum);

        self.rounds += 1;
        self.total_updated += updated_states as u64;
        self.total_failed += failed as u64;
        self.reward_sum += reward;
        self.history.push_back(RoundRecord {
            round: self.rounds,
            selected,
            updated: updated_states,
            failed,
            reward,
        });
        while self.history.len() > ROUND_HISTORY_LIMIT {
            self.history.pop_front();
        }

        debug!(updated_states, failed, reward, "round fused");

        Ok(FusionOutcome {
            updated_states,
            failed,
            reward,
            delta_uncertainty: delta_records,
        })
    }

    /// Reward in `[−w_cost, w_unc]`; an empty round scores zero
    fn reward(&self, selected: usize, capped_delta_sum: f64) -> f64 {
        if selected == 0 {
            return 0.0;
        }
        let rw = &self.config.reward;
        let gain = capped_delta_sum / (selected as f64 * rw.max_uncertainty_reduction);
        let cost = selected as f64 / self.config.system.top_k.max(1) as f64;
        rw.uncertainty_weight * gain - rw.cost_weight * cost.min(1.0)
    }

    /// Fusion rounds processed so far
    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    /// Bounded per-round history, oldest first
    pub fn update_summary(&self) -> Vec<RoundRecord> {
        self.history.iter().cloned().collect()
    }

    pub fn get_statistics(&self) -> RfuStatistics {
        RfuStatistics {
            total_rounds: self.rounds,
            total_updated: self.total_updated,
            total_failed: self.total_failed,
            mean_reward: if self.rounds == 0 {
                0.0
            } else {
                self.reward_sum / self.rounds as f64
            },
            recent_rewards: self.history.iter().rev().take(10).rev().map(|r| r.reward).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::types::{PriorityComponents, ProbeTask};
    use proptest::prelude::*;

    fn schedule(esm: &EntityStateManager, picks: &[(&str, Metric)]) -> Vec<ScheduledProbe> {
        picks
            .iter()
            .map(|(id, metric)| ScheduledProbe {
                task: ProbeTask::new(EntityId::from(*id), *metric),
                priority: 1.0,
                components: PriorityComponents::default(),
            })
            .collect()
    }

    fn setup(entities: &[&str]) -> (EntityStateManager, ResultFusionUnit) {
        let config = IadsConfig::default();
        let clock = ManualClock::shared(1_000.0);
        let mut esm = EntityStateManager::new(config.clone(), clock);
        for id in entities {
            esm.add_entity(EntityId::from(*id));
        }
        (esm, ResultFusionUnit::new(config))
    }

    #[test]
    fn successful_batch_yields_positive_reward() {
        // wide Gaussians shrink a lot on the first update, reward goes positive
        let (mut esm, mut rfu) = setup(&["1-1:2-1"]);
        let picks = schedule(
            &esm,
            &[("1-1:2-1", Metric::Rtt), ("1-1:2-1", Metric::Bandwidth)],
        );
        rfu.cache_states_before_probe(&picks, &esm);

        let results = vec![
            ProbeResult::success(EntityId::from("1-1:2-1"), Metric::Rtt, 11.0, 1_000.0),
            ProbeResult::success(EntityId::from("1-1:2-1"), Metric::Bandwidth, 95.0, 1_000.0),
        ];
        let outcome = rfu.process_results(&results, &mut esm).unwrap();

        assert_eq!(outcome.updated_states, 2);
        assert_eq!(outcome.failed, 0);
        assert!(outcome.reward > 0.0, "reward: {}", outcome.reward);
        assert!(outcome.delta_uncertainty.iter().all(|d| d.delta >= 0.0));
    }

    #[test]
    fn all_failures_cost_exactly_the_cost_weight() {
        // a full batch of failures: no state change, reward = −w_cost
        let (mut esm, mut rfu) = setup(&["1-1:2-1", "1-2:3-1"]);
        let picks = schedule(
            &esm,
            &[
                ("1-1:2-1", Metric::Rtt),
                ("1-1:2-1", Metric::Plr),
                ("1-1:2-1", Metric::Bandwidth),
                ("1-2:3-1", Metric::Rtt),
                ("1-2:3-1", Metric::Liveness),
            ],
        );
        rfu.cache_states_before_probe(&picks, &esm);

        let variance_before: Vec<f64> = esm.states().map(|s| s.distribution.variance()).collect();
        let intervals_before: Vec<f64> = esm.states().map(|s| s.probe_interval()).collect();

        let results: Vec<ProbeResult> = picks
            .iter()
            .map(|p| {
                ProbeResult::failure(
                    p.task.entity_id.clone(),
                    p.task.metric,
                    1_000.0,
                    "probe timed out",
                )
            })
            .collect();
        let outcome = rfu.process_results(&results, &mut esm).unwrap();

        assert_eq!(outcome.updated_states, 0);
        assert_eq!(outcome.failed, 5);
        assert!((outcome.reward + 0.3).abs() < 1e-9, "reward: {}", outcome.reward);

        let variance_after: Vec<f64> = esm.states().map(|s| s.distribution.variance()).collect();
        let intervals_after: Vec<f64> = esm.states().map(|s| s.probe_interval()).collect();
        assert_eq!(variance_before, variance_after);
        assert_eq!(intervals_before, intervals_after);
    }

    #[test]
    fn mixed_batch_counts_failures_in_cost() {
        let (mut esm, mut rfu) = setup(&["1-1:2-1"]);
        let picks = schedule(
            &esm,
            &[("1-1:2-1", Metric::Rtt), ("1-1:2-1", Metric::Plr)],
        );
        rfu.cache_states_before_probe(&picks, &esm);

        let results = vec![
            ProbeResult::success(EntityId::from("1-1:2-1"), Metric::Rtt, 10.0, 1_000.0),
            ProbeResult::failure(EntityId::from("1-1:2-1"), Metric::Plr, 1_000.0, "lost"),
        ];
        let outcome = rfu.process_results(&results, &mut esm).unwrap();
        assert_eq!(outcome.updated_states, 1);
        assert_eq!(outcome.failed, 1);

        // gain ≤ w_unc·(1/2), cost = 0.3·(2/5)
        assert!(outcome.reward <= 0.7 * 0.5 - 0.3 * 0.4 + 1e-9);
    }

    #[test]
    fn result_for_unknown_state_is_skipped() {
        let (mut esm, mut rfu) = setup(&["1-1:2-1"]);
        let picks = schedule(&esm, &[("1-1:2-1", Metric::Rtt)]);
        rfu.cache_states_before_probe(&picks, &esm);

        let results = vec![ProbeResult::success(
            EntityId::from("9-9:9-9"),
            Metric::Rtt,
            10.0,
            1_000.0,
        )];
        let outcome = rfu.process_results(&results, &mut esm).unwrap();
        assert_eq!(outcome.updated_states, 0);
        assert_eq!(outcome.failed, 0);
    }

    #[test]
    fn statistics_track_rounds_and_rewards() {
        let (mut esm, mut rfu) = setup(&["1-1:2-1"]);
        for _ in 0..3 {
            let picks = schedule(&esm, &[("1-1:2-1", Metric::Rtt)]);
            rfu.cache_states_before_probe(&picks, &esm);
            let results = vec![ProbeResult::success(
                EntityId::from("1-1:2-1"),
                Metric::Rtt,
                10.0,
                1_000.0,
            )];
            rfu.process_results(&results, &mut esm).unwrap();
        }

        let stats = rfu.get_statistics();
        assert_eq!(stats.total_rounds, 3);
        assert_eq!(stats.total_updated, 3);
        assert_eq!(stats.recent_rewards.len(), 3);
        assert_eq!(rfu.update_summary().len(), 3);
    }

    proptest! {
        #[test]
        fn reward_stays_inside_bounds(
            successes in 0usize..10,
            failures in 0usize..10,
            value in 0.0f64..200.0,
        ) {
            // reward stays inside [−w_cost, w_unc]
            let (mut esm, mut rfu) = setup(&["1-1:2-1", "1-2:3-1"]);
            let ids = [EntityId::from("1-1:2-1"), EntityId::from("1-2:3-1")];

            let mut picks = Vec::new();
            let mut results = Vec::new();
            for i in 0..successes + failures {
                let entity = ids[i % 2].clone();
                let metric = Metric::ALL[i % 4];
                picks.push(ScheduledProbe {
                    task: ProbeTask::new(entity.clone(), metric),
                    priority: 0.0,
                    components: PriorityComponents::default(),
                });
                results.push(if i < successes {
                    ProbeResult::success(entity, metric, value, 0.0)
                } else {
                    ProbeResult::failure(entity, metric, 0.0, "down")
                });
            }

            rfu.cache_states_before_probe(&picks, &esm);
            let outcome = rfu.process_results(&results, &mut esm).unwrap();
            prop_assert!(outcome.reward >= -0.3 - 1e-9);
            prop_assert!(outcome.reward <= 0.7 + 1e-9);
        }
    }
}
