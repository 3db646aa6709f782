//! # Uncertainty Quantifier
//!
//! Maintains the task pool mirroring the state table and prices each
//! prospective measurement by its Expected Information Gain: the
//! entropy reduction one more observation is expected to buy against
//! the current posterior.

use crate::config::MeasurementNoise;
use crate::esm::EntityStateManager;
use crate::types::{EntityId, Metric, ProbeTask};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

/// Pool statistics for `status()`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UqStatistics {
    pub task_count: usize,
    pub mean_eig: f64,
    pub max_eig: f64,
}

/// Owner of the probing task pool; see module docs
#[derive(Debug, Default)]
pub struct UncertaintyQuantifier {
    tasks: BTreeMap<(EntityId, Metric), ProbeTask>,
}

impl UncertaintyQuantifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconcile the task pool with the state table: one task per state,
    /// tasks for vanished states dropped.
    #[instrument(skip_all)]
    pub fn update_entity_list(&mut self, esm: &EntityStateManager) {
        let before = self.tasks.len();

        for state in esm.states() {
            let key = (state.entity_id().clone(), state.metric());
            self.tasks
                .entry(key)
                .or_insert_with(|| ProbeTask::new(state.entity_id().clone(), state.metric()));
        }
        self.tasks
            .retain(|(entity_id, metric), _| esm.get_state(entity_id, *metric).is_some());

        if self.tasks.len() != before {
            debug!(tasks = self.tasks.len(), "task pool reconciled");
        }
    }

    /// Recompute EIG for every task and return the pool sorted by gain,
    /// highest first.
    #[instrument(skip_all)]
    pub fn get_task_pool_with_eig(
        &mut self,
        esm: &EntityStateManager,
        noise: &MeasurementNoise,
    ) -> Vec<ProbeTask> {
        for ((entity_id, metric), task) in self.tasks.iter_mut() {
            task.eig = match esm.get_state(entity_id, *metric) {
                Some(state) => state
                    .distribution
                    .expected_information_gain(noise.for_metric(*metric)),
                None => 0.0,
            };
        }

        let mut pool: Vec<ProbeTask> = self.tasks.values().cloned().collect();
        pool.sort_by(|a, b| {
            b.eig
                .partial_cmp(&a.eig)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.entity_id.cmp(&b.entity_id))
                .then_with(|| a.metric.cmp(&b.metric))
        });
        pool
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Pool statistics from the cached EIG values of the last recompute
    pub fn get_statistics(&self) -> UqStatistics {
        let n = self.tasks.len();
        let (sum, max) = self
            .tasks
            .values()
            .fold((0.0f64, 0.0f64), |(sum, max), task| {
                (sum + task.eig, max.max(task.eig))
            });
        UqStatistics {
            task_count: n,
            mean_eig: if n == 0 { 0.0 } else { sum / n as f64 },
            max_eig: max,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::IadsConfig;

    fn esm_with(entities: &[&str]) -> EntityStateManager {
        let mut esm = EntityStateManager::new(IadsConfig::default(), ManualClock::shared(0.0));
        for id in entities {
            esm.add_entity(EntityId::from(*id));
        }
        esm
    }

    #[test]
    fn pool_mirrors_state_table() {
        let esm = esm_with(&["1-1:2-1", "1-2:3-1"]);
        let mut uq = UncertaintyQuantifier::new();
        uq.update_entity_list(&esm);
        assert_eq!(uq.task_count(), 8);

        // reconciliation is idempotent
        uq.update_entity_list(&esm);
        assert_eq!(uq.task_count(), 8);
    }

    #[test]
    fn orphan_tasks_are_dropped() {
        let esm_two = esm_with(&["1-1:2-1", "1-2:3-1"]);
        let mut uq = UncertaintyQuantifier::new();
        uq.update_entity_list(&esm_two);
        assert_eq!(uq.task_count(), 8);

        let esm_one = esm_with(&["1-1:2-1"]);
        uq.update_entity_list(&esm_one);
        assert_eq!(uq.task_count(), 4);
    }

    #[test]
    fn pool_is_sorted_by_gain_desc() {
        let mut esm = esm_with(&["1-1:2-1"]);
        // narrow the rtt posterior so its gain drops below bandwidth's
        for _ in 0..50 {
            esm.update_distribution(&EntityId::from("1-1:2-1"), Metric::Rtt, 10.0)
                .unwrap();
        }

        let mut uq = UncertaintyQuantifier::new();
        uq.update_entity_list(&esm);
        let noise = MeasurementNoise::default();
        let pool = uq.get_task_pool_with_eig(&esm, &noise);

        assert_eq!(pool.len(), 4);
        for pair in pool.windows(2) {
            assert!(pair[0].eig >= pair[1].eig);
        }
        assert_eq!(pool[0].metric, Metric::Bandwidth);
    }

    #[test]
    fn eig_is_non_negative_across_pool() {
        // gain can never go negative, whatever the posterior shape
        let esm = esm_with(&["1-1:2-1", "1-2:3-1", "2-1:1-1"]);
        let mut uq = UncertaintyQuantifier::new();
        uq.update_entity_list(&esm);
        let pool = uq.get_task_pool_with_eig(&esm, &MeasurementNoise::default());
        assert!(pool.iter().all(|task| task.eig >= 0.0));
    }

    #[test]
    fn statistics_reflect_cached_gains() {
        let esm = esm_with(&["1-1:2-1"]);
        let mut uq = UncertaintyQuantifier::new();
        uq.update_entity_list(&esm);
        uq.get_task_pool_with_eig(&esm, &MeasurementNoise::default());

        let stats = uq.get_statistics();
        assert_eq!(stats.task_count, 4);
        assert!(stats.max_eig >= stats.mean_eig);
        assert!(stats.mean_eig > 0.0);
    }
}
