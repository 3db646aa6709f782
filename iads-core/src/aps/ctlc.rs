//! Control-theoretic interval tuner
//!
//! Proportional controller on per-state probe intervals:
//! `T_new = clamp(T_old · (1 + Kp·(1 − S/S_target)), T_min, T_max)`.
//! States noisier than the target are probed more often; stable states
//! relax toward the maximum interval.

use crate::esm::EntityStateManager;
use crate::types::{EntityId, Metric};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// One interval change applied during a sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalAdjustment {
    pub entity_id: EntityId,
    pub metric: Metric,
    pub old_interval: f64,
    pub new_interval: f64,
    pub stability: f64,
}

/// The proportional controller; see module docs
#[derive(Debug, Clone)]
pub struct Ctlc {
    kp: f64,
    target_stability: f64,
    min_interval: f64,
    max_interval: f64,
}

impl Ctlc {
    pub fn new(kp: f64, target_stability: f64, min_interval: f64, max_interval: f64) -> Self {
        Self {
            kp,
            target_stability,
            min_interval,
            max_interval,
        }
    }

    /// New interval for a state with the given stability
    pub fn adjust_interval(&self, current_interval: f64, stability: f64) -> f64 {
        let factor = 1.0 + self.kp * (1.0 - stability / self.target_stability);
        (current_interval * factor).clamp(self.min_interval, self.max_interval)
    }

    /// Sweep every state, storing adjusted intervals back into the
    /// state table. Returns the adjustments that changed an interval.
    #[instrument(skip_all)]
    pub fn batch_adjust(&self, esm: &mut EntityStateManager) -> Vec<IntervalAdjustment> {
        let mut adjustments = Vec::new();

        for state in esm.states_mut() {
            let old_interval = state.probe_interval();
            let stability = state.stability();
            let new_interval = self.adjust_interval(old_interval, stability);
            if new_interval != old_interval {
                state.set_probe_interval_clamped(new_interval);
                adjustments.push(IntervalAdjustment {
                    entity_id: state.entity_id().clone(),
                    metric: state.metric(),
                    old_interval,
                    new_interval,
                    stability,
                });
            }
        }

        if !adjustments.is_empty() {
            debug!(adjusted = adjustments.len(), "interval sweep applied");
        }
        adjustments
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::IadsConfig;

    fn controller() -> Ctlc {
        Ctlc::new(0.1, 1.0, 1.0, 60.0)
    }

    #[test]
    fn stable_state_relaxes_interval() {
        let ctlc = controller();
        // S = 0 < target: interval grows by the full gain
        let adjusted = ctlc.adjust_interval(10.0, 0.0);
        assert!((adjusted - 11.0).abs() < 1e-9);
    }

    #[test]
    fn unstable_state_shortens_interval() {
        let ctlc = controller();
        // S = 3 > target: 1 + 0.1·(1 − 3) = 0.8
        let adjusted = ctlc.adjust_interval(10.0, 3.0);
        assert!((adjusted - 8.0).abs() < 1e-9);
    }

    #[test]
    fn interval_at_target_is_fixed_point() {
        let ctlc = controller();
        assert!((ctlc.adjust_interval(10.0, 1.0) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn adjustment_respects_clamp() {
        let ctlc = controller();
        assert_eq!(ctlc.adjust_interval(60.0, 0.0), 60.0);
        assert_eq!(ctlc.adjust_interval(1.0, 5.0), 1.0);

        // extreme gain still lands inside the clamp
        let aggressive = Ctlc::new(10.0, 1.0, 1.0, 60.0);
        let adjusted = aggressive.adjust_interval(30.0, 5.0);
        assert!((1.0..=60.0).contains(&adjusted));
    }

    #[test]
    fn batch_adjust_sweeps_every_state() {
        let mut esm = EntityStateManager::new(IadsConfig::default(), ManualClock::shared(0.0));
        esm.add_entity(EntityId::from("1-1:2-1"));
        esm.add_entity(EntityId::from("1-2:3-1"));

        let ctlc = controller();
        let adjustments = ctlc.batch_adjust(&mut esm);

        // all states start at S = 0, so every interval relaxes
        assert_eq!(adjustments.len(), 8);
        for adjustment in &adjustments {
            assert!((adjustment.new_interval - 11.0).abs() < 1e-9);
        }
        for state in esm.states() {
            assert!((state.probe_interval() - 11.0).abs() < 1e-9);
        }
    }

    #[test]
    fn batch_adjust_reports_only_changes() {
        let mut esm = EntityStateManager::new(IadsConfig::default(), ManualClock::shared(0.0));
        esm.add_entity(EntityId::from("1-1:2-1"));

        // pin intervals at the clamp so relaxation is a no-op
        for metric in Metric::ALL {
            esm.set_probe_interval(&EntityId::from("1-1:2-1"), metric, 60.0);
        }

        let ctlc = controller();
        assert!(ctlc.batch_adjust(&mut esm).is_empty());
    }
}
