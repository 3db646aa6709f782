//! Configuration for the detection core
//!
//! Every knob carries the system's stock default, so `IadsConfig::default()`
//! is a runnable configuration. Invalid values are rejected by
//! [`IadsConfig::validate`] at startup; nothing else in the core treats
//! configuration as fallible.

use crate::distribution::Distribution;
use crate::error::{IadsError, Result};
use crate::types::Metric;
use serde::{Deserialize, Serialize};

/// Top-level configuration aggregate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IadsConfig {
    /// Loop cadence, batch sizing, windows
    pub system: SystemConfig,
    /// Initial posterior per metric
    pub initial: InitialDistributions,
    /// Measurement noise variance per metric
    pub noise: MeasurementNoise,
    /// Scheduler knobs (CMAB / CTLC / PRIO)
    pub aps: ApsConfig,
    /// Event detection thresholds
    pub events: EventThresholds,
    /// Reward shaping
    pub reward: RewardConfig,
}

impl IadsConfig {
    /// Set the per-round task budget
    pub fn with_top_k(mut self, k: usize) -> Self {
        self.system.top_k = k;
        self
    }

    /// Set the default round cadence in seconds
    pub fn with_probe_interval(mut self, secs: f64) -> Self {
        self.system.probe_interval_default = secs;
        self
    }

    /// Set the per-round probe timeout in seconds
    pub fn with_round_timeout(mut self, secs: f64) -> Self {
        self.system.round_timeout = secs;
        self
    }

    /// Validate the configuration; errors here are fatal at startup
    pub fn validate(&self) -> Result<()> {
        let sys = &self.system;
        if sys.top_k == 0 {
            return Err(IadsError::Config("top_k must be >= 1".into()));
        }
        if sys.probe_interval_min <= 0.0 {
            return Err(IadsError::Config("probe_interval_min must be > 0".into()));
        }
        if sys.probe_interval_min > sys.probe_interval_max {
            return Err(IadsError::Config(format!(
                "probe interval range is empty: min {} > max {}",
                sys.probe_interval_min, sys.probe_interval_max
            )));
        }
        if sys.probe_interval_default < sys.probe_interval_min
            || sys.probe_interval_default > sys.probe_interval_max
        {
            return Err(IadsError::Config(format!(
                "probe_interval_default {} outside [{}, {}]",
                sys.probe_interval_default, sys.probe_interval_min, sys.probe_interval_max
            )));
        }
        if sys.sliding_window <= 0.0 {
            return Err(IadsError::Config("sliding_window must be > 0".into()));
        }
        if sys.round_timeout <= 0.0 {
            return Err(IadsError::Config("round_timeout must be > 0".into()));
        }
        if sys.max_parallel_probes == 0 {
            return Err(IadsError::Config("max_parallel_probes must be >= 1".into()));
        }
        if sys.stability_window < 2 {
            return Err(IadsError::Config("stability_window must be >= 2".into()));
        }
        if sys.history_capacity < sys.stability_window {
            return Err(IadsError::Config(
                "history_capacity must cover the stability window".into(),
            ));
        }

        for metric in Metric::ALL {
            let noise = self.noise.for_metric(metric);
            if noise <= 0.0 {
                return Err(IadsError::Config(format!(
                    "measurement noise for {metric} must be > 0"
                )));
            }
        }
        if self.initial.liveness_alpha < 1.0 || self.initial.liveness_beta < 1.0 {
            return Err(IadsError::Config("liveness Beta parameters must be >= 1".into()));
        }
        for (name, sigma2) in [
            ("rtt", self.initial.rtt_sigma2),
            ("plr", self.initial.plr_sigma2),
            ("bandwidth", self.initial.bandwidth_sigma2),
        ] {
            if sigma2 <= 0.0 {
                return Err(IadsError::Config(format!(
                    "initial {name} variance must be > 0"
                )));
            }
        }

        let aps = &self.aps;
        if aps.max_uncertainty <= 0.0 || aps.max_stability <= 0.0 {
            return Err(IadsError::Config(
                "max_uncertainty and max_stability must be > 0".into(),
            ));
        }
        if aps.target_stability <= 0.0 {
            return Err(IadsError::Config("target_stability must be > 0".into()));
        }
        let w = &aps.priority_weights;
        for (name, weight) in [
            ("eig", w.eig),
            ("urgency", w.urgency),
            ("policy_match", w.policy_match),
            ("event_trig", w.event_trig),
        ] {
            if !(0.0..=1.0).contains(&weight) {
                return Err(IadsError::Config(format!(
                    "priority weight {name} must be in [0, 1], got {weight}"
                )));
            }
        }

        let ev = &self.events;
        if !(0.0..=1.0).contains(&ev.liveness_threshold) {
            return Err(IadsError::Config("liveness_threshold must be in [0, 1]".into()));
        }
        if ev.stability_threshold <= 0.0 || ev.rtt_spike_factor <= 0.0 {
            return Err(IadsError::Config(
                "stability_threshold and rtt_spike_factor must be > 0".into(),
            ));
        }
        if ev.max_recent_events == 0 {
            return Err(IadsError::Config("max_recent_events must be >= 1".into()));
        }

        let rw = &self.reward;
        if rw.uncertainty_weight < 0.0 || rw.cost_weight < 0.0 {
            return Err(IadsError::Config("reward weights must be >= 0".into()));
        }
        if rw.max_uncertainty_reduction <= 0.0 {
            return Err(IadsError::Config(
                "max_uncertainty_reduction must be > 0".into(),
            ));
        }

        Ok(())
    }
}

/// Loop cadence, batch sizing and history windows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Tasks selected per round
    pub top_k: usize,
    /// Round cadence in seconds
    pub probe_interval_default: f64,
    /// Lower clamp for per-state probe intervals
    pub probe_interval_min: f64,
    /// Upper clamp for per-state probe intervals
    pub probe_interval_max: f64,
    /// Recent-events window in seconds
    pub sliding_window: f64,
    /// Concurrency cap for probe execution
    pub max_parallel_probes: usize,
    /// Flag every discovered link as a core entity (cross-metric
    /// trigger escalation applies to core entities only)
    pub mark_links_core: bool,
    /// Per-round probe batch timeout in seconds
    pub round_timeout: f64,
    /// Event analyzer cadence in seconds
    pub analyzer_interval: f64,
    /// Number of recent measurements in the stability variance window
    pub stability_window: usize,
    /// Ring-buffer capacity of raw measurements per state
    pub history_capacity: usize,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            probe_interval_default: 10.0,
            probe_interval_min: 1.0,
            probe_interval_max: 60.0,
            sliding_window: 300.0,
            max_parallel_probes: 10,
            mark_links_core: false,
            round_timeout: 30.0,
            analyzer_interval: 60.0,
            stability_window: 20,
            history_capacity: 100,
        }
    }
}

/// Initial posterior parameters per metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitialDistributions {
    pub liveness_alpha: f64,
    pub liveness_beta: f64,
    pub rtt_mu: f64,
    pub rtt_sigma2: f64,
    pub plr_mu: f64,
    pub plr_sigma2: f64,
    pub bandwidth_mu: f64,
    pub bandwidth_sigma2: f64,
}

impl Default for InitialDistributions {
    fn default() -> Self {
        Self {
            liveness_alpha: 1.0,
            liveness_beta: 1.0,
            rtt_mu: 10.0,
            rtt_sigma2: 100.0,
            plr_mu: 0.01,
            plr_sigma2: 0.001,
            bandwidth_mu: 100.0,
            bandwidth_sigma2: 1000.0,
        }
    }
}

impl InitialDistributions {
    /// Fresh prior for `metric`
    pub fn for_metric(&self, metric: Metric) -> Distribution {
        match metric {
            Metric::Liveness => Distribution::beta(self.liveness_alpha, self.liveness_beta),
            Metric::Rtt => Distribution::gaussian(self.rtt_mu, self.rtt_sigma2),
            Metric::Plr => Distribution::gaussian(self.plr_mu, self.plr_sigma2),
            Metric::Bandwidth => Distribution::gaussian(self.bandwidth_mu, self.bandwidth_sigma2),
        }
    }
}

/// Measurement noise variance per metric, used by EIG and posterior updates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasurementNoise {
    pub rtt: f64,
    pub plr: f64,
    pub bandwidth: f64,
    pub liveness: f64,
}

impl Default for MeasurementNoise {
    fn default() -> Self {
        Self {
            rtt: 1.0,
            plr: 0.001,
            bandwidth: 10.0,
            liveness: 1.0,
        }
    }
}

impl MeasurementNoise {
    pub fn for_metric(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Liveness => self.liveness,
            Metric::Rtt => self.rtt,
            Metric::Plr => self.plr,
            Metric::Bandwidth => self.bandwidth,
        }
    }
}

/// Scheduler knobs shared by CMAB, CTLC and PRIO
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApsConfig {
    /// Entropy clamp used when normalizing uncertainty for scheduling
    pub max_uncertainty: f64,
    /// Clamp for the stability variance estimate
    pub max_stability: f64,
    /// Stability the interval controller steers toward
    pub target_stability: f64,
    /// Proportional gain of the interval controller
    pub kp: f64,
    /// Bandit reward noise variance
    pub reward_noise: f64,
    /// Priority mixing weights
    pub priority_weights: PriorityWeights,
}

impl Default for ApsConfig {
    fn default() -> Self {
        Self {
            max_uncertainty: 2.0,
            max_stability: 5.0,
            target_stability: 1.0,
            kp: 0.1,
            reward_noise: 1.0,
            priority_weights: PriorityWeights::default(),
        }
    }
}

/// Weights of the linear priority ranking function
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityWeights {
    pub eig: f64,
    pub urgency: f64,
    pub policy_match: f64,
    pub event_trig: f64,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            eig: 0.4,
            urgency: 0.3,
            policy_match: 0.2,
            event_trig: 0.1,
        }
    }
}

/// Event detection thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventThresholds {
    /// `P(up)` below this raises a liveness event
    pub liveness_threshold: f64,
    /// Raw stability above this raises an instability event
    pub stability_threshold: f64,
    /// Spike detection factor in historical standard deviations
    pub rtt_spike_factor: f64,
    /// Normalization ceiling for the recent-events context component
    pub max_recent_events: usize,
}

impl Default for EventThresholds {
    fn default() -> Self {
        Self {
            liveness_threshold: 0.8,
            stability_threshold: 3.0,
            rtt_spike_factor: 3.0,
            max_recent_events: 100,
        }
    }
}

/// Reward shaping for the bandit feedback loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    /// Weight of aggregate uncertainty reduction
    pub uncertainty_weight: f64,
    /// Weight of the probing cost term
    pub cost_weight: f64,
    /// Per-task uncertainty reduction normalizer
    pub max_uncertainty_reduction: f64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            uncertainty_weight: 0.7,
            cost_weight: 0.3,
            max_uncertainty_reduction: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(IadsConfig::default().validate().is_ok());
    }

    #[test]
    fn default_matches_stock_values() {
        let config = IadsConfig::default();
        assert_eq!(config.system.top_k, 5);
        assert_eq!(config.system.probe_interval_default, 10.0);
        assert_eq!(config.system.probe_interval_min, 1.0);
        assert_eq!(config.system.probe_interval_max, 60.0);
        assert_eq!(config.noise.plr, 0.001);
        assert_eq!(config.aps.max_uncertainty, 2.0);
        assert_eq!(config.aps.priority_weights.eig, 0.4);
        assert_eq!(config.events.liveness_threshold, 0.8);
        assert_eq!(config.reward.uncertainty_weight, 0.7);
    }

    #[test]
    fn zero_top_k_is_fatal() {
        let config = IadsConfig::default().with_top_k(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn inverted_interval_range_is_fatal() {
        let mut config = IadsConfig::default();
        config.system.probe_interval_min = 90.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn default_outside_clamp_is_fatal() {
        let config = IadsConfig::default().with_probe_interval(120.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn negative_noise_is_fatal() {
        let mut config = IadsConfig::default();
        config.noise.rtt = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn out_of_range_weight_is_fatal() {
        let mut config = IadsConfig::default();
        config.aps.priority_weights.urgency = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let parsed: IadsConfig = toml::from_str::<IadsConfig>(
            r#"
            [system]
            top_k = 3
            "#,
        )
        .unwrap();
        assert_eq!(parsed.system.top_k, 3);
        assert_eq!(parsed.system.probe_interval_default, 10.0);
        assert_eq!(parsed.aps.kp, 0.1);
    }
}
