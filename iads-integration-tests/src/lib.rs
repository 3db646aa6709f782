//! Shared harness for the end-to-end scenario tests

use async_trait::async_trait;
use iads_core::{
    IadsConfig, IadsCore, LinkEndpoints, ManualClock, Metric, ProbeExecutor, ProbeResult, Result,
    ScheduledProbe,
};
use std::sync::Arc;
use std::time::Duration;

/// Canonical test links used across scenarios
pub const L1: &str = "1-1:2-1";
pub const L2: &str = "1-2:3-1";

/// How the scripted executor answers a probe
#[derive(Clone, Copy)]
pub enum Script {
    /// Plausible healthy measurement per metric
    Healthy,
    /// Every probe fails
    AllFail,
    /// Answer after a delay (for timeout scenarios)
    SlowHealthy(Duration),
}

/// Probe executor answering from a fixed script
pub struct ScriptedExecutor {
    script: Script,
}

impl ScriptedExecutor {
    pub fn healthy() -> Self {
        Self {
            script: Script::Healthy,
        }
    }

    pub fn failing() -> Self {
        Self {
            script: Script::AllFail,
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            script: Script::SlowHealthy(delay),
        }
    }

    pub fn healthy_value(metric: Metric) -> f64 {
        match metric {
            Metric::Liveness => 1.0,
            Metric::Rtt => 10.0,
            Metric::Plr => 0.01,
            Metric::Bandwidth => 100.0,
        }
    }
}

#[async_trait]
impl ProbeExecutor for ScriptedExecutor {
    async fn execute_batch(&self, batch: &[ScheduledProbe]) -> Result<Vec<ProbeResult>> {
        if let Script::SlowHealthy(delay) = self.script {
            tokio::time::sleep(delay).await;
        }
        Ok(batch
            .iter()
            .map(|probe| match self.script {
                Script::AllFail => ProbeResult::failure(
                    probe.task.entity_id.clone(),
                    probe.task.metric,
                    0.0,
                    "probe failed",
                ),
                Script::Healthy | Script::SlowHealthy(_) => ProbeResult::success(
                    probe.task.entity_id.clone(),
                    probe.task.metric,
                    Self::healthy_value(probe.task.metric),
                    0.0,
                ),
            })
            .collect())
    }
}

/// Deterministic core with the two canonical links registered
pub async fn bootstrap_core() -> (IadsCore, Arc<ManualClock>) {
    let clock = ManualClock::shared(1_000.0);
    let core = IadsCore::with_seed(IadsConfig::default(), clock.clone(), 42);
    core.add_link(link(L1)).await;
    core.add_link(link(L2)).await;
    (core, clock)
}

/// Parse one of the canonical link ids
pub fn link(id: &str) -> LinkEndpoints {
    id.parse().unwrap_or(LinkEndpoints::new(0, 0, 0, 0))
}
