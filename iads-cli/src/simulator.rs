//! Simulated network backing the demo driver
//!
//! The detection core treats probe execution as an external concern, so
//! the binary ships its own: a small link simulator with per-link
//! latency, loss and bandwidth profiles plus fault injection. Probes
//! run concurrently under the configured parallelism cap, the way a
//! real executor would fan out over metric families.

use async_trait::async_trait;
use futures::future::join_all;
use iads_core::{
    EntityId, IadsError, Metric, ProbeExecutor, ProbeResult, Result, ScheduledProbe,
    TopologyEvent,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Semaphore;
use tracing::{debug, info};

/// Behavior of one simulated link
#[derive(Debug, Clone)]
pub struct LinkProfile {
    pub base_rtt_ms: f64,
    pub jitter_ms: f64,
    pub loss_ratio: f64,
    pub bandwidth_mbps: f64,
    pub up: bool,
}

impl Default for LinkProfile {
    fn default() -> Self {
        Self {
            base_rtt_ms: 10.0,
            jitter_ms: 1.0,
            loss_ratio: 0.01,
            bandwidth_mbps: 100.0,
            up: true,
        }
    }
}

/// In-process network simulator implementing [`ProbeExecutor`]
pub struct SimulatedNetwork {
    links: Mutex<HashMap<EntityId, LinkProfile>>,
    rng: Mutex<StdRng>,
    semaphore: Arc<Semaphore>,
    /// Probability that any single probe is lost outright
    probe_failure_ratio: f64,
}

impl SimulatedNetwork {
    pub fn new(max_parallel_probes: usize, seed: u64) -> Self {
        Self {
            links: Mutex::new(HashMap::new()),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            semaphore: Arc::new(Semaphore::new(max_parallel_probes.max(1))),
            probe_failure_ratio: 0.02,
        }
    }

    /// Topology events for a ring of `switches` switches, one directed
    /// link per direction between neighbors.
    pub fn ring_topology(switches: u64) -> Vec<TopologyEvent> {
        let mut events: Vec<TopologyEvent> =
            (1..=switches).map(|dpid| TopologyEvent::SwitchEnter { dpid }).collect();
        for dpid in 1..=switches {
            let next = dpid % switches + 1;
            events.push(TopologyEvent::link_add(dpid, 2, next, 1));
            events.push(TopologyEvent::link_add(next, 1, dpid, 2));
        }
        events
    }

    /// Register the links a topology event stream will announce
    pub fn register_topology(&self, events: &[TopologyEvent]) {
        let mut links = self.links.lock().unwrap_or_else(|e| e.into_inner());
        for event in events {
            if let TopologyEvent::LinkAdd {
                src_dpid,
                src_port,
                dst_dpid,
                dst_port,
            } = event
            {
                let id = EntityId::new(format!("{src_dpid}-{src_port}:{dst_dpid}-{dst_port}"));
                links.entry(id).or_default();
            }
        }
        info!(links = links.len(), "simulated topology registered");
    }

    /// Degrade one link: congested latency, heavy loss, reduced
    /// bandwidth. Returns false for unknown links.
    pub fn inject_congestion(&self, entity_id: &EntityId) -> bool {
        let mut links = self.links.lock().unwrap_or_else(|e| e.into_inner());
        match links.get_mut(entity_id) {
            Some(profile) => {
                profile.base_rtt_ms *= 4.0;
                profile.loss_ratio = (profile.loss_ratio + 0.2).min(1.0);
                profile.bandwidth_mbps *= 0.25;
                info!(entity = %entity_id, "congestion injected");
                true
            }
            None => false,
        }
    }

    /// Take one link down entirely
    pub fn take_down(&self, entity_id: &EntityId) -> bool {
        let mut links = self.links.lock().unwrap_or_else(|e| e.into_inner());
        match links.get_mut(entity_id) {
            Some(profile) => {
                profile.up = false;
                info!(entity = %entity_id, "link taken down");
                true
            }
            None => false,
        }
    }

    /// A currently registered link id, if any
    pub fn some_link(&self) -> Option<EntityId> {
        let links = self.links.lock().unwrap_or_else(|e| e.into_inner());
        links.keys().min().cloned()
    }

    fn now() -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }

    /// Produce one measurement; all randomness is drawn before any await
    fn measure(&self, probe: &ScheduledProbe) -> ProbeResult {
        let entity_id = probe.task.entity_id.clone();
        let metric = probe.task.metric;
        let timestamp = Self::now();

        let profile = {
            let links = self.links.lock().unwrap_or_else(|e| e.into_inner());
            links.get(&entity_id).cloned()
        };
        let Some(profile) = profile else {
            return ProbeResult::failure(entity_id, metric, timestamp, "unknown link");
        };

        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        if rng.gen::<f64>() < self.probe_failure_ratio {
            return ProbeResult::failure(entity_id, metric, timestamp, "probe lost");
        }

        match metric {
            Metric::Liveness => {
                let value = if profile.up { 1.0 } else { 0.0 };
                ProbeResult::success(entity_id, metric, value, timestamp)
            }
            Metric::Rtt => {
                if !profile.up {
                    return ProbeResult::failure(entity_id, metric, timestamp, "link down");
                }
                let jitter = (rng.gen::<f64>() - 0.5) * 2.0 * profile.jitter_ms;
                let value = (profile.base_rtt_ms + jitter).max(0.1);
                ProbeResult::success(entity_id, metric, value, timestamp)
            }
            Metric::Plr => {
                if !profile.up {
                    return ProbeResult::success(entity_id, metric, 1.0, timestamp);
                }
                let noise = rng.gen::<f64>() * 0.005;
                ProbeResult::success(entity_id, metric, (profile.loss_ratio + noise).min(1.0), timestamp)
            }
            Metric::Bandwidth => {
                if !profile.up {
                    return ProbeResult::success(entity_id, metric, 0.0, timestamp);
                }
                let wobble = 1.0 + (rng.gen::<f64>() - 0.5) * 0.1;
                ProbeResult::success(entity_id, metric, profile.bandwidth_mbps * wobble, timestamp)
            }
        }
    }
}

#[async_trait]
impl ProbeExecutor for SimulatedNetwork {
    async fn execute_batch(&self, batch: &[ScheduledProbe]) -> Result<Vec<ProbeResult>> {
        let futures = batch.iter().map(|probe| async {
            let permit = self
                .semaphore
                .acquire()
                .await
                .map_err(|e| IadsError::Probe(format!("semaphore closed: {e}")))?;
            // wire delay stand-in
            tokio::time::sleep(Duration::from_millis(2)).await;
            let result = self.measure(probe);
            drop(permit);
            Ok::<ProbeResult, IadsError>(result)
        });

        let results: Vec<ProbeResult> = join_all(futures)
            .await
            .into_iter()
            .collect::<Result<Vec<_>>>()?;
        debug!(probes = results.len(), "simulated batch complete");
        Ok(results)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use iads_core::{PriorityComponents, ProbeTask};

    fn probe(id: &str, metric: Metric) -> ScheduledProbe {
        ScheduledProbe {
            task: ProbeTask::new(EntityId::from(id), metric),
            priority: 1.0,
            components: PriorityComponents::default(),
        }
    }

    #[tokio::test]
    async fn batch_returns_one_result_per_probe() {
        let network = SimulatedNetwork::new(4, 1);
        let topology = SimulatedNetwork::ring_topology(3);
        network.register_topology(&topology);

        let batch = vec![
            probe("1-2:2-1", Metric::Rtt),
            probe("1-2:2-1", Metric::Liveness),
            probe("2-2:3-1", Metric::Bandwidth),
            probe("2-2:3-1", Metric::Plr),
        ];
        let results = network.execute_batch(&batch).await.unwrap();
        assert_eq!(results.len(), 4);
    }

    #[tokio::test]
    async fn unknown_link_fails() {
        let network = SimulatedNetwork::new(4, 1);
        let results = network
            .execute_batch(&[probe("9-9:9-9", Metric::Rtt)])
            .await
            .unwrap();
        assert!(!results[0].success);
    }

    #[tokio::test]
    async fn downed_link_reports_dead_measurements() {
        let network = SimulatedNetwork::new(4, 7);
        let topology = SimulatedNetwork::ring_topology(2);
        network.register_topology(&topology);
        let link = network.some_link().unwrap();
        assert!(network.take_down(&link));

        // probe repeatedly; aside from random probe loss, liveness must
        // read 0 and rtt must fail
        let mut live_values = Vec::new();
        for _ in 0..20 {
            let results = network
                .execute_batch(&[probe(link.as_str(), Metric::Liveness)])
                .await
                .unwrap();
            if results[0].success {
                live_values.push(results[0].value);
            }
        }
        assert!(!live_values.is_empty());
        assert!(live_values.iter().all(|v| *v == 0.0));
    }

    #[tokio::test]
    async fn congested_link_degrades_measurements() {
        let network = SimulatedNetwork::new(4, 11);
        let topology = SimulatedNetwork::ring_topology(2);
        network.register_topology(&topology);
        let link = network.some_link().unwrap();
        assert!(network.inject_congestion(&link));

        // rtt quadruples (base 40 ms ± jitter) and bandwidth quarters
        let mut rtt_values = Vec::new();
        let mut bw_values = Vec::new();
        for _ in 0..20 {
            let results = network
                .execute_batch(&[
                    probe(link.as_str(), Metric::Rtt),
                    probe(link.as_str(), Metric::Bandwidth),
                ])
                .await
                .unwrap();
            for result in results.iter().filter(|r| r.success) {
                match result.metric {
                    Metric::Rtt => rtt_values.push(result.value),
                    Metric::Bandwidth => bw_values.push(result.value),
                    _ => {}
                }
            }
        }
        assert!(!rtt_values.is_empty() && !bw_values.is_empty());
        assert!(rtt_values.iter().all(|v| *v > 35.0));
        assert!(bw_values.iter().all(|v| *v < 30.0));
    }

    #[test]
    fn ring_topology_links_every_switch() {
        let events = SimulatedNetwork::ring_topology(4);
        let links = events
            .iter()
            .filter(|e| matches!(e, TopologyEvent::LinkAdd { .. }))
            .count();
        assert_eq!(links, 8);
    }
}
