//! # Controller - round orchestration
//!
//! [`IadsCore`] is the composition root: it owns every pipeline module
//! behind its own lock and exposes the one-round primitive. The
//! [`IadsController`] drives rounds at the configured cadence, feeds
//! topology events into the state table, runs the startup sweep that
//! measures the whole network once, and keeps a periodic event-analyzer
//! task between rounds.
//!
//! ## Round ordering
//!
//! Within a round the order is fixed:
//! `EM.detect → APS.select → RFU.snapshot → PE.execute → RFU.process →
//! CMAB.update`. Rounds never overlap: the next one starts only after
//! fusion completes, and a probe batch that outlives the round timeout
//! is closed out as failures.

use crate::aps::{ActiveProbingScheduler, ApsStatistics, Strategy};
use crate::clock::{Clock, SystemClock};
use crate::config::IadsConfig;
use crate::em::{AnomalySummary, EmStatistics, Event, EventManager};
use crate::error::Result;
use crate::esm::{EntityStateManager, EsmStatistics};
use crate::pe::{run_batch, ProbeExecutor};
use crate::rfu::{ResultFusionUnit, RfuStatistics, RoundRecord};
use crate::types::{EntityId, LinkEndpoints, ScheduledProbe, TopologyEvent};
use crate::uq::{UncertaintyQuantifier, UqStatistics};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

/// Summary of one executed round
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundOutcome {
    pub round: u64,
    pub events_fired: usize,
    pub selected: usize,
    pub strategy: Option<Strategy>,
    pub updated_states: usize,
    pub failed: usize,
    pub reward: Option<f64>,
}

/// Topology sizes tracked by the controller
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TopologySummary {
    pub switches: usize,
    pub links: u64,
    pub entities: usize,
}

/// Structured operator summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    pub generated_at: DateTime<Utc>,
    pub uptime_secs: f64,
    pub monitoring_active: bool,
    pub initialized: bool,
    pub rounds_completed: u64,
    pub topology: TopologySummary,
    pub esm: EsmStatistics,
    pub uq: UqStatistics,
    pub aps: ApsStatistics,
    pub em: EmStatistics,
    pub rfu: RfuStatistics,
}

/// Status plus recent activity, for `report()`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemReport {
    pub status: SystemStatus,
    pub recent_events: Vec<Event>,
    pub anomalies: AnomalySummary,
    pub update_history: Vec<RoundRecord>,
    pub top_uncertain: Vec<(EntityId, f64)>,
    pub top_unstable: Vec<(EntityId, f64)>,
}

/// Composition root owning every pipeline module
#[derive(Clone)]
pub struct IadsCore {
    config: IadsConfig,
    clock: Arc<dyn Clock>,
    esm: Arc<RwLock<EntityStateManager>>,
    uq: Arc<RwLock<UncertaintyQuantifier>>,
    em: Arc<RwLock<EventManager>>,
    aps: Arc<RwLock<ActiveProbingScheduler>>,
    rfu: Arc<RwLock<ResultFusionUnit>>,
    round_counter: Arc<AtomicU64>,
}

impl IadsCore {
    pub fn new(config: IadsConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: IadsConfig, clock: Arc<dyn Clock>) -> Self {
        let aps = ActiveProbingScheduler::new(config.clone());
        Self::assemble(config, clock, aps)
    }

    /// Core with a deterministic bandit for tests and replayable runs
    pub fn with_seed(config: IadsConfig, clock: Arc<dyn Clock>, seed: u64) -> Self {
        let aps = ActiveProbingScheduler::with_seed(config.clone(), seed);
        Self::assemble(config, clock, aps)
    }

    fn assemble(config: IadsConfig, clock: Arc<dyn Clock>, aps: ActiveProbingScheduler) -> Self {
        Self {
            esm: Arc::new(RwLock::new(EntityStateManager::new(
                config.clone(),
                clock.clone(),
            ))),
            uq: Arc::new(RwLock::new(UncertaintyQuantifier::new())),
            em: Arc::new(RwLock::new(EventManager::new(config.clone(), clock.clone()))),
            aps: Arc::new(RwLock::new(aps)),
            rfu: Arc::new(RwLock::new(ResultFusionUnit::new(config.clone()))),
            round_counter: Arc::new(AtomicU64::new(0)),
            config,
            clock,
        }
    }

    pub fn config(&self) -> &IadsConfig {
        &self.config
    }

    /// Register a discovered link: one entity, mirrored into the task
    /// pool, and flagged core when the configuration says so.
    #[instrument(skip(self), fields(link = %link))]
    pub async fn add_link(&self, link: LinkEndpoints) -> bool {
        let entity_id = link.entity_id();
        let created = {
            let mut esm = self.esm.write().await;
            esm.add_entity(entity_id.clone())
        };
        if created {
            {
                let esm = self.esm.read().await;
                self.uq.write().await.update_entity_list(&esm);
                info!(entities = esm.entity_count(), "link registered");
            }
            if self.config.system.mark_links_core {
                self.em.write().await.add_core_entity(entity_id);
            }
        }
        created
    }

    /// Flag an entity as core so its rtt and liveness trouble escalates
    /// across metrics
    pub async fn mark_core(&self, entity_id: EntityId) {
        self.em.write().await.add_core_entity(entity_id);
    }

    /// Execute one full round against `executor`.
    ///
    /// Never fails the loop: probe-level trouble is folded into the
    /// round as failed results.
    #[instrument(skip_all)]
    pub async fn execute_round(&self, executor: &dyn ProbeExecutor) -> Result<RoundOutcome> {
        let round = self.round_counter.fetch_add(1, Ordering::SeqCst) + 1;

        // detect events and refresh triggers
        let events_fired = {
            let esm = self.esm.read().await;
            let mut em = self.em.write().await;
            em.detect_events(&esm).len()
        };

        // pick the round's strategy and top-K tasks
        let selection = {
            let mut esm = self.esm.write().await;
            let mut uq = self.uq.write().await;
            let em = self.em.read().await;
            let mut aps = self.aps.write().await;
            aps.select_tasks(None, &mut esm, &mut uq, &em)
        };

        if selection.tasks.is_empty() {
            debug!(round, "no tasks selected");
            return Ok(RoundOutcome {
                round,
                events_fired,
                selected: 0,
                strategy: None,
                updated_states: 0,
                failed: 0,
                reward: None,
            });
        }

        debug!(
            round,
            selected = selection.tasks.len(),
            strategy = %selection.strategy,
            "round selection made"
        );

        // snapshot entropies, then release every lock across the probe await
        {
            let esm = self.esm.read().await;
            let mut rfu = self.rfu.write().await;
            rfu.cache_states_before_probe(&selection.tasks, &esm);
        }

        let results = run_batch(
            executor,
            &selection.tasks,
            self.config.system.round_timeout,
            self.clock.now(),
        )
        .await;

        let outcome = {
            let mut esm = self.esm.write().await;
            let mut rfu = self.rfu.write().await;
            rfu.process_results(&results, &mut esm)?
        };
        self.aps.write().await.update_reward(outcome.reward);

        info!(
            round,
            selected = selection.tasks.len(),
            updated = outcome.updated_states,
            failed = outcome.failed,
            reward = outcome.reward,
            "round complete"
        );

        Ok(RoundOutcome {
            round,
            events_fired,
            selected: selection.tasks.len(),
            strategy: Some(selection.strategy),
            updated_states: outcome.updated_states,
            failed: outcome.failed,
            reward: Some(outcome.reward),
        })
    }

    /// Startup sweep: probe the entire task pool once, in top-K-sized
    /// batches, through the normal snapshot → execute → fuse path.
    #[instrument(skip_all)]
    pub async fn initialize(&self, executor: &dyn ProbeExecutor) -> Result<usize> {
        let pool = {
            let esm = self.esm.read().await;
            let mut uq = self.uq.write().await;
            uq.get_task_pool_with_eig(&esm, &self.config.noise)
        };
        if pool.is_empty() {
            return Ok(0);
        }

        info!(tasks = pool.len(), "starting full-network initialization sweep");

        let batch_size = self.config.system.top_k.max(1);
        let mut probed = 0;
        for chunk in pool.chunks(batch_size) {
            let batch: Vec<ScheduledProbe> = chunk
                .iter()
                .map(|task| ScheduledProbe {
                    priority: task.eig,
                    components: crate::types::PriorityComponents {
                        eig: task.eig,
                        ..Default::default()
                    },
                    task: task.clone(),
                })
                .collect();

            {
                let esm = self.esm.read().await;
                let mut rfu = self.rfu.write().await;
                rfu.cache_states_before_probe(&batch, &esm);
            }
            let results = run_batch(
                executor,
                &batch,
                self.config.system.round_timeout,
                self.clock.now(),
            )
            .await;
            {
                let mut esm = self.esm.write().await;
                let mut rfu = self.rfu.write().await;
                rfu.process_results(&results, &mut esm)?;
            }
            probed += batch.len();
        }

        info!(probed, "initialization sweep complete");
        Ok(probed)
    }

    pub fn rounds_completed(&self) -> u64 {
        self.round_counter.load(Ordering::SeqCst)
    }

    pub fn esm(&self) -> Arc<RwLock<EntityStateManager>> {
        Arc::clone(&self.esm)
    }

    pub fn uq(&self) -> Arc<RwLock<UncertaintyQuantifier>> {
        Arc::clone(&self.uq)
    }

    pub fn em(&self) -> Arc<RwLock<EventManager>> {
        Arc::clone(&self.em)
    }

    pub fn aps(&self) -> Arc<RwLock<ActiveProbingScheduler>> {
        Arc::clone(&self.aps)
    }

    pub fn rfu(&self) -> Arc<RwLock<ResultFusionUnit>> {
        Arc::clone(&self.rfu)
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

/// Handle for stopping a running controller from another task
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    running: Arc<AtomicBool>,
}

impl ShutdownHandle {
    /// Request shutdown; the loop exits after finishing the in-flight
    /// round's fusion.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Drives the scheduler loop; see module docs
pub struct IadsController {
    core: IadsCore,
    executor: Arc<dyn ProbeExecutor>,
    topology_rx: mpsc::Receiver<TopologyEvent>,
    running: Arc<AtomicBool>,
    switches: HashSet<u64>,
    links: u64,
    initialized: bool,
    started_at: f64,
}

impl IadsController {
    pub fn new(
        config: IadsConfig,
        executor: Arc<dyn ProbeExecutor>,
        topology_rx: mpsc::Receiver<TopologyEvent>,
    ) -> Self {
        Self::with_core(IadsCore::new(config), executor, topology_rx)
    }

    pub fn with_core(
        core: IadsCore,
        executor: Arc<dyn ProbeExecutor>,
        topology_rx: mpsc::Receiver<TopologyEvent>,
    ) -> Self {
        let started_at = core.clock().now();
        Self {
            core,
            executor,
            topology_rx,
            running: Arc::new(AtomicBool::new(false)),
            switches: HashSet::new(),
            links: 0,
            initialized: false,
            started_at,
        }
    }

    pub fn core(&self) -> &IadsCore {
        &self.core
    }

    /// Handle that can stop the loop from another task
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            running: Arc::clone(&self.running),
        }
    }

    /// Run the scheduler loop until shutdown is requested.
    ///
    /// Spawns the periodic event analyzer alongside the round loop. No
    /// per-round error aborts the loop; only invalid configuration is
    /// fatal, and that is rejected before the first round.
    #[instrument(skip(self))]
    pub async fn run(&mut self) -> Result<()> {
        self.core.config().validate()?;

        if self.running.swap(true, Ordering::SeqCst) {
            warn!("controller already running");
            return Ok(());
        }

        info!(
            cadence_secs = self.core.config().system.probe_interval_default,
            "scheduler loop starting"
        );

        let analyzer = self.spawn_analyzer();
        let mut ticker = interval(Duration::from_secs_f64(
            self.core.config().system.probe_interval_default.max(0.001),
        ));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            self.drain_topology().await;

            if !self.initialized {
                let has_entities = { !self.core.esm().read().await.is_empty() };
                if has_entities {
                    match self.core.initialize(self.executor.as_ref()).await {
                        Ok(_) => self.initialized = true,
                        Err(e) => error!("initialization sweep failed: {e}"),
                    }
                    continue;
                }
            }

            // per-round errors are recovered locally; the loop survives
            if let Err(e) = self.core.execute_round(self.executor.as_ref()).await {
                error!("round failed: {e}");
            }
        }

        analyzer.abort();
        // drain any queued topology events without touching state
        while self.topology_rx.try_recv().is_ok() {}

        info!(
            rounds = self.core.rounds_completed(),
            "scheduler loop stopped"
        );
        Ok(())
    }

    /// Apply every queued topology event
    async fn drain_topology(&mut self) {
        while let Ok(event) = self.topology_rx.try_recv() {
            self.apply_topology_event(event).await;
        }
    }

    /// Apply one topology event to the state table
    pub async fn apply_topology_event(&mut self, event: TopologyEvent) {
        match event {
            TopologyEvent::SwitchEnter { dpid } => {
                if self.switches.insert(dpid) {
                    info!(dpid, "switch entered");
                }
            }
            TopologyEvent::LinkAdd {
                src_dpid,
                src_port,
                dst_dpid,
                dst_port,
            } => {
                let link = LinkEndpoints::new(src_dpid, src_port, dst_dpid, dst_port);
                if self.core.add_link(link).await {
                    self.links += 1;
                }
            }
        }
    }

    fn spawn_analyzer(&self) -> tokio::task::JoinHandle<()> {
        let esm = self.core.esm();
        let em = self.core.em();
        let running = Arc::clone(&self.running);
        let cadence = Duration::from_secs_f64(self.core.config().system.analyzer_interval.max(1.0));

        tokio::spawn(async move {
            let mut ticker = interval(cadence);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick fires immediately; skip it so the loop's
            // first detection pass runs inside the first round
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                let esm = esm.read().await;
                let mut em = em.write().await;
                let fired = em.detect_events(&esm).len();
                if fired > 0 {
                    debug!(fired, "analyzer pass raised events");
                }
            }
        })
    }

    /// Structured summary of topology sizes and per-module statistics
    pub async fn status(&self) -> SystemStatus {
        let esm = self.core.esm();
        let esm = esm.read().await;
        SystemStatus {
            generated_at: Utc::now(),
            uptime_secs: self.core.clock().now() - self.started_at,
            monitoring_active: self.running.load(Ordering::SeqCst),
            initialized: self.initialized,
            rounds_completed: self.core.rounds_completed(),
            topology: TopologySummary {
                switches: self.switches.len(),
                links: self.links,
                entities: esm.entity_count(),
            },
            esm: esm.get_statistics(),
            uq: self.core.uq().read().await.get_statistics(),
            aps: self.core.aps().read().await.get_statistics(),
            em: self.core.em().read().await.get_statistics(),
            rfu: self.core.rfu().read().await.get_statistics(),
        }
    }

    /// Status plus recent events and update history
    pub async fn report(&self) -> SystemReport {
        let status = self.status().await;
        let em = self.core.em();
        let em = em.read().await;
        let esm = self.core.esm();
        let esm = esm.read().await;
        SystemReport {
            status,
            recent_events: em.recent_events(20),
            anomalies: em.anomaly_summary(),
            update_history: self.core.rfu().read().await.update_summary(),
            top_uncertain: esm.top_uncertain(10),
            top_unstable: esm.top_unstable(10),
        }
    }
}
