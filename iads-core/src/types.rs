//! Core types shared across the detection pipeline

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unique identifier of an observed entity.
///
/// The core is entity-type-agnostic; the canonical producer is
/// [`LinkEndpoints::entity_id`], which renders a directed link as
/// `"{src_dpid}-{src_port}:{dst_dpid}-{dst_port}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Directed link between two switch ports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkEndpoints {
    /// Source switch datapath id
    pub src_dpid: u64,
    /// Source port number
    pub src_port: u32,
    /// Destination switch datapath id
    pub dst_dpid: u64,
    /// Destination port number
    pub dst_port: u32,
}

impl LinkEndpoints {
    pub fn new(src_dpid: u64, src_port: u32, dst_dpid: u64, dst_port: u32) -> Self {
        Self {
            src_dpid,
            src_port,
            dst_dpid,
            dst_port,
        }
    }

    /// Canonical entity id for this link
    pub fn entity_id(&self) -> EntityId {
        EntityId(format!(
            "{}-{}:{}-{}",
            self.src_dpid, self.src_port, self.dst_dpid, self.dst_port
        ))
    }

    /// Link in the opposite direction
    pub fn reversed(&self) -> Self {
        Self {
            src_dpid: self.dst_dpid,
            src_port: self.dst_port,
            dst_dpid: self.src_dpid,
            dst_port: self.src_port,
        }
    }
}

impl fmt::Display for LinkEndpoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}:{}-{}",
            self.src_dpid, self.src_port, self.dst_dpid, self.dst_port
        )
    }
}

impl FromStr for LinkEndpoints {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (src, dst) = s
            .split_once(':')
            .ok_or_else(|| format!("invalid link id (missing ':'): {s}"))?;
        let parse_side = |side: &str| -> Result<(u64, u32), String> {
            let (dpid, port) = side
                .split_once('-')
                .ok_or_else(|| format!("invalid link endpoint (missing '-'): {side}"))?;
            Ok((
                dpid.parse().map_err(|e| format!("invalid dpid: {e}"))?,
                port.parse().map_err(|e| format!("invalid port: {e}"))?,
            ))
        };
        let (src_dpid, src_port) = parse_side(src)?;
        let (dst_dpid, dst_port) = parse_side(dst)?;
        Ok(Self {
            src_dpid,
            src_port,
            dst_dpid,
            dst_port,
        })
    }
}

/// Metric tracked per entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Link up/down state (Beta-Bernoulli)
    Liveness,
    /// Round-trip time in milliseconds (Gaussian)
    Rtt,
    /// Packet-loss ratio (Gaussian)
    Plr,
    /// Available bandwidth in Mbit/s (Gaussian)
    Bandwidth,
}

impl Metric {
    /// All metrics, in canonical order
    pub const ALL: [Metric; 4] = [Metric::Liveness, Metric::Rtt, Metric::Plr, Metric::Bandwidth];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Liveness => "liveness",
            Metric::Rtt => "rtt",
            Metric::Plr => "plr",
            Metric::Bandwidth => "bandwidth",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A probing task: one prospective measurement of one (entity, metric)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeTask {
    /// Entity under observation
    pub entity_id: EntityId,
    /// Metric to measure
    pub metric: Metric,
    /// Cached expected information gain of one measurement
    pub eig: f64,
}

impl ProbeTask {
    pub fn new(entity_id: EntityId, metric: Metric) -> Self {
        Self {
            entity_id,
            metric,
            eig: 0.0,
        }
    }

    /// State-table key of this task
    pub fn key(&self) -> (EntityId, Metric) {
        (self.entity_id.clone(), self.metric)
    }
}

/// Per-task priority breakdown produced by the priority ranker
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PriorityComponents {
    /// Expected information gain
    pub eig: f64,
    /// How overdue the state is relative to its probe interval
    pub urgency: f64,
    /// Match between the task and the round's strategy
    pub policy_match: f64,
    /// Event-trigger signal (0.0 or 1.0)
    pub event_trig: f64,
}

/// A task selected for execution this round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledProbe {
    /// The task to execute
    pub task: ProbeTask,
    /// Aggregate priority that won the task its slot
    pub priority: f64,
    /// Weighted components behind the priority
    pub components: PriorityComponents,
}

/// Outcome of one probe, as reported by the probe executor.
///
/// `value` carries the measurement: milliseconds for rtt, a ratio for
/// plr, Mbit/s for bandwidth, and 1.0/0.0 (up/down) for liveness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub entity_id: EntityId,
    pub metric: Metric,
    /// Whether the probe completed; failures carry no usable value
    pub success: bool,
    pub value: f64,
    /// Wall-clock seconds when the measurement was taken
    pub timestamp: f64,
    pub error: Option<String>,
}

impl ProbeResult {
    /// A successful measurement
    pub fn success(entity_id: EntityId, metric: Metric, value: f64, timestamp: f64) -> Self {
        Self {
            entity_id,
            metric,
            success: true,
            value,
            timestamp,
            error: None,
        }
    }

    /// A failed probe
    pub fn failure(
        entity_id: EntityId,
        metric: Metric,
        timestamp: f64,
        error: impl Into<String>,
    ) -> Self {
        Self {
            entity_id,
            metric,
            success: false,
            value: 0.0,
            timestamp,
            error: Some(error.into()),
        }
    }
}

/// Topology event delivered by the external controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TopologyEvent {
    /// A switch connected
    SwitchEnter { dpid: u64 },
    /// A directed link was discovered
    LinkAdd {
        src_dpid: u64,
        src_port: u32,
        dst_dpid: u64,
        dst_port: u32,
    },
}

impl TopologyEvent {
    pub fn link_add(src_dpid: u64, src_port: u32, dst_dpid: u64, dst_port: u32) -> Self {
        Self::LinkAdd {
            src_dpid,
            src_port,
            dst_dpid,
            dst_port,
        }
    }
}

/// Normalized 4-dimensional system snapshot fed to the contextual bandit
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextVector {
    /// Population mean of normalized uncertainty
    pub uncertainty_mean: f64,
    /// Population mean of normalized stability
    pub stability_mean: f64,
    /// Population mean of urgency
    pub urgency_mean: f64,
    /// Recent events, normalized against the configured ceiling
    pub event_rate: f64,
}

impl ContextVector {
    /// Components as a fixed-size array, in bandit feature order
    pub fn as_array(&self) -> [f64; 4] {
        [
            self.uncertainty_mean,
            self.stability_mean,
            self.urgency_mean,
            self.event_rate,
        ]
    }
}
