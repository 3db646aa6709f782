//! Probe executor interface
//!
//! The core never sends wire probes itself. An external executor takes
//! the round's scheduled batch and returns one measurement per task;
//! implementations may parallelize across metric families but must
//! respect the configured `max_parallel_probes` cap and block until
//! the batch completes or its own deadline passes.
//!
//! [`run_batch`] wraps an executor call with the round timeout and
//! guarantees exactly one result per scheduled task: tasks the executor
//! lost, and whole batches that time out or error, come back as failed
//! results so the fusion step can charge them to the round's cost.

use crate::error::Result;
use crate::types::{EntityId, Metric, ProbeResult, ScheduledProbe};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

/// Executes a scheduled probe batch against the real network
#[async_trait]
pub trait ProbeExecutor: Send + Sync {
    /// Execute every probe in `batch`, blocking until the batch
    /// completes. Results may arrive in any order.
    async fn execute_batch(&self, batch: &[ScheduledProbe]) -> Result<Vec<ProbeResult>>;
}

/// Run `batch` through `executor` with a hard deadline.
///
/// Always returns exactly one result per scheduled task, in batch
/// order; anything the executor did not answer is synthesized as a
/// failure stamped at `now`.
pub async fn run_batch(
    executor: &dyn ProbeExecutor,
    batch: &[ScheduledProbe],
    timeout_secs: f64,
    now: f64,
) -> Vec<ProbeResult> {
    let deadline = Duration::from_secs_f64(timeout_secs.max(0.0));

    let returned = match tokio::time::timeout(deadline, executor.execute_batch(batch)).await {
        Ok(Ok(results)) => results,
        Ok(Err(error)) => {
            warn!(%error, "probe batch failed");
            return fail_all(batch, now, format!("executor error: {error}"));
        }
        Err(_) => {
            warn!(timeout_secs, "probe batch timed out, dropping outstanding measurements");
            return fail_all(batch, now, "round timeout");
        }
    };

    let mut by_key: HashMap<(EntityId, Metric), ProbeResult> = returned
        .into_iter()
        .map(|result| ((result.entity_id.clone(), result.metric), result))
        .collect();

    batch
        .iter()
        .map(|probe| {
            by_key.remove(&probe.task.key()).unwrap_or_else(|| {
                ProbeResult::failure(
                    probe.task.entity_id.clone(),
                    probe.task.metric,
                    now,
                    "no result returned",
                )
            })
        })
        .collect()
}

fn fail_all(batch: &[ScheduledProbe], now: f64, reason: impl Into<String>) -> Vec<ProbeResult> {
    let reason = reason.into();
    batch
        .iter()
        .map(|probe| {
            ProbeResult::failure(
                probe.task.entity_id.clone(),
                probe.task.metric,
                now,
                reason.clone(),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PriorityComponents, ProbeTask};

    struct EchoExecutor {
        /// tasks (by index) the executor silently drops
        drop_indices: Vec<usize>,
        delay: Duration,
    }

    #[async_trait]
    impl ProbeExecutor for EchoExecutor {
        async fn execute_batch(&self, batch: &[ScheduledProbe]) -> Result<Vec<ProbeResult>> {
            tokio::time::sleep(self.delay).await;
            Ok(batch
                .iter()
                .enumerate()
                .filter(|(i, _)| !self.drop_indices.contains(i))
                .map(|(_, probe)| {
                    ProbeResult::success(
                        probe.task.entity_id.clone(),
                        probe.task.metric,
                        10.0,
                        0.0,
                    )
                })
                .collect())
        }
    }

    fn batch(picks: &[(&str, Metric)]) -> Vec<ScheduledProbe> {
        picks
            .iter()
            .map(|(id, metric)| ScheduledProbe {
                task: ProbeTask::new(EntityId::from(*id), *metric),
                priority: 1.0,
                components: PriorityComponents::default(),
            })
            .collect()
    }

    #[tokio::test]
    async fn complete_batch_passes_through() {
        let executor = EchoExecutor {
            drop_indices: vec![],
            delay: Duration::ZERO,
        };
        let probes = batch(&[("1-1:2-1", Metric::Rtt), ("1-1:2-1", Metric::Plr)]);
        let results = run_batch(&executor, &probes, 5.0, 0.0).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.success));
    }

    #[tokio::test]
    async fn missing_results_become_failures() {
        let executor = EchoExecutor {
            drop_indices: vec![1],
            delay: Duration::ZERO,
        };
        let probes = batch(&[("1-1:2-1", Metric::Rtt), ("1-1:2-1", Metric::Plr)]);
        let results = run_batch(&executor, &probes, 5.0, 42.0).await;

        assert_eq!(results.len(), 2);
        assert!(results[0].success);
        assert!(!results[1].success);
        assert_eq!(results[1].timestamp, 42.0);
        assert_eq!(results[1].error.as_deref(), Some("no result returned"));
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_batch_fails_every_task() {
        let executor = EchoExecutor {
            drop_indices: vec![],
            delay: Duration::from_secs(60),
        };
        let probes = batch(&[("1-1:2-1", Metric::Rtt), ("1-2:3-1", Metric::Bandwidth)]);
        let results = run_batch(&executor, &probes, 1.0, 7.0).await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| !r.success));
        assert!(results
            .iter()
            .all(|r| r.error.as_deref() == Some("round timeout")));
    }

    #[tokio::test]
    async fn executor_error_fails_every_task() {
        struct FailingExecutor;

        #[async_trait]
        impl ProbeExecutor for FailingExecutor {
            async fn execute_batch(&self, _batch: &[ScheduledProbe]) -> Result<Vec<ProbeResult>> {
                Err(crate::error::IadsError::Probe("datapath gone".into()))
            }
        }

        let probes = batch(&[("1-1:2-1", Metric::Liveness)]);
        let results = run_batch(&FailingExecutor, &probes, 1.0, 0.0).await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert!(results[0].error.as_deref().unwrap().contains("datapath gone"));
    }
}
