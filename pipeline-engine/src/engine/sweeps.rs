// Engine Sweeps
// Periodic work: expiring timeouts, retrying held notifies, erroring out
// nodes nobody watches anymore, and archiving finished plans

use super::transitions::StatusUpdate;
use super::OrchestrationEngine;
use crate::error::{EngineError, EngineResult};
use crate::execution::{
    FailureInfo, FailureType, NodeExecution, PlanExecution, PlanStatus, Status,
};
use crate::timeout::{TimeoutInstance, TimeoutKind};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use std::sync::Arc;
use std::time::Duration;

/// Outcome of one consistency sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsistencyReport {
    /// RUNNING nodes with no correlation, timer or child left to wake them
    pub errored_nodes: Vec<String>,
    /// RUNNING plans without any active node
    pub errored_plans: Vec<String>,
}

impl ConsistencyReport {
    pub fn is_clean(&self) -> bool {
        self.errored_nodes.is_empty() && self.errored_plans.is_empty()
    }
}

fn age(now: DateTime<Utc>, since: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or_default()
}

impl OrchestrationEngine {
    /// Expire every node whose timer passed before `now`. Returns the number
    /// of nodes moved to EXPIRED.
    ///
    /// A timeout that cannot be applied errors out its node; the rest of the
    /// sweep carries on.
    pub async fn sweep_timeouts(self: &Arc<Self>, now: DateTime<Utc>) -> EngineResult<usize> {
        let mut expired = 0;
        for instance in self.timeouts.sweep(now).await? {
            match self.expire(&instance).await {
                Ok(true) => expired += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        node = %instance.node_execution_id,
                        timeout = %instance.uuid,
                        error = %e,
                        "fired timeout could not be applied"
                    );
                    self.error_out(&instance.node_execution_id, &e).await;
                }
            }
        }
        Ok(expired)
    }

    async fn expire(self: &Arc<Self>, instance: &TimeoutInstance) -> EngineResult<bool> {
        let Some(node) = self.store.get_node_execution(&instance.node_execution_id).await? else {
            return Ok(false);
        };
        let applies = match instance.kind {
            TimeoutKind::Intervention => node.status == Status::InterventionWaiting,
            TimeoutKind::NodeDeadline | TimeoutKind::Correlation => {
                node.status.is_active() && node.status != Status::Discontinuing
            }
        };
        if !applies {
            debug!(node = %node.uuid, status = %node.status, "stale timeout ignored");
            return Ok(false);
        }

        warn!(node = %node.uuid, kind = ?instance.kind, "timeout expired");
        let message = match instance.kind {
            TimeoutKind::NodeDeadline => "node deadline exceeded".to_string(),
            TimeoutKind::Intervention => "no intervention before the deadline".to_string(),
            TimeoutKind::Correlation => {
                EngineError::CorrelationTimeout(node.live_correlation_ids().join(",")).to_string()
            }
        };
        let failure = FailureInfo::new(FailureType::Expired, message);
        self.settle(&node.uuid, StatusUpdate::new(Status::Expired).with_failure(failure))
            .await?;
        Ok(true)
    }

    /// Error out work that nothing will ever wake up again
    pub async fn check_consistency(self: &Arc<Self>, now: DateTime<Utc>) -> EngineResult<ConsistencyReport> {
        let mut report = ConsistencyReport::default();
        for execution in self
            .store
            .find_plan_executions_by_status(&[PlanStatus::Running])
            .await?
        {
            if let Err(e) = self.check_plan(&execution, now, &mut report).await {
                warn!(plan_execution = %execution.uuid, error = %e, "consistency check failed");
            }
        }
        Ok(report)
    }

    async fn check_plan(
        self: &Arc<Self>,
        execution: &PlanExecution,
        now: DateTime<Utc>,
        report: &mut ConsistencyReport,
    ) -> EngineResult<()> {
        let threshold = self.config.stale_node_threshold();
        let nodes: Vec<NodeExecution> = self
            .store
            .find_node_executions(&execution.uuid)
            .await?
            .into_iter()
            .filter(|n| !n.old_retry)
            .collect();

        if !nodes.iter().any(|n| n.status.is_active()) {
            let last_activity = nodes
                .iter()
                .map(|n| n.last_updated_at)
                .max()
                .unwrap_or(execution.start_ts);
            if age(now, last_activity) >= threshold {
                warn!(plan_execution = %execution.uuid, "running plan has no active nodes");
                self.conclude_plan(&execution.uuid, Some(PlanStatus::Errored))
                    .await?;
                report.errored_plans.push(execution.uuid.clone());
            }
            return Ok(());
        }

        for node in nodes.iter().filter(|n| {
            n.status == Status::Running && age(now, n.last_updated_at) >= threshold
        }) {
            let watched = match self.is_watched(node).await {
                Ok(watched) => watched,
                Err(e) => {
                    warn!(node = %node.uuid, error = %e, "could not inspect node");
                    continue;
                }
            };
            if watched {
                continue;
            }
            warn!(node = %node.uuid, "running node lost its registrations");
            let failure = FailureInfo::new(
                FailureType::Unknown,
                "node has no pending correlation, timer or child",
            );
            match self
                .settle(&node.uuid, StatusUpdate::new(Status::Errored).with_failure(failure))
                .await
            {
                Ok(()) => report.errored_nodes.push(node.uuid.clone()),
                Err(e) => warn!(node = %node.uuid, error = %e, "could not error out node"),
            }
        }
        Ok(())
    }

    async fn is_watched(&self, node: &NodeExecution) -> EngineResult<bool> {
        for correlation_id in node.live_correlation_ids() {
            if self.waiter.is_registered(&correlation_id).await? {
                return Ok(true);
            }
        }
        if self.timeouts.has_active(&node.uuid).await? {
            return Ok(true);
        }
        Ok(self
            .store
            .find_children(&node.uuid)
            .await?
            .iter()
            .any(|c| c.status.is_active()))
    }

    /// Archive plan executions that finished more than the retention ago
    pub async fn archive_expired(&self, now: DateTime<Utc>) -> EngineResult<usize> {
        let retention = self.config.plan_retention();
        let finished = self
            .store
            .find_plan_executions_by_status(&[
                PlanStatus::Succeeded,
                PlanStatus::Failed,
                PlanStatus::Aborted,
                PlanStatus::Errored,
            ])
            .await?;

        let mut archived = 0;
        for execution in finished {
            let Some(end_ts) = execution.end_ts else { continue };
            if age(now, end_ts) >= retention {
                self.store.archive_plan_execution(&execution.uuid).await?;
                archived += 1;
            }
        }
        if archived > 0 {
            info!(archived, "archived finished plan executions");
        }
        Ok(archived)
    }

    /// Run the periodic sweeps until `shutdown` turns true
    pub fn spawn_background(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut sweep = interval(engine.config.sweep_interval());
            sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut consistency = interval(engine.config.consistency_sweep_interval());
            consistency.set_missed_tick_behavior(MissedTickBehavior::Skip);

            debug!("engine sweeps started");
            loop {
                tokio::select! {
                    _ = sweep.tick() => {
                        let now = Utc::now();
                        if let Err(e) = engine.sweep_timeouts(now).await {
                            warn!(error = %e, "timeout sweep failed");
                        }
                        if let Err(e) = engine.waiter.sweep_pending(now).await {
                            warn!(error = %e, "pending notify sweep failed");
                        }
                    }
                    _ = consistency.tick() => {
                        let now = Utc::now();
                        match engine.check_consistency(now).await {
                            Ok(report) if !report.is_clean() => {
                                warn!(?report, "consistency sweep errored out work");
                            }
                            Ok(_) => {}
                            Err(e) => warn!(error = %e, "consistency sweep failed"),
                        }
                        if let Err(e) = engine.archive_expired(now).await {
                            warn!(error = %e, "archive sweep failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("engine sweeps stopped");
        })
    }
}
