// Discontinue
// Aborting whole plans or subtrees, depth-first, releasing every
// registration the aborted nodes held

use super::interventions::EffectSource;
use super::transitions::StatusUpdate;
use super::OrchestrationEngine;
use crate::error::{EngineError, EngineResult};
use crate::events::OrchestrationEvent;
use crate::execution::{NodeExecution, PlanStatus, Status};

use chrono::Utc;
use tracing::{debug, info};

use std::cmp::Reverse;
use std::sync::Arc;

/// What to abort
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscontinueMode {
    /// Every active node; the plan ends ABORTED
    AbortAll,
    /// One node and everything below it; its advisers decide what follows
    AbortSubtree(String),
}

impl OrchestrationEngine {
    /// Abort part or all of a plan execution. Returns the number of node
    /// executions that were aborted.
    pub async fn discontinue(
        self: &Arc<Self>,
        plan_execution_id: &str,
        mode: DiscontinueMode,
    ) -> EngineResult<usize> {
        self.discontinue_with(plan_execution_id, mode, None).await
    }

    pub(crate) async fn discontinue_with(
        self: &Arc<Self>,
        plan_execution_id: &str,
        mode: DiscontinueMode,
        source: Option<&EffectSource>,
    ) -> EngineResult<usize> {
        match mode {
            DiscontinueMode::AbortAll => {
                let active: Vec<NodeExecution> = self
                    .store
                    .find_node_executions(plan_execution_id)
                    .await?
                    .into_iter()
                    .filter(|n| n.status.is_active())
                    .collect();
                let aborted = self.abort_nodes(active, source).await?;
                self.conclude_plan(plan_execution_id, Some(PlanStatus::Aborted))
                    .await?;
                info!(plan_execution = plan_execution_id, aborted, "plan execution aborted");
                Ok(aborted)
            }
            DiscontinueMode::AbortSubtree(node_execution_id) => {
                let target = self.node_execution(&node_execution_id).await?;
                if target.plan_execution_id != plan_execution_id {
                    return Err(EngineError::not_found("node execution", node_execution_id));
                }
                if !target.status.is_active() {
                    debug!(node = %target.uuid, status = %target.status, "nothing to abort");
                    return Ok(0);
                }

                let below: Vec<NodeExecution> = self
                    .descendants(&target.uuid)
                    .await?
                    .into_iter()
                    .filter(|n| n.status.is_active())
                    .collect();
                let mut aborted = self.abort_nodes(below, source).await?;

                // The target itself goes through its advisers so its branch can end
                let mut update = StatusUpdate::new(Status::Aborted);
                if let Some(source) = source {
                    update = update.with_effect(source.effect(target.status, Status::Aborted));
                }
                self.settle(&target.uuid, update).await?;
                aborted += 1;
                info!(node = %target.uuid, aborted, "subtree aborted");
                Ok(aborted)
            }
        }
    }

    /// Abort `nodes` deepest first without consulting their advisers.
    ///
    /// All nodes are first claimed as DISCONTINUING so none of them starts new
    /// work, then their timers and correlations are released and they settle
    /// as ABORTED.
    pub(crate) async fn abort_nodes(
        &self,
        mut nodes: Vec<NodeExecution>,
        source: Option<&EffectSource>,
    ) -> EngineResult<usize> {
        nodes.sort_by_key(|n| Reverse(n.ambiance.levels.len()));

        let mut claimed = Vec::with_capacity(nodes.len());
        for node in &nodes {
            let mut from = node.status;
            let updated = self
                .update_node(&node.uuid, |n| {
                    from = n.status;
                    if !n.status.is_active() || n.status == Status::Discontinuing {
                        return Ok(false);
                    }
                    n.status = Status::Discontinuing;
                    Ok(true)
                })
                .await?;
            if let Some(updated) = updated {
                self.fire(OrchestrationEvent::node_status_update(&updated, from));
                claimed.push((updated, from));
            }
        }

        let mut aborted = 0;
        for (node, from) in claimed {
            self.timeouts.cancel_for_node(&node.uuid).await?;
            let live = node.live_correlation_ids();
            if !live.is_empty() {
                self.waiter.cancel(&live).await?;
            }

            let settled = self
                .update_node(&node.uuid, |n| {
                    if n.status != Status::Discontinuing {
                        return Ok(false);
                    }
                    n.status = Status::Aborted;
                    n.advised_status = Some(Status::Aborted);
                    n.end_ts = Some(Utc::now());
                    if let Some(source) = source {
                        n.interrupt_effects.push(source.effect(from, Status::Aborted));
                    }
                    Ok(true)
                })
                .await?;
            if let Some(settled) = settled {
                aborted += 1;
                self.fire(OrchestrationEvent::node_status_update(
                    &settled,
                    Status::Discontinuing,
                ));
            }
        }

        if aborted > 0 {
            debug!(aborted, "node executions aborted");
        }
        Ok(aborted)
    }
}
