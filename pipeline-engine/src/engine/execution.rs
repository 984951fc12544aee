// Node Execution Driving
// Starting plans and nodes, applying facilitator results, resuming suspended
// nodes

use super::transitions::StatusUpdate;
use super::{EngineResumeCallback, OrchestrationEngine, ENGINE_PUBLISHER};
use crate::error::{EngineError, EngineResult};
use crate::events::OrchestrationEvent;
use crate::execution::{
    Ambiance, ExecutableResponse, FailureInfo, FailureType, NodeExecution, PlanExecution,
    PlanStatus, Status,
};
use crate::facilitator::{ChildMode, Facilitation};
use crate::plan::{Plan, PlanNode, PlanValidator};
use crate::step::{StepContext, StepError};
use crate::timeout::TimeoutKind;
use crate::waiter::ResponseMap;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use std::sync::Arc;
use std::time::Duration;

impl OrchestrationEngine {
    /// Validate `plan`, persist it and start its start node.
    ///
    /// Returns once the first node has been facilitated; the rest of the plan
    /// proceeds on background tasks.
    pub async fn start_execution(
        self: &Arc<Self>,
        plan: Plan,
        inputs: Value,
        principal: &str,
    ) -> EngineResult<PlanExecution> {
        PlanValidator::validate(&plan, &self.registries)?;
        self.store.save_plan(&plan).await?;

        let execution = PlanExecution::new(&plan.uuid, inputs, principal);
        self.store.insert_plan_execution(&execution).await?;
        info!(
            plan = %plan.name,
            plan_execution = %execution.uuid,
            "plan execution started"
        );
        self.fire(OrchestrationEvent::orchestration_start(&execution));

        let start = plan
            .start_node()
            .ok_or_else(|| EngineError::InvalidPlan("start node is missing".to_string()))?;
        let node = NodeExecution::new(&execution.uuid, start, &Ambiance::new(&execution.uuid));
        self.store.insert_node_execution(&node).await?;

        if let Err(e) = self.start_node(&node.uuid).await {
            warn!(node = %node.uuid, error = %e, "start node failed");
            self.error_out(&node.uuid, &e).await;
        }

        self.plan_execution(&execution.uuid).await
    }

    /// Move a QUEUED node to RUNNING and hand it to its facilitator
    pub(crate) async fn start_node(self: &Arc<Self>, id: &str) -> EngineResult<()> {
        let queued = self.node_execution(id).await?;
        if queued.status != Status::Queued {
            debug!(node = id, status = %queued.status, "node not queued; skipping start");
            return Ok(());
        }

        let execution = self.plan_execution(&queued.plan_execution_id).await?;
        if execution.status.is_terminal() || !self.parent_is_active(&queued).await? {
            self.abort_nodes(vec![queued], None).await?;
            return Ok(());
        }
        if execution.status == PlanStatus::Paused {
            self.update_node(id, |n| {
                if n.status != Status::Queued {
                    return Ok(false);
                }
                n.paused_from = Some(Status::Queued);
                n.status = Status::Paused;
                Ok(true)
            })
            .await?;
            debug!(node = id, "plan paused; node held");
            return Ok(());
        }

        let Some(node) = self
            .update_node(id, |n| {
                if n.status != Status::Queued {
                    return Ok(false);
                }
                n.status = Status::Running;
                n.start_ts = Some(Utc::now());
                Ok(true)
            })
            .await?
        else {
            return Ok(());
        };

        self.fire(OrchestrationEvent::node_start(&node));
        self.fire(OrchestrationEvent::node_status_update(&node, Status::Queued));

        let (execution, plan_node) = self.plan_node_for(&node).await?;
        debug!(node = id, plan_node = %plan_node.label(), "starting node");

        let node = match plan_node.timeout() {
            Some(timeout) => {
                let instance = self
                    .timeouts
                    .register(&node, TimeoutKind::NodeDeadline, timeout)
                    .await?;
                self.update_node(id, |n| {
                    n.timeout_instance_ids.push(instance.uuid.clone());
                    Ok(true)
                })
                .await?
                .unwrap_or(node)
            }
            None => node,
        };

        let (step, facilitator) = match (
            self.registries.steps.obtain(&plan_node.step_type),
            self.registries.facilitators.obtain(&plan_node.facilitator),
        ) {
            (Ok(step), Ok(facilitator)) => (step, facilitator),
            (Err(e), _) | (_, Err(e)) => {
                return self
                    .settle(
                        id,
                        StatusUpdate::new(Status::Errored)
                            .with_failure(FailureInfo::new(FailureType::Unknown, e.to_string())),
                    )
                    .await
            }
        };

        let ctx = self.step_context(node, plan_node, &execution);
        let result = facilitator.facilitate(step.as_ref(), &ctx).await;
        self.apply_facilitation(&ctx.node_execution, result).await
    }

    /// Deliver the responses a suspended node was waiting on
    pub async fn resume_node(self: &Arc<Self>, id: &str, responses: ResponseMap) -> EngineResult<()> {
        let node = self.node_execution(id).await?;
        match node.status {
            Status::Running => {}
            Status::Paused => {
                let stashed = self
                    .update_node(id, |n| {
                        if n.status != Status::Paused {
                            return Ok(false);
                        }
                        n.pending_response = Some(responses.clone());
                        Ok(true)
                    })
                    .await?;
                match stashed {
                    Some(_) => debug!(node = id, "node paused; response held until resume"),
                    None => self.spawn_resume(id.to_string(), responses),
                }
                return Ok(());
            }
            status => {
                debug!(node = id, %status, "dropping responses for settled node");
                return Ok(());
            }
        }

        let (execution, plan_node) = self.plan_node_for(&node).await?;
        let step = self.registries.steps.obtain(&plan_node.step_type)?;
        let facilitator = self.registries.facilitators.obtain(&plan_node.facilitator)?;

        let ctx = self.step_context(node, plan_node, &execution);
        let result = facilitator.resume(step.as_ref(), &ctx, responses).await;
        self.apply_facilitation(&ctx.node_execution, result).await
    }

    pub(crate) fn step_context(
        &self,
        node: NodeExecution,
        plan_node: PlanNode,
        execution: &PlanExecution,
    ) -> StepContext {
        StepContext::new(
            node,
            plan_node,
            execution.inputs.clone(),
            self.registries.resolvers.clone(),
        )
    }

    async fn apply_facilitation(
        self: &Arc<Self>,
        node: &NodeExecution,
        result: Result<Facilitation, StepError>,
    ) -> EngineResult<()> {
        match result {
            Err(e) => {
                warn!(node = %node.uuid, error = %e, "step raised an error");
                self.settle(
                    &node.uuid,
                    StatusUpdate::new(e.status()).with_failure(e.failure_info()),
                )
                .await
            }
            Ok(Facilitation::Complete(response)) => {
                self.settle(&node.uuid, StatusUpdate::from(response)).await
            }
            Ok(Facilitation::Suspend(executable)) => {
                self.suspend(node, executable).await.map(|_| ())
            }
            Ok(Facilitation::SpawnChildren {
                plan_node_ids,
                mode,
            }) => self.spawn_children(node, plan_node_ids, mode).await,
        }
    }

    /// Record `executable` on the node and wait on its correlation ids.
    /// Returns `false` when the node settled in the meantime.
    async fn suspend(
        self: &Arc<Self>,
        node: &NodeExecution,
        executable: ExecutableResponse,
    ) -> EngineResult<bool> {
        let correlation_ids = executable.correlation_ids();

        let recorded = self
            .update_node(&node.uuid, |n| {
                if !matches!(n.status, Status::Running | Status::Paused) {
                    return Ok(false);
                }
                n.executable_responses.push(executable.clone());
                Ok(true)
            })
            .await?;
        if recorded.is_none() {
            debug!(node = %node.uuid, "node settled before suspension");
            self.waiter.cancel(&correlation_ids).await?;
            return Ok(false);
        }

        self.waiter
            .wait_for_all_on(
                ENGINE_PUBLISHER,
                EngineResumeCallback::payload(&node.uuid),
                correlation_ids.clone(),
            )
            .await?;

        // An abort may have released the node's correlations before they were bound
        let current = self.node_execution(&node.uuid).await?;
        if !matches!(current.status, Status::Running | Status::Paused) {
            self.waiter.cancel(&correlation_ids).await?;
            return Ok(false);
        }

        if executable.awaits_notify() {
            if let Some(ttl) = self.config.correlation_ttl() {
                // One TTL per suspension; a chain link replaces the previous one
                self.timeouts
                    .cancel_kind(&node.uuid, TimeoutKind::Correlation)
                    .await?;
                let instance = self
                    .timeouts
                    .register(&current, TimeoutKind::Correlation, ttl)
                    .await?;
                self.update_node(&node.uuid, |n| {
                    n.timeout_instance_ids.push(instance.uuid.clone());
                    Ok(true)
                })
                .await?;
            }
        }

        debug!(node = %node.uuid, correlation_ids = ?correlation_ids, "node suspended");
        Ok(true)
    }

    async fn spawn_children(
        self: &Arc<Self>,
        parent: &NodeExecution,
        plan_node_ids: Vec<String>,
        mode: ChildMode,
    ) -> EngineResult<()> {
        let execution = self.plan_execution(&parent.plan_execution_id).await?;
        let plan = self.plan_for(&execution).await?;

        let mut children = Vec::with_capacity(plan_node_ids.len());
        for plan_node_id in &plan_node_ids {
            let plan_node = plan
                .node(plan_node_id)
                .ok_or_else(|| EngineError::not_found("plan node", plan_node_id))?;
            let mut child = NodeExecution::new(&parent.plan_execution_id, plan_node, &parent.ambiance);
            child.parent_id = Some(parent.uuid.clone());
            child.notify_id = Some(child.uuid.clone());
            children.push(child);
        }

        let Some(first) = children.first().map(|c| c.uuid.clone()) else {
            return self.settle(&parent.uuid, StatusUpdate::new(Status::Succeeded)).await;
        };
        let executable = match mode {
            ChildMode::Single => ExecutableResponse::Child {
                child_execution_id: first,
            },
            ChildMode::Multiple => ExecutableResponse::Children {
                child_execution_ids: children.iter().map(|c| c.uuid.clone()).collect(),
            },
            ChildMode::Chain {
                chain_end,
                pass_through,
            } => ExecutableResponse::ChildChain {
                child_execution_id: first,
                chain_end,
                pass_through,
            },
        };

        if !self.suspend(parent, executable).await? {
            return Ok(());
        }

        for child in children {
            self.store.insert_node_execution(&child).await?;
            debug!(parent = %parent.uuid, child = %child.uuid, "child spawned");
            self.spawn_node_start(child.uuid, Duration::ZERO);
        }
        Ok(())
    }

    async fn parent_is_active(&self, node: &NodeExecution) -> EngineResult<bool> {
        match &node.parent_id {
            Some(parent_id) => Ok(self.node_execution(parent_id).await?.status.is_active()),
            None => Ok(true),
        }
    }

    /// Last-resort handling of an engine error while driving a node
    pub(crate) async fn error_out(self: &Arc<Self>, id: &str, err: &EngineError) {
        let update = StatusUpdate::new(Status::Errored)
            .with_failure(FailureInfo::new(FailureType::Unknown, err.to_string()));
        if let Err(e) = self.settle(id, update).await {
            warn!(node = id, error = %e, "could not error out node");
        }
    }
}
