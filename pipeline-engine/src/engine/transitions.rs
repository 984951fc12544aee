// Status Transitions
// Terminal status handling: the adviser pipeline, branch continuation and
// plan conclusion

use super::OrchestrationEngine;
use crate::adviser::{default_response, AdviserResponse, AdvisingEvent};
use crate::error::{EngineError, EngineResult};
use crate::events::OrchestrationEvent;
use crate::execution::{
    aggregate_status, FailureInfo, FailureType, InterruptEffect, NodeExecution, PlanStatus, Status,
};
use crate::plan::PlanNode;
use crate::resolver::OUTCOME;
use crate::step::StepResponse;
use crate::timeout::TimeoutKind;
use crate::waiter::ResponseData;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use std::sync::Arc;
use std::time::Duration;

/// A requested status change and what comes with it
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StatusUpdate {
    pub status: Status,
    pub failure: Option<FailureInfo>,
    pub outcomes: Vec<(String, Value)>,
    /// Present when an interrupt forces the transition
    pub effect: Option<InterruptEffect>,
}

impl StatusUpdate {
    pub fn new(status: Status) -> Self {
        Self {
            status,
            failure: None,
            outcomes: Vec::new(),
            effect: None,
        }
    }

    pub fn with_failure(mut self, failure: FailureInfo) -> Self {
        self.failure = Some(failure);
        self
    }

    pub fn with_effect(mut self, effect: InterruptEffect) -> Self {
        self.effect = Some(effect);
        self
    }
}

impl From<StepResponse> for StatusUpdate {
    fn from(response: StepResponse) -> Self {
        Self {
            status: response.status,
            failure: response.failure,
            outcomes: response.outcomes,
            effect: None,
        }
    }
}

impl OrchestrationEngine {
    /// Report a new status for a node execution.
    ///
    /// Terminal statuses consult the node's advisers exactly once; replays of
    /// an already handled status are no-ops.
    pub async fn handle_status_update(
        self: &Arc<Self>,
        node_execution_id: &str,
        status: Status,
    ) -> EngineResult<()> {
        self.apply_status_update(node_execution_id, StatusUpdate::new(status))
            .await
    }

    /// Like [`apply_status_update`](Self::apply_status_update), but a node
    /// that settled concurrently is not an error
    pub(crate) async fn settle(self: &Arc<Self>, id: &str, update: StatusUpdate) -> EngineResult<()> {
        match self.apply_status_update(id, update).await {
            Err(EngineError::IllegalTransition { from, to, .. }) => {
                debug!(node = id, %from, %to, "node already settled; update dropped");
                Ok(())
            }
            other => other,
        }
    }

    pub(crate) async fn apply_status_update(
        self: &Arc<Self>,
        id: &str,
        update: StatusUpdate,
    ) -> EngineResult<()> {
        let target = update.status;
        let forced = update.effect.is_some();
        let mut from = Status::Queued;

        let updated = self
            .update_node(id, |n| {
                from = n.status;
                if !forced && (n.status == target || n.advised_status == Some(target)) {
                    return Ok(false);
                }
                // Discontinuing nodes are settled by the abort that claimed them
                if !forced && n.status == Status::Discontinuing {
                    return Ok(false);
                }
                let allowed = if forced {
                    n.status.can_force_to(target)
                } else {
                    n.status.can_transition_to(target)
                };
                if !allowed {
                    return Err(EngineError::IllegalTransition {
                        node_execution_id: n.uuid.clone(),
                        from: n.status,
                        to: target,
                    });
                }
                n.status = target;
                if let Some(failure) = &update.failure {
                    n.failure_info = Some(failure.clone());
                }
                if let Some(effect) = &update.effect {
                    n.interrupt_effects.push(effect.clone());
                }
                if target.is_terminal() {
                    n.end_ts = Some(Utc::now());
                    n.advised_status = Some(target);
                }
                Ok(true)
            })
            .await?;

        let Some(node) = updated else {
            debug!(node = id, status = %target, "status replay ignored");
            return Ok(());
        };

        debug!(node = id, %from, to = %target, "node status updated");
        self.fire(OrchestrationEvent::node_status_update(&node, from));
        if !target.is_terminal() {
            return Ok(());
        }

        self.release(&node).await?;
        if target.is_positive() {
            self.record_outcomes(&node, update.outcomes).await;
        }
        self.advise(&node, from).await
    }

    /// Drop timers, correlations and running descendants of a settled node
    async fn release(self: &Arc<Self>, node: &NodeExecution) -> EngineResult<()> {
        self.timeouts.cancel_for_node(&node.uuid).await?;

        let live = node.live_correlation_ids();
        if !live.is_empty() {
            self.waiter.cancel(&live).await?;
        }

        let active: Vec<NodeExecution> = self
            .descendants(&node.uuid)
            .await?
            .into_iter()
            .filter(|d| d.status.is_active())
            .collect();
        if !active.is_empty() {
            self.abort_nodes(active, None).await?;
        }
        Ok(())
    }

    async fn record_outcomes(&self, node: &NodeExecution, outcomes: Vec<(String, Value)>) {
        if outcomes.is_empty() {
            return;
        }
        let resolver = match self.registries.resolvers.obtain(OUTCOME) {
            Ok(resolver) => resolver,
            Err(e) => {
                warn!(node = %node.uuid, error = %e, "outcomes dropped");
                return;
            }
        };
        for (name, value) in outcomes {
            if let Err(e) = resolver.consume(&node.ambiance, &name, value).await {
                warn!(node = %node.uuid, output = %name, error = %e, "could not record outcome");
            }
        }
    }

    async fn advise(self: &Arc<Self>, node: &NodeExecution, from: Status) -> EngineResult<()> {
        let (_, plan_node) = self.plan_node_for(node).await?;

        let response = match self.select_advice(node, &plan_node, from) {
            Ok(response) => response,
            Err(e) => {
                warn!(node = %node.uuid, error = %e, "adviser lookup failed");
                let failure = FailureInfo::new(FailureType::Unknown, e.to_string());
                let node = self.settle_as(node, Status::Errored, Some(failure)).await?;
                return self.end_branch(&node).await;
            }
        };

        if let Some(response) = &response {
            self.update_node(&node.uuid, |n| {
                n.adviser_response = Some(response.clone());
                Ok(true)
            })
            .await?;
        }
        self.apply_adviser_response(node, response).await
    }

    /// First adviser that can advise wins; without one, the default applies
    fn select_advice(
        &self,
        node: &NodeExecution,
        plan_node: &PlanNode,
        from: Status,
    ) -> EngineResult<Option<AdviserResponse>> {
        for obtainment in &plan_node.advisers {
            let adviser = self.registries.advisers.obtain(&obtainment.adviser_type)?;
            let event = AdvisingEvent {
                node_execution: node,
                plan_node,
                from_status: from,
                to_status: node.status,
                failure_info: node.failure_info.as_ref(),
                parameters: &obtainment.parameters,
            };
            if adviser.can_advise(&event) {
                let response = adviser.on_advise(&event);
                debug!(
                    node = %node.uuid,
                    adviser = %obtainment.adviser_type,
                    ?response,
                    "adviser matched"
                );
                return Ok(Some(response));
            }
        }
        Ok(default_response(node.status))
    }

    async fn apply_adviser_response(
        self: &Arc<Self>,
        node: &NodeExecution,
        response: Option<AdviserResponse>,
    ) -> EngineResult<()> {
        let Some(response) = response else {
            return self.end_branch(node).await;
        };

        match response {
            AdviserResponse::NextStep { next_node_id } => self.start_next(node, &next_node_id).await,
            AdviserResponse::Retry { wait_ms } => {
                let retry = self.create_retry(node).await?;
                self.spawn_node_start(retry.uuid, Duration::from_millis(wait_ms));
                Ok(())
            }
            AdviserResponse::Intervene { timeout_ms } => self.intervene(node, timeout_ms).await,
            AdviserResponse::Ignore { next_node_id } => {
                let node = self.settle_as(node, Status::IgnoreFailed, None).await?;
                self.continue_or_end(&node, next_node_id).await
            }
            AdviserResponse::MarkSuccess { next_node_id } => {
                let node = self.settle_as(node, Status::Succeeded, None).await?;
                self.continue_or_end(&node, next_node_id).await
            }
            AdviserResponse::MarkAsFailure { next_node_id } => {
                let node = if node.status.is_positive() {
                    self.settle_as(node, Status::Failed, None).await?
                } else {
                    node.clone()
                };
                self.continue_or_end(&node, next_node_id).await
            }
            AdviserResponse::EndPlan => self.end_plan(node).await,
        }
    }

    /// Rewrite the terminal status of an already advised node
    async fn settle_as(
        &self,
        node: &NodeExecution,
        status: Status,
        failure: Option<FailureInfo>,
    ) -> EngineResult<NodeExecution> {
        let from = node.status;
        let updated = self
            .update_node(&node.uuid, |n| {
                if n.status == status {
                    return Ok(false);
                }
                n.status = status;
                n.advised_status = Some(status);
                n.end_ts = Some(Utc::now());
                if let Some(failure) = &failure {
                    n.failure_info = Some(failure.clone());
                }
                Ok(true)
            })
            .await?;
        match updated {
            Some(node) => {
                self.fire(OrchestrationEvent::node_status_update(&node, from));
                Ok(node)
            }
            None => self.node_execution(&node.uuid).await,
        }
    }

    async fn continue_or_end(
        self: &Arc<Self>,
        node: &NodeExecution,
        next_node_id: Option<String>,
    ) -> EngineResult<()> {
        match next_node_id {
            Some(next) => self.start_next(node, &next).await,
            None => self.end_branch(node).await,
        }
    }

    /// Queue the successor of `node` in the same branch
    async fn start_next(self: &Arc<Self>, node: &NodeExecution, plan_node_id: &str) -> EngineResult<()> {
        let execution = self.plan_execution(&node.plan_execution_id).await?;
        if execution.status.is_terminal() {
            return Ok(());
        }
        let plan = self.plan_for(&execution).await?;
        let plan_node = plan
            .node(plan_node_id)
            .ok_or_else(|| EngineError::not_found("plan node", plan_node_id))?;

        let mut next = NodeExecution::new(&node.plan_execution_id, plan_node, &node.ambiance.parent());
        next.parent_id = node.parent_id.clone();
        next.previous_id = Some(node.uuid.clone());
        next.notify_id = node.notify_id.clone();
        self.store.insert_node_execution(&next).await?;

        let next_id = next.uuid.clone();
        self.update_node(&node.uuid, |n| {
            n.next_id = Some(next_id.clone());
            Ok(true)
        })
        .await?;

        debug!(from = %node.uuid, next = %next.uuid, plan_node = plan_node_id, "advancing branch");
        self.spawn_node_start(next.uuid, Duration::ZERO);
        Ok(())
    }

    /// New QUEUED attempt of `node`; the old attempt is marked superseded
    pub(crate) async fn create_retry(&self, node: &NodeExecution) -> EngineResult<NodeExecution> {
        let retry = NodeExecution::retry_of(node);
        self.store.insert_node_execution(&retry).await?;
        self.update_node(&node.uuid, |n| {
            n.old_retry = true;
            Ok(true)
        })
        .await?;
        info!(
            node = %node.uuid,
            retry = %retry.uuid,
            attempt = retry.retry_count(),
            "retrying node"
        );
        Ok(retry)
    }

    async fn intervene(&self, node: &NodeExecution, timeout_ms: Option<u64>) -> EngineResult<()> {
        let timeout = timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.config.default_intervention_timeout());

        let Some(waiting) = self
            .update_node(&node.uuid, |n| {
                if !n.status.can_transition_to(Status::InterventionWaiting) {
                    return Ok(false);
                }
                n.status = Status::InterventionWaiting;
                n.end_ts = None;
                Ok(true)
            })
            .await?
        else {
            return Ok(());
        };

        let instance = self
            .timeouts
            .register(&waiting, TimeoutKind::Intervention, timeout)
            .await?;
        let waiting = self
            .update_node(&node.uuid, |n| {
                n.timeout_instance_ids.push(instance.uuid.clone());
                Ok(true)
            })
            .await?
            .unwrap_or(waiting);

        info!(node = %node.uuid, timeout_ms = timeout.as_millis() as u64, "waiting for intervention");
        self.fire(OrchestrationEvent::node_status_update(&waiting, node.status));
        self.fire(OrchestrationEvent::intervention_wait_start(&waiting));
        Ok(())
    }

    /// The branch of `node` is done: wake the enclosing parent, or conclude
    /// the plan at the root
    pub(crate) async fn end_branch(&self, node: &NodeExecution) -> EngineResult<()> {
        let Some(notify_id) = &node.notify_id else {
            return self.conclude_plan(&node.plan_execution_id, None).await;
        };

        let nodes = self.store.find_node_executions(&node.plan_execution_id).await?;
        let status = aggregate_status(
            nodes
                .iter()
                .filter(|n| n.notify_id.as_ref() == Some(notify_id) && !n.old_retry)
                .map(|n| n.status),
        )
        .unwrap_or(node.status);

        let outcome = self
            .waiter
            .notify(
                notify_id,
                ResponseData::NodeCompleted {
                    node_execution_id: node.uuid.clone(),
                    status,
                },
            )
            .await?;
        debug!(node = %node.uuid, %status, ?outcome, "branch ended");
        Ok(())
    }

    /// Settle the plan execution; without an explicit status the most
    /// severe status of its current attempts decides
    pub(crate) async fn conclude_plan(
        &self,
        plan_execution_id: &str,
        status: Option<PlanStatus>,
    ) -> EngineResult<()> {
        let status = match status {
            Some(status) => status,
            None => {
                let nodes = self.store.find_node_executions(plan_execution_id).await?;
                aggregate_status(nodes.iter().filter(|n| !n.old_retry).map(|n| n.status))
                    .map(PlanStatus::from_node_status)
                    .unwrap_or(PlanStatus::Succeeded)
            }
        };

        let concluded = self
            .update_plan_execution(plan_execution_id, |e| {
                if e.status.is_terminal() {
                    return Ok(false);
                }
                e.status = status;
                e.end_ts = Some(Utc::now());
                Ok(true)
            })
            .await?;

        if let Some(execution) = concluded {
            info!(plan_execution = plan_execution_id, %status, "plan execution finished");
            self.fire(OrchestrationEvent::orchestration_end(&execution));
        }
        Ok(())
    }

    /// Stop every other active node and conclude with the node's status
    async fn end_plan(self: &Arc<Self>, node: &NodeExecution) -> EngineResult<()> {
        let others: Vec<NodeExecution> = self
            .store
            .find_node_executions(&node.plan_execution_id)
            .await?
            .into_iter()
            .filter(|n| n.uuid != node.uuid && n.status.is_active())
            .collect();
        self.abort_nodes(others, None).await?;
        self.conclude_plan(
            &node.plan_execution_id,
            Some(PlanStatus::from_node_status(node.status)),
        )
        .await
    }
}
