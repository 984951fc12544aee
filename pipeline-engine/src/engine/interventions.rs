// Interventions
// Node and plan operations behind interrupts: pause, resume, retry and
// forced terminal statuses. Every change is recorded as an interrupt effect.

use super::transitions::StatusUpdate;
use super::OrchestrationEngine;
use crate::error::{EngineError, EngineResult};
use crate::events::OrchestrationEvent;
use crate::execution::{FailureInfo, InterruptEffect, NodeExecution, PlanStatus, Status};
use crate::interrupt::InterruptType;

use chrono::Utc;
use tracing::info;

use std::sync::Arc;
use std::time::Duration;

/// The interrupt an engine operation runs on behalf of
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectSource {
    pub interrupt_id: String,
    pub interrupt_type: InterruptType,
}

impl EffectSource {
    pub fn new(interrupt_id: impl Into<String>, interrupt_type: InterruptType) -> Self {
        Self {
            interrupt_id: interrupt_id.into(),
            interrupt_type,
        }
    }

    pub fn effect(&self, from_status: Status, to_status: Status) -> InterruptEffect {
        InterruptEffect {
            interrupt_id: self.interrupt_id.clone(),
            interrupt_type: self.interrupt_type,
            took_effect_at: Utc::now(),
            from_status,
            to_status,
        }
    }
}

impl OrchestrationEngine {
    async fn ensure_plan_open(&self, plan_execution_id: &str, source: &EffectSource) -> EngineResult<()> {
        let execution = self.plan_execution(plan_execution_id).await?;
        if execution.status.is_terminal() {
            return Err(EngineError::interrupt(
                &source.interrupt_id,
                format!("plan execution already {}", execution.status),
            ));
        }
        Ok(())
    }

    /// Pause a node and its running descendants, or the whole plan when
    /// `node_execution_id` is `None`. Returns the number of paused nodes.
    pub(crate) async fn pause(
        self: &Arc<Self>,
        plan_execution_id: &str,
        node_execution_id: Option<&str>,
        source: &EffectSource,
    ) -> EngineResult<usize> {
        self.ensure_plan_open(plan_execution_id, source).await?;

        let candidates = match node_execution_id {
            Some(id) => {
                let target = self.node_execution(id).await?;
                if !matches!(target.status, Status::Running | Status::Queued) {
                    return Err(EngineError::interrupt(
                        &source.interrupt_id,
                        format!("node is {}, not running", target.status),
                    ));
                }
                let mut nodes = vec![target];
                nodes.extend(self.descendants(id).await?);
                nodes
            }
            None => {
                let paused = self
                    .update_plan_execution(plan_execution_id, |e| {
                        if e.status != PlanStatus::Running {
                            return Ok(false);
                        }
                        e.status = PlanStatus::Paused;
                        Ok(true)
                    })
                    .await?;
                if paused.is_none() {
                    return Err(EngineError::interrupt(
                        &source.interrupt_id,
                        "plan execution is not running",
                    ));
                }
                self.store.find_node_executions(plan_execution_id).await?
            }
        };

        let mut count = 0;
        for node in candidates {
            let mut from = node.status;
            let updated = self
                .update_node(&node.uuid, |n| {
                    from = n.status;
                    if !matches!(n.status, Status::Running | Status::Queued) {
                        return Ok(false);
                    }
                    n.paused_from = Some(n.status);
                    n.status = Status::Paused;
                    n.interrupt_effects.push(source.effect(from, Status::Paused));
                    Ok(true)
                })
                .await?;
            if let Some(updated) = updated {
                count += 1;
                self.fire(OrchestrationEvent::node_status_update(&updated, from));
            }
        }

        info!(plan_execution = plan_execution_id, paused = count, "paused");
        Ok(count)
    }

    /// Resume paused nodes below a node, or the whole plan when
    /// `node_execution_id` is `None`. A node waiting for intervention is
    /// resumed by retrying it. Returns the number of resumed nodes.
    pub(crate) async fn resume(
        self: &Arc<Self>,
        plan_execution_id: &str,
        node_execution_id: Option<&str>,
        source: &EffectSource,
    ) -> EngineResult<usize> {
        self.ensure_plan_open(plan_execution_id, source).await?;

        let candidates = match node_execution_id {
            Some(id) => {
                let target = self.node_execution(id).await?;
                match target.status {
                    Status::InterventionWaiting => {
                        self.retry(id, source).await?;
                        return Ok(1);
                    }
                    Status::Paused => {}
                    status => {
                        return Err(EngineError::interrupt(
                            &source.interrupt_id,
                            format!("node is {}, not paused", status),
                        ))
                    }
                }
                let mut nodes = vec![target];
                nodes.extend(self.descendants(id).await?);
                nodes
            }
            None => {
                let resumed = self
                    .update_plan_execution(plan_execution_id, |e| {
                        if e.status != PlanStatus::Paused {
                            return Ok(false);
                        }
                        e.status = PlanStatus::Running;
                        Ok(true)
                    })
                    .await?;
                if resumed.is_none() {
                    return Err(EngineError::interrupt(
                        &source.interrupt_id,
                        "plan execution is not paused",
                    ));
                }
                self.store.find_node_executions(plan_execution_id).await?
            }
        };

        let mut count = 0;
        for node in candidates {
            let mut held = None;
            let updated = self
                .update_node(&node.uuid, |n| {
                    if n.status != Status::Paused {
                        return Ok(false);
                    }
                    let restored = n.paused_from.take().unwrap_or(Status::Running);
                    n.status = restored;
                    held = n.pending_response.take();
                    n.interrupt_effects.push(source.effect(Status::Paused, restored));
                    Ok(true)
                })
                .await?;
            let Some(updated) = updated else { continue };

            count += 1;
            self.fire(OrchestrationEvent::node_status_update(&updated, Status::Paused));
            if updated.status == Status::Queued {
                self.spawn_node_start(updated.uuid.clone(), Duration::ZERO);
            }
            if let Some(responses) = held {
                self.spawn_resume(updated.uuid.clone(), responses);
            }
        }

        info!(plan_execution = plan_execution_id, resumed = count, "resumed");
        Ok(count)
    }

    /// Replace a failed or intervention-waiting node with a new attempt and
    /// start it. Returns the new attempt.
    pub(crate) async fn retry(
        self: &Arc<Self>,
        node_execution_id: &str,
        source: &EffectSource,
    ) -> EngineResult<NodeExecution> {
        let node = self.node_execution(node_execution_id).await?;
        self.ensure_plan_open(&node.plan_execution_id, source).await?;

        if node.old_retry {
            return Err(EngineError::interrupt(
                &source.interrupt_id,
                "node was already retried",
            ));
        }
        if node.status != Status::InterventionWaiting && !node.status.is_broke() {
            return Err(EngineError::interrupt(
                &source.interrupt_id,
                format!("cannot retry a node that is {}", node.status),
            ));
        }

        // The old attempt keeps the failure it was parked with
        let settled = self
            .update_node(node_execution_id, |n| {
                let to = match n.status {
                    Status::InterventionWaiting => n.advised_status.unwrap_or(Status::Failed),
                    status if status.is_broke() => status,
                    _ => return Ok(false),
                };
                n.interrupt_effects.push(source.effect(n.status, to));
                n.status = to;
                n.end_ts = Some(Utc::now());
                Ok(true)
            })
            .await?
            .ok_or_else(|| EngineError::interrupt(&source.interrupt_id, "node changed concurrently"))?;
        self.timeouts.cancel_for_node(node_execution_id).await?;
        if settled.status != node.status {
            self.fire(OrchestrationEvent::node_status_update(&settled, node.status));
        }

        let retry = self.create_retry(&settled).await?;
        self.start_node(&retry.uuid).await?;
        self.node_execution(&retry.uuid).await
    }

    /// Force a terminal status on an active node; its advisers still run
    pub(crate) async fn force_status(
        self: &Arc<Self>,
        node_execution_id: &str,
        status: Status,
        failure: Option<FailureInfo>,
        source: &EffectSource,
    ) -> EngineResult<()> {
        let node = self.node_execution(node_execution_id).await?;
        self.ensure_plan_open(&node.plan_execution_id, source).await?;
        if !node.status.is_active() {
            return Err(EngineError::interrupt(
                &source.interrupt_id,
                format!("node already {}", node.status),
            ));
        }

        let mut update = StatusUpdate::new(status).with_effect(source.effect(node.status, status));
        if let Some(failure) = failure {
            update = update.with_failure(failure);
        }
        self.apply_status_update(node_execution_id, update).await
    }
}
