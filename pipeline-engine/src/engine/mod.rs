// Engine Module
// Orchestration engine: drives node executions through facilitators,
// consults advisers on completion, and resumes suspended nodes when their
// correlations fire

pub mod builder;
pub mod discontinue;
pub mod execution;
pub mod interventions;
pub mod sweeps;
pub mod transitions;

pub use builder::EngineBuilder;
pub use discontinue::DiscontinueMode;
pub use sweeps::ConsistencyReport;

use crate::adviser::Adviser;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::events::{OrchestrationEvent, OrchestrationSubject};
use crate::execution::{NodeExecution, PlanExecution};
use crate::facilitator::Facilitator;
use crate::plan::{Plan, PlanNode};
use crate::registry::Registry;
use crate::resolver::Resolver;
use crate::step::Step;
use crate::store::ExecutionStore;
use crate::timeout::TimeoutEngine;
use crate::waiter::{NotifyCallback, ResponseMap, WaitNotifyEngine};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{error, warn};

use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

/// Publisher name the engine registers its resume callback under
pub const ENGINE_PUBLISHER: &str = "orchestration";

/// The strategy registries the engine dispatches through
#[derive(Clone)]
pub struct Registries {
    pub steps: Registry<dyn Step>,
    pub facilitators: Registry<dyn Facilitator>,
    pub advisers: Registry<dyn Adviser>,
    pub resolvers: Registry<dyn Resolver>,
}

/// Orchestration engine
pub struct OrchestrationEngine {
    store: Arc<dyn ExecutionStore>,
    registries: Registries,
    waiter: Arc<WaitNotifyEngine>,
    timeouts: TimeoutEngine,
    subject: OrchestrationSubject,
    config: EngineConfig,
}

impl OrchestrationEngine {
    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        &self.store
    }

    pub fn registries(&self) -> &Registries {
        &self.registries
    }

    pub fn waiter(&self) -> &Arc<WaitNotifyEngine> {
        &self.waiter
    }

    pub fn timeouts(&self) -> &TimeoutEngine {
        &self.timeouts
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── Queries ──

    pub async fn plan_execution(&self, id: &str) -> EngineResult<PlanExecution> {
        self.store
            .get_plan_execution(id)
            .await?
            .ok_or_else(|| EngineError::not_found("plan execution", id))
    }

    pub async fn node_execution(&self, id: &str) -> EngineResult<NodeExecution> {
        self.store
            .get_node_execution(id)
            .await?
            .ok_or_else(|| EngineError::not_found("node execution", id))
    }

    /// Node executions of a plan execution in creation order
    pub async fn node_executions(&self, plan_execution_id: &str) -> EngineResult<Vec<NodeExecution>> {
        self.store.find_node_executions(plan_execution_id).await
    }

    /// Attempts of one plan node, oldest first
    pub async fn node_executions_for_plan_node(
        &self,
        plan_execution_id: &str,
        plan_node_id: &str,
    ) -> EngineResult<Vec<NodeExecution>> {
        Ok(self
            .store
            .find_node_executions(plan_execution_id)
            .await?
            .into_iter()
            .filter(|n| n.plan_node_id == plan_node_id)
            .collect())
    }

    /// Every node below `node_execution_id`, excluding superseded attempts
    pub async fn descendants(&self, node_execution_id: &str) -> EngineResult<Vec<NodeExecution>> {
        let mut found = Vec::new();
        let mut frontier = vec![node_execution_id.to_string()];
        while let Some(parent) = frontier.pop() {
            for child in self.store.find_children(&parent).await? {
                frontier.push(child.uuid.clone());
                if !child.old_retry {
                    found.push(child);
                }
            }
        }
        Ok(found)
    }

    pub(crate) async fn plan_for(&self, execution: &PlanExecution) -> EngineResult<Plan> {
        self.store
            .get_plan(&execution.plan_id)
            .await?
            .ok_or_else(|| EngineError::not_found("plan", &execution.plan_id))
    }

    pub(crate) async fn plan_node_for(
        &self,
        node: &NodeExecution,
    ) -> EngineResult<(PlanExecution, PlanNode)> {
        let execution = self.plan_execution(&node.plan_execution_id).await?;
        let plan = self.plan_for(&execution).await?;
        let plan_node = plan
            .node(&node.plan_node_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("plan node", &node.plan_node_id))?;
        Ok((execution, plan_node))
    }

    // ── Versioned updates ──

    /// Load, mutate and compare-and-swap a node execution, retrying on
    /// version conflicts. `mutate` returns `false` to skip the write, in
    /// which case `Ok(None)` is returned.
    pub(crate) async fn update_node<F>(
        &self,
        id: &str,
        mut mutate: F,
    ) -> EngineResult<Option<NodeExecution>>
    where
        F: FnMut(&mut NodeExecution) -> EngineResult<bool> + Send,
    {
        for _ in 0..self.config.max_version_retries {
            let mut node = self.node_execution(id).await?;
            if !mutate(&mut node)? {
                return Ok(None);
            }
            if let Some(saved) = self.store.update_node_execution(&node).await? {
                return Ok(Some(saved));
            }
        }
        Err(EngineError::ConcurrentModification {
            entity: "node execution",
            id: id.to_string(),
            attempts: self.config.max_version_retries,
        })
    }

    /// Same as [`update_node`](Self::update_node) for plan executions
    pub(crate) async fn update_plan_execution<F>(
        &self,
        id: &str,
        mut mutate: F,
    ) -> EngineResult<Option<PlanExecution>>
    where
        F: FnMut(&mut PlanExecution) -> EngineResult<bool> + Send,
    {
        for _ in 0..self.config.max_version_retries {
            let mut execution = self.plan_execution(id).await?;
            if !mutate(&mut execution)? {
                return Ok(None);
            }
            if let Some(saved) = self.store.update_plan_execution(&execution).await? {
                return Ok(Some(saved));
            }
        }
        Err(EngineError::ConcurrentModification {
            entity: "plan execution",
            id: id.to_string(),
            attempts: self.config.max_version_retries,
        })
    }

    pub(crate) fn fire(&self, event: OrchestrationEvent) {
        self.subject.fire(event);
    }

    // ── Background continuations ──

    /// Start a QUEUED node on its own task, optionally after a delay
    pub(crate) fn spawn_node_start(self: &Arc<Self>, node_execution_id: String, delay: Duration) {
        let engine = self.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Err(e) = engine.start_node(&node_execution_id).await {
                error!(node = %node_execution_id, error = %e, "node start failed");
                engine.error_out(&node_execution_id, &e).await;
            }
        });
    }

    /// Resume a suspended node on its own task
    pub(crate) fn spawn_resume(self: &Arc<Self>, node_execution_id: String, responses: ResponseMap) {
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.resume_node(&node_execution_id, responses).await {
                error!(node = %node_execution_id, error = %e, "node resume failed");
                engine.error_out(&node_execution_id, &e).await;
            }
        });
    }
}

/// Wait/notify callback that resumes the node named in the callback payload
pub(crate) struct EngineResumeCallback {
    engine: OnceLock<Weak<OrchestrationEngine>>,
}

impl EngineResumeCallback {
    pub(crate) fn new() -> Self {
        Self {
            engine: OnceLock::new(),
        }
    }

    pub(crate) fn attach(&self, engine: &Arc<OrchestrationEngine>) {
        let _ = self.engine.set(Arc::downgrade(engine));
    }

    pub(crate) fn payload(node_execution_id: &str) -> Value {
        json!({ "nodeExecutionId": node_execution_id })
    }
}

#[async_trait]
impl NotifyCallback for EngineResumeCallback {
    async fn notify(&self, callback: Value, responses: ResponseMap) {
        let Some(node_execution_id) = callback.get("nodeExecutionId").and_then(Value::as_str) else {
            warn!(%callback, "resume callback without node execution id");
            return;
        };
        let Some(engine) = self.engine.get().and_then(Weak::upgrade) else {
            warn!(node = node_execution_id, "engine dropped before resume");
            return;
        };
        engine.spawn_resume(node_execution_id.to_string(), responses);
    }
}
