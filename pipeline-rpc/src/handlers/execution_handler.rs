use crate::error::{RpcError, RpcResult};
use pipeline_engine::{
    NodeExecution, OrchestrationEngine, Plan, PlanExecution, PlanLoader, PlanValidator, Status,
};

use serde::Serialize;
use serde_json::Value;
use tracing::info;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// A plan execution together with its node executions
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
    pub execution: PlanExecution,
    pub nodes: Vec<NodeExecution>,
}

impl ExecutionSummary {
    /// Current attempts (superseded retries excluded) in `status`
    pub fn count(&self, status: Status) -> usize {
        self.nodes
            .iter()
            .filter(|n| !n.old_retry && n.status == status)
            .count()
    }
}

pub struct ExecutionHandler {
    engine: Arc<OrchestrationEngine>,
}

impl ExecutionHandler {
    pub fn new(engine: Arc<OrchestrationEngine>) -> Self {
        Self { engine }
    }

    pub fn parse_from_file<P: AsRef<Path>>(&self, path: P) -> RpcResult<Plan> {
        Ok(PlanLoader::from_file(path)?)
    }

    pub fn parse_from_str(&self, content: &str) -> RpcResult<Plan> {
        Ok(PlanLoader::from_str(content)?)
    }

    /// Check a plan against the structure rules and the engine's registrations
    pub fn validate(&self, plan: &Plan) -> RpcResult<()> {
        Ok(PlanValidator::validate(plan, self.engine.registries())?)
    }

    pub async fn start_execution(
        &self,
        plan: Plan,
        inputs: Value,
        principal: &str,
    ) -> RpcResult<PlanExecution> {
        if principal.trim().is_empty() {
            return Err(RpcError::InvalidRequest("principal is required".to_string()));
        }
        let execution = self.engine.start_execution(plan, inputs, principal).await?;
        info!(plan_execution = %execution.uuid, principal, "execution requested");
        Ok(execution)
    }

    pub async fn get_execution(&self, plan_execution_id: &str) -> RpcResult<ExecutionSummary> {
        let execution = self.engine.plan_execution(plan_execution_id).await?;
        let nodes = self.engine.node_executions(plan_execution_id).await?;
        Ok(ExecutionSummary { execution, nodes })
    }

    pub async fn get_node(&self, node_execution_id: &str) -> RpcResult<NodeExecution> {
        Ok(self.engine.node_execution(node_execution_id).await?)
    }

    /// Poll until the plan execution reaches a terminal status
    pub async fn wait_for_completion(
        &self,
        plan_execution_id: &str,
        poll_interval: Duration,
    ) -> RpcResult<PlanExecution> {
        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            ticker.tick().await;
            let execution = self.engine.plan_execution(plan_execution_id).await?;
            if execution.status.is_terminal() {
                return Ok(execution);
            }
        }
    }
}
