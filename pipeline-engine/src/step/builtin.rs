// Built-in Steps
// Small steps covering every execution mode, used by the CLI and tests

use super::{ChildChainLink, Step, StepContext, StepError, StepResponse, TaskChainLink};
use crate::delegate::TaskSpec;
use crate::execution::models::new_id;
use crate::execution::{FailureInfo, FailureType};
use crate::waiter::ResponseMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

fn parameters<T: DeserializeOwned>(ctx: &StepContext) -> Result<T, StepError> {
    let raw = match ctx.parameters() {
        Value::Null => json!({}),
        other => other.clone(),
    };
    serde_json::from_value(raw).map_err(|e| {
        StepError::failed(
            FailureType::Verification,
            format!("invalid parameters for {}: {}", ctx.plan_node.label(), e),
        )
    })
}

fn chain_index(pass_through: &Value) -> usize {
    pass_through
        .get("index")
        .and_then(Value::as_u64)
        .unwrap_or(0) as usize
}

/// Succeeds immediately
pub struct NoopStep;

impl NoopStep {
    pub const TYPE: &'static str = "noop";
}

#[async_trait]
impl Step for NoopStep {
    async fn execute_sync(&self, _ctx: &StepContext) -> Result<StepResponse, StepError> {
        Ok(StepResponse::success())
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct FailParameters {
    failure_type: FailureType,
    message: String,
    /// Succeed once this many attempts have failed
    succeed_after: Option<u32>,
}

impl Default for FailParameters {
    fn default() -> Self {
        Self {
            failure_type: FailureType::Application,
            message: "step failed".to_string(),
            succeed_after: None,
        }
    }
}

/// Fails with a configurable failure type
pub struct FailStep;

impl FailStep {
    pub const TYPE: &'static str = "fail";
}

#[async_trait]
impl Step for FailStep {
    async fn execute_sync(&self, ctx: &StepContext) -> Result<StepResponse, StepError> {
        let params: FailParameters = parameters(ctx)?;
        match params.succeed_after {
            Some(n) if ctx.node_execution.retry_count() >= n => Ok(StepResponse::success()),
            _ => Ok(StepResponse::failed(FailureInfo::new(
                params.failure_type,
                params.message,
            ))),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct TaskParameters {
    task_type: Option<String>,
    parameters: Value,
    timeout_ms: Option<u64>,
    /// Task chain links, run in order
    links: Vec<TaskSpec>,
}

impl TaskParameters {
    fn spec(self) -> TaskSpec {
        TaskSpec {
            task_type: self.task_type.unwrap_or_else(|| "echo".to_string()),
            parameters: self.parameters,
            timeout_ms: self.timeout_ms,
        }
    }
}

/// Hands its work to the task delegate; with `links` it runs a task chain
pub struct TaskStep;

impl TaskStep {
    pub const TYPE: &'static str = "task";

    fn link(links: &[TaskSpec], index: usize) -> Result<TaskChainLink, StepError> {
        let task = links.get(index).cloned().ok_or_else(|| {
            StepError::failed(FailureType::Verification, "task chain has no links")
        })?;
        Ok(TaskChainLink {
            task,
            chain_end: index + 1 >= links.len(),
            pass_through: json!({ "index": index }),
        })
    }
}

#[async_trait]
impl Step for TaskStep {
    async fn obtain_task(&self, ctx: &StepContext) -> Result<TaskSpec, StepError> {
        let params: TaskParameters = parameters(ctx)?;
        Ok(params.spec())
    }

    async fn start_task_chain_link(&self, ctx: &StepContext) -> Result<TaskChainLink, StepError> {
        let params: TaskParameters = parameters(ctx)?;
        Self::link(&params.links, 0)
    }

    async fn execute_next_task_link(
        &self,
        ctx: &StepContext,
        _responses: &ResponseMap,
        pass_through: &Value,
    ) -> Result<TaskChainLink, StepError> {
        let params: TaskParameters = parameters(ctx)?;
        Self::link(&params.links, chain_index(pass_through) + 1)
    }
}

/// Runs its plan node's children, all at once or one after another
pub struct ForkStep;

impl ForkStep {
    pub const TYPE: &'static str = "fork";

    fn link(children: &[String], index: usize) -> Result<ChildChainLink, StepError> {
        let child_node_id = children.get(index).cloned().ok_or_else(|| {
            StepError::failed(FailureType::Verification, "child chain has no children")
        })?;
        Ok(ChildChainLink {
            child_node_id,
            chain_end: index + 1 >= children.len(),
            pass_through: json!({ "index": index }),
        })
    }
}

#[async_trait]
impl Step for ForkStep {
    async fn start_child_chain_link(&self, ctx: &StepContext) -> Result<ChildChainLink, StepError> {
        Self::link(&ctx.plan_node.children, 0)
    }

    async fn execute_next_child_link(
        &self,
        ctx: &StepContext,
        _responses: &ResponseMap,
        pass_through: &Value,
    ) -> Result<ChildChainLink, StepError> {
        Self::link(&ctx.plan_node.children, chain_index(pass_through) + 1)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SignalParameters {
    callback_ids: Vec<String>,
}

/// Waits for external signals on its callback ids
pub struct SignalStep;

impl SignalStep {
    pub const TYPE: &'static str = "signal";
}

#[async_trait]
impl Step for SignalStep {
    async fn execute_async(&self, ctx: &StepContext) -> Result<Vec<String>, StepError> {
        let params: SignalParameters = parameters(ctx)?;
        if params.callback_ids.is_empty() {
            Ok(vec![new_id()])
        } else {
            // Scope configured ids to this attempt so retries never collide
            Ok(params
                .callback_ids
                .into_iter()
                .map(|id| format!("{}:{}", ctx.node_execution.uuid, id))
                .collect())
        }
    }
}
