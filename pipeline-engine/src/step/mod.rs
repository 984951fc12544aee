// Step Module
// Step contract: the user-supplied behavior a plan node executes, one entry
// point per execution mode

pub mod builtin;

pub use builtin::{FailStep, ForkStep, NoopStep, SignalStep, TaskStep};

use crate::delegate::{TaskResult, TaskSpec};
use crate::error::EngineResult;
use crate::execution::{
    aggregate_status, Ambiance, ExecutableResponse, FailureInfo, FailureType, NodeExecution, Status,
};
use crate::plan::PlanNode;
use crate::registry::Registry;
use crate::resolver::Resolver;
use crate::waiter::{ResponseData, ResponseMap};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Errors a step reports back to its facilitator
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StepError {
    #[error("step does not support {0} execution")]
    Unsupported(&'static str),

    #[error("{message}")]
    Failed {
        failure_type: FailureType,
        message: String,
    },

    #[error("task dispatch failed: {0}")]
    Dispatch(String),
}

impl StepError {
    pub fn failed(failure_type: FailureType, message: impl Into<String>) -> Self {
        StepError::Failed {
            failure_type,
            message: message.into(),
        }
    }

    /// Status a node ends in when its step raised this error
    pub fn status(&self) -> Status {
        match self {
            StepError::Unsupported(_) => Status::Errored,
            StepError::Failed { .. } | StepError::Dispatch(_) => Status::Failed,
        }
    }

    pub fn failure_info(&self) -> FailureInfo {
        let failure_type = match self {
            StepError::Unsupported(_) => FailureType::Unknown,
            StepError::Failed { failure_type, .. } => *failure_type,
            StepError::Dispatch(_) => FailureType::DelegateProvisioning,
        };
        FailureInfo::new(failure_type, self.to_string())
    }
}

/// Terminal result of a step
#[derive(Debug, Clone, PartialEq)]
pub struct StepResponse {
    pub status: Status,
    pub failure: Option<FailureInfo>,
    /// Outcomes published when the node ends positively
    pub outcomes: Vec<(String, Value)>,
}

impl StepResponse {
    pub fn success() -> Self {
        Self {
            status: Status::Succeeded,
            failure: None,
            outcomes: Vec::new(),
        }
    }

    pub fn failed(failure: FailureInfo) -> Self {
        Self {
            status: Status::Failed,
            failure: Some(failure),
            outcomes: Vec::new(),
        }
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    pub fn with_outcome(mut self, name: impl Into<String>, value: Value) -> Self {
        self.outcomes.push((name.into(), value));
        self
    }
}

/// Next link of a task chain
#[derive(Debug, Clone, PartialEq)]
pub struct TaskChainLink {
    pub task: TaskSpec,
    pub chain_end: bool,
    pub pass_through: Value,
}

/// Next link of a child chain
#[derive(Debug, Clone, PartialEq)]
pub struct ChildChainLink {
    pub child_node_id: String,
    pub chain_end: bool,
    pub pass_through: Value,
}

/// Everything a step can see while it runs
pub struct StepContext {
    pub ambiance: Ambiance,
    pub node_execution: NodeExecution,
    pub plan_node: PlanNode,
    /// Inputs of the plan execution
    pub inputs: Value,
    resolvers: Registry<dyn Resolver>,
}

impl StepContext {
    pub fn new(
        node_execution: NodeExecution,
        plan_node: PlanNode,
        inputs: Value,
        resolvers: Registry<dyn Resolver>,
    ) -> Self {
        Self {
            ambiance: node_execution.ambiance.clone(),
            node_execution,
            plan_node,
            inputs,
            resolvers,
        }
    }

    pub fn parameters(&self) -> &Value {
        &self.node_execution.step_parameters
    }

    /// The response the node is currently suspended on
    pub fn last_executable(&self) -> Option<&ExecutableResponse> {
        self.node_execution.executable_responses.last()
    }

    /// Resolve an output of `ref_type` visible from this node
    pub async fn resolve(&self, ref_type: &str, name: &str) -> EngineResult<Option<Value>> {
        self.resolvers
            .obtain(ref_type)?
            .resolve(&self.ambiance, name)
            .await
    }

    /// Publish an output of `ref_type` from this node
    pub async fn publish(&self, ref_type: &str, name: &str, value: Value) -> EngineResult<String> {
        self.resolvers
            .obtain(ref_type)?
            .consume(&self.ambiance, name, value)
            .await
    }
}

/// Behavior of a plan node.
///
/// A step only implements the entry points for the modes it supports; the
/// facilitator named on the plan node decides which ones are called.
#[async_trait]
pub trait Step: Send + Sync {
    // ── SYNC ──

    async fn execute_sync(&self, _ctx: &StepContext) -> Result<StepResponse, StepError> {
        Err(StepError::Unsupported("SYNC"))
    }

    // ── ASYNC ──

    /// Start async work; returns the callback ids to wait on
    async fn execute_async(&self, _ctx: &StepContext) -> Result<Vec<String>, StepError> {
        Err(StepError::Unsupported("ASYNC"))
    }

    async fn handle_async_response(
        &self,
        _ctx: &StepContext,
        responses: &ResponseMap,
    ) -> Result<StepResponse, StepError> {
        Ok(aggregate_responses(responses))
    }

    // ── TASK ──

    async fn obtain_task(&self, _ctx: &StepContext) -> Result<TaskSpec, StepError> {
        Err(StepError::Unsupported("TASK"))
    }

    async fn handle_task_result(
        &self,
        _ctx: &StepContext,
        responses: &ResponseMap,
    ) -> Result<StepResponse, StepError> {
        Ok(aggregate_responses(responses))
    }

    // ── CHILD / CHILDREN ──

    /// Plan node ids to spawn below this node
    async fn obtain_children(&self, ctx: &StepContext) -> Result<Vec<String>, StepError> {
        Ok(ctx.plan_node.children.clone())
    }

    async fn handle_children_response(
        &self,
        _ctx: &StepContext,
        responses: &ResponseMap,
    ) -> Result<StepResponse, StepError> {
        Ok(aggregate_responses(responses))
    }

    // ── TASK_CHAIN ──

    async fn start_task_chain_link(&self, _ctx: &StepContext) -> Result<TaskChainLink, StepError> {
        Err(StepError::Unsupported("TASK_CHAIN"))
    }

    async fn execute_next_task_link(
        &self,
        _ctx: &StepContext,
        _responses: &ResponseMap,
        _pass_through: &Value,
    ) -> Result<TaskChainLink, StepError> {
        Err(StepError::Unsupported("TASK_CHAIN"))
    }

    // ── CHILD_CHAIN ──

    async fn start_child_chain_link(&self, _ctx: &StepContext) -> Result<ChildChainLink, StepError> {
        Err(StepError::Unsupported("CHILD_CHAIN"))
    }

    async fn execute_next_child_link(
        &self,
        _ctx: &StepContext,
        _responses: &ResponseMap,
        _pass_through: &Value,
    ) -> Result<ChildChainLink, StepError> {
        Err(StepError::Unsupported("CHILD_CHAIN"))
    }

    /// Terminal response of a chain, after its last link or a failed link
    async fn finalize_chain(
        &self,
        _ctx: &StepContext,
        responses: &ResponseMap,
    ) -> Result<StepResponse, StepError> {
        Ok(aggregate_responses(responses))
    }
}

/// Status implied by one response
pub fn response_status(data: &ResponseData) -> Status {
    match data {
        ResponseData::Task { result } if result.success => Status::Succeeded,
        ResponseData::Task { .. } => Status::Failed,
        ResponseData::NodeCompleted { status, .. } => *status,
        ResponseData::Signal { .. } => Status::Succeeded,
        ResponseData::Error { .. } => Status::Errored,
    }
}

/// Default folding of responses into a step response: the most severe
/// status wins, the first failure is reported, and task outputs become the
/// `output` outcome.
pub fn aggregate_responses(responses: &ResponseMap) -> StepResponse {
    let status = aggregate_status(responses.values().map(response_status)).unwrap_or(Status::Succeeded);

    let failure = responses.values().find_map(|data| match data {
        ResponseData::Task {
            result: TaskResult {
                success: false,
                failure,
                ..
            },
        } => Some(failure.clone().unwrap_or_else(|| {
            FailureInfo::new(FailureType::Application, "task failed")
        })),
        ResponseData::Error { failure } => Some(failure.clone()),
        ResponseData::NodeCompleted {
            node_execution_id,
            status,
        } if !status.is_positive() => Some(FailureInfo::new(
            FailureType::Application,
            format!("child {} ended {}", node_execution_id, status),
        )),
        _ => None,
    });

    let mut response = StepResponse {
        status,
        failure: if status.is_positive() { None } else { failure },
        outcomes: Vec::new(),
    };

    if status.is_positive() {
        let outputs: Vec<&Value> = responses
            .values()
            .filter_map(|data| match data {
                ResponseData::Task { result } if !result.output.is_null() => Some(&result.output),
                ResponseData::Signal { payload } if !payload.is_null() => Some(payload),
                _ => None,
            })
            .collect();
        match outputs.as_slice() {
            [] => {}
            [single] => response = response.with_outcome("output", (*single).clone()),
            many => {
                let all = Value::Array(many.iter().map(|v| (*v).clone()).collect());
                response = response.with_outcome("output", all)
            }
        }
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_aggregate_successful_task() {
        let mut responses = ResponseMap::new();
        responses.insert(
            "c1".to_string(),
            ResponseData::Task {
                result: TaskResult::success(json!({"ok": true})),
            },
        );
        let response = aggregate_responses(&responses);
        assert_eq!(response.status, Status::Succeeded);
        assert_eq!(response.outcomes, vec![("output".to_string(), json!({"ok": true}))]);
    }

    #[test]
    fn test_aggregate_children_worst_status_wins() {
        let mut responses = ResponseMap::new();
        responses.insert(
            "a".to_string(),
            ResponseData::NodeCompleted {
                node_execution_id: "a".to_string(),
                status: Status::Succeeded,
            },
        );
        responses.insert(
            "b".to_string(),
            ResponseData::NodeCompleted {
                node_execution_id: "b".to_string(),
                status: Status::Failed,
            },
        );
        let response = aggregate_responses(&responses);
        assert_eq!(response.status, Status::Failed);
        assert!(response.failure.unwrap().message.contains("child b"));
        assert!(response.outcomes.is_empty());
    }

    #[test]
    fn test_step_error_status() {
        assert_eq!(StepError::Unsupported("SYNC").status(), Status::Errored);
        let dispatch = StepError::Dispatch("no executor".to_string());
        assert_eq!(dispatch.status(), Status::Failed);
        assert_eq!(
            dispatch.failure_info().failure_types,
            vec![FailureType::DelegateProvisioning]
        );
    }
}
