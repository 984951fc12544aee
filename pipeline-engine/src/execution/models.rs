// Execution Models
// Runtime records for plan and node executions, owned by the engine and
// referenced by id through the store

use crate::adviser::AdviserResponse;
use crate::execution::status::{FailureInfo, PlanStatus, Status};
use crate::interrupt::InterruptType;
use crate::plan::PlanNode;
use crate::waiter::ResponseMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// One level of the ambiance: a node execution on the path from the root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Level {
    /// Node execution id
    pub runtime_id: String,
    /// Plan node id
    pub setup_id: String,
    pub step_type: String,
    pub retry_index: u32,
}

/// Where a node execution sits in the execution tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ambiance {
    pub plan_execution_id: String,
    pub levels: Vec<Level>,
}

impl Ambiance {
    pub fn new(plan_execution_id: impl Into<String>) -> Self {
        Self {
            plan_execution_id: plan_execution_id.into(),
            levels: Vec::new(),
        }
    }

    /// Copy of this ambiance with one more level appended
    pub fn with_level(&self, level: Level) -> Self {
        let mut ambiance = self.clone();
        ambiance.levels.push(level);
        ambiance
    }

    /// Copy of this ambiance without its innermost level
    pub fn parent(&self) -> Self {
        let mut ambiance = self.clone();
        ambiance.levels.pop();
        ambiance
    }

    pub fn current_level(&self) -> Option<&Level> {
        self.levels.last()
    }

    pub fn node_execution_id(&self) -> Option<&str> {
        self.current_level().map(|l| l.runtime_id.as_str())
    }

    /// Runtime ids of all enclosing node executions, outermost first
    pub fn enclosing_scope(&self) -> Vec<String> {
        let n = self.levels.len().saturating_sub(1);
        self.levels[..n].iter().map(|l| l.runtime_id.clone()).collect()
    }

    /// Runtime ids of every level including the current one
    pub fn full_scope(&self) -> Vec<String> {
        self.levels.iter().map(|l| l.runtime_id.clone()).collect()
    }
}

/// One runtime instance of a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanExecution {
    pub uuid: String,
    pub plan_id: String,
    pub status: PlanStatus,
    pub inputs: Value,
    pub principal: String,
    pub start_ts: DateTime<Utc>,
    pub end_ts: Option<DateTime<Utc>>,
    /// Optimistic-concurrency counter, bumped by the store on every update
    pub version: u64,
}

impl PlanExecution {
    pub fn new(plan_id: impl Into<String>, inputs: Value, principal: impl Into<String>) -> Self {
        Self {
            uuid: new_id(),
            plan_id: plan_id.into(),
            status: PlanStatus::Running,
            inputs,
            principal: principal.into(),
            start_ts: Utc::now(),
            end_ts: None,
            version: 0,
        }
    }
}

/// What a step asked the engine to do
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutableResponse {
    Sync,
    Async {
        callback_ids: Vec<String>,
    },
    Task {
        task_id: String,
        correlation_id: String,
        task_type: String,
    },
    #[serde(rename_all = "camelCase")]
    TaskChain {
        task_id: String,
        correlation_id: String,
        chain_end: bool,
        pass_through: Value,
    },
    Child {
        child_execution_id: String,
    },
    Children {
        child_execution_ids: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    ChildChain {
        child_execution_id: String,
        chain_end: bool,
        pass_through: Value,
    },
}

impl ExecutableResponse {
    /// Whether the node waits on an executor or signal rather than on children
    pub fn awaits_notify(&self) -> bool {
        matches!(
            self,
            ExecutableResponse::Async { .. }
                | ExecutableResponse::Task { .. }
                | ExecutableResponse::TaskChain { .. }
        )
    }

    /// Correlation ids the node is suspended on
    pub fn correlation_ids(&self) -> Vec<String> {
        match self {
            ExecutableResponse::Sync => Vec::new(),
            ExecutableResponse::Async { callback_ids } => callback_ids.clone(),
            ExecutableResponse::Task { correlation_id, .. }
            | ExecutableResponse::TaskChain { correlation_id, .. } => vec![correlation_id.clone()],
            ExecutableResponse::Child { child_execution_id }
            | ExecutableResponse::ChildChain {
                child_execution_id, ..
            } => vec![child_execution_id.clone()],
            ExecutableResponse::Children {
                child_execution_ids,
            } => child_execution_ids.clone(),
        }
    }
}

/// Audit record of an interrupt applied to a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterruptEffect {
    pub interrupt_id: String,
    pub interrupt_type: InterruptType,
    pub took_effect_at: DateTime<Utc>,
    pub from_status: Status,
    pub to_status: Status,
}

/// One runtime instance of a plan node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeExecution {
    pub uuid: String,
    pub plan_execution_id: String,
    pub plan_node_id: String,
    pub ambiance: Ambiance,
    pub status: Status,
    pub parent_id: Option<String>,
    pub previous_id: Option<String>,
    pub next_id: Option<String>,
    /// Correlation id the enclosing parent waits on when this branch ends
    pub notify_id: Option<String>,
    pub step_parameters: Value,
    pub executable_responses: Vec<ExecutableResponse>,
    pub interrupt_effects: Vec<InterruptEffect>,
    pub timeout_instance_ids: Vec<String>,
    /// Earlier attempts of the same plan node, oldest first
    pub retry_ids: Vec<String>,
    /// Superseded by a newer attempt
    pub old_retry: bool,
    pub failure_info: Option<FailureInfo>,
    /// Terminal status the advisers were already consulted for
    pub advised_status: Option<Status>,
    pub adviser_response: Option<AdviserResponse>,
    /// Responses that arrived while the node was paused
    pub pending_response: Option<ResponseMap>,
    /// Status the node was paused from
    pub paused_from: Option<Status>,
    pub start_ts: Option<DateTime<Utc>>,
    pub end_ts: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub version: u64,
}

impl NodeExecution {
    /// A fresh QUEUED node execution for `node` below `parent_ambiance`
    pub fn new(plan_execution_id: &str, node: &PlanNode, parent_ambiance: &Ambiance) -> Self {
        let uuid = new_id();
        let ambiance = parent_ambiance.with_level(Level {
            runtime_id: uuid.clone(),
            setup_id: node.uuid.clone(),
            step_type: node.step_type.clone(),
            retry_index: 0,
        });
        let now = Utc::now();
        Self {
            uuid,
            plan_execution_id: plan_execution_id.to_string(),
            plan_node_id: node.uuid.clone(),
            ambiance,
            status: Status::Queued,
            parent_id: None,
            previous_id: None,
            next_id: None,
            notify_id: None,
            step_parameters: node.step_parameters.clone(),
            executable_responses: Vec::new(),
            interrupt_effects: Vec::new(),
            timeout_instance_ids: Vec::new(),
            retry_ids: Vec::new(),
            old_retry: false,
            failure_info: None,
            advised_status: None,
            adviser_response: None,
            pending_response: None,
            paused_from: None,
            start_ts: None,
            end_ts: None,
            created_at: now,
            last_updated_at: now,
            version: 0,
        }
    }

    /// A new attempt of the same plan node sharing this node's lineage
    pub fn retry_of(previous: &NodeExecution) -> Self {
        let uuid = new_id();
        let mut retry_ids = previous.retry_ids.clone();
        retry_ids.push(previous.uuid.clone());

        let mut ambiance = previous.ambiance.parent();
        let level = previous.ambiance.current_level().cloned();
        ambiance.levels.push(Level {
            runtime_id: uuid.clone(),
            setup_id: previous.plan_node_id.clone(),
            step_type: level.map(|l| l.step_type).unwrap_or_default(),
            retry_index: retry_ids.len() as u32,
        });

        let now = Utc::now();
        Self {
            uuid,
            plan_execution_id: previous.plan_execution_id.clone(),
            plan_node_id: previous.plan_node_id.clone(),
            ambiance,
            status: Status::Queued,
            parent_id: previous.parent_id.clone(),
            previous_id: previous.previous_id.clone(),
            next_id: None,
            notify_id: previous.notify_id.clone(),
            step_parameters: previous.step_parameters.clone(),
            executable_responses: Vec::new(),
            interrupt_effects: Vec::new(),
            timeout_instance_ids: Vec::new(),
            retry_ids,
            old_retry: false,
            failure_info: None,
            advised_status: None,
            adviser_response: None,
            pending_response: None,
            paused_from: None,
            start_ts: None,
            end_ts: None,
            created_at: now,
            last_updated_at: now,
            version: 0,
        }
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_ids.len() as u32
    }

    /// Correlation ids of the latest executable response
    pub fn live_correlation_ids(&self) -> Vec<String> {
        self.executable_responses
            .last()
            .map(ExecutableResponse::correlation_ids)
            .unwrap_or_default()
    }
}

/// Kind of artifact a node published
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutputKind {
    /// Bound to its producer, looked up by producer id
    Outcome,
    /// Visible to every node below the producer's enclosing scope
    SweepingOutput,
}

/// A named, immutable artifact produced by a node execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutput {
    pub uuid: String,
    pub plan_execution_id: String,
    pub kind: OutputKind,
    pub name: String,
    pub producer_id: String,
    /// Runtime ids of the enclosing node executions the output is visible under
    pub scope: Vec<String>,
    pub value: Value,
    pub created_at: DateTime<Utc>,
}

impl ExecutionOutput {
    pub fn scope_key(&self) -> String {
        self.scope.join("/")
    }
}
