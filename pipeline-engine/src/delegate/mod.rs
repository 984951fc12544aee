// Delegate Module
// Task dispatch collaborator: the engine submits tasks, executors report back
// through the notify transport

pub mod local;

pub use local::{EchoTask, LocalDelegate, LocalDelegateBuilder, TaskHandler};

use crate::error::EngineResult;
use crate::execution::FailureInfo;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Work description handed to a remote executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    pub task_type: String,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl TaskSpec {
    pub fn new(task_type: impl Into<String>, parameters: Value) -> Self {
        Self {
            task_type: task_type.into(),
            parameters,
            timeout_ms: None,
        }
    }
}

/// What a remote executor reports for a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub success: bool,
    #[serde(default)]
    pub output: Value,
    #[serde(default)]
    pub failure: Option<FailureInfo>,
}

impl TaskResult {
    pub fn success(output: Value) -> Self {
        Self {
            success: true,
            output,
            failure: None,
        }
    }

    pub fn failure(failure: FailureInfo) -> Self {
        Self {
            success: false,
            output: Value::Null,
            failure: Some(failure),
        }
    }
}

/// Engine -> remote executor
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    /// Submit `task`; its result must later be notified under `correlation_id`.
    /// Returns the executor's task id.
    async fn submit_task(&self, correlation_id: &str, task: TaskSpec) -> EngineResult<String>;
}
