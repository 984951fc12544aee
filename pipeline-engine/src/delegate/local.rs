// Local Delegate
// In-process task executor that runs registered handlers on tokio tasks and
// publishes their results on the notify transport

use super::{TaskDispatcher, TaskResult, TaskSpec};
use crate::error::EngineResult;
use crate::execution::models::new_id;
use crate::execution::{FailureInfo, FailureType};
use crate::registry::{Registry, RegistryBuilder};
use crate::waiter::{NotifyMessage, NotifyPublisher, ResponseData};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use std::sync::Arc;
use std::time::Duration;

/// Executes one task type
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, task: &TaskSpec) -> TaskResult;
}

/// Builder for [`LocalDelegate`]
pub struct LocalDelegateBuilder {
    publisher: NotifyPublisher,
    handlers: RegistryBuilder<dyn TaskHandler>,
    duplicate_delivery: bool,
}

impl LocalDelegateBuilder {
    pub fn register(
        mut self,
        task_type: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
    ) -> EngineResult<Self> {
        self.handlers.register(task_type, handler)?;
        Ok(self)
    }

    /// Register the built-in `echo` task type
    pub fn with_builtin_handlers(self) -> EngineResult<Self> {
        self.register(EchoTask::TYPE, Arc::new(EchoTask))
    }

    /// Deliver every result twice, exercising at-least-once consumers
    pub fn with_duplicate_delivery(mut self, enabled: bool) -> Self {
        self.duplicate_delivery = enabled;
        self
    }

    pub fn build(self) -> LocalDelegate {
        LocalDelegate {
            publisher: self.publisher,
            handlers: self.handlers.build(),
            duplicate_delivery: self.duplicate_delivery,
        }
    }
}

/// In-process stand-in for a remote executor
pub struct LocalDelegate {
    publisher: NotifyPublisher,
    handlers: Registry<dyn TaskHandler>,
    duplicate_delivery: bool,
}

impl LocalDelegate {
    pub fn builder(publisher: NotifyPublisher) -> LocalDelegateBuilder {
        LocalDelegateBuilder {
            publisher,
            handlers: RegistryBuilder::new("task handler"),
            duplicate_delivery: false,
        }
    }
}

#[async_trait]
impl TaskDispatcher for LocalDelegate {
    async fn submit_task(&self, correlation_id: &str, task: TaskSpec) -> EngineResult<String> {
        let handler = self.handlers.obtain(&task.task_type)?;
        let task_id = new_id();
        let publisher = self.publisher.clone();
        let correlation_id = correlation_id.to_string();
        let duplicate = self.duplicate_delivery;

        debug!(%task_id, %correlation_id, task_type = %task.task_type, "submitting task");
        tokio::spawn(async move {
            let result = handler.run(&task).await;
            let message = NotifyMessage {
                message_id: new_id(),
                correlation_id,
                data: ResponseData::Task { result },
            };
            if duplicate {
                publisher.redeliver(message.clone());
            }
            publisher.redeliver(message);
        });

        Ok(task_id)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct EchoParameters {
    delay_ms: u64,
    fail: bool,
    failure_type: Option<FailureType>,
    message: Option<String>,
}

/// Returns its parameters as output after an optional delay, or fails on request
pub struct EchoTask;

impl EchoTask {
    pub const TYPE: &'static str = "echo";
}

#[async_trait]
impl TaskHandler for EchoTask {
    async fn run(&self, task: &TaskSpec) -> TaskResult {
        let params: EchoParameters = match serde_json::from_value(task.parameters.clone()) {
            Ok(p) => p,
            Err(e) => {
                return TaskResult::failure(FailureInfo::new(
                    FailureType::Application,
                    format!("invalid echo parameters: {}", e),
                ))
            }
        };

        if params.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(params.delay_ms)).await;
        }

        if params.fail {
            TaskResult::failure(FailureInfo::new(
                params.failure_type.unwrap_or(FailureType::Application),
                params.message.unwrap_or_else(|| "echo task failed".to_string()),
            ))
        } else {
            TaskResult::success(task.parameters.clone())
        }
    }
}
