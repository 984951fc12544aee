// Task Facilitators
// Single tasks and task chains handed to the delegate

use super::{Facilitation, Facilitator};
use crate::delegate::TaskDispatcher;
use crate::execution::models::new_id;
use crate::execution::ExecutableResponse;
use crate::step::{aggregate_responses, Step, StepContext, StepError, TaskChainLink};
use crate::waiter::ResponseMap;

use async_trait::async_trait;
use tracing::debug;

use std::sync::Arc;

/// Dispatches one task and suspends until its result arrives
pub struct TaskFacilitator {
    dispatcher: Arc<dyn TaskDispatcher>,
}

impl TaskFacilitator {
    pub fn new(dispatcher: Arc<dyn TaskDispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl Facilitator for TaskFacilitator {
    async fn facilitate(
        &self,
        step: &dyn Step,
        ctx: &StepContext,
    ) -> Result<Facilitation, StepError> {
        let task = step.obtain_task(ctx).await?;
        let task_type = task.task_type.clone();
        let correlation_id = new_id();
        let task_id = self
            .dispatcher
            .submit_task(&correlation_id, task)
            .await
            .map_err(|e| StepError::Dispatch(e.to_string()))?;

        debug!(node = %ctx.node_execution.uuid, %task_id, "task dispatched");
        Ok(Facilitation::Suspend(ExecutableResponse::Task {
            task_id,
            correlation_id,
            task_type,
        }))
    }

    async fn resume(
        &self,
        step: &dyn Step,
        ctx: &StepContext,
        responses: ResponseMap,
    ) -> Result<Facilitation, StepError> {
        step.handle_task_result(ctx, &responses)
            .await
            .map(Facilitation::Complete)
    }
}

/// Dispatches tasks one link at a time until the step ends the chain
pub struct TaskChainFacilitator {
    dispatcher: Arc<dyn TaskDispatcher>,
}

impl TaskChainFacilitator {
    pub fn new(dispatcher: Arc<dyn TaskDispatcher>) -> Self {
        Self { dispatcher }
    }

    async fn dispatch(&self, link: TaskChainLink) -> Result<Facilitation, StepError> {
        let correlation_id = new_id();
        let task_id = self
            .dispatcher
            .submit_task(&correlation_id, link.task)
            .await
            .map_err(|e| StepError::Dispatch(e.to_string()))?;
        Ok(Facilitation::Suspend(ExecutableResponse::TaskChain {
            task_id,
            correlation_id,
            chain_end: link.chain_end,
            pass_through: link.pass_through,
        }))
    }
}

#[async_trait]
impl Facilitator for TaskChainFacilitator {
    async fn facilitate(
        &self,
        step: &dyn Step,
        ctx: &StepContext,
    ) -> Result<Facilitation, StepError> {
        let link = step.start_task_chain_link(ctx).await?;
        self.dispatch(link).await
    }

    async fn resume(
        &self,
        step: &dyn Step,
        ctx: &StepContext,
        responses: ResponseMap,
    ) -> Result<Facilitation, StepError> {
        let Some(ExecutableResponse::TaskChain {
            chain_end,
            pass_through,
            ..
        }) = ctx.last_executable()
        else {
            return Err(StepError::Unsupported("TASK_CHAIN resume without a chain link"));
        };

        // A failed link ends the chain early
        if *chain_end || !aggregate_responses(&responses).status.is_positive() {
            return step
                .finalize_chain(ctx, &responses)
                .await
                .map(Facilitation::Complete);
        }

        let link = step
            .execute_next_task_link(ctx, &responses, pass_through)
            .await?;
        self.dispatch(link).await
    }
}
