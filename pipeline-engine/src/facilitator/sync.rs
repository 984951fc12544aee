// Sync and Async Facilitators

use super::{Facilitation, Facilitator};
use crate::execution::ExecutableResponse;
use crate::step::{Step, StepContext, StepError};
use crate::waiter::ResponseMap;

use async_trait::async_trait;

/// Runs the step inline and completes the node
pub struct SyncFacilitator;

#[async_trait]
impl Facilitator for SyncFacilitator {
    async fn facilitate(
        &self,
        step: &dyn Step,
        ctx: &StepContext,
    ) -> Result<Facilitation, StepError> {
        step.execute_sync(ctx).await.map(Facilitation::Complete)
    }

    async fn resume(
        &self,
        _step: &dyn Step,
        _ctx: &StepContext,
        _responses: ResponseMap,
    ) -> Result<Facilitation, StepError> {
        Err(StepError::Unsupported("SYNC resume"))
    }
}

/// Starts async work and suspends the node on its callback ids
pub struct AsyncFacilitator;

#[async_trait]
impl Facilitator for AsyncFacilitator {
    async fn facilitate(
        &self,
        step: &dyn Step,
        ctx: &StepContext,
    ) -> Result<Facilitation, StepError> {
        let callback_ids = step.execute_async(ctx).await?;
        Ok(Facilitation::Suspend(ExecutableResponse::Async { callback_ids }))
    }

    async fn resume(
        &self,
        step: &dyn Step,
        ctx: &StepContext,
        responses: ResponseMap,
    ) -> Result<Facilitation, StepError> {
        step.handle_async_response(ctx, &responses)
            .await
            .map(Facilitation::Complete)
    }
}
