// Child Facilitators
// Spawn child node executions below a node and fold their results

use super::{ChildMode, Facilitation, Facilitator};
use crate::execution::{ExecutableResponse, FailureType};
use crate::step::{aggregate_responses, Step, StepContext, StepError, StepResponse};
use crate::waiter::ResponseMap;

use async_trait::async_trait;

/// Exactly one child
pub struct ChildFacilitator;

#[async_trait]
impl Facilitator for ChildFacilitator {
    async fn facilitate(
        &self,
        step: &dyn Step,
        ctx: &StepContext,
    ) -> Result<Facilitation, StepError> {
        let children = step.obtain_children(ctx).await?;
        if children.len() != 1 {
            return Err(StepError::failed(
                FailureType::Verification,
                format!("CHILD expects exactly one child, got {}", children.len()),
            ));
        }
        Ok(Facilitation::SpawnChildren {
            plan_node_ids: children,
            mode: ChildMode::Single,
        })
    }

    async fn resume(
        &self,
        step: &dyn Step,
        ctx: &StepContext,
        responses: ResponseMap,
    ) -> Result<Facilitation, StepError> {
        step.handle_children_response(ctx, &responses)
            .await
            .map(Facilitation::Complete)
    }
}

/// All children in parallel
pub struct ChildrenFacilitator;

#[async_trait]
impl Facilitator for ChildrenFacilitator {
    async fn facilitate(
        &self,
        step: &dyn Step,
        ctx: &StepContext,
    ) -> Result<Facilitation, StepError> {
        let children = step.obtain_children(ctx).await?;
        if children.is_empty() {
            return Ok(Facilitation::Complete(StepResponse::success()));
        }
        Ok(Facilitation::SpawnChildren {
            plan_node_ids: children,
            mode: ChildMode::Multiple,
        })
    }

    async fn resume(
        &self,
        step: &dyn Step,
        ctx: &StepContext,
        responses: ResponseMap,
    ) -> Result<Facilitation, StepError> {
        step.handle_children_response(ctx, &responses)
            .await
            .map(Facilitation::Complete)
    }
}

/// Children one after another, each link chosen by the step
pub struct ChildChainFacilitator;

#[async_trait]
impl Facilitator for ChildChainFacilitator {
    async fn facilitate(
        &self,
        step: &dyn Step,
        ctx: &StepContext,
    ) -> Result<Facilitation, StepError> {
        let link = step.start_child_chain_link(ctx).await?;
        Ok(Facilitation::SpawnChildren {
            plan_node_ids: vec![link.child_node_id],
            mode: ChildMode::Chain {
                chain_end: link.chain_end,
                pass_through: link.pass_through,
            },
        })
    }

    async fn resume(
        &self,
        step: &dyn Step,
        ctx: &StepContext,
        responses: ResponseMap,
    ) -> Result<Facilitation, StepError> {
        let Some(ExecutableResponse::ChildChain {
            chain_end,
            pass_through,
            ..
        }) = ctx.last_executable()
        else {
            return Err(StepError::Unsupported("CHILD_CHAIN resume without a chain link"));
        };

        if *chain_end || !aggregate_responses(&responses).status.is_positive() {
            return step
                .finalize_chain(ctx, &responses)
                .await
                .map(Facilitation::Complete);
        }

        let link = step
            .execute_next_child_link(ctx, &responses, pass_through)
            .await?;
        Ok(Facilitation::SpawnChildren {
            plan_node_ids: vec![link.child_node_id],
            mode: ChildMode::Chain {
                chain_end: link.chain_end,
                pass_through: link.pass_through,
            },
        })
    }
}
