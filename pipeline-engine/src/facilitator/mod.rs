// Facilitator Module
// Execution-mode strategies: each facilitator drives a step through one mode
// and tells the engine whether the node completed, suspended, or spawned
// children

pub mod child;
pub mod sync;
pub mod task;

pub use child::{ChildChainFacilitator, ChildFacilitator, ChildrenFacilitator};
pub use sync::{AsyncFacilitator, SyncFacilitator};
pub use task::{TaskChainFacilitator, TaskFacilitator};

use crate::execution::ExecutableResponse;
use crate::step::{Step, StepContext, StepError, StepResponse};
use crate::waiter::ResponseMap;

use async_trait::async_trait;
use serde_json::Value;

pub const SYNC: &str = "SYNC";
pub const ASYNC: &str = "ASYNC";
pub const TASK: &str = "TASK";
pub const TASK_CHAIN: &str = "TASK_CHAIN";
pub const CHILD: &str = "CHILD";
pub const CHILDREN: &str = "CHILDREN";
pub const CHILD_CHAIN: &str = "CHILD_CHAIN";

/// How spawned children relate to their parent
#[derive(Debug, Clone, PartialEq)]
pub enum ChildMode {
    Single,
    Multiple,
    Chain { chain_end: bool, pass_through: Value },
}

/// What the engine must do after a facilitator ran
#[derive(Debug, Clone, PartialEq)]
pub enum Facilitation {
    /// The step finished
    Complete(StepResponse),
    /// The node waits on the correlation ids of this response
    Suspend(ExecutableResponse),
    /// Spawn these plan nodes below the node and wait for them
    SpawnChildren {
        plan_node_ids: Vec<String>,
        mode: ChildMode,
    },
}

/// Drives a step through one execution mode
#[async_trait]
pub trait Facilitator: Send + Sync {
    /// First invocation for a freshly started node
    async fn facilitate(&self, step: &dyn Step, ctx: &StepContext)
        -> Result<Facilitation, StepError>;

    /// Invocation with the responses the node was waiting on
    async fn resume(
        &self,
        step: &dyn Step,
        ctx: &StepContext,
        responses: ResponseMap,
    ) -> Result<Facilitation, StepError>;
}
