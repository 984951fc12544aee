// Store Module
// Persistence collaborator: CRUD plus optimistic-version updates on every
// engine record, and the index queries the sweeps rely on

pub mod memory;

pub use memory::InMemoryStore;

use crate::error::EngineResult;
use crate::execution::{ExecutionOutput, NodeExecution, PlanExecution, PlanStatus};
use crate::interrupt::{Interrupt, InterruptState};
use crate::plan::Plan;
use crate::timeout::TimeoutInstance;
use crate::waiter::{PendingNotify, WaitInstance};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Persistence trait for all engine state.
///
/// Every `update_*` method is a compare-and-swap on the record's `version`:
/// it returns `Ok(None)` when the stored version differs from the one in the
/// argument, and the stored record (with its bumped version) on success.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    // ── Plans ──

    async fn save_plan(&self, plan: &Plan) -> EngineResult<()>;
    async fn get_plan(&self, plan_id: &str) -> EngineResult<Option<Plan>>;

    // ── Plan executions ──

    async fn insert_plan_execution(&self, execution: &PlanExecution) -> EngineResult<()>;
    async fn get_plan_execution(&self, id: &str) -> EngineResult<Option<PlanExecution>>;
    async fn update_plan_execution(
        &self,
        execution: &PlanExecution,
    ) -> EngineResult<Option<PlanExecution>>;
    async fn find_plan_executions_by_status(
        &self,
        statuses: &[PlanStatus],
    ) -> EngineResult<Vec<PlanExecution>>;
    /// Remove a plan execution together with its nodes, outputs and timeouts
    async fn archive_plan_execution(&self, id: &str) -> EngineResult<()>;

    // ── Node executions ──

    async fn insert_node_execution(&self, node: &NodeExecution) -> EngineResult<()>;
    async fn get_node_execution(&self, id: &str) -> EngineResult<Option<NodeExecution>>;
    async fn update_node_execution(
        &self,
        node: &NodeExecution,
    ) -> EngineResult<Option<NodeExecution>>;
    /// All node executions of a plan execution, in creation order
    async fn find_node_executions(&self, plan_execution_id: &str)
        -> EngineResult<Vec<NodeExecution>>;
    async fn find_children(&self, parent_id: &str) -> EngineResult<Vec<NodeExecution>>;

    // ── Interrupts ──

    async fn insert_interrupt(&self, interrupt: &Interrupt) -> EngineResult<()>;
    async fn get_interrupt(&self, id: &str) -> EngineResult<Option<Interrupt>>;
    async fn update_interrupt(&self, interrupt: &Interrupt) -> EngineResult<Option<Interrupt>>;
    /// Interrupts in a given state, oldest first
    async fn find_interrupts_by_state(&self, state: InterruptState)
        -> EngineResult<Vec<Interrupt>>;
    async fn find_interrupts_for_plan(&self, plan_execution_id: &str)
        -> EngineResult<Vec<Interrupt>>;

    // ── Timeout instances ──

    async fn insert_timeout(&self, timeout: &TimeoutInstance) -> EngineResult<()>;
    async fn get_timeout(&self, id: &str) -> EngineResult<Option<TimeoutInstance>>;
    async fn update_timeout(
        &self,
        timeout: &TimeoutInstance,
    ) -> EngineResult<Option<TimeoutInstance>>;
    /// Active timeouts whose deadline is at or before `now`
    async fn find_expired_timeouts(&self, now: DateTime<Utc>)
        -> EngineResult<Vec<TimeoutInstance>>;
    async fn find_timeouts_for_node(&self, node_execution_id: &str)
        -> EngineResult<Vec<TimeoutInstance>>;

    // ── Wait instances (correlation bindings) ──

    async fn insert_wait_instance(&self, wait: &WaitInstance) -> EngineResult<()>;
    async fn find_wait_instance(&self, correlation_id: &str)
        -> EngineResult<Option<WaitInstance>>;
    async fn update_wait_instance(&self, wait: &WaitInstance)
        -> EngineResult<Option<WaitInstance>>;
    /// Returns whether this call removed the instance
    async fn delete_wait_instance(&self, id: &str) -> EngineResult<bool>;

    // ── Early notifies and retired (fired or cancelled) correlations ──

    async fn save_pending_notify(&self, pending: &PendingNotify) -> EngineResult<()>;
    async fn find_pending_notifies(&self) -> EngineResult<Vec<PendingNotify>>;
    async fn delete_pending_notify(&self, correlation_id: &str) -> EngineResult<()>;
    async fn add_retired_correlations(&self, correlation_ids: &[String]) -> EngineResult<()>;
    async fn is_correlation_retired(&self, correlation_id: &str) -> EngineResult<bool>;

    // ── Outputs ──

    /// Fails with `OutputAlreadyExists` if the name is taken in that scope
    async fn insert_output(&self, output: &ExecutionOutput) -> EngineResult<()>;
    async fn find_output(
        &self,
        plan_execution_id: &str,
        name: &str,
        scope: &[String],
    ) -> EngineResult<Option<ExecutionOutput>>;
    async fn find_outputs_by_producer(&self, producer_id: &str)
        -> EngineResult<Vec<ExecutionOutput>>;
}
