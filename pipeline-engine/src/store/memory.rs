// In-Memory Store
// ExecutionStore backed by hash maps behind a single RwLock

use super::ExecutionStore;
use crate::error::{EngineError, EngineResult};
use crate::execution::{ExecutionOutput, NodeExecution, PlanExecution, PlanStatus};
use crate::interrupt::{Interrupt, InterruptState};
use crate::plan::Plan;
use crate::timeout::{TimeoutInstance, TimeoutState};
use crate::waiter::{PendingNotify, WaitInstance};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct Tables {
    plans: HashMap<String, Plan>,
    plan_executions: HashMap<String, PlanExecution>,
    node_executions: HashMap<String, NodeExecution>,
    /// Creation order of node executions, for stable listing
    node_order: Vec<String>,
    interrupts: HashMap<String, Interrupt>,
    timeouts: HashMap<String, TimeoutInstance>,
    waits: HashMap<String, WaitInstance>,
    /// correlation id -> wait instance id
    wait_index: HashMap<String, String>,
    pending_notifies: HashMap<String, PendingNotify>,
    retired_correlations: HashSet<String>,
    outputs: Vec<ExecutionOutput>,
}

/// In-memory ExecutionStore for tests, the CLI and single-process use
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> EngineResult<RwLockReadGuard<'_, Tables>> {
        self.inner
            .read()
            .map_err(|e| EngineError::Store(format!("lock: {}", e)))
    }

    fn write(&self) -> EngineResult<RwLockWriteGuard<'_, Tables>> {
        self.inner
            .write()
            .map_err(|e| EngineError::Store(format!("lock: {}", e)))
    }
}

/// Compare-and-swap on a versioned record
macro_rules! cas_update {
    ($map:expr, $record:expr, $entity:literal) => {{
        let record = $record;
        match $map.get_mut(&record.uuid) {
            None => Err(EngineError::not_found($entity, record.uuid.clone())),
            Some(stored) if stored.version != record.version => Ok(None),
            Some(stored) => {
                let mut next = record.clone();
                next.version += 1;
                *stored = next.clone();
                Ok(Some(next))
            }
        }
    }};
}

#[async_trait]
impl ExecutionStore for InMemoryStore {
    async fn save_plan(&self, plan: &Plan) -> EngineResult<()> {
        self.write()?.plans.insert(plan.uuid.clone(), plan.clone());
        Ok(())
    }

    async fn get_plan(&self, plan_id: &str) -> EngineResult<Option<Plan>> {
        Ok(self.read()?.plans.get(plan_id).cloned())
    }

    async fn insert_plan_execution(&self, execution: &PlanExecution) -> EngineResult<()> {
        self.write()?
            .plan_executions
            .insert(execution.uuid.clone(), execution.clone());
        Ok(())
    }

    async fn get_plan_execution(&self, id: &str) -> EngineResult<Option<PlanExecution>> {
        Ok(self.read()?.plan_executions.get(id).cloned())
    }

    async fn update_plan_execution(
        &self,
        execution: &PlanExecution,
    ) -> EngineResult<Option<PlanExecution>> {
        let mut tables = self.write()?;
        cas_update!(tables.plan_executions, execution, "plan execution")
    }

    async fn find_plan_executions_by_status(
        &self,
        statuses: &[PlanStatus],
    ) -> EngineResult<Vec<PlanExecution>> {
        let tables = self.read()?;
        let mut found: Vec<_> = tables
            .plan_executions
            .values()
            .filter(|pe| statuses.contains(&pe.status))
            .cloned()
            .collect();
        found.sort_by_key(|pe| pe.start_ts);
        Ok(found)
    }

    async fn archive_plan_execution(&self, id: &str) -> EngineResult<()> {
        let mut tables = self.write()?;
        let plan_id = tables.plan_executions.remove(id).map(|pe| pe.plan_id);

        let nodes: Vec<&NodeExecution> = tables
            .node_executions
            .values()
            .filter(|ne| ne.plan_execution_id == id)
            .collect();
        let node_ids: HashSet<String> = nodes.iter().map(|ne| ne.uuid.clone()).collect();
        // Every correlation the plan ever waited on, retired or not
        let correlation_ids: HashSet<String> = nodes
            .iter()
            .flat_map(|ne| ne.executable_responses.iter())
            .flat_map(|r| r.correlation_ids())
            .chain(node_ids.iter().cloned())
            .collect();

        tables
            .retired_correlations
            .retain(|c| !correlation_ids.contains(c));
        tables
            .pending_notifies
            .retain(|c, _| !correlation_ids.contains(c));
        let wait_ids: HashSet<String> = correlation_ids
            .iter()
            .filter_map(|c| tables.wait_index.get(c).cloned())
            .collect();
        tables.waits.retain(|w, _| !wait_ids.contains(w));
        tables.wait_index.retain(|_, w| !wait_ids.contains(w));

        if let Some(plan_id) = plan_id {
            if !tables.plan_executions.values().any(|pe| pe.plan_id == plan_id) {
                tables.plans.remove(&plan_id);
            }
        }

        tables.node_executions.retain(|_, ne| ne.plan_execution_id != id);
        tables.node_order.retain(|n| !node_ids.contains(n));
        tables.timeouts.retain(|_, t| t.plan_execution_id != id);
        tables.outputs.retain(|o| o.plan_execution_id != id);
        tables.interrupts.retain(|_, i| i.plan_execution_id != id);
        Ok(())
    }

    async fn insert_node_execution(&self, node: &NodeExecution) -> EngineResult<()> {
        let mut tables = self.write()?;
        if tables
            .node_executions
            .insert(node.uuid.clone(), node.clone())
            .is_none()
        {
            tables.node_order.push(node.uuid.clone());
        }
        Ok(())
    }

    async fn get_node_execution(&self, id: &str) -> EngineResult<Option<NodeExecution>> {
        Ok(self.read()?.node_executions.get(id).cloned())
    }

    async fn update_node_execution(
        &self,
        node: &NodeExecution,
    ) -> EngineResult<Option<NodeExecution>> {
        let mut tables = self.write()?;
        let mut node = node.clone();
        node.last_updated_at = Utc::now();
        cas_update!(tables.node_executions, &node, "node execution")
    }

    async fn find_node_executions(
        &self,
        plan_execution_id: &str,
    ) -> EngineResult<Vec<NodeExecution>> {
        let tables = self.read()?;
        Ok(tables
            .node_order
            .iter()
            .filter_map(|id| tables.node_executions.get(id))
            .filter(|ne| ne.plan_execution_id == plan_execution_id)
            .cloned()
            .collect())
    }

    async fn find_children(&self, parent_id: &str) -> EngineResult<Vec<NodeExecution>> {
        let tables = self.read()?;
        Ok(tables
            .node_order
            .iter()
            .filter_map(|id| tables.node_executions.get(id))
            .filter(|ne| ne.parent_id.as_deref() == Some(parent_id))
            .cloned()
            .collect())
    }

    async fn insert_interrupt(&self, interrupt: &Interrupt) -> EngineResult<()> {
        self.write()?
            .interrupts
            .insert(interrupt.uuid.clone(), interrupt.clone());
        Ok(())
    }

    async fn get_interrupt(&self, id: &str) -> EngineResult<Option<Interrupt>> {
        Ok(self.read()?.interrupts.get(id).cloned())
    }

    async fn update_interrupt(&self, interrupt: &Interrupt) -> EngineResult<Option<Interrupt>> {
        let mut tables = self.write()?;
        cas_update!(tables.interrupts, interrupt, "interrupt")
    }

    async fn find_interrupts_by_state(
        &self,
        state: InterruptState,
    ) -> EngineResult<Vec<Interrupt>> {
        let tables = self.read()?;
        let mut found: Vec<_> = tables
            .interrupts
            .values()
            .filter(|i| i.state == state)
            .cloned()
            .collect();
        found.sort_by_key(|i| (i.created_at, i.sequence));
        Ok(found)
    }

    async fn find_interrupts_for_plan(
        &self,
        plan_execution_id: &str,
    ) -> EngineResult<Vec<Interrupt>> {
        let tables = self.read()?;
        let mut found: Vec<_> = tables
            .interrupts
            .values()
            .filter(|i| i.plan_execution_id == plan_execution_id)
            .cloned()
            .collect();
        found.sort_by_key(|i| (i.created_at, i.sequence));
        Ok(found)
    }

    async fn insert_timeout(&self, timeout: &TimeoutInstance) -> EngineResult<()> {
        self.write()?
            .timeouts
            .insert(timeout.uuid.clone(), timeout.clone());
        Ok(())
    }

    async fn get_timeout(&self, id: &str) -> EngineResult<Option<TimeoutInstance>> {
        Ok(self.read()?.timeouts.get(id).cloned())
    }

    async fn update_timeout(
        &self,
        timeout: &TimeoutInstance,
    ) -> EngineResult<Option<TimeoutInstance>> {
        let mut tables = self.write()?;
        cas_update!(tables.timeouts, timeout, "timeout instance")
    }

    async fn find_expired_timeouts(
        &self,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<TimeoutInstance>> {
        let tables = self.read()?;
        let mut found: Vec<_> = tables
            .timeouts
            .values()
            .filter(|t| t.state == TimeoutState::Active && t.deadline <= now)
            .cloned()
            .collect();
        found.sort_by_key(|t| t.deadline);
        Ok(found)
    }

    async fn find_timeouts_for_node(
        &self,
        node_execution_id: &str,
    ) -> EngineResult<Vec<TimeoutInstance>> {
        let tables = self.read()?;
        Ok(tables
            .timeouts
            .values()
            .filter(|t| t.node_execution_id == node_execution_id)
            .cloned()
            .collect())
    }

    async fn insert_wait_instance(&self, wait: &WaitInstance) -> EngineResult<()> {
        let mut tables = self.write()?;
        for correlation_id in &wait.correlation_ids {
            tables
                .wait_index
                .insert(correlation_id.clone(), wait.uuid.clone());
        }
        tables.waits.insert(wait.uuid.clone(), wait.clone());
        Ok(())
    }

    async fn find_wait_instance(&self, correlation_id: &str) -> EngineResult<Option<WaitInstance>> {
        let tables = self.read()?;
        Ok(tables
            .wait_index
            .get(correlation_id)
            .and_then(|id| tables.waits.get(id))
            .cloned())
    }

    async fn update_wait_instance(
        &self,
        wait: &WaitInstance,
    ) -> EngineResult<Option<WaitInstance>> {
        let mut tables = self.write()?;
        cas_update!(tables.waits, wait, "wait instance")
    }

    async fn delete_wait_instance(&self, id: &str) -> EngineResult<bool> {
        let mut tables = self.write()?;
        match tables.waits.remove(id) {
            Some(wait) => {
                for correlation_id in &wait.correlation_ids {
                    tables.wait_index.remove(correlation_id);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn save_pending_notify(&self, pending: &PendingNotify) -> EngineResult<()> {
        self.write()?
            .pending_notifies
            .insert(pending.correlation_id.clone(), pending.clone());
        Ok(())
    }

    async fn find_pending_notifies(&self) -> EngineResult<Vec<PendingNotify>> {
        let tables = self.read()?;
        let mut found: Vec<_> = tables.pending_notifies.values().cloned().collect();
        found.sort_by_key(|p| p.first_seen);
        Ok(found)
    }

    async fn delete_pending_notify(&self, correlation_id: &str) -> EngineResult<()> {
        self.write()?.pending_notifies.remove(correlation_id);
        Ok(())
    }

    async fn add_retired_correlations(&self, correlation_ids: &[String]) -> EngineResult<()> {
        let mut tables = self.write()?;
        tables
            .retired_correlations
            .extend(correlation_ids.iter().cloned());
        Ok(())
    }

    async fn is_correlation_retired(&self, correlation_id: &str) -> EngineResult<bool> {
        Ok(self.read()?.retired_correlations.contains(correlation_id))
    }

    async fn insert_output(&self, output: &ExecutionOutput) -> EngineResult<()> {
        let mut tables = self.write()?;
        let taken = tables.outputs.iter().any(|o| {
            o.plan_execution_id == output.plan_execution_id
                && o.name == output.name
                && o.scope == output.scope
        });
        if taken {
            return Err(EngineError::OutputAlreadyExists {
                name: output.name.clone(),
                scope: output.scope_key(),
            });
        }
        tables.outputs.push(output.clone());
        Ok(())
    }

    async fn find_output(
        &self,
        plan_execution_id: &str,
        name: &str,
        scope: &[String],
    ) -> EngineResult<Option<ExecutionOutput>> {
        let tables = self.read()?;
        Ok(tables
            .outputs
            .iter()
            .find(|o| o.plan_execution_id == plan_execution_id && o.name == name && o.scope == scope)
            .cloned())
    }

    async fn find_outputs_by_producer(
        &self,
        producer_id: &str,
    ) -> EngineResult<Vec<ExecutionOutput>> {
        let tables = self.read()?;
        Ok(tables
            .outputs
            .iter()
            .filter(|o| o.producer_id == producer_id)
            .cloned()
            .collect())
    }
}
