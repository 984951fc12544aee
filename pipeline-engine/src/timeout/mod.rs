// Timeout Module
// Persisted deadlines for node attempts and manual interventions; a sweep
// claims expired instances exactly once

use crate::error::{EngineError, EngineResult};
use crate::execution::models::new_id;
use crate::execution::NodeExecution;
use crate::store::ExecutionStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use std::sync::Arc;
use std::time::Duration;

/// What a timeout guards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeoutKind {
    /// Deadline of one node attempt
    NodeDeadline,
    /// How long a node may wait for manual intervention
    Intervention,
    /// How long a suspended node waits for its executor to report back
    Correlation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeoutState {
    Active,
    Fired,
    Cancelled,
}

/// A registered deadline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutInstance {
    pub uuid: String,
    pub plan_execution_id: String,
    pub node_execution_id: String,
    pub kind: TimeoutKind,
    pub deadline: DateTime<Utc>,
    pub state: TimeoutState,
    pub created_at: DateTime<Utc>,
    pub version: u64,
}

/// Registers, cancels and expires timeout instances
pub struct TimeoutEngine {
    store: Arc<dyn ExecutionStore>,
    max_retries: u32,
}

impl TimeoutEngine {
    pub fn new(store: Arc<dyn ExecutionStore>, max_retries: u32) -> Self {
        Self {
            store,
            max_retries: max_retries.max(1),
        }
    }

    /// Register a deadline `after` from now for `node`
    pub async fn register(
        &self,
        node: &NodeExecution,
        kind: TimeoutKind,
        after: Duration,
    ) -> EngineResult<TimeoutInstance> {
        let now = Utc::now();
        let after = chrono::Duration::from_std(after).unwrap_or_else(|_| chrono::Duration::days(365));
        let instance = TimeoutInstance {
            uuid: new_id(),
            plan_execution_id: node.plan_execution_id.clone(),
            node_execution_id: node.uuid.clone(),
            kind,
            deadline: now + after,
            state: TimeoutState::Active,
            created_at: now,
            version: 0,
        };
        self.store.insert_timeout(&instance).await?;
        debug!(
            node = %node.uuid,
            timeout = %instance.uuid,
            ?kind,
            deadline = %instance.deadline,
            "timeout registered"
        );
        Ok(instance)
    }

    /// Cancel every active timeout of a node; returns how many were cancelled
    pub async fn cancel_for_node(&self, node_execution_id: &str) -> EngineResult<usize> {
        let mut cancelled = 0;
        for instance in self.store.find_timeouts_for_node(node_execution_id).await? {
            if self.transition(instance, TimeoutState::Cancelled).await?.is_some() {
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    /// Cancel the active timeouts of one kind on a node
    pub async fn cancel_kind(&self, node_execution_id: &str, kind: TimeoutKind) -> EngineResult<usize> {
        let mut cancelled = 0;
        for instance in self.store.find_timeouts_for_node(node_execution_id).await? {
            if instance.kind != kind {
                continue;
            }
            if self.transition(instance, TimeoutState::Cancelled).await?.is_some() {
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    /// Whether a node still has a running timer
    pub async fn has_active(&self, node_execution_id: &str) -> EngineResult<bool> {
        Ok(self
            .store
            .find_timeouts_for_node(node_execution_id)
            .await?
            .iter()
            .any(|t| t.state == TimeoutState::Active))
    }

    /// Claim every instance whose deadline passed before `now`.
    ///
    /// Each instance is returned by exactly one sweep, even when sweeps race.
    pub async fn sweep(&self, now: DateTime<Utc>) -> EngineResult<Vec<TimeoutInstance>> {
        let mut fired = Vec::new();
        for instance in self.store.find_expired_timeouts(now).await? {
            let id = instance.uuid.clone();
            match self.transition(instance, TimeoutState::Fired).await {
                Ok(Some(claimed)) => fired.push(claimed),
                Ok(None) => {}
                // Still ACTIVE, the next sweep picks it up again
                Err(e) => warn!(timeout = %id, error = %e, "could not claim timeout"),
            }
        }
        Ok(fired)
    }

    /// Move an ACTIVE instance to `state`; `None` if someone else settled it
    async fn transition(
        &self,
        mut instance: TimeoutInstance,
        state: TimeoutState,
    ) -> EngineResult<Option<TimeoutInstance>> {
        for _ in 0..self.max_retries {
            if instance.state != TimeoutState::Active {
                return Ok(None);
            }
            let mut next = instance.clone();
            next.state = state;
            if let Some(saved) = self.store.update_timeout(&next).await? {
                return Ok(Some(saved));
            }
            instance = match self.store.get_timeout(&instance.uuid).await? {
                Some(current) => current,
                None => return Ok(None),
            };
        }
        Err(EngineError::ConcurrentModification {
            entity: "timeout",
            id: instance.uuid,
            attempts: self.max_retries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::Ambiance;
    use crate::plan::PlanNode;
    use crate::store::InMemoryStore;

    fn node() -> NodeExecution {
        NodeExecution::new("pe", &PlanNode::new("a", "noop", "SYNC"), &Ambiance::new("pe"))
    }

    #[tokio::test]
    async fn test_sweep_claims_each_timeout_once() {
        let store: Arc<dyn ExecutionStore> = Arc::new(InMemoryStore::new());
        let engine = TimeoutEngine::new(store, 3);
        let node = node();
        engine
            .register(&node, TimeoutKind::NodeDeadline, Duration::from_millis(10))
            .await
            .unwrap();

        assert!(engine.sweep(Utc::now()).await.unwrap().is_empty());

        let later = Utc::now() + chrono::Duration::seconds(1);
        let fired = engine.sweep(later).await.unwrap();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].state, TimeoutState::Fired);
        assert!(engine.sweep(later).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_timeouts_never_fire() {
        let store: Arc<dyn ExecutionStore> = Arc::new(InMemoryStore::new());
        let engine = TimeoutEngine::new(store, 3);
        let node = node();
        engine
            .register(&node, TimeoutKind::Intervention, Duration::from_millis(10))
            .await
            .unwrap();

        assert!(engine.has_active(&node.uuid).await.unwrap());
        assert_eq!(engine.cancel_for_node(&node.uuid).await.unwrap(), 1);
        assert!(!engine.has_active(&node.uuid).await.unwrap());

        let later = Utc::now() + chrono::Duration::seconds(1);
        assert!(engine.sweep(later).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_kind_keeps_other_timers() {
        let store: Arc<dyn ExecutionStore> = Arc::new(InMemoryStore::new());
        let engine = TimeoutEngine::new(store, 3);
        let node = node();
        engine
            .register(&node, TimeoutKind::NodeDeadline, Duration::from_millis(10))
            .await
            .unwrap();
        engine
            .register(&node, TimeoutKind::Correlation, Duration::from_millis(10))
            .await
            .unwrap();

        assert_eq!(engine.cancel_kind(&node.uuid, TimeoutKind::Correlation).await.unwrap(), 1);

        let later = Utc::now() + chrono::Duration::seconds(1);
        let fired = engine.sweep(later).await.unwrap();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].kind, TimeoutKind::NodeDeadline);
    }
}
