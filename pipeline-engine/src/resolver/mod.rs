// Resolver Module
// Scoped, immutable outputs: nodes publish named values and later nodes in the
// same or an inner scope resolve them

use crate::error::EngineResult;
use crate::execution::models::new_id;
use crate::execution::{Ambiance, ExecutionOutput, OutputKind};
use crate::store::ExecutionStore;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use std::sync::Arc;

/// Ref type of step outcomes, addressed as `<planNodeId>.<name>`
pub const OUTCOME: &str = "OUTCOME";
/// Ref type of sweeping outputs, addressed by bare name
pub const SWEEPING_OUTPUT: &str = "SWEEPING_OUTPUT";

/// Publishes and looks up outputs of one ref type
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolve `name` as seen from `ambiance`, innermost scope first
    async fn resolve(&self, ambiance: &Ambiance, name: &str) -> EngineResult<Option<Value>>;

    /// Publish `value` under `name` on behalf of the node in `ambiance`.
    /// Returns the output id.
    async fn consume(&self, ambiance: &Ambiance, name: &str, value: Value) -> EngineResult<String>;
}

/// Store-backed resolver shared by both ref types
pub struct OutputResolver {
    store: Arc<dyn ExecutionStore>,
    kind: OutputKind,
}

impl OutputResolver {
    pub fn outcomes(store: Arc<dyn ExecutionStore>) -> Self {
        Self {
            store,
            kind: OutputKind::Outcome,
        }
    }

    pub fn sweeping_outputs(store: Arc<dyn ExecutionStore>) -> Self {
        Self {
            store,
            kind: OutputKind::SweepingOutput,
        }
    }

    fn stored_name(&self, ambiance: &Ambiance, name: &str) -> String {
        match (self.kind, ambiance.current_level()) {
            (OutputKind::Outcome, Some(level)) => format!("{}.{}", level.setup_id, name),
            _ => name.to_string(),
        }
    }
}

#[async_trait]
impl Resolver for OutputResolver {
    async fn resolve(&self, ambiance: &Ambiance, name: &str) -> EngineResult<Option<Value>> {
        let scope = ambiance.full_scope();
        for depth in (0..=scope.len()).rev() {
            if let Some(output) = self
                .store
                .find_output(&ambiance.plan_execution_id, name, &scope[..depth])
                .await?
            {
                if output.kind == self.kind {
                    return Ok(Some(output.value));
                }
            }
        }
        Ok(None)
    }

    async fn consume(&self, ambiance: &Ambiance, name: &str, value: Value) -> EngineResult<String> {
        let output = ExecutionOutput {
            uuid: new_id(),
            plan_execution_id: ambiance.plan_execution_id.clone(),
            kind: self.kind,
            name: self.stored_name(ambiance, name),
            producer_id: ambiance.node_execution_id().unwrap_or_default().to_string(),
            scope: ambiance.enclosing_scope(),
            value,
            created_at: Utc::now(),
        };
        self.store.insert_output(&output).await?;
        Ok(output.uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::execution::Level;
    use crate::store::InMemoryStore;
    use serde_json::json;

    fn level(runtime_id: &str, setup_id: &str) -> Level {
        Level {
            runtime_id: runtime_id.to_string(),
            setup_id: setup_id.to_string(),
            step_type: "noop".to_string(),
            retry_index: 0,
        }
    }

    #[tokio::test]
    async fn test_sweeping_output_visible_to_inner_scopes_only() {
        let store: Arc<dyn ExecutionStore> = Arc::new(InMemoryStore::new());
        let resolver = OutputResolver::sweeping_outputs(store);

        let parent = Ambiance::new("pe").with_level(level("p1", "parent"));
        let producer = parent.with_level(level("c1", "child-a"));
        let sibling = parent.with_level(level("c2", "child-b"));
        let nested = sibling.with_level(level("g1", "grandchild"));
        let outsider = Ambiance::new("pe").with_level(level("x1", "other"));

        resolver.consume(&producer, "artifact", json!("v1")).await.unwrap();

        assert_eq!(resolver.resolve(&sibling, "artifact").await.unwrap(), Some(json!("v1")));
        assert_eq!(resolver.resolve(&nested, "artifact").await.unwrap(), Some(json!("v1")));
        assert_eq!(resolver.resolve(&outsider, "artifact").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_outputs_are_immutable_per_scope() {
        let store: Arc<dyn ExecutionStore> = Arc::new(InMemoryStore::new());
        let resolver = OutputResolver::sweeping_outputs(store);
        let producer = Ambiance::new("pe").with_level(level("n1", "a"));

        resolver.consume(&producer, "x", json!(1)).await.unwrap();
        let err = resolver.consume(&producer, "x", json!(2)).await.unwrap_err();
        assert!(matches!(err, EngineError::OutputAlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_outcomes_are_addressed_by_producer_node() {
        let store: Arc<dyn ExecutionStore> = Arc::new(InMemoryStore::new());
        let outcomes = OutputResolver::outcomes(store.clone());
        let sweeping = OutputResolver::sweeping_outputs(store);

        let producer = Ambiance::new("pe").with_level(level("n1", "build"));
        let consumer = Ambiance::new("pe").with_level(level("n2", "deploy"));

        outcomes.consume(&producer, "output", json!({"image": "app:1"})).await.unwrap();

        assert_eq!(
            outcomes.resolve(&consumer, "build.output").await.unwrap(),
            Some(json!({"image": "app:1"}))
        );
        assert_eq!(sweeping.resolve(&consumer, "build.output").await.unwrap(), None);
    }
}
