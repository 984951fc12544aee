// Plan Validator
// Structural checks run before a plan execution is created

use super::models::Plan;
use crate::engine::Registries;
use crate::error::{EngineError, EngineResult};
use crate::facilitator;

use std::collections::{HashMap, HashSet};

/// Validates plan structure and registrations
pub struct PlanValidator;

impl PlanValidator {
    /// Reject plans the engine cannot run.
    ///
    /// Structural problems (missing start node, duplicate ids, dangling
    /// edges, cycles, bad child counts) are `InvalidPlan`; step, facilitator
    /// or adviser types nobody registered are `UnregisteredType`.
    pub fn validate(plan: &Plan, registries: &Registries) -> EngineResult<()> {
        Self::validate_structure(plan)?;
        Self::validate_registrations(plan, registries)?;
        Self::detect_cycles(plan)
    }

    fn validate_structure(plan: &Plan) -> EngineResult<()> {
        if plan.nodes.is_empty() {
            return Err(EngineError::InvalidPlan("plan has no nodes".to_string()));
        }

        let mut ids = HashSet::new();
        for node in &plan.nodes {
            if !ids.insert(node.uuid.as_str()) {
                return Err(EngineError::InvalidPlan(format!(
                    "duplicate node id '{}'",
                    node.uuid
                )));
            }
        }

        if plan.start_node().is_none() {
            return Err(EngineError::InvalidPlan(format!(
                "start node '{}' is not part of the plan",
                plan.start_node_id
            )));
        }

        for node in &plan.nodes {
            for edge in node.edges() {
                if !ids.contains(edge) {
                    return Err(EngineError::InvalidPlan(format!(
                        "node '{}' references unknown node '{}'",
                        node.uuid, edge
                    )));
                }
            }

            let mut adviser_types = HashSet::new();
            for adviser in &node.advisers {
                if !adviser_types.insert(adviser.adviser_type.as_str()) {
                    return Err(EngineError::InvalidPlan(format!(
                        "node '{}' declares adviser '{}' twice",
                        node.uuid, adviser.adviser_type
                    )));
                }
            }

            let children = node.children.len();
            match node.facilitator.as_str() {
                facilitator::CHILD if children != 1 => {
                    return Err(EngineError::InvalidPlan(format!(
                        "node '{}' uses CHILD with {} children",
                        node.uuid, children
                    )));
                }
                facilitator::CHILD_CHAIN if children == 0 => {
                    return Err(EngineError::InvalidPlan(format!(
                        "node '{}' uses CHILD_CHAIN without children",
                        node.uuid
                    )));
                }
                _ => {}
            }
        }

        Ok(())
    }

    fn validate_registrations(plan: &Plan, registries: &Registries) -> EngineResult<()> {
        for node in &plan.nodes {
            if !registries.steps.contains(&node.step_type) {
                return Err(EngineError::unregistered("step", &node.step_type));
            }
            if !registries.facilitators.contains(&node.facilitator) {
                return Err(EngineError::unregistered("facilitator", &node.facilitator));
            }
            for adviser in &node.advisers {
                if !registries.advisers.contains(&adviser.adviser_type) {
                    return Err(EngineError::unregistered("adviser", &adviser.adviser_type));
                }
            }
        }
        Ok(())
    }

    /// Detect cycles over every edge kind using DFS
    fn detect_cycles(plan: &Plan) -> EngineResult<()> {
        let edges: HashMap<&str, Vec<&str>> = plan
            .nodes
            .iter()
            .map(|n| (n.uuid.as_str(), n.edges()))
            .collect();

        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        for node in &plan.nodes {
            if !visited.contains(node.uuid.as_str()) {
                if let Some(cycle) = dfs_cycle(node.uuid.as_str(), &edges, &mut visited, &mut rec_stack)
                {
                    return Err(EngineError::InvalidPlan(format!(
                        "cycle detected: {}",
                        cycle.join(" -> ")
                    )));
                }
            }
        }
        Ok(())
    }
}

fn dfs_cycle<'a>(
    node: &'a str,
    edges: &HashMap<&'a str, Vec<&'a str>>,
    visited: &mut HashSet<&'a str>,
    rec_stack: &mut HashSet<&'a str>,
) -> Option<Vec<String>> {
    visited.insert(node);
    rec_stack.insert(node);

    for &next in edges.get(node).map(Vec::as_slice).unwrap_or_default() {
        if !visited.contains(next) {
            if let Some(mut cycle) = dfs_cycle(next, edges, visited, rec_stack) {
                cycle.insert(0, node.to_string());
                return Some(cycle);
            }
        } else if rec_stack.contains(next) {
            return Some(vec![node.to_string(), next.to_string()]);
        }
    }

    rec_stack.remove(node);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegate::{TaskDispatcher, TaskSpec};
    use crate::engine::EngineBuilder;
    use crate::plan::PlanNode;
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;

    struct NullDispatcher;

    #[async_trait]
    impl TaskDispatcher for NullDispatcher {
        async fn submit_task(&self, _correlation_id: &str, _task: TaskSpec) -> EngineResult<String> {
            Ok("task".to_string())
        }
    }

    fn validate(plan: &Plan) -> EngineResult<()> {
        let engine = EngineBuilder::new(Arc::new(InMemoryStore::new()), Arc::new(NullDispatcher))
            .with_builtin_steps()
            .unwrap()
            .build();
        PlanValidator::validate(plan, engine.registries())
    }

    fn sync_node(id: &str) -> PlanNode {
        PlanNode::new(id, "noop", facilitator::SYNC)
    }

    #[test]
    fn test_valid_plan() {
        let plan = Plan::new(
            "ok",
            "a",
            vec![
                sync_node("a")
                    .with_next("b")
                    .with_adviser("NEXT_STEP", json!({})),
                PlanNode::new("b", "fork", facilitator::CHILDREN).with_children(["c", "d"]),
                sync_node("c"),
                sync_node("d"),
            ],
        );
        assert!(validate(&plan).is_ok());
    }

    #[test]
    fn test_missing_start_node() {
        let plan = Plan::new("bad", "zzz", vec![sync_node("a")]);
        assert!(matches!(validate(&plan), Err(EngineError::InvalidPlan(_))));
    }

    #[test]
    fn test_dangling_edge() {
        let plan = Plan::new("bad", "a", vec![sync_node("a").with_next("ghost")]);
        let err = validate(&plan).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_cycle_is_rejected() {
        let plan = Plan::new(
            "bad",
            "a",
            vec![
                sync_node("a").with_next("b"),
                sync_node("b").with_on_failure("a"),
            ],
        );
        let err = validate(&plan).unwrap_err();
        assert_eq!(err, EngineError::InvalidPlan("cycle detected: a -> b -> a".to_string()));
    }

    #[test]
    fn test_unregistered_types() {
        let plan = Plan::new("bad", "a", vec![PlanNode::new("a", "deploy", facilitator::SYNC)]);
        assert_eq!(
            validate(&plan).unwrap_err(),
            EngineError::unregistered("step", "deploy")
        );

        let plan = Plan::new("bad", "a", vec![sync_node("a").with_adviser("PRAY", json!({}))]);
        assert_eq!(
            validate(&plan).unwrap_err(),
            EngineError::unregistered("adviser", "PRAY")
        );
    }

    #[test]
    fn test_duplicate_adviser_type() {
        let plan = Plan::new(
            "bad",
            "a",
            vec![sync_node("a")
                .with_adviser("RETRY", json!({ "maxRetries": 1 }))
                .with_adviser("RETRY", json!({ "maxRetries": 2 }))],
        );
        assert!(matches!(validate(&plan), Err(EngineError::InvalidPlan(_))));
    }

    #[test]
    fn test_child_requires_exactly_one_child() {
        let plan = Plan::new(
            "bad",
            "a",
            vec![
                PlanNode::new("a", "fork", facilitator::CHILD).with_children(["b", "c"]),
                sync_node("b"),
                sync_node("c"),
            ],
        );
        assert!(matches!(validate(&plan), Err(EngineError::InvalidPlan(_))));
    }
}
