// Plan Models
// Static DAG of plan nodes, created once per execution request and never mutated

use serde::{Deserialize, Serialize};
use serde_json::Value;

use std::time::Duration;

/// An immutable graph of plan nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    /// Unique plan id
    #[serde(default = "new_plan_id")]
    pub uuid: String,
    /// Human readable name
    #[serde(default)]
    pub name: String,
    /// Node the root node execution is created for
    pub start_node_id: String,
    /// All nodes of the plan
    pub nodes: Vec<PlanNode>,
}

fn new_plan_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl Plan {
    pub fn new(name: impl Into<String>, start_node_id: impl Into<String>, nodes: Vec<PlanNode>) -> Self {
        Self {
            uuid: new_plan_id(),
            name: name.into(),
            start_node_id: start_node_id.into(),
            nodes,
        }
    }

    /// Look up a node by id
    pub fn node(&self, node_id: &str) -> Option<&PlanNode> {
        self.nodes.iter().find(|n| n.uuid == node_id)
    }

    pub fn start_node(&self) -> Option<&PlanNode> {
        self.node(&self.start_node_id)
    }
}

/// How an adviser is attached to a node: its type plus free-form parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdviserObtainment {
    #[serde(rename = "type")]
    pub adviser_type: String,
    #[serde(default)]
    pub parameters: Value,
}

impl AdviserObtainment {
    pub fn new(adviser_type: impl Into<String>) -> Self {
        Self {
            adviser_type: adviser_type.into(),
            parameters: Value::Null,
        }
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// Target node named in the parameters, if any
    pub fn next_node_id(&self) -> Option<&str> {
        self.parameters.get("nextNodeId").and_then(Value::as_str)
    }
}

/// One step definition in the plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanNode {
    pub uuid: String,
    /// Short identifier, defaults to the uuid
    #[serde(default)]
    pub identifier: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Key into the step registry
    pub step_type: String,
    #[serde(default)]
    pub step_parameters: Value,
    /// Key into the facilitator registry
    pub facilitator: String,
    /// Advisers in declaration order; the first one that can advise wins
    #[serde(default)]
    pub advisers: Vec<AdviserObtainment>,
    /// Default successor
    #[serde(default)]
    pub next: Option<String>,
    /// Successor on failure
    #[serde(default)]
    pub on_failure: Option<String>,
    /// Child nodes run by CHILD/CHILDREN/CHILD_CHAIN facilitators
    #[serde(default)]
    pub children: Vec<String>,
    /// Wall-clock deadline for one attempt of this node
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl PlanNode {
    pub fn new(
        uuid: impl Into<String>,
        step_type: impl Into<String>,
        facilitator: impl Into<String>,
    ) -> Self {
        let uuid = uuid.into();
        Self {
            identifier: uuid.clone(),
            uuid,
            name: None,
            step_type: step_type.into(),
            step_parameters: Value::Null,
            facilitator: facilitator.into(),
            advisers: Vec::new(),
            next: None,
            on_failure: None,
            children: Vec::new(),
            timeout_ms: None,
        }
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.step_parameters = parameters;
        self
    }

    pub fn with_adviser(mut self, adviser_type: impl Into<String>, parameters: Value) -> Self {
        self.advisers
            .push(AdviserObtainment::new(adviser_type).with_parameters(parameters));
        self
    }

    pub fn with_next(mut self, next: impl Into<String>) -> Self {
        self.next = Some(next.into());
        self
    }

    pub fn with_on_failure(mut self, node: impl Into<String>) -> Self {
        self.on_failure = Some(node.into());
        self
    }

    pub fn with_children<I, S>(mut self, children: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.children = children.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Display label for logs and events
    pub fn label(&self) -> &str {
        self.name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(if self.identifier.is_empty() {
                self.uuid.as_str()
            } else {
                self.identifier.as_str()
            })
    }

    /// Every node id this node can lead to
    pub fn edges(&self) -> Vec<&str> {
        let mut edges: Vec<&str> = Vec::new();
        edges.extend(self.next.as_deref());
        edges.extend(self.on_failure.as_deref());
        edges.extend(self.children.iter().map(String::as_str));
        edges.extend(self.advisers.iter().filter_map(|a| a.next_node_id()));
        edges
    }
}
