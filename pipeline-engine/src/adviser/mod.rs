// Adviser Module
// Post-completion policy: advisers decide where a branch goes after a node
// reaches a terminal status

pub mod builtin;

pub use builtin::{
    EndPlanAdviser, IgnoreAdviser, ManualInterventionAdviser, MarkAsFailureAdviser,
    MarkSuccessAdviser, NextStepAdviser, OnFailAdviser, OnSuccessAdviser, RetryAdviser,
    default_response,
};

use crate::execution::{FailureInfo, FailureType, NodeExecution, Status};
use crate::plan::PlanNode;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const NEXT_STEP: &str = "NEXT_STEP";
pub const ON_SUCCESS: &str = "ON_SUCCESS";
pub const ON_FAIL: &str = "ON_FAIL";
pub const RETRY: &str = "RETRY";
pub const MANUAL_INTERVENTION: &str = "MANUAL_INTERVENTION";
pub const IGNORE: &str = "IGNORE";
pub const MARK_SUCCESS: &str = "MARK_SUCCESS";
pub const MARK_AS_FAILURE: &str = "MARK_AS_FAILURE";
pub const END_PLAN: &str = "END_PLAN";

/// An adviser's decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdviserResponse {
    /// Continue the branch at another plan node
    #[serde(rename_all = "camelCase")]
    NextStep { next_node_id: String },
    /// Run the same plan node again after `wait_ms`
    #[serde(rename_all = "camelCase")]
    Retry { wait_ms: u64 },
    /// Park the node until an interrupt or the timeout decides
    #[serde(rename_all = "camelCase")]
    Intervene { timeout_ms: Option<u64> },
    /// Treat the failure as IGNORE_FAILED and continue
    #[serde(rename_all = "camelCase")]
    Ignore { next_node_id: Option<String> },
    /// Treat the failure as SUCCEEDED and continue
    #[serde(rename_all = "camelCase")]
    MarkSuccess { next_node_id: Option<String> },
    /// Settle the node as FAILED; continue at `next_node_id` if given
    #[serde(rename_all = "camelCase")]
    MarkAsFailure { next_node_id: Option<String> },
    /// Stop the whole plan with the node's status
    EndPlan,
}

/// What an adviser sees about the node it advises on
#[derive(Debug, Clone, Copy)]
pub struct AdvisingEvent<'a> {
    pub node_execution: &'a NodeExecution,
    pub plan_node: &'a PlanNode,
    /// Status before the terminal transition
    pub from_status: Status,
    pub to_status: Status,
    pub failure_info: Option<&'a FailureInfo>,
    /// Parameters of the adviser obtainment on the plan node
    pub parameters: &'a Value,
}

impl AdvisingEvent<'_> {
    /// Failure types of the event, matched against an adviser's filter
    pub fn matches_failure(&self, wanted: &[FailureType]) -> bool {
        match self.failure_info {
            Some(info) => info.matches_any(wanted),
            None => wanted.is_empty(),
        }
    }
}

/// Post-completion policy for a node
pub trait Adviser: Send + Sync {
    fn can_advise(&self, event: &AdvisingEvent<'_>) -> bool;

    fn on_advise(&self, event: &AdvisingEvent<'_>) -> AdviserResponse;
}
