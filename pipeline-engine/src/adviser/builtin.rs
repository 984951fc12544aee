// Built-in Advisers
// Parameters come from the adviser obtainment on the plan node; a node's
// advisers are evaluated in declaration order and the first match wins

use super::{Adviser, AdviserResponse, AdvisingEvent};
use crate::execution::{FailureType, Status};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::warn;

/// Typed adviser parameters; invalid parameters disable the adviser
fn parameters<T: DeserializeOwned + Default>(event: &AdvisingEvent<'_>) -> Option<T> {
    if event.parameters.is_null() {
        return Some(T::default());
    }
    match serde_json::from_value(event.parameters.clone()) {
        Ok(params) => Some(params),
        Err(e) => {
            warn!(
                node = %event.plan_node.uuid,
                error = %e,
                "ignoring adviser with invalid parameters"
            );
            None
        }
    }
}

/// `statuses` empty means "any terminal status except ABORTED"
fn status_matches(statuses: &[Status], status: Status) -> bool {
    if statuses.is_empty() {
        status.is_terminal() && status != Status::Aborted
    } else {
        statuses.contains(&status)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RouteParameters {
    next_node_id: Option<String>,
    statuses: Vec<Status>,
    failure_types: Vec<FailureType>,
}

/// Continue at `nextNodeId` (or the node's `next`) after any settled status
pub struct NextStepAdviser;

impl NextStepAdviser {
    fn target(event: &AdvisingEvent<'_>, params: &RouteParameters) -> Option<String> {
        params
            .next_node_id
            .clone()
            .or_else(|| event.plan_node.next.clone())
    }
}

impl Adviser for NextStepAdviser {
    fn can_advise(&self, event: &AdvisingEvent<'_>) -> bool {
        parameters::<RouteParameters>(event).map_or(false, |p| {
            status_matches(&p.statuses, event.to_status) && Self::target(event, &p).is_some()
        })
    }

    fn on_advise(&self, event: &AdvisingEvent<'_>) -> AdviserResponse {
        let params = parameters::<RouteParameters>(event).unwrap_or_default();
        match Self::target(event, &params) {
            Some(next_node_id) => AdviserResponse::NextStep { next_node_id },
            None => AdviserResponse::MarkAsFailure { next_node_id: None },
        }
    }
}

/// Continue at the next node only after a positive status
pub struct OnSuccessAdviser;

impl Adviser for OnSuccessAdviser {
    fn can_advise(&self, event: &AdvisingEvent<'_>) -> bool {
        event.to_status.is_positive() && NextStepAdviser.can_advise(event)
    }

    fn on_advise(&self, event: &AdvisingEvent<'_>) -> AdviserResponse {
        NextStepAdviser.on_advise(event)
    }
}

/// Route a failure to `nextNodeId` (or the node's `onFailure`)
pub struct OnFailAdviser;

impl OnFailAdviser {
    fn target(event: &AdvisingEvent<'_>, params: &RouteParameters) -> Option<String> {
        params
            .next_node_id
            .clone()
            .or_else(|| event.plan_node.on_failure.clone())
    }
}

impl Adviser for OnFailAdviser {
    fn can_advise(&self, event: &AdvisingEvent<'_>) -> bool {
        event.to_status.is_broke()
            && parameters::<RouteParameters>(event).map_or(false, |p| {
                event.matches_failure(&p.failure_types) && Self::target(event, &p).is_some()
            })
    }

    fn on_advise(&self, event: &AdvisingEvent<'_>) -> AdviserResponse {
        let params = parameters::<RouteParameters>(event).unwrap_or_default();
        match Self::target(event, &params) {
            Some(next_node_id) => AdviserResponse::NextStep { next_node_id },
            None => AdviserResponse::MarkAsFailure { next_node_id: None },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RetryParameters {
    max_attempts: u32,
    wait_ms: u64,
    backoff_multiplier: f64,
    failure_types: Vec<FailureType>,
}

impl Default for RetryParameters {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            wait_ms: 0,
            backoff_multiplier: 1.0,
            failure_types: Vec::new(),
        }
    }
}

/// Re-run a failed node up to `maxAttempts` times
pub struct RetryAdviser;

impl Adviser for RetryAdviser {
    fn can_advise(&self, event: &AdvisingEvent<'_>) -> bool {
        event.to_status.is_broke()
            && parameters::<RetryParameters>(event).map_or(false, |p| {
                event.matches_failure(&p.failure_types)
                    && event.node_execution.retry_count() < p.max_attempts
            })
    }

    fn on_advise(&self, event: &AdvisingEvent<'_>) -> AdviserResponse {
        let params = parameters::<RetryParameters>(event).unwrap_or_default();
        let attempt = event.node_execution.retry_count() as i32;
        let wait = params.wait_ms as f64 * params.backoff_multiplier.max(1.0).powi(attempt);
        AdviserResponse::Retry {
            wait_ms: wait.round() as u64,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct InterventionParameters {
    timeout_ms: Option<u64>,
    failure_types: Vec<FailureType>,
}

/// Park a failed node until someone intervenes
pub struct ManualInterventionAdviser;

impl Adviser for ManualInterventionAdviser {
    fn can_advise(&self, event: &AdvisingEvent<'_>) -> bool {
        // An intervention that ran out does not open another one
        event.to_status.is_broke()
            && event.from_status != Status::InterventionWaiting
            && parameters::<InterventionParameters>(event)
                .map_or(false, |p| event.matches_failure(&p.failure_types))
    }

    fn on_advise(&self, event: &AdvisingEvent<'_>) -> AdviserResponse {
        let params = parameters::<InterventionParameters>(event).unwrap_or_default();
        AdviserResponse::Intervene {
            timeout_ms: params.timeout_ms,
        }
    }
}

/// Settle a failure as IGNORE_FAILED and move on
pub struct IgnoreAdviser;

impl Adviser for IgnoreAdviser {
    fn can_advise(&self, event: &AdvisingEvent<'_>) -> bool {
        event.to_status.is_broke()
            && parameters::<RouteParameters>(event)
                .map_or(false, |p| event.matches_failure(&p.failure_types))
    }

    fn on_advise(&self, event: &AdvisingEvent<'_>) -> AdviserResponse {
        let params = parameters::<RouteParameters>(event).unwrap_or_default();
        AdviserResponse::Ignore {
            next_node_id: params.next_node_id.or_else(|| event.plan_node.next.clone()),
        }
    }
}

/// Settle a failure as SUCCEEDED and move on
pub struct MarkSuccessAdviser;

impl Adviser for MarkSuccessAdviser {
    fn can_advise(&self, event: &AdvisingEvent<'_>) -> bool {
        IgnoreAdviser.can_advise(event)
    }

    fn on_advise(&self, event: &AdvisingEvent<'_>) -> AdviserResponse {
        let params = parameters::<RouteParameters>(event).unwrap_or_default();
        AdviserResponse::MarkSuccess {
            next_node_id: params.next_node_id.or_else(|| event.plan_node.next.clone()),
        }
    }
}

/// Settle the node as FAILED, optionally continuing at `nextNodeId`
pub struct MarkAsFailureAdviser;

impl Adviser for MarkAsFailureAdviser {
    fn can_advise(&self, event: &AdvisingEvent<'_>) -> bool {
        parameters::<RouteParameters>(event).map_or(false, |p| {
            status_matches(&p.statuses, event.to_status)
                && event.matches_failure(&p.failure_types)
        })
    }

    fn on_advise(&self, event: &AdvisingEvent<'_>) -> AdviserResponse {
        let params = parameters::<RouteParameters>(event).unwrap_or_default();
        AdviserResponse::MarkAsFailure {
            next_node_id: params.next_node_id,
        }
    }
}

/// Stop the plan
pub struct EndPlanAdviser;

impl Adviser for EndPlanAdviser {
    fn can_advise(&self, event: &AdvisingEvent<'_>) -> bool {
        parameters::<RouteParameters>(event)
            .map_or(false, |p| status_matches(&p.statuses, event.to_status))
    }

    fn on_advise(&self, _event: &AdvisingEvent<'_>) -> AdviserResponse {
        AdviserResponse::EndPlan
    }
}

/// Fallback when no adviser matched
pub fn default_response(to_status: Status) -> Option<AdviserResponse> {
    if to_status.is_positive() {
        None
    } else {
        Some(AdviserResponse::MarkAsFailure { next_node_id: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{Ambiance, FailureInfo, NodeExecution};
    use crate::plan::PlanNode;
    use serde_json::{json, Value};

    struct Fixture {
        node: PlanNode,
        execution: NodeExecution,
        failure: Option<FailureInfo>,
        parameters: Value,
    }

    impl Fixture {
        fn new(parameters: Value) -> Self {
            let node = PlanNode::new("a", "task", "TASK").with_next("b").with_on_failure("cleanup");
            let execution = NodeExecution::new("pe", &node, &Ambiance::new("pe"));
            Self {
                node,
                execution,
                failure: Some(FailureInfo::new(FailureType::Connectivity, "timeout")),
                parameters,
            }
        }

        fn event(&self, from: Status, to: Status) -> AdvisingEvent<'_> {
            AdvisingEvent {
                node_execution: &self.execution,
                plan_node: &self.node,
                from_status: from,
                to_status: to,
                failure_info: self.failure.as_ref(),
                parameters: &self.parameters,
            }
        }
    }

    #[test]
    fn test_next_step_uses_node_next() {
        let f = Fixture::new(Value::Null);
        let event = f.event(Status::Running, Status::Succeeded);
        assert!(NextStepAdviser.can_advise(&event));
        assert_eq!(
            NextStepAdviser.on_advise(&event),
            AdviserResponse::NextStep {
                next_node_id: "b".to_string()
            }
        );
        assert!(!NextStepAdviser.can_advise(&f.event(Status::Running, Status::Aborted)));
    }

    #[test]
    fn test_retry_respects_max_attempts_and_backoff() {
        let mut f = Fixture::new(json!({"maxAttempts": 2, "waitMs": 100, "backoffMultiplier": 2.0}));
        assert!(RetryAdviser.can_advise(&f.event(Status::Running, Status::Failed)));
        assert!(!RetryAdviser.can_advise(&f.event(Status::Running, Status::Succeeded)));

        f.execution.retry_ids = vec!["r0".to_string()];
        assert_eq!(
            RetryAdviser.on_advise(&f.event(Status::Running, Status::Failed)),
            AdviserResponse::Retry { wait_ms: 200 }
        );

        f.execution.retry_ids.push("r1".to_string());
        assert!(!RetryAdviser.can_advise(&f.event(Status::Running, Status::Failed)));
    }

    #[test]
    fn test_failure_type_filter() {
        let f = Fixture::new(json!({"failureTypes": ["AUTHENTICATION"]}));
        assert!(!OnFailAdviser.can_advise(&f.event(Status::Running, Status::Failed)));

        let f = Fixture::new(json!({"failureTypes": ["CONNECTIVITY"]}));
        assert_eq!(
            OnFailAdviser.on_advise(&f.event(Status::Running, Status::Failed)),
            AdviserResponse::NextStep {
                next_node_id: "cleanup".to_string()
            }
        );
    }

    #[test]
    fn test_intervention_does_not_repeat() {
        let f = Fixture::new(json!({"timeoutMs": 1000}));
        assert!(ManualInterventionAdviser.can_advise(&f.event(Status::Running, Status::Failed)));
        assert!(!ManualInterventionAdviser
            .can_advise(&f.event(Status::InterventionWaiting, Status::Expired)));
    }

    #[test]
    fn test_invalid_parameters_disable_adviser() {
        let f = Fixture::new(json!({"maxAttempts": "many"}));
        assert!(!RetryAdviser.can_advise(&f.event(Status::Running, Status::Failed)));
    }

    #[test]
    fn test_default_response() {
        assert_eq!(default_response(Status::Succeeded), None);
        assert_eq!(
            default_response(Status::Failed),
            Some(AdviserResponse::MarkAsFailure { next_node_id: None })
        );
    }
}
