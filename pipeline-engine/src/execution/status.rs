// Execution Status
// Node/plan status enums and the partial order that governs transitions

use serde::{Deserialize, Serialize};

use std::fmt;

/// Runtime status of a node execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Queued,
    /// Executing, including while suspended on a correlation registration
    Running,
    Paused,
    InterventionWaiting,
    /// An abort is walking this node's subtree
    Discontinuing,
    Succeeded,
    /// A failure overridden by IGNORE; counts as success downstream
    IgnoreFailed,
    Failed,
    Errored,
    Expired,
    Aborted,
    Skipped,
}

impl Status {
    pub const TERMINAL: [Status; 7] = [
        Status::Succeeded,
        Status::IgnoreFailed,
        Status::Failed,
        Status::Errored,
        Status::Expired,
        Status::Aborted,
        Status::Skipped,
    ];

    pub const ACTIVE: [Status; 5] = [
        Status::Queued,
        Status::Running,
        Status::Paused,
        Status::InterventionWaiting,
        Status::Discontinuing,
    ];

    pub fn is_terminal(self) -> bool {
        Self::TERMINAL.contains(&self)
    }

    pub fn is_active(self) -> bool {
        Self::ACTIVE.contains(&self)
    }

    /// Terminal statuses that let the branch continue
    pub fn is_positive(self) -> bool {
        matches!(self, Status::Succeeded | Status::IgnoreFailed | Status::Skipped)
    }

    /// Failure statuses an adviser may retry or send to intervention
    pub fn is_broke(self) -> bool {
        matches!(self, Status::Failed | Status::Errored | Status::Expired)
    }

    /// Natural (non-interrupt) transitions allowed by the partial order.
    ///
    /// Terminal statuses never go back to a running state; a retry creates a
    /// new node execution instead. The single exception is a broken node
    /// parked for manual intervention.
    pub fn can_transition_to(self, next: Status) -> bool {
        match self {
            Status::Queued => next != Status::Queued,
            Status::Running => !matches!(next, Status::Queued | Status::Running),
            Status::Paused => !matches!(next, Status::Queued | Status::Paused),
            Status::InterventionWaiting => next.is_terminal() || next == Status::Discontinuing,
            Status::Discontinuing => next.is_terminal(),
            _ if self.is_broke() => next == Status::InterventionWaiting,
            _ => false,
        }
    }

    /// Transitions an interrupt may force; these are always audited
    pub fn can_force_to(self, next: Status) -> bool {
        self != next && next.is_terminal() && (self.is_active() || self.is_terminal())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Queued => "QUEUED",
            Status::Running => "RUNNING",
            Status::Paused => "PAUSED",
            Status::InterventionWaiting => "INTERVENTION_WAITING",
            Status::Discontinuing => "DISCONTINUING",
            Status::Succeeded => "SUCCEEDED",
            Status::IgnoreFailed => "IGNORE_FAILED",
            Status::Failed => "FAILED",
            Status::Errored => "ERRORED",
            Status::Expired => "EXPIRED",
            Status::Aborted => "ABORTED",
            Status::Skipped => "SKIPPED",
        }
    }
}

/// Overall outcome of a set of terminal node statuses: the most severe wins.
/// Returns `None` when nothing has finished.
pub fn aggregate_status<I>(statuses: I) -> Option<Status>
where
    I: IntoIterator<Item = Status>,
{
    fn severity(status: Status) -> u8 {
        match status {
            Status::Skipped => 0,
            Status::Succeeded => 1,
            Status::IgnoreFailed => 2,
            Status::Failed => 3,
            Status::Expired => 4,
            Status::Errored => 5,
            Status::Aborted => 6,
            _ => 0,
        }
    }

    statuses
        .into_iter()
        .filter(|s| s.is_terminal())
        .max_by_key(|s| severity(*s))
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Status of a whole plan execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanStatus {
    Running,
    Paused,
    Succeeded,
    Failed,
    Aborted,
    Errored,
}

impl PlanStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, PlanStatus::Running | PlanStatus::Paused)
    }

    /// Plan outcome implied by the status of the node that ended it
    pub fn from_node_status(status: Status) -> Self {
        match status {
            Status::Succeeded | Status::IgnoreFailed | Status::Skipped => PlanStatus::Succeeded,
            Status::Failed | Status::Expired => PlanStatus::Failed,
            Status::Aborted => PlanStatus::Aborted,
            Status::Errored => PlanStatus::Errored,
            Status::Paused => PlanStatus::Paused,
            _ => PlanStatus::Running,
        }
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlanStatus::Running => "RUNNING",
            PlanStatus::Paused => "PAUSED",
            PlanStatus::Succeeded => "SUCCEEDED",
            PlanStatus::Failed => "FAILED",
            PlanStatus::Aborted => "ABORTED",
            PlanStatus::Errored => "ERRORED",
        };
        f.write_str(s)
    }
}

/// Classification of a step failure, used by failure-type-aware advisers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureType {
    Unknown,
    Application,
    Connectivity,
    Authentication,
    Authorization,
    Verification,
    DelegateProvisioning,
    Expired,
    Policy,
    Interrupted,
}

/// Why a node failed
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureInfo {
    pub failure_types: Vec<FailureType>,
    pub message: String,
}

impl FailureInfo {
    pub fn new(failure_type: FailureType, message: impl Into<String>) -> Self {
        Self {
            failure_types: vec![failure_type],
            message: message.into(),
        }
    }

    /// An empty `wanted` set matches any failure
    pub fn matches_any(&self, wanted: &[FailureType]) -> bool {
        wanted.is_empty() || self.failure_types.iter().any(|t| wanted.contains(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_status_picks_most_severe() {
        assert_eq!(aggregate_status(Vec::new()), None);
        assert_eq!(
            aggregate_status([Status::Succeeded, Status::IgnoreFailed]),
            Some(Status::IgnoreFailed)
        );
        assert_eq!(
            aggregate_status([Status::Failed, Status::Succeeded, Status::Running]),
            Some(Status::Failed)
        );
        assert_eq!(
            aggregate_status([Status::Errored, Status::Aborted]),
            Some(Status::Aborted)
        );
    }

    #[test]
    fn test_terminal_statuses_do_not_restart() {
        for status in Status::TERMINAL {
            assert!(!status.can_transition_to(Status::Running), "{status}");
            assert!(!status.can_transition_to(Status::Queued), "{status}");
        }
    }

    #[test]
    fn test_broken_node_may_wait_for_intervention() {
        assert!(Status::Failed.can_transition_to(Status::InterventionWaiting));
        assert!(Status::Expired.can_transition_to(Status::InterventionWaiting));
        assert!(!Status::Succeeded.can_transition_to(Status::InterventionWaiting));
        assert!(Status::InterventionWaiting.can_transition_to(Status::Expired));
        assert!(!Status::InterventionWaiting.can_transition_to(Status::Running));
    }

    #[test]
    fn test_pause_toggles() {
        assert!(Status::Running.can_transition_to(Status::Paused));
        assert!(Status::Paused.can_transition_to(Status::Running));
        assert!(!Status::Paused.can_transition_to(Status::Paused));
    }

    #[test]
    fn test_forced_transitions() {
        assert!(Status::Failed.can_force_to(Status::Succeeded));
        assert!(Status::InterventionWaiting.can_force_to(Status::IgnoreFailed));
        assert!(!Status::Running.can_force_to(Status::Paused));
        assert!(!Status::Failed.can_force_to(Status::Failed));
    }

    #[test]
    fn test_empty_failure_filter_matches_anything() {
        let info = FailureInfo::new(FailureType::Connectivity, "connection reset");
        assert!(info.matches_any(&[]));
        assert!(info.matches_any(&[FailureType::Connectivity]));
        assert!(!info.matches_any(&[FailureType::Authentication]));
    }

    #[test]
    fn test_plan_status_mapping() {
        assert_eq!(PlanStatus::from_node_status(Status::IgnoreFailed), PlanStatus::Succeeded);
        assert_eq!(PlanStatus::from_node_status(Status::Expired), PlanStatus::Failed);
        assert!(PlanStatus::Aborted.is_terminal());
        assert!(!PlanStatus::Paused.is_terminal());
    }

    #[test]
    fn test_status_serde_names() {
        let json = serde_json::to_string(&Status::InterventionWaiting).unwrap();
        assert_eq!(json, "\"INTERVENTION_WAITING\"");
    }
}
