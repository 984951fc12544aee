// Events Module
// Orchestration lifecycle events and the observer bus that fans them out

pub mod subject;

pub use subject::{AsyncObserver, OrchestrationSubject, SubjectBuilder, SyncObserver};

use crate::execution::{NodeExecution, PlanExecution, PlanStatus, Status};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

/// Sender for orchestration events
pub type ProgressSender = mpsc::UnboundedSender<OrchestrationEvent>;

/// Receiver for orchestration events
pub type ProgressReceiver = mpsc::UnboundedReceiver<OrchestrationEvent>;

/// Create a new progress channel
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Kinds of events, used to index observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrchestrationEventType {
    OrchestrationStart,
    OrchestrationEnd,
    NodeStart,
    NodeStatusUpdate,
    InterventionWaitStart,
}

impl OrchestrationEventType {
    pub const ALL: [OrchestrationEventType; 5] = [
        OrchestrationEventType::OrchestrationStart,
        OrchestrationEventType::OrchestrationEnd,
        OrchestrationEventType::NodeStart,
        OrchestrationEventType::NodeStatusUpdate,
        OrchestrationEventType::InterventionWaitStart,
    ];
}

/// Events emitted while a plan executes
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrchestrationEvent {
    /// A plan execution started
    #[serde(rename_all = "camelCase")]
    OrchestrationStart {
        plan_execution_id: String,
        plan_id: String,
        emitted_at: DateTime<Utc>,
    },

    /// A plan execution reached a terminal status
    #[serde(rename_all = "camelCase")]
    OrchestrationEnd {
        plan_execution_id: String,
        status: PlanStatus,
        emitted_at: DateTime<Utc>,
    },

    /// A node execution started running
    #[serde(rename_all = "camelCase")]
    NodeStart {
        plan_execution_id: String,
        node_execution_id: String,
        plan_node_id: String,
        emitted_at: DateTime<Utc>,
    },

    /// A node execution changed status
    #[serde(rename_all = "camelCase")]
    NodeStatusUpdate {
        plan_execution_id: String,
        node_execution_id: String,
        plan_node_id: String,
        from: Status,
        to: Status,
        emitted_at: DateTime<Utc>,
    },

    /// A node is parked for manual intervention
    #[serde(rename_all = "camelCase")]
    InterventionWaitStart {
        plan_execution_id: String,
        node_execution_id: String,
        plan_node_id: String,
        emitted_at: DateTime<Utc>,
    },
}

impl OrchestrationEvent {
    /// Create an orchestration start event
    pub fn orchestration_start(execution: &PlanExecution) -> Self {
        Self::OrchestrationStart {
            plan_execution_id: execution.uuid.clone(),
            plan_id: execution.plan_id.clone(),
            emitted_at: Utc::now(),
        }
    }

    /// Create an orchestration end event
    pub fn orchestration_end(execution: &PlanExecution) -> Self {
        Self::OrchestrationEnd {
            plan_execution_id: execution.uuid.clone(),
            status: execution.status,
            emitted_at: Utc::now(),
        }
    }

    /// Create a node start event
    pub fn node_start(node: &NodeExecution) -> Self {
        Self::NodeStart {
            plan_execution_id: node.plan_execution_id.clone(),
            node_execution_id: node.uuid.clone(),
            plan_node_id: node.plan_node_id.clone(),
            emitted_at: Utc::now(),
        }
    }

    /// Create a node status update event
    pub fn node_status_update(node: &NodeExecution, from: Status) -> Self {
        Self::NodeStatusUpdate {
            plan_execution_id: node.plan_execution_id.clone(),
            node_execution_id: node.uuid.clone(),
            plan_node_id: node.plan_node_id.clone(),
            from,
            to: node.status,
            emitted_at: Utc::now(),
        }
    }

    /// Create an intervention wait start event
    pub fn intervention_wait_start(node: &NodeExecution) -> Self {
        Self::InterventionWaitStart {
            plan_execution_id: node.plan_execution_id.clone(),
            node_execution_id: node.uuid.clone(),
            plan_node_id: node.plan_node_id.clone(),
            emitted_at: Utc::now(),
        }
    }

    pub fn event_type(&self) -> OrchestrationEventType {
        match self {
            Self::OrchestrationStart { .. } => OrchestrationEventType::OrchestrationStart,
            Self::OrchestrationEnd { .. } => OrchestrationEventType::OrchestrationEnd,
            Self::NodeStart { .. } => OrchestrationEventType::NodeStart,
            Self::NodeStatusUpdate { .. } => OrchestrationEventType::NodeStatusUpdate,
            Self::InterventionWaitStart { .. } => OrchestrationEventType::InterventionWaitStart,
        }
    }

    pub fn plan_execution_id(&self) -> &str {
        match self {
            Self::OrchestrationStart {
                plan_execution_id, ..
            }
            | Self::OrchestrationEnd {
                plan_execution_id, ..
            }
            | Self::NodeStart {
                plan_execution_id, ..
            }
            | Self::NodeStatusUpdate {
                plan_execution_id, ..
            }
            | Self::InterventionWaitStart {
                plan_execution_id, ..
            } => plan_execution_id,
        }
    }
}

/// Helper trait for sending events, ignoring errors (fire-and-forget)
pub trait EventSender {
    fn send_event(&self, event: OrchestrationEvent);
}

impl EventSender for ProgressSender {
    fn send_event(&self, event: OrchestrationEvent) {
        let _ = self.send(event);
    }
}

impl EventSender for Option<ProgressSender> {
    fn send_event(&self, event: OrchestrationEvent) {
        if let Some(sender) = self {
            let _ = sender.send(event);
        }
    }
}

/// Sync observer forwarding every event into a progress channel
pub struct ChannelObserver {
    sender: ProgressSender,
}

impl ChannelObserver {
    pub fn new(sender: ProgressSender) -> Self {
        Self { sender }
    }
}

impl SyncObserver for ChannelObserver {
    fn on_event(&self, event: &OrchestrationEvent) {
        self.sender.send_event(event.clone());
    }
}
