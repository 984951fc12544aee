// Interrupt Models

use crate::execution::models::new_id;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Externally requested action on a running plan or node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterruptType {
    Abort,
    Pause,
    Resume,
    Retry,
    MarkSuccess,
    MarkFailed,
    Ignore,
    CustomFailure,
}

impl InterruptType {
    pub fn as_str(self) -> &'static str {
        match self {
            InterruptType::Abort => "ABORT",
            InterruptType::Pause => "PAUSE",
            InterruptType::Resume => "RESUME",
            InterruptType::Retry => "RETRY",
            InterruptType::MarkSuccess => "MARK_SUCCESS",
            InterruptType::MarkFailed => "MARK_FAILED",
            InterruptType::Ignore => "IGNORE",
            InterruptType::CustomFailure => "CUSTOM_FAILURE",
        }
    }
}

impl fmt::Display for InterruptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processing lifecycle of an interrupt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterruptState {
    Registered,
    Processing,
    ProcessedSuccessfully,
    ProcessedUnsuccessfully,
    /// Nothing left to apply it to
    Discarded,
}

impl InterruptState {
    pub fn is_final(self) -> bool {
        matches!(
            self,
            InterruptState::ProcessedSuccessfully
                | InterruptState::ProcessedUnsuccessfully
                | InterruptState::Discarded
        )
    }
}

/// A persisted interrupt request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interrupt {
    pub uuid: String,
    pub interrupt_type: InterruptType,
    pub plan_execution_id: String,
    /// Target node; `None` targets the whole plan execution
    pub node_execution_id: Option<String>,
    pub state: InterruptState,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub issued_by: String,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    /// Registration order, breaks ties between equal timestamps
    pub sequence: u64,
    pub version: u64,
}

impl Interrupt {
    pub fn new(
        interrupt_type: InterruptType,
        plan_execution_id: impl Into<String>,
        node_execution_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            uuid: new_id(),
            interrupt_type,
            plan_execution_id: plan_execution_id.into(),
            node_execution_id,
            state: InterruptState::Registered,
            metadata: BTreeMap::new(),
            issued_by: "system".to_string(),
            failure_reason: None,
            created_at: now,
            last_updated_at: now,
            sequence: SEQUENCE.fetch_add(1, Ordering::SeqCst),
            version: 0,
        }
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_issuer(mut self, issued_by: impl Into<String>) -> Self {
        self.issued_by = issued_by.into();
        self
    }

    /// Id of the record the interrupt acts on
    pub fn target_id(&self) -> &str {
        self.node_execution_id
            .as_deref()
            .unwrap_or(&self.plan_execution_id)
    }
}
