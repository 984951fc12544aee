// Wait/Notify Models
// Correlation bindings, notify payloads and early-notify bookkeeping

use crate::delegate::TaskResult;
use crate::execution::models::new_id;
use crate::execution::{FailureInfo, Status};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use std::collections::BTreeMap;

/// Payload delivered for one correlation id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseData {
    /// A remote task finished
    Task { result: TaskResult },
    /// A child branch ended
    #[serde(rename_all = "camelCase")]
    NodeCompleted {
        node_execution_id: String,
        status: Status,
    },
    /// An external signal for an ASYNC step
    Signal { payload: Value },
    /// The producer failed before it could respond
    Error { failure: FailureInfo },
}

/// Responses keyed by correlation id
pub type ResponseMap = BTreeMap<String, ResponseData>;

/// A registered callback waiting on one or more correlation ids
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitInstance {
    pub uuid: String,
    /// Namespace of the handler that receives the callback
    pub publisher: String,
    /// Opaque data handed back to the handler
    pub callback: Value,
    pub correlation_ids: Vec<String>,
    pub responses: ResponseMap,
    pub created_at: DateTime<Utc>,
    pub version: u64,
}

impl WaitInstance {
    pub fn new(publisher: impl Into<String>, callback: Value, correlation_ids: Vec<String>) -> Self {
        Self {
            uuid: new_id(),
            publisher: publisher.into(),
            callback,
            correlation_ids,
            responses: ResponseMap::new(),
            created_at: Utc::now(),
            version: 0,
        }
    }

    /// Every correlation id has reported
    pub fn is_complete(&self) -> bool {
        self.correlation_ids
            .iter()
            .all(|id| self.responses.contains_key(id))
    }

    pub fn missing(&self) -> Vec<&str> {
        self.correlation_ids
            .iter()
            .filter(|id| !self.responses.contains_key(*id))
            .map(String::as_str)
            .collect()
    }
}

/// A notify that arrived before its binding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingNotify {
    pub correlation_id: String,
    pub data: ResponseData,
    pub first_seen: DateTime<Utc>,
    pub attempts: u32,
}

/// A notify that never met its binding before the TTL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnresolvedCorrelation {
    pub correlation_id: String,
    pub first_seen: DateTime<Utc>,
    pub expired_at: DateTime<Utc>,
    pub attempts: u32,
}

/// What happened to a single notify call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// Response recorded, other correlation ids still outstanding
    Accepted,
    /// Last response recorded; the callback was dispatched
    Fired,
    /// Correlation id already reported (redelivery)
    Duplicate,
    /// Correlation id was cancelled or already fired; the notify is dropped
    Discarded,
    /// No binding yet; held for redelivery
    Pending,
}
