// Wait/Notify Engine
// Registers callbacks against correlation ids and fires each callback exactly
// once when every id it waits on has reported

use super::models::{
    NotifyOutcome, PendingNotify, ResponseData, ResponseMap, UnresolvedCorrelation, WaitInstance,
};
use crate::error::{EngineError, EngineResult};
use crate::registry::Registry;
use crate::store::ExecutionStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Receives the aggregated responses of a completed wait instance
#[async_trait]
pub trait NotifyCallback: Send + Sync {
    async fn notify(&self, callback: Value, responses: ResponseMap);
}

/// Correlation engine over the persisted wait instances
pub struct WaitNotifyEngine {
    store: Arc<dyn ExecutionStore>,
    callbacks: Registry<dyn NotifyCallback>,
    max_retries: u32,
    notify_ttl: Duration,
    unresolved: Mutex<Vec<UnresolvedCorrelation>>,
}

impl WaitNotifyEngine {
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        callbacks: Registry<dyn NotifyCallback>,
        max_retries: u32,
        notify_ttl: Duration,
    ) -> Self {
        Self {
            store,
            callbacks,
            max_retries: max_retries.max(1),
            notify_ttl,
            unresolved: Mutex::new(Vec::new()),
        }
    }

    /// Register `callback` under `publisher` until every correlation id has
    /// reported. Returns the wait instance id without blocking.
    pub async fn wait_for_all_on(
        &self,
        publisher: &str,
        callback: Value,
        correlation_ids: Vec<String>,
    ) -> EngineResult<String> {
        let handler = self.callbacks.obtain(publisher)?;

        if correlation_ids.is_empty() {
            tokio::spawn(async move { handler.notify(callback, ResponseMap::new()).await });
            return Ok(String::new());
        }

        let wait = WaitInstance::new(publisher, callback, correlation_ids);
        self.store.insert_wait_instance(&wait).await?;
        debug!(
            wait_id = %wait.uuid,
            publisher,
            correlation_ids = ?wait.correlation_ids,
            "registered wait instance"
        );

        // Deliver notifies that raced ahead of the registration
        let early: Vec<PendingNotify> = self
            .store
            .find_pending_notifies()
            .await?
            .into_iter()
            .filter(|p| wait.correlation_ids.contains(&p.correlation_id))
            .collect();
        for pending in early {
            self.store.delete_pending_notify(&pending.correlation_id).await?;
            self.notify(&pending.correlation_id, pending.data).await?;
        }

        Ok(wait.uuid)
    }

    /// Record the response for one correlation id.
    ///
    /// Idempotent per correlation id; duplicates and notifies for cancelled
    /// ids are accepted and dropped.
    pub async fn notify(
        &self,
        correlation_id: &str,
        data: ResponseData,
    ) -> EngineResult<NotifyOutcome> {
        if self.store.is_correlation_retired(correlation_id).await? {
            debug!(correlation_id, "discarding notify for retired correlation");
            return Ok(NotifyOutcome::Discarded);
        }

        for _ in 0..self.max_retries {
            let Some(mut wait) = self.store.find_wait_instance(correlation_id).await? else {
                return self.hold_early_notify(correlation_id, data).await;
            };

            if wait.responses.contains_key(correlation_id) {
                debug!(correlation_id, "duplicate notify");
                return Ok(NotifyOutcome::Duplicate);
            }

            wait.responses
                .insert(correlation_id.to_string(), data.clone());

            let Some(saved) = self.store.update_wait_instance(&wait).await? else {
                continue;
            };

            if !saved.is_complete() {
                return Ok(NotifyOutcome::Accepted);
            }

            // Only the caller that removes the instance dispatches the callback
            if self.store.delete_wait_instance(&saved.uuid).await? {
                self.store
                    .add_retired_correlations(&saved.correlation_ids)
                    .await?;
                self.dispatch(saved)?;
                return Ok(NotifyOutcome::Fired);
            }
            return Ok(NotifyOutcome::Duplicate);
        }

        Err(EngineError::ConcurrentModification {
            entity: "wait instance",
            id: correlation_id.to_string(),
            attempts: self.max_retries,
        })
    }

    async fn hold_early_notify(
        &self,
        correlation_id: &str,
        data: ResponseData,
    ) -> EngineResult<NotifyOutcome> {
        let pending = PendingNotify {
            correlation_id: correlation_id.to_string(),
            data,
            first_seen: Utc::now(),
            attempts: 1,
        };
        let pending = match self
            .store
            .find_pending_notifies()
            .await?
            .into_iter()
            .find(|p| p.correlation_id == correlation_id)
        {
            Some(existing) => PendingNotify {
                attempts: existing.attempts + 1,
                first_seen: existing.first_seen,
                ..pending
            },
            None => pending,
        };
        debug!(correlation_id, attempts = pending.attempts, "holding early notify");
        self.store.save_pending_notify(&pending).await?;
        Ok(NotifyOutcome::Pending)
    }

    fn dispatch(&self, wait: WaitInstance) -> EngineResult<()> {
        let handler = self.callbacks.obtain(&wait.publisher)?;
        debug!(wait_id = %wait.uuid, publisher = %wait.publisher, "firing callback");
        tokio::spawn(async move { handler.notify(wait.callback, wait.responses).await });
        Ok(())
    }

    /// Drop the bindings holding any of `correlation_ids`.
    ///
    /// All ids of an affected binding are remembered as cancelled so late
    /// notifies for them are discarded. Returns the number of removed bindings.
    pub async fn cancel(&self, correlation_ids: &[String]) -> EngineResult<usize> {
        let mut cancelled: Vec<String> = correlation_ids.to_vec();
        let mut removed = 0;

        for correlation_id in correlation_ids {
            if let Some(wait) = self.store.find_wait_instance(correlation_id).await? {
                if self.store.delete_wait_instance(&wait.uuid).await? {
                    removed += 1;
                }
                cancelled.extend(wait.correlation_ids);
            }
        }

        cancelled.sort();
        cancelled.dedup();
        self.store.add_retired_correlations(&cancelled).await?;
        for correlation_id in &cancelled {
            self.store.delete_pending_notify(correlation_id).await?;
        }
        if removed > 0 {
            debug!(removed, correlation_ids = ?cancelled, "cancelled wait instances");
        }
        Ok(removed)
    }

    /// Whether some binding still waits on `correlation_id`
    pub async fn is_registered(&self, correlation_id: &str) -> EngineResult<bool> {
        Ok(self.store.find_wait_instance(correlation_id).await?.is_some())
    }

    /// Retry held notifies; those older than the TTL become unresolved
    pub async fn sweep_pending(
        &self,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<UnresolvedCorrelation>> {
        let mut expired = Vec::new();

        for pending in self.store.find_pending_notifies().await? {
            let id = pending.correlation_id.as_str();

            let age = (now - pending.first_seen).to_std().unwrap_or_default();

            if self.store.is_correlation_retired(id).await? {
                self.store.delete_pending_notify(id).await?;
            } else if self.store.find_wait_instance(id).await?.is_some() {
                self.store.delete_pending_notify(id).await?;
                self.notify(id, pending.data.clone()).await?;
            } else if age > self.notify_ttl {
                self.store.delete_pending_notify(id).await?;
                warn!(
                    attempts = pending.attempts,
                    "{}",
                    EngineError::CorrelationTimeout(id.to_string())
                );
                expired.push(UnresolvedCorrelation {
                    correlation_id: pending.correlation_id.clone(),
                    first_seen: pending.first_seen,
                    expired_at: now,
                    attempts: pending.attempts,
                });
            } else {
                let retried = PendingNotify {
                    attempts: pending.attempts + 1,
                    ..pending
                };
                self.store.save_pending_notify(&retried).await?;
            }
        }

        if !expired.is_empty() {
            self.unresolved
                .lock()
                .map_err(|e| EngineError::Store(format!("lock: {}", e)))?
                .extend(expired.iter().cloned());
        }
        Ok(expired)
    }

    /// Correlations reported unresolved so far
    pub fn unresolved(&self) -> Vec<UnresolvedCorrelation> {
        self.unresolved
            .lock()
            .map(|u| u.clone())
            .unwrap_or_default()
    }
}
