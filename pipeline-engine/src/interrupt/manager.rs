// Interrupt Manager
// Registers interrupts and applies them. Interrupts on the same target are
// applied one at a time in registration order; different targets run
// concurrently.

use super::models::{Interrupt, InterruptState, InterruptType};
use crate::engine::interventions::EffectSource;
use crate::engine::{DiscontinueMode, OrchestrationEngine};
use crate::error::{EngineError, EngineResult};
use crate::execution::{FailureInfo, FailureType, Status};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{watch, Mutex as TargetLock};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

/// Whether applying an interrupt changed anything
enum Applied {
    Changed,
    NothingToDo,
}

/// Registers and processes interrupts
pub struct InterruptManager {
    engine: Arc<OrchestrationEngine>,
    locks: Mutex<HashMap<String, Arc<TargetLock<()>>>>,
}

impl InterruptManager {
    pub fn new(engine: Arc<OrchestrationEngine>) -> Self {
        Self {
            engine,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Record an interrupt against a plan or node execution id.
    ///
    /// The interrupt is applied by the next [`process_interrupts`](Self::process_interrupts).
    pub async fn register_interrupt(
        &self,
        interrupt_type: InterruptType,
        target_id: &str,
        metadata: BTreeMap<String, String>,
        issued_by: &str,
    ) -> EngineResult<Interrupt> {
        let store = self.engine.store();
        let interrupt = if let Some(node) = store.get_node_execution(target_id).await? {
            Interrupt::new(interrupt_type, node.plan_execution_id, Some(node.uuid))
        } else if let Some(execution) = store.get_plan_execution(target_id).await? {
            Interrupt::new(interrupt_type, execution.uuid, None)
        } else {
            return Err(EngineError::not_found("interrupt target", target_id));
        };

        let needs_node = !matches!(
            interrupt_type,
            InterruptType::Abort | InterruptType::Pause | InterruptType::Resume
        );
        if needs_node && interrupt.node_execution_id.is_none() {
            return Err(EngineError::interrupt(
                &interrupt.uuid,
                format!("{} needs a node execution target", interrupt_type),
            ));
        }

        let interrupt = interrupt.with_metadata(metadata).with_issuer(issued_by);
        store.insert_interrupt(&interrupt).await?;
        info!(
            interrupt = %interrupt.uuid,
            interrupt_type = %interrupt_type,
            target = target_id,
            issued_by,
            "interrupt registered"
        );
        Ok(interrupt)
    }

    pub async fn interrupts_for(&self, plan_execution_id: &str) -> EngineResult<Vec<Interrupt>> {
        self.engine
            .store()
            .find_interrupts_for_plan(plan_execution_id)
            .await
    }

    /// Apply every REGISTERED interrupt. Returns the interrupts this call
    /// processed, in registration order, with their final state.
    pub async fn process_interrupts(self: &Arc<Self>) -> EngineResult<Vec<Interrupt>> {
        let registered = self
            .engine
            .store()
            .find_interrupts_by_state(InterruptState::Registered)
            .await?;
        if registered.is_empty() {
            return Ok(Vec::new());
        }

        let mut order: HashMap<String, usize> = HashMap::new();
        let mut groups: Vec<(String, Vec<Interrupt>)> = Vec::new();
        for interrupt in registered {
            let target = interrupt.target_id().to_string();
            let index = *order.entry(target.clone()).or_insert_with(|| {
                groups.push((target, Vec::new()));
                groups.len() - 1
            });
            groups[index].1.push(interrupt);
        }

        let mut tasks = JoinSet::new();
        for (target, batch) in groups {
            let manager = self.clone();
            tasks.spawn(async move { manager.process_target(target, batch).await });
        }

        let mut processed = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(batch)) => processed.extend(batch),
                Ok(Err(e)) => warn!(error = %e, "interrupt batch failed"),
                Err(e) => warn!(error = %e, "interrupt task panicked"),
            }
        }
        processed.sort_by_key(|i| i.sequence);
        Ok(processed)
    }

    /// Poll for interrupts until `shutdown` turns true
    pub fn spawn(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(manager.engine.config().interrupt_poll_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = manager.process_interrupts().await {
                            warn!(error = %e, "interrupt processing failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    fn target_lock(&self, target: &str) -> EngineResult<Arc<TargetLock<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| EngineError::Store("interrupt lock table poisoned".to_string()))?;
        Ok(locks.entry(target.to_string()).or_default().clone())
    }

    fn release_lock(&self, target: &str) {
        if let Ok(mut locks) = self.locks.lock() {
            if locks.get(target).map_or(false, |l| Arc::strong_count(l) == 1) {
                locks.remove(target);
            }
        }
    }

    async fn process_target(&self, target: String, batch: Vec<Interrupt>) -> EngineResult<Vec<Interrupt>> {
        let lock = self.target_lock(&target)?;
        let mut processed = Vec::with_capacity(batch.len());
        {
            let _guard = lock.lock().await;
            for interrupt in batch {
                if let Some(done) = self.process_one(interrupt).await? {
                    processed.push(done);
                }
            }
        }
        drop(lock);
        self.release_lock(&target);
        Ok(processed)
    }

    async fn process_one(&self, interrupt: Interrupt) -> EngineResult<Option<Interrupt>> {
        let Some(claimed) = self.claim(interrupt).await? else {
            return Ok(None);
        };
        debug!(
            interrupt = %claimed.uuid,
            interrupt_type = %claimed.interrupt_type,
            target = claimed.target_id(),
            "processing interrupt"
        );

        let execution = self.engine.plan_execution(&claimed.plan_execution_id).await?;
        if execution.status.is_terminal() {
            let reason = format!("plan execution already {}", execution.status);
            return self
                .finish(claimed, InterruptState::Discarded, Some(reason))
                .await
                .map(Some);
        }

        let (state, reason) = match self.apply(&claimed).await {
            Ok(Applied::Changed) => (InterruptState::ProcessedSuccessfully, None),
            Ok(Applied::NothingToDo) => (
                InterruptState::Discarded,
                Some("target no longer active".to_string()),
            ),
            Err(e) => {
                warn!(interrupt = %claimed.uuid, error = %e, "interrupt could not be applied");
                (InterruptState::ProcessedUnsuccessfully, Some(e.to_string()))
            }
        };
        self.finish(claimed, state, reason).await.map(Some)
    }

    async fn apply(&self, interrupt: &Interrupt) -> EngineResult<Applied> {
        let engine = &self.engine;
        let source = EffectSource::new(&interrupt.uuid, interrupt.interrupt_type);
        let plan_execution_id = interrupt.plan_execution_id.as_str();
        let node = interrupt.node_execution_id.as_deref();

        let required_node = || {
            node.ok_or_else(|| EngineError::interrupt(&interrupt.uuid, "missing node target"))
        };

        match interrupt.interrupt_type {
            InterruptType::Abort => {
                let mode = match node {
                    Some(id) => DiscontinueMode::AbortSubtree(id.to_string()),
                    None => DiscontinueMode::AbortAll,
                };
                let aborted = engine
                    .discontinue_with(plan_execution_id, mode, Some(&source))
                    .await?;
                Ok(if aborted == 0 && node.is_some() {
                    Applied::NothingToDo
                } else {
                    Applied::Changed
                })
            }
            InterruptType::Pause => {
                engine.pause(plan_execution_id, node, &source).await?;
                Ok(Applied::Changed)
            }
            InterruptType::Resume => {
                engine.resume(plan_execution_id, node, &source).await?;
                Ok(Applied::Changed)
            }
            InterruptType::Retry => {
                engine.retry(required_node()?, &source).await?;
                Ok(Applied::Changed)
            }
            InterruptType::MarkSuccess => {
                engine
                    .force_status(required_node()?, Status::Succeeded, None, &source)
                    .await?;
                Ok(Applied::Changed)
            }
            InterruptType::MarkFailed => {
                let failure = FailureInfo::new(
                    FailureType::Interrupted,
                    format!("marked failed by {}", interrupt.issued_by),
                );
                engine
                    .force_status(required_node()?, Status::Failed, Some(failure), &source)
                    .await?;
                Ok(Applied::Changed)
            }
            InterruptType::Ignore => {
                engine
                    .force_status(required_node()?, Status::IgnoreFailed, None, &source)
                    .await?;
                Ok(Applied::Changed)
            }
            InterruptType::CustomFailure => {
                engine
                    .force_status(
                        required_node()?,
                        Status::Failed,
                        Some(custom_failure(&interrupt.metadata)),
                        &source,
                    )
                    .await?;
                Ok(Applied::Changed)
            }
        }
    }

    /// REGISTERED -> PROCESSING; `None` if another processor got there first
    async fn claim(&self, mut interrupt: Interrupt) -> EngineResult<Option<Interrupt>> {
        let store = self.engine.store();
        for _ in 0..self.engine.config().max_version_retries {
            if interrupt.state != InterruptState::Registered {
                return Ok(None);
            }
            let mut next = interrupt.clone();
            next.state = InterruptState::Processing;
            next.last_updated_at = Utc::now();
            if let Some(saved) = store.update_interrupt(&next).await? {
                return Ok(Some(saved));
            }
            interrupt = match store.get_interrupt(&interrupt.uuid).await? {
                Some(current) => current,
                None => return Ok(None),
            };
        }
        Ok(None)
    }

    async fn finish(
        &self,
        mut interrupt: Interrupt,
        state: InterruptState,
        reason: Option<String>,
    ) -> EngineResult<Interrupt> {
        let store = self.engine.store();
        let attempts = self.engine.config().max_version_retries;
        for _ in 0..attempts {
            let mut next = interrupt.clone();
            next.state = state;
            next.failure_reason = reason.clone();
            next.last_updated_at = Utc::now();
            if let Some(saved) = store.update_interrupt(&next).await? {
                info!(interrupt = %saved.uuid, state = ?saved.state, "interrupt processed");
                return Ok(saved);
            }
            interrupt = store
                .get_interrupt(&interrupt.uuid)
                .await?
                .ok_or_else(|| EngineError::not_found("interrupt", &interrupt.uuid))?;
        }
        Err(EngineError::ConcurrentModification {
            entity: "interrupt",
            id: interrupt.uuid,
            attempts,
        })
    }
}

/// Failure described by CUSTOM_FAILURE metadata (`failureType`, `message`)
fn custom_failure(metadata: &BTreeMap<String, String>) -> FailureInfo {
    let failure_type = metadata
        .get("failureType")
        .and_then(|t| serde_json::from_value(Value::String(t.clone())).ok())
        .unwrap_or(FailureType::Unknown);
    let message = metadata
        .get("message")
        .cloned()
        .unwrap_or_else(|| "custom failure".to_string());
    FailureInfo::new(failure_type, message)
}
