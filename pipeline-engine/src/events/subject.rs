// Orchestration Subject
// Observer registry indexed by event type. Sync observers run inline on the
// emitting task; async observers run on a bounded set of spawned tasks.

use super::{OrchestrationEvent, OrchestrationEventType};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::warn;

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Observer invoked inline, before the engine moves on
pub trait SyncObserver: Send + Sync {
    /// Event types this observer wants; all by default
    fn event_types(&self) -> Vec<OrchestrationEventType> {
        OrchestrationEventType::ALL.to_vec()
    }

    fn on_event(&self, event: &OrchestrationEvent);
}

/// Observer invoked on a background task
#[async_trait]
pub trait AsyncObserver: Send + Sync {
    fn event_types(&self) -> Vec<OrchestrationEventType> {
        OrchestrationEventType::ALL.to_vec()
    }

    async fn on_event(&self, event: OrchestrationEvent);
}

/// Registration phase of the subject
#[derive(Default)]
pub struct SubjectBuilder {
    sync: HashMap<OrchestrationEventType, Vec<Arc<dyn SyncObserver>>>,
    async_: HashMap<OrchestrationEventType, Vec<Arc<dyn AsyncObserver>>>,
}

impl SubjectBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe_sync(&mut self, observer: Arc<dyn SyncObserver>) {
        for event_type in observer.event_types() {
            self.sync.entry(event_type).or_default().push(observer.clone());
        }
    }

    pub fn observe_async(&mut self, observer: Arc<dyn AsyncObserver>) {
        for event_type in observer.event_types() {
            self.async_.entry(event_type).or_default().push(observer.clone());
        }
    }

    /// Freeze the observer lists; at most `workers` async deliveries run at once
    pub fn build(self, workers: usize) -> OrchestrationSubject {
        OrchestrationSubject {
            sync: self.sync,
            async_: self.async_,
            workers: Arc::new(Semaphore::new(workers.max(1))),
        }
    }
}

/// Immutable observer fan-out
pub struct OrchestrationSubject {
    sync: HashMap<OrchestrationEventType, Vec<Arc<dyn SyncObserver>>>,
    async_: HashMap<OrchestrationEventType, Vec<Arc<dyn AsyncObserver>>>,
    workers: Arc<Semaphore>,
}

impl OrchestrationSubject {
    /// Deliver `event` to every observer registered for its type.
    ///
    /// Observer failures are logged and never reach the engine.
    pub fn fire(&self, event: OrchestrationEvent) {
        let event_type = event.event_type();

        if let Some(observers) = self.sync.get(&event_type) {
            for observer in observers {
                let delivered = catch_unwind(AssertUnwindSafe(|| observer.on_event(&event)));
                if delivered.is_err() {
                    warn!(?event_type, "sync observer panicked");
                }
            }
        }

        if let Some(observers) = self.async_.get(&event_type) {
            for observer in observers {
                let observer = observer.clone();
                let event = event.clone();
                let workers = self.workers.clone();
                tokio::spawn(async move {
                    let Ok(_permit) = workers.acquire_owned().await else {
                        return;
                    };
                    observer.on_event(event).await;
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{progress_channel, ChannelObserver, ProgressSender};
    use crate::execution::PlanExecution;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EndsOnly(AtomicUsize);

    impl SyncObserver for EndsOnly {
        fn event_types(&self) -> Vec<OrchestrationEventType> {
            vec![OrchestrationEventType::OrchestrationEnd]
        }

        fn on_event(&self, _event: &OrchestrationEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Panicky;

    impl SyncObserver for Panicky {
        fn on_event(&self, _event: &OrchestrationEvent) {
            panic!("observer failure");
        }
    }

    struct Forward(ProgressSender);

    #[async_trait]
    impl AsyncObserver for Forward {
        async fn on_event(&self, event: OrchestrationEvent) {
            let _ = self.0.send(event);
        }
    }

    #[tokio::test]
    async fn test_observers_are_indexed_by_type() {
        let ends = Arc::new(EndsOnly(AtomicUsize::new(0)));
        let (tx, mut rx) = progress_channel();
        let mut builder = SubjectBuilder::new();
        builder.observe_sync(ends.clone());
        builder.observe_sync(Arc::new(Panicky));
        builder.observe_sync(Arc::new(ChannelObserver::new(tx)));
        let (async_tx, mut async_rx) = progress_channel();
        builder.observe_async(Arc::new(Forward(async_tx)));
        let subject = builder.build(2);

        let execution = PlanExecution::new("plan", json!({}), "tester");
        subject.fire(OrchestrationEvent::orchestration_start(&execution));
        subject.fire(OrchestrationEvent::orchestration_end(&execution));

        assert_eq!(ends.0.load(Ordering::SeqCst), 1);
        assert_eq!(rx.recv().await.unwrap().event_type(), OrchestrationEventType::OrchestrationStart);
        assert_eq!(rx.recv().await.unwrap().event_type(), OrchestrationEventType::OrchestrationEnd);
        assert!(async_rx.recv().await.is_some());
        assert!(async_rx.recv().await.is_some());
    }
}
