// Shared fixtures for engine scenario tests

#![allow(dead_code)]

use async_trait::async_trait;
use pipeline_engine::delegate::{TaskDispatcher, TaskResult, TaskSpec};
use pipeline_engine::events::ChannelObserver;
use pipeline_engine::{
    progress_channel, EngineBuilder, EngineResult, InMemoryStore, OrchestrationEngine,
    PlanStatus, ProgressReceiver, ResponseData,
};
use serde_json::Value;

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Dispatcher that only records what it was asked to run
#[derive(Default)]
pub struct RecordingDispatcher {
    submitted: Mutex<Vec<(String, TaskSpec)>>,
}

impl RecordingDispatcher {
    pub fn correlations(&self) -> Vec<String> {
        self.submitted
            .lock()
            .unwrap()
            .iter()
            .map(|(c, _)| c.clone())
            .collect()
    }

    pub fn tasks(&self) -> Vec<TaskSpec> {
        self.submitted
            .lock()
            .unwrap()
            .iter()
            .map(|(_, t)| t.clone())
            .collect()
    }
}

#[async_trait]
impl TaskDispatcher for RecordingDispatcher {
    async fn submit_task(&self, correlation_id: &str, task: TaskSpec) -> EngineResult<String> {
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push((correlation_id.to_string(), task));
        Ok(format!("task-{}", submitted.len()))
    }
}

pub struct Harness {
    pub engine: Arc<OrchestrationEngine>,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub events: ProgressReceiver,
}

pub fn harness() -> Harness {
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let (tx, events) = progress_channel();
    let engine = EngineBuilder::new(Arc::new(InMemoryStore::new()), dispatcher.clone())
        .with_builtin_steps()
        .unwrap()
        .observe_sync(Arc::new(ChannelObserver::new(tx)))
        .build();
    Harness {
        engine,
        dispatcher,
        events,
    }
}

/// Poll `check` until it holds, failing the test after five seconds
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let polled = tokio::time::timeout(Duration::from_secs(5), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "timed out waiting for {}", what);
}

impl Harness {
    /// Wait until the n-th dispatched task is bound, then return its correlation id
    pub async fn dispatched(&self, index: usize) -> String {
        let dispatcher = self.dispatcher.clone();
        eventually("task dispatch", || {
            let dispatcher = dispatcher.clone();
            async move { dispatcher.correlations().len() > index }
        })
        .await;
        let correlation_id = self.dispatcher.correlations()[index].clone();

        let engine = self.engine.clone();
        let id = correlation_id.clone();
        eventually("correlation binding", || {
            let engine = engine.clone();
            let id = id.clone();
            async move { engine.waiter().is_registered(&id).await.unwrap() }
        })
        .await;
        correlation_id
    }

    pub async fn complete_task(&self, index: usize, result: TaskResult) {
        let correlation_id = self.dispatched(index).await;
        self.engine
            .waiter()
            .notify(&correlation_id, ResponseData::Task { result })
            .await
            .unwrap();
    }

    pub async fn succeed_task(&self, index: usize, output: Value) {
        self.complete_task(index, TaskResult::success(output)).await;
    }

    pub async fn plan_status(&self, plan_execution_id: &str) -> PlanStatus {
        self.engine
            .plan_execution(plan_execution_id)
            .await
            .unwrap()
            .status
    }

    /// Wait for the plan execution to finish and return its status
    pub async fn finished(&self, plan_execution_id: &str) -> PlanStatus {
        let engine = self.engine.clone();
        let id = plan_execution_id.to_string();
        eventually("plan conclusion", || {
            let engine = engine.clone();
            let id = id.clone();
            async move { engine.plan_execution(&id).await.unwrap().status.is_terminal() }
        })
        .await;
        self.plan_status(plan_execution_id).await
    }
}
