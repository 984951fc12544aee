// Interrupt scenarios: retry from intervention, pause/resume, forced
// statuses and discarded interrupts

mod common;

use common::{eventually, harness, Harness};
use pipeline_engine::delegate::TaskResult;
use pipeline_engine::facilitator::{SYNC, TASK};
use pipeline_engine::{
    FailureInfo, FailureType, InterruptManager, InterruptState, InterruptType, NodeExecution,
    Plan, PlanNode, PlanStatus, Status,
};
use serde_json::{json, Value};

use std::collections::BTreeMap;
use std::sync::Arc;

fn task_node(id: &str) -> PlanNode {
    PlanNode::new(id, "task", TASK).with_parameters(json!({ "taskType": "deploy" }))
}

fn manager(h: &Harness) -> Arc<InterruptManager> {
    Arc::new(InterruptManager::new(h.engine.clone()))
}

async fn node(h: &Harness, plan_execution_id: &str, plan_node_id: &str) -> Vec<NodeExecution> {
    h.engine
        .node_executions_for_plan_node(plan_execution_id, plan_node_id)
        .await
        .unwrap()
}

async fn wait_for_status(h: &Harness, node_execution_id: &str, status: Status) {
    let engine = h.engine.clone();
    let id = node_execution_id.to_string();
    eventually(status.as_str(), || {
        let engine = engine.clone();
        let id = id.clone();
        async move { engine.node_execution(&id).await.unwrap().status == status }
    })
    .await;
}

#[tokio::test]
async fn test_retry_from_intervention_creates_one_attempt() {
    let h = harness();
    let interrupts = manager(&h);
    let plan = Plan::new(
        "gated",
        "a",
        vec![task_node("a").with_adviser("MANUAL_INTERVENTION", json!({ "timeoutMs": 60000 }))],
    );
    let execution = h.engine.start_execution(plan, Value::Null, "ci").await.unwrap();
    h.complete_task(
        0,
        TaskResult::failure(FailureInfo::new(FailureType::Connectivity, "timeout")),
    )
    .await;

    let first = node(&h, &execution.uuid, "a").await.remove(0);
    wait_for_status(&h, &first.uuid, Status::InterventionWaiting).await;
    assert_eq!(h.plan_status(&execution.uuid).await, PlanStatus::Running);

    // The same retry issued twice only produces one attempt
    for _ in 0..2 {
        interrupts
            .register_interrupt(InterruptType::Retry, &first.uuid, BTreeMap::new(), "oncall")
            .await
            .unwrap();
    }
    let processed = interrupts.process_interrupts().await.unwrap();
    assert_eq!(processed.len(), 2);
    assert_eq!(processed[0].state, InterruptState::ProcessedSuccessfully);
    assert_eq!(processed[1].state, InterruptState::ProcessedUnsuccessfully);
    assert!(processed[1].failure_reason.is_some());

    let attempts = node(&h, &execution.uuid, "a").await;
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].status, Status::Failed);
    assert!(attempts[0].old_retry);
    assert_eq!(attempts[0].interrupt_effects.len(), 1);
    assert_eq!(attempts[1].status, Status::Running);
    assert_eq!(attempts[1].retry_ids, vec![first.uuid.clone()]);

    h.succeed_task(1, Value::Null).await;
    assert_eq!(h.finished(&execution.uuid).await, PlanStatus::Succeeded);
}

#[tokio::test]
async fn test_intervention_timeout_fails_node() {
    let h = harness();
    let plan = Plan::new(
        "gated",
        "a",
        vec![task_node("a").with_adviser("MANUAL_INTERVENTION", json!({ "timeoutMs": 1000 }))],
    );
    let execution = h.engine.start_execution(plan, Value::Null, "ci").await.unwrap();
    h.complete_task(0, TaskResult::failure(FailureInfo::default())).await;

    let first = node(&h, &execution.uuid, "a").await.remove(0);
    wait_for_status(&h, &first.uuid, Status::InterventionWaiting).await;

    let later = chrono::Utc::now() + chrono::Duration::seconds(30);
    assert_eq!(h.engine.sweep_timeouts(later).await.unwrap(), 1);
    assert_eq!(h.finished(&execution.uuid).await, PlanStatus::Failed);

    let settled = h.engine.node_execution(&first.uuid).await.unwrap();
    assert_eq!(settled.status, Status::Expired);
}

#[tokio::test]
async fn test_pause_holds_response_until_resume() {
    let h = harness();
    let interrupts = manager(&h);
    let plan = Plan::new("pausable", "a", vec![task_node("a")]);
    let execution = h.engine.start_execution(plan, Value::Null, "ci").await.unwrap();
    let a = node(&h, &execution.uuid, "a").await.remove(0);
    h.dispatched(0).await;

    interrupts
        .register_interrupt(InterruptType::Pause, &execution.uuid, BTreeMap::new(), "ops")
        .await
        .unwrap();
    let processed = interrupts.process_interrupts().await.unwrap();
    assert_eq!(processed[0].state, InterruptState::ProcessedSuccessfully);
    assert_eq!(h.plan_status(&execution.uuid).await, PlanStatus::Paused);
    assert_eq!(h.engine.node_execution(&a.uuid).await.unwrap().status, Status::Paused);

    h.succeed_task(0, json!({ "version": "1.2.3" })).await;
    let engine = h.engine.clone();
    let id = a.uuid.clone();
    eventually("held response", || {
        let engine = engine.clone();
        let id = id.clone();
        async move { engine.node_execution(&id).await.unwrap().pending_response.is_some() }
    })
    .await;
    assert_eq!(h.engine.node_execution(&a.uuid).await.unwrap().status, Status::Paused);

    interrupts
        .register_interrupt(InterruptType::Resume, &execution.uuid, BTreeMap::new(), "ops")
        .await
        .unwrap();
    let processed = interrupts.process_interrupts().await.unwrap();
    assert_eq!(processed[0].state, InterruptState::ProcessedSuccessfully);
    assert_eq!(h.finished(&execution.uuid).await, PlanStatus::Succeeded);
}

#[tokio::test]
async fn test_interrupts_on_one_node_apply_in_order() {
    let h = harness();
    let interrupts = manager(&h);
    let plan = Plan::new("pausable", "a", vec![task_node("a")]);
    let execution = h.engine.start_execution(plan, Value::Null, "ci").await.unwrap();
    let a = node(&h, &execution.uuid, "a").await.remove(0);
    h.dispatched(0).await;

    // Each interrupt sees the state the previous one left behind
    for interrupt_type in [InterruptType::Pause, InterruptType::Resume, InterruptType::Resume] {
        interrupts
            .register_interrupt(interrupt_type, &a.uuid, BTreeMap::new(), "ops")
            .await
            .unwrap();
    }
    let processed = interrupts.process_interrupts().await.unwrap();
    assert_eq!(processed.len(), 3);
    assert_eq!(processed[0].state, InterruptState::ProcessedSuccessfully);
    assert_eq!(processed[1].state, InterruptState::ProcessedSuccessfully);
    assert_eq!(processed[2].state, InterruptState::ProcessedUnsuccessfully);
    assert!(processed[2]
        .failure_reason
        .as_deref()
        .is_some_and(|reason| reason.contains("not paused")));

    let resumed = h.engine.node_execution(&a.uuid).await.unwrap();
    assert_eq!(resumed.status, Status::Running);
    let effects: Vec<_> = resumed
        .interrupt_effects
        .iter()
        .map(|effect| (effect.interrupt_type, effect.from_status, effect.to_status))
        .collect();
    assert_eq!(
        effects,
        vec![
            (InterruptType::Pause, Status::Running, Status::Paused),
            (InterruptType::Resume, Status::Paused, Status::Running),
        ]
    );

    h.succeed_task(0, json!({ "version": "1.2.3" })).await;
    assert_eq!(h.finished(&execution.uuid).await, PlanStatus::Succeeded);
}

#[tokio::test]
async fn test_paused_plan_holds_queued_successor() {
    let h = harness();
    let interrupts = manager(&h);
    let plan = Plan::new(
        "sequence",
        "a",
        vec![
            task_node("a").with_next("b").with_adviser("NEXT_STEP", Value::Null),
            PlanNode::new("b", "noop", SYNC),
        ],
    );
    let execution = h.engine.start_execution(plan, Value::Null, "ci").await.unwrap();
    h.dispatched(0).await;

    // Pause only the plan record; the running task keeps going
    let a = node(&h, &execution.uuid, "a").await.remove(0);
    interrupts
        .register_interrupt(InterruptType::Pause, &execution.uuid, BTreeMap::new(), "ops")
        .await
        .unwrap();
    interrupts.process_interrupts().await.unwrap();
    interrupts
        .register_interrupt(InterruptType::Resume, &a.uuid, BTreeMap::new(), "ops")
        .await
        .unwrap();
    interrupts.process_interrupts().await.unwrap();
    assert_eq!(h.engine.node_execution(&a.uuid).await.unwrap().status, Status::Running);

    h.succeed_task(0, Value::Null).await;
    let engine = h.engine.clone();
    let id = execution.uuid.clone();
    eventually("successor held", || {
        let engine = engine.clone();
        let id = id.clone();
        async move {
            engine
                .node_executions_for_plan_node(&id, "b")
                .await
                .unwrap()
                .first()
                .map_or(false, |b| b.status == Status::Paused)
        }
    })
    .await;

    interrupts
        .register_interrupt(InterruptType::Resume, &execution.uuid, BTreeMap::new(), "ops")
        .await
        .unwrap();
    interrupts.process_interrupts().await.unwrap();
    assert_eq!(h.finished(&execution.uuid).await, PlanStatus::Succeeded);
}

#[tokio::test]
async fn test_custom_failure_runs_advisers() {
    let h = harness();
    let interrupts = manager(&h);
    let plan = Plan::new(
        "forced",
        "a",
        vec![
            task_node("a")
                .with_on_failure("cleanup")
                .with_adviser("ON_FAIL", Value::Null),
            PlanNode::new("cleanup", "noop", SYNC),
        ],
    );
    let execution = h.engine.start_execution(plan, Value::Null, "ci").await.unwrap();
    let correlation_id = h.dispatched(0).await;
    let a = node(&h, &execution.uuid, "a").await.remove(0);

    let mut metadata = BTreeMap::new();
    metadata.insert("failureType".to_string(), "POLICY".to_string());
    metadata.insert("message".to_string(), "change freeze".to_string());
    interrupts
        .register_interrupt(InterruptType::CustomFailure, &a.uuid, metadata, "governance")
        .await
        .unwrap();
    let processed = interrupts.process_interrupts().await.unwrap();
    assert_eq!(processed[0].state, InterruptState::ProcessedSuccessfully);

    let failed = h.engine.node_execution(&a.uuid).await.unwrap();
    assert_eq!(failed.status, Status::Failed);
    let failure = failed.failure_info.unwrap();
    assert_eq!(failure.failure_types, vec![FailureType::Policy]);
    assert_eq!(failure.message, "change freeze");
    assert_eq!(failed.interrupt_effects[0].to_status, Status::Failed);
    assert!(!h.engine.waiter().is_registered(&correlation_id).await.unwrap());

    assert_eq!(h.finished(&execution.uuid).await, PlanStatus::Failed);
    assert_eq!(node(&h, &execution.uuid, "cleanup").await.len(), 1);
}

#[tokio::test]
async fn test_mark_success_continues_plan() {
    let h = harness();
    let interrupts = manager(&h);
    let plan = Plan::new(
        "forced",
        "a",
        vec![
            task_node("a").with_next("b").with_adviser("NEXT_STEP", Value::Null),
            PlanNode::new("b", "noop", SYNC),
        ],
    );
    let execution = h.engine.start_execution(plan, Value::Null, "ci").await.unwrap();
    h.dispatched(0).await;
    let a = node(&h, &execution.uuid, "a").await.remove(0);

    interrupts
        .register_interrupt(InterruptType::MarkSuccess, &a.uuid, BTreeMap::new(), "ops")
        .await
        .unwrap();
    interrupts.process_interrupts().await.unwrap();
    assert_eq!(h.finished(&execution.uuid).await, PlanStatus::Succeeded);
    assert_eq!(node(&h, &execution.uuid, "b").await[0].status, Status::Succeeded);
}

#[tokio::test]
async fn test_abort_subtree_interrupt() {
    let h = harness();
    let interrupts = manager(&h);
    let plan = Plan::new("abortable", "a", vec![task_node("a")]);
    let execution = h.engine.start_execution(plan, Value::Null, "ci").await.unwrap();
    h.dispatched(0).await;
    let a = node(&h, &execution.uuid, "a").await.remove(0);

    interrupts
        .register_interrupt(InterruptType::Abort, &a.uuid, BTreeMap::new(), "ops")
        .await
        .unwrap();
    let processed = interrupts.process_interrupts().await.unwrap();
    assert_eq!(processed[0].state, InterruptState::ProcessedSuccessfully);
    assert_eq!(h.engine.node_execution(&a.uuid).await.unwrap().status, Status::Aborted);
    assert_eq!(h.finished(&execution.uuid).await, PlanStatus::Aborted);
}

#[tokio::test]
async fn test_interrupt_on_finished_plan_is_discarded() {
    let h = harness();
    let interrupts = manager(&h);
    let plan = Plan::new("quick", "a", vec![PlanNode::new("a", "noop", SYNC)]);
    let execution = h.engine.start_execution(plan, Value::Null, "ci").await.unwrap();
    assert_eq!(h.finished(&execution.uuid).await, PlanStatus::Succeeded);

    interrupts
        .register_interrupt(InterruptType::Abort, &execution.uuid, BTreeMap::new(), "ops")
        .await
        .unwrap();
    let processed = interrupts.process_interrupts().await.unwrap();
    assert_eq!(processed.len(), 1);
    assert_eq!(processed[0].state, InterruptState::Discarded);
    assert_eq!(h.plan_status(&execution.uuid).await, PlanStatus::Succeeded);

    // Nothing left to process
    assert!(interrupts.process_interrupts().await.unwrap().is_empty());
    assert_eq!(interrupts.interrupts_for(&execution.uuid).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_node_interrupt_requires_node_target() {
    let h = harness();
    let interrupts = manager(&h);
    let plan = Plan::new("quick", "a", vec![task_node("a")]);
    let execution = h.engine.start_execution(plan, Value::Null, "ci").await.unwrap();

    let err = interrupts
        .register_interrupt(InterruptType::Retry, &execution.uuid, BTreeMap::new(), "ops")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("node execution target"));

    let err = interrupts
        .register_interrupt(InterruptType::Abort, "nope", BTreeMap::new(), "ops")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not found"));
}
