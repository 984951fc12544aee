// End-to-end orchestration scenarios against the in-memory store

mod common;

use common::harness;
use pipeline_engine::delegate::TaskResult;
use pipeline_engine::facilitator::{ASYNC, CHILDREN, SYNC, TASK};
use pipeline_engine::waiter::NotifyOutcome;
use pipeline_engine::timeout::TimeoutKind;
use pipeline_engine::{
    Ambiance, DiscontinueMode, ExecutionStore, FailureInfo, FailureType, NodeExecution,
    OrchestrationEvent, Plan, PlanNode, PlanStatus, ResponseData, Status,
};
use serde_json::{json, Value};

use std::time::Duration;

fn task_node(id: &str) -> PlanNode {
    PlanNode::new(id, "task", TASK).with_parameters(json!({ "taskType": "build" }))
}

#[tokio::test]
async fn test_two_step_plan_succeeds() {
    let mut h = harness();
    let plan = Plan::new(
        "two-step",
        "a",
        vec![
            task_node("a").with_next("b").with_adviser("NEXT_STEP", Value::Null),
            task_node("b").with_adviser("END_PLAN", Value::Null),
        ],
    );

    let execution = h
        .engine
        .start_execution(plan, json!({ "branch": "main" }), "alice")
        .await
        .unwrap();
    assert_eq!(execution.status, PlanStatus::Running);
    assert_eq!(execution.principal, "alice");

    h.succeed_task(0, json!({ "artifact": "a.tar" })).await;
    h.succeed_task(1, Value::Null).await;
    assert_eq!(h.finished(&execution.uuid).await, PlanStatus::Succeeded);

    let nodes = h.engine.node_executions(&execution.uuid).await.unwrap();
    assert_eq!(nodes.len(), 2);
    assert!(nodes.iter().all(|n| n.status == Status::Succeeded));
    assert_eq!(nodes[0].next_id.as_deref(), Some(nodes[1].uuid.as_str()));
    assert_eq!(nodes[1].previous_id.as_deref(), Some(nodes[0].uuid.as_str()));
    assert_eq!(h.dispatcher.tasks()[0].task_type, "build");

    let mut seen = Vec::new();
    let end = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = h.events.recv().await {
            let done = matches!(event, OrchestrationEvent::OrchestrationEnd { .. });
            seen.push(event);
            if done {
                break;
            }
        }
    })
    .await;
    assert!(end.is_ok());
    assert!(matches!(seen[0], OrchestrationEvent::OrchestrationStart { .. }));
    assert!(matches!(
        seen.last(),
        Some(OrchestrationEvent::OrchestrationEnd {
            status: PlanStatus::Succeeded,
            ..
        })
    ));
}

#[tokio::test]
async fn test_retry_exhaustion_fails_plan() {
    let h = harness();
    let plan = Plan::new(
        "flaky",
        "a",
        vec![PlanNode::new("a", "fail", SYNC)
            .with_parameters(json!({ "failureType": "CONNECTIVITY" }))
            .with_adviser("RETRY", json!({ "maxAttempts": 2 }))],
    );

    let execution = h.engine.start_execution(plan, Value::Null, "ci").await.unwrap();
    assert_eq!(h.finished(&execution.uuid).await, PlanStatus::Failed);

    let attempts = h
        .engine
        .node_executions_for_plan_node(&execution.uuid, "a")
        .await
        .unwrap();
    assert_eq!(attempts.len(), 3);
    assert!(attempts.iter().all(|n| n.status == Status::Failed));
    assert!(attempts[0].old_retry && attempts[1].old_retry && !attempts[2].old_retry);
    assert_eq!(attempts[2].retry_count(), 2);
    assert_eq!(
        attempts[2].failure_info.as_ref().unwrap().failure_types,
        vec![FailureType::Connectivity]
    );
}

#[tokio::test]
async fn test_retry_recovers() {
    let h = harness();
    let plan = Plan::new(
        "recovers",
        "a",
        vec![PlanNode::new("a", "fail", SYNC)
            .with_parameters(json!({ "succeedAfter": 1 }))
            .with_adviser("RETRY", json!({ "maxAttempts": 3 }))],
    );

    let execution = h.engine.start_execution(plan, Value::Null, "ci").await.unwrap();
    assert_eq!(h.finished(&execution.uuid).await, PlanStatus::Succeeded);
    let attempts = h
        .engine
        .node_executions_for_plan_node(&execution.uuid, "a")
        .await
        .unwrap();
    assert_eq!(attempts.len(), 2);
}

#[tokio::test]
async fn test_replayed_failure_is_advised_once() {
    let h = harness();
    let plan = Plan::new(
        "replay",
        "a",
        vec![task_node("a").with_adviser("RETRY", json!({ "maxAttempts": 3 }))],
    );
    let execution = h.engine.start_execution(plan, Value::Null, "ci").await.unwrap();
    h.dispatched(0).await;

    let node_id = h.engine.node_executions(&execution.uuid).await.unwrap()[0]
        .uuid
        .clone();
    let (first, second) = tokio::join!(
        h.engine.handle_status_update(&node_id, Status::Failed),
        h.engine.handle_status_update(&node_id, Status::Failed),
    );
    first.unwrap();
    second.unwrap();
    h.engine
        .handle_status_update(&node_id, Status::Failed)
        .await
        .unwrap();

    // The single retry dispatches a second task and nothing more
    h.dispatched(1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let attempts = h
        .engine
        .node_executions_for_plan_node(&execution.uuid, "a")
        .await
        .unwrap();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[1].status, Status::Running);
    assert_eq!(h.dispatcher.correlations().len(), 2);
}

#[tokio::test]
async fn test_on_fail_routes_to_cleanup() {
    let h = harness();
    let plan = Plan::new(
        "route",
        "a",
        vec![
            task_node("a")
                .with_on_failure("cleanup")
                .with_adviser("ON_FAIL", json!({ "failureTypes": ["AUTHENTICATION"] })),
            PlanNode::new("cleanup", "noop", SYNC),
        ],
    );
    let execution = h.engine.start_execution(plan, Value::Null, "ci").await.unwrap();
    h.complete_task(
        0,
        TaskResult::failure(FailureInfo::new(FailureType::Authentication, "bad token")),
    )
    .await;

    assert_eq!(h.finished(&execution.uuid).await, PlanStatus::Failed);
    let cleanup = h
        .engine
        .node_executions_for_plan_node(&execution.uuid, "cleanup")
        .await
        .unwrap();
    assert_eq!(cleanup.len(), 1);
    assert_eq!(cleanup[0].status, Status::Succeeded);
}

#[tokio::test]
async fn test_ignore_adviser_continues() {
    let h = harness();
    let plan = Plan::new(
        "ignore",
        "a",
        vec![
            PlanNode::new("a", "fail", SYNC)
                .with_next("b")
                .with_adviser("IGNORE", Value::Null),
            PlanNode::new("b", "noop", SYNC),
        ],
    );
    let execution = h.engine.start_execution(plan, Value::Null, "ci").await.unwrap();
    assert_eq!(h.finished(&execution.uuid).await, PlanStatus::Succeeded);

    let nodes = h.engine.node_executions(&execution.uuid).await.unwrap();
    assert_eq!(nodes[0].status, Status::IgnoreFailed);
    assert_eq!(nodes[1].status, Status::Succeeded);
}

#[tokio::test]
async fn test_children_fan_out_and_join() {
    let h = harness();
    let plan = Plan::new(
        "fan-out",
        "root",
        vec![
            PlanNode::new("root", "fork", CHILDREN).with_children(["c1", "c2"]),
            task_node("c1"),
            task_node("c2"),
        ],
    );
    let execution = h.engine.start_execution(plan, Value::Null, "ci").await.unwrap();

    h.succeed_task(0, Value::Null).await;
    h.succeed_task(1, Value::Null).await;
    assert_eq!(h.finished(&execution.uuid).await, PlanStatus::Succeeded);

    let nodes = h.engine.node_executions(&execution.uuid).await.unwrap();
    assert_eq!(nodes.len(), 3);
    let root = &nodes[0];
    let children = h.engine.descendants(&root.uuid).await.unwrap();
    assert_eq!(children.len(), 2);
    assert!(children.iter().all(|c| c.parent_id.as_deref() == Some(root.uuid.as_str())));
    assert_eq!(root.status, Status::Succeeded);
}

#[tokio::test]
async fn test_failed_child_fails_parent() {
    let h = harness();
    let plan = Plan::new(
        "fan-out",
        "root",
        vec![
            PlanNode::new("root", "fork", CHILDREN).with_children(["ok", "bad"]),
            PlanNode::new("ok", "noop", SYNC),
            PlanNode::new("bad", "fail", SYNC),
        ],
    );
    let execution = h.engine.start_execution(plan, Value::Null, "ci").await.unwrap();
    assert_eq!(h.finished(&execution.uuid).await, PlanStatus::Failed);

    let root = &h.engine.node_executions(&execution.uuid).await.unwrap()[0];
    assert_eq!(root.status, Status::Failed);
}

#[tokio::test]
async fn test_abort_releases_every_registration() {
    let h = harness();
    let plan = Plan::new(
        "abort",
        "root",
        vec![
            PlanNode::new("root", "fork", CHILDREN).with_children(["c1", "c2"]),
            task_node("c1"),
            task_node("c2"),
        ],
    );
    let execution = h.engine.start_execution(plan, Value::Null, "ci").await.unwrap();
    let first = h.dispatched(0).await;
    let second = h.dispatched(1).await;

    let aborted = h
        .engine
        .discontinue(&execution.uuid, DiscontinueMode::AbortAll)
        .await
        .unwrap();
    assert_eq!(aborted, 3);
    assert_eq!(h.plan_status(&execution.uuid).await, PlanStatus::Aborted);

    let nodes = h.engine.node_executions(&execution.uuid).await.unwrap();
    assert!(nodes.iter().all(|n| n.status == Status::Aborted));
    for node in &nodes {
        assert!(!h.engine.waiter().is_registered(&node.uuid).await.unwrap());
    }
    for correlation_id in [&first, &second] {
        assert!(!h.engine.waiter().is_registered(correlation_id).await.unwrap());
    }

    // A late result for an aborted task is dropped
    let late = h
        .engine
        .waiter()
        .notify(&first, ResponseData::Task { result: TaskResult::success(Value::Null) })
        .await
        .unwrap();
    assert_eq!(late, NotifyOutcome::Discarded);
}

#[tokio::test]
async fn test_node_deadline_expires() {
    let h = harness();
    let plan = Plan::new(
        "deadline",
        "a",
        vec![task_node("a").with_timeout(Duration::from_secs(30))],
    );
    let execution = h.engine.start_execution(plan, Value::Null, "ci").await.unwrap();
    let correlation_id = h.dispatched(0).await;

    let nothing = h.engine.sweep_timeouts(chrono::Utc::now()).await.unwrap();
    assert_eq!(nothing, 0);

    let later = chrono::Utc::now() + chrono::Duration::seconds(60);
    assert_eq!(h.engine.sweep_timeouts(later).await.unwrap(), 1);

    let node = &h.engine.node_executions(&execution.uuid).await.unwrap()[0];
    assert_eq!(node.status, Status::Expired);
    assert_eq!(
        node.failure_info.as_ref().unwrap().failure_types,
        vec![FailureType::Expired]
    );
    assert!(!h.engine.waiter().is_registered(&correlation_id).await.unwrap());
    assert_eq!(h.finished(&execution.uuid).await, PlanStatus::Failed);
}

#[tokio::test]
async fn test_failing_timeout_does_not_swallow_later_ones() {
    let h = harness();

    // A running node whose plan execution is gone cannot be settled
    let mut orphan = NodeExecution::new(
        "missing-plan",
        &task_node("orphan"),
        &Ambiance::new("missing-plan"),
    );
    orphan.status = Status::Running;
    h.engine.store().insert_node_execution(&orphan).await.unwrap();
    h.engine
        .timeouts()
        .register(&orphan, TimeoutKind::NodeDeadline, Duration::from_secs(1))
        .await
        .unwrap();

    let plan = Plan::new(
        "deadline",
        "a",
        vec![task_node("a").with_timeout(Duration::from_secs(30))],
    );
    let execution = h.engine.start_execution(plan, Value::Null, "ci").await.unwrap();
    h.dispatched(0).await;

    let later = chrono::Utc::now() + chrono::Duration::seconds(60);
    assert_eq!(h.engine.sweep_timeouts(later).await.unwrap(), 1);

    let node = &h.engine.node_executions(&execution.uuid).await.unwrap()[0];
    assert_eq!(node.status, Status::Expired);
    assert_eq!(h.finished(&execution.uuid).await, PlanStatus::Failed);
}

#[tokio::test]
async fn test_unanswered_task_expires_after_correlation_ttl() {
    let h = harness();
    let plan = Plan::new("silent", "a", vec![task_node("a")]);
    let execution = h.engine.start_execution(plan, Value::Null, "ci").await.unwrap();
    let correlation_id = h.dispatched(0).await;
    let node_id = h.engine.node_executions(&execution.uuid).await.unwrap()[0]
        .uuid
        .clone();
    assert!(h.engine.timeouts().has_active(&node_id).await.unwrap());

    let ttl = h.engine.config().correlation_ttl().unwrap();
    let now = chrono::Utc::now();
    assert_eq!(h.engine.sweep_timeouts(now + chrono::Duration::hours(1)).await.unwrap(), 0);

    let past_ttl = now + chrono::Duration::from_std(ttl).unwrap() + chrono::Duration::minutes(1);
    assert_eq!(h.engine.sweep_timeouts(past_ttl).await.unwrap(), 1);

    let node = h.engine.node_execution(&node_id).await.unwrap();
    assert_eq!(node.status, Status::Expired);
    let failure = node.failure_info.unwrap();
    assert_eq!(failure.failure_types, vec![FailureType::Expired]);
    assert!(failure.message.contains(&correlation_id));
    assert!(!h.engine.waiter().is_registered(&correlation_id).await.unwrap());
    assert_eq!(h.finished(&execution.uuid).await, PlanStatus::Failed);
}

#[tokio::test]
async fn test_signal_step_waits_for_callback() {
    let h = harness();
    let plan = Plan::new(
        "approval",
        "gate",
        vec![PlanNode::new("gate", "signal", ASYNC)
            .with_parameters(json!({ "callbackIds": ["approve"] }))],
    );
    let execution = h.engine.start_execution(plan, Value::Null, "ci").await.unwrap();
    let gate = h.engine.node_executions(&execution.uuid).await.unwrap()[0].clone();
    assert_eq!(gate.status, Status::Running);

    let correlation_id = format!("{}:approve", gate.uuid);
    let outcome = h
        .engine
        .waiter()
        .notify(&correlation_id, ResponseData::Signal { payload: json!({ "by": "bob" }) })
        .await
        .unwrap();
    assert_eq!(outcome, NotifyOutcome::Fired);
    assert_eq!(h.finished(&execution.uuid).await, PlanStatus::Succeeded);
}

#[tokio::test]
async fn test_unwatched_node_is_errored_by_consistency_sweep() {
    let h = harness();
    let plan = Plan::new("lost", "a", vec![task_node("a")]);
    let execution = h.engine.start_execution(plan, Value::Null, "ci").await.unwrap();
    let correlation_id = h.dispatched(0).await;

    let fresh = h.engine.check_consistency(chrono::Utc::now()).await.unwrap();
    assert!(fresh.is_clean());

    // Losing the binding and its timers leaves nothing to wake the node
    let node_id = h.engine.node_executions(&execution.uuid).await.unwrap()[0]
        .uuid
        .clone();
    h.engine.waiter().cancel(&[correlation_id]).await.unwrap();
    h.engine.timeouts().cancel_for_node(&node_id).await.unwrap();
    let later = chrono::Utc::now() + chrono::Duration::hours(1);
    let report = h.engine.check_consistency(later).await.unwrap();
    assert_eq!(report.errored_nodes.len(), 1);

    let node = &h.engine.node_executions(&execution.uuid).await.unwrap()[0];
    assert_eq!(node.status, Status::Errored);
    assert_eq!(h.finished(&execution.uuid).await, PlanStatus::Errored);
}

#[tokio::test]
async fn test_archiving_forgets_retired_correlations() {
    let h = harness();
    let plan = Plan::new("short", "a", vec![task_node("a")]);
    let execution = h.engine.start_execution(plan, Value::Null, "ci").await.unwrap();
    let correlation_id = h.dispatched(0).await;
    h.succeed_task(0, json!({})).await;
    assert_eq!(h.finished(&execution.uuid).await, PlanStatus::Succeeded);

    let store = h.engine.store();
    assert!(store.is_correlation_retired(&correlation_id).await.unwrap());

    let later = chrono::Utc::now() + chrono::Duration::days(30);
    assert_eq!(h.engine.archive_expired(later).await.unwrap(), 1);
    assert!(store.get_plan_execution(&execution.uuid).await.unwrap().is_none());
    assert!(!store.is_correlation_retired(&correlation_id).await.unwrap());
}

#[tokio::test]
async fn test_invalid_plan_is_rejected_before_start() {
    let h = harness();
    let plan = Plan::new("bad", "a", vec![PlanNode::new("a", "deploy", SYNC)]);
    let err = h
        .engine
        .start_execution(plan, Value::Null, "ci")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("deploy"));

    let running = h
        .engine
        .store()
        .find_plan_executions_by_status(&[PlanStatus::Running])
        .await
        .unwrap();
    assert!(running.is_empty());
}
