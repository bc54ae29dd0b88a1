//! Manual-mode stepping through the V8 runtime

use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::Duration;
use stepbox_common::{ExecutionOutcome, ExecutionRequest};
use stepbox_sandbox::ControllerStatus;
use stepbox_tests::{bridge, setup_test_logging, FOUR_LINES};

#[tokio::test]
async fn test_one_step_per_statement() {
    setup_test_logging();
    let mut controller = bridge()
        .start_manual(ExecutionRequest::new(FOUR_LINES, "f"))
        .await;

    let mut lines = Vec::new();
    let mut steps = 0;
    while let Some(snapshot) = controller.next_snapshot().await {
        lines.push(snapshot.line);
        assert!(controller.step());
        steps += 1;
    }

    assert_eq!(lines, vec![1, 2, 3, 4]);
    assert_eq!(steps, 4);
    assert_eq!(controller.status(), ControllerStatus::Completed);
    assert_eq!(controller.outcome(), Some(&ExecutionOutcome::success(json!(3))));

    // a step after settlement is a no-op
    assert!(!controller.step());
    assert_eq!(controller.history().len(), 4);
}

#[tokio::test]
async fn test_step_back_replays_history() {
    let mut controller = bridge()
        .start_manual(ExecutionRequest::new(FOUR_LINES, "f"))
        .await;
    while controller.next_snapshot().await.is_some() {
        controller.step();
    }

    let earlier = controller.snapshot_at(1).unwrap();
    assert_eq!(earlier.line, 2);
    assert_eq!(earlier.variable("x").unwrap().serialized_value, json!(1));
    assert!(earlier.variable("y").is_none());
    assert!(controller.snapshot_at(4).is_none());
}

#[tokio::test]
async fn test_resume_runs_to_completion() {
    let mut controller = bridge()
        .start_manual(ExecutionRequest::new(FOUR_LINES, "f"))
        .await;

    let first = controller.next_snapshot().await.unwrap();
    assert_eq!(first.line, 1);
    assert!(controller.resume());

    let outcome = controller.wait().await.unwrap();
    assert_eq!(outcome, ExecutionOutcome::success(json!(3)));
    assert_eq!(controller.history().len(), 4);
    assert_eq!(controller.status(), ControllerStatus::Completed);
}

#[tokio::test]
async fn test_terminate_while_paused() {
    let mut controller = bridge()
        .start_manual(ExecutionRequest::new(FOUR_LINES, "f"))
        .await;
    assert!(controller.next_snapshot().await.is_some());

    controller.terminate();
    controller.terminate();

    let outcome = controller.wait().await.unwrap();
    assert_eq!(
        outcome,
        ExecutionOutcome::failure("execution terminated by host", Some(1))
    );
    assert_eq!(controller.status(), ControllerStatus::Terminated);
    assert!(controller.wait_closed(Duration::from_secs(2)).await);
}

#[tokio::test]
async fn test_unstepped_run_times_out() {
    let mut controller = bridge()
        .start_manual(ExecutionRequest::new(FOUR_LINES, "f").with_timeout_ms(100))
        .await;
    assert!(controller.next_snapshot().await.is_some());

    let outcome = controller.wait().await.unwrap();
    assert_eq!(
        outcome,
        ExecutionOutcome::failure("Execution timed out after 100ms", Some(1))
    );
    assert_eq!(controller.status(), ControllerStatus::Failed);
    assert!(controller.wait_closed(Duration::from_secs(2)).await);
}
