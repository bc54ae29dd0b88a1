//! Host isolation, timeouts and resource limits

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::{Duration, Instant};
use stepbox_common::{ExecutionOutcome, ExecutionRequest};
use stepbox_sandbox::{HostBridge, SandboxConfig};
use stepbox_tests::{bridge, collect, setup_test_logging};

#[tokio::test]
async fn test_host_globals_are_absent() {
    setup_test_logging();
    let source = "function main() {\n  const kinds = [];\n  for (const name of [\"document\", \"window\", \"fetch\", \"Deno\", \"require\", \"process\"]) {\n    kinds.push(typeof globalThis[name]);\n  }\n  return kinds;\n}";
    let value = bridge().run(ExecutionRequest::new(source, "main")).await.unwrap();
    assert_eq!(value, json!(vec!["undefined"; 6]));
}

#[tokio::test]
async fn test_host_hooks_are_hidden() {
    let source = "function main() {\n  return [typeof globalThis.__stepboxHost, typeof __sbxStep, typeof __sbxHost];\n}";
    let value = bridge().run(ExecutionRequest::new(source, "main")).await.unwrap();
    assert_eq!(value, json!(["undefined", "undefined", "undefined"]));
}

#[tokio::test]
async fn test_custom_thread_stack_size() {
    let mut config = SandboxConfig::default();
    config.limits.thread_stack_bytes = Some(16 * 1024 * 1024);
    let source = "function depth(n) {\n  return n === 0 ? 0 : 1 + depth(n - 1);\n}";
    let value = HostBridge::v8(config)
        .run(ExecutionRequest::new(source, "depth").with_arguments(vec![json!(500)]))
        .await
        .unwrap();
    assert_eq!(value, json!(500));
}

#[tokio::test]
async fn test_runtime_internals_are_unreachable() {
    let err = bridge()
        .run(ExecutionRequest::new("function main() {\n  return Deno.core;\n}", "main"))
        .await
        .unwrap_err();
    assert_eq!(err.message, "ReferenceError: Deno is not defined");
    assert_eq!(err.line, Some(2));

    let err = bridge()
        .run(ExecutionRequest::new(
            "function main() {\n  return fetch(\"https://example.com\");\n}",
            "main",
        ))
        .await
        .unwrap_err();
    assert_eq!(err.message, "ReferenceError: fetch is not defined");
}

#[tokio::test]
async fn test_infinite_loop_times_out() {
    let source = "function main() {\n  while (true) {}\n}";
    let started = Instant::now();
    let mut handle = bridge()
        .start(ExecutionRequest::new(source, "main").with_timeout_ms(50))
        .await;

    let mut outcome = None;
    while let Some(message) = handle.next_message().await {
        if let stepbox_common::SessionMessage::Outcome(settled) = message {
            outcome = Some(settled);
        }
    }

    assert_matches!(
        outcome,
        Some(ExecutionOutcome::Failure { ref message, .. }) if message == "Execution timed out after 50ms"
    );
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(handle.wait_closed(Duration::from_secs(2)).await);
}

#[tokio::test]
async fn test_pending_timers_are_cancelled() {
    let source = "function main() {\n  setInterval(() => {}, 10);\n  return new Promise(() => {});\n}";
    let bridge = bridge();
    let handle = bridge
        .start(ExecutionRequest::new(source, "main").with_timeout_ms(100))
        .await;
    let id = handle.id();

    let transcript = collect(handle).await;
    assert_eq!(
        transcript.outcome(),
        &ExecutionOutcome::failure("Execution timed out after 100ms", Some(3))
    );
    // the event loop was still waiting on the interval; it must not keep the
    // context alive
    let mut closed = false;
    for _ in 0..200 {
        if bridge.get_session(id).await.is_some_and(|state| state.context_closed) {
            closed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(closed);
}

#[tokio::test]
async fn test_zero_timeout_settles_once() {
    for _ in 0..5 {
        let transcript = collect(
            bridge()
                .start(ExecutionRequest::new("function main() {\n  return 1;\n}", "main").with_timeout_ms(0))
                .await,
        )
        .await;
        // either the run or the deadline wins, never both
        assert_eq!(transcript.outcomes.len(), 1);
    }
}

#[tokio::test]
async fn test_heap_limit() {
    let mut config = SandboxConfig::default();
    config.limits.max_heap_bytes = Some(16 * 1024 * 1024);
    let bridge = HostBridge::v8(config);

    let source = "function main() {\n  const arr = [];\n  while (true) arr.push(new Array(100000).fill(\"x\"));\n}";
    let outcome = collect(
        bridge
            .start(ExecutionRequest::new(source, "main").with_timeout_ms(10_000))
            .await,
    )
    .await
    .outcome()
    .clone();

    assert!(!outcome.is_success(), "runaway allocation must fail: {:?}", outcome);
}
