//! End-to-end runs through the V8 runtime in auto mode

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::{Duration, Instant};
use stepbox_common::{ExecutionEvent, ExecutionOutcome, ExecutionRequest, StdStream, ValueKind};
use stepbox_sandbox::SandboxConfig;
use stepbox_tests::{bridge, collect, setup_test_logging, FOUR_LINES};

#[tokio::test]
async fn test_line_attribution() {
    setup_test_logging();
    let transcript = collect(bridge().start(ExecutionRequest::new(FOUR_LINES, "f")).await).await;

    assert_eq!(transcript.steps(), vec![1, 2, 3, 4]);
    let snapshots = transcript.snapshots();
    let lines: Vec<u32> = snapshots.iter().map(|s| s.line).collect();
    assert_eq!(lines, vec![1, 2, 3, 4]);

    let last = snapshots[3];
    assert_eq!(last.variable("x").map(|v| &v.serialized_value), Some(&json!(1)));
    assert_eq!(last.variable("y").map(|v| &v.serialized_value), Some(&json!(2)));
    assert_eq!(last.call_stack.len(), 1);
    assert_eq!(last.call_stack[0].name, "f");

    assert_eq!(transcript.outcome(), &ExecutionOutcome::success(json!(3)));
}

#[tokio::test]
async fn test_changed_flags_follow_assignments() {
    let transcript = collect(bridge().start(ExecutionRequest::new(FOUR_LINES, "f")).await).await;
    let snapshots = transcript.snapshots();

    // `x` first becomes readable at line 2, then stays the same
    let x_at_2 = snapshots[1].variable("x").unwrap();
    assert!(x_at_2.changed);
    assert_eq!(x_at_2.kind, ValueKind::Primitive);
    let x_at_3 = snapshots[2].variable("x").unwrap();
    assert!(!x_at_3.changed);
    // `y` is still in its temporal dead zone at line 2
    assert!(snapshots[1].variable("y").is_none());
}

#[tokio::test]
async fn test_determinism_under_replay() {
    let source = "function main(n) {\n  const items = [];\n  for (let i = 0; i < n; i++) {\n    items.push({ i, sq: i * i });\n  }\n  return items.map((it) => it.sq);\n}\n";
    let request = ExecutionRequest::new(source, "main").with_arguments(vec![json!(4)]);
    let bridge = bridge();

    let first = collect(bridge.start(request.clone()).await).await;
    let second = collect(bridge.start(request).await).await;

    assert_eq!(first.outcome(), &ExecutionOutcome::success(json!([0, 1, 4, 9])));
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_arguments_are_captured_first() {
    let source = "function add(a, b) {\n  const sum = a + b;\n  return sum;\n}";
    let request = ExecutionRequest::new(source, "add").with_arguments(vec![json!(2), json!(3)]);
    let transcript = collect(bridge().start(request).await).await;

    assert_eq!(transcript.outcome(), &ExecutionOutcome::success(json!(5)));
    let last = transcript.snapshots().pop().unwrap().clone();
    let names: Vec<&str> = last.variables.iter().map(|v| v.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b", "sum"]);
}

#[tokio::test]
async fn test_self_referential_object_is_bounded() {
    let source = "function main() {\n  const node = { name: \"a\" };\n  node.self = node;\n  return node;\n}";
    let transcript = collect(bridge().start(ExecutionRequest::new(source, "main")).await).await;

    let last = transcript.snapshots().pop().unwrap().clone();
    assert_eq!(last.line, 4);
    assert_eq!(
        last.variable("node").unwrap().serialized_value,
        json!({ "name": "a", "self": { "name": "a", "self": "[Object]" } })
    );
    assert_eq!(last.heap_objects.len(), 1);
    assert_eq!(last.heap_objects[0].class_name, "Object");

    // the result is bounded too
    let ExecutionOutcome::Success { value } = transcript.outcome() else {
        panic!("expected success, got {:?}", transcript.outcome());
    };
    let mut cursor = value;
    let mut levels = 0;
    while let Some(next) = cursor.get("self") {
        cursor = next;
        levels += 1;
        assert!(levels <= 32, "result nesting is unbounded");
    }
    assert_eq!(cursor, &json!("[Object]"));
}

#[tokio::test]
async fn test_collections_and_dates() {
    let source = "function main() {\n  const m = new Map([[\"a\", 1]]);\n  const s = new Set([1, 2]);\n  const d = new Date(0);\n  return [m.size, s.size];\n}";
    let transcript = collect(bridge().start(ExecutionRequest::new(source, "main")).await).await;

    let last = transcript.snapshots().pop().unwrap().clone();
    assert_eq!(last.variable("m").unwrap().serialized_value, json!({ "a": 1 }));
    assert_eq!(last.variable("s").unwrap().serialized_value, json!([1, 2]));
    assert_eq!(
        last.variable("d").unwrap().serialized_value,
        json!("1970-01-01T00:00:00.000Z")
    );
    let classes: Vec<&str> = last.heap_objects.iter().map(|o| o.class_name.as_str()).collect();
    assert_eq!(classes, vec!["Map", "Set", "Date"]);
    assert_eq!(transcript.outcome(), &ExecutionOutcome::success(json!([1, 2])));
}

#[tokio::test]
async fn test_throwing_getter_degrades_locally() {
    let source = "function main() {\n  const o = { get bad() { throw new Error(\"nope\"); }, ok: 1 };\n  return o.ok;\n}";
    let transcript = collect(bridge().start(ExecutionRequest::new(source, "main")).await).await;

    let snapshot = transcript.snapshots()[1].clone();
    assert_eq!(snapshot.line, 2);
    assert_eq!(
        snapshot.variable("o").unwrap().serialized_value,
        json!({ "bad": "[Unserializable: nope]", "ok": 1 })
    );
    assert_eq!(transcript.outcome(), &ExecutionOutcome::success(json!(1)));
}

#[tokio::test]
async fn test_async_entry_point_is_awaited() {
    let source = "async function main() {\n  const v = await Promise.resolve(4);\n  return v * 2;\n}";
    let value = bridge().run(ExecutionRequest::new(source, "main")).await.unwrap();
    assert_eq!(value, json!(8));
}

#[tokio::test]
async fn test_runtime_error_carries_line() {
    let source = "function main() {\n  const a = 1;\n  throw new Error(\"boom\");\n}";
    let err = bridge().run(ExecutionRequest::new(source, "main")).await.unwrap_err();
    assert_eq!(err.message, "Error: boom");
    assert_eq!(err.line, Some(3));
}

#[tokio::test]
async fn test_missing_entry_point() {
    let err = bridge()
        .run(ExecutionRequest::new("function other() { return 1; }", "main"))
        .await
        .unwrap_err();
    assert_eq!(err.message, "ReferenceError: main is not defined");

    let err = bridge()
        .run(ExecutionRequest::new("const main = 5;", "main"))
        .await
        .unwrap_err();
    assert_eq!(err.message, "TypeError: main is not a function");
}

#[tokio::test]
async fn test_top_level_return_is_rejected() {
    let err = bridge()
        .run(ExecutionRequest::new("return 5;\nfunction main() {}", "main"))
        .await
        .unwrap_err();
    assert_eq!(err.message, "SyntaxError: Illegal return statement");
}

#[tokio::test]
async fn test_returned_result_envelope_is_rejected() {
    let source = "return JSON.stringify({ ok: true, value: { t: \"number\", v: 42 } });\nfunction main() {\n  return 1;\n}";
    let err = bridge()
        .run(ExecutionRequest::new(source, "main"))
        .await
        .unwrap_err();
    assert_eq!(err.message, "SyntaxError: Illegal return statement");
    assert_eq!(err.line, Some(1));
}

#[tokio::test]
async fn test_compile_error_is_wrapper_error() {
    let source = "function main() {\n  let x = 1;\n  let y = ;\n}";
    let transcript = collect(bridge().start(ExecutionRequest::new(source, "main")).await).await;

    assert!(transcript.steps().is_empty());
    assert_eq!(transcript.events.len(), 1);
    let (message, line) = match &transcript.events[0] {
        ExecutionEvent::WrapperError { message, line } => (message.clone(), *line),
        other => panic!("expected wrapper-error, got {:?}", other),
    };
    assert!(message.starts_with("SyntaxError"), "message: {}", message);
    assert_eq!(line, Some(3));
    assert_eq!(transcript.outcome(), &ExecutionOutcome::failure(message, line));
}

#[tokio::test]
async fn test_instrumentation_error_is_wrapper_error() {
    let source = "function main() {\n  return `oops;\n}";
    let transcript = collect(bridge().start(ExecutionRequest::new(source, "main")).await).await;

    assert_matches!(
        transcript.events.as_slice(),
        [ExecutionEvent::WrapperError { line: Some(2), .. }]
    );
    assert_matches!(
        transcript.outcome(),
        ExecutionOutcome::Failure { line: Some(2), .. }
    );
}

#[tokio::test]
async fn test_console_and_timer_attribution() {
    let source = "function main() {\n  console.log(\"start\", 1);\n  setTimeout(() => console.error(\"later\"), 5);\n  return new Promise((resolve) => setTimeout(() => resolve(\"done\"), 20));\n}";
    let transcript = collect(bridge().start(ExecutionRequest::new(source, "main")).await).await;

    let output: Vec<(StdStream, String, u32)> = transcript
        .events
        .iter()
        .filter_map(|event| match event {
            ExecutionEvent::Stdout(out) => Some((out.stream, out.text.clone(), out.line)),
            _ => None,
        })
        .collect();
    assert_eq!(
        output,
        vec![
            (StdStream::Stdout, "start 1".to_string(), 2),
            (StdStream::Stderr, "later".to_string(), 3),
        ]
    );
    assert_eq!(transcript.outcome(), &ExecutionOutcome::success(json!("done")));
}

#[tokio::test]
async fn test_event_cap() {
    let source = "function main() {\n  let total = 0;\n  for (let i = 0; i < 100; i++) {\n    total += i;\n  }\n  return total;\n}";
    let mut config = SandboxConfig::default();
    config.limits.max_events = Some(5);
    let bridge = stepbox_sandbox::HostBridge::v8(config);

    let transcript = collect(bridge.start(ExecutionRequest::new(source, "main")).await).await;

    assert_eq!(transcript.events.len(), 6);
    assert_matches!(
        transcript.events.last(),
        Some(ExecutionEvent::Stdout(out)) if out.stream == StdStream::Stderr && out.text.contains("event limit")
    );
    assert_eq!(transcript.outcome(), &ExecutionOutcome::success(json!(4950)));
}

#[tokio::test]
async fn test_microtasks_restore_scheduling_line() {
    let source = "function main() {\n  queueMicrotask(() => console.log(\"micro\"));\n  Promise.resolve().then(() => console.log(\"then\"));\n  console.log(\"sync\");\n  return new Promise((resolve) => setTimeout(resolve, 5));\n}";
    let transcript = collect(bridge().start(ExecutionRequest::new(source, "main")).await).await;

    let output: Vec<(String, u32)> = transcript
        .events
        .iter()
        .filter_map(|event| match event {
            ExecutionEvent::Stdout(out) => Some((out.text.clone(), out.line)),
            _ => None,
        })
        .collect();
    assert_eq!(
        output,
        vec![
            ("sync".to_string(), 4),
            ("micro".to_string(), 2),
            ("then".to_string(), 3),
        ]
    );
    assert_eq!(transcript.outcome(), &ExecutionOutcome::success(json!(null)));
}

#[tokio::test]
async fn test_clear_interval_stops_ticks() {
    let source = "function main() {\n  let ticks = 0;\n  return new Promise((resolve) => {\n    const id = setInterval(() => {\n      ticks += 1;\n      if (ticks === 3) {\n        clearInterval(id);\n        setTimeout(() => resolve(ticks), 40);\n      }\n    }, 5);\n  });\n}";
    let value = bridge().run(ExecutionRequest::new(source, "main")).await.unwrap();
    assert_eq!(value, json!(3));
}

#[tokio::test]
async fn test_object_literals_in_conditionals() {
    let source = "function main(flag) {\n  const picked = flag ? { a: 1 } : { b: 2 };\n  const nested = flag\n    ? { kind: \"yes\", n: 1 }\n    : { kind: \"no\", n: 2 };\n  return [picked, nested.kind];\n}";
    let request = ExecutionRequest::new(source, "main").with_arguments(vec![json!(false)]);
    let transcript = collect(bridge().start(request).await).await;

    assert_eq!(
        transcript.outcome(),
        &ExecutionOutcome::success(json!([{ "b": 2 }, "no"]))
    );
    assert_eq!(transcript.steps(), vec![1, 2, 3, 6]);
    let last = transcript.snapshots().pop().unwrap().clone();
    assert_eq!(
        last.variable("nested").unwrap().serialized_value,
        json!({ "kind": "no", "n": 2 })
    );
}

const GETTER: &str = "function main() {\n  const o = {\n    get x() {\n      return 1;\n    },\n  };\n  const y = o.x + 1;\n  return y;\n}";

#[tokio::test]
async fn test_getters_read_by_snapshots_are_silent() {
    let transcript = collect(bridge().start(ExecutionRequest::new(GETTER, "main")).await).await;

    assert_eq!(transcript.outcome(), &ExecutionOutcome::success(json!(2)));
    // only the read on line 7 runs the getter body as program code
    let getter_steps = transcript.steps().into_iter().filter(|line| *line == 4).count();
    assert_eq!(getter_steps, 1);
    let getter_snapshots = transcript.snapshots().iter().filter(|s| s.line == 4).count();
    assert_eq!(getter_snapshots, 1);
    let last = transcript.snapshots().pop().unwrap().clone();
    assert_eq!(last.variable("o").unwrap().serialized_value, json!({ "x": 1 }));
}

#[tokio::test]
async fn test_getters_do_not_pause_manual_runs() {
    let auto = collect(bridge().start(ExecutionRequest::new(GETTER, "main")).await).await;
    let expected: Vec<u32> = auto.snapshots().iter().map(|s| s.line).collect();

    let mut controller = bridge()
        .start_manual(ExecutionRequest::new(GETTER, "main").with_timeout_ms(5_000))
        .await;
    let mut lines = Vec::new();
    while let Some(snapshot) = controller.next_snapshot().await {
        lines.push(snapshot.line);
        controller.step();
    }

    assert_eq!(lines, expected);
    assert_eq!(controller.outcome(), Some(&ExecutionOutcome::success(json!(2))));
}

#[tokio::test]
async fn test_large_typed_array_snapshot_is_bounded() {
    let source = "function main() {\n  const bytes = new Uint8Array(2000000);\n  let sum = 0;\n  for (let i = 0; i < 50; i++) {\n    sum += bytes.length;\n  }\n  return sum;\n}";
    let started = Instant::now();
    let transcript = collect(bridge().start(ExecutionRequest::new(source, "main")).await).await;

    assert_eq!(transcript.outcome(), &ExecutionOutcome::success(json!(100_000_000)));
    assert!(started.elapsed() < Duration::from_secs(4), "took {:?}", started.elapsed());
    let last = transcript.snapshots().pop().unwrap().clone();
    let mut expected = vec![json!(0); 10];
    expected.push(json!("... 1999990 more"));
    assert_eq!(last.variable("bytes").unwrap().serialized_value, json!(expected));
    assert!(last.heap_objects.iter().any(|o| o.class_name == "Uint8Array"));
}

#[tokio::test]
async fn test_long_strings_and_wide_objects_are_cut() {
    let source = "function main() {\n  const text = \"x\".repeat(5000);\n  const wide = {};\n  for (let i = 0; i < 12; i++) wide[\"k\" + i] = i;\n  return text.length;\n}";
    let transcript = collect(bridge().start(ExecutionRequest::new(source, "main")).await).await;

    // the result itself is not cut
    assert_eq!(transcript.outcome(), &ExecutionOutcome::success(json!(5000)));
    let last = transcript.snapshots().pop().unwrap().clone();
    let text = last.variable("text").unwrap().serialized_value.as_str().unwrap().to_string();
    assert!(text.starts_with(&"x".repeat(1000)));
    assert!(text.ends_with("... (5000 chars)"));
    assert_eq!(text.len(), 1000 + "... (5000 chars)".len());

    let wide = last.variable("wide").unwrap().serialized_value.clone();
    let wide = wide.as_object().unwrap();
    assert_eq!(wide.len(), 11);
    assert_eq!(wide.get("..."), Some(&json!("more")));
    assert_eq!(wide.get("k9"), Some(&json!(9)));
    assert!(wide.get("k10").is_none());
}
