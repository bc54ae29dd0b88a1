//! V8 JavaScript runtime using deno_core
//!
//! Each launch instruments the source on the caller's task, then evaluates it
//! on a dedicated OS thread that owns a fresh isolate and a current-thread
//! tokio runtime. The host talks to the thread only through the message
//! channel and the [`ContextControl`] handle.

mod bootstrap;
mod ops;

use crate::config::SnapshotOptions;
use crate::instrument::{InstrumentedProgram, Instrumenter, LineMap};
use crate::limits::ResourceLimits;
use crate::runtime::{
    ContextControl, ContinueSignal, IsolateMessage, LaunchSpec, LaunchedContext, Runtime,
};
use crate::serializer::{self, RawValue};
use crate::session::ExecutionId;
use crate::{Result, SandboxError};
use async_trait::async_trait;
use deno_core::{v8, JsRuntime, PollEventLoopOptions, RuntimeOptions};
use ops::{CurrentLine, EntryArguments, EventSink, StepGate};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex, MutexGuard};
use stepbox_common::{ExecutionEvent, ExecutionMode, ExecutionOutcome};
use tokio::sync::{mpsc, oneshot, Notify};

const PROGRAM_NAME: &str = "stepbox:program";

/// V8 JavaScript runtime
#[derive(Debug, Clone, Default)]
pub struct V8Runtime {
    /// Stack size for isolate threads (None = platform default)
    stack_size: Option<usize>,
}

impl V8Runtime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the stack size of isolate threads
    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }
}

#[async_trait]
impl Runtime for V8Runtime {
    async fn launch(&self, spec: LaunchSpec) -> Result<LaunchedContext> {
        let program = match Instrumenter::new(spec.snapshot).instrument(
            &spec.source_text,
            &spec.entry_point,
            spec.mode,
        ) {
            Ok(program) => program,
            Err(err) => {
                tracing::debug!(execution_id = %spec.id, error = %err, "instrumentation failed");
                let message = err.to_string();
                let line = err.line();
                return Ok(LaunchedContext::finished(vec![
                    IsolateMessage::Event(ExecutionEvent::WrapperError {
                        message: message.clone(),
                        line,
                    }),
                    IsolateMessage::Finished(ExecutionOutcome::failure(message, line)),
                ]));
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = oneshot::channel();
        let (gate_tx, gate_rx) = match spec.mode {
            ExecutionMode::Manual => {
                let (gate_tx, gate_rx) = std_mpsc::channel();
                (Some(gate_tx), Some(gate_rx))
            }
            ExecutionMode::Auto => (None, None),
        };
        let control = Arc::new(V8Control::new(gate_tx));

        let isolate = Isolate {
            id: spec.id,
            program,
            arguments: spec.arguments,
            snapshot: spec.snapshot,
            limits: spec.limits,
            tx,
            gate: gate_rx,
            control: control.clone(),
        };

        let mut builder = std::thread::Builder::new().name(format!("stepbox-{}", spec.id));
        if let Some(stack_size) = self.stack_size {
            builder = builder.stack_size(stack_size);
        }
        builder
            .spawn(move || {
                isolate.run();
                let _ = closed_tx.send(());
            })
            .map_err(|e| SandboxError::Launch(e.to_string()))?;

        Ok(LaunchedContext {
            messages: rx,
            control,
            closed: closed_rx,
        })
    }

    fn name(&self) -> &str {
        "v8"
    }
}

#[derive(Default)]
struct ControlState {
    handle: Option<v8::IsolateHandle>,
    gate: Option<std_mpsc::Sender<ContinueSignal>>,
    torn_down: bool,
}

/// Host-side handle to one isolate thread
struct V8Control {
    state: Mutex<ControlState>,
    cancelled: Notify,
}

impl V8Control {
    fn new(gate: Option<std_mpsc::Sender<ContinueSignal>>) -> Self {
        Self {
            state: Mutex::new(ControlState {
                gate,
                ..ControlState::default()
            }),
            cancelled: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Publish the isolate handle. Returns `false` if teardown already happened,
    /// in which case the program must not start.
    fn register(&self, handle: v8::IsolateHandle) -> bool {
        let mut state = self.lock();
        if state.torn_down {
            return false;
        }
        state.handle = Some(handle);
        true
    }

    fn is_torn_down(&self) -> bool {
        self.lock().torn_down
    }
}

impl ContextControl for V8Control {
    fn release(&self, signal: ContinueSignal) {
        if let Some(gate) = &self.lock().gate {
            let _ = gate.send(signal);
        }
    }

    fn teardown(&self) {
        {
            let mut state = self.lock();
            if state.torn_down {
                return;
            }
            state.torn_down = true;
            // dropping the sender wakes a paused gate
            state.gate = None;
            if let Some(handle) = &state.handle {
                handle.terminate_execution();
            }
        }
        self.cancelled.notify_one();
    }
}

/// State for the near-heap-limit callback
struct HeapLimitState {
    handle: v8::IsolateHandle,
    triggered: AtomicBool,
}

/// Terminates execution when the heap nears its cap and grants 1MB of grace
/// so the termination can propagate.
extern "C" fn near_heap_limit_callback(
    data: *mut std::ffi::c_void,
    current_heap_limit: usize,
    _initial_heap_limit: usize,
) -> usize {
    // SAFETY: `data` points to the `HeapLimitState` boxed in `Isolate::execute`,
    // which is dropped only after the `JsRuntime` that invokes this callback.
    let state = unsafe { &*(data as *const HeapLimitState) };
    if !state.triggered.swap(true, Ordering::SeqCst) {
        state.handle.terminate_execution();
    }
    current_heap_limit + 1024 * 1024
}

/// Resolved value of the compiled program
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    nonce: String,
    ok: bool,
    #[serde(default)]
    value: Option<RawValue>,
    #[serde(default)]
    message: Option<String>,
}

/// Everything the isolate thread owns
struct Isolate {
    id: ExecutionId,
    program: InstrumentedProgram,
    arguments: Vec<serde_json::Value>,
    snapshot: SnapshotOptions,
    limits: ResourceLimits,
    tx: mpsc::UnboundedSender<IsolateMessage>,
    gate: Option<std_mpsc::Receiver<ContinueSignal>>,
    control: Arc<V8Control>,
}

impl Isolate {
    fn run(self) {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::error!(execution_id = %self.id, error = %e, "failed to build isolate runtime");
                return;
            }
        };
        let id = self.id;
        let tx = self.tx.clone();
        let start = std::time::Instant::now();

        if let Some(outcome) = runtime.block_on(self.execute()) {
            tracing::debug!(
                execution_id = %id,
                success = outcome.is_success(),
                duration_ms = start.elapsed().as_millis() as u64,
                "isolate finished"
            );
            let _ = tx.send(IsolateMessage::Finished(outcome));
        }
    }

    /// Evaluate the program. `None` means teardown won before the program
    /// started and nothing should be reported.
    async fn execute(self) -> Option<ExecutionOutcome> {
        let Isolate {
            id,
            program,
            arguments,
            snapshot,
            limits,
            tx,
            gate,
            control,
        } = self;

        let create_params = limits
            .max_heap_bytes
            .map(|max_bytes| v8::CreateParams::default().heap_limits(0, max_bytes));
        let mut runtime = JsRuntime::new(RuntimeOptions {
            extensions: vec![ops::sandbox_extension()],
            create_params,
            ..Default::default()
        });

        {
            let op_state = runtime.op_state();
            let mut state = op_state.borrow_mut();
            state.put(CurrentLine::default());
            state.put(EventSink::new(tx.clone(), limits.clone()));
            state.put(serializer::SnapshotBuilder::new(
                program.entry_point.clone(),
                snapshot,
            ));
            state.put(EntryArguments(arguments));
            state.put(StepGate::new(gate));
        }

        let heap_state = Box::new(HeapLimitState {
            handle: runtime.v8_isolate().thread_safe_handle(),
            triggered: AtomicBool::new(false),
        });
        runtime.v8_isolate().add_near_heap_limit_callback(
            near_heap_limit_callback,
            &*heap_state as *const HeapLimitState as *mut std::ffi::c_void,
        );

        if !control.register(runtime.v8_isolate().thread_safe_handle()) {
            tracing::debug!(execution_id = %id, "torn down before start");
            drop(runtime);
            return None;
        }

        let outcome = evaluate(&mut runtime, &program, &snapshot, &tx, &control).await;
        let outcome = if heap_state.triggered.load(Ordering::SeqCst) {
            ExecutionOutcome::failure("heap limit exceeded", current_line(&mut runtime))
        } else {
            outcome
        };

        // the heap callback state must outlive the isolate
        drop(runtime);
        drop(heap_state);
        Some(outcome)
    }
}

async fn evaluate(
    runtime: &mut JsRuntime,
    program: &InstrumentedProgram,
    options: &SnapshotOptions,
    tx: &mpsc::UnboundedSender<IsolateMessage>,
    control: &V8Control,
) -> ExecutionOutcome {
    if let Err(e) = runtime.execute_script(bootstrap::BOOTSTRAP_NAME, bootstrap::BOOTSTRAP_JS) {
        return ExecutionOutcome::failure(format!("failed to initialize isolate: {}", e), None);
    }

    let promise = match runtime.execute_script(PROGRAM_NAME, program.source.clone()) {
        Ok(promise) => promise,
        Err(e) => {
            if control.is_torn_down() {
                return terminated(runtime);
            }
            // the body runs inside an async function, so only compile errors
            // escape evaluation
            let (message, line) = compile_error(&e.to_string(), &program.line_map);
            let _ = tx.send(IsolateMessage::Event(ExecutionEvent::WrapperError {
                message: message.clone(),
                line,
            }));
            return ExecutionOutcome::failure(message, line);
        }
    };

    let resolve = runtime.resolve(promise);
    let settled = tokio::select! {
        result = runtime.with_event_loop_promise(resolve, PollEventLoopOptions::default()) => Some(result),
        _ = control.cancelled.notified() => None,
    };

    let global = match settled {
        Some(Ok(global)) => global,
        Some(Err(e)) => {
            if control.is_torn_down() {
                return terminated(runtime);
            }
            return ExecutionOutcome::failure(runtime_error(&e.to_string()), current_line(runtime));
        }
        None => return terminated(runtime),
    };

    let text = {
        let scope = &mut runtime.handle_scope();
        let local = v8::Local::new(scope, global);
        local.to_rust_string_lossy(scope)
    };
    settle_envelope(&text, &program.nonce, options, current_line(runtime))
}

fn current_line(runtime: &mut JsRuntime) -> Option<u32> {
    let state = runtime.op_state();
    let state = state.borrow();
    let line = state.try_borrow::<CurrentLine>().and_then(CurrentLine::get);
    line
}

fn terminated(runtime: &mut JsRuntime) -> ExecutionOutcome {
    ExecutionOutcome::failure("execution terminated by host", current_line(runtime))
}

/// Map the program's resolved text to an outcome
fn settle_envelope(
    text: &str,
    nonce: &str,
    options: &SnapshotOptions,
    line: Option<u32>,
) -> ExecutionOutcome {
    // a top-level `return` in the submitted body resolves the wrapper early,
    // with whatever it returned
    let illegal_return = || ExecutionOutcome::failure("SyntaxError: Illegal return statement", line);
    let envelope = match serde_json::from_str::<Envelope>(text) {
        Ok(envelope) if envelope.nonce == nonce => envelope,
        _ => return illegal_return(),
    };
    match envelope {
        Envelope { ok: true, value, .. } => {
            let value = match value {
                None | Some(RawValue::Undefined) => serde_json::Value::Null,
                Some(raw) => serializer::serialize(&serializer::classify(raw), options.result_depth),
            };
            ExecutionOutcome::success(value)
        }
        Envelope { message, .. } => ExecutionOutcome::failure(
            message.unwrap_or_else(|| "Uncaught exception".to_string()),
            line,
        ),
    }
}

/// First line of an engine error without the `Uncaught` prefixes
fn runtime_error(error: &str) -> String {
    let first = error.lines().next().unwrap_or(error).trim();
    let first = first.strip_prefix("Uncaught ").unwrap_or(first);
    let first = first.strip_prefix("(in promise) ").unwrap_or(first);
    first.to_string()
}

/// Message and source line of a compile error reported against the program
fn compile_error(error: &str, line_map: &LineMap) -> (String, Option<u32>) {
    let message = runtime_error(error);
    let marker = format!("{}:", PROGRAM_NAME);
    let line = error.find(&marker).and_then(|at| {
        let rest = &error[at + marker.len()..];
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        digits.parse::<u32>().ok()
    });
    let line = line.and_then(|compiled| line_map.original_line(compiled));
    (message, line)
}
