//! Host ops backing the isolate's console, timers and instrumentation hooks

use crate::limits::ResourceLimits;
use crate::runtime::{ContinueSignal, IsolateMessage};
use crate::serializer::{RawValue, SnapshotBuilder};
use deno_core::{op2, Extension, OpState};
use deno_error::JsErrorBox;
use std::sync::mpsc::Receiver;
use std::time::Duration;
use stepbox_common::{ExecutionEvent, StdStream, StdoutEvent, StepEvent};
use tokio::sync::mpsc::UnboundedSender;

/// Line of the most recent step, or the line restored by a deferred callback
#[derive(Debug, Default, Clone, Copy)]
pub struct CurrentLine(pub u32);

impl CurrentLine {
    pub fn get(&self) -> Option<u32> {
        (self.0 > 0).then_some(self.0)
    }
}

/// Arguments handed to the entry point
pub struct EntryArguments(pub Vec<serde_json::Value>);

/// Forwards events to the host, enforcing the per-run event cap
pub struct EventSink {
    tx: UnboundedSender<IsolateMessage>,
    limits: ResourceLimits,
    emitted: usize,
    capped: bool,
}

impl EventSink {
    pub fn new(tx: UnboundedSender<IsolateMessage>, limits: ResourceLimits) -> Self {
        Self {
            tx,
            limits,
            emitted: 0,
            capped: false,
        }
    }

    pub fn emit(&mut self, event: ExecutionEvent, line: u32) {
        if self.limits.allows_event(self.emitted) {
            self.emitted += 1;
            let _ = self.tx.send(IsolateMessage::Event(event));
            return;
        }
        if !self.capped {
            self.capped = true;
            tracing::warn!(emitted = self.emitted, "event limit reached");
            let _ = self.tx.send(IsolateMessage::Event(ExecutionEvent::Stdout(StdoutEvent {
                stream: StdStream::Stderr,
                text: format!(
                    "event limit of {} reached; further events are dropped",
                    self.emitted
                ),
                line,
            })));
        }
    }
}

/// Suspension gate for manual mode. Auto-mode runs have no receiver and
/// never block.
pub struct StepGate {
    signals: Option<Receiver<ContinueSignal>>,
    resumed: bool,
}

impl StepGate {
    pub fn new(signals: Option<Receiver<ContinueSignal>>) -> Self {
        Self {
            signals,
            resumed: false,
        }
    }

    /// Block until the host releases this suspension point. Returns `false`
    /// once the host side has gone away.
    fn wait(&mut self, line: u32) -> bool {
        if self.resumed {
            return true;
        }
        let Some(signals) = &self.signals else {
            return true;
        };
        tracing::trace!(line, "paused");
        match signals.recv() {
            Ok(ContinueSignal::Step) => true,
            Ok(ContinueSignal::Resume) => {
                self.resumed = true;
                true
            }
            Err(_) => {
                self.signals = None;
                false
            }
        }
    }
}

#[op2(fast)]
fn op_sandbox_step(state: &mut OpState, line: u32) {
    state.borrow_mut::<CurrentLine>().0 = line;
    state
        .borrow_mut::<EventSink>()
        .emit(ExecutionEvent::Step(StepEvent { line }), line);
}

#[op2(fast)]
fn op_sandbox_set_line(state: &mut OpState, line: u32) {
    state.borrow_mut::<CurrentLine>().0 = line;
}

#[op2(fast)]
fn op_sandbox_current_line(state: &mut OpState) -> u32 {
    state.borrow::<CurrentLine>().0
}

/// Build and forward a snapshot from the captured `[name, value]` pairs
#[op2(fast)]
fn op_sandbox_snapshot(
    state: &mut OpState,
    line: u32,
    in_entry: bool,
    #[string] payload: String,
) -> Result<(), JsErrorBox> {
    let captured: Vec<(String, RawValue)> = serde_json::from_str(&payload).map_err(|e| {
        tracing::warn!(line, error = %e, "dropping malformed snapshot");
        JsErrorBox::type_error(format!("Malformed snapshot: {}", e))
    })?;
    let snapshot = state
        .borrow_mut::<SnapshotBuilder>()
        .build(line, in_entry, captured);
    state
        .borrow_mut::<EventSink>()
        .emit(ExecutionEvent::Snapshot(snapshot), line);
    Ok(())
}

#[op2(fast)]
fn op_sandbox_print(state: &mut OpState, #[string] stream: &str, #[string] text: &str) {
    let stream = match stream {
        "stderr" => StdStream::Stderr,
        _ => StdStream::Stdout,
    };
    let line = state.borrow::<CurrentLine>().0;
    state.borrow_mut::<EventSink>().emit(
        ExecutionEvent::Stdout(StdoutEvent {
            stream,
            text: text.to_string(),
            line,
        }),
        line,
    );
}

/// Manual-mode suspension point; blocks the isolate thread
#[op2(fast)]
fn op_sandbox_pause(state: &mut OpState, line: u32) -> bool {
    state.borrow_mut::<StepGate>().wait(line)
}

#[op2(async)]
async fn op_sandbox_sleep(ms: f64) {
    let ms = if ms.is_finite() { ms.max(0.0) } else { 0.0 };
    tokio::time::sleep(Duration::from_millis(ms as u64)).await;
}

#[op2]
#[serde]
fn op_sandbox_args(state: &mut OpState) -> Vec<serde_json::Value> {
    state.borrow::<EntryArguments>().0.clone()
}

/// Extension carrying every sandbox op
pub fn sandbox_extension() -> Extension {
    let ops = vec![
        op_sandbox_step(),
        op_sandbox_set_line(),
        op_sandbox_current_line(),
        op_sandbox_snapshot(),
        op_sandbox_print(),
        op_sandbox_pause(),
        op_sandbox_sleep(),
        op_sandbox_args(),
    ];

    Extension {
        name: "stepbox_sandbox",
        ops: std::borrow::Cow::Owned(ops),
        ..Default::default()
    }
}
