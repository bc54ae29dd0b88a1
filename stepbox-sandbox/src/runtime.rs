//! Runtime trait: how the bridge starts an isolated context

#[cfg(test)]
pub(crate) mod scripted;
#[cfg(feature = "v8")]
pub mod v8;

use crate::config::SnapshotOptions;
use crate::limits::ResourceLimits;
use crate::session::ExecutionId;
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use stepbox_common::{ExecutionEvent, ExecutionMode, ExecutionOutcome, ExecutionRequest};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

#[cfg(feature = "v8")]
pub use v8::V8Runtime;

/// Everything a runtime needs to start one run
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub id: ExecutionId,
    pub source_text: String,
    pub entry_point: String,
    pub arguments: Vec<Value>,
    pub mode: ExecutionMode,
    pub snapshot: SnapshotOptions,
    pub limits: ResourceLimits,
}

impl LaunchSpec {
    pub fn new(id: ExecutionId, request: ExecutionRequest) -> Self {
        Self {
            id,
            source_text: request.source_text,
            entry_point: request.entry_point_name,
            arguments: request.arguments,
            mode: request.mode,
            snapshot: SnapshotOptions::default(),
            limits: ResourceLimits::default(),
        }
    }
}

/// Messages from an isolated context, delivered in order on one channel
#[derive(Debug, Clone, PartialEq)]
pub enum IsolateMessage {
    Event(ExecutionEvent),
    /// The context's own result; always the last message it sends
    Finished(ExecutionOutcome),
}

/// Signal releasing a paused manual-mode context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinueSignal {
    /// Run until the next suspension point
    Step,
    /// Stop pausing and run to completion
    Resume,
}

/// Host-side control over a running context
pub trait ContextControl: Send + Sync {
    /// Release a paused context. Ignored once the context is gone.
    fn release(&self, signal: ContinueSignal);

    /// Stop the context and drop its resources. Must be idempotent.
    fn teardown(&self);
}

/// A started context: its message stream, its control, and a signal fired
/// once it has released its resources
pub struct LaunchedContext {
    pub messages: mpsc::UnboundedReceiver<IsolateMessage>,
    pub control: Arc<dyn ContextControl>,
    pub closed: oneshot::Receiver<()>,
}

impl LaunchedContext {
    /// A context that never ran: its messages are already queued
    pub fn finished(messages: Vec<IsolateMessage>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        for message in messages {
            let _ = tx.send(message);
        }
        let (closed_tx, closed_rx) = oneshot::channel();
        let _ = closed_tx.send(());
        Self {
            messages: rx,
            control: Arc::new(NoopControl),
            closed: closed_rx,
        }
    }
}

struct NoopControl;

impl ContextControl for NoopControl {
    fn release(&self, _signal: ContinueSignal) {}
    fn teardown(&self) {}
}

/// Runtime abstraction for starting isolated contexts
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Start a context for one run. An `Err` means the context itself could not
    /// be created; failures of the submitted code arrive as messages instead.
    async fn launch(&self, spec: LaunchSpec) -> Result<LaunchedContext>;

    /// Get runtime name
    fn name(&self) -> &str;
}
