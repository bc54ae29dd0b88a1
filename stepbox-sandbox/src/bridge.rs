//! Host bridge - main entry point
//!
//! Every request gets its own isolated context, one wall-clock timer and a
//! forwarding task that settles the request exactly once: natural outcome,
//! timeout, host termination or transport failure, whichever comes first.
//! The context is torn down exactly once, before the outcome is published.

use crate::config::SandboxConfig;
use crate::controller::StepController;
use crate::runtime::{ContextControl, ContinueSignal, IsolateMessage, LaunchSpec, LaunchedContext, Runtime};
use crate::session::{ExecutionId, SessionState, SessionStatus};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use stepbox_common::{
    ExecutionEvent, ExecutionFailure, ExecutionMode, ExecutionOutcome, ExecutionRequest,
    HostCommand, SessionMessage,
};
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;

const TERMINATED_MESSAGE: &str = "execution terminated by host";
const TRANSPORT_MESSAGE: &str = "isolated context exited unexpectedly";

/// Runs untrusted source through a [`Runtime`] and tracks active sessions
pub struct HostBridge {
    runtime: Arc<dyn Runtime>,
    config: SandboxConfig,
    /// Sessions started through this bridge
    sessions: Arc<RwLock<HashMap<ExecutionId, Arc<RwLock<SessionState>>>>>,
}

impl HostBridge {
    /// Create a bridge with the default configuration
    pub fn new(runtime: impl Runtime + 'static) -> Self {
        Self::with_config(runtime, SandboxConfig::default())
    }

    pub fn with_config(runtime: impl Runtime + 'static, config: SandboxConfig) -> Self {
        Self {
            runtime: Arc::new(runtime),
            config,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Bridge backed by the V8 runtime
    #[cfg(feature = "v8")]
    pub fn v8(config: SandboxConfig) -> Self {
        let mut runtime = crate::runtime::V8Runtime::new();
        if let Some(bytes) = config.limits.thread_stack_bytes {
            runtime = runtime.with_stack_size(bytes);
        }
        Self::with_config(runtime, config)
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Get the runtime name
    pub fn runtime_name(&self) -> &str {
        self.runtime.name()
    }

    /// Single-shot run: resolves with the entry point's value or rejects with
    /// the failure message and line
    pub async fn run(&self, request: ExecutionRequest) -> Result<Value, ExecutionFailure> {
        self.start(request).await.outcome().await.into_result()
    }

    /// Start a run and stream its messages. Sessions that have settled and
    /// closed their context are forgotten first.
    pub async fn start(&self, request: ExecutionRequest) -> RunHandle {
        self.cleanup_completed().await;

        let id = ExecutionId::new();
        let timeout = self.config.timeout_for(request.mode, request.timeout_ms);
        let mode = request.mode;

        tracing::info!(
            execution_id = %id,
            runtime = self.runtime.name(),
            code_len = request.source_text.len(),
            entry_point = %request.entry_point_name,
            ?mode,
            timeout_ms = timeout.as_millis() as u64,
            "Starting execution"
        );

        let state = Arc::new(RwLock::new(
            SessionState::new(id, mode).with_history_limit(self.config.history_limit),
        ));
        self.sessions.write().await.insert(id, state.clone());

        let spec = LaunchSpec {
            snapshot: self.config.snapshot,
            limits: self.config.limits.clone(),
            ..LaunchSpec::new(id, request)
        };
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let session = ExecutionSession {
            id,
            state: state.clone(),
            out: out_tx,
            control: None,
            settled: false,
            max_lines: self.config.output_buffer_lines,
        };
        tokio::spawn(drive_session(
            self.runtime.clone(),
            spec,
            timeout,
            self.config.teardown_grace,
            session,
            command_rx,
        ));

        RunHandle {
            id,
            messages: out_rx,
            commands: command_tx,
            state,
        }
    }

    /// Start a manual-mode run driven through a [`StepController`]
    pub async fn start_manual(&self, request: ExecutionRequest) -> StepController {
        let request = ExecutionRequest {
            mode: ExecutionMode::Manual,
            ..request
        };
        StepController::new(self.start(request).await, self.config.history_limit)
    }

    /// Get session state by ID
    pub async fn get_session(&self, id: ExecutionId) -> Option<SessionState> {
        let sessions = self.sessions.read().await;
        let state = sessions.get(&id)?.clone();
        drop(sessions);
        let state = state.read().await.clone();
        Some(state)
    }

    /// List all tracked sessions
    pub async fn list_sessions(&self) -> Vec<SessionState> {
        let sessions = self.sessions.read().await;
        let mut states = Vec::new();
        for state in sessions.values() {
            states.push(state.read().await.clone());
        }
        states
    }

    /// Forget sessions that have settled and released their context
    pub async fn cleanup_completed(&self) {
        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, state| match state.try_read() {
            Ok(state) => !(state.status.is_terminal() && state.context_closed),
            Err(_) => true,
        });
    }
}

/// Host side of one running session
pub struct RunHandle {
    id: ExecutionId,
    messages: mpsc::UnboundedReceiver<SessionMessage>,
    commands: mpsc::UnboundedSender<HostCommand>,
    state: Arc<RwLock<SessionState>>,
}

impl RunHandle {
    pub fn id(&self) -> ExecutionId {
        self.id
    }

    /// Next event or the terminal outcome. `None` after the outcome.
    pub async fn next_message(&mut self) -> Option<SessionMessage> {
        self.messages.recv().await
    }

    /// Send a control command. Commands after settlement are ignored.
    pub fn send(&self, command: HostCommand) {
        let _ = self.commands.send(command);
    }

    /// Abort the run. Idempotent.
    pub fn terminate(&self) {
        self.send(HostCommand::Terminate);
    }

    /// Get current session state
    pub async fn state(&self) -> SessionState {
        self.state.read().await.clone()
    }

    /// Drain the stream and return the terminal outcome
    pub async fn outcome(mut self) -> ExecutionOutcome {
        while let Some(message) = self.messages.recv().await {
            if let SessionMessage::Outcome(outcome) = message {
                return outcome;
            }
        }
        ExecutionOutcome::failure(TRANSPORT_MESSAGE, None)
    }

    /// Wait until the context has released its resources
    pub async fn wait_closed(&self, within: Duration) -> bool {
        let deadline = Instant::now() + within;
        loop {
            if self.state.read().await.context_closed {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Forwarding state of one session; owns the settled flag
struct ExecutionSession {
    id: ExecutionId,
    state: Arc<RwLock<SessionState>>,
    out: mpsc::UnboundedSender<SessionMessage>,
    control: Option<Arc<dyn ContextControl>>,
    settled: bool,
    max_lines: usize,
}

impl ExecutionSession {
    async fn forward(&mut self, event: ExecutionEvent) {
        if self.settled {
            return;
        }
        self.state.write().await.record(&event, self.max_lines);
        let _ = self.out.send(SessionMessage::Event(event));
    }

    async fn last_line(&self) -> Option<u32> {
        self.state.read().await.last_line
    }

    fn teardown(&mut self) {
        if let Some(control) = self.control.take() {
            tracing::debug!(execution_id = %self.id, "tearing down context");
            control.teardown();
        }
    }

    async fn settle(&mut self, outcome: ExecutionOutcome, status: SessionStatus) {
        if self.settled {
            return;
        }
        self.settled = true;
        {
            let mut state = self.state.write().await;
            state.status = status;
            state.outcome = Some(outcome.clone());
        }
        match &outcome {
            ExecutionOutcome::Success { .. } => {
                tracing::info!(execution_id = %self.id, ?status, "Execution settled")
            }
            ExecutionOutcome::Failure { message, line } => {
                tracing::info!(execution_id = %self.id, ?status, line, %message, "Execution settled")
            }
        }
        let _ = self.out.send(SessionMessage::Outcome(outcome));
    }
}

fn status_of(outcome: &ExecutionOutcome) -> SessionStatus {
    if outcome.is_success() {
        SessionStatus::Completed
    } else {
        SessionStatus::Failed
    }
}

fn timeout_message(timeout: Duration) -> String {
    format!("Execution timed out after {}ms", timeout.as_millis())
}

async fn drive_session(
    runtime: Arc<dyn Runtime>,
    spec: LaunchSpec,
    timeout: Duration,
    teardown_grace: Duration,
    mut session: ExecutionSession,
    mut commands: mpsc::UnboundedReceiver<HostCommand>,
) {
    let deadline = Instant::now() + timeout;
    session.state.write().await.status = SessionStatus::Running;

    let launched = tokio::select! {
        result = runtime.launch(spec) => Some(result),
        _ = tokio::time::sleep_until(deadline) => None,
    };
    let LaunchedContext {
        mut messages,
        control,
        closed,
    } = match launched {
        Some(Ok(context)) => context,
        Some(Err(e)) => {
            tracing::error!(execution_id = %session.id, error = %e, "Failed to launch context");
            session
                .settle(
                    ExecutionOutcome::failure(format!("{}: {}", TRANSPORT_MESSAGE, e), None),
                    SessionStatus::Failed,
                )
                .await;
            return;
        }
        None => {
            let outcome = ExecutionOutcome::failure(timeout_message(timeout), None);
            session.settle(outcome, SessionStatus::TimedOut).await;
            return;
        }
    };
    session.control = Some(control.clone());

    let mut commands_open = true;
    let (outcome, status) = loop {
        tokio::select! {
            message = messages.recv() => match message {
                Some(IsolateMessage::Event(event)) => session.forward(event).await,
                Some(IsolateMessage::Finished(outcome)) => {
                    let status = status_of(&outcome);
                    break (outcome, status);
                }
                None => {
                    tracing::warn!(execution_id = %session.id, "context channel closed without an outcome");
                    let line = session.last_line().await;
                    break (ExecutionOutcome::failure(TRANSPORT_MESSAGE, line), SessionStatus::Failed);
                }
            },
            command = commands.recv(), if commands_open => match command {
                Some(HostCommand::Step) => control.release(ContinueSignal::Step),
                Some(HostCommand::Resume) => control.release(ContinueSignal::Resume),
                Some(HostCommand::Terminate) => {
                    let line = session.last_line().await;
                    break (ExecutionOutcome::failure(TERMINATED_MESSAGE, line), SessionStatus::Terminated);
                }
                None => commands_open = false,
            },
            _ = tokio::time::sleep_until(deadline) => {
                tracing::warn!(execution_id = %session.id, timeout_ms = timeout.as_millis() as u64, "Execution timed out");
                let line = session.last_line().await;
                break (ExecutionOutcome::failure(timeout_message(timeout), line), SessionStatus::TimedOut);
            }
        }
    };

    session.teardown();
    session.settle(outcome, status).await;
    drop(messages);

    match tokio::time::timeout(teardown_grace, closed).await {
        Ok(_) => {
            session.state.write().await.context_closed = true;
            tracing::debug!(execution_id = %session.id, "context closed");
        }
        Err(_) => {
            tracing::warn!(
                execution_id = %session.id,
                grace_ms = teardown_grace.as_millis() as u64,
                "context did not close within grace period"
            );
        }
    }
}
