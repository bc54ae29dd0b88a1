//! Manual-mode stepping on top of a [`RunHandle`]

use crate::bridge::RunHandle;
use crate::session::{ExecutionId, SessionState, SnapshotHistory};
use stepbox_common::{ExecutionEvent, ExecutionOutcome, HostCommand, SessionMessage, Snapshot};

/// Where a manual run stands from the host's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerStatus {
    /// Started, nothing observed yet
    Idle,
    /// Executing or paused at a suspension point
    Running,
    Completed,
    Failed,
    Terminated,
}

impl ControllerStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Terminated)
    }
}

/// Drives a manual-mode run one statement at a time and keeps the snapshots
/// it has seen, so the host can step back by replaying them.
pub struct StepController {
    handle: RunHandle,
    status: ControllerStatus,
    history: SnapshotHistory,
    outcome: Option<ExecutionOutcome>,
}

impl StepController {
    pub(crate) fn new(handle: RunHandle, history_limit: usize) -> Self {
        Self {
            handle,
            status: ControllerStatus::Idle,
            history: SnapshotHistory::bounded(history_limit),
            outcome: None,
        }
    }

    pub fn id(&self) -> ExecutionId {
        self.handle.id()
    }

    pub fn status(&self) -> ControllerStatus {
        self.status
    }

    /// Release one pending suspension point. Returns `false` (and does
    /// nothing) once the run has settled.
    pub fn step(&mut self) -> bool {
        self.command(HostCommand::Step)
    }

    /// Stop pausing and run to completion
    pub fn resume(&mut self) -> bool {
        self.command(HostCommand::Resume)
    }

    /// Tear the run down. Always succeeds; repeated calls are no-ops.
    pub fn terminate(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.handle.terminate();
        self.status = ControllerStatus::Terminated;
    }

    fn command(&mut self, command: HostCommand) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.handle.send(command);
        self.status = ControllerStatus::Running;
        true
    }

    /// Next message from the run, recording snapshots and the outcome
    pub async fn next_message(&mut self) -> Option<SessionMessage> {
        let message = self.handle.next_message().await?;
        match &message {
            SessionMessage::Event(ExecutionEvent::Snapshot(snapshot)) => {
                self.history.push(snapshot.clone());
                if self.status == ControllerStatus::Idle {
                    self.status = ControllerStatus::Running;
                }
            }
            SessionMessage::Event(_) => {
                if self.status == ControllerStatus::Idle {
                    self.status = ControllerStatus::Running;
                }
            }
            SessionMessage::Outcome(outcome) => {
                if self.status != ControllerStatus::Terminated {
                    self.status = if outcome.is_success() {
                        ControllerStatus::Completed
                    } else {
                        ControllerStatus::Failed
                    };
                }
                self.outcome = Some(outcome.clone());
            }
        }
        Some(message)
    }

    /// Read messages until the next snapshot (the run is then paused at its
    /// line) or until the run settles
    pub async fn next_snapshot(&mut self) -> Option<Snapshot> {
        while let Some(message) = self.next_message().await {
            match message {
                SessionMessage::Event(ExecutionEvent::Snapshot(snapshot)) => return Some(snapshot),
                SessionMessage::Outcome(_) => return None,
                SessionMessage::Event(_) => {}
            }
        }
        None
    }

    /// Drain the run and return its outcome
    pub async fn wait(&mut self) -> Option<ExecutionOutcome> {
        while self.outcome.is_none() {
            self.next_message().await?;
        }
        self.outcome.clone()
    }

    pub fn history(&self) -> &SnapshotHistory {
        &self.history
    }

    /// A previously recorded snapshot; replays, never re-executes
    pub fn snapshot_at(&self, index: usize) -> Option<&Snapshot> {
        self.history.get(index)
    }

    pub fn outcome(&self) -> Option<&ExecutionOutcome> {
        self.outcome.as_ref()
    }

    pub async fn state(&self) -> SessionState {
        self.handle.state().await
    }

    /// Wait until the context has released its resources
    pub async fn wait_closed(&self, within: std::time::Duration) -> bool {
        self.handle.wait_closed(within).await
    }
}
