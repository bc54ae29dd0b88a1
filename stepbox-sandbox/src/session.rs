//! Per-run session state observed by hosts

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use stepbox_common::{
    ExecutionEvent, ExecutionMode, ExecutionOutcome, Snapshot, StdStream, StdoutEvent,
};

/// Unique execution identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId(pub uuid::Uuid);

impl ExecutionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionStatus {
    /// Waiting for the isolated context to start
    Queued,
    Running,
    Completed,
    Failed,
    TimedOut,
    Terminated,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Queued | Self::Running)
    }
}

/// Snapshots recorded so far, oldest first. Indices are absolute: once the
/// limit is reached the oldest entries are dropped and their indices stop
/// resolving.
#[derive(Debug, Clone)]
pub struct SnapshotHistory {
    entries: VecDeque<Snapshot>,
    dropped: usize,
    limit: usize,
}

impl Default for SnapshotHistory {
    fn default() -> Self {
        Self::bounded(usize::MAX)
    }
}

impl SnapshotHistory {
    /// History keeping at most `limit` snapshots
    pub fn bounded(limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            dropped: 0,
            limit: limit.max(1),
        }
    }

    pub fn push(&mut self, snapshot: Snapshot) {
        if self.entries.len() >= self.limit {
            self.entries.pop_front();
            self.dropped += 1;
        }
        self.entries.push_back(snapshot);
    }

    /// Number of snapshots ever recorded, including dropped ones
    pub fn len(&self) -> usize {
        self.dropped + self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot at a recorded index
    pub fn get(&self, index: usize) -> Option<&Snapshot> {
        self.entries.get(index.checked_sub(self.dropped)?)
    }

    /// Index of the most recent retained snapshot taken at `line`
    pub fn rfind_line(&self, line: u32) -> Option<usize> {
        self.entries
            .iter()
            .rposition(|snapshot| snapshot.line == line)
            .map(|position| position + self.dropped)
    }
}

/// Session state shared between the forwarding task and handles
#[derive(Debug, Clone)]
pub struct SessionState {
    pub id: ExecutionId,
    pub mode: ExecutionMode,
    pub status: SessionStatus,
    /// Line of the most recent step event
    pub last_line: Option<u32>,
    /// Lines of the most recent step events, in execution order
    pub steps: VecDeque<u32>,
    pub snapshots: SnapshotHistory,
    /// Buffered output (limited size)
    pub stdout_buffer: Vec<String>,
    pub stderr_buffer: Vec<String>,
    pub outcome: Option<ExecutionOutcome>,
    /// Whether the isolated context has released its thread
    pub context_closed: bool,
    /// Step lines and snapshots kept before the oldest are dropped
    history_limit: usize,
}

impl SessionState {
    pub fn new(id: ExecutionId, mode: ExecutionMode) -> Self {
        Self {
            id,
            mode,
            status: SessionStatus::Queued,
            last_line: None,
            steps: VecDeque::new(),
            snapshots: SnapshotHistory::default(),
            stdout_buffer: Vec::new(),
            stderr_buffer: Vec::new(),
            outcome: None,
            context_closed: false,
            history_limit: usize::MAX,
        }
    }

    /// Bound the recorded steps and snapshots
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self.snapshots = SnapshotHistory::bounded(self.history_limit);
        self
    }

    /// Fold one forwarded event into the state
    pub fn record(&mut self, event: &ExecutionEvent, max_lines: usize) {
        match event {
            ExecutionEvent::Step(step) => {
                self.last_line = Some(step.line);
                if self.steps.len() >= self.history_limit {
                    self.steps.pop_front();
                }
                self.steps.push_back(step.line);
            }
            ExecutionEvent::Snapshot(snapshot) => self.snapshots.push(snapshot.clone()),
            ExecutionEvent::Stdout(StdoutEvent { stream, text, .. }) => match stream {
                StdStream::Stdout => self.push_stdout(text.clone(), max_lines),
                StdStream::Stderr => self.push_stderr(text.clone(), max_lines),
            },
            ExecutionEvent::WrapperError { message, .. } => {
                self.push_stderr(message.clone(), max_lines)
            }
        }
    }

    /// Add output line with buffer limit
    pub fn push_stdout(&mut self, line: String, max_lines: usize) {
        if self.stdout_buffer.len() >= max_lines {
            self.stdout_buffer.remove(0);
        }
        self.stdout_buffer.push(line);
    }

    pub fn push_stderr(&mut self, line: String, max_lines: usize) {
        if self.stderr_buffer.len() >= max_lines {
            self.stderr_buffer.remove(0);
        }
        self.stderr_buffer.push(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepbox_common::StepEvent;

    fn snapshot(line: u32) -> Snapshot {
        Snapshot {
            line,
            variables: Vec::new(),
            call_stack: Vec::new(),
            heap_objects: Vec::new(),
        }
    }

    #[test]
    fn test_record_events() {
        let mut state = SessionState::new(ExecutionId::new(), ExecutionMode::Auto);
        state.record(&ExecutionEvent::Step(StepEvent { line: 2 }), 10);
        state.record(&ExecutionEvent::Snapshot(snapshot(2)), 10);
        state.record(
            &ExecutionEvent::Stdout(StdoutEvent {
                stream: StdStream::Stderr,
                text: "warn".to_string(),
                line: 2,
            }),
            10,
        );

        assert_eq!(state.last_line, Some(2));
        assert_eq!(state.steps, vec![2]);
        assert_eq!(state.snapshots.len(), 1);
        assert_eq!(state.stderr_buffer, vec!["warn".to_string()]);
        assert!(state.stdout_buffer.is_empty());
    }

    #[test]
    fn test_output_buffer_limit() {
        let mut state = SessionState::new(ExecutionId::new(), ExecutionMode::Auto);
        for i in 0..5 {
            state.push_stdout(format!("line {i}"), 3);
        }
        assert_eq!(state.stdout_buffer, vec!["line 2", "line 3", "line 4"]);
    }

    #[test]
    fn test_history_lookup() {
        let mut history = SnapshotHistory::default();
        for line in [1, 2, 3, 2, 4] {
            history.push(snapshot(line));
        }
        assert_eq!(history.get(3).map(|s| s.line), Some(2));
        assert_eq!(history.rfind_line(2), Some(3));
        assert_eq!(history.rfind_line(9), None);
    }

    #[test]
    fn test_bounded_history_keeps_absolute_indices() {
        let mut history = SnapshotHistory::bounded(3);
        for line in [1, 2, 3, 4, 5] {
            history.push(snapshot(line));
        }
        assert_eq!(history.len(), 5);
        assert!(history.get(1).is_none());
        assert_eq!(history.get(2).map(|s| s.line), Some(3));
        assert_eq!(history.get(4).map(|s| s.line), Some(5));
        assert_eq!(history.rfind_line(4), Some(3));
        assert_eq!(history.rfind_line(1), None);
    }

    #[test]
    fn test_recorded_steps_are_bounded() {
        let mut state =
            SessionState::new(ExecutionId::new(), ExecutionMode::Auto).with_history_limit(2);
        for line in 1..=1000 {
            state.record(&ExecutionEvent::Step(StepEvent { line }), 10);
            state.record(&ExecutionEvent::Snapshot(snapshot(line)), 10);
        }
        assert_eq!(state.steps, vec![999, 1000]);
        assert_eq!(state.last_line, Some(1000));
        assert_eq!(state.snapshots.len(), 1000);
        assert_eq!(state.snapshots.get(999).map(|s| s.line), Some(1000));
        assert!(state.snapshots.get(997).is_none());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!SessionStatus::Running.is_terminal());
        assert!(SessionStatus::TimedOut.is_terminal());
        assert!(SessionStatus::Terminated.is_terminal());
    }
}
