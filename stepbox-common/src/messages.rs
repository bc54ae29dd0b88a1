use crate::ExecutionOutcome;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Emitted once per executed instrumented line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepEvent {
    pub line: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StdStream {
    Stdout,
    Stderr,
}

/// One intercepted console/print call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StdoutEvent {
    pub stream: StdStream,
    pub text: String,
    pub line: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    Primitive,
    Reference,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableView {
    pub name: String,
    pub serialized_value: Value,
    pub kind: ValueKind,
    /// Whether the serialized value differs from the previous snapshot of this run
    pub changed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub name: String,
    pub variables: Vec<VariableView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyView {
    pub name: String,
    pub serialized_value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeapObject {
    pub id: String,
    pub class_name: String,
    pub properties: Vec<PropertyView>,
}

/// Bounded capture of variable and object state at one line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub line: u32,
    pub variables: Vec<VariableView>,
    pub call_stack: Vec<Frame>,
    pub heap_objects: Vec<HeapObject>,
}

impl Snapshot {
    /// Look up a captured variable by name
    pub fn variable(&self, name: &str) -> Option<&VariableView> {
        self.variables.iter().find(|var| var.name == name)
    }
}

/// Non-terminal messages from the executor to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ExecutionEvent {
    Step(StepEvent),
    Snapshot(Snapshot),
    Stdout(StdoutEvent),
    /// The source could not be instrumented or compiled
    WrapperError {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        line: Option<u32>,
    },
}

/// Everything a host observes for one run: events, then exactly one outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SessionMessage {
    Event(ExecutionEvent),
    Outcome(ExecutionOutcome),
}

impl SessionMessage {
    pub fn is_outcome(&self) -> bool {
        matches!(self, Self::Outcome(_))
    }
}

/// Host -> executor control messages (manual mode)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum HostCommand {
    /// Execute one more statement
    Step,
    /// Run to completion
    Resume,
    /// Abort and release resources
    Terminate,
}
