//! Request and outcome types shared by the sandbox and its hosts

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How the host drives a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Run to completion without host-driven pausing
    #[default]
    Auto,
    /// Pause after every instrumented statement until the host releases it
    Manual,
}

/// Request to execute an entry point of untrusted source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    /// The submitted source text
    pub source_text: String,

    /// Name of the function to invoke once the source has been evaluated
    pub entry_point_name: String,

    /// Arguments passed to the entry point
    #[serde(default)]
    pub arguments: Vec<Value>,

    #[serde(default)]
    pub mode: ExecutionMode,

    /// Wall-clock budget in milliseconds (None = sandbox default)
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl ExecutionRequest {
    /// Create an auto-mode request with no arguments
    pub fn new(source_text: impl Into<String>, entry_point_name: impl Into<String>) -> Self {
        Self {
            source_text: source_text.into(),
            entry_point_name: entry_point_name.into(),
            arguments: Vec::new(),
            mode: ExecutionMode::Auto,
            timeout_ms: None,
        }
    }

    /// Set the entry point arguments
    pub fn with_arguments(mut self, arguments: Vec<Value>) -> Self {
        self.arguments = arguments;
        self
    }

    /// Set timeout in milliseconds
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Switch the request to manual stepping
    pub fn manual(mut self) -> Self {
        self.mode = ExecutionMode::Manual;
        self
    }
}

/// Terminal result of a run. Exactly one is produced per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "OutcomeWire", try_from = "OutcomeWire")]
pub enum ExecutionOutcome {
    Success { value: Value },
    Failure { message: String, line: Option<u32> },
}

impl ExecutionOutcome {
    pub fn success(value: Value) -> Self {
        Self::Success { value }
    }

    pub fn failure(message: impl Into<String>, line: Option<u32>) -> Self {
        Self::Failure {
            message: message.into(),
            line,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Convert into a plain `Result`, the shape single-shot callers want
    pub fn into_result(self) -> Result<Value, ExecutionFailure> {
        match self {
            Self::Success { value } => Ok(value),
            Self::Failure { message, line } => Err(ExecutionFailure { message, line }),
        }
    }
}

/// Rejection reason returned by single-shot runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct ExecutionFailure {
    pub message: String,
    pub line: Option<u32>,
}

/// `{ ok: true, value }` / `{ ok: false, message, line? }`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct OutcomeWire {
    ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    line: Option<u32>,
}

impl From<ExecutionOutcome> for OutcomeWire {
    fn from(outcome: ExecutionOutcome) -> Self {
        match outcome {
            ExecutionOutcome::Success { value } => Self {
                ok: true,
                value: Some(value),
                message: None,
                line: None,
            },
            ExecutionOutcome::Failure { message, line } => Self {
                ok: false,
                value: None,
                message: Some(message),
                line,
            },
        }
    }
}

impl TryFrom<OutcomeWire> for ExecutionOutcome {
    type Error = String;

    fn try_from(wire: OutcomeWire) -> Result<Self, Self::Error> {
        if wire.ok {
            Ok(Self::Success {
                value: wire.value.unwrap_or(Value::Null),
            })
        } else {
            let message = wire
                .message
                .ok_or_else(|| "failure outcome without a message".to_string())?;
            Ok(Self::Failure {
                message,
                line: wire.line,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_names() {
        let request: ExecutionRequest = serde_json::from_value(json!({
            "sourceText": "function f(a) { return a; }",
            "entryPointName": "f",
            "arguments": [1],
            "mode": "manual",
            "timeoutMs": 50
        }))
        .unwrap();

        assert_eq!(request.entry_point_name, "f");
        assert_eq!(request.mode, ExecutionMode::Manual);
        assert_eq!(request.timeout_ms, Some(50));
    }

    #[test]
    fn test_request_defaults() {
        let request: ExecutionRequest = serde_json::from_value(json!({
            "sourceText": "",
            "entryPointName": "main"
        }))
        .unwrap();

        assert!(request.arguments.is_empty());
        assert_eq!(request.mode, ExecutionMode::Auto);
        assert!(request.timeout_ms.is_none());
    }

    #[test]
    fn test_outcome_wire_shape() {
        let ok = serde_json::to_value(ExecutionOutcome::success(json!(3))).unwrap();
        assert_eq!(ok, json!({ "ok": true, "value": 3 }));

        let failed =
            serde_json::to_value(ExecutionOutcome::failure("boom", Some(4))).unwrap();
        assert_eq!(failed, json!({ "ok": false, "message": "boom", "line": 4 }));

        let no_line = serde_json::to_value(ExecutionOutcome::failure("timeout", None)).unwrap();
        assert_eq!(no_line, json!({ "ok": false, "message": "timeout" }));
    }

    #[test]
    fn test_failure_without_message_is_rejected() {
        let parsed = serde_json::from_value::<ExecutionOutcome>(json!({ "ok": false }));
        assert!(parsed.is_err());
    }

    #[test]
    fn test_into_result() {
        let err = ExecutionOutcome::failure("x is not defined", Some(2))
            .into_result()
            .unwrap_err();
        assert_eq!(err.to_string(), "x is not defined");
        assert_eq!(err.line, Some(2));
    }
}
