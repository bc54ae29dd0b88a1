//! Error types for the sandbox

use thiserror::Error;

/// Errors raised while rewriting source text for stepping
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InstrumentError {
    #[error("SyntaxError: {message} (line {line})")]
    Syntax { message: String, line: u32 },

    #[error("invalid entry point name '{0}'")]
    InvalidEntryPoint(String),
}

impl InstrumentError {
    /// Source line the error refers to, when known
    pub fn line(&self) -> Option<u32> {
        match self {
            Self::Syntax { line, .. } => Some(*line),
            Self::InvalidEntryPoint(_) => None,
        }
    }
}

/// Host-side sandbox errors. Failures of the submitted code itself are never
/// reported through this type; they become a failed `ExecutionOutcome`.
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Failed to start isolated context: {0}")]
    Launch(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<toml::de::Error> for SandboxError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}
