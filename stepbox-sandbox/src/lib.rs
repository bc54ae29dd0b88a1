//! Stepbox Sandbox - steppable, instrumented execution of untrusted JavaScript
//!
//! Source text is rewritten by the [`Instrumenter`] so every statement
//! announces its line and captures a bounded [`Snapshot`](stepbox_common::Snapshot)
//! of the variables in scope. The [`HostBridge`] evaluates the result in an
//! isolated V8 context under a wall-clock timer, in auto mode or one statement
//! at a time through a [`StepController`].

mod bridge;
mod config;
mod controller;
mod error;
pub mod instrument;
mod limits;
mod runtime;
pub mod serializer;
mod session;

pub use bridge::{HostBridge, RunHandle};
pub use config::{SandboxConfig, SnapshotOptions};
pub use controller::{ControllerStatus, StepController};
pub use error::{InstrumentError, SandboxError};
pub use instrument::{InstrumentedProgram, Instrumenter, LineMap};
pub use limits::ResourceLimits;
pub use runtime::{
    ContextControl, ContinueSignal, IsolateMessage, LaunchSpec, LaunchedContext, Runtime,
};
#[cfg(feature = "v8")]
pub use runtime::V8Runtime;
pub use session::{ExecutionId, SessionState, SessionStatus, SnapshotHistory};

/// Result type for host-side sandbox operations
pub type Result<T> = std::result::Result<T, SandboxError>;
