//! Wire and data-model types shared between the sandbox core and its hosts.

pub mod messages;
pub mod types;

pub use messages::*;
pub use types::*;
