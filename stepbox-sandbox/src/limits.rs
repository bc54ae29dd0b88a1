//! Resource limits applied to each isolated context

use serde::{Deserialize, Serialize};

/// Resource limits for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Maximum V8 heap size in bytes
    pub max_heap_bytes: Option<usize>,

    /// Maximum number of events forwarded to the host per run
    pub max_events: Option<usize>,

    /// Stack size of isolate threads (None = platform default)
    pub thread_stack_bytes: Option<usize>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_heap_bytes: Some(256 * 1024 * 1024), // 256 MB
            max_events: Some(100_000),
            thread_stack_bytes: None,
        }
    }
}

impl ResourceLimits {
    /// No caps at all (dangerous!)
    pub fn unlimited() -> Self {
        Self {
            max_heap_bytes: None,
            max_events: None,
            thread_stack_bytes: None,
        }
    }

    /// Create strict limits for untrusted code
    pub fn strict() -> Self {
        Self {
            max_heap_bytes: Some(64 * 1024 * 1024), // 64 MB
            max_events: Some(10_000),
            thread_stack_bytes: None,
        }
    }

    /// Create permissive limits for trusted code
    pub fn permissive() -> Self {
        Self {
            max_heap_bytes: Some(1024 * 1024 * 1024), // 1 GB
            max_events: Some(1_000_000),
            thread_stack_bytes: None,
        }
    }

    /// Whether another event may be forwarded after `emitted` events
    pub fn allows_event(&self, emitted: usize) -> bool {
        self.max_events.map_or(true, |max| emitted < max)
    }
}
