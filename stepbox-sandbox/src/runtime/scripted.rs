//! In-memory runtime that replays a fixed message script

use super::{ContextControl, ContinueSignal, IsolateMessage, LaunchSpec, LaunchedContext, Runtime};
use crate::{Result, SandboxError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

/// What the scripted context does after sending its messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ending {
    /// Keep the channel open until torn down
    Hang,
    /// Drop the channel without a terminal message
    Crash,
    /// Messages already end with `Finished`
    Finish,
}

#[derive(Default)]
pub struct Counters {
    pub launches: AtomicUsize,
    pub teardowns: AtomicUsize,
    pub released: Mutex<Vec<ContinueSignal>>,
}

pub struct ScriptedRuntime {
    script: Vec<IsolateMessage>,
    ending: Ending,
    fail_launch: bool,
    pub counters: Arc<Counters>,
}

impl ScriptedRuntime {
    pub fn new(script: Vec<IsolateMessage>, ending: Ending) -> Self {
        Self {
            script,
            ending,
            fail_launch: false,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_launch: true,
            ..Self::new(Vec::new(), Ending::Crash)
        }
    }
}

struct ScriptedControl {
    counters: Arc<Counters>,
    tx: Mutex<Option<mpsc::UnboundedSender<IsolateMessage>>>,
    closed: Mutex<Option<oneshot::Sender<()>>>,
}

impl ContextControl for ScriptedControl {
    fn release(&self, signal: ContinueSignal) {
        self.counters.released.lock().unwrap().push(signal);
    }

    fn teardown(&self) {
        self.counters.teardowns.fetch_add(1, Ordering::SeqCst);
        self.tx.lock().unwrap().take();
        if let Some(closed) = self.closed.lock().unwrap().take() {
            let _ = closed.send(());
        }
    }
}

#[async_trait]
impl Runtime for ScriptedRuntime {
    async fn launch(&self, _spec: LaunchSpec) -> Result<LaunchedContext> {
        self.counters.launches.fetch_add(1, Ordering::SeqCst);
        if self.fail_launch {
            return Err(SandboxError::Launch("no isolate available".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        for message in &self.script {
            let _ = tx.send(message.clone());
        }
        let (closed_tx, closed_rx) = oneshot::channel();
        let tx = match self.ending {
            Ending::Hang => Some(tx),
            Ending::Crash | Ending::Finish => None,
        };

        Ok(LaunchedContext {
            messages: rx,
            control: Arc::new(ScriptedControl {
                counters: self.counters.clone(),
                tx: Mutex::new(tx),
                closed: Mutex::new(Some(closed_tx)),
            }),
            closed: closed_rx,
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
