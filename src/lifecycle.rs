use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Whether location tracking is currently enabled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Stopped,
    Running,
}

/// Run state shared by the tracker and its tasks.
///
/// Tasks hold a receiver and exit once they observe anything but `Running`.
/// There is no process-wide flag: whoever owns the engine owns this.
pub struct Lifecycle {
    tx: watch::Sender<RunState>,
}

impl Lifecycle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(RunState::Stopped);
        Self { tx }
    }

    pub fn state(&self) -> RunState {
        *self.tx.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == RunState::Running
    }

    /// Publish `state`, returning the previous one.
    pub fn set(&self, state: RunState) -> RunState {
        self.tx.send_replace(state)
    }

    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.tx.subscribe()
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves once the observed state is no longer `Running`.
pub async fn stopped(rx: &mut watch::Receiver<RunState>) {
    loop {
        if *rx.borrow_and_update() != RunState::Running {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
