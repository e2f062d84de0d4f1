//! Job cancellation
//!
//! Cancellation is cooperative: the engine checks between steps. A hard cancel
//! additionally aborts the task runner call in flight; the aborted attempt's
//! row is left failed and its partial work is discarded.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CancelMode {
    /// Stop before the next step
    Cooperative,
    /// Also abort the running step
    Hard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum CancelState {
    Running,
    Requested(CancelMode),
}

/// Requests cancellation of one job
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<CancelState>>,
}

impl CancelHandle {
    /// Request cancellation. Requests only escalate; a hard cancel is never downgraded.
    pub fn cancel(&self, mode: CancelMode) {
        let requested = CancelState::Requested(mode);
        self.tx.send_if_modified(|state| {
            if requested > *state {
                *state = requested;
                true
            } else {
                false
            }
        });
    }
}

/// Observes cancellation requests for one job
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<CancelState>,
}

impl CancelSignal {
    /// A signal that is never triggered
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(CancelState::Running);
        Self { rx }
    }

    pub fn mode(&self) -> Option<CancelMode> {
        match *self.rx.borrow() {
            CancelState::Running => None,
            CancelState::Requested(mode) => Some(mode),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.mode().is_some()
    }

    pub fn is_hard(&self) -> bool {
        self.mode() == Some(CancelMode::Hard)
    }

    /// Resolves once a hard cancel is requested; never resolves otherwise
    pub async fn hard_cancelled(&self) {
        let mut rx = self.rx.clone();
        let hard = rx
            .wait_for(|state| *state == CancelState::Requested(CancelMode::Hard))
            .await
            .map(|_| ())
            .is_ok();
        if !hard {
            std::future::pending::<()>().await;
        }
    }
}

/// A connected handle/signal pair
pub fn cancellation() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(CancelState::Running);
    (CancelHandle { tx: Arc::new(tx) }, CancelSignal { rx })
}
