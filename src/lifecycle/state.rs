//! Server lifecycle state machine.
//!
//! `Starting → Accepting → Draining → Stopped`. Transitions only move
//! forward; asking for an earlier state is ignored.

use std::fmt;

use tokio::sync::watch;

/// Lifecycle state of one server instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleState {
    /// Pipeline and bridge assembled, nothing accepted yet.
    Starting,
    /// Listener bound and accepting connections.
    Accepting,
    /// No new connections; in-flight requests finishing.
    Draining,
    /// Terminal.
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Starting => "starting",
            LifecycleState::Accepting => "accepting",
            LifecycleState::Draining => "draining",
            LifecycleState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Shared, monotonic lifecycle state.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    tx: std::sync::Arc<watch::Sender<LifecycleState>>,
}

impl Lifecycle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(LifecycleState::Starting);
        Self {
            tx: std::sync::Arc::new(tx),
        }
    }

    pub fn current(&self) -> LifecycleState {
        *self.tx.borrow()
    }

    /// Move to `next` if it is later than the current state.
    ///
    /// Returns `true` when the state actually changed.
    pub fn advance(&self, next: LifecycleState) -> bool {
        let changed = self.tx.send_if_modified(|state| {
            if next > *state {
                *state = next;
                true
            } else {
                false
            }
        });
        if changed {
            tracing::debug!(state = %next, "Lifecycle transition");
        }
        changed
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.tx.subscribe()
    }

    /// Wait until the state reaches at least `target`.
    pub async fn reached(&self, target: LifecycleState) {
        let mut rx = self.subscribe();
        let _ = rx.wait_for(|state| *state >= target).await;
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
