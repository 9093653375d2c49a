//! Connectivity monitor.
//!
//! A boolean "connected" signal. Whatever detects the network pushes the
//! current state in with [`ConnectivityMonitor::set_connected`]; subscribers
//! only wake on actual transitions.

use std::sync::Arc;
use tokio::sync::watch;

/// Shared connectivity signal.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    tx: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
    /// Create a monitor with a known initial state.
    pub fn new(connected: bool) -> Self {
        let (tx, _rx) = watch::channel(connected);
        Self { tx: Arc::new(tx) }
    }

    /// Report the current state.
    ///
    /// Returns `true` if this was a transition; repeating the current state
    /// notifies nobody.
    pub fn set_connected(&self, connected: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == connected {
                false
            } else {
                *current = connected;
                true
            }
        });
        if changed {
            tracing::info!(connected, "Connectivity changed");
        }
        changed
    }

    /// The last reported state.
    pub fn is_connected(&self) -> bool {
        *self.tx.borrow()
    }

    /// Receive transitions.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}
