//! Connectivity signal supplied by the host.
//!
//! The engine never probes the network itself; the host reports link changes
//! through [`Connectivity::set_online`].

use std::sync::Arc;

use tokio::sync::watch;

/// Shared online/offline flag with change notification.
#[derive(Debug, Clone)]
pub struct Connectivity {
    sender: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (sender, _) = watch::channel(online);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn online() -> Self {
        Self::new(true)
    }

    pub fn offline() -> Self {
        Self::new(false)
    }

    /// Report the current link state. Repeating the same state is a no-op.
    pub fn set_online(&self, online: bool) {
        let changed = self.sender.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            tracing::info!(online, "Connectivity changed");
        }
    }

    pub fn is_online(&self) -> bool {
        *self.sender.borrow()
    }

    /// Receiver notified on every change.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}
