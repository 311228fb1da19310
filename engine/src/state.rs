//! Sync coordinator state machine.
//!
//! Transitions are pure: the coordinator feeds a [`SyncInput`] and gets the
//! next [`SyncState`] back. All timing (ticks, retry deadlines) is decided by
//! the caller.

use serde::{Deserialize, Serialize};

/// State of the sync coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum SyncState {
    /// Connected, nothing in flight
    #[default]
    Idle,
    /// Sending queued operations
    Draining,
    /// No connectivity; nothing is sent
    Offline,
    /// Waiting after `attempt` consecutive transient failures
    Backoff { attempt: u32 },
}

/// Something that happened to the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncInput {
    /// Connectivity went away
    ConnectivityLost,
    /// Connectivity came back
    ConnectivityRestored,
    /// Periodic timer fired
    Tick { pending: bool },
    /// A submission or resolution asked for a drain
    Trigger { pending: bool },
    /// A drain pass hit a transient error
    NetworkError { consecutive: u32 },
    /// The backoff delay elapsed
    RetryDue,
    /// A drain pass finished without transient errors
    QueueDrained,
}

impl SyncState {
    /// Next state for an input.
    pub fn next(self, input: SyncInput) -> SyncState {
        use SyncInput::*;
        use SyncState::*;

        match (self, input) {
            (_, ConnectivityLost) => Offline,
            (Offline, ConnectivityRestored) => Draining,
            (Offline, _) => Offline,

            (Idle, Tick { pending: true }) | (Idle, Trigger { pending: true }) => Draining,
            (Idle, _) => Idle,

            (Draining, NetworkError { consecutive }) => Backoff {
                attempt: consecutive.max(1),
            },
            (Draining, QueueDrained) => Idle,
            (Draining, _) => Draining,

            (Backoff { .. }, RetryDue) | (Backoff { .. }, ConnectivityRestored) => Draining,
            (state @ Backoff { .. }, _) => state,
        }
    }

    /// Whether the coordinator may send requests in this state.
    pub fn is_draining(&self) -> bool {
        matches!(self, SyncState::Draining)
    }

    /// Whether the coordinator considers itself offline.
    pub fn is_offline(&self) -> bool {
        matches!(self, SyncState::Offline)
    }

    /// Backoff attempt, if backing off.
    pub fn backoff_attempt(&self) -> Option<u32> {
        match self {
            SyncState::Backoff { attempt } => Some(*attempt),
            _ => None,
        }
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncState::Idle => write!(f, "idle"),
            SyncState::Draining => write!(f, "draining"),
            SyncState::Offline => write!(f, "offline"),
            SyncState::Backoff { attempt } => write!(f, "backoff({})", attempt),
        }
    }
}
