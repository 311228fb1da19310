//! Sync events delivered to subscribers.

use crate::{OperationId, Reference, SyncConflict, SyncState};
use serde::{Deserialize, Serialize};

/// Something observable that happened during sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    /// A submission was durably queued
    #[serde(rename_all = "camelCase")]
    Queued {
        reference: Reference,
        operation_id: OperationId,
        pending: usize,
    },
    /// The server acknowledged an operation
    #[serde(rename_all = "camelCase")]
    Synced {
        reference: Reference,
        operation_id: OperationId,
    },
    /// A divergence was detected or folded into an existing conflict
    ConflictDetected { conflict: SyncConflict },
    /// A conflict was resolved by the caller
    ConflictResolved { conflict: SyncConflict },
    /// An operation was rejected permanently
    #[serde(rename_all = "camelCase")]
    OperationFailed {
        reference: Reference,
        operation_id: OperationId,
        reason: String,
    },
    /// The coordinator changed state
    StateChanged { state: SyncState, pending: usize },
}

impl SyncEvent {
    /// Reference the event concerns; `None` for global events.
    pub fn reference(&self) -> Option<&Reference> {
        match self {
            SyncEvent::Queued { reference, .. }
            | SyncEvent::Synced { reference, .. }
            | SyncEvent::OperationFailed { reference, .. } => Some(reference),
            SyncEvent::ConflictDetected { conflict } | SyncEvent::ConflictResolved { conflict } => {
                Some(&conflict.reference)
            }
            SyncEvent::StateChanged { .. } => None,
        }
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncEvent::Queued { .. } => "queued",
            SyncEvent::Synced { .. } => "synced",
            SyncEvent::ConflictDetected { .. } => "conflict_detected",
            SyncEvent::ConflictResolved { .. } => "conflict_resolved",
            SyncEvent::OperationFailed { .. } => "operation_failed",
            SyncEvent::StateChanged { .. } => "state_changed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_accessor() {
        let reference = Reference::maintenance_call(3);
        let event = SyncEvent::Synced {
            reference,
            operation_id: "op-1".into(),
        };
        assert_eq!(event.reference(), Some(&reference));
        assert_eq!(event.kind(), "synced");

        let global = SyncEvent::StateChanged {
            state: SyncState::Idle,
            pending: 0,
        };
        assert!(global.reference().is_none());
    }

    #[test]
    fn events_are_tagged() {
        let event = SyncEvent::Queued {
            reference: Reference::maintenance_order(1),
            operation_id: "op-1".into(),
            pending: 2,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.starts_with(r#"{"type":"queued""#));
        assert!(json.contains(r#""operationId":"op-1""#));
    }
}
