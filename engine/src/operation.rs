//! Queued operations.
//!
//! A submission that has not been acknowledged by the server lives in the
//! outbox as a [`QueuedOperation`]. Its `operation_id` doubles as the
//! idempotency key presented to the server, so retries cannot duplicate
//! effects.

use crate::{ConflictId, OperationId, Reference, ResponseSet, TemplateId, Timestamp, VersionMarker};
use serde::{Deserialize, Serialize};

/// Where an operation stands in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum OperationState {
    /// Waiting to be drained
    #[default]
    Pending,
    /// Blocked by an unresolved conflict; neither acked nor retried
    #[serde(rename_all = "camelCase")]
    Held { conflict_id: ConflictId },
    /// Terminal, needs manual intervention
    Failed { reason: String },
}

/// A submission before it is assigned a place in the outbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationDraft {
    /// Idempotency key
    pub operation_id: OperationId,
    /// Target reference
    pub reference: Reference,
    /// Responses to submit
    pub payload: ResponseSet,
    /// Server marker the edit was staged against
    pub base_version: VersionMarker,
    /// Creation time (milliseconds since epoch)
    pub created_at: Timestamp,
}

impl OperationDraft {
    /// Create a new draft.
    pub fn new(
        operation_id: impl Into<OperationId>,
        reference: Reference,
        payload: ResponseSet,
        base_version: VersionMarker,
        created_at: Timestamp,
    ) -> Self {
        Self {
            operation_id: operation_id.into(),
            reference,
            payload,
            base_version,
            created_at,
        }
    }

    /// Place the draft at `sequence` in the outbox.
    pub fn into_queued(self, sequence: u64) -> QueuedOperation {
        QueuedOperation {
            operation_id: self.operation_id,
            sequence,
            template_id: self.payload.template_id,
            reference: self.reference,
            payload: self.payload,
            base_version: self.base_version,
            created_at: self.created_at,
            attempt_count: 0,
            state: OperationState::Pending,
        }
    }
}

/// A write operation waiting for server acknowledgement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedOperation {
    /// Idempotency key
    pub operation_id: OperationId,
    /// Monotonic outbox position, FIFO within a reference
    pub sequence: u64,
    /// Template the payload answers
    pub template_id: TemplateId,
    /// Target reference
    pub reference: Reference,
    /// Responses to submit
    pub payload: ResponseSet,
    /// Server marker the edit was staged against
    pub base_version: VersionMarker,
    /// Creation time (milliseconds since epoch)
    pub created_at: Timestamp,
    /// Remote attempts made so far
    pub attempt_count: u32,
    /// Lifecycle state
    pub state: OperationState,
}

impl QueuedOperation {
    /// Whether the operation is eligible for draining.
    pub fn is_pending(&self) -> bool {
        self.state == OperationState::Pending
    }

    /// Whether the operation is blocked by a conflict.
    pub fn is_held(&self) -> bool {
        matches!(self.state, OperationState::Held { .. })
    }

    /// Whether the operation reached the terminal failed state.
    pub fn is_failed(&self) -> bool {
        matches!(self.state, OperationState::Failed { .. })
    }

    /// Conflict holding this operation, if any.
    pub fn held_by(&self) -> Option<&ConflictId> {
        match &self.state {
            OperationState::Held { conflict_id } => Some(conflict_id),
            _ => None,
        }
    }
}

/// Outbox ordering: by sequence, then operation ID for stability.
impl Ord for QueuedOperation {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sequence
            .cmp(&other.sequence)
            .then_with(|| self.operation_id.cmp(&other.operation_id))
    }
}

impl PartialOrd for QueuedOperation {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Eq for QueuedOperation {}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(id: &str) -> OperationDraft {
        OperationDraft::new(
            id,
            Reference::maintenance_order(1),
            ResponseSet::new(9, VersionMarker::from_millis(5), vec![]),
            VersionMarker::from_millis(100),
            1000,
        )
    }

    #[test]
    fn into_queued_starts_pending() {
        let op = draft("op-1").into_queued(3);
        assert_eq!(op.sequence, 3);
        assert_eq!(op.template_id, 9);
        assert_eq!(op.attempt_count, 0);
        assert!(op.is_pending());
        assert!(!op.is_held());
        assert!(!op.is_failed());
    }

    #[test]
    fn ordering_follows_sequence() {
        let first = draft("op-b").into_queued(1);
        let second = draft("op-a").into_queued(2);
        assert!(first < second);

        let mut ops = vec![second.clone(), first.clone()];
        ops.sort();
        assert_eq!(ops, vec![first, second]);
    }

    #[test]
    fn held_by_exposes_conflict() {
        let mut op = draft("op-1").into_queued(1);
        op.state = OperationState::Held {
            conflict_id: "c-1".into(),
        };
        assert_eq!(op.held_by().map(String::as_str), Some("c-1"));
        assert!(!op.is_pending());
    }

    #[test]
    fn state_is_tagged_in_json() {
        let mut op = draft("op-1").into_queued(1);
        op.state = OperationState::Failed {
            reason: "template removed".into(),
        };

        let json = serde_json::to_string(&op).unwrap();
        assert!(json.contains("\"status\":\"failed\""));
        assert!(json.contains("\"reason\":\"template removed\""));

        let parsed: QueuedOperation = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, op);
    }

    #[test]
    fn held_state_roundtrip() {
        let mut op = draft("op-1").into_queued(1);
        op.state = OperationState::Held {
            conflict_id: "c-9".into(),
        };
        let json = serde_json::to_string(&op).unwrap();
        assert!(json.contains("\"conflictId\":\"c-9\""));
        let parsed: QueuedOperation = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.held_by().map(String::as_str), Some("c-9"));
    }
}
