//! Outbox of submissions waiting for server acknowledgement.
//!
//! Operations are persisted before `enqueue` returns and are removed only on
//! acknowledgement, explicit conflict resolution or explicit discard of a
//! failed operation. Sequence numbers are allocated under a lock and persisted
//! in the same batch as the operation they number.

use std::collections::BTreeSet;
use std::sync::Arc;

use checklist_engine::{ConflictId, OperationDraft, OperationState, QueuedOperation, Reference};
use tokio::sync::Mutex;

use crate::error::{Result, SyncError};
use crate::storage::{get_json, scan_json, Batch, Collection, Storage};

/// Meta key holding the last allocated sequence number.
pub const SEQUENCE_KEY: &str = "outbox.sequence";

/// Persisted queue of operations.
pub struct Outbox {
    storage: Arc<dyn Storage>,
    write_lock: Mutex<()>,
}

impl Outbox {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            write_lock: Mutex::new(()),
        }
    }

    /// Append an operation, committing `extra` writes in the same batch.
    ///
    /// With `hold` set the operation starts blocked by that conflict.
    pub async fn enqueue(
        &self,
        draft: OperationDraft,
        hold: Option<ConflictId>,
        extra: Batch,
    ) -> Result<QueuedOperation> {
        let _guard = self.write_lock.lock().await;

        let last: u64 = match self
            .storage
            .read(&[(Collection::Meta, SEQUENCE_KEY.to_string())])
            .await?
            .pop()
            .flatten()
        {
            Some(raw) => raw
                .parse()
                .map_err(|_| SyncError::StorageUnavailable(format!("corrupt {}: {}", SEQUENCE_KEY, raw)))?,
            None => 0,
        };
        let sequence = last + 1;

        let mut op = draft.into_queued(sequence);
        if let Some(conflict_id) = hold {
            op.state = OperationState::Held { conflict_id };
        }

        let mut batch = extra;
        Self::stage_put(&mut batch, &op)?;
        batch.put(Collection::Meta, SEQUENCE_KEY, sequence.to_string());
        self.storage.commit(batch).await?;

        tracing::info!(
            operation_id = %op.operation_id,
            reference = %op.reference,
            sequence,
            "Enqueued operation"
        );

        Ok(op)
    }

    /// Look up an operation.
    pub async fn get(&self, operation_id: &str) -> Result<Option<QueuedOperation>> {
        get_json(self.storage.as_ref(), Collection::Outbox, operation_id).await
    }

    /// Every queued operation in sequence order.
    pub async fn all(&self) -> Result<Vec<QueuedOperation>> {
        let mut ops: Vec<QueuedOperation> =
            scan_json(self.storage.as_ref(), Collection::Outbox).await?;
        ops.sort();
        Ok(ops)
    }

    /// Queued operations in sequence order, optionally for one reference.
    ///
    /// Includes held and failed operations: everything not yet acknowledged.
    pub async fn list_pending(&self, reference: Option<&Reference>) -> Result<Vec<QueuedOperation>> {
        let ops = self.all().await?;
        Ok(match reference {
            Some(reference) => ops.into_iter().filter(|op| &op.reference == reference).collect(),
            None => ops,
        })
    }

    /// Next operation of a reference in sequence order, skipping failed ones.
    ///
    /// A held operation is returned as is; the caller stops there.
    pub async fn peek_next(&self, reference: &Reference) -> Result<Option<QueuedOperation>> {
        Ok(self
            .list_pending(Some(reference))
            .await?
            .into_iter()
            .find(|op| !op.is_failed()))
    }

    /// References that have queued operations.
    pub async fn references(&self) -> Result<Vec<Reference>> {
        let refs: BTreeSet<Reference> = self.all().await?.into_iter().map(|op| op.reference).collect();
        Ok(refs.into_iter().collect())
    }

    /// Number of queued operations.
    pub async fn len(&self) -> Result<usize> {
        Ok(self.storage.scan(Collection::Outbox).await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Whether any operation is eligible for draining.
    pub async fn has_pending_work(&self) -> Result<bool> {
        Ok(self.all().await?.iter().any(QueuedOperation::is_pending))
    }

    /// Remove an acknowledged operation, committing `extra` in the same batch.
    ///
    /// Acking twice is a no-op: when the operation is already gone nothing is
    /// written and `false` is returned.
    pub async fn ack(&self, operation_id: &str, extra: Batch) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        if self.get(operation_id).await?.is_none() {
            return Ok(false);
        }
        let mut batch = extra;
        Self::stage_delete(&mut batch, operation_id);
        self.storage.commit(batch).await?;
        Ok(true)
    }

    /// Count a remote attempt. Persisted before the request goes out.
    pub async fn record_attempt(&self, operation_id: &str) -> Result<QueuedOperation> {
        self.update(operation_id, |op| {
            op.attempt_count = op.attempt_count.saturating_add(1);
            Ok(())
        })
        .await
    }

    /// Move an operation to the terminal failed state.
    pub async fn fail(&self, operation_id: &str, reason: &str) -> Result<QueuedOperation> {
        self.update(operation_id, |op| {
            op.state = OperationState::Failed {
                reason: reason.to_string(),
            };
            Ok(())
        })
        .await
    }

    /// Put a failed operation back in line.
    pub async fn retry_failed(&self, operation_id: &str) -> Result<QueuedOperation> {
        self.update(operation_id, |op| {
            if !op.is_failed() {
                return Err(SyncError::OperationNotFailed(op.operation_id.clone()));
            }
            op.state = OperationState::Pending;
            Ok(())
        })
        .await
    }

    /// Drop a failed operation for good.
    pub async fn discard_failed(&self, operation_id: &str) -> Result<QueuedOperation> {
        let _guard = self.write_lock.lock().await;
        let op = self
            .get(operation_id)
            .await?
            .ok_or_else(|| SyncError::UnknownOperation(operation_id.to_string()))?;
        if !op.is_failed() {
            return Err(SyncError::OperationNotFailed(op.operation_id));
        }

        let mut batch = Batch::new();
        Self::stage_delete(&mut batch, operation_id);
        self.storage.commit(batch).await?;

        tracing::warn!(operation_id = %op.operation_id, reference = %op.reference, "Discarded failed operation");
        Ok(op)
    }

    /// Add an operation write to a caller's batch.
    pub fn stage_put(batch: &mut Batch, op: &QueuedOperation) -> Result<()> {
        batch.put_json(Collection::Outbox, op.operation_id.clone(), op)
    }

    /// Add an operation removal to a caller's batch.
    pub fn stage_delete(batch: &mut Batch, operation_id: &str) {
        batch.delete(Collection::Outbox, operation_id);
    }

    /// Commit a batch built with the `stage_*` helpers.
    pub async fn commit(&self, batch: Batch) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.storage.commit(batch).await
    }

    async fn update<F>(&self, operation_id: &str, apply: F) -> Result<QueuedOperation>
    where
        F: FnOnce(&mut QueuedOperation) -> Result<()>,
    {
        let _guard = self.write_lock.lock().await;
        let mut op = self
            .get(operation_id)
            .await?
            .ok_or_else(|| SyncError::UnknownOperation(operation_id.to_string()))?;
        apply(&mut op)?;

        let mut batch = Batch::new();
        Self::stage_put(&mut batch, &op)?;
        self.storage.commit(batch).await?;
        Ok(op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use checklist_engine::{ResponseSet, VersionMarker};

    fn draft(id: &str, reference: Reference) -> OperationDraft {
        OperationDraft::new(
            id,
            reference,
            ResponseSet::new(1, VersionMarker::from_millis(1), vec![]),
            VersionMarker::from_millis(10),
            100,
        )
    }

    fn outbox() -> (MemoryStorage, Outbox) {
        let storage = MemoryStorage::new();
        let outbox = Outbox::new(Arc::new(storage.clone()));
        (storage, outbox)
    }

    #[tokio::test]
    async fn sequences_are_monotonic_across_restart() {
        let (storage, outbox) = outbox();
        let a = Reference::maintenance_order(1);

        let first = outbox.enqueue(draft("op-1", a), None, Batch::new()).await.unwrap();
        let second = outbox.enqueue(draft("op-2", a), None, Batch::new()).await.unwrap();
        assert_eq!((first.sequence, second.sequence), (1, 2));

        outbox.ack("op-2", Batch::new()).await.unwrap();
        let restarted = Outbox::new(Arc::new(storage));
        let third = restarted.enqueue(draft("op-3", a), None, Batch::new()).await.unwrap();
        assert_eq!(third.sequence, 3);
    }

    #[tokio::test]
    async fn fifo_per_reference() {
        let (_, outbox) = outbox();
        let a = Reference::maintenance_order(1);
        let b = Reference::maintenance_call(1);

        for (id, reference) in [("z", a), ("y", b), ("x", a)] {
            outbox.enqueue(draft(id, reference), None, Batch::new()).await.unwrap();
        }

        let ids: Vec<_> = outbox
            .list_pending(Some(&a))
            .await
            .unwrap()
            .into_iter()
            .map(|op| op.operation_id)
            .collect();
        assert_eq!(ids, vec!["z", "x"]);
        assert_eq!(outbox.peek_next(&a).await.unwrap().unwrap().operation_id, "z");

        outbox.fail("z", "rejected").await.unwrap();
        assert_eq!(outbox.peek_next(&a).await.unwrap().unwrap().operation_id, "x");
        assert_eq!(outbox.references().await.unwrap(), vec![a, b]);
        assert_eq!(outbox.len().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn ack_is_idempotent() {
        let (storage, outbox) = outbox();
        outbox
            .enqueue(draft("op-1", Reference::maintenance_order(1)), None, Batch::new())
            .await
            .unwrap();

        let mut extra = Batch::new();
        extra.put(Collection::Templates, "t", "{}");
        assert!(outbox.ack("op-1", extra).await.unwrap());
        assert_eq!(storage.count(Collection::Templates), 1);

        let mut extra = Batch::new();
        extra.put(Collection::Templates, "u", "{}");
        assert!(!outbox.ack("op-1", extra).await.unwrap());
        assert_eq!(storage.count(Collection::Templates), 1);
        assert!(outbox.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn failed_enqueue_is_reported_and_leaves_nothing() {
        let (storage, outbox) = outbox();
        storage.fail_next_commits(1);

        let mut extra = Batch::new();
        extra.put(Collection::Templates, "x", "{}");
        let result = outbox
            .enqueue(draft("op-1", Reference::maintenance_order(1)), None, extra)
            .await;

        assert!(result.is_err());
        assert!(outbox.is_empty().await.unwrap());
        assert_eq!(storage.count(Collection::Templates), 0);
        assert_eq!(storage.count(Collection::Meta), 0);
    }

    #[tokio::test]
    async fn attempt_fail_retry_discard() {
        let (_, outbox) = outbox();
        let reference = Reference::maintenance_order(1);
        outbox.enqueue(draft("op-1", reference), None, Batch::new()).await.unwrap();

        let op = outbox.record_attempt("op-1").await.unwrap();
        assert_eq!(op.attempt_count, 1);
        assert!(outbox.has_pending_work().await.unwrap());

        assert!(matches!(
            outbox.retry_failed("op-1").await,
            Err(SyncError::OperationNotFailed(_))
        ));
        assert!(matches!(
            outbox.discard_failed("op-1").await,
            Err(SyncError::OperationNotFailed(_))
        ));

        outbox.fail("op-1", "template removed").await.unwrap();
        let op = outbox.retry_failed("op-1").await.unwrap();
        assert!(op.is_pending());
        assert_eq!(op.attempt_count, 1);

        outbox.fail("op-1", "template removed").await.unwrap();
        outbox.discard_failed("op-1").await.unwrap();
        assert!(outbox.get("op-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn enqueue_held() {
        let (_, outbox) = outbox();
        let op = outbox
            .enqueue(
                draft("op-1", Reference::maintenance_order(1)),
                Some("c-7".into()),
                Batch::new(),
            )
            .await
            .unwrap();
        assert!(op.is_held());
        assert_eq!(op.held_by().map(String::as_str), Some("c-7"));
        assert!(outbox.get("op-1").await.unwrap().unwrap().is_held());
        assert!(!outbox.has_pending_work().await.unwrap());
    }

    #[tokio::test]
    async fn unknown_operation() {
        let (_, outbox) = outbox();
        assert!(matches!(
            outbox.record_attempt("nope").await,
            Err(SyncError::UnknownOperation(_))
        ));
    }
}
