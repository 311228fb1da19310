//! Persisted conflict records.
//!
//! Conflicts are never deleted. At most one unresolved conflict exists per
//! reference; new divergences are absorbed into it by the caller.

use std::sync::Arc;

use checklist_engine::{Reference, SyncConflict};

use crate::error::Result;
use crate::storage::{get_json, scan_json, Batch, Collection, Storage};

/// Store of [`SyncConflict`] records, keyed by conflict ID.
pub struct ConflictStore {
    storage: Arc<dyn Storage>,
}

impl ConflictStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Look up a conflict.
    pub async fn get(&self, conflict_id: &str) -> Result<Option<SyncConflict>> {
        get_json(self.storage.as_ref(), Collection::Conflicts, conflict_id).await
    }

    /// Conflicts, optionally for one reference, oldest first.
    pub async fn list(&self, reference: Option<&Reference>) -> Result<Vec<SyncConflict>> {
        let mut conflicts: Vec<SyncConflict> =
            scan_json(self.storage.as_ref(), Collection::Conflicts).await?;
        if let Some(reference) = reference {
            conflicts.retain(|c| &c.reference == reference);
        }
        conflicts.sort_by(|a, b| {
            a.detected_at
                .cmp(&b.detected_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(conflicts)
    }

    /// Unresolved conflicts, optionally for one reference.
    pub async fn list_unresolved(&self, reference: Option<&Reference>) -> Result<Vec<SyncConflict>> {
        let mut conflicts = self.list(reference).await?;
        conflicts.retain(SyncConflict::is_unresolved);
        Ok(conflicts)
    }

    /// The unresolved conflict blocking a reference, if any.
    pub async fn unresolved_for(&self, reference: &Reference) -> Result<Option<SyncConflict>> {
        Ok(self.list_unresolved(Some(reference)).await?.into_iter().next())
    }

    /// Persist a conflict on its own.
    pub async fn put(&self, conflict: &SyncConflict) -> Result<()> {
        let mut batch = Batch::new();
        Self::stage_put(&mut batch, conflict)?;
        self.storage.commit(batch).await
    }

    /// Add a conflict write to a caller's batch.
    pub fn stage_put(batch: &mut Batch, conflict: &SyncConflict) -> Result<()> {
        batch.put_json(Collection::Conflicts, conflict.id.clone(), conflict)
    }
}
