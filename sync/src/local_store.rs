//! Durable local store of checklist entries.
//!
//! One entry per reference, split over two collections: the template snapshot
//! and the response state. Both halves are always written in the same batch
//! and read in the same snapshot, so a reader never sees a template paired
//! with responses captured against another one.

use std::sync::Arc;

use checklist_engine::{
    ChecklistEntry, Reference, ResponseSet, TemplateSnapshot, Timestamp, VersionMarker,
    ENTRY_FORMAT_VERSION,
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::Result;
use crate::storage::{Batch, Collection, Storage};

/// Response half of a [`ChecklistEntry`] as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredResponses {
    format_version: u32,
    responses: ResponseSet,
    synced_version: VersionMarker,
    cached_at: Timestamp,
}

/// Local store of checklist entries, keyed by reference.
#[derive(Clone)]
pub struct LocalStore {
    storage: Arc<dyn Storage>,
    locks: Arc<DashMap<Reference, Arc<Mutex<()>>>>,
}

impl LocalStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Serialize read-modify-write cycles on one reference.
    ///
    /// Held only around local reads and commits, never across a remote call.
    pub async fn lock(&self, reference: &Reference) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(*reference).or_default().clone();
        lock.lock_owned().await
    }

    /// Cached entry for a reference. Never touches the network.
    pub async fn get(&self, reference: &Reference) -> Result<Option<ChecklistEntry>> {
        let key = reference.key();
        let values = self
            .storage
            .read(&[
                (Collection::Templates, key.clone()),
                (Collection::Responses, key),
            ])
            .await?;

        let (template, responses) = match values.as_slice() {
            [Some(template), Some(responses)] => (template, responses),
            [None, None] => return Ok(None),
            _ => {
                tracing::warn!(reference = %reference, "Cached entry is missing one half, ignoring");
                return Ok(None);
            }
        };

        let template: TemplateSnapshot = serde_json::from_str(template)?;
        let stored: StoredResponses = serde_json::from_str(responses)?;

        Ok(Some(ChecklistEntry {
            format_version: stored.format_version,
            template,
            responses: stored.responses,
            synced_version: stored.synced_version,
            cached_at: stored.cached_at,
        }))
    }

    /// Overwrite the entry for a reference atomically.
    pub async fn put(&self, reference: &Reference, entry: &ChecklistEntry) -> Result<()> {
        let mut batch = Batch::new();
        Self::stage_put(&mut batch, reference, entry)?;
        self.storage.commit(batch).await?;

        tracing::debug!(
            reference = %reference,
            template_id = entry.template.id,
            synced_version = %entry.synced_version,
            "Cached checklist entry"
        );
        Ok(())
    }

    /// Add the writes of [`LocalStore::put`] to a caller's batch.
    pub fn stage_put(batch: &mut Batch, reference: &Reference, entry: &ChecklistEntry) -> Result<()> {
        let key = reference.key();
        batch.put_json(Collection::Templates, key.clone(), &entry.template)?;
        batch.put_json(
            Collection::Responses,
            key,
            &StoredResponses {
                format_version: ENTRY_FORMAT_VERSION,
                responses: entry.responses.clone(),
                synced_version: entry.synced_version,
                cached_at: entry.cached_at,
            },
        )?;
        Ok(())
    }

    /// Drop the entry for a reference.
    pub async fn remove(&self, reference: &Reference) -> Result<()> {
        let key = reference.key();
        let mut batch = Batch::new();
        batch.delete(Collection::Templates, key.clone());
        batch.delete(Collection::Responses, key);
        self.storage.commit(batch).await
    }

    /// Drop every cached entry. Queued operations are not touched.
    pub async fn clear(&self) -> Result<()> {
        let mut batch = Batch::new();
        for collection in [Collection::Templates, Collection::Responses] {
            for (key, _) in self.storage.scan(collection).await? {
                batch.delete(collection, key);
            }
        }
        self.storage.commit(batch).await
    }

    /// References with a cached entry.
    pub async fn references(&self) -> Result<Vec<Reference>> {
        let keys = self.storage.scan(Collection::Templates).await?;
        Ok(keys
            .into_iter()
            .filter_map(|(key, _)| Reference::parse_key(&key).ok())
            .collect())
    }
}
