//! In-memory storage backend.
//!
//! Clones share the same data, so dropping an engine and building a new one
//! on a clone behaves like a process restart over the same device storage.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{Batch, Collection, Storage, Write};
use crate::error::{Result, SyncError};

#[derive(Debug, Default)]
struct Inner {
    data: RwLock<BTreeMap<(Collection, String), String>>,
    failing_commits: AtomicUsize,
    failing_reads: AtomicBool,
}

/// Shared in-memory [`Storage`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Inner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` commits fail without writing anything.
    pub fn fail_next_commits(&self, count: usize) {
        self.inner.failing_commits.store(count, Ordering::SeqCst);
    }

    /// Make every read and scan fail until switched off again.
    pub fn fail_reads(&self, failing: bool) {
        self.inner.failing_reads.store(failing, Ordering::SeqCst);
    }

    fn check_read(&self) -> Result<()> {
        if self.inner.failing_reads.load(Ordering::SeqCst) {
            return Err(SyncError::StorageUnavailable("injected read failure".into()));
        }
        Ok(())
    }

    /// Number of documents in a collection.
    pub fn count(&self, collection: Collection) -> usize {
        self.inner
            .data
            .read()
            .keys()
            .filter(|(c, _)| *c == collection)
            .count()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn read(&self, keys: &[(Collection, String)]) -> Result<Vec<Option<String>>> {
        self.check_read()?;
        let data = self.inner.data.read();
        Ok(keys
            .iter()
            .map(|(collection, key)| data.get(&(*collection, key.clone())).cloned())
            .collect())
    }

    async fn scan(&self, collection: Collection) -> Result<Vec<(String, String)>> {
        self.check_read()?;
        let data = self.inner.data.read();
        Ok(data
            .iter()
            .filter(|((c, _), _)| *c == collection)
            .map(|((_, key), value)| (key.clone(), value.clone()))
            .collect())
    }

    async fn commit(&self, batch: Batch) -> Result<()> {
        let injected = self
            .inner
            .failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(SyncError::StorageUnavailable("injected commit failure".into()));
        }

        let mut data = self.inner.data.write();
        for write in batch.writes() {
            match write {
                Write::Put {
                    collection,
                    key,
                    value,
                } => {
                    data.insert((*collection, key.clone()), value.clone());
                }
                Write::Delete { collection, key } => {
                    data.remove(&(*collection, key.clone()));
                }
            }
        }
        Ok(())
    }
}
