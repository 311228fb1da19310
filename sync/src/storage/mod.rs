//! Durable key-value storage.
//!
//! Everything the engine persists goes through [`Storage`]: a handful of
//! named collections of JSON documents, a consistent multi-key read, and an
//! atomic batch commit that is durable before it returns.

mod memory;
mod sqlite;

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::Result;

/// Named collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Collection {
    Templates,
    Responses,
    Outbox,
    Conflicts,
    Meta,
}

impl Collection {
    /// All collections.
    pub const ALL: [Collection; 5] = [
        Collection::Templates,
        Collection::Responses,
        Collection::Outbox,
        Collection::Conflicts,
        Collection::Meta,
    ];

    /// Table backing the collection.
    pub fn table(&self) -> &'static str {
        match self {
            Collection::Templates => "templates",
            Collection::Responses => "responses",
            Collection::Outbox => "outbox",
            Collection::Conflicts => "conflicts",
            Collection::Meta => "meta",
        }
    }
}

/// A single write inside a [`Batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Write {
    Put {
        collection: Collection,
        key: String,
        value: String,
    },
    Delete {
        collection: Collection,
        key: String,
    },
}

/// Writes applied all together or not at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    writes: Vec<Write>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a raw put.
    pub fn put(&mut self, collection: Collection, key: impl Into<String>, value: impl Into<String>) {
        self.writes.push(Write::Put {
            collection,
            key: key.into(),
            value: value.into(),
        });
    }

    /// Queue a put of a JSON-encoded document.
    pub fn put_json<T: Serialize>(
        &mut self,
        collection: Collection,
        key: impl Into<String>,
        value: &T,
    ) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.put(collection, key, json);
        Ok(())
    }

    /// Queue a delete.
    pub fn delete(&mut self, collection: Collection, key: impl Into<String>) {
        self.writes.push(Write::Delete {
            collection,
            key: key.into(),
        });
    }

    /// Append another batch's writes.
    pub fn extend(&mut self, other: Batch) {
        self.writes.extend(other.writes);
    }

    pub fn writes(&self) -> &[Write] {
        &self.writes
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// Durable key-value log.
///
/// Implementations must make [`Storage::commit`] atomic and durable before
/// returning, and [`Storage::read`] must observe a single consistent state.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Read several keys from one consistent snapshot.
    async fn read(&self, keys: &[(Collection, String)]) -> Result<Vec<Option<String>>>;

    /// All documents of a collection, ordered by key.
    async fn scan(&self, collection: Collection) -> Result<Vec<(String, String)>>;

    /// Apply a batch atomically.
    async fn commit(&self, batch: Batch) -> Result<()>;
}

/// Read and decode one JSON document.
pub async fn get_json<T: DeserializeOwned>(
    storage: &dyn Storage,
    collection: Collection,
    key: &str,
) -> Result<Option<T>> {
    let mut values = storage.read(&[(collection, key.to_string())]).await?;
    match values.pop().flatten() {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

/// Decode every document of a collection.
pub async fn scan_json<T: DeserializeOwned>(
    storage: &dyn Storage,
    collection: Collection,
) -> Result<Vec<T>> {
    storage
        .scan(collection)
        .await?
        .into_iter()
        .map(|(_, json)| serde_json::from_str(&json).map_err(Into::into))
        .collect()
}
