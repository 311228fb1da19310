//! Snapshot types for the durable local store.
//!
//! A [`ChecklistEntry`] is what the local store keeps per reference: the
//! template, the latest known responses, and the server version those
//! responses were last synced at. A [`ServerSnapshot`] is what the server
//! reports for a reference.

use crate::{
    error::Result, ResponseSet, TemplateSnapshot, Timestamp, VersionMarker,
};
use serde::{Deserialize, Serialize};

/// Version of the persisted entry format for future compatibility.
pub const ENTRY_FORMAT_VERSION: u32 = 1;

/// The server's current responses for a reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSnapshot {
    /// Responses as stored by the server
    pub responses: ResponseSet,
    /// Server last-modified marker for the reference
    pub version: VersionMarker,
}

impl ServerSnapshot {
    /// Create a new server snapshot.
    pub fn new(responses: ResponseSet, version: VersionMarker) -> Self {
        Self { responses, version }
    }
}

/// Cached checklist state for one reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecklistEntry {
    /// Entry format version
    pub format_version: u32,
    /// Template the responses are bound to
    pub template: TemplateSnapshot,
    /// Latest known responses (possibly a staged local edit)
    pub responses: ResponseSet,
    /// Server marker at the last successful sync
    pub synced_version: VersionMarker,
    /// When the entry was written (milliseconds since epoch)
    pub cached_at: Timestamp,
}

impl ChecklistEntry {
    /// Entry for a freshly fetched template and its server responses.
    pub fn from_server(
        template: TemplateSnapshot,
        server: ServerSnapshot,
        cached_at: Timestamp,
    ) -> Self {
        Self {
            format_version: ENTRY_FORMAT_VERSION,
            template,
            responses: server.responses,
            synced_version: server.version,
            cached_at,
        }
    }

    /// Entry holding a local edit that has not been acknowledged yet.
    ///
    /// The synced version is carried over: the edit is based on it.
    pub fn staged(&self, responses: ResponseSet, cached_at: Timestamp) -> Self {
        Self {
            format_version: ENTRY_FORMAT_VERSION,
            template: self.template.clone(),
            responses,
            synced_version: self.synced_version,
            cached_at,
        }
    }

    /// Entry after the server acknowledged or reported a state.
    pub fn synced(&self, server: ServerSnapshot, cached_at: Timestamp) -> Self {
        Self {
            format_version: ENTRY_FORMAT_VERSION,
            template: self.template.clone(),
            responses: server.responses,
            synced_version: server.version,
            cached_at,
        }
    }

    /// Whether the entry is younger than `ttl_ms` at `now`.
    pub fn is_fresh(&self, now: Timestamp, ttl_ms: u64) -> bool {
        now.saturating_sub(self.cached_at) < ttl_ms
    }

    /// Validate that the cached responses are bound to the cached template.
    pub fn validate(&self) -> Result<()> {
        self.responses.validate(&self.template)
    }
}
