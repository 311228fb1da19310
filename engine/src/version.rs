//! Version markers for detecting divergent edits.
//!
//! Every cached checklist entry and every queued operation carries the
//! server's last-modified marker it was based on. Comparing markers is how the
//! engine tells "the server moved on since I last looked" apart from "the
//! server still holds what I last synced".

use crate::Timestamp;
use serde::{Deserialize, Serialize};

/// Server last-modified marker, in milliseconds since the Unix epoch.
///
/// Ordering rules:
/// 1. Higher marker is newer
/// 2. [`VersionMarker::ORIGIN`] is older than any marker the server hands out
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionMarker(i64);

impl VersionMarker {
    /// Marker of something that has never been synced.
    pub const ORIGIN: VersionMarker = VersionMarker(0);

    /// Create a marker from milliseconds since the epoch.
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Create a marker from an engine timestamp.
    pub fn from_timestamp(timestamp: Timestamp) -> Self {
        Self(i64::try_from(timestamp).unwrap_or(i64::MAX))
    }

    /// Milliseconds since the epoch.
    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// Whether nothing has been synced yet.
    pub const fn is_origin(self) -> bool {
        self.0 == 0
    }

    /// Whether this marker is strictly newer than `other`.
    pub fn is_newer_than(self, other: VersionMarker) -> bool {
        self > other
    }

    /// The later of two markers.
    pub fn latest(self, other: VersionMarker) -> VersionMarker {
        self.max(other)
    }
}

impl std::fmt::Display for VersionMarker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}
