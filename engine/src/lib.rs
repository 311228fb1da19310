//! # Checklist Engine
//!
//! Pure sync logic for offline-capable maintenance checklists.
//!
//! This crate holds the data model and the decisions of the checklist sync
//! engine: validating responses against templates, detecting divergence
//! between local edits and server state, merging per item, and driving the
//! sync state machine. It performs no IO; storage, network and timers live in
//! `checklist-sync`.
//!
//! ## Design Principles
//!
//! - **No IO**: every function takes the data and the current time it needs
//! - **Deterministic**: same inputs always produce same outputs
//! - **Explicit conflicts**: divergence is surfaced, never silently resolved
//!
//! ## Core Concepts
//!
//! ### References
//!
//! A [`Reference`] names the business object a checklist is attached to,
//! such as a maintenance order. All engine state is partitioned by reference.
//!
//! ### Templates and Responses
//!
//! A [`TemplateSnapshot`] is the immutable structure responses are captured
//! against. A [`ResponseSet`] holds one [`ResponseRecord`] per answered item
//! and is validated against its template before it is ever queued.
//!
//! ### Outbox Operations
//!
//! A submission becomes a [`QueuedOperation`] carrying the server
//! [`VersionMarker`] it was based on. Its ID is the idempotency key.
//!
//! ### Conflicts
//!
//! [`detect`] reports a [`Divergence`] when the server moved past an edit's
//! basis with different answers. Divergences become [`SyncConflict`] records
//! that are resolved with a [`ResolutionPolicy`]:
//! - [`ResolutionPolicy::Local`] - keep local answers, resubmit them
//! - [`ResolutionPolicy::Server`] - discard the local edit
//! - [`ResolutionPolicy::Merge`] - pick a [`Side`] per divergent item
//!
//! ## Quick Start
//!
//! ```rust
//! use checklist_engine::{
//!     detect, InputKind, ResolutionPolicy, ResponseRecord, ResponseSet, ResponseValue,
//!     Reference, ServerSnapshot, SyncConflict, TemplateItem, TemplateSnapshot, VersionMarker,
//! };
//!
//! // 1. A template and a local edit against it
//! let template = TemplateSnapshot::new(
//!     1,
//!     "Pump inspection",
//!     VersionMarker::from_millis(100),
//!     vec![TemplateItem::new(10, "Running", InputKind::Boolean)],
//! );
//! let local = ResponseSet::blank(&template)
//!     .with(ResponseRecord::completed(10, ResponseValue::Boolean(true)));
//! assert!(local.validate_for_submit(&template).is_ok());
//!
//! // 2. Someone else changed the same item on the server
//! let server = ServerSnapshot::new(
//!     ResponseSet::blank(&template)
//!         .with(ResponseRecord::completed(10, ResponseValue::Boolean(false))),
//!     VersionMarker::from_millis(2_000),
//! );
//! let divergence = detect(VersionMarker::from_millis(1_000), &local, &server).unwrap();
//! assert_eq!(divergence.divergent_items, vec![10]);
//!
//! // 3. Record it and let the caller decide
//! let mut conflict = SyncConflict::open(
//!     "c-1",
//!     Reference::maintenance_order(7),
//!     VersionMarker::from_millis(1_000),
//!     local.clone(),
//!     server,
//!     divergence,
//!     "op-1".to_string(),
//!     5_000,
//! );
//! let resolution = conflict.resolve(&ResolutionPolicy::Local, 6_000).unwrap();
//! assert_eq!(resolution.resubmit, Some(local));
//! ```

pub mod backoff;
pub mod conflict;
pub mod error;
pub mod event;
pub mod operation;
pub mod reference;
pub mod response;
pub mod snapshot;
pub mod state;
pub mod template;
pub mod version;

// Re-export main types at crate root
pub use backoff::{BackoffPolicy, DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_MAX_MS};
pub use conflict::{
    detect, merge, Divergence, FieldSelections, Resolution, ResolutionPolicy, ResolutionState,
    Side, SyncConflict,
};
pub use error::{Error, MissingRequirement, RequirementKind};
pub use event::SyncEvent;
pub use operation::{OperationDraft, OperationState, QueuedOperation};
pub use reference::{Reference, ReferenceType};
pub use response::{ResponseRecord, ResponseSet, ResponseStatus, ResponseValue, Signature};
pub use snapshot::{ChecklistEntry, ServerSnapshot, ENTRY_FORMAT_VERSION};
pub use state::{SyncInput, SyncState};
pub use template::{InputKind, TemplateItem, TemplateSnapshot, TemplateSummary};
pub use version::VersionMarker;

/// Type aliases for clarity
pub type TemplateId = i64;
pub type ItemId = i64;
pub type ReferenceId = i64;
pub type OperationId = String;
pub type ConflictId = String;
pub type Timestamp = u64;
