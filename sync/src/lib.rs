//! # Checklist Sync
//!
//! Offline-capable runtime around `checklist-engine`: a durable local store,
//! an outbox of submissions awaiting acknowledgement, a coordinator that
//! drains the outbox when the network allows, and a notification bus.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use checklist_sync::{ChecklistEngine, Connectivity, EngineOptions, HttpChecklistApi, SqliteStorage};
//! use checklist_engine::Reference;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = SqliteStorage::open("checklists.db").await?;
//! let api = HttpChecklistApi::new("https://api.example.com", None, std::time::Duration::from_secs(15))?;
//! let engine = ChecklistEngine::new(
//!     Arc::new(storage),
//!     Arc::new(api),
//!     Connectivity::online(),
//!     EngineOptions::default(),
//! );
//! engine.start();
//!
//! let reference = Reference::maintenance_order(42);
//! let loaded = engine.load_checklist(reference).await?;
//! let receipt = engine.submit(reference, loaded.responses).await?;
//! println!("queued: {}", receipt.queued);
//!
//! engine.stop().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Guarantees
//!
//! - `submit` returns only after the operation is durable
//! - Operations of one reference reach the server in submission order
//! - Retries reuse the operation ID as idempotency key
//! - Conflicts are never resolved without an explicit policy

pub mod bus;
pub mod config;
pub mod conflicts;
pub mod connectivity;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod local_store;
pub mod outbox;
pub mod remote;
pub mod storage;

pub use bus::{NotificationBus, Subscription};
pub use config::{ConfigError, EngineOptions, SyncConfig};
pub use conflicts::ConflictStore;
pub use connectivity::Connectivity;
pub use coordinator::{Coordinator, DrainReport, SyncParts};
pub use engine::{ChecklistEngine, LoadedChecklist, SubmitReceipt, SyncStatus};
pub use error::{Result, SyncError};
pub use local_store::LocalStore;
pub use outbox::Outbox;
pub use remote::{ChecklistApi, HttpChecklistApi, RemoteError, SubmitOutcome, Submission};
pub use storage::{Batch, Collection, MemoryStorage, SqliteStorage, Storage};

use checklist_engine::Timestamp;

/// Wall-clock time in milliseconds since the epoch.
pub fn now_ms() -> Timestamp {
    chrono::Utc::now().timestamp_millis().max(0) as Timestamp
}
