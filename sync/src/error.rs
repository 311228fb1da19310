//! Unified error handling for the sync runtime.

use checklist_engine::Reference;

use crate::config::ConfigError;
use crate::remote::RemoteError;

/// Sync runtime error type.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Engine error: {0}")]
    Engine(#[from] checklist_engine::Error),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("No cached checklist for {0}")]
    NotCached(Reference),

    #[error("Offline and no cached checklist for {0}")]
    Offline(Reference),

    #[error("No active checklist template for {0}")]
    NoTemplate(Reference),

    #[error("Unknown conflict: {0}")]
    UnknownConflict(String),

    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Operation {0} is not in the failed state")]
    OperationNotFailed(String),
}

/// Result type alias for the sync runtime.
pub type Result<T> = std::result::Result<T, SyncError>;
