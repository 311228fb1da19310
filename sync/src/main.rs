//! Checklist sync daemon.
//!
//! Runs the sync engine against the configured API, draining the local
//! outbox in the background and logging sync events until interrupted.

use checklist_engine::SyncEvent;
use checklist_sync::{ChecklistEngine, Connectivity, SyncConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "checklist_sync=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = SyncConfig::from_env()?;

    tracing::info!(
        api_url = %config.api_url,
        database = %config.database_path.display(),
        "Starting checklist sync"
    );

    let engine = ChecklistEngine::open(&config, Connectivity::online()).await?;
    let mut events = engine.subscribe_all();

    let status = engine.status().await?;
    tracing::info!(
        queued = status.queue_length,
        conflicts = status.conflict_count,
        "Local state loaded"
    );

    engine.start();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Some(event) => log_event(&event),
                None => break,
            },
        }
    }

    tracing::info!("Shutting down");
    engine.stop().await;

    Ok(())
}

fn log_event(event: &SyncEvent) {
    match event {
        SyncEvent::Queued {
            reference,
            operation_id,
            pending,
        } => tracing::info!(%reference, %operation_id, pending, "Queued"),
        SyncEvent::Synced {
            reference,
            operation_id,
        } => tracing::info!(%reference, %operation_id, "Synced"),
        SyncEvent::ConflictDetected { conflict } => tracing::warn!(
            reference = %conflict.reference,
            conflict_id = %conflict.id,
            divergent_items = ?conflict.divergent_items,
            "Conflict needs resolution"
        ),
        SyncEvent::ConflictResolved { conflict } => tracing::info!(
            reference = %conflict.reference,
            conflict_id = %conflict.id,
            "Conflict resolved"
        ),
        SyncEvent::OperationFailed {
            reference,
            operation_id,
            reason,
        } => tracing::error!(%reference, %operation_id, %reason, "Operation failed"),
        SyncEvent::StateChanged { state, pending } => {
            tracing::info!(%state, pending, "Sync state")
        }
    }
}
