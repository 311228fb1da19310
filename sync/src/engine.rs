//! UI-facing façade.
//!
//! [`ChecklistEngine`] wires the local store, outbox, conflict store, remote
//! API and coordinator together. Each instance owns its components; nothing
//! is shared through globals.

use std::future::Future;
use std::sync::Arc;

use checklist_engine::{
    ChecklistEntry, ConflictId, OperationDraft, OperationId, QueuedOperation, Reference,
    ResolutionPolicy, ResponseSet, ServerSnapshot, SyncConflict, SyncEvent, SyncState,
    TemplateSnapshot, VersionMarker,
};

use crate::bus::{NotificationBus, Subscription};
use crate::config::{EngineOptions, SyncConfig};
use crate::conflicts::ConflictStore;
use crate::connectivity::Connectivity;
use crate::coordinator::{Coordinator, DrainReport, SyncParts};
use crate::error::{Result, SyncError};
use crate::local_store::LocalStore;
use crate::now_ms;
use crate::outbox::Outbox;
use crate::remote::{ChecklistApi, HttpChecklistApi, RemoteError};
use crate::storage::{Batch, SqliteStorage, Storage};

/// A checklist as shown to the user.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedChecklist {
    pub template: TemplateSnapshot,
    /// Local edits included, aligned to `template`
    pub responses: ResponseSet,
    /// Server marker the responses build on
    pub synced_version: VersionMarker,
    /// Served from the local store without a fresh server read
    pub from_cache: bool,
}

impl LoadedChecklist {
    fn new(entry: ChecklistEntry, from_cache: bool) -> Self {
        Self {
            template: entry.template,
            responses: entry.responses,
            synced_version: entry.synced_version,
            from_cache,
        }
    }
}

/// Outcome of [`ChecklistEngine::submit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub operation_id: OperationId,
    /// The server acknowledged the edit before `submit` returned
    pub accepted: bool,
    /// The edit is still waiting in the outbox
    pub queued: bool,
    /// Set when the edit was held by an unresolved conflict
    pub conflict_id: Option<ConflictId>,
}

/// Snapshot of the sync indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncStatus {
    pub state: SyncState,
    pub is_online: bool,
    /// Drain passes in a row that ended on a transient failure
    pub consecutive_failures: u32,
    /// Every queued operation, held and failed included
    pub queue_length: usize,
    /// Unresolved conflicts
    pub conflict_count: usize,
}

/// Offline-capable checklist engine.
pub struct ChecklistEngine {
    parts: SyncParts,
    options: EngineOptions,
    coordinator: Coordinator,
}

impl ChecklistEngine {
    pub fn new(
        storage: Arc<dyn Storage>,
        api: Arc<dyn ChecklistApi>,
        connectivity: Connectivity,
        options: EngineOptions,
    ) -> Self {
        let parts = SyncParts {
            local: LocalStore::new(Arc::clone(&storage)),
            outbox: Arc::new(Outbox::new(Arc::clone(&storage))),
            conflicts: Arc::new(ConflictStore::new(storage)),
            api,
            bus: NotificationBus::new_shared(),
            connectivity,
        };
        let coordinator = Coordinator::new(parts.clone(), options);
        Self {
            parts,
            options,
            coordinator,
        }
    }

    /// Engine backed by SQLite and the HTTP API described by `config`.
    pub async fn open(config: &SyncConfig, connectivity: Connectivity) -> Result<Self> {
        let storage = SqliteStorage::open(&config.database_path).await?;
        let api = HttpChecklistApi::from_config(config)?;
        Ok(Self::new(
            Arc::new(storage),
            Arc::new(api),
            connectivity,
            config.engine_options(),
        ))
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.parts.connectivity
    }

    /// Start background draining.
    pub fn start(&self) {
        self.coordinator.start();
    }

    /// Stop background draining. Queued work stays in the outbox.
    pub async fn stop(&self) {
        self.coordinator.stop().await;
    }

    /// Load the checklist of a reference.
    ///
    /// The local store answers when offline, when its entry is still fresh,
    /// or when the reference has unsynced edits or an open conflict. Otherwise
    /// the server is read and the entry replaced. A transient server failure
    /// falls back to the cached entry.
    pub async fn load_checklist(&self, reference: Reference) -> Result<LoadedChecklist> {
        let cached = self.parts.local.get(&reference).await?;
        let online = self.parts.connectivity.is_online();

        if let Some(entry) = &cached {
            let ttl_ms = self.options.cache_ttl.as_millis() as u64;
            if !online || entry.is_fresh(now_ms(), ttl_ms) || self.has_local_state(&reference).await? {
                return Ok(LoadedChecklist::new(entry.clone(), true));
            }
        } else if !online {
            return Err(SyncError::Offline(reference));
        }

        let fetched = match self.fetch_entry(&reference, cached.as_ref()).await {
            Ok(entry) => entry,
            Err(SyncError::Remote(err)) if err.is_transient() => {
                return match cached {
                    Some(entry) => {
                        tracing::warn!(reference = %reference, error = %err, "Server unreachable, serving cache");
                        Ok(LoadedChecklist::new(entry, true))
                    }
                    None => Err(SyncError::Remote(err)),
                };
            }
            Err(err) => return Err(err),
        };

        let _guard = self.parts.local.lock(&reference).await;
        // An edit may have been staged while the server was read
        if self.has_local_state(&reference).await? {
            if let Some(entry) = self.parts.local.get(&reference).await? {
                return Ok(LoadedChecklist::new(entry, true));
            }
        }
        self.parts.local.put(&reference, &fetched).await?;

        Ok(LoadedChecklist::new(fetched, false))
    }

    async fn fetch_entry(
        &self,
        reference: &Reference,
        cached: Option<&ChecklistEntry>,
    ) -> Result<ChecklistEntry> {
        let template_id = match cached {
            Some(entry) => entry.template.id,
            None => {
                let summaries = self.remote(self.parts.api.list_templates(reference)).await?;
                summaries
                    .into_iter()
                    .find(|summary| summary.is_active)
                    .map(|summary| summary.id)
                    .ok_or(SyncError::NoTemplate(*reference))?
            }
        };

        let template = self.remote(self.parts.api.fetch_template(template_id)).await?;
        let server = self
            .remote(self.parts.api.fetch_responses(template_id, reference))
            .await?;
        let server = ServerSnapshot::new(server.responses.aligned_to(&template), server.version);

        tracing::debug!(
            reference = %reference,
            template_id,
            server_version = %server.version,
            "Fetched checklist from server"
        );
        Ok(ChecklistEntry::from_server(template, server, now_ms()))
    }

    async fn remote<T>(&self, call: impl Future<Output = std::result::Result<T, RemoteError>>) -> Result<T> {
        match tokio::time::timeout(self.options.request_timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(RemoteError::Timeout.into()),
        }
    }

    async fn has_local_state(&self, reference: &Reference) -> Result<bool> {
        if !self.parts.outbox.list_pending(Some(reference)).await?.is_empty() {
            return Ok(true);
        }
        Ok(self.parts.conflicts.unresolved_for(reference).await?.is_some())
    }

    /// Stage an edit and queue it for the server.
    ///
    /// Returns once the operation is durable. When online, one immediate
    /// submission is attempted; `accepted` reports whether it went through.
    /// A storage failure is returned as is and leaves no operation behind.
    pub async fn submit(&self, reference: Reference, responses: ResponseSet) -> Result<SubmitReceipt> {
        let guard = self.parts.local.lock(&reference).await;

        let entry = self
            .parts
            .local
            .get(&reference)
            .await?
            .ok_or(SyncError::NotCached(reference))?;
        responses.validate_for_submit(&entry.template)?;

        let now = now_ms();
        let draft = OperationDraft::new(
            uuid::Uuid::new_v4().to_string(),
            reference,
            responses.clone(),
            entry.synced_version,
            now,
        );

        let mut batch = Batch::new();
        LocalStore::stage_put(&mut batch, &reference, &entry.staged(responses, now))?;

        let hold = match self.parts.conflicts.unresolved_for(&reference).await? {
            Some(mut conflict) => {
                let server = conflict.server_snapshot.clone();
                conflict.absorb(
                    entry.synced_version,
                    draft.payload.clone(),
                    server,
                    draft.operation_id.clone(),
                    now,
                )?;
                ConflictStore::stage_put(&mut batch, &conflict)?;
                Some(conflict.id)
            }
            None => None,
        };

        let op = self.parts.outbox.enqueue(draft, hold.clone(), batch).await?;
        drop(guard);

        self.parts.bus.publish(SyncEvent::Queued {
            reference,
            operation_id: op.operation_id.clone(),
            pending: self.queue_length().await,
        });

        let accepted = if hold.is_none() && self.parts.connectivity.is_online() {
            self.coordinator.attempt(reference).await;
            self.parts.outbox.get(&op.operation_id).await?.is_none()
        } else {
            false
        };

        Ok(SubmitReceipt {
            operation_id: op.operation_id,
            accepted,
            queued: !accepted,
            conflict_id: hold,
        })
    }

    /// Events of one reference.
    pub fn subscribe(&self, reference: Reference) -> Subscription {
        self.parts.bus.subscribe(reference)
    }

    /// Every event, state changes included.
    pub fn subscribe_all(&self) -> Subscription {
        self.parts.bus.subscribe_all()
    }

    /// Conflicts, resolved ones included, oldest first.
    pub async fn list_conflicts(&self, reference: Option<Reference>) -> Result<Vec<SyncConflict>> {
        self.parts.conflicts.list(reference.as_ref()).await
    }

    /// Apply a resolution policy to an unresolved conflict.
    ///
    /// Held operations are dropped; `Local` and `Merge` queue the chosen
    /// answers as a new operation based on the server version, `Server`
    /// adopts the server state. Everything commits in one batch.
    pub async fn resolve_conflict(
        &self,
        conflict_id: &str,
        policy: ResolutionPolicy,
    ) -> Result<SyncConflict> {
        let _drain = self.coordinator.exclusive().await;

        let reference = self
            .parts
            .conflicts
            .get(conflict_id)
            .await?
            .ok_or_else(|| SyncError::UnknownConflict(conflict_id.to_string()))?
            .reference;
        let _guard = self.parts.local.lock(&reference).await;

        let mut conflict = self
            .parts
            .conflicts
            .get(conflict_id)
            .await?
            .ok_or_else(|| SyncError::UnknownConflict(conflict_id.to_string()))?;
        let now = now_ms();
        let resolution = conflict.resolve(&policy, now)?;

        let mut batch = Batch::new();
        let held = self.parts.outbox.list_pending(Some(&reference)).await?;
        for op in held.iter().filter(|op| {
            resolution.superseded.contains(&op.operation_id)
                || op.held_by().map(String::as_str) == Some(conflict_id)
        }) {
            Outbox::stage_delete(&mut batch, &op.operation_id);
        }
        ConflictStore::stage_put(&mut batch, &conflict)?;

        if let Some(entry) = self.parts.local.get(&reference).await? {
            let updated = if resolution.resubmit.is_some() {
                let mut staged = entry.staged(resolution.responses.clone(), now);
                staged.synced_version = resolution.basis.version;
                staged
            } else {
                entry.synced(
                    ServerSnapshot::new(
                        resolution.responses.aligned_to(&entry.template),
                        resolution.basis.version,
                    ),
                    now,
                )
            };
            LocalStore::stage_put(&mut batch, &reference, &updated)?;
        }

        let resubmitted = match resolution.resubmit {
            Some(responses) => {
                let draft = OperationDraft::new(
                    uuid::Uuid::new_v4().to_string(),
                    reference,
                    responses,
                    resolution.basis.version,
                    now,
                );
                Some(self.parts.outbox.enqueue(draft, None, batch).await?)
            }
            None => {
                self.parts.outbox.commit(batch).await?;
                None
            }
        };

        tracing::info!(
            conflict_id = %conflict.id,
            reference = %reference,
            state = ?conflict.resolution_state,
            resubmitted = ?resubmitted.as_ref().map(|op| &op.operation_id),
            "Conflict resolved"
        );

        if let Some(op) = &resubmitted {
            self.parts.bus.publish(SyncEvent::Queued {
                reference,
                operation_id: op.operation_id.clone(),
                pending: self.queue_length().await,
            });
        }
        self.parts.bus.publish(SyncEvent::ConflictResolved {
            conflict: conflict.clone(),
        });
        self.coordinator.trigger();

        Ok(conflict)
    }

    /// Queued operations in sequence order, held and failed ones included.
    pub async fn list_pending(&self, reference: Option<Reference>) -> Result<Vec<QueuedOperation>> {
        self.parts.outbox.list_pending(reference.as_ref()).await
    }

    pub async fn status(&self) -> Result<SyncStatus> {
        Ok(SyncStatus {
            state: self.coordinator.state(),
            is_online: self.parts.connectivity.is_online(),
            consecutive_failures: self.coordinator.consecutive_failures(),
            queue_length: self.parts.outbox.len().await?,
            conflict_count: self.parts.conflicts.list_unresolved(None).await?.len(),
        })
    }

    /// Drain now instead of waiting for the next tick.
    pub async fn sync_now(&self) -> DrainReport {
        self.coordinator.sync_now().await
    }

    /// Put a failed operation back in line.
    pub async fn retry_failed(&self, operation_id: &str) -> Result<QueuedOperation> {
        let _guard = self.lock_operation(operation_id).await?;
        let op = self.parts.outbox.retry_failed(operation_id).await?;
        self.coordinator.trigger();
        Ok(op)
    }

    /// Drop a failed operation for good.
    pub async fn discard_failed(&self, operation_id: &str) -> Result<QueuedOperation> {
        let _guard = self.lock_operation(operation_id).await?;
        self.parts.outbox.discard_failed(operation_id).await
    }

    /// Lock the reference of a queued operation.
    ///
    /// An acknowledgement rewrites the later operations of its reference
    /// under this lock, so state changes to them must hold it too.
    async fn lock_operation(&self, operation_id: &str) -> Result<tokio::sync::OwnedMutexGuard<()>> {
        let op = self
            .parts
            .outbox
            .get(operation_id)
            .await?
            .ok_or_else(|| SyncError::UnknownOperation(operation_id.to_string()))?;
        Ok(self.parts.local.lock(&op.reference).await)
    }

    async fn queue_length(&self) -> usize {
        match self.parts.outbox.len().await {
            Ok(len) => len,
            Err(err) => {
                tracing::warn!(error = %err, "Failed to count queued operations");
                0
            }
        }
    }
}
