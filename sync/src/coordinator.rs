//! Sync coordinator.
//!
//! Drives the outbox against the remote API. A background loop wakes on
//! connectivity changes, explicit triggers, a periodic tick and the backoff
//! deadline; every wake runs one pass through the [`SyncState`] machine.
//!
//! Within a pass, references drain concurrently and each reference drains
//! strictly in sequence order. A reference stops draining at the first held
//! operation, at an unresolved conflict, or at a transient failure.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use checklist_engine::{
    detect, ConflictId, Divergence, OperationId, OperationState, QueuedOperation, Reference,
    ServerSnapshot, SyncConflict, SyncEvent, SyncInput, SyncState,
};
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::bus::NotificationBus;
use crate::config::EngineOptions;
use crate::conflicts::ConflictStore;
use crate::connectivity::Connectivity;
use crate::error::Result;
use crate::local_store::LocalStore;
use crate::outbox::Outbox;
use crate::remote::{ChecklistApi, RemoteError, SubmitOutcome, Submission};
use crate::storage::Batch;
use crate::now_ms;

/// What a drain pass achieved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Operations acknowledged by the server
    pub synced: Vec<OperationId>,
    /// Conflicts opened or extended
    pub conflicts: Vec<ConflictId>,
    /// Operations moved to the failed state
    pub failed: Vec<OperationId>,
    /// Whether a reference stopped on a transient failure
    pub interrupted: bool,
}

impl DrainReport {
    fn absorb(&mut self, other: DrainReport) {
        self.synced.extend(other.synced);
        self.conflicts.extend(other.conflicts);
        self.failed.extend(other.failed);
        self.interrupted |= other.interrupted;
    }

    /// Whether the pass touched no operation.
    pub fn is_empty(&self) -> bool {
        self.synced.is_empty() && self.conflicts.is_empty() && self.failed.is_empty()
    }
}

/// Why a pass runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wake {
    Trigger,
    Tick,
    RetryDue,
    Restored,
    Manual,
}

enum StaleOutcome {
    AlreadyApplied,
    Conflict(ConflictId),
}

/// Components the coordinator works on.
#[derive(Clone)]
pub struct SyncParts {
    pub local: LocalStore,
    pub outbox: Arc<Outbox>,
    pub conflicts: Arc<ConflictStore>,
    pub api: Arc<dyn ChecklistApi>,
    pub bus: Arc<NotificationBus>,
    pub connectivity: Connectivity,
}

struct Inner {
    parts: SyncParts,
    options: EngineOptions,
    state: Mutex<SyncState>,
    consecutive_failures: AtomicU32,
    retry_at: Mutex<Option<Instant>>,
    drain_lock: tokio::sync::Mutex<()>,
    trigger: Notify,
}

struct RunningLoop {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Owns the sync state machine and the background drain loop.
pub struct Coordinator {
    inner: Arc<Inner>,
    running: Mutex<Option<RunningLoop>>,
}

impl Coordinator {
    pub fn new(parts: SyncParts, options: EngineOptions) -> Self {
        let initial = if parts.connectivity.is_online() {
            SyncState::Idle
        } else {
            SyncState::Offline
        };
        Self {
            inner: Arc::new(Inner {
                parts,
                options,
                state: Mutex::new(initial),
                consecutive_failures: AtomicU32::new(0),
                retry_at: Mutex::new(None),
                drain_lock: tokio::sync::Mutex::new(()),
                trigger: Notify::new(),
            }),
            running: Mutex::new(None),
        }
    }

    /// Current sync state.
    pub fn state(&self) -> SyncState {
        *self.inner.state.lock()
    }

    /// Consecutive drain passes that ended on a transient failure.
    pub fn consecutive_failures(&self) -> u32 {
        self.inner.consecutive_failures.load(Ordering::SeqCst)
    }

    /// Spawn the background loop. Calling it twice is a no-op.
    pub fn start(&self) {
        let mut running = self.running.lock();
        if running.is_some() {
            return;
        }
        let (shutdown, rx) = watch::channel(false);
        let handle = tokio::spawn(Arc::clone(&self.inner).run(rx));
        *running = Some(RunningLoop { shutdown, handle });
    }

    /// Stop the background loop and wait for it to exit.
    ///
    /// A pass in flight finishes first; queued operations stay queued.
    pub async fn stop(&self) {
        let running = self.running.lock().take();
        if let Some(RunningLoop { shutdown, handle }) = running {
            let _ = shutdown.send(true);
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "Sync loop terminated abnormally");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Ask the background loop for a pass as soon as possible.
    pub fn trigger(&self) {
        self.inner.trigger.notify_one();
    }

    /// Run a full pass now, waiting for any pass in flight.
    ///
    /// In backoff this acts as an early retry.
    pub async fn sync_now(&self) -> DrainReport {
        let guard = self.inner.drain_lock.lock().await;
        self.inner.pass(&guard, Wake::Manual, None).await
    }

    /// Try to drain one reference right away.
    ///
    /// When another pass is running the work is left to the loop and `None`
    /// is returned.
    pub async fn attempt(&self, reference: Reference) -> Option<DrainReport> {
        match self.inner.drain_lock.try_lock() {
            Ok(guard) => Some(self.inner.pass(&guard, Wake::Trigger, Some(reference)).await),
            Err(_) => {
                self.trigger();
                None
            }
        }
    }

    /// Exclude drain passes while the guard lives.
    pub async fn exclusive(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.inner.drain_lock.lock().await
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            let _ = running.shutdown.send(true);
        }
    }
}

impl Inner {
    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut online = self.parts.connectivity.watch();
        let mut ticker = tokio::time::interval(self.options.drain_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_ms = self.options.drain_interval.as_millis() as u64,
            "Sync loop started"
        );

        loop {
            // Re-read every iteration: passes run outside the loop move it too
            let retry_at = *self.retry_at.lock();
            let wake = tokio::select! {
                _ = shutdown.changed() => break,
                changed = online.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if *online.borrow_and_update() {
                        Some(Wake::Restored)
                    } else {
                        None
                    }
                }
                _ = self.trigger.notified() => Some(Wake::Trigger),
                _ = ticker.tick() => Some(Wake::Tick),
                _ = sleep_until(retry_at) => Some(Wake::RetryDue),
            };

            match wake {
                Some(wake) => {
                    let guard = self.drain_lock.lock().await;
                    self.pass(&guard, wake, None).await;
                }
                None => {
                    self.transition(SyncInput::ConnectivityLost).await;
                }
            }
        }

        tracing::info!("Sync loop stopped");
    }

    /// One trip through the state machine. Callers hold the drain lock.
    async fn pass(
        &self,
        _guard: &tokio::sync::MutexGuard<'_, ()>,
        wake: Wake,
        scope: Option<Reference>,
    ) -> DrainReport {
        let input = self.input_for(wake).await;
        if !self.transition(input).await.is_draining() {
            return DrainReport::default();
        }

        let report = self.drain(scope).await;

        let next = if !self.parts.connectivity.is_online() {
            SyncInput::ConnectivityLost
        } else if report.interrupted {
            let consecutive = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
            SyncInput::NetworkError { consecutive }
        } else {
            self.consecutive_failures.store(0, Ordering::SeqCst);
            SyncInput::QueueDrained
        };
        self.transition(next).await;

        report
    }

    async fn input_for(&self, wake: Wake) -> SyncInput {
        if !self.parts.connectivity.is_online() {
            return SyncInput::ConnectivityLost;
        }
        let current = *self.state.lock();
        if current.is_offline() {
            return SyncInput::ConnectivityRestored;
        }

        match wake {
            Wake::RetryDue => SyncInput::RetryDue,
            Wake::Manual if current.backoff_attempt().is_some() => SyncInput::RetryDue,
            Wake::Tick => SyncInput::Tick {
                pending: self.has_pending().await,
            },
            Wake::Trigger | Wake::Restored | Wake::Manual => SyncInput::Trigger {
                pending: self.has_pending().await,
            },
        }
    }

    /// An unreadable outbox counts as pending so the drain reports it.
    async fn has_pending(&self) -> bool {
        match self.parts.outbox.has_pending_work().await {
            Ok(pending) => pending,
            Err(err) => {
                tracing::error!(error = %err, "Failed to read outbox");
                true
            }
        }
    }

    /// Apply an input, publishing the change if the state moved.
    async fn transition(&self, input: SyncInput) -> SyncState {
        let (previous, next) = {
            let mut state = self.state.lock();
            let previous = *state;
            *state = previous.next(input);
            (previous, *state)
        };

        if previous != next {
            *self.retry_at.lock() = match next {
                SyncState::Backoff { attempt } => {
                    let delay = self.options.backoff.delay(attempt);
                    tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, "Backing off");
                    Some(Instant::now() + delay)
                }
                _ => None,
            };
            // The loop may be parked on the previous deadline
            if next.backoff_attempt().is_some() {
                self.trigger.notify_one();
            }

            let pending = match self.parts.outbox.len().await {
                Ok(pending) => pending,
                Err(err) => {
                    tracing::error!(error = %err, "Failed to count queued operations");
                    0
                }
            };
            tracing::debug!(from = %previous, to = %next, pending, "Sync state changed");
            self.parts
                .bus
                .publish(SyncEvent::StateChanged { state: next, pending });
        }

        next
    }

    async fn drain(&self, scope: Option<Reference>) -> DrainReport {
        let references = match scope {
            Some(reference) => vec![reference],
            None => match self.parts.outbox.references().await {
                Ok(references) => references,
                Err(err) => {
                    tracing::error!(error = %err, "Failed to list outbox references");
                    return DrainReport {
                        interrupted: true,
                        ..DrainReport::default()
                    };
                }
            },
        };

        let reports = join_all(references.into_iter().map(|r| self.drain_reference(r))).await;
        let report = reports.into_iter().fold(DrainReport::default(), |mut acc, r| {
            acc.absorb(r);
            acc
        });

        if !report.is_empty() {
            tracing::info!(
                synced = report.synced.len(),
                conflicts = report.conflicts.len(),
                failed = report.failed.len(),
                interrupted = report.interrupted,
                "Drain pass finished"
            );
        }
        report
    }

    async fn drain_reference(&self, reference: Reference) -> DrainReport {
        let mut report = DrainReport::default();
        if let Err(err) = self.drain_reference_inner(&reference, &mut report).await {
            tracing::error!(reference = %reference, error = %err, "Drain failed");
            report.interrupted = true;
        }
        report
    }

    async fn drain_reference_inner(
        &self,
        reference: &Reference,
        report: &mut DrainReport,
    ) -> Result<()> {
        loop {
            if !self.parts.connectivity.is_online() {
                report.interrupted = true;
                return Ok(());
            }
            if let Some(conflict) = self.parts.conflicts.unresolved_for(reference).await? {
                tracing::debug!(reference = %reference, conflict_id = %conflict.id, "Reference blocked by conflict");
                return Ok(());
            }

            let Some(op) = self.parts.outbox.peek_next(reference).await? else {
                return Ok(());
            };
            if op.is_held() {
                return Ok(());
            }

            let op = self.parts.outbox.record_attempt(&op.operation_id).await?;
            tracing::debug!(
                operation_id = %op.operation_id,
                reference = %reference,
                attempt = op.attempt_count,
                "Submitting operation"
            );

            let submission = Submission::from_operation(&op);
            let result = tokio::time::timeout(
                self.options.request_timeout,
                self.parts.api.submit(&submission),
            )
            .await
            .unwrap_or(Err(RemoteError::Timeout));

            match result {
                Ok(SubmitOutcome::Accepted(server)) => {
                    self.on_accepted(&op, server).await?;
                    report.synced.push(op.operation_id);
                }
                Ok(SubmitOutcome::Stale(server)) => match self.on_stale(&op, server).await? {
                    StaleOutcome::AlreadyApplied => report.synced.push(op.operation_id),
                    StaleOutcome::Conflict(conflict_id) => {
                        report.conflicts.push(conflict_id);
                        return Ok(());
                    }
                },
                Err(err) if err.is_transient() => {
                    tracing::warn!(
                        operation_id = %op.operation_id,
                        reference = %reference,
                        error = %err,
                        "Transient submit failure"
                    );
                    report.interrupted = true;
                    return Ok(());
                }
                Err(err) => {
                    self.on_rejected(&op, &err).await?;
                    report.failed.push(op.operation_id);
                }
            }
        }
    }

    async fn on_accepted(&self, op: &QueuedOperation, server: ServerSnapshot) -> Result<()> {
        let _guard = self.parts.local.lock(&op.reference).await;
        self.apply_server_state(op, server).await
    }

    /// Ack `op` and adopt the server state. Caller holds the reference lock.
    async fn apply_server_state(&self, op: &QueuedOperation, server: ServerSnapshot) -> Result<()> {
        let now = now_ms();
        let later: Vec<QueuedOperation> = self
            .parts
            .outbox
            .list_pending(Some(&op.reference))
            .await?
            .into_iter()
            .filter(|other| other.sequence > op.sequence)
            .collect();

        let mut batch = Batch::new();

        // Later edits were staged on top of this one
        for mut next in later.iter().cloned() {
            if next.base_version < server.version {
                next.base_version = server.version;
                Outbox::stage_put(&mut batch, &next)?;
            }
        }

        if let Some(entry) = self.parts.local.get(&op.reference).await? {
            let server = ServerSnapshot::new(server.responses.aligned_to(&entry.template), server.version);
            let updated = if later.is_empty() {
                entry.synced(server, now)
            } else {
                let mut staged = entry.staged(entry.responses.clone(), now);
                staged.synced_version = server.version;
                staged
            };
            LocalStore::stage_put(&mut batch, &op.reference, &updated)?;
        }

        if !self.parts.outbox.ack(&op.operation_id, batch).await? {
            tracing::debug!(operation_id = %op.operation_id, "Operation already acknowledged");
            return Ok(());
        }

        tracing::info!(
            operation_id = %op.operation_id,
            reference = %op.reference,
            server_version = %server.version,
            "Operation acknowledged"
        );
        self.parts.bus.publish(SyncEvent::Synced {
            reference: op.reference,
            operation_id: op.operation_id.clone(),
        });
        Ok(())
    }

    async fn on_stale(&self, op: &QueuedOperation, server: ServerSnapshot) -> Result<StaleOutcome> {
        let _guard = self.parts.local.lock(&op.reference).await;

        let server = match self.parts.local.get(&op.reference).await? {
            Some(entry) => ServerSnapshot::new(server.responses.aligned_to(&entry.template), server.version),
            None => server,
        };

        let divergence = detect(op.base_version, &op.payload, &server).or_else(|| {
            let divergent_items = op.payload.diff(&server.responses);
            if divergent_items.is_empty() {
                None
            } else {
                tracing::warn!(
                    operation_id = %op.operation_id,
                    server_version = %server.version,
                    "Server reported stale without a newer version"
                );
                Some(Divergence { divergent_items })
            }
        });

        if divergence.is_none() {
            tracing::debug!(operation_id = %op.operation_id, "Server already holds these answers");
            self.apply_server_state(op, server).await?;
            return Ok(StaleOutcome::AlreadyApplied);
        }

        let later: Vec<QueuedOperation> = self
            .parts
            .outbox
            .list_pending(Some(&op.reference))
            .await?
            .into_iter()
            .filter(|other| other.sequence > op.sequence && other.is_pending())
            .collect();
        let latest = later.last().map_or_else(|| op.payload.clone(), |last| last.payload.clone());

        let now = now_ms();
        let mut conflict = match self.parts.conflicts.unresolved_for(&op.reference).await? {
            Some(mut existing) => {
                existing.absorb(op.base_version, latest, server, op.operation_id.clone(), now)?;
                existing
            }
            None => {
                let divergence = Divergence {
                    divergent_items: latest.diff(&server.responses),
                };
                SyncConflict::open(
                    uuid::Uuid::new_v4().to_string(),
                    op.reference,
                    op.base_version,
                    latest,
                    server,
                    divergence,
                    op.operation_id.clone(),
                    now,
                )
            }
        };
        for other in &later {
            if !conflict.held_operations.contains(&other.operation_id) {
                conflict.held_operations.push(other.operation_id.clone());
            }
        }

        let mut batch = Batch::new();
        ConflictStore::stage_put(&mut batch, &conflict)?;
        for held in std::iter::once(op).chain(later.iter()) {
            let mut held = held.clone();
            held.state = OperationState::Held {
                conflict_id: conflict.id.clone(),
            };
            Outbox::stage_put(&mut batch, &held)?;
        }
        self.parts.outbox.commit(batch).await?;

        tracing::warn!(
            conflict_id = %conflict.id,
            reference = %op.reference,
            divergent_items = ?conflict.divergent_items,
            held = conflict.held_operations.len(),
            "Conflict detected"
        );
        let conflict_id = conflict.id.clone();
        self.parts
            .bus
            .publish(SyncEvent::ConflictDetected { conflict });

        Ok(StaleOutcome::Conflict(conflict_id))
    }

    async fn on_rejected(&self, op: &QueuedOperation, err: &RemoteError) -> Result<()> {
        let reason = err.to_string();
        self.parts.outbox.fail(&op.operation_id, &reason).await?;

        tracing::error!(
            operation_id = %op.operation_id,
            reference = %op.reference,
            reason = %reason,
            "Operation rejected"
        );
        self.parts.bus.publish(SyncEvent::OperationFailed {
            reference: op.reference,
            operation_id: op.operation_id.clone(),
            reason,
        });
        Ok(())
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
