//! Shared fixtures for the sync integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use checklist_engine::{
    InputKind, OperationId, Reference, ResponseRecord, ResponseSet, ResponseValue, ServerSnapshot,
    TemplateId, TemplateItem, TemplateSnapshot, TemplateSummary, VersionMarker,
};
use checklist_sync::{
    ChecklistApi, ChecklistEngine, Connectivity, EngineOptions, MemoryStorage, RemoteError,
    SubmitOutcome, Submission,
};
use parking_lot::Mutex;

pub const TEMPLATE_ID: TemplateId = 7;

/// Template used by every test: one required boolean, two optional items.
pub fn template() -> TemplateSnapshot {
    TemplateSnapshot::new(
        TEMPLATE_ID,
        "Boiler inspection",
        VersionMarker::from_millis(100),
        vec![
            TemplateItem::new(1, "Flame stable", InputKind::Boolean).at(0),
            TemplateItem::new(2, "Pressure (bar)", InputKind::Number).at(1).optional(),
            TemplateItem::new(3, "Remarks", InputKind::Text).at(2).optional(),
        ],
    )
}

/// Responses answering the required item.
pub fn answers(flame: bool) -> ResponseSet {
    ResponseSet::blank(&template()).with(ResponseRecord::completed(1, ResponseValue::Boolean(flame)))
}

pub fn options() -> EngineOptions {
    EngineOptions {
        drain_interval: Duration::from_secs(3600),
        request_timeout: Duration::from_secs(5),
        cache_ttl: Duration::ZERO,
        ..EngineOptions::default()
    }
}

#[derive(Default)]
struct FakeState {
    responses: HashMap<Reference, ServerSnapshot>,
    results: HashMap<OperationId, SubmitOutcome>,
    received: Vec<Submission>,
    applied: Vec<OperationId>,
    failures: VecDeque<RemoteError>,
    stalls: VecDeque<Duration>,
    lost_responses: usize,
    clock: i64,
}

/// Scripted in-memory server honoring idempotency keys and base versions.
#[derive(Default)]
pub struct FakeApi {
    state: Mutex<FakeState>,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeState {
                clock: 1_000,
                ..FakeState::default()
            }),
        })
    }

    /// Another device writes `responses`; bumps the server version.
    pub fn server_edit(&self, reference: Reference, responses: ResponseSet) -> VersionMarker {
        let mut state = self.state.lock();
        state.clock += 1_000;
        let version = VersionMarker::from_millis(state.clock);
        state
            .responses
            .insert(reference, ServerSnapshot::new(responses, version));
        version
    }

    /// Fail the next submissions with these errors, in order.
    pub fn fail_next(&self, errors: impl IntoIterator<Item = RemoteError>) {
        self.state.lock().failures.extend(errors);
    }

    /// Hold the next submissions for these durations before answering.
    pub fn stall_next(&self, delays: impl IntoIterator<Item = Duration>) {
        self.state.lock().stalls.extend(delays);
    }

    /// Apply the next `count` submissions but drop their responses.
    pub fn lose_next_responses(&self, count: usize) {
        self.state.lock().lost_responses += count;
    }

    pub fn current(&self, reference: &Reference) -> Option<ServerSnapshot> {
        self.state.lock().responses.get(reference).cloned()
    }

    /// Idempotency keys of every request, retries included.
    pub fn received(&self) -> Vec<OperationId> {
        self.state
            .lock()
            .received
            .iter()
            .map(|s| s.idempotency_key.clone())
            .collect()
    }

    pub fn received_for(&self, reference: &Reference) -> Vec<OperationId> {
        self.state
            .lock()
            .received
            .iter()
            .filter(|s| &s.reference == reference)
            .map(|s| s.idempotency_key.clone())
            .collect()
    }

    /// Idempotency keys that changed server state.
    pub fn applied(&self) -> Vec<OperationId> {
        self.state.lock().applied.clone()
    }

    fn snapshot_for(state: &FakeState, reference: &Reference) -> ServerSnapshot {
        state
            .responses
            .get(reference)
            .cloned()
            .unwrap_or_else(|| ServerSnapshot::new(ResponseSet::blank(&template()), VersionMarker::ORIGIN))
    }
}

#[async_trait]
impl ChecklistApi for FakeApi {
    async fn list_templates(&self, _reference: &Reference) -> Result<Vec<TemplateSummary>, RemoteError> {
        let template = template();
        Ok(vec![TemplateSummary {
            id: template.id,
            name: template.name,
            is_active: true,
            version: template.version,
        }])
    }

    async fn fetch_template(&self, template_id: TemplateId) -> Result<TemplateSnapshot, RemoteError> {
        if template_id == TEMPLATE_ID {
            Ok(template())
        } else {
            Err(RemoteError::TemplateGone)
        }
    }

    async fn fetch_responses(
        &self,
        _template_id: TemplateId,
        reference: &Reference,
    ) -> Result<ServerSnapshot, RemoteError> {
        let state = self.state.lock();
        Ok(Self::snapshot_for(&state, reference))
    }

    async fn submit(&self, submission: &Submission) -> Result<SubmitOutcome, RemoteError> {
        let stall = {
            let mut state = self.state.lock();
            state.received.push(submission.clone());
            state.stalls.pop_front()
        };
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if let Some(err) = state.failures.pop_front() {
            return Err(err);
        }

        let outcome = match state.results.get(&submission.idempotency_key) {
            Some(previous) => previous.clone(),
            None => {
                let current = Self::snapshot_for(&state, &submission.reference);
                if current.version > submission.base_version {
                    return Ok(SubmitOutcome::Stale(current));
                }

                state.clock += 1_000;
                let snapshot = ServerSnapshot::new(
                    submission.responses.clone(),
                    VersionMarker::from_millis(state.clock),
                );
                state.responses.insert(submission.reference, snapshot.clone());
                state.applied.push(submission.idempotency_key.clone());

                let outcome = SubmitOutcome::Accepted(snapshot);
                state
                    .results
                    .insert(submission.idempotency_key.clone(), outcome.clone());
                outcome
            }
        };

        if state.lost_responses > 0 {
            state.lost_responses -= 1;
            return Err(RemoteError::Network("connection reset".into()));
        }
        Ok(outcome)
    }
}

/// Engine over shared in-memory storage.
pub fn engine(storage: &MemoryStorage, api: &Arc<FakeApi>, connectivity: &Connectivity) -> ChecklistEngine {
    engine_with(storage, api, connectivity, options())
}

pub fn engine_with(
    storage: &MemoryStorage,
    api: &Arc<FakeApi>,
    connectivity: &Connectivity,
    options: EngineOptions,
) -> ChecklistEngine {
    ChecklistEngine::new(
        Arc::new(storage.clone()),
        Arc::clone(api) as Arc<dyn ChecklistApi>,
        connectivity.clone(),
        options,
    )
}
