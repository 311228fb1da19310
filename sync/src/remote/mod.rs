//! Remote checklist API.
//!
//! The engine only talks to the server through [`ChecklistApi`], so tests
//! can script server behavior and hosts can swap the transport.

mod http;

pub use http::HttpChecklistApi;

use async_trait::async_trait;
use checklist_engine::{
    OperationId, QueuedOperation, Reference, ResponseSet, ServerSnapshot, TemplateId,
    TemplateSnapshot, TemplateSummary, VersionMarker,
};

/// A submission as sent to the server.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    /// Sent as the `Idempotency-Key` header
    pub idempotency_key: OperationId,
    pub template_id: TemplateId,
    pub reference: Reference,
    /// Server marker the edit was staged against
    pub base_version: VersionMarker,
    pub responses: ResponseSet,
}

impl Submission {
    /// Submission for a queued operation.
    pub fn from_operation(op: &QueuedOperation) -> Self {
        Self {
            idempotency_key: op.operation_id.clone(),
            template_id: op.template_id,
            reference: op.reference,
            base_version: op.base_version,
            responses: op.payload.clone(),
        }
    }
}

/// How the server answered a submission.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Stored; carries the server state after the write
    Accepted(ServerSnapshot),
    /// Rejected because the server moved past the base version
    Stale(ServerSnapshot),
}

/// Remote API failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("checklist template no longer exists")]
    TemplateGone,

    #[error("submission incompatible with server template: {0}")]
    Incompatible(String),

    #[error("malformed response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Whether retrying later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Network(_) | RemoteError::Timeout => true,
            RemoteError::Http { status, .. } => *status >= 500 || *status == 429,
            RemoteError::TemplateGone | RemoteError::Incompatible(_) | RemoteError::Decode(_) => {
                false
            }
        }
    }
}

/// Request/response checklist API.
#[async_trait]
pub trait ChecklistApi: Send + Sync {
    /// Templates attached to a reference.
    async fn list_templates(&self, reference: &Reference) -> Result<Vec<TemplateSummary>, RemoteError>;

    /// Full template structure.
    async fn fetch_template(&self, template_id: TemplateId) -> Result<TemplateSnapshot, RemoteError>;

    /// Current responses of a reference.
    async fn fetch_responses(
        &self,
        template_id: TemplateId,
        reference: &Reference,
    ) -> Result<ServerSnapshot, RemoteError>;

    /// Submit responses. Retrying with the same idempotency key has no
    /// further effect on the server.
    async fn submit(&self, submission: &Submission) -> Result<SubmitOutcome, RemoteError>;
}
