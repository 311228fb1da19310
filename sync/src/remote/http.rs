//! HTTP implementation of [`ChecklistApi`].
//!
//! Talks to the checklist REST API: `{ success, data }` envelopes,
//! snake_case fields, values as strings, SQLite-style timestamps.

use std::time::Duration;

use async_trait::async_trait;
use checklist_engine::{
    InputKind, Reference, ResponseRecord, ResponseSet, ResponseStatus, ResponseValue,
    ServerSnapshot, Signature, TemplateId, TemplateItem, TemplateSnapshot, TemplateSummary,
    VersionMarker,
};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::{ChecklistApi, RemoteError, SubmitOutcome, Submission};
use crate::config::SyncConfig;

/// Reqwest-based checklist API client.
#[derive(Debug, Clone)]
pub struct HttpChecklistApi {
    client: Client,
    base_url: String,
    token: Option<String>,
    precheck_stale: bool,
}

impl HttpChecklistApi {
    /// Create a client for `base_url` with a per-request timeout.
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            precheck_stale: false,
        })
    }

    /// Create a client from runtime configuration.
    pub fn from_config(config: &SyncConfig) -> Result<Self, RemoteError> {
        Ok(Self::new(&config.api_url, config.api_token.clone(), config.request_timeout)?
            .with_precheck(config.precheck_stale))
    }

    /// Detect stale submissions by reading the server state before each
    /// write, for servers that do not check `base_version` themselves.
    pub fn with_precheck(mut self, enabled: bool) -> Self {
        self.precheck_stale = enabled;
        self
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

#[async_trait]
impl ChecklistApi for HttpChecklistApi {
    async fn list_templates(&self, reference: &Reference) -> Result<Vec<TemplateSummary>, RemoteError> {
        let response = self
            .request(Method::GET, "/checklists")
            .query(&[
                ("entity_type", reference.reference_type.as_str().to_string()),
                ("entity_id", reference.reference_id.to_string()),
                ("is_active", "true".to_string()),
            ])
            .send()
            .await
            .map_err(transport)?;

        let templates: Vec<WireTemplate> = read_data(response).await?;
        Ok(templates.iter().map(WireTemplate::summary).collect())
    }

    async fn fetch_template(&self, template_id: TemplateId) -> Result<TemplateSnapshot, RemoteError> {
        let response = self
            .request(Method::GET, &format!("/checklists/{}", template_id))
            .send()
            .await
            .map_err(transport)?;

        let template: WireTemplate = read_data(response).await?;
        template.into_snapshot()
    }

    async fn fetch_responses(
        &self,
        template_id: TemplateId,
        reference: &Reference,
    ) -> Result<ServerSnapshot, RemoteError> {
        let response = self
            .request(Method::GET, &format!("/checklists/{}/responses", template_id))
            .query(&[
                ("reference_type", reference.reference_type.as_str().to_string()),
                ("reference_id", reference.reference_id.to_string()),
            ])
            .send()
            .await
            .map_err(transport)?;

        let rows: Vec<WireResponse> = read_data(response).await?;
        server_snapshot(template_id, rows)
    }

    async fn submit(&self, submission: &Submission) -> Result<SubmitOutcome, RemoteError> {
        if self.precheck_stale {
            let current = self
                .fetch_responses(submission.template_id, &submission.reference)
                .await?;
            if current.version.is_newer_than(submission.base_version) {
                tracing::debug!(
                    operation_id = %submission.idempotency_key,
                    server_version = %current.version,
                    "Pre-check found newer server state"
                );
                return Ok(SubmitOutcome::Stale(current));
            }
        }

        let response = self
            .request(
                Method::POST,
                &format!("/checklists/{}/responses", submission.template_id),
            )
            .header("Idempotency-Key", submission.idempotency_key.as_str())
            .json(&WireSubmission::from(submission))
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if status == StatusCode::CONFLICT {
            let body: Envelope<Vec<WireResponse>> = response.json().await.map_err(transport)?;
            let current = match body.data {
                Some(rows) => server_snapshot(submission.template_id, rows)?,
                None => {
                    self.fetch_responses(submission.template_id, &submission.reference)
                        .await?
                }
            };
            return Ok(SubmitOutcome::Stale(current));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        // Older servers answer `{ success: true }` without the stored rows.
        let body: Option<Envelope<Vec<WireResponse>>> = response.json().await.ok();
        let current = match body.and_then(|b| b.data) {
            Some(rows) => server_snapshot(submission.template_id, rows)?,
            None => {
                self.fetch_responses(submission.template_id, &submission.reference)
                    .await?
            }
        };
        Ok(SubmitOutcome::Accepted(current))
    }
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct WireTemplate {
    id: TemplateId,
    name: String,
    description: Option<String>,
    #[serde(default = "default_true")]
    is_active: bool,
    created_at: Option<String>,
    updated_at: Option<String>,
    #[serde(default)]
    items: Vec<WireItem>,
}

#[derive(Debug, Deserialize)]
struct WireItem {
    id: i64,
    #[serde(default)]
    order_index: i64,
    title: String,
    instructions: Option<String>,
    input_type: String,
    #[serde(default = "default_true")]
    required: bool,
    #[serde(default)]
    requires_photo: bool,
    #[serde(default)]
    requires_signature: bool,
    updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    item_id: i64,
    input_type: Option<String>,
    status: Option<String>,
    value: Option<String>,
    notes: Option<String>,
    photo_path: Option<String>,
    signature_path: Option<String>,
    signature_data: Option<String>,
    updated_at: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireSubmission<'a> {
    reference_type: &'static str,
    reference_id: i64,
    base_version: i64,
    items: Vec<WireSubmitItem<'a>>,
}

#[derive(Debug, Serialize)]
struct WireSubmitItem<'a> {
    item_id: i64,
    status: &'static str,
    value: Option<String>,
    notes: Option<&'a str>,
    photo_path: Option<&'a str>,
    signature_path: Option<&'a str>,
    signature_data: Option<&'a str>,
}

impl<'a> From<&'a Submission> for WireSubmission<'a> {
    fn from(submission: &'a Submission) -> Self {
        let items = submission
            .responses
            .records
            .iter()
            .map(|record| {
                let (signature_path, signature_data) = match &record.signature {
                    Some(Signature::Stored { path }) => (Some(path.as_str()), None),
                    Some(Signature::Inline { data }) => (None, Some(data.as_str())),
                    None => (None, None),
                };
                WireSubmitItem {
                    item_id: record.item_id,
                    status: record.status.as_str(),
                    value: record.value.as_ref().map(ResponseValue::to_wire),
                    notes: record.notes.as_deref(),
                    photo_path: record.photo.as_deref(),
                    signature_path,
                    signature_data,
                }
            })
            .collect();

        Self {
            reference_type: submission.reference.reference_type.as_str(),
            reference_id: submission.reference.reference_id,
            base_version: submission.base_version.as_millis(),
            items,
        }
    }
}

impl WireTemplate {
    fn version(&self) -> VersionMarker {
        let own = self
            .updated_at
            .as_deref()
            .or(self.created_at.as_deref())
            .and_then(parse_timestamp);
        let items = self
            .items
            .iter()
            .filter_map(|item| item.updated_at.as_deref().and_then(parse_timestamp));
        own.into_iter()
            .chain(items)
            .max()
            .unwrap_or(VersionMarker::ORIGIN)
    }

    fn summary(&self) -> TemplateSummary {
        TemplateSummary {
            id: self.id,
            name: self.name.clone(),
            is_active: self.is_active,
            version: self.version(),
        }
    }

    fn into_snapshot(self) -> Result<TemplateSnapshot, RemoteError> {
        let version = self.version();
        let items = self
            .items
            .into_iter()
            .map(WireItem::into_item)
            .collect::<Result<Vec<_>, _>>()?;

        let snapshot = TemplateSnapshot::new(self.id, self.name, version, items);
        Ok(match self.description {
            Some(description) => snapshot.with_description(description),
            None => snapshot,
        })
    }
}

impl WireItem {
    fn into_item(self) -> Result<TemplateItem, RemoteError> {
        let kind = input_kind(self.id, &self.input_type)?;
        let order_index = u32::try_from(self.order_index.max(0)).unwrap_or(u32::MAX);

        let mut item = TemplateItem::new(self.id, self.title, kind).at(order_index);
        item.instructions = self.instructions;
        item.required = self.required;
        item.requires_photo = self.requires_photo;
        item.requires_signature = self.requires_signature;
        Ok(item)
    }
}

impl WireResponse {
    fn into_record(self) -> Result<ResponseRecord, RemoteError> {
        let status = match self.status.as_deref().unwrap_or("pending") {
            "pending" => ResponseStatus::Pending,
            "completed" => ResponseStatus::Completed,
            "skipped" => ResponseStatus::Skipped,
            "failed" => ResponseStatus::Failed,
            other => {
                return Err(RemoteError::Decode(format!(
                    "unknown response status '{}' for item {}",
                    other, self.item_id
                )))
            }
        };

        let value = match (&self.value, self.input_type.as_deref()) {
            (None, _) => None,
            (Some(raw), Some(kind)) => Some(
                ResponseValue::from_wire(self.item_id, input_kind(self.item_id, kind)?, raw)
                    .map_err(|e| RemoteError::Decode(e.to_string()))?,
            ),
            (Some(raw), None) => Some(ResponseValue::Text(raw.clone())),
        };

        let signature = match (self.signature_data, self.signature_path) {
            (Some(data), _) => Some(Signature::Inline { data }),
            (None, Some(path)) => Some(Signature::Stored { path }),
            (None, None) => None,
        };

        Ok(ResponseRecord {
            item_id: self.item_id,
            status,
            value,
            notes: self.notes,
            photo: self.photo_path,
            signature,
        })
    }
}

fn input_kind(item: i64, raw: &str) -> Result<InputKind, RemoteError> {
    match raw {
        "boolean" => Ok(InputKind::Boolean),
        "number" => Ok(InputKind::Number),
        "text" => Ok(InputKind::Text),
        other => Err(RemoteError::Incompatible(format!(
            "item {} uses unsupported input type '{}'",
            item, other
        ))),
    }
}

/// Server snapshot from response rows; the marker is the newest row update.
fn server_snapshot(template_id: TemplateId, rows: Vec<WireResponse>) -> Result<ServerSnapshot, RemoteError> {
    let version = rows
        .iter()
        .filter_map(|row| row.updated_at.as_deref().and_then(parse_timestamp))
        .max()
        .unwrap_or(VersionMarker::ORIGIN);

    let records = rows
        .into_iter()
        .map(WireResponse::into_record)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ServerSnapshot::new(
        ResponseSet::new(template_id, VersionMarker::ORIGIN, records),
        version,
    ))
}

/// Parse RFC 3339 or SQLite `CURRENT_TIMESTAMP` text (UTC).
fn parse_timestamp(raw: &str) -> Option<VersionMarker> {
    if let Ok(parsed) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(VersionMarker::from_millis(parsed.timestamp_millis()));
    }

    const FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
    ];
    FORMATS.iter().find_map(|format| {
        chrono::NaiveDateTime::parse_from_str(raw, format)
            .ok()
            .map(|naive| VersionMarker::from_millis(naive.and_utc().timestamp_millis()))
    })
}

async fn read_data<T: DeserializeOwned>(response: Response) -> Result<T, RemoteError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(status_error(status, &body));
    }

    let envelope: Envelope<T> = response.json().await.map_err(transport)?;
    if !envelope.success {
        return Err(RemoteError::Decode(
            envelope.error.unwrap_or_else(|| "request not successful".into()),
        ));
    }
    envelope
        .data
        .ok_or_else(|| RemoteError::Decode("response has no data".into()))
}

fn status_error(status: StatusCode, body: &str) -> RemoteError {
    let message = serde_json::from_str::<Envelope<serde_json::Value>>(body)
        .ok()
        .and_then(|e| e.error)
        .unwrap_or_else(|| body.to_string());

    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => RemoteError::TemplateGone,
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            RemoteError::Incompatible(message)
        }
        _ => RemoteError::Http {
            status: status.as_u16(),
            message,
        },
    }
}

fn transport(err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Timeout
    } else if err.is_decode() {
        RemoteError::Decode(err.to_string())
    } else {
        RemoteError::Network(err.to_string())
    }
}
