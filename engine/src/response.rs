//! Response records and response sets.
//!
//! Values are a tagged union over the template's input kinds. A value whose
//! kind does not match its item is rejected when the set is validated, never
//! deferred to render time.

use crate::{
    error::{MissingRequirement, RequirementKind, Result},
    Error, InputKind, ItemId, TemplateId, TemplateSnapshot, VersionMarker,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Status of a single response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    #[default]
    Pending,
    Completed,
    Skipped,
    Failed,
}

impl ResponseStatus {
    /// Wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStatus::Pending => "pending",
            ResponseStatus::Completed => "completed",
            ResponseStatus::Skipped => "skipped",
            ResponseStatus::Failed => "failed",
        }
    }
}

/// A typed response value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum ResponseValue {
    Boolean(bool),
    Number(f64),
    Text(String),
}

impl ResponseValue {
    /// Input kind this value answers.
    pub fn kind(&self) -> InputKind {
        match self {
            ResponseValue::Boolean(_) => InputKind::Boolean,
            ResponseValue::Number(_) => InputKind::Number,
            ResponseValue::Text(_) => InputKind::Text,
        }
    }

    /// String form used by the remote API.
    pub fn to_wire(&self) -> String {
        match self {
            ResponseValue::Boolean(value) => value.to_string(),
            ResponseValue::Number(value) => value.to_string(),
            ResponseValue::Text(value) => value.clone(),
        }
    }

    /// Parse the remote API's string form, directed by the item's input kind.
    pub fn from_wire(item: ItemId, kind: InputKind, raw: &str) -> Result<Self> {
        match kind {
            InputKind::Boolean => match raw.trim() {
                "true" | "1" => Ok(ResponseValue::Boolean(true)),
                "false" | "0" => Ok(ResponseValue::Boolean(false)),
                other => Err(Error::InvalidValue {
                    item,
                    reason: format!("'{}' is not a boolean", other),
                }),
            },
            InputKind::Number => {
                let value: f64 = raw.trim().parse().map_err(|_| Error::InvalidValue {
                    item,
                    reason: format!("'{}' is not a number", raw),
                })?;
                if value.is_finite() {
                    Ok(ResponseValue::Number(value))
                } else {
                    Err(Error::InvalidValue {
                        item,
                        reason: "number must be finite".into(),
                    })
                }
            }
            InputKind::Text => Ok(ResponseValue::Text(raw.to_string())),
        }
    }
}

/// A captured signature, either inline or already stored server-side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Signature {
    /// Captured drawing, typically a data URL
    Inline { data: String },
    /// Path of a signature already uploaded
    Stored { path: String },
}

/// The answer to one template item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRecord {
    /// Template item this record answers
    pub item_id: ItemId,
    /// Response status
    pub status: ResponseStatus,
    /// Typed value, if any
    pub value: Option<ResponseValue>,
    /// Free-text notes
    pub notes: Option<String>,
    /// Photo path or identifier
    pub photo: Option<String>,
    /// Signature payload
    pub signature: Option<Signature>,
}

impl ResponseRecord {
    /// A pending record with nothing filled in.
    pub fn pending(item_id: ItemId) -> Self {
        Self {
            item_id,
            status: ResponseStatus::Pending,
            value: None,
            notes: None,
            photo: None,
            signature: None,
        }
    }

    /// A completed record carrying a value.
    pub fn completed(item_id: ItemId, value: ResponseValue) -> Self {
        Self {
            status: ResponseStatus::Completed,
            value: Some(value),
            ..Self::pending(item_id)
        }
    }

    /// Builder-style method to set the status.
    pub fn with_status(mut self, status: ResponseStatus) -> Self {
        self.status = status;
        self
    }

    /// Builder-style method to attach notes.
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Builder-style method to attach a photo reference.
    pub fn with_photo(mut self, photo: impl Into<String>) -> Self {
        self.photo = Some(photo.into());
        self
    }

    /// Builder-style method to attach a signature.
    pub fn with_signature(mut self, signature: Signature) -> Self {
        self.signature = Some(signature);
        self
    }

    /// Whether nothing has been captured for this item.
    pub fn is_blank(&self) -> bool {
        self.status == ResponseStatus::Pending
            && self.value.is_none()
            && self.notes.is_none()
            && self.photo.is_none()
            && self.signature.is_none()
    }
}

/// The ordered collection of responses for one reference at one template
/// version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseSet {
    /// Template these responses answer
    pub template_id: TemplateId,
    /// Template version the responses were captured against
    pub template_version: VersionMarker,
    /// One record per answered item
    pub records: Vec<ResponseRecord>,
}

impl ResponseSet {
    /// Create a response set from records.
    pub fn new(
        template_id: TemplateId,
        template_version: VersionMarker,
        records: Vec<ResponseRecord>,
    ) -> Self {
        Self {
            template_id,
            template_version,
            records,
        }
    }

    /// All-pending responses for every item of a template, in template order.
    pub fn blank(template: &TemplateSnapshot) -> Self {
        Self::new(
            template.id,
            template.version,
            template
                .items
                .iter()
                .map(|item| ResponseRecord::pending(item.id))
                .collect(),
        )
    }

    /// Get the record for an item.
    pub fn record(&self, item_id: ItemId) -> Option<&ResponseRecord> {
        self.records.iter().find(|r| r.item_id == item_id)
    }

    /// Insert or replace the record for its item.
    pub fn set(&mut self, record: ResponseRecord) {
        match self.records.iter_mut().find(|r| r.item_id == record.item_id) {
            Some(existing) => *existing = record,
            None => self.records.push(record),
        }
    }

    /// Builder-style variant of [`ResponseSet::set`].
    pub fn with(mut self, record: ResponseRecord) -> Self {
        self.set(record);
        self
    }

    /// Record for an item, or a blank pending record if none was captured.
    pub fn record_or_blank(&self, item_id: ItemId) -> ResponseRecord {
        self.record(item_id)
            .cloned()
            .unwrap_or_else(|| ResponseRecord::pending(item_id))
    }

    /// Re-bind the set to a template: one record per item in template order,
    /// blanks for missing items, records for unknown items dropped.
    pub fn aligned_to(&self, template: &TemplateSnapshot) -> ResponseSet {
        Self::new(
            template.id,
            template.version,
            template
                .items
                .iter()
                .map(|item| self.record_or_blank(item.id))
                .collect(),
        )
    }

    /// Check the set is bound to this exact template and every value matches
    /// its item's input kind.
    pub fn validate(&self, template: &TemplateSnapshot) -> Result<()> {
        if self.template_id != template.id {
            return Err(Error::TemplateMismatch {
                expected: template.id,
                actual: self.template_id,
            });
        }
        if self.template_version != template.version {
            return Err(Error::TemplateVersionMismatch {
                expected: template.version,
                actual: self.template_version,
            });
        }

        let mut seen = HashSet::with_capacity(self.records.len());
        for record in &self.records {
            if !seen.insert(record.item_id) {
                return Err(Error::DuplicateItem(record.item_id));
            }
            let item = template
                .item(record.item_id)
                .ok_or(Error::UnknownItem(record.item_id))?;

            if let Some(value) = &record.value {
                if value.kind() != item.input_kind {
                    return Err(Error::TypeMismatch {
                        item: item.id,
                        expected: item.input_kind.to_string(),
                        got: value.kind().to_string(),
                    });
                }
                if let ResponseValue::Number(n) = value {
                    if !n.is_finite() {
                        return Err(Error::InvalidValue {
                            item: item.id,
                            reason: "number must be finite".into(),
                        });
                    }
                }
            }
        }

        Ok(())
    }

    /// Full validation for submission: structure plus every completion,
    /// photo and signature requirement the template imposes.
    pub fn validate_for_submit(&self, template: &TemplateSnapshot) -> Result<()> {
        self.validate(template)?;

        let mut missing = Vec::new();
        for item in &template.items {
            let record = self.record_or_blank(item.id);
            if item.required && record.status != ResponseStatus::Completed {
                missing.push(MissingRequirement {
                    item_id: item.id,
                    title: item.title.clone(),
                    kind: RequirementKind::Completion,
                });
            }
            if record.status == ResponseStatus::Completed {
                if item.requires_photo && record.photo.is_none() {
                    missing.push(MissingRequirement {
                        item_id: item.id,
                        title: item.title.clone(),
                        kind: RequirementKind::Photo,
                    });
                }
                if item.requires_signature && record.signature.is_none() {
                    missing.push(MissingRequirement {
                        item_id: item.id,
                        title: item.title.clone(),
                        kind: RequirementKind::Signature,
                    });
                }
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::Incomplete(missing))
        }
    }

    /// Item IDs whose records differ between the two sets, field by field.
    ///
    /// An item missing on one side compares equal to a blank pending record.
    /// IDs are returned in this set's order, followed by items only the other
    /// set has.
    pub fn diff(&self, other: &ResponseSet) -> Vec<ItemId> {
        let mut ids: Vec<ItemId> = self.records.iter().map(|r| r.item_id).collect();
        for record in &other.records {
            if !ids.contains(&record.item_id) {
                ids.push(record.item_id);
            }
        }

        ids.into_iter()
            .filter(|id| self.record_or_blank(*id) != other.record_or_blank(*id))
            .collect()
    }

    /// Whether the two sets hold the same answers.
    pub fn same_answers(&self, other: &ResponseSet) -> bool {
        self.diff(other).is_empty()
    }
}
