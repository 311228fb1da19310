//! Checklist template snapshots.
//!
//! A template snapshot is the immutable structure a set of responses is
//! captured against. Snapshots are replaced wholesale on refetch, never
//! patched in place.

use crate::{ItemId, TemplateId, VersionMarker};
use serde::{Deserialize, Serialize};

/// Input kinds a template item can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    Boolean,
    Number,
    Text,
}

impl std::fmt::Display for InputKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputKind::Boolean => write!(f, "boolean"),
            InputKind::Number => write!(f, "number"),
            InputKind::Text => write!(f, "text"),
        }
    }
}

/// A single item of a checklist template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateItem {
    /// Item ID
    pub id: ItemId,
    /// Position within the template
    pub order_index: u32,
    /// Short title shown to the technician
    pub title: String,
    /// Free-text instructions
    pub instructions: Option<String>,
    /// Expected input kind
    pub input_kind: InputKind,
    /// Whether the item must be completed before submission
    pub required: bool,
    /// Whether a completed item needs a photo
    pub requires_photo: bool,
    /// Whether a completed item needs a signature
    pub requires_signature: bool,
}

impl TemplateItem {
    /// Create a required item with no attachment requirements.
    pub fn new(id: ItemId, title: impl Into<String>, input_kind: InputKind) -> Self {
        Self {
            id,
            order_index: 0,
            title: title.into(),
            instructions: None,
            input_kind,
            required: true,
            requires_photo: false,
            requires_signature: false,
        }
    }

    /// Builder-style method to set the position.
    pub fn at(mut self, order_index: u32) -> Self {
        self.order_index = order_index;
        self
    }

    /// Builder-style method to make the item optional.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Builder-style method to require a photo.
    pub fn with_photo(mut self) -> Self {
        self.requires_photo = true;
        self
    }

    /// Builder-style method to require a signature.
    pub fn with_signature(mut self) -> Self {
        self.requires_signature = true;
        self
    }

    /// Builder-style method to attach instructions.
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }
}

/// Immutable copy of a checklist's structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSnapshot {
    /// Template ID
    pub id: TemplateId,
    /// Display name
    pub name: String,
    /// Optional description
    pub description: Option<String>,
    /// Server last-modified marker of the template
    pub version: VersionMarker,
    /// Items, sorted by `(order_index, id)`
    pub items: Vec<TemplateItem>,
}

impl TemplateSnapshot {
    /// Create a snapshot. Items are sorted the way the server orders them.
    pub fn new(
        id: TemplateId,
        name: impl Into<String>,
        version: VersionMarker,
        mut items: Vec<TemplateItem>,
    ) -> Self {
        items.sort_by_key(|item| (item.order_index, item.id));
        Self {
            id,
            name: name.into(),
            description: None,
            version,
            items,
        }
    }

    /// Builder-style method to attach a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Look up an item by ID.
    pub fn item(&self, id: ItemId) -> Option<&TemplateItem> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Position of an item in template order.
    pub fn position(&self, id: ItemId) -> Option<usize> {
        self.items.iter().position(|item| item.id == id)
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the template has no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Summary row returned when listing templates for a reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSummary {
    pub id: TemplateId,
    pub name: String,
    pub is_active: bool,
    pub version: VersionMarker,
}
