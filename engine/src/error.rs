//! Error types for the checklist engine.

use crate::{ItemId, TemplateId, VersionMarker};
use thiserror::Error;

/// A single unmet submission requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingRequirement {
    /// Item the requirement belongs to
    pub item_id: ItemId,
    /// Item title, for display
    pub title: String,
    /// What is missing
    pub kind: RequirementKind,
}

/// Kinds of submission requirements a template item can impose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequirementKind {
    Completion,
    Photo,
    Signature,
}

impl std::fmt::Display for MissingRequirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            RequirementKind::Completion => write!(f, "{} (not completed)", self.title),
            RequirementKind::Photo => write!(f, "{} (photo required)", self.title),
            RequirementKind::Signature => write!(f, "{} (signature required)", self.title),
        }
    }
}

/// All possible errors from the checklist engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    // Validation errors
    #[error("unknown template item: {0}")]
    UnknownItem(ItemId),

    #[error("duplicate response for item: {0}")]
    DuplicateItem(ItemId),

    #[error("type mismatch for item {item}: expected {expected}, got {got}")]
    TypeMismatch {
        item: ItemId,
        expected: String,
        got: String,
    },

    #[error("invalid value for item {item}: {reason}")]
    InvalidValue { item: ItemId, reason: String },

    #[error("checklist incomplete: {}", format_missing(.0))]
    Incomplete(Vec<MissingRequirement>),

    // Template binding errors
    #[error("responses target template {actual}, cached template is {expected}")]
    TemplateMismatch {
        expected: TemplateId,
        actual: TemplateId,
    },

    #[error("responses were captured against template version {actual}, cached version is {expected}")]
    TemplateVersionMismatch {
        expected: VersionMarker,
        actual: VersionMarker,
    },

    // Conflict errors
    #[error("no side selected for divergent item {0}")]
    MissingSelection(ItemId),

    #[error("conflict already resolved: {0}")]
    ConflictAlreadyResolved(String),

    #[error("conflict belongs to a different reference: {0}")]
    ReferenceMismatch(String),

    #[error("invalid reference type: {0}")]
    InvalidReferenceType(String),
}

fn format_missing(missing: &[MissingRequirement]) -> String {
    missing
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::UnknownItem(7);
        assert_eq!(err.to_string(), "unknown template item: 7");

        let err = Error::TypeMismatch {
            item: 3,
            expected: "number".into(),
            got: "text".into(),
        };
        assert_eq!(
            err.to_string(),
            "type mismatch for item 3: expected number, got text"
        );
    }

    #[test]
    fn incomplete_lists_every_requirement() {
        let err = Error::Incomplete(vec![
            MissingRequirement {
                item_id: 1,
                title: "Check oil".into(),
                kind: RequirementKind::Completion,
            },
            MissingRequirement {
                item_id: 2,
                title: "Sign off".into(),
                kind: RequirementKind::Signature,
            },
        ]);
        assert_eq!(
            err.to_string(),
            "checklist incomplete: Check oil (not completed), Sign off (signature required)"
        );
    }
}
