//! Edge case tests for checklist-engine
//!
//! These tests cover boundary conditions and unusual inputs.

use checklist_engine::{
    detect, ChecklistEntry, Error, FieldSelections, InputKind, OperationDraft, Reference,
    ResolutionPolicy, ResponseRecord, ResponseSet, ResponseStatus, ResponseValue, ServerSnapshot,
    Side, SyncConflict, TemplateItem, TemplateSnapshot, VersionMarker,
};

fn create_test_template() -> TemplateSnapshot {
    TemplateSnapshot::new(
        1,
        "Compressor inspection",
        VersionMarker::from_millis(100),
        vec![
            TemplateItem::new(1, "Oil level ok", InputKind::Boolean).at(0),
            TemplateItem::new(2, "Pressure (bar)", InputKind::Number).at(1),
            TemplateItem::new(3, "Remarks", InputKind::Text).at(2).optional(),
        ],
    )
}

fn server_at(template: &TemplateSnapshot, version: i64, records: Vec<ResponseRecord>) -> ServerSnapshot {
    let mut responses = ResponseSet::blank(template);
    for record in records {
        responses.set(record);
    }
    ServerSnapshot::new(responses, VersionMarker::from_millis(version))
}

// ============================================================================
// Value Edge Cases
// ============================================================================

#[test]
fn unicode_text_values() {
    let template = create_test_template();
    let remarks = vec![
        "日本語テスト",
        "Привет мир",
        "🎉🚀💯",
        "Hello\nWorld\tTab",
        "",
    ];

    for text in remarks {
        let set = ResponseSet::blank(&template)
            .with(ResponseRecord::completed(3, ResponseValue::Text(text.to_string())));
        assert!(set.validate(&template).is_ok(), "failed for {:?}", text);

        let json = serde_json::to_string(&set).unwrap();
        let parsed: ResponseSet = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, set);
    }
}

#[test]
fn extreme_numbers() {
    let template = create_test_template();
    for n in [0.0, -0.0, f64::MAX, f64::MIN, f64::EPSILON] {
        let set = ResponseSet::blank(&template)
            .with(ResponseRecord::completed(2, ResponseValue::Number(n)));
        assert!(set.validate(&template).is_ok(), "failed for {}", n);
    }
    for n in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
        let set = ResponseSet::blank(&template)
            .with(ResponseRecord::completed(2, ResponseValue::Number(n)));
        assert!(set.validate(&template).is_err(), "accepted {}", n);
    }
}

#[test]
fn skipped_required_item_blocks_submission() {
    let template = create_test_template();
    let set = ResponseSet::blank(&template)
        .with(ResponseRecord::completed(1, ResponseValue::Boolean(true)))
        .with(ResponseRecord::pending(2).with_status(ResponseStatus::Skipped));

    let err = set.validate_for_submit(&template).unwrap_err();
    assert!(matches!(err, Error::Incomplete(ref missing) if missing.len() == 1));
    assert!(err.to_string().contains("Pressure (bar)"));
}

// ============================================================================
// Template Edge Cases
// ============================================================================

#[test]
fn empty_template() {
    let template = TemplateSnapshot::new(9, "Empty", VersionMarker::ORIGIN, vec![]);
    let set = ResponseSet::blank(&template);
    assert!(set.records.is_empty());
    assert!(set.validate_for_submit(&template).is_ok());
}

#[test]
fn responses_for_another_template_are_rejected() {
    let template = create_test_template();
    let other = TemplateSnapshot::new(2, "Other", VersionMarker::from_millis(100), vec![]);
    let set = ResponseSet::blank(&other);
    assert!(matches!(
        set.validate(&template),
        Err(Error::TemplateMismatch { expected: 1, actual: 2 })
    ));
}

// ============================================================================
// Conflict Edge Cases
// ============================================================================

#[test]
fn server_change_on_untouched_item_still_diverges() {
    let template = create_test_template();
    let local = ResponseSet::blank(&template)
        .with(ResponseRecord::completed(1, ResponseValue::Boolean(true)));
    let server = server_at(
        &template,
        500,
        vec![
            ResponseRecord::completed(1, ResponseValue::Boolean(true)),
            ResponseRecord::pending(3).with_notes("replaced filter"),
        ],
    );

    let divergence = detect(VersionMarker::from_millis(200), &local, &server).unwrap();
    assert_eq!(divergence.divergent_items, vec![3]);
}

#[test]
fn origin_basis_against_empty_server() {
    let template = create_test_template();
    let local = ResponseSet::blank(&template);
    let server = server_at(&template, 0, vec![]);
    assert!(detect(VersionMarker::ORIGIN, &local, &server).is_none());
}

#[test]
fn merge_selection_for_unknown_item_is_ignored() {
    let template = create_test_template();
    let local = ResponseSet::blank(&template)
        .with(ResponseRecord::completed(2, ResponseValue::Number(5.0)));
    let server = server_at(
        &template,
        900,
        vec![ResponseRecord::completed(2, ResponseValue::Number(6.0))],
    );
    let divergence = detect(VersionMarker::from_millis(100), &local, &server).unwrap();

    let mut conflict = SyncConflict::open(
        "c-1",
        Reference::maintenance_order(1),
        VersionMarker::from_millis(100),
        local,
        server,
        divergence,
        "op-1".to_string(),
        1,
    );

    let selections = FieldSelections::from([(2, Side::Server), (777, Side::Local)]);
    let resolution = conflict
        .resolve(&ResolutionPolicy::Merge(selections), 2)
        .unwrap();
    let merged = resolution.resubmit.unwrap();
    assert_eq!(
        merged.record(2).unwrap().value,
        Some(ResponseValue::Number(6.0))
    );
    assert!(merged.record(777).is_none());
}

#[test]
fn staged_entry_survives_json_roundtrip() {
    let template = create_test_template();
    let entry = ChecklistEntry::from_server(template.clone(), server_at(&template, 300, vec![]), 10);
    let staged = entry.staged(
        entry
            .responses
            .clone()
            .with(ResponseRecord::completed(1, ResponseValue::Boolean(false))),
        20,
    );

    let json = serde_json::to_string(&staged).unwrap();
    let parsed: ChecklistEntry = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, staged);
    assert_eq!(parsed.synced_version, VersionMarker::from_millis(300));
}

// ============================================================================
// Operation Edge Cases
// ============================================================================

#[test]
fn operation_ids_may_be_arbitrary_strings() {
    let template = create_test_template();
    for id in ["", "a", "550e8400-e29b-41d4-a716-446655440000", "日本"] {
        let op = OperationDraft::new(
            id,
            Reference::maintenance_call(1),
            ResponseSet::blank(&template),
            VersionMarker::ORIGIN,
            0,
        )
        .into_queued(u64::MAX);
        assert_eq!(op.operation_id, id);
        assert_eq!(op.sequence, u64::MAX);
    }
}
