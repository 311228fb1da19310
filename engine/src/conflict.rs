//! Conflict detection and resolution.
//!
//! A conflict exists when the server moved past the version a local edit was
//! staged against *and* the server's answers differ from the local ones. The
//! engine never picks a winner on its own: conflicts are materialized as
//! [`SyncConflict`] records and stay unresolved until a caller applies a
//! [`ResolutionPolicy`].
//!
//! # Lifecycle
//!
//! 1. [`detect`] compares a staged edit with a server snapshot
//! 2. [`SyncConflict::open`] records the first divergence for a reference
//! 3. [`SyncConflict::absorb`] folds later divergences into the same record
//! 4. [`SyncConflict::resolve`] applies the caller's policy exactly once

use crate::{
    error::Result, ConflictId, Error, ItemId, OperationId, Reference, ResponseSet,
    ServerSnapshot, TemplateId, Timestamp, VersionMarker,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Resolution state of a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionState {
    #[default]
    Unresolved,
    ResolvedLocal,
    ResolvedServer,
    Merged,
}

/// Which side wins a divergent item in a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Side {
    Local,
    Server,
}

/// Per-item side selections for a merge.
pub type FieldSelections = BTreeMap<ItemId, Side>;

/// How the caller wants a conflict resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", content = "selections", rename_all = "camelCase")]
pub enum ResolutionPolicy {
    /// Local responses overwrite the server
    Local,
    /// Local edit is discarded
    Server,
    /// Caller picks a side per divergent item
    Merge(FieldSelections),
}

/// Items on which a local edit and the server disagree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Divergence {
    pub divergent_items: Vec<ItemId>,
}

/// Compare a staged local edit with the server's current state.
///
/// Returns `None` when the server has not moved past `base_version`, or when
/// it did but holds the same answers.
pub fn detect(
    base_version: VersionMarker,
    local: &ResponseSet,
    server: &ServerSnapshot,
) -> Option<Divergence> {
    if !server.version.is_newer_than(base_version) {
        return None;
    }

    let divergent_items = local.diff(&server.responses);
    if divergent_items.is_empty() {
        None
    } else {
        Some(Divergence { divergent_items })
    }
}

/// Build merged responses from per-item selections.
///
/// Every divergent item needs a selection; items both sides agree on are
/// taken as-is. Extra selections for non-divergent items are ignored.
pub fn merge(
    local: &ResponseSet,
    server: &ResponseSet,
    divergent_items: &[ItemId],
    selections: &FieldSelections,
) -> Result<ResponseSet> {
    for item in divergent_items {
        if !selections.contains_key(item) {
            return Err(Error::MissingSelection(*item));
        }
    }

    let mut ids: Vec<ItemId> = local.records.iter().map(|r| r.item_id).collect();
    for record in &server.records {
        if !ids.contains(&record.item_id) {
            ids.push(record.item_id);
        }
    }

    let records = ids
        .into_iter()
        .map(|id| match selections.get(&id) {
            Some(Side::Server) if divergent_items.contains(&id) => server.record_or_blank(id),
            _ => local.record_or_blank(id),
        })
        .collect();

    Ok(ResponseSet::new(
        local.template_id,
        local.template_version,
        records,
    ))
}

/// A detected divergence between local unsynced edits and newer server state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConflict {
    /// Conflict ID
    pub id: ConflictId,
    /// Reference the conflict belongs to
    pub reference: Reference,
    /// Template of the conflicting responses
    pub template_id: TemplateId,
    /// Server marker the local edit was staged against
    pub base_version: VersionMarker,
    /// Local responses that could not be applied
    pub local_snapshot: ResponseSet,
    /// Server state at detection time
    pub server_snapshot: ServerSnapshot,
    /// Items on which the two sides disagree
    pub divergent_items: Vec<ItemId>,
    /// Outbox operations held until resolution
    pub held_operations: Vec<OperationId>,
    /// First detection (milliseconds since epoch)
    pub detected_at: Timestamp,
    /// Last divergence folded in (milliseconds since epoch)
    pub updated_at: Timestamp,
    /// When the conflict was resolved
    pub resolved_at: Option<Timestamp>,
    /// Resolution state
    pub resolution_state: ResolutionState,
}

/// What the caller must persist after resolving a conflict.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Final state of the conflict
    pub state: ResolutionState,
    /// Responses to re-enqueue as a fresh operation, if any
    pub resubmit: Option<ResponseSet>,
    /// Responses the local store should hold afterwards
    pub responses: ResponseSet,
    /// Server marker the new state is based on
    pub basis: ServerSnapshot,
    /// Held operations superseded by the resolution
    pub superseded: Vec<OperationId>,
}

impl SyncConflict {
    /// Record a first divergence for a reference.
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        id: impl Into<ConflictId>,
        reference: Reference,
        base_version: VersionMarker,
        local: ResponseSet,
        server: ServerSnapshot,
        divergence: Divergence,
        held_operation: OperationId,
        now: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            reference,
            template_id: local.template_id,
            base_version,
            local_snapshot: local,
            server_snapshot: server,
            divergent_items: divergence.divergent_items,
            held_operations: vec![held_operation],
            detected_at: now,
            updated_at: now,
            resolved_at: None,
            resolution_state: ResolutionState::Unresolved,
        }
    }

    /// Whether the conflict still blocks its reference.
    pub fn is_unresolved(&self) -> bool {
        self.resolution_state == ResolutionState::Unresolved
    }

    /// Fold a newer divergence for the same reference into this record.
    ///
    /// The newest local edit and the newest server state win; the basis stays
    /// at the oldest version any held edit was staged against.
    pub fn absorb(
        &mut self,
        base_version: VersionMarker,
        local: ResponseSet,
        server: ServerSnapshot,
        held_operation: OperationId,
        now: Timestamp,
    ) -> Result<()> {
        if !self.is_unresolved() {
            return Err(Error::ConflictAlreadyResolved(self.id.clone()));
        }

        self.base_version = self.base_version.min(base_version);
        self.template_id = local.template_id;
        self.local_snapshot = local;
        if server.version >= self.server_snapshot.version {
            self.server_snapshot = server;
        }
        self.divergent_items = self.local_snapshot.diff(&self.server_snapshot.responses);
        if !self.held_operations.contains(&held_operation) {
            self.held_operations.push(held_operation);
        }
        self.updated_at = now;
        Ok(())
    }

    /// Apply a resolution policy. A conflict can be resolved only once.
    pub fn resolve(&mut self, policy: &ResolutionPolicy, now: Timestamp) -> Result<Resolution> {
        if !self.is_unresolved() {
            return Err(Error::ConflictAlreadyResolved(self.id.clone()));
        }

        let (state, resubmit, responses) = match policy {
            ResolutionPolicy::Local => (
                ResolutionState::ResolvedLocal,
                Some(self.local_snapshot.clone()),
                self.local_snapshot.clone(),
            ),
            ResolutionPolicy::Server => (
                ResolutionState::ResolvedServer,
                None,
                self.server_snapshot.responses.clone(),
            ),
            ResolutionPolicy::Merge(selections) => {
                let merged = merge(
                    &self.local_snapshot,
                    &self.server_snapshot.responses,
                    &self.divergent_items,
                    selections,
                )?;
                (ResolutionState::Merged, Some(merged.clone()), merged)
            }
        };

        self.resolution_state = state;
        self.resolved_at = Some(now);
        self.updated_at = now;

        Ok(Resolution {
            state,
            resubmit,
            responses,
            basis: self.server_snapshot.clone(),
            superseded: self.held_operations.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ResponseRecord, ResponseValue};

    fn version(ms: i64) -> VersionMarker {
        VersionMarker::from_millis(ms)
    }

    fn set(records: Vec<ResponseRecord>) -> ResponseSet {
        ResponseSet::new(1, version(10), records)
    }

    fn local() -> ResponseSet {
        set(vec![
            ResponseRecord::completed(1, ResponseValue::Boolean(true)),
            ResponseRecord::completed(2, ResponseValue::Number(7.0)),
            ResponseRecord::completed(3, ResponseValue::Text("ok".into())),
        ])
    }

    fn server_snapshot(at: i64) -> ServerSnapshot {
        ServerSnapshot::new(
            set(vec![
                ResponseRecord::completed(1, ResponseValue::Boolean(false)),
                ResponseRecord::completed(2, ResponseValue::Number(7.0)),
                ResponseRecord::completed(3, ResponseValue::Text("worn".into())),
            ]),
            version(at),
        )
    }

    fn open_conflict() -> SyncConflict {
        let server = server_snapshot(200);
        let divergence = detect(version(100), &local(), &server).unwrap();
        SyncConflict::open(
            "c-1",
            Reference::maintenance_order(5),
            version(100),
            local(),
            server,
            divergence,
            "op-1".into(),
            1_000,
        )
    }

    #[test]
    fn no_conflict_when_server_not_newer() {
        assert!(detect(version(200), &local(), &server_snapshot(200)).is_none());
        assert!(detect(version(300), &local(), &server_snapshot(200)).is_none());
    }

    #[test]
    fn no_conflict_when_answers_match() {
        let server = ServerSnapshot::new(local(), version(500));
        assert!(detect(version(100), &local(), &server).is_none());
    }

    #[test]
    fn detects_divergent_items() {
        let divergence = detect(version(100), &local(), &server_snapshot(200)).unwrap();
        assert_eq!(divergence.divergent_items, vec![1, 3]);
    }

    #[test]
    fn open_starts_unresolved() {
        let conflict = open_conflict();
        assert!(conflict.is_unresolved());
        assert_eq!(conflict.held_operations, vec!["op-1".to_string()]);
        assert_eq!(conflict.template_id, 1);
        assert_eq!(conflict.detected_at, 1_000);
    }

    #[test]
    fn absorb_keeps_single_record() {
        let mut conflict = open_conflict();
        let newer_local = local().with(ResponseRecord::completed(
            2,
            ResponseValue::Number(8.0),
        ));

        conflict
            .absorb(version(150), newer_local.clone(), server_snapshot(300), "op-2".into(), 2_000)
            .unwrap();

        assert_eq!(conflict.base_version, version(100));
        assert_eq!(conflict.local_snapshot, newer_local);
        assert_eq!(conflict.server_snapshot.version, version(300));
        assert_eq!(conflict.divergent_items, vec![1, 2, 3]);
        assert_eq!(conflict.held_operations.len(), 2);
        assert_eq!(conflict.detected_at, 1_000);
        assert_eq!(conflict.updated_at, 2_000);
    }

    #[test]
    fn absorb_ignores_older_server_state() {
        let mut conflict = open_conflict();
        conflict
            .absorb(version(100), local(), server_snapshot(150), "op-1".into(), 2_000)
            .unwrap();
        assert_eq!(conflict.server_snapshot.version, version(200));
        assert_eq!(conflict.held_operations.len(), 1);
    }

    #[test]
    fn resolve_local_resubmits_local() {
        let mut conflict = open_conflict();
        let resolution = conflict.resolve(&ResolutionPolicy::Local, 5_000).unwrap();

        assert_eq!(resolution.state, ResolutionState::ResolvedLocal);
        assert_eq!(resolution.resubmit, Some(local()));
        assert_eq!(resolution.basis.version, version(200));
        assert_eq!(resolution.superseded, vec!["op-1".to_string()]);
        assert_eq!(conflict.resolution_state, ResolutionState::ResolvedLocal);
        assert_eq!(conflict.resolved_at, Some(5_000));
    }

    #[test]
    fn resolve_server_discards_local() {
        let mut conflict = open_conflict();
        let resolution = conflict.resolve(&ResolutionPolicy::Server, 5_000).unwrap();

        assert_eq!(resolution.state, ResolutionState::ResolvedServer);
        assert!(resolution.resubmit.is_none());
        assert_eq!(resolution.responses, server_snapshot(200).responses);
    }

    #[test]
    fn resolve_twice_fails() {
        let mut conflict = open_conflict();
        conflict.resolve(&ResolutionPolicy::Server, 5_000).unwrap();
        assert!(matches!(
            conflict.resolve(&ResolutionPolicy::Local, 6_000),
            Err(Error::ConflictAlreadyResolved(_))
        ));
    }

    #[test]
    fn merge_takes_selected_sides() {
        let mut conflict = open_conflict();
        let selections = FieldSelections::from([(1, Side::Server), (3, Side::Local)]);
        let resolution = conflict
            .resolve(&ResolutionPolicy::Merge(selections), 5_000)
            .unwrap();

        let merged = resolution.resubmit.unwrap();
        assert_eq!(
            merged.record(1).unwrap().value,
            Some(ResponseValue::Boolean(false))
        );
        assert_eq!(
            merged.record(3).unwrap().value,
            Some(ResponseValue::Text("ok".into()))
        );
        assert_eq!(resolution.state, ResolutionState::Merged);
    }

    #[test]
    fn merge_requires_every_divergent_item() {
        let mut conflict = open_conflict();
        let selections = FieldSelections::from([(1, Side::Server)]);
        assert_eq!(
            conflict.resolve(&ResolutionPolicy::Merge(selections), 5_000),
            Err(Error::MissingSelection(3))
        );
        assert!(conflict.is_unresolved());
    }

    #[test]
    fn merge_ignores_selections_for_agreeing_items() {
        let selections = FieldSelections::from([(1, Side::Local), (2, Side::Server), (3, Side::Local)]);
        let merged = merge(&local(), &server_snapshot(200).responses, &[1, 3], &selections).unwrap();
        assert_eq!(merged, local());
    }

    #[test]
    fn policy_serialization() {
        let json = serde_json::to_string(&ResolutionPolicy::Server).unwrap();
        assert_eq!(json, r#"{"policy":"server"}"#);

        let policy = ResolutionPolicy::Merge(FieldSelections::from([(4, Side::Local)]));
        let json = serde_json::to_string(&policy).unwrap();
        assert_eq!(json, r#"{"policy":"merge","selections":{"4":"local"}}"#);
    }

    // Property-based tests using proptest
    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_record(item_id: ItemId) -> impl Strategy<Value = ResponseRecord> {
            prop_oneof![
                Just(ResponseRecord::pending(item_id)),
                any::<bool>()
                    .prop_map(move |b| ResponseRecord::completed(item_id, ResponseValue::Boolean(b))),
                (-1000i32..1000).prop_map(move |n| {
                    ResponseRecord::completed(item_id, ResponseValue::Number(n as f64))
                }),
                "[a-z]{0,8}".prop_map(move |t| {
                    ResponseRecord::completed(item_id, ResponseValue::Text(t))
                }),
            ]
        }

        fn arb_set() -> impl Strategy<Value = ResponseSet> {
            (arb_record(1), arb_record(2), arb_record(3), arb_record(4))
                .prop_map(|(a, b, c, d)| set(vec![a, b, c, d]))
        }

        proptest! {
            #[test]
            fn prop_diff_with_self_is_empty(a in arb_set()) {
                prop_assert!(a.diff(&a).is_empty());
            }

            #[test]
            fn prop_diff_is_symmetric(a in arb_set(), b in arb_set()) {
                let mut left = a.diff(&b);
                let mut right = b.diff(&a);
                left.sort();
                right.sort();
                prop_assert_eq!(left, right);
            }

            #[test]
            fn prop_merge_all_local_is_local(a in arb_set(), b in arb_set()) {
                let divergent = a.diff(&b);
                let selections: FieldSelections =
                    divergent.iter().map(|id| (*id, Side::Local)).collect();
                let merged = merge(&a, &b, &divergent, &selections).unwrap();
                prop_assert!(merged.same_answers(&a));
            }

            #[test]
            fn prop_merge_all_server_matches_server(a in arb_set(), b in arb_set()) {
                let divergent = a.diff(&b);
                let selections: FieldSelections =
                    divergent.iter().map(|id| (*id, Side::Server)).collect();
                let merged = merge(&a, &b, &divergent, &selections).unwrap();
                prop_assert!(merged.same_answers(&b));
            }

            #[test]
            fn prop_detect_is_deterministic(
                a in arb_set(),
                b in arb_set(),
                base in 0i64..1000,
                at in 0i64..1000,
            ) {
                let server = ServerSnapshot::new(b, version(at));
                let first = detect(version(base), &a, &server);
                let second = detect(version(base), &a, &server);
                prop_assert_eq!(first.clone(), second);
                if at <= base {
                    prop_assert!(first.is_none());
                }
            }
        }
    }
}
