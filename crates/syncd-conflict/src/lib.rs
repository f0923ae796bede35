//! Conflict resolver (§4.11): classifies a 409/404/410 response into one of
//! the closed conflict kinds and decides what the engine should do about it.
//!
//! Grounded on the teacher pack's reconcile gate: `ArmStartGate`/`DriftAction`
//! are themselves small closed enums produced by pure classification
//! functions (`check_arm_gate`, `check_start_gate`) that the caller switches
//! on without re-deriving the reasoning — `classify`/`action_for` below play
//! the same role for a single op's server response instead of a whole
//! portfolio snapshot.

use serde::{Deserialize, Serialize};
use syncd_errors::SyncError;
use syncd_schemas::OpType;

/// The closed set of conflict shapes a 409/404/410 can represent (§4.11).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// 409 where the client's base version no longer matches the server's.
    VersionMismatch,
    /// 404/410 on an op that targeted an entity the server has deleted.
    AlreadyDeleted,
    /// 409 where the client's edit was built against since-superseded data.
    StaleUpdate,
    /// 404 on an op whose target never existed from the server's point of
    /// view (not a deletion — genuinely unknown).
    NotFound,
    /// 409 on a CREATE whose idempotency key the server already has a
    /// successful result for.
    DuplicateCreate,
    /// 409 carrying an application-level conflict untied to versioning
    /// (e.g. a uniqueness rule), which no generic rebase can fix.
    SemanticConflict,
}

/// What the engine should do once a conflict has been classified.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConflictAction {
    /// Hand off to the reconciler: fetch current, 3-way merge, rebase and
    /// resubmit (§4.12).
    Rebase,
    /// The desired end state is already true server-side; drop the op as a
    /// success with no further network call.
    TreatAsSuccess,
    /// The op no longer makes sense (its target is gone); drop it silently,
    /// it is neither a success nor a failure worth surfacing.
    DropWithoutRetry,
    /// Cannot be resolved automatically; archive to the Failed-Ops Archive
    /// for a human to look at.
    FailPermanently,
}

/// Classify a conflict response. `conflict_type` is the server's
/// `error.details.conflictType` string on a 409 (empty/unrecognised values
/// fall back to [`ConflictKind::SemanticConflict`]); ignored for 404/410.
pub fn classify(op_type: OpType, error: &SyncError, conflict_type: &str) -> Option<ConflictKind> {
    match error {
        SyncError::Conflict { .. } => Some(match conflict_type {
            "version_mismatch" => ConflictKind::VersionMismatch,
            "stale_update" => ConflictKind::StaleUpdate,
            "duplicate_create" if op_type == OpType::Create => ConflictKind::DuplicateCreate,
            _ => ConflictKind::SemanticConflict,
        }),
        SyncError::ResourceNotFound { .. } => Some(if op_type == OpType::Delete {
            ConflictKind::AlreadyDeleted
        } else {
            ConflictKind::NotFound
        }),
        _ => None,
    }
}

/// Map a classified conflict to the action the engine takes.
pub fn action_for(kind: ConflictKind) -> ConflictAction {
    match kind {
        ConflictKind::VersionMismatch | ConflictKind::StaleUpdate => ConflictAction::Rebase,
        ConflictKind::DuplicateCreate => ConflictAction::TreatAsSuccess,
        ConflictKind::AlreadyDeleted => ConflictAction::DropWithoutRetry,
        ConflictKind::NotFound | ConflictKind::SemanticConflict => ConflictAction::FailPermanently,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conflict() -> SyncError {
        SyncError::Conflict {
            message: "conflict".into(),
            http_status: Some(409),
            trace_id: None,
            conflict_type: String::new(),
            server_version: None,
            client_version: None,
        }
    }

    fn not_found() -> SyncError {
        SyncError::ResourceNotFound {
            message: "not found".into(),
            http_status: Some(404),
            trace_id: None,
            resource_type: "room".into(),
            resource_id: "r1".into(),
        }
    }

    #[test]
    fn version_mismatch_rebases() {
        let kind = classify(OpType::Update, &conflict(), "version_mismatch").unwrap();
        assert_eq!(kind, ConflictKind::VersionMismatch);
        assert_eq!(action_for(kind), ConflictAction::Rebase);
    }

    #[test]
    fn duplicate_create_only_applies_to_create_ops() {
        let kind = classify(OpType::Create, &conflict(), "duplicate_create").unwrap();
        assert_eq!(kind, ConflictKind::DuplicateCreate);
        assert_eq!(action_for(kind), ConflictAction::TreatAsSuccess);

        // Same server-reported type on a non-CREATE op is not a duplicate
        // create (the classification only makes sense for that op kind).
        let kind = classify(OpType::Update, &conflict(), "duplicate_create").unwrap();
        assert_eq!(kind, ConflictKind::SemanticConflict);
    }

    #[test]
    fn not_found_on_delete_is_already_deleted_and_drops() {
        let kind = classify(OpType::Delete, &not_found(), "").unwrap();
        assert_eq!(kind, ConflictKind::AlreadyDeleted);
        assert_eq!(action_for(kind), ConflictAction::DropWithoutRetry);
    }

    #[test]
    fn not_found_on_update_fails_permanently() {
        let kind = classify(OpType::Update, &not_found(), "").unwrap();
        assert_eq!(kind, ConflictKind::NotFound);
        assert_eq!(action_for(kind), ConflictAction::FailPermanently);
    }

    #[test]
    fn unrecognised_conflict_type_is_semantic() {
        let kind = classify(OpType::Update, &conflict(), "some_business_rule").unwrap();
        assert_eq!(kind, ConflictKind::SemanticConflict);
        assert_eq!(action_for(kind), ConflictAction::FailPermanently);
    }

    #[test]
    fn non_conflict_errors_classify_to_none() {
        let err = SyncError::Server {
            message: "boom".into(),
            http_status: Some(500),
            trace_id: None,
        };
        assert!(classify(OpType::Update, &err, "").is_none());
    }
}
