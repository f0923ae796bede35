//! A 409 version-mismatch on an UPDATE routes to `ConflictAction::Rebase`,
//! and reconciling against the fetched remote state three-way-merges rather
//! than blindly overwriting (§4.11, §4.12).

use async_trait::async_trait;
use syncd_conflict::{action_for, classify, ConflictAction, ConflictKind};
use syncd_errors::SyncError;
use syncd_reconcile::{reconcile, CurrentStateFetcher};
use syncd_schemas::{EntityType, OpType, Payload};

struct StubFetcher {
    remote: Payload,
}

#[async_trait]
impl CurrentStateFetcher for StubFetcher {
    async fn fetch_current(&self, _entity_type: &EntityType, _entity_id: &str) -> anyhow::Result<Option<Payload>> {
        Ok(Some(self.remote.clone()))
    }
}

#[test]
fn version_mismatch_classifies_to_rebase() {
    let err = SyncError::Conflict {
        message: "version mismatch".to_string(),
        http_status: Some(409),
        trace_id: None,
        conflict_type: "version_mismatch".to_string(),
        server_version: Some("7".to_string()),
        client_version: Some("5".to_string()),
    };
    let kind = classify(OpType::Update, &err, "version_mismatch").expect("classifies");
    assert_eq!(kind, ConflictKind::VersionMismatch);
    assert_eq!(action_for(kind), ConflictAction::Rebase);
}

#[tokio::test]
async fn rebase_keeps_locally_changed_field_and_adopts_remote_only_change() {
    // A pending UPDATE op's payload only ever carries the fields the client
    // actually changed, not a full snapshot — so `local` here is just
    // `brightness`, the one field the op is touching.
    let mut local = serde_json::Map::new();
    local.insert("brightness".to_string(), serde_json::json!(90));

    let mut remote = serde_json::Map::new();
    remote.insert("id".to_string(), serde_json::json!("room-9"));
    remote.insert("name".to_string(), serde_json::json!("Home Office"));
    remote.insert("brightness".to_string(), serde_json::json!(50));
    remote.insert("version".to_string(), serde_json::json!(7));

    let fetcher = StubFetcher { remote };
    let merged = reconcile(&fetcher, &EntityType::new("room"), "room-9", &local)
        .await
        .expect("reconcile succeeds");

    assert_eq!(merged.get("brightness").and_then(|v| v.as_i64()), Some(90), "local-only change should survive rebase");
    assert_eq!(
        merged.get("name").and_then(|v| v.as_str()),
        Some("Home Office"),
        "remote-only change should be adopted during rebase"
    );
    assert_eq!(merged.get("version").and_then(|v| v.as_i64()), Some(7), "server's version is kept, not overwritten by the stale local op");
}
