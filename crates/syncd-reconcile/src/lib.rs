//! Reconciler (§4.12): fetch the server's current state for a conflicted
//! entity, overlay the locally-queued edit onto it, and produce a rebased
//! payload the engine resubmits.
//!
//! Grounded on `mqk-reconcile::engine::reconcile`, which compares a local
//! and a broker snapshot and reports a diff rather than mutating anything
//! itself — this crate keeps the same shape: a pure merge function, with the
//! actual HTTP fetch pushed behind a trait the caller supplies.

use async_trait::async_trait;
use syncd_schemas::{EntityType, Payload};

/// Fetches the server's current representation of an entity. Implemented by
/// `syncd-http` against the real API; tests supply a stub.
#[async_trait]
pub trait CurrentStateFetcher: Send + Sync {
    async fn fetch_current(&self, entity_type: &EntityType, entity_id: &str) -> anyhow::Result<Option<Payload>>;
}

/// Metadata keys the rebase never lets the local payload override — the
/// server's version and timestamps are authoritative no matter what the
/// client had queued (§4.12: "never `version`, `updated_at`, `created_at`").
const SERVER_OWNED_KEYS: &[&str] = &[
    "version",
    "updatedAt",
    "updated_at",
    "createdAt",
    "created_at",
];

/// Rebase `local` (the pending op's intended edit) onto `remote` (freshly
/// fetched current server state): start from `remote` in full and overlay
/// only `local`'s data keys, so the server's `version` and timestamps always
/// survive the merge untouched (§4.12). This is not a symmetric three-way
/// diff — there is no notion of a last-synced base, and the server's state is
/// always authoritative for anything the client didn't explicitly set.
pub fn rebase(remote: &Payload, local: &Payload) -> Payload {
    let mut merged = remote.clone();
    for (key, value) in local.iter() {
        if SERVER_OWNED_KEYS.contains(&key.as_str()) {
            continue;
        }
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Fetch current state and rebase the op's pending payload onto it, producing
/// the payload to resubmit (§4.12's "rebase").
pub async fn reconcile(
    fetcher: &dyn CurrentStateFetcher,
    entity_type: &EntityType,
    entity_id: &str,
    local_payload: &Payload,
) -> anyhow::Result<Payload> {
    let remote = fetcher
        .fetch_current(entity_type, entity_id)
        .await?
        .unwrap_or_else(Payload::new);
    Ok(rebase(&remote, local_payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(pairs: &[(&str, serde_json::Value)]) -> Payload {
        let mut p = Payload::new();
        for (k, v) in pairs {
            p.insert(k.to_string(), v.clone());
        }
        p
    }

    #[test]
    fn local_data_key_overlays_remote() {
        let remote = payload(&[("name", json!("old")), ("color", json!("blue"))]);
        let local = payload(&[("name", json!("new"))]);
        let merged = rebase(&remote, &local);
        assert_eq!(merged.get("name"), Some(&json!("new")));
        assert_eq!(merged.get("color"), Some(&json!("blue")), "untouched remote keys survive the rebase");
    }

    #[test]
    fn remote_only_change_is_kept() {
        let remote = payload(&[("name", json!("server-changed"))]);
        let local = payload(&[]);
        let merged = rebase(&remote, &local);
        assert_eq!(merged.get("name"), Some(&json!("server-changed")));
    }

    #[test]
    fn remote_version_and_timestamps_always_win_even_if_local_sent_them() {
        let remote = payload(&[
            ("name", json!("Den")),
            ("version", json!(3)),
            ("updatedAt", json!("2026-01-01T00:00:00Z")),
        ]);
        let local = payload(&[
            ("name", json!("Great Room")),
            ("version", json!(2)),
            ("updatedAt", json!("2025-12-31T00:00:00Z")),
        ]);
        let merged = rebase(&remote, &local);
        assert_eq!(merged.get("name"), Some(&json!("Great Room")), "local's data edit is overlaid");
        assert_eq!(merged.get("version"), Some(&json!(3)), "server's version is never overridden by local");
        assert_eq!(merged.get("updatedAt"), Some(&json!("2026-01-01T00:00:00Z")));
    }

    struct StubFetcher(Option<Payload>);

    #[async_trait]
    impl CurrentStateFetcher for StubFetcher {
        async fn fetch_current(&self, _entity_type: &EntityType, _entity_id: &str) -> anyhow::Result<Option<Payload>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn reconcile_merges_fetched_remote_with_local_intent() {
        let remote = payload(&[("name", json!("remote")), ("color", json!("red"))]);
        let fetcher = StubFetcher(Some(remote));
        let local = payload(&[("name", json!("local"))]);
        let merged = reconcile(&fetcher, &EntityType::new("room"), "r1", &local)
            .await
            .unwrap();
        assert_eq!(merged.get("name"), Some(&json!("local")));
        assert_eq!(merged.get("color"), Some(&json!("red")));
    }

    #[tokio::test]
    async fn reconcile_treats_missing_remote_as_empty() {
        let fetcher = StubFetcher(None);
        let local = payload(&[("name", json!("local"))]);
        let merged = reconcile(&fetcher, &EntityType::new("room"), "r1", &local)
            .await
            .unwrap();
        assert_eq!(merged.get("name"), Some(&json!("local")));
    }
}
