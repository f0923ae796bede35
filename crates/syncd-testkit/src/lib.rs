//! Scenario-test scaffolding shared by `tests/scenario_*.rs`. Grounded on
//! `mqk-testkit`'s role in the teacher pack: a crate downstream of everything
//! it tests, providing fixtures rather than new behavior, with `#[cfg(test)]`
//! left to each individual crate and end-to-end coverage living here instead.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use syncd_auth::{AuthManager, TokenPair, TokenRefresher};
use syncd_engine::{EngineConfig, Metrics, SyncEngine};
use syncd_http::ApiClient;
use syncd_kv::MemoryStore;
use syncd_optimistic::OptimisticStore;
use syncd_pending_store::PendingStore;

/// A `TokenRefresher` that never needs a network: always hands back the same
/// pair. Scenarios that care about auth failure/refresh exercise
/// `syncd-auth`'s own test suite instead; this harness just needs something
/// that satisfies the trait bound.
pub struct StaticRefresher;

#[async_trait::async_trait]
impl TokenRefresher for StaticRefresher {
    async fn refresh(&self, refresh_token: &str) -> anyhow::Result<TokenPair> {
        Ok(TokenPair {
            access_token: "refreshed-access-token".to_string(),
            refresh_token: refresh_token.to_string(),
        })
    }
}

/// A fully wired engine pointed at an address nothing listens on
/// (`127.0.0.1:1`, the same trick `syncd-engine`'s own tests use), so every
/// dispatch deterministically fails with a connection-refused `Network`
/// error without a real server. Scenarios that need to observe success paths
/// instead drive the pure crates (`syncd-coalesce`, `syncd-conflict`,
/// `syncd-reconcile`) directly rather than through this harness.
pub struct Harness {
    pub engine: Arc<SyncEngine>,
    pub pending_store: Arc<PendingStore>,
    pub auth: Arc<AuthManager>,
}

pub fn unroutable_base_url() -> &'static str {
    "http://127.0.0.1:1"
}

pub async fn build_harness(max_attempts: u32) -> Harness {
    build_harness_with_base_url(max_attempts, unroutable_base_url()).await
}

pub async fn build_harness_with_base_url(max_attempts: u32, base_url: &str) -> Harness {
    let kv = MemoryStore::new();
    let auth = Arc::new(AuthManager::new(kv.clone(), Arc::new(StaticRefresher)));
    auth.set_tokens(TokenPair {
        access_token: "seed-access-token".to_string(),
        refresh_token: "seed-refresh-token".to_string(),
    })
    .await
    .expect("seed tokens");

    let metrics = Arc::new(Metrics::new());
    let api = Arc::new(ApiClient::new(base_url.to_string(), "1.0.0", "test-device", auth.clone()).with_refresh_observer(metrics.clone()));
    let pending_store = Arc::new(PendingStore::new(kv.clone(), max_attempts));
    let optimistic = OptimisticStore::new();

    let config = EngineConfig {
        base_url: base_url.to_string(),
        app_version: "1.0.0".to_string(),
        device_id: "test-device".to_string(),
        instance_id: "test-instance".to_string(),
        max_attempts,
        ..EngineConfig::default()
    };

    let engine = SyncEngine::new(config, kv, pending_store.clone(), api, auth.clone(), optimistic, metrics);

    Harness { engine, pending_store, auth }
}

/// Advances a clock deterministically instead of sleeping real time, the same
/// discipline every crate in the workspace uses for backoff-gated logic.
pub fn advance(now: DateTime<Utc>, minutes: i64) -> DateTime<Utc> {
    now + chrono::Duration::minutes(minutes)
}

pub fn now() -> DateTime<Utc> {
    Utc::now()
}
