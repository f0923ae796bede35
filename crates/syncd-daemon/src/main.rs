//! Sync daemon binary: wires the in-memory reference adapters to the engine
//! and exposes a small local health/status surface, following
//! `mqk-daemon::main`'s shape almost directly — `tokio::main`, `tracing`
//! init from `RUST_LOG`, an `Arc<AppState>`, `axum::serve` behind a
//! localhost-only CORS layer and `TraceLayer`.

mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use syncd_auth::AuthManager;
use syncd_engine::{EngineConfig, Metrics, SyncEngine};
use syncd_http::{ApiClient, HttpTokenRefresher};
use syncd_kv::MemoryStore;
use syncd_optimistic::OptimisticStore;
use syncd_pending_store::PendingStore;

use state::AppState;

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn config_from_env() -> EngineConfig {
    EngineConfig {
        base_url: std::env::var("SYNCD_BASE_URL").unwrap_or_else(|_| "https://api.example.com".to_string()),
        app_version: std::env::var("SYNCD_APP_VERSION").unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
        device_id: std::env::var("SYNCD_DEVICE_ID").unwrap_or_else(|_| syncd_schemas::new_uuid_v4()),
        instance_id: std::env::var("SYNCD_INSTANCE_ID").unwrap_or_else(|_| syncd_schemas::new_uuid_v4()),
        ..EngineConfig::default()
    }
}

fn bind_addr_from_env() -> SocketAddr {
    std::env::var("SYNCD_BIND_ADDR")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 4801)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = config_from_env();
    tracing::info!(base_url = %config.base_url, instance_id = %config.instance_id, "starting sync engine");

    let kv = MemoryStore::new();
    let refresher = Arc::new(HttpTokenRefresher::new(config.base_url.clone()));
    let auth = Arc::new(AuthManager::new(kv.clone(), refresher));
    let metrics = Arc::new(Metrics::new());
    let api = Arc::new(
        ApiClient::new(config.base_url.clone(), config.app_version.clone(), config.device_id.clone(), auth.clone())
            .with_refresh_observer(metrics.clone()),
    );
    let pending_store = Arc::new(PendingStore::new(kv.clone(), config.max_attempts));
    let optimistic = OptimisticStore::new();

    let engine = SyncEngine::new(config, kv, pending_store, api, auth, optimistic, metrics);

    let engine_for_loop = engine.clone();
    tokio::spawn(async move {
        engine_for_loop.run().await;
    });

    let state = AppState::new(engine.clone());

    let cors = CorsLayer::new().allow_origin(AllowOrigin::predicate(|origin, _| {
        origin.as_bytes().starts_with(b"http://localhost") || origin.as_bytes().starts_with(b"http://127.0.0.1")
    }));

    let app = Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = bind_addr_from_env();
    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
            engine.request_shutdown();
        }
    }

    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

async fn status(State(state): State<AppState>) -> Json<state::StatusSnapshot> {
    Json(state.status().await)
}
