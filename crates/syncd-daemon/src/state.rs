//! Shared process state (mirrors `mqk-daemon`'s `AppState`): one `Arc` handed
//! to every axum handler and to the engine's background task.

use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Instant;

use serde::Serialize;
use syncd_engine::{MetricsSnapshot, SyncEngine};

static START: OnceLock<Instant> = OnceLock::new();

fn uptime_secs() -> u64 {
    START.get_or_init(Instant::now).elapsed().as_secs()
}

pub fn mark_started() {
    START.get_or_init(Instant::now);
}

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SyncEngine>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub uptime_secs: u64,
    pub authenticated: bool,
    pub metrics: MetricsSnapshot,
}

impl AppState {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        mark_started();
        Self { engine }
    }

    pub async fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            uptime_secs: uptime_secs(),
            authenticated: self.engine.is_authenticated().await,
            metrics: self.engine.metrics.snapshot(),
        }
    }
}
