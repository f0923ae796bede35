//! Engine counters, exposed as a plain snapshot struct for a health endpoint
//! or a log line — not a full metrics-export pipeline (out of scope; see
//! Non-goals).

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use syncd_http::RefreshObserver;

#[derive(Default)]
pub struct Metrics {
    enqueued: AtomicU64,
    dispatched: AtomicU64,
    succeeded: AtomicU64,
    retried: AtomicU64,
    conflicts_resolved: AtomicU64,
    permanently_failed: AtomicU64,
    unauthorized_events: AtomicU64,
    queue_depth: AtomicU64,
    circuit_trips: AtomicU64,
    auth_refresh_success: AtomicU64,
    auth_refresh_failure: AtomicU64,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub enqueued: u64,
    pub dispatched: u64,
    pub succeeded: u64,
    pub retried: u64,
    pub conflicts_resolved: u64,
    pub permanently_failed: u64,
    pub unauthorized_events: u64,
    pub queue_depth: u64,
    pub circuit_trips: u64,
    pub auth_refresh_success: u64,
    pub auth_refresh_failure: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_retried(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_conflict_resolved(&self) {
        self.conflicts_resolved.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_permanently_failed(&self) {
        self.permanently_failed.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_unauthorized(&self) {
        self.unauthorized_events.fetch_add(1, Ordering::Relaxed);
    }
    /// Sampled after every queue-touching operation, not incremented —
    /// `queue_depth` is a point-in-time gauge, not a counter.
    pub fn set_queue_depth(&self, depth: u64) {
        self.queue_depth.store(depth, Ordering::Relaxed);
    }
    pub fn record_circuit_trip(&self) {
        self.circuit_trips.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_auth_refresh_success(&self) {
        self.auth_refresh_success.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_auth_refresh_failure(&self) {
        self.auth_refresh_failure.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            conflicts_resolved: self.conflicts_resolved.load(Ordering::Relaxed),
            permanently_failed: self.permanently_failed.load(Ordering::Relaxed),
            unauthorized_events: self.unauthorized_events.load(Ordering::Relaxed),
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
            circuit_trips: self.circuit_trips.load(Ordering::Relaxed),
            auth_refresh_success: self.auth_refresh_success.load(Ordering::Relaxed),
            auth_refresh_failure: self.auth_refresh_failure.load(Ordering::Relaxed),
        }
    }
}

impl RefreshObserver for Metrics {
    fn on_refresh_attempt(&self, succeeded: bool) {
        if succeeded {
            self.record_auth_refresh_success();
        } else {
            self.record_auth_refresh_failure();
        }
    }
}
