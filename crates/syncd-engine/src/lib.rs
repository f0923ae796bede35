//! Sync Engine orchestrator (§4.14): the one loop that ties every other
//! crate in the workspace together — pop the oldest eligible op, dispatch
//! it, and route the outcome to the right specialist (retry, conflict
//! resolver, permanent failure, optimistic UI resolution).
//!
//! Grounded on `mqk-daemon`'s `AppState`/heartbeat loop: a long-lived `Arc`
//! holding every collaborator, a `tokio::sync::Notify`-driven wake instead of
//! a tight poll, and `tracing` at every state transition instead of
//! println-debugging.

mod config;
mod metrics;

pub use config::EngineConfig;
pub use metrics::{Metrics, MetricsSnapshot};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use syncd_auth::AuthManager;
use syncd_backoff::BackoffPolicy;
use syncd_circuit::CircuitBreaker;
use syncd_errors::SyncError;
use syncd_http::ApiClient;
use syncd_idempotency::IdempotencyCache;
use syncd_kv::DurableStore;
use syncd_lease::LeaderLease;
use syncd_optimistic::OptimisticStore;
use syncd_pending_store::PendingStore;
use syncd_schemas::{EntityType, IdempotencyKey, OpType, Payload, PendingOp, TraceId, TxnToken};

pub struct SyncEngine {
    config: EngineConfig,
    pending_store: Arc<PendingStore>,
    api: Arc<ApiClient>,
    auth: Arc<AuthManager>,
    backoff: BackoffPolicy,
    circuit: CircuitBreaker,
    idempotency: Arc<IdempotencyCache>,
    lease: LeaderLease,
    optimistic: Arc<OptimisticStore>,
    pub metrics: Arc<Metrics>,
    wake_signal: tokio::sync::Notify,
    shutdown_signal: tokio::sync::Notify,
}

impl SyncEngine {
    #[allow(clippy::too_many_arguments)]
    /// `metrics` is created by the caller (not internally) so it can also be
    /// handed to `api` as a refresh observer before the engine exists — auth
    /// refresh attempts are counted at the point `ApiClient` makes them, not
    /// reconstructed later from the engine's terminal failure paths.
    pub fn new(
        config: EngineConfig,
        durable_store: Arc<dyn DurableStore>,
        pending_store: Arc<PendingStore>,
        api: Arc<ApiClient>,
        auth: Arc<AuthManager>,
        optimistic: Arc<OptimisticStore>,
        metrics: Arc<Metrics>,
    ) -> Arc<Self> {
        let lease = LeaderLease::new(durable_store, config.lease_name.clone());
        let circuit = CircuitBreaker::new(config.circuit_window, config.circuit_failure_threshold, config.circuit_cooldown);
        let backoff = BackoffPolicy::new(config.backoff_mode);
        Arc::new(Self {
            config,
            pending_store,
            api,
            auth,
            backoff,
            circuit,
            idempotency: Arc::new(IdempotencyCache::new()),
            lease,
            optimistic,
            metrics,
            wake_signal: tokio::sync::Notify::new(),
            shutdown_signal: tokio::sync::Notify::new(),
        })
    }

    /// Queue a local mutation (§2's `enqueue(opType, entityType, payload)`).
    /// Applies the batch coalescer before touching the Pending Store, and
    /// registers `txn_token` with the optimistic store when the caller wants
    /// commit/rollback notification.
    pub async fn enqueue(
        &self,
        op_type: OpType,
        entity_type: EntityType,
        payload: Payload,
        txn_token: Option<TxnToken>,
    ) -> anyhow::Result<PendingOp> {
        let now = Utc::now();
        let idempotency_key = IdempotencyKey::new(syncd_schemas::new_uuid_v4());
        let trace_id = TraceId::new(syncd_schemas::new_uuid_v4());
        let candidate = PendingOp::new(
            syncd_schemas::OpId(0),
            op_type,
            entity_type.clone(),
            payload.clone(),
            idempotency_key.clone(),
            trace_id.clone(),
            txn_token.clone(),
            now,
        );

        let existing = self.pending_store.all_queued().await?;
        let decision = syncd_coalesce::decide(&existing, &candidate);

        let op = match decision {
            syncd_coalesce::CoalesceDecision::InsertNew => {
                self.pending_store
                    .enqueue(op_type, entity_type, payload, idempotency_key, trace_id, txn_token.clone(), now)
                    .await?
            }
            syncd_coalesce::CoalesceDecision::MergeInto(id) => {
                let target = self.pending_store.get(id).await?.ok_or_else(|| anyhow::anyhow!("merge target {id} vanished"))?;
                let merged = syncd_coalesce::merge(&target, &candidate);
                self.pending_store.replace(&merged).await?;
                merged
            }
            syncd_coalesce::CoalesceDecision::DropCreateAndDelete { remove } => {
                for id in remove {
                    self.pending_store.remove(id).await?;
                }
                if let Some(token) = &txn_token {
                    self.optimistic.commit(token, now).await;
                }
                candidate
            }
            syncd_coalesce::CoalesceDecision::RemoveSupersededThenInsert { remove } => {
                for id in remove {
                    self.pending_store.remove(id).await?;
                }
                self.pending_store
                    .enqueue(op_type, entity_type, payload, idempotency_key, trace_id, txn_token.clone(), now)
                    .await?
            }
        };

        if let Some(token) = &txn_token {
            self.optimistic.register(token.clone()).await;
        }
        self.metrics.record_enqueued();
        self.sample_queue_depth().await;
        self.wake();
        Ok(op)
    }

    async fn sample_queue_depth(&self) {
        if let Ok(depth) = self.pending_store.count().await {
            self.metrics.set_queue_depth(depth as u64);
        }
    }

    pub fn wake(&self) {
        self.wake_signal.notify_one();
    }

    pub fn request_shutdown(&self) {
        self.shutdown_signal.notify_one();
    }

    pub async fn is_authenticated(&self) -> bool {
        self.auth.is_authenticated().await.unwrap_or(false)
    }

    /// The long-running loop. Wakes on `enqueue`/`wake` (debounced so a burst
    /// of local edits collapses into one drain pass) or on the idle poll
    /// interval, whichever comes first, then drains everything currently
    /// eligible before waiting again.
    pub async fn run(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.shutdown_signal.notified() => {
                    tracing::info!("sync engine shutting down");
                    break;
                }
                _ = self.wait_for_wake() => {}
            }

            loop {
                let now = Utc::now();
                match self.dispatch_once(now).await {
                    Ok(true) => continue,
                    Ok(false) => break,
                    Err(err) => {
                        tracing::error!(error = %err, "dispatch cycle failed");
                        break;
                    }
                }
            }
        }
    }

    async fn wait_for_wake(&self) {
        tokio::select! {
            _ = self.wake_signal.notified() => {
                tokio::time::sleep(self.config.wake_debounce).await;
            }
            _ = tokio::time::sleep(self.config.idle_poll_interval) => {}
        }
    }

    /// Dispatch exactly one op, if the engine currently holds the leader
    /// lease, the circuit is closed, and one is eligible. Returns whether
    /// work was done, so `run` can keep draining without re-waking.
    pub async fn dispatch_once(&self, now: DateTime<Utc>) -> anyhow::Result<bool> {
        if !self.lease.try_acquire(&self.config.instance_id, now).await? {
            return Ok(false);
        }
        if self.circuit.is_tripped(now) {
            return Ok(false);
        }
        let op = match self.pending_store.oldest(now).await? {
            Some(op) => op,
            None => return Ok(false),
        };

        self.pending_store.mark_processing(op.id).await?;
        self.metrics.record_dispatched();

        if self.idempotency.is_duplicate(&op.idempotency_key, now) {
            tracing::debug!(op_id = op.id.0, "skipping dispatch: idempotency key already processed");
            self.pending_store.mark_succeeded(op.id).await?;
            self.finish_success(&op, now).await;
            return Ok(true);
        }

        let route = syncd_router::resolve_route(&op);
        match self.api.send(&route, &op.payload, &op.idempotency_key, &op.trace_id).await {
            Ok(_body) => {
                self.circuit.record_success(now);
                self.idempotency.mark_processed(op.idempotency_key.clone(), now);
                self.pending_store.mark_succeeded(op.id).await?;
                self.metrics.record_succeeded();
                self.finish_success(&op, now).await;
            }
            Err(err) => self.handle_failure(&op, err, now).await?,
        }
        self.sample_queue_depth().await;
        Ok(true)
    }

    async fn handle_failure(&self, op: &PendingOp, err: SyncError, now: DateTime<Utc>) -> anyhow::Result<()> {
        tracing::warn!(op_id = op.id.0, error = %err, "op dispatch failed");

        if err.is_unauthorized() {
            // ApiClient already retried once after a token refresh (see
            // ApiClient::send_inner); a 401 that reaches here means the
            // refresh didn't fix it, so there is nothing left to back off
            // and wait for — archive immediately and roll back (§4.14 step
            // 6).
            self.metrics.record_unauthorized();
            self.pending_store
                .mark_permanent_failure(op.id, "unauthorized", &err.to_string(), now)
                .await?;
            self.metrics.record_permanently_failed();
            self.finish_failure(op, now).await;
            return Ok(());
        }

        if err.is_conflict_or_not_found() {
            return self.handle_conflict(op, &err, now).await;
        }

        if err.is_retryable() {
            if self.circuit.record_failure(now) {
                self.metrics.record_circuit_trip();
            }
            let retry_after = err.retry_after().map(|r| r.as_duration_from(now));
            let delay = self.backoff.delay(op.attempts + 1, retry_after);
            let archived = self
                .pending_store
                .mark_retryable_failure(op.id, error_code(&err), &err.to_string(), now + chrono::Duration::from_std(delay).unwrap_or_default(), now)
                .await?;
            if archived {
                self.metrics.record_permanently_failed();
                self.finish_failure(op, now).await;
            } else {
                self.metrics.record_retried();
            }
            return Ok(());
        }

        // Validation / PermissionDenied / ClientVersion / PreconditionFailed:
        // none of these are fixed by waiting, so they go straight to the
        // archive for a human to look at.
        self.pending_store
            .mark_permanent_failure(op.id, error_code(&err), &err.to_string(), now)
            .await?;
        self.metrics.record_permanently_failed();
        self.finish_failure(op, now).await;
        Ok(())
    }

    async fn handle_conflict(&self, op: &PendingOp, err: &SyncError, now: DateTime<Utc>) -> anyhow::Result<()> {
        let conflict_type = match err {
            SyncError::Conflict { conflict_type, .. } => conflict_type.as_str(),
            _ => "",
        };
        let kind = match syncd_conflict::classify(op.op_type, err, conflict_type) {
            Some(k) => k,
            None => return Ok(()),
        };

        match syncd_conflict::action_for(kind) {
            syncd_conflict::ConflictAction::Rebase => {
                let merged = syncd_reconcile::reconcile(self.api.as_ref(), &op.entity_type, op.entity_id().unwrap_or_default(), &op.payload).await?;
                let mut updated = op.clone();
                updated.payload = merged;
                updated.status = syncd_schemas::OpStatus::Queued;
                updated.attempts = 0;
                updated.next_attempt_at = Some(now);
                self.pending_store.replace(&updated).await?;
                self.metrics.record_conflict_resolved();
            }
            syncd_conflict::ConflictAction::TreatAsSuccess => {
                self.pending_store.mark_succeeded(op.id).await?;
                self.metrics.record_succeeded();
                self.finish_success(op, now).await;
            }
            syncd_conflict::ConflictAction::DropWithoutRetry => {
                self.pending_store.mark_succeeded(op.id).await?;
                self.finish_success(op, now).await;
            }
            syncd_conflict::ConflictAction::FailPermanently => {
                self.pending_store
                    .mark_permanent_failure(op.id, "conflict", &err.to_string(), now)
                    .await?;
                self.metrics.record_permanently_failed();
                self.finish_failure(op, now).await;
            }
        }
        Ok(())
    }

    async fn finish_success(&self, op: &PendingOp, now: DateTime<Utc>) {
        if let Some(token) = &op.txn_token {
            self.optimistic.commit(token, now).await;
        }
    }

    async fn finish_failure(&self, op: &PendingOp, now: DateTime<Utc>) {
        if let Some(token) = &op.txn_token {
            self.optimistic.rollback(token, now).await;
        }
    }
}

fn error_code(err: &SyncError) -> &'static str {
    match err {
        SyncError::Validation { .. } => "validation",
        SyncError::Unauthorized { .. } => "unauthorized",
        SyncError::PermissionDenied { .. } => "permission_denied",
        SyncError::ResourceNotFound { .. } => "resource_not_found",
        SyncError::Conflict { .. } => "conflict",
        SyncError::PreconditionFailed { .. } => "precondition_failed",
        SyncError::ClientVersion { .. } => "client_version",
        SyncError::RateLimit { .. } => "rate_limit",
        SyncError::Server { .. } => "server",
        SyncError::ServiceUnavailable { .. } => "service_unavailable",
        SyncError::Timeout { .. } => "timeout",
        SyncError::Network { .. } => "network",
    }
}
