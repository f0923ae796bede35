//! Pending Store and Failed-Ops Archive (§4.1, §4.2), built on top of
//! [`syncd_kv::DurableStore`].
//!
//! The insert-is-idempotent-on-conflict / atomic-claim-before-processing
//! shape mirrors the teacher pack's outbox (`outbox_enqueue` with
//! `ON CONFLICT (idempotency_key) DO NOTHING`, `outbox_claim_batch` with
//! `FOR UPDATE SKIP LOCKED`) translated onto a generic KV box instead of a
//! Postgres table: enqueue deduplicates by idempotency key, and claiming the
//! oldest eligible op flips its status to `Processing` so a second caller
//! (e.g. a racing lease holder during a handover) doesn't double-dispatch it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use syncd_kv::DurableStore;
use syncd_schemas::{EntityType, FailedOp, IdempotencyKey, OpId, OpStatus, OpType, Payload, PendingOp, TraceId, TxnToken};

const PENDING_BOX: &str = "pending_ops";
const FAILED_BOX: &str = "failed_ops";

pub struct PendingStore {
    store: Arc<dyn DurableStore>,
    max_attempts: u32,
    next_id: tokio::sync::Mutex<Option<i64>>,
}

impl PendingStore {
    pub fn new(store: Arc<dyn DurableStore>, max_attempts: u32) -> Self {
        Self {
            store,
            max_attempts,
            next_id: tokio::sync::Mutex::new(None),
        }
    }

    async fn all_pending_raw(&self) -> anyhow::Result<Vec<PendingOp>> {
        let entries = self.store.iterate(PENDING_BOX).await?;
        entries
            .into_iter()
            .map(|(_, v)| serde_json::from_value(v).map_err(anyhow::Error::from))
            .collect()
    }

    async fn next_op_id(&self) -> anyhow::Result<OpId> {
        let mut guard = self.next_id.lock().await;
        if guard.is_none() {
            let max_existing = self
                .all_pending_raw()
                .await?
                .iter()
                .map(|op| op.id.0)
                .chain(self.all_failed().await?.iter().map(|f| f.op.id.0))
                .max()
                .unwrap_or(0);
            *guard = Some(max_existing);
        }
        let next = guard.as_mut().unwrap();
        *next += 1;
        Ok(OpId(*next))
    }

    /// Insert a new op. If `idempotency_key` already matches a queued op,
    /// returns the existing op unchanged instead of inserting a duplicate
    /// (§4.1's "enqueue is idempotent on idempotencyKey").
    #[allow(clippy::too_many_arguments)]
    pub async fn enqueue(
        &self,
        op_type: OpType,
        entity_type: EntityType,
        payload: Payload,
        idempotency_key: IdempotencyKey,
        trace_id: TraceId,
        txn_token: Option<TxnToken>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<PendingOp> {
        for existing in self.all_pending_raw().await? {
            if existing.idempotency_key == idempotency_key {
                return Ok(existing);
            }
        }

        let id = self.next_op_id().await?;
        let op = PendingOp::new(id, op_type, entity_type, payload, idempotency_key, trace_id, txn_token, now);
        self.store
            .put(PENDING_BOX, &id.0.to_string(), serde_json::to_value(&op)?)
            .await?;
        Ok(op)
    }

    /// The oldest eligible (not backed off, not already claimed) op, if any.
    /// Ties in `created_at` break on `id` (§4.1).
    pub async fn oldest(&self, now: DateTime<Utc>) -> anyhow::Result<Option<PendingOp>> {
        let mut candidates: Vec<PendingOp> = self
            .all_pending_raw()
            .await?
            .into_iter()
            .filter(|op| op.status == OpStatus::Queued && op.is_eligible_at(now))
            .collect();
        candidates.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(candidates.into_iter().next())
    }

    pub async fn count(&self) -> anyhow::Result<usize> {
        Ok(self.all_pending_raw().await?.len())
    }

    /// All ops currently sitting in the queue (any status), used by the
    /// batch coalescer to decide how to handle a new enqueue.
    pub async fn all_queued(&self) -> anyhow::Result<Vec<PendingOp>> {
        self.all_pending_raw().await
    }

    pub async fn get(&self, id: OpId) -> anyhow::Result<Option<PendingOp>> {
        self.load(id).await
    }

    /// Overwrite a queued op in place (used by the coalescer's merge path and
    /// by the reconciler's rebase path to install a merged payload).
    pub async fn replace(&self, op: &PendingOp) -> anyhow::Result<()> {
        self.save(op).await
    }

    /// Remove an op from the queue without archiving it (the coalescer's
    /// "DELETE supersedes an unsent CREATE" case: neither side is ever sent).
    pub async fn remove(&self, id: OpId) -> anyhow::Result<()> {
        self.store.delete(PENDING_BOX, &id.0.to_string()).await
    }

    async fn load(&self, id: OpId) -> anyhow::Result<Option<PendingOp>> {
        Ok(self
            .store
            .get(PENDING_BOX, &id.0.to_string())
            .await?
            .map(serde_json::from_value)
            .transpose()?)
    }

    async fn save(&self, op: &PendingOp) -> anyhow::Result<()> {
        self.store
            .put(PENDING_BOX, &op.id.0.to_string(), serde_json::to_value(op)?)
            .await
    }

    /// Claim an op for dispatch: flips it to `Processing` so a concurrent
    /// caller won't pick it up too.
    pub async fn mark_processing(&self, id: OpId) -> anyhow::Result<()> {
        if let Some(mut op) = self.load(id).await? {
            op.status = OpStatus::Processing;
            self.save(&op).await?;
        }
        Ok(())
    }

    /// The remote call succeeded: drop the op from the queue entirely.
    pub async fn mark_succeeded(&self, id: OpId) -> anyhow::Result<()> {
        self.store.delete(PENDING_BOX, &id.0.to_string()).await
    }

    /// The remote call failed but is retryable. Bumps `attempts`, re-queues
    /// with the given `next_attempt_at` — unless attempts have now exhausted
    /// `max_attempts`, in which case the op moves to the Failed-Ops Archive
    /// instead (§4.2).
    pub async fn mark_retryable_failure(
        &self,
        id: OpId,
        error_code: &str,
        error_message: &str,
        next_attempt_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let mut op = match self.load(id).await? {
            Some(op) => op,
            None => return Ok(false),
        };
        op.attempts += 1;
        if op.attempts >= self.max_attempts {
            self.archive(op, error_code, error_message, now).await?;
            return Ok(true);
        }
        op.status = OpStatus::Queued;
        op.next_attempt_at = Some(next_attempt_at);
        self.save(&op).await?;
        Ok(false)
    }

    /// The failure is terminal regardless of attempt count (validation,
    /// permission, client-version rejections): archive immediately.
    pub async fn mark_permanent_failure(
        &self,
        id: OpId,
        error_code: &str,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        if let Some(op) = self.load(id).await? {
            self.archive(op, error_code, error_message, now).await?;
        }
        Ok(())
    }

    async fn archive(&self, op: PendingOp, error_code: &str, error_message: &str, now: DateTime<Utc>) -> anyhow::Result<()> {
        let id = op.id;
        let failed = FailedOp::new(op, error_code, error_message, now);
        self.store
            .put(FAILED_BOX, &id.0.to_string(), serde_json::to_value(&failed)?)
            .await?;
        self.store.delete(PENDING_BOX, &id.0.to_string()).await?;
        tracing::warn!(op_id = id.0, error_code, "op moved to failed-ops archive");
        Ok(())
    }

    pub async fn all_failed(&self) -> anyhow::Result<Vec<FailedOp>> {
        let entries = self.store.iterate(FAILED_BOX).await?;
        entries
            .into_iter()
            .map(|(_, v)| serde_json::from_value(v).map_err(anyhow::Error::from))
            .collect()
    }

    /// Move a failed op back onto the live queue for another attempt (a
    /// user-initiated "retry" action on an item in the archive view).
    pub async fn requeue_failed(&self, id: OpId, now: DateTime<Utc>) -> anyhow::Result<bool> {
        let raw = match self.store.get(FAILED_BOX, &id.0.to_string()).await? {
            Some(v) => v,
            None => return Ok(false),
        };
        let failed: FailedOp = serde_json::from_value(raw)?;
        let mut op = failed.op;
        op.status = OpStatus::Queued;
        op.next_attempt_at = Some(now);
        self.save(&op).await?;
        self.store.delete(FAILED_BOX, &id.0.to_string()).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncd_kv::MemoryStore;

    fn payload(id: &str) -> Payload {
        let mut m = Payload::new();
        m.insert("id".into(), serde_json::json!(id));
        m
    }

    fn store() -> PendingStore {
        PendingStore::new(MemoryStore::new(), 3)
    }

    #[tokio::test]
    async fn enqueue_assigns_ascending_ids() {
        let ps = store();
        let now = Utc::now();
        let a = ps
            .enqueue(
                OpType::Create,
                EntityType::new("room"),
                payload("r1"),
                IdempotencyKey::new("k1"),
                TraceId::new("t1"),
                None,
                now,
            )
            .await
            .unwrap();
        let b = ps
            .enqueue(
                OpType::Create,
                EntityType::new("room"),
                payload("r2"),
                IdempotencyKey::new("k2"),
                TraceId::new("t2"),
                None,
                now,
            )
            .await
            .unwrap();
        assert!(b.id.0 > a.id.0);
    }

    #[tokio::test]
    async fn enqueue_is_idempotent_on_key() {
        let ps = store();
        let now = Utc::now();
        let a = ps
            .enqueue(
                OpType::Create,
                EntityType::new("room"),
                payload("r1"),
                IdempotencyKey::new("dup"),
                TraceId::new("t1"),
                None,
                now,
            )
            .await
            .unwrap();
        let b = ps
            .enqueue(
                OpType::Create,
                EntityType::new("room"),
                payload("r1-different"),
                IdempotencyKey::new("dup"),
                TraceId::new("t2"),
                None,
                now,
            )
            .await
            .unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(ps.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn oldest_skips_backed_off_ops() {
        let ps = store();
        let now = Utc::now();
        let op = ps
            .enqueue(
                OpType::Update,
                EntityType::new("room"),
                payload("r1"),
                IdempotencyKey::new("k1"),
                TraceId::new("t1"),
                None,
                now,
            )
            .await
            .unwrap();
        ps.mark_retryable_failure(op.id, "server", "boom", now + chrono::Duration::seconds(30), now)
            .await
            .unwrap();
        assert!(ps.oldest(now).await.unwrap().is_none());
        assert!(ps
            .oldest(now + chrono::Duration::seconds(31))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn exhausting_attempts_archives_the_op() {
        let ps = store();
        let now = Utc::now();
        let op = ps
            .enqueue(
                OpType::Update,
                EntityType::new("room"),
                payload("r1"),
                IdempotencyKey::new("k1"),
                TraceId::new("t1"),
                None,
                now,
            )
            .await
            .unwrap();
        ps.mark_retryable_failure(op.id, "server", "1", now, now).await.unwrap();
        ps.mark_retryable_failure(op.id, "server", "2", now, now).await.unwrap();
        let archived = ps
            .mark_retryable_failure(op.id, "server", "3", now, now)
            .await
            .unwrap();
        assert!(archived);
        assert_eq!(ps.count().await.unwrap(), 0);
        assert_eq!(ps.all_failed().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn permanent_failure_archives_immediately() {
        let ps = store();
        let now = Utc::now();
        let op = ps
            .enqueue(
                OpType::Create,
                EntityType::new("room"),
                payload("r1"),
                IdempotencyKey::new("k1"),
                TraceId::new("t1"),
                None,
                now,
            )
            .await
            .unwrap();
        ps.mark_permanent_failure(op.id, "validation", "bad field", now)
            .await
            .unwrap();
        assert_eq!(ps.count().await.unwrap(), 0);
        assert_eq!(ps.all_failed().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn requeue_failed_returns_op_to_the_live_queue() {
        let ps = store();
        let now = Utc::now();
        let op = ps
            .enqueue(
                OpType::Create,
                EntityType::new("room"),
                payload("r1"),
                IdempotencyKey::new("k1"),
                TraceId::new("t1"),
                None,
                now,
            )
            .await
            .unwrap();
        ps.mark_permanent_failure(op.id, "validation", "bad field", now)
            .await
            .unwrap();
        assert!(ps.requeue_failed(op.id, now).await.unwrap());
        assert_eq!(ps.count().await.unwrap(), 1);
        assert!(ps.oldest(now).await.unwrap().is_some());
    }
}
