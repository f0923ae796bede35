//! Optimistic UI store (§4.13): tracks the fate of an op the UI has already
//! rendered as if it succeeded, keyed by the caller-supplied `TxnToken`, and
//! notifies subscribers exactly once when it is actually resolved.
//!
//! The broadcast-channel-plus-`RwLock`-snapshot shape is lifted straight
//! from `mqk-daemon`'s `AppState` — a `broadcast::Sender` for "something
//! happened" events a UI layer subscribes to, backed by a lock-guarded map
//! for synchronous point lookups.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use syncd_schemas::TxnToken;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimisticStatus {
    Pending,
    Committed,
    RolledBack,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Entry {
    status: OptimisticStatus,
    resolved_at: Option<DateTime<Utc>>,
}

/// Emitted once, the first time a registered transaction is resolved either
/// way. A UI subscriber uses this to flip a pending row to its final state
/// or to visually revert it.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptimisticEvent {
    Committed { token: TxnToken },
    RolledBack { token: TxnToken },
}

pub struct OptimisticStore {
    entries: RwLock<HashMap<TxnToken, Entry>>,
    events: broadcast::Sender<OptimisticEvent>,
}

impl OptimisticStore {
    pub fn new() -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(256);
        Arc::new(Self {
            entries: RwLock::new(HashMap::new()),
            events: tx,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OptimisticEvent> {
        self.events.subscribe()
    }

    /// Record that `token` is now optimistically rendered and awaiting
    /// resolution. Re-registering an already-pending token is a no-op.
    pub async fn register(&self, token: TxnToken) {
        self.entries.write().await.entry(token).or_insert(Entry {
            status: OptimisticStatus::Pending,
            resolved_at: None,
        });
    }

    pub async fn status(&self, token: &TxnToken) -> Option<OptimisticStatus> {
        self.entries.read().await.get(token).map(|e| e.status)
    }

    /// Resolve `token` as committed. Returns `true` only on the call that
    /// actually performed the transition — a second commit/rollback on an
    /// already-resolved token is a silent no-op, guaranteeing the UI event
    /// fires exactly once per token.
    pub async fn commit(&self, token: &TxnToken, now: DateTime<Utc>) -> bool {
        self.resolve(token, OptimisticStatus::Committed, now).await
    }

    pub async fn rollback(&self, token: &TxnToken, now: DateTime<Utc>) -> bool {
        self.resolve(token, OptimisticStatus::RolledBack, now).await
    }

    async fn resolve(&self, token: &TxnToken, status: OptimisticStatus, now: DateTime<Utc>) -> bool {
        let mut entries = self.entries.write().await;
        let entry = match entries.get_mut(token) {
            Some(e) => e,
            None => {
                tracing::warn!(?token, "resolved an unregistered optimistic transaction");
                return false;
            }
        };
        if entry.status != OptimisticStatus::Pending {
            return false;
        }
        entry.status = status;
        entry.resolved_at = Some(now);
        let event = match status {
            OptimisticStatus::Committed => OptimisticEvent::Committed { token: token.clone() },
            OptimisticStatus::RolledBack => OptimisticEvent::RolledBack { token: token.clone() },
            OptimisticStatus::Pending => unreachable!(),
        };
        let _ = self.events.send(event);
        true
    }

    /// Roll back every transaction still pending (e.g. on logout, or after a
    /// destructive reset that invalidates in-flight optimistic state).
    /// Returns the tokens actually rolled back.
    pub async fn rollback_all(&self, now: DateTime<Utc>) -> Vec<TxnToken> {
        let pending_tokens: Vec<TxnToken> = self
            .entries
            .read()
            .await
            .iter()
            .filter(|(_, e)| e.status == OptimisticStatus::Pending)
            .map(|(t, _)| t.clone())
            .collect();

        let mut rolled_back = Vec::new();
        for token in pending_tokens {
            if self.rollback(&token, now).await {
                rolled_back.push(token);
            }
        }
        rolled_back
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn commit_transitions_pending_to_committed() {
        let store = OptimisticStore::new();
        let token = TxnToken::new("tx1");
        store.register(token.clone()).await;
        assert_eq!(store.status(&token).await, Some(OptimisticStatus::Pending));
        assert!(store.commit(&token, Utc::now()).await);
        assert_eq!(store.status(&token).await, Some(OptimisticStatus::Committed));
    }

    #[tokio::test]
    async fn resolution_is_exactly_once() {
        let store = OptimisticStore::new();
        let token = TxnToken::new("tx1");
        store.register(token.clone()).await;
        assert!(store.commit(&token, Utc::now()).await);
        assert!(!store.rollback(&token, Utc::now()).await);
        assert_eq!(store.status(&token).await, Some(OptimisticStatus::Committed));
    }

    #[tokio::test]
    async fn unregistered_token_resolves_to_false() {
        let store = OptimisticStore::new();
        assert!(!store.commit(&TxnToken::new("ghost"), Utc::now()).await);
    }

    #[tokio::test]
    async fn subscribers_receive_exactly_one_event_per_resolution() {
        let store = OptimisticStore::new();
        let mut rx = store.subscribe();
        let token = TxnToken::new("tx1");
        store.register(token.clone()).await;
        store.commit(&token, Utc::now()).await;

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, OptimisticEvent::Committed { .. }));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn rollback_all_only_touches_still_pending_entries() {
        let store = OptimisticStore::new();
        let t1 = TxnToken::new("tx1");
        let t2 = TxnToken::new("tx2");
        store.register(t1.clone()).await;
        store.register(t2.clone()).await;
        store.commit(&t1, Utc::now()).await;

        let rolled_back = store.rollback_all(Utc::now()).await;
        assert_eq!(rolled_back, vec![t2.clone()]);
        assert_eq!(store.status(&t1).await, Some(OptimisticStatus::Committed));
        assert_eq!(store.status(&t2).await, Some(OptimisticStatus::RolledBack));
    }
}
