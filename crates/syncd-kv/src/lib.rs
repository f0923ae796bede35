//! The durable key-value boundary the engine is built on top of (§2,
//! "Durable key-value store"). This crate only defines the contract and an
//! in-memory reference implementation for tests; a real mobile build swaps in
//! a SQLite- or platform-keystore-backed implementation without the rest of
//! the workspace noticing.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

/// A durable, namespaced key-value store. Namespaces ("boxes") keep the
/// Pending Store, Failed-Ops Archive, and idempotency cache from colliding
/// over the same physical storage without each needing to prefix its own
/// keys.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn put(&self, box_name: &str, key: &str, value: Value) -> anyhow::Result<()>;

    async fn get(&self, box_name: &str, key: &str) -> anyhow::Result<Option<Value>>;

    async fn delete(&self, box_name: &str, key: &str) -> anyhow::Result<()>;

    /// All entries in a box, ordered by key. Ordering matters: the Pending
    /// Store relies on it to recover FIFO order after a crash (§4.1).
    async fn iterate(&self, box_name: &str) -> anyhow::Result<Vec<(String, Value)>>;

    /// Atomically swap the stored value for `key` if-and-only-if the current
    /// value is byte-equal to `expected`, used by the Leader Lease crate to
    /// implement compare-and-swap heartbeats without a separate lock.
    async fn compare_and_swap(
        &self,
        box_name: &str,
        key: &str,
        expected: Option<Value>,
        new_value: Value,
    ) -> anyhow::Result<bool>;
}

/// Secure, token-only storage (§4.8's access/refresh tokens). Kept separate
/// from [`DurableStore`] because a real implementation backs this with the
/// platform keystore (Keychain / Keystore) rather than plain-file storage.
#[async_trait]
pub trait SecureStore: Send + Sync {
    async fn get_token(&self, name: &str) -> anyhow::Result<Option<String>>;

    async fn set_token(&self, name: &str, value: &str) -> anyhow::Result<()>;

    async fn clear_token(&self, name: &str) -> anyhow::Result<()>;
}

type Box_ = BTreeMap<String, Value>;

/// In-memory reference implementation of both [`DurableStore`] and
/// [`SecureStore`], used by unit/integration tests and the daemon's demo
/// mode. Not durable across process restarts.
#[derive(Default)]
pub struct MemoryStore {
    boxes: RwLock<BTreeMap<String, Box_>>,
    tokens: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn put(&self, box_name: &str, key: &str, value: Value) -> anyhow::Result<()> {
        let mut boxes = self.boxes.write().await;
        boxes
            .entry(box_name.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, box_name: &str, key: &str) -> anyhow::Result<Option<Value>> {
        let boxes = self.boxes.read().await;
        Ok(boxes.get(box_name).and_then(|b| b.get(key)).cloned())
    }

    async fn delete(&self, box_name: &str, key: &str) -> anyhow::Result<()> {
        let mut boxes = self.boxes.write().await;
        if let Some(b) = boxes.get_mut(box_name) {
            b.remove(key);
        }
        Ok(())
    }

    async fn iterate(&self, box_name: &str) -> anyhow::Result<Vec<(String, Value)>> {
        let boxes = self.boxes.read().await;
        Ok(boxes
            .get(box_name)
            .map(|b| b.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn compare_and_swap(
        &self,
        box_name: &str,
        key: &str,
        expected: Option<Value>,
        new_value: Value,
    ) -> anyhow::Result<bool> {
        let mut boxes = self.boxes.write().await;
        let b = boxes.entry(box_name.to_string()).or_default();
        let current = b.get(key).cloned();
        if current == expected {
            b.insert(key.to_string(), new_value);
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

#[async_trait]
impl SecureStore for MemoryStore {
    async fn get_token(&self, name: &str) -> anyhow::Result<Option<String>> {
        Ok(self.tokens.read().await.get(name).cloned())
    }

    async fn set_token(&self, name: &str, value: &str) -> anyhow::Result<()> {
        self.tokens
            .write()
            .await
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn clear_token(&self, name: &str) -> anyhow::Result<()> {
        self.tokens.write().await.remove(name);
        Ok(())
    }
}
