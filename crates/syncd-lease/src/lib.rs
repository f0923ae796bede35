//! Leader lease (§4.3): ensures only one process instance drains the Pending
//! Store at a time when multiple app processes (e.g. a foreground activity
//! and a background service) could otherwise race on the same queue.
//!
//! Built on [`syncd_kv::DurableStore::compare_and_swap`] the same way the
//! teacher pack's run-lifecycle state machine uses a single source-of-truth
//! row with a heartbeat column and a deadman check, generalized here into a
//! named lease any number of logical owners can contend over.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::{bail, Context};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use syncd_kv::DurableStore;

const LEASE_BOX: &str = "leases";

/// A lease is considered stale — and therefore stealable — once this long
/// has passed since its last heartbeat.
pub const STALENESS_THRESHOLD: StdDuration = StdDuration::from_secs(5);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct LeaseRecord {
    holder: String,
    expires_at: DateTime<Utc>,
}

pub struct LeaderLease {
    store: Arc<dyn DurableStore>,
    name: String,
}

impl LeaderLease {
    pub fn new(store: Arc<dyn DurableStore>, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
        }
    }

    async fn read(&self) -> anyhow::Result<Option<LeaseRecord>> {
        let raw = self.store.get(LEASE_BOX, &self.name).await?;
        Ok(match raw {
            Some(v) => Some(serde_json::from_value(v).context("corrupt lease record")?),
            None => None,
        })
    }

    fn is_stale(record: &LeaseRecord, now: DateTime<Utc>) -> bool {
        now > record.expires_at
    }

    /// Attempt to become (or remain) the holder. Succeeds when the lease is
    /// unheld, stale, or already held by `holder_id`. Fails without error
    /// when another live holder exists — the caller just tries again later.
    pub async fn try_acquire(&self, holder_id: &str, now: DateTime<Utc>) -> anyhow::Result<bool> {
        let current = self.read().await?;
        let expected_json = current.as_ref().map(|r| serde_json::to_value(r).unwrap());

        let grantable = match &current {
            None => true,
            Some(r) if r.holder == holder_id => true,
            Some(r) => Self::is_stale(r, now),
        };
        if !grantable {
            return Ok(false);
        }

        let new_record = LeaseRecord {
            holder: holder_id.to_string(),
            expires_at: now + Duration::from_std(STALENESS_THRESHOLD).unwrap_or_default(),
        };
        let swapped = self
            .store
            .compare_and_swap(
                LEASE_BOX,
                &self.name,
                expected_json,
                serde_json::to_value(&new_record)?,
            )
            .await?;
        Ok(swapped)
    }

    /// Renew the lease. Fails if `holder_id` is not the current live holder
    /// (someone else stole it in the meantime).
    pub async fn heartbeat(&self, holder_id: &str, now: DateTime<Utc>) -> anyhow::Result<()> {
        let current = self.read().await?.context("lease not held by anyone")?;
        if current.holder != holder_id {
            bail!("lease is held by {}, not {holder_id}", current.holder);
        }
        let expected_json = serde_json::to_value(&current)?;
        let new_record = LeaseRecord {
            holder: holder_id.to_string(),
            expires_at: now + Duration::from_std(STALENESS_THRESHOLD).unwrap_or_default(),
        };
        let swapped = self
            .store
            .compare_and_swap(
                LEASE_BOX,
                &self.name,
                Some(expected_json),
                serde_json::to_value(&new_record)?,
            )
            .await?;
        if !swapped {
            bail!("lost the lease to a concurrent heartbeat/acquire");
        }
        Ok(())
    }

    /// Give up the lease early (clean shutdown). A no-op if someone else
    /// already holds it.
    pub async fn release(&self, holder_id: &str) -> anyhow::Result<()> {
        if let Some(current) = self.read().await? {
            if current.holder == holder_id {
                self.store.delete(LEASE_BOX, &self.name).await?;
            }
        }
        Ok(())
    }

    /// The current live holder, or `None` if unheld/stale.
    pub async fn holder(&self, now: DateTime<Utc>) -> anyhow::Result<Option<String>> {
        Ok(self.read().await?.and_then(|r| {
            if Self::is_stale(&r, now) {
                None
            } else {
                Some(r.holder)
            }
        }))
    }
}
