//! Core data-model types shared by every sync-engine crate.
//!
//! This crate is intentionally inert: no I/O, no async, no policy. It exists
//! so that `syncd-pending-store`, `syncd-router`, `syncd-coalesce`,
//! `syncd-conflict`, `syncd-reconcile`, `syncd-optimistic` and `syncd-engine`
//! can all agree on the shape of a queued operation without depending on each
//! other.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque key→value payload carried by an op. Field-name convention at this
/// boundary is local (camelCase); wire-format (snake_case) translation is the
/// router transform's job, not this crate's.
pub type Payload = serde_json::Map<String, serde_json::Value>;

macro_rules! string_newtype {
    ($name:ident) => {
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(inner: impl Into<String>) -> Self {
                Self(inner.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_newtype!(IdempotencyKey);
string_newtype!(TraceId);
string_newtype!(TxnToken);

/// Generates a fresh v4 UUID wrapped in the requested newtype. Used at
/// `enqueue` time for `IdempotencyKey` and `TraceId`, and by the presentation
/// layer for `TxnToken`.
pub fn new_uuid_v4() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Entity kind an op acts on. Left open (newtype over `String`) because the
/// spec enumerates "user, room, device, vital, automation, message, …" as
/// examples, not a closed set — new entity types are a router-registration
/// concern, not a schema change.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityType(pub String);

impl EntityType {
    pub fn new(inner: impl Into<String>) -> Self {
        Self(inner.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntityType {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The closed set of operation kinds a `PendingOp` can carry (§3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpType {
    Create,
    Update,
    Patch,
    Delete,
    Toggle,
    /// Synthesized by the batch coalescer from N ops of identical type and
    /// entity-type (§4.10); never produced directly by `enqueue`.
    Batch,
}

impl OpType {
    /// Only these three kinds may be merged into an existing queued op
    /// (§4.10) — CREATE and DELETE never coalesce, they supersede instead.
    pub fn is_coalescable(self) -> bool {
        matches!(self, OpType::Update | OpType::Patch | OpType::Toggle)
    }
}

/// Lifecycle state of a `PendingOp` while it sits in the Pending Store (§3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpStatus {
    Queued,
    Processing,
    Failed,
}

/// Monotonic-enough identifier assigned by the Pending Store at `enqueue`
/// time. Ties in `created_at` are broken by comparing `id` (§4.1).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpId(pub i64);

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The unit of durable work (§3, "PendingOp").
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingOp {
    pub id: OpId,
    pub op_type: OpType,
    pub entity_type: EntityType,
    pub payload: Payload,
    pub idempotency_key: IdempotencyKey,
    pub trace_id: TraceId,
    pub txn_token: Option<TxnToken>,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub status: OpStatus,
}

impl PendingOp {
    /// Construct a freshly-enqueued op. `next_attempt_at` defaults to
    /// `created_at` (immediately eligible) and `attempts` to zero, matching
    /// the invariants in §3 (`attempts ≥ 0`, `nextAttemptAt ≥ createdAt`).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: OpId,
        op_type: OpType,
        entity_type: EntityType,
        payload: Payload,
        idempotency_key: IdempotencyKey,
        trace_id: TraceId,
        txn_token: Option<TxnToken>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            op_type,
            entity_type,
            payload,
            idempotency_key,
            trace_id,
            txn_token,
            attempts: 0,
            created_at,
            next_attempt_at: Some(created_at),
            status: OpStatus::Queued,
        }
    }

    /// `true` when this op's payload identifies a single entity by id, which
    /// is the precondition for coalescing and superseding (§4.10).
    pub fn entity_id(&self) -> Option<&str> {
        self.payload.get("id").and_then(|v| v.as_str())
    }

    /// Whether the op is currently gated by backoff (§4.1 `oldest()` caller
    /// must check this before dispatch).
    pub fn is_eligible_at(&self, now: DateTime<Utc>) -> bool {
        match self.next_attempt_at {
            Some(t) => t <= now,
            None => true,
        }
    }
}

/// A terminal record moved out of the active queue (§3, "FailedOp").
///
/// `failed_at` corresponds to the spec's `createdAt` field on `FailedOp`
/// (moment of failure) — named differently here to avoid colliding with the
/// embedded op's own `created_at` (moment of original enqueue).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailedOp {
    pub op: PendingOp,
    pub error_code: String,
    pub error_message: String,
    pub archived: bool,
    pub failed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FailedOp {
    pub fn new(op: PendingOp, error_code: impl Into<String>, error_message: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            op,
            error_code: error_code.into(),
            error_message: error_message.into(),
            archived: false,
            failed_at: now,
            updated_at: now,
        }
    }
}
