//! Batch coalescer (§4.10): merges a newly-enqueued op into an already-queued
//! one for the same entity where that's safe, and lets a DELETE supersede
//! whatever is still sitting unsent ahead of it.
//!
//! The diffing style — pure, deterministic, no IO, keyed on entity identity —
//! follows the teacher pack's `targets_to_order_intents`: given a set of
//! existing intents and a new one, decide what actually needs to go out
//! without ever touching the network or a clock beyond what's passed in.

use syncd_schemas::{OpId, OpStatus, PendingOp};

/// What the Pending Store should do with an incoming op once the coalescer
/// has looked at what's already queued for the same entity.
#[derive(Debug, PartialEq)]
pub enum CoalesceDecision {
    /// No related queued op exists (or the incoming op isn't coalescable/a
    /// delete) — insert it as a new entry.
    InsertNew,
    /// Merge the incoming payload into the still-queued op with this id
    /// instead of inserting a second entry.
    MergeInto(OpId),
    /// Incoming op is a DELETE for an entity whose only queued op is a CREATE
    /// that was never sent. Both cancel out: remove the CREATE, and don't
    /// enqueue the DELETE at all (there is nothing server-side to delete).
    DropCreateAndDelete { remove: Vec<OpId> },
    /// Incoming op is a DELETE that supersedes one or more queued
    /// UPDATE/PATCH/TOGGLE ops for the same entity: remove them, then the
    /// DELETE is still inserted normally.
    RemoveSupersededThenInsert { remove: Vec<OpId> },
}

/// Decide what to do with `incoming` given the ops already sitting in the
/// queue. Only considers ops that are still `Queued` — one already claimed
/// for dispatch (`Processing`) is in flight and must not be touched.
pub fn decide(existing: &[PendingOp], incoming: &PendingOp) -> CoalesceDecision {
    let entity_id = match incoming.entity_id() {
        Some(id) => id,
        None => return CoalesceDecision::InsertNew,
    };

    let related: Vec<&PendingOp> = existing
        .iter()
        .filter(|op| {
            op.status == OpStatus::Queued
                && op.entity_type == incoming.entity_type
                && op.entity_id() == Some(entity_id)
        })
        .collect();

    if incoming.op_type.is_coalescable() {
        if let Some(target) = related
            .iter()
            .find(|op| op.op_type.is_coalescable())
        {
            return CoalesceDecision::MergeInto(target.id);
        }
        return CoalesceDecision::InsertNew;
    }

    if matches!(incoming.op_type, syncd_schemas::OpType::Delete) {
        if related.is_empty() {
            return CoalesceDecision::InsertNew;
        }
        if let Some(create) = related.iter().find(|op| matches!(op.op_type, syncd_schemas::OpType::Create)) {
            let remove = related.iter().map(|op| op.id).collect();
            let _ = create;
            return CoalesceDecision::DropCreateAndDelete { remove };
        }
        let remove = related.iter().map(|op| op.id).collect();
        return CoalesceDecision::RemoveSupersededThenInsert { remove };
    }

    CoalesceDecision::InsertNew
}

/// Merge `incoming`'s payload into `target` (the still-queued op chosen by
/// [`decide`]). Newer keys win on conflict; the trace id moves to the
/// freshest caller so downstream logs point at the request that actually
/// caused the eventual network call. `id`, `createdAt`, `idempotencyKey`,
/// `attempts` and `nextAttemptAt` are all kept from `target` (§4.10) —
/// merging doesn't reset backoff progress, queue position, or the
/// idempotency key a prior send may already be cached against server-side.
pub fn merge(target: &PendingOp, incoming: &PendingOp) -> PendingOp {
    let mut merged = target.clone();
    for (k, v) in incoming.payload.iter() {
        merged.payload.insert(k.clone(), v.clone());
    }
    merged.trace_id = incoming.trace_id.clone();
    merged.txn_token = incoming.txn_token.clone();
    merged
}
