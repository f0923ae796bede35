//! Op router (§4.9): translates an `(opType, entityType)` pair into the
//! concrete HTTP call the API client should make.
//!
//! Grounded on the teacher pack's `OrderRouter` — a thin, pure translation
//! layer between an internal intent (`OrderIntent`) and an external call
//! shape, with no business logic of its own. Here the "external call shape"
//! is an HTTP method + path instead of a broker call, and routes are
//! resolved from a static table instead of one `BrokerAdapter` per broker.

use syncd_schemas::{OpType, Payload, PendingOp};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpMethod {
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

/// A resolved route: where to send the op and whether it must carry an
/// `Idempotency-Key` header.
pub struct Route {
    pub method: HttpMethod,
    pub path: String,
    pub requires_idempotency: bool,
    pub transform: fn(&Payload) -> Payload,
}

/// `camelCase` -> `snake_case`, the local/wire naming convention boundary
/// (§4.9: "Field-name convention at the wire is snake_case; local convention
/// is camelCase").
fn camel_to_snake(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for (i, ch) in key.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Re-serialize any value that parses as an RFC 3339 timestamp to ISO-8601
/// UTC; anything else passes through untouched.
fn normalize_value(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) => match chrono::DateTime::parse_from_rfc3339(s) {
            Ok(dt) => serde_json::Value::String(dt.with_timezone(&chrono::Utc).to_rfc3339()),
            Err(_) => value.clone(),
        },
        _ => value.clone(),
    }
}

/// Build the outgoing body: drop keys already substituted into the path
/// (they MUST NOT reappear in the body), rename the rest to snake_case, and
/// normalize any date/time strings.
fn wire_transform(payload: &Payload, strip: &[&str]) -> Payload {
    let mut out = Payload::new();
    for (key, value) in payload.iter() {
        if strip.contains(&key.as_str()) {
            continue;
        }
        out.insert(camel_to_snake(key), normalize_value(value));
    }
    out
}

/// Routes whose path doesn't carry a substituted identifier: the full
/// (renamed, normalized) payload goes in the body.
fn transform_body(payload: &Payload) -> Payload {
    wire_transform(payload, &[])
}

/// Routes whose path already carries `{id}`: strip it from the body too.
fn transform_body_strip_id(payload: &Payload) -> Payload {
    wire_transform(payload, &["id"])
}

/// Naive english pluralization good enough for this app's fixed, known
/// entity-type vocabulary (`room` -> `rooms`, `automation` -> `automations`).
fn pluralize(entity_type: &str) -> String {
    if entity_type.ends_with('y') && !entity_type.ends_with("ay") && !entity_type.ends_with("ey") {
        format!("{}ies", &entity_type[..entity_type.len() - 1])
    } else {
        format!("{entity_type}s")
    }
}

/// Resolve the route for a pending op (§4.9).
///
/// Falls back to the default REST convention (`POST /api/v1/<plural>` for
/// create, `PUT|PATCH|DELETE /api/v1/<plural>/<id>` otherwise) for any entity
/// type not given an explicit override below, so adding a new CRUD entity
/// type never requires touching this function.
pub fn resolve_route(op: &PendingOp) -> Route {
    let entity = op.entity_type.as_str();

    match entity {
        "device-state" => Route {
            method: HttpMethod::Put,
            path: format!("/api/v1/devices/{}/state", op.entity_id().unwrap_or_default()),
            // Device-state pushes are naturally idempotent last-write-wins
            // updates; the spec exempts them from the idempotency-key
            // requirement other mutating routes carry.
            requires_idempotency: false,
            transform: transform_body_strip_id,
        },
        "heart-rate" => health_route("heart-rate"),
        "blood-pressure" => health_route("blood-pressure"),
        "fall-event" => health_route("fall-event"),
        _ => default_route(op, entity),
    }
}

fn health_route(kind: &str) -> Route {
    Route {
        method: HttpMethod::Post,
        path: format!("/api/v1/health/{kind}"),
        requires_idempotency: true,
        transform: transform_body,
    }
}

fn default_route(op: &PendingOp, entity: &str) -> Route {
    let plural = pluralize(entity);
    match op.op_type {
        OpType::Create => Route {
            method: HttpMethod::Post,
            path: format!("/api/v1/{plural}"),
            requires_idempotency: true,
            transform: transform_body,
        },
        OpType::Update => Route {
            method: HttpMethod::Put,
            path: format!("/api/v1/{plural}/{}", op.entity_id().unwrap_or_default()),
            requires_idempotency: true,
            transform: transform_body_strip_id,
        },
        OpType::Patch | OpType::Toggle => Route {
            method: HttpMethod::Patch,
            path: format!("/api/v1/{plural}/{}", op.entity_id().unwrap_or_default()),
            requires_idempotency: true,
            transform: transform_body_strip_id,
        },
        OpType::Delete => Route {
            method: HttpMethod::Delete,
            path: format!("/api/v1/{plural}/{}", op.entity_id().unwrap_or_default()),
            requires_idempotency: true,
            transform: transform_body_strip_id,
        },
        OpType::Batch => Route {
            method: HttpMethod::Post,
            path: format!("/api/v1/{plural}/batch"),
            requires_idempotency: true,
            transform: transform_body,
        },
    }
}
