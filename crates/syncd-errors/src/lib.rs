//! The closed error taxonomy every HTTP/network failure is translated into
//! (§4.7). Nothing downstream of the API client should ever branch on a raw
//! status code again — branch on these variants instead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use syncd_schemas::TraceId;

/// Evidence carried by [`SyncError::Network`] describing which kind of
/// transport failure occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkErrorType {
    ConnectionRefused,
    Dns,
    Tls,
    Timeout,
    Other,
}

/// The closed set of classified failures (§4.7). Every variant carries
/// `message` and optionally `http_status`/`trace_id`; variant-specific fields
/// hold the detail the spec names for that row of the table.
#[derive(Clone, Debug, Error, Serialize, Deserialize)]
pub enum SyncError {
    #[error("validation failed: {message}")]
    Validation {
        message: String,
        http_status: Option<u16>,
        trace_id: Option<TraceId>,
        field: Option<String>,
        constraint: Option<String>,
    },

    #[error("unauthorized: {message}")]
    Unauthorized {
        message: String,
        http_status: Option<u16>,
        trace_id: Option<TraceId>,
    },

    #[error("permission denied: {message}")]
    PermissionDenied {
        message: String,
        http_status: Option<u16>,
        trace_id: Option<TraceId>,
        required_permission: Option<String>,
    },

    #[error("resource not found: {message}")]
    ResourceNotFound {
        message: String,
        http_status: Option<u16>,
        trace_id: Option<TraceId>,
        resource_type: String,
        resource_id: String,
    },

    #[error("conflict: {message}")]
    Conflict {
        message: String,
        http_status: Option<u16>,
        trace_id: Option<TraceId>,
        conflict_type: String,
        server_version: Option<String>,
        client_version: Option<String>,
    },

    #[error("precondition failed: {message}")]
    PreconditionFailed {
        message: String,
        http_status: Option<u16>,
        trace_id: Option<TraceId>,
        current_etag: Option<String>,
        provided_etag: Option<String>,
    },

    #[error("client version rejected: {message}")]
    ClientVersion {
        message: String,
        http_status: Option<u16>,
        trace_id: Option<TraceId>,
        minimum_version: String,
        current_version: String,
    },

    #[error("rate limited: {message}")]
    RateLimit {
        message: String,
        http_status: Option<u16>,
        trace_id: Option<TraceId>,
        retry_after: Option<RetryAfter>,
        limit: Option<u32>,
        window: Option<String>,
        reset_at: Option<DateTime<Utc>>,
    },

    #[error("server error: {message}")]
    Server {
        message: String,
        http_status: Option<u16>,
        trace_id: Option<TraceId>,
    },

    #[error("service unavailable: {message}")]
    ServiceUnavailable {
        message: String,
        http_status: Option<u16>,
        trace_id: Option<TraceId>,
        retry_after: Option<RetryAfter>,
    },

    #[error("timeout: {message}")]
    Timeout {
        message: String,
        http_status: Option<u16>,
        trace_id: Option<TraceId>,
    },

    #[error("network error ({error_type:?}): {message}")]
    Network {
        message: String,
        trace_id: Option<TraceId>,
        error_type: NetworkErrorType,
    },
}

/// A parsed `Retry-After` value (§6: "accepts both integer seconds and
/// absolute HTTP dates").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryAfter {
    Seconds(u64),
    At(DateTime<Utc>),
}

impl RetryAfter {
    /// Resolve to a concrete delay from `now`. Past/invalid absolute times
    /// clamp to zero rather than producing a negative delay.
    pub fn as_duration_from(&self, now: DateTime<Utc>) -> std::time::Duration {
        match self {
            RetryAfter::Seconds(s) => std::time::Duration::from_secs(*s),
            RetryAfter::At(at) => {
                let delta = *at - now;
                std::time::Duration::from_millis(delta.num_milliseconds().max(0) as u64)
            }
        }
    }
}

/// Parse a `Retry-After` header value: either an integer number of seconds
/// or an HTTP-date (RFC 2822-compatible `IMF-fixdate`).
pub fn parse_retry_after(raw: &str) -> Option<RetryAfter> {
    let trimmed = raw.trim();
    if let Ok(secs) = trimmed.parse::<u64>() {
        return Some(RetryAfter::Seconds(secs));
    }
    DateTime::parse_from_rfc2822(trimmed)
        .ok()
        .map(|dt| RetryAfter::At(dt.with_timezone(&Utc)))
}

impl SyncError {
    pub fn http_status(&self) -> Option<u16> {
        match self {
            SyncError::Validation { http_status, .. }
            | SyncError::Unauthorized { http_status, .. }
            | SyncError::PermissionDenied { http_status, .. }
            | SyncError::ResourceNotFound { http_status, .. }
            | SyncError::Conflict { http_status, .. }
            | SyncError::PreconditionFailed { http_status, .. }
            | SyncError::ClientVersion { http_status, .. }
            | SyncError::RateLimit { http_status, .. }
            | SyncError::Server { http_status, .. }
            | SyncError::ServiceUnavailable { http_status, .. }
            | SyncError::Timeout { http_status, .. } => *http_status,
            SyncError::Network { .. } => None,
        }
    }

    pub fn trace_id(&self) -> Option<&TraceId> {
        match self {
            SyncError::Validation { trace_id, .. }
            | SyncError::Unauthorized { trace_id, .. }
            | SyncError::PermissionDenied { trace_id, .. }
            | SyncError::ResourceNotFound { trace_id, .. }
            | SyncError::Conflict { trace_id, .. }
            | SyncError::PreconditionFailed { trace_id, .. }
            | SyncError::ClientVersion { trace_id, .. }
            | SyncError::RateLimit { trace_id, .. }
            | SyncError::Server { trace_id, .. }
            | SyncError::ServiceUnavailable { trace_id, .. }
            | SyncError::Timeout { trace_id, .. }
            | SyncError::Network { trace_id, .. } => trace_id.as_ref(),
        }
    }

    /// §4.7's Retryable column. `Unauthorized` and `Conflict` are "special" /
    /// "no (reconcile)" respectively — neither is a plain retry, so both
    /// report `false` here; the engine routes them through dedicated paths
    /// (auth refresh, conflict resolver) instead of the backoff retry loop.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::RateLimit { .. }
                | SyncError::Server { .. }
                | SyncError::ServiceUnavailable { .. }
                | SyncError::Timeout { .. }
                | SyncError::Network { .. }
        )
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, SyncError::Unauthorized { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, SyncError::Conflict { .. })
    }

    /// §4.11: a 404/410 on a delete/update path is handed to the conflict
    /// resolver alongside true 409s, so the engine needs to recognise both.
    pub fn is_conflict_or_not_found(&self) -> bool {
        self.is_conflict() || matches!(self, SyncError::ResourceNotFound { .. })
    }

    pub fn retry_after(&self) -> Option<RetryAfter> {
        match self {
            SyncError::RateLimit { retry_after, .. } => *retry_after,
            SyncError::ServiceUnavailable { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Map an HTTP status (plus the server's structured error envelope) to
    /// the closed taxonomy. `code` is the server's `error.code` string (used
    /// to distinguish conflict sub-kinds before the conflict resolver runs);
    /// unrecognised codes fall back to a status-only classification.
    pub fn from_http(
        status: u16,
        message: impl Into<String>,
        trace_id: Option<TraceId>,
        retry_after: Option<RetryAfter>,
    ) -> SyncError {
        let message = message.into();
        match status {
            400 | 415 | 422 => SyncError::Validation {
                message,
                http_status: Some(status),
                trace_id,
                field: None,
                constraint: None,
            },
            401 => SyncError::Unauthorized {
                message,
                http_status: Some(status),
                trace_id,
            },
            403 => SyncError::PermissionDenied {
                message,
                http_status: Some(status),
                trace_id,
                required_permission: None,
            },
            // 410 Gone is treated the same as 404 here: both mean the
            // resource the conflict resolver needs to reconcile against no
            // longer exists server-side.
            404 | 410 => SyncError::ResourceNotFound {
                message,
                http_status: Some(status),
                trace_id,
                resource_type: String::new(),
                resource_id: String::new(),
            },
            409 => SyncError::Conflict {
                message,
                http_status: Some(status),
                trace_id,
                conflict_type: String::new(),
                server_version: None,
                client_version: None,
            },
            412 => SyncError::PreconditionFailed {
                message,
                http_status: Some(status),
                trace_id,
                current_etag: None,
                provided_etag: None,
            },
            426 => SyncError::ClientVersion {
                message,
                http_status: Some(status),
                trace_id,
                minimum_version: String::new(),
                current_version: String::new(),
            },
            429 => SyncError::RateLimit {
                message,
                http_status: Some(status),
                trace_id,
                retry_after,
                limit: None,
                window: None,
                reset_at: None,
            },
            503 => SyncError::ServiceUnavailable {
                message,
                http_status: Some(status),
                trace_id,
                retry_after,
            },
            504 => SyncError::Timeout {
                message,
                http_status: Some(status),
                trace_id,
            },
            500..=599 => SyncError::Server {
                message,
                http_status: Some(status),
                trace_id,
            },
            _ => SyncError::Server {
                message,
                http_status: Some(status),
                trace_id,
            },
        }
    }
}
