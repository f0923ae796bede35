//! API client (§4.8): the only crate in the workspace that actually makes a
//! network call. Injects the headers every route needs, retries exactly
//! once on a 401 after a token refresh, and classifies every non-2xx
//! response through [`syncd_errors::SyncError`] so nothing downstream ever
//! looks at a raw status code.
//!
//! Grounded on `mqk-md::provider`'s external-boundary shape (a trait the
//! rest of the workspace depends on, one concrete `reqwest`-backed impl) and
//! the teacher daemon's habit of redacting anything printed from a request.

mod redact;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use syncd_auth::{AuthManager, TokenPair, TokenRefresher};
use syncd_errors::{parse_retry_after, RetryAfter, SyncError};
use syncd_reconcile::CurrentStateFetcher;
use syncd_router::{HttpMethod, Route};
use syncd_schemas::{EntityType, IdempotencyKey, Payload, TraceId};

const HEADER_APP_VERSION: &str = "x-app-version";
const HEADER_DEVICE_ID: &str = "x-device-id";
const HEADER_TRACE_ID: &str = "trace-id";
const HEADER_IDEMPOTENCY_KEY: &str = "idempotency-key";
const HEADER_RETRY_AFTER: &str = "Retry-After";

/// Notified with the outcome of each auth-refresh attempt the client makes
/// on a 401, so a caller can count refresh successes/failures without the
/// result having to travel back through every error path.
pub trait RefreshObserver: Send + Sync {
    fn on_refresh_attempt(&self, succeeded: bool);
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    app_version: String,
    device_id: String,
    auth: Arc<AuthManager>,
    refresh_observer: Option<Arc<dyn RefreshObserver>>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, app_version: impl Into<String>, device_id: impl Into<String>, auth: Arc<AuthManager>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            app_version: app_version.into(),
            device_id: device_id.into(),
            auth,
            refresh_observer: None,
        }
    }

    pub fn with_refresh_observer(mut self, observer: Arc<dyn RefreshObserver>) -> Self {
        self.refresh_observer = Some(observer);
        self
    }

    fn method(method: HttpMethod) -> reqwest::Method {
        match method {
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }

    async fn headers(&self, route: &Route, idempotency_key: &IdempotencyKey, trace_id: &TraceId, access_token: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = access_token {
            if let Ok(v) = HeaderValue::from_str(&format!("Bearer {token}")) {
                headers.insert(AUTHORIZATION, v);
            }
        }
        if let Ok(v) = HeaderValue::from_str(&self.app_version) {
            headers.insert(HeaderName::from_static(HEADER_APP_VERSION), v);
        }
        if let Ok(v) = HeaderValue::from_str(&self.device_id) {
            headers.insert(HeaderName::from_static(HEADER_DEVICE_ID), v);
        }
        if let Ok(v) = HeaderValue::from_str(trace_id.as_str()) {
            headers.insert(HeaderName::from_static(HEADER_TRACE_ID), v);
        }
        if route.requires_idempotency {
            if let Ok(v) = HeaderValue::from_str(idempotency_key.as_str()) {
                headers.insert(HeaderName::from_static(HEADER_IDEMPOTENCY_KEY), v);
            }
        }
        headers
    }

    /// Send one op's transformed payload to its resolved route (§4.8).
    /// Retries exactly once, after a successful token refresh, on a 401.
    pub async fn send(
        &self,
        route: &Route,
        payload: &Payload,
        idempotency_key: &IdempotencyKey,
        trace_id: &TraceId,
    ) -> Result<Payload, SyncError> {
        self.send_inner(route, payload, idempotency_key, trace_id, false).await
    }

    async fn send_inner(
        &self,
        route: &Route,
        payload: &Payload,
        idempotency_key: &IdempotencyKey,
        trace_id: &TraceId,
        is_retry_after_refresh: bool,
    ) -> Result<Payload, SyncError> {
        let access_token = self.auth.get_access_token().await.ok().flatten();
        let url = format!("{}{}", self.base_url, route.path);
        let body = serde_json::to_value((route.transform)(payload)).unwrap_or(serde_json::Value::Null);
        let headers = self.headers(route, idempotency_key, trace_id, access_token.as_deref()).await;

        tracing::debug!(
            method = Self::method(route.method).as_str(),
            url = %url,
            body = %redact::redact_body(&body.to_string()),
            "sending sync request"
        );

        let response = self
            .http
            .request(Self::method(route.method), url.as_str())
            .headers(headers)
            .json(&body)
            .send()
            .await
            .map_err(|err| network_error(&err))?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(HEADER_RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let response_trace_id = response
            .headers()
            .get(HEADER_TRACE_ID)
            .and_then(|v| v.to_str().ok())
            .map(TraceId::new)
            .unwrap_or_else(|| trace_id.clone());

        if (200..300).contains(&status) {
            let text = response.text().await.unwrap_or_default();
            return Ok(parse_success_body(&text));
        }

        let text = response.text().await.unwrap_or_default();
        tracing::warn!(status, body = %redact::redact_body(&text), "sync request failed");
        let message = extract_error_message(&text);

        if status == 401 && !is_retry_after_refresh {
            let refreshed = self.auth.try_refresh().await.unwrap_or(false);
            if let Some(observer) = &self.refresh_observer {
                observer.on_refresh_attempt(refreshed);
            }
            if refreshed {
                return Box::pin(self.send_inner(route, payload, idempotency_key, trace_id, true)).await;
            }
        }

        Err(to_sync_error(status, message, Some(response_trace_id), retry_after))
    }
}

fn network_error(err: &reqwest::Error) -> SyncError {
    use syncd_errors::NetworkErrorType;
    let kind = if err.is_timeout() {
        NetworkErrorType::Timeout
    } else if err.is_connect() {
        NetworkErrorType::ConnectionRefused
    } else {
        NetworkErrorType::Other
    };
    SyncError::Network {
        message: err.to_string(),
        trace_id: None,
        error_type: kind,
    }
}

fn to_sync_error(status: u16, message: String, trace_id: Option<TraceId>, retry_after: Option<RetryAfter>) -> SyncError {
    SyncError::from_http(status, message, trace_id, retry_after)
}

fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error")?.get("message")?.as_str().map(str::to_string))
        .unwrap_or_else(|| "request failed".to_string())
}

fn parse_success_body(body: &str) -> Payload {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.as_object().cloned())
        .unwrap_or_default()
}

fn pluralize(entity_type: &str) -> String {
    if entity_type.ends_with('y') && !entity_type.ends_with("ay") && !entity_type.ends_with("ey") {
        format!("{}ies", &entity_type[..entity_type.len() - 1])
    } else {
        format!("{entity_type}s")
    }
}

#[async_trait]
impl CurrentStateFetcher for ApiClient {
    async fn fetch_current(&self, entity_type: &EntityType, entity_id: &str) -> anyhow::Result<Option<Payload>> {
        let access_token = self.auth.get_access_token().await.ok().flatten();
        let url = format!("{}/api/v1/{}/{entity_id}", self.base_url, pluralize(entity_type.as_str()));
        let mut req = self.http.get(url.as_str()).timeout(Duration::from_secs(15));
        if let Some(token) = access_token {
            req = req.bearer_auth(token);
        }
        let response = req.send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response.error_for_status()?;
        let text = response.text().await?;
        Ok(Some(parse_success_body(&text)))
    }
}

/// Performs the refresh-token exchange on its own, independent of
/// [`ApiClient`]. Kept separate rather than implemented on `ApiClient` itself
/// because `ApiClient` already depends on `AuthManager` for its own
/// `Authorization` header — making `AuthManager` depend back on `ApiClient`
/// for refreshes would be a cycle. This is the same `reqwest` call shape,
/// just without the rest of the client's retry/redirect machinery.
pub struct HttpTokenRefresher {
    http: reqwest::Client,
    base_url: String,
}

impl HttpTokenRefresher {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self, refresh_token: &str) -> anyhow::Result<TokenPair> {
        let url = format!("{}/api/v1/auth/refresh", self.base_url);
        let body = serde_json::json!({ "refreshToken": refresh_token });
        let response = self.http.post(url.as_str()).json(&body).send().await?.error_for_status()?;
        let parsed: serde_json::Value = response.json().await?;
        let access_token = parsed
            .get("accessToken")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("refresh response missing accessToken"))?
            .to_string();
        let refresh_token = parsed
            .get("refreshToken")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("refresh response missing refreshToken"))?
            .to_string();
        Ok(TokenPair { access_token, refresh_token })
    }
}
