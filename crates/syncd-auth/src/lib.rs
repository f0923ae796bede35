//! Authentication state (§4.8's `getAccessToken`/`tryRefresh` contract).
//!
//! The access token is handed to the API client on every request; once it's
//! rejected with 401 the engine calls `try_refresh` exactly once before
//! retrying. Concurrent callers hitting 401 at the same time must not each
//! fire their own refresh request — `try_refresh` is serialized through a
//! single-flight mutex, following the same external-token-provider boundary
//! shape as the market-data `Provider` trait: an async trait object the
//! engine depends on without knowing which backend implements it.
use std::sync::Arc;

use async_trait::async_trait;
use syncd_kv::SecureStore;

const ACCESS_TOKEN_NAME: &str = "access_token";
const REFRESH_TOKEN_NAME: &str = "refresh_token";

/// A fresh token pair returned by a successful refresh.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// The remote call that exchanges a refresh token for a new token pair.
/// Implemented by `syncd-http` against the real auth endpoint; tests supply
/// a stub.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> anyhow::Result<TokenPair>;
}

pub struct AuthManager {
    store: Arc<dyn SecureStore>,
    refresher: Arc<dyn TokenRefresher>,
    /// Serializes concurrent `try_refresh` calls so only one refresh request
    /// is ever in flight; everyone else just waits for it and rereads the
    /// (by-then-updated) access token.
    refresh_lock: tokio::sync::Mutex<()>,
}

impl AuthManager {
    pub fn new(store: Arc<dyn SecureStore>, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            store,
            refresher,
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub async fn get_access_token(&self) -> anyhow::Result<Option<String>> {
        self.store.get_token(ACCESS_TOKEN_NAME).await
    }

    pub async fn is_authenticated(&self) -> anyhow::Result<bool> {
        Ok(self.get_access_token().await?.is_some())
    }

    /// Store a freshly-obtained token pair (e.g. after interactive login).
    pub async fn set_tokens(&self, tokens: TokenPair) -> anyhow::Result<()> {
        self.store.set_token(ACCESS_TOKEN_NAME, &tokens.access_token).await?;
        self.store
            .set_token(REFRESH_TOKEN_NAME, &tokens.refresh_token)
            .await?;
        Ok(())
    }

    /// Exchange the stored refresh token for a new access token. Serialized:
    /// if a refresh is already underway, this waits for it rather than
    /// firing a second request, then returns the winner's result.
    pub async fn try_refresh(&self) -> anyhow::Result<bool> {
        let _guard = self.refresh_lock.lock().await;

        let refresh_token = match self.store.get_token(REFRESH_TOKEN_NAME).await? {
            Some(t) => t,
            None => {
                tracing::warn!("try_refresh called with no refresh token stored");
                return Ok(false);
            }
        };

        match self.refresher.refresh(&refresh_token).await {
            Ok(pair) => {
                self.set_tokens(pair).await?;
                Ok(true)
            }
            Err(err) => {
                tracing::warn!(error = %err, "token refresh failed");
                Ok(false)
            }
        }
    }

    /// Drop both tokens (logout, or refresh-token itself rejected).
    pub async fn clear_tokens(&self) -> anyhow::Result<()> {
        self.store.clear_token(ACCESS_TOKEN_NAME).await?;
        self.store.clear_token(REFRESH_TOKEN_NAME).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use syncd_kv::MemoryStore;

    struct CountingRefresher {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl TokenRefresher for CountingRefresher {
        async fn refresh(&self, refresh_token: &str) -> anyhow::Result<TokenPair> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("refresh token rejected");
            }
            Ok(TokenPair {
                access_token: format!("new-access-for-{refresh_token}"),
                refresh_token: "new-refresh".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn not_authenticated_with_no_tokens() {
        let auth = AuthManager::new(
            MemoryStore::new(),
            Arc::new(CountingRefresher { calls: AtomicUsize::new(0), fail: false }),
        );
        assert!(!auth.is_authenticated().await.unwrap());
    }

    #[tokio::test]
    async fn refresh_replaces_access_token() {
        let refresher = Arc::new(CountingRefresher { calls: AtomicUsize::new(0), fail: false });
        let auth = AuthManager::new(MemoryStore::new(), refresher.clone());
        auth.set_tokens(TokenPair {
            access_token: "old".into(),
            refresh_token: "rt-1".into(),
        })
        .await
        .unwrap();

        let ok = auth.try_refresh().await.unwrap();
        assert!(ok);
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            auth.get_access_token().await.unwrap(),
            Some("new-access-for-rt-1".to_string())
        );
    }

    #[tokio::test]
    async fn failed_refresh_leaves_tokens_untouched() {
        let refresher = Arc::new(CountingRefresher { calls: AtomicUsize::new(0), fail: true });
        let auth = AuthManager::new(MemoryStore::new(), refresher);
        auth.set_tokens(TokenPair {
            access_token: "old".into(),
            refresh_token: "rt-1".into(),
        })
        .await
        .unwrap();

        let ok = auth.try_refresh().await.unwrap();
        assert!(!ok);
        assert_eq!(auth.get_access_token().await.unwrap(), Some("old".to_string()));
    }

    #[tokio::test]
    async fn clear_tokens_deauthenticates() {
        let auth = AuthManager::new(
            MemoryStore::new(),
            Arc::new(CountingRefresher { calls: AtomicUsize::new(0), fail: false }),
        );
        auth.set_tokens(TokenPair {
            access_token: "a".into(),
            refresh_token: "r".into(),
        })
        .await
        .unwrap();
        auth.clear_tokens().await.unwrap();
        assert!(!auth.is_authenticated().await.unwrap());
    }
}
