//! Token lifecycle: lock-free expiry checks and single-flight refresh.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::Utc;
use reqwest::header::HeaderMap;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::credentials::{Credentials, Endpoint};
use crate::error::Result;
use crate::retry::RetryPolicy;
use crate::upstream::ImaBackend;
use crate::upstream::wire::TokenRefreshRequest;

/// Expiry stamp meaning "no usable token".
const NO_TOKEN: i64 = i64::MIN;

/// Shared credential state for all questions of one client.
///
/// Validity checks read an atomic expiry stamp and never lock. Refreshes are
/// serialized: concurrent callers wait for the one in flight and reuse its
/// outcome.
pub struct CredentialStore {
    backend: Arc<dyn ImaBackend>,
    credentials: RwLock<Credentials>,
    /// Milliseconds since the epoch from which the token counts as expired.
    expires_at_ms: AtomicI64,
    /// Bumped on every successful refresh.
    generation: AtomicU64,
    refresh_lock: Mutex<()>,
    policy: RetryPolicy,
}

impl CredentialStore {
    pub fn new(credentials: Credentials, backend: Arc<dyn ImaBackend>) -> Self {
        Self::with_policy(credentials, backend, RetryPolicy::TOKEN_REFRESH)
    }

    pub fn with_policy(
        credentials: Credentials,
        backend: Arc<dyn ImaBackend>,
        policy: RetryPolicy,
    ) -> Self {
        let expires_at_ms = stamp(&credentials);
        Self {
            backend,
            credentials: RwLock::new(credentials),
            expires_at_ms: AtomicI64::new(expires_at_ms),
            generation: AtomicU64::new(0),
            refresh_lock: Mutex::new(()),
            policy,
        }
    }

    /// Whether the current token must be refreshed before use.
    pub fn is_expired(&self) -> bool {
        let expires_at = self.expires_at_ms.load(Ordering::Acquire);
        expires_at == NO_TOKEN || Utc::now().timestamp_millis() >= expires_at
    }

    /// Number of successful refreshes so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Make sure a valid token is available, refreshing if needed.
    ///
    /// Returns `true` without any network call while the token is valid.
    pub async fn ensure_valid(&self) -> bool {
        if !self.is_expired() {
            return true;
        }

        let _guard = self.refresh_lock.lock().await;
        if !self.is_expired() {
            debug!("Token refreshed by another caller");
            return true;
        }
        self.refresh_locked().await
    }

    /// Refresh regardless of expiry, e.g. after the vendor rejected the token.
    ///
    /// A refresh that completed while this call waited for the lock is reused.
    pub async fn force_refresh(&self) -> bool {
        let seen = self.generation();

        let _guard = self.refresh_lock.lock().await;
        if self.generation() != seen && !self.is_expired() {
            debug!("Reusing token from concurrent refresh");
            return true;
        }
        self.refresh_locked().await
    }

    /// Headers for `endpoint` using the current token.
    pub async fn headers(&self, endpoint: Endpoint) -> Result<HeaderMap> {
        self.credentials.read().await.headers(endpoint)
    }

    /// Copy of the current credentials.
    pub async fn snapshot(&self) -> Credentials {
        self.credentials.read().await.clone()
    }

    /// Refresh with the lock held.
    async fn refresh_locked(&self) -> bool {
        info!("Refreshing token");

        let (user_id, refresh_token, headers) = {
            let mut creds = self.credentials.write().await;
            let (Some(user_id), Some(refresh_token)) =
                (creds.resolve_user_id(), creds.resolve_refresh_token())
            else {
                warn!("Cannot refresh token: user id or refresh token missing from cookies");
                return false;
            };
            creds.user_id = Some(user_id.clone());
            creds.refresh_token = Some(refresh_token.clone());

            match creds.headers(Endpoint::TokenRefresh) {
                Ok(headers) => (user_id, refresh_token, headers),
                Err(e) => {
                    warn!(error = %e, "Cannot build refresh headers");
                    return false;
                }
            }
        };

        let request = TokenRefreshRequest::new(user_id, refresh_token);
        let result = self
            .policy
            .run("token_refresh", || {
                self.backend.refresh_token(headers.clone(), &request)
            })
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Token refresh failed");
                return false;
            }
        };

        let token = match response.token {
            Some(token) if response.code == 0 && !token.is_empty() => token,
            _ => {
                warn!(
                    code = response.code,
                    msg = %response.msg,
                    "Token refresh rejected"
                );
                return false;
            }
        };

        let mut creds = self.credentials.write().await;
        creds.apply_refresh(token, response.token_valid_time, Utc::now());
        self.expires_at_ms.store(stamp(&creds), Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel);
        info!(ttl_secs = creds.ttl_secs, "Token refreshed");
        true
    }
}

fn stamp(credentials: &Credentials) -> i64 {
    credentials
        .expires_at()
        .map(|t| t.timestamp_millis())
        .unwrap_or(NO_TOKEN)
}
