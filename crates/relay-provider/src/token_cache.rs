//! OAuth2 access-token cache for proxied back-ends.
//!
//! Tokens are keyed by `(client_id, refresh_token)`. Each key has its own
//! async lock, so concurrent callers that find an expired token wait on one
//! in-flight refresh instead of each hitting the token endpoint.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use relay_core::{current_unix_timestamp_ms, is_expired_with_margin_ms, lock_or_recover};
use serde::Deserialize;

use crate::ProviderError;

type ClockFn = Arc<dyn Fn() -> u64 + Send + Sync>;
type EntryKey = (String, String);

pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const TOKEN_SAFETY_MARGIN_MS: u64 = 60_000;
const DEFAULT_EXPIRES_IN_SECS: u64 = 3_600;

#[derive(Clone, PartialEq, Eq)]
pub struct OAuthClientCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

impl std::fmt::Debug for OAuthClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_unix_ms: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
}

pub struct AccessTokenCache {
    http: reqwest::Client,
    token_url: String,
    clock: ClockFn,
    entries: Mutex<HashMap<EntryKey, Arc<tokio::sync::Mutex<Option<CachedToken>>>>>,
}

impl std::fmt::Debug for AccessTokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessTokenCache")
            .field("token_url", &self.token_url)
            .field("entries", &lock_or_recover(&self.entries).len())
            .finish()
    }
}

impl AccessTokenCache {
    pub fn new(token_url: impl Into<String>, timeout_ms: u64) -> Result<Self, ProviderError> {
        Self::with_clock(token_url, timeout_ms, Arc::new(current_unix_timestamp_ms))
    }

    pub fn with_clock(
        token_url: impl Into<String>,
        timeout_ms: u64,
        clock: ClockFn,
    ) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms.max(1)))
            .build()
            .map_err(|error| ProviderError::Unavailable(format!("token client: {error}")))?;
        Ok(Self {
            http,
            token_url: token_url.into(),
            clock,
            entries: Mutex::new(HashMap::new()),
        })
    }

    fn entry(&self, credentials: &OAuthClientCredentials) -> Arc<tokio::sync::Mutex<Option<CachedToken>>> {
        let key = (
            credentials.client_id.clone(),
            credentials.refresh_token.clone(),
        );
        Arc::clone(lock_or_recover(&self.entries).entry(key).or_default())
    }

    /// Returns a bearer token that stays valid for at least the safety margin,
    /// refreshing it first when needed.
    pub async fn get_token(&self, credentials: &OAuthClientCredentials) -> Result<String, ProviderError> {
        let entry = self.entry(credentials);
        let mut cached = entry.lock().await;
        let now_ms = (self.clock)();
        if let Some(token) = cached.as_ref() {
            if !is_expired_with_margin_ms(Some(token.expires_unix_ms), now_ms, TOKEN_SAFETY_MARGIN_MS) {
                return Ok(token.value.clone());
            }
        }
        let token = self.exchange(credentials).await?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    /// Discards any cached token and performs a refresh. A failed refresh
    /// keeps the previous entry.
    pub async fn force_refresh(&self, credentials: &OAuthClientCredentials) -> Result<String, ProviderError> {
        let entry = self.entry(credentials);
        let mut cached = entry.lock().await;
        let token = self.exchange(credentials).await?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    async fn exchange(&self, credentials: &OAuthClientCredentials) -> Result<CachedToken, ProviderError> {
        let form = [
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
            ("refresh_token", credentials.refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ];
        let response = self
            .http
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|error| {
                tracing::warn!(client_id = %credentials.client_id, %error, "token refresh request failed");
                ProviderError::Authentication(format!("token refresh request failed: {error}"))
            })?;
        let status = response.status();
        if !status.is_success() {
            tracing::warn!(
                client_id = %credentials.client_id,
                status = status.as_u16(),
                "token endpoint rejected refresh"
            );
            return Err(ProviderError::Authentication(format!(
                "token endpoint returned status {}",
                status.as_u16()
            )));
        }
        let parsed: TokenResponse = response.json().await.map_err(|error| {
            ProviderError::Authentication(format!("token response was not valid JSON: {error}"))
        })?;
        let value = parsed
            .access_token
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                ProviderError::Authentication("token response did not contain an access_token".to_string())
            })?;
        let expires_in_secs = parsed.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        let expires_unix_ms = (self.clock)().saturating_add(expires_in_secs.saturating_mul(1_000));
        tracing::info!(
            client_id = %credentials.client_id,
            expires_in_secs,
            "refreshed oauth access token"
        );
        Ok(CachedToken {
            value,
            expires_unix_ms,
        })
    }
}
