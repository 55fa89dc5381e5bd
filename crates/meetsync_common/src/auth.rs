// --- File: crates/meetsync_common/src/auth.rs ---
//! Token lifecycle for OAuth backed providers.
//!
//! A token is a plain value. Refreshing produces a new value, which the
//! [`TokenManager`] persists to the connected-calendar record before it is
//! handed to the adapter, so no request ever leaves with a token known to be
//! expiring.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{MeetsyncError, MeetsyncResult};
use crate::models::{CalendarProvider, OAuthCredentialPayload};
use crate::store::ConnectedCalendarStore;

/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

#[derive(Debug, Clone, PartialEq)]
pub struct OAuthToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub scope: Option<String>,
    pub token_type: Option<String>,
}

impl OAuthToken {
    pub fn from_payload(payload: &OAuthCredentialPayload) -> MeetsyncResult<Self> {
        let expires_at = Utc
            .timestamp_millis_opt(payload.expiry_date)
            .single()
            .ok_or_else(|| {
                MeetsyncError::Parse(format!("invalid expiry_date {}", payload.expiry_date))
            })?;
        Ok(Self {
            access_token: payload.access_token.clone(),
            refresh_token: payload.refresh_token.clone(),
            expires_at,
            scope: payload.scope.clone(),
            token_type: payload.token_type.clone(),
        })
    }

    pub fn to_payload(&self, email: Option<String>) -> OAuthCredentialPayload {
        OAuthCredentialPayload {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            scope: self.scope.clone(),
            token_type: self.token_type.clone(),
            expiry_date: self.expires_at.timestamp_millis(),
            email,
        }
    }
}

/// True when the token expires within `threshold` of `now`.
pub fn is_expiring(token: &OAuthToken, now: DateTime<Utc>, threshold: Duration) -> bool {
    token.expires_at - threshold <= now
}

/// Exchanges a token for a fresh one.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, token: &OAuthToken) -> MeetsyncResult<OAuthToken>;
}

/// Writes a refreshed token back to durable storage.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenPersister: Send + Sync {
    async fn persist(&self, token: &OAuthToken) -> MeetsyncResult<()>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
    scope: Option<String>,
    token_type: Option<String>,
}

/// OAuth2 `refresh_token` grant, posted as `application/x-www-form-urlencoded`.
/// Works for Google and the Microsoft identity platform.
pub struct OAuthRefresher {
    http: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    scope: Option<String>,
}

impl OAuthRefresher {
    pub fn new(
        http: Client,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            http,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope: None,
        }
    }

    /// Microsoft expects the scope to be repeated on refresh.
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }
}

#[async_trait]
impl TokenRefresher for OAuthRefresher {
    async fn refresh(&self, token: &OAuthToken) -> MeetsyncResult<OAuthToken> {
        let refresh_token = token.refresh_token.as_deref().ok_or_else(|| {
            MeetsyncError::TokenRefresh("credential has no refresh token".to_string())
        })?;

        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        if let Some(scope) = &self.scope {
            form.push(("scope", scope.as_str()));
        }

        let response = self
            .http
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| MeetsyncError::TokenRefresh(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MeetsyncError::TokenRefresh(format!(
                "token endpoint answered {}: {}",
                status, body
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| MeetsyncError::TokenRefresh(format!("invalid token response: {}", e)))?;

        let expires_in = body.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        Ok(OAuthToken {
            access_token: body.access_token,
            // Google only returns a refresh token on the first consent
            refresh_token: body.refresh_token.or_else(|| token.refresh_token.clone()),
            expires_at: Utc::now() + Duration::seconds(expires_in),
            scope: body.scope.or_else(|| token.scope.clone()),
            token_type: body.token_type.or_else(|| token.token_type.clone()),
        })
    }
}

/// Persists refreshed tokens into the connected-calendar record.
pub struct ConnectedCalendarTokenPersister {
    store: Arc<dyn ConnectedCalendarStore>,
    account_address: String,
    email: String,
    provider: CalendarProvider,
}

impl ConnectedCalendarTokenPersister {
    pub fn new(
        store: Arc<dyn ConnectedCalendarStore>,
        account_address: impl Into<String>,
        email: impl Into<String>,
        provider: CalendarProvider,
    ) -> Self {
        Self {
            store,
            account_address: account_address.into(),
            email: email.into(),
            provider,
        }
    }
}

#[async_trait]
impl TokenPersister for ConnectedCalendarTokenPersister {
    async fn persist(&self, token: &OAuthToken) -> MeetsyncResult<()> {
        // The Office 365 payload keeps the derived account email alongside the token
        let email = match self.provider {
            CalendarProvider::Office365 => Some(self.email.clone()),
            _ => None,
        };
        let payload = serde_json::to_value(token.to_payload(email))?;
        self.store
            .update_credential_payload(&self.account_address, &self.email, self.provider, payload)
            .await
    }
}

/// Owns the current token of one connected calendar.
///
/// Callers on the same manager serialise on an async mutex while a refresh
/// is in flight, so one expiry triggers exactly one refresh and one persist.
pub struct TokenManager {
    current: Mutex<OAuthToken>,
    refresher: Arc<dyn TokenRefresher>,
    persister: Arc<dyn TokenPersister>,
    threshold: Duration,
}

impl TokenManager {
    pub fn new(
        token: OAuthToken,
        refresher: Arc<dyn TokenRefresher>,
        persister: Arc<dyn TokenPersister>,
        threshold: Duration,
    ) -> Self {
        Self {
            current: Mutex::new(token),
            refresher,
            persister,
            threshold,
        }
    }

    /// A usable access token, refreshed and persisted first when the cached
    /// one is expiring. A failed refresh is returned as is; there is no retry.
    pub async fn access_token(&self) -> MeetsyncResult<String> {
        let mut current = self.current.lock().await;
        if !is_expiring(&current, Utc::now(), self.threshold) {
            return Ok(current.access_token.clone());
        }

        debug!("access token expires at {}, refreshing", current.expires_at);
        let refreshed = self.refresher.refresh(&current).await?;
        self.persister.persist(&refreshed).await?;
        info!("access token refreshed, valid until {}", refreshed.expires_at);

        let access_token = refreshed.access_token.clone();
        *current = refreshed;
        Ok(access_token)
    }

    /// Snapshot of the token currently held.
    pub async fn current(&self) -> OAuthToken {
        self.current.lock().await.clone()
    }
}
