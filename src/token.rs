//! Access/refresh token cache with transparent renewal.
use std::fmt;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::{Error, Result};
use crate::gateway::Gateway;

pub const REFRESH_PATH: &str = "/auth/token/refresh";

/// Opaque bearer token with its expiry as sent by the Service.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiToken {
    pub token: String,
    /// RFC 3339 timestamp.
    pub valid_until: String,
}

impl ApiToken {
    pub fn new(token: impl Into<String>, valid_until: OffsetDateTime) -> Self {
        Self {
            token: token.into(),
            valid_until: valid_until.format(&Rfc3339).unwrap_or_default(),
        }
    }

    pub fn expires_at(&self) -> Option<OffsetDateTime> {
        OffsetDateTime::parse(self.valid_until.trim(), &Rfc3339).ok()
    }

    /// Missing or unparseable expiries count as expired.
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        match self.expires_at() {
            Some(expiry) => now >= expiry,
            None => true,
        }
    }

    fn is_present(&self) -> bool {
        !self.token.is_empty()
    }
}

impl fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiToken")
            .field("token", &"<redacted>")
            .field("valid_until", &self.valid_until)
            .finish()
    }
}

/// Result of a successful authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: ApiToken,
    pub refresh_token: ApiToken,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: Option<ApiToken>,
}

#[derive(Debug, Default)]
struct TokenState {
    access: Option<ApiToken>,
    refresh: Option<ApiToken>,
}

/// Cached tokens of one authenticated client.
///
/// The lock is held across the whole read-check-renew sequence, so
/// concurrent callers never refresh twice for the same expiry.
#[derive(Debug, Default)]
pub struct TokenManager {
    state: Mutex<TokenState>,
}

impl TokenManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(pair: TokenPair) -> Self {
        let manager = Self::new();
        manager.store(pair);
        manager
    }

    /// Replace both cached tokens.
    pub fn store(&self, pair: TokenPair) {
        let mut state = self.lock();
        state.access = Some(pair.access_token);
        state.refresh = Some(pair.refresh_token);
    }

    pub fn clear(&self) {
        *self.lock() = TokenState::default();
    }

    pub fn is_authenticated(&self) -> bool {
        let state = self.lock();
        state.access.as_ref().is_some_and(ApiToken::is_present)
            || state.refresh.as_ref().is_some_and(ApiToken::is_present)
    }

    /// A valid access token, renewing it with the refresh token if needed.
    pub fn access_token(&self, gateway: &Gateway, now: OffsetDateTime) -> Result<String> {
        let mut state = self.lock();

        if let Some(access) = state.access.as_ref().filter(|t| t.is_present()) {
            if !access.is_expired(now) {
                return Ok(access.token.clone());
            }
        }

        let refresh = match state.refresh.as_ref().filter(|t| t.is_present()) {
            None => {
                tracing::warn!("access token expired and no refresh token is cached");
                return Err(Error::ReauthenticationRequired("refresh token not available"));
            }
            Some(refresh) if refresh.is_expired(now) => {
                tracing::warn!(valid_until = %refresh.valid_until, "refresh token expired");
                return Err(Error::ReauthenticationRequired("refresh token expired"));
            }
            Some(refresh) => refresh.token.clone(),
        };

        let response: RefreshResponse =
            gateway.send_json(gateway.post(REFRESH_PATH).with_bearer(&refresh))?;
        let access = response
            .access_token
            .filter(ApiToken::is_present)
            .ok_or(Error::MissingToken("access token"))?;
        tracing::info!(valid_until = %access.valid_until, "access token renewed");

        let token = access.token.clone();
        state.access = Some(access);
        Ok(token)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TokenState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
