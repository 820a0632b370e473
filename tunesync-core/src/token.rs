//! OAuth2 client credentials and token material.

use serde::{Deserialize, Serialize};

/// Client identity used for the token endpoint's Basic authentication.
///
/// Rebuilt whenever the configured id or secret change.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
}

impl Credentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Parse an `id:secret` pair.
    #[must_use]
    pub fn from_pair(pair: &str) -> Option<Self> {
        let (id, secret) = pair.split_once(':')?;
        if id.is_empty() || secret.is_empty() {
            return None;
        }
        Some(Self::new(id, secret))
    }

    /// Use the configured pair when both halves are set, otherwise the default.
    #[must_use]
    pub fn resolve(
        client_id: Option<&str>,
        client_secret: Option<&str>,
        default: Option<Self>,
    ) -> Self {
        match (client_id, client_secret) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => {
                Self::new(id, secret)
            }
            _ => default.unwrap_or_default(),
        }
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty()
    }
}

// The secret must never show up in logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"REDACTED")
            .finish()
    }
}

/// Token material for one logged-in account.
///
/// `logged_in == true` implies a non-empty access token. An expiry in the past
/// means the token must be refreshed before use.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenState {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    /// Authorization code awaiting exchange; consumed by a successful exchange
    #[serde(default)]
    pub auth_code: String,
    /// Expiry as seconds since the Unix epoch
    #[serde(default)]
    pub expires_at: i64,
    #[serde(default)]
    pub logged_in: bool,
}

impl TokenState {
    /// Whether the access token is past its expiry at `now_epoch_secs`.
    #[must_use]
    pub const fn is_expired(&self, now_epoch_secs: i64) -> bool {
        now_epoch_secs > self.expires_at
    }

    /// Seconds until expiry (negative once expired).
    #[must_use]
    pub const fn seconds_until_expiry(&self, now_epoch_secs: i64) -> i64 {
        self.expires_at.saturating_sub(now_epoch_secs)
    }
}

impl std::fmt::Debug for TokenState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |s: &str| if s.is_empty() { "" } else { "REDACTED" };
        f.debug_struct("TokenState")
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .field("auth_code", &redact(&self.auth_code))
            .field("expires_at", &self.expires_at)
            .field("logged_in", &self.logged_in)
            .finish()
    }
}
