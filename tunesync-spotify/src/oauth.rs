//! Spotify OAuth2 token lifecycle.
//!
//! [`TokenStore`] owns the account's [`TokenState`] and performs the two grant
//! flows against the accounts service:
//!
//! 1. `authorization_code`: exchange the code the user brought back from the
//!    authorization page
//! 2. `refresh_token`: silently renew the access token before it expires
//!
//! Every grant outcome is handed to the [`TokenPersistence`] collaborator.
//! Readers always receive a copy of the state taken under the lock, never a
//! live reference, so a refresh racing with a command dispatch cannot be
//! observed half-applied.

use crate::error::{Result, SpotifyError};
use base64::{engine::general_purpose, Engine as _};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use tunesync_core::{
    Clock, Credentials, HttpRequest, HttpTransport, TokenPersistence, TokenState,
    DEFAULT_REQUEST_TIMEOUT,
};

/// Token endpoint for both grant types
pub const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

/// Page the user visits to grant access
pub const AUTHORIZE_URL: &str = "https://accounts.spotify.com/authorize";

/// Scopes needed to read playback state and send transport commands
pub const SCOPES: &str =
    "user-read-playback-state user-modify-playback-state user-read-currently-playing";

/// Placeholder written over secrets in logged responses
const REDACTED: &str = "REDACTED";

/// Token material extracted from a successful grant response
#[derive(Debug)]
struct Grant {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GrantKind {
    AuthorizationCode,
    RefreshToken,
}

/// Spotify OAuth token store
pub struct TokenStore {
    transport: Arc<dyn HttpTransport>,
    persistence: Arc<dyn TokenPersistence>,
    clock: Arc<dyn Clock>,
    redirect_uri: String,
    request_timeout: Duration,
    state: RwLock<TokenState>,
    /// Serializes grants so two expired readers don't both refresh
    grant_lock: Mutex<()>,
}

impl TokenStore {
    /// Create a token store, loading any persisted token.
    ///
    /// A persisted token that cannot be read is logged and treated as logged out.
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        persistence: Arc<dyn TokenPersistence>,
        clock: Arc<dyn Clock>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        let state = persistence.load_token().unwrap_or_else(|e| {
            warn!("Failed to load cached Spotify token, login required: {}", e);
            TokenState::default()
        });

        // A logged-in flag without a token is not usable
        let state = if state.logged_in && state.access_token.is_empty() {
            TokenState {
                logged_in: false,
                ..state
            }
        } else {
            state
        };

        Self {
            transport,
            persistence,
            clock,
            redirect_uri: redirect_uri.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            state: RwLock::new(state),
            grant_lock: Mutex::new(()),
        }
    }

    /// Set the timeout used for token endpoint requests
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Copy of the current token state
    pub async fn snapshot(&self) -> TokenState {
        self.state.read().await.clone()
    }

    /// The access token, if logged in
    pub async fn access_token(&self) -> Option<String> {
        let state = self.state.read().await;
        (state.logged_in && !state.access_token.is_empty()).then(|| state.access_token.clone())
    }

    pub async fn is_logged_in(&self) -> bool {
        self.state.read().await.logged_in
    }

    /// Build the authorization page URL for the configured client.
    ///
    /// # Errors
    ///
    /// Returns [`SpotifyError::MissingCredentials`] if no client id is available.
    pub fn authorize_url(&self) -> Result<String> {
        let credentials = self.credentials()?;
        Ok(format!(
            "{AUTHORIZE_URL}?client_id={}&response_type=code&redirect_uri={}&scope={}",
            urlencoding::encode(&credentials.client_id),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(SCOPES),
        ))
    }

    /// Exchange an authorization code for the first token pair.
    ///
    /// On failure the previous state is kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the code is empty, credentials are missing, the
    /// request fails, or the response lacks `access_token`, `refresh_token` or
    /// `expires_in`.
    pub async fn exchange_auth_code(&self, code: &str) -> Result<TokenState> {
        if code.is_empty() {
            return Err(SpotifyError::MissingGrantInput {
                what: "authorization code",
            });
        }

        let _guard = self.grant_lock.lock().await;
        info!("Exchanging Spotify authorization code for token");

        let body = format!(
            "grant_type=authorization_code&code={}&redirect_uri={}",
            urlencoding::encode(code),
            urlencoding::encode(&self.redirect_uri),
        );
        let now = self.clock.epoch_secs();
        let result = self
            .request_grant(body, GrantKind::AuthorizationCode)
            .await;

        let state = {
            let mut state = self.state.write().await;
            if let Ok(ref grant) = result {
                let mut next = state.clone();
                next.access_token.clone_from(&grant.access_token);
                if let Some(ref refresh) = grant.refresh_token {
                    next.refresh_token.clone_from(refresh);
                }
                next.expires_at = now.saturating_add(grant.expires_in);
                next.auth_code.clear();
                next.logged_in = true;
                *state = next;
            }
            state.clone()
        };
        self.persist(&state);

        result.map(|_| {
            info!("Successfully authenticated with Spotify");
            state
        })
    }

    /// Renew the access token using the refresh token.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no refresh token (no request is made), the
    /// request fails, or the response lacks `access_token` or `expires_in`.
    pub async fn refresh(&self) -> Result<TokenState> {
        let _guard = self.grant_lock.lock().await;
        self.refresh_locked().await
    }

    /// Refresh the token if it has expired at `now_epoch_secs`.
    ///
    /// # Errors
    ///
    /// Returns [`SpotifyError::NotLoggedIn`] if there is no session, or the
    /// refresh error.
    pub async fn ensure_fresh(&self, now_epoch_secs: i64) -> Result<()> {
        if !self.needs_refresh(now_epoch_secs).await? {
            return Ok(());
        }

        let _guard = self.grant_lock.lock().await;

        // Another caller may have refreshed while we waited for the lock
        if !self.needs_refresh(now_epoch_secs).await? {
            return Ok(());
        }

        info!("Refreshing Spotify token");
        self.refresh_locked().await.map(|_| ())
    }

    /// Forget the session and persist the logged-out state
    pub async fn logout(&self) {
        let _guard = self.grant_lock.lock().await;
        let state = {
            let mut state = self.state.write().await;
            *state = TokenState::default();
            state.clone()
        };
        self.persist(&state);
        info!("Logged out of Spotify");
    }

    async fn needs_refresh(&self, now_epoch_secs: i64) -> Result<bool> {
        let state = self.state.read().await;
        if !state.logged_in {
            return Err(SpotifyError::NotLoggedIn);
        }
        if state.is_expired(now_epoch_secs) {
            debug!(
                "Token expired {}s ago",
                state.seconds_until_expiry(now_epoch_secs).saturating_neg()
            );
            return Ok(true);
        }
        Ok(false)
    }

    async fn refresh_locked(&self) -> Result<TokenState> {
        let refresh_token = self.state.read().await.refresh_token.clone();
        if refresh_token.is_empty() {
            error!("Refresh token is empty!");
            let state = self.snapshot().await;
            self.persist(&state);
            return Err(SpotifyError::MissingGrantInput {
                what: "refresh token",
            });
        }

        let body = format!(
            "grant_type=refresh_token&refresh_token={}",
            urlencoding::encode(&refresh_token),
        );
        let now = self.clock.epoch_secs();
        let result = self.request_grant(body, GrantKind::RefreshToken).await;

        let state = {
            let mut state = self.state.write().await;
            match result {
                Ok(ref grant) => {
                    let mut next = state.clone();
                    next.access_token.clone_from(&grant.access_token);
                    next.expires_at = now.saturating_add(grant.expires_in);
                    next.logged_in = true;
                    // Refreshing the token can return a new refresh token
                    if let Some(ref rotated) = grant.refresh_token {
                        info!("Received a new refresh token");
                        next.refresh_token.clone_from(rotated);
                    }
                    *state = next;
                }
                Err(SpotifyError::OAuth { ref error, .. }) => {
                    // The provider explicitly refused the refresh token
                    warn!("Spotify refused token refresh ({}), login required", error);
                    state.logged_in = false;
                }
                Err(_) => {}
            }
            state.clone()
        };
        self.persist(&state);

        result.map(|_| {
            info!("Successfully renewed Spotify token");
            state
        })
    }

    fn credentials(&self) -> Result<Credentials> {
        let credentials = self.persistence.load_credentials()?;
        if credentials.is_complete() {
            Ok(credentials)
        } else {
            Err(SpotifyError::MissingCredentials)
        }
    }

    /// POST a grant and pull the token material out of the response
    async fn request_grant(&self, body: String, kind: GrantKind) -> Result<Grant> {
        let credentials = self.credentials()?;
        let basic = general_purpose::STANDARD.encode(format!(
            "{}:{}",
            credentials.client_id, credentials.client_secret
        ));

        let request = HttpRequest::post(TOKEN_URL)
            .basic(&basic)
            .form_body(body)
            .timeout(self.request_timeout);

        let response = self.transport.execute(request).await?;

        let json: Value = serde_json::from_str(&response.body).map_err(|e| {
            error!("Couldn't parse token response (HTTP {}): {}", response.status, e);
            SpotifyError::Auth {
                reason: format!("token response is not JSON: {e}"),
            }
        })?;

        debug!(
            "Spotify token response (HTTP {}): {}",
            response.status,
            redact_token_response(&json)
        );

        parse_grant(&json, kind)
    }

    fn persist(&self, state: &TokenState) {
        if let Err(e) = self.persistence.save_token(state) {
            error!("Failed to save Spotify token: {}", e);
        }
    }
}

/// Validate a token endpoint response.
fn parse_grant(json: &Value, kind: GrantKind) -> Result<Grant> {
    let access_token = json.get("access_token").and_then(Value::as_str);
    let expires_in = json.get("expires_in").and_then(|v| {
        v.as_i64()
            .or_else(|| v.as_f64().and_then(|f| format!("{f:.0}").parse().ok()))
    });
    let refresh_token = json
        .get("refresh_token")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let (Some(access_token), Some(expires_in)) = (access_token, expires_in) else {
        if let Some(error) = json.get("error").and_then(Value::as_str) {
            error!("Received error from Spotify: {}", error);
            return Err(SpotifyError::OAuth {
                error: error.to_string(),
                description: json
                    .get("error_description")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            });
        }
        error!("Couldn't parse token response: missing access_token or expires_in");
        return Err(SpotifyError::Auth {
            reason: "token response is missing access_token or expires_in".into(),
        });
    };

    if access_token.is_empty() {
        return Err(SpotifyError::Auth {
            reason: "token response has an empty access_token".into(),
        });
    }

    if kind == GrantKind::AuthorizationCode && refresh_token.is_none() {
        error!("Couldn't parse token response: missing refresh_token");
        return Err(SpotifyError::Auth {
            reason: "token response is missing refresh_token".into(),
        });
    }

    Ok(Grant {
        access_token: access_token.to_string(),
        refresh_token,
        expires_in,
    })
}

/// Render a token response for logging with secrets replaced.
#[must_use]
pub fn redact_token_response(json: &Value) -> String {
    let mut json = json.clone();
    if let Some(obj) = json.as_object_mut() {
        for key in ["access_token", "refresh_token"] {
            if let Some(value) = obj.get_mut(key) {
                if value.is_string() {
                    *value = Value::String(REDACTED.into());
                }
            }
        }
    }
    json.to_string()
}
