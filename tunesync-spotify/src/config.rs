//! Spotify provider configuration.

use const_format::concatcp;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tunesync_core::{CoreError, Credentials, ProvidersConfig};

/// Provider name used in config file
pub const PROVIDER_NAME: &str = "spotify";

/// File name of the token cache under the config directory
pub const SPOTIFY_TOKEN_CACHE_FILE_NAME: &str = ".spotify_token.json";

/// Default OAuth redirect URI
pub const DEFAULT_REDIRECT_URI: &str = "http://127.0.0.1:8888/callback";

const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 1000;

/// Client credentials baked in at build time as `id:secret`
const COMPILED_IN_CREDENTIALS: Option<&str> = option_env!("TUNESYNC_SPOTIFY_CREDENTIALS");

/// Spotify-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotifyProviderConfig {
    /// Spotify OAuth client ID override
    #[serde(default)]
    pub client_id: Option<String>,
    /// Spotify OAuth client secret override
    #[serde(default)]
    pub client_secret: Option<String>,
    /// OAuth redirect URI
    #[serde(default = "default_redirect_uri")]
    pub oauth_redirect_uri: String,
    /// Polling interval in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Timeout for every Spotify request in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

fn default_redirect_uri() -> String {
    DEFAULT_REDIRECT_URI.into()
}

const fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

const fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

impl Default for SpotifyProviderConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            oauth_redirect_uri: default_redirect_uri(),
            poll_interval_ms: default_poll_interval(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

impl SpotifyProviderConfig {
    /// Extract Spotify config from the dynamic providers config.
    ///
    /// A missing section yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the section exists but cannot be parsed.
    pub fn from_providers(providers: &ProvidersConfig) -> Result<Self, CoreError> {
        Ok(providers.get(PROVIDER_NAME)?.unwrap_or_default())
    }

    /// Validate field values.
    ///
    /// # Errors
    ///
    /// Returns an error if an interval is zero or the redirect URI is not a URL.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.poll_interval_ms == 0 {
            return Err(CoreError::ConfigInvalid {
                message: "providers.spotify.poll_interval_ms must be greater than 0".into(),
            });
        }
        if self.request_timeout_ms == 0 {
            return Err(CoreError::ConfigInvalid {
                message: "providers.spotify.request_timeout_ms must be greater than 0".into(),
            });
        }
        if let Err(e) = url::Url::parse(&self.oauth_redirect_uri) {
            return Err(CoreError::ConfigInvalid {
                message: format!("providers.spotify.oauth_redirect_uri: {e}"),
            });
        }
        Ok(())
    }

    /// Client credentials: the configured pair if complete, else the compiled-in default.
    #[must_use]
    pub fn credentials(&self) -> Credentials {
        Credentials::resolve(
            self.client_id.as_deref(),
            self.client_secret.as_deref(),
            COMPILED_IN_CREDENTIALS.and_then(Credentials::from_pair),
        )
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Config template for Spotify provider.
/// This is appended to the base config template when creating a new config file.
pub const CONFIG_TEMPLATE: &str = concatcp!(
    r#"[providers.spotify]
# Optional: your own app from https://developer.spotify.com/dashboard
# Leave empty to use the built-in client
client_id = ""
client_secret = ""
oauth_redirect_uri = ""#,
    DEFAULT_REDIRECT_URI,
    "\"\npoll_interval_ms = ",
    DEFAULT_POLL_INTERVAL_MS,
    "\nrequest_timeout_ms = ",
    DEFAULT_REQUEST_TIMEOUT_MS,
    "\n\n"
);
