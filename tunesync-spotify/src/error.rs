use thiserror::Error;
use tunesync_core::{CoreError, TransportError};

/// Unified error type for all Spotify-related operations.
///
/// Authentication and parse failures leave in-memory state untouched.
/// Rate-limit and transport failures feed the poller's backoff gate.
#[derive(Debug, Error)]
pub enum SpotifyError {
    /// Token exchange or refresh failed (missing token, malformed response).
    #[error("Spotify authentication failed: {reason}")]
    Auth { reason: String },

    /// The token endpoint answered with an OAuth error code.
    #[error("Spotify rejected the grant: {error}{}", .description.as_deref().map(|d| format!(" ({d})")).unwrap_or_default())]
    OAuth {
        error: String,
        description: Option<String>,
    },

    /// Neither configured nor compiled-in client credentials are available.
    #[error("Cannot request token without valid client credentials")]
    MissingCredentials,

    /// A grant was attempted without the material it needs.
    #[error("Cannot request token: {what} is empty")]
    MissingGrantInput { what: &'static str },

    /// The operation requires a logged-in account.
    #[error("Not logged in to Spotify")]
    NotLoggedIn,

    /// Spotify API returned a rate limit response.
    #[error("Spotify API rate limited{}", .retry_after_secs.map(|s| format!(", retry after {s}s")).unwrap_or_default())]
    RateLimited { retry_after_secs: Option<u64> },

    /// Spotify API answered with a status the caller does not handle.
    #[error("Spotify API returned HTTP {status}")]
    UnexpectedStatus { status: u16 },

    /// No HTTP response was received.
    #[error("Spotify request failed: {0}")]
    Transport(#[from] TransportError),

    /// Payload parsing, config or persistence error.
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Convenience type alias for Results with `SpotifyError`.
pub type Result<T> = std::result::Result<T, SpotifyError>;
