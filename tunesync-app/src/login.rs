//! Interactive Spotify login through a local OAuth callback server.

use axum::{extract::Query, response::Html, routing::get, Router};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tracing::{info, warn};
use tunesync_core::Clock;
use tunesync_spotify::{SpotifyError, TokenStore};

/// Timeout for waiting on the OAuth callback (5 minutes)
const OAUTH_CALLBACK_TIMEOUT_SECS: u64 = 300;

type CallbackSender = Arc<Mutex<Option<oneshot::Sender<Result<String, String>>>>>;

/// Make sure the token store holds a usable session.
///
/// A cached session that already expired is refreshed once. Without a
/// session, or when Spotify rejects the cached one, the browser flow runs.
///
/// # Errors
///
/// Returns an error if interactive authentication fails.
pub async fn ensure_authenticated(
    tokens: &TokenStore,
    redirect_uri: &str,
    clock: &dyn Clock,
) -> Result<(), SpotifyError> {
    info!("Checking for cached Spotify token...");

    if tokens.is_logged_in().await {
        match tokens.ensure_fresh(clock.epoch_secs()).await {
            Ok(()) => {
                info!("Valid cached token found, skipping OAuth server");
                return Ok(());
            }
            Err(e) if tokens.is_logged_in().await => {
                // Refresh will be retried by the poller
                warn!("Couldn't refresh cached token: {}", e);
                return Ok(());
            }
            Err(e) => warn!("Cached token was rejected: {}", e),
        }
    }

    info!("No valid cached token, starting OAuth server for interactive authentication...");
    authenticate_interactive(tokens, redirect_uri).await
}

/// Run the browser authorization flow and exchange the returned code.
///
/// # Errors
///
/// Returns an error if the server cannot start, the user denies access, the
/// callback times out, or the code exchange fails.
pub async fn authenticate_interactive(
    tokens: &TokenStore,
    redirect_uri: &str,
) -> Result<(), SpotifyError> {
    let (addr, callback_path) = parse_redirect_uri(redirect_uri)?;

    let (tx, rx) = oneshot::channel();
    let tx: CallbackSender = Arc::new(Mutex::new(Some(tx)));

    let app = build_callback_router(&callback_path, tx);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| SpotifyError::Auth {
            reason: format!("Failed to bind to {addr}: {e}"),
        })?;
    info!(
        "OAuth callback server listening on http://{}{}",
        addr, callback_path
    );

    let auth_url = tokens.authorize_url()?;
    prompt_authorization(&auth_url, addr, &callback_path);

    let code = wait_for_callback(rx, listener, app).await?;

    info!("Received authorization code, exchanging for token...");
    tokens.exchange_auth_code(&code).await.map(|_| ())
}

/// Split the redirect URI into the address to bind and the callback path
fn parse_redirect_uri(redirect_uri: &str) -> Result<(SocketAddr, String), SpotifyError> {
    let parsed = url::Url::parse(redirect_uri).map_err(|e| SpotifyError::Auth {
        reason: format!("Invalid redirect URI: {e}"),
    })?;

    let host = match parsed.host_str() {
        None | Some("localhost") => "127.0.0.1",
        Some(host) => host,
    };
    let port = parsed.port().unwrap_or(8888);

    let addr = format!("{host}:{port}")
        .parse()
        .map_err(|e| SpotifyError::Auth {
            reason: format!("Invalid address: {e}"),
        })?;

    Ok((addr, parsed.path().to_string()))
}

fn build_callback_router(callback_path: &str, tx: CallbackSender) -> Router {
    Router::new().route(
        callback_path,
        get(move |Query(params): Query<CallbackParams>| {
            let tx = tx.clone();
            async move { handle_callback_request(params, tx).await }
        }),
    )
}

async fn handle_callback_request(params: CallbackParams, tx: CallbackSender) -> Html<String> {
    let (outcome, page) = match (params.code, params.error) {
        (Some(code), _) => (Ok(code), SUCCESS_HTML.to_string()),
        (None, Some(error)) => {
            let page = failure_page(&format!("Spotify returned: {error}"));
            (Err(error), page)
        }
        (None, None) => return Html(failure_page("No authorization code received.")),
    };

    if let Some(sender) = tx.lock().await.take() {
        let _ = sender.send(outcome);
    }
    Html(page)
}

fn prompt_authorization(auth_url: &str, addr: SocketAddr, callback_path: &str) {
    info!("Opening browser for Spotify authorization...");

    if let Err(e) = open::that(auth_url) {
        warn!("Could not open browser automatically: {}", e);
        info!("Please open this URL manually:\n{auth_url}");
    }

    info!(
        "Waiting for authorization callback on http://{}{callback_path}...",
        addr
    );
}

async fn wait_for_callback(
    rx: oneshot::Receiver<Result<String, String>>,
    listener: tokio::net::TcpListener,
    app: Router,
) -> Result<String, SpotifyError> {
    let server = axum::serve(listener, app);

    tokio::select! {
        result = rx => match result {
            Ok(Ok(code)) => Ok(code),
            Ok(Err(error)) => Err(SpotifyError::OAuth { error, description: None }),
            Err(_) => Err(SpotifyError::Auth {
                reason: "Callback channel closed unexpectedly".into(),
            }),
        },
        _ = server => Err(SpotifyError::Auth {
            reason: "Server stopped unexpectedly".into(),
        }),
        () = tokio::time::sleep(Duration::from_secs(OAUTH_CALLBACK_TIMEOUT_SECS)) => {
            Err(SpotifyError::Auth {
                reason: format!(
                    "OAuth callback timed out after {} minutes. Please try again.",
                    OAUTH_CALLBACK_TIMEOUT_SECS / 60
                ),
            })
        }
    }
}

/// Query parameters for the OAuth callback
#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    error: Option<String>,
}

fn failure_page(detail: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Authorization Failed</title></head>
<body style="font-family: sans-serif; text-align: center; padding: 50px;">
    <h1>Authorization Failed</h1>
    <p>{detail}</p>
    <p>Please close this window and try again.</p>
</body>
</html>"#
    )
}

/// HTML response shown on successful authorization
const SUCCESS_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><title>Authorization Successful</title></head>
<body style="font-family: sans-serif; text-align: center; padding: 50px; background: #191414; color: white;">
    <h1>Authorization Successful!</h1>
    <p>Tunesync is now connected to Spotify.</p>
    <p>You can close this window.</p>
</body>
</html>"#;
