mod console;
mod login;

use std::fs::File;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use tunesync_core::{
    token_cache_path, Clock, CoreError, HttpTransport, JsonFileTokenPersistence, NowPlayingEvent,
    NowPlayingParser, NowPlayingStore, ParserRegistry, ReqwestTransport, SourcePoller,
    SystemClock, TunesyncConfig,
};
use tunesync_spotify::{
    CommandDispatcher, PollingEngine, SpotifyParser, SpotifyProviderConfig, TokenStore,
    SPOTIFY_CONFIG_TEMPLATE, SPOTIFY_TOKEN_CACHE_FILE_NAME,
};

#[allow(clippy::too_many_lines)]
fn main() {
    // Check config for logging.file_enabled before full config load
    let file_logging_enabled = check_file_logging_enabled();
    init_tracing(file_logging_enabled);

    // Load config or create template on first run
    let provider_templates: &[&str] = &[SPOTIFY_CONFIG_TEMPLATE];
    let config = match TunesyncConfig::load_or_create(Some(provider_templates)) {
        Ok(config) => config,
        Err(CoreError::ConfigNotFound { path }) => {
            info!(
                "A configuration file has been created at {}. \
                Edit it if you want to use your own Spotify app, then run tunesync again.",
                path.display()
            );
            std::process::exit(0);
        }
        Err(CoreError::ConfigParseError(parse_error)) => {
            error!(
                "Configuration file {} has a syntax error: {}",
                TunesyncConfig::config_path().display(),
                parse_error
            );
            std::process::exit(1);
        }
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    let spotify_config = match SpotifyProviderConfig::from_providers(&config.providers)
        .and_then(|cfg| cfg.validate().map(|()| cfg))
    {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    let credentials = spotify_config.credentials();
    if !credentials.is_complete() {
        error!(
            "No Spotify client credentials. Set providers.spotify.client_id and client_secret \
            in {} (get them from https://developer.spotify.com/dashboard)",
            TunesyncConfig::config_path().display()
        );
        std::process::exit(1);
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create tokio runtime: {e}");
            std::process::exit(1);
        }
    };

    let transport: Arc<dyn HttpTransport> = match ReqwestTransport::new() {
        Ok(transport) => Arc::new(transport),
        Err(e) => {
            error!("Failed to create HTTP client: {e}");
            std::process::exit(1);
        }
    };
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let persistence = Arc::new(JsonFileTokenPersistence::new(
        token_cache_path(SPOTIFY_TOKEN_CACHE_FILE_NAME),
        credentials,
    ));
    let tokens = Arc::new(
        TokenStore::new(
            transport.clone(),
            persistence,
            clock.clone(),
            spotify_config.oauth_redirect_uri.clone(),
        )
        .with_request_timeout(spotify_config.request_timeout()),
    );

    let mut parsers = ParserRegistry::new();
    parsers.register(Arc::new(SpotifyParser::new()));
    let parser = match parsers.get(config.general.source) {
        Ok(parser) => parser,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    // Create shared cancellation token for graceful shutdown
    let cancel_token = CancellationToken::new();

    let ctrlc_token = cancel_token.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received Ctrl+C, shutting down gracefully...");
        ctrlc_token.cancel();
    }) {
        error!("Failed to set Ctrl+C handler: {}", e);
    }

    if let Err(e) = runtime.block_on(login::ensure_authenticated(
        &tokens,
        &spotify_config.oauth_redirect_uri,
        clock.as_ref(),
    )) {
        error!("Spotify authentication failed: {}", e);
        std::process::exit(1);
    }
    info!("Spotify authenticated successfully!");

    let store = NowPlayingStore::new(parser.capabilities());
    let engine = Arc::new(
        PollingEngine::new(
            tokens.clone(),
            transport.clone(),
            parser.clone(),
            store.clone(),
            clock,
        )
        .with_poll_interval(spotify_config.poll_interval())
        .with_request_timeout(spotify_config.request_timeout())
        .with_cancel_token(cancel_token.clone()),
    );

    info!(
        "Starting {} poller (interval: {}ms)",
        engine.source(),
        spotify_config.poll_interval_ms
    );
    let poller = {
        let _guard = runtime.enter();
        engine.start()
    };
    runtime.spawn(log_now_playing_events(store.clone()));

    let dispatcher = CommandDispatcher::new(
        tokens.clone(),
        transport,
        parser.capabilities(),
        runtime.handle().clone(),
    )
    .with_request_timeout(spotify_config.request_timeout());

    // Stdin blocks, so controls get their own thread
    let handle = runtime.handle().clone();
    let controls_token = cancel_token.clone();
    let controls_store = store;
    if let Err(e) = std::thread::Builder::new()
        .name("console-controls".into())
        .spawn(move || {
            console::run(
                &dispatcher,
                &tokens,
                &controls_store,
                &handle,
                &controls_token,
            );
        })
    {
        warn!("Console controls unavailable: {}", e);
    }

    if let Err(e) = runtime.block_on(poller) {
        error!("Poller task failed: {}", e);
    }
    info!("Shut down");
}

/// Log now-playing changes to the console
async fn log_now_playing_events(store: Arc<NowPlayingStore>) {
    let mut rx = store.subscribe();

    loop {
        match rx.recv().await {
            Ok(NowPlayingEvent::TrackChanged { metadata }) => {
                info!("Now playing: {}", console::describe(&metadata));
            }
            Ok(NowPlayingEvent::StatusChanged { status }) => {
                info!("Playback {}", status);
            }
            Ok(NowPlayingEvent::Cleared) => {
                info!("No active Spotify session");
            }
            Ok(NowPlayingEvent::Updated) => {}
            Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                info!("Now playing event channel closed");
                break;
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                info!("Missed {} now playing events", n);
            }
        }
    }
}

/// Check if file logging is enabled by reading the config file.
/// This is done before full config loading to set up tracing first.
/// Returns `false` if config doesn't exist or can't be parsed.
fn check_file_logging_enabled() -> bool {
    let Ok(content) = std::fs::read_to_string(TunesyncConfig::config_path()) else {
        return false;
    };

    TunesyncConfig::parse(&content)
        .map(|c| c.logging.file_enabled)
        .unwrap_or(false)
}

/// Initialize tracing with console output and optional file logging
fn init_tracing(file_logging_enabled: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,reqwest=warn,hyper=warn"));

    let fmt_layer = tracing_subscriber::fmt::layer();

    if file_logging_enabled {
        let log_path = tunesync_core::log_file_path();

        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        match File::create(&log_path) {
            Ok(file) => {
                let file_layer = tracing_subscriber::fmt::layer()
                    .with_writer(Arc::new(file))
                    .with_ansi(false);

                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt_layer)
                    .with(file_layer)
                    .init();

                return;
            }
            Err(e) => {
                eprintln!("Failed to create log file at {}: {e}", log_path.display());
            }
        }
    }

    // Fallback: console only
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
