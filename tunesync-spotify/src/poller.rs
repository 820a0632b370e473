//! Spotify playback state polling.

use crate::error::{Result, SpotifyError};
use crate::oauth::TokenStore;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tunesync_core::{
    Clock, CoreError, DurationExt, HttpRequest, HttpResponse, HttpTransport, MetaField, MusicSource,
    NowPlaying, NowPlayingParser, NowPlayingStore, PlaybackStatus, RateLimitGate, SourcePoller,
    DEFAULT_REQUEST_TIMEOUT,
};

/// Playback state endpoint; commands hang off the same path
pub const PLAYER_URL: &str = "https://api.spotify.com/v1/me/player";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Where the engine ended up after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No usable session; nothing is requested
    LoggedOut,
    /// The access token expired and is being refreshed
    TokenStale,
    /// A cooldown is active; nothing is requested
    Backoff,
    /// A track (or ad) is loaded
    Polling,
    /// The account has no active playback session
    Idle,
}

impl EngineState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LoggedOut => "logged out",
            Self::TokenStale => "token stale",
            Self::Backoff => "backing off",
            Self::Polling => "polling",
            Self::Idle => "idle",
        }
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Polls the now-playing endpoint and keeps a [`NowPlayingStore`] current.
///
/// [`tick`](Self::tick) performs at most one poll and never sleeps; the
/// cadence comes from [`run`](SourcePoller::run) or an external scheduler.
/// Ticks must not overlap.
pub struct PollingEngine {
    tokens: Arc<TokenStore>,
    transport: Arc<dyn HttpTransport>,
    parser: Arc<dyn NowPlayingParser>,
    store: Arc<NowPlayingStore>,
    clock: Arc<dyn Clock>,
    gate: Mutex<RateLimitGate>,
    state: Mutex<EngineState>,
    poll_interval: Duration,
    request_timeout: Duration,
    cancel_token: CancellationToken,
}

impl PollingEngine {
    /// Create a new polling engine
    ///
    /// # Arguments
    /// * `tokens` - Token store providing the bearer token
    /// * `transport` - HTTP executor
    /// * `parser` - Parser for the source's payloads
    /// * `store` - Store updated with every successful poll
    /// * `clock` - Time source for cooldowns and token expiry
    pub fn new(
        tokens: Arc<TokenStore>,
        transport: Arc<dyn HttpTransport>,
        parser: Arc<dyn NowPlayingParser>,
        store: Arc<NowPlayingStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tokens,
            transport,
            parser,
            store,
            clock,
            gate: Mutex::new(RateLimitGate::new()),
            state: Mutex::new(EngineState::LoggedOut),
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            cancel_token: CancellationToken::new(),
        }
    }

    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Use an external cancellation token for graceful shutdown
    #[must_use]
    pub fn with_cancel_token(mut self, cancel_token: CancellationToken) -> Self {
        self.cancel_token = cancel_token;
        self
    }

    /// State after the most recent tick
    pub fn state(&self) -> EngineState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The store this engine writes to
    #[must_use]
    pub fn store(&self) -> Arc<NowPlayingStore> {
        self.store.clone()
    }

    /// Start polling in a background task
    #[must_use]
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.run().await {
                error!("Spotify poller stopped with error: {}", e);
            }
        })
    }

    /// Run one poll cycle.
    pub async fn tick(&self) -> EngineState {
        let state = self.poll().await;
        let previous = std::mem::replace(
            &mut *self.state.lock().unwrap_or_else(PoisonError::into_inner),
            state,
        );
        if previous != state {
            info!("Spotify poller: {} -> {}", previous, state);
        }
        state
    }

    fn set_state(&self, state: EngineState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn with_gate<T>(&self, f: impl FnOnce(&mut RateLimitGate) -> T) -> T {
        let mut gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut *gate)
    }

    async fn poll(&self) -> EngineState {
        let previous = self.state();
        if !self.tokens.is_logged_in().await {
            return EngineState::LoggedOut;
        }

        let now_epoch = self.clock.epoch_secs();
        if self.tokens.snapshot().await.is_expired(now_epoch) {
            self.set_state(EngineState::TokenStale);
            if let Err(e) = self.tokens.ensure_fresh(now_epoch).await {
                warn!("Couldn't refresh Spotify token: {}", e);
                return EngineState::LoggedOut;
            }
        }

        if !self.with_gate(|gate| gate.may_proceed(self.clock.now())) {
            return EngineState::Backoff;
        }

        let Some(access_token) = self.tokens.access_token().await else {
            return EngineState::LoggedOut;
        };

        let request = HttpRequest::get(PLAYER_URL)
            .bearer(&access_token)
            .timeout(self.request_timeout);

        let request_start = self.clock.now();
        let result = self
            .transport
            .execute(request)
            .await
            .map_err(SpotifyError::from)
            .and_then(check_status);
        let request_latency = self.clock.now().saturating_duration_since(request_start);
        let now = self.clock.now();

        match result {
            Ok(response) if response.status == 204 => {
                self.with_gate(RateLimitGate::on_success);
                debug!("No active Spotify session");
                self.store.clear().await;
                EngineState::Idle
            }
            Ok(response) => {
                self.with_gate(RateLimitGate::on_success);
                self.handle_payload(&response, &access_token, request_latency)
                    .await
                    .unwrap_or(previous)
            }
            Err(SpotifyError::RateLimited {
                retry_after_secs: Some(secs),
            }) if secs > 0 => {
                self.with_gate(|gate| gate.on_rate_limited(secs, now));
                EngineState::Backoff
            }
            Err(e) => {
                warn!("Couldn't fetch Spotify playback state: {}", e);
                self.with_gate(|gate| gate.on_transport_failure(now));
                EngineState::Backoff
            }
        }
    }

    /// Apply a 200 response. `None` means the payload was unusable and nothing changed.
    async fn handle_payload(
        &self,
        response: &HttpResponse,
        access_token: &str,
        request_latency: Duration,
    ) -> Option<EngineState> {
        let parsed = serde_json::from_str::<Value>(&response.body)
            .map_err(CoreError::from)
            .and_then(|json| self.parser.parse_now_playing(&json));

        let now_playing = match parsed {
            Ok(now_playing) => now_playing,
            Err(e) => {
                error!("Couldn't parse Spotify playback state: {}", e);
                return None;
            }
        };

        // Assume the position was sampled halfway through the request
        let latency_compensation = request_latency / 2;

        match now_playing {
            NowPlaying::Advertisement => {
                debug!("Spotify is playing an advertisement");
                self.store.set_status(PlaybackStatus::Paused).await;
            }
            NowPlaying::Private { progress } => {
                if let Some(progress) = progress {
                    self.store
                        .set_progress(progress + latency_compensation)
                        .await;
                }
            }
            NowPlaying::Track {
                mut metadata,
                context_href,
            } => {
                if let Some(progress) = metadata.progress() {
                    metadata.set_int(
                        MetaField::Progress,
                        (progress + latency_compensation).as_millis_i64(),
                    );
                }

                if let Some(href) = context_href {
                    if let Some(name) = self.fetch_context_name(&href, access_token).await {
                        metadata.set_text(MetaField::PlaylistName, name);
                    }
                }

                debug!(
                    "Polled Spotify: status={}, title={:?}, progress={:?}",
                    metadata.status(),
                    metadata.title(),
                    metadata.progress()
                );
                self.store.replace(metadata).await;
            }
        }

        Some(EngineState::Polling)
    }

    /// Resolve the playing container's name. Failures only cost the name.
    async fn fetch_context_name(&self, href: &str, access_token: &str) -> Option<String> {
        let request = HttpRequest::get(href)
            .bearer(access_token)
            .timeout(self.request_timeout);

        let response = match self.transport.execute(request).await {
            Ok(response) if response.status == 200 => response,
            Ok(response) => {
                debug!("Couldn't resolve context name: HTTP {}", response.status);
                return None;
            }
            Err(e) => {
                debug!("Couldn't resolve context name: {}", e);
                return None;
            }
        };

        serde_json::from_str::<Value>(&response.body)
            .ok()
            .and_then(|json| self.parser.parse_context_name(&json))
    }
}

/// Split playback endpoint responses into handled ones and failures.
///
/// 200 and 204 pass through. A 429 without a usable `Retry-After` is still
/// rate limited but carries no window.
fn check_status(response: HttpResponse) -> Result<HttpResponse> {
    match response.status {
        200 | 204 => Ok(response),
        429 => Err(SpotifyError::RateLimited {
            retry_after_secs: response.retry_after_secs(),
        }),
        status => {
            debug!("Spotify playback endpoint answered HTTP {}: {}", status, response.body);
            Err(SpotifyError::UnexpectedStatus { status })
        }
    }
}

#[async_trait]
impl SourcePoller for PollingEngine {
    fn source(&self) -> MusicSource {
        self.parser.source()
    }

    fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    async fn run(&self) -> tunesync_core::error::Result<()> {
        info!("Starting {} playback poller", self.parser.source());

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!("Poller shutting down gracefully");
                    break;
                }
                () = tokio::time::sleep(self.poll_interval) => {
                    self.tick().await;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::tests::track_payload;
    use crate::parser::SpotifyParser;
    use crate::test_support::ScriptedTransport;
    use serde_json::json;
    use tunesync_core::{
        Credentials, ManualClock, MemoryTokenPersistence, NowPlayingEvent, TokenState,
        TrackMetadata,
    };

    const NOW: i64 = 1_700_000_000;

    struct Fixture {
        transport: Arc<ScriptedTransport>,
        clock: Arc<ManualClock>,
        engine: PollingEngine,
    }

    fn fixture(token: TokenState) -> Fixture {
        let transport = Arc::new(ScriptedTransport::new());
        let clock = Arc::new(ManualClock::new(NOW));
        let persistence = Arc::new(MemoryTokenPersistence::new(
            Credentials::new("client", "secret"),
            token,
        ));
        let tokens = Arc::new(TokenStore::new(
            transport.clone(),
            persistence,
            clock.clone(),
            "http://127.0.0.1:8888/callback",
        ));
        let parser = Arc::new(SpotifyParser::new());
        let store = NowPlayingStore::new(parser.capabilities());
        let engine = PollingEngine::new(tokens, transport.clone(), parser, store, clock.clone());

        Fixture {
            transport,
            clock,
            engine,
        }
    }

    fn valid_token() -> TokenState {
        TokenState {
            access_token: "access".into(),
            refresh_token: "refresh".into(),
            auth_code: String::new(),
            expires_at: NOW + 3600,
            logged_in: true,
        }
    }

    fn without_context(mut payload: Value) -> Value {
        payload.as_object_mut().unwrap().remove("context");
        payload
    }

    async fn load_track(f: &Fixture) -> TrackMetadata {
        f.transport
            .push_json(200, &without_context(track_payload(true)));
        assert_eq!(f.engine.tick().await, EngineState::Polling);
        f.engine.store().current_metadata().await
    }

    #[tokio::test]
    async fn test_logged_out_makes_no_request() {
        let f = fixture(TokenState::default());

        assert_eq!(f.engine.tick().await, EngineState::LoggedOut);
        assert!(f.transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_track_payload_populates_store() {
        let f = fixture(valid_token());
        let meta = load_track(&f).await;

        assert_eq!(meta.title(), Some("Song"));
        assert_eq!(meta.status(), PlaybackStatus::Playing);

        let requests = f.transport.requests();
        assert_eq!(requests[0].url, PLAYER_URL);
        assert_eq!(requests[0].header_value("authorization"), Some("Bearer access"));
    }

    #[tokio::test]
    async fn test_context_name_resolved() {
        let f = fixture(valid_token());
        f.transport.push_json(200, &track_payload(true));
        f.transport.push_json(200, &json!({"name": "Focus Mix"}));

        assert_eq!(f.engine.tick().await, EngineState::Polling);

        let meta = f.engine.store().current_metadata().await;
        assert_eq!(meta.playlist_name(), Some("Focus Mix"));
        assert_eq!(meta.context_type(), Some("playlist"));
        assert_eq!(
            f.transport.requests()[1].url,
            "https://api.spotify.com/v1/playlists/abc"
        );
    }

    #[tokio::test]
    async fn test_context_name_failure_keeps_poll() {
        let f = fixture(valid_token());
        f.transport.push_json(200, &track_payload(true));
        f.transport.push_timeout();

        assert_eq!(f.engine.tick().await, EngineState::Polling);

        let meta = f.engine.store().current_metadata().await;
        assert_eq!(meta.title(), Some("Song"));
        assert_eq!(meta.playlist_name(), None);

        // The sub-request does not touch the gate
        f.transport.push_json(200, &without_context(track_payload(true)));
        assert_eq!(f.engine.tick().await, EngineState::Polling);
    }

    #[tokio::test]
    async fn test_ad_only_pauses() {
        let f = fixture(valid_token());
        let before = load_track(&f).await;

        f.transport.push_json(
            200,
            &json!({"currently_playing_type": "ad", "is_playing": true, "item": null}),
        );
        assert_eq!(f.engine.tick().await, EngineState::Polling);

        let after = f.engine.store().current_metadata().await;
        assert_eq!(after.status(), PlaybackStatus::Paused);
        assert_eq!(after.title(), before.title());
        assert_eq!(after.artists(), before.artists());
        assert_eq!(after.album(), before.album());
    }

    #[tokio::test]
    async fn test_no_content_clears_and_idles() {
        let f = fixture(valid_token());
        load_track(&f).await;
        let mut events = f.engine.store().subscribe();

        f.transport.push_text(204, "");
        assert_eq!(f.engine.tick().await, EngineState::Idle);

        assert!(f.engine.store().current_metadata().await.is_empty());
        assert!(matches!(events.recv().await.unwrap(), NowPlayingEvent::Cleared));
    }

    #[tokio::test]
    async fn test_rate_limit_window() {
        let f = fixture(valid_token());
        let before = load_track(&f).await;

        f.transport
            .push(HttpResponse::new(429, "").with_header("Retry-After", "30"));
        assert_eq!(f.engine.tick().await, EngineState::Backoff);
        assert_eq!(f.transport.requests().len(), 2);

        f.clock.advance(Duration::from_secs(29));
        assert_eq!(f.engine.tick().await, EngineState::Backoff);
        assert_eq!(f.transport.requests().len(), 2);

        f.clock.advance(Duration::from_secs(1));
        f.transport.push_json(200, &without_context(track_payload(true)));
        assert_eq!(f.engine.tick().await, EngineState::Polling);
        assert_eq!(f.transport.requests().len(), 3);

        assert_eq!(f.engine.store().current_metadata().await.title(), before.title());
    }

    #[tokio::test]
    async fn test_rate_limit_without_retry_after_uses_backoff() {
        let f = fixture(valid_token());
        f.transport.push_text(429, "");

        assert_eq!(f.engine.tick().await, EngineState::Backoff);
        f.clock.advance(Duration::from_secs(4));
        assert_eq!(f.engine.tick().await, EngineState::Backoff);
        assert_eq!(f.transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_transport_failures_grow_backoff() {
        let f = fixture(valid_token());
        let before = load_track(&f).await;

        for (attempt, window) in [5_u64, 10, 15].into_iter().enumerate() {
            f.transport.push_timeout();
            assert_eq!(f.engine.tick().await, EngineState::Backoff);
            assert_eq!(f.transport.requests().len(), attempt + 2);

            f.clock.advance(Duration::from_secs(window - 1));
            assert_eq!(f.engine.tick().await, EngineState::Backoff);
            assert_eq!(f.transport.requests().len(), attempt + 2);
            f.clock.advance(Duration::from_secs(1));
        }

        // Stale metadata survives the failures
        assert_eq!(f.engine.store().current_metadata().await, before);

        // One success resets the window
        load_track(&f).await;
        f.transport.push_text(500, "oops");
        assert_eq!(f.engine.tick().await, EngineState::Backoff);
        f.clock.advance(Duration::from_secs(5));
        f.transport.push_json(200, &without_context(track_payload(true)));
        assert_eq!(f.engine.tick().await, EngineState::Polling);
    }

    #[tokio::test]
    async fn test_unparseable_body_keeps_metadata() {
        let f = fixture(valid_token());
        let before = load_track(&f).await;

        f.transport.push_text(200, "not json");
        assert_eq!(f.engine.tick().await, EngineState::Polling);
        assert_eq!(f.engine.store().current_metadata().await, before);
    }

    #[tokio::test]
    async fn test_unexpected_shape_keeps_metadata() {
        let f = fixture(valid_token());
        let before = load_track(&f).await;

        f.transport.push_json(200, &json!({}));
        assert_eq!(f.engine.tick().await, EngineState::Polling);
        assert_eq!(f.engine.store().current_metadata().await, before);

        f.transport
            .push_json(200, &json!({"is_playing": false, "item": null}));
        f.engine.tick().await;
        assert_eq!(f.engine.store().current_metadata().await, before);
    }

    #[tokio::test]
    async fn test_private_session_only_moves_progress() {
        let f = fixture(valid_token());
        let before = load_track(&f).await;

        let mut payload = without_context(track_payload(false));
        payload["device"]["is_private"] = json!(true);
        payload["progress_ms"] = json!(90_000);
        payload["item"]["name"] = json!("Hidden");
        f.transport.push_json(200, &payload);

        assert_eq!(f.engine.tick().await, EngineState::Polling);

        let after = f.engine.store().current_metadata().await;
        assert_eq!(after.title(), before.title());
        assert_eq!(after.artists(), before.artists());
        assert_eq!(after.status(), PlaybackStatus::Playing);
        let progress = after.progress().unwrap();
        assert!(progress >= Duration::from_secs(90));
        assert!(progress < Duration::from_secs(91));
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_before_poll() {
        let f = fixture(TokenState {
            expires_at: NOW - 1,
            ..valid_token()
        });
        f.transport
            .push_json(200, &json!({"access_token": "renewed", "expires_in": 3600}));
        f.transport.push_json(200, &without_context(track_payload(false)));

        assert_eq!(f.engine.tick().await, EngineState::Polling);

        let requests = f.transport.requests();
        assert_eq!(requests[0].url, crate::oauth::TOKEN_URL);
        assert_eq!(requests[1].header_value("authorization"), Some("Bearer renewed"));
        assert_eq!(
            f.engine.store().current_status().await,
            PlaybackStatus::Paused
        );
    }

    #[tokio::test]
    async fn test_failed_refresh_is_logged_out_for_tick() {
        let f = fixture(TokenState {
            expires_at: NOW - 1,
            ..valid_token()
        });
        f.transport.push_timeout();

        assert_eq!(f.engine.tick().await, EngineState::LoggedOut);
        assert_eq!(f.transport.requests().len(), 1);
    }

    #[test]
    fn test_check_status() {
        assert!(check_status(HttpResponse::new(200, "{}")).is_ok());
        assert!(check_status(HttpResponse::new(204, "")).is_ok());
        assert!(matches!(
            check_status(HttpResponse::new(429, "").with_header("Retry-After", "7")),
            Err(SpotifyError::RateLimited {
                retry_after_secs: Some(7)
            })
        ));
        assert!(matches!(
            check_status(HttpResponse::new(429, "").with_header("Retry-After", "soon")),
            Err(SpotifyError::RateLimited {
                retry_after_secs: None
            })
        ));
        assert!(matches!(
            check_status(HttpResponse::new(502, "")),
            Err(SpotifyError::UnexpectedStatus { status: 502 })
        ));
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let f = fixture(TokenState::default());
        let cancel = CancellationToken::new();
        let engine = Arc::new(
            f.engine
                .with_poll_interval(Duration::from_millis(10))
                .with_cancel_token(cancel.clone()),
        );

        let handle = engine.clone().start();
        tokio::time::sleep(Duration::from_millis(30)).await;
        engine.stop();
        handle.await.unwrap();

        assert!(cancel.is_cancelled());
        assert_eq!(engine.state(), EngineState::LoggedOut);
    }
}
