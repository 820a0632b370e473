//! Fire-and-forget Spotify transport controls.

use crate::oauth::TokenStore;
use crate::poller::PLAYER_URL;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use tunesync_core::{
    Capability, CapabilitySet, HttpMethod, HttpRequest, HttpTransport, PlaybackStatus,
    DEFAULT_REQUEST_TIMEOUT,
};

/// A single control request against the player endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Play,
    Pause,
    Next,
    Previous,
}

impl Control {
    const fn method(self) -> HttpMethod {
        match self {
            Self::Play | Self::Pause => HttpMethod::Put,
            Self::Next | Self::Previous => HttpMethod::Post,
        }
    }

    const fn path(self) -> &'static str {
        match self {
            Self::Play => "/play",
            Self::Pause => "/pause",
            Self::Next => "/next",
            Self::Previous => "/previous",
        }
    }

    const fn body(self) -> &'static str {
        match self {
            // Resume restarts the current item from the beginning
            Self::Play => r#"{"position_ms": 0}"#,
            Self::Pause | Self::Next | Self::Previous => "{}",
        }
    }
}

/// Outcome of handing a capability to the dispatcher.
#[derive(Debug)]
pub(crate) enum Dispatched {
    /// Not in the advertised set
    Rejected,
    /// Accepted but there is nothing to send
    Ignored,
    /// Request is in flight on its own task
    Sent(JoinHandle<()>),
}

/// Sends transport controls without blocking the caller.
///
/// Every accepted command runs on its own task on the given runtime, so
/// [`dispatch`](Self::dispatch) can be called from a UI or hotkey thread.
/// Failures are logged; the next poll shows the real player state.
pub struct CommandDispatcher {
    tokens: Arc<TokenStore>,
    transport: Arc<dyn HttpTransport>,
    capabilities: CapabilitySet,
    runtime: Handle,
    request_timeout: Duration,
}

impl CommandDispatcher {
    pub fn new(
        tokens: Arc<TokenStore>,
        transport: Arc<dyn HttpTransport>,
        capabilities: CapabilitySet,
        runtime: Handle,
    ) -> Self {
        Self {
            tokens,
            transport,
            capabilities,
            runtime,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    /// Issue `capability` given the current playback `status`.
    ///
    /// Returns `true` once the command is handed off (or is a supported
    /// no-op), `false` if the source does not support it.
    pub fn dispatch(&self, capability: Capability, status: PlaybackStatus) -> bool {
        !matches!(self.dispatch_inner(capability, status), Dispatched::Rejected)
    }

    pub(crate) fn dispatch_inner(
        &self,
        capability: Capability,
        status: PlaybackStatus,
    ) -> Dispatched {
        if !self.capabilities.contains(capability) {
            warn!("Ignoring unsupported command: {}", capability);
            return Dispatched::Rejected;
        }

        match capability {
            Capability::PlayPause if status.is_playing() => self.send_control(Control::Pause),
            Capability::PlayPause => self.play(),
            Capability::Stop => self.stop(),
            Capability::Next => self.send_control(Control::Next),
            Capability::Previous => self.send_control(Control::Previous),
            Capability::VolumeUp | Capability::VolumeDown | Capability::Mute => {
                debug!("Command {} has no Spotify endpoint yet", capability);
                Dispatched::Ignored
            }
        }
    }

    fn play(&self) -> Dispatched {
        self.send_control(Control::Play)
    }

    /// Spotify has no stop; pausing is the closest equivalent
    fn stop(&self) -> Dispatched {
        self.send_control(Control::Pause)
    }

    fn send_control(&self, control: Control) -> Dispatched {
        let tokens = self.tokens.clone();
        let transport = self.transport.clone();
        let timeout = self.request_timeout;

        Dispatched::Sent(self.runtime.spawn(async move {
            let Some(access_token) = tokens.access_token().await else {
                warn!("Can't send {:?} command: not logged in", control);
                return;
            };

            let url = format!("{PLAYER_URL}{}", control.path());
            let request = HttpRequest::new(control.method(), url)
                .bearer(&access_token)
                .json_body(control.body())
                .timeout(timeout);

            match transport.execute(request).await {
                Ok(response) if response.is_success() => {
                    debug!("Spotify command {:?} accepted (HTTP {})", control, response.status);
                }
                Ok(response) => {
                    error!("Couldn't run spotify command! HTTP code: {}", response.status);
                    warn!("Spotify playback control requires a premium account");
                    error!("Spotify response: {}", response.body);
                }
                Err(e) => {
                    error!("Couldn't run spotify command: {}", e);
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::SPOTIFY_CAPABILITIES;
    use crate::test_support::ScriptedTransport;
    use tunesync_core::{Credentials, ManualClock, MemoryTokenPersistence, TokenState};

    fn dispatcher(token: TokenState) -> (Arc<ScriptedTransport>, CommandDispatcher) {
        let transport = Arc::new(ScriptedTransport::new());
        let tokens = Arc::new(TokenStore::new(
            transport.clone(),
            Arc::new(MemoryTokenPersistence::new(
                Credentials::new("client", "secret"),
                token,
            )),
            Arc::new(ManualClock::new(1_700_000_000)),
            "http://127.0.0.1:8888/callback",
        ));
        let dispatcher = CommandDispatcher::new(
            tokens,
            transport.clone(),
            SPOTIFY_CAPABILITIES,
            Handle::current(),
        );
        (transport, dispatcher)
    }

    fn logged_in() -> TokenState {
        TokenState {
            access_token: "access".into(),
            refresh_token: "refresh".into(),
            auth_code: String::new(),
            expires_at: 1_700_003_600,
            logged_in: true,
        }
    }

    async fn sent(dispatched: Dispatched) {
        match dispatched {
            Dispatched::Sent(handle) => handle.await.unwrap(),
            other => panic!("expected a request, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_play_pause_while_playing_pauses() {
        let (transport, dispatcher) = dispatcher(logged_in());
        transport.push_text(204, "");

        sent(dispatcher.dispatch_inner(Capability::PlayPause, PlaybackStatus::Playing)).await;

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, HttpMethod::Put);
        assert_eq!(requests[0].url, "https://api.spotify.com/v1/me/player/pause");
        assert_eq!(requests[0].body.as_deref(), Some("{}"));
        assert_eq!(requests[0].header_value("authorization"), Some("Bearer access"));
    }

    #[tokio::test]
    async fn test_play_pause_while_paused_plays_from_start() {
        let (transport, dispatcher) = dispatcher(logged_in());
        transport.push_text(204, "");

        sent(dispatcher.dispatch_inner(Capability::PlayPause, PlaybackStatus::Paused)).await;

        let request = &transport.requests()[0];
        assert_eq!(request.method, HttpMethod::Put);
        assert_eq!(request.url, "https://api.spotify.com/v1/me/player/play");
        let body: serde_json::Value =
            serde_json::from_str(request.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["position_ms"], 0);
    }

    #[tokio::test]
    async fn test_stop_pauses() {
        let (transport, dispatcher) = dispatcher(logged_in());
        transport.push_text(204, "");

        sent(dispatcher.dispatch_inner(Capability::Stop, PlaybackStatus::Playing)).await;

        assert_eq!(
            transport.requests()[0].url,
            "https://api.spotify.com/v1/me/player/pause"
        );
    }

    #[tokio::test]
    async fn test_next_and_previous_post() {
        let (transport, dispatcher) = dispatcher(logged_in());
        transport.push_text(204, "");
        transport.push_text(204, "");

        sent(dispatcher.dispatch_inner(Capability::Next, PlaybackStatus::Playing)).await;
        sent(dispatcher.dispatch_inner(Capability::Previous, PlaybackStatus::Playing)).await;

        let requests = transport.requests();
        assert_eq!(requests[0].method, HttpMethod::Post);
        assert_eq!(requests[0].url, "https://api.spotify.com/v1/me/player/next");
        assert_eq!(requests[1].url, "https://api.spotify.com/v1/me/player/previous");
    }

    #[tokio::test]
    async fn test_volume_is_accepted_noop() {
        let (transport, dispatcher) = dispatcher(logged_in());

        assert!(dispatcher.dispatch(Capability::VolumeUp, PlaybackStatus::Playing));
        assert!(dispatcher.dispatch(Capability::VolumeDown, PlaybackStatus::Playing));
        tokio::task::yield_now().await;

        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_capability_rejected() {
        let (transport, dispatcher) = dispatcher(logged_in());

        assert!(!dispatcher.dispatch(Capability::Mute, PlaybackStatus::Playing));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_failed_command_is_absorbed() {
        let (transport, dispatcher) = dispatcher(logged_in());
        transport.push_text(403, r#"{"error": {"status": 403, "message": "Premium required"}}"#);

        sent(dispatcher.dispatch_inner(Capability::Next, PlaybackStatus::Playing)).await;
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_logged_out_sends_nothing() {
        let (transport, dispatcher) = dispatcher(TokenState::default());

        sent(dispatcher.dispatch_inner(Capability::Next, PlaybackStatus::Playing)).await;
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn test_dispatch_from_non_async_thread() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let (transport, dispatcher) = runtime.block_on(async { dispatcher(logged_in()) });
        transport.set_delay(Duration::from_millis(200));
        transport.push_text(204, "");

        let started = std::time::Instant::now();
        assert!(dispatcher.dispatch(Capability::Next, PlaybackStatus::Playing));
        assert!(started.elapsed() < Duration::from_millis(200));

        runtime.block_on(async {
            while transport.requests().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });
    }
}
