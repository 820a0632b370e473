//! Music source identification, payload parsing and the poller trait.

use crate::capability::CapabilitySet;
use crate::error::{CoreError, Result};
use crate::metadata::{MetaField, TrackMetadata};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Identifies a remote music source.
///
/// The identifier is stable and used in config files, so it should not
/// change once established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MusicSource {
    /// Spotify Web API
    Spotify,
}

impl MusicSource {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Spotify => "spotify",
        }
    }
}

impl std::fmt::Display for MusicSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of interpreting one now-playing payload.
#[derive(Debug, Clone, PartialEq)]
pub enum NowPlaying {
    /// A track is loaded. `metadata` is a complete replacement record,
    /// including the derived status.
    Track {
        metadata: TrackMetadata,
        /// Fetchable URL that resolves the playing container's name
        context_href: Option<String>,
    },
    /// An advertisement is playing in place of a track.
    Advertisement,
    /// The session exists but hides what is playing. Only the progress is
    /// known.
    Private { progress: Option<Duration> },
}

/// Converts a provider's now-playing JSON into a [`NowPlaying`].
///
/// One implementation exists per [`MusicSource`]; the poll loop never
/// inspects provider JSON itself.
pub trait NowPlayingParser: Send + Sync {
    /// The source whose payloads this parser understands.
    fn source(&self) -> MusicSource;

    /// Transport controls the source supports.
    fn capabilities(&self) -> CapabilitySet;

    /// Metadata fields the source can populate.
    fn supported_fields(&self) -> &'static [MetaField];

    /// Interpret a now-playing document.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PayloadParseError`] if the document does not have
    /// the expected shape.
    fn parse_now_playing(&self, payload: &serde_json::Value) -> Result<NowPlaying>;

    /// Extract the human readable container name from a context document.
    fn parse_context_name(&self, payload: &serde_json::Value) -> Option<String>;
}

/// Parsers keyed by source identity.
#[derive(Default, Clone)]
pub struct ParserRegistry {
    parsers: HashMap<MusicSource, Arc<dyn NowPlayingParser>>,
}

impl ParserRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a parser under the source it reports, replacing any previous one.
    pub fn register(&mut self, parser: Arc<dyn NowPlayingParser>) {
        self.parsers.insert(parser.source(), parser);
    }

    /// Look up the parser for a source.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownSource`] if nothing is registered for `source`.
    pub fn get(&self, source: MusicSource) -> Result<Arc<dyn NowPlayingParser>> {
        self.parsers
            .get(&source)
            .cloned()
            .ok_or_else(|| CoreError::UnknownSource {
                source_name: source.to_string(),
            })
    }
}

/// Trait for pollers that keep a now-playing store up to date.
///
/// Implementations should:
///
/// - Poll their source on a fixed cadence
/// - Update the [`NowPlayingStore`](crate::NowPlayingStore) with each result
/// - Absorb authentication, rate-limit and connection errors
/// - Support graceful shutdown via cancellation token
#[async_trait]
pub trait SourcePoller: Send + Sync {
    /// Returns the source this poller handles.
    fn source(&self) -> MusicSource;

    /// Run the poll loop until cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error only if the poller cannot start.
    async fn run(&self) -> Result<()>;

    /// Get the cancellation token for this poller.
    fn cancel_token(&self) -> CancellationToken;

    /// Signal the poller to stop.
    fn stop(&self) {
        self.cancel_token().cancel();
    }
}
