//! Spotify `/me/player` payload parsing.

use serde_json::Value;
use tracing::error;
use tunesync_core::{
    Capability, CapabilitySet, CoreError, MetaField, MusicSource, NowPlaying, NowPlayingParser,
    PlaybackStatus, ReleaseDate, TrackMetadata,
};

/// Transport controls the Spotify Web API supports.
///
/// Volume steps are advertised but are no-ops until a volume endpoint is wired
/// up; mute has no Spotify equivalent.
pub const SPOTIFY_CAPABILITIES: CapabilitySet = CapabilitySet::EMPTY
    .with(Capability::Next)
    .with(Capability::Previous)
    .with(Capability::PlayPause)
    .with(Capability::Stop)
    .with(Capability::VolumeUp)
    .with(Capability::VolumeDown);

const SPOTIFY_FIELDS: &[MetaField] = &[
    MetaField::Title,
    MetaField::Artists,
    MetaField::Album,
    MetaField::CoverUrl,
    MetaField::Url,
    MetaField::Duration,
    MetaField::Progress,
    MetaField::Status,
    MetaField::DiscNumber,
    MetaField::TrackNumber,
    MetaField::Explicit,
    MetaField::ReleaseYear,
    MetaField::ReleaseMonth,
    MetaField::ReleaseDay,
    MetaField::ContextType,
    MetaField::ContextUri,
    MetaField::ContextExternalUrl,
    MetaField::PlaylistName,
];

/// Marker Spotify uses in `currently_playing_type` while an ad plays
const AD_MARKER: &str = "ad";

/// Parser for the Spotify playback state document.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpotifyParser;

impl SpotifyParser {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl NowPlayingParser for SpotifyParser {
    fn source(&self) -> MusicSource {
        MusicSource::Spotify
    }

    fn capabilities(&self) -> CapabilitySet {
        SPOTIFY_CAPABILITIES
    }

    fn supported_fields(&self) -> &'static [MetaField] {
        SPOTIFY_FIELDS
    }

    fn parse_now_playing(&self, payload: &Value) -> tunesync_core::error::Result<NowPlaying> {
        if !payload.is_object() {
            return Err(CoreError::PayloadParseError {
                source_name: MusicSource::Spotify.to_string(),
                reason: "playback state is not a JSON object".into(),
            });
        }

        if str_at(payload, &["currently_playing_type"]) == Some(AD_MARKER) {
            return Ok(NowPlaying::Advertisement);
        }

        let device = payload.get("device").filter(|v| v.is_object());
        let (Some(device), Some(is_playing)) = (device, bool_at(payload, &["is_playing"])) else {
            return Err(CoreError::PayloadParseError {
                source_name: MusicSource::Spotify.to_string(),
                reason: format!("unexpected playback state shape: {payload}"),
            });
        };

        let progress = int_at(payload, &["progress_ms"]);

        if bool_at(device, &["is_private"]) == Some(true) {
            error!("Spotify session is private! Can't read track");
            return Ok(NowPlaying::Private {
                progress: progress
                    .and_then(|ms| u64::try_from(ms).ok())
                    .map(std::time::Duration::from_millis),
            });
        }

        let mut meta = TrackMetadata::new();
        let item = payload.get("item").filter(|v| v.is_object());

        // A loaded but idle track reports Paused, not Stopped, so consumers can
        // tell it apart from an empty player
        let status = match (item, is_playing) {
            (None, _) => PlaybackStatus::Stopped,
            (Some(_), true) => PlaybackStatus::Playing,
            (Some(_), false) => PlaybackStatus::Paused,
        };
        meta.set_status(status);

        if let Some(progress) = progress {
            meta.set_int(MetaField::Progress, progress);
        }

        if let Some(item) = item {
            project_track(item, &mut meta);
        }

        let context_href = payload
            .get("context")
            .filter(|v| v.is_object())
            .and_then(|context| project_context(context, &mut meta));

        Ok(NowPlaying::Track {
            metadata: meta,
            context_href,
        })
    }

    fn parse_context_name(&self, payload: &Value) -> Option<String> {
        str_at(payload, &["name"]).map(str::to_string)
    }
}

fn project_track(item: &Value, meta: &mut TrackMetadata) {
    if let Some(title) = str_at(item, &["name"]) {
        meta.set_text(MetaField::Title, title);
    }
    if let Some(duration) = int_at(item, &["duration_ms"]) {
        meta.set_int(MetaField::Duration, duration);
    }
    if let Some(explicit) = bool_at(item, &["explicit"]) {
        meta.set_bool(MetaField::Explicit, explicit);
    }
    if let Some(disc) = int_at(item, &["disc_number"]) {
        meta.set_int(MetaField::DiscNumber, disc);
    }
    if let Some(track) = int_at(item, &["track_number"]) {
        meta.set_int(MetaField::TrackNumber, track);
    }
    if let Some(url) = str_at(item, &["external_urls", "spotify"]) {
        meta.set_text(MetaField::Url, url);
    }

    if let Some(artists) = item.get("artists").and_then(Value::as_array) {
        let names = artists
            .iter()
            .filter_map(|artist| str_at(artist, &["name"]))
            .map(str::to_string)
            .collect();
        meta.set_list(MetaField::Artists, names);
    }

    let Some(album) = item.get("album") else {
        return;
    };

    if let Some(name) = str_at(album, &["name"]) {
        meta.set_text(MetaField::Album, name);
    }

    let cover = album
        .get("images")
        .and_then(Value::as_array)
        .and_then(|images| images.first())
        .and_then(|image| str_at(image, &["url"]))
        .filter(|url| !url.is_empty());
    if let Some(cover) = cover {
        meta.set_text(MetaField::CoverUrl, cover);
    }

    meta.set_release_date(str_at(album, &["release_date"]).and_then(ReleaseDate::parse));
}

/// Record context type, URI and link. Returns the context's `href`, if any.
fn project_context(context: &Value, meta: &mut TrackMetadata) -> Option<String> {
    if let Some(kind) = str_at(context, &["type"]) {
        meta.set_text(MetaField::ContextType, kind);
    }
    if let Some(uri) = str_at(context, &["uri"]) {
        meta.set_text(MetaField::ContextUri, uri);
    }
    if let Some(url) = str_at(context, &["external_urls", "spotify"]) {
        meta.set_text(MetaField::ContextExternalUrl, url);
    }

    str_at(context, &["href"])
        .filter(|href| !href.is_empty())
        .map(str::to_string)
}

fn value_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |v, key| v.get(key))
}

fn str_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    value_at(value, path).and_then(Value::as_str)
}

fn int_at(value: &Value, path: &[&str]) -> Option<i64> {
    value_at(value, path).and_then(Value::as_i64)
}

fn bool_at(value: &Value, path: &[&str]) -> Option<bool> {
    value_at(value, path).and_then(Value::as_bool)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn track_payload(is_playing: bool) -> Value {
        json!({
            "device": {"is_private": false, "name": "Desk"},
            "progress_ms": 42_000,
            "is_playing": is_playing,
            "currently_playing_type": "track",
            "context": {
                "type": "playlist",
                "uri": "spotify:playlist:abc",
                "href": "https://api.spotify.com/v1/playlists/abc",
                "external_urls": {"spotify": "https://open.spotify.com/playlist/abc"}
            },
            "item": {
                "name": "Song",
                "duration_ms": 183_000,
                "explicit": true,
                "disc_number": 1,
                "track_number": 7,
                "external_urls": {"spotify": "https://open.spotify.com/track/xyz"},
                "artists": [{"name": "B"}, {"name": "A"}, {"name": "B"}],
                "album": {
                    "name": "Album",
                    "release_date": "2021-05-09",
                    "images": [
                        {"url": "https://i.scdn.co/image/large", "width": 640},
                        {"url": "https://i.scdn.co/image/small", "width": 64}
                    ]
                }
            }
        })
    }

    fn parse(payload: &Value) -> NowPlaying {
        SpotifyParser::new().parse_now_playing(payload).unwrap()
    }

    fn parse_track(payload: &Value) -> (TrackMetadata, Option<String>) {
        match parse(payload) {
            NowPlaying::Track {
                metadata,
                context_href,
            } => (metadata, context_href),
            other => panic!("expected a track, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_full_track() {
        let (meta, href) = parse_track(&track_payload(true));

        assert_eq!(meta.title(), Some("Song"));
        assert_eq!(meta.album(), Some("Album"));
        assert_eq!(meta.duration(), Some(std::time::Duration::from_millis(183_000)));
        assert_eq!(meta.progress(), Some(std::time::Duration::from_millis(42_000)));
        assert_eq!(meta.explicit(), Some(true));
        assert_eq!(meta.disc_number(), Some(1));
        assert_eq!(meta.track_number(), Some(7));
        assert_eq!(meta.url(), Some("https://open.spotify.com/track/xyz"));
        assert_eq!(meta.cover_url(), Some("https://i.scdn.co/image/large"));
        assert_eq!(meta.status(), PlaybackStatus::Playing);
        assert_eq!(meta.release_year(), Some(2021));
        assert_eq!(meta.release_month(), Some(5));
        assert_eq!(meta.release_day(), Some(9));
        assert_eq!(meta.context_type(), Some("playlist"));
        assert_eq!(meta.context_uri(), Some("spotify:playlist:abc"));
        assert_eq!(
            meta.context_external_url(),
            Some("https://open.spotify.com/playlist/abc")
        );
        assert_eq!(href.as_deref(), Some("https://api.spotify.com/v1/playlists/abc"));
        // Resolved separately by the poller
        assert_eq!(meta.playlist_name(), None);
    }

    #[test]
    fn test_artists_keep_order_and_duplicates() {
        let (meta, _) = parse_track(&track_payload(true));
        assert_eq!(meta.artists(), ["B", "A", "B"]);
    }

    #[test]
    fn test_paused_track() {
        let (meta, _) = parse_track(&track_payload(false));
        assert_eq!(meta.status(), PlaybackStatus::Paused);
    }

    #[test]
    fn test_missing_fields_stay_unset() {
        let payload = json!({
            "device": {"is_private": false},
            "is_playing": true,
            "item": {"name": "Only a title", "album": {"images": []}}
        });
        let (meta, href) = parse_track(&payload);

        assert_eq!(meta.title(), Some("Only a title"));
        assert!(!meta.contains(MetaField::Album));
        assert!(!meta.contains(MetaField::CoverUrl));
        assert!(!meta.contains(MetaField::Duration));
        assert!(!meta.contains(MetaField::Artists));
        assert!(!meta.contains(MetaField::ReleaseYear));
        assert!(!meta.contains(MetaField::ContextType));
        assert!(href.is_none());
    }

    #[test]
    fn test_empty_cover_url_is_unset() {
        let mut payload = track_payload(true);
        payload["item"]["album"]["images"] = json!([{"url": ""}]);
        let (meta, _) = parse_track(&payload);
        assert!(!meta.contains(MetaField::CoverUrl));
    }

    #[test]
    fn test_release_date_shapes() {
        let cases = [
            ("2021-05", Some(2021), Some(5), None),
            ("2021", Some(2021), None, None),
            ("", None, None, None),
            ("May 2021", None, None, None),
            ("2021-05-09-01", None, None, None),
        ];

        for (date, year, month, day) in cases {
            let mut payload = track_payload(true);
            payload["item"]["album"]["release_date"] = json!(date);
            let (meta, _) = parse_track(&payload);

            assert_eq!(meta.release_year(), year, "{date}");
            assert_eq!(meta.release_month(), month, "{date}");
            assert_eq!(meta.release_day(), day, "{date}");
        }
    }

    #[test]
    fn test_no_item_is_stopped() {
        let (meta, _) = parse_track(&json!({
            "device": {"is_private": false},
            "is_playing": false,
            "item": null
        }));
        assert_eq!(meta.status(), PlaybackStatus::Stopped);
        assert!(meta.title().is_none());
    }

    #[test]
    fn test_ad_marker() {
        let payload = json!({"currently_playing_type": "ad", "is_playing": true, "item": null});
        assert_eq!(parse(&payload), NowPlaying::Advertisement);
    }

    #[test]
    fn test_private_session() {
        let mut payload = track_payload(true);
        payload["device"]["is_private"] = json!(true);

        assert_eq!(
            parse(&payload),
            NowPlaying::Private {
                progress: Some(std::time::Duration::from_millis(42_000))
            }
        );
    }

    #[test]
    fn test_non_object_is_parse_error() {
        let result = SpotifyParser::new().parse_now_playing(&json!([1, 2, 3]));
        assert!(matches!(result, Err(CoreError::PayloadParseError { .. })));
    }

    #[test]
    fn test_unexpected_shape_is_parse_error() {
        let parser = SpotifyParser::new();
        let shapes = [
            json!({}),
            json!({"is_playing": true, "item": null}),
            json!({"device": {"is_private": false}, "item": null}),
            json!({"device": "Desk", "is_playing": true}),
            json!({"device": {"is_private": false}, "is_playing": "yes"}),
        ];

        for payload in shapes {
            let result = parser.parse_now_playing(&payload);
            assert!(
                matches!(result, Err(CoreError::PayloadParseError { .. })),
                "{payload}"
            );
        }
    }

    #[test]
    fn test_context_name() {
        let parser = SpotifyParser::new();
        assert_eq!(
            parser.parse_context_name(&json!({"name": "Focus Mix", "id": "abc"})),
            Some("Focus Mix".to_string())
        );
        assert_eq!(parser.parse_context_name(&json!({"id": "abc"})), None);
    }

    #[test]
    fn test_capabilities() {
        let caps = SpotifyParser::new().capabilities();
        assert!(caps.contains(Capability::PlayPause));
        assert!(caps.contains(Capability::VolumeUp));
        assert!(!caps.contains(Capability::Mute));
    }
}
