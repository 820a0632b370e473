//! Normalized "now playing" record.
//!
//! [`TrackMetadata`] is a sparse map from [`MetaField`] to a typed
//! [`MetaValue`]. A missing key means "unknown / not applicable"; getters
//! return `None` instead of inventing a default.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Playback status of the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackStatus {
    #[default]
    Stopped,
    Playing,
    Paused,
}

impl PlaybackStatus {
    #[must_use]
    pub const fn is_playing(self) -> bool {
        matches!(self, Self::Playing)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Playing => "playing",
            Self::Paused => "paused",
        }
    }
}

impl std::fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata keys a source may populate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetaField {
    Title,
    Artists,
    Album,
    CoverUrl,
    /// Link to the track on the provider's site
    Url,
    /// Track length in milliseconds
    Duration,
    /// Elapsed playback position in milliseconds
    Progress,
    Status,
    DiscNumber,
    TrackNumber,
    Explicit,
    ReleaseYear,
    ReleaseMonth,
    ReleaseDay,
    /// Kind of queue being played (playlist, album, artist, ...)
    ContextType,
    ContextUri,
    ContextExternalUrl,
    /// Human readable name of the playlist/container
    PlaylistName,
}

/// Typed value stored under a [`MetaField`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum MetaValue {
    Text(String),
    List(Vec<String>),
    Int(i64),
    Bool(bool),
    Status(PlaybackStatus),
}

/// A release date of year, year-month or year-month-day precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseDate {
    pub year: i64,
    pub month: Option<i64>,
    pub day: Option<i64>,
}

impl ReleaseDate {
    /// Parse `YYYY`, `YYYY-MM` or `YYYY-MM-DD`.
    ///
    /// Any other shape, including an empty string or a non-numeric component,
    /// yields `None`.
    #[must_use]
    pub fn parse(date: &str) -> Option<Self> {
        if date.is_empty() {
            return None;
        }

        let parts = date
            .split('-')
            .map(|p| p.trim().parse::<i64>().ok())
            .collect::<Option<Vec<_>>>()?;

        match parts.as_slice() {
            [year] => Some(Self {
                year: *year,
                month: None,
                day: None,
            }),
            [year, month] => Some(Self {
                year: *year,
                month: Some(*month),
                day: None,
            }),
            [year, month, day] => Some(Self {
                year: *year,
                month: Some(*month),
                day: Some(*day),
            }),
            _ => None,
        }
    }
}

/// The "now playing" record populated by a poll.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TrackMetadata {
    fields: BTreeMap<MetaField, MetaValue>,
}

impl TrackMetadata {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, field: MetaField, value: MetaValue) {
        self.fields.insert(field, value);
    }

    pub fn set_text(&mut self, field: MetaField, value: impl Into<String>) {
        self.set(field, MetaValue::Text(value.into()));
    }

    pub fn set_int(&mut self, field: MetaField, value: i64) {
        self.set(field, MetaValue::Int(value));
    }

    pub fn set_bool(&mut self, field: MetaField, value: bool) {
        self.set(field, MetaValue::Bool(value));
    }

    pub fn set_list(&mut self, field: MetaField, value: Vec<String>) {
        self.set(field, MetaValue::List(value));
    }

    pub fn set_status(&mut self, status: PlaybackStatus) {
        self.set(MetaField::Status, MetaValue::Status(status));
    }

    /// Record a release date, or remove all three date fields when `None`.
    pub fn set_release_date(&mut self, date: Option<ReleaseDate>) {
        self.remove(MetaField::ReleaseYear);
        self.remove(MetaField::ReleaseMonth);
        self.remove(MetaField::ReleaseDay);

        if let Some(date) = date {
            self.set_int(MetaField::ReleaseYear, date.year);
            if let Some(month) = date.month {
                self.set_int(MetaField::ReleaseMonth, month);
            }
            if let Some(day) = date.day {
                self.set_int(MetaField::ReleaseDay, day);
            }
        }
    }

    pub fn remove(&mut self, field: MetaField) -> Option<MetaValue> {
        self.fields.remove(&field)
    }

    pub fn clear(&mut self) {
        self.fields.clear();
    }

    #[must_use]
    pub fn get(&self, field: MetaField) -> Option<&MetaValue> {
        self.fields.get(&field)
    }

    #[must_use]
    pub fn contains(&self, field: MetaField) -> bool {
        self.fields.contains_key(&field)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MetaField, &MetaValue)> {
        self.fields.iter()
    }

    fn text(&self, field: MetaField) -> Option<&str> {
        match self.get(field) {
            Some(MetaValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    fn int(&self, field: MetaField) -> Option<i64> {
        match self.get(field) {
            Some(MetaValue::Int(n)) => Some(*n),
            _ => None,
        }
    }

    fn millis(&self, field: MetaField) -> Option<Duration> {
        self.int(field)
            .map(|ms| Duration::from_millis(u64::try_from(ms).unwrap_or(0)))
    }

    #[must_use]
    pub fn title(&self) -> Option<&str> {
        self.text(MetaField::Title)
    }

    /// Artist names in provider order. Empty when unknown.
    #[must_use]
    pub fn artists(&self) -> &[String] {
        match self.get(MetaField::Artists) {
            Some(MetaValue::List(list)) => list,
            _ => &[],
        }
    }

    #[must_use]
    pub fn album(&self) -> Option<&str> {
        self.text(MetaField::Album)
    }

    #[must_use]
    pub fn cover_url(&self) -> Option<&str> {
        self.text(MetaField::CoverUrl)
    }

    #[must_use]
    pub fn url(&self) -> Option<&str> {
        self.text(MetaField::Url)
    }

    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        self.millis(MetaField::Duration)
    }

    #[must_use]
    pub fn progress(&self) -> Option<Duration> {
        self.millis(MetaField::Progress)
    }

    /// Current status; a record without a status is stopped.
    #[must_use]
    pub fn status(&self) -> PlaybackStatus {
        match self.get(MetaField::Status) {
            Some(MetaValue::Status(status)) => *status,
            _ => PlaybackStatus::Stopped,
        }
    }

    #[must_use]
    pub fn disc_number(&self) -> Option<i64> {
        self.int(MetaField::DiscNumber)
    }

    #[must_use]
    pub fn track_number(&self) -> Option<i64> {
        self.int(MetaField::TrackNumber)
    }

    #[must_use]
    pub fn explicit(&self) -> Option<bool> {
        match self.get(MetaField::Explicit) {
            Some(MetaValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn release_year(&self) -> Option<i64> {
        self.int(MetaField::ReleaseYear)
    }

    #[must_use]
    pub fn release_month(&self) -> Option<i64> {
        self.int(MetaField::ReleaseMonth)
    }

    #[must_use]
    pub fn release_day(&self) -> Option<i64> {
        self.int(MetaField::ReleaseDay)
    }

    #[must_use]
    pub fn context_type(&self) -> Option<&str> {
        self.text(MetaField::ContextType)
    }

    #[must_use]
    pub fn context_uri(&self) -> Option<&str> {
        self.text(MetaField::ContextUri)
    }

    #[must_use]
    pub fn context_external_url(&self) -> Option<&str> {
        self.text(MetaField::ContextExternalUrl)
    }

    #[must_use]
    pub fn playlist_name(&self) -> Option<&str> {
        self.text(MetaField::PlaylistName)
    }

    /// Check if two records describe the same track (ignoring progress/status).
    #[must_use]
    pub fn same_track(&self, other: &Self) -> bool {
        self.title() == other.title()
            && self.artists() == other.artists()
            && self.album() == other.album()
            && self.url() == other.url()
    }
}
