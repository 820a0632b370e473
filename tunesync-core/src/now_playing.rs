use crate::capability::CapabilitySet;
use crate::metadata::{MetaField, PlaybackStatus, TrackMetadata};
use crate::time::DurationExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};

/// Events emitted by the now-playing store
#[derive(Debug, Clone)]
pub enum NowPlayingEvent {
    /// A different track is now loaded
    TrackChanged { metadata: TrackMetadata },
    /// Same track, status changed (playing <-> paused/stopped)
    StatusChanged { status: PlaybackStatus },
    /// Same track and status; progress or other fields refreshed
    Updated,
    /// No active session; all metadata was dropped
    Cleared,
}

/// Holds the current metadata record.
///
/// The poll loop is the only writer. Consumers (file writers, web servers,
/// UIs) read snapshots or subscribe to change events.
pub struct NowPlayingStore {
    metadata: RwLock<TrackMetadata>,
    capabilities: CapabilitySet,
    event_tx: broadcast::Sender<NowPlayingEvent>,
}

impl NowPlayingStore {
    /// Create a new store for a source advertising `capabilities`
    #[must_use]
    pub fn new(capabilities: CapabilitySet) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(64);

        Arc::new(Self {
            metadata: RwLock::new(TrackMetadata::default()),
            capabilities,
            event_tx,
        })
    }

    /// Subscribe to change events
    pub fn subscribe(&self) -> broadcast::Receiver<NowPlayingEvent> {
        self.event_tx.subscribe()
    }

    /// Replace the whole record with a freshly parsed one
    pub async fn replace(&self, new: TrackMetadata) {
        let mut current = self.metadata.write().await;

        let event = if !current.same_track(&new) {
            NowPlayingEvent::TrackChanged {
                metadata: new.clone(),
            }
        } else if current.status() != new.status() {
            NowPlayingEvent::StatusChanged {
                status: new.status(),
            }
        } else {
            NowPlayingEvent::Updated
        };

        *current = new;
        let _ = self.event_tx.send(event);
    }

    /// Change only the status, keeping every other field
    pub async fn set_status(&self, status: PlaybackStatus) {
        let mut current = self.metadata.write().await;
        if current.status() == status {
            return;
        }
        current.set_status(status);
        let _ = self.event_tx.send(NowPlayingEvent::StatusChanged { status });
    }

    /// Change only the progress, keeping every other field
    pub async fn set_progress(&self, progress: Duration) {
        let mut current = self.metadata.write().await;
        current.set_int(MetaField::Progress, progress.as_millis_i64());
        let _ = self.event_tx.send(NowPlayingEvent::Updated);
    }

    /// Drop all metadata
    pub async fn clear(&self) {
        let mut current = self.metadata.write().await;
        if current.is_empty() {
            return;
        }
        current.clear();
        let _ = self.event_tx.send(NowPlayingEvent::Cleared);
    }

    /// Snapshot of the current record
    pub async fn current_metadata(&self) -> TrackMetadata {
        self.metadata.read().await.clone()
    }

    /// Current playback status
    pub async fn current_status(&self) -> PlaybackStatus {
        self.metadata.read().await.status()
    }

    /// Transport controls the source supports
    #[must_use]
    pub const fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }
}
