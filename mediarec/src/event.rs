//! Recorder lifecycle events

use mediarec_core::{TrackIndex, TrackRole};
use mediarec_media::TrackStats;
use std::path::PathBuf;
use tokio::sync::broadcast;

/// Events broadcast while a session runs
#[derive(Debug, Clone)]
pub enum RecorderEvent {
    /// A track's format is known and it was added to the container
    TrackRegistered {
        /// Track role
        role: TrackRole,
        /// Container index
        index: TrackIndex,
    },
    /// Every expected track is known; samples are now written
    MuxerStarted {
        /// Tracks in the container
        track_count: usize,
    },
    /// A track's encoder failed
    TrackFailed {
        /// Track role
        role: TrackRole,
        /// Failure description
        error: String,
        /// Whether the session continues without this track
        recoverable: bool,
    },
    /// A track drained and released its encoder
    TrackFinished {
        /// Track role
        role: TrackRole,
        /// Final counters
        stats: TrackStats,
    },
    /// The session ended
    Stopped {
        /// Output file
        path: PathBuf,
        /// Whether the file was finalized successfully
        success: bool,
    },
}

impl RecorderEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            RecorderEvent::TrackRegistered { .. } => "track_registered",
            RecorderEvent::MuxerStarted { .. } => "muxer_started",
            RecorderEvent::TrackFailed { .. } => "track_failed",
            RecorderEvent::TrackFinished { .. } => "track_finished",
            RecorderEvent::Stopped { .. } => "stopped",
        }
    }

    /// Check if this is a track-related event
    pub fn is_track_event(&self) -> bool {
        matches!(
            self,
            RecorderEvent::TrackRegistered { .. }
                | RecorderEvent::TrackFailed { .. }
                | RecorderEvent::TrackFinished { .. }
        )
    }

    /// Check if this is an error event
    pub fn is_error_event(&self) -> bool {
        matches!(
            self,
            RecorderEvent::TrackFailed { .. } | RecorderEvent::Stopped { success: false, .. }
        )
    }
}

/// Broadcast capacity; slow subscribers lag rather than block workers
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Sending half shared by the recorder and its workers
#[derive(Debug, Clone)]
pub(crate) struct EventSender {
    tx: broadcast::Sender<RecorderEvent>,
}

impl EventSender {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Send, ignoring the no-subscriber case
    pub(crate) fn emit(&self, event: RecorderEvent) {
        tracing::trace!("Recorder event: {}", event.event_type());
        let _ = self.tx.send(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<RecorderEvent> {
        self.tx.subscribe()
    }
}
