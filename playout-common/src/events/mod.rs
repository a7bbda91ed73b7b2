//! Event types for the playout event system
//!
//! Two layers:
//! - [`TelemetryEvent`]: the fixed set of playback facts handed to the external
//!   telemetry collaborator (play started, track ended, error, emergency entered/exited)
//! - [`PlayoutEvent`]: everything broadcast on the [`EventBus`] for SSE clients,
//!   which is a superset of the telemetry events

mod playout_types;

pub use playout_types::{ChannelLabel, ErrorKind, NoticeSeverity, PlayoutMode};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Playback telemetry events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TelemetryEvent {
    /// A track became audible
    PlayStarted { track_id: String },

    /// A track left the air
    ///
    /// Always emitted after the queue has been popped for that track.
    TrackEnded { track_id: String },

    /// A transport, queue or fallback failure
    Error {
        track_id: Option<String>,
        kind: ErrorKind,
    },

    EmergencyEntered,

    EmergencyExited,
}

impl TelemetryEvent {
    /// Short name used for log lines and SSE event fields
    pub fn name(&self) -> &'static str {
        match self {
            TelemetryEvent::PlayStarted { .. } => "PlayStarted",
            TelemetryEvent::TrackEnded { .. } => "TrackEnded",
            TelemetryEvent::Error { .. } => "Error",
            TelemetryEvent::EmergencyEntered => "EmergencyEntered",
            TelemetryEvent::EmergencyExited => "EmergencyExited",
        }
    }
}

/// Events broadcast to SSE subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlayoutEvent {
    /// Track became audible
    PlayStarted {
        track_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Track left the air (natural end, crossfade or skip)
    TrackEnded {
        track_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Failure reported through telemetry
    PlayoutError {
        track_id: Option<String>,
        kind: ErrorKind,
        timestamp: DateTime<Utc>,
    },

    EmergencyEntered { timestamp: DateTime<Utc> },

    EmergencyExited { timestamp: DateTime<Utc> },

    /// Engine mode transition
    ModeChanged {
        old_mode: PlayoutMode,
        new_mode: PlayoutMode,
        timestamp: DateTime<Utc>,
    },

    /// Local queue changed
    QueueChanged {
        length: usize,
        timestamp: DateTime<Utc>,
    },

    /// User volume target changed (0-100)
    VolumeChanged { volume: u8, timestamp: DateTime<Utc> },

    /// User-facing notice
    Notice {
        severity: NoticeSeverity,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl PlayoutEvent {
    /// Event type name for the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            PlayoutEvent::PlayStarted { .. } => "PlayStarted",
            PlayoutEvent::TrackEnded { .. } => "TrackEnded",
            PlayoutEvent::PlayoutError { .. } => "PlayoutError",
            PlayoutEvent::EmergencyEntered { .. } => "EmergencyEntered",
            PlayoutEvent::EmergencyExited { .. } => "EmergencyExited",
            PlayoutEvent::ModeChanged { .. } => "ModeChanged",
            PlayoutEvent::QueueChanged { .. } => "QueueChanged",
            PlayoutEvent::VolumeChanged { .. } => "VolumeChanged",
            PlayoutEvent::Notice { .. } => "Notice",
        }
    }
}

impl From<&TelemetryEvent> for PlayoutEvent {
    fn from(event: &TelemetryEvent) -> Self {
        let timestamp = Utc::now();
        match event {
            TelemetryEvent::PlayStarted { track_id } => PlayoutEvent::PlayStarted {
                track_id: track_id.clone(),
                timestamp,
            },
            TelemetryEvent::TrackEnded { track_id } => PlayoutEvent::TrackEnded {
                track_id: track_id.clone(),
                timestamp,
            },
            TelemetryEvent::Error { track_id, kind } => PlayoutEvent::PlayoutError {
                track_id: track_id.clone(),
                kind: *kind,
                timestamp,
            },
            TelemetryEvent::EmergencyEntered => PlayoutEvent::EmergencyEntered { timestamp },
            TelemetryEvent::EmergencyExited => PlayoutEvent::EmergencyExited { timestamp },
        }
    }
}

/// Central event distribution bus
///
/// Uses tokio::broadcast internally:
/// - Non-blocking publish (slow subscribers don't block the engine)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PlayoutEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PlayoutEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PlayoutEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
