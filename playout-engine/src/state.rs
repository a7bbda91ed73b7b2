//! Shared playout state
//!
//! Read-only view of the engine for HTTP handlers and SSE clients. The engine
//! task is the only writer: it publishes a fresh [`PlayoutSnapshot`] after
//! every command and tick. Readers never touch the live session.

use playout_common::events::{ChannelLabel, EventBus, PlayoutEvent, PlayoutMode};
use playout_common::Track;
use serde::Serialize;
use tokio::sync::{broadcast, RwLock};

/// Capacity of the SSE event bus
const EVENT_BUS_CAPACITY: usize = 256;

/// Emergency part of a snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmergencySnapshot {
    pub cursor: usize,
    pub playlist_len: usize,
    /// Name of the fallback entry at the cursor
    pub entry_name: Option<String>,
    pub consecutive_fallback_errors: u32,
}

/// Point-in-time copy of the playout session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayoutSnapshot {
    pub mode: PlayoutMode,
    pub current_track: Option<Track>,
    pub queue: Vec<Track>,
    pub elapsed_seconds: f64,
    pub duration_seconds: Option<f64>,
    /// User volume target (0-100)
    pub volume: u8,
    pub consecutive_errors: u32,
    pub active_channel: ChannelLabel,
    pub crossfade_in_progress: bool,
    pub emergency: Option<EmergencySnapshot>,
}

impl Default for PlayoutSnapshot {
    fn default() -> Self {
        Self {
            mode: PlayoutMode::Idle,
            current_track: None,
            queue: Vec::new(),
            elapsed_seconds: 0.0,
            duration_seconds: None,
            volume: 0,
            consecutive_errors: 0,
            active_channel: ChannelLabel::A,
            crossfade_in_progress: false,
            emergency: None,
        }
    }
}

/// Shared state accessible by the engine, API handlers and SSE
///
/// Uses RwLock for concurrent read access with one writer
pub struct SharedState {
    snapshot: RwLock<PlayoutSnapshot>,
    events: EventBus,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(PlayoutSnapshot::default()),
            events: EventBus::new(EVENT_BUS_CAPACITY),
        }
    }

    /// Event bus handle (for the telemetry sink)
    pub fn event_bus(&self) -> EventBus {
        self.events.clone()
    }

    /// Broadcast an event to all SSE listeners
    pub fn broadcast_event(&self, event: PlayoutEvent) {
        self.events.emit_lossy(event);
    }

    /// Subscribe to event stream for SSE
    pub fn subscribe_events(&self) -> broadcast::Receiver<PlayoutEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> PlayoutSnapshot {
        self.snapshot.read().await.clone()
    }

    pub async fn publish(&self, snapshot: PlayoutSnapshot) {
        *self.snapshot.write().await = snapshot;
    }

    pub async fn mode(&self) -> PlayoutMode {
        self.snapshot.read().await.mode
    }

    pub async fn current_track(&self) -> Option<Track> {
        self.snapshot.read().await.current_track.clone()
    }

    pub async fn queue_snapshot(&self) -> Vec<Track> {
        self.snapshot.read().await.queue.clone()
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}
