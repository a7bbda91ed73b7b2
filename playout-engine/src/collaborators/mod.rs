//! External collaborator contracts
//!
//! The engine owns playback only. The authoritative queue, track metadata,
//! stream locations, the emergency playlist and telemetry delivery all live
//! behind these traits.

pub mod fallback;
pub mod sqlite;
pub mod telemetry;

pub use fallback::ConfigFallbackProvider;
pub use sqlite::SqliteLibrary;
pub use telemetry::EventBusTelemetry;

use crate::error::Result;
use async_trait::async_trait;
use playout_common::events::TelemetryEvent;
use playout_common::{FallbackEntry, Track};
use std::sync::Arc;

/// Owner of the persisted play queue
///
/// Indexes address the queue as the engine sees it (the current track is not
/// part of the queue).
#[async_trait]
pub trait QueueProvider: Send + Sync {
    async fn append(&self, track: &Track) -> Result<()>;
    async fn insert_front(&self, track: &Track) -> Result<()>;
    async fn remove_at(&self, index: usize) -> Result<()>;
    async fn move_entry(&self, from: usize, to: usize) -> Result<()>;
    async fn clear(&self) -> Result<()>;
    async fn fetch_all(&self) -> Result<Vec<Track>>;
}

/// Maps track ids to streams and metadata
#[async_trait]
pub trait TrackResolver: Send + Sync {
    async fn resolve_stream_url(&self, track_id: &str) -> Result<String>;
    async fn resolve_metadata(&self, track_id: &str) -> Result<Track>;
    /// Lightweight existence check, no media is fetched
    async fn probe_availability(&self, track_id: &str) -> Result<bool>;
}

/// Source of the emergency backup playlist
#[async_trait]
pub trait FallbackProvider: Send + Sync {
    async fn fetch_emergency_playlist(&self) -> Result<Vec<FallbackEntry>>;
}

/// Playback telemetry sink
///
/// Fire-and-forget: the engine logs a returned error and carries on.
pub trait Telemetry: Send + Sync {
    fn emit(&self, event: TelemetryEvent) -> Result<()>;
}

/// The full set of collaborators the engine talks to
#[derive(Clone)]
pub struct Collaborators {
    pub queue_provider: Arc<dyn QueueProvider>,
    pub resolver: Arc<dyn TrackResolver>,
    pub fallback: Arc<dyn FallbackProvider>,
    pub telemetry: Arc<dyn Telemetry>,
}
