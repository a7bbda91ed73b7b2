//! # Playout Engine Library (playout-engine)
//!
//! Continuous audio playout with gapless crossfades and an emergency
//! fallback playlist.
//!
//! **Purpose:** Keep audio on air. Sequence the queue across two output
//! channels, crossfade between tracks, recover from stream failures, and fall
//! back to a backup playlist when the normal queue keeps failing. The engine
//! runs as a single-writer actor behind an HTTP/SSE control interface.

pub mod api;
pub mod collaborators;
pub mod config;
pub mod db;
pub mod error;
pub mod playback;
pub mod state;

pub use error::{Error, Result};
pub use playback::{PlayoutHandle, PlayoutService};
pub use state::SharedState;
