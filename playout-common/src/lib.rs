//! # Playout Common Library
//!
//! Shared code for the playout workspace:
//! - Track model and fallback playlist entries
//! - Event types (PlayoutEvent enum) for telemetry and SSE
//! - Fade curve definitions used by the volume envelope
//! - Configuration file resolution
//! - Timestamp helpers

pub mod config;
pub mod error;
pub mod events;
pub mod fade_curves;
pub mod time;
pub mod track;

pub use error::{Error, Result};
pub use fade_curves::FadeCurve;
pub use track::{FallbackEntry, Track, TrackKind};
