//! Playout-related type definitions
//!
//! Supporting types for engine mode, channel identity and error reporting.

use serde::{Deserialize, Serialize};

/// Playout engine mode
///
/// There is no terminal mode; the engine runs for the lifetime of the broadcast process.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlayoutMode {
    /// Nothing loaded (queue may still hold tracks)
    #[default]
    Idle,
    /// Waiting for the transport to report a channel ready
    Loading,
    Playing,
    /// Two channels audible while the envelope hands over
    Crossfading,
    Paused,
    /// Waiting out the retry delay after a transport failure
    Error,
    /// Playing the backup playlist
    Emergency,
}

impl PlayoutMode {
    /// Modes in which a track is audible on the active channel
    pub fn is_on_air(&self) -> bool {
        matches!(self, PlayoutMode::Playing | PlayoutMode::Crossfading | PlayoutMode::Emergency)
    }
}

impl std::fmt::Display for PlayoutMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayoutMode::Idle => write!(f, "idle"),
            PlayoutMode::Loading => write!(f, "loading"),
            PlayoutMode::Playing => write!(f, "playing"),
            PlayoutMode::Crossfading => write!(f, "crossfading"),
            PlayoutMode::Paused => write!(f, "paused"),
            PlayoutMode::Error => write!(f, "error"),
            PlayoutMode::Emergency => write!(f, "emergency"),
        }
    }
}

/// One of the two interchangeable output channels
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ChannelLabel {
    A,
    B,
}

impl ChannelLabel {
    /// The other channel of the pair
    pub fn other(self) -> Self {
        match self {
            ChannelLabel::A => ChannelLabel::B,
            ChannelLabel::B => ChannelLabel::A,
        }
    }
}

impl std::fmt::Display for ChannelLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelLabel::A => write!(f, "A"),
            ChannelLabel::B => write!(f, "B"),
        }
    }
}

/// Error classification reported through telemetry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Stream missing or unreachable; recovered by skipping
    ResourceUnavailable,
    /// Runtime refused playback until a user gesture; never auto-skipped
    PlaybackBlocked,
    /// Queue index out of range; rejected locally
    QueueOperationOutOfRange,
    /// Remote queue write failed; local queue kept as is
    QueueSyncFailed,
    /// Emergency playlist empty or could not be fetched
    FallbackUnavailable,
    /// Emergency playlist itself keeps failing
    FallbackExhausted,
}

impl ErrorKind {
    /// Errors that need an operator to act
    pub fn is_fatal(&self) -> bool {
        matches!(self, ErrorKind::FallbackUnavailable | ErrorKind::FallbackExhausted)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::ResourceUnavailable => "resource_unavailable",
            ErrorKind::PlaybackBlocked => "playback_blocked",
            ErrorKind::QueueOperationOutOfRange => "queue_operation_out_of_range",
            ErrorKind::QueueSyncFailed => "queue_sync_failed",
            ErrorKind::FallbackUnavailable => "fallback_unavailable",
            ErrorKind::FallbackExhausted => "fallback_exhausted",
        };
        f.write_str(s)
    }
}

/// Severity of a user-facing notice
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NoticeSeverity {
    Info,
    Warning,
    Fatal,
}
