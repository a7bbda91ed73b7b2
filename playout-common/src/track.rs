//! Track model shared by the engine, its collaborators and the HTTP API

use serde::{Deserialize, Serialize};

/// Kind of broadcast asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Song,
    Commercial,
    Show,
    Jingle,
    #[default]
    Other,
}

impl TrackKind {
    /// Parse kind from its stored string form (case insensitive)
    ///
    /// Unknown values map to `Other` so that a bad catalogue row never blocks playout.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "song" | "music" => TrackKind::Song,
            "commercial" | "ad" | "advert" => TrackKind::Commercial,
            "show" | "program" | "programme" => TrackKind::Show,
            "jingle" | "id" | "sweeper" => TrackKind::Jingle,
            _ => TrackKind::Other,
        }
    }

    /// Canonical stored string form
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Song => "song",
            TrackKind::Commercial => "commercial",
            TrackKind::Show => "show",
            TrackKind::Jingle => "jingle",
            TrackKind::Other => "other",
        }
    }
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A broadcast asset as fetched from the library
///
/// Immutable once fetched. Whoever holds it (queue, now-playing slot, history)
/// owns its own copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Opaque stable identifier
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(default)]
    pub kind: TrackKind,
    /// Unknown until resolved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
}

impl Track {
    /// Create a track with only the required fields set
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: None,
            kind: TrackKind::Other,
            duration_seconds: None,
        }
    }

    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = Some(artist.into());
        self
    }

    pub fn with_kind(mut self, kind: TrackKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration_seconds = Some(seconds);
        self
    }

    /// Synthesise a track for an emergency playlist entry
    ///
    /// Fallback entries have no library identity; the id is derived from the
    /// playlist position so telemetry can still tell entries apart.
    pub fn from_fallback(entry: &FallbackEntry, index: usize) -> Self {
        Self {
            id: format!("fallback:{}", index),
            title: entry.name.clone(),
            artist: None,
            kind: TrackKind::Other,
            duration_seconds: entry.duration_seconds,
        }
    }

    /// "Artist - Title" or just the title, for log lines
    pub fn display_name(&self) -> String {
        match &self.artist {
            Some(artist) if !artist.is_empty() => format!("{} - {}", artist, self.title),
            _ => self.title.clone(),
        }
    }
}

/// Entry of the emergency backup playlist
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackEntry {
    pub name: String,
    pub uri: String,
    /// Known length; lets outputs that cannot measure the stream end it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
}

impl FallbackEntry {
    pub fn new(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
            duration_seconds: None,
        }
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration_seconds = Some(seconds);
        self
    }
}
