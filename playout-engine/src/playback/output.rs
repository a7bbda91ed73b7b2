//! Audio output seam
//!
//! [`AudioOutput`] is what the dual-channel transport drives: two addressable
//! output channels that can open a stream, start, pause, seek and change
//! volume, and that report readiness, end of stream and failures as events.
//! Decoding and device output live behind this trait.
//!
//! [`ClockOutput`] is the headless implementation used by the binary. It opens
//! nothing; a channel's position simply advances with the monotonic clock
//! while it is playing, which is enough to run the whole state machine
//! (crossfade timing, natural ends) against the library. A stream of unknown
//! length ends after the assumed duration, if one is set.

use crate::error::{Error, Result};
use playout_common::events::{ChannelLabel, ErrorKind};
use std::path::Path;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Asynchronous notification from an output channel
#[derive(Debug, Clone, PartialEq)]
pub enum OutputEvent {
    /// Stream opened and buffered; `duration` if the stream knows it
    Ready {
        label: ChannelLabel,
        duration: Option<f64>,
    },
    /// Playback reached the end of the stream
    Ended { label: ChannelLabel },
    /// Stream failed after it was opened
    Error { label: ChannelLabel, kind: ErrorKind },
}

/// Two-channel audio output
///
/// Calls never block on I/O. `open` and `play` may fail synchronously; late
/// failures come back through [`AudioOutput::poll_events`].
pub trait AudioOutput: Send {
    /// Bind `label` to the stream at `uri`, position 0, not yet playing
    ///
    /// Fails with [`Error::ResourceUnavailable`] if the stream cannot be opened.
    fn open(&mut self, label: ChannelLabel, uri: &str, duration_hint: Option<f64>) -> Result<()>;

    /// Start or resume audible playback
    ///
    /// Fails with [`Error::PlaybackBlocked`] if the runtime refuses playback.
    fn play(&mut self, label: ChannelLabel) -> Result<()>;

    fn pause(&mut self, label: ChannelLabel);

    /// Stop and release the stream bound to `label`
    fn stop(&mut self, label: ChannelLabel);

    fn seek(&mut self, label: ChannelLabel, seconds: f64);

    /// Output gain in [0, 1]
    fn set_volume(&mut self, label: ChannelLabel, volume: f32);

    /// Playback position in seconds
    fn position(&self, label: ChannelLabel) -> f64;

    /// Drain pending events, oldest first
    fn poll_events(&mut self) -> Vec<OutputEvent>;
}

#[derive(Debug, Default)]
struct ClockChannel {
    uri: Option<String>,
    /// Where the stream ends: the known duration, else the assumed one
    duration: Option<f64>,
    /// Position accumulated before the current play run
    base_position: f64,
    /// Start of the current play run
    playing_since: Option<Instant>,
    volume: f32,
    ended: bool,
}

impl ClockChannel {
    fn position(&self) -> f64 {
        let running = self
            .playing_since
            .map(|since| since.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        let position = self.base_position + running;
        match self.duration {
            Some(d) => position.min(d),
            None => position,
        }
    }

    fn freeze(&mut self) {
        self.base_position = self.position();
        self.playing_since = None;
    }
}

/// Headless output whose positions follow the monotonic clock
#[derive(Debug, Default)]
pub struct ClockOutput {
    a: ClockChannel,
    b: ClockChannel,
    pending: Vec<OutputEvent>,
    assumed_duration: Option<f64>,
}

impl ClockOutput {
    /// Streams of unknown length never end
    pub fn new() -> Self {
        Self::default()
    }

    /// End streams of unknown length after `seconds`
    pub fn with_assumed_duration(mut self, seconds: f64) -> Self {
        self.assumed_duration = Some(seconds).filter(|s| s.is_finite() && *s > 0.0);
        self
    }

    fn channel(&self, label: ChannelLabel) -> &ClockChannel {
        match label {
            ChannelLabel::A => &self.a,
            ChannelLabel::B => &self.b,
        }
    }

    fn channel_mut(&mut self, label: ChannelLabel) -> &mut ClockChannel {
        match label {
            ChannelLabel::A => &mut self.a,
            ChannelLabel::B => &mut self.b,
        }
    }

    /// Volume last set on `label`
    pub fn volume(&self, label: ChannelLabel) -> f32 {
        self.channel(label).volume
    }
}

/// Local files must exist; remote schemes are taken on trust
fn check_openable(uri: &str) -> Result<()> {
    let trimmed = uri.trim();
    if trimmed.is_empty() {
        return Err(Error::ResourceUnavailable("empty stream uri".to_string()));
    }
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return Ok(());
    }
    let path = trimmed.strip_prefix("file://").unwrap_or(trimmed);
    if Path::new(path).exists() {
        Ok(())
    } else {
        Err(Error::ResourceUnavailable(format!("no such file: {}", path)))
    }
}

impl AudioOutput for ClockOutput {
    fn open(&mut self, label: ChannelLabel, uri: &str, duration_hint: Option<f64>) -> Result<()> {
        check_openable(uri)?;

        // Ready reports only a known length; the assumed one just ends the stream
        let duration = duration_hint.filter(|d| d.is_finite() && *d > 0.0);
        let assumed = self.assumed_duration;
        let channel = self.channel_mut(label);
        *channel = ClockChannel {
            uri: Some(uri.to_string()),
            duration: duration.or(assumed),
            volume: channel.volume,
            ..ClockChannel::default()
        };
        debug!("ClockOutput {}: opened {}", label, uri);

        self.pending.push(OutputEvent::Ready { label, duration });
        Ok(())
    }

    fn play(&mut self, label: ChannelLabel) -> Result<()> {
        let channel = self.channel_mut(label);
        if channel.uri.is_none() {
            return Err(Error::InvalidState(format!("channel {} has no stream", label)));
        }
        if channel.playing_since.is_none() && !channel.ended {
            channel.playing_since = Some(Instant::now());
        }
        Ok(())
    }

    fn pause(&mut self, label: ChannelLabel) {
        self.channel_mut(label).freeze();
    }

    fn stop(&mut self, label: ChannelLabel) {
        let channel = self.channel_mut(label);
        let volume = channel.volume;
        *channel = ClockChannel {
            volume,
            ..ClockChannel::default()
        };
        // Drop anything the old stream still had queued
        self.pending.retain(|e| match e {
            OutputEvent::Ready { label: l, .. }
            | OutputEvent::Ended { label: l }
            | OutputEvent::Error { label: l, .. } => *l != label,
        });
    }

    fn seek(&mut self, label: ChannelLabel, seconds: f64) {
        let channel = self.channel_mut(label);
        let was_playing = channel.playing_since.is_some();
        let target = match channel.duration {
            Some(d) => seconds.clamp(0.0, d),
            None => seconds.max(0.0),
        };
        channel.base_position = target;
        channel.ended = false;
        channel.playing_since = if was_playing { Some(Instant::now()) } else { None };
    }

    fn set_volume(&mut self, label: ChannelLabel, volume: f32) {
        self.channel_mut(label).volume = volume.clamp(0.0, 1.0);
    }

    fn position(&self, label: ChannelLabel) -> f64 {
        self.channel(label).position()
    }

    fn poll_events(&mut self) -> Vec<OutputEvent> {
        for label in [ChannelLabel::A, ChannelLabel::B] {
            let channel = self.channel_mut(label);
            if channel.ended || channel.playing_since.is_none() {
                continue;
            }
            if let Some(duration) = channel.duration {
                if channel.position() >= duration {
                    channel.freeze();
                    channel.ended = true;
                    self.pending.push(OutputEvent::Ended { label });
                }
            }
        }

        if self.pending.len() > 8 {
            warn!("ClockOutput: {} events pending", self.pending.len());
        }
        std::mem::take(&mut self.pending)
    }
}
