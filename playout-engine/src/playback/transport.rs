//! Dual-channel transport
//!
//! Owns the two long-lived output channels (A and B) and the single
//! `active` label. Which channel is audible and position-tracked is never a
//! per-channel flag: it is derived from `active`, so exactly one channel is
//! active at any time and a swap changes both views in one assignment.
//!
//! **Responsibilities:**
//! - Bind a channel to a track's resolved stream (`load`)
//! - Start, pause, stop and seek a channel
//! - Apply per-channel volume (the only writer of channel volume)
//! - Report remaining time of a channel
//!
//! The transport never retries. Failures are returned to the engine, which
//! owns every recovery decision.

use super::output::{AudioOutput, OutputEvent};
use crate::error::Result;
use playout_common::events::ChannelLabel;
use playout_common::Track;
use serde::Serialize;
use tracing::{debug, warn};

/// One output channel slot
#[derive(Debug, Clone, Serialize)]
pub struct Channel {
    pub label: ChannelLabel,
    /// Track this channel is bound to
    pub bound_track: Option<Track>,
    /// Known stream duration (from the output, else the track metadata)
    pub duration_seconds: Option<f64>,
    /// Envelope volume in [0, 1]
    pub volume: f32,
    /// Output reported the stream ready
    pub loaded: bool,
    pub playing: bool,
}

impl Channel {
    fn new(label: ChannelLabel) -> Self {
        Self {
            label,
            bound_track: None,
            duration_seconds: None,
            volume: 0.0,
            loaded: false,
            playing: false,
        }
    }

    pub fn bound_track_id(&self) -> Option<&str> {
        self.bound_track.as_ref().map(|t| t.id.as_str())
    }

    fn unbind(&mut self) {
        self.bound_track = None;
        self.duration_seconds = None;
        self.loaded = false;
        self.playing = false;
    }
}

/// The A/B channel pair
pub struct DualTransport {
    a: Channel,
    b: Channel,
    active: ChannelLabel,
    output: Box<dyn AudioOutput>,
}

impl DualTransport {
    /// Both channels unbound, A active
    pub fn new(output: Box<dyn AudioOutput>) -> Self {
        Self {
            a: Channel::new(ChannelLabel::A),
            b: Channel::new(ChannelLabel::B),
            active: ChannelLabel::A,
            output,
        }
    }

    pub fn channel(&self, label: ChannelLabel) -> &Channel {
        match label {
            ChannelLabel::A => &self.a,
            ChannelLabel::B => &self.b,
        }
    }

    fn channel_mut(&mut self, label: ChannelLabel) -> &mut Channel {
        match label {
            ChannelLabel::A => &mut self.a,
            ChannelLabel::B => &mut self.b,
        }
    }

    pub fn active(&self) -> ChannelLabel {
        self.active
    }

    pub fn inactive(&self) -> ChannelLabel {
        self.active.other()
    }

    pub fn is_active(&self, label: ChannelLabel) -> bool {
        self.active == label
    }

    pub fn active_channel(&self) -> &Channel {
        self.channel(self.active)
    }

    /// Make `label` the active channel; the other becomes inactive in the
    /// same step
    pub fn set_active(&mut self, label: ChannelLabel) {
        if self.active != label {
            debug!("Transport: active channel {} -> {}", self.active, label);
            self.active = label;
        }
    }

    /// Bind `label` to `track` streaming from `uri`, position 0
    ///
    /// Whatever the channel was doing is stopped first. Readiness arrives
    /// later as [`OutputEvent::Ready`].
    pub fn load(&mut self, label: ChannelLabel, track: &Track, uri: &str) -> Result<()> {
        self.output.stop(label);
        self.channel_mut(label).unbind();

        debug!("Transport: loading '{}' on channel {} from {}", track.id, label, uri);
        self.output.open(label, uri, track.duration_seconds)?;

        let channel = self.channel_mut(label);
        channel.bound_track = Some(track.clone());
        channel.duration_seconds = track.duration_seconds;
        Ok(())
    }

    /// Record the output's ready report; returns false for a stale report
    /// (channel since unbound)
    pub fn mark_ready(&mut self, label: ChannelLabel, duration: Option<f64>) -> bool {
        let channel = self.channel_mut(label);
        if channel.bound_track.is_none() {
            return false;
        }
        channel.loaded = true;
        if let Some(d) = duration.filter(|d| d.is_finite() && *d > 0.0) {
            channel.duration_seconds = Some(d);
        }
        true
    }

    pub fn play(&mut self, label: ChannelLabel) -> Result<()> {
        self.output.play(label)?;
        self.channel_mut(label).playing = true;
        Ok(())
    }

    pub fn pause(&mut self, label: ChannelLabel) {
        self.output.pause(label);
        self.channel_mut(label).playing = false;
    }

    /// Stop and unbind `label`
    pub fn stop(&mut self, label: ChannelLabel) {
        self.output.stop(label);
        self.channel_mut(label).unbind();
    }

    pub fn stop_all(&mut self) {
        self.stop(ChannelLabel::A);
        self.stop(ChannelLabel::B);
    }

    /// Reposition `label`, clamped to the known duration
    pub fn seek(&mut self, label: ChannelLabel, seconds: f64) -> f64 {
        let seconds = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
        let target = match self.channel(label).duration_seconds {
            Some(d) => seconds.min(d),
            None => seconds,
        };
        self.output.seek(label, target);
        target
    }

    /// Set envelope volume; always clamped to [0, 1]
    pub fn set_volume(&mut self, label: ChannelLabel, volume: f32) {
        let volume = if volume.is_nan() { 0.0 } else { volume.clamp(0.0, 1.0) };
        self.channel_mut(label).volume = volume;
        self.output.set_volume(label, volume);
    }

    pub fn volume(&self, label: ChannelLabel) -> f32 {
        self.channel(label).volume
    }

    pub fn position(&self, label: ChannelLabel) -> f64 {
        if self.channel(label).bound_track.is_none() {
            return 0.0;
        }
        self.output.position(label)
    }

    /// `duration - position`, or None while the duration is unknown
    pub fn remaining(&self, label: ChannelLabel) -> Option<f64> {
        let duration = self.channel(label).duration_seconds?;
        Some((duration - self.position(label)).max(0.0))
    }

    pub fn poll_events(&mut self) -> Vec<OutputEvent> {
        let events = self.output.poll_events();
        for event in &events {
            if let OutputEvent::Error { label, kind } = event {
                warn!("Transport: channel {} reported {}", label, kind);
            }
        }
        events
    }
}
