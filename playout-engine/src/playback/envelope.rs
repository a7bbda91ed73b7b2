//! Volume envelope controller
//!
//! Time-based volume ramps (fade-in, fade-out, crossfade halves), one slot per
//! channel. A ramp is a plain owned value sampled on every engine tick against
//! the monotonic clock; starting a new ramp on a channel replaces the old one,
//! which is dropped without being finished. Nothing runs in the background, so
//! two ramps can never write the same channel volume.
//!
//! The controller only computes levels. The engine applies them to the
//! transport, which is the sole owner of channel volume.

use playout_common::events::ChannelLabel;
use playout_common::FadeCurve;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Why a ramp was started; tells the engine what its completion means
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RampPurpose {
    /// Solo fade-in of a freshly loaded track
    FadeIn,
    /// Solo fade-out towards the end of a track with nothing queued
    FadeOut,
    /// Incoming half of a crossfade
    CrossfadeIn,
    /// Outgoing half of a crossfade
    CrossfadeOut,
    /// Bring a channel back to the user target after an aborted fade
    Restore,
}

/// A single scheduled interpolation of one channel's volume
#[derive(Debug, Clone)]
pub struct Ramp {
    from: f32,
    to: f32,
    started_at: Instant,
    duration: Duration,
    curve: FadeCurve,
    purpose: RampPurpose,
}

impl Ramp {
    pub fn new(
        from: f32,
        to: f32,
        duration: Duration,
        curve: FadeCurve,
        purpose: RampPurpose,
        now: Instant,
    ) -> Self {
        Self {
            from: from.clamp(0.0, 1.0),
            to: to.clamp(0.0, 1.0),
            started_at: now,
            duration,
            curve,
            purpose,
        }
    }

    /// Normalized progress in [0, 1]
    pub fn progress(&self, now: Instant) -> f32 {
        if self.duration.is_zero() {
            return 1.0;
        }
        let elapsed = now.saturating_duration_since(self.started_at);
        (elapsed.as_secs_f64() / self.duration.as_secs_f64()).clamp(0.0, 1.0) as f32
    }

    /// Volume at `now`; exactly `to` once progress reaches 1.0
    pub fn level(&self, now: Instant) -> f32 {
        let progress = self.progress(now);
        if progress >= 1.0 {
            self.to
        } else {
            self.curve.interpolate(self.from, self.to, progress)
        }
    }

    pub fn is_finished(&self, now: Instant) -> bool {
        self.progress(now) >= 1.0
    }

    pub fn purpose(&self) -> RampPurpose {
        self.purpose
    }

    pub fn target(&self) -> f32 {
        self.to
    }

    pub fn curve(&self) -> FadeCurve {
        self.curve
    }
}

/// One sampled volume for one channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvelopeStep {
    pub label: ChannelLabel,
    pub volume: f32,
    /// Set on the tick at which the ramp reached its target
    pub completed: Option<RampPurpose>,
}

/// Per-channel ramp slots
#[derive(Debug, Default)]
pub struct EnvelopeController {
    a: Option<Ramp>,
    b: Option<Ramp>,
}

impl EnvelopeController {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot_mut(&mut self, label: ChannelLabel) -> &mut Option<Ramp> {
        match label {
            ChannelLabel::A => &mut self.a,
            ChannelLabel::B => &mut self.b,
        }
    }

    fn slot(&self, label: ChannelLabel) -> Option<&Ramp> {
        match label {
            ChannelLabel::A => self.a.as_ref(),
            ChannelLabel::B => self.b.as_ref(),
        }
    }

    /// Schedule a ramp on `label`, superseding whatever ramp it had
    ///
    /// Returns the superseded ramp, if any (already detached; it will never
    /// be sampled again).
    #[allow(clippy::too_many_arguments)]
    pub fn ramp_volume(
        &mut self,
        label: ChannelLabel,
        from: f32,
        to: f32,
        duration: Duration,
        curve: FadeCurve,
        purpose: RampPurpose,
        now: Instant,
    ) -> Option<Ramp> {
        let ramp = Ramp::new(from, to, duration, curve, purpose, now);
        debug!(
            "Channel {}: {:?} ramp {:.2} -> {:.2} over {}ms ({})",
            label,
            purpose,
            ramp.from,
            ramp.to,
            duration.as_millis(),
            curve
        );
        let superseded = self.slot_mut(label).replace(ramp);
        if let Some(old) = &superseded {
            debug!("Channel {}: superseded in-flight {:?} ramp", label, old.purpose);
        }
        superseded
    }

    /// Drop the ramp on `label` without finishing it
    pub fn cancel(&mut self, label: ChannelLabel) -> Option<Ramp> {
        self.slot_mut(label).take()
    }

    pub fn cancel_all(&mut self) {
        self.a = None;
        self.b = None;
    }

    pub fn is_ramping(&self, label: ChannelLabel) -> bool {
        self.slot(label).is_some()
    }

    pub fn purpose(&self, label: ChannelLabel) -> Option<RampPurpose> {
        self.slot(label).map(|r| r.purpose)
    }

    /// Sample every in-flight ramp at `now`
    ///
    /// Finished ramps are removed and reported once through `completed`.
    pub fn advance(&mut self, now: Instant) -> Vec<EnvelopeStep> {
        let mut steps = Vec::with_capacity(2);
        for label in [ChannelLabel::A, ChannelLabel::B] {
            let slot = self.slot_mut(label);
            let Some(ramp) = slot.as_ref() else {
                continue;
            };

            let volume = ramp.level(now);
            let completed = if ramp.is_finished(now) {
                let purpose = ramp.purpose;
                *slot = None;
                Some(purpose)
            } else {
                None
            };

            steps.push(EnvelopeStep {
                label,
                volume,
                completed,
            });
        }
        steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_linear_ramp_midpoint_and_exact_end() {
        let t0 = Instant::now();
        let ramp = Ramp::new(0.0, 0.8, ms(1000), FadeCurve::Linear, RampPurpose::CrossfadeIn, t0);

        assert_eq!(ramp.level(t0), 0.0);
        assert!((ramp.level(t0 + ms(500)) - 0.4).abs() < 1e-4);
        assert_eq!(ramp.level(t0 + ms(1000)), 0.8);
        // Well past the end still lands exactly on target
        assert_eq!(ramp.level(t0 + ms(5000)), 0.8);
    }

    #[test]
    fn test_levels_are_clamped() {
        let t0 = Instant::now();
        let ramp = Ramp::new(-0.5, 1.5, ms(100), FadeCurve::EaseOutCubic, RampPurpose::FadeIn, t0);
        for step in 0..=10 {
            let v = ramp.level(t0 + ms(step * 10));
            assert!((0.0..=1.0).contains(&v), "level {} out of range", v);
        }
        assert_eq!(ramp.level(t0 + ms(100)), 1.0);
    }

    #[test]
    fn test_zero_duration_finishes_immediately() {
        let t0 = Instant::now();
        let ramp = Ramp::new(1.0, 0.0, Duration::ZERO, FadeCurve::Linear, RampPurpose::FadeOut, t0);
        assert!(ramp.is_finished(t0));
        assert_eq!(ramp.level(t0), 0.0);
    }

    #[test]
    fn test_new_ramp_supersedes_old() {
        let t0 = Instant::now();
        let mut env = EnvelopeController::new();
        env.ramp_volume(ChannelLabel::A, 0.0, 1.0, ms(2000), FadeCurve::EaseOutCubic, RampPurpose::FadeIn, t0);

        let old = env.ramp_volume(
            ChannelLabel::A,
            0.5,
            0.0,
            ms(1000),
            FadeCurve::Linear,
            RampPurpose::CrossfadeOut,
            t0 + ms(300),
        );
        assert_eq!(old.map(|r| r.purpose()), Some(RampPurpose::FadeIn));
        assert_eq!(env.purpose(ChannelLabel::A), Some(RampPurpose::CrossfadeOut));

        // Only one step per channel per tick
        let steps = env.advance(t0 + ms(800));
        assert_eq!(steps.len(), 1);
        assert!((steps[0].volume - 0.25).abs() < 1e-4);
    }

    #[test]
    fn test_completion_reported_once() {
        let t0 = Instant::now();
        let mut env = EnvelopeController::new();
        env.ramp_volume(ChannelLabel::B, 0.0, 0.6, ms(1000), FadeCurve::Linear, RampPurpose::CrossfadeIn, t0);
        env.ramp_volume(ChannelLabel::A, 0.6, 0.0, ms(1000), FadeCurve::Linear, RampPurpose::CrossfadeOut, t0);

        let mid = env.advance(t0 + ms(500));
        assert_eq!(mid.len(), 2);
        assert!(mid.iter().all(|s| s.completed.is_none()));

        let end = env.advance(t0 + ms(1000));
        let b = end.iter().find(|s| s.label == ChannelLabel::B).unwrap();
        let a = end.iter().find(|s| s.label == ChannelLabel::A).unwrap();
        assert_eq!(b.volume, 0.6);
        assert_eq!(b.completed, Some(RampPurpose::CrossfadeIn));
        assert_eq!(a.volume, 0.0);
        assert_eq!(a.completed, Some(RampPurpose::CrossfadeOut));

        assert!(env.advance(t0 + ms(1100)).is_empty());
        assert!(!env.is_ramping(ChannelLabel::A));
    }

    #[test]
    fn test_cancel_drops_without_finishing() {
        let t0 = Instant::now();
        let mut env = EnvelopeController::new();
        env.ramp_volume(ChannelLabel::A, 1.0, 0.0, ms(3000), FadeCurve::EaseInCubic, RampPurpose::FadeOut, t0);
        assert!(env.cancel(ChannelLabel::A).is_some());
        assert!(env.advance(t0 + ms(3000)).is_empty());
    }
}
