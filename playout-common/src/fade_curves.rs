//! Fade curve implementations for volume envelopes
//!
//! Three curve types cover the playout engine's fades:
//! - **Linear**: constant rate, used for true crossfades so both channels
//!   change at the same rate and the summed level stays even
//! - **EaseOutCubic**: fast start, slow finish, used for solo fade-in
//! - **EaseInCubic**: slow start, fast finish, used for solo fade-out
//!
//! A curve maps normalized progress `t ∈ [0, 1]` to eased progress in `[0, 1]`.
//! Interpolating between two levels is done with [`FadeCurve::interpolate`].

use serde::{Deserialize, Serialize};

/// Fade curve types for volume ramps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FadeCurve {
    /// v(t) = t
    #[default]
    Linear,

    /// v(t) = 1 - (1 - t)³
    EaseOutCubic,

    /// v(t) = t³
    EaseInCubic,
}

impl FadeCurve {
    /// Eased progress for normalized position `t`
    ///
    /// Input is clamped to [0, 1], so `apply(0.0) == 0.0` and `apply(1.0) == 1.0`
    /// exactly for every curve.
    pub fn apply(&self, position: f32) -> f32 {
        let t = if position.is_nan() { 0.0 } else { position.clamp(0.0, 1.0) };

        match self {
            FadeCurve::Linear => t,
            FadeCurve::EaseOutCubic => {
                let inv = 1.0 - t;
                1.0 - inv * inv * inv
            }
            FadeCurve::EaseInCubic => t * t * t,
        }
    }

    /// Level between `from` and `to` at normalized position `t`, clamped to [0, 1]
    pub fn interpolate(&self, from: f32, to: f32, position: f32) -> f32 {
        let eased = self.apply(position);
        (from + (to - from) * eased).clamp(0.0, 1.0)
    }

    /// Parse curve from string (config files)
    ///
    /// Accepts `linear`, `ease_out_cubic` / `ease-out-cubic`, `ease_in_cubic` / `ease-in-cubic`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "linear" => Some(FadeCurve::Linear),
            "ease_out_cubic" | "easeoutcubic" => Some(FadeCurve::EaseOutCubic),
            "ease_in_cubic" | "easeincubic" => Some(FadeCurve::EaseInCubic),
            _ => None,
        }
    }

    /// Get human-readable display name
    pub fn display_name(&self) -> &'static str {
        match self {
            FadeCurve::Linear => "Linear",
            FadeCurve::EaseOutCubic => "Ease-Out Cubic",
            FadeCurve::EaseInCubic => "Ease-In Cubic",
        }
    }

    /// Get all available fade curve variants
    pub fn all_variants() -> &'static [FadeCurve] {
        &[FadeCurve::Linear, FadeCurve::EaseOutCubic, FadeCurve::EaseInCubic]
    }
}

impl std::fmt::Display for FadeCurve {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}
