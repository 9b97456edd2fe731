//! Equal-power crossfader
//!
//! Position runs from -1.0 (deck A only) through 0.0 (both at -3dB) to
//! +1.0 (deck B only). Gains follow `cos`/`sin` of the normalized position so
//! that `gain_a² + gain_b² = 1` everywhere.

use std::f64::consts::FRAC_PI_2;

/// Lowest crossfader position (full deck A)
pub const CROSSFADER_MIN: f64 = -1.0;
/// Highest crossfader position (full deck B)
pub const CROSSFADER_MAX: f64 = 1.0;

/// Clamp a position into the crossfader range (NaN reads as center)
pub fn clamp_position(position: f64) -> f64 {
    if position.is_nan() {
        0.0
    } else {
        position.clamp(CROSSFADER_MIN, CROSSFADER_MAX)
    }
}

/// Map a position to 0..1
#[inline]
pub fn normalize(position: f64) -> f64 {
    (clamp_position(position) - CROSSFADER_MIN) / (CROSSFADER_MAX - CROSSFADER_MIN)
}

/// Equal-power gains `(gain_a, gain_b)` for a crossfader position
#[inline]
pub fn equal_power(position: f64) -> (f64, f64) {
    let angle = normalize(position) * FRAC_PI_2;
    (angle.cos(), angle.sin())
}

/// Crossfader control state
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Crossfader {
    position: f64,
}

impl Crossfader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the position; returns the clamped value
    pub fn set_position(&mut self, position: f64) -> f64 {
        self.position = clamp_position(position);
        self.position
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    /// Gains for the current position
    pub fn gains(&self) -> (f64, f64) {
        equal_power(self.position)
    }
}
