//! 3-band deck EQ (tone shaper)
//!
//! Fixed series chain of RBJ Audio EQ Cookbook biquads:
//! - Low shelf at 220Hz
//! - Mid peaking bell at 1kHz, Q 0.7
//! - High shelf at 8kHz
//!
//! Each band has an independent gain in dB, clamped to ±24dB, 0dB = flat.
//! The shaper belongs to the deck lane, so it outlives individual playback
//! handles.

use std::f32::consts::PI;
use std::fmt;
use std::str::FromStr;

/// Maximum boost/cut of any band in dB
pub const EQ_RANGE_DB: f64 = 24.0;

const LOW_SHELF_HZ: f32 = 220.0;
const MID_PEAK_HZ: f32 = 1000.0;
const MID_PEAK_Q: f32 = 0.7;
const HIGH_SHELF_HZ: f32 = 8000.0;

/// EQ band selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EqBand {
    Low,
    Mid,
    High,
}

impl EqBand {
    pub const ALL: [EqBand; 3] = [EqBand::Low, EqBand::Mid, EqBand::High];

    pub fn index(self) -> usize {
        match self {
            EqBand::Low => 0,
            EqBand::Mid => 1,
            EqBand::High => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EqBand::Low => "low",
            EqBand::Mid => "mid",
            EqBand::High => "high",
        }
    }
}

impl fmt::Display for EqBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EqBand {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(EqBand::Low),
            "mid" => Ok(EqBand::Mid),
            "high" => Ok(EqBand::High),
            _ => Err(()),
        }
    }
}

/// Per-band gains in dB
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EqGains {
    pub low: f64,
    pub mid: f64,
    pub high: f64,
}

impl EqGains {
    pub fn get(&self, band: EqBand) -> f64 {
        match band {
            EqBand::Low => self.low,
            EqBand::Mid => self.mid,
            EqBand::High => self.high,
        }
    }

    /// Store a clamped gain and return the stored value
    pub fn set(&mut self, band: EqBand, db: f64) -> f64 {
        let db = clamp_db(db);
        match band {
            EqBand::Low => self.low = db,
            EqBand::Mid => self.mid = db,
            EqBand::High => self.high = db,
        }
        db
    }
}

/// Clamp a band gain into the EQ range (NaN reads as flat)
pub fn clamp_db(db: f64) -> f64 {
    if db.is_nan() {
        0.0
    } else {
        db.clamp(-EQ_RANGE_DB, EQ_RANGE_DB)
    }
}

/// Biquad filter coefficients
#[derive(Clone, Copy, Debug)]
struct BiquadCoeffs {
    a0: f32,
    a1: f32,
    a2: f32,
    b1: f32,
    b2: f32,
}

impl BiquadCoeffs {
    const UNITY: Self = Self {
        a0: 1.0,
        a1: 0.0,
        a2: 0.0,
        b1: 0.0,
        b2: 0.0,
    };
}

/// Biquad filter state for a single channel
#[derive(Default, Clone, Debug)]
struct BiquadState {
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl BiquadState {
    #[inline]
    fn process(&mut self, input: f32, coeffs: &BiquadCoeffs) -> f32 {
        let output = coeffs.a0 * input + coeffs.a1 * self.x1 + coeffs.a2 * self.x2
            - coeffs.b1 * self.y1
            - coeffs.b2 * self.y2;

        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;

        output
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// One band: target gain, smoothed gain, coefficients and stereo state
#[derive(Debug, Clone)]
struct Band {
    target_db: f32,
    smoothed_db: f32,
    coeffs: BiquadCoeffs,
    left: BiquadState,
    right: BiquadState,
}

impl Band {
    fn new() -> Self {
        Self {
            target_db: 0.0,
            smoothed_db: 0.0,
            coeffs: BiquadCoeffs::UNITY,
            left: BiquadState::default(),
            right: BiquadState::default(),
        }
    }

    fn reset(&mut self) {
        self.left.reset();
        self.right.reset();
    }
}

/// Three-band tone shaper for one deck
#[derive(Debug, Clone)]
pub struct ToneShaper {
    sample_rate: f32,
    low: Band,
    mid: Band,
    high: Band,
    smooth_coeff: f32,
}

impl ToneShaper {
    pub fn new(sample_rate: u32) -> Self {
        let sample_rate = sample_rate.max(1) as f32;
        // ~5ms at the block rate of a 256-frame callback
        let smooth_coeff = 1.0 - (-256.0 / (sample_rate * 0.005)).exp();

        Self {
            sample_rate,
            low: Band::new(),
            mid: Band::new(),
            high: Band::new(),
            smooth_coeff,
        }
    }

    /// Set a band gain in dB; returns the clamped value
    pub fn set_gain(&mut self, band: EqBand, db: f64) -> f64 {
        let db = clamp_db(db);
        self.band_mut(band).target_db = db as f32;
        db
    }

    /// Target gain of a band in dB
    pub fn gain(&self, band: EqBand) -> f64 {
        match band {
            EqBand::Low => self.low.target_db as f64,
            EqBand::Mid => self.mid.target_db as f64,
            EqBand::High => self.high.target_db as f64,
        }
    }

    /// Clear filter memory
    pub fn reset(&mut self) {
        self.low.reset();
        self.mid.reset();
        self.high.reset();
    }

    fn band_mut(&mut self, band: EqBand) -> &mut Band {
        match band {
            EqBand::Low => &mut self.low,
            EqBand::Mid => &mut self.mid,
            EqBand::High => &mut self.high,
        }
    }

    /// Process interleaved stereo in place
    pub fn process(&mut self, samples: &mut [f32]) {
        self.smooth_and_update();

        for frame in samples.chunks_exact_mut(2) {
            let mut left = frame[0];
            let mut right = frame[1];

            left = self.low.left.process(left, &self.low.coeffs);
            right = self.low.right.process(right, &self.low.coeffs);

            left = self.mid.left.process(left, &self.mid.coeffs);
            right = self.mid.right.process(right, &self.mid.coeffs);

            left = self.high.left.process(left, &self.high.coeffs);
            right = self.high.right.process(right, &self.high.coeffs);

            frame[0] = left;
            frame[1] = right;
        }
    }

    /// Move smoothed gains toward their targets and refresh coefficients
    fn smooth_and_update(&mut self) {
        let sample_rate = self.sample_rate;
        let coeff = self.smooth_coeff;

        for (index, band) in [&mut self.low, &mut self.mid, &mut self.high]
            .into_iter()
            .enumerate()
        {
            let before = band.smoothed_db;
            if (band.smoothed_db - band.target_db).abs() > 0.001 {
                band.smoothed_db += (band.target_db - band.smoothed_db) * coeff;
            } else {
                band.smoothed_db = band.target_db;
            }

            if band.smoothed_db != before {
                band.coeffs = match index {
                    0 => low_shelf(sample_rate, LOW_SHELF_HZ, band.smoothed_db),
                    1 => peaking(sample_rate, MID_PEAK_HZ, band.smoothed_db, MID_PEAK_Q),
                    _ => high_shelf(sample_rate, HIGH_SHELF_HZ, band.smoothed_db),
                };
            }
        }
    }
}

/// Low shelf coefficients (RBJ cookbook, slope 1)
fn low_shelf(sample_rate: f32, freq: f32, gain_db: f32) -> BiquadCoeffs {
    if gain_db.abs() < 0.01 {
        return BiquadCoeffs::UNITY;
    }

    let a = 10.0f32.powf(gain_db / 40.0);
    let omega = 2.0 * PI * freq / sample_rate;
    let sin_omega = omega.sin();
    let cos_omega = omega.cos();
    let alpha = sin_omega / 2.0 * (2.0f32).sqrt();
    let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

    let a0 = (a + 1.0) + (a - 1.0) * cos_omega + two_sqrt_a_alpha;

    BiquadCoeffs {
        a0: (a * ((a + 1.0) - (a - 1.0) * cos_omega + two_sqrt_a_alpha)) / a0,
        a1: (2.0 * a * ((a - 1.0) - (a + 1.0) * cos_omega)) / a0,
        a2: (a * ((a + 1.0) - (a - 1.0) * cos_omega - two_sqrt_a_alpha)) / a0,
        b1: (-2.0 * ((a - 1.0) + (a + 1.0) * cos_omega)) / a0,
        b2: ((a + 1.0) + (a - 1.0) * cos_omega - two_sqrt_a_alpha) / a0,
    }
}

/// High shelf coefficients (RBJ cookbook, slope 1)
fn high_shelf(sample_rate: f32, freq: f32, gain_db: f32) -> BiquadCoeffs {
    if gain_db.abs() < 0.01 {
        return BiquadCoeffs::UNITY;
    }

    let a = 10.0f32.powf(gain_db / 40.0);
    let omega = 2.0 * PI * freq / sample_rate;
    let sin_omega = omega.sin();
    let cos_omega = omega.cos();
    let alpha = sin_omega / 2.0 * (2.0f32).sqrt();
    let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

    let a0 = (a + 1.0) - (a - 1.0) * cos_omega + two_sqrt_a_alpha;

    BiquadCoeffs {
        a0: (a * ((a + 1.0) + (a - 1.0) * cos_omega + two_sqrt_a_alpha)) / a0,
        a1: (-2.0 * a * ((a - 1.0) + (a + 1.0) * cos_omega)) / a0,
        a2: (a * ((a + 1.0) + (a - 1.0) * cos_omega - two_sqrt_a_alpha)) / a0,
        b1: (2.0 * ((a - 1.0) - (a + 1.0) * cos_omega)) / a0,
        b2: ((a + 1.0) - (a - 1.0) * cos_omega - two_sqrt_a_alpha) / a0,
    }
}

/// Peaking bell coefficients (RBJ cookbook)
fn peaking(sample_rate: f32, freq: f32, gain_db: f32, q: f32) -> BiquadCoeffs {
    if gain_db.abs() < 0.01 {
        return BiquadCoeffs::UNITY;
    }

    let a = 10.0f32.powf(gain_db / 40.0);
    let omega = 2.0 * PI * freq / sample_rate;
    let sin_omega = omega.sin();
    let cos_omega = omega.cos();
    let alpha = sin_omega / (2.0 * q);

    let a0 = 1.0 + alpha / a;

    BiquadCoeffs {
        a0: (1.0 + alpha * a) / a0,
        a1: (-2.0 * cos_omega) / a0,
        a2: (1.0 - alpha * a) / a0,
        b1: (-2.0 * cos_omega) / a0,
        b2: (1.0 - alpha / a) / a0,
    }
}
