//! Master bus - crossfade summing, master gain and output taps
//!
//! Signal flow:
//! ```text
//! Deck A lane ─┐
//!              ├─ equal-power crossfade ─ master gain ─ soft clip ─┬─ output
//! Deck B lane ─┘                                                  ├─ meter tap
//!                                                                 └─ recorder tap
//! ```
//! Taps only read the mixed signal.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use atomic_float::AtomicF32;
use ringbuf::traits::{Observer, Producer};
use ringbuf::HeapProd;

use crate::crossfader::{clamp_position, equal_power};

/// Decaying peak meter readable from any thread
#[derive(Debug)]
pub struct PeakMeter {
    peak: AtomicF32,
}

impl PeakMeter {
    /// Per-block decay of the displayed peak
    const DECAY: f32 = 0.9;

    pub fn new() -> Self {
        Self {
            peak: AtomicF32::new(0.0),
        }
    }

    /// Decaying peak level, 0.0 - 1.0
    pub fn level(&self) -> f32 {
        self.peak.load(Ordering::Relaxed)
    }

    /// Analyse one block (analysis only, the input is not modified)
    pub fn process(&self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }

        let block_peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
        let decayed = self.level() * Self::DECAY;
        self.peak
            .store(block_peak.max(decayed).min(1.0), Ordering::Relaxed);
    }
}

impl Default for PeakMeter {
    fn default() -> Self {
        Self::new()
    }
}

/// Crossfader position and master gain packed into one atomic word
///
/// High 32 bits hold the crossfader position, low 32 bits the master gain.
/// The render path reads both with a single load, so it never sees a
/// crossfader move paired with a stale master gain.
#[derive(Debug)]
pub struct MixParams(AtomicU64);

impl MixParams {
    pub fn new(crossfader: f64, master_gain: f64) -> Self {
        Self(AtomicU64::new(pack(
            clamp_position(crossfader) as f32,
            clamp_master(master_gain) as f32,
        )))
    }

    /// `(crossfader, master_gain)` as last written
    pub fn load(&self) -> (f32, f32) {
        unpack(self.0.load(Ordering::Acquire))
    }

    /// Set crossfader position; both deck gains follow from it in one step
    pub fn set_crossfader(&self, position: f64) -> f64 {
        let position = clamp_position(position);
        self.update(|_, master| (position as f32, master));
        position
    }

    /// Set master gain, clamped to 0.0 - 1.0
    pub fn set_master_gain(&self, gain: f64) -> f64 {
        let gain = clamp_master(gain);
        self.update(|crossfader, _| (crossfader, gain as f32));
        gain
    }

    pub fn master_gain(&self) -> f64 {
        self.load().1 as f64
    }

    fn update(&self, f: impl Fn(f32, f32) -> (f32, f32)) {
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                let (crossfader, master) = unpack(bits);
                let (crossfader, master) = f(crossfader, master);
                Some(pack(crossfader, master))
            });
    }
}

fn pack(crossfader: f32, master_gain: f32) -> u64 {
    ((crossfader.to_bits() as u64) << 32) | master_gain.to_bits() as u64
}

fn unpack(bits: u64) -> (f32, f32) {
    (
        f32::from_bits((bits >> 32) as u32),
        f32::from_bits(bits as u32),
    )
}

/// Sums both deck lanes and fans the result out
pub struct MasterBus {
    /// Targets written by the control path
    params: Arc<MixParams>,
    /// Smoothed crossfader position (interpolates toward the target)
    smoothed_crossfader: f32,
    /// Smoothed master gain (prevents clicks on volume changes)
    smoothed_master_gain: f32,
    meter: Arc<PeakMeter>,
    record_tap: Option<HeapProd<f32>>,
    tap_overruns: Arc<AtomicU64>,
}

impl MasterBus {
    /// Smoothing coefficient for crossfader (~5ms at 48kHz)
    const CROSSFADER_SMOOTH_COEFF: f32 = 0.995;
    /// Smoothing coefficient for master gain (~5ms at 48kHz)
    const MASTER_GAIN_SMOOTH_COEFF: f32 = 0.995;

    pub fn new(master_gain: f64) -> Self {
        let params = Arc::new(MixParams::new(0.0, master_gain));
        let (crossfader, master_gain) = params.load();
        Self {
            params,
            smoothed_crossfader: crossfader,
            smoothed_master_gain: master_gain,
            meter: Arc::new(PeakMeter::new()),
            record_tap: None,
            tap_overruns: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Lock-free parameter cell shared with the control path
    pub fn params(&self) -> Arc<MixParams> {
        self.params.clone()
    }

    /// Jump smoothed values to their targets
    pub fn settle(&mut self) {
        let (crossfader, master_gain) = self.params.load();
        self.smoothed_crossfader = crossfader;
        self.smoothed_master_gain = master_gain;
    }

    pub fn meter(&self) -> Arc<PeakMeter> {
        self.meter.clone()
    }

    /// Samples dropped because the recorder tap was full
    pub fn tap_overruns(&self) -> Arc<AtomicU64> {
        self.tap_overruns.clone()
    }

    pub(crate) fn attach_tap(&mut self, tap: HeapProd<f32>) {
        self.tap_overruns.store(0, Ordering::Relaxed);
        self.record_tap = Some(tap);
    }

    pub(crate) fn detach_tap(&mut self) -> Option<HeapProd<f32>> {
        self.record_tap.take()
    }

    pub fn has_tap(&self) -> bool {
        self.record_tap.is_some()
    }

    /// Mix two interleaved stereo lanes into `output` and feed the taps
    pub fn mix(&mut self, deck_a: &[f32], deck_b: &[f32], output: &mut [f32]) {
        let len = output.len().min(deck_a.len()).min(deck_b.len());
        let (crossfader, master_gain) = self.params.load();

        for i in (0..len).step_by(2) {
            self.smoothed_crossfader = Self::CROSSFADER_SMOOTH_COEFF * self.smoothed_crossfader
                + (1.0 - Self::CROSSFADER_SMOOTH_COEFF) * crossfader;
            self.smoothed_master_gain = Self::MASTER_GAIN_SMOOTH_COEFF
                * self.smoothed_master_gain
                + (1.0 - Self::MASTER_GAIN_SMOOTH_COEFF) * master_gain;

            // Both gains derive from one smoothed position, so equal power holds per frame
            let (gain_a, gain_b) = equal_power(self.smoothed_crossfader as f64);
            let gain_a = gain_a as f32 * self.smoothed_master_gain;
            let gain_b = gain_b as f32 * self.smoothed_master_gain;

            output[i] = deck_a[i] * gain_a + deck_b[i] * gain_b;
            if i + 1 < len {
                output[i + 1] = deck_a[i + 1] * gain_a + deck_b[i + 1] * gain_b;
            }
        }
        output[len..].fill(0.0);

        for sample in output.iter_mut() {
            *sample = soft_clip(*sample);
        }

        self.meter.process(output);

        // Whole blocks only, so a full ring never splits a stereo frame
        if let Some(tap) = self.record_tap.as_mut() {
            if tap.vacant_len() >= output.len() {
                tap.push_slice(output);
            } else {
                self.tap_overruns
                    .fetch_add(output.len() as u64, Ordering::Relaxed);
            }
        }
    }
}

impl Default for MasterBus {
    fn default() -> Self {
        Self::new(1.0)
    }
}

/// Clamp master gain to 0.0 - 1.0 (NaN reads as silent)
pub fn clamp_master(gain: f64) -> f64 {
    if gain.is_nan() {
        0.0
    } else {
        gain.clamp(0.0, 1.0)
    }
}

/// Soft clip threshold
const SOFT_CLIP_THRESHOLD: f32 = 0.75;
/// Soft clip ceiling
const SOFT_CLIP_CEILING: f32 = 0.89;

/// Gentle soft clipper for the master bus
///
/// Transparent below the threshold; above it, approaches the ceiling
/// asymptotically.
#[inline(always)]
fn soft_clip(x: f32) -> f32 {
    let abs_x = x.abs();
    if abs_x <= SOFT_CLIP_THRESHOLD {
        return x;
    }

    let sign = x.signum();
    let knee_width = SOFT_CLIP_CEILING - SOFT_CLIP_THRESHOLD;
    let over = abs_x - SOFT_CLIP_THRESHOLD;
    let ratio = over / knee_width;

    let compressed = SOFT_CLIP_THRESHOLD + knee_width * (1.0 - (-ratio * 3.0).exp());
    sign * compressed.min(SOFT_CLIP_CEILING)
}
