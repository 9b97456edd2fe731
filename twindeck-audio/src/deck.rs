//! Deck implementation - one loaded track, its playback handle and tone lane
//!
//! The deck never polls a timer. Position is derived from the output clock:
//! while a handle is active it is `paused_offset + (now - start_time) * rate`,
//! otherwise it is `paused_offset`.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use atomic_float::AtomicF32;
use parking_lot::Mutex;
use tracing::debug;

use crate::buffer::AudioBuffer;
use crate::clock::OutputClock;
use crate::config::EngineConfig;
use crate::handle::{PlaybackHandle, Voice};
use crate::tone::{EqBand, EqGains, ToneShaper};

/// Slowest playback rate
pub const RATE_MIN: f64 = 0.5;
/// Fastest playback rate
pub const RATE_MAX: f64 = 2.0;
/// Highest channel gain
pub const GAIN_MAX: f64 = 2.0;

/// Deck identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeckId {
    A,
    B,
}

impl DeckId {
    pub const ALL: [DeckId; 2] = [DeckId::A, DeckId::B];

    pub fn index(self) -> usize {
        match self {
            DeckId::A => 0,
            DeckId::B => 1,
        }
    }

    /// The opposite deck
    pub fn other(self) -> DeckId {
        match self {
            DeckId::A => DeckId::B,
            DeckId::B => DeckId::A,
        }
    }
}

impl fmt::Display for DeckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeckId::A => f.write_str("A"),
            DeckId::B => f.write_str("B"),
        }
    }
}

impl FromStr for DeckId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" | "a" => Ok(DeckId::A),
            "B" | "b" => Ok(DeckId::B),
            _ => Err(()),
        }
    }
}

/// Playback state for a deck
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    /// No buffer loaded
    #[default]
    Empty,
    /// Buffer loaded, not playing
    Loaded,
    Playing,
    Paused,
}

/// Deck state snapshot for UIs and logging
#[derive(Debug, Clone, PartialEq)]
pub struct DeckState {
    pub id: DeckId,
    pub playback: PlaybackState,
    pub position: f64, // seconds
    pub duration: f64, // seconds
    pub rate: f64,     // 1.0 = original speed
    pub gain: f64,     // 0.0 - 2.0
    pub eq: EqGains,
    pub bpm: Option<f64>, // nominal BPM scaled by rate
    pub track_name: Option<String>,
    pub handle_id: Option<u64>,
}

/// Channel gain and EQ targets, written without touching the lane lock
#[derive(Debug)]
struct LaneParams {
    gain: AtomicF32,
    eq: [AtomicF32; 3],
}

impl LaneParams {
    fn new() -> Self {
        Self {
            gain: AtomicF32::new(1.0),
            eq: [AtomicF32::new(0.0), AtomicF32::new(0.0), AtomicF32::new(0.0)],
        }
    }

    fn gain(&self) -> f32 {
        self.gain.load(Ordering::Relaxed)
    }

    fn set_gain(&self, gain: f64) {
        self.gain.store(gain as f32, Ordering::Relaxed);
    }

    fn eq(&self, band: EqBand) -> f64 {
        self.eq[band.index()].load(Ordering::Relaxed) as f64
    }

    fn set_eq(&self, band: EqBand, db: f64) {
        self.eq[band.index()].store(db as f32, Ordering::Relaxed);
    }
}

/// Render-side half of a deck: voice slot, tone shaper and channel gain
pub struct DeckLane {
    voice: Option<Voice>,
    tone: ToneShaper,
    params: Arc<LaneParams>,
    smoothed_gain: f32,
}

impl DeckLane {
    const GAIN_SMOOTH_COEFF: f32 = 0.995;

    fn new(sample_rate: u32, params: Arc<LaneParams>) -> Self {
        Self {
            voice: None,
            tone: ToneShaper::new(sample_rate),
            smoothed_gain: params.gain(),
            params,
        }
    }

    /// Swap the voice slot, handing the previous voice back to the caller
    fn replace_voice(&mut self, voice: Option<Voice>) -> Option<Voice> {
        std::mem::replace(&mut self.voice, voice)
    }

    pub fn has_voice(&self) -> bool {
        self.voice.is_some()
    }

    /// Render one block of interleaved stereo into `output`
    pub fn process(&mut self, output: &mut [f32]) {
        match self.voice.as_mut() {
            Some(voice) => voice.render(output),
            None => output.fill(0.0),
        }

        for band in EqBand::ALL {
            self.tone.set_gain(band, self.params.eq(band));
        }
        self.tone.process(output);

        let gain = self.params.gain();
        for frame in output.chunks_mut(2) {
            self.smoothed_gain = Self::GAIN_SMOOTH_COEFF * self.smoothed_gain
                + (1.0 - Self::GAIN_SMOOTH_COEFF) * gain;
            for sample in frame.iter_mut() {
                *sample *= self.smoothed_gain;
            }
        }
    }
}

/// Clamp a playback rate (NaN reads as 1.0)
pub fn clamp_rate(rate: f64) -> f64 {
    if rate.is_nan() {
        1.0
    } else {
        rate.clamp(RATE_MIN, RATE_MAX)
    }
}

/// Clamp a channel gain (NaN reads as silent)
pub fn clamp_gain(gain: f64) -> f64 {
    if gain.is_nan() {
        0.0
    } else {
        gain.clamp(0.0, GAIN_MAX)
    }
}

/// A single deck, owned by the mixer on the control thread
pub struct Deck {
    id: DeckId,
    clock: Arc<dyn OutputClock>,
    /// Locked by the control path only to swap voices or reset the tone filters
    lane: Arc<Mutex<DeckLane>>,
    params: Arc<LaneParams>,
    output_rate: u32,
    looping: bool,
    buffer: Option<Arc<AudioBuffer>>,
    handle: Option<PlaybackHandle>,
    /// Clock time at which the current handle started (or was last re-based)
    start_time: f64,
    /// Buffer position in seconds while no handle is active
    paused_offset: f64,
    paused: bool,
    rate: f64,
    gain: f64,
    eq: EqGains,
    bpm: Option<f64>,
}

impl Deck {
    pub fn new(id: DeckId, clock: Arc<dyn OutputClock>, config: &EngineConfig) -> Self {
        let params = Arc::new(LaneParams::new());
        Self {
            id,
            clock,
            lane: Arc::new(Mutex::new(DeckLane::new(config.sample_rate, params.clone()))),
            params,
            output_rate: config.sample_rate,
            looping: config.looping,
            buffer: None,
            handle: None,
            start_time: 0.0,
            paused_offset: 0.0,
            paused: false,
            rate: 1.0,
            gain: 1.0,
            eq: EqGains::default(),
            bpm: None,
        }
    }

    pub fn id(&self) -> DeckId {
        self.id
    }

    pub(crate) fn lane(&self) -> Arc<Mutex<DeckLane>> {
        self.lane.clone()
    }

    /// Install a decoded buffer, stopping any current playback first
    pub fn load_buffer(&mut self, buffer: AudioBuffer) {
        self.stop();
        debug!(
            deck = %self.id,
            name = buffer.name().unwrap_or("<unnamed>"),
            duration = buffer.duration(),
            "Buffer installed"
        );
        self.buffer = Some(Arc::new(buffer));
        self.paused_offset = 0.0;
        self.bpm = None;
        self.lane.lock().tone.reset();
    }

    /// Drop the loaded buffer
    pub fn eject(&mut self) {
        self.stop();
        self.buffer = None;
        self.bpm = None;
    }

    pub fn is_loaded(&self) -> bool {
        self.buffer.is_some()
    }

    /// Start playback from the paused offset. Returns false if nothing started.
    pub fn play(&mut self) -> bool {
        self.reap_finished();
        if self.handle.is_some() {
            return false;
        }
        let Some(buffer) = self.buffer.clone() else {
            return false;
        };

        if !self.looping && self.paused_offset >= buffer.duration() {
            self.paused_offset = 0.0;
        }

        let (handle, voice) = PlaybackHandle::mint(
            buffer,
            self.paused_offset,
            self.rate,
            self.looping,
            self.output_rate,
        );
        let previous = self.lane.lock().replace_voice(Some(voice));
        drop(previous);

        self.start_time = self.clock.now();
        debug!(deck = %self.id, handle = handle.id(), offset = self.paused_offset, "Play");
        self.handle = Some(handle);
        self.paused = false;
        true
    }

    /// Freeze the position and release the handle. Returns false if not playing.
    pub fn pause(&mut self) -> bool {
        if self.handle.is_none() {
            return false;
        }
        self.paused_offset = self.wrap(self.paused_offset + self.elapsed());
        self.release();
        self.paused = true;
        debug!(deck = %self.id, offset = self.paused_offset, "Pause");
        true
    }

    /// Release any handle and rewind to the start. Safe to call repeatedly.
    pub fn stop(&mut self) -> bool {
        let was_active = self.release();
        self.paused_offset = 0.0;
        self.paused = false;
        if was_active {
            debug!(deck = %self.id, "Stop");
        }
        was_active
    }

    /// Move to `seconds`, clamped to the buffer. A playing deck keeps playing.
    /// Returns the clamped target, or None when nothing is loaded.
    pub fn seek(&mut self, seconds: f64) -> Option<f64> {
        let buffer = self.buffer.clone()?;
        let target = if seconds.is_nan() {
            0.0
        } else {
            seconds.clamp(0.0, buffer.duration())
        };

        if self.handle.is_none() {
            self.paused_offset = target;
            return Some(target);
        }

        let (handle, voice) =
            PlaybackHandle::mint(buffer, target, self.rate, self.looping, self.output_rate);
        // Old voice out, new voice in, under one lock
        let previous = self.lane.lock().replace_voice(Some(voice));
        if let Some(old) = self.handle.replace(handle) {
            old.stop();
        }
        drop(previous);

        self.paused_offset = target;
        self.start_time = self.clock.now();
        Some(target)
    }

    /// Set playback rate; returns the clamped value
    pub fn set_rate(&mut self, multiplier: f64) -> f64 {
        let rate = clamp_rate(multiplier);
        if let Some(handle) = &self.handle {
            // Fold the segment played at the old rate into the offset
            let now = self.clock.now();
            let played = (now - self.start_time).max(0.0) * self.rate;
            self.paused_offset = self.wrap(self.paused_offset + played);
            self.start_time = now;
            handle.set_rate(rate);
        }
        self.rate = rate;
        rate
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Set a tone band gain in dB; returns the clamped value
    pub fn set_eq(&mut self, band: EqBand, db: f64) -> f64 {
        let db = self.eq.set(band, db);
        self.params.set_eq(band, db);
        db
    }

    pub fn eq(&self) -> EqGains {
        self.eq
    }

    /// Set channel gain; returns the clamped value
    pub fn set_gain(&mut self, gain: f64) -> f64 {
        let gain = clamp_gain(gain);
        self.gain = gain;
        self.params.set_gain(gain);
        gain
    }

    pub fn gain(&self) -> f64 {
        self.gain
    }

    /// Nominal BPM of the loaded track, supplied by the caller.
    /// Returns the stored value; invalid BPMs clear it.
    pub fn set_bpm(&mut self, bpm: Option<f64>) -> Option<f64> {
        self.bpm = bpm.filter(|b| b.is_finite() && *b > 0.0);
        self.bpm
    }

    pub fn bpm(&self) -> Option<f64> {
        self.bpm
    }

    /// Nominal BPM scaled by the playback rate
    pub fn effective_bpm(&self) -> Option<f64> {
        self.bpm.map(|bpm| bpm * self.rate)
    }

    pub fn duration(&self) -> f64 {
        self.buffer.as_ref().map_or(0.0, |b| b.duration())
    }

    pub fn track_name(&self) -> Option<&str> {
        self.buffer.as_ref().and_then(|b| b.name())
    }

    /// Playback position in seconds
    pub fn current_time(&self) -> f64 {
        if self.handle.is_some() {
            self.wrap(self.paused_offset + self.elapsed())
        } else {
            self.paused_offset
        }
    }

    pub fn is_playing(&self) -> bool {
        match &self.handle {
            Some(handle) => {
                self.looping
                    || (!handle.has_ended()
                        && self.paused_offset + self.elapsed() < self.duration())
            }
            None => false,
        }
    }

    pub fn playback_state(&self) -> PlaybackState {
        if self.buffer.is_none() {
            PlaybackState::Empty
        } else if self.is_playing() {
            PlaybackState::Playing
        } else if self.paused {
            PlaybackState::Paused
        } else {
            PlaybackState::Loaded
        }
    }

    pub fn state(&self) -> DeckState {
        DeckState {
            id: self.id,
            playback: self.playback_state(),
            position: self.current_time(),
            duration: self.duration(),
            rate: self.rate,
            gain: self.gain,
            eq: self.eq,
            bpm: self.effective_bpm(),
            track_name: self.track_name().map(str::to_owned),
            handle_id: self.handle.as_ref().map(PlaybackHandle::id),
        }
    }

    /// Seconds of buffer played since `start_time`
    fn elapsed(&self) -> f64 {
        (self.clock.now() - self.start_time).max(0.0) * self.rate
    }

    fn wrap(&self, position: f64) -> f64 {
        let duration = self.duration();
        if duration <= 0.0 {
            0.0
        } else if self.looping {
            position.rem_euclid(duration)
        } else {
            position.clamp(0.0, duration)
        }
    }

    /// Detach the voice and drop the handle. Returns whether one was active.
    fn release(&mut self) -> bool {
        let Some(handle) = self.handle.take() else {
            return false;
        };
        let previous = self.lane.lock().replace_voice(None);
        handle.stop();
        drop(previous);
        true
    }

    /// A one-shot handle that ran off the end is settled at the end position
    fn reap_finished(&mut self) {
        if self.handle.is_some() && !self.is_playing() {
            self.paused_offset = self.duration();
            self.release();
        }
    }
}
