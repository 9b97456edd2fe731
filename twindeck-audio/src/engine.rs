//! Mixer - owns both decks, the master bus and the recorder
//!
//! The `Mixer` lives on the control thread and is the only object callers
//! talk to. The output device pulls audio through a `RenderGraph`, a cheap
//! clone that shares the deck lanes and the bus with the mixer.
//!
//! Continuous parameters (EQ, gain, rate, crossfader, master) are atomics read
//! once per block. The lane and bus locks are only taken by the control path
//! to swap voices or attach the recorder tap.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::buffer::{AudioBuffer, AudioSource, Decode};
use crate::bus::{MasterBus, MixParams, PeakMeter};
use crate::clock::OutputClock;
use crate::command::{Command, ControlId, MixerEvent};
use crate::config::EngineConfig;
use crate::crossfader::Crossfader;
use crate::deck::{Deck, DeckId, DeckLane, DeckState, PlaybackState};
use crate::error::MixerError;
use crate::recorder::{PendingRecording, Recorder, RecorderState};
use crate::tone::EqBand;

/// Pre-allocated render buffer size (interleaved samples)
/// Sized for 2048 stereo frames; larger device blocks are rendered in chunks
const MAX_BUFFER_SIZE: usize = 4096;

/// Per-subscriber event queue depth
const EVENT_CAPACITY: usize = 1024;

/// Render side of the engine, handed to the output callback
#[derive(Clone)]
pub struct RenderGraph {
    lanes: [Arc<Mutex<DeckLane>>; 2],
    bus: Arc<Mutex<MasterBus>>,
    clock: Arc<dyn OutputClock>,
    disposed: Arc<AtomicBool>,
    buffer_a: Vec<f32>,
    buffer_b: Vec<f32>,
}

impl RenderGraph {
    /// Fill `output` (interleaved stereo) with the next block of the mix.
    ///
    /// The clock advances only by frames that were actually rendered. If a
    /// lane or the bus is busy the block is silent and nothing moves, so
    /// voice positions and clock-derived deck positions stay in step.
    pub fn process(&mut self, output: &mut [f32]) {
        if self.disposed.load(Ordering::Acquire) || self.clock.is_suspended() {
            output.fill(0.0);
            return;
        }

        let (Some(mut lane_a), Some(mut lane_b), Some(mut bus)) = (
            self.lanes[0].try_lock(),
            self.lanes[1].try_lock(),
            self.bus.try_lock(),
        ) else {
            output.fill(0.0);
            return;
        };

        for block in output.chunks_mut(MAX_BUFFER_SIZE) {
            let len = block.len();
            let buf_a = &mut self.buffer_a[..len];
            let buf_b = &mut self.buffer_b[..len];

            lane_a.process(buf_a);
            lane_b.process(buf_b);
            bus.mix(buf_a, buf_b, block);
        }
        drop((lane_a, lane_b, bus));

        self.clock.advance_frames((output.len() / 2) as u64);
    }
}

/// Dual-deck mixer façade
pub struct Mixer {
    config: EngineConfig,
    clock: Arc<dyn OutputClock>,
    decoder: Box<dyn Decode>,
    decks: [Deck; 2],
    crossfader: Crossfader,
    bus: Arc<Mutex<MasterBus>>,
    mix_params: Arc<MixParams>,
    meter: Arc<PeakMeter>,
    recorder: Recorder,
    graph: RenderGraph,
    subscribers: Vec<Sender<MixerEvent>>,
    initialized: bool,
    disposed: Arc<AtomicBool>,
}

impl Mixer {
    pub fn new(
        config: EngineConfig,
        clock: Arc<dyn OutputClock>,
        decoder: Box<dyn Decode>,
    ) -> Self {
        let decks = [
            Deck::new(DeckId::A, clock.clone(), &config),
            Deck::new(DeckId::B, clock.clone(), &config),
        ];
        let bus = Arc::new(Mutex::new(MasterBus::new(config.master_volume)));
        let (meter, mix_params) = {
            let bus = bus.lock();
            (bus.meter(), bus.params())
        };
        let recorder = Recorder::new(bus.clone(), clock.clone(), &config);
        let disposed = Arc::new(AtomicBool::new(false));

        let graph = RenderGraph {
            lanes: [decks[0].lane(), decks[1].lane()],
            bus: bus.clone(),
            clock: clock.clone(),
            disposed: disposed.clone(),
            buffer_a: vec![0.0f32; MAX_BUFFER_SIZE],
            buffer_b: vec![0.0f32; MAX_BUFFER_SIZE],
        };

        Self {
            config,
            clock,
            decoder,
            decks,
            crossfader: Crossfader::new(),
            bus,
            mix_params,
            meter,
            recorder,
            graph,
            subscribers: Vec::new(),
            initialized: false,
            disposed,
        }
    }

    /// Start the output clock. Safe to call more than once.
    pub fn init(&mut self) -> Result<(), MixerError> {
        self.ensure_live()?;
        if self.initialized {
            return Ok(());
        }
        if self.clock.is_suspended() {
            self.clock.resume();
        }
        self.bus.lock().settle();
        self.initialized = true;
        info!(
            sample_rate = self.config.sample_rate,
            looping = self.config.looping,
            "Mixer initialized"
        );
        Ok(())
    }

    /// Tear everything down: recording discarded, decks emptied, output silenced
    pub fn dispose(&mut self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.recorder.discard();
        for deck in self.decks.iter_mut() {
            deck.eject();
        }
        self.emit(MixerEvent::Disposed);
        self.subscribers.clear();
        info!("Mixer disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clock(&self) -> Arc<dyn OutputClock> {
        self.clock.clone()
    }

    /// Render side for the output callback
    pub fn render_graph(&self) -> RenderGraph {
        self.graph.clone()
    }

    /// Receive events for every mutating call. A slow subscriber loses events.
    pub fn subscribe(&mut self) -> Receiver<MixerEvent> {
        let (tx, rx) = bounded(EVENT_CAPACITY);
        self.subscribers.push(tx);
        rx
    }

    // --- Decks ---

    /// Decode `source` onto a deck. Playback on the deck is stopped first;
    /// if decoding fails the previous buffer stays loaded.
    pub fn load(
        &mut self,
        deck: DeckId,
        source: impl Into<AudioSource>,
    ) -> Result<(), MixerError> {
        self.ensure_live()?;
        let source = source.into();

        if self.deck_mut(deck).stop() {
            self.emit_play_state(deck);
        }

        match self.decoder.decode(&source) {
            Ok(buffer) => {
                let buffer = match (buffer.name().is_none(), source.display_name()) {
                    (true, Some(name)) => buffer.with_name(name),
                    _ => buffer,
                };
                self.load_buffer(deck, buffer);
                Ok(())
            }
            Err(e) => {
                warn!(deck = %deck, error = %e, "Load failed");
                self.emit(MixerEvent::LoadFailed {
                    deck,
                    error: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    /// Install an already decoded buffer
    pub fn load_buffer(&mut self, deck: DeckId, buffer: AudioBuffer) {
        let name = buffer.name().map(str::to_owned);
        let duration = buffer.duration();
        self.deck_mut(deck).load_buffer(buffer);
        info!(
            deck = %deck,
            name = name.as_deref().unwrap_or("<unnamed>"),
            duration,
            "Track loaded"
        );
        self.emit(MixerEvent::TrackLoaded {
            deck,
            name,
            duration,
        });
    }

    /// Returns true if playback started
    pub fn play(&mut self, deck: DeckId) -> bool {
        let started = self.deck_mut(deck).play();
        if started {
            self.emit_play_state(deck);
        }
        started
    }

    pub fn pause(&mut self, deck: DeckId) {
        if self.deck_mut(deck).pause() {
            self.emit_play_state(deck);
        }
    }

    pub fn stop(&mut self, deck: DeckId) {
        if self.deck_mut(deck).stop() {
            self.emit_play_state(deck);
        }
    }

    /// Returns the clamped target, or None when the deck is empty
    pub fn seek(&mut self, deck: DeckId, seconds: f64) -> Option<f64> {
        let position = self.deck_mut(deck).seek(seconds)?;
        self.emit(MixerEvent::Seeked { deck, position });
        Some(position)
    }

    pub fn set_rate(&mut self, deck: DeckId, multiplier: f64) -> f64 {
        let rate = self.deck_mut(deck).set_rate(multiplier);
        self.emit_control(ControlId::Rate(deck), rate);
        rate
    }

    pub fn set_eq(&mut self, deck: DeckId, band: EqBand, db: f64) -> f64 {
        let db = self.deck_mut(deck).set_eq(band, db);
        self.emit_control(ControlId::Eq(deck, band), db);
        db
    }

    pub fn set_gain(&mut self, deck: DeckId, gain: f64) -> f64 {
        let gain = self.deck_mut(deck).set_gain(gain);
        self.emit_control(ControlId::Gain(deck), gain);
        gain
    }

    /// Store the nominal BPM of the track on `deck` (used by `sync`)
    pub fn set_bpm(&mut self, deck: DeckId, bpm: Option<f64>) -> Option<f64> {
        let bpm = self.deck_mut(deck).set_bpm(bpm);
        self.emit(MixerEvent::BpmChanged { deck, bpm });
        bpm
    }

    pub fn current_time(&self, deck: DeckId) -> f64 {
        self.deck(deck).current_time()
    }

    pub fn duration(&self, deck: DeckId) -> f64 {
        self.deck(deck).duration()
    }

    pub fn is_playing(&self, deck: DeckId) -> bool {
        self.deck(deck).is_playing()
    }

    pub fn deck_state(&self, deck: DeckId) -> DeckState {
        self.deck(deck).state()
    }

    // --- Tempo sync ---

    /// Set `follower`'s rate so that `follower_bpm * rate` matches `leader_bpm`.
    /// Returns the applied (clamped) rate; invalid BPMs leave the rate alone.
    pub fn sync_rate(&mut self, follower: DeckId, leader_bpm: f64, follower_bpm: f64) -> f64 {
        let valid = |bpm: f64| bpm.is_finite() && bpm > 0.0;
        if !valid(leader_bpm) || !valid(follower_bpm) {
            warn!(leader_bpm, follower_bpm, "Ignoring sync with invalid BPM");
            return self.deck(follower).rate();
        }
        let rate = self.set_rate(follower, leader_bpm / follower_bpm);
        debug!(deck = %follower, leader_bpm, follower_bpm, rate, "Synced");
        rate
    }

    /// Sync `follower` to the other deck's effective BPM using stored BPMs.
    /// Returns None when either BPM is unknown.
    pub fn sync(&mut self, follower: DeckId) -> Option<f64> {
        let leader_bpm = self.deck(follower.other()).effective_bpm()?;
        let follower_bpm = self.deck(follower).bpm()?;
        Some(self.sync_rate(follower, leader_bpm, follower_bpm))
    }

    // --- Master ---

    /// -1.0 = deck A only, 1.0 = deck B only. Returns the clamped position.
    pub fn set_crossfader(&mut self, position: f64) -> f64 {
        let position = self.crossfader.set_position(position);
        // Both gains derive from this one write
        self.mix_params.set_crossfader(position);
        self.emit_control(ControlId::Crossfader, position);
        position
    }

    pub fn crossfader(&self) -> f64 {
        self.crossfader.position()
    }

    /// Current `(gain_a, gain_b)` of the crossfader
    pub fn crossfader_gains(&self) -> (f64, f64) {
        self.crossfader.gains()
    }

    pub fn set_master_volume(&mut self, level: f64) -> f64 {
        let level = self.mix_params.set_master_gain(level);
        self.emit_control(ControlId::MasterVolume, level);
        level
    }

    pub fn master_volume(&self) -> f64 {
        self.mix_params.master_gain()
    }

    /// Decaying peak of the master output, 0.0 - 1.0
    pub fn meter_level(&self) -> f64 {
        self.meter.level() as f64
    }

    // --- Recording ---

    pub fn start_recording(&mut self) -> Result<(), MixerError> {
        self.ensure_live()?;
        self.recorder.start()?;
        self.emit(MixerEvent::RecordingStarted);
        Ok(())
    }

    pub fn stop_recording(&mut self) -> Result<PendingRecording, MixerError> {
        let pending = self.recorder.stop()?;
        self.emit(MixerEvent::RecordingStopped {
            duration: pending.duration(),
        });
        Ok(pending)
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    pub fn recorder_state(&self) -> RecorderState {
        self.recorder.state()
    }

    /// Seconds recorded so far
    pub fn recording_elapsed(&self) -> f64 {
        self.recorder.elapsed()
    }

    // --- Commands ---

    /// Run a command. `StopRecording` yields the pending recording.
    pub fn apply(&mut self, command: Command) -> Result<Option<PendingRecording>, MixerError> {
        match command {
            Command::Load(deck, source) => self.load(deck, source)?,
            Command::Play(deck) => {
                self.play(deck);
            }
            Command::Pause(deck) => self.pause(deck),
            Command::Stop(deck) => self.stop(deck),
            Command::Seek(deck, seconds) => {
                self.seek(deck, seconds);
            }
            Command::SetRate(deck, rate) => {
                self.set_rate(deck, rate);
            }
            Command::SetEq(deck, band, db) => {
                self.set_eq(deck, band, db);
            }
            Command::SetGain(deck, gain) => {
                self.set_gain(deck, gain);
            }
            Command::SetBpm(deck, bpm) => {
                self.set_bpm(deck, bpm);
            }
            Command::Sync(follower) => {
                self.sync(follower);
            }
            Command::SetCrossfader(position) => {
                self.set_crossfader(position);
            }
            Command::SetMasterVolume(level) => {
                self.set_master_volume(level);
            }
            Command::StartRecording => self.start_recording()?,
            Command::StopRecording => return self.stop_recording().map(Some),
        }
        Ok(None)
    }

    fn deck(&self, id: DeckId) -> &Deck {
        &self.decks[id.index()]
    }

    fn deck_mut(&mut self, id: DeckId) -> &mut Deck {
        &mut self.decks[id.index()]
    }

    fn ensure_live(&self) -> Result<(), MixerError> {
        if self.is_disposed() {
            Err(MixerError::Disposed)
        } else {
            Ok(())
        }
    }

    fn emit_play_state(&mut self, deck: DeckId) {
        let state: PlaybackState = self.deck(deck).playback_state();
        debug!(deck = %deck, ?state, "Play state changed");
        self.emit(MixerEvent::PlayStateChanged { deck, state });
    }

    fn emit_control(&mut self, control: ControlId, value: f64) {
        self.emit(MixerEvent::ControlChanged { control, value });
    }

    /// Never blocks; disconnected subscribers are dropped
    fn emit(&mut self, event: MixerEvent) {
        self.subscribers.retain(|tx| {
            !matches!(
                tx.try_send(event.clone()),
                Err(TrySendError::Disconnected(_))
            )
        });
    }
}

impl Drop for Mixer {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{FrameClock, ManualClock};
    use crate::error::DecodeError;

    struct ConstDecoder(f32);

    impl Decode for ConstDecoder {
        fn decode(&self, _source: &AudioSource) -> Result<AudioBuffer, DecodeError> {
            AudioBuffer::from_interleaved(vec![self.0; 2000], 1000, 2)
        }
    }

    fn mixer_with(clock: Arc<dyn OutputClock>) -> Mixer {
        let config = EngineConfig::with_sample_rate(1000);
        Mixer::new(config, clock, Box::new(ConstDecoder(0.5)))
    }

    #[test]
    fn test_graph_renders_crossfaded_mix() {
        let mut mixer = mixer_with(Arc::new(ManualClock::new()));
        mixer.init().unwrap();
        mixer.load(DeckId::A, "a.wav").unwrap();
        mixer.set_crossfader(-1.0);
        mixer.bus.lock().settle();
        mixer.play(DeckId::A);

        let mut graph = mixer.render_graph();
        let mut out = vec![0.0; 64];
        graph.process(&mut out);
        assert!(out.iter().all(|&s| (s - 0.5).abs() < 1e-3), "{:?}", &out[..4]);
        assert!(mixer.meter_level() > 0.4);
    }

    fn ramp_buffer(frames: usize, sample_rate: u32) -> AudioBuffer {
        let samples = (0..frames)
            .flat_map(|i| {
                let v = i as f32 / frames as f32;
                [v, v]
            })
            .collect();
        AudioBuffer::from_interleaved(samples, sample_rate, 2).unwrap()
    }

    #[test]
    fn test_busy_lane_holds_clock_and_voice_together() {
        let clock = Arc::new(FrameClock::new(1000));
        let mut mixer = mixer_with(clock.clone());
        mixer.init().unwrap();
        mixer.load_buffer(DeckId::A, ramp_buffer(2000, 1000));
        mixer.set_crossfader(-1.0);
        mixer.bus.lock().settle();
        mixer.play(DeckId::A);

        let mut graph = mixer.render_graph();
        let mut block = vec![0.0; 200];
        graph.process(&mut block);
        assert_eq!(clock.frames(), 100);

        {
            let lane = mixer.decks[0].lane();
            let _held = lane.lock();
            let mut busy = vec![1.0; 200];
            graph.process(&mut busy);
            assert!(busy.iter().all(|&s| s == 0.0));
        }
        {
            let _held = mixer.bus.lock();
            graph.process(&mut block);
        }
        assert_eq!(clock.frames(), 100, "Clock moved without rendering");
        assert!((mixer.current_time(DeckId::A) - 0.1).abs() < 1e-9);

        // The next rendered frame is the one the deck reports
        let mut frame = vec![0.0; 2];
        graph.process(&mut frame);
        assert!((frame[0] - 0.05).abs() < 1e-4, "Audible {} at 0.1s", frame[0]);

        mixer.pause(DeckId::A);
        mixer.play(DeckId::A);
        graph.process(&mut frame);
        let expected = 101.0 / 2000.0;
        assert!(
            (frame[0] - expected).abs() < 1e-4,
            "Resumed at {} instead of {}",
            frame[0],
            expected
        );
    }

    #[test]
    fn test_controls_do_not_take_render_locks() {
        let mut mixer = mixer_with(Arc::new(ManualClock::new()));
        mixer.load(DeckId::A, "a.wav").unwrap();
        mixer.play(DeckId::A);

        let lanes = [mixer.decks[0].lane(), mixer.decks[1].lane()];
        let bus = mixer.bus.clone();
        let _a = lanes[0].lock();
        let _b = lanes[1].lock();
        let _bus = bus.lock();

        // Each of these would deadlock on a held render lock
        assert_eq!(mixer.set_eq(DeckId::A, EqBand::Low, -30.0), -24.0);
        assert_eq!(mixer.set_gain(DeckId::B, 0.5), 0.5);
        assert_eq!(mixer.set_rate(DeckId::A, 1.25), 1.25);
        assert_eq!(mixer.set_crossfader(0.5), 0.5);
        assert_eq!(mixer.set_master_volume(0.7), 0.7);
        assert!((mixer.master_volume() - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_large_device_block_renders_in_chunks() {
        let clock = Arc::new(FrameClock::new(1000));
        let mut mixer = mixer_with(clock.clone());
        mixer.init().unwrap();
        mixer.load(DeckId::A, "a.wav").unwrap();
        mixer.set_crossfader(-1.0);
        mixer.bus.lock().settle();
        mixer.play(DeckId::A);

        let mut graph = mixer.render_graph();
        let mut out = vec![0.0; MAX_BUFFER_SIZE * 2 + 6];
        graph.process(&mut out);
        assert_eq!(clock.frames(), (MAX_BUFFER_SIZE + 3) as u64);
        assert_eq!(graph.buffer_a.len(), MAX_BUFFER_SIZE);
        assert!(out.iter().all(|&s| (s - 0.5).abs() < 1e-3));
    }

    #[test]
    fn test_suspended_clock_outputs_silence_and_init_resumes() {
        let clock = Arc::new(FrameClock::new(1000));
        let mut mixer = mixer_with(clock.clone());
        mixer.load(DeckId::A, "a.wav").unwrap();
        mixer.play(DeckId::A);

        let mut graph = mixer.render_graph();
        let mut out = vec![1.0; 32];
        graph.process(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(clock.frames(), 0);

        mixer.init().unwrap();
        graph.process(&mut out);
        assert_eq!(clock.frames(), 16);
    }

    #[test]
    fn test_disposed_graph_is_silent() {
        let mut mixer = mixer_with(Arc::new(ManualClock::new()));
        mixer.load(DeckId::B, "b.wav").unwrap();
        mixer.play(DeckId::B);
        let mut graph = mixer.render_graph();

        mixer.dispose();
        mixer.dispose();
        let mut out = vec![1.0; 16];
        graph.process(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
        assert!(matches!(
            mixer.load(DeckId::A, "a.wav"),
            Err(MixerError::Disposed)
        ));
        assert!(!mixer.is_playing(DeckId::B));
    }

    #[test]
    fn test_apply_routes_commands() {
        let mut mixer = mixer_with(Arc::new(ManualClock::new()));
        mixer
            .apply(Command::Load(DeckId::A, AudioSource::from("a.wav")))
            .unwrap();
        mixer.apply(Command::Play(DeckId::A)).unwrap();
        assert!(mixer.is_playing(DeckId::A));

        let control: ControlId = "deckA.eq.high".parse().unwrap();
        mixer.apply(Command::set(control, -50.0)).unwrap();
        assert_eq!(mixer.deck_state(DeckId::A).eq.high, -24.0);

        mixer.apply(Command::StartRecording).unwrap();
        let pending = mixer.apply(Command::StopRecording).unwrap();
        assert!(pending.is_some());
    }
}
