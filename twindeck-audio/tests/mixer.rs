//! Mixer behaviour driven by a virtual clock

use std::sync::Arc;

use std::io::Cursor;

use twindeck_audio::{
    equal_power, AudioBuffer, AudioSource, Command, ControlId, Decode, DecodeError, DeckId,
    EngineConfig, EqBand, FrameClock, ManualClock, Mixer, MixerError, MixerEvent, OutputClock,
    PlaybackState, RecorderError, RecorderState,
};

/// Decodes any path to a fixed-length buffer and rejects raw bytes
struct FixedDecoder {
    seconds: f64,
}

impl Decode for FixedDecoder {
    fn decode(&self, source: &AudioSource) -> Result<AudioBuffer, DecodeError> {
        match source {
            AudioSource::Path(_) => Ok(AudioBuffer::silence(self.seconds, 1000)),
            AudioSource::Bytes { .. } => Err(DecodeError::UnsupportedFormat),
        }
    }
}

fn setup() -> (Mixer, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let mixer = Mixer::new(
        EngineConfig::with_sample_rate(1000),
        clock.clone(),
        Box::new(FixedDecoder { seconds: 10.0 }),
    );
    (mixer, clock)
}

#[test]
fn test_position_round_trip() {
    let (mut mixer, clock) = setup();
    mixer.load(DeckId::A, "ten_seconds.wav").unwrap();
    assert_eq!(mixer.duration(DeckId::A), 10.0);

    assert!(mixer.play(DeckId::A));
    clock.advance(3.0);
    mixer.pause(DeckId::A);
    assert!((mixer.current_time(DeckId::A) - 3.0).abs() < 1e-9);

    mixer.seek(DeckId::A, 1.0);
    mixer.play(DeckId::A);
    clock.advance(2.0);
    mixer.pause(DeckId::A);
    assert!((mixer.current_time(DeckId::A) - 3.0).abs() < 1e-9);
}

#[test]
fn test_rate_scales_position() {
    let (mut mixer, clock) = setup();
    mixer.load(DeckId::B, "track.wav").unwrap();
    mixer.set_rate(DeckId::B, 1.1);
    mixer.play(DeckId::B);
    clock.advance(2.0);
    assert!((mixer.current_time(DeckId::B) - 2.2).abs() < 1e-9);
}

#[test]
fn test_double_stop_is_safe() {
    let (mut mixer, clock) = setup();
    mixer.load(DeckId::A, "track.wav").unwrap();
    mixer.play(DeckId::A);
    clock.advance(1.0);
    mixer.stop(DeckId::A);
    mixer.stop(DeckId::A);
    assert!(!mixer.is_playing(DeckId::A));
    assert_eq!(mixer.current_time(DeckId::A), 0.0);
    assert_eq!(
        mixer.deck_state(DeckId::A).playback,
        PlaybackState::Loaded
    );
}

#[test]
fn test_controls_clamp() {
    let (mut mixer, _clock) = setup();
    assert_eq!(mixer.set_eq(DeckId::A, EqBand::Low, 999.0), 24.0);
    assert_eq!(mixer.deck_state(DeckId::A).eq.low, 24.0);
    assert_eq!(mixer.set_rate(DeckId::A, 5.0), 2.0);
    assert_eq!(mixer.set_rate(DeckId::A, 0.0), 0.5);
    assert_eq!(mixer.set_crossfader(-7.0), -1.0);
    assert_eq!(mixer.set_master_volume(1.5), 1.0);
    assert_eq!(mixer.set_gain(DeckId::B, -2.0), 0.0);
}

#[test]
fn test_crossfader_gains_are_equal_power() {
    let (mut mixer, _clock) = setup();
    for step in 0..=40 {
        let position = -1.0 + step as f64 * 0.05;
        mixer.set_crossfader(position);
        let (a, b) = mixer.crossfader_gains();
        assert!((a * a + b * b - 1.0).abs() < 1e-9);
        assert_eq!((a, b), equal_power(position));
    }
}

#[test]
fn test_recording_duration_follows_clock() {
    let (mut mixer, clock) = setup();
    mixer.start_recording().unwrap();
    assert!(matches!(
        mixer.start_recording(),
        Err(MixerError::Recorder(RecorderError::AlreadyRecording))
    ));

    clock.advance(5.0);
    let pending = mixer.stop_recording().unwrap();
    let recording = pending.wait().unwrap();
    assert!((recording.duration() - 5.0).abs() < 0.2);
    assert!(!recording.data().is_empty());
    assert_eq!(mixer.recorder_state(), RecorderState::Stopped);

    assert!(matches!(
        mixer.stop_recording(),
        Err(MixerError::Recorder(RecorderError::NotRecording))
    ));
}

#[test]
fn test_reload_stops_playing_deck() {
    let (mut mixer, clock) = setup();
    mixer.load(DeckId::A, "first.wav").unwrap();
    mixer.play(DeckId::A);
    let first_handle = mixer.deck_state(DeckId::A).handle_id;
    clock.advance(4.0);

    mixer.load(DeckId::A, "second.wav").unwrap();
    let state = mixer.deck_state(DeckId::A);
    assert!(first_handle.is_some());
    assert_eq!(state.handle_id, None);
    assert_eq!(state.position, 0.0);
    assert_eq!(state.track_name.as_deref(), Some("second"));
    assert!(!mixer.is_playing(DeckId::A));
}

#[test]
fn test_failed_load_keeps_previous_buffer() {
    let (mut mixer, _clock) = setup();
    mixer.load(DeckId::B, "keep.wav").unwrap();
    mixer.play(DeckId::B);

    let result = mixer.load(DeckId::B, AudioSource::bytes(vec![1u8, 2, 3], Some("mp3")));
    assert!(matches!(result, Err(MixerError::Decode(_))));
    assert_eq!(
        mixer.deck_state(DeckId::B).track_name.as_deref(),
        Some("keep")
    );
    assert!(!mixer.is_playing(DeckId::B), "Load must stop playback first");
}

#[test]
fn test_sync_matches_leader_bpm() {
    let (mut mixer, _clock) = setup();
    let rate = mixer.sync_rate(DeckId::B, 128.0, 124.0);
    assert!((124.0 * rate - 128.0).abs() < 1e-9);

    mixer.load(DeckId::A, "leader.wav").unwrap();
    mixer.load(DeckId::B, "follower.wav").unwrap();
    mixer.set_bpm(DeckId::A, Some(128.0));
    mixer.set_bpm(DeckId::B, Some(124.0));
    mixer.set_rate(DeckId::B, 1.0);
    mixer.sync(DeckId::B).unwrap();
    let effective = mixer.deck_state(DeckId::B).bpm.unwrap();
    assert!((effective - 128.0).abs() < 1e-9);

    mixer.set_bpm(DeckId::A, None);
    assert_eq!(mixer.sync(DeckId::B), None);
}

#[test]
fn test_events_report_changes() {
    let (mut mixer, _clock) = setup();
    let events = mixer.subscribe();

    mixer.load(DeckId::A, "song.wav").unwrap();
    mixer.play(DeckId::A);
    mixer
        .apply(Command::set("crossfader".parse::<ControlId>().unwrap(), 0.25))
        .unwrap();
    assert_eq!(mixer.seek(DeckId::A, 42.0), Some(10.0));
    mixer.apply(Command::SetBpm(DeckId::A, Some(126.0))).unwrap();

    let received: Vec<MixerEvent> = events.try_iter().collect();
    assert_eq!(
        received,
        vec![
            MixerEvent::TrackLoaded {
                deck: DeckId::A,
                name: Some("song".to_string()),
                duration: 10.0,
            },
            MixerEvent::PlayStateChanged {
                deck: DeckId::A,
                state: PlaybackState::Playing,
            },
            MixerEvent::ControlChanged {
                control: ControlId::Crossfader,
                value: 0.25,
            },
            MixerEvent::Seeked {
                deck: DeckId::A,
                position: 10.0,
            },
            MixerEvent::BpmChanged {
                deck: DeckId::A,
                bpm: Some(126.0),
            },
        ]
    );
}

#[test]
fn test_dispose_mid_recording() {
    let (mut mixer, clock) = setup();
    let events = mixer.subscribe();
    mixer.load(DeckId::A, "a.wav").unwrap();
    mixer.play(DeckId::A);
    mixer.start_recording().unwrap();
    clock.advance(1.0);

    mixer.dispose();
    assert!(mixer.is_disposed());
    assert_eq!(mixer.recorder_state(), RecorderState::Idle);
    assert!(!mixer.is_playing(DeckId::A));
    assert!(matches!(
        mixer.start_recording(),
        Err(MixerError::Disposed)
    ));
    assert!(events.try_iter().any(|e| e == MixerEvent::Disposed));
}

#[test]
fn test_rendered_mix_lands_in_recording() {
    let clock = Arc::new(FrameClock::new(1000));
    let mut mixer = Mixer::new(
        EngineConfig::with_sample_rate(1000),
        clock.clone(),
        Box::new(FixedDecoder { seconds: 10.0 }),
    );
    let mut graph = mixer.render_graph();
    mixer.init().unwrap();
    mixer.load_buffer(
        DeckId::A,
        AudioBuffer::from_interleaved(vec![0.5; 4000], 1000, 2).unwrap(),
    );
    mixer.set_crossfader(-1.0);
    mixer.start_recording().unwrap();
    mixer.play(DeckId::A);

    const BLOCKS: usize = 20;
    const BLOCK_SAMPLES: usize = 256;
    let mut block = vec![0.0f32; BLOCK_SAMPLES];
    for _ in 0..BLOCKS {
        graph.process(&mut block);
    }
    assert_eq!(clock.frames(), (BLOCKS * BLOCK_SAMPLES / 2) as u64);

    let pending = mixer.stop_recording().unwrap();
    let recording = pending.wait().unwrap();
    assert_eq!(recording.frames(), BLOCKS * BLOCK_SAMPLES / 2);
    assert!(
        (recording.duration() - clock.now()).abs() < 1e-9,
        "Duration {} does not match rendered time {}",
        recording.duration(),
        clock.now()
    );
    assert!((recording.frames() as f64 / 1000.0 - recording.duration()).abs() < 1e-9);

    let mut reader = hound::WavReader::new(Cursor::new(recording.data().to_vec())).unwrap();
    let samples: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
    assert_eq!(samples.len(), BLOCKS * BLOCK_SAMPLES);
    let tail = &samples[samples.len() - 16..];
    assert!(
        tail.iter().all(|&s| (s - 0.5).abs() < 0.01),
        "Deck A missing from the recording: {:?}",
        &tail[..4]
    );
}
