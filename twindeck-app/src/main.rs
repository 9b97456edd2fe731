//! TwinDeck - two-deck mix from the command line
//!
//! Loads two tracks, plays them together while sweeping the crossfader from
//! deck A to deck B, records the master output and writes it as a WAV file.
//!
//! ```text
//! twindeck <track-a> <track-b> [--seconds N] [--bpm-a BPM] [--bpm-b BPM] [--out FILE]
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use twindeck_audio::{DeckId, EngineConfig, FrameClock, Mixer, MixerEvent, OutputClock, RenderGraph};
use twindeck_library::{Config, TrackLoader};

/// Default length of the crossfade sweep
const DEFAULT_SECONDS: f64 = 30.0;

/// Pre-allocated conversion buffer for non-stereo devices
/// (8192 frames of stereo)
const CONVERSION_BUFFER_SIZE: usize = 16384;

#[derive(Debug)]
struct Args {
    track_a: PathBuf,
    track_b: PathBuf,
    seconds: f64,
    bpm_a: Option<f64>,
    bpm_b: Option<f64>,
    out: Option<PathBuf>,
}

impl Args {
    fn parse() -> anyhow::Result<Self> {
        let mut positional = Vec::new();
        let mut seconds = DEFAULT_SECONDS;
        let mut bpm_a = None;
        let mut bpm_b = None;
        let mut out = None;

        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            let mut value = |flag: &str| {
                args.next()
                    .with_context(|| format!("{} needs a value", flag))
            };
            match arg.as_str() {
                "--seconds" => seconds = value("--seconds")?.parse()?,
                "--bpm-a" => bpm_a = Some(value("--bpm-a")?.parse()?),
                "--bpm-b" => bpm_b = Some(value("--bpm-b")?.parse()?),
                "--out" => out = Some(PathBuf::from(value("--out")?)),
                _ => positional.push(PathBuf::from(arg)),
            }
        }

        let mut positional = positional.into_iter();
        let (Some(track_a), Some(track_b)) = (positional.next(), positional.next()) else {
            bail!("usage: twindeck <track-a> <track-b> [--seconds N] [--bpm-a BPM] [--bpm-b BPM] [--out FILE]");
        };

        Ok(Self {
            track_a,
            track_b,
            seconds: seconds.max(1.0),
            bpm_a,
            bpm_b,
            out,
        })
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse()?;
    let mut config = Config::load();

    // Get audio host and device
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .context("No audio output device found")?;
    let device_config = device
        .default_output_config()
        .context("Failed to get audio config")?;

    let sample_rate = device_config.sample_rate().0;
    let channels = device_config.channels() as usize;
    info!(
        device = %device.name().unwrap_or_default(),
        sample_rate, channels, "Opened output device"
    );

    let engine_config = EngineConfig {
        sample_rate,
        ..config.engine.clone()
    };
    let clock = Arc::new(FrameClock::new(sample_rate));
    let mut mixer = Mixer::new(
        engine_config,
        clock.clone(),
        Box::new(TrackLoader::with_sample_rate(sample_rate)),
    );
    let events = mixer.subscribe();

    let stream = build_stream(&device, &device_config.into(), mixer.render_graph(), channels)?;
    stream.play().context("Failed to start audio")?;
    mixer.init()?;

    mixer.load(DeckId::A, args.track_a.as_path())?;
    mixer.load(DeckId::B, args.track_b.as_path())?;

    if let (Some(a), Some(b)) = (args.bpm_a, args.bpm_b) {
        mixer.set_bpm(DeckId::A, Some(a));
        mixer.set_bpm(DeckId::B, Some(b));
        if let Some(rate) = mixer.sync(DeckId::B) {
            info!(rate, "Deck B synced to deck A");
        }
    }

    mixer.set_crossfader(-1.0);
    mixer.start_recording()?;
    mixer.play(DeckId::A);
    mixer.play(DeckId::B);

    run_sweep(&mut mixer, clock.as_ref(), &events, args.seconds);

    let pending = mixer.stop_recording()?;
    mixer.stop(DeckId::A);
    mixer.stop(DeckId::B);
    let recording = pending.wait()?;

    let out = match args.out {
        Some(path) => path,
        None => config.output_dir().join(format!("twindeck-mix-{}.wav", unix_secs())),
    };
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
        config.last_output_dir = Some(parent.to_path_buf());
    }
    recording
        .write_to(&out)
        .with_context(|| format!("Failed to write {}", out.display()))?;
    info!(
        path = %out.display(),
        duration = recording.duration(),
        frames = recording.frames(),
        "Mix written"
    );

    if let Err(e) = config.save() {
        warn!(error = %e, "Could not save config");
    }

    mixer.dispose();
    drop(stream);
    Ok(())
}

fn build_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut graph: RenderGraph,
    channels: usize,
) -> anyhow::Result<cpal::Stream> {
    if channels == 0 {
        bail!("Output device reports zero channels");
    }

    // Avoid allocation in the audio callback
    let mut stereo_buffer = vec![0.0f32; CONVERSION_BUFFER_SIZE];

    let stream = device.build_output_stream(
        config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            if channels == 2 {
                graph.process(data);
                return;
            }

            let max_frames = CONVERSION_BUFFER_SIZE / 2;
            for device_chunk in data.chunks_mut(max_frames * channels) {
                let frames = device_chunk.len() / channels;
                let stereo = &mut stereo_buffer[..frames * 2];
                graph.process(stereo);

                for (frame, lr) in device_chunk.chunks_mut(channels).zip(stereo.chunks(2)) {
                    if channels == 1 {
                        frame[0] = (lr[0] + lr[1]) * 0.5;
                    } else {
                        frame[0] = lr[0];
                        frame[1] = lr[1];
                        frame[2..].fill(0.0);
                    }
                }
            }
        },
        |err| {
            eprintln!("Audio stream error: {}", err);
        },
        None,
    )?;

    Ok(stream)
}

/// Move the crossfader from A to B over `seconds` of rendered audio
fn run_sweep(
    mixer: &mut Mixer,
    clock: &dyn OutputClock,
    events: &Receiver<MixerEvent>,
    seconds: f64,
) {
    let start = clock.now();
    // The clock only moves while the device pulls audio
    let deadline = Instant::now() + Duration::from_secs_f64(seconds * 2.0 + 5.0);

    loop {
        let elapsed = clock.now() - start;
        if elapsed >= seconds {
            break;
        }
        if Instant::now() >= deadline {
            warn!(elapsed, "Output device stalled, ending sweep early");
            break;
        }
        mixer.set_crossfader(-1.0 + 2.0 * (elapsed / seconds));

        match events.recv_timeout(Duration::from_millis(10)) {
            Ok(event) => log_event(&event),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        for event in events.try_iter() {
            log_event(&event);
        }
    }

    mixer.set_crossfader(1.0);
    info!(
        recorded = mixer.recording_elapsed(),
        level = mixer.meter_level(),
        position_a = mixer.current_time(DeckId::A),
        position_b = mixer.current_time(DeckId::B),
        "Sweep finished"
    );
}

fn log_event(event: &MixerEvent) {
    // Crossfader writes arrive every tick
    if !matches!(event, MixerEvent::ControlChanged { .. }) {
        debug!(?event, "Mixer event");
    }
}

fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
