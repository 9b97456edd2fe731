//! Master-bus recorder
//!
//! `start` attaches a lock-free ring producer to the master bus. A capture
//! worker drains the ring every chunk interval into append-only chunks.
//! `stop` detaches the tap and returns a `PendingRecording`; `wait` on it
//! collects the chunks and encodes them into a single immutable WAV blob.

use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer, Split};
use ringbuf::{HeapCons, HeapRb};
use tracing::{debug, info, warn};

use crate::bus::MasterBus;
use crate::clock::OutputClock;
use crate::config::EngineConfig;
use crate::error::RecorderError;

/// Recorder state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecorderState {
    #[default]
    Idle,
    Recording,
    /// A capture was finalized; a new one may start
    Stopped,
}

/// A finished recording: immutable WAV bytes plus metadata
#[derive(Debug, Clone)]
pub struct Recording {
    data: Arc<[u8]>,
    duration: f64,
    sample_rate: u32,
    frames: usize,
}

impl Recording {
    /// Encoded WAV file (32-bit float, stereo)
    pub fn data(&self) -> Arc<[u8]> {
        self.data.clone()
    }

    /// Wall-clock length of the capture in seconds
    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Stereo frames actually captured
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, &self.data[..])
    }
}

enum CaptureControl {
    /// Drain what is left and hand the chunks over
    Finish,
    /// Drop everything captured so far
    Discard,
}

type CaptureResult = Option<Vec<Vec<f32>>>;

struct CaptureSession {
    control: Sender<CaptureControl>,
    worker: JoinHandle<CaptureResult>,
    started_at: f64,
}

/// Result of `Recorder::stop`, resolved with `wait`
pub struct PendingRecording {
    worker: JoinHandle<CaptureResult>,
    duration: f64,
    sample_rate: u32,
}

impl PendingRecording {
    /// Length of the capture, known before encoding finishes
    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Block until the capture worker hands over its chunks, then encode them
    pub fn wait(self) -> Result<Recording, RecorderError> {
        let chunks = self
            .worker
            .join()
            .map_err(|_| RecorderError::CaptureLost)?
            .ok_or(RecorderError::CaptureLost)?;

        let (data, frames) = encode_wav(&chunks, self.sample_rate)
            .map_err(|e| RecorderError::Encode(e.to_string()))?;

        info!(
            duration = self.duration,
            frames,
            bytes = data.len(),
            "Recording encoded"
        );

        Ok(Recording {
            data: data.into(),
            duration: self.duration,
            sample_rate: self.sample_rate,
            frames,
        })
    }
}

/// Captures the master bus output
pub struct Recorder {
    bus: Arc<Mutex<MasterBus>>,
    clock: Arc<dyn OutputClock>,
    sample_rate: u32,
    chunk_interval: Duration,
    ring_samples: usize,
    state: RecorderState,
    session: Option<CaptureSession>,
}

impl Recorder {
    pub fn new(
        bus: Arc<Mutex<MasterBus>>,
        clock: Arc<dyn OutputClock>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            bus,
            clock,
            sample_rate: config.sample_rate,
            chunk_interval: config.record_chunk_interval(),
            ring_samples: config.record_ring_samples(),
            state: RecorderState::Idle,
            session: None,
        }
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state == RecorderState::Recording
    }

    /// Seconds captured so far (0 when idle)
    pub fn elapsed(&self) -> f64 {
        self.session
            .as_ref()
            .map_or(0.0, |s| (self.clock.now() - s.started_at).max(0.0))
    }

    pub fn start(&mut self) -> Result<(), RecorderError> {
        if self.is_recording() {
            return Err(RecorderError::AlreadyRecording);
        }

        // The clock has to run before the tap sees any audio
        if self.clock.is_suspended() {
            debug!("Resuming output clock for recording");
            self.clock.resume();
        }

        let (producer, consumer) = HeapRb::<f32>::new(self.ring_samples).split();
        let (control_tx, control_rx) = bounded(1);
        let interval = self.chunk_interval;
        let worker = thread::Builder::new()
            .name("twindeck-recorder".into())
            .spawn(move || capture_worker(consumer, control_rx, interval))?;

        self.bus.lock().attach_tap(producer);

        self.session = Some(CaptureSession {
            control: control_tx,
            worker,
            started_at: self.clock.now(),
        });
        self.state = RecorderState::Recording;
        info!(sample_rate = self.sample_rate, "Recording started");
        Ok(())
    }

    pub fn stop(&mut self) -> Result<PendingRecording, RecorderError> {
        if !self.is_recording() {
            return Err(RecorderError::NotRecording);
        }
        let session = self.session.take().ok_or(RecorderError::NotRecording)?;

        self.detach_tap();
        let duration = (self.clock.now() - session.started_at).max(0.0);
        self.state = RecorderState::Stopped;

        if session.control.send(CaptureControl::Finish).is_err() {
            warn!("Capture worker gone before stop");
        }
        info!(duration, "Recording stopped");

        Ok(PendingRecording {
            worker: session.worker,
            duration,
            sample_rate: self.sample_rate,
        })
    }

    /// Abandon an active capture without producing a recording
    pub fn discard(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        self.detach_tap();
        let _ = session.control.send(CaptureControl::Discard);
        if session.worker.join().is_err() {
            warn!("Capture worker panicked during discard");
        }
        self.state = RecorderState::Idle;
        debug!("Recording discarded");
    }

    fn detach_tap(&self) {
        let mut bus = self.bus.lock();
        let tap = bus.detach_tap();
        let dropped = bus.tap_overruns().load(Ordering::Relaxed);
        drop(bus);
        drop(tap);

        if dropped > 0 {
            warn!(dropped, "Recorder tap overran; samples were lost");
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.discard();
    }
}

fn capture_worker(
    mut consumer: HeapCons<f32>,
    control: Receiver<CaptureControl>,
    interval: Duration,
) -> CaptureResult {
    let mut chunks: Vec<Vec<f32>> = Vec::new();

    loop {
        match control.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => drain_chunk(&mut consumer, &mut chunks),
            Ok(CaptureControl::Finish) => {
                drain_chunk(&mut consumer, &mut chunks);
                return Some(chunks);
            }
            Ok(CaptureControl::Discard) | Err(RecvTimeoutError::Disconnected) => return None,
        }
    }
}

/// Move everything currently in the ring into one new chunk
fn drain_chunk(consumer: &mut HeapCons<f32>, chunks: &mut Vec<Vec<f32>>) {
    let available = consumer.occupied_len();
    if available == 0 {
        return;
    }
    let mut chunk = vec![0.0f32; available];
    let read = consumer.pop_slice(&mut chunk);
    chunk.truncate(read);
    chunks.push(chunk);
}

/// Encode interleaved stereo chunks as a 32-bit float WAV file.
/// Returns the bytes and the number of frames written.
fn encode_wav(chunks: &[Vec<f32>], sample_rate: u32) -> Result<(Vec<u8>, usize), hound::Error> {
    use hound::{SampleFormat, WavSpec, WavWriter};

    let spec = WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };

    let total: usize = chunks.iter().map(Vec::len).sum();
    let complete = total - total % 2;

    let mut cursor = Cursor::new(Vec::new());
    let mut writer = WavWriter::new(&mut cursor, spec)?;
    for &sample in chunks.iter().flatten().take(complete) {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;

    Ok((cursor.into_inner(), complete / 2))
}
