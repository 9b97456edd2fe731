//! Ephemeral playback handles
//!
//! A handle is minted on every `play()` and bound to one buffer, one start
//! offset and a rate cell. It cannot be restarted: `stop` consumes it and the
//! next `play()` mints a fresh one. The render-side half (`Voice`) lives in
//! the deck lane and goes silent as soon as its handle is released.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use atomic_float::AtomicF64;

use crate::buffer::AudioBuffer;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
struct VoiceControl {
    rate: AtomicF64,
    released: AtomicBool,
    ended: AtomicBool,
}

/// Control-side half of a playing voice
#[derive(Debug)]
pub struct PlaybackHandle {
    id: u64,
    start_offset: f64,
    control: Arc<VoiceControl>,
}

impl PlaybackHandle {
    /// Mint a handle and its voice, starting `offset_secs` into `buffer`
    pub(crate) fn mint(
        buffer: Arc<AudioBuffer>,
        offset_secs: f64,
        rate: f64,
        looping: bool,
        output_rate: u32,
    ) -> (Self, Voice) {
        let id = NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed);
        let control = Arc::new(VoiceControl {
            rate: AtomicF64::new(rate),
            released: AtomicBool::new(false),
            ended: AtomicBool::new(false),
        });

        let step_scale = buffer.sample_rate() as f64 / output_rate.max(1) as f64;
        let voice = Voice {
            position: offset_secs.max(0.0) * buffer.sample_rate() as f64,
            buffer,
            looping,
            step_scale,
            control: control.clone(),
        };

        let handle = Self {
            id,
            start_offset: offset_secs,
            control,
        };
        (handle, voice)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Buffer offset (seconds) this handle started from
    pub fn start_offset(&self) -> f64 {
        self.start_offset
    }

    pub fn rate(&self) -> f64 {
        self.control.rate.load(Ordering::Acquire)
    }

    /// Change the rate of the running voice; picked up on the next render block
    pub(crate) fn set_rate(&self, rate: f64) {
        self.control.rate.store(rate, Ordering::Release);
    }

    /// True once a non-looping voice has played past the end of its buffer
    pub fn has_ended(&self) -> bool {
        self.control.ended.load(Ordering::Acquire)
    }

    /// Release the voice. The handle is consumed and can never play again.
    pub fn stop(self) {}
}

impl Drop for PlaybackHandle {
    fn drop(&mut self) {
        self.control.released.store(true, Ordering::Release);
    }
}

/// Render-side half of a playback handle
#[derive(Debug)]
pub(crate) struct Voice {
    buffer: Arc<AudioBuffer>,
    /// Read position in buffer frames
    position: f64,
    looping: bool,
    /// Buffer frames advanced per output frame at rate 1.0
    step_scale: f64,
    control: Arc<VoiceControl>,
}

impl Voice {
    pub(crate) fn is_released(&self) -> bool {
        self.control.released.load(Ordering::Acquire)
    }

    /// Render into interleaved stereo `output`, overwriting it
    pub(crate) fn render(&mut self, output: &mut [f32]) {
        if self.is_released() || self.control.ended.load(Ordering::Relaxed) {
            output.fill(0.0);
            return;
        }

        let frames = self.buffer.frames() as f64;
        let step = self.control.rate.load(Ordering::Acquire) * self.step_scale;

        for frame in output.chunks_mut(2) {
            if self.position >= frames {
                if self.looping && frames > 0.0 {
                    self.position = self.position.rem_euclid(frames);
                } else {
                    self.control.ended.store(true, Ordering::Release);
                    frame.fill(0.0);
                    continue;
                }
            }

            let (l, r) = self.buffer.frame_at(self.position, self.looping);
            frame[0] = l;
            if frame.len() > 1 {
                frame[1] = r;
            }
            self.position += step;
        }
    }
}
