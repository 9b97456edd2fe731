//! Output clocks
//!
//! Every position in the engine is derived from a clock reading rather than
//! from a polling timer. Two clocks are provided:
//! - `FrameClock`: counts frames pulled by the output device, so time only
//!   moves while audio is actually being rendered
//! - `ManualClock`: a virtual clock moved by hand (tests, headless use)

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use atomic_float::AtomicF64;

/// Monotonic time reference shared by the control path and the render path
pub trait OutputClock: Send + Sync {
    /// Current time in seconds
    fn now(&self) -> f64;

    /// Called by the render path after it produced `frames` frames
    fn advance_frames(&self, _frames: u64) {}

    /// True while the clock is not advancing (device not started yet)
    fn is_suspended(&self) -> bool {
        false
    }

    /// Resume a suspended clock. Returns once the clock is running.
    fn resume(&self) {}

    /// Suspend the clock
    fn suspend(&self) {}
}

/// Clock driven by the number of frames rendered to the output device
#[derive(Debug)]
pub struct FrameClock {
    sample_rate: u32,
    frames: AtomicU64,
    suspended: AtomicBool,
}

impl FrameClock {
    /// Create a clock for the given device rate.
    ///
    /// The clock starts suspended; the engine resumes it on `init` or before
    /// a recording starts.
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            frames: AtomicU64::new(0),
            suspended: AtomicBool::new(true),
        }
    }

    /// Total frames rendered so far
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl OutputClock for FrameClock {
    fn now(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    fn advance_frames(&self, frames: u64) {
        self.frames.fetch_add(frames, Ordering::AcqRel);
    }

    fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }

    fn resume(&self) {
        self.suspended.store(false, Ordering::Release);
    }

    fn suspend(&self) {
        self.suspended.store(true, Ordering::Release);
    }
}

/// Virtual clock advanced explicitly
#[derive(Debug)]
pub struct ManualClock {
    seconds: AtomicF64,
    suspended: AtomicBool,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            seconds: AtomicF64::new(0.0),
            suspended: AtomicBool::new(false),
        }
    }

    /// Move time forward by `seconds` (negative values are ignored)
    pub fn advance(&self, seconds: f64) {
        if seconds > 0.0 {
            self.seconds.fetch_add(seconds, Ordering::AcqRel);
        }
    }

    pub fn advance_by(&self, duration: Duration) {
        self.advance(duration.as_secs_f64());
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputClock for ManualClock {
    fn now(&self) -> f64 {
        self.seconds.load(Ordering::Acquire)
    }

    fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }

    fn resume(&self) {
        self.suspended.store(false, Ordering::Release);
    }

    fn suspend(&self) {
        self.suspended.store(true, Ordering::Release);
    }
}
