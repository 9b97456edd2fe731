//! Engine configuration

use std::time::Duration;

/// Static engine settings, fixed for the lifetime of a `Mixer`
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Output (and decode target) sample rate in Hz
    pub sample_rate: u32,
    /// Decks wrap around at the end of the buffer instead of stopping
    pub looping: bool,
    /// Interval at which the recorder drains the master tap (ms)
    pub record_chunk_ms: u32,
    /// Capacity of the recorder tap ring buffer (seconds of audio)
    pub record_ring_secs: u32,
    /// Initial master volume (0.0 - 1.0)
    pub master_volume: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            looping: true,
            record_chunk_ms: 100,
            record_ring_secs: 4,
            master_volume: 1.0,
        }
    }
}

impl EngineConfig {
    pub fn with_sample_rate(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            ..Self::default()
        }
    }

    pub fn record_chunk_interval(&self) -> Duration {
        Duration::from_millis(self.record_chunk_ms.max(1) as u64)
    }

    /// Ring capacity in interleaved stereo samples
    pub fn record_ring_samples(&self) -> usize {
        self.sample_rate as usize * self.record_ring_secs.max(1) as usize * 2
    }
}
