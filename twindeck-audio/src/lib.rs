//! Audio engine for TwinDeck - two decks, a crossfader and a recorder
//!
//! This crate provides the real-time mixing pipeline:
//! - Deck: one decoded buffer, ephemeral playback handles, clock-derived position
//! - ToneShaper: low shelf / mid peak / high shelf per deck
//! - Crossfader: equal-power blend of the two deck lanes
//! - MasterBus: master gain, soft clip, meter and recorder taps
//! - Recorder: captures the master bus into a WAV blob
//! - Mixer: the façade that owns all of the above

mod buffer;
mod bus;
mod clock;
mod command;
mod config;
mod crossfader;
mod deck;
mod engine;
mod error;
mod handle;
mod recorder;
mod tone;

pub use buffer::{AudioBuffer, AudioSource, Decode};
pub use bus::{MasterBus, MixParams, PeakMeter};
pub use clock::{FrameClock, ManualClock, OutputClock};
pub use command::{Command, ControlId, MixerEvent};
pub use config::EngineConfig;
pub use crossfader::{equal_power, Crossfader, CROSSFADER_MAX, CROSSFADER_MIN};
pub use deck::{Deck, DeckId, DeckLane, DeckState, PlaybackState, GAIN_MAX, RATE_MAX, RATE_MIN};
pub use engine::{Mixer, RenderGraph};
pub use error::{DecodeError, MixerError, RecorderError, UnknownControl};
pub use handle::PlaybackHandle;
pub use recorder::{PendingRecording, Recorder, RecorderState, Recording};
pub use tone::{EqBand, EqGains, ToneShaper, EQ_RANGE_DB};
