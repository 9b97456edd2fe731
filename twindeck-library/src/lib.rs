//! Track loading and settings for TwinDeck
//!
//! - `TrackLoader`: the engine's `Decode` implementation (Symphonia + Rubato)
//! - `Config`: engine settings persisted as `key=value` text

mod config;
mod loader;

pub use config::Config;
pub use loader::{LoadedTrack, TrackLoader, TrackMetadata};
