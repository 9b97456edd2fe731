//! Engine error types

use thiserror::Error;

/// Errors produced while turning a source into a playable buffer
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("No audio track found in source")]
    NoAudioTrack,
    #[error("Unsupported format")]
    UnsupportedFormat,
    #[error("Source decoded to zero samples")]
    Empty,
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Resample error: {0}")]
    Resample(String),
}

/// Recorder state-machine violations and capture failures
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("A recording is already in progress")]
    AlreadyRecording,
    #[error("No recording is in progress")]
    NotRecording,
    #[error("Failed to start capture worker: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("Capture worker exited before handing over the recording")]
    CaptureLost,
    #[error("Failed to encode recording: {0}")]
    Encode(String),
}

/// Errors surfaced by the mixer façade
#[derive(Error, Debug)]
pub enum MixerError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Recorder(#[from] RecorderError),
    #[error("Mixer has been disposed")]
    Disposed,
}

/// A control id string that names no known control
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown control id: {0}")]
pub struct UnknownControl(pub String);
