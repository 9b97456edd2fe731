//! Decoded audio buffers and the decoding seam

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::DecodeError;

/// Immutable decoded PCM, always interleaved stereo
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
    name: Option<String>,
}

impl AudioBuffer {
    /// Build a buffer from interleaved samples with any channel count.
    ///
    /// Mono is duplicated to both sides; channels beyond the first two are
    /// dropped.
    pub fn from_interleaved(
        samples: Vec<f32>,
        sample_rate: u32,
        channels: u16,
    ) -> Result<Self, DecodeError> {
        if channels == 0 || sample_rate == 0 {
            return Err(DecodeError::UnsupportedFormat);
        }

        let stereo = match channels {
            2 => samples,
            1 => samples.iter().flat_map(|&s| [s, s]).collect(),
            n => samples
                .chunks_exact(n as usize)
                .flat_map(|frame| [frame[0], frame[1]])
                .collect(),
        };

        if stereo.len() < 2 {
            return Err(DecodeError::Empty);
        }

        Ok(Self {
            samples: stereo,
            sample_rate,
            name: None,
        })
    }

    /// A stereo buffer of digital silence
    pub fn silence(seconds: f64, sample_rate: u32) -> Self {
        let frames = (seconds.max(0.0) * sample_rate as f64).round() as usize;
        Self {
            samples: vec![0.0; frames.max(1) * 2],
            sample_rate: sample_rate.max(1),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Interleaved stereo samples
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of stereo frames
    pub fn frames(&self) -> usize {
        self.samples.len() / 2
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Linearly interpolated stereo frame at a fractional frame position.
    ///
    /// Positions past the end read as silence; when `wrap` is set the
    /// interpolation partner of the last frame is the first frame.
    #[inline]
    pub fn frame_at(&self, position: f64, wrap: bool) -> (f32, f32) {
        let frames = self.frames();
        if position < 0.0 || frames == 0 {
            return (0.0, 0.0);
        }

        let index = position as usize;
        if index >= frames {
            return (0.0, 0.0);
        }

        let frac = (position - index as f64) as f32;
        let next = if index + 1 < frames {
            Some(index + 1)
        } else if wrap {
            Some(0)
        } else {
            None
        };

        let l0 = self.samples[index * 2];
        let r0 = self.samples[index * 2 + 1];
        match next {
            Some(n) => {
                let l1 = self.samples[n * 2];
                let r1 = self.samples[n * 2 + 1];
                (l0 + frac * (l1 - l0), r0 + frac * (r1 - r0))
            }
            None => (l0, r0),
        }
    }
}

/// Something the decoder can turn into an `AudioBuffer`
#[derive(Debug, Clone)]
pub enum AudioSource {
    /// A file on disk; the extension is used as a format hint
    Path(PathBuf),
    /// Encoded bytes held in memory, with an optional extension hint ("wav", "mp3")
    Bytes {
        data: Arc<[u8]>,
        hint: Option<String>,
    },
}

impl AudioSource {
    pub fn bytes(data: impl Into<Arc<[u8]>>, hint: Option<&str>) -> Self {
        Self::Bytes {
            data: data.into(),
            hint: hint.map(str::to_owned),
        }
    }

    /// Display name for the loaded track (file stem for paths)
    pub fn display_name(&self) -> Option<String> {
        match self {
            Self::Path(path) => path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(str::to_owned),
            Self::Bytes { .. } => None,
        }
    }

    /// Format hint (lowercase extension)
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::Path(path) => path
                .extension()
                .and_then(|e| e.to_str())
                .map(str::to_ascii_lowercase),
            Self::Bytes { hint, .. } => hint.clone(),
        }
    }
}

impl From<PathBuf> for AudioSource {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<&Path> for AudioSource {
    fn from(path: &Path) -> Self {
        Self::Path(path.to_path_buf())
    }
}

impl From<&str> for AudioSource {
    fn from(path: &str) -> Self {
        Self::Path(PathBuf::from(path))
    }
}

impl From<Vec<u8>> for AudioSource {
    fn from(data: Vec<u8>) -> Self {
        Self::bytes(data, None)
    }
}

/// Decoding primitive: raw source to stereo PCM at the engine rate
pub trait Decode: Send + Sync {
    fn decode(&self, source: &AudioSource) -> Result<AudioBuffer, DecodeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mono_is_duplicated() {
        let buffer = AudioBuffer::from_interleaved(vec![0.1, 0.2, 0.3], 48000, 1).unwrap();
        assert_eq!(buffer.samples(), &[0.1, 0.1, 0.2, 0.2, 0.3, 0.3]);
        assert_eq!(buffer.frames(), 3);
    }

    #[test]
    fn test_surround_keeps_front_pair() {
        let samples = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let buffer = AudioBuffer::from_interleaved(samples, 48000, 3).unwrap();
        assert_eq!(buffer.samples(), &[1.0, 2.0, 4.0, 5.0]);
    }

    #[test]
    fn test_rejects_empty_and_zero_channels() {
        assert!(matches!(
            AudioBuffer::from_interleaved(vec![], 48000, 2),
            Err(DecodeError::Empty)
        ));
        assert!(matches!(
            AudioBuffer::from_interleaved(vec![0.0; 4], 48000, 0),
            Err(DecodeError::UnsupportedFormat)
        ));
    }

    #[test]
    fn test_duration() {
        let buffer = AudioBuffer::silence(10.0, 44100);
        assert_eq!(buffer.frames(), 441000);
        assert!((buffer.duration() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_frame_interpolation() {
        let buffer =
            AudioBuffer::from_interleaved(vec![0.0, 0.0, 1.0, -1.0], 48000, 2).unwrap();
        let (l, r) = buffer.frame_at(0.5, false);
        assert!((l - 0.5).abs() < 1e-6);
        assert!((r + 0.5).abs() < 1e-6);

        // Last frame: no partner without wrap, first frame with wrap
        assert_eq!(buffer.frame_at(1.5, false), (1.0, -1.0));
        let (l, _) = buffer.frame_at(1.5, true);
        assert!((l - 0.5).abs() < 1e-6);

        assert_eq!(buffer.frame_at(2.0, false), (0.0, 0.0));
    }

    #[test]
    fn test_source_hints() {
        let source = AudioSource::from(PathBuf::from("/music/Intro Loop.WAV"));
        assert_eq!(source.hint().as_deref(), Some("wav"));
        assert_eq!(source.display_name().as_deref(), Some("Intro Loop"));

        let bytes = AudioSource::bytes(vec![1u8, 2, 3], Some("mp3"));
        assert_eq!(bytes.hint().as_deref(), Some("mp3"));
        assert!(bytes.display_name().is_none());
    }
}
