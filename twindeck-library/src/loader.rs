//! Audio decoding for the engine
//!
//! Probes and decodes files or in-memory bytes with Symphonia, folds the
//! channels to stereo and resamples to the engine rate with Rubato.

use std::io::Cursor;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::{MetadataOptions, StandardTagKey};
use symphonia::core::probe::Hint;
use tracing::{debug, warn};
use twindeck_audio::{AudioBuffer, AudioSource, Decode, DecodeError};

/// Tags read from the source, where present
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    /// Rate of the encoded audio before resampling
    pub source_sample_rate: u32,
    pub channels: u16,
}

/// A decoded track ready for a deck
#[derive(Debug, Clone)]
pub struct LoadedTrack {
    pub buffer: AudioBuffer,
    pub metadata: TrackMetadata,
}

/// Audio decoder using Symphonia
pub struct TrackLoader {
    target_sample_rate: u32,
}

impl Default for TrackLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackLoader {
    /// Create a new track loader with default 48kHz sample rate
    pub fn new() -> Self {
        Self::with_sample_rate(48000)
    }

    /// Create a new track loader with specific sample rate
    pub fn with_sample_rate(target_sample_rate: u32) -> Self {
        Self {
            target_sample_rate: target_sample_rate.max(1),
        }
    }

    pub fn target_sample_rate(&self) -> u32 {
        self.target_sample_rate
    }

    /// Decode a source into a stereo buffer at the target rate
    pub fn load(&self, source: &AudioSource) -> Result<LoadedTrack, DecodeError> {
        let media: Box<dyn MediaSource> = match source {
            AudioSource::Path(path) => Box::new(std::fs::File::open(path)?),
            AudioSource::Bytes { data, .. } => Box::new(Cursor::new(data.clone())),
        };
        let mss = MediaSourceStream::new(media, Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = source.hint() {
            hint.with_extension(&ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| {
                debug!(error = %e, "Probe failed");
                DecodeError::UnsupportedFormat
            })?;

        let mut format = probed.format;

        // Find first audio track
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecodeError::NoAudioTrack)?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let source_sample_rate = codec_params.sample_rate.unwrap_or(44100);
        let channels = codec_params
            .channels
            .map(|c| c.count() as u16)
            .unwrap_or(2);

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| DecodeError::Decode(e.to_string()))?;

        let mut metadata = read_tags(&mut format);
        metadata.source_sample_rate = source_sample_rate;
        metadata.channels = channels;

        // Decode all samples
        let mut samples: Vec<f32> = Vec::new();
        let mut skipped_packets = 0usize;

        loop {
            let packet = match format.next_packet() {
                Ok(p) => p,
                Err(symphonia::core::errors::Error::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(e) => {
                    debug!(error = %e, "Stopping at unreadable packet");
                    break;
                }
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(d) => d,
                Err(_) => {
                    skipped_packets += 1;
                    continue;
                }
            };

            let spec = *decoded.spec();
            let duration = decoded.capacity() as u64;

            let mut sample_buf = SampleBuffer::<f32>::new(duration, spec);
            sample_buf.copy_interleaved_ref(decoded);
            samples.extend_from_slice(sample_buf.samples());
        }

        if skipped_packets > 0 {
            warn!(skipped_packets, "Some packets failed to decode");
        }

        let stereo = AudioBuffer::from_interleaved(samples, source_sample_rate, channels)?;

        let buffer = if source_sample_rate != self.target_sample_rate {
            let resampled = self.resample(stereo.samples(), source_sample_rate)?;
            AudioBuffer::from_interleaved(resampled, self.target_sample_rate, 2)?
        } else {
            stereo
        };

        let buffer = match metadata.title.clone().or_else(|| source.display_name()) {
            Some(name) => buffer.with_name(name),
            None => buffer,
        };

        debug!(
            duration = buffer.duration(),
            source_rate = source_sample_rate,
            channels,
            "Decoded source"
        );

        Ok(LoadedTrack { buffer, metadata })
    }

    /// Resample interleaved stereo to the target rate
    fn resample(&self, samples: &[f32], source_rate: u32) -> Result<Vec<f32>, DecodeError> {
        use rubato::{FftFixedInOut, Resampler};

        const CHANNELS: usize = 2;
        let frames = samples.len() / CHANNELS;

        let mut resampler = FftFixedInOut::<f32>::new(
            source_rate as usize,
            self.target_sample_rate as usize,
            1024,
            CHANNELS,
        )
        .map_err(|e| DecodeError::Resample(e.to_string()))?;

        // Deinterleave
        let deinterleaved: Vec<Vec<f32>> = (0..CHANNELS)
            .map(|ch| (0..frames).map(|f| samples[f * CHANNELS + ch]).collect())
            .collect();

        let chunk_size = resampler.input_frames_next();
        let mut output: Vec<Vec<f32>> = vec![Vec::new(); CHANNELS];

        let mut pos = 0;
        while pos + chunk_size <= frames {
            let input_refs: Vec<&[f32]> = deinterleaved
                .iter()
                .map(|ch| &ch[pos..pos + chunk_size])
                .collect();

            let resampled = resampler
                .process(&input_refs, None)
                .map_err(|e| DecodeError::Resample(e.to_string()))?;

            for (ch, data) in resampled.into_iter().enumerate() {
                output[ch].extend(data);
            }

            pos += chunk_size;
        }

        // Tail: pad to a full chunk, keep only the proportional output
        if pos < frames {
            let remaining = frames - pos;
            let padded: Vec<Vec<f32>> = deinterleaved
                .iter()
                .map(|ch| {
                    let mut v = ch[pos..].to_vec();
                    v.resize(chunk_size, 0.0);
                    v
                })
                .collect();

            let input_refs: Vec<&[f32]> = padded.iter().map(|v| v.as_slice()).collect();
            let resampled = resampler
                .process(&input_refs, None)
                .map_err(|e| DecodeError::Resample(e.to_string()))?;

            let tail_frames =
                (remaining * self.target_sample_rate as usize) / source_rate as usize;
            for (ch, data) in resampled.into_iter().enumerate() {
                output[ch].extend(&data[..tail_frames.min(data.len())]);
            }
        }

        // Reinterleave
        let output_frames = output[0].len().min(output[1].len());
        let mut interleaved = Vec::with_capacity(output_frames * CHANNELS);
        for frame_idx in 0..output_frames {
            interleaved.push(output[0][frame_idx]);
            interleaved.push(output[1][frame_idx]);
        }

        Ok(interleaved)
    }
}

impl Decode for TrackLoader {
    fn decode(&self, source: &AudioSource) -> Result<AudioBuffer, DecodeError> {
        self.load(source).map(|track| track.buffer)
    }
}

fn read_tags(format: &mut Box<dyn FormatReader>) -> TrackMetadata {
    let mut metadata = TrackMetadata::default();

    if let Some(meta) = format.metadata().current() {
        for tag in meta.tags() {
            match tag.std_key {
                Some(StandardTagKey::TrackTitle) => metadata.title = Some(tag.value.to_string()),
                Some(StandardTagKey::Artist) => metadata.artist = Some(tag.value.to_string()),
                Some(StandardTagKey::Album) => metadata.album = Some(tag.value.to_string()),
                _ => {}
            }
        }
    }

    metadata
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(sample_rate: u32, channels: u16, frames: usize, value: i16) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for _ in 0..frames * channels as usize {
                writer.write_sample(value).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_decode_wav_bytes_at_target_rate() {
        let loader = TrackLoader::with_sample_rate(48000);
        let bytes = wav_bytes(48000, 2, 24000, 8192);
        let track = loader
            .load(&AudioSource::bytes(bytes, Some("wav")))
            .unwrap();

        assert_eq!(track.buffer.sample_rate(), 48000);
        assert_eq!(track.buffer.frames(), 24000);
        assert!((track.buffer.duration() - 0.5).abs() < 1e-9);
        assert_eq!(track.metadata.channels, 2);
        let first = track.buffer.samples()[100];
        assert!((first - 0.25).abs() < 1e-3, "Unexpected sample {}", first);
    }

    #[test]
    fn test_mono_source_is_resampled_to_stereo() {
        let loader = TrackLoader::with_sample_rate(48000);
        let bytes = wav_bytes(24000, 1, 12000, 0);
        let buffer = loader
            .decode(&AudioSource::bytes(bytes, Some("wav")))
            .unwrap();

        assert_eq!(buffer.sample_rate(), 48000);
        assert!(
            (buffer.duration() - 0.5).abs() < 0.05,
            "Duration drifted: {}",
            buffer.duration()
        );
    }

    #[test]
    fn test_garbage_bytes_are_rejected() {
        let loader = TrackLoader::new();
        let result = loader.decode(&AudioSource::bytes(vec![0u8; 64], None));
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let loader = TrackLoader::new();
        let result = loader.decode(&AudioSource::from("/definitely/not/here.wav"));
        assert!(matches!(result, Err(DecodeError::Io(_))));
    }
}
