//! Audio file decoding for file playback and scene prediction

use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, StandardTagKey};
use symphonia::core::probe::Hint;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("No audio track found in file")]
    NoAudioTrack,
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Resample error: {0}")]
    Resample(String),
}

#[derive(Debug, Clone, Default)]
pub struct AudioInfo {
    pub title: String,
    pub artist: String,
    pub duration_secs: f64,
    pub source_sample_rate: u32,
    pub channels: u16,
}

/// Decoded file, downmixed to mono
pub struct LoadedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub info: AudioInfo,
}

/// Audio file loader using Symphonia
pub struct AudioLoader {
    target_sample_rate: u32,
}

impl Default for AudioLoader {
    fn default() -> Self {
        Self::with_sample_rate(44100)
    }
}

impl AudioLoader {
    pub fn with_sample_rate(target_sample_rate: u32) -> Self {
        Self { target_sample_rate }
    }

    pub fn target_sample_rate(&self) -> u32 {
        self.target_sample_rate
    }

    /// Decode a file to mono samples at the target rate
    pub fn load(&self, path: &Path) -> Result<LoadedAudio, LoadError> {
        let file = std::fs::File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| LoadError::Decode(e.to_string()))?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(LoadError::NoAudioTrack)?;
        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let source_rate = codec_params.sample_rate.unwrap_or(44100);
        let channels = codec_params.channels.map(|c| c.count() as u16).unwrap_or(2);

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| LoadError::Decode(e.to_string()))?;

        let mut info = read_tags(format.as_mut(), path);
        info.source_sample_rate = source_rate;
        info.channels = channels;

        let mut interleaved: Vec<f32> = Vec::new();
        loop {
            let packet = match format.next_packet() {
                Ok(p) => p,
                Err(_) => break,
            };
            if packet.track_id() != track_id {
                continue;
            }
            let decoded = match decoder.decode(&packet) {
                Ok(d) => d,
                Err(e) => {
                    tracing::debug!("skipping undecodable packet: {}", e);
                    continue;
                }
            };
            let spec = *decoded.spec();
            let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            buf.copy_interleaved_ref(decoded);
            interleaved.extend_from_slice(buf.samples());
        }

        let mono = downmix(&interleaved, channels as usize);
        info.duration_secs = mono.len() as f64 / source_rate as f64;
        let samples = resample_mono(&mono, source_rate, self.target_sample_rate)?;

        tracing::info!(
            path = %path.display(),
            duration = info.duration_secs,
            source_rate,
            channels,
            "audio file loaded"
        );

        Ok(LoadedAudio {
            samples,
            sample_rate: self.target_sample_rate,
            info,
        })
    }
}

fn read_tags(format: &mut dyn FormatReader, path: &Path) -> AudioInfo {
    let mut info = AudioInfo {
        title: path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("Unknown")
            .to_string(),
        artist: "Unknown".to_string(),
        ..Default::default()
    };

    if let Some(meta) = format.metadata().current() {
        for tag in meta.tags() {
            match tag.std_key {
                Some(StandardTagKey::TrackTitle) => info.title = tag.value.to_string(),
                Some(StandardTagKey::Artist) => info.artist = tag.value.to_string(),
                _ => {}
            }
        }
    }
    info
}

/// Average interleaved frames down to one channel
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Resample a mono signal. The tail is zero padded to a full chunk and
/// trimmed back to the proportional length.
pub fn resample_mono(samples: &[f32], source_rate: u32, target_rate: u32) -> Result<Vec<f32>, LoadError> {
    use rubato::{FftFixedInOut, Resampler};

    if source_rate == target_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler = FftFixedInOut::<f32>::new(source_rate as usize, target_rate as usize, 1024, 1)
        .map_err(|e| LoadError::Resample(e.to_string()))?;
    let chunk = resampler.input_frames_next();
    let expected = (samples.len() as u64 * target_rate as u64 / source_rate as u64) as usize;
    let mut output = Vec::with_capacity(expected + chunk);

    let mut pos = 0;
    while pos + chunk <= samples.len() {
        let out = resampler
            .process(&[&samples[pos..pos + chunk]], None)
            .map_err(|e| LoadError::Resample(e.to_string()))?;
        output.extend_from_slice(&out[0]);
        pos += chunk;
    }

    if pos < samples.len() {
        let mut tail = samples[pos..].to_vec();
        tail.resize(chunk, 0.0);
        let out = resampler
            .process(&[tail.as_slice()], None)
            .map_err(|e| LoadError::Resample(e.to_string()))?;
        output.extend_from_slice(&out[0]);
    }

    output.truncate(expected);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downmix_stereo() {
        let stereo = [1.0, 0.0, 0.5, 0.5, -1.0, 1.0];
        assert_eq!(downmix(&stereo, 2), vec![0.5, 0.5, 0.0]);
        assert_eq!(downmix(&stereo, 1), stereo.to_vec());
    }

    #[test]
    fn test_resample_length() {
        let input = vec![0.0f32; 44100];
        let output = resample_mono(&input, 44100, 32000).unwrap();
        assert!((output.len() as i64 - 32000).abs() <= 2, "len {}", output.len());
    }

    #[test]
    fn test_resample_same_rate_is_identity() {
        let input: Vec<f32> = (0..100).map(|i| i as f32).collect();
        assert_eq!(resample_mono(&input, 48000, 48000).unwrap(), input);
    }

    #[test]
    fn test_resample_keeps_level() {
        let input: Vec<f32> = (0..48000)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 48000.0).sin() * 0.5)
            .collect();
        let output = resample_mono(&input, 48000, 32000).unwrap();
        let peak = output[4000..28000].iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!((peak - 0.5).abs() < 0.05, "peak {}", peak);
    }

    #[test]
    fn test_missing_file() {
        let err = AudioLoader::default()
            .load(Path::new("/nonexistent/lumen/track.wav"))
            .err()
            .unwrap();
        assert!(matches!(err, LoadError::Io(_)));
    }
}
