//! Mel-band feature extraction for audio-reactive lighting
//!
//! Turns a block of mono samples into a fixed-length vector of spectral
//! energies ("mfft vector"): Hann window, FFT, triangular mel filterbank,
//! then a weighting curve over bin position whose mean is exactly 1.

use rustfft::{num_complex::Complex, FftPlanner};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::ops::Range;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Number of mel bins in the feature vector
pub const MEL_BINS: usize = 128;

/// Smallest FFT size used, shorter blocks are zero padded
const MIN_FFT_SIZE: usize = 2048;

/// Errors raised while configuring the extractor
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("Invalid extractor configuration: {0}")]
    InvalidConfig(String),
    #[error("Unknown rescale curve: {0}")]
    UnknownRescale(String),
}

/// Weighting curve applied across mel bins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rescale {
    /// ln(1 + x), gentle tilt toward the top of the spectrum
    #[default]
    Log1p,
    /// e^x, steeper tilt toward the top of the spectrum
    Exp,
    /// x
    Linear,
}

impl Rescale {
    /// Raw (unnormalized) curve value at position `x` in (0, 1]
    fn curve(self, x: f32) -> f32 {
        match self {
            Self::Log1p => x.ln_1p(),
            Self::Exp => x.exp(),
            Self::Linear => x,
        }
    }

    /// Weights for `n` bins, normalized so their mean is 1
    ///
    /// Bin `i` sits at `x = (i + 1) / n`, which keeps every raw value
    /// strictly positive and the normalization well defined for `n >= 1`.
    pub fn weights(self, n: usize) -> Vec<f32> {
        if n == 0 {
            return Vec::new();
        }
        let raw: Vec<f64> = (0..n)
            .map(|i| self.curve((i + 1) as f32 / n as f32) as f64)
            .collect();
        let mean = raw.iter().sum::<f64>() / n as f64;
        raw.iter().map(|w| (w / mean) as f32).collect()
    }
}

impl FromStr for Rescale {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "log1p" | "log" => Ok(Self::Log1p),
            "exp" => Ok(Self::Exp),
            "linear" | "lin" => Ok(Self::Linear),
            other => Err(AnalysisError::UnknownRescale(other.to_string())),
        }
    }
}

/// Spectral feature vector for one audio block
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureVector {
    pub bins: Vec<f32>,
}

impl FeatureVector {
    /// Zeroed vector of `len` bins
    pub fn zeros(len: usize) -> Self {
        Self { bins: vec![0.0; len] }
    }

    pub fn from_bins(bins: Vec<f32>) -> Self {
        Self { bins }
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Mean energy over `range`, or `None` when the range is empty or
    /// reaches past the end of the vector
    pub fn band_power(&self, range: Range<usize>) -> Option<f32> {
        band_power(&self.bins, range)
    }

    /// Mean energy over the whole vector
    pub fn mean(&self) -> f32 {
        band_power(&self.bins, 0..self.bins.len()).unwrap_or(0.0)
    }
}

/// Mean of `bins[range]`, `None` for empty or out-of-bounds ranges
pub fn band_power(bins: &[f32], range: Range<usize>) -> Option<f32> {
    if range.start >= range.end || range.end > bins.len() {
        return None;
    }
    let slice = &bins[range];
    Some(slice.iter().sum::<f32>() / slice.len() as f32)
}

/// Extractor settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureConfig {
    pub sample_rate: u32,
    pub block_size: usize,
    pub mel_bins: usize,
    pub rescale: Rescale,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            block_size: 1024,
            mel_bins: MEL_BINS,
            rescale: Rescale::Log1p,
        }
    }
}

/// One triangular mel filter stored sparsely over FFT bins
#[derive(Debug, Clone)]
struct MelFilter {
    first_bin: usize,
    weights: Vec<f32>,
}

fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10f32.powf(mel / 2595.0) - 1.0)
}

/// Real-time mel feature extractor
///
/// All buffers are allocated in [`FeatureExtractor::new`]; `extract_into`
/// does not allocate and is safe to call from an audio callback.
pub struct FeatureExtractor {
    config: FeatureConfig,
    fft_size: usize,
    fft: Arc<dyn rustfft::Fft<f32>>,
    window: Vec<f32>,
    filters: Vec<MelFilter>,
    weights: Vec<f32>,
    /// Scales magnitudes so a full-scale sine reads close to 1.0
    magnitude_scale: f32,
    fft_buffer: Vec<Complex<f32>>,
    magnitudes: Vec<f32>,
}

impl FeatureExtractor {
    pub fn new(config: FeatureConfig) -> Result<Self, AnalysisError> {
        if config.block_size == 0 {
            return Err(AnalysisError::InvalidConfig("block size must be > 0".into()));
        }
        if config.mel_bins == 0 {
            return Err(AnalysisError::InvalidConfig("mel bin count must be > 0".into()));
        }
        if config.sample_rate == 0 {
            return Err(AnalysisError::InvalidConfig("sample rate must be > 0".into()));
        }

        let fft_size = config.block_size.next_power_of_two().max(MIN_FFT_SIZE);
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);

        // Hann window over the block itself, padding stays zero
        let block = config.block_size;
        let window: Vec<f32> = (0..block)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / block as f32).cos()))
            .collect();
        let window_sum: f32 = window.iter().sum();
        let magnitude_scale = if window_sum > 0.0 { 2.0 / window_sum } else { 1.0 };

        let filters = Self::build_filterbank(config.sample_rate, fft_size, config.mel_bins);
        let weights = config.rescale.weights(config.mel_bins);

        tracing::debug!(
            fft_size,
            mel_bins = config.mel_bins,
            rescale = ?config.rescale,
            "feature extractor ready"
        );

        Ok(Self {
            config,
            fft_size,
            fft,
            window,
            filters,
            weights,
            magnitude_scale,
            fft_buffer: vec![Complex::new(0.0, 0.0); fft_size],
            magnitudes: vec![0.0; fft_size / 2 + 1],
        })
    }

    /// Triangular filters evenly spaced on the mel scale from 0 Hz to Nyquist
    fn build_filterbank(sample_rate: u32, fft_size: usize, bands: usize) -> Vec<MelFilter> {
        let nyquist = sample_rate as f32 / 2.0;
        let mel_max = hz_to_mel(nyquist);
        let edges: Vec<f32> = (0..bands + 2)
            .map(|i| mel_to_hz(mel_max * i as f32 / (bands + 1) as f32))
            .collect();
        let bin_hz = sample_rate as f32 / fft_size as f32;
        let max_bin = fft_size / 2;

        (0..bands)
            .map(|b| {
                let (left, center, right) = (edges[b], edges[b + 1], edges[b + 2]);
                let first_bin = ((left / bin_hz).floor() as usize).min(max_bin);
                let last_bin = ((right / bin_hz).ceil() as usize).min(max_bin);
                let weights: Vec<f32> = (first_bin..=last_bin)
                    .map(|k| {
                        let f = k as f32 * bin_hz;
                        let rising = (f - left) / (center - left).max(f32::EPSILON);
                        let falling = (right - f) / (right - center).max(f32::EPSILON);
                        rising.min(falling).max(0.0)
                    })
                    .collect();
                MelFilter { first_bin, weights }
            })
            .collect()
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn bins(&self) -> usize {
        self.config.mel_bins
    }

    /// Weighting curve in use
    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    /// Extract features into a caller-owned vector of `mel_bins` length
    ///
    /// Blocks longer than the configured size are truncated, shorter ones
    /// zero padded.
    pub fn extract_into(&mut self, samples: &[f32], out: &mut [f32]) {
        let count = samples.len().min(self.window.len());
        for (i, slot) in self.fft_buffer.iter_mut().enumerate() {
            *slot = if i < count {
                Complex::new(samples[i] * self.window[i], 0.0)
            } else {
                Complex::new(0.0, 0.0)
            };
        }

        self.fft.process(&mut self.fft_buffer);

        for (mag, c) in self.magnitudes.iter_mut().zip(self.fft_buffer.iter()) {
            *mag = c.norm() * self.magnitude_scale;
        }

        for ((slot, filter), weight) in out
            .iter_mut()
            .zip(self.filters.iter())
            .zip(self.weights.iter())
        {
            let mut energy = 0.0f32;
            let mut norm = 0.0f32;
            for (offset, w) in filter.weights.iter().enumerate() {
                energy += self.magnitudes[filter.first_bin + offset] * w;
                norm += w;
            }
            let value = if norm > 0.0 { energy / norm } else { 0.0 };
            *slot = (value * weight).max(0.0);
        }
    }

    /// Extract features into a fresh [`FeatureVector`]
    pub fn extract(&mut self, samples: &[f32]) -> FeatureVector {
        let mut bins = vec![0.0; self.config.mel_bins];
        self.extract_into(samples, &mut bins);
        FeatureVector { bins }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: u32, len: usize, amp: f32) -> Vec<f32> {
        (0..len)
            .map(|i| amp * (2.0 * PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn test_weight_curves_have_unit_mean() {
        for rescale in [Rescale::Log1p, Rescale::Exp, Rescale::Linear] {
            for n in [1usize, 2, 3, 7, 64, 128, 1000] {
                let w = rescale.weights(n);
                assert_eq!(w.len(), n);
                let mean: f64 = w.iter().map(|&x| x as f64).sum::<f64>() / n as f64;
                assert!((mean - 1.0).abs() < 1e-5, "{:?} n={} mean={}", rescale, n, mean);
            }
        }
    }

    #[test]
    fn test_weight_curves_are_monotonic() {
        for rescale in [Rescale::Log1p, Rescale::Exp, Rescale::Linear] {
            let w = rescale.weights(128);
            assert!(w.windows(2).all(|p| p[1] >= p[0]));
        }
    }

    #[test]
    fn test_rescale_from_str() {
        assert_eq!("log1p".parse::<Rescale>().unwrap(), Rescale::Log1p);
        assert_eq!("EXP".parse::<Rescale>().unwrap(), Rescale::Exp);
        assert_eq!("linear".parse::<Rescale>().unwrap(), Rescale::Linear);
        assert!("cubic".parse::<Rescale>().is_err());
    }

    #[test]
    fn test_silence_yields_zero_vector() {
        let mut ex = FeatureExtractor::new(FeatureConfig::default()).unwrap();
        let fv = ex.extract(&vec![0.0; 1024]);
        assert_eq!(fv.len(), MEL_BINS);
        assert!(fv.bins.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_output_is_non_negative() {
        let mut ex = FeatureExtractor::new(FeatureConfig::default()).unwrap();
        let noise: Vec<f32> = (0..1024).map(|i| ((i * 7919) % 200) as f32 / 100.0 - 1.0).collect();
        let fv = ex.extract(&noise);
        assert!(fv.bins.iter().all(|&v| v >= 0.0 && v.is_finite()));
    }

    #[test]
    fn test_low_tone_lands_in_low_bins() {
        let config = FeatureConfig::default();
        let mut ex = FeatureExtractor::new(config).unwrap();
        let fv = ex.extract(&sine(100.0, config.sample_rate, config.block_size, 0.8));
        let low = fv.band_power(0..16).unwrap();
        let high = fv.band_power(64..128).unwrap();
        assert!(low > high * 10.0, "low={} high={}", low, high);
    }

    #[test]
    fn test_high_tone_lands_in_high_bins() {
        let config = FeatureConfig::default();
        let mut ex = FeatureExtractor::new(config).unwrap();
        let fv = ex.extract(&sine(8000.0, config.sample_rate, config.block_size, 0.8));
        let low = fv.band_power(0..16).unwrap();
        let high = fv.band_power(80..128).unwrap();
        assert!(high > low, "low={} high={}", low, high);
    }

    #[test]
    fn test_short_block_is_zero_padded() {
        let mut ex = FeatureExtractor::new(FeatureConfig::default()).unwrap();
        let fv = ex.extract(&sine(440.0, 44_100, 100, 0.5));
        assert_eq!(fv.len(), MEL_BINS);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = FeatureConfig {
            block_size: 0,
            ..FeatureConfig::default()
        };
        assert!(FeatureExtractor::new(config).is_err());
        let config = FeatureConfig {
            mel_bins: 0,
            ..FeatureConfig::default()
        };
        assert!(FeatureExtractor::new(config).is_err());
    }

    #[test]
    fn test_band_power_bounds() {
        let fv = FeatureVector::from_bins(vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(fv.band_power(0..2), Some(1.5));
        assert_eq!(fv.band_power(0..4), Some(2.5));
        assert_eq!(fv.band_power(2..2), None);
        assert_eq!(fv.band_power(3..5), None);
        assert_eq!(fv.mean(), 2.5);
    }
}
