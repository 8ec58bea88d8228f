//! Audio analysis for Lumen
//!
//! Provides the mel-band feature vector that drives every audio-reactive
//! fixture.

mod features;

pub use features::{
    band_power, AnalysisError, FeatureConfig, FeatureExtractor, FeatureVector, Rescale, MEL_BINS,
};
