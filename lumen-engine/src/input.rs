//! Audio input: live capture through cpal or paced playback of a decoded
//! file. Both feed a [`BlockPipeline`] that turns samples into feature
//! vectors.

use crate::error::EngineError;
use crate::queue::SlotSender;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use lumen_analysis::{FeatureConfig, FeatureExtractor, FeatureVector};
use parking_lot::Mutex;
use ringbuf::traits::Producer;
use ringbuf::traits::Split;
use ringbuf::HeapRb;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub type SampleProducer = <HeapRb<f32> as Split>::Prod;
pub type SampleConsumer = <HeapRb<f32> as Split>::Cons;

/// Ring between the audio callback and the prediction worker
pub fn sample_ring(capacity: usize) -> (SampleProducer, SampleConsumer) {
    HeapRb::<f32>::new(capacity.max(1)).split()
}

/// Where audio comes from
#[derive(Clone)]
pub enum InputSource {
    /// Live capture; `None` uses the default input device
    Device(Option<String>),
    /// Decoded mono samples played back in real time
    File(Arc<FileAudio>),
}

pub struct FileAudio {
    pub title: String,
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub looped: bool,
    /// Samples consumed so far
    pub position: AtomicU64,
    pub playing: AtomicBool,
}

impl FileAudio {
    pub fn new(title: impl Into<String>, samples: Vec<f32>, sample_rate: u32, looped: bool) -> Self {
        Self {
            title: title.into(),
            samples,
            sample_rate,
            looped,
            position: AtomicU64::new(0),
            playing: AtomicBool::new(false),
        }
    }

    pub fn progress_ms(&self) -> u64 {
        self.position.load(Ordering::Relaxed) * 1000 / self.sample_rate.max(1) as u64
    }
}

/// Mono downmix, block framing and feature extraction
///
/// Fed from the audio callback. Completed blocks are pushed into the
/// feature slot; every mono sample also goes into the prediction ring when
/// one is attached.
pub struct BlockPipeline {
    config: FeatureConfig,
    extractor: FeatureExtractor,
    block: Vec<f32>,
    filled: usize,
    bins: Vec<f32>,
    features: SlotSender<FeatureVector>,
    ring: Option<SampleProducer>,
    sample_rate: Arc<AtomicU32>,
    blocks: u64,
    ring_overflow: u64,
}

impl BlockPipeline {
    pub fn new(
        config: FeatureConfig,
        features: SlotSender<FeatureVector>,
        ring: Option<SampleProducer>,
    ) -> Result<Self, EngineError> {
        let extractor = FeatureExtractor::new(config)?;
        let sample_rate = Arc::new(AtomicU32::new(config.sample_rate));
        Ok(Self {
            block: vec![0.0; config.block_size],
            bins: vec![0.0; config.mel_bins],
            config,
            extractor,
            filled: 0,
            features,
            ring,
            sample_rate,
            blocks: 0,
            ring_overflow: 0,
        })
    }

    /// Rate of the samples currently being fed, shared with readers of the
    /// prediction ring
    pub fn sample_rate_handle(&self) -> Arc<AtomicU32> {
        self.sample_rate.clone()
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    /// Switch to a new input rate, rebuilding the filterbank
    pub fn set_sample_rate(&mut self, sample_rate: u32) -> Result<(), EngineError> {
        if sample_rate == self.config.sample_rate {
            return Ok(());
        }
        let mut config = self.config;
        config.sample_rate = sample_rate;
        self.extractor = FeatureExtractor::new(config)?;
        self.config = config;
        self.filled = 0;
        self.sample_rate.store(sample_rate, Ordering::Relaxed);
        tracing::info!(sample_rate, "feature extractor rebuilt for input rate");
        Ok(())
    }

    pub fn blocks_processed(&self) -> u64 {
        self.blocks
    }

    /// Samples the prediction ring had no room for
    pub fn ring_overflow(&self) -> u64 {
        self.ring_overflow
    }

    /// Feed interleaved frames
    pub fn push_interleaved(&mut self, data: &[f32], channels: usize) {
        if channels <= 1 {
            for &s in data {
                self.push_sample(s);
            }
            return;
        }
        let scale = 1.0 / channels as f32;
        for frame in data.chunks_exact(channels) {
            self.push_sample(frame.iter().sum::<f32>() * scale);
        }
    }

    fn push_sample(&mut self, sample: f32) {
        if let Some(ring) = self.ring.as_mut() {
            if ring.try_push(sample).is_err() {
                self.ring_overflow += 1;
            }
        }
        self.block[self.filled] = sample;
        self.filled += 1;
        if self.filled == self.block.len() {
            self.filled = 0;
            self.extractor.extract_into(&self.block, &mut self.bins);
            self.features.push(FeatureVector::from_bins(self.bins.clone()));
            self.blocks += 1;
        }
    }
}

/// Names of every input device on the default host
pub fn list_input_devices() -> Vec<String> {
    let host = cpal::default_host();
    match host.input_devices() {
        Ok(devices) => devices.filter_map(|d| d.name().ok()).collect(),
        Err(e) => {
            tracing::warn!("could not enumerate input devices: {}", e);
            Vec::new()
        }
    }
}

fn find_input_device(name: Option<&str>) -> Result<cpal::Device, EngineError> {
    let host = cpal::default_host();
    let device = match name {
        Some(wanted) => host
            .input_devices()
            .map_err(|e| EngineError::Stream(e.to_string()))?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false)),
        None => host.default_input_device(),
    };
    device.ok_or_else(|| EngineError::DeviceNotFound {
        requested: name.unwrap_or("default").to_string(),
        available: list_input_devices(),
    })
}

/// Check that an input device can be opened before any worker starts
pub fn probe_device(name: Option<&str>) -> Result<String, EngineError> {
    let device = find_input_device(name)?;
    Ok(device.name().unwrap_or_else(|_| "Unknown".to_string()))
}

/// Capture from an input device until `running` clears.
///
/// The stream is built on the calling thread and lives until return.
pub fn run_capture(
    name: Option<&str>,
    pipeline: Arc<Mutex<BlockPipeline>>,
    running: Arc<AtomicBool>,
) -> Result<(), EngineError> {
    let device = find_input_device(name)?;
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

    let supported = device
        .default_input_config()
        .map_err(|e| EngineError::Stream(format!("No supported config: {}", e)))?;
    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels();
    if channels == 0 {
        return Err(EngineError::Stream("Audio device reported 0 channels".into()));
    }
    pipeline.lock().set_sample_rate(sample_rate)?;

    let stream_config = cpal::StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let failed = Arc::new(AtomicBool::new(false));
    let failed_cb = failed.clone();
    let pipeline_cb = pipeline.clone();
    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                // Skip the buffer rather than block the audio thread
                if let Some(mut p) = pipeline_cb.try_lock() {
                    p.push_interleaved(data, channels as usize);
                }
            },
            move |err| {
                tracing::error!("audio stream error: {}", err);
                failed_cb.store(true, Ordering::Relaxed);
            },
            None,
        )
        .map_err(|e| EngineError::Stream(e.to_string()))?;
    stream.play().map_err(|e| EngineError::Stream(e.to_string()))?;

    tracing::info!(device = %device_name, sample_rate, channels, "audio capture started");

    while running.load(Ordering::Relaxed) {
        if failed.load(Ordering::Relaxed) {
            return Err(EngineError::Stream(format!("capture on '{}' failed", device_name)));
        }
        thread::sleep(Duration::from_millis(10));
    }

    drop(stream);
    tracing::info!(device = %device_name, "audio capture stopped");
    Ok(())
}

/// Feed a decoded file through the pipeline at real-time pace, resuming from
/// the stored position.
pub fn run_file(
    audio: Arc<FileAudio>,
    pipeline: Arc<Mutex<BlockPipeline>>,
    running: Arc<AtomicBool>,
) -> Result<(), EngineError> {
    pipeline.lock().set_sample_rate(audio.sample_rate)?;
    let chunk = pipeline.lock().config.block_size.max(1);
    let rate = audio.sample_rate.max(1) as f64;
    let total = audio.samples.len();

    audio.playing.store(true, Ordering::Relaxed);
    tracing::info!(title = %audio.title, seconds = total as f64 / rate, "file playback started");

    let start = Instant::now();
    let mut fed: u64 = 0;
    while running.load(Ordering::Relaxed) {
        let mut pos = audio.position.load(Ordering::Relaxed) as usize;
        if pos >= total {
            if audio.looped && total > 0 {
                pos = 0;
            } else {
                break;
            }
        }
        let end = (pos + chunk).min(total);
        pipeline.lock().push_interleaved(&audio.samples[pos..end], 1);
        audio.position.store(end as u64, Ordering::Relaxed);
        fed += (end - pos) as u64;

        let due = Duration::from_secs_f64(fed as f64 / rate);
        if let Some(wait) = due.checked_sub(start.elapsed()) {
            thread::sleep(wait);
        }
    }

    audio.playing.store(false, Ordering::Relaxed);
    if audio.position.load(Ordering::Relaxed) as usize >= total {
        tracing::info!(title = %audio.title, "file playback finished");
        // Idle until stopped so the supervisor does not replay the file
        while running.load(Ordering::Relaxed) {
            thread::sleep(Duration::from_millis(10));
        }
    }
    Ok(())
}

/// Run whichever source is configured
pub fn run_input(
    source: &InputSource,
    pipeline: Arc<Mutex<BlockPipeline>>,
    running: Arc<AtomicBool>,
) -> Result<(), EngineError> {
    match source {
        InputSource::Device(name) => run_capture(name.as_deref(), pipeline, running),
        InputSource::File(audio) => run_file(audio.clone(), pipeline, running),
    }
}
