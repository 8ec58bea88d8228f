//! Scene prediction
//!
//! A worker drains the audio ring filled by the input callback, keeps a
//! rolling window, resamples it for the predictor and records each
//! predicted scene. The reported scene is the most common one among the
//! recent predictions.

use crate::event::{EngineEvent, EventSender};
use crate::input::SampleConsumer;
use lumen_library::resample_mono;
use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prediction {
    pub scene: String,
    pub cluster: Option<usize>,
}

/// Pluggable classifier from an audio window to a scene name
pub trait ScenePredictor: Send {
    fn name(&self) -> &str;

    /// Classify a mono window sampled at `sample_rate`. `None` when the
    /// predictor has no opinion.
    fn predict(&mut self, window: &[f32], sample_rate: u32) -> Option<Prediction>;
}

/// Maps window RMS through ascending thresholds to scene names
#[derive(Debug, Clone, PartialEq)]
pub struct LoudnessPredictor {
    levels: Vec<(f32, String)>,
}

impl LoudnessPredictor {
    pub fn new(mut levels: Vec<(f32, String)>) -> Self {
        levels.sort_by(|a, b| a.0.total_cmp(&b.0));
        Self { levels }
    }

    /// Parse `threshold:scene` pairs separated by commas,
    /// e.g. `0:chill,0.05:party,0.2:strobe`
    pub fn parse(spec: &str) -> Result<Self, String> {
        let mut levels = Vec::new();
        for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (threshold, scene) = part
                .split_once(':')
                .ok_or_else(|| format!("expected threshold:scene, got '{}'", part))?;
            let threshold: f32 = threshold
                .trim()
                .parse()
                .map_err(|_| format!("invalid threshold '{}'", threshold))?;
            levels.push((threshold, scene.trim().to_string()));
        }
        if levels.is_empty() {
            return Err("no loudness levels given".into());
        }
        Ok(Self::new(levels))
    }
}

impl ScenePredictor for LoudnessPredictor {
    fn name(&self) -> &str {
        "loudness"
    }

    fn predict(&mut self, window: &[f32], _sample_rate: u32) -> Option<Prediction> {
        if window.is_empty() {
            return None;
        }
        let rms = (window.iter().map(|s| s * s).sum::<f32>() / window.len() as f32).sqrt();
        let index = self.levels.iter().rposition(|(threshold, _)| rms >= *threshold)?;
        Some(Prediction {
            scene: self.levels[index].1.clone(),
            cluster: Some(index),
        })
    }
}

/// Ring of recent predicted scene names
#[derive(Debug, Clone)]
pub struct SceneCache {
    entries: VecDeque<String>,
    capacity: usize,
}

impl SceneCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, scene: String) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(scene);
    }

    /// Most frequent scene; ties go to the most recently seen
    pub fn mode(&self) -> Option<&str> {
        let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
        for (i, scene) in self.entries.iter().enumerate() {
            let entry = counts.entry(scene.as_str()).or_insert((0, i));
            entry.0 += 1;
            entry.1 = i;
        }
        counts
            .into_iter()
            .max_by_key(|(_, (count, last))| (*count, *last))
            .map(|(scene, _)| scene)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictionConfig {
    pub interval: Duration,
    pub window: Duration,
    /// Rate the predictor expects
    pub sample_rate: u32,
    pub cache_len: usize,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            window: Duration::from_secs(4),
            sample_rate: 32_000,
            cache_len: 50,
        }
    }
}

/// Prediction results shared with the controller
#[derive(Debug)]
pub struct PredictionShared {
    cache: Mutex<SceneCache>,
    current: Mutex<Option<Prediction>>,
}

impl PredictionShared {
    pub fn new(cache_len: usize) -> Self {
        Self {
            cache: Mutex::new(SceneCache::new(cache_len)),
            current: Mutex::new(None),
        }
    }

    /// Current mode of the scene cache with the latest cluster
    pub fn current(&self) -> Option<Prediction> {
        self.current.lock().clone()
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().len()
    }

    /// Record a prediction; returns the new reported prediction when the
    /// reported scene changed
    pub fn record(&self, prediction: Prediction) -> Option<Prediction> {
        let scene = {
            let mut cache = self.cache.lock();
            cache.push(prediction.scene);
            cache.mode().map(str::to_string)?
        };
        let next = Prediction {
            scene,
            cluster: prediction.cluster,
        };
        let mut current = self.current.lock();
        let changed = current.as_ref().map_or(true, |c| c.scene != next.scene);
        *current = Some(next.clone());
        changed.then_some(next)
    }

    pub fn reset(&self) {
        self.cache.lock().clear();
        *self.current.lock() = None;
    }
}

/// Ring consumer, rolling window and predictor. Lives behind a mutex so a
/// restarted worker picks up where the last one stopped.
pub struct PredictionWorker {
    consumer: SampleConsumer,
    source_rate: Arc<AtomicU32>,
    window: VecDeque<f32>,
    window_rate: u32,
    scratch: Vec<f32>,
    predictor: Box<dyn ScenePredictor>,
    config: PredictionConfig,
}

impl PredictionWorker {
    pub fn new(
        consumer: SampleConsumer,
        source_rate: Arc<AtomicU32>,
        predictor: Box<dyn ScenePredictor>,
        config: PredictionConfig,
    ) -> Self {
        Self {
            consumer,
            source_rate,
            window: VecDeque::new(),
            window_rate: 0,
            scratch: vec![0.0; 4096],
            predictor,
            config,
        }
    }

    pub fn predictor_name(&self) -> &str {
        self.predictor.name()
    }

    fn window_len(&self, rate: u32) -> usize {
        (self.config.window.as_secs_f64() * rate as f64) as usize
    }

    /// Move every queued sample into the window, trimming it to length
    pub fn flush(&mut self) -> usize {
        let rate = self.source_rate.load(Ordering::Relaxed);
        if rate != self.window_rate {
            self.window.clear();
            self.window_rate = rate;
        }
        let max = self.window_len(rate).max(1);

        let mut moved = 0;
        while self.consumer.occupied_len() > 0 {
            let n = self.consumer.pop_slice(&mut self.scratch);
            if n == 0 {
                break;
            }
            self.window.extend(&self.scratch[..n]);
            moved += n;
        }
        if self.window.len() > max {
            let excess = self.window.len() - max;
            self.window.drain(..excess);
        }
        moved
    }

    pub fn window_full(&self) -> bool {
        self.window_rate > 0 && self.window.len() >= self.window_len(self.window_rate)
    }

    /// Flush the backlog and, once the window is full, run the predictor
    pub fn step(&mut self) -> Option<Prediction> {
        self.flush();
        if !self.window_full() {
            return None;
        }
        let samples = self.window.make_contiguous();
        let resampled = match resample_mono(samples, self.window_rate, self.config.sample_rate) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("prediction resample failed: {}", e);
                return None;
            }
        };
        self.predictor.predict(&resampled, self.config.sample_rate)
    }
}

/// Prediction worker body
pub fn run_prediction(
    worker: &Mutex<PredictionWorker>,
    shared: &PredictionShared,
    events: &EventSender,
    running: &AtomicBool,
) {
    let Some(mut worker) = worker.try_lock() else {
        tracing::warn!("prediction worker already running");
        return;
    };
    let interval = worker.config.interval;
    tracing::info!(predictor = worker.predictor_name(), "prediction worker started");

    while running.load(Ordering::Relaxed) {
        let started = Instant::now();
        if let Some(prediction) = worker.step() {
            tracing::debug!(scene = %prediction.scene, cluster = ?prediction.cluster, "prediction");
            if let Some(reported) = shared.record(prediction) {
                tracing::info!(scene = %reported.scene, "predicted scene changed");
                events.send(EngineEvent::Predicted {
                    scene: reported.scene,
                    cluster: reported.cluster,
                });
            }
        }
        if let Some(rest) = interval.checked_sub(started.elapsed()) {
            thread::sleep(rest);
        }
    }
}
