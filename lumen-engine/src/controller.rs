//! Engine controller
//!
//! Owns the scene store, the DMX link and the supervised workers:
//!
//! - `input`: live capture or file playback into the feature slot
//! - `render`: scene rendering and DMX transmission
//! - `watchdog`: stall detection for the render loop
//! - `prediction`: scene prediction, when a predictor is configured
//!
//! The application calls [`Controller::supervise`] periodically to restart
//! dead workers, react to the watchdog and follow predicted or
//! playback-driven scenes.

use crate::error::EngineError;
use crate::event::{event_channel, EngineEvent, EventSender, FrameHealth, HealthCounters};
use crate::input::{run_input, sample_ring, BlockPipeline, InputSource};
use crate::prediction::{run_prediction, Prediction, PredictionConfig, PredictionShared, PredictionWorker, ScenePredictor};
use crate::queue::{latest_slot, SlotReceiver};
use crate::render::Renderer;
use crate::supervisor::Supervisor;
use crate::sync::PlaybackFollower;
use crate::watchdog::{run_watchdog, ReinitState, Watchdog};
use crossbeam_channel::Receiver;
use lumen_analysis::{FeatureConfig, FeatureVector};
use lumen_dmx::{Connector, DmxDriver, DmxError, MemoryHandle, MemoryTransport};
use lumen_library::{SceneSelection, SceneStore};
use lumen_light::{Profile, Scene};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Connection rounds a render worker makes before the DMX link counts as lost
const CONNECT_ROUNDS: u32 = 3;
const CONNECT_BACKOFF: Duration = Duration::from_millis(50);
const CONNECT_BACKOFF_MAX: Duration = Duration::from_secs(2);

/// Engine tunables
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    pub features: FeatureConfig,
    /// Render-loop sleep when no feature vector is waiting
    pub poll_interval: Duration,
    pub watchdog_timeout: Duration,
    pub join_timeout: Duration,
    /// How often the application should call [`Controller::supervise`]
    pub supervision_interval: Duration,
    pub prediction: PredictionConfig,
    /// Switch to the predicted scene whenever it changes
    pub auto_scene: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            features: FeatureConfig::default(),
            poll_interval: Duration::from_micros(500),
            watchdog_timeout: Duration::from_secs(10),
            join_timeout: Duration::from_secs(2),
            supervision_interval: Duration::from_secs(1),
            prediction: PredictionConfig::default(),
            auto_scene: false,
        }
    }
}

pub type ConnectFn = Box<dyn Fn(Option<&str>) -> Result<DmxDriver, DmxError> + Send + Sync>;

/// The DMX connection, parked here whenever the render worker is not
/// holding it
pub struct DmxLink {
    driver: Mutex<Option<DmxDriver>>,
    connect: ConnectFn,
    port: Mutex<Option<String>>,
}

impl DmxLink {
    /// `connect` receives the last working port
    pub fn new(connect: ConnectFn, cached_port: Option<String>) -> Self {
        Self {
            driver: Mutex::new(None),
            connect,
            port: Mutex::new(cached_port),
        }
    }

    /// Real hardware through serial port discovery
    pub fn hardware(connector: Connector, cached_port: Option<String>) -> Self {
        Self::new(Box::new(move |cached: Option<&str>| connector.connect(cached)), cached_port)
    }

    /// In-memory interface for dry runs. The handle sees the first
    /// connection's traffic.
    pub fn memory(name: &str) -> (Self, MemoryHandle) {
        let transport = MemoryTransport::new(name);
        let handle = transport.handle();
        let first = Mutex::new(Some(transport));
        let name = name.to_string();
        let link = Self::new(
            Box::new(move |_: Option<&str>| {
                let transport = first.lock().take().unwrap_or_else(|| MemoryTransport::new(&name));
                DmxDriver::open(Box::new(transport))
            }),
            None,
        );
        (link, handle)
    }

    /// Last port a connection succeeded on
    pub fn port(&self) -> Option<String> {
        self.port.lock().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.driver.lock().is_some()
    }

    /// Open a new connection, preferring the last working port
    pub fn open(&self) -> Result<DmxDriver, DmxError> {
        let cached = self.port();
        let driver = (self.connect)(cached.as_deref())?;
        tracing::info!(port = driver.port_name(), "DMX interface connected");
        *self.port.lock() = Some(driver.port_name().to_string());
        Ok(driver)
    }

    /// Connect now unless a parked connection exists
    pub fn ensure_connected(&self) -> Result<(), DmxError> {
        let mut parked = self.driver.lock();
        if parked.is_none() {
            *parked = Some(self.open()?);
        }
        Ok(())
    }

    fn take(&self) -> Option<DmxDriver> {
        self.driver.lock().take()
    }

    fn put(&self, driver: DmxDriver) {
        *self.driver.lock() = Some(driver);
    }

    /// Black out and release the parked connection
    pub fn close(&self) {
        if let Some(mut driver) = self.take() {
            if let Err(e) = driver.close() {
                tracing::warn!(port = driver.port_name(), "blackout on close failed: {}", e);
            }
        }
    }
}

/// Scene handed to the render worker. The epoch changes on every set so
/// that re-selecting the same scene still resets render state.
pub struct SceneSlot {
    scene: Mutex<Arc<Scene>>,
    epoch: AtomicU64,
}

impl SceneSlot {
    pub fn new(scene: Arc<Scene>) -> Self {
        Self {
            scene: Mutex::new(scene),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn set(&self, scene: Arc<Scene>) {
        *self.scene.lock() = scene;
        self.epoch.fetch_add(1, Ordering::Release);
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub fn current(&self) -> Arc<Scene> {
        self.scene.lock().clone()
    }
}

struct PredictionParts {
    worker: Mutex<PredictionWorker>,
    shared: PredictionShared,
}

/// State shared by every worker
struct Shared {
    config: EngineConfig,
    started: Instant,
    profile: Arc<Profile>,
    scene: SceneSlot,
    features: SlotReceiver<FeatureVector>,
    pipeline: Arc<Mutex<BlockPipeline>>,
    input: InputSource,
    link: DmxLink,
    watchdog: Arc<Watchdog>,
    health: HealthCounters,
    events: EventSender,
    prediction: Option<PredictionParts>,
    /// Set when the DMX link is lost for good
    fatal: Mutex<Option<DmxError>>,
    /// Bumped whenever the workers are stopped. A render worker parks its
    /// driver only while its generation is current.
    generation: AtomicU64,
}

pub struct Controller {
    shared: Arc<Shared>,
    store: SceneStore,
    supervisor: Supervisor,
    events: Receiver<EngineEvent>,
    follower: Option<PlaybackFollower>,
    last_auto: Option<String>,
}

impl Controller {
    pub fn new(
        config: EngineConfig,
        store: SceneStore,
        input: InputSource,
        link: DmxLink,
        predictor: Option<Box<dyn ScenePredictor>>,
    ) -> Result<Self, EngineError> {
        let (feature_tx, feature_rx) = latest_slot();
        let (events_tx, events_rx) = event_channel();

        let (ring, consumer) = if predictor.is_some() {
            // Room for a full window at up to 96 kHz
            let capacity = (config.prediction.window.as_secs_f64() * 96_000.0) as usize;
            let (producer, consumer) = sample_ring(capacity);
            (Some(producer), Some(consumer))
        } else {
            (None, None)
        };
        let pipeline = BlockPipeline::new(config.features, feature_tx, ring)?;
        let prediction = match (predictor, consumer) {
            (Some(predictor), Some(consumer)) => {
                let worker =
                    PredictionWorker::new(consumer, pipeline.sample_rate_handle(), predictor, config.prediction);
                Some(PredictionParts {
                    worker: Mutex::new(worker),
                    shared: PredictionShared::new(config.prediction.cache_len),
                })
            }
            _ => None,
        };

        let shared = Arc::new(Shared {
            config,
            started: Instant::now(),
            profile: store.profile().clone(),
            scene: SceneSlot::new(store.current()),
            features: feature_rx,
            pipeline: Arc::new(Mutex::new(pipeline)),
            input,
            link,
            watchdog: Arc::new(Watchdog::new(config.watchdog_timeout)),
            health: HealthCounters::default(),
            events: events_tx,
            prediction,
            fatal: Mutex::new(None),
            generation: AtomicU64::new(0),
        });

        let mut supervisor = Supervisor::new(config.join_timeout);
        {
            let shared = shared.clone();
            supervisor.add("input", move |running| {
                run_input(&shared.input, shared.pipeline.clone(), running)
            })?;
        }
        {
            let shared = shared.clone();
            supervisor.add("render", move |running| render_worker(&shared, &running))?;
        }
        {
            let watchdog = shared.watchdog.clone();
            supervisor.add("watchdog", move |running| {
                run_watchdog(watchdog.clone(), running);
                Ok(())
            })?;
        }
        if shared.prediction.is_some() {
            let shared = shared.clone();
            supervisor.add("prediction", move |running| {
                if let Some(parts) = &shared.prediction {
                    run_prediction(&parts.worker, &parts.shared, &shared.events, &running);
                }
                Ok(())
            })?;
        }

        Ok(Self {
            shared,
            store,
            supervisor,
            events: events_rx,
            follower: None,
            last_auto: None,
        })
    }

    /// Drive scene changes from playback position
    pub fn with_follower(mut self, follower: PlaybackFollower) -> Self {
        self.follower = Some(follower);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn is_running(&self) -> bool {
        self.supervisor.is_running()
    }

    /// Connect the DMX interface and start every worker. Connection
    /// failure is returned, not retried.
    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.is_running() {
            return Ok(());
        }
        self.shared.link.ensure_connected()?;
        self.shared.watchdog.complete_reinit();
        self.supervisor.start()?;
        tracing::info!(
            scene = self.store.current_name(),
            port = ?self.shared.link.port(),
            "engine started"
        );
        Ok(())
    }

    /// Stop every worker, then black out and close the DMX interface
    pub fn stop(&mut self) {
        if !self.is_running() && !self.shared.link.is_connected() {
            return;
        }
        self.halt_workers();
        self.shared.link.close();
        tracing::info!("engine stopped");
    }

    /// Stop the workers and retire their generation. Detached threads that
    /// finish later release their driver instead of parking it.
    fn halt_workers(&mut self) {
        self.supervisor.stop();
        self.shared.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Select a scene by name. An unknown scene is logged and the current
    /// one kept.
    pub fn change_scene(&mut self, name: &str) -> Result<SceneSelection, EngineError> {
        let selection = match self.store.set_scene(name) {
            Ok(selection) => selection,
            Err(e) => {
                tracing::warn!(scene = name, current = self.store.current_name(), "scene change rejected: {}", e);
                return Err(e.into());
            }
        };
        self.publish(&selection);
        Ok(selection)
    }

    /// Re-read the scene directory, keeping the requested scene when it
    /// still exists
    pub fn reload_scenes(&mut self) -> Result<SceneSelection, EngineError> {
        let selection = self.store.reload()?;
        tracing::info!(scenes = self.store.len(), "scenes reloaded");
        self.publish(&selection);
        Ok(selection)
    }

    fn publish(&self, selection: &SceneSelection) {
        self.shared.scene.set(self.store.current());
        self.shared.events.send(EngineEvent::SceneChanged {
            requested: selection.requested.clone(),
            effective: selection.effective.clone(),
        });
    }

    /// One supervision pass: restart dead workers, handle the watchdog and
    /// apply automatic scene selection. Errors only when the engine cannot
    /// continue.
    pub fn supervise(&mut self) -> Result<(), EngineError> {
        if let Some(e) = self.shared.fatal.lock().take() {
            return Err(e.into());
        }
        if !self.is_running() {
            return Err(EngineError::NotRunning);
        }

        let restarts = self.supervisor.check();
        if !restarts.is_empty() {
            self.shared.health.update(|h| h.worker_restarts += restarts.len() as u64);
        }
        for restart in restarts {
            self.shared.events.send(EngineEvent::WorkerRestarted {
                name: restart.name,
                reason: restart.reason,
            });
        }

        if self.shared.watchdog.state() == ReinitState::Reinitializing {
            self.reinitialize()?;
        }

        let wanted = match self.follower.as_mut() {
            Some(follower) => follower.tick(),
            None => self.auto_scene(),
        };
        if let Some(scene) = wanted {
            if scene != self.store.requested_name() {
                // Rejections are already logged
                let _ = self.change_scene(&scene);
            }
        }
        Ok(())
    }

    fn auto_scene(&mut self) -> Option<String> {
        if !self.shared.config.auto_scene {
            return None;
        }
        let predicted = self.predicted_scene()?;
        if self.last_auto.as_deref() == Some(predicted.scene.as_str()) {
            return None;
        }
        self.last_auto = Some(predicted.scene.clone());
        Some(predicted.scene)
    }

    /// Stop every worker, reset the watchdog and start fresh. The render
    /// worker begins with a blackout.
    ///
    /// A failed reconnect is reported, not returned. The workers restart
    /// regardless and the render worker keeps connecting while the engine
    /// stays degraded.
    pub fn reinitialize(&mut self) -> Result<(), EngineError> {
        tracing::warn!("reinitializing engine");
        self.halt_workers();
        self.shared.features.clear();
        if let Some(parts) = &self.shared.prediction {
            parts.shared.reset();
        }
        self.last_auto = None;
        self.shared.watchdog.complete_reinit();
        if let Err(e) = self.shared.link.ensure_connected() {
            tracing::warn!("DMX reconnect during reinitialization failed: {}", e);
            self.shared.health.update(|h| h.transport_errors += 1);
            self.shared.events.send(EngineEvent::Error(format!("DMX reconnect failed: {}", e)));
            self.shared.watchdog.hold_degraded();
        }
        self.supervisor.start()?;
        self.shared.health.update(|h| h.reinitializations += 1);
        self.shared.events.send(EngineEvent::Reinitialized);
        tracing::info!("engine reinitialized");
        Ok(())
    }

    pub fn events(&self) -> &Receiver<EngineEvent> {
        &self.events
    }

    pub fn health(&self) -> FrameHealth {
        self.shared.health.snapshot()
    }

    pub fn selection(&self) -> SceneSelection {
        self.store.selection()
    }

    pub fn predicted_scene(&self) -> Option<Prediction> {
        self.shared.prediction.as_ref().and_then(|p| p.shared.current())
    }

    pub fn scene_names(&self) -> Vec<String> {
        self.store.names().map(str::to_string).collect()
    }

    pub fn store(&self) -> &SceneStore {
        &self.store
    }

    /// Last port the DMX interface connected on
    pub fn port(&self) -> Option<String> {
        self.shared.link.port()
    }

    pub fn watchdog_state(&self) -> ReinitState {
        self.shared.watchdog.state()
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Render worker body. Holds the DMX driver while running and parks it in
/// the link on return.
fn render_worker(shared: &Shared, running: &AtomicBool) -> Result<(), EngineError> {
    let generation = shared.generation.load(Ordering::Acquire);
    let Some(mut driver) = acquire_driver(shared, running)? else {
        return Ok(());
    };
    let mut renderer = Renderer::new(shared.profile.clone());
    let mut applied: Option<u64> = None;

    while running.load(Ordering::Relaxed) {
        shared.watchdog.reset();

        let epoch = shared.scene.epoch();
        if applied != Some(epoch) {
            renderer.apply_scene(shared.scene.current());
            applied = Some(epoch);
        }

        let sent = if renderer.take_blackout(driver.frame_mut()) {
            driver.flush().map(|()| true)
        } else if let Some(features) = shared.features.take() {
            let now = shared.started.elapsed().as_secs_f64();
            let report = renderer.render(&features, now, driver.frame_mut());
            if report.errors > 0 {
                shared.health.update(|h| h.fixture_errors += report.errors as u64);
            }
            driver.flush().map(|()| true)
        } else {
            Ok(false)
        };

        match sent {
            Ok(true) => shared.health.update(|h| h.frames_sent += 1),
            Ok(false) => {
                shared.health.update(|h| h.idle_iterations += 1);
                thread::sleep(shared.config.poll_interval);
            }
            Err(_) if !running.load(Ordering::Relaxed) => break,
            Err(e) => {
                tracing::error!(port = driver.port_name(), "DMX transmit failed: {}", e);
                shared.health.update(|h| h.transport_errors += 1);
                shared.events.send(EngineEvent::Error(format!("DMX transmit failed: {}", e)));
                // Release the port before reconnecting
                let _ = driver.close();
                driver = match acquire_driver(shared, running)? {
                    Some(driver) => driver,
                    None => return Ok(()),
                };
                // Start the new link from a dark universe
                renderer.apply_scene(shared.scene.current());
            }
        }
    }

    if shared.generation.load(Ordering::Acquire) == generation {
        shared.link.put(driver);
    } else {
        tracing::warn!(port = driver.port_name(), "stale render worker released its DMX port");
        driver.abandon();
    }
    Ok(())
}

/// Take the parked driver or connect a new one. The watchdog is held at
/// `Degraded` while connecting. `None` means the worker was stopped first.
fn acquire_driver(shared: &Shared, running: &AtomicBool) -> Result<Option<DmxDriver>, EngineError> {
    if let Some(driver) = shared.link.take() {
        shared.watchdog.release();
        return Ok(Some(driver));
    }
    shared.watchdog.hold_degraded();
    let mut backoff = CONNECT_BACKOFF;
    let mut round = 1;
    loop {
        if !running.load(Ordering::Relaxed) {
            return Ok(None);
        }
        match shared.link.open() {
            Ok(driver) => {
                shared.watchdog.release();
                return Ok(Some(driver));
            }
            Err(e) if round >= CONNECT_ROUNDS => {
                tracing::error!(rounds = round, "DMX interface lost: {}", e);
                let reason = e.to_string();
                *shared.fatal.lock() = Some(e);
                return Err(EngineError::WorkerDied {
                    name: "render".to_string(),
                    reason,
                });
            }
            Err(e) => {
                tracing::warn!(round, backoff_ms = backoff.as_millis() as u64, "DMX connect failed: {}", e);
                shared.health.update(|h| h.transport_errors += 1);
                shared.events.send(EngineEvent::Error(format!("DMX connect failed: {}", e)));
            }
        }
        let deadline = Instant::now() + backoff;
        while running.load(Ordering::Relaxed) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        backoff = (backoff * 2).min(CONNECT_BACKOFF_MAX);
        round += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::FileAudio;
    use crate::prediction::LoudnessPredictor;
    use lumen_library::FallbackTable;
    use lumen_light::FixtureType;
    use serde_json::json;
    use lumen_dmx::Transport;
    use std::f32::consts::PI;
    use std::io;
    use std::sync::atomic::AtomicUsize;

    fn profile() -> Arc<Profile> {
        Arc::new(
            Profile::new(
                "test",
                false,
                vec![("a".to_string(), FixtureType::Dimmer), ("b".to_string(), FixtureType::Dimmer)],
            )
            .unwrap(),
        )
    }

    fn scene(name: &str, light: &str, brightness: u8) -> Scene {
        Scene::from_value(
            name,
            json!({"name": name, "lights": [{"name": light, "modulator": "bool", "brightness": brightness}]}),
        )
        .unwrap()
    }

    fn store() -> SceneStore {
        let scenes = vec![scene("party", "a", 200), scene("chill", "b", 50), scene("loud", "a", 255)];
        SceneStore::new(scenes, profile(), FallbackTable::new()).unwrap()
    }

    fn tone_file() -> InputSource {
        let samples = (0..44100).map(|i| (2.0 * PI * 220.0 * i as f32 / 44100.0).sin()).collect();
        InputSource::File(Arc::new(FileAudio::new("tone", samples, 44100, true)))
    }

    fn config() -> EngineConfig {
        EngineConfig {
            join_timeout: Duration::from_millis(500),
            ..Default::default()
        }
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    /// Link whose writes hang once `pass` writes went through, until
    /// `stalled` clears
    struct StallingTransport {
        pass: usize,
        stalled: Arc<AtomicBool>,
        started: Arc<AtomicUsize>,
        finished: Arc<AtomicUsize>,
    }

    impl Transport for StallingTransport {
        fn write_all(&mut self, _bytes: &[u8]) -> io::Result<()> {
            let n = self.started.fetch_add(1, Ordering::SeqCst) + 1;
            if n > self.pass {
                while self.stalled.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(2));
                }
            }
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn read_reply(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn name(&self) -> &str {
            "stalling"
        }
    }

    /// Channel value in an encoded packet (5 header bytes before channel 1)
    fn channel(packet: &[u8], ch: usize) -> u8 {
        packet[4 + ch]
    }

    #[test]
    fn test_renders_frames_and_blacks_out_on_stop() {
        let (link, handle) = DmxLink::memory("mem");
        let mut controller = Controller::new(config(), store(), tone_file(), link, None).unwrap();
        controller.start().unwrap();

        assert!(wait_until(|| handle
            .last_write()
            .map_or(false, |p| p.len() == 518 && channel(&p, 1) == 200)));
        assert!(controller.health().frames_sent > 0);

        controller.stop();
        let last = handle.last_write().unwrap();
        assert!(last[5..517].iter().all(|&b| b == 0));
        assert!(!controller.is_running());
    }

    #[test]
    fn test_change_scene_blacks_out_then_renders() {
        let (link, handle) = DmxLink::memory("mem");
        let mut controller = Controller::new(config(), store(), tone_file(), link, None).unwrap();
        controller.start().unwrap();
        assert!(wait_until(|| handle.last_write().map_or(false, |p| channel(&p, 1) == 200)));

        let selection = controller.change_scene("chill").unwrap();
        assert_eq!(selection.effective, "chill");
        assert!(wait_until(|| handle.last_write().map_or(false, |p| channel(&p, 2) == 50)));

        // Blackout frame sits between the two scenes
        let writes = handle.writes();
        let chill_at = writes.iter().position(|p| p.len() == 518 && channel(p, 2) == 50).unwrap();
        let dark_before = writes[..chill_at].iter().rev().find(|p| p.len() == 518).unwrap();
        assert!(dark_before[5..517].iter().all(|&b| b == 0));
        assert_eq!(channel(&writes[chill_at], 1), 0);

        let event = controller.events().try_iter().find(|e| matches!(e, EngineEvent::SceneChanged { .. }));
        assert_eq!(
            event,
            Some(EngineEvent::SceneChanged {
                requested: "chill".into(),
                effective: "chill".into()
            })
        );
        controller.stop();
    }

    #[test]
    fn test_unknown_scene_keeps_current() {
        let (link, _handle) = DmxLink::memory("mem");
        let mut controller = Controller::new(config(), store(), tone_file(), link, None).unwrap();
        assert!(controller.change_scene("nope").is_err());
        assert_eq!(controller.selection().effective, "party");
        assert_eq!(controller.scene_names(), vec!["chill", "loud", "party"]);
    }

    #[test]
    fn test_supervise_requires_running() {
        let (link, _handle) = DmxLink::memory("mem");
        let mut controller = Controller::new(config(), store(), tone_file(), link, None).unwrap();
        assert!(matches!(controller.supervise(), Err(EngineError::NotRunning)));
    }

    #[test]
    fn test_reinitialize_restarts_workers() {
        let (link, _handle) = DmxLink::memory("mem");
        let mut controller = Controller::new(config(), store(), tone_file(), link, None).unwrap();
        controller.start().unwrap();
        controller.reinitialize().unwrap();
        assert!(controller.is_running());
        assert_eq!(controller.health().reinitializations, 1);
        assert_eq!(controller.watchdog_state(), ReinitState::Running);
        assert!(controller.events().try_iter().any(|e| e == EngineEvent::Reinitialized));
        controller.stop();
    }

    #[test]
    fn test_transport_failure_reconnects() {
        let transport = MemoryTransport::new("flaky");
        let handle = transport.handle();
        let first = Mutex::new(Some(transport));
        let connects = Arc::new(AtomicUsize::new(0));
        let counter = connects.clone();
        let link = DmxLink::new(
            Box::new(move |_: Option<&str>| {
                counter.fetch_add(1, Ordering::Relaxed);
                let transport = first.lock().take().unwrap_or_else(|| MemoryTransport::new("spare"));
                DmxDriver::open(Box::new(transport))
            }),
            None,
        );

        let mut controller = Controller::new(config(), store(), tone_file(), link, None).unwrap();
        controller.start().unwrap();
        assert!(wait_until(|| controller.health().frames_sent > 2));

        handle.set_failing(true);
        assert!(wait_until(|| connects.load(Ordering::Relaxed) >= 2));
        assert!(wait_until(|| controller.health().transport_errors >= 1));
        let sent = controller.health().frames_sent;
        assert!(wait_until(|| controller.health().frames_sent > sent + 2));
        assert_eq!(controller.port().as_deref(), Some("spare"));
        controller.stop();
    }

    #[test]
    fn test_stalled_render_loop_recovers_through_supervise() {
        let stalled = Arc::new(AtomicBool::new(true));
        let started = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));
        let stalling = Mutex::new(Some(StallingTransport {
            pass: 3,
            stalled: stalled.clone(),
            started: started.clone(),
            finished: finished.clone(),
        }));
        let spare = MemoryTransport::new("spare");
        let spare_handle = spare.handle();
        let spare = Mutex::new(Some(spare));
        let connects = Arc::new(AtomicUsize::new(0));
        let counter = connects.clone();

        // First connect stalls later, the second finds the port still held
        let link = DmxLink::new(
            Box::new(move |_: Option<&str>| match counter.fetch_add(1, Ordering::SeqCst) {
                0 => match stalling.lock().take() {
                    Some(t) => DmxDriver::open(Box::new(t)),
                    None => Err(DmxError::Closed),
                },
                1 => Err(DmxError::Io(io::Error::new(io::ErrorKind::Other, "Device or resource busy"))),
                _ => {
                    let transport = spare.lock().take().unwrap_or_else(|| MemoryTransport::new("spare"));
                    DmxDriver::open(Box::new(transport))
                }
            }),
            None,
        );

        let cfg = EngineConfig {
            watchdog_timeout: Duration::from_millis(300),
            join_timeout: Duration::from_millis(100),
            ..config()
        };
        let mut controller = Controller::new(cfg, store(), tone_file(), link, None).unwrap();
        controller.start().unwrap();
        assert!(wait_until(|| started.load(Ordering::SeqCst) > 3));

        assert!(wait_until(|| {
            controller.supervise().unwrap();
            controller.health().reinitializations == 1
        }));
        assert!(controller.is_running());
        assert!(connects.load(Ordering::SeqCst) >= 3);

        // Rendering resumes on the new link and the hold ends
        assert!(wait_until(|| {
            controller.supervise().unwrap();
            spare_handle.last_write().map_or(false, |p| p.len() == 518 && channel(&p, 1) == 200)
        }));
        assert!(wait_until(|| {
            controller.supervise().unwrap();
            controller.watchdog_state() == ReinitState::Running
        }));
        assert_eq!(controller.port().as_deref(), Some("spare"));
        assert_eq!(controller.health().reinitializations, 1);
        let events: Vec<EngineEvent> = controller.events().try_iter().collect();
        assert!(events.contains(&EngineEvent::Reinitialized));
        assert!(events.iter().any(|e| matches!(e, EngineEvent::Error(m) if m.contains("busy"))));

        // The detached thread finishes its write and lets go of its port
        stalled.store(false, Ordering::SeqCst);
        assert!(wait_until(|| finished.load(Ordering::SeqCst) == started.load(Ordering::SeqCst)));
        thread::sleep(Duration::from_millis(50));
        controller.stop();
        assert_eq!(started.load(Ordering::SeqCst), 4);
        let last = spare_handle.last_write().unwrap();
        assert!(last[5..517].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_auto_scene_follows_prediction() {
        let (link, _handle) = DmxLink::memory("mem");
        let mut cfg = config();
        cfg.auto_scene = true;
        cfg.prediction.window = Duration::from_millis(50);
        cfg.prediction.interval = Duration::from_millis(10);
        let predictor = LoudnessPredictor::parse("0:chill,0.1:loud").unwrap();
        let mut controller = Controller::new(cfg, store(), tone_file(), link, Some(Box::new(predictor))).unwrap();
        controller.start().unwrap();

        assert!(wait_until(|| {
            controller.supervise().unwrap();
            controller.selection().effective == "loud"
        }));
        assert_eq!(controller.predicted_scene().map(|p| p.scene).as_deref(), Some("loud"));
        controller.stop();
    }
}
