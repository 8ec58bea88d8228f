//! Per-tick rendering of a scene into the DMX universe

use lumen_analysis::FeatureVector;
use lumen_dmx::DmxFrame;
use lumen_light::{
    build_effect, build_orchestrator, process_light, Effect, EffectContext, EffectRegistry, LightModifier,
    Orchestrator, Profile, Scene,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// What happened on one tick
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub rendered: usize,
    /// Fixtures zeroed by an orchestrator
    pub dimmed: usize,
    /// Scene lights the profile does not have
    pub skipped: usize,
    pub errors: usize,
}

/// Render state for the active scene: effect instances and their registry,
/// the orchestrator, and the RNG behind random values
pub struct Renderer {
    profile: Arc<Profile>,
    scene: Option<Arc<Scene>>,
    effects: HashMap<String, Box<dyn Effect>>,
    registry: EffectRegistry,
    orchestrator: Option<Box<dyn Orchestrator>>,
    rng: StdRng,
    blackout_pending: bool,
    missing_logged: bool,
    /// Fixtures of the active scene already reported as misconfigured
    invalid_logged: HashSet<String>,
}

impl Renderer {
    pub fn new(profile: Arc<Profile>) -> Self {
        Self::with_rng(profile, StdRng::from_entropy())
    }

    pub fn with_rng(profile: Arc<Profile>, rng: StdRng) -> Self {
        Self {
            profile,
            scene: None,
            effects: HashMap::new(),
            registry: EffectRegistry::new(),
            orchestrator: None,
            rng,
            blackout_pending: false,
            missing_logged: false,
            invalid_logged: HashSet::new(),
        }
    }

    pub fn scene(&self) -> Option<&Arc<Scene>> {
        self.scene.as_ref()
    }

    pub fn registry(&self) -> &EffectRegistry {
        &self.registry
    }

    pub fn orchestrator(&self) -> Option<&dyn Orchestrator> {
        self.orchestrator.as_deref()
    }

    pub fn blackout_pending(&self) -> bool {
        self.blackout_pending
    }

    /// Switch scenes: wipe effect state, drop the orchestrator, build fresh
    /// ones for `scene` and schedule a blackout
    pub fn apply_scene(&mut self, scene: Arc<Scene>) {
        self.registry.clear();
        self.effects.clear();
        self.orchestrator = None;
        self.missing_logged = false;
        self.invalid_logged.clear();

        if let Some(config) = &scene.orchestrator {
            match build_orchestrator(config) {
                Ok(orch) => {
                    tracing::debug!(scene = %scene.name, kind = orch.kind(), "orchestrator created");
                    self.orchestrator = Some(orch);
                }
                Err(e) => tracing::warn!(scene = %scene.name, "orchestrator disabled: {}", e),
            }
        }

        for light in &scene.lights {
            let (Some(config), Some(fixture)) = (&light.effect, self.profile.fixture(&light.name)) else {
                continue;
            };
            match build_effect(config, fixture.fixture_type) {
                Ok(effect) => {
                    self.effects.insert(light.name.clone(), effect);
                }
                Err(e) => tracing::warn!(
                    scene = %scene.name,
                    fixture = %light.name,
                    effect = %config.name,
                    "effect disabled: {}",
                    e
                ),
            }
        }

        tracing::info!(scene = %scene.name, lights = scene.lights.len(), effects = self.effects.len(), "scene applied");
        self.scene = Some(scene);
        self.blackout_pending = true;
    }

    /// Zero the frame if a scene change is waiting for its blackout.
    /// Returns whether the frame was blacked out.
    pub fn take_blackout(&mut self, frame: &mut DmxFrame) -> bool {
        if !self.blackout_pending {
            return false;
        }
        frame.blackout();
        self.blackout_pending = false;
        true
    }

    /// Render one tick into `frame`. Errors are isolated per fixture: a
    /// failing fixture keeps its previous values.
    pub fn render(&mut self, features: &FeatureVector, now: f64, frame: &mut DmxFrame) -> TickReport {
        let mut report = TickReport::default();
        if self.take_blackout(frame) {
            return report;
        }
        let Some(scene) = self.scene.clone() else {
            return report;
        };

        let modifiers: HashMap<String, LightModifier> = match self.orchestrator.as_mut() {
            Some(orch) => {
                let present: Vec<&str> = scene
                    .lights
                    .iter()
                    .map(|l| l.name.as_str())
                    .filter(|n| self.profile.contains(n))
                    .collect();
                orch.process(&present, features, now)
            }
            None => HashMap::new(),
        };

        for light in &scene.lights {
            let Some(fixture) = self.profile.fixture(&light.name) else {
                report.skipped += 1;
                continue;
            };

            let result = process_light(
                fixture,
                &light.modulator,
                features,
                now,
                modifiers.get(&light.name),
                &mut self.rng,
            );
            match result {
                Ok(None) => {
                    frame.clear_range(fixture.start_channel, fixture.channel_count);
                    report.dimmed += 1;
                }
                Ok(Some(mut values)) => {
                    values.resize(fixture.channel_count, 0);
                    if let Some(effect) = self.effects.get(&light.name) {
                        let ctx = EffectContext {
                            fixture,
                            features,
                            now,
                        };
                        let state = self.registry.state_mut(&light.name, effect.name());
                        effect.apply(&ctx, &mut values, state, &mut self.rng);
                    }
                    frame.write_slice(fixture.start_channel, &values);
                    report.rendered += 1;
                }
                Err(e) => {
                    if self.invalid_logged.contains(&light.name) {
                        tracing::trace!(fixture = %light.name, "fixture skipped: {}", e);
                    } else {
                        tracing::warn!(scene = %scene.name, fixture = %light.name, "fixture skipped: {}", e);
                        self.invalid_logged.insert(light.name.clone());
                    }
                    report.errors += 1;
                }
            }
        }

        if report.skipped > 0 && !self.missing_logged {
            tracing::warn!(scene = %scene.name, count = report.skipped, "scene lights not in profile are skipped");
            self.missing_logged = true;
        }
        report
    }
}
