//! Racer: light chases across targets at a fixed rate

use super::{LightModifier, Orchestrator};
use crate::error::LightError;
use lumen_analysis::FeatureVector;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use std::collections::HashMap;

fn default_frequency() -> f64 {
    4.0
}

fn default_duration() -> f64 {
    0.1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RacerOrder {
    #[default]
    Forward,
    Reverse,
    Alternating,
    Random,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RacerTransition {
    #[serde(default = "default_duration")]
    pub duration: f64,
}

impl Default for RacerTransition {
    fn default() -> Self {
        Self {
            duration: default_duration(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RacerConfig {
    pub target_lights: Vec<String>,
    /// Switches per second
    #[serde(default = "default_frequency")]
    pub frequency: f64,
    #[serde(default)]
    pub order: RacerOrder,
    #[serde(default)]
    pub transition: RacerTransition,
}

#[derive(Debug)]
pub struct Racer {
    config: RacerConfig,
    current_index: usize,
    direction: isize,
    last_switch: Option<f64>,
    transition_start: f64,
    active_light: Option<String>,
    rng: StdRng,
}

impl Racer {
    pub fn new(config: RacerConfig) -> Result<Self, LightError> {
        Self::with_rng(config, StdRng::from_entropy())
    }

    pub fn with_rng(config: RacerConfig, rng: StdRng) -> Result<Self, LightError> {
        if config.target_lights.is_empty() {
            return Err(LightError::OrchestratorConfigInvalid(
                "racer needs at least one target light".into(),
            ));
        }
        if !(config.frequency > 0.0 && config.frequency.is_finite()) {
            return Err(LightError::OrchestratorConfigInvalid(format!(
                "racer frequency {} must be > 0",
                config.frequency
            )));
        }
        Ok(Self {
            config,
            current_index: 0,
            direction: 1,
            last_switch: None,
            transition_start: 0.0,
            active_light: None,
            rng,
        })
    }

    pub fn from_value(value: &serde_json::Value) -> Result<Self, LightError> {
        let config: RacerConfig = serde_json::from_value(value.clone())
            .map_err(|e| LightError::OrchestratorConfigInvalid(format!("racer: {}", e)))?;
        Self::new(config)
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    fn next_index(&mut self) -> usize {
        let n = self.config.target_lights.len();
        let i = self.current_index;
        if n == 1 {
            return 0;
        }
        match self.config.order {
            RacerOrder::Forward => (i + 1) % n,
            RacerOrder::Reverse => (i + n - 1) % n,
            RacerOrder::Alternating => {
                let mut next = i as isize + self.direction;
                if next < 0 || next >= n as isize {
                    self.direction = -self.direction;
                    next = i as isize + self.direction;
                }
                next as usize
            }
            RacerOrder::Random => {
                // Uniform over every index except the current one
                let pick = self.rng.gen_range(0..n - 1);
                if pick >= i {
                    pick + 1
                } else {
                    pick
                }
            }
        }
    }
}

impl Orchestrator for Racer {
    fn process(
        &mut self,
        _fixtures: &[&str],
        _features: &FeatureVector,
        now: f64,
    ) -> HashMap<String, LightModifier> {
        let interval = 1.0 / self.config.frequency;
        let due = self.last_switch.map_or(true, |last| now - last >= interval);
        if due {
            self.last_switch = Some(now);
            self.transition_start = now;
            self.current_index = self.next_index();
            self.active_light = Some(self.config.target_lights[self.current_index].clone());
        }

        let mut result: HashMap<String, LightModifier> = self
            .config
            .target_lights
            .iter()
            .map(|name| (name.clone(), LightModifier::inactive()))
            .collect();
        if let Some(active) = &self.active_light {
            let progress = ((now - self.transition_start) / self.config.transition.duration) as f32;
            result.insert(active.clone(), LightModifier::active(progress));
        }
        result
    }

    fn kind(&self) -> &'static str {
        "racer"
    }

    fn active_light(&self) -> Option<&str> {
        self.active_light.as_deref()
    }
}
