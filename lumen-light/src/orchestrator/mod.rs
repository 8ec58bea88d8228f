//! Multi-fixture choreography
//!
//! An orchestrator sees every fixture in the scene on each tick and decides
//! which of its targets are lit. Fixtures it does not target are left out of
//! the result and render normally.

mod hopper;
mod racer;

pub use hopper::{Hopper, HopperConfig};
pub use racer::{Racer, RacerConfig, RacerOrder};

use crate::error::LightError;
use lumen_analysis::FeatureVector;
use serde::Deserialize;
use std::collections::HashMap;

/// Adjustments an orchestrator applies to an active fixture
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Modifiers {
    pub brightness_scale: f32,
    /// Seconds since this fixture became active, in units of the transition
    /// duration
    pub transition_progress: f32,
}

impl Default for Modifiers {
    fn default() -> Self {
        Self {
            brightness_scale: 1.0,
            transition_progress: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LightModifier {
    pub active: bool,
    pub modifiers: Modifiers,
}

impl LightModifier {
    pub fn inactive() -> Self {
        Self {
            active: false,
            modifiers: Modifiers::default(),
        }
    }

    pub fn active(transition_progress: f32) -> Self {
        Self {
            active: true,
            modifiers: Modifiers {
                brightness_scale: 1.0,
                transition_progress,
            },
        }
    }
}

/// Per-scene choreography state machine
pub trait Orchestrator: Send {
    /// Decide the state of each targeted fixture for this tick
    fn process(
        &mut self,
        fixtures: &[&str],
        features: &FeatureVector,
        now: f64,
    ) -> HashMap<String, LightModifier>;

    fn kind(&self) -> &'static str;

    /// Currently lit target, if any
    fn active_light(&self) -> Option<&str>;
}

/// `orchestrator` block of a scene file
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

impl OrchestratorConfig {
    /// Fixtures named as targets, used when checking scene coverage
    pub fn target_lights(&self) -> Vec<String> {
        self.config
            .get("target_lights")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default()
    }
}

type Constructor = fn(&serde_json::Value) -> Result<Box<dyn Orchestrator>, LightError>;

/// Registered orchestrator types
const ORCHESTRATORS: &[(&str, Constructor)] = &[("hopper", build_hopper), ("racer", build_racer)];

fn build_hopper(config: &serde_json::Value) -> Result<Box<dyn Orchestrator>, LightError> {
    Ok(Box::new(Hopper::from_value(config)?))
}

fn build_racer(config: &serde_json::Value) -> Result<Box<dyn Orchestrator>, LightError> {
    Ok(Box::new(Racer::from_value(config)?))
}

/// Names of every registered orchestrator type
pub fn orchestrator_types() -> impl Iterator<Item = &'static str> {
    ORCHESTRATORS.iter().map(|(name, _)| *name)
}

/// Build a fresh orchestrator for a scene
pub fn build_orchestrator(config: &OrchestratorConfig) -> Result<Box<dyn Orchestrator>, LightError> {
    let constructor = ORCHESTRATORS
        .iter()
        .find(|(name, _)| *name == config.kind)
        .map(|(_, c)| *c)
        .ok_or_else(|| LightError::OrchestratorTypeUnknown(config.kind.clone()))?;
    constructor(&config.config)
}

/// Mean band power used by audio-triggered orchestrators. Out-of-range
/// bands read as silence.
pub(crate) fn trigger_power(features: &FeatureVector, range: (usize, usize)) -> f32 {
    let end = range.1.min(features.len());
    features.band_power(range.0..end).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_known_types() {
        let hopper = OrchestratorConfig {
            kind: "hopper".into(),
            config: json!({"target_lights": ["a", "b"], "trigger": {"mfft_range": [0, 10], "threshold": 0.5}}),
        };
        assert_eq!(build_orchestrator(&hopper).unwrap().kind(), "hopper");

        let racer = OrchestratorConfig {
            kind: "racer".into(),
            config: json!({"target_lights": ["a", "b"], "frequency": 2.0}),
        };
        assert_eq!(build_orchestrator(&racer).unwrap().kind(), "racer");
    }

    #[test]
    fn test_unknown_type_is_typed_error() {
        let config = OrchestratorConfig {
            kind: "spiral".into(),
            config: json!({}),
        };
        assert!(matches!(
            build_orchestrator(&config),
            Err(LightError::OrchestratorTypeUnknown(name)) if name == "spiral"
        ));
    }

    #[test]
    fn test_target_lights_extraction() {
        let config: OrchestratorConfig = serde_json::from_value(json!({
            "type": "hopper",
            "config": {"target_lights": ["left", "right"]}
        }))
        .unwrap();
        assert_eq!(config.target_lights(), vec!["left".to_string(), "right".to_string()]);
        assert_eq!(orchestrator_types().collect::<Vec<_>>(), vec!["hopper", "racer"]);
    }
}
