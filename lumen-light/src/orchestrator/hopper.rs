//! Hopper: light hops to the next target on each audio hit

use super::{trigger_power, LightModifier, Orchestrator};
use crate::error::LightError;
use lumen_analysis::FeatureVector;
use serde::Deserialize;
use std::collections::HashMap;

fn default_duration() -> f64 {
    0.1
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Trigger {
    pub mfft_range: (usize, usize),
    pub threshold: f32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Transition {
    /// Minimum seconds between hops
    #[serde(default = "default_duration")]
    pub duration: f64,
}

impl Default for Transition {
    fn default() -> Self {
        Self {
            duration: default_duration(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HopperConfig {
    pub target_lights: Vec<String>,
    pub trigger: Trigger,
    #[serde(default)]
    pub transition: Transition,
}

#[derive(Debug)]
pub struct Hopper {
    config: HopperConfig,
    current_index: usize,
    last_trigger: Option<f64>,
    transition_start: f64,
    active_light: Option<String>,
}

impl Hopper {
    pub fn new(config: HopperConfig) -> Result<Self, LightError> {
        if config.target_lights.is_empty() {
            return Err(LightError::OrchestratorConfigInvalid(
                "hopper needs at least one target light".into(),
            ));
        }
        if !(config.transition.duration > 0.0) {
            return Err(LightError::OrchestratorConfigInvalid(format!(
                "hopper transition duration {} must be > 0",
                config.transition.duration
            )));
        }
        Ok(Self {
            config,
            current_index: 0,
            last_trigger: None,
            transition_start: 0.0,
            active_light: None,
        })
    }

    pub fn from_value(value: &serde_json::Value) -> Result<Self, LightError> {
        let config: HopperConfig = serde_json::from_value(value.clone())
            .map_err(|e| LightError::OrchestratorConfigInvalid(format!("hopper: {}", e)))?;
        Self::new(config)
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }
}

impl Orchestrator for Hopper {
    fn process(
        &mut self,
        _fixtures: &[&str],
        features: &FeatureVector,
        now: f64,
    ) -> HashMap<String, LightModifier> {
        let duration = self.config.transition.duration;
        let power = trigger_power(features, self.config.trigger.mfft_range);

        if power >= self.config.trigger.threshold {
            let ready = self.last_trigger.map_or(true, |last| now - last > duration);
            if ready {
                self.last_trigger = Some(now);
                self.transition_start = now;
                self.current_index = (self.current_index + 1) % self.config.target_lights.len();
                self.active_light = Some(self.config.target_lights[self.current_index].clone());
                tracing::debug!(light = ?self.active_light, power, "hopper advanced");
            }
        }

        let mut result: HashMap<String, LightModifier> = self
            .config
            .target_lights
            .iter()
            .map(|name| (name.clone(), LightModifier::inactive()))
            .collect();

        if let Some(active) = &self.active_light {
            let progress = ((now - self.transition_start) / duration) as f32;
            result.insert(active.clone(), LightModifier::active(progress));
        }
        result
    }

    fn kind(&self) -> &'static str {
        "hopper"
    }

    fn active_light(&self) -> Option<&str> {
        self.active_light.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hopper(targets: &[&str], duration: f64) -> Hopper {
        Hopper::from_value(&json!({
            "target_lights": targets,
            "trigger": {"mfft_range": [0, 4], "threshold": 0.5},
            "transition": {"duration": duration}
        }))
        .unwrap()
    }

    fn loud() -> FeatureVector {
        FeatureVector::from_bins(vec![1.0; 8])
    }

    fn quiet() -> FeatureVector {
        FeatureVector::from_bins(vec![0.0; 8])
    }

    #[test]
    fn test_targets_inactive_until_first_hit() {
        let mut h = hopper(&["a", "b", "c"], 0.1);
        let out = h.process(&[], &quiet(), 1.0);
        assert_eq!(out.len(), 3);
        assert!(out.values().all(|m| !m.active));
        assert!(h.active_light().is_none());
    }

    #[test]
    fn test_advances_once_per_spaced_trigger() {
        let mut h = hopper(&["a", "b", "c"], 0.1);
        h.process(&[], &loud(), 1.0);
        assert_eq!(h.current_index(), 1);
        h.process(&[], &loud(), 1.2);
        assert_eq!(h.current_index(), 2);
        h.process(&[], &loud(), 1.4);
        assert_eq!(h.current_index(), 0);
    }

    #[test]
    fn test_close_triggers_do_not_advance() {
        let mut h = hopper(&["a", "b", "c"], 0.1);
        h.process(&[], &loud(), 1.0);
        let idx = h.current_index();
        h.process(&[], &loud(), 1.05);
        h.process(&[], &loud(), 1.09);
        assert_eq!(h.current_index(), idx);
        h.process(&[], &loud(), 1.11);
        assert_eq!(h.current_index(), (idx + 1) % 3);
    }

    #[test]
    fn test_quiet_frames_do_not_advance() {
        let mut h = hopper(&["a", "b"], 0.1);
        h.process(&[], &loud(), 1.0);
        h.process(&[], &quiet(), 5.0);
        assert_eq!(h.current_index(), 1);
    }

    #[test]
    fn test_only_active_light_is_lit() {
        let mut h = hopper(&["a", "b", "c"], 0.5);
        let out = h.process(&["a", "b", "c", "other"], &loud(), 2.0);
        assert!(out["b"].active);
        assert!(!out["a"].active);
        assert!(!out["c"].active);
        assert!(!out.contains_key("other"));

        let out = h.process(&[], &quiet(), 2.25);
        assert!((out["b"].modifiers.transition_progress - 0.5).abs() < 1e-6);
        assert_eq!(out["b"].modifiers.brightness_scale, 1.0);
    }

    #[test]
    fn test_invalid_configs() {
        assert!(Hopper::from_value(&json!({"target_lights": [], "trigger": {"mfft_range": [0, 1], "threshold": 0.1}})).is_err());
        assert!(Hopper::from_value(&json!({"target_lights": ["a"]})).is_err());
        assert!(Hopper::from_value(&json!({
            "target_lights": ["a"], "trigger": {"mfft_range": [0, 1], "threshold": 0.1},
            "transition": {"duration": 0.0}
        }))
        .is_err());
    }
}
