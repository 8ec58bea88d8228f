//! Stateful single-fixture effects
//!
//! Effects run after the modulator and rewrite a fixture's channels. Their
//! memory (trigger times, sequence positions, held paint) lives in an
//! [`EffectRegistry`] keyed by fixture and effect name, owned by the
//! renderer and cleared on every scene change.

mod fade;
mod sequential;
mod splatter;

pub use fade::{fade_level, FadeAfterTrigger};
pub use sequential::SequentialTrigger;
pub use splatter::SplatterEffect;

use crate::color::Rgb;
use crate::error::LightError;
use crate::fixture::{Fixture, FixtureType};
use crate::modulation::large_array;
use lumen_analysis::FeatureVector;
use rand::RngCore;
use serde::Deserialize;
use std::collections::HashMap;

/// Effect-specific memory carried between ticks
#[derive(Debug, Clone, Default, PartialEq)]
pub enum CustomState {
    #[default]
    Empty,
    /// Color drawn for a trigger or a sequence step
    Color { step: usize, rgb: Rgb },
    /// Splatter paint held between hits
    Paint { sections: Vec<Rgb>, bars: Vec<u8> },
}

impl CustomState {
    /// Held color, if it was drawn for `step`
    pub fn color_for(&self, step: usize) -> Option<Rgb> {
        match self {
            CustomState::Color { step: s, rgb } if *s == step => Some(*rgb),
            _ => None,
        }
    }
}

/// Memory of one effect on one fixture
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EffectState {
    pub last_trigger_time: f64,
    pub is_active: bool,
    pub sequence_position: usize,
    pub custom: CustomState,
}

/// Effect state keyed by `(fixture, effect)`, created lazily
#[derive(Debug, Default)]
pub struct EffectRegistry {
    states: HashMap<(String, String), EffectState>,
}

impl EffectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state_mut(&mut self, fixture: &str, effect: &str) -> &mut EffectState {
        self.states
            .entry((fixture.to_string(), effect.to_string()))
            .or_default()
    }

    pub fn get(&self, fixture: &str, effect: &str) -> Option<&EffectState> {
        self.states.get(&(fixture.to_string(), effect.to_string()))
    }

    pub fn clear_fixture(&mut self, fixture: &str) {
        self.states.retain(|(f, _), _| f != fixture);
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// A channel group: three indices form an RGB cell, one index an
/// intensity channel. Indices are 0-based within the fixture.
pub type ChannelGroup = Vec<usize>;

/// Groups an effect paints when the scene does not override them
pub fn default_groups(fixture_type: FixtureType) -> Vec<ChannelGroup> {
    match fixture_type {
        FixtureType::LargeArray => (0..large_array::PANEL_GROUPS)
            .map(|g| {
                let base = large_array::PANEL_BASE + g * 3;
                vec![base, base + 1, base + 2]
            })
            .collect(),
        FixtureType::Rgb | FixtureType::Pinspot | FixtureType::Panel => vec![vec![1, 2, 3]],
        FixtureType::Strobe => vec![vec![1]],
        FixtureType::Laser => vec![vec![2]],
        FixtureType::Dimmer | FixtureType::Bar => vec![vec![0]],
    }
}

/// Write a color (or its brightness, for single-channel groups) into a group
pub(crate) fn paint_group(channels: &mut [u8], group: &[usize], color: Rgb) {
    if group.len() == 3 {
        for (&idx, &c) in group.iter().zip(color.iter()) {
            if let Some(ch) = channels.get_mut(idx) {
                *ch = c;
            }
        }
    } else {
        let level = color.iter().copied().max().unwrap_or(0);
        for &idx in group {
            if let Some(ch) = channels.get_mut(idx) {
                *ch = level;
            }
        }
    }
}

/// Put fixtures with a master/mode section into direct control
pub(crate) fn take_manual_control(fixture_type: FixtureType, channels: &mut [u8]) {
    match fixture_type {
        FixtureType::LargeArray => {
            channels[large_array::MASTER] = 255;
            channels[large_array::MODE] = 0;
        }
        FixtureType::Rgb | FixtureType::Pinspot | FixtureType::Panel => channels[0] = 255,
        FixtureType::Strobe => channels[0] = channels[0].max(1),
        _ => {}
    }
}

/// Inputs shared by every effect on one tick
pub struct EffectContext<'a> {
    pub fixture: &'a Fixture,
    pub features: &'a FeatureVector,
    pub now: f64,
}

impl EffectContext<'_> {
    /// Band power with the range clamped to the vector; a band that still
    /// lies outside the vector reads as silence
    pub fn power(&self, range: Option<(usize, usize)>) -> f32 {
        let (start, end) = range.unwrap_or((0, self.features.len()));
        let end = end.min(self.features.len());
        self.features.band_power(start..end).unwrap_or(0.0)
    }
}

/// A temporal effect applied on top of modulator output
pub trait Effect: Send {
    fn name(&self) -> &'static str;

    fn apply(
        &self,
        ctx: &EffectContext<'_>,
        channels: &mut [u8],
        state: &mut EffectState,
        rng: &mut dyn RngCore,
    );
}

/// `effect` block of a scene light: a name plus effect parameters
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EffectConfig {
    pub name: String,
    #[serde(flatten)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

type Constructor = fn(&serde_json::Value, FixtureType) -> Result<Box<dyn Effect>, LightError>;

/// Registered effects. Alternate names accept scenes written for the
/// 39-channel panel rig.
const EFFECTS: &[(&str, Constructor)] = &[
    ("fade_after_trigger", build_fade),
    ("rockville_panel_fade", build_fade),
    ("sequential_trigger", build_sequential),
    ("rockville_sequential_panels", build_sequential),
    ("splatter_effect", build_splatter),
    ("rockville_splatter", build_splatter),
];

fn build_fade(params: &serde_json::Value, t: FixtureType) -> Result<Box<dyn Effect>, LightError> {
    Ok(Box::new(FadeAfterTrigger::from_value(params, t)?))
}

fn build_sequential(params: &serde_json::Value, t: FixtureType) -> Result<Box<dyn Effect>, LightError> {
    Ok(Box::new(SequentialTrigger::from_value(params, t)?))
}

fn build_splatter(params: &serde_json::Value, t: FixtureType) -> Result<Box<dyn Effect>, LightError> {
    Ok(Box::new(SplatterEffect::from_value(params, t)?))
}

/// Build the effect described by `config` for a fixture of type `fixture_type`
pub fn build_effect(config: &EffectConfig, fixture_type: FixtureType) -> Result<Box<dyn Effect>, LightError> {
    let constructor = EFFECTS
        .iter()
        .find(|(name, _)| *name == config.name)
        .map(|(_, c)| *c)
        .ok_or_else(|| LightError::EffectUnknown(config.name.clone()))?;
    constructor(&serde_json::Value::Object(config.params.clone()), fixture_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_registry_is_lazy_and_keyed() {
        let mut registry = EffectRegistry::new();
        assert!(registry.get("a", "fade").is_none());
        registry.state_mut("a", "fade").is_active = true;
        registry.state_mut("a", "splatter");
        registry.state_mut("b", "fade");
        assert_eq!(registry.len(), 3);
        assert!(registry.get("a", "fade").unwrap().is_active);
        assert!(!registry.get("b", "fade").unwrap().is_active);

        registry.clear_fixture("a");
        assert_eq!(registry.len(), 1);
        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_build_effect_by_name() {
        let config: EffectConfig = serde_json::from_value(json!({
            "name": "fade_after_trigger", "threshold": 0.3, "fade_duration": 2.0
        }))
        .unwrap();
        let effect = build_effect(&config, FixtureType::Rgb).unwrap();
        assert_eq!(effect.name(), "fade_after_trigger");

        let config: EffectConfig = serde_json::from_value(json!({"name": "rockville_splatter"})).unwrap();
        assert_eq!(build_effect(&config, FixtureType::LargeArray).unwrap().name(), "splatter_effect");
    }

    #[test]
    fn test_unknown_effect() {
        let config: EffectConfig = serde_json::from_value(json!({"name": "sparkle"})).unwrap();
        assert!(matches!(
            build_effect(&config, FixtureType::Rgb),
            Err(LightError::EffectUnknown(_))
        ));
    }

    #[test]
    fn test_default_groups() {
        let groups = default_groups(FixtureType::LargeArray);
        assert_eq!(groups.len(), 8);
        assert_eq!(groups[0], vec![4, 5, 6]);
        assert_eq!(groups[7], vec![25, 26, 27]);
        assert_eq!(default_groups(FixtureType::Dimmer), vec![vec![0]]);
    }

    #[test]
    fn test_paint_group() {
        let mut ch = vec![0u8; 6];
        paint_group(&mut ch, &[1, 2, 3], [10, 20, 30]);
        assert_eq!(ch, vec![0, 10, 20, 30, 0, 0]);
        paint_group(&mut ch, &[0], [10, 20, 30]);
        assert_eq!(ch[0], 30);
        paint_group(&mut ch, &[99, 100, 101], [1, 1, 1]);
    }
}
