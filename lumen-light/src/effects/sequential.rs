//! Walk a pattern of channel groups once per audio hit

use super::{
    default_groups, paint_group, take_manual_control, ChannelGroup, CustomState, Effect, EffectContext, EffectState,
};
use crate::color::{ColorChoice, Rgb};
use crate::error::LightError;
use crate::fixture::FixtureType;
use rand::RngCore;
use serde::Deserialize;

fn default_threshold() -> f32 {
    0.5
}

fn default_duration() -> f64 {
    1.0
}

fn default_colors() -> Vec<ColorChoice> {
    vec![
        ColorChoice::Rgb([255, 0, 0]),
        ColorChoice::Rgb([0, 255, 0]),
        ColorChoice::Rgb([0, 0, 255]),
    ]
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct SequenceParams {
    #[serde(default)]
    mfft_range: Option<(usize, usize)>,
    #[serde(default = "default_threshold")]
    threshold: f32,
    #[serde(default = "default_duration")]
    sequence_duration: f64,
    /// Group indices in the order they light
    #[serde(default)]
    pattern: Option<Vec<usize>>,
    #[serde(default = "default_colors")]
    colors: Vec<ColorChoice>,
    #[serde(default)]
    groups: Option<Vec<ChannelGroup>>,
}

#[derive(Debug)]
pub struct SequentialTrigger {
    params: SequenceParams,
    groups: Vec<ChannelGroup>,
    pattern: Vec<usize>,
    fixture_type: FixtureType,
}

impl SequentialTrigger {
    pub fn from_value(value: &serde_json::Value, fixture_type: FixtureType) -> Result<Self, LightError> {
        let params: SequenceParams = serde_json::from_value(value.clone())?;
        let invalid = |reason: String| LightError::FixtureConfigInvalid {
            fixture: String::new(),
            reason,
        };
        if !(params.sequence_duration > 0.0) {
            return Err(invalid(format!(
                "sequence_duration {} must be > 0",
                params.sequence_duration
            )));
        }
        if params.colors.is_empty() {
            return Err(invalid("sequential_trigger needs at least one color".into()));
        }
        let groups = params
            .groups
            .clone()
            .unwrap_or_else(|| default_groups(fixture_type));
        let pattern = params
            .pattern
            .clone()
            .unwrap_or_else(|| (0..groups.len()).collect());
        if pattern.is_empty() {
            return Err(invalid("sequential_trigger pattern is empty".into()));
        }
        if let Some(bad) = pattern.iter().find(|&&g| g >= groups.len()) {
            return Err(invalid(format!(
                "pattern step {} refers to missing group ({} groups)",
                bad,
                groups.len()
            )));
        }
        Ok(Self {
            params,
            groups,
            pattern,
            fixture_type,
        })
    }

    /// Color for `position`, drawn once per step and held in state
    fn step_color(&self, state: &mut EffectState, position: usize, rng: &mut dyn RngCore) -> Rgb {
        if let Some(rgb) = state.custom.color_for(position) {
            return rgb;
        }
        let choice = &self.params.colors[position % self.params.colors.len()];
        let rgb = choice.resolve(rng).unwrap_or([255, 255, 255]);
        state.custom = CustomState::Color { step: position, rgb };
        rgb
    }
}

impl Effect for SequentialTrigger {
    fn name(&self) -> &'static str {
        "sequential_trigger"
    }

    fn apply(
        &self,
        ctx: &EffectContext<'_>,
        channels: &mut [u8],
        state: &mut EffectState,
        rng: &mut dyn RngCore,
    ) {
        let p = &self.params;
        if !state.is_active && ctx.power(p.mfft_range) >= p.threshold {
            state.is_active = true;
            state.last_trigger_time = ctx.now;
            state.sequence_position = 0;
            state.custom = CustomState::Empty;
        }
        if !state.is_active {
            return;
        }

        let step = p.sequence_duration / self.pattern.len() as f64;
        let elapsed = (ctx.now - state.last_trigger_time).max(0.0);
        let position = (elapsed / step).floor() as usize;
        state.sequence_position = position;
        if position >= self.pattern.len() {
            state.is_active = false;
            return;
        }

        take_manual_control(self.fixture_type, channels);
        for group in &self.groups {
            paint_group(channels, group, [0, 0, 0]);
        }
        let rgb = self.step_color(state, position, rng);
        paint_group(channels, &self.groups[self.pattern[position]], rgb);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::Fixture;
    use lumen_analysis::FeatureVector;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    struct Rig {
        effect: SequentialTrigger,
        fixture: Fixture,
        state: EffectState,
        rng: StdRng,
    }

    impl Rig {
        fn new(params: serde_json::Value) -> Self {
            Self {
                effect: SequentialTrigger::from_value(&params, FixtureType::LargeArray).unwrap(),
                fixture: Fixture {
                    name: "array".into(),
                    fixture_type: FixtureType::LargeArray,
                    start_channel: 1,
                    channel_count: 39,
                },
                state: EffectState::default(),
                rng: StdRng::seed_from_u64(5),
            }
        }

        fn step(&mut self, power: f32, now: f64) -> [u8; 39] {
            let features = FeatureVector::from_bins(vec![power; 8]);
            let ctx = EffectContext {
                fixture: &self.fixture,
                features: &features,
                now,
            };
            let mut channels = [9u8; 39];
            self.effect.apply(&ctx, &mut channels, &mut self.state, &mut self.rng);
            channels
        }
    }

    fn lit_group(channels: &[u8; 39]) -> Vec<usize> {
        (0..8)
            .filter(|g| channels[4 + g * 3..7 + g * 3].iter().any(|&v| v > 0))
            .collect()
    }

    #[test]
    fn test_walks_groups_in_order() {
        let mut rig = Rig::new(json!({"threshold": 0.5, "sequence_duration": 0.8}));
        let ch = rig.step(1.0, 0.0);
        assert_eq!(lit_group(&ch), vec![0]);
        assert_eq!(&ch[4..7], &[255, 0, 0]);
        let ch = rig.step(0.0, 0.15);
        assert_eq!(lit_group(&ch), vec![1]);
        assert_eq!(&ch[7..10], &[0, 255, 0]);
        let ch = rig.step(0.0, 0.75);
        assert_eq!(lit_group(&ch), vec![7]);
        assert_eq!(rig.state.sequence_position, 7);
        rig.step(0.0, 0.85);
        assert!(!rig.state.is_active);
    }

    #[test]
    fn test_step_color_held_in_state() {
        let mut rig = Rig::new(json!({"sequence_duration": 0.8}));
        rig.step(1.0, 0.0);
        assert_eq!(rig.state.custom, CustomState::Color { step: 0, rgb: [255, 0, 0] });
        rig.step(0.0, 0.15);
        assert_eq!(rig.state.custom, CustomState::Color { step: 1, rgb: [0, 255, 0] });
        rig.step(0.0, 0.18);
        assert_eq!(rig.state.custom.color_for(1), Some([0, 255, 0]));
    }

    #[test]
    fn test_trigger_ignored_while_running() {
        let mut rig = Rig::new(json!({"sequence_duration": 0.8}));
        rig.step(1.0, 0.0);
        rig.step(1.0, 0.35);
        assert_eq!(rig.state.last_trigger_time, 0.0);
        assert_eq!(rig.state.sequence_position, 3);
    }

    #[test]
    fn test_custom_pattern() {
        let mut rig = Rig::new(json!({"sequence_duration": 0.3, "pattern": [7, 0, 3], "colors": ["white"]}));
        assert_eq!(lit_group(&rig.step(1.0, 0.0)), vec![7]);
        assert_eq!(lit_group(&rig.step(0.0, 0.15)), vec![0]);
        assert_eq!(lit_group(&rig.step(0.0, 0.25)), vec![3]);
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        assert!(SequentialTrigger::from_value(&json!({"pattern": [8]}), FixtureType::LargeArray).is_err());
        assert!(SequentialTrigger::from_value(&json!({"pattern": []}), FixtureType::LargeArray).is_err());
        assert!(SequentialTrigger::from_value(&json!({"colors": []}), FixtureType::LargeArray).is_err());
    }
}
