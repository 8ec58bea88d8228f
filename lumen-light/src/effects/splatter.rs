//! Random color splatter across channel groups while the audio is hot

use super::{
    default_groups, paint_group, take_manual_control, ChannelGroup, CustomState, Effect, EffectContext, EffectState,
};
use crate::color::{ColorChoice, Rgb};
use crate::error::LightError;
use crate::fixture::FixtureType;
use crate::modulation::large_array;
use rand::seq::SliceRandom;
use rand::{Rng, RngCore};
use serde::Deserialize;

fn default_threshold() -> f32 {
    0.5
}

fn default_palette() -> Vec<ColorChoice> {
    vec![ColorChoice::Rgb([255, 0, 255]), ColorChoice::Rgb([0, 255, 0])]
}

fn default_bar_levels() -> Vec<u8> {
    vec![0, 255]
}

fn default_chance() -> f64 {
    0.5
}

fn yes() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct SplatterParams {
    #[serde(default)]
    mfft_range: Option<(usize, usize)>,
    #[serde(default = "default_threshold")]
    threshold: f32,
    #[serde(default = "default_palette", alias = "panel_colors")]
    colors: Vec<ColorChoice>,
    #[serde(default = "default_bar_levels", alias = "bar_colors")]
    bar_levels: Vec<u8>,
    #[serde(default = "yes")]
    affect_panel: bool,
    #[serde(default = "yes")]
    affect_bar: bool,
    /// Probability that a section is painted rather than cleared
    #[serde(default = "default_chance")]
    chance: f64,
    #[serde(default, alias = "groups")]
    sections: Option<Vec<ChannelGroup>>,
}

#[derive(Debug)]
pub struct SplatterEffect {
    params: SplatterParams,
    sections: Vec<ChannelGroup>,
    fixture_type: FixtureType,
}

impl SplatterEffect {
    pub fn from_value(value: &serde_json::Value, fixture_type: FixtureType) -> Result<Self, LightError> {
        let params: SplatterParams = serde_json::from_value(value.clone())?;
        if params.colors.is_empty() {
            return Err(LightError::FixtureConfigInvalid {
                fixture: String::new(),
                reason: "splatter_effect needs at least one color".into(),
            });
        }
        if !(0.0..=1.0).contains(&params.chance) {
            return Err(LightError::FixtureConfigInvalid {
                fixture: String::new(),
                reason: format!("splatter chance {} outside [0, 1]", params.chance),
            });
        }
        let sections = params
            .sections
            .clone()
            .unwrap_or_else(|| default_groups(fixture_type));
        Ok(Self {
            params,
            sections,
            fixture_type,
        })
    }

    /// Draw a fresh splatter into the held buffers
    fn paint(&self, sections: &mut Vec<Rgb>, bars: &mut Vec<u8>, rng: &mut dyn RngCore) {
        let p = &self.params;
        sections.clear();
        for _ in &self.sections {
            let rgb = if p.affect_panel && rng.gen_bool(p.chance) {
                p.colors
                    .choose(rng)
                    .and_then(|c| c.resolve(rng).ok())
                    .unwrap_or([0, 0, 0])
            } else {
                [0, 0, 0]
            };
            sections.push(rgb);
        }
        bars.clear();
        if p.affect_bar && self.fixture_type == FixtureType::LargeArray {
            for _ in 0..large_array::BAR_BULBS {
                bars.push(p.bar_levels.choose(rng).copied().unwrap_or(0));
            }
        }
    }
}

impl Effect for SplatterEffect {
    fn name(&self) -> &'static str {
        "splatter_effect"
    }

    fn apply(
        &self,
        ctx: &EffectContext<'_>,
        channels: &mut [u8],
        state: &mut EffectState,
        rng: &mut dyn RngCore,
    ) {
        if ctx.power(self.params.mfft_range) >= self.params.threshold {
            if !matches!(state.custom, CustomState::Paint { .. }) {
                state.custom = CustomState::Paint {
                    sections: Vec::with_capacity(self.sections.len()),
                    bars: Vec::with_capacity(large_array::BAR_BULBS),
                };
            }
            if let CustomState::Paint { sections, bars } = &mut state.custom {
                self.paint(sections, bars, rng);
            }
            state.last_trigger_time = ctx.now;
            state.is_active = true;
            state.sequence_position += 1;
        }

        if !state.is_active {
            return;
        }
        let CustomState::Paint { sections, bars } = &state.custom else {
            return;
        };

        take_manual_control(self.fixture_type, channels);
        if self.fixture_type == FixtureType::LargeArray {
            channels[large_array::BAR_STROBE] = 0;
            channels[large_array::BAR_MODE] = 0;
            for (i, level) in bars.iter().enumerate() {
                channels[large_array::BAR_BASE + i] = *level;
            }
        }
        for (group, rgb) in self.sections.iter().zip(sections.iter()) {
            paint_group(channels, group, *rgb);
        }
    }
}
