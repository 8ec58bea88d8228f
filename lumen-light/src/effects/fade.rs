//! Flash on an audio hit, then fade out linearly

use super::{
    default_groups, paint_group, take_manual_control, ChannelGroup, CustomState, Effect, EffectContext, EffectState,
};
use crate::color::{self, ColorChoice, Rgb};
use crate::error::LightError;
use crate::fixture::FixtureType;
use crate::modulation::large_array;
use rand::RngCore;
use serde::Deserialize;

fn default_threshold() -> f32 {
    0.5
}

fn default_duration() -> f64 {
    1.0
}

fn default_max() -> u8 {
    255
}

fn default_color() -> ColorChoice {
    ColorChoice::Rgb([255, 255, 255])
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct FadeParams {
    #[serde(default)]
    mfft_range: Option<(usize, usize)>,
    #[serde(default = "default_threshold")]
    threshold: f32,
    #[serde(default = "default_duration")]
    fade_duration: f64,
    #[serde(default)]
    min_brightness: u8,
    #[serde(default = "default_max")]
    max_brightness: u8,
    #[serde(default = "default_color", alias = "panel_color")]
    color: ColorChoice,
    #[serde(default)]
    groups: Option<Vec<ChannelGroup>>,
    #[serde(default)]
    mode_speed: Option<u8>,
}

/// Brightness `elapsed` seconds into a fade: `max` at 0, `min` from
/// `duration` on
pub fn fade_level(elapsed: f64, duration: f64, min: u8, max: u8) -> u8 {
    if elapsed >= duration {
        return min;
    }
    if elapsed <= 0.0 {
        return max;
    }
    let ratio = 1.0 - elapsed / duration;
    let level = min as f64 + (max as f64 - min as f64) * ratio;
    level.clamp(0.0, 255.0) as u8
}

#[derive(Debug)]
pub struct FadeAfterTrigger {
    params: FadeParams,
    groups: Vec<ChannelGroup>,
    fixture_type: FixtureType,
}

impl FadeAfterTrigger {
    pub fn from_value(value: &serde_json::Value, fixture_type: FixtureType) -> Result<Self, LightError> {
        let params: FadeParams = serde_json::from_value(value.clone())?;
        if !(params.fade_duration > 0.0) {
            return Err(LightError::FixtureConfigInvalid {
                fixture: String::new(),
                reason: format!("fade_duration {} must be > 0", params.fade_duration),
            });
        }
        let groups = params
            .groups
            .clone()
            .unwrap_or_else(|| default_groups(fixture_type));
        Ok(Self {
            params,
            groups,
            fixture_type,
        })
    }

    fn held_color(state: &EffectState) -> Option<Rgb> {
        state.custom.color_for(0)
    }
}

impl Effect for FadeAfterTrigger {
    fn name(&self) -> &'static str {
        "fade_after_trigger"
    }

    fn apply(
        &self,
        ctx: &EffectContext<'_>,
        channels: &mut [u8],
        state: &mut EffectState,
        rng: &mut dyn RngCore,
    ) {
        let p = &self.params;
        if ctx.power(p.mfft_range) >= p.threshold {
            if !state.is_active || Self::held_color(state).is_none() {
                let rgb = p.color.resolve(rng).unwrap_or([255, 255, 255]);
                state.custom = CustomState::Color { step: 0, rgb };
            }
            state.last_trigger_time = ctx.now;
            state.is_active = true;
        }
        if !state.is_active {
            return;
        }

        let elapsed = ctx.now - state.last_trigger_time;
        let level = fade_level(elapsed, p.fade_duration, p.min_brightness, p.max_brightness);
        if elapsed >= p.fade_duration {
            state.is_active = false;
        }

        take_manual_control(self.fixture_type, channels);
        if self.fixture_type == FixtureType::LargeArray {
            channels[large_array::SPEED] = p.mode_speed.unwrap_or(255);
        }
        let rgb = Self::held_color(state).unwrap_or([255, 255, 255]);
        let painted = color::scale(rgb, level);
        for group in &self.groups {
            paint_group(channels, group, painted);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::EffectRegistry;
    use crate::fixture::Fixture;
    use lumen_analysis::FeatureVector;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    fn dimmer() -> Fixture {
        Fixture {
            name: "dim".into(),
            fixture_type: FixtureType::Dimmer,
            start_channel: 1,
            channel_count: 1,
        }
    }

    fn step(effect: &FadeAfterTrigger, registry: &mut EffectRegistry, power: f32, now: f64) -> (u8, bool) {
        let fixture = dimmer();
        let features = FeatureVector::from_bins(vec![power; 8]);
        let ctx = EffectContext {
            fixture: &fixture,
            features: &features,
            now,
        };
        let mut channels = [7u8];
        let mut rng = StdRng::seed_from_u64(0);
        let state = registry.state_mut("dim", "fade_after_trigger");
        effect.apply(&ctx, &mut channels, state, &mut rng);
        (channels[0], state.is_active)
    }

    #[test]
    fn test_fade_level_endpoints() {
        assert_eq!(fade_level(0.0, 1.0, 10, 200), 200);
        assert_eq!(fade_level(1.0, 1.0, 10, 200), 10);
        assert_eq!(fade_level(5.0, 1.0, 10, 200), 10);
        assert_eq!(fade_level(0.5, 1.0, 0, 255), 127);
    }

    #[test]
    fn test_fade_after_trigger_lifecycle() {
        let effect = FadeAfterTrigger::from_value(
            &json!({"threshold": 0.5, "fade_duration": 1.0, "min_brightness": 0, "max_brightness": 255}),
            FixtureType::Dimmer,
        )
        .unwrap();
        let mut registry = EffectRegistry::new();

        assert_eq!(step(&effect, &mut registry, 0.0, 0.0), (7, false));
        assert_eq!(step(&effect, &mut registry, 1.0, 10.0), (255, true));
        assert_eq!(step(&effect, &mut registry, 0.0, 10.5), (127, true));
        assert_eq!(step(&effect, &mut registry, 0.0, 11.0), (0, false));
        // Inactive: modulator output passes through
        assert_eq!(step(&effect, &mut registry, 0.0, 11.5), (7, false));
    }

    #[test]
    fn test_retrigger_restarts_fade() {
        let effect = FadeAfterTrigger::from_value(&json!({"fade_duration": 2.0}), FixtureType::Dimmer).unwrap();
        let mut registry = EffectRegistry::new();
        step(&effect, &mut registry, 1.0, 0.0);
        step(&effect, &mut registry, 1.0, 1.5);
        assert_eq!(step(&effect, &mut registry, 0.0, 1.5).0, 255);
        assert_eq!(registry.get("dim", "fade_after_trigger").unwrap().last_trigger_time, 1.5);
    }

    #[test]
    fn test_large_array_panel_color() {
        let effect = FadeAfterTrigger::from_value(
            &json!({"panel_color": [255, 0, 0], "mode_speed": 90}),
            FixtureType::LargeArray,
        )
        .unwrap();
        let fixture = Fixture {
            name: "array".into(),
            fixture_type: FixtureType::LargeArray,
            start_channel: 1,
            channel_count: 39,
        };
        let features = FeatureVector::from_bins(vec![1.0; 8]);
        let ctx = EffectContext {
            fixture: &fixture,
            features: &features,
            now: 0.0,
        };
        let mut channels = [0u8; 39];
        let mut state = EffectState::default();
        let mut rng = StdRng::seed_from_u64(0);
        effect.apply(&ctx, &mut channels, &mut state, &mut rng);
        assert_eq!(channels[0], 255);
        assert_eq!(channels[2], 0);
        assert_eq!(channels[3], 90);
        assert_eq!(&channels[4..7], &[255, 0, 0]);
        assert_eq!(&channels[25..28], &[255, 0, 0]);
    }

    #[test]
    fn test_zero_duration_rejected() {
        assert!(FadeAfterTrigger::from_value(&json!({"fade_duration": 0.0}), FixtureType::Dimmer).is_err());
    }
}
