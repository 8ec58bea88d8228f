//! Per-fixture modulation
//!
//! Each fixture in a scene names one of three modulators. The modulator
//! produces a [`Look`] (brightness, color, strobe, ...) which is then laid
//! out onto the fixture type's channels.

use crate::color::{self, ColorChoice, Rgb};
use crate::error::LightError;
use crate::fixture::{Fixture, FixtureType};
use crate::orchestrator::LightModifier;
use lumen_analysis::FeatureVector;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

fn default_power_range() -> (f32, f32) {
    (0.0, 1.0)
}

fn default_level_range() -> (f32, f32) {
    (0.0, 255.0)
}

fn default_random_range() -> (u8, u8) {
    (0, 255)
}

fn default_full() -> ValueSpec {
    ValueSpec::Fixed(255.0)
}

fn default_frequency() -> f64 {
    1.0
}

fn default_max_brightness() -> f32 {
    255.0
}

/// A channel value as written in a scene: a number or `"random"`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueSpec {
    Fixed(f64),
    Word(String),
}

impl Default for ValueSpec {
    fn default() -> Self {
        Self::Fixed(0.0)
    }
}

impl ValueSpec {
    /// Concrete channel value; `"random"` draws uniformly within `range`
    pub fn resolve<R: Rng + ?Sized>(&self, rng: &mut R, range: (u8, u8)) -> Result<u8, String> {
        match self {
            Self::Fixed(v) => Ok(v.round().clamp(0.0, 255.0) as u8),
            Self::Word(w) if w.eq_ignore_ascii_case("random") => {
                let (lo, hi) = if range.0 <= range.1 { range } else { (range.1, range.0) };
                Ok(rng.gen_range(lo..=hi))
            }
            Self::Word(w) => Err(format!("expected a number or \"random\", got '{}'", w)),
        }
    }

    pub fn is_random(&self) -> bool {
        matches!(self, Self::Word(w) if w.eq_ignore_ascii_case("random"))
    }
}

/// Periodic function used by the time modulator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Waveform {
    #[default]
    Sine,
    Square,
    Triangle,
    SawtoothForward,
    SawtoothBackward,
}

impl Waveform {
    /// Value in [0, 1] at time `t` seconds for a `frequency` Hz cycle
    pub fn sample(self, t: f64, frequency: f64) -> f64 {
        let phase = t * frequency;
        match self {
            Self::Sine => (phase * 2.0 * PI).sin() * 0.5 + 0.5,
            Self::Square => {
                let s = (phase * 2.0 * PI).sin();
                let sign = if s > 0.0 {
                    1.0
                } else if s < 0.0 {
                    -1.0
                } else {
                    0.0
                };
                sign * 0.5 + 0.5
            }
            Self::Triangle => (phase.rem_euclid(2.0) - 1.0).abs(),
            Self::SawtoothForward => phase.rem_euclid(1.0),
            Self::SawtoothBackward => 1.0 - phase.rem_euclid(1.0),
        }
    }
}

/// What a time-modulated strobe drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrobeTarget {
    Speed,
    Brightness,
    #[default]
    Both,
}

/// Audio-reactive parameters
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FrequencyParams {
    /// Bin range `[start, end)` of the feature vector
    #[serde(alias = "frequency_range")]
    pub mfft_range: (usize, usize),
    #[serde(default = "default_power_range")]
    pub power_range: (f32, f32),
    #[serde(default = "default_level_range")]
    pub brightness_range: (f32, f32),
    /// Strobe trigger level, defaults to the bottom of `power_range`
    #[serde(default)]
    pub threshold: Option<f32>,
    #[serde(default)]
    pub color: ColorChoice,
    #[serde(default)]
    pub strobe: ValueSpec,
    #[serde(default)]
    pub colorfade: ValueSpec,
    #[serde(default)]
    pub mode: ValueSpec,
    #[serde(default)]
    pub pattern: ValueSpec,
    #[serde(default = "default_random_range")]
    pub random_range: (u8, u8),
}

/// Static or randomized parameters
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BooleanParams {
    #[serde(default = "default_full")]
    pub brightness: ValueSpec,
    #[serde(default)]
    pub color: ColorChoice,
    #[serde(default)]
    pub strobe: ValueSpec,
    #[serde(default)]
    pub colorfade: ValueSpec,
    #[serde(default)]
    pub speed: ValueSpec,
    #[serde(default)]
    pub mode: ValueSpec,
    #[serde(default)]
    pub pattern: ValueSpec,
    /// Raw per-channel values, overriding the type layout
    #[serde(default)]
    pub channels: Option<Vec<ValueSpec>>,
    #[serde(default = "default_random_range")]
    pub random_range: (u8, u8),
}

/// Clock-driven parameters
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TimeParams {
    #[serde(default)]
    pub function: Waveform,
    #[serde(default = "default_frequency")]
    pub frequency: f64,
    #[serde(default)]
    pub min_brightness: f32,
    #[serde(default = "default_max_brightness")]
    pub max_brightness: f32,
    #[serde(default)]
    pub color: ColorChoice,
    #[serde(default)]
    pub strobe: ValueSpec,
    #[serde(default)]
    pub colorfade: ValueSpec,
    #[serde(default)]
    pub mode: ValueSpec,
    #[serde(default)]
    pub pattern: ValueSpec,
    #[serde(default)]
    pub target: StrobeTarget,
    #[serde(default = "default_level_range")]
    pub speed_range: (f32, f32),
    #[serde(default = "default_level_range")]
    pub brightness_range: (f32, f32),
    #[serde(default = "default_random_range")]
    pub random_range: (u8, u8),
}

/// Modulator selected by the `modulator` field of a scene light
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "modulator", rename_all = "lowercase")]
pub enum Modulator {
    #[serde(alias = "mfft", alias = "fft")]
    Frequency(FrequencyParams),
    #[serde(alias = "bool")]
    Boolean(BooleanParams),
    Time(TimeParams),
}

impl Modulator {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Frequency(_) => "frequency",
            Self::Boolean(_) => "boolean",
            Self::Time(_) => "time",
        }
    }

    pub fn color(&self) -> &ColorChoice {
        match self {
            Self::Frequency(p) => &p.color,
            Self::Boolean(p) => &p.color,
            Self::Time(p) => &p.color,
        }
    }

    /// Feature bins this modulator listens to, if any
    pub fn mfft_range(&self) -> Option<(usize, usize)> {
        match self {
            Self::Frequency(p) => Some(p.mfft_range),
            _ => None,
        }
    }

    /// Whether this modulator will make the fixture strobe
    pub fn strobes(&self) -> bool {
        let active = |v: &ValueSpec| match v {
            ValueSpec::Fixed(x) => *x > 0.0,
            ValueSpec::Word(_) => true,
        };
        match self {
            Self::Frequency(p) => active(&p.strobe),
            Self::Boolean(p) => active(&p.strobe),
            Self::Time(p) => active(&p.strobe),
        }
    }
}

/// Device-independent output of a modulator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Look {
    pub brightness: u8,
    pub color: Rgb,
    pub strobe: u8,
    pub colorfade: u8,
    pub speed: u8,
    pub mode: u8,
    pub pattern: u8,
}

/// Linear map of `power` from `power_range` into `level_range`, clamped
/// outside the power range
pub fn power_to_level(power: f32, power_range: (f32, f32), level_range: (f32, f32)) -> u8 {
    let (lo, hi) = power_range;
    let (min, max) = level_range;
    let level = if power < lo {
        min
    } else if power > hi || hi <= lo {
        max
    } else {
        (power - lo) / (hi - lo) * (max - min) + min
    };
    level.clamp(0.0, 255.0) as u8
}

fn lerp_level(t: f64, range: (f32, f32)) -> u8 {
    let v = range.0 as f64 + t * (range.1 - range.0) as f64;
    v.clamp(0.0, 255.0) as u8
}

fn check_band(fixture: &str, range: (usize, usize), features: &FeatureVector) -> Result<f32, LightError> {
    features.band_power(range.0..range.1).ok_or_else(|| {
        LightError::fixture(
            fixture,
            format!(
                "mfft_range {:?} is empty or outside the {}-bin feature vector",
                range,
                features.len()
            ),
        )
    })
}

fn check_ordered(fixture: &str, what: &str, range: (f32, f32)) -> Result<(), LightError> {
    if range.0 > range.1 || !range.0.is_finite() || !range.1.is_finite() {
        return Err(LightError::fixture(fixture, format!("{} {:?} is not ordered", what, range)));
    }
    Ok(())
}

/// Compute channel values for one fixture.
///
/// Returns `Ok(None)` when an orchestrator has marked the fixture
/// inactive; the caller zeroes it. Configuration problems are returned as
/// [`LightError::FixtureConfigInvalid`] and never panic.
pub fn process_light<R: Rng + ?Sized>(
    fixture: &Fixture,
    modulator: &Modulator,
    features: &FeatureVector,
    now: f64,
    modifier: Option<&LightModifier>,
    rng: &mut R,
) -> Result<Option<Vec<u8>>, LightError> {
    if let Some(m) = modifier {
        if !m.active {
            return Ok(None);
        }
    }
    let scale = modifier.map(|m| m.modifiers.brightness_scale).unwrap_or(1.0);
    let name = fixture.name.as_str();
    let fail = |reason: String| LightError::fixture(name, reason);

    let mut channels = match modulator {
        Modulator::Frequency(p) => {
            check_ordered(name, "power_range", p.power_range)?;
            let power = check_band(name, p.mfft_range, features)?;
            match fixture.fixture_type {
                FixtureType::Strobe => {
                    let threshold = p.threshold.unwrap_or(p.power_range.0);
                    if power >= threshold {
                        vec![255, 255]
                    } else {
                        vec![0, 0]
                    }
                }
                FixtureType::Laser if power < p.power_range.0 => vec![0; fixture.channel_count],
                _ => {
                    let look = Look {
                        brightness: power_to_level(power, p.power_range, p.brightness_range),
                        color: p.color.resolve(rng).map_err(fail)?,
                        strobe: p.strobe.resolve(rng, p.random_range).map_err(fail)?,
                        colorfade: p.colorfade.resolve(rng, p.random_range).map_err(fail)?,
                        speed: power_to_level(power, p.power_range, (0.0, 255.0)),
                        mode: p.mode.resolve(rng, p.random_range).map_err(fail)?,
                        pattern: p.pattern.resolve(rng, p.random_range).map_err(fail)?,
                    };
                    layout(fixture.fixture_type, &look)
                }
            }
        }
        Modulator::Boolean(p) => {
            if let Some(raw) = &p.channels {
                let mut values = raw
                    .iter()
                    .map(|v| v.resolve(rng, p.random_range))
                    .collect::<Result<Vec<u8>, String>>()
                    .map_err(fail)?;
                values.resize(fixture.channel_count, 0);
                values
            } else {
                let look = Look {
                    brightness: p.brightness.resolve(rng, p.random_range).map_err(fail)?,
                    color: p.color.resolve(rng).map_err(fail)?,
                    strobe: p.strobe.resolve(rng, p.random_range).map_err(fail)?,
                    colorfade: p.colorfade.resolve(rng, p.random_range).map_err(fail)?,
                    speed: p.speed.resolve(rng, p.random_range).map_err(fail)?,
                    mode: p.mode.resolve(rng, p.random_range).map_err(fail)?,
                    pattern: p.pattern.resolve(rng, p.random_range).map_err(fail)?,
                };
                layout(fixture.fixture_type, &look)
            }
        }
        Modulator::Time(p) => {
            if !(p.frequency.is_finite() && p.frequency >= 0.0) {
                return Err(fail(format!("frequency {} must be >= 0", p.frequency)));
            }
            let wave = p.function.sample(now, p.frequency);
            match fixture.fixture_type {
                FixtureType::Strobe => {
                    let speed = lerp_level(wave, p.speed_range);
                    let brightness = lerp_level(wave, p.brightness_range);
                    match p.target {
                        StrobeTarget::Speed => vec![speed, lerp_level(1.0, p.brightness_range)],
                        StrobeTarget::Brightness => vec![lerp_level(1.0, p.speed_range), brightness],
                        StrobeTarget::Both => vec![speed, brightness],
                    }
                }
                _ => {
                    let look = Look {
                        brightness: lerp_level(wave, (p.min_brightness, p.max_brightness)),
                        color: p.color.resolve(rng).map_err(fail)?,
                        strobe: p.strobe.resolve(rng, p.random_range).map_err(fail)?,
                        colorfade: p.colorfade.resolve(rng, p.random_range).map_err(fail)?,
                        speed: lerp_level(wave, (0.0, 255.0)),
                        mode: p.mode.resolve(rng, p.random_range).map_err(fail)?,
                        pattern: p.pattern.resolve(rng, p.random_range).map_err(fail)?,
                    };
                    layout(fixture.fixture_type, &look)
                }
            }
        }
    };

    if scale != 1.0 {
        if let Some(index) = brightness_channel(fixture.fixture_type) {
            if let Some(v) = channels.get_mut(index) {
                *v = (*v as f32 * scale).clamp(0.0, 255.0) as u8;
            }
        }
    }

    Ok(Some(channels))
}

/// Index of the channel carrying overall brightness
pub fn brightness_channel(fixture_type: FixtureType) -> Option<usize> {
    match fixture_type {
        FixtureType::Strobe => Some(1),
        FixtureType::Laser => Some(2),
        _ => Some(0),
    }
}

/// Lay a look out onto a fixture type's channels
pub fn layout(fixture_type: FixtureType, look: &Look) -> Vec<u8> {
    let [r, g, b] = look.color;
    let code = color::macro_code(look.color);
    match fixture_type {
        FixtureType::Dimmer => vec![look.brightness],
        FixtureType::Rgb | FixtureType::Pinspot => {
            vec![look.brightness, r, g, b, look.strobe, look.colorfade]
        }
        FixtureType::Strobe => vec![look.speed, look.brightness],
        FixtureType::Laser => {
            if look.brightness == 0 {
                return vec![0; FixtureType::Laser.channel_count()];
            }
            // mode, pattern, zoom, x, y, rotation, speed, color, strobe, reserved
            vec![
                look.mode.max(1),
                look.pattern,
                look.brightness,
                128,
                128,
                0,
                look.speed,
                code,
                look.strobe,
                0,
            ]
        }
        FixtureType::Panel => vec![look.brightness, r, g, b, look.strobe, code, look.mode],
        FixtureType::Bar => vec![look.brightness, code, look.strobe, look.mode],
        FixtureType::LargeArray => {
            let mut ch = vec![0u8; FixtureType::LargeArray.channel_count()];
            ch[large_array::MASTER] = look.brightness;
            ch[large_array::STROBE] = look.strobe;
            ch[large_array::MODE] = look.mode;
            ch[large_array::SPEED] = look.speed;
            for group in 0..large_array::PANEL_GROUPS {
                let base = large_array::PANEL_BASE + group * 3;
                ch[base..base + 3].copy_from_slice(&look.color);
            }
            ch[large_array::BAR_STROBE] = look.strobe;
            ch[large_array::BAR_MODE] = look.mode;
            for bulb in 0..large_array::BAR_BULBS {
                ch[large_array::BAR_BASE + bulb] = look.brightness;
            }
            ch
        }
    }
}

/// Channel map of the 39-channel panel-plus-bar fixture
pub mod large_array {
    pub const MASTER: usize = 0;
    pub const STROBE: usize = 1;
    pub const MODE: usize = 2;
    pub const SPEED: usize = 3;
    pub const PANEL_BASE: usize = 4;
    pub const PANEL_GROUPS: usize = 8;
    pub const BAR_STROBE: usize = 29;
    pub const BAR_MODE: usize = 30;
    pub const BAR_BASE: usize = 31;
    pub const BAR_BULBS: usize = 8;
}
