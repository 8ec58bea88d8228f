//! Named palette, color choices and color-macro codes

use rand::Rng;
use serde::{Deserialize, Serialize};

pub type Rgb = [u8; 3];

/// Palette shared by every modulator, in macro order
pub const PALETTE: [(&str, Rgb); 8] = [
    ("red", [255, 0, 0]),
    ("orange", [255, 127, 0]),
    ("yellow", [255, 255, 0]),
    ("green", [0, 255, 0]),
    ("blue", [0, 0, 255]),
    ("purple", [75, 0, 130]),
    ("pink", [255, 0, 255]),
    ("white", [255, 255, 255]),
];

/// Width of one color slot on a color-macro channel
const MACRO_SLOT: u8 = 32;

/// Look up a palette color by name (case-insensitive)
pub fn named(name: &str) -> Option<Rgb> {
    PALETTE
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, rgb)| *rgb)
}

pub fn random_color<R: Rng + ?Sized>(rng: &mut R) -> Rgb {
    PALETTE[rng.gen_range(0..PALETTE.len())].1
}

/// Color-macro channel value for the palette entry nearest to `rgb`
///
/// Fixtures with built-in color presets split the macro channel into equal
/// slots; the value returned sits in the middle of the slot.
pub fn macro_code(rgb: Rgb) -> u8 {
    let distance = |other: &Rgb| -> u32 {
        rgb.iter()
            .zip(other.iter())
            .map(|(&a, &b)| {
                let d = a as i32 - b as i32;
                (d * d) as u32
            })
            .sum()
    };
    let index = PALETTE
        .iter()
        .enumerate()
        .min_by_key(|(_, (_, c))| distance(c))
        .map(|(i, _)| i)
        .unwrap_or(0);
    index as u8 * MACRO_SLOT + MACRO_SLOT / 2
}

/// Scale a color by a 0-255 brightness
pub fn scale(rgb: Rgb, brightness: u8) -> Rgb {
    let s = |c: u8| ((c as u32 * brightness as u32) / 255) as u8;
    [s(rgb[0]), s(rgb[1]), s(rgb[2])]
}

/// Color as written in a scene: a palette name, `"random"`, or `[r, g, b]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColorChoice {
    Rgb(Rgb),
    Named(String),
}

impl Default for ColorChoice {
    fn default() -> Self {
        Self::Named("random".to_string())
    }
}

impl ColorChoice {
    /// Resolve to a concrete color, drawing from the palette for `"random"`
    pub fn resolve<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Rgb, String> {
        match self {
            Self::Rgb(rgb) => Ok(*rgb),
            Self::Named(name) if name.eq_ignore_ascii_case("random") => Ok(random_color(rng)),
            Self::Named(name) => named(name).ok_or_else(|| format!("unknown color '{}'", name)),
        }
    }

    /// Palette name, when this is a named (non-random) color
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Named(name) if !name.eq_ignore_ascii_case("random") => Some(name),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_named_lookup() {
        assert_eq!(named("red"), Some([255, 0, 0]));
        assert_eq!(named("Purple"), Some([75, 0, 130]));
        assert_eq!(named("mauve"), None);
    }

    #[test]
    fn test_macro_codes_are_distinct_and_in_slots() {
        let codes: Vec<u8> = PALETTE.iter().map(|(_, rgb)| macro_code(*rgb)).collect();
        assert_eq!(codes[0], 16);
        assert_eq!(codes[7], 7 * 32 + 16);
        let mut sorted = codes.clone();
        sorted.dedup();
        assert_eq!(sorted.len(), PALETTE.len());
        assert_eq!(macro_code([250, 5, 5]), macro_code([255, 0, 0]));
    }

    #[test]
    fn test_scale() {
        assert_eq!(scale([255, 128, 0], 255), [255, 128, 0]);
        assert_eq!(scale([255, 128, 0], 0), [0, 0, 0]);
        assert_eq!(scale([255, 255, 255], 51), [51, 51, 51]);
    }

    #[test]
    fn test_color_choice_parsing_and_resolution() {
        let mut rng = StdRng::seed_from_u64(1);
        let c: ColorChoice = serde_json::from_str("\"blue\"").unwrap();
        assert_eq!(c.resolve(&mut rng).unwrap(), [0, 0, 255]);

        let c: ColorChoice = serde_json::from_str("[1, 2, 3]").unwrap();
        assert_eq!(c.resolve(&mut rng).unwrap(), [1, 2, 3]);

        let c: ColorChoice = serde_json::from_str("\"random\"").unwrap();
        let rgb = c.resolve(&mut rng).unwrap();
        assert!(PALETTE.iter().any(|(_, p)| *p == rgb));
        assert!(c.name().is_none());

        let c = ColorChoice::Named("chartreuse".into());
        assert!(c.resolve(&mut rng).is_err());
    }
}
