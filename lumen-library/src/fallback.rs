//! Scene fallback tables
//!
//! Fixture-constrained profiles cannot play every scene. A fallback table
//! maps, per profile, an unsupported scene to a playable substitute:
//!
//! ```json
//! { "_comment": "...", "mobile": { "blue_hopper": "rockville_blue" } }
//! ```
//!
//! Keys starting with `_` are annotations and are ignored.

use crate::error::LibraryError;
use lumen_light::{Profile, Scene};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::Path;

/// Names that mark a scene as color-specific
const NAME_COLORS: [&str; 7] = ["red", "blue", "green", "pink", "white", "purple", "orange"];
/// Name fragments that mark a shared choreography
const NAME_PATTERNS: [&str; 5] = ["hopper", "racer", "pulse", "speedracer", "bass"];
const RAINBOW: [&str; 7] = ["red", "orange", "yellow", "green", "blue", "purple", "pink"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FallbackTable {
    profiles: HashMap<String, BTreeMap<String, String>>,
}

impl FallbackTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(json: &str, source: &Path) -> Result<Self, LibraryError> {
        let value: Value = serde_json::from_str(json).map_err(|e| LibraryError::json(source, e))?;
        let object = value
            .as_object()
            .ok_or_else(|| LibraryError::InvalidFallbacks("top level is not an object".into()))?;

        let mut table = Self::new();
        for (profile, entries) in object {
            if profile.starts_with('_') {
                continue;
            }
            let Some(entries) = entries.as_object() else {
                tracing::warn!(profile = %profile, "fallback entry is not an object, skipping");
                continue;
            };
            let mapping = table.profiles.entry(profile.clone()).or_default();
            for (scene, target) in entries {
                match target.as_str() {
                    Some(target) => {
                        mapping.insert(scene.clone(), target.to_string());
                    }
                    None => tracing::warn!(profile = %profile, scene = %scene, "fallback target is not a string"),
                }
            }
        }
        Ok(table)
    }

    pub fn load(path: &Path) -> Result<Self, LibraryError> {
        let json = fs::read_to_string(path)?;
        let table = Self::from_json_str(&json, path)?;
        tracing::info!(path = %path.display(), profiles = table.profiles.len(), "fallback table loaded");
        Ok(table)
    }

    pub fn save(&self, path: &Path) -> Result<(), LibraryError> {
        let mut object = Map::new();
        object.insert(
            "_comment".into(),
            Value::from("Scene fallback mappings for profiles with limited fixture support"),
        );
        let mut names: Vec<&String> = self.profiles.keys().collect();
        names.sort();
        for name in names {
            let mapping: Map<String, Value> = self.profiles[name]
                .iter()
                .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
                .collect();
            object.insert(name.clone(), Value::Object(mapping));
        }
        let json = serde_json::to_string_pretty(&Value::Object(object)).map_err(|e| LibraryError::json(path, e))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, json)?;
        Ok(())
    }

    /// Substitute for `scene` under `profile`, if one is mapped
    pub fn lookup(&self, profile: &str, scene: &str) -> Option<&str> {
        self.profiles.get(profile)?.get(scene).map(String::as_str)
    }

    pub fn has_profile(&self, profile: &str) -> bool {
        self.profiles.contains_key(profile)
    }

    pub fn profile_mapping(&self, profile: &str) -> Option<&BTreeMap<String, String>> {
        self.profiles.get(profile)
    }

    pub fn insert_profile(&mut self, profile: impl Into<String>, mapping: BTreeMap<String, String>) {
        self.profiles.insert(profile.into(), mapping);
    }

    /// Map every scene the profile cannot play to the most similar scene it
    /// can. Scenes with no playable candidate are left unmapped.
    pub fn generate<'a>(scenes: impl IntoIterator<Item = &'a Scene>, profile: &Profile) -> BTreeMap<String, String> {
        let mut scenes: Vec<&Scene> = scenes.into_iter().collect();
        scenes.sort_by(|a, b| a.name.cmp(&b.name));

        let traits: Vec<SceneTraits> = scenes.iter().map(|s| SceneTraits::of(s)).collect();
        let playable: Vec<usize> = (0..scenes.len()).filter(|&i| scenes[i].is_supported_by(profile)).collect();

        let mut mapping = BTreeMap::new();
        for (i, scene) in scenes.iter().enumerate() {
            if scene.is_supported_by(profile) {
                continue;
            }
            let mut best: Option<(f32, usize)> = None;
            for &j in &playable {
                if j == i {
                    continue;
                }
                let score = similarity(&scene.name, &traits[i], &scenes[j].name, &traits[j]);
                if best.map_or(true, |(b, _)| score > b) {
                    best = Some((score, j));
                }
            }
            if let Some((score, j)) = best {
                tracing::debug!(scene = %scene.name, fallback = %scenes[j].name, score, "fallback chosen");
                mapping.insert(scene.name.clone(), scenes[j].name.clone());
            }
        }
        mapping
    }
}

/// Traits compared when picking a substitute scene
#[derive(Debug, Default, Clone, PartialEq)]
struct SceneTraits {
    colors: BTreeSet<String>,
    vibes: BTreeSet<&'static str>,
    has_strobe: bool,
    has_bass: bool,
    is_fast: bool,
}

impl SceneTraits {
    fn of(scene: &Scene) -> Self {
        let mut t = Self::default();

        for light in &scene.lights {
            if let Some(name) = light.modulator.color().name() {
                t.colors.insert(name.to_lowercase());
            }
            if light.modulator.strobes() {
                t.has_strobe = true;
            }
            if light.modulator.mfft_range().is_some_and(|(_, end)| end <= 30) {
                t.has_bass = true;
            }
            if let Some(effect) = &light.effect {
                for key in ["color", "panel_color"] {
                    if let Some(c) = effect.params.get(key).and_then(Value::as_str) {
                        t.colors.insert(c.to_lowercase());
                    }
                }
                for key in ["colors", "panel_colors"] {
                    if let Some(list) = effect.params.get(key).and_then(Value::as_array) {
                        t.colors
                            .extend(list.iter().filter_map(Value::as_str).map(str::to_lowercase));
                    }
                }
                let strobe = effect.params.get("panel_strobe").and_then(Value::as_f64);
                if strobe.is_some_and(|s| s != 0.0) {
                    t.has_strobe = true;
                }
            }
        }

        if let Some(orch) = &scene.orchestrator {
            match orch.kind.as_str() {
                "hopper" => {
                    t.is_fast = true;
                    t.vibes.insert("hopper");
                }
                "racer" => {
                    t.is_fast = true;
                    t.vibes.insert("racer");
                }
                _ => {}
            }
        }

        let name = scene.name.to_lowercase();
        let has = |words: &[&str]| words.iter().any(|w| name.contains(w));
        if has(&["rainbow"]) {
            t.vibes.insert("rainbow");
            t.colors.extend(RAINBOW.iter().map(|c| c.to_string()));
        }
        if has(&["chill", "ambient", "fade", "wave"]) {
            t.vibes.insert("chill");
        }
        if has(&["supernova", "quasar", "vortex", "hypno", "electric"]) {
            t.vibes.insert("intense");
        }
        if has(&["party", "disco", "dance"]) {
            t.vibes.insert("party");
        }
        if has(&["bass", "pulse"]) {
            t.vibes.insert("bass");
            t.has_bass = true;
        }
        if has(&["strobe", "flicker"]) {
            t.vibes.insert("strobe");
            t.has_strobe = true;
        }
        if has(&["speed", "racer"]) {
            t.vibes.insert("fast");
            t.is_fast = true;
        }
        if has(&["hopper", "hop"]) {
            t.vibes.insert("hopper");
        }
        if has(&["goosebumps", "temple", "swamp"]) {
            t.vibes.insert("psychedelic");
        }
        t
    }
}

fn similarity(source: &str, a: &SceneTraits, candidate: &str, b: &SceneTraits) -> f32 {
    let mut score = 0.0;

    if !a.colors.is_empty() && !b.colors.is_empty() {
        let shared = a.colors.intersection(&b.colors).count() as f32;
        let union = a.colors.union(&b.colors).count() as f32;
        score += shared / union * 40.0;
    }
    score += a.vibes.intersection(&b.vibes).count() as f32 * 15.0;

    if a.has_bass == b.has_bass {
        score += 10.0;
    }
    if a.has_strobe == b.has_strobe {
        score += 8.0;
    }
    if a.is_fast == b.is_fast {
        score += 8.0;
    }

    let source = source.to_lowercase();
    let candidate = candidate.to_lowercase();
    let both = |w: &str| source.contains(w) && candidate.contains(w);
    score += NAME_COLORS.iter().filter(|c| both(c)).count() as f32 * 25.0;
    score += NAME_PATTERNS.iter().filter(|p| both(p)).count() as f32 * 20.0;
    score
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_light::FixtureType;
    use serde_json::json;
    use std::path::PathBuf;

    fn scene(name: &str, light: &str, color: &str, mfft_end: usize) -> Scene {
        Scene::from_value(
            name,
            json!({"lights": [{
                "name": light, "modulator": "mfft", "mfft_range": [0, mfft_end],
                "color": color
            }]}),
        )
        .unwrap()
    }

    fn mobile() -> Profile {
        Profile::new("mobile", true, vec![("rockville1".to_string(), FixtureType::LargeArray)]).unwrap()
    }

    #[test]
    fn test_parse_ignores_annotations() {
        let json = r#"{
            "_comment": "generated",
            "_usage": {"ignored": "too"},
            "mobile": {"blue_hopper": "rockville_blue", "bad": 3}
        }"#;
        let table = FallbackTable::from_json_str(json, &PathBuf::from("f.json")).unwrap();
        assert!(table.has_profile("mobile"));
        assert!(!table.has_profile("_usage"));
        assert_eq!(table.lookup("mobile", "blue_hopper"), Some("rockville_blue"));
        assert_eq!(table.lookup("mobile", "bad"), None);
        assert_eq!(table.lookup("venue", "blue_hopper"), None);
    }

    #[test]
    fn test_top_level_must_be_object() {
        let err = FallbackTable::from_json_str("[1]", &PathBuf::from("f.json")).unwrap_err();
        assert!(matches!(err, LibraryError::InvalidFallbacks(_)));
    }

    #[test]
    fn test_generate_prefers_matching_color_name() {
        let scenes = vec![
            scene("blue_wash", "wash", "blue", 100),
            scene("rockville_red", "rockville1", "red", 100),
            scene("rockville_blue", "rockville1", "blue", 100),
        ];
        let mapping = FallbackTable::generate(&scenes, &mobile());
        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping.get("blue_wash").map(String::as_str), Some("rockville_blue"));
    }

    #[test]
    fn test_generate_matches_bass_and_pattern() {
        let scenes = vec![
            scene("bass_pulse", "wash", "white", 20),
            scene("rockville_bass", "rockville1", "green", 10),
            scene("rockville_calm", "rockville1", "green", 200),
        ];
        let mapping = FallbackTable::generate(&scenes, &mobile());
        assert_eq!(mapping.get("bass_pulse").map(String::as_str), Some("rockville_bass"));
    }

    #[test]
    fn test_generate_without_playable_scenes() {
        let scenes = vec![scene("blue_wash", "wash", "blue", 100)];
        assert!(FallbackTable::generate(&scenes, &mobile()).is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("lumen_fallback_{}", std::process::id()));
        let path = dir.join("profile_fallbacks.json");

        let mut table = FallbackTable::new();
        let mut mapping = BTreeMap::new();
        mapping.insert("a".to_string(), "b".to_string());
        table.insert_profile("mobile", mapping);
        table.save(&path).unwrap();

        let loaded = FallbackTable::load(&path).unwrap();
        assert_eq!(loaded, table);

        let _ = fs::remove_dir_all(&dir);
    }
}
