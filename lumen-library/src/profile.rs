//! Profile files
//!
//! ```json
//! { "name": "mobile", "fixture_constrained": true,
//!   "lights": [ {"name": "rockville1", "type": "largeArray"} ] }
//! ```

use crate::error::LibraryError;
use lumen_light::{FixtureType, Profile};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct ProfileLight {
    name: String,
    #[serde(rename = "type")]
    fixture_type: FixtureType,
}

#[derive(Debug, Deserialize)]
struct ProfileFile {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    fixture_constrained: bool,
    lights: Vec<ProfileLight>,
}

/// Parse a profile document. `name_hint` names profiles without a `name`.
pub fn parse_profile(name_hint: &str, json: &str, source: &Path) -> Result<Profile, LibraryError> {
    let file: ProfileFile = serde_json::from_str(json).map_err(|e| LibraryError::json(source, e))?;
    let name = file.name.unwrap_or_else(|| name_hint.to_string());
    let profile = Profile::new(
        name,
        file.fixture_constrained,
        file.lights.into_iter().map(|l| (l.name, l.fixture_type)),
    )?;
    Ok(profile)
}

/// Load a profile from a JSON file, naming it after the file stem when the
/// document has no name
pub fn load_profile(path: &Path) -> Result<Profile, LibraryError> {
    let json = fs::read_to_string(path)?;
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("profile");
    let profile = parse_profile(stem, &json, path)?;
    tracing::info!(
        profile = %profile.name,
        fixtures = profile.fixtures().len(),
        constrained = profile.fixture_constrained,
        "profile loaded"
    );
    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_parse_profile() {
        let json = r#"{
            "fixture_constrained": true,
            "lights": [
                {"name": "rockville1", "type": "largeArray"},
                {"name": "laser", "type": "laser"},
                {"name": "pin", "type": "pinspot"}
            ]
        }"#;
        let profile = parse_profile("mobile", json, &PathBuf::from("mobile.json")).unwrap();
        assert_eq!(profile.name, "mobile");
        assert!(profile.fixture_constrained);
        let starts: Vec<usize> = profile.fixtures().iter().map(|f| f.start_channel).collect();
        assert_eq!(starts, vec![1, 40, 50]);
    }

    #[test]
    fn test_unknown_type_rejected() {
        let json = r#"{"lights": [{"name": "x", "type": "fogger"}]}"#;
        let err = parse_profile("p", json, &PathBuf::from("p.json")).unwrap_err();
        assert!(matches!(err, LibraryError::Json { .. }));
    }

    #[test]
    fn test_load_profile_from_file() {
        let dir = std::env::temp_dir().join(format!("lumen_profile_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("garage.json");
        fs::write(&path, r#"{"lights": [{"name": "wash", "type": "rgb"}]}"#).unwrap();

        let profile = load_profile(&path).unwrap();
        assert_eq!(profile.name, "garage");
        assert!(!profile.fixture_constrained);

        let _ = fs::remove_dir_all(&dir);
    }
}
