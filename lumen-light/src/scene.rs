//! Scene definitions
//!
//! A scene lists per-fixture modulator settings, optional effects and an
//! optional orchestrator. Lights that fail to parse are dropped with a
//! warning so one typo does not take the whole scene down.

use crate::effects::EffectConfig;
use crate::error::LightError;
use crate::fixture::Profile;
use crate::modulation::Modulator;
use crate::orchestrator::OrchestratorConfig;
use serde::Deserialize;
use std::collections::BTreeSet;

/// One light entry of a scene
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FixtureConfig {
    pub name: String,
    #[serde(flatten)]
    pub modulator: Modulator,
    #[serde(default)]
    pub effect: Option<EffectConfig>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    pub name: String,
    pub lights: Vec<FixtureConfig>,
    pub orchestrator: Option<OrchestratorConfig>,
    /// Names of light entries that could not be parsed
    pub rejected: Vec<String>,
}

impl Scene {
    /// Build a scene from its JSON form. `name_hint` is used when the
    /// document has no `name` field.
    pub fn from_value(name_hint: &str, value: serde_json::Value) -> Result<Self, LightError> {
        let object = value.as_object().ok_or_else(|| {
            LightError::FixtureConfigInvalid {
                fixture: name_hint.to_string(),
                reason: "scene document is not a JSON object".into(),
            }
        })?;

        let name = object
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or(name_hint)
            .to_string();

        let mut lights = Vec::new();
        let mut rejected = Vec::new();
        let entries = object.get("lights").and_then(|v| v.as_array()).cloned().unwrap_or_default();
        for entry in entries {
            let light_name = entry
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or("<unnamed>")
                .to_string();
            match serde_json::from_value::<FixtureConfig>(entry) {
                Ok(config) => lights.push(config),
                Err(e) => {
                    tracing::warn!(scene = %name, fixture = %light_name, "skipping light: {}", e);
                    rejected.push(light_name);
                }
            }
        }

        let orchestrator = match object.get("orchestrator") {
            None | Some(serde_json::Value::Null) => None,
            Some(raw) => match serde_json::from_value::<OrchestratorConfig>(raw.clone()) {
                Ok(config) => Some(config),
                Err(e) => {
                    tracing::warn!(scene = %name, "ignoring malformed orchestrator: {}", e);
                    None
                }
            },
        };

        Ok(Self {
            name,
            lights,
            orchestrator,
            rejected,
        })
    }

    pub fn from_json_str(name_hint: &str, json: &str) -> Result<Self, LightError> {
        Self::from_value(name_hint, serde_json::from_str(json)?)
    }

    pub fn light(&self, name: &str) -> Option<&FixtureConfig> {
        self.lights.iter().find(|l| l.name == name)
    }

    /// Every fixture the scene drives, including orchestrator targets
    pub fn required_fixtures(&self) -> BTreeSet<String> {
        let mut names: BTreeSet<String> = self.lights.iter().map(|l| l.name.clone()).collect();
        if let Some(orch) = &self.orchestrator {
            names.extend(orch.target_lights());
        }
        names
    }

    /// Required fixtures the profile does not have
    pub fn missing_fixtures(&self, profile: &Profile) -> Vec<String> {
        self.required_fixtures()
            .into_iter()
            .filter(|name| !profile.contains(name))
            .collect()
    }

    pub fn is_supported_by(&self, profile: &Profile) -> bool {
        self.missing_fixtures(profile).is_empty()
    }
}
