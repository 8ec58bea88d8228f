//! Scene store
//!
//! Holds every loaded scene keyed by name, the active profile and its
//! fallback table, and tracks which scene was asked for versus which one is
//! actually being played.

use crate::error::LibraryError;
use crate::fallback::FallbackTable;
use lumen_light::{Profile, Scene};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Scene selected when nothing else has been asked for
pub const DEFAULT_SCENE: &str = "party";

/// Outcome of a scene change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneSelection {
    pub requested: String,
    pub effective: String,
}

impl SceneSelection {
    pub fn is_fallback(&self) -> bool {
        self.requested != self.effective
    }
}

pub struct SceneStore {
    dir: Option<PathBuf>,
    scenes: BTreeMap<String, Arc<Scene>>,
    profile: Arc<Profile>,
    fallbacks: FallbackTable,
    requested: String,
    current: Arc<Scene>,
}

impl SceneStore {
    /// Build a store from already parsed scenes and select the default scene
    pub fn new(scenes: Vec<Scene>, profile: Arc<Profile>, fallbacks: FallbackTable) -> Result<Self, LibraryError> {
        let scenes: BTreeMap<String, Arc<Scene>> = scenes.into_iter().map(|s| (s.name.clone(), Arc::new(s))).collect();
        let default = default_scene_name(&scenes).ok_or_else(|| LibraryError::NoScenes(PathBuf::new()))?;
        let current = Arc::clone(&scenes[&default]);

        let mut store = Self {
            dir: None,
            scenes,
            profile,
            fallbacks,
            requested: default.clone(),
            current,
        };
        store.set_scene(&default)?;
        Ok(store)
    }

    /// Load every `*.json` scene in `dir`
    pub fn load_dir(dir: &Path, profile: Arc<Profile>, fallbacks: FallbackTable) -> Result<Self, LibraryError> {
        let scenes = read_scene_dir(dir)?;
        if scenes.is_empty() {
            return Err(LibraryError::NoScenes(dir.to_path_buf()));
        }
        let mut store = Self::new(scenes, profile, fallbacks)?;
        store.dir = Some(dir.to_path_buf());
        Ok(store)
    }

    /// Select a scene by name. On a fixture-constrained profile a scene that
    /// needs missing fixtures is swapped for its mapped fallback; the name
    /// asked for is remembered either way.
    pub fn set_scene(&mut self, name: &str) -> Result<SceneSelection, LibraryError> {
        let scene = self
            .scenes
            .get(name)
            .ok_or_else(|| LibraryError::SceneNotFound(name.to_string()))?;

        let mut effective = Arc::clone(scene);
        if self.profile.fixture_constrained {
            let missing = scene.missing_fixtures(&self.profile);
            if !missing.is_empty() {
                match self.fallbacks.lookup(&self.profile.name, name) {
                    Some(target) => match self.scenes.get(target) {
                        Some(fallback) => {
                            tracing::info!(
                                requested = %name,
                                fallback = %target,
                                profile = %self.profile.name,
                                "using fallback scene"
                            );
                            effective = Arc::clone(fallback);
                        }
                        None => tracing::warn!(requested = %name, fallback = %target, "fallback scene not loaded"),
                    },
                    None => tracing::warn!(
                        requested = %name,
                        missing = ?missing,
                        "scene uses fixtures missing from profile, no fallback mapped"
                    ),
                }
            }
        }

        self.requested = name.to_string();
        self.current = effective;
        Ok(self.selection())
    }

    /// Re-read the scene directory, keeping the current selection by name
    /// when it still exists
    pub fn reload(&mut self) -> Result<SceneSelection, LibraryError> {
        let Some(dir) = self.dir.clone() else {
            return Ok(self.selection());
        };
        let scenes = read_scene_dir(&dir)?;
        if scenes.is_empty() {
            return Err(LibraryError::NoScenes(dir));
        }
        self.scenes = scenes.into_iter().map(|s| (s.name.clone(), Arc::new(s))).collect();
        tracing::info!(count = self.scenes.len(), "scenes reloaded");

        let name = if self.scenes.contains_key(&self.requested) {
            self.requested.clone()
        } else {
            tracing::warn!(scene = %self.requested, "current scene vanished on reload");
            default_scene_name(&self.scenes).ok_or_else(|| LibraryError::NoScenes(dir.clone()))?
        };
        self.set_scene(&name)
    }

    pub fn selection(&self) -> SceneSelection {
        SceneSelection {
            requested: self.requested.clone(),
            effective: self.current.name.clone(),
        }
    }

    /// Scene that is actually played
    pub fn current(&self) -> Arc<Scene> {
        Arc::clone(&self.current)
    }

    pub fn current_name(&self) -> &str {
        &self.current.name
    }

    pub fn requested_name(&self) -> &str {
        &self.requested
    }

    pub fn scene(&self, name: &str) -> Option<Arc<Scene>> {
        self.scenes.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.scenes.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.scenes.keys().map(String::as_str)
    }

    pub fn scenes(&self) -> impl Iterator<Item = &Scene> {
        self.scenes.values().map(|s| s.as_ref())
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    pub fn profile(&self) -> &Arc<Profile> {
        &self.profile
    }

    pub fn fallbacks(&self) -> &FallbackTable {
        &self.fallbacks
    }

    /// Fill in a generated fallback mapping for the active profile when the
    /// table has none
    pub fn ensure_fallbacks(&mut self) -> usize {
        if !self.profile.fixture_constrained || self.fallbacks.has_profile(&self.profile.name) {
            return 0;
        }
        let mapping = FallbackTable::generate(self.scenes.values().map(|s| s.as_ref()), &self.profile);
        let count = mapping.len();
        tracing::info!(profile = %self.profile.name, count, "generated fallback mapping");
        self.fallbacks.insert_profile(self.profile.name.clone(), mapping);
        count
    }
}

fn default_scene_name(scenes: &BTreeMap<String, Arc<Scene>>) -> Option<String> {
    if scenes.contains_key(DEFAULT_SCENE) {
        return Some(DEFAULT_SCENE.to_string());
    }
    scenes.keys().next().cloned()
}

/// Parse every scene file in a directory. Unreadable files are logged and
/// skipped.
pub fn read_scene_dir(dir: &Path) -> Result<Vec<Scene>, LibraryError> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
        .collect();
    paths.sort();

    let mut scenes = Vec::with_capacity(paths.len());
    for path in paths {
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default().to_string();
        let parsed = fs::read_to_string(&path)
            .map_err(LibraryError::from)
            .and_then(|json| Scene::from_json_str(&stem, &json).map_err(LibraryError::from));
        match parsed {
            Ok(scene) => {
                tracing::debug!(scene = %scene.name, lights = scene.lights.len(), "scene loaded");
                scenes.push(scene);
            }
            Err(e) => tracing::warn!(path = %path.display(), "skipping scene file: {}", e),
        }
    }
    Ok(scenes)
}
