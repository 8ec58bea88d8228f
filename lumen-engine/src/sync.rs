//! Playback-driven scene selection
//!
//! A [`PlaybackSource`] reports what is playing and where. Per-song section
//! maps turn that position into a scene name, and [`PlaybackFollower`]
//! reports the scene whenever it should change.

use crate::input::FileAudio;
use lumen_library::{LibraryError, DEFAULT_SCENE};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackState {
    pub track_id: String,
    pub progress_ms: u64,
    pub is_playing: bool,
}

/// Anything that can report the current playback position
pub trait PlaybackSource: Send {
    /// `None` when nothing is loaded or the source is unreachable
    fn poll(&mut self) -> Option<PlaybackState>;
}

/// Reports the position of a file being fed through the engine
pub struct FilePlayback {
    audio: Arc<FileAudio>,
}

impl FilePlayback {
    pub fn new(audio: Arc<FileAudio>) -> Self {
        Self { audio }
    }
}

impl PlaybackSource for FilePlayback {
    fn poll(&mut self) -> Option<PlaybackState> {
        Some(PlaybackState {
            track_id: self.audio.title.clone(),
            progress_ms: self.audio.progress_ms(),
            is_playing: self.audio.playing.load(Ordering::Relaxed),
        })
    }
}

/// One section of a song, in seconds
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Section {
    pub start: f64,
    pub duration: f64,
    #[serde(default)]
    pub scene: Option<String>,
}

impl Section {
    fn contains(&self, secs: f64) -> bool {
        secs >= self.start && secs < self.start + self.duration
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SongSections {
    #[serde(default)]
    pub sections: Vec<Section>,
}

impl SongSections {
    pub fn from_json_str(json: &str, source: &Path) -> Result<Self, LibraryError> {
        serde_json::from_str(json).map_err(|source_err| LibraryError::Json {
            path: source.to_path_buf(),
            source: source_err,
        })
    }

    pub fn load(path: &Path) -> Result<Self, LibraryError> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json, path)
    }

    /// Scene of the section playing at `secs`, if that section names one
    pub fn scene_at(&self, secs: f64) -> Option<&str> {
        self.sections
            .iter()
            .find(|s| s.contains(secs))
            .and_then(|s| s.scene.as_deref())
    }
}

/// Section maps keyed by track id
#[derive(Debug, Clone, Default)]
pub struct SongLibrary {
    songs: HashMap<String, SongSections>,
}

impl SongLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.json` in `dir`, keyed by file stem. Unreadable files
    /// are logged and skipped.
    pub fn load_dir(dir: &Path) -> Result<Self, LibraryError> {
        let mut library = Self::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match SongSections::load(&path) {
                Ok(sections) => {
                    library.insert(stem, sections);
                }
                Err(e) => tracing::warn!(path = %path.display(), "skipping song data: {}", e),
            }
        }
        tracing::info!(dir = %dir.display(), songs = library.len(), "song sections loaded");
        Ok(library)
    }

    pub fn insert(&mut self, track_id: &str, sections: SongSections) {
        self.songs.insert(track_id.to_string(), sections);
    }

    pub fn get(&self, track_id: &str) -> Option<&SongSections> {
        self.songs.get(track_id)
    }

    pub fn len(&self) -> usize {
        self.songs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.songs.is_empty()
    }
}

/// Turns playback position into scene requests
pub struct PlaybackFollower {
    source: Box<dyn PlaybackSource>,
    songs: SongLibrary,
    default_scene: String,
    last: Option<String>,
}

impl PlaybackFollower {
    pub fn new(source: Box<dyn PlaybackSource>, songs: SongLibrary) -> Self {
        Self {
            source,
            songs,
            default_scene: DEFAULT_SCENE.to_string(),
            last: None,
        }
    }

    pub fn with_default_scene(mut self, scene: &str) -> Self {
        self.default_scene = scene.to_string();
        self
    }

    /// Scene the playback position calls for right now
    pub fn wanted_scene(&mut self) -> String {
        let Some(state) = self.source.poll().filter(|s| s.is_playing) else {
            return self.default_scene.clone();
        };
        let secs = state.progress_ms as f64 / 1000.0;
        self.songs
            .get(&state.track_id)
            .and_then(|song| song.scene_at(secs))
            .unwrap_or(&self.default_scene)
            .to_string()
    }

    /// Poll the source; `Some(scene)` when the wanted scene differs from the
    /// one reported last
    pub fn tick(&mut self) -> Option<String> {
        let wanted = self.wanted_scene();
        if self.last.as_deref() == Some(wanted.as_str()) {
            return None;
        }
        tracing::debug!(scene = %wanted, "playback calls for scene");
        self.last = Some(wanted.clone());
        Some(wanted)
    }

    /// Forget the last reported scene so the next tick reports again
    pub fn reset(&mut self) {
        self.last = None;
    }
}
