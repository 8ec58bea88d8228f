//! Show library for Lumen - profiles, scenes, fallbacks, audio files, config

mod config;
mod error;
mod fallback;
mod loader;
mod profile;
mod store;

pub use config::Config;
pub use error::LibraryError;
pub use fallback::FallbackTable;
pub use loader::{downmix, resample_mono, AudioInfo, AudioLoader, LoadError, LoadedAudio};
pub use profile::{load_profile, parse_profile};
pub use store::{read_scene_dir, SceneSelection, SceneStore, DEFAULT_SCENE};
