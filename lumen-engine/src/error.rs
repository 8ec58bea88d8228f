use lumen_analysis::AnalysisError;
use lumen_dmx::DmxError;
use lumen_library::{LibraryError, LoadError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Audio input device not found: {requested} (available: {})", list_or_none(.available))]
    DeviceNotFound { requested: String, available: Vec<String> },
    #[error("Audio stream error: {0}")]
    Stream(String),
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error(transparent)]
    Dmx(#[from] DmxError),
    #[error(transparent)]
    Library(#[from] LibraryError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("Worker '{name}' died: {reason}")]
    WorkerDied { name: String, reason: String },
    #[error("Failed to spawn worker '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Engine is not running")]
    NotRunning,
}

fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}
