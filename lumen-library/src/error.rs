use lumen_light::LightError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading show data
#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Light(#[from] LightError),
    #[error("Scene not found: {0}")]
    SceneNotFound(String),
    #[error("No scenes found in {0}")]
    NoScenes(PathBuf),
    #[error("Invalid fallback table: {0}")]
    InvalidFallbacks(String),
}

impl LibraryError {
    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }
}
