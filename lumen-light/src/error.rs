use thiserror::Error;

/// Errors raised while building or evaluating lighting configuration
#[derive(Error, Debug)]
pub enum LightError {
    #[error("Invalid config for fixture '{fixture}': {reason}")]
    FixtureConfigInvalid { fixture: String, reason: String },
    #[error("Unknown orchestrator type: {0}")]
    OrchestratorTypeUnknown(String),
    #[error("Invalid orchestrator config: {0}")]
    OrchestratorConfigInvalid(String),
    #[error("Unknown effect: {0}")]
    EffectUnknown(String),
    #[error("Invalid profile: {0}")]
    ProfileInvalid(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LightError {
    pub(crate) fn fixture(fixture: &str, reason: impl Into<String>) -> Self {
        Self::FixtureConfigInvalid {
            fixture: fixture.to_string(),
            reason: reason.into(),
        }
    }
}
