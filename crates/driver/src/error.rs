//! Error types for workflow execution

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Browser bridge failed to start: {0}")]
    BridgeStartup(String),

    #[error("Browser bridge error: {0}")]
    Bridge(String),

    #[error("Browser bridge exited")]
    BridgeClosed,

    #[error("Workflow parse error: {0}")]
    SpecParse(String),

    #[error("Invalid workflow: {0}")]
    InvalidSpec(String),

    #[error("{step}: {reason}")]
    StepFailed { step: String, reason: String },

    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Screenshot decode error: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl DriverError {
    pub fn step_failed(step: impl Into<String>, reason: impl Into<String>) -> Self {
        DriverError::StepFailed {
            step: step.into(),
            reason: reason.into(),
        }
    }
}

pub type DriverResult<T> = Result<T, DriverError>;
