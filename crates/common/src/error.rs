//! Error types for Flowcheck

use thiserror::Error;

/// Result type alias using Flowcheck Error
pub type Result<T> = std::result::Result<T, Error>;

/// Flowcheck error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config encode error: {0}")]
    ConfigEncode(#[from] toml::ser::Error),

    #[error("Resource not found: {kind} with id {id}")]
    NotFound { kind: String, id: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Missing required configuration: {}", .0.join(", "))]
    MissingConfig(Vec<String>),

    #[error("Invalid environment: {0}")]
    InvalidEnvironment(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for an unknown run id
    pub fn run_not_found(id: impl Into<String>) -> Self {
        Error::NotFound {
            kind: "run".to_string(),
            id: id.into(),
        }
    }
}
