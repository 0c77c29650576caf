//! Error types for report delivery

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Invalid address {address}: {reason}")]
    Address { address: String, reason: String },

    #[error("Failed to build message: {0}")]
    Message(String),

    #[error("Failed to render report: {0}")]
    Render(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Delivery timed out after {0}s")]
    Timeout(u64),
}

impl From<lettre::error::Error> for NotifyError {
    fn from(e: lettre::error::Error) -> Self {
        NotifyError::Message(e.to_string())
    }
}

impl From<handlebars::RenderError> for NotifyError {
    fn from(e: handlebars::RenderError) -> Self {
        NotifyError::Render(e.to_string())
    }
}

impl From<lettre::transport::smtp::Error> for NotifyError {
    fn from(e: lettre::transport::smtp::Error) -> Self {
        NotifyError::Transport(e.to_string())
    }
}

pub type NotifyResult<T> = Result<T, NotifyError>;
