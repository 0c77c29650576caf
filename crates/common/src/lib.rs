//! Flowcheck Common Library
//!
//! Shared types, configuration and errors used by the run core, the workflow
//! driver and the control API.

pub mod config;
pub mod error;
pub mod types;

pub use config::{AppConfig, DefaultPaths, EnvironmentConfig, SmtpConfig};
pub use error::{Error, Result};
pub use types::*;

/// Flowcheck version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
