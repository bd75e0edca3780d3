//! Error handling module for oradeploy
//!
//! Typed failures live here. Orchestration code wraps them in `anyhow` with
//! context, so callers that care can still downcast to `DeployError`.

use thiserror::Error;

/// Main error type for oradeploy
#[derive(Error, Debug)]
pub enum DeployError {
    /// IO errors (config files, media archives, child process pipes)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors (loading, parsing, path resolution)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation errors (config values, CLI selectors)
    #[error("Validation error: {0}")]
    Validation(String),

    /// A remote command ran but did not succeed
    #[error("Remote command failed: {0}")]
    Remote(String),

    /// The host could not be reached over SSH
    #[error("Connection error: {0}")]
    Connection(String),

    /// EC2 provisioning errors
    #[error("Cloud error: {0}")]
    Cloud(String),

    /// Response file / template rendering errors
    #[error("Template error: {0}")]
    Template(String),

    /// Deployment state machine transition errors
    #[error("Stage transition error: {0}")]
    StageTransition(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// General errors (catch-all for edge cases)
    #[error("{0}")]
    General(String),
}

/// Result type alias for oradeploy operations
pub type Result<T> = std::result::Result<T, DeployError>;

impl DeployError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn remote(msg: impl Into<String>) -> Self {
        Self::Remote(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn cloud(msg: impl Into<String>) -> Self {
        Self::Cloud(msg.into())
    }

    pub fn template(msg: impl Into<String>) -> Self {
        Self::Template(msg.into())
    }

    pub fn stage_transition(msg: impl Into<String>) -> Self {
        Self::StageTransition(msg.into())
    }

    pub fn general(msg: impl Into<String>) -> Self {
        Self::General(msg.into())
    }
}
