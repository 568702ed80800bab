//! Error types for collaborator calls and configuration.

use thiserror::Error;

/// Result type alias for collaborator operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Failures reported by the deployment-tracking or fleet-inventory service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Network, timeout, or rate-limit failure.
    #[error("service unavailable: {0}")]
    Transient(String),

    /// The call succeeded but the payload carried an error message.
    #[error("service reported error: {0}")]
    Reported(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ServiceError {
    /// Whether the failure should slow down the caller's polling.
    pub fn is_throttling(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Reported(_))
    }
}

/// Invalid configuration values.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration for {field}: {value:?}")]
    Duration { field: &'static str, value: String },

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
