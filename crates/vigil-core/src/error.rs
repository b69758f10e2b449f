//! Error types for policy configuration.

use thiserror::Error;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while building or mutating a [`crate::PolicyConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// One or more invariants are violated. Every violation is listed.
    #[error("policy config validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("unknown config path: {0}")]
    UnknownPath(String),

    #[error("invalid value for {path}: {reason}")]
    TypeMismatch { path: String, reason: String },

    #[error("invalid override {key}: {reason}")]
    Override { key: String, reason: String },

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ConfigError {
    /// The individual invariant violations, if this is a validation error.
    pub fn violations(&self) -> &[String] {
        match self {
            ConfigError::Validation(v) => v,
            _ => &[],
        }
    }
}
