//! Configuration error types.

use thiserror::Error;

/// Errors raised while loading settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    /// A config document (YAML file or `MCP_SERVERS` JSON) is malformed.
    #[error("failed to parse {source_name}: {reason}")]
    Parse { source_name: String, reason: String },

    /// A value is present but unusable.
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },

    /// A required value is absent.
    #[error("missing required setting {key}")]
    MissingKey { key: String },
}
