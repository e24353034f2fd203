//! Run configuration.
//!
//! Settings come from environment variables or from a YAML file, are
//! validated once, and are passed by reference afterwards.

pub mod errors;
pub mod settings;

pub use errors::ConfigError;
pub use settings::{interpolate_env_vars, Settings, CONFIG_PATH_ENV};
