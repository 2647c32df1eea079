//! Configuration module for the Spire runtime.
//!
//! Layered loading (defaults, files, environment, overrides), a typed schema
//! and validation. The merged tree is also kept untyped so that services can
//! look up arbitrary dotted keys.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, LoadedConfig, Profile, load_config, load_config_from_file};
pub use schema::{
    AppConfig, ContainerConfig, LogFormat, LogLevel, LogOutput, LoggingConfig, ServerConfig,
    SpanEventConfig, SpireConfig,
};
pub use validation::validate_config;
