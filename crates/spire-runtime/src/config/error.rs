//! Configuration errors.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    /// An explicitly requested file does not exist.
    #[error("config file {} does not exist", .0.display())]
    FileNotFound(PathBuf),

    #[error("config file {} has no supported extension (enabled: {enabled})", .path.display())]
    UnsupportedFormat { path: PathBuf, enabled: String },

    /// A source failed to parse, or the merged tree does not fit the schema.
    #[error("config: {0}")]
    Extract(Box<figment::Error>),

    #[error("config key `{key}` is required")]
    Missing { key: &'static str },

    /// A key is present but its value is unusable.
    #[error("config key `{key}` is invalid: {reason}")]
    Invalid { key: String, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Extract(Box::new(err))
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;
