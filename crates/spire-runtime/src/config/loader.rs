//! Layered configuration loading.
//!
//! Sources, each overriding the previous one:
//!
//! | Layer         | Source                                               |
//! |---------------|------------------------------------------------------|
//! | defaults      | [`SpireConfig::default`]                             |
//! | file          | first of `spire.toml`, `config.toml` (`.yaml` with `yaml-config`) |
//! | profile file  | the same stem with the profile inserted: `spire.production.toml` |
//! | environment   | `SPIRE_*`                                            |
//! | code          | [`ConfigLoader::merge`] and [`ConfigLoader::set`]    |
//!
//! Without explicit search paths, the current directory and the user config
//! directory (`~/.config/spire` on Linux) are searched.
//!
//! # Environment
//!
//! Nested keys are separated by `__`:
//!
//! - `SPIRE_SERVER__PORT=9000` → `server.port = 9000`
//! - `SPIRE_LOGGING__LEVEL=debug` → `logging.level = "debug"`
//! - `SPIRE_LOG__FOLDER=/var/log/app` → `log.folder = "/var/log/app"`
//!
//! Keys outside the typed schema (like `log.folder` above) are kept in the
//! raw tree returned by [`ConfigLoader::load_tree`] and served by the
//! `config` service.
//!
//! # Example
//!
//! ```rust,ignore
//! let loaded = ConfigLoader::new()
//!     .profile("production")
//!     .file("./deploy/spire.toml")
//!     .load_tree()?;
//! ```

use std::path::{Path, PathBuf};

use figment::Figment;
#[cfg(any(feature = "toml-config", feature = "yaml-config"))]
use figment::providers::Format;
#[cfg(feature = "toml-config")]
use figment::providers::Toml;
#[cfg(feature = "yaml-config")]
use figment::providers::Yaml;
use figment::providers::{Env, Serialized};
use tracing::{debug, info, trace, warn};

use super::error::{ConfigError, ConfigResult};
use super::schema::SpireConfig;
use super::validation::validate_config;

/// Environment variable selecting the profile.
pub const PROFILE_ENV: &str = "SPIRE_PROFILE";

/// Selects the profile overlay file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Profile {
    /// `development`, also the default.
    #[default]
    Development,
    /// Production profile.
    Production,
    /// Custom profile name.
    Custom(String),
}

impl Profile {
    /// The name used in overlay file names.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Custom(name) => name,
        }
    }

    /// Parses a profile name, accepting the usual abbreviations.
    pub fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "development" | "dev" => Self::Development,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Reads the profile from `SPIRE_PROFILE`, defaulting to development.
    pub fn from_env() -> Self {
        std::env::var(PROFILE_ENV)
            .map(|p| Self::parse(&p))
            .unwrap_or_default()
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The typed configuration together with the raw merged tree.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Typed, validated view.
    pub config: SpireConfig,
    /// Every key from every source, for dotted lookups.
    pub raw: serde_json::Value,
    /// The active profile.
    pub profile: Profile,
}

/// Builds a [`SpireConfig`] from every configured source.
pub struct ConfigLoader {
    overrides: Figment,
    profile: Profile,
    search_paths: Vec<PathBuf>,
    load_env: bool,
    /// Skips discovery when set.
    config_file: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Reads the profile from `SPIRE_PROFILE`; searches nothing yet.
    pub fn new() -> Self {
        Self {
            overrides: Figment::new(),
            profile: Profile::from_env(),
            search_paths: Vec::new(),
            load_env: true,
            config_file: None,
        }
    }

    /// Overrides the profile from the environment.
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Profile::parse(&profile.into());
        self
    }

    /// Adds a directory to look for config files in.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Adds the working directory, if it can be determined.
    pub fn with_current_dir(self) -> Self {
        match std::env::current_dir() {
            Ok(cwd) => self.search_path(cwd),
            Err(_) => self,
        }
    }

    /// Loads exactly this file, which must exist.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Reads `SPIRE_*` overrides (the default).
    pub fn with_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    /// Ignores `SPIRE_*` overrides.
    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// Merges a typed configuration over every other source.
    pub fn merge(mut self, config: SpireConfig) -> Self {
        self.overrides = self.overrides.merge(Serialized::defaults(config));
        self
    }

    /// Sets a single dotted key over every other source.
    ///
    /// ```rust,ignore
    /// ConfigLoader::new().set("log.folder", "/tmp/logs")
    /// ```
    pub fn set<V: serde::Serialize>(mut self, key: &str, value: V) -> Self {
        self.overrides = self.overrides.merge(Serialized::default(key, value));
        self
    }

    /// Loads, validates and returns the typed configuration.
    pub fn load(self) -> ConfigResult<SpireConfig> {
        self.load_tree().map(|loaded| loaded.config)
    }

    /// Loads the typed configuration and keeps the raw merged tree.
    pub fn load_tree(self) -> ConfigResult<LoadedConfig> {
        let profile = self.profile.clone();
        let figment = self.into_figment()?;

        let config: SpireConfig = figment.extract()?;
        validate_config(&config)?;
        let raw: serde_json::Value = figment.extract()?;

        debug!(
            profile = %profile,
            address = %config.server.address(),
            strict_bind = config.container.strict_bind,
            "Configuration ready"
        );
        Ok(LoadedConfig {
            config,
            raw,
            profile,
        })
    }

    fn into_figment(self) -> ConfigResult<Figment> {
        let defaults = Figment::from(Serialized::defaults(SpireConfig::default()));

        let mut figment = match &self.config_file {
            Some(path) if !path.exists() => return Err(ConfigError::FileNotFound(path.clone())),
            Some(path) => {
                let format = format_of(path).ok_or_else(|| ConfigError::UnsupportedFormat {
                    path: path.clone(),
                    enabled: enabled_extensions().join(", "),
                })?;
                info!(path = %path.display(), "Using configuration file");
                format.merge(defaults, path)
            }
            None => self.discover(defaults),
        };

        if self.load_env {
            trace!(prefix = ENV_PREFIX, "Merging environment overrides");
            figment = figment.merge(Env::prefixed(ENV_PREFIX).ignore(&["profile"]).split("__"));
        }

        Ok(figment.merge(self.overrides))
    }

    fn search_dirs(&self) -> Vec<PathBuf> {
        if !self.search_paths.is_empty() {
            return self.search_paths.clone();
        }
        std::env::current_dir()
            .ok()
            .into_iter()
            .chain(dirs::config_dir().map(|dir| dir.join("spire")))
            .collect()
    }

    /// Merges the first `<stem>.<ext>` found, then its `<stem>.<profile>.<ext>`
    /// sibling on top.
    fn discover(&self, figment: Figment) -> Figment {
        let dirs = self.search_dirs();
        let candidates = dirs.iter().flat_map(|dir| {
            FILE_STEMS.iter().flat_map(move |stem| {
                FORMATS.iter().flat_map(move |format| {
                    format
                        .extensions
                        .iter()
                        .map(move |ext| (dir, *stem, format, *ext))
                })
            })
        });

        for (dir, stem, format, ext) in candidates {
            let base = dir.join(format!("{stem}.{ext}"));
            if !base.is_file() {
                continue;
            }
            info!(path = %base.display(), "Using configuration file");
            let mut figment = format.merge(figment, &base);

            let overlay = dir.join(format!("{stem}.{}.{ext}", self.profile.as_str()));
            if overlay.is_file() {
                debug!(path = %overlay.display(), profile = %self.profile, "Applying profile overlay");
                figment = format.merge(figment, &overlay);
            }
            return figment;
        }

        warn!(dirs = ?dirs, "No configuration file found, using defaults");
        figment
    }
}

/// Prefix of environment overrides.
const ENV_PREFIX: &str = "SPIRE_";

/// File names tried in every search directory, in order.
const FILE_STEMS: [&str; 2] = ["spire", "config"];

struct FileFormat {
    extensions: &'static [&'static str],
    merge: fn(Figment, &Path) -> Figment,
}

impl FileFormat {
    fn merge(&self, figment: Figment, path: &Path) -> Figment {
        (self.merge)(figment, path)
    }
}

/// Formats compiled in, in lookup order.
const FORMATS: &[FileFormat] = &[
    #[cfg(feature = "toml-config")]
    FileFormat {
        extensions: &["toml"],
        merge: |figment, path| figment.merge(Toml::file(path)),
    },
    #[cfg(feature = "yaml-config")]
    FileFormat {
        extensions: &["yaml", "yml"],
        merge: |figment, path| figment.merge(Yaml::file(path)),
    },
];

fn format_of(path: &Path) -> Option<&'static FileFormat> {
    let ext = path.extension()?.to_str()?;
    FORMATS.iter().find(|format| format.extensions.contains(&ext))
}

fn enabled_extensions() -> Vec<&'static str> {
    FORMATS
        .iter()
        .flat_map(|format| format.extensions.iter().copied())
        .collect()
}

/// Loads configuration from the default locations.
pub fn load_config() -> ConfigResult<SpireConfig> {
    ConfigLoader::new().with_current_dir().load()
}

/// Loads configuration from a specific file plus the environment.
pub fn load_config_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<SpireConfig> {
    ConfigLoader::new().file(path).load()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;
    use figment::Jail;

    #[test]
    fn defaults_without_files() {
        Jail::expect_with(|jail| {
            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .without_env()
                .load()
                .map_err(|e| e.to_string())?;

            assert_eq!(config.logging.level.as_str(), "info");
            assert_eq!(config.server.port, 8080);
            Ok(())
        });
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn file_profile_env_and_code_layers() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "spire.toml",
                r#"
                    [app]
                    name = "blog"

                    [server]
                    port = 9000

                    [log]
                    folder = "/srv/blog/logs"
                "#,
            )?;
            jail.create_file("spire.production.toml", "[logging]\nlevel = \"warn\"\n")?;
            jail.set_env("SPIRE_SERVER__HOST", "127.0.0.1");
            jail.set_env("SPIRE_LOG__FILE", "blog.log");

            let loaded = ConfigLoader::new()
                .profile("prod")
                .search_path(jail.directory())
                .set("container.strict_bind", true)
                .load_tree()
                .map_err(|e| e.to_string())?;

            assert_eq!(loaded.profile, Profile::Production);
            assert_eq!(loaded.config.app.name, "blog");
            assert_eq!(loaded.config.server.port, 9000);
            assert_eq!(loaded.config.server.host, "127.0.0.1");
            assert_eq!(loaded.config.logging.level, LogLevel::Warn);
            assert!(loaded.config.container.strict_bind);
            assert_eq!(loaded.raw["log"]["folder"], "/srv/blog/logs");
            assert_eq!(loaded.raw["log"]["file"], "blog.log");
            Ok(())
        });
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn profile_overlay_overrides_base_file() {
        Jail::expect_with(|jail| {
            jail.create_file("config.toml", "[server]\nport = 9000\nhost = \"10.0.0.1\"\n")?;
            jail.create_file("config.staging.toml", "[server]\nport = 9100\n")?;

            let config = ConfigLoader::new()
                .profile("staging")
                .search_path(jail.directory())
                .without_env()
                .load()
                .map_err(|e| e.to_string())?;

            assert_eq!(config.server.port, 9100);
            assert_eq!(config.server.host, "10.0.0.1");
            Ok(())
        });
    }

    #[test]
    fn rejects_unknown_file_format() {
        Jail::expect_with(|jail| {
            jail.create_file("spire.ini", "port = 1")?;
            let err = ConfigLoader::new()
                .file(jail.directory().join("spire.ini"))
                .load()
                .unwrap_err();
            assert!(matches!(
                err,
                ConfigError::UnsupportedFormat { ref path, .. } if path.ends_with("spire.ini")
            ));
            Ok(())
        });
    }

    #[test]
    fn explicit_file_must_exist() {
        let err = ConfigLoader::new()
            .file("/definitely/not/here/spire.toml")
            .load()
            .unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn parses_profile_names() {
        assert_eq!(Profile::parse("PROD"), Profile::Production);
        assert_eq!(Profile::parse("dev"), Profile::Development);
        assert_eq!(Profile::parse("staging").as_str(), "staging");
    }

    #[test]
    fn profile_comes_from_env() {
        Jail::expect_with(|jail| {
            jail.set_env(PROFILE_ENV, "production");
            assert_eq!(Profile::from_env(), Profile::Production);
            Ok(())
        });
    }
}
