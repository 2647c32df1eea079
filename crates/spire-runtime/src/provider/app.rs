//! The `app` service.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use spire_core::{BoxError, Container, Service, ServiceParams, ServiceProvider};

use crate::config::AppConfig;
use crate::contract::{APP_KEY, App};

/// Application identity resolved against the file system.
#[derive(Debug, Clone)]
pub struct SpireApp {
    name: String,
    base_folder: PathBuf,
    log_folder: PathBuf,
}

impl SpireApp {
    /// Resolves folders from `config`.
    ///
    /// The base folder defaults to the working directory and the log folder
    /// to `<base>/storage/log`. A relative log folder is taken relative to
    /// the base folder.
    pub fn from_config(config: &AppConfig) -> std::io::Result<Self> {
        let base_folder = match &config.base_folder {
            Some(folder) => folder.clone(),
            None => std::env::current_dir()?,
        };
        let log_folder = match &config.log_folder {
            Some(folder) if folder.is_absolute() => folder.clone(),
            Some(folder) => base_folder.join(folder),
            None => base_folder.join("storage").join("log"),
        };
        Ok(Self {
            name: config.name.clone(),
            base_folder,
            log_folder,
        })
    }
}

impl App for SpireApp {
    fn name(&self) -> &str {
        &self.name
    }

    fn base_folder(&self) -> &Path {
        &self.base_folder
    }

    fn log_folder(&self) -> &Path {
        &self.log_folder
    }
}

/// Binds [`SpireApp`] under `app`.
#[derive(Debug, Clone, Default)]
pub struct AppProvider {
    config: AppConfig,
}

impl AppProvider {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }
}

impl ServiceProvider for AppProvider {
    fn name(&self) -> &str {
        APP_KEY
    }

    fn register(&self, _container: &Container, _params: &ServiceParams) -> Result<Service, BoxError> {
        let app = SpireApp::from_config(&self.config)?;
        Ok(Service::new(Arc::new(app) as Arc<dyn App>))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_folders() {
        let config = AppConfig {
            name: "blog".to_string(),
            base_folder: Some(PathBuf::from("/srv/blog")),
            log_folder: Some(PathBuf::from("var/log")),
        };
        let app = SpireApp::from_config(&config).unwrap();
        assert_eq!(app.name(), "blog");
        assert_eq!(app.log_folder(), Path::new("/srv/blog/var/log"));

        let config = AppConfig {
            log_folder: None,
            ..config
        };
        let app = SpireApp::from_config(&config).unwrap();
        assert_eq!(app.log_folder(), Path::new("/srv/blog/storage/log"));
    }

    #[test]
    fn binds_under_app_key() {
        let container = Container::new();
        container.bind(AppProvider::default()).unwrap();
        let app = container.make_as::<dyn App>(APP_KEY).unwrap();
        assert_eq!(app.name(), "spire");
        assert!(app.log_folder().starts_with(app.base_folder()));
    }
}
