//! Application bootstrap.
//!
//! [`Application`] loads configuration, installs logging, prepares a
//! [`Container`] with the built-in services and hands out the [`Core`] for
//! route registration. [`Application::run`] then freezes the core and hosts
//! it until a shutdown signal arrives.
//!
//! ```rust,ignore
//! let mut app = Application::builder().profile("production").build()?;
//! app.core_mut().get("/health", vec![handler_fn(|ctx| Box::pin(async move {
//!     ctx.json(&"ok");
//!     Ok(())
//! }))]);
//! app.run().await?;
//! ```

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use spire_core::{BindPolicy, Container, ContainerResult, Core, ServiceProvider};
use tracing::info;

use crate::config::{ConfigLoader, LoadedConfig, Profile, SpireConfig};
use crate::error::RuntimeResult;
use crate::logging::{self, LoggingGuard};
use crate::provider::{AppProvider, ConfigProvider, LogProvider};
use crate::server::{HttpServer, wait_for_shutdown};

type Registration = Box<dyn FnOnce(&Container) -> ContainerResult<()> + Send>;

/// A configured application ready for route registration.
pub struct Application {
    loaded: LoadedConfig,
    container: Arc<Container>,
    core: Core,
    logging: LoggingGuard,
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("name", &self.loaded.config.app.name)
            .field("profile", &self.loaded.profile)
            .field("services", &self.container.keys())
            .field("routes", &self.core.routes().len())
            .finish()
    }
}

impl Application {
    /// Creates an application builder.
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::new()
    }

    /// The typed configuration.
    pub fn config(&self) -> &SpireConfig {
        &self.loaded.config
    }

    /// The merged configuration tree behind the `config` service.
    pub fn raw_config(&self) -> &Value {
        &self.loaded.raw
    }

    pub fn profile(&self) -> &Profile {
        &self.loaded.profile
    }

    /// The root container shared by every request.
    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    pub fn core(&self) -> &Core {
        &self.core
    }

    /// The dispatcher, for registering routes and middleware.
    pub fn core_mut(&mut self) -> &mut Core {
        &mut self.core
    }

    /// Hosts the application until Ctrl+C or SIGTERM.
    pub async fn run(self) -> RuntimeResult<()> {
        self.run_until(wait_for_shutdown()).await
    }

    /// Hosts the application until `shutdown` completes.
    pub async fn run_until<F>(self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Application {
            loaded,
            core,
            logging,
            ..
        } = self;

        core.log_routes();
        info!(
            app = %loaded.config.app.name,
            profile = %loaded.profile.as_str(),
            "Spire application starting"
        );

        let server = HttpServer::new(core, loaded.config.server.clone());
        let result = server.bind().await?.serve_with_shutdown(shutdown).await;

        info!("Spire application stopped");
        drop(logging);
        result
    }
}

/// Builder for an [`Application`].
pub struct ApplicationBuilder {
    config_loader: ConfigLoader,
    providers: Vec<Registration>,
}

impl ApplicationBuilder {
    /// Creates a builder searching the current directory for config files.
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
            providers: Vec::new(),
        }
    }

    /// Loads this file instead of searching.
    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g., "development", "production").
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    /// Disables `SPIRE_*` environment overrides.
    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges a typed configuration over the file sources.
    pub fn merge(mut self, config: SpireConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Overrides a single dotted key, e.g. `set("server.port", 0)`.
    pub fn set<V: serde::Serialize>(mut self, key: &str, value: V) -> Self {
        self.config_loader = self.config_loader.set(key, value);
        self
    }

    /// Binds an additional provider after the built-in ones.
    ///
    /// A provider named `app`, `config` or `log` replaces the built-in
    /// service unless the container is strict.
    pub fn provider<P: ServiceProvider>(mut self, provider: P) -> Self {
        self.providers
            .push(Box::new(move |container: &Container| container.bind(provider)));
        self
    }

    /// Loads configuration, installs logging and binds every provider.
    pub fn build(self) -> RuntimeResult<Application> {
        let loaded = self.config_loader.load_tree()?;
        let logging = logging::init_from_config(&loaded.config.logging);

        let policy = if loaded.config.container.strict_bind {
            BindPolicy::Strict
        } else {
            BindPolicy::Overwrite
        };
        let container = Container::with_policy(policy);
        container.bind(AppProvider::new(loaded.config.app.clone()))?;
        container.bind(ConfigProvider::new(loaded.raw.clone()))?;
        container.bind(LogProvider)?;
        for register in self.providers {
            register(&container)?;
        }

        let container = Arc::new(container);
        info!(
            profile = %loaded.profile.as_str(),
            services = ?container.keys(),
            "Application services bound"
        );

        Ok(Application {
            core: Core::with_container(Arc::clone(&container)),
            container,
            loaded,
            logging,
        })
    }
}

impl Default for ApplicationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{App, Config, LOG_KEY, Log};
    use spire_core::{ContainerError, FactoryProvider, Service};

    fn builder(dir: &Path) -> ApplicationBuilder {
        Application::builder()
            .without_env()
            .search_path(dir)
            .set("app.name", "blog")
            .set("app.base_folder", dir.to_string_lossy().into_owned())
            .set("server.host", "127.0.0.1")
            .set("server.port", 0)
    }

    #[test]
    fn binds_builtin_services() {
        let dir = tempfile::tempdir().unwrap();
        let app = builder(dir.path()).set("log.level", "warn").build().unwrap();

        let container = app.container();
        assert!(container.is_bind("app"));
        assert!(container.is_bind("config"));
        assert!(container.is_bind(LOG_KEY));
        assert_eq!(container.policy(), BindPolicy::Overwrite);

        let identity = container.make_as::<dyn App>("app").unwrap();
        assert_eq!(identity.name(), "blog");
        assert_eq!(identity.log_folder(), dir.path().join("storage/log"));

        let config = container.make_as::<dyn Config>("config").unwrap();
        assert_eq!(config.get_string("log.level").as_deref(), Some("warn"));
        assert_eq!(config.get_int("server.port"), Some(0));

        let log = container.make_as::<dyn Log>(LOG_KEY).unwrap();
        log.error("disk full", crate::fields! { "free" => 0 });
        let written = std::fs::read_to_string(dir.path().join("storage/log/.log")).unwrap();
        assert!(written.contains("disk full"));
    }

    #[test]
    fn user_providers_bind_after_builtins() {
        let dir = tempfile::tempdir().unwrap();
        let app = builder(dir.path())
            .provider(FactoryProvider::singleton("greeting", |_, _| {
                Ok(Service::from_value("hello".to_string()))
            }))
            .build()
            .unwrap();

        let greeting = app.container().make_as::<String>("greeting").unwrap();
        assert_eq!(greeting.as_str(), "hello");
    }

    #[test]
    fn strict_bind_rejects_builtin_override() {
        let dir = tempfile::tempdir().unwrap();
        let err = builder(dir.path())
            .set("container.strict_bind", true)
            .provider(FactoryProvider::singleton("log", |_, _| {
                Ok(Service::from_value(()))
            }))
            .build()
            .unwrap_err();

        assert!(matches!(
            err,
            crate::RuntimeError::Container(ContainerError::AlreadyBound(_))
        ));
    }

    #[tokio::test]
    async fn run_until_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let app = builder(dir.path()).build().unwrap();
        assert_eq!(app.core().routes().len(), 0);

        app.run_until(async {}).await.unwrap();
    }
}
