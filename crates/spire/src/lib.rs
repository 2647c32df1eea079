//! # Spire
//!
//! A small HTTP framework built around a routing trie, a cooperative
//! middleware chain and a string-keyed service container.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────┐     ┌───────────────────────────────┐
//! │ Application │────▶│   Core   │────▶│ GET  tree ──▶ [mw, mw, handler] │
//! │ (axum host) │     │          │────▶│ POST tree ──▶ [mw, handler]     │
//! └─────────────┘     └──────────┘     └───────────────────────────────┘
//!        │                  │
//!        ▼                  ▼
//!   config + logging    Container ──▶ app / config / log / your services
//! ```
//!
//! - **Core**: owns one routing tree per method and the global middleware
//! - **Context**: one per request; handlers call `ctx.next()` to continue
//! - **Container**: providers bound by key, resolved lazily or eagerly
//! - **Application**: loads `spire.toml`, binds the built-in services, serves
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use spire::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> RuntimeResult<()> {
//!     let mut app = Application::builder().build()?;
//!     let core = app.core_mut();
//!     core.use_middleware([recovery(), cost()]);
//!
//!     let mut api = core.group("/api");
//!     api.get("/user/:id", vec![handler_fn(|ctx| Box::pin(async move {
//!         let log = ctx.make_as::<dyn Log>(LOG_KEY)?;
//!         let id = ctx.param("id").unwrap_or_default().to_string();
//!         log.info("user lookup", fields! { "id" => id.clone() });
//!         ctx.json(&id);
//!         Ok(())
//!     }))]);
//!
//!     app.run().await
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config`: read `spire.toml` / `config.toml` (default)
//! - `yaml-config`: also read `spire.yaml` / `config.yaml`
//! - `json-log`: allow `format = "json"` for the process logger

pub use spire_core as core;
pub use spire_runtime as runtime;

pub use spire_core::{
    BoxFuture, BoxedHandler, Container, ContainerError, Context, Core, Group, Handler,
    HandlerError, HandlerResult, RouteError, Service, ServiceParams, ServiceProvider,
};
pub use spire_runtime::{Application, RuntimeError, RuntimeResult, fields};

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use spire::prelude::*;
/// ```
pub mod prelude {
    // Dispatch
    pub use spire_core::middleware::{cost, recovery};
    pub use spire_core::{
        BoxFuture, BoxedHandler, Context, Core, Group, Handler, HandlerError, HandlerResult,
        handler_fn, into_handler,
    };

    // Services
    pub use spire_core::{
        BindPolicy, Container, ContainerError, FactoryProvider, Lifetime, Service, ServiceParams,
        ServiceProvider,
    };

    // Runtime
    pub use spire_runtime::prelude::*;
    pub use spire_runtime::{Application, ApplicationBuilder, HttpServer};
}

#[cfg(test)]
mod tests {
    use crate::runtime::ConfigLoader;

    #[cfg(feature = "toml-config")]
    #[test]
    fn default_features_read_toml_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("spire.toml"), "[server]\nport = 9321\n").unwrap();

        let config = ConfigLoader::new()
            .without_env()
            .search_path(dir.path())
            .load()
            .unwrap();
        assert_eq!(config.server.port, 9321);
    }
}
