//! # Spire Runtime
//!
//! Everything around the dispatch core needed to run a Spire application:
//!
//! - Layered configuration (`spire.toml`, `SPIRE_*` environment, overrides)
//! - `tracing` subscriber setup, optionally writing to a file
//! - The built-in `app`, `config` and `log` services
//! - Hosting a [`spire_core::Core`] on axum with graceful shutdown
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use spire_core::handler_fn;
//! use spire_runtime::Application;
//!
//! #[tokio::main]
//! async fn main() -> spire_runtime::RuntimeResult<()> {
//!     let mut app = Application::builder().build()?;
//!     app.core_mut().get("/hello/:name", vec![handler_fn(|ctx| Box::pin(async move {
//!         let name = ctx.param("name").unwrap_or("world").to_string();
//!         ctx.text(format!("hello {name}"));
//!         Ok(())
//!     }))]);
//!     app.run().await
//! }
//! ```
//!
//! # Configuration
//!
//! ```toml
//! [app]
//! name = "blog"
//!
//! [server]
//! port = 8080
//!
//! [logging]
//! level = "debug"
//!
//! [log]
//! level = "info"
//! formatter = "json"
//! ```
//!
//! The `[logging]` table drives the process-wide `tracing` subscriber; the
//! `[log]` table configures the `log` service handlers resolve from the
//! container.

pub mod application;
pub mod config;
pub mod contract;
pub mod error;
pub mod logging;
pub mod provider;
pub mod server;

// Re-exports
pub use application::{Application, ApplicationBuilder};
pub use config::{ConfigError, ConfigLoader, ConfigResult, LoadedConfig, Profile, SpireConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, LoggingGuard};
pub use server::{BoundServer, HttpServer};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

#[doc(hidden)]
pub mod __private {
    pub use serde_json;
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::contract::{
        APP_KEY, App, CONFIG_KEY, Config, Fields, LOG_KEY, Log, LogLevel,
    };
    pub use crate::fields;
    pub use crate::{Application, RuntimeError, RuntimeResult};
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
