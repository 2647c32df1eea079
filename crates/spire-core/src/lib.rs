//! # Spire Core
//!
//! The request-dispatch core of the Spire HTTP framework.
//!
//! This layer provides:
//! - A per-method routing trie with literal, parameter and catch-all segments
//! - A per-request [`Context`] driving a cooperative middleware chain
//! - A string-keyed service [`Container`] with singleton/transient lifetimes
//! - The [`Core`] dispatcher tying them together
//!
//! ```text
//! request ──▶ Core ──▶ Tree[method].find(path) ──▶ Context { handlers, params }
//!                                                        │
//!                       ┌────────────────────────────────┘
//!                       ▼
//!            middleware ─▶ middleware ─▶ handler      (each calls ctx.next())
//!                       │
//!                       └──▶ Container::make("log") ──▶ Service
//! ```
//!
//! Hosting, configuration and the built-in services live in `spire-runtime`.

pub mod container;
pub mod context;
pub mod core;
pub mod error;
pub mod middleware;
pub mod tree;

pub use container::{
    BindPolicy, Container, FactoryProvider, Lifetime, Service, ServiceParams, ServiceProvider,
};
pub use context::{BoxedHandler, Context, Handler, handler_fn, into_handler};
pub use crate::core::{Core, Group};
pub use error::{
    BoxError, ContainerError, ContainerResult, HandlerError, HandlerResult, RouteError,
    RouteResult,
};
pub use tree::{Node, Params, RouteMatch, Tree};

pub use futures::future::BoxFuture;
