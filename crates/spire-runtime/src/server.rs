//! HTTP hosting.
//!
//! Hosts a [`Core`] on axum. Every request, whatever its method or path,
//! goes to a single fallback handler which buffers the body and hands the
//! request to [`Core::serve`]. Routing stays entirely in the core.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, State};
use axum::response::Response;
use bytes::Bytes;
use http::request::Parts;
use http::Request;
use spire_core::Core;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::error::{RuntimeError, RuntimeResult};

/// An HTTP server for a fully registered [`Core`].
#[derive(Debug)]
pub struct HttpServer {
    core: Arc<Core>,
    config: ServerConfig,
}

impl HttpServer {
    /// Freezes `core`; no routes can be added afterwards.
    pub fn new(core: Core, config: ServerConfig) -> Self {
        Self {
            core: Arc::new(core),
            config,
        }
    }

    /// The hosted dispatcher.
    pub fn core(&self) -> &Arc<Core> {
        &self.core
    }

    /// The axum router forwarding everything to the core.
    pub fn router(&self) -> Router {
        Router::new()
            .fallback(dispatch)
            .layer(DefaultBodyLimit::max(self.config.body_limit))
            .with_state(Arc::clone(&self.core))
    }

    /// Binds the configured address.
    pub async fn bind(self) -> RuntimeResult<BoundServer> {
        let listener = TcpListener::bind(self.config.bind_target())
            .await
            .map_err(|source| RuntimeError::Bind {
                address: self.config.address(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(BoundServer {
            router: self.router(),
            listener,
            local_addr,
        })
    }

    /// Binds and serves until Ctrl+C or SIGTERM.
    pub async fn run(self) -> RuntimeResult<()> {
        self.bind().await?.serve_with_shutdown(wait_for_shutdown()).await
    }
}

/// A server whose listener is bound but not yet accepting.
#[derive(Debug)]
pub struct BoundServer {
    router: Router,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl BoundServer {
    /// The address actually bound, useful with port `0`.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves until `shutdown` completes, then drains in-flight requests.
    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!(addr = %self.local_addr, "HTTP server listening");
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;
        info!("HTTP server stopped");
        Ok(())
    }
}

async fn dispatch(State(core): State<Arc<Core>>, parts: Parts, body: Bytes) -> Response {
    let request = Request::from_parts(parts, body);
    core.serve(request).await.map(Body::from)
}

/// Waits for Ctrl+C, or SIGTERM on unix.
pub async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
                return;
            }
            Err(err) => error!(error = %err, "Failed to register SIGTERM handler"),
        }
    }

    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(err) => error!(error = %err, "Failed to listen for Ctrl+C"),
    }
}
