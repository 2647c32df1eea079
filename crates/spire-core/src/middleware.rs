//! Built-in middleware.

use std::panic::AssertUnwindSafe;
use std::time::Instant;

use futures::FutureExt;
use futures::future::BoxFuture;
use http::StatusCode;
use tracing::{error, info, warn};

use crate::context::{BoxedHandler, Context, Handler, into_handler};
use crate::error::{HandlerError, HandlerResult};

/// Converts a panic anywhere downstream into a handler error.
///
/// Install it first so it wraps the whole chain; the dispatcher then answers
/// with its generic 500.
#[derive(Debug, Clone, Copy, Default)]
pub struct Recovery;

impl Handler for Recovery {
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            match AssertUnwindSafe(ctx.next()).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!(path = %ctx.path(), panic = %message, "Handler panicked");
                    ctx.set_status(StatusCode::INTERNAL_SERVER_ERROR);
                    Err(HandlerError::msg(format!("handler panicked: {message}")))
                }
            }
        })
    }
}

/// Shorthand for `into_handler(Recovery)`.
pub fn recovery() -> BoxedHandler {
    into_handler(Recovery)
}

/// Logs method, path, status and elapsed time of every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cost;

impl Handler for Cost {
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            let start = Instant::now();
            let result = ctx.next().await;
            let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

            match &result {
                Ok(()) => info!(
                    method = %ctx.method(),
                    path = %ctx.path(),
                    status = ctx.status().as_u16(),
                    elapsed_ms,
                    "Request completed"
                ),
                Err(err) => warn!(
                    method = %ctx.method(),
                    path = %ctx.path(),
                    elapsed_ms,
                    error = %err,
                    "Request failed"
                ),
            }
            result
        })
    }
}

/// Shorthand for `into_handler(Cost)`.
pub fn cost() -> BoxedHandler {
    into_handler(Cost)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Container;
    use crate::context::handler_fn;
    use bytes::Bytes;
    use http::Request;
    use std::sync::Arc;

    fn context() -> Context {
        let request = Request::builder().uri("/boom").body(Bytes::new()).unwrap();
        Context::new(request, Arc::new(Container::new()))
    }

    #[tokio::test]
    async fn recovery_turns_panic_into_error() {
        let mut ctx = context();
        ctx.set_handlers(vec![
            recovery(),
            handler_fn(|_| {
                Box::pin(async move {
                    let items: Vec<u8> = Vec::new();
                    let _ = items[3];
                    Ok(())
                })
            }),
        ]);

        let err = ctx.next().await.unwrap_err();
        assert!(err.to_string().starts_with("handler panicked: index out of bounds"));
        assert_eq!(ctx.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn cost_is_transparent() {
        let mut ctx = context();
        ctx.set_handlers(vec![
            cost(),
            handler_fn(|ctx| {
                Box::pin(async move {
                    ctx.set_status(StatusCode::ACCEPTED);
                    Ok(())
                })
            }),
        ]);

        ctx.next().await.unwrap();
        assert_eq!(ctx.status(), StatusCode::ACCEPTED);
    }
}
