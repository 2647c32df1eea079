//! Per-request context and the cooperative middleware chain.
//!
//! A [`Context`] is created for every dispatched request. It carries:
//!
//! - the request (method, path, headers, query, body) and route params;
//! - the response being built (status, headers, body);
//! - the matched handler chain with its cursor;
//! - a typed value bag for handlers to share data;
//! - a handle to the application [`Container`].
//!
//! # The chain
//!
//! The dispatcher calls [`Context::next`] once. Each handler decides whether
//! the rest of the chain runs by awaiting `ctx.next()` itself:
//!
//! ```rust,ignore
//! fn timing(ctx: &mut Context) -> BoxFuture<'_, HandlerResult> {
//!     Box::pin(async move {
//!         let start = Instant::now();
//!         ctx.next().await?;             // run everything downstream
//!         debug!(elapsed = ?start.elapsed());
//!         Ok(())
//!     })
//! }
//! ```
//!
//! A handler that returns without calling `next` short-circuits the chain.
//! Calling `next` past the end is a no-op.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::{Method, Request, Response, StatusCode, Uri};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::error;

use crate::container::{Container, Service, ServiceParams};
use crate::error::{ContainerResult, HandlerResult};
use crate::tree::Params;

// =============================================================================
// Handlers
// =============================================================================

/// A unit of request processing: an endpoint or a middleware.
///
/// Plain functions with the signature
/// `fn(&mut Context) -> BoxFuture<'_, HandlerResult>` implement this trait
/// automatically. Types that carry configuration implement it directly.
pub trait Handler: Send + Sync + 'static {
    /// Processes the request.
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, HandlerResult>;
}

impl<F> Handler for F
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
{
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, HandlerResult> {
        (self)(ctx)
    }
}

/// A shared, type-erased handler.
pub type BoxedHandler = Arc<dyn Handler>;

/// Erases a handler type.
pub fn into_handler<H: Handler>(handler: H) -> BoxedHandler {
    Arc::new(handler)
}

/// Erases a closure handler.
///
/// Unlike [`into_handler`], this pins the closure signature so that the
/// borrow of the context in the returned future is inferred:
///
/// ```rust,ignore
/// let hello = handler_fn(|ctx| Box::pin(async move {
///     ctx.text("hello");
///     Ok(())
/// }));
/// ```
pub fn handler_fn<F>(f: F) -> BoxedHandler
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
{
    Arc::new(f)
}

// =============================================================================
// Context
// =============================================================================

/// State for one request as it travels down the handler chain.
pub struct Context {
    // Request
    method: Method,
    uri: Uri,
    request_headers: HeaderMap,
    request_body: Bytes,
    params: Params,

    // Response
    status: StatusCode,
    response_headers: HeaderMap,
    response_body: Bytes,

    // Chain
    handlers: Vec<BoxedHandler>,
    /// Position of the next handler to run.
    index: usize,
    aborted: bool,

    values: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    container: Arc<Container>,
}

impl Context {
    /// Creates a context for `request` with an empty chain.
    pub fn new(request: Request<Bytes>, container: Arc<Container>) -> Self {
        let (parts, body) = request.into_parts();
        Self {
            method: parts.method,
            uri: parts.uri,
            request_headers: parts.headers,
            request_body: body,
            params: Params::new(),
            status: StatusCode::OK,
            response_headers: HeaderMap::new(),
            response_body: Bytes::new(),
            handlers: Vec::new(),
            index: 0,
            aborted: false,
            values: HashMap::new(),
            container,
        }
    }

    // -------------------------------------------------------------------------
    // Chain
    // -------------------------------------------------------------------------

    /// Installs the handler chain and resets the cursor.
    pub fn set_handlers(&mut self, handlers: Vec<BoxedHandler>) {
        self.handlers = handlers;
        self.index = 0;
    }

    /// Installs the route bindings.
    pub fn set_params(&mut self, params: Params) {
        self.params = params;
    }

    /// Runs the next handler in the chain and everything it continues into.
    ///
    /// The first error aborts the remainder and propagates to the caller.
    /// Past the end of the chain, or after [`abort`](Self::abort), this
    /// returns `Ok(())` without doing anything.
    pub fn next(&mut self) -> BoxFuture<'_, HandlerResult> {
        Box::pin(async move {
            if self.aborted {
                return Ok(());
            }
            let Some(handler) = self.handlers.get(self.index).cloned() else {
                return Ok(());
            };
            self.index += 1;
            handler.call(self).await
        })
    }

    /// Prevents any handler after the current one from running.
    pub fn abort(&mut self) {
        self.aborted = true;
    }

    /// Returns `true` if [`abort`](Self::abort) was called.
    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    // -------------------------------------------------------------------------
    // Request
    // -------------------------------------------------------------------------

    /// The request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request path, without the query string.
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// The full request URI.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// All request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.request_headers
    }

    /// A request header as a string, if present and visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.request_headers
            .get(name)
            .and_then(|value| value.to_str().ok())
    }

    /// The first value of a URL-decoded query parameter.
    pub fn query(&self, name: &str) -> Option<String> {
        let query = self.uri.query()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    /// All URL-decoded query parameters, in order.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.uri
            .query()
            .map(|query| {
                url::form_urlencoded::parse(query.as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The raw request body.
    pub fn body(&self) -> &Bytes {
        &self.request_body
    }

    /// Deserializes the request body as JSON.
    pub fn bind_json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.request_body)
    }

    /// A route binding captured by `:name` or `*name`.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// All route bindings.
    pub fn params(&self) -> &Params {
        &self.params
    }

    // -------------------------------------------------------------------------
    // Response
    // -------------------------------------------------------------------------

    /// Sets the response status.
    pub fn set_status(&mut self, status: StatusCode) -> &mut Self {
        self.status = status;
        self
    }

    /// The response status written so far.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Sets a response header, replacing earlier values.
    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) -> &mut Self {
        self.response_headers.insert(name, value);
        self
    }

    /// Response headers written so far.
    pub fn response_headers(&self) -> &HeaderMap {
        &self.response_headers
    }

    /// Response body written so far.
    pub fn response_body(&self) -> &Bytes {
        &self.response_body
    }

    /// Writes `value` as a JSON body.
    ///
    /// A value that fails to serialize is logged and answered with a bare
    /// 500.
    pub fn json<T: Serialize + ?Sized>(&mut self, value: &T) -> &mut Self {
        match serde_json::to_vec(value) {
            Ok(body) => self.write(
                body.into(),
                HeaderValue::from_static("application/json"),
            ),
            Err(err) => {
                error!(error = %err, path = %self.uri.path(), "Failed to serialize response body");
                self.status = StatusCode::INTERNAL_SERVER_ERROR;
                self.response_headers.remove(header::CONTENT_TYPE);
                self.response_body = Bytes::new();
                self
            }
        }
    }

    /// Writes a plain-text body.
    pub fn text(&mut self, body: impl Into<String>) -> &mut Self {
        let body: String = body.into();
        self.write(
            body.into(),
            HeaderValue::from_static("text/plain; charset=utf-8"),
        )
    }

    /// Writes an HTML body.
    pub fn html(&mut self, body: impl Into<String>) -> &mut Self {
        let body: String = body.into();
        self.write(
            body.into(),
            HeaderValue::from_static("text/html; charset=utf-8"),
        )
    }

    fn write(&mut self, body: Bytes, content_type: HeaderValue) -> &mut Self {
        self.response_headers.insert(header::CONTENT_TYPE, content_type);
        self.response_body = body;
        self
    }

    /// Consumes the context into the response built so far.
    pub fn into_response(self) -> Response<Bytes> {
        let mut response = Response::new(self.response_body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.response_headers;
        response
    }

    // -------------------------------------------------------------------------
    // Values
    // -------------------------------------------------------------------------

    /// Stores a value for later handlers, replacing any of the same type.
    pub fn set_value<T: Send + Sync + 'static>(&mut self, value: T) {
        self.values.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// A value stored by an earlier handler.
    pub fn get_value<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    /// Removes and returns a stored value.
    pub fn take_value<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.values
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }

    // -------------------------------------------------------------------------
    // Container
    // -------------------------------------------------------------------------

    /// The application container.
    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    /// Shorthand for [`Container::make`].
    pub fn make(&self, key: &str) -> ContainerResult<Service> {
        self.container.make(key)
    }

    /// Shorthand for [`Container::make_as`].
    pub fn make_as<T: ?Sized + 'static>(&self, key: &str) -> ContainerResult<Arc<T>> {
        self.container.make_as::<T>(key)
    }

    /// Shorthand for [`Container::must_make`].
    pub fn must_make(&self, key: &str) -> Service {
        self.container.must_make(key)
    }

    /// Shorthand for [`Container::make_new`].
    pub fn make_new(&self, key: &str, params: ServiceParams) -> ContainerResult<Service> {
        self.container.make_new(key, params)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("params", &self.params)
            .field("status", &self.status)
            .field("chain_len", &self.handlers.len())
            .field("index", &self.index)
            .field("aborted", &self.aborted)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use parking_lot::Mutex;

    fn context(uri: &str) -> Context {
        let request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .header("x-request-id", "abc")
            .body(Bytes::from_static(br#"{"name":"spire"}"#))
            .unwrap();
        Context::new(request, Arc::new(Container::new()))
    }

    fn recorder(trace: &Arc<Mutex<Vec<&'static str>>>, before: &'static str, after: &'static str) -> BoxedHandler {
        let trace = Arc::clone(trace);
        handler_fn(move |ctx| {
            let trace = Arc::clone(&trace);
            Box::pin(async move {
                trace.lock().push(before);
                ctx.next().await?;
                trace.lock().push(after);
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn chain_runs_in_onion_order() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let mut ctx = context("/");
        ctx.set_handlers(vec![
            recorder(&trace, "a:in", "a:out"),
            recorder(&trace, "b:in", "b:out"),
            recorder(&trace, "c:in", "c:out"),
        ]);

        ctx.next().await.unwrap();

        assert_eq!(
            *trace.lock(),
            ["a:in", "b:in", "c:in", "c:out", "b:out", "a:out"]
        );
    }

    #[tokio::test]
    async fn handler_that_skips_next_short_circuits() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let stop = handler_fn(|ctx| {
            Box::pin(async move {
                ctx.set_status(StatusCode::UNAUTHORIZED);
                Ok(())
            })
        });
        let mut ctx = context("/");
        ctx.set_handlers(vec![stop, recorder(&trace, "never", "never")]);

        ctx.next().await.unwrap();

        assert!(trace.lock().is_empty());
        assert_eq!(ctx.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn next_past_the_end_is_a_no_op() {
        let mut ctx = context("/");
        ctx.set_handlers(vec![handler_fn(|ctx| {
            Box::pin(async move {
                ctx.next().await?;
                ctx.next().await?;
                ctx.text("done");
                Ok(())
            })
        })]);

        ctx.next().await.unwrap();
        ctx.next().await.unwrap();
        assert_eq!(ctx.response_body(), "done");
    }

    #[tokio::test]
    async fn error_stops_the_remainder() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let fail = handler_fn(|_| Box::pin(async move { Err(HandlerError::msg("boom")) }));
        let mut ctx = context("/");
        ctx.set_handlers(vec![
            recorder(&trace, "a:in", "a:out"),
            fail,
            recorder(&trace, "never", "never"),
        ]);

        let err = ctx.next().await.unwrap_err();

        assert_eq!(err.to_string(), "boom");
        assert_eq!(*trace.lock(), ["a:in"]);
    }

    #[tokio::test]
    async fn abort_skips_downstream_handlers() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let guard = handler_fn(|ctx| {
            Box::pin(async move {
                ctx.abort();
                ctx.next().await
            })
        });
        let mut ctx = context("/");
        ctx.set_handlers(vec![guard, recorder(&trace, "never", "never")]);

        ctx.next().await.unwrap();
        assert!(ctx.is_aborted());
        assert!(trace.lock().is_empty());
    }

    #[test]
    fn reads_request_parts() {
        let mut ctx = context("/users/7?name=J%C3%BCrgen&tag=a+b&tag=c");
        ctx.set_params(Params::from([("id".to_string(), "7".to_string())]));

        assert_eq!(ctx.path(), "/users/7");
        assert_eq!(ctx.header("x-request-id"), Some("abc"));
        assert_eq!(ctx.query("name").as_deref(), Some("Jürgen"));
        assert_eq!(ctx.query("tag").as_deref(), Some("a b"));
        assert_eq!(ctx.query("missing"), None);
        assert_eq!(ctx.query_pairs().len(), 3);
        assert_eq!(ctx.param("id"), Some("7"));

        #[derive(serde::Deserialize)]
        struct Body {
            name: String,
        }
        assert_eq!(ctx.bind_json::<Body>().unwrap().name, "spire");
    }

    #[test]
    fn last_write_wins() {
        let mut ctx = context("/");
        ctx.text("first").set_status(StatusCode::CREATED);
        ctx.json(&serde_json::json!({ "ok": true }));

        let response = ctx.into_response();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json"
        );
        assert_eq!(response.body(), r#"{"ok":true}"#);
    }

    #[test]
    fn unserializable_json_becomes_500() {
        struct Broken;
        impl Serialize for Broken {
            fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
                Err(serde::ser::Error::custom("nope"))
            }
        }

        let mut ctx = context("/");
        ctx.json(&Broken);
        assert_eq!(ctx.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(ctx.response_body().is_empty());
    }

    #[test]
    fn value_bag_is_typed() {
        #[derive(Debug, PartialEq)]
        struct UserId(u64);

        let mut ctx = context("/");
        ctx.set_value(UserId(9));
        ctx.set_value("trace");

        assert_eq!(ctx.get_value::<UserId>(), Some(&UserId(9)));
        assert_eq!(ctx.get_value::<&str>(), Some(&"trace"));
        assert_eq!(ctx.take_value::<UserId>(), Some(UserId(9)));
        assert_eq!(ctx.get_value::<UserId>(), None);
    }
}
