//! The top-level dispatcher.
//!
//! [`Core`] owns one routing [`Tree`] per routable method, the global
//! middleware list and the root [`Container`]. Routes are registered during
//! setup; afterwards `Core` is shared immutably and [`Core::serve`] is called
//! once per request.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use http::{Method, Request, Response, StatusCode};
use percent_encoding::percent_decode_str;
use tracing::{debug, error, info, trace};

use crate::container::{Container, Service, ServiceParams, ServiceProvider};
use crate::context::{BoxedHandler, Context};
use crate::error::{ContainerResult, RouteError, RouteResult};
use crate::tree::{RouteMatch, Tree};

/// Methods that get a routing tree.
const ROUTABLE_METHODS: [Method; 4] = [Method::GET, Method::POST, Method::PUT, Method::DELETE];

/// Joins a group prefix and a route path with exactly one separator.
fn join_path(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let path = path.trim_matches('/');
    match (prefix.is_empty(), path.is_empty()) {
        (true, _) => format!("/{path}"),
        (false, true) => prefix.to_string(),
        (false, false) => format!("{prefix}/{path}"),
    }
}

/// Routes requests to handler chains.
pub struct Core {
    router: HashMap<String, Tree<BoxedHandler>>,
    middlewares: Vec<BoxedHandler>,
    container: Arc<Container>,
}

impl Default for Core {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Core {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Core")
            .field("routes", &self.routes())
            .field("middlewares", &self.middlewares.len())
            .field("container", &self.container)
            .finish()
    }
}

impl Core {
    /// Creates a dispatcher with empty trees and a fresh container.
    pub fn new() -> Self {
        Self::with_container(Arc::new(Container::new()))
    }

    /// Creates a dispatcher around an existing container.
    pub fn with_container(container: Arc<Container>) -> Self {
        let router = ROUTABLE_METHODS
            .iter()
            .map(|method| (method.as_str().to_string(), Tree::new()))
            .collect();
        Self {
            router,
            middlewares: Vec::new(),
            container,
        }
    }

    /// Replaces the root container.
    pub fn set_container(&mut self, container: Arc<Container>) {
        self.container = container;
    }

    /// The root container.
    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    // -------------------------------------------------------------------------
    // Registration
    // -------------------------------------------------------------------------

    /// Appends global middleware.
    ///
    /// Global middleware is copied into each route's chain when the route is
    /// registered, so it only applies to routes registered afterwards.
    pub fn use_middleware(&mut self, middlewares: impl IntoIterator<Item = BoxedHandler>) {
        self.middlewares.extend(middlewares);
    }

    /// Registers `handlers` for `method` and `path`, behind the global
    /// middleware.
    ///
    /// # Errors
    ///
    /// [`RouteError::UnsupportedMethod`] if `method` has no tree, otherwise
    /// any error of [`Tree::add_router`].
    pub fn add_route(
        &mut self,
        method: &str,
        path: &str,
        handlers: Vec<BoxedHandler>,
    ) -> RouteResult<()> {
        self.add_route_with(method, path, &[], handlers)
    }

    fn add_route_with(
        &mut self,
        method: &str,
        path: &str,
        scoped: &[BoxedHandler],
        handlers: Vec<BoxedHandler>,
    ) -> RouteResult<()> {
        if handlers.is_empty() {
            return Err(RouteError::EmptyChain {
                pattern: path.to_string(),
            });
        }

        let upper = method.to_ascii_uppercase();
        let tree = self
            .router
            .get_mut(&upper)
            .ok_or_else(|| RouteError::UnsupportedMethod(method.to_string()))?;

        let chain: Vec<BoxedHandler> = self
            .middlewares
            .iter()
            .chain(scoped)
            .cloned()
            .chain(handlers)
            .collect();
        let chain_len = chain.len();

        tree.add_router(path, chain)?;
        debug!(method = %upper, path, chain_len, "Route registered");
        Ok(())
    }

    fn register_or_panic(&mut self, method: Method, path: &str, handlers: Vec<BoxedHandler>) {
        if let Err(err) = self.add_route(method.as_str(), path, handlers) {
            error!(method = %method, path, error = %err, "Route registration failed");
            panic!("failed to register {method} {path}: {err}");
        }
    }

    /// Registers a `GET` route.
    ///
    /// # Panics
    ///
    /// Panics on a malformed or duplicate pattern; see [`add_route`](Self::add_route)
    /// for the fallible form.
    pub fn get(&mut self, path: &str, handlers: Vec<BoxedHandler>) {
        self.register_or_panic(Method::GET, path, handlers);
    }

    /// Registers a `POST` route. Panics like [`get`](Self::get).
    pub fn post(&mut self, path: &str, handlers: Vec<BoxedHandler>) {
        self.register_or_panic(Method::POST, path, handlers);
    }

    /// Registers a `PUT` route. Panics like [`get`](Self::get).
    pub fn put(&mut self, path: &str, handlers: Vec<BoxedHandler>) {
        self.register_or_panic(Method::PUT, path, handlers);
    }

    /// Registers a `DELETE` route. Panics like [`get`](Self::get).
    pub fn delete(&mut self, path: &str, handlers: Vec<BoxedHandler>) {
        self.register_or_panic(Method::DELETE, path, handlers);
    }

    /// Starts a group of routes sharing `prefix`.
    pub fn group(&mut self, prefix: &str) -> Group<'_> {
        Group {
            core: self,
            prefix: join_path("", prefix),
            middlewares: Vec::new(),
        }
    }

    /// Every registered route as `(method, pattern)`, sorted.
    pub fn routes(&self) -> Vec<(String, String)> {
        let mut routes: Vec<(String, String)> = self
            .router
            .iter()
            .flat_map(|(method, tree)| {
                tree.routes()
                    .into_iter()
                    .map(move |pattern| (method.clone(), pattern.to_string()))
            })
            .collect();
        routes.sort();
        routes
    }

    /// Logs the route table at `info` level.
    pub fn log_routes(&self) {
        for (method, pattern) in self.routes() {
            info!(method = %method, pattern = %pattern, "Route");
        }
    }

    // -------------------------------------------------------------------------
    // Dispatch
    // -------------------------------------------------------------------------

    /// Finds the route for `method` (any case) and `path`.
    pub fn find_route_node(&self, method: &str, path: &str) -> Option<RouteMatch<'_, BoxedHandler>> {
        self.router
            .get(&method.to_ascii_uppercase())
            .and_then(|tree| tree.find(path))
    }

    /// Dispatches one request.
    ///
    /// The path is percent-decoded before matching, so parameters bind
    /// decoded text.
    ///
    /// - No tree for the method, or no matching route: `404`.
    /// - The chain returns an error: `500`. The error is logged and its
    ///   detail is not sent to the client.
    /// - Otherwise the response is whatever the chain wrote.
    pub async fn serve(&self, request: Request<Bytes>) -> Response<Bytes> {
        let method = request.method().as_str().to_string();
        let decoded = percent_decode_str(request.uri().path())
            .decode_utf8()
            .map(Cow::into_owned);
        let mut ctx = Context::new(request, Arc::clone(&self.container));

        let path = match decoded {
            Ok(path) => path,
            Err(err) => {
                debug!(method = %method, path = %ctx.path(), error = %err, "Path is not UTF-8");
                ctx.set_status(StatusCode::NOT_FOUND).json("not found");
                return ctx.into_response();
            }
        };

        let Some(found) = self.find_route_node(&method, &path) else {
            debug!(method = %method, path = %path, "No route matched");
            ctx.set_status(StatusCode::NOT_FOUND).json("not found");
            return ctx.into_response();
        };

        trace!(
            method = %method,
            path = %path,
            pattern = found.node.pattern().unwrap_or_default(),
            "Route matched"
        );
        ctx.set_handlers(found.node.handlers().to_vec());
        ctx.set_params(found.params);

        if let Err(err) = ctx.next().await {
            error!(method = %method, path = %path, error = %err, "Handler chain failed");
            ctx.set_status(StatusCode::INTERNAL_SERVER_ERROR)
                .json("inner error");
        }

        ctx.into_response()
    }

    // -------------------------------------------------------------------------
    // Container
    // -------------------------------------------------------------------------

    /// See [`Container::bind`].
    pub fn bind<P: ServiceProvider>(&self, provider: P) -> ContainerResult<()> {
        self.container.bind(provider)
    }

    /// See [`Container::is_bind`].
    pub fn is_bind(&self, key: &str) -> bool {
        self.container.is_bind(key)
    }

    /// See [`Container::make`].
    pub fn make(&self, key: &str) -> ContainerResult<Service> {
        self.container.make(key)
    }

    /// See [`Container::must_make`].
    pub fn must_make(&self, key: &str) -> Service {
        self.container.must_make(key)
    }

    /// See [`Container::make_new`].
    pub fn make_new(&self, key: &str, params: ServiceParams) -> ContainerResult<Service> {
        self.container.make_new(key, params)
    }
}

/// Routes registered under a shared prefix and middleware.
///
/// Registering through a group is the same as registering on the [`Core`]
/// with the prefix prepended to the path and the group middleware prepended
/// to the handlers.
pub struct Group<'c> {
    core: &'c mut Core,
    prefix: String,
    middlewares: Vec<BoxedHandler>,
}

impl Group<'_> {
    /// The full prefix of this group.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Appends group middleware, applied to routes registered afterwards.
    pub fn use_middleware(&mut self, middlewares: impl IntoIterator<Item = BoxedHandler>) -> &mut Self {
        self.middlewares.extend(middlewares);
        self
    }

    /// Fallible registration, see [`Core::add_route`].
    pub fn add_route(
        &mut self,
        method: &str,
        path: &str,
        handlers: Vec<BoxedHandler>,
    ) -> RouteResult<()> {
        let full = join_path(&self.prefix, path);
        self.core
            .add_route_with(method, &full, &self.middlewares, handlers)
    }

    fn register_or_panic(&mut self, method: Method, path: &str, handlers: Vec<BoxedHandler>) {
        if let Err(err) = self.add_route(method.as_str(), path, handlers) {
            error!(method = %method, prefix = %self.prefix, path, error = %err, "Route registration failed");
            panic!("failed to register {method} {}: {err}", join_path(&self.prefix, path));
        }
    }

    /// Registers a `GET` route. Panics like [`Core::get`].
    pub fn get(&mut self, path: &str, handlers: Vec<BoxedHandler>) -> &mut Self {
        self.register_or_panic(Method::GET, path, handlers);
        self
    }

    /// Registers a `POST` route. Panics like [`Core::get`].
    pub fn post(&mut self, path: &str, handlers: Vec<BoxedHandler>) -> &mut Self {
        self.register_or_panic(Method::POST, path, handlers);
        self
    }

    /// Registers a `PUT` route. Panics like [`Core::get`].
    pub fn put(&mut self, path: &str, handlers: Vec<BoxedHandler>) -> &mut Self {
        self.register_or_panic(Method::PUT, path, handlers);
        self
    }

    /// Registers a `DELETE` route. Panics like [`Core::get`].
    pub fn delete(&mut self, path: &str, handlers: Vec<BoxedHandler>) -> &mut Self {
        self.register_or_panic(Method::DELETE, path, handlers);
        self
    }

    /// A nested group inheriting this group's prefix and middleware.
    pub fn group(&mut self, prefix: &str) -> Group<'_> {
        Group {
            prefix: join_path(&self.prefix, prefix),
            middlewares: self.middlewares.clone(),
            core: &mut *self.core,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::FactoryProvider;
    use crate::context::handler_fn;
    use crate::error::{HandlerError, HandlerResult};
    use futures::future::BoxFuture;
    use parking_lot::Mutex;

    fn reply(body: &'static str) -> BoxedHandler {
        handler_fn(move |ctx| {
            Box::pin(async move {
                let params = ctx.params().clone();
                let mut sorted: Vec<_> = params.into_iter().collect();
                sorted.sort();
                let rendered: Vec<String> = sorted.iter().map(|(k, v)| format!("{k}={v}")).collect();
                ctx.text(format!("{body}|{}", rendered.join(",")));
                Ok(())
            })
        })
    }

    fn fail(_ctx: &mut Context) -> BoxFuture<'_, HandlerResult> {
        Box::pin(async { Err(HandlerError::msg("database is down")) })
    }

    fn pass(ctx: &mut Context) -> BoxFuture<'_, HandlerResult> {
        Box::pin(async move { ctx.next().await })
    }

    fn tag(trace: &Arc<Mutex<Vec<String>>>, name: &'static str) -> BoxedHandler {
        let trace = Arc::clone(trace);
        handler_fn(move |ctx| {
            let trace = Arc::clone(&trace);
            Box::pin(async move {
                trace.lock().push(name.to_string());
                ctx.next().await
            })
        })
    }

    fn request(method: &str, uri: &str) -> Request<Bytes> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Bytes::new())
            .unwrap()
    }

    async fn body_of(core: &Core, method: &str, uri: &str) -> (StatusCode, String) {
        let response = core.serve(request(method, uri)).await;
        let status = response.status();
        let body = String::from_utf8(response.into_body().to_vec()).unwrap();
        (status, body)
    }

    #[tokio::test]
    async fn literal_route_wins_over_param() {
        let mut core = Core::new();
        core.get("/user/:id", vec![reply("by-id")]);
        core.get("/user/list", vec![reply("list")]);

        assert_eq!(body_of(&core, "GET", "/user/list").await, (StatusCode::OK, "list|".into()));
        assert_eq!(body_of(&core, "GET", "/user/9").await, (StatusCode::OK, "by-id|id=9".into()));
    }

    #[tokio::test]
    async fn matches_percent_decoded_paths() {
        let mut core = Core::new();
        core.get("/user/:name", vec![reply("user")]);
        core.get("/hello world", vec![reply("greeting")]);

        assert_eq!(
            body_of(&core, "GET", "/user/J%C3%BCrgen").await,
            (StatusCode::OK, "user|name=Jürgen".into())
        );
        assert_eq!(
            body_of(&core, "GET", "/hello%20world").await,
            (StatusCode::OK, "greeting|".into())
        );
        assert_eq!(
            body_of(&core, "GET", "/user/%FF").await,
            (StatusCode::NOT_FOUND, "\"not found\"".into())
        );
    }

    #[tokio::test]
    async fn extracts_nested_params() {
        let mut core = Core::new();
        core.get("/user/:id/post/:postId", vec![reply("post")]);

        let (status, body) = body_of(&core, "GET", "/user/42/post/7").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "post|id=42,postId=7");
    }

    #[tokio::test]
    async fn method_is_case_insensitive_path_is_not() {
        let mut core = Core::new();
        core.get("/user", vec![reply("user")]);

        assert_eq!(body_of(&core, "get", "/user").await.0, StatusCode::OK);
        let (status, body) = body_of(&core, "GET", "/User").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, r#""not found""#);
    }

    #[tokio::test]
    async fn unrouted_method_is_404() {
        let mut core = Core::new();
        core.get("/user", vec![reply("user")]);

        assert_eq!(body_of(&core, "PATCH", "/user").await.0, StatusCode::NOT_FOUND);
        assert!(matches!(
            core.add_route("PATCH", "/user", vec![reply("user")]),
            Err(RouteError::UnsupportedMethod(_))
        ));
    }

    #[tokio::test]
    async fn short_circuit_skips_the_rest() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let deny = handler_fn(|ctx| {
            Box::pin(async move {
                ctx.set_status(StatusCode::FORBIDDEN).text("denied");
                Ok(())
            })
        });

        let mut core = Core::new();
        core.get("/admin", vec![deny, tag(&trace, "second"), tag(&trace, "third")]);

        let (status, body) = body_of(&core, "GET", "/admin").await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body, "denied");
        assert!(trace.lock().is_empty());
    }

    #[tokio::test]
    async fn error_anywhere_in_the_chain_is_500() {
        for position in 0..3 {
            let mut chain: Vec<BoxedHandler> = vec![handler_fn(pass), handler_fn(pass), reply("ok")];
            chain[position] = handler_fn(fail);

            let mut core = Core::new();
            core.get("/work", chain);

            let (status, body) = body_of(&core, "GET", "/work").await;
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR, "position {position}");
            assert_eq!(body, r#""inner error""#);
            assert!(!body.contains("database"));
        }
    }

    #[tokio::test]
    async fn global_and_group_middleware_run_in_order() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let mut core = Core::new();
        core.use_middleware([tag(&trace, "global")]);
        {
            let mut api = core.group("/api/");
            api.use_middleware([tag(&trace, "api")]);
            let mut v1 = api.group("v1");
            v1.use_middleware([tag(&trace, "v1")]);
            v1.get("/items/:id", vec![reply("item")]);
        }

        let (status, body) = body_of(&core, "GET", "/api/v1/items/3").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "item|id=3");
        assert_eq!(*trace.lock(), ["global", "api", "v1"]);
    }

    #[tokio::test]
    async fn middleware_applies_only_to_later_routes() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let mut core = Core::new();
        core.get("/early", vec![reply("early")]);
        core.use_middleware([tag(&trace, "mw")]);
        core.get("/late", vec![reply("late")]);

        body_of(&core, "GET", "/early").await;
        assert!(trace.lock().is_empty());
        body_of(&core, "GET", "/late").await;
        assert_eq!(*trace.lock(), ["mw"]);
    }

    #[test]
    #[should_panic(expected = "failed to register GET /dup")]
    fn duplicate_registration_is_fatal() {
        let mut core = Core::new();
        core.get("/dup", vec![reply("a")]);
        core.get("/dup", vec![reply("b")]);
    }

    #[test]
    fn rejects_empty_chain_even_with_middleware() {
        let mut core = Core::new();
        core.use_middleware([reply("mw")]);
        assert!(matches!(
            core.add_route("GET", "/x", Vec::new()),
            Err(RouteError::EmptyChain { .. })
        ));
    }

    #[test]
    fn lists_routes() {
        let mut core = Core::new();
        core.post("/b", vec![reply("b")]);
        core.get("/a", vec![reply("a")]);
        core.group("/g").delete("/c", vec![reply("c")]);

        assert_eq!(
            core.routes(),
            [
                ("DELETE".to_string(), "/g/c".to_string()),
                ("GET".to_string(), "/a".to_string()),
                ("POST".to_string(), "/b".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn handlers_resolve_shared_singletons() {
        let core = {
            let mut core = Core::new();
            core.bind(FactoryProvider::singleton("counter", |_, _| {
                Ok(Service::from_value(Mutex::new(0u32)))
            }))
            .unwrap();
            core.get(
                "/hit",
                vec![handler_fn(|ctx| {
                    Box::pin(async move {
                        let counter = ctx.make_as::<Mutex<u32>>("counter")?;
                        let mut hits = counter.lock();
                        *hits += 1;
                        let body = hits.to_string();
                        drop(hits);
                        ctx.text(body);
                        Ok(())
                    })
                })],
            );
            core
        };

        body_of(&core, "GET", "/hit").await;
        let (_, body) = body_of(&core, "GET", "/hit").await;
        assert_eq!(body, "2");
        assert!(core.make("counter").unwrap().ptr_eq(&core.must_make("counter")));
        assert!(core.is_bind("counter"));
    }

    #[test]
    fn joins_paths() {
        assert_eq!(join_path("", "users"), "/users");
        assert_eq!(join_path("/api/", "/users"), "/api/users");
        assert_eq!(join_path("/api", ""), "/api");
        assert_eq!(join_path("", ""), "/");
    }
}
