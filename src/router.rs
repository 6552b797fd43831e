//! [`Router`](crate::Router) matches requests against a compiled route set
//! and dispatches them through the route's middleware pipeline.
//!
//! Routes are compiled on first use, or by an explicit call to
//! [`Router::compile`]. The compiled matcher can be persisted to a cache
//! file, which is reused as long as the routes do not change.
//!
//! The `Router` can be served directly by hyper:
//!
//! ```rust,no_run
//! use regexrouter::{Error, Params, Router};
//! use hyper::{Request, Response, Body};
//!
//! async fn index(_: Request<Body>) -> Result<Response<Body>, Error> {
//!     Ok(Response::new("Hello, World!".into()))
//! }
//!
//! async fn hello(req: Request<Body>) -> Result<Response<Body>, Error> {
//!     let params = req.extensions().get::<Params>().unwrap();
//!     Ok(Response::new(format!("Hello, {}", params.get("user").unwrap()).into()))
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let router = Router::default()
//!         .get("/", index)
//!         .get("/hello/{user}", hello);
//!
//!     hyper::Server::bind(&([127, 0, 0, 1], 3000).into())
//!         .serve(router.into_service())
//!         .await;
//! }
//!```
use crate::collection::{CompileOptions, Group, RouteCollection};
use crate::error::{Error, Result};
use crate::generator::generate_url;
use crate::matcher::{CompiledMatcher, MatchResult, RequestContext, RouteMatch};
use crate::resolver::{resolve_handler, resolve_middlewares, Registry, Resolver};
use crate::route::{HandlerRef, Route};

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::{future, ready};
use hyper::service::Service;
use hyper::{header, Body, Method, Request, Response, StatusCode};
use once_cell::sync::OnceCell;
use serde::Deserialize;
use tracing::{debug, warn};

/// The future returned by handlers and middlewares.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Response<Body>>> + Send>>;

/// Router settings.
///
/// Deserializable, so it can live in an application's configuration file;
/// missing fields keep their defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Redirect to the path with (without) a trailing slash when only that
    /// one has a route. `301` for `GET`, `308` otherwise.
    pub redirect_trailing_slash: bool,
    /// Reply `405` with an `Allow` header when the path has routes, but
    /// none for the request method.
    pub handle_method_not_allowed: bool,
    /// Reply to `OPTIONS` requests that no route handles.
    pub handle_options: bool,
    /// Where the compiled matcher is cached.
    pub cache_path: Option<PathBuf>,
    /// Request method to action, for resource handlers.
    pub resource_verbs: HashMap<String, String>,
    /// How routes are merged into regexes.
    pub compile: CompileOptions,
}

impl Default for RouterConfig {
    fn default() -> Self {
        let resource_verbs = [
            ("GET", "get"),
            ("HEAD", "get"),
            ("POST", "post"),
            ("PUT", "put"),
            ("PATCH", "patch"),
            ("DELETE", "delete"),
            ("OPTIONS", "options"),
        ]
        .iter()
        .map(|(method, action)| (method.to_string(), action.to_string()))
        .collect();

        RouterConfig {
            redirect_trailing_slash: true,
            handle_method_not_allowed: true,
            handle_options: true,
            cache_path: None,
            resource_verbs,
            compile: CompileOptions::default(),
        }
    }
}

/// Router dispatches requests to different handlers via configurable routes.
pub struct Router {
    routes: RouteCollection,
    config: RouterConfig,
    resolver: Arc<dyn Resolver>,
    matcher: OnceCell<CompiledMatcher>,
    global_options: Option<Arc<dyn Handler>>,
    not_found: Option<Arc<dyn Handler>>,
    method_not_allowed: Option<Arc<dyn Handler>>,
}

impl Router {
    pub fn new(config: RouterConfig) -> Self {
        Router {
            routes: RouteCollection::new(),
            config,
            resolver: Arc::new(Registry::new()),
            matcher: OnceCell::new(),
            global_options: None,
            not_found: None,
            method_not_allowed: None,
        }
    }

    /// Insert a handler into the router for a specific path at the specified method.
    /// ```rust
    /// use regexrouter::{Error, Router};
    /// use hyper::{Body, Method, Request, Response};
    ///
    /// let router = Router::default()
    ///     .handle("/teapot", Method::GET, |_: Request<Body>| async {
    ///         Ok::<_, Error>(Response::new(Body::from("I am a teapot!")))
    ///     });
    /// ```
    pub fn handle(self, path: impl AsRef<str>, method: Method, handler: impl Handler + 'static) -> Self {
        self.route(Route::new(&[method.as_str()], path, HandlerRef::callable(handler)))
    }

    /// Register a handler for `GET` requests
    pub fn get(self, path: impl AsRef<str>, handler: impl Handler + 'static) -> Self {
        self.handle(path, Method::GET, handler)
    }

    /// Register a handler for `HEAD` requests
    pub fn head(self, path: impl AsRef<str>, handler: impl Handler + 'static) -> Self {
        self.handle(path, Method::HEAD, handler)
    }

    /// Register a handler for `OPTIONS` requests
    pub fn options(self, path: impl AsRef<str>, handler: impl Handler + 'static) -> Self {
        self.handle(path, Method::OPTIONS, handler)
    }

    /// Register a handler for `POST` requests
    pub fn post(self, path: impl AsRef<str>, handler: impl Handler + 'static) -> Self {
        self.handle(path, Method::POST, handler)
    }

    /// Register a handler for `PUT` requests
    pub fn put(self, path: impl AsRef<str>, handler: impl Handler + 'static) -> Self {
        self.handle(path, Method::PUT, handler)
    }

    /// Register a handler for `PATCH` requests
    pub fn patch(self, path: impl AsRef<str>, handler: impl Handler + 'static) -> Self {
        self.handle(path, Method::PATCH, handler)
    }

    /// Register a handler for `DELETE` requests
    pub fn delete(self, path: impl AsRef<str>, handler: impl Handler + 'static) -> Self {
        self.handle(path, Method::DELETE, handler)
    }

    /// Register a fully configured route.
    pub fn route(mut self, route: Route) -> Self {
        self.routes.add(route);
        self.matcher = OnceCell::new();
        self
    }

    /// Register the routes added by `build` with the attributes of `group`.
    /// ```rust
    /// use regexrouter::{Error, Group, Route, Router};
    /// use hyper::{Body, Request, Response};
    ///
    /// async fn users(_: Request<Body>) -> Result<Response<Body>, Error> {
    ///     Ok(Response::new(Body::empty()))
    /// }
    ///
    /// let router = Router::default().group(Group::new("/admin").name("admin."), |admin| {
    ///     admin.add(Route::get("/users", users).name("users"));
    /// });
    /// assert_eq!(router.url("admin.users", &[]).unwrap(), "/admin/users");
    /// ```
    pub fn group<F>(mut self, group: Group, build: F) -> Self
    where
        F: FnOnce(&mut RouteCollection),
    {
        self.routes.group(group, build);
        self.matcher = OnceCell::new();
        self
    }

    /// Replace the registered routes.
    pub fn routes(mut self, routes: RouteCollection) -> Self {
        self.routes = routes;
        self.matcher = OnceCell::new();
        self
    }

    pub fn collection(&self) -> &RouteCollection {
        &self.routes
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Set the resolver of named handlers and middlewares.
    pub fn resolver(mut self, resolver: impl Resolver + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    /// Cache the compiled matcher in `path`.
    pub fn cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.cache_path = Some(path.into());
        self.matcher = OnceCell::new();
        self
    }

    /// Enables or disables automatic redirection if the current route can't be
    /// matched but a handler for the path with (without) the trailing slash exists.
    /// For example if `/foo/` is requested but a route only exists for `/foo`, the
    /// client is redirected to `/foo` with HTTP status code 301 for `GET` requests
    /// and 308 for all other request methods.
    pub fn redirect_trailing_slash(mut self, enabled: bool) -> Self {
        self.config.redirect_trailing_slash = enabled;
        self
    }

    /// If enabled, the router checks if another method is allowed for the
    /// current route, if the current request can not be routed.
    /// If this is the case, the request is answered with `MethodNotAllowed`
    /// and HTTP status code 405.
    /// If no other Method is allowed, the request is delegated to the `NotFound`
    /// handler.
    pub fn handle_method_not_allowed(mut self, enabled: bool) -> Self {
        self.config.handle_method_not_allowed = enabled;
        self
    }

    /// If enabled, the router automatically replies to `OPTIONS` requests.
    /// Custom `OPTIONS` handlers take priority over automatic replies.
    pub fn handle_options(mut self, enabled: bool) -> Self {
        self.config.handle_options = enabled;
        self
    }

    /// An optional handler that is called on automatic `OPTIONS` requests.
    /// The handler is only called if `handle_options` is true and no `OPTIONS`
    /// handler for the specific path was set.
    pub fn global_options(mut self, handler: impl Handler + 'static) -> Self {
        self.global_options = Some(Arc::new(handler));
        self
    }

    /// Configurable handler which is called when no matching route is
    /// found.
    pub fn not_found(mut self, handler: impl Handler + 'static) -> Self {
        self.not_found = Some(Arc::new(handler));
        self
    }

    /// A configurable handler which is called when a request
    /// cannot be routed and `handle_method_not_allowed` is true.
    pub fn method_not_allowed(mut self, handler: impl Handler + 'static) -> Self {
        self.method_not_allowed = Some(Arc::new(handler));
        self
    }

    /// Compiles the routes, or returns the matcher compiled before.
    ///
    /// With a cache path configured, a cached matcher for the same routes is
    /// loaded instead of compiling, and a freshly compiled one is written
    /// back. Cache failures are logged and never fail compilation.
    pub fn compile(&self) -> Result<&CompiledMatcher> {
        self.matcher.get_or_try_init(|| {
            let path = match &self.config.cache_path {
                Some(path) => path,
                None => return self.routes.compile_with(&self.config.compile),
            };

            let fingerprint = self.routes.fingerprint_with(&self.config.compile);
            match CompiledMatcher::load(path, &fingerprint) {
                Ok(Some(matcher)) => {
                    debug!(path = %path.display(), "loaded compiled routes from cache");
                    return Ok(matcher);
                }
                Ok(None) => debug!(path = %path.display(), "route cache is stale"),
                Err(Error::CacheIo(err)) if err.kind() == io::ErrorKind::NotFound => {
                    debug!(path = %path.display(), "no route cache")
                }
                Err(err) => warn!(path = %path.display(), %err, "ignoring unreadable route cache"),
            }

            let matcher = self.routes.compile_with(&self.config.compile)?;
            if let Err(err) = matcher.save(path, &fingerprint) {
                warn!(path = %path.display(), %err, "failed to write route cache");
            }
            Ok(matcher)
        })
    }

    /// Lookup allows the manual lookup of a route for a request.
    /// ```rust
    /// use regexrouter::{Error, MatchResult, RequestContext, Router};
    /// use hyper::{Body, Request, Response};
    ///
    /// let router = Router::default()
    ///     .get("/home/{page}", |_: Request<Body>| async {
    ///         Ok::<_, Error>(Response::new(Body::from("Welcome!")))
    ///     });
    ///
    /// match router.lookup(&RequestContext::new("GET", "/home/about")).unwrap() {
    ///     MatchResult::Found(m) => assert_eq!(m.params.get("page"), Some("about")),
    ///     _ => unreachable!(),
    /// }
    /// ```
    pub fn lookup(&self, req: &RequestContext) -> Result<MatchResult> {
        Ok(self.compile()?.lookup(req))
    }

    /// Returns a list of the allowed methods for a request's path, host and scheme.
    /// The path `*` stands for the whole server.
    /// ```rust
    /// use regexrouter::{Error, RequestContext, Router};
    /// use hyper::{Body, Request, Response};
    ///
    /// let router = Router::default()
    ///     .get("/home", |_: Request<Body>| async {
    ///         Ok::<_, Error>(Response::new(Body::from("Welcome!")))
    ///     })
    ///     .post("/home", |_: Request<Body>| async {
    ///         Ok::<_, Error>(Response::new(Body::from("Welcome!")))
    ///     });
    ///
    /// let allowed = router.allowed(&RequestContext::new("OPTIONS", "/home")).unwrap();
    /// assert_eq!(allowed, ["GET", "POST", "OPTIONS"]);
    /// ```
    pub fn allowed(&self, req: &RequestContext) -> Result<Vec<String>> {
        let mut allowed = match req.path() {
            "*" => {
                let mut allowed: Vec<String> = Vec::new();
                for method in self.routes.routes().iter().flat_map(|route| &route.methods) {
                    if !allowed.contains(method) {
                        allowed.push(method.clone());
                    }
                }
                allowed
            }
            _ => self.compile()?.allowed(req),
        };

        if !allowed.is_empty() && !allowed.iter().any(|m| m == "OPTIONS") {
            allowed.push(Method::OPTIONS.to_string());
        }
        Ok(allowed)
    }

    /// Builds the URL of the route named `name`, see
    /// [`generate_url`](crate::generate_url).
    pub fn url(&self, name: &str, params: &[(&str, &str)]) -> Result<String> {
        let route = self
            .routes
            .find(name)
            .ok_or_else(|| Error::UrlGeneration(format!("no route named `{}`", name)))?;
        generate_url(route, params)
    }

    fn dispatch(&self, mut req: Request<Body>, found: RouteMatch) -> Result<HandlerFuture> {
        let route = self
            .routes
            .route(found.route)
            .ok_or_else(|| Error::InvalidMatcher(format!("unknown route id {}", found.route)))?;
        let handler = resolve_handler(
            &route.handler,
            req.method().as_str(),
            self.resolver.as_ref(),
            &self.config.resource_verbs,
        )?;
        let pipeline = resolve_middlewares(&route.middlewares, self.resolver.as_ref())?;

        req.extensions_mut().insert(found.params);
        Ok(pipeline.process(req, handler))
    }

    /// The path with its trailing slash toggled, if that path has a route.
    fn trailing_slash_redirect(&self, matcher: &CompiledMatcher, ctx: &RequestContext) -> Option<String> {
        let path = ctx.path();
        if path == "/" || ctx.method() == Method::CONNECT.as_str() {
            return None;
        }
        let toggled = match path.strip_suffix('/') {
            Some(stripped) => stripped.to_owned(),
            None => format!("{}/", path),
        };

        let retry = ctx.clone().with_path(toggled.clone());
        match matcher.lookup(&retry) {
            MatchResult::Found(_) => Some(toggled),
            _ => None,
        }
    }
}

/// The default configuration, see [`RouterConfig`].
impl Default for Router {
    fn default() -> Self {
        Router::new(RouterConfig::default())
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.routes)
            .field("config", &self.config)
            .field("compiled", &self.matcher.get().is_some())
            .finish()
    }
}

/// Represents a HTTP handler function.
/// This trait is implemented for asynchronous functions that take a `Request` and return a
/// `Result<Response<Body>, regexrouter::Error>`
/// ```rust
/// # use regexrouter::{Error, Handler};
/// # use hyper::{Request, Response, Body};
/// async fn hello(_: Request<Body>) -> Result<Response<Body>, Error> {
///     Ok(Response::new(Body::empty()))
/// }
///
/// let handler: Box<dyn Handler> = Box::new(hello);
/// ```
pub trait Handler: Send + Sync {
    fn handle(&self, req: Request<Body>) -> HandlerFuture;
}

impl<F, R> Handler for F
where
    F: Fn(Request<Body>) -> R + Send + Sync,
    R: Future<Output = Result<Response<Body>>> + Send + 'static,
{
    fn handle(&self, req: Request<Body>) -> HandlerFuture {
        Box::pin(self(req))
    }
}

#[doc(hidden)]
pub struct MakeRouterService(RouterService);

impl<T> Service<T> for MakeRouterService {
    type Response = RouterService;
    type Error = Error;
    type Future = future::Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _: T) -> Self::Future {
        let service = self.0.clone();
        future::ok(service)
    }
}

#[doc(hidden)]
#[derive(Clone)]
pub struct RouterService(Arc<Router>);

impl RouterService {
    fn new(router: Router) -> Self {
        RouterService(Arc::new(router))
    }
}

impl Service<Request<Body>> for RouterService {
    type Response = Response<Body>;
    type Error = Error;
    type Future = ResponseFut;

    fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        self.0.serve(req)
    }
}

impl Router {
    /// Converts the `Router` into a `Service` which you can serve directly with `Hyper`.
    /// If you have an existing `Service` that you want to incorporate a `Router` into, see
    /// [`Router::serve`](crate::Router::serve).
    /// ```rust,no_run
    /// # use regexrouter::Router;
    /// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
    /// // Our router...
    /// let router = Router::default();
    ///
    /// // Convert it into a service...
    /// let service = router.into_service();
    ///
    /// // Serve with hyper
    /// hyper::Server::bind(&([127, 0, 0, 1], 3030).into())
    ///     .serve(service)
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn into_service(self) -> MakeRouterService {
        MakeRouterService(RouterService::new(self))
    }

    /// An asynchronous function from a `Request` to a `Response`. You will generally not need to use
    /// this function directly, and instead use
    /// [`Router::into_service`](crate::Router::into_service). However, it may be useful when
    /// incorporating the router into a larger service.
    /// ```rust,no_run
    /// # use regexrouter::Router;
    /// # use hyper::service::{make_service_fn, service_fn};
    /// # use hyper::{Request, Body, Server};
    /// # use std::convert::Infallible;
    /// # use std::sync::Arc;
    ///
    /// # async fn run() {
    /// let router = Arc::new(Router::default());
    ///
    /// let make_svc = make_service_fn(move |_| {
    ///     let router = router.clone();
    ///     async move {
    ///         Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
    ///             let router = router.clone();
    ///             async move { router.serve(req).await }
    ///         }))
    ///     }
    /// });
    ///
    /// let server = Server::bind(&([127, 0, 0, 1], 3000).into())
    ///     .serve(make_svc)
    ///     .await;
    /// # }
    /// ```
    pub fn serve(&self, req: Request<Body>) -> ResponseFut {
        let matcher = match self.compile() {
            Ok(matcher) => matcher,
            Err(err) => return ResponseFutKind::Boxed(Box::pin(future::err(err))).into(),
        };

        let ctx = RequestContext::from_request(&req);
        let allowed = match matcher.lookup(&ctx) {
            MatchResult::Found(found) => {
                return match self.dispatch(req, found) {
                    Ok(fut) => ResponseFutKind::Boxed(fut).into(),
                    Err(err) => ResponseFutKind::Boxed(Box::pin(future::err(err))).into(),
                };
            }
            MatchResult::MethodNotAllowed(allowed) => allowed,
            MatchResult::NotFound => Vec::new(),
        };

        if allowed.is_empty() && self.config.redirect_trailing_slash {
            if let Some(path) = self.trailing_slash_redirect(matcher, &ctx) {
                let code = match *req.method() {
                    // Moved Permanently, request with GET method
                    Method::GET => StatusCode::MOVED_PERMANENTLY,
                    // Permanent Redirect, request with same method
                    _ => StatusCode::PERMANENT_REDIRECT,
                };
                let location = match req.uri().query() {
                    Some(query) => format!("{}?{}", path, query),
                    None => path,
                };
                return ResponseFutKind::Redirect(location, code).into();
            }
        }

        if req.method() == Method::OPTIONS && self.config.handle_options {
            let allow = if ctx.path() == "*" {
                self.allowed(&ctx).unwrap_or_default()
            } else {
                with_options(allowed)
            };

            if !allow.is_empty() {
                return match self.global_options {
                    Some(ref handler) => ResponseFutKind::Boxed(handler.handle(req)).into(),
                    None => ResponseFutKind::Options(allow.join(", ")).into(),
                };
            }
        } else if self.config.handle_method_not_allowed && !allowed.is_empty() {
            let allow = if self.config.handle_options {
                with_options(allowed)
            } else {
                allowed
            };
            return match self.method_not_allowed {
                Some(ref handler) => ResponseFutKind::Boxed(handler.handle(req)).into(),
                None => ResponseFutKind::MethodNotAllowed(allow.join(", ")).into(),
            };
        }

        match self.not_found {
            Some(ref handler) => ResponseFutKind::Boxed(handler.handle(req)).into(),
            None => ResponseFutKind::NotFound.into(),
        }
    }
}

fn with_options(mut allowed: Vec<String>) -> Vec<String> {
    if !allowed.is_empty() && !allowed.iter().any(|m| m == "OPTIONS") {
        allowed.push(Method::OPTIONS.to_string());
    }
    allowed
}

pub struct ResponseFut {
    kind: ResponseFutKind,
}

impl From<ResponseFutKind> for ResponseFut {
    fn from(kind: ResponseFutKind) -> Self {
        Self { kind }
    }
}

enum ResponseFutKind {
    Boxed(HandlerFuture),
    Redirect(String, StatusCode),
    MethodNotAllowed(String),
    Options(String),
    NotFound,
}

impl Future for ResponseFut {
    type Output = Result<Response<Body>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let ready = match self.kind {
            ResponseFutKind::Boxed(ref mut fut) => return Poll::Ready(ready!(fut.as_mut().poll(cx))),
            ResponseFutKind::Redirect(ref path, code) => Response::builder()
                .header(header::LOCATION, path.as_str())
                .status(code)
                .body(Body::empty()),
            ResponseFutKind::NotFound => Response::builder()
                .status(StatusCode::NOT_FOUND)
                .body(Body::empty()),
            ResponseFutKind::Options(ref allowed) => Response::builder()
                .header(header::ALLOW, allowed.as_str())
                .body(Body::empty()),
            ResponseFutKind::MethodNotAllowed(ref allowed) => Response::builder()
                .header(header::ALLOW, allowed.as_str())
                .status(StatusCode::METHOD_NOT_ALLOWED)
                .body(Body::empty()),
        };

        Poll::Ready(ready.map_err(Error::handler))
    }
}
