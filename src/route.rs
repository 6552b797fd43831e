//! Route definitions.
use crate::pattern::split_target;
use crate::pipeline::Middleware;
use crate::router::Handler;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Methods registered by [`Route::any`].
pub const ANY_METHODS: [&str; 7] = ["GET", "HEAD", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"];

/// What a route dispatches to.
///
/// The matcher never looks inside; named and resource handlers are turned
/// into something callable by a [`Resolver`](crate::Resolver) when a request
/// is dispatched.
#[derive(Clone)]
pub enum HandlerRef {
    Callable(Arc<dyn Handler>),
    /// A handler registered under a name, such as `"UserController@show"`.
    Named(String),
    /// A resource target. The action is picked from the request method, so
    /// `GET` on `Resource("photos")` resolves `"photos@show"` by default.
    Resource(String),
}

impl HandlerRef {
    pub fn callable(handler: impl Handler + 'static) -> Self {
        HandlerRef::Callable(Arc::new(handler))
    }

    pub fn named(name: impl Into<String>) -> Self {
        HandlerRef::Named(name.into())
    }

    pub fn resource(target: impl Into<String>) -> Self {
        HandlerRef::Resource(target.into())
    }
}

impl From<&str> for HandlerRef {
    fn from(name: &str) -> Self {
        HandlerRef::Named(name.to_owned())
    }
}

impl From<String> for HandlerRef {
    fn from(name: String) -> Self {
        HandlerRef::Named(name)
    }
}

impl From<Arc<dyn Handler>> for HandlerRef {
    fn from(handler: Arc<dyn Handler>) -> Self {
        HandlerRef::Callable(handler)
    }
}

impl fmt::Debug for HandlerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerRef::Callable(_) => f.write_str("Callable(..)"),
            HandlerRef::Named(name) => f.debug_tuple("Named").field(name).finish(),
            HandlerRef::Resource(target) => f.debug_tuple("Resource").field(target).finish(),
        }
    }
}

/// A middleware attached to a route.
#[derive(Clone)]
pub enum MiddlewareRef {
    Instance(Arc<dyn Middleware>),
    Named(String),
}

impl From<&str> for MiddlewareRef {
    fn from(name: &str) -> Self {
        MiddlewareRef::Named(name.to_owned())
    }
}

impl From<String> for MiddlewareRef {
    fn from(name: String) -> Self {
        MiddlewareRef::Named(name)
    }
}

impl From<Arc<dyn Middleware>> for MiddlewareRef {
    fn from(middleware: Arc<dyn Middleware>) -> Self {
        MiddlewareRef::Instance(middleware)
    }
}

impl fmt::Debug for MiddlewareRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MiddlewareRef::Instance(_) => f.write_str("Instance(..)"),
            MiddlewareRef::Named(name) => f.debug_tuple("Named").field(name).finish(),
        }
    }
}

/// A single route.
///
/// Routes are plain values: they are built with the methods below, handed
/// to a [`RouteCollection`](crate::RouteCollection) which merges in the
/// attributes of enclosing groups, and never change after that.
///
/// ```rust
/// use regexrouter::Route;
///
/// let route = Route::new(&["GET", "post"], "https://{tenant}.example.com/users/{id}", "users@show")
///     .name("users.show")
///     .pattern("id", "[0-9]+");
///
/// assert_eq!(route.methods, ["GET", "POST"]);
/// assert_eq!(route.path, "/users/{id}");
/// assert_eq!(route.domain.as_deref(), Some("{tenant}.example.com"));
/// assert_eq!(route.schemes, ["https"]);
/// ```
#[derive(Debug, Clone)]
pub struct Route {
    pub name: Option<String>,
    /// The path pattern, host part removed.
    pub path: String,
    /// Uppercase, in registration order.
    pub methods: Vec<String>,
    pub handler: HandlerRef,
    /// Outermost group first.
    pub middlewares: Vec<MiddlewareRef>,
    /// Constraints that replace inline ones.
    pub patterns: BTreeMap<String, String>,
    /// Values of variables that did not participate in a match.
    pub defaults: BTreeMap<String, String>,
    /// The host pattern.
    pub domain: Option<String>,
    /// Lowercase, empty means any.
    pub schemes: Vec<String>,
}

impl Route {
    /// Creates a route. A path of the form `//host/path` or
    /// `scheme://host/path` also sets the domain and the scheme.
    pub fn new<M: AsRef<str>>(methods: &[M], path: impl AsRef<str>, handler: impl Into<HandlerRef>) -> Self {
        let mut methods: Vec<String> = methods
            .iter()
            .map(|method| method.as_ref().to_ascii_uppercase())
            .collect();
        dedup(&mut methods);

        let target = split_target(path.as_ref());
        Route {
            name: None,
            path: target.path,
            methods,
            handler: handler.into(),
            middlewares: Vec::new(),
            patterns: BTreeMap::new(),
            defaults: BTreeMap::new(),
            domain: target.host,
            schemes: target.scheme.into_iter().collect(),
        }
    }

    pub fn get(path: impl AsRef<str>, handler: impl Handler + 'static) -> Self {
        Self::new(&["GET"], path, HandlerRef::callable(handler))
    }

    pub fn head(path: impl AsRef<str>, handler: impl Handler + 'static) -> Self {
        Self::new(&["HEAD"], path, HandlerRef::callable(handler))
    }

    pub fn post(path: impl AsRef<str>, handler: impl Handler + 'static) -> Self {
        Self::new(&["POST"], path, HandlerRef::callable(handler))
    }

    pub fn put(path: impl AsRef<str>, handler: impl Handler + 'static) -> Self {
        Self::new(&["PUT"], path, HandlerRef::callable(handler))
    }

    pub fn patch(path: impl AsRef<str>, handler: impl Handler + 'static) -> Self {
        Self::new(&["PATCH"], path, HandlerRef::callable(handler))
    }

    pub fn delete(path: impl AsRef<str>, handler: impl Handler + 'static) -> Self {
        Self::new(&["DELETE"], path, HandlerRef::callable(handler))
    }

    pub fn options(path: impl AsRef<str>, handler: impl Handler + 'static) -> Self {
        Self::new(&["OPTIONS"], path, HandlerRef::callable(handler))
    }

    /// A route for every method in [`ANY_METHODS`].
    pub fn any(path: impl AsRef<str>, handler: impl Handler + 'static) -> Self {
        Self::new(&ANY_METHODS, path, HandlerRef::callable(handler))
    }

    /// A resource route, see [`HandlerRef::Resource`].
    pub fn resource<M: AsRef<str>>(methods: &[M], path: impl AsRef<str>, target: impl Into<String>) -> Self {
        Self::new(methods, path, HandlerRef::resource(target))
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Appends a middleware. Middlewares run in the order they are added,
    /// after the ones of enclosing groups.
    pub fn middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middlewares
            .push(MiddlewareRef::Instance(Arc::new(middleware)));
        self
    }

    /// Appends a middleware resolved by name at dispatch time.
    pub fn middleware_named(mut self, name: impl Into<String>) -> Self {
        self.middlewares.push(MiddlewareRef::Named(name.into()));
        self
    }

    /// Constrains variable `name` to `regex`.
    pub fn pattern(mut self, name: impl Into<String>, regex: impl Into<String>) -> Self {
        self.patterns.insert(name.into(), regex.into());
        self
    }

    pub fn default(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.defaults.insert(name.into(), value.into());
        self
    }

    pub fn domain(mut self, host: impl Into<String>) -> Self {
        self.domain = Some(host.into());
        self
    }

    pub fn scheme(mut self, scheme: impl AsRef<str>) -> Self {
        self.schemes.push(scheme.as_ref().to_ascii_lowercase());
        dedup(&mut self.schemes);
        self
    }

    /// A short description used in errors and logs.
    pub(crate) fn describe(&self) -> String {
        let mut out = self.methods.join("|");
        out.push(' ');
        if let Some(domain) = &self.domain {
            out.push_str("//");
            out.push_str(domain);
        }
        out.push_str(&self.path);
        if let Some(name) = &self.name {
            out.push_str(" (");
            out.push_str(name);
            out.push(')');
        }
        out
    }
}

fn dedup(values: &mut Vec<String>) {
    let mut seen = Vec::with_capacity(values.len());
    values.retain(|value| {
        if seen.contains(value) {
            false
        } else {
            seen.push(value.clone());
            true
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    use hyper::{Body, Request, Response};

    async fn ok(_: Request<Body>) -> Result<Response<Body>, Error> {
        Ok(Response::new(Body::empty()))
    }

    #[test]
    fn methods_are_normalized() {
        let route = Route::new(&["get", "Post", "GET"], "/", "home");
        assert_eq!(route.methods, ["GET", "POST"]);
        assert!(matches!(route.handler, HandlerRef::Named(ref name) if name == "home"));
    }

    #[test]
    fn host_is_split_off_the_path() {
        let route = Route::get("//api.example.com/v1/{id}", ok);
        assert_eq!(route.domain.as_deref(), Some("api.example.com"));
        assert_eq!(route.path, "/v1/{id}");
        assert!(route.schemes.is_empty());
    }

    #[test]
    fn builders_accumulate() {
        let route = Route::any("/a/{id}", ok)
            .name("a")
            .pattern("id", "[0-9]+")
            .default("id", "1")
            .scheme("HTTPS")
            .scheme("https")
            .middleware_named("auth")
            .middleware(|req: Request<Body>, next: crate::Next| next.run(req));

        assert_eq!(route.methods.len(), ANY_METHODS.len());
        assert_eq!(route.name.as_deref(), Some("a"));
        assert_eq!(route.patterns["id"], "[0-9]+");
        assert_eq!(route.defaults["id"], "1");
        assert_eq!(route.schemes, ["https"]);
        assert_eq!(route.middlewares.len(), 2);
        assert!(matches!(route.middlewares[0], MiddlewareRef::Named(ref name) if name == "auth"));
    }

    #[test]
    fn description() {
        let route = Route::new(&["GET", "HEAD"], "/x", "x").domain("example.com").name("x");
        assert_eq!(route.describe(), "GET|HEAD //example.com/x (x)");
    }
}
