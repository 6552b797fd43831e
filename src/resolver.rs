//! Turning handler and middleware references into instances.
use crate::error::{Error, Result};
use crate::pipeline::{Middleware, Pipeline};
use crate::route::{HandlerRef, MiddlewareRef};
use crate::router::Handler;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Looks up handlers and middlewares registered under a name.
///
/// Routes may refer to their handler and middlewares by name instead of
/// holding them, for example when route definitions are loaded from
/// configuration. The router asks its resolver for the instance each time
/// such a route is dispatched.
pub trait Resolver: Send + Sync {
    fn handler(&self, name: &str) -> Option<Arc<dyn Handler>>;

    fn middleware(&self, name: &str) -> Option<Arc<dyn Middleware>>;
}

/// A [`Resolver`] backed by two maps.
///
/// ```rust
/// use regexrouter::{Error, Registry, Resolver};
/// use hyper::{Body, Request, Response};
///
/// let registry = Registry::new().with_handler("home@index", |_: Request<Body>| async {
///     Ok::<_, Error>(Response::new(Body::from("home")))
/// });
/// assert!(registry.handler("home@index").is_some());
/// assert!(registry.middleware("auth").is_none());
/// ```
#[derive(Clone, Default)]
pub struct Registry {
    handlers: HashMap<String, Arc<dyn Handler>>,
    middlewares: HashMap<String, Arc<dyn Middleware>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handler(mut self, name: impl Into<String>, handler: impl Handler + 'static) -> Self {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }

    pub fn with_middleware(mut self, name: impl Into<String>, middleware: impl Middleware + 'static) -> Self {
        self.middlewares.insert(name.into(), Arc::new(middleware));
        self
    }
}

impl Resolver for Registry {
    fn handler(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(name).cloned()
    }

    fn middleware(&self, name: &str) -> Option<Arc<dyn Middleware>> {
        self.middlewares.get(name).cloned()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut handlers: Vec<_> = self.handlers.keys().collect();
        let mut middlewares: Vec<_> = self.middlewares.keys().collect();
        handlers.sort();
        middlewares.sort();
        f.debug_struct("Registry")
            .field("handlers", &handlers)
            .field("middlewares", &middlewares)
            .finish()
    }
}

/// Resolves the handler of a route for a request made with `method`.
/// `verbs` maps methods to resource actions.
pub(crate) fn resolve_handler(
    handler: &HandlerRef,
    method: &str,
    resolver: &dyn Resolver,
    verbs: &HashMap<String, String>,
) -> Result<Arc<dyn Handler>> {
    let name = match handler {
        HandlerRef::Callable(handler) => return Ok(Arc::clone(handler)),
        HandlerRef::Named(name) => name.clone(),
        HandlerRef::Resource(target) => match verbs.get(method) {
            Some(action) => format!("{}@{}", target, action),
            None => return Err(Error::InvalidHandler(format!("{} (no action for {})", target, method))),
        },
    };
    resolver.handler(&name).ok_or(Error::InvalidHandler(name))
}

/// Builds the pipeline of a route.
pub(crate) fn resolve_middlewares(middlewares: &[MiddlewareRef], resolver: &dyn Resolver) -> Result<Pipeline> {
    let mut pipeline = Pipeline::new();
    for middleware in middlewares {
        let instance = match middleware {
            MiddlewareRef::Instance(instance) => Arc::clone(instance),
            MiddlewareRef::Named(name) => resolver
                .middleware(name)
                .ok_or_else(|| Error::InvalidMiddleware(name.clone()))?,
        };
        pipeline.push(instance);
    }
    Ok(pipeline)
}
