//! # RegexRouter
//!
//! RegexRouter is an HTTP request router for [hyper](https://hyper.rs) that
//! compiles all of its routes into a single regular expression.
//!
//! Routes are written as patterns with named variables, regex constraints,
//! default values and optional segments. Literal paths are answered from a
//! hash map. All other paths are combined into one alternation whose
//! common prefixes are factored out, so a request is usually matched by a
//! single regex execution however many routes there are. Route sets too
//! large for the regex engine's size limit are split into a few regexes.
//!
//! ## Features
//!
//! **First registered, first matched:** When two routes accept the same
//! request, the one registered first wins. Static and dynamic routes may
//! overlap freely.
//!
//! **404 and 405 done right:** The method is checked only after path, host
//! and scheme matched. A request whose path exists under other methods is
//! answered with `405 Method Not Allowed` and an `Allow` header listing
//! every method of every matching route.
//!
//! **Hosts and schemes:** Routes can be restricted to a host pattern with
//! its own variables, and to a set of schemes.
//!
//! **Groups and middlewares:** Routes can share a prefix, host,
//! middlewares, constraints and defaults through nested groups. Middlewares
//! run in order and may answer a request without passing it on.
//!
//! **Compiled once, cached on disk:** The compiled matcher is plain data.
//! It can be written to a cache file and loaded on the next start, as long
//! as the routes did not change.
//!
//! ## Usage
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
//! ```
//!
//! ### Patterns
//!
//! ```ignore
//!  Syntax                 Meaning
//!  {name}                 variable, matches one path segment
//!  {name:regex}           variable constrained by `regex`
//!  {name=value}           variable with a default
//!  {name:regex=value}     both of the above
//!  [...]                  optional segment, may nest
//!  //host/path            host pattern, same syntax
//!  https://host/path      host pattern and scheme
//! ```
//!
//! ```ignore
//!  Pattern: /blog[/{page:[0-9]+=1}]
//!
//!   /blog                 match: page="1"
//!   /blog/4               match: page="4"
//!   /blog/four            no match
//!   /blog/                no match, but the router would redirect
//! ```
//!
//! A variable inside an optional segment that did not take part in the
//! match takes its default, or is left out of the [`Params`].
//!
//! ### Parameters
//!
//! Variables of the matched route are stored as [`Params`] in the request
//! extensions. Host variables come last and replace path variables of the
//! same name.
//!
//! ```rust,no_run
//!  # use regexrouter::Params;
//!  # let params = Params::default();
//!  let user = params.get("user");
//!  let third_key = &params[2].key;
//!  let third_value = &params[2].value;
//! ```
//!
//! ### Matching without hyper
//!
//! The matcher only needs the method, path, host and scheme of a request:
//!
//! ```rust
//! use regexrouter::{MatchResult, RequestContext, Route, RouteCollection};
//!
//! let mut routes = RouteCollection::new();
//! routes.add(Route::new(&["GET"], "/user/{id:[0-9]+}", "users@show"));
//! routes.add(Route::new(&["POST"], "/user/{id:[0-9]+}", "users@update"));
//!
//! let matcher = routes.compile().unwrap();
//! match matcher.lookup(&RequestContext::new("GET", "/user/23")) {
//!     MatchResult::Found(m) => assert_eq!(m.params.get("id"), Some("23")),
//!     _ => unreachable!(),
//! }
//! assert_eq!(
//!     matcher.lookup(&RequestContext::new("DELETE", "/user/23")),
//!     MatchResult::MethodNotAllowed(vec!["GET".into(), "POST".into()])
//! );
//! assert_eq!(matcher.lookup(&RequestContext::new("GET", "/user/abc")), MatchResult::NotFound);
//! ```
#![forbid(unsafe_code)]

mod collection;
mod error;
mod generator;
mod matcher;
mod merge;
pub mod pattern;
mod pipeline;
mod resolver;
mod route;
mod router;

pub use collection::{CompileOptions, Group, RouteCollection};
pub use error::{BoxError, Error, Result};
pub use generator::generate_url;
pub use matcher::{
    Binding, Chunk, CompiledMatcher, HostRule, Leaf, MatchResult, MatcherData, Param, Params,
    RequestContext, Requirements, RouteMatch,
};
pub use merge::Strategy;
pub use pipeline::{Dispatch, Middleware, Next, Outcome, Pipeline, PipelineState};
pub use resolver::{Registry, Resolver};
pub use route::{HandlerRef, MiddlewareRef, Route, ANY_METHODS};
pub use router::{
    Handler, HandlerFuture, MakeRouterService, ResponseFut, Router, RouterConfig, RouterService,
};
