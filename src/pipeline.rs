//! Middleware dispatch.
//!
//! A [`Pipeline`] runs its middlewares in order and ends in an endpoint
//! [`Handler`]. Each middleware receives the request and a [`Next`] link;
//! calling [`Next::run`] hands the request to the following middleware, or
//! to the endpoint after the last one. A middleware that returns without
//! running `next` short-circuits the chain:
//!
//! ```rust
//! use regexrouter::{Error, Next, Pipeline};
//! use hyper::{Body, Request, Response, StatusCode};
//! use std::sync::Arc;
//!
//! # async fn run() {
//! let pipeline = Pipeline::new()
//!     .pipe(|req: Request<Body>, next: Next| async move {
//!         if req.headers().contains_key("authorization") {
//!             next.run(req).await
//!         } else {
//!             let mut res = Response::new(Body::empty());
//!             *res.status_mut() = StatusCode::UNAUTHORIZED;
//!             Ok(res)
//!         }
//!     });
//!
//! let endpoint = Arc::new(|_: Request<Body>| async {
//!     Ok::<_, Error>(Response::new(Body::from("secret")))
//! });
//! let res = pipeline.process(Request::new(Body::empty()), endpoint).await.unwrap();
//! assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
//! # }
//! ```
//!
//! `Next` is consumed by `run`, so each link runs at most once per
//! dispatch. Errors returned by a middleware or the endpoint reach the
//! caller unchanged.
use crate::error::Result;
use crate::router::{Handler, HandlerFuture};

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use hyper::{Body, Request, Response};

/// A link in the request chain.
///
/// Implemented for asynchronous functions taking the request and the
/// [`Next`] link.
pub trait Middleware: Send + Sync {
    fn process(&self, req: Request<Body>, next: Next) -> HandlerFuture;
}

impl<F, R> Middleware for F
where
    F: Fn(Request<Body>, Next) -> R + Send + Sync,
    R: Future<Output = Result<Response<Body>>> + Send + 'static,
{
    fn process(&self, req: Request<Body>, next: Next) -> HandlerFuture {
        Box::pin(self(req, next))
    }
}

/// The life cycle of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Created, not polled yet.
    Pending,
    Running,
    /// Finished without reaching the endpoint.
    ShortCircuited,
    /// The endpoint was invoked.
    Completed,
}

impl PipelineState {
    fn from_u8(state: u8) -> Self {
        match state {
            0 => PipelineState::Pending,
            1 => PipelineState::Running,
            2 => PipelineState::ShortCircuited,
            _ => PipelineState::Completed,
        }
    }
}

struct Chain {
    middlewares: Arc<[Arc<dyn Middleware>]>,
    endpoint: Arc<dyn Handler>,
    state: AtomicU8,
}

impl Chain {
    fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set(&self, state: PipelineState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// The remainder of a chain.
pub struct Next {
    chain: Arc<Chain>,
    index: usize,
}

impl Next {
    /// Passes the request down the chain.
    pub fn run(self, req: Request<Body>) -> HandlerFuture {
        match self.chain.middlewares.get(self.index).cloned() {
            Some(middleware) => {
                let next = Next {
                    chain: self.chain,
                    index: self.index + 1,
                };
                middleware.process(req, next)
            }
            None => {
                self.chain.set(PipelineState::Completed);
                self.chain.endpoint.handle(req)
            }
        }
    }

    /// Number of middlewares left before the endpoint.
    pub fn remaining(&self) -> usize {
        self.chain.middlewares.len().saturating_sub(self.index)
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("index", &self.index)
            .field("remaining", &self.remaining())
            .finish()
    }
}

/// An ordered list of middlewares.
#[derive(Clone, Default)]
pub struct Pipeline {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a middleware.
    pub fn pipe(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    pub fn push(&mut self, middleware: Arc<dyn Middleware>) {
        self.middlewares.push(middleware);
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Runs the request through the middlewares and `endpoint`.
    pub fn process(&self, req: Request<Body>, endpoint: Arc<dyn Handler>) -> HandlerFuture {
        let dispatch = self.dispatch(req, endpoint);
        Box::pin(async move { dispatch.await.response })
    }

    /// Like [`process`](Self::process), but also reports how the chain
    /// ended.
    pub fn dispatch(&self, req: Request<Body>, endpoint: Arc<dyn Handler>) -> Dispatch {
        let chain = Arc::new(Chain {
            middlewares: self.middlewares.clone().into(),
            endpoint,
            state: AtomicU8::new(PipelineState::Pending as u8),
        });
        Dispatch {
            chain,
            inner: Inner::Pending(req),
        }
    }
}

impl From<Vec<Arc<dyn Middleware>>> for Pipeline {
    fn from(middlewares: Vec<Arc<dyn Middleware>>) -> Self {
        Pipeline { middlewares }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("middlewares", &self.middlewares.len())
            .finish()
    }
}

/// The result of a finished dispatch.
#[derive(Debug)]
pub struct Outcome {
    pub response: Result<Response<Body>>,
    pub state: PipelineState,
}

/// A dispatch in flight, see [`Pipeline::dispatch`].
pub struct Dispatch {
    chain: Arc<Chain>,
    inner: Inner,
}

enum Inner {
    Pending(Request<Body>),
    Running(HandlerFuture),
    Done,
}

impl Dispatch {
    pub fn state(&self) -> PipelineState {
        self.chain.state()
    }
}

impl Future for Dispatch {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        loop {
            match std::mem::replace(&mut this.inner, Inner::Done) {
                Inner::Pending(req) => {
                    this.chain.set(PipelineState::Running);
                    let next = Next {
                        chain: Arc::clone(&this.chain),
                        index: 0,
                    };
                    this.inner = Inner::Running(next.run(req));
                }
                Inner::Running(mut fut) => {
                    let response = match fut.as_mut().poll(cx) {
                        Poll::Ready(response) => response,
                        Poll::Pending => {
                            this.inner = Inner::Running(fut);
                            return Poll::Pending;
                        }
                    };
                    if this.chain.state() == PipelineState::Running {
                        this.chain.set(PipelineState::ShortCircuited);
                    }
                    return Poll::Ready(Outcome {
                        response,
                        state: this.chain.state(),
                    });
                }
                Inner::Done => panic!("`Dispatch` polled after completion"),
            }
        }
    }
}
