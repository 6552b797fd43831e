use std::io;

use thiserror::Error;

/// A type-erased error returned by user handlers and middlewares.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can go wrong while compiling routes, matching requests or
/// dispatching them.
///
/// Not-found and method-not-allowed outcomes are *not* errors; they are
/// reported through [`MatchResult`](crate::MatchResult).
#[derive(Debug, Error)]
pub enum Error {
    /// A route pattern could not be parsed.
    #[error("invalid route pattern `{pattern}` at `{fragment}`: {reason}")]
    PatternSyntax {
        pattern: String,
        fragment: String,
        reason: String,
    },

    /// A variable constraint is not a valid regular expression.
    #[error("invalid constraint for `{variable}` in `{pattern}`: {source}")]
    InvalidConstraint {
        pattern: String,
        variable: String,
        #[source]
        source: regex::Error,
    },

    /// Two routes share the same host, path and at least one method.
    #[error("route {second} duplicates route {first}")]
    DuplicateRoute { first: String, second: String },

    /// Two routes were registered under the same name.
    #[error("route name `{0}` is registered more than once")]
    DuplicateName(String),

    /// A route was registered without any HTTP method.
    #[error("route `{0}` has no methods")]
    NoMethods(String),

    /// Reverse routing failed.
    #[error("cannot generate url: {0}")]
    UrlGeneration(String),

    /// A named middleware could not be resolved to an instance.
    #[error("middleware `{0}` cannot be resolved")]
    InvalidMiddleware(String),

    /// A named handler could not be resolved to an instance.
    #[error("handler `{0}` cannot be resolved")]
    InvalidHandler(String),

    /// Reading or writing the compiled matcher cache failed.
    #[error("route cache i/o: {0}")]
    CacheIo(#[from] io::Error),

    /// The compiled matcher cache could not be (de)serialized.
    #[error("route cache format: {0}")]
    CacheFormat(#[from] serde_json::Error),

    /// The compiled matcher data is internally inconsistent.
    #[error("invalid compiled matcher: {0}")]
    InvalidMatcher(String),

    /// The regex engine rejected the compiled route set.
    #[error("regex engine rejected compiled routes: {0}")]
    Regex(#[from] regex::Error),

    /// An error raised by a handler or middleware.
    #[error(transparent)]
    Handler(BoxError),

    #[error(transparent)]
    Hyper(#[from] hyper::Error),
}

impl Error {
    /// Wraps an arbitrary error raised by user code.
    pub fn handler(err: impl Into<BoxError>) -> Self {
        Error::Handler(err.into())
    }

    pub(crate) fn syntax(pattern: &str, fragment: &str, reason: impl Into<String>) -> Self {
        Error::PatternSyntax {
            pattern: pattern.to_owned(),
            fragment: fragment.to_owned(),
            reason: reason.into(),
        }
    }
}
