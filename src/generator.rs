//! Reverse routing.
use crate::error::{Error, Result};
use crate::pattern::{Pattern, Token, HOST_SEGMENT, PATH_SEGMENT};
use crate::route::Route;

use std::collections::{BTreeMap, HashSet};

use regex::Regex;
use url::form_urlencoded;

/// Builds the URL of `route` from `params`.
///
/// Required variables must be given or have a default. An optional
/// segment is emitted only when one of its variables is given; its other
/// variables then fall back to their defaults. Every value must satisfy
/// the variable's constraint. Parameters that are not variables of the
/// route are appended as a query string. Routes with a host pattern
/// produce `scheme://host/path`, or `//host/path` when the route accepts
/// any scheme.
///
/// ```rust
/// use regexrouter::{generate_url, Route};
///
/// let route = Route::new(&["GET"], "/blog[/{page:[0-9]+}]", "blog");
/// assert_eq!(generate_url(&route, &[]).unwrap(), "/blog");
/// assert_eq!(generate_url(&route, &[("page", "2"), ("tag", "rust lang")]).unwrap(), "/blog/2?tag=rust+lang");
/// assert!(generate_url(&route, &[("page", "two")]).is_err());
/// ```
pub fn generate_url(route: &Route, params: &[(&str, &str)]) -> Result<String> {
    let mut given = BTreeMap::new();
    for &(name, value) in params {
        given.entry(name).or_insert(value);
    }

    let path = Pattern::parse(&route.path)?;
    let host = route.domain.as_deref().map(Pattern::parse).transpose()?;

    let mut defaults = path.defaults();
    let mut variables: HashSet<String> = path.variables().into_iter().map(|v| v.name).collect();
    if let Some(host) = &host {
        defaults.extend(host.defaults());
        variables.extend(host.variables().into_iter().map(|v| v.name));
    }
    for (name, value) in &route.defaults {
        if variables.contains(name) {
            defaults.insert(name.clone(), value.clone());
        }
    }

    let mut url = String::new();
    if let Some(host) = &host {
        if let Some(scheme) = route.schemes.first() {
            url.push_str(scheme);
            url.push(':');
        }
        url.push_str("//");
        let mut writer = Writer {
            route,
            given: &given,
            defaults: &defaults,
            segment: HOST_SEGMENT,
        };
        writer.tokens(host.tokens(), &mut url)?;
    }

    let mut writer = Writer {
        route,
        given: &given,
        defaults: &defaults,
        segment: PATH_SEGMENT,
    };
    writer.tokens(path.tokens(), &mut url)?;

    let mut query = form_urlencoded::Serializer::new(String::new());
    let mut extra = false;
    for &(name, value) in params {
        if !variables.contains(name) {
            query.append_pair(name, value);
            extra = true;
        }
    }
    if extra {
        url.push('?');
        url.push_str(&query.finish());
    }

    Ok(url)
}

struct Writer<'a> {
    route: &'a Route,
    given: &'a BTreeMap<&'a str, &'a str>,
    defaults: &'a BTreeMap<String, String>,
    segment: &'static str,
}

impl Writer<'_> {
    fn tokens(&mut self, tokens: &[Token], out: &mut String) -> Result<()> {
        for token in tokens {
            match token {
                Token::Static(text) => out.push_str(text),
                Token::Variable {
                    name, constraint, ..
                } => {
                    let value = match self.given.get(name.as_str()) {
                        Some(&value) => value,
                        None => self.defaults.get(name).map(String::as_str).ok_or_else(|| {
                            Error::UrlGeneration(format!(
                                "missing parameter `{}` for {}",
                                name,
                                self.route.describe()
                            ))
                        })?,
                    };

                    let constraint = self
                        .route
                        .patterns
                        .get(name)
                        .or(constraint.as_ref())
                        .map_or(self.segment, String::as_str);
                    let regex = Regex::new(&format!("^(?:{})$", constraint)).map_err(|source| {
                        Error::InvalidConstraint {
                            pattern: self.route.path.clone(),
                            variable: name.clone(),
                            source,
                        }
                    })?;
                    if !regex.is_match(value) {
                        return Err(Error::UrlGeneration(format!(
                            "parameter `{}` = `{}` does not match `{}`",
                            name, value, constraint
                        )));
                    }
                    out.push_str(value);
                }
                Token::Optional(inner) => {
                    if self.mentions(inner) {
                        self.tokens(inner, out)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Whether any variable inside `tokens` was given.
    fn mentions(&self, tokens: &[Token]) -> bool {
        tokens.iter().any(|token| match token {
            Token::Static(_) => false,
            Token::Variable { name, .. } => self.given.contains_key(name.as_str()),
            Token::Optional(inner) => self.mentions(inner),
        })
    }
}
