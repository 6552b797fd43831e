//! The compiled matcher and the match engine.
//!
//! A [`CompiledMatcher`] is built from [`MatcherData`], plain serializable
//! data made of
//!  1) an index of literal paths,
//!  2) one merged regex for every dynamic path, or a few consecutive ones
//!     when a single regex would exceed the engine's size limit,
//!  3) the variable bindings of each alternative of those regexes, and
//!  4) the host, scheme and method requirements of each route.
//!
//! Matching is a hash lookup for literal paths and usually a single regex
//! execution otherwise. Requirements are checked only after the path (and
//! host and scheme) matched, which is what separates a `405` from a `404`.
use crate::error::{Error, Result};

use std::collections::BTreeMap;
use std::fs;
use std::ops::Index;
use std::path::Path;

use hyper::header::HOST;
use hyper::Request;
use regex::{Captures, Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Compiled size limit of each regex, in bytes, unless configured otherwise.
pub(crate) const DEFAULT_SIZE_LIMIT: usize = 10 * (1 << 20);

/// A capture group bound to a route variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub name: String,
    pub group: usize,
}

/// One alternative of a merged regex, shared by every route with the
/// same path fragment and variable names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leaf {
    /// Index of the marker group in the merged regex of its chunk.
    pub marker: usize,
    /// Variable bindings inside that regex.
    pub bindings: Vec<Binding>,
    /// The fragment as its own anchored regex.
    pub regex: String,
    /// Variable bindings inside `regex`.
    pub standalone: Vec<Binding>,
    /// Route ids, ascending.
    pub routes: Vec<usize>,
}

/// A merged regex over a run of consecutive leaves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub regex: String,
    /// How many leaves the regex covers, following those of the previous
    /// chunks.
    pub leaves: usize,
}

/// A compiled host pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRule {
    pub regex: String,
    pub bindings: Vec<Binding>,
}

/// What a request must satisfy, besides its path, to reach a route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirements {
    pub methods: Vec<String>,
    /// Empty means any scheme.
    pub schemes: Vec<String>,
    pub host: Option<HostRule>,
    /// Values of variables that did not participate in a match.
    pub defaults: BTreeMap<String, String>,
}

/// The serializable form of a [`CompiledMatcher`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatcherData {
    pub static_paths: BTreeMap<String, Vec<usize>>,
    /// Merged regexes, tried in order. Together they cover `leaves`.
    pub chunks: Vec<Chunk>,
    /// In alternation order, which is also the order of their first route.
    pub leaves: Vec<Leaf>,
    /// Indexed by route id.
    pub routes: Vec<Requirements>,
    /// Size limit passed to the regex engine for every regex.
    #[serde(default = "default_size_limit")]
    pub size_limit: usize,
}

impl Default for MatcherData {
    fn default() -> Self {
        MatcherData {
            static_paths: BTreeMap::new(),
            chunks: Vec::new(),
            leaves: Vec::new(),
            routes: Vec::new(),
            size_limit: DEFAULT_SIZE_LIMIT,
        }
    }
}

fn default_size_limit() -> usize {
    DEFAULT_SIZE_LIMIT
}

/// The request attributes the matcher looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    method: String,
    path: String,
    host: String,
    scheme: String,
}

impl RequestContext {
    /// A request for `path` with no host and the `http` scheme.
    pub fn new(method: impl AsRef<str>, path: impl Into<String>) -> Self {
        RequestContext {
            method: method.as_ref().to_ascii_uppercase(),
            path: path.into(),
            host: String::new(),
            scheme: "http".to_owned(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_scheme(mut self, scheme: impl AsRef<str>) -> Self {
        self.scheme = scheme.as_ref().to_ascii_lowercase();
        self
    }

    pub(crate) fn with_method(mut self, method: impl AsRef<str>) -> Self {
        self.method = method.as_ref().to_ascii_uppercase();
        self
    }

    pub(crate) fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Reads method, path, host and scheme off a hyper request. The host
    /// comes from the URI authority or else the `Host` header.
    pub fn from_request<B>(req: &Request<B>) -> Self {
        let host = req
            .uri()
            .host()
            .map(str::to_owned)
            .or_else(|| {
                req.headers()
                    .get(HOST)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_owned)
            })
            .unwrap_or_default();

        RequestContext::new(req.method().as_str(), req.uri().path())
            .with_host(host)
            .with_scheme(req.uri().scheme_str().unwrap_or("http"))
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }
}

/// A single key/value pair extracted from a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub key: String,
    pub value: String,
}

/// Variables extracted from a matched request, in capture order with host
/// variables last. A host variable replaces a path variable of the same
/// name and takes its place at the end.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    params: Vec<Param>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value of the first parameter registered under `key`.
    pub fn get(&self, key: impl AsRef<str>) -> Option<&str> {
        self.params
            .iter()
            .find(|param| param.key == key.as_ref())
            .map(|param| param.value.as_str())
    }

    /// Appends a parameter. A previous parameter under `key` is removed.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.params.retain(|param| param.key != key);
        self.params.push(Param {
            key,
            value: value.into(),
        });
    }

    pub fn contains(&self, key: impl AsRef<str>) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Param> {
        self.params.iter()
    }
}

impl Index<usize> for Params {
    type Output = Param;

    fn index(&self, i: usize) -> &Param {
        &self.params[i]
    }
}

impl<'a> IntoIterator for &'a Params {
    type Item = &'a Param;
    type IntoIter = std::slice::Iter<'a, Param>;

    fn into_iter(self) -> Self::IntoIter {
        self.params.iter()
    }
}

/// A successful match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    /// Position of the route in its collection.
    pub route: usize,
    pub params: Params,
}

/// The outcome of a lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchResult {
    Found(RouteMatch),
    /// Some route matched path, host and scheme, but none the method.
    /// Carries the declared methods of all of them.
    MethodNotAllowed(Vec<String>),
    NotFound,
}

/// A compiled, read-only route matcher.
#[derive(Debug, Clone)]
pub struct CompiledMatcher {
    data: MatcherData,
    chunks: Vec<Regex>,
    leaves: Vec<Regex>,
    hosts: Vec<Option<Regex>>,
}

#[derive(Serialize, Deserialize)]
struct CacheFile {
    fingerprint: String,
    matcher: MatcherData,
}

impl CompiledMatcher {
    /// Compiles the regexes described by `data`.
    pub fn from_data(data: MatcherData) -> Result<Self> {
        let routes = data.routes.len();
        let ids = data
            .static_paths
            .values()
            .chain(data.leaves.iter().map(|leaf| &leaf.routes))
            .flatten();
        for &id in ids {
            if id >= routes {
                return Err(Error::InvalidMatcher(format!("unknown route id {}", id)));
            }
        }
        if data.leaves.iter().any(|leaf| leaf.routes.is_empty()) {
            return Err(Error::InvalidMatcher("alternative without routes".to_owned()));
        }

        let covered: usize = data.chunks.iter().map(|chunk| chunk.leaves).sum();
        if covered != data.leaves.len() {
            return Err(Error::InvalidMatcher(format!(
                "regexes cover {} of {} alternatives",
                covered,
                data.leaves.len()
            )));
        }

        let limit = data.size_limit;
        let chunks = data
            .chunks
            .iter()
            .map(|chunk| build(&chunk.regex, limit))
            .collect::<Result<Vec<_>, _>>()?;
        let leaves = data
            .leaves
            .iter()
            .map(|leaf| build(&leaf.regex, limit))
            .collect::<Result<Vec<_>, _>>()?;
        let hosts = data
            .routes
            .iter()
            .map(|route| route.host.as_ref().map(|host| build(&host.regex, limit)).transpose())
            .collect::<Result<Vec<_>, _>>()?;

        Ok(CompiledMatcher {
            data,
            chunks,
            leaves,
            hosts,
        })
    }

    pub fn data(&self) -> &MatcherData {
        &self.data
    }

    pub fn into_data(self) -> MatcherData {
        self.data
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.data)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Self::from_data(serde_json::from_str(json)?)
    }

    /// Loads a matcher written by [`save`](Self::save). Returns `None` when
    /// the file was written for different routes.
    pub fn load(path: impl AsRef<Path>, fingerprint: &str) -> Result<Option<Self>> {
        let file: CacheFile = serde_json::from_slice(&fs::read(path)?)?;
        if file.fingerprint != fingerprint {
            return Ok(None);
        }
        Self::from_data(file.matcher).map(Some)
    }

    /// Writes the matcher to `path`, tagged with the fingerprint of the
    /// routes it was compiled from.
    pub fn save(&self, path: impl AsRef<Path>, fingerprint: &str) -> Result<()> {
        let path = path.as_ref();
        let file = CacheFile {
            fingerprint: fingerprint.to_owned(),
            matcher: self.data.clone(),
        };

        let tmp = path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec(&file)?)?;
        fs::rename(&tmp, path)?;
        debug!(path = %path.display(), "wrote compiled routes");
        Ok(())
    }

    /// Resolves a request to at most one route.
    pub fn lookup(&self, req: &RequestContext) -> MatchResult {
        let mut allowed = Vec::new();

        let mut found = self
            .data
            .static_paths
            .get(req.path())
            .and_then(|ids| {
                ids.iter()
                    .find_map(|&id| self.accept(id, req, Vec::new(), &mut allowed))
            });

        // a dynamic route registered before the static one takes precedence
        let first_dynamic = self.data.leaves.first().map(|leaf| leaf.routes[0]);
        let search_dynamic = match (&found, first_dynamic) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(m), Some(first)) => first < m.route,
        };
        if search_dynamic {
            let bound = found.as_ref().map(|m| m.route);
            if let Some(m) = self.dynamic(req, bound, &mut allowed) {
                found = Some(m);
            }
        }

        let result = match found {
            Some(m) => MatchResult::Found(m),
            None if !allowed.is_empty() => MatchResult::MethodNotAllowed(allowed),
            None => MatchResult::NotFound,
        };
        trace!(method = req.method(), path = req.path(), ?result, "route lookup");
        result
    }

    /// Methods declared by the routes that match the request's path, host
    /// and scheme.
    pub fn allowed(&self, req: &RequestContext) -> Vec<String> {
        // no route declares an empty method, so every candidate is collected
        match self.lookup(&req.clone().with_method("")) {
            MatchResult::MethodNotAllowed(allowed) => allowed,
            _ => Vec::new(),
        }
    }

    fn dynamic(
        &self,
        req: &RequestContext,
        mut bound: Option<usize>,
        allowed: &mut Vec<String>,
    ) -> Option<RouteMatch> {
        // chunks hold consecutive leaves, so the first chunk that matches
        // holds the first matching leaf
        let mut offset = 0;
        let mut hit = None;
        for (chunk, regex) in self.data.chunks.iter().zip(&self.chunks) {
            if let Some(caps) = regex.captures(req.path()) {
                hit = self.data.leaves[offset..offset + chunk.leaves]
                    .iter()
                    .position(|leaf| caps.get(leaf.marker).is_some())
                    .map(|i| (offset + i, caps));
                break;
            }
            offset += chunk.leaves;
        }
        let (start, caps) = hit?;

        let leaf = &self.data.leaves[start];
        let mut found = self.candidates(leaf, &caps, &leaf.bindings, req, bound, allowed);
        if let Some(m) = &found {
            bound = Some(m.route);
        }

        // A merged regex stops at the first alternative that matches. A
        // later alternative can still hold an earlier route whose method
        // fits, or add to the allowed methods.
        for (leaf, regex) in self.data.leaves.iter().zip(&self.leaves).skip(start + 1) {
            if bound.map_or(false, |bound| leaf.routes[0] >= bound) {
                break;
            }
            let caps = match regex.captures(req.path()) {
                Some(caps) => caps,
                None => continue,
            };
            if let Some(m) = self.candidates(leaf, &caps, &leaf.standalone, req, bound, allowed) {
                bound = Some(m.route);
                found = Some(m);
            }
        }

        found
    }

    fn candidates(
        &self,
        leaf: &Leaf,
        caps: &Captures<'_>,
        bindings: &[Binding],
        req: &RequestContext,
        bound: Option<usize>,
        allowed: &mut Vec<String>,
    ) -> Option<RouteMatch> {
        for &id in &leaf.routes {
            if bound.map_or(false, |bound| id >= bound) {
                break;
            }
            let values = bindings
                .iter()
                .map(|b| (b.name.as_str(), caps.get(b.group).map(|m| m.as_str())))
                .collect();
            if let Some(m) = self.accept(id, req, values, allowed) {
                return Some(m);
            }
        }
        None
    }

    /// Checks host, scheme and method of route `id`, in that order. A
    /// method mismatch records the route's methods in `allowed`.
    fn accept(
        &self,
        id: usize,
        req: &RequestContext,
        values: Vec<(&str, Option<&str>)>,
        allowed: &mut Vec<String>,
    ) -> Option<RouteMatch> {
        let route = &self.data.routes[id];
        let mut params = Params::new();
        for (name, value) in values {
            bind(&mut params, &route.defaults, name, value);
        }

        if let (Some(host), Some(regex)) = (&route.host, &self.hosts[id]) {
            let caps = regex.captures(strip_port(req.host()))?;
            for b in &host.bindings {
                bind(&mut params, &route.defaults, &b.name, caps.get(b.group).map(|m| m.as_str()));
            }
        }

        if !route.schemes.is_empty()
            && !route
                .schemes
                .iter()
                .any(|scheme| scheme.eq_ignore_ascii_case(req.scheme()))
        {
            return None;
        }

        if !method_allowed(&route.methods, req.method()) {
            for method in &route.methods {
                if !allowed.contains(method) {
                    allowed.push(method.clone());
                }
            }
            return None;
        }

        Some(RouteMatch { route: id, params })
    }
}

pub(crate) fn build(pattern: &str, size_limit: usize) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).size_limit(size_limit).build()
}

fn bind(params: &mut Params, defaults: &BTreeMap<String, String>, name: &str, value: Option<&str>) {
    if let Some(value) = value.or_else(|| defaults.get(name).map(String::as_str)) {
        params.insert(name, value);
    }
}

/// `HEAD` is served by `GET` routes.
pub(crate) fn method_allowed(methods: &[String], method: &str) -> bool {
    methods.iter().any(|m| m == method) || (method == "HEAD" && methods.iter().any(|m| m == "GET"))
}

fn strip_port(host: &str) -> &str {
    match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requirements(methods: &[&str]) -> Requirements {
        Requirements {
            methods: methods.iter().map(|m| m.to_string()).collect(),
            schemes: Vec::new(),
            host: None,
            defaults: BTreeMap::new(),
        }
    }

    fn binding(name: &str, group: usize) -> Binding {
        Binding {
            name: name.into(),
            group,
        }
    }

    // hand-assembled equivalent of `/item/{id}` (GET, POST) and `/item/{id:[0-9]+}` (PUT)
    fn data() -> MatcherData {
        let mut static_paths = BTreeMap::new();
        static_paths.insert("/".to_string(), vec![0]);
        MatcherData {
            static_paths,
            chunks: vec![Chunk {
                regex: "^(?:/item/(?:([^/]+)()|([0-9]+)()))$".into(),
                leaves: 2,
            }],
            leaves: vec![
                Leaf {
                    marker: 2,
                    bindings: vec![binding("id", 1)],
                    regex: "^(?:/item/([^/]+)())$".into(),
                    standalone: vec![binding("id", 1)],
                    routes: vec![1, 2],
                },
                Leaf {
                    marker: 4,
                    bindings: vec![binding("id", 3)],
                    regex: "^(?:/item/([0-9]+)())$".into(),
                    standalone: vec![binding("id", 1)],
                    routes: vec![3],
                },
            ],
            routes: vec![
                requirements(&["GET"]),
                requirements(&["GET"]),
                requirements(&["POST"]),
                requirements(&["PUT"]),
            ],
            size_limit: DEFAULT_SIZE_LIMIT,
        }
    }

    fn lookup(matcher: &CompiledMatcher, method: &str, path: &str) -> MatchResult {
        matcher.lookup(&RequestContext::new(method, path))
    }

    #[test]
    fn static_and_dynamic_lookup() {
        let matcher = CompiledMatcher::from_data(data()).unwrap();
        match lookup(&matcher, "GET", "/") {
            MatchResult::Found(m) => assert_eq!(m.route, 0),
            other => panic!("{:?}", other),
        }
        match lookup(&matcher, "POST", "/item/a") {
            MatchResult::Found(m) => {
                assert_eq!(m.route, 2);
                assert_eq!(m.params.get("id"), Some("a"));
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn later_alternatives_are_searched_on_method_mismatch() {
        let matcher = CompiledMatcher::from_data(data()).unwrap();
        match lookup(&matcher, "PUT", "/item/42") {
            MatchResult::Found(m) => {
                assert_eq!(m.route, 3);
                assert_eq!(m.params.get("id"), Some("42"));
            }
            other => panic!("{:?}", other),
        }
        assert_eq!(
            lookup(&matcher, "PUT", "/item/abc"),
            MatchResult::MethodNotAllowed(vec!["GET".into(), "POST".into()])
        );
        assert_eq!(
            lookup(&matcher, "DELETE", "/item/42"),
            MatchResult::MethodNotAllowed(vec!["GET".into(), "POST".into(), "PUT".into()])
        );
        assert_eq!(lookup(&matcher, "GET", "/nothing"), MatchResult::NotFound);
    }

    #[test]
    fn head_falls_back_to_get() {
        let matcher = CompiledMatcher::from_data(data()).unwrap();
        assert!(matches!(lookup(&matcher, "HEAD", "/"), MatchResult::Found(_)));
    }

    #[test]
    fn allowed_collects_every_candidate() {
        let matcher = CompiledMatcher::from_data(data()).unwrap();
        let allowed = matcher.allowed(&RequestContext::new("GET", "/item/1"));
        assert_eq!(allowed, vec!["GET", "POST", "PUT"]);
    }

    #[test]
    fn hosts_and_schemes() {
        let mut data = data();
        data.routes[0].host = Some(HostRule {
            regex: r"(?i)^(?:([^.]+)\.example\.com())$".into(),
            bindings: vec![binding("tenant", 1)],
        });
        data.routes[0].schemes = vec!["https".into()];
        let matcher = CompiledMatcher::from_data(data).unwrap();

        let req = RequestContext::new("GET", "/")
            .with_host("Acme.Example.com:8443")
            .with_scheme("HTTPS");
        match matcher.lookup(&req) {
            MatchResult::Found(m) => assert_eq!(m.params.get("tenant"), Some("Acme")),
            other => panic!("{:?}", other),
        }

        let wrong_scheme = req.clone().with_scheme("http");
        assert_eq!(matcher.lookup(&wrong_scheme), MatchResult::NotFound);

        let wrong_host = req.with_host("example.org");
        assert_eq!(matcher.lookup(&wrong_host), MatchResult::NotFound);
    }

    #[test]
    fn rejects_inconsistent_data() {
        let mut bad = data();
        bad.leaves[1].routes = vec![9];
        assert!(matches!(
            CompiledMatcher::from_data(bad),
            Err(Error::InvalidMatcher(_))
        ));

        let mut bad = data();
        bad.chunks[0].regex = "(".into();
        assert!(matches!(CompiledMatcher::from_data(bad), Err(Error::Regex(_))));

        let mut bad = data();
        bad.chunks[0].leaves = 1;
        assert!(matches!(
            CompiledMatcher::from_data(bad),
            Err(Error::InvalidMatcher(_))
        ));
    }

    #[test]
    fn split_regexes_keep_registration_order() {
        let mut data = data();
        data.chunks = vec![
            Chunk {
                regex: "^(?:/item/([^/]+)())$".into(),
                leaves: 1,
            },
            Chunk {
                regex: "^(?:/item/([0-9]+)())$".into(),
                leaves: 1,
            },
        ];
        data.leaves[1].marker = 2;
        data.leaves[1].bindings = vec![binding("id", 1)];
        let matcher = CompiledMatcher::from_data(data).unwrap();

        match lookup(&matcher, "POST", "/item/5") {
            MatchResult::Found(m) => assert_eq!(m.route, 2),
            other => panic!("{:?}", other),
        }
        match lookup(&matcher, "PUT", "/item/5") {
            MatchResult::Found(m) => {
                assert_eq!(m.route, 3);
                assert_eq!(m.params.get("id"), Some("5"));
            }
            other => panic!("{:?}", other),
        }
        assert_eq!(
            lookup(&matcher, "PUT", "/item/x"),
            MatchResult::MethodNotAllowed(vec!["GET".into(), "POST".into()])
        );
    }

    #[test]
    fn size_limit_applies_to_every_regex() {
        let mut data = data();
        data.size_limit = 16;
        assert!(matches!(
            CompiledMatcher::from_data(data),
            Err(Error::Regex(regex::Error::CompiledTooBig(_)))
        ));
    }

    #[test]
    fn json_round_trip_preserves_results() {
        let matcher = CompiledMatcher::from_data(data()).unwrap();
        let reloaded = CompiledMatcher::from_json(&matcher.to_json().unwrap()).unwrap();
        assert_eq!(reloaded.data(), matcher.data());
        for (method, path) in [("GET", "/"), ("PUT", "/item/7"), ("PATCH", "/item/x"), ("GET", "/x")] {
            assert_eq!(lookup(&reloaded, method, path), lookup(&matcher, method, path));
        }
    }

    #[test]
    fn params_replace_existing_keys() {
        let mut params = Params::new();
        params.insert("id", "1");
        params.insert("host", "a");
        params.insert("id", "2");
        assert_eq!(params.len(), 2);
        assert_eq!(params.get("id"), Some("2"));
        assert_eq!(params[0].key, "host");
        assert_eq!(params[1].key, "id");
    }

    #[test]
    fn ports_are_stripped() {
        assert_eq!(strip_port("example.com:80"), "example.com");
        assert_eq!(strip_port("example.com"), "example.com");
        assert_eq!(strip_port("[::1]:8080"), "[::1]");
        assert_eq!(strip_port("[::1]"), "[::1]");
    }
}
