//! Route registration, grouping and compilation.
use crate::error::{Error, Result};
use crate::matcher::{
    self, Chunk, CompiledMatcher, HostRule, Leaf, MatcherData, Requirements, DEFAULT_SIZE_LIMIT,
};
use crate::merge::{self, Merged, Strategy};
use crate::pattern::{split_target, Atom, Pattern, HOST_SEGMENT, PATH_SEGMENT};
use crate::pipeline::Middleware;
use crate::route::{MiddlewareRef, Route};

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Settings for [`RouteCollection::compile_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// How much of a prefix alternatives may share.
    pub strategy: Strategy,
    /// Compiled size limit of each regex, in bytes. A merged regex over the
    /// limit is split into several, each sharing prefixes only within
    /// itself.
    pub size_limit: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            strategy: Strategy::default(),
            size_limit: DEFAULT_SIZE_LIMIT,
        }
    }
}

/// Attributes shared by every route added inside
/// [`RouteCollection::group`].
///
/// ```rust
/// use regexrouter::{Group, Route, RouteCollection};
///
/// let mut routes = RouteCollection::new();
/// routes.group(Group::new("/admin").name("admin.").middleware_named("auth"), |admin| {
///     admin.add(Route::new(&["GET"], "/users", "users@index").name("users"));
/// });
///
/// let route = routes.find("admin.users").unwrap();
/// assert_eq!(route.path, "/admin/users");
/// assert_eq!(route.middlewares.len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Group {
    pub prefix: String,
    pub domain: Option<String>,
    pub middlewares: Vec<MiddlewareRef>,
    pub patterns: BTreeMap<String, String>,
    pub defaults: BTreeMap<String, String>,
    /// Prepended to route names.
    pub name: String,
    pub schemes: Vec<String>,
}

impl Group {
    /// A group with a path prefix. Like route paths, the prefix may start
    /// with `//host` or `scheme://host`.
    pub fn new(prefix: impl AsRef<str>) -> Self {
        let target = split_target(prefix.as_ref());
        let prefix = match target.host {
            // a bare host has no path prefix
            Some(_) if target.path == "/" => String::new(),
            _ => target.path,
        };
        Group {
            prefix,
            domain: target.host,
            schemes: target.scheme.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn domain(mut self, host: impl Into<String>) -> Self {
        self.domain = Some(host.into());
        self
    }

    pub fn middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middlewares
            .push(MiddlewareRef::Instance(Arc::new(middleware)));
        self
    }

    pub fn middleware_named(mut self, name: impl Into<String>) -> Self {
        self.middlewares.push(MiddlewareRef::Named(name.into()));
        self
    }

    pub fn pattern(mut self, name: impl Into<String>, regex: impl Into<String>) -> Self {
        self.patterns.insert(name.into(), regex.into());
        self
    }

    pub fn default(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.defaults.insert(name.into(), value.into());
        self
    }

    pub fn name(mut self, prefix: impl Into<String>) -> Self {
        self.name = prefix.into();
        self
    }

    pub fn scheme(mut self, scheme: impl AsRef<str>) -> Self {
        self.schemes.push(scheme.as_ref().to_ascii_lowercase());
        self
    }

    /// Merges the group into `route`. Route attributes win over group ones.
    fn apply(&self, route: &mut Route) {
        route.path = join(&self.prefix, &route.path);
        if route.domain.is_none() {
            route.domain = self.domain.clone();
        }

        let mut middlewares = self.middlewares.clone();
        middlewares.append(&mut route.middlewares);
        route.middlewares = middlewares;

        for (name, regex) in &self.patterns {
            route.patterns.entry(name.clone()).or_insert_with(|| regex.clone());
        }
        for (name, value) in &self.defaults {
            route.defaults.entry(name.clone()).or_insert_with(|| value.clone());
        }

        if let Some(name) = &mut route.name {
            name.insert_str(0, &self.name);
        }
        if route.schemes.is_empty() {
            route.schemes = self.schemes.clone();
        }
    }
}

fn join(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return path.to_owned();
    }
    if path.starts_with('[') {
        return format!("{}{}", prefix, path);
    }
    match path.trim_start_matches('/') {
        "" => prefix.to_owned(),
        rest => format!("{}/{}", prefix, rest),
    }
}

/// An ordered set of routes.
///
/// Registration order is matching precedence: when two routes accept the
/// same request, the one added first wins.
#[derive(Debug, Clone, Default)]
pub struct RouteCollection {
    routes: Vec<Route>,
    groups: Vec<Group>,
}

impl RouteCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a route, merging in the attributes of the enclosing groups.
    pub fn add(&mut self, mut route: Route) -> &mut Self {
        for group in self.groups.iter().rev() {
            group.apply(&mut route);
        }
        self.routes.push(route);
        self
    }

    /// Runs `build` with `group` applied to every route it adds. Groups
    /// nest.
    pub fn group<F>(&mut self, group: Group, build: F) -> &mut Self
    where
        F: FnOnce(&mut RouteCollection),
    {
        self.groups.push(group);
        build(self);
        self.groups.pop();
        self
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn route(&self, id: usize) -> Option<&Route> {
        self.routes.get(id)
    }

    /// Finds a route by name.
    pub fn find(&self, name: &str) -> Option<&Route> {
        self.routes
            .iter()
            .find(|route| route.name.as_deref() == Some(name))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Moves static routes before dynamic ones, and routes with fewer
    /// variables and optional segments before the rest. The sort is stable.
    ///
    /// Only routes that accept the same request are affected in what they
    /// match, and then only in which of them wins.
    pub fn sort(&mut self) {
        self.routes.sort_by_cached_key(|route| {
            let path = Pattern::parse(&route.path).map_or((usize::MAX, usize::MAX), |p| p.dynamism());
            let host = route
                .domain
                .as_deref()
                .and_then(|domain| Pattern::parse(domain).ok())
                .map_or((0, 0), |p| p.dynamism());
            (path.0 + path.1 > 0, path, host)
        });
    }

    /// A hex SHA-256 of everything that goes into the compiled matcher.
    pub fn fingerprint(&self) -> String {
        self.fingerprint_with(&CompileOptions::default())
    }

    pub fn fingerprint_with(&self, options: &CompileOptions) -> String {
        let mut hasher = Sha256::new();
        field(&mut hasher, env!("CARGO_PKG_VERSION"));
        field(&mut hasher, options.strategy.as_str());
        hasher.update((options.size_limit as u64).to_le_bytes());
        for route in &self.routes {
            field(&mut hasher, route.name.as_deref().unwrap_or(""));
            field(&mut hasher, &route.path);
            field(&mut hasher, route.domain.as_deref().unwrap_or(""));
            list(&mut hasher, &route.methods);
            list(&mut hasher, &route.schemes);
            map(&mut hasher, &route.patterns);
            map(&mut hasher, &route.defaults);
        }
        hex::encode(hasher.finalize())
    }

    /// Parses, validates and merges every route.
    pub fn compile(&self) -> Result<CompiledMatcher> {
        self.compile_with(&CompileOptions::default())
    }

    pub fn compile_with(&self, options: &CompileOptions) -> Result<CompiledMatcher> {
        self.check_names()?;

        let mut requirements = Vec::with_capacity(self.routes.len());
        let mut static_paths: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        let mut fragments: Vec<Vec<Atom>> = Vec::new();
        let mut leaf_routes: Vec<Vec<usize>> = Vec::new();
        // routes share an alternative only if their captures bind the same names
        let mut leaf_index: HashMap<(String, Vec<String>), usize> = HashMap::new();
        let mut seen: HashMap<(String, String), Vec<usize>> = HashMap::new();

        for (id, route) in self.routes.iter().enumerate() {
            let compiled = compile_route(route)?;

            let key = (compiled.host_regex.clone(), compiled.path_regex.clone());
            let others = seen.entry(key).or_default();
            if let Some(&first) = others.iter().find(|&&other| overlaps(&self.routes[other], route)) {
                return Err(Error::DuplicateRoute {
                    first: self.routes[first].describe(),
                    second: route.describe(),
                });
            }
            others.push(id);

            match compiled.static_path {
                Some(path) => static_paths.entry(path).or_default().push(id),
                None => match leaf_index.entry((compiled.path_regex, compiled.variables)) {
                    Entry::Occupied(leaf) => leaf_routes[*leaf.get()].push(id),
                    Entry::Vacant(leaf) => {
                        leaf.insert(fragments.len());
                        fragments.push(compiled.atoms);
                        leaf_routes.push(vec![id]);
                    }
                },
            }
            requirements.push(compiled.requirements);
        }

        let standalone: Vec<_> = fragments.iter().map(|atoms| merge::standalone(atoms)).collect();

        let mut chunks = Vec::new();
        let mut layouts = Vec::with_capacity(fragments.len());
        for merged in merge_chunks(&fragments, options)? {
            chunks.push(Chunk {
                regex: merged.regex,
                leaves: merged.leaves.len(),
            });
            layouts.extend(merged.leaves);
        }
        let leaves = layouts
            .into_iter()
            .zip(standalone)
            .zip(leaf_routes)
            .map(|((layout, (regex, bindings)), routes)| Leaf {
                marker: layout.marker,
                bindings: layout.bindings,
                regex,
                standalone: bindings,
                routes,
            })
            .collect();

        debug!(
            routes = self.routes.len(),
            static_paths = static_paths.len(),
            alternatives = fragments.len(),
            regexes = chunks.len(),
            strategy = options.strategy.as_str(),
            "compiled routes"
        );
        CompiledMatcher::from_data(MatcherData {
            static_paths,
            chunks,
            leaves,
            routes: requirements,
            size_limit: options.size_limit,
        })
    }

    fn check_names(&self) -> Result<()> {
        let mut names = HashSet::new();
        for name in self.routes.iter().filter_map(|route| route.name.as_deref()) {
            if !names.insert(name) {
                return Err(Error::DuplicateName(name.to_owned()));
            }
        }
        Ok(())
    }
}

impl Extend<Route> for RouteCollection {
    fn extend<I: IntoIterator<Item = Route>>(&mut self, routes: I) {
        for route in routes {
            self.add(route);
        }
    }
}

impl FromIterator<Route> for RouteCollection {
    fn from_iter<I: IntoIterator<Item = Route>>(routes: I) -> Self {
        let mut collection = RouteCollection::new();
        collection.extend(routes);
        collection
    }
}

struct CompiledRoute {
    static_path: Option<String>,
    atoms: Vec<Atom>,
    path_regex: String,
    /// Path variables in capture order.
    variables: Vec<String>,
    host_regex: String,
    requirements: Requirements,
}

fn compile_route(route: &Route) -> Result<CompiledRoute> {
    if route.methods.is_empty() {
        return Err(Error::NoMethods(route.describe()));
    }
    if !route.path.starts_with('/') {
        return Err(Error::syntax(&route.path, &route.path, "path must start with `/`"));
    }

    let path = Pattern::parse(&route.path)?;
    let fragment = path.compile(PATH_SEGMENT, &route.patterns)?;
    let mut variables: HashSet<String> = path.variables().into_iter().map(|v| v.name).collect();
    let mut defaults = path.defaults();

    let host = match &route.domain {
        Some(domain) => {
            let pattern = Pattern::parse(domain)?;
            let fragment = pattern.compile(HOST_SEGMENT, &route.patterns)?;
            variables.extend(pattern.variables().into_iter().map(|v| v.name));
            for (name, value) in pattern.defaults() {
                defaults.insert(name, value);
            }
            let (regex, bindings) = merge::standalone(&fragment.atoms);
            Some(HostRule {
                regex: format!("(?i){}", regex),
                bindings,
            })
        }
        None => None,
    };

    for (name, value) in &route.defaults {
        if variables.contains(name) {
            defaults.insert(name.clone(), value.clone());
        }
    }

    Ok(CompiledRoute {
        static_path: path.static_text(),
        path_regex: fragment.regex(),
        variables: fragment.variables(),
        host_regex: host.as_ref().map(|h| h.regex.clone()).unwrap_or_default(),
        atoms: fragment.atoms,
        requirements: Requirements {
            methods: route.methods.clone(),
            schemes: route.schemes.clone(),
            host,
            defaults,
        },
    })
}

/// Merges `fragments` into one regex, or into consecutive runs of them
/// while a merged regex exceeds the size limit.
fn merge_chunks(fragments: &[Vec<Atom>], options: &CompileOptions) -> Result<Vec<Merged>> {
    if fragments.is_empty() {
        return Ok(Vec::new());
    }

    let merged = merge::merge(fragments, options.strategy);
    match matcher::build(&merged.regex, options.size_limit) {
        Ok(_) => Ok(vec![merged]),
        Err(err @ regex::Error::CompiledTooBig(_)) if fragments.len() > 1 => {
            warn!(alternatives = fragments.len(), %err, "merged route regex too big, splitting it");
            let (head, tail) = fragments.split_at(fragments.len() / 2);
            let mut chunks = merge_chunks(head, options)?;
            chunks.extend(merge_chunks(tail, options)?);
            Ok(chunks)
        }
        Err(err) => Err(err.into()),
    }
}

/// Whether two routes with the same host and path compete for a request.
fn overlaps(a: &Route, b: &Route) -> bool {
    let methods = a.methods.iter().any(|m| b.methods.contains(m));
    let schemes = a.schemes.is_empty()
        || b.schemes.is_empty()
        || a.schemes.iter().any(|s| b.schemes.contains(s));
    methods && schemes
}

fn field(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

fn list(hasher: &mut Sha256, values: &[String]) {
    hasher.update((values.len() as u64).to_le_bytes());
    for value in values {
        field(hasher, value);
    }
}

fn map(hasher: &mut Sha256, values: &BTreeMap<String, String>) {
    hasher.update((values.len() as u64).to_le_bytes());
    for (key, value) in values {
        field(hasher, key);
        field(hasher, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::{MatchResult, RequestContext};

    fn route(methods: &[&str], path: &str) -> Route {
        Route::new(methods, path, path)
    }

    fn found(matcher: &CompiledMatcher, method: &str, path: &str) -> (usize, Vec<(String, String)>) {
        match matcher.lookup(&RequestContext::new(method, path)) {
            MatchResult::Found(m) => (
                m.route,
                m.params
                    .iter()
                    .map(|p| (p.key.clone(), p.value.clone()))
                    .collect(),
            ),
            other => panic!("{} {}: {:?}", method, path, other),
        }
    }

    fn collection(routes: &[(&[&str], &str)]) -> RouteCollection {
        routes
            .iter()
            .map(|(methods, path)| route(methods, path))
            .collect()
    }

    #[test]
    fn static_and_dynamic() {
        let matcher = collection(&[
            (&["GET"], "/"),
            (&["GET"], "/user/{id:[0-9]+}"),
            (&["GET"], "/user/{id:[0-9]+}/posts/{post}"),
            (&["GET"], "/users"),
        ])
        .compile()
        .unwrap();

        assert_eq!(found(&matcher, "GET", "/").0, 0);
        assert_eq!(found(&matcher, "GET", "/user/23"), (1, vec![("id".into(), "23".into())]));
        assert_eq!(
            found(&matcher, "GET", "/user/23/posts/hello"),
            (2, vec![("id".into(), "23".into()), ("post".into(), "hello".into())])
        );
        assert_eq!(found(&matcher, "GET", "/users").0, 3);
        assert_eq!(
            matcher.lookup(&RequestContext::new("GET", "/user/abc")),
            MatchResult::NotFound
        );
        assert_eq!(matcher.data().static_paths.len(), 2);
        assert_eq!(matcher.data().leaves.len(), 2);
    }

    #[test]
    fn optional_segments_use_defaults() {
        let matcher = RouteCollection::from_iter([
            route(&["GET"], "/test[/{home}]"),
            route(&["GET"], "/blog[/{page:[0-9]+}]").default("page", "1"),
        ])
        .compile()
        .unwrap();

        assert_eq!(found(&matcher, "GET", "/test"), (0, vec![]));
        assert_eq!(found(&matcher, "GET", "/test/cool"), (0, vec![("home".into(), "cool".into())]));
        assert_eq!(found(&matcher, "GET", "/blog"), (1, vec![("page".into(), "1".into())]));
        assert_eq!(found(&matcher, "GET", "/blog/4"), (1, vec![("page".into(), "4".into())]));
    }

    #[test]
    fn route_defaults_override_inline_ones() {
        let matcher = RouteCollection::from_iter([route(&["GET"], "/p[/{n=1}]")
            .default("n", "2")
            .default("unused", "x")])
        .compile()
        .unwrap();
        assert_eq!(found(&matcher, "GET", "/p"), (0, vec![("n".into(), "2".into())]));
    }

    #[test]
    fn registration_order_decides() {
        let static_first = collection(&[(&["GET"], "/posts/new"), (&["GET"], "/posts/{slug}")])
            .compile()
            .unwrap();
        assert_eq!(found(&static_first, "GET", "/posts/new").0, 0);

        let dynamic_first = collection(&[(&["GET"], "/posts/{slug}"), (&["GET"], "/posts/new")])
            .compile()
            .unwrap();
        assert_eq!(found(&dynamic_first, "GET", "/posts/new").0, 0);
    }

    #[test]
    fn method_not_allowed_collects_every_route() {
        let matcher = collection(&[(&["GET"], "/"), (&["POST"], "/"), (&["PUT"], "/{page}")])
            .compile()
            .unwrap();
        assert_eq!(
            matcher.lookup(&RequestContext::new("DELETE", "/")),
            MatchResult::MethodNotAllowed(vec!["GET".into(), "POST".into()])
        );
        assert_eq!(
            matcher.lookup(&RequestContext::new("DELETE", "/x")),
            MatchResult::MethodNotAllowed(vec!["PUT".into()])
        );
    }

    #[test]
    fn groups_merge_outside_in() {
        let mut routes = RouteCollection::new();
        routes.group(
            Group::new("/api")
                .name("api.")
                .middleware_named("outer")
                .pattern("id", "[0-9]+")
                .default("format", "json"),
            |api| {
                api.group(Group::new("/v1").name("v1.").middleware_named("inner"), |v1| {
                    v1.add(
                        route(&["GET"], "/users/{id}[.{format}]")
                            .name("users")
                            .middleware_named("route")
                            .default("format", "xml"),
                    );
                    v1.add(route(&["GET"], "/"));
                });
            },
        );
        routes.add(route(&["GET"], "/outside"));

        let users = routes.find("api.v1.users").unwrap();
        assert_eq!(users.path, "/api/v1/users/{id}[.{format}]");
        let names: Vec<_> = users
            .middlewares
            .iter()
            .map(|m| match m {
                MiddlewareRef::Named(name) => name.as_str(),
                MiddlewareRef::Instance(_) => "instance",
            })
            .collect();
        assert_eq!(names, ["outer", "inner", "route"]);
        assert_eq!(users.patterns["id"], "[0-9]+");
        assert_eq!(users.defaults["format"], "xml");

        assert_eq!(routes.route(1).unwrap().path, "/api/v1");
        let outside = routes.route(2).unwrap();
        assert_eq!(outside.path, "/outside");
        assert!(outside.middlewares.is_empty());
    }

    #[test]
    fn group_domain_is_inherited_unless_set() {
        let mut routes = RouteCollection::new();
        routes.group(Group::new("https://{tenant}.example.com"), |g| {
            g.add(route(&["GET"], "/"));
            g.add(route(&["GET"], "/admin").domain("admin.example.com"));
        });

        assert_eq!(routes.route(0).unwrap().domain.as_deref(), Some("{tenant}.example.com"));
        assert_eq!(routes.route(0).unwrap().schemes, ["https"]);
        assert_eq!(routes.route(1).unwrap().domain.as_deref(), Some("admin.example.com"));

        let matcher = routes.compile().unwrap();
        let req = RequestContext::new("GET", "/")
            .with_host("acme.example.com")
            .with_scheme("https");
        match matcher.lookup(&req) {
            MatchResult::Found(m) => assert_eq!(m.params.get("tenant"), Some("acme")),
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn host_variables_win_over_path_variables() {
        let matcher = RouteCollection::from_iter([route(&["GET"], "//{lang}.example.com/{lang}")])
            .compile()
            .unwrap();
        let req = RequestContext::new("GET", "/en").with_host("de.example.com");
        match matcher.lookup(&req) {
            MatchResult::Found(m) => {
                assert_eq!(m.params.get("lang"), Some("de"));
                assert_eq!(m.params.len(), 1);
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn same_shape_with_different_names() {
        let matcher = collection(&[(&["GET"], "/a/{id}"), (&["POST"], "/a/{slug}")])
            .compile()
            .unwrap();
        assert_eq!(found(&matcher, "GET", "/a/hello"), (0, vec![("id".into(), "hello".into())]));
        assert_eq!(
            found(&matcher, "POST", "/a/hello"),
            (1, vec![("slug".into(), "hello".into())])
        );

        let matcher = RouteCollection::from_iter([
            route(&["GET"], "/p[/{n}]"),
            route(&["POST"], "/p[/{m}]").default("m", "7"),
        ])
        .compile()
        .unwrap();
        assert_eq!(found(&matcher, "POST", "/p"), (1, vec![("m".into(), "7".into())]));
        assert_eq!(found(&matcher, "GET", "/p"), (0, vec![]));
        assert_eq!(found(&matcher, "GET", "/p/3"), (0, vec![("n".into(), "3".into())]));
    }

    #[test]
    fn oversized_regexes_are_split() {
        let mut routes: RouteCollection = (0..24)
            .map(|i| route(&["GET"], &format!("/r{}/{{id:[0-9]+}}/x", i)))
            .collect();
        routes.add(route(&["GET"], "/{any}/{id}/x"));
        routes.add(route(&["DELETE"], "/r3/{id:[0-9]+}/x"));

        // the smallest limit, in steps of 64 bytes, that the regex compiles under
        fn needed(regex: &str) -> usize {
            (1..)
                .map(|n| n * 64)
                .find(|&limit| matcher::build(regex, limit).is_ok())
                .unwrap()
        }

        let whole = routes.compile().unwrap();
        assert_eq!(whole.data().chunks.len(), 1);
        let limit = whole
            .data()
            .leaves
            .iter()
            .map(|leaf| needed(&leaf.regex))
            .max()
            .unwrap();
        assert!(limit < needed(&whole.data().chunks[0].regex));

        let options = CompileOptions {
            size_limit: limit,
            ..CompileOptions::default()
        };
        let split = routes.compile_with(&options).unwrap();
        assert!(split.data().chunks.len() > 1);
        assert_eq!(split.data().leaves.len(), whole.data().leaves.len());

        for (method, path) in [
            ("GET", "/r0/1/x"),
            ("GET", "/r23/42/x"),
            ("GET", "/other/9/x"),
            ("DELETE", "/r3/5/x"),
        ] {
            assert_eq!(found(&split, method, path), found(&whole, method, path));
        }
        assert_eq!(found(&split, "GET", "/r23/42/x").0, 23);
        assert_eq!(found(&split, "GET", "/r23/abc/x").0, 24);
        assert_eq!(
            split.lookup(&RequestContext::new("PUT", "/r3/5/x")),
            MatchResult::MethodNotAllowed(vec!["GET".into(), "DELETE".into()])
        );

        // a single alternative over the limit cannot be split further
        let tiny = CompileOptions {
            size_limit: 16,
            ..CompileOptions::default()
        };
        assert!(matches!(
            routes.compile_with(&tiny),
            Err(Error::Regex(regex::Error::CompiledTooBig(_)))
        ));
    }

    #[test]
    fn groups_build_with_defaults() {
        let group = Group::new("//api.example.com");
        assert_eq!(group.prefix, "");
        assert_eq!(group.domain.as_deref(), Some("api.example.com"));
        assert!(group.middlewares.is_empty() && group.defaults.is_empty());
    }

    #[test]
    fn fingerprint_covers_compile_options() {
        let routes = collection(&[(&["GET"], "/a/{id}")]);
        let flat = CompileOptions {
            strategy: Strategy::Flat,
            ..CompileOptions::default()
        };
        assert_eq!(routes.fingerprint(), routes.fingerprint_with(&CompileOptions::default()));
        assert_ne!(routes.fingerprint(), routes.fingerprint_with(&flat));
    }

    #[test]
    fn duplicates_are_rejected() {
        let err = collection(&[(&["GET", "POST"], "/a/{id}"), (&["POST"], "/a/{id}")])
            .compile()
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateRoute { .. }));

        // different constraints, hosts, methods or schemes are not duplicates
        RouteCollection::from_iter([
            route(&["GET"], "/a/{id}"),
            route(&["GET"], "/a/{id}").pattern("id", "[0-9]+"),
            route(&["GET"], "//example.com/a/{id}"),
            route(&["POST"], "/a/{id}"),
            route(&["PUT"], "https://example.com/a/{id}"),
            route(&["PUT"], "http://example.com/a/{id}"),
        ])
        .compile()
        .unwrap();

        let err = RouteCollection::from_iter([route(&["GET"], "/a").name("a"), route(&["GET"], "/b").name("a")])
            .compile()
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateName(ref name) if name == "a"));
    }

    #[test]
    fn invalid_routes_fail_to_compile() {
        let no_methods = RouteCollection::from_iter([Route::new::<&str>(&[], "/", "x")]);
        assert!(matches!(no_methods.compile(), Err(Error::NoMethods(_))));

        let relative = collection(&[(&["GET"], "users")]);
        assert!(matches!(relative.compile(), Err(Error::PatternSyntax { .. })));

        let bad_constraint = RouteCollection::from_iter([route(&["GET"], "/a/{id}").pattern("id", "[")]);
        assert!(matches!(
            bad_constraint.compile(),
            Err(Error::InvalidConstraint { .. })
        ));
    }

    #[test]
    fn sort_moves_static_routes_first() {
        let mut routes = collection(&[
            (&["GET"], "/{a}/{b}"),
            (&["GET"], "/x[/{y}]"),
            (&["GET"], "/{a}"),
            (&["GET"], "/about"),
            (&["GET"], "/contact"),
        ]);
        routes.sort();
        let paths: Vec<_> = routes.routes().iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, ["/about", "/contact", "/{a}", "/x[/{y}]", "/{a}/{b}"]);
    }

    #[test]
    fn compiling_twice_is_deterministic() {
        let routes = collection(&[
            (&["GET"], "/"),
            (&["GET"], "/user/{id}"),
            (&["GET", "POST"], "/user/{id}/edit"),
            (&["DELETE"], "/user/{id:[0-9]+}"),
        ]);
        let a = routes.compile().unwrap();
        let b = routes.compile().unwrap();
        assert_eq!(a.data(), b.data());
        assert_eq!(routes.fingerprint(), routes.clone().fingerprint());

        let mut changed = routes.clone();
        changed.add(route(&["GET"], "/new"));
        assert_ne!(changed.fingerprint(), routes.fingerprint());
    }

    #[test]
    fn paths_are_joined() {
        assert_eq!(join("", "/a"), "/a");
        assert_eq!(join("/api/", "/a"), "/api/a");
        assert_eq!(join("/api", "a"), "/api/a");
        assert_eq!(join("/api", "/"), "/api");
        assert_eq!(join("/blog", "[/{page}]"), "/blog[/{page}]");
    }
}
