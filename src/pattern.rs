//! Route pattern parsing.
//!
//! A pattern is literal text interleaved with placeholders and optional
//! segments:
//! ```ignore
//!  Syntax                 Meaning
//!  {name}                 variable, matches one path segment
//!  {name:regex}           variable constrained by `regex`
//!  {name=value}           variable with a default used when it is absent
//!  {name:regex=value}     both of the above
//!  [...]                  optional segment, may nest
//! ```
//!
//! The same grammar is used for host patterns, where an unconstrained
//! variable matches one DNS label instead of one path segment.
//!
//! Parsing produces a [`Pattern`]; compiling a pattern against the
//! constraint overrides of its route produces a [`Fragment`], the unit the
//! prefix merger works with.
use crate::error::{Error, Result};

use std::collections::{BTreeMap, HashSet};

use regex::Regex;

/// Default constraint of a path variable.
pub const PATH_SEGMENT: &str = "[^/]+";

/// Default constraint of a host variable.
pub const HOST_SEGMENT: &str = "[^.]+";

/// A parsed pattern element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Static(String),
    Variable {
        name: String,
        constraint: Option<String>,
        default: Option<String>,
    },
    Optional(Vec<Token>),
}

/// A variable as seen from outside the pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableInfo {
    pub name: String,
    /// How many optional segments enclose the variable.
    pub optional_depth: usize,
    pub has_default: bool,
}

/// A parsed route or host pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    source: String,
    tokens: Vec<Token>,
}

impl Pattern {
    /// Parses `source`.
    ///
    /// ```rust
    /// use regexrouter::pattern::Pattern;
    ///
    /// let pattern = Pattern::parse("/blog[/{page:[0-9]+=1}]").unwrap();
    /// let vars = pattern.variables();
    /// assert_eq!(vars[0].name, "page");
    /// assert_eq!(vars[0].optional_depth, 1);
    /// assert!(vars[0].has_default);
    /// ```
    pub fn parse(source: &str) -> Result<Self> {
        let mut parser = Parser {
            source,
            pos: 0,
            seen: HashSet::new(),
        };
        let tokens = parser.sequence(0)?;
        Ok(Pattern {
            source: source.to_owned(),
            tokens,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Variables in declaration order.
    pub fn variables(&self) -> Vec<VariableInfo> {
        fn walk(tokens: &[Token], depth: usize, out: &mut Vec<VariableInfo>) {
            for token in tokens {
                match token {
                    Token::Static(_) => {}
                    Token::Variable { name, default, .. } => out.push(VariableInfo {
                        name: name.clone(),
                        optional_depth: depth,
                        has_default: default.is_some(),
                    }),
                    Token::Optional(inner) => walk(inner, depth + 1, out),
                }
            }
        }

        let mut out = Vec::new();
        walk(&self.tokens, 0, &mut out);
        out
    }

    /// Inline `{name=value}` defaults.
    pub fn defaults(&self) -> BTreeMap<String, String> {
        fn walk(tokens: &[Token], out: &mut BTreeMap<String, String>) {
            for token in tokens {
                match token {
                    Token::Variable {
                        name,
                        default: Some(value),
                        ..
                    } => {
                        out.insert(name.clone(), value.clone());
                    }
                    Token::Optional(inner) => walk(inner, out),
                    _ => {}
                }
            }
        }

        let mut out = BTreeMap::new();
        walk(&self.tokens, &mut out);
        out
    }

    /// Returns the literal text when the pattern has neither variables nor
    /// optional segments.
    pub fn static_text(&self) -> Option<String> {
        let mut text = String::new();
        for token in &self.tokens {
            match token {
                Token::Static(s) => text.push_str(s),
                _ => return None,
            }
        }
        Some(text)
    }

    /// Number of variables and optional segments, used to order routes from
    /// most static to most dynamic.
    pub(crate) fn dynamism(&self) -> (usize, usize) {
        fn walk(tokens: &[Token], acc: &mut (usize, usize)) {
            for token in tokens {
                match token {
                    Token::Static(_) => {}
                    Token::Variable { .. } => acc.0 += 1,
                    Token::Optional(inner) => {
                        acc.1 += 1;
                        walk(inner, acc);
                    }
                }
            }
        }

        let mut acc = (0, 0);
        walk(&self.tokens, &mut acc);
        acc
    }

    /// Compiles the pattern into a regex fragment.
    ///
    /// `segment` is the constraint of unconstrained variables and
    /// `overrides` maps variable names to constraints that replace the
    /// inline ones. Every constraint is checked against the regex engine
    /// here so that bad routes fail before serving starts.
    pub fn compile(&self, segment: &str, overrides: &BTreeMap<String, String>) -> Result<Fragment> {
        let atoms = self.atoms(&self.tokens, segment, overrides)?;
        Ok(Fragment { atoms })
    }

    fn atoms(
        &self,
        tokens: &[Token],
        segment: &str,
        overrides: &BTreeMap<String, String>,
    ) -> Result<Vec<Atom>> {
        let mut atoms = Vec::new();
        for token in tokens {
            match token {
                Token::Static(text) => atoms.extend(text.chars().map(Atom::Char)),
                Token::Variable {
                    name, constraint, ..
                } => {
                    let constraint = overrides
                        .get(name)
                        .or(constraint.as_ref())
                        .map_or(segment, String::as_str);
                    let inner = self.check_constraint(name, constraint)?;

                    let mut captures = vec![Some(name.clone())];
                    captures.extend(std::iter::repeat(None).take(inner));
                    atoms.push(Atom::Group {
                        regex: format!("({})", constraint),
                        captures,
                        segment: constraint == PATH_SEGMENT,
                    });
                }
                Token::Optional(inner) => {
                    let inner = self.atoms(inner, segment, overrides)?;
                    let captures = inner
                        .iter()
                        .flat_map(|atom| match atom {
                            Atom::Char(_) => Vec::new(),
                            Atom::Group { captures, .. } => captures.clone(),
                        })
                        .collect();
                    atoms.push(Atom::Group {
                        regex: format!("(?:{})?", render(&inner)),
                        captures,
                        segment: false,
                    });
                }
            }
        }
        Ok(atoms)
    }

    /// Validates a constraint and returns how many capturing groups it
    /// contributes on its own.
    fn check_constraint(&self, name: &str, constraint: &str) -> Result<usize> {
        let regex = Regex::new(&format!("^(?:{})$", constraint)).map_err(|source| {
            Error::InvalidConstraint {
                pattern: self.source.clone(),
                variable: name.to_owned(),
                source,
            }
        })?;

        if regex.capture_names().flatten().next().is_some() {
            return Err(Error::syntax(
                &self.source,
                constraint,
                "named groups are not allowed inside constraints",
            ));
        }

        Ok(regex.captures_len() - 1)
    }
}

/// One element of a compiled fragment.
///
/// Literal text is kept per character so the merger can split shared
/// prefixes anywhere; everything parenthesized is an opaque group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Atom {
    Char(char),
    Group {
        regex: String,
        /// One entry per capturing group in `regex`, in textual order.
        /// `Some` marks the group holding a route variable.
        captures: Vec<Option<String>>,
        /// An unconstrained path variable. Followed by a `/` it can only
        /// match one way, which makes it safe to share between routes.
        segment: bool,
    },
}

/// The regex fragment of a single route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub(crate) atoms: Vec<Atom>,
}

impl Fragment {
    /// The unanchored regex of the fragment.
    pub fn regex(&self) -> String {
        render(&self.atoms)
    }

    /// Variable names in capture order.
    pub fn variables(&self) -> Vec<String> {
        self.atoms
            .iter()
            .flat_map(|atom| match atom {
                Atom::Char(_) => Vec::new(),
                Atom::Group { captures, .. } => captures.iter().flatten().cloned().collect(),
            })
            .collect()
    }
}

pub(crate) fn render(atoms: &[Atom]) -> String {
    let mut out = String::new();
    for atom in atoms {
        push_atom(&mut out, atom);
    }
    out
}

pub(crate) fn push_atom(out: &mut String, atom: &Atom) {
    match atom {
        Atom::Char(c) => {
            let mut buf = [0; 4];
            out.push_str(&regex::escape(c.encode_utf8(&mut buf)));
        }
        Atom::Group { regex, .. } => out.push_str(regex),
    }
}

/// A route target split into its parts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Target {
    pub scheme: Option<String>,
    pub host: Option<String>,
    pub path: String,
}

/// Splits `scheme://host/path` and `//host/path` targets. Anything else is
/// returned as a plain path.
///
/// ```rust
/// use regexrouter::pattern::split_target;
///
/// let target = split_target("https://{tenant}.example.com/dashboard");
/// assert_eq!(target.scheme.as_deref(), Some("https"));
/// assert_eq!(target.host.as_deref(), Some("{tenant}.example.com"));
/// assert_eq!(target.path, "/dashboard");
/// ```
pub fn split_target(target: &str) -> Target {
    let (scheme, rest) = match target.find("://") {
        Some(at) if is_scheme(&target[..at]) => (Some(&target[..at]), &target[at + 1..]),
        _ => (None, target),
    };

    let rest = match rest.strip_prefix("//") {
        Some(rest) => rest,
        None => {
            return Target {
                scheme: None,
                host: None,
                path: target.to_owned(),
            }
        }
    };

    // the host ends at the first `/` that is not inside a placeholder
    let mut depth = 0usize;
    let mut end = rest.len();
    for (i, c) in rest.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            '/' if depth == 0 => {
                end = i;
                break;
            }
            _ => {}
        }
    }

    let path = &rest[end..];
    Target {
        scheme: scheme.map(|s| s.to_ascii_lowercase()),
        host: Some(rest[..end].to_owned()),
        path: if path.is_empty() { "/".to_owned() } else { path.to_owned() },
    }
}

fn is_scheme(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next().map_or(false, |c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .map_or(false, |c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

struct Parser<'a> {
    source: &'a str,
    pos: usize,
    seen: HashSet<String>,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn bump(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += c.len_utf8();
        }
    }

    fn error(&self, at: usize, reason: &str) -> Error {
        Error::syntax(self.source, &self.source[at..], reason)
    }

    fn sequence(&mut self, depth: usize) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        let mut literal = String::new();

        while let Some(c) = self.peek() {
            match c {
                '{' => {
                    flush(&mut literal, &mut tokens);
                    let variable = self.variable()?;
                    tokens.push(variable);
                }
                '[' => {
                    flush(&mut literal, &mut tokens);
                    let start = self.pos;
                    self.bump();
                    let inner = self.sequence(depth + 1)?;
                    if self.peek() != Some(']') {
                        return Err(self.error(start, "unclosed optional segment"));
                    }
                    if inner.is_empty() {
                        return Err(self.error(start, "empty optional segment"));
                    }
                    self.bump();
                    tokens.push(Token::Optional(inner));
                }
                ']' if depth == 0 => return Err(self.error(self.pos, "unbalanced `]`")),
                ']' => break,
                '}' => return Err(self.error(self.pos, "unbalanced `}`")),
                _ => {
                    literal.push(c);
                    self.bump();
                }
            }
        }

        flush(&mut literal, &mut tokens);
        Ok(tokens)
    }

    fn variable(&mut self) -> Result<Token> {
        let start = self.pos;
        self.bump();
        let body_start = self.pos;

        let mut depth = 0usize;
        loop {
            match self.peek() {
                None => return Err(self.error(start, "unclosed variable")),
                Some('\\') => {
                    self.bump();
                    self.bump();
                }
                Some('{') => {
                    depth += 1;
                    self.bump();
                }
                Some('}') if depth == 0 => break,
                Some('}') => {
                    depth -= 1;
                    self.bump();
                }
                Some(_) => self.bump(),
            }
        }

        let body = &self.source[body_start..self.pos];
        self.bump();
        let fragment = &self.source[start..self.pos];

        let name_end = body.find(|c| c == ':' || c == '=').unwrap_or(body.len());
        let name = &body[..name_end];
        if !is_identifier(name) {
            return Err(Error::syntax(self.source, fragment, "invalid variable name"));
        }
        if !self.seen.insert(name.to_owned()) {
            return Err(Error::syntax(self.source, fragment, "duplicate variable name"));
        }

        let rest = &body[name_end..];
        let (constraint, default) = if let Some(rest) = rest.strip_prefix(':') {
            let (constraint, default) = split_default(rest);
            if constraint.is_empty() {
                return Err(Error::syntax(self.source, fragment, "empty constraint"));
            }
            (Some(constraint.to_owned()), default)
        } else {
            (None, rest.strip_prefix('='))
        };

        let default = default.map(|d| {
            d.strip_prefix('<')
                .and_then(|d| d.strip_suffix('>'))
                .unwrap_or(d)
                .to_owned()
        });

        Ok(Token::Variable {
            name: name.to_owned(),
            constraint,
            default,
        })
    }
}

fn flush(literal: &mut String, tokens: &mut Vec<Token>) {
    if !literal.is_empty() {
        tokens.push(Token::Static(std::mem::take(literal)));
    }
}

/// Splits `regex=default` at the first `=` that is not nested in a group,
/// class or repetition and not escaped.
fn split_default(s: &str) -> (&str, Option<&str>) {
    let mut depth = 0usize;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            '=' if depth == 0 => return (&s[..i], Some(&s[i + 1..])),
            _ => {}
        }
    }
    (s, None)
}
