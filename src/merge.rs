//! Merges the fragments of all dynamic routes into one alternation.
//!
//! Fragments are inserted into a tree in registration order. A new fragment
//! is only ever merged with the *last* child of a node, so reading the
//! leaves depth-first yields the registration order again and the
//! leftmost-first semantics of the regex engine keep "first registered
//! wins". Shared prefixes are factored out:
//! ```ignore
//!  /user/([0-9]+)()|/user/([0-9]+)/edit()|/users()
//!  /user(?:/([0-9]+)()|/([0-9]+)/edit()|s())
//! ```
//! Every leaf ends with an empty capturing group, its marker. After a
//! match, the one marker that participated identifies the leaf.
//!
//! A prefix may only cover text that matches in exactly one way, otherwise
//! factoring it out changes which alternative wins. Literal characters
//! always qualify. An unconstrained path variable qualifies only when both
//! branches continue with a `/`, since `[^/]+` must then stop at that
//! slash. Any other group ends the shared prefix.
use crate::matcher::Binding;
use crate::pattern::{push_atom, Atom};

use serde::Deserialize;

/// How aggressively prefixes are shared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Literals and slash-terminated segment variables.
    #[default]
    Segments,
    /// Literals only.
    Literals,
    /// No sharing, one alternative per fragment.
    Flat,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Segments => "segments",
            Strategy::Literals => "literals",
            Strategy::Flat => "flat",
        }
    }
}

/// The merged regex and where each fragment's captures ended up.
#[derive(Debug)]
pub(crate) struct Merged {
    pub(crate) regex: String,
    /// Indexed like the input fragments.
    pub(crate) leaves: Vec<LeafLayout>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LeafLayout {
    pub(crate) marker: usize,
    pub(crate) bindings: Vec<Binding>,
}

pub(crate) fn merge(fragments: &[Vec<Atom>], strategy: Strategy) -> Merged {
    let mut root = Node::default();
    for (index, atoms) in fragments.iter().enumerate() {
        root.insert(index, atoms.clone(), strategy);
    }

    let mut renderer = Renderer {
        out: String::from("^"),
        groups: 0,
        leaves: Vec::with_capacity(fragments.len()),
    };
    renderer.node(&root, &mut Vec::new());
    renderer.out.push('$');

    let mut leaves = renderer.leaves;
    leaves.sort_by_key(|(index, _)| *index);
    Merged {
        regex: renderer.out,
        leaves: leaves.into_iter().map(|(_, layout)| layout).collect(),
    }
}

/// Renders a single fragment as its own anchored regex.
pub(crate) fn standalone(atoms: &[Atom]) -> (String, Vec<Binding>) {
    let mut merged = merge(std::slice::from_ref(&atoms.to_vec()), Strategy::Flat);
    let bindings = merged
        .leaves
        .pop()
        .map(|leaf| leaf.bindings)
        .unwrap_or_default();
    (merged.regex, bindings)
}

#[derive(Debug, Default)]
struct Node {
    prefix: Vec<Atom>,
    children: Vec<Child>,
}

#[derive(Debug)]
enum Child {
    Leaf { index: usize, rest: Vec<Atom> },
    Node(Node),
}

impl Child {
    fn atoms(&self) -> &[Atom] {
        match self {
            Child::Leaf { rest, .. } => rest,
            Child::Node(node) => &node.prefix,
        }
    }

    fn strip(&mut self, n: usize) {
        match self {
            Child::Leaf { rest, .. } => drop(rest.drain(..n)),
            Child::Node(node) => drop(node.prefix.drain(..n)),
        }
    }
}

impl Node {
    fn insert(&mut self, index: usize, mut atoms: Vec<Atom>, strategy: Strategy) {
        let shared = match (strategy, self.children.last()) {
            (Strategy::Flat, _) | (_, None) => 0,
            (_, Some(last)) => common_prefix(last.atoms(), &atoms, strategy),
        };

        if shared == 0 {
            self.children.push(Child::Leaf { index, rest: atoms });
            return;
        }

        if let Some(Child::Node(node)) = self.children.last_mut() {
            if shared == node.prefix.len() {
                node.insert(index, atoms.split_off(shared), strategy);
                return;
            }
        }

        if let Some(mut previous) = self.children.pop() {
            previous.strip(shared);
            let rest = atoms.split_off(shared);
            self.children.push(Child::Node(Node {
                prefix: atoms,
                children: vec![previous, Child::Leaf { index, rest }],
            }));
        }
    }
}

fn common_prefix(a: &[Atom], b: &[Atom], strategy: Strategy) -> usize {
    let mut n = 0;
    while n < a.len() && n < b.len() && a[n] == b[n] && shareable(a, b, n, strategy) {
        n += 1;
    }
    n
}

fn shareable(a: &[Atom], b: &[Atom], i: usize, strategy: Strategy) -> bool {
    let slash = Some(&Atom::Char('/'));
    match &a[i] {
        Atom::Char(_) => true,
        Atom::Group { segment: true, .. } => {
            strategy == Strategy::Segments && a.get(i + 1) == slash && b.get(i + 1) == slash
        }
        Atom::Group { .. } => false,
    }
}

struct Renderer {
    out: String,
    groups: usize,
    leaves: Vec<(usize, LeafLayout)>,
}

impl Renderer {
    fn node(&mut self, node: &Node, bindings: &mut Vec<Binding>) {
        let depth = bindings.len();
        self.atoms(&node.prefix, bindings);

        self.out.push_str("(?:");
        for (i, child) in node.children.iter().enumerate() {
            if i > 0 {
                self.out.push('|');
            }
            match child {
                Child::Node(node) => self.node(node, bindings),
                Child::Leaf { index, rest } => {
                    let depth = bindings.len();
                    self.atoms(rest, bindings);
                    self.groups += 1;
                    self.out.push_str("()");
                    self.leaves.push((
                        *index,
                        LeafLayout {
                            marker: self.groups,
                            bindings: bindings.clone(),
                        },
                    ));
                    bindings.truncate(depth);
                }
            }
        }
        self.out.push(')');

        bindings.truncate(depth);
    }

    fn atoms(&mut self, atoms: &[Atom], bindings: &mut Vec<Binding>) {
        for atom in atoms {
            push_atom(&mut self.out, atom);
            if let Atom::Group { captures, .. } = atom {
                for capture in captures {
                    self.groups += 1;
                    if let Some(name) = capture {
                        bindings.push(Binding {
                            name: name.clone(),
                            group: self.groups,
                        });
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{Pattern, PATH_SEGMENT};

    use std::collections::BTreeMap;

    use regex::Regex;

    fn atoms(pattern: &str) -> Vec<Atom> {
        Pattern::parse(pattern)
            .unwrap()
            .compile(PATH_SEGMENT, &BTreeMap::new())
            .unwrap()
            .atoms
    }

    fn merged(patterns: &[&str], strategy: Strategy) -> Merged {
        let fragments: Vec<_> = patterns.iter().map(|p| atoms(p)).collect();
        merge(&fragments, strategy)
    }

    /// Returns the index of the matching leaf and its variables.
    fn run(merged: &Merged, path: &str) -> Option<(usize, Vec<(String, String)>)> {
        let regex = Regex::new(&merged.regex).unwrap();
        let caps = regex.captures(path)?;
        let index = merged
            .leaves
            .iter()
            .position(|leaf| caps.get(leaf.marker).is_some())?;
        let vars = merged.leaves[index]
            .bindings
            .iter()
            .filter_map(|b| caps.get(b.group).map(|m| (b.name.clone(), m.as_str().to_owned())))
            .collect();
        Some((index, vars))
    }

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn literal_prefixes_are_factored() {
        let m = merged(&["/user/{id:[0-9]+}", "/users"], Strategy::Segments);
        assert_eq!(m.regex, "^(?:/user(?:/([0-9]+)()|s()))$");
        assert_eq!(run(&m, "/user/7"), Some((0, vars(&[("id", "7")]))));
        assert_eq!(run(&m, "/users"), Some((1, vec![])));
        assert_eq!(run(&m, "/user"), None);
    }

    #[test]
    fn flat_strategy_does_not_share() {
        let m = merged(&["/a/{x}", "/a/{y}/b"], Strategy::Flat);
        assert_eq!(m.regex, "^(?:/a/([^/]+)()|/a/([^/]+)/b())$");
    }

    #[test]
    fn segment_variables_followed_by_slash_are_shared() {
        let m = merged(&["/post/{id}/edit", "/post/{id}/delete"], Strategy::Segments);
        assert_eq!(m.regex, "^(?:/post/([^/]+)/(?:edit()|delete()))$");
        assert_eq!(run(&m, "/post/9/delete"), Some((1, vars(&[("id", "9")]))));

        let m = merged(&["/post/{id}/edit", "/post/{id}/delete"], Strategy::Literals);
        assert_eq!(
            m.regex,
            "^(?:/post/(?:([^/]+)/edit()|([^/]+)/delete()))$"
        );
        assert_eq!(run(&m, "/post/9/delete"), Some((1, vars(&[("id", "9")]))));
    }

    #[test]
    fn constrained_and_trailing_groups_are_not_shared() {
        let m = merged(&["/a/{x:.+}/b", "/a/{x:.+}/c"], Strategy::Segments);
        assert_eq!(m.regex, "^(?:/a/(?:(.+)/b()|(.+)/c()))$");

        // no slash after the variable: `[^/]+` may stop anywhere
        let m = merged(&["/f/{name}.json", "/f/{name}.xml"], Strategy::Segments);
        assert_eq!(m.regex, r"^(?:/f/(?:([^/]+)\.json()|([^/]+)\.xml()))$");
    }

    #[test]
    fn registration_order_decides_overlaps() {
        let m = merged(&["/x/{a}", "/x/{b:[0-9]+}"], Strategy::Segments);
        assert_eq!(run(&m, "/x/12").map(|(i, _)| i), Some(0));

        let m = merged(&["/x/{b:[0-9]+}", "/x/{a}"], Strategy::Segments);
        assert_eq!(run(&m, "/x/12").map(|(i, _)| i), Some(0));
        assert_eq!(run(&m, "/x/ab").map(|(i, _)| i), Some(1));
    }

    #[test]
    fn only_the_last_child_is_merged() {
        let m = merged(&["/a/one", "/b", "/a/two"], Strategy::Segments);
        assert_eq!(m.regex, "^(?:/(?:a/one()|b()|a/two()))$");
        assert_eq!(run(&m, "/a/two").map(|(i, _)| i), Some(2));
    }

    #[test]
    fn leaf_that_is_a_prefix_of_another() {
        let m = merged(&["/shop", "/shop/{item}"], Strategy::Segments);
        assert_eq!(m.regex, "^(?:/shop(?:()|/([^/]+)()))$");
        assert_eq!(run(&m, "/shop"), Some((0, vec![])));
        assert_eq!(run(&m, "/shop/hat"), Some((1, vars(&[("item", "hat")]))));
    }

    #[test]
    fn nested_optional_captures_keep_their_indexes() {
        let m = merged(
            &["/archive[/{year}[/{month}]]", "/archive/{slug}/comments/latest"],
            Strategy::Segments,
        );
        assert_eq!(run(&m, "/archive"), Some((0, vec![])));
        assert_eq!(run(&m, "/archive/2020"), Some((0, vars(&[("year", "2020")]))));
        assert_eq!(
            run(&m, "/archive/2020/05"),
            Some((0, vars(&[("year", "2020"), ("month", "05")])))
        );
        assert_eq!(
            run(&m, "/archive/x/comments/latest"),
            Some((1, vars(&[("slug", "x")])))
        );
        // the earlier route swallows two segments
        assert_eq!(
            run(&m, "/archive/x/comments"),
            Some((0, vars(&[("year", "x"), ("month", "comments")])))
        );
    }

    #[test]
    fn standalone_fragment() {
        let (regex, bindings) = standalone(&atoms("/user/{id}"));
        assert_eq!(regex, "^(?:/user/([^/]+)())$");
        assert_eq!(
            bindings,
            vec![Binding {
                name: "id".into(),
                group: 1
            }]
        );
    }

    #[test]
    fn shared_segment_bindings_point_at_the_same_group() {
        let m = merged(&["/t/{id}/a/{x}", "/t/{id}/b/{y}"], Strategy::Segments);
        assert_eq!(m.leaves[0].bindings[0], m.leaves[1].bindings[0]);
        assert_ne!(m.leaves[0].bindings[1].group, m.leaves[1].bindings[1].group);
    }
}
