//! Property path evaluation.

use super::ast::PathExpr;
use super::eval::Evaluator;
use crate::term::Term;
use std::collections::{HashSet, VecDeque};

impl<'a> Evaluator<'a> {
    /// `(start, end)` pairs connected by `path`, optionally pinned at
    /// either end. Closures (`*`, `+`, `?`) yield each pair once.
    pub(crate) fn path_pairs(&self, path: &PathExpr, s: Option<&Term>, o: Option<&Term>) -> Vec<(Term, Term)> {
        match path {
            PathExpr::Iri(p) => {
                let graph = self.graph();
                self.store
                    .match_pattern(s, Some(p), o, graph.as_ref())
                    .map(|q| (q.subject.clone(), q.object.clone()))
                    .collect()
            }
            PathExpr::Inverse(inner) => self
                .path_pairs(inner, o, s)
                .into_iter()
                .map(|(a, b)| (b, a))
                .collect(),
            PathExpr::Sequence(parts) => self.sequence_pairs(parts, s, o),
            PathExpr::Alternative(alternatives) => alternatives
                .iter()
                .flat_map(|alt| self.path_pairs(alt, s, o))
                .collect(),
            PathExpr::ZeroOrOne(inner) => {
                let mut pairs = self.zero_length(s, o);
                pairs.extend(self.path_pairs(inner, s, o));
                dedup(pairs)
            }
            PathExpr::ZeroOrMore(inner) => self.closure(inner, s, o, true),
            PathExpr::OneOrMore(inner) => self.closure(inner, s, o, false),
        }
    }

    fn sequence_pairs(&self, parts: &[PathExpr], s: Option<&Term>, o: Option<&Term>) -> Vec<(Term, Term)> {
        match parts {
            [] => Vec::new(),
            [only] => self.path_pairs(only, s, o),
            [first, rest @ ..] => {
                let mut out = Vec::new();
                for (start, middle) in self.path_pairs(first, s, None) {
                    for (_, end) in self.sequence_pairs(rest, Some(&middle), o) {
                        out.push((start.clone(), end));
                    }
                }
                out
            }
        }
    }

    fn zero_length(&self, s: Option<&Term>, o: Option<&Term>) -> Vec<(Term, Term)> {
        match (s, o) {
            (Some(s), Some(o)) if s == o => vec![(s.clone(), s.clone())],
            (Some(_), Some(_)) => Vec::new(),
            (Some(s), None) => vec![(s.clone(), s.clone())],
            (None, Some(o)) => vec![(o.clone(), o.clone())],
            (None, None) => self.nodes().into_iter().map(|n| (n.clone(), n)).collect(),
        }
    }

    /// Every subject and object of the active graph, first-appearance order.
    fn nodes(&self) -> Vec<Term> {
        let graph = self.graph();
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for quad in self.store.match_pattern(None, None, None, graph.as_ref()) {
            for term in [&quad.subject, &quad.object] {
                if seen.insert(term.clone()) {
                    out.push(term.clone());
                }
            }
        }
        out
    }

    fn closure(&self, inner: &PathExpr, s: Option<&Term>, o: Option<&Term>, reflexive: bool) -> Vec<(Term, Term)> {
        match (s, o) {
            (Some(start), _) => self
                .reach(inner, start, reflexive, false)
                .into_iter()
                .filter(|end| o.map_or(true, |o| o == end))
                .map(|end| (start.clone(), end))
                .collect(),
            (None, Some(end)) => self
                .reach(inner, end, reflexive, true)
                .into_iter()
                .map(|start| (start, end.clone()))
                .collect(),
            (None, None) => {
                let mut out = Vec::new();
                for node in self.nodes() {
                    for end in self.reach(inner, &node, reflexive, false) {
                        out.push((node.clone(), end));
                    }
                }
                out
            }
        }
    }

    /// Breadth-first reachability from `from` along `inner` (or its inverse).
    fn reach(&self, inner: &PathExpr, from: &Term, reflexive: bool, backwards: bool) -> Vec<Term> {
        let mut visited = HashSet::new();
        let mut out = Vec::new();
        if reflexive {
            visited.insert(from.clone());
            out.push(from.clone());
        }
        let mut queue = VecDeque::from([from.clone()]);
        let mut expanded = HashSet::new();
        while let Some(node) = queue.pop_front() {
            if !expanded.insert(node.clone()) {
                continue;
            }
            let steps = if backwards {
                self.path_pairs(inner, None, Some(&node)).into_iter().map(|(a, _)| a).collect::<Vec<_>>()
            } else {
                self.path_pairs(inner, Some(&node), None).into_iter().map(|(_, b)| b).collect()
            };
            for next in steps {
                if visited.insert(next.clone()) {
                    out.push(next.clone());
                }
                queue.push_back(next);
            }
        }
        out
    }
}

fn dedup(pairs: Vec<(Term, Term)>) -> Vec<(Term, Term)> {
    let mut seen = HashSet::new();
    pairs.into_iter().filter(|p| seen.insert(p.clone())).collect()
}
