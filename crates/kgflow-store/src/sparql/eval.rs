//! Query evaluation.
//!
//! Solutions are slot vectors; variable names map to slots through a table
//! owned by the evaluator. Group patterns are evaluated left to right with
//! the solutions produced so far as the seed, so every join preserves left
//! order and, within one left solution, store insertion order.

use super::ast::*;
use super::QueryResult;
use crate::error::QueryError;
use crate::store::QuadStore;
use crate::term::{GraphName, Quad, Term};
use regex::Regex;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

/// Above this many left solutions a triple pattern is joined by hashing
/// instead of one index lookup per solution.
const HASH_JOIN_THRESHOLD: usize = 32;

pub(crate) type QResult<T> = Result<T, QueryError>;

#[derive(Clone, Debug, Default)]
pub(crate) struct Solution(Vec<Option<Term>>);

impl Solution {
    pub fn get(&self, slot: usize) -> Option<&Term> {
        self.0.get(slot).and_then(|t| t.as_ref())
    }

    pub fn set(&mut self, slot: usize, term: Term) {
        if self.0.len() <= slot {
            self.0.resize(slot + 1, None);
        }
        self.0[slot] = Some(term);
    }

    pub fn is_compatible(&self, other: &Solution) -> bool {
        self.0
            .iter()
            .zip(other.0.iter())
            .all(|(a, b)| match (a, b) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            })
    }

    /// True when some slot is bound in both.
    pub fn shares_binding(&self, other: &Solution) -> bool {
        self.0
            .iter()
            .zip(other.0.iter())
            .any(|(a, b)| a.is_some() && b.is_some())
    }

    pub fn merge(&self, other: &Solution) -> Solution {
        let mut out = self.clone();
        for (slot, term) in other.0.iter().enumerate() {
            if let Some(term) = term {
                if out.get(slot).is_none() {
                    out.set(slot, term.clone());
                }
            }
        }
        out
    }

    /// Bound values with trailing unbound slots trimmed, for set semantics.
    pub fn key(&self) -> &[Option<Term>] {
        let end = self.0.iter().rposition(|t| t.is_some()).map_or(0, |i| i + 1);
        &self.0[..end]
    }
}

#[derive(Clone, Debug)]
enum Slot {
    Const(Term),
    Var(usize),
}

pub(crate) struct Evaluator<'a> {
    pub store: &'a QuadStore,
    names: RefCell<Vec<String>>,
    index: RefCell<HashMap<String, usize>>,
    active_graph: RefCell<Option<GraphName>>,
    regexes: RefCell<HashMap<String, Option<Regex>>>,
}

impl<'a> Evaluator<'a> {
    pub fn new(store: &'a QuadStore) -> Self {
        Self {
            store,
            names: RefCell::new(Vec::new()),
            index: RefCell::new(HashMap::new()),
            active_graph: RefCell::new(None),
            regexes: RefCell::new(HashMap::new()),
        }
    }

    pub fn slot(&self, name: &str) -> usize {
        if let Some(&slot) = self.index.borrow().get(name) {
            return slot;
        }
        let mut names = self.names.borrow_mut();
        let slot = names.len();
        names.push(name.to_string());
        self.index.borrow_mut().insert(name.to_string(), slot);
        slot
    }

    pub fn lookup(&self, solution: &Solution, name: &str) -> Option<Term> {
        solution.get(self.slot(name)).cloned()
    }

    pub(crate) fn graph(&self) -> Option<GraphName> {
        self.active_graph.borrow().clone()
    }

    pub(crate) fn regex(&self, pattern: &str, flags: &str) -> Option<Regex> {
        let key = format!("{flags}\u{0}{pattern}");
        if let Some(cached) = self.regexes.borrow().get(&key) {
            return cached.clone();
        }
        let compiled = if flags.chars().all(|c| matches!(c, 'i' | 's' | 'm' | 'x')) {
            let full = if flags.is_empty() { pattern.to_string() } else { format!("(?{flags}){pattern}") };
            Regex::new(&full).ok()
        } else {
            None
        };
        self.regexes.borrow_mut().insert(key, compiled.clone());
        compiled
    }

    fn resolve(&self, pattern: &TermPattern) -> Slot {
        match pattern {
            TermPattern::Var(v) => Slot::Var(self.slot(v)),
            TermPattern::Term(t) => Slot::Const(t.clone()),
        }
    }

    // ------------------------------------------------------------------
    // Graph patterns
    // ------------------------------------------------------------------

    pub fn eval_group(&self, group: &GroupPattern, input: Vec<Solution>) -> QResult<Vec<Solution>> {
        let mut solutions = input;
        let mut filters = Vec::new();
        for element in &group.elements {
            match element {
                Pattern::Triples(triples) => {
                    for triple in triples {
                        if solutions.is_empty() {
                            break;
                        }
                        solutions = self.join_triple(solutions, triple)?;
                    }
                }
                Pattern::Filter(expr) => filters.push(expr),
                Pattern::Optional(inner) => {
                    let mut out = Vec::with_capacity(solutions.len());
                    for solution in solutions {
                        let extended = self.eval_group(inner, vec![solution.clone()])?;
                        if extended.is_empty() {
                            out.push(solution);
                        } else {
                            out.extend(extended);
                        }
                    }
                    solutions = out;
                }
                Pattern::Union(branches) => {
                    let mut out = Vec::new();
                    for branch in branches {
                        out.extend(self.eval_group(branch, solutions.clone())?);
                    }
                    solutions = out;
                }
                Pattern::Minus(inner) => {
                    let right = self.eval_group(inner, vec![Solution::default()])?;
                    solutions.retain(|left| {
                        !right.iter().any(|r| left.shares_binding(r) && left.is_compatible(r))
                    });
                }
                Pattern::Bind(expr, var) => {
                    let slot = self.slot(var);
                    for solution in solutions.iter_mut() {
                        if solution.get(slot).is_some() {
                            continue;
                        }
                        if let Ok(term) = self.eval_expr(expr, solution) {
                            solution.set(slot, term);
                        }
                    }
                }
                Pattern::Values(block) => solutions = self.join_values(solutions, block),
                Pattern::Group(inner) => solutions = self.eval_group(inner, solutions)?,
                Pattern::Graph(graph, inner) => solutions = self.eval_graph(graph, inner, solutions)?,
            }
        }
        if !filters.is_empty() {
            solutions.retain(|s| filters.iter().all(|f| self.ebv_of(f, s)));
        }
        Ok(solutions)
    }

    fn eval_graph(&self, graph: &TermPattern, inner: &GroupPattern, input: Vec<Solution>) -> QResult<Vec<Solution>> {
        let slot = self.resolve(graph);
        let mut out = Vec::new();
        for solution in input {
            let candidates: Vec<GraphName> = match &slot {
                Slot::Const(Term::Iri(iri)) => vec![GraphName::Named(iri.clone())],
                Slot::Const(_) => Vec::new(),
                Slot::Var(i) => match solution.get(*i) {
                    Some(Term::Iri(iri)) => vec![GraphName::Named(iri.clone())],
                    Some(_) => Vec::new(),
                    None => self.store.graphs(),
                },
            };
            for name in candidates {
                let mut seed = solution.clone();
                if let (Slot::Var(i), Some(term)) = (&slot, name.as_term()) {
                    seed.set(*i, term);
                }
                let previous = self.active_graph.replace(Some(name));
                let result = self.eval_group(inner, vec![seed]);
                self.active_graph.replace(previous);
                out.extend(result?);
            }
        }
        Ok(out)
    }

    pub fn join_values(&self, input: Vec<Solution>, block: &ValuesBlock) -> Vec<Solution> {
        let slots: Vec<usize> = block.vars.iter().map(|v| self.slot(v)).collect();
        let rows: Vec<Solution> = block
            .rows
            .iter()
            .map(|row| {
                let mut s = Solution::default();
                for (slot, value) in slots.iter().zip(row) {
                    if let Some(term) = value {
                        s.set(*slot, term.clone());
                    }
                }
                s
            })
            .collect();
        let mut out = Vec::new();
        for left in &input {
            for row in &rows {
                if left.is_compatible(row) {
                    out.push(left.merge(row));
                }
            }
        }
        out
    }

    fn join_triple(&self, input: Vec<Solution>, triple: &TriplePattern) -> QResult<Vec<Solution>> {
        let s = self.resolve(&triple.subject);
        let o = self.resolve(&triple.object);
        let Some(predicate) = triple.verb.as_simple() else {
            let Verb::Path(path) = &triple.verb else {
                return Ok(Vec::new());
            };
            return self.join_path(input, &s, path, &o);
        };
        let p = self.resolve(&predicate);

        if input.len() > HASH_JOIN_THRESHOLD {
            let key_slots = self.shared_slots(&input, [&s, &p, &o]);
            if !key_slots.is_empty() {
                return Ok(self.hash_join(input, &s, &p, &o, &key_slots));
            }
        }

        let graph = self.graph();
        let mut out = Vec::new();
        for solution in &input {
            let sv = bound(&s, solution);
            let pv = bound(&p, solution);
            let ov = bound(&o, solution);
            for quad in self.store.match_pattern(sv.as_ref(), pv.as_ref(), ov.as_ref(), graph.as_ref()) {
                let mut next = solution.clone();
                if bind(&mut next, &s, &quad.subject)
                    && bind(&mut next, &p, &quad.predicate)
                    && bind(&mut next, &o, &quad.object)
                {
                    out.push(next);
                }
            }
        }
        Ok(out)
    }

    /// Pattern variables bound in every input solution.
    fn shared_slots(&self, input: &[Solution], slots: [&Slot; 3]) -> Vec<usize> {
        let mut out = Vec::new();
        for slot in slots {
            if let Slot::Var(i) = slot {
                if !out.contains(i) && input.iter().all(|s| s.get(*i).is_some()) {
                    out.push(*i);
                }
            }
        }
        out
    }

    fn hash_join(&self, input: Vec<Solution>, s: &Slot, p: &Slot, o: &Slot, key_slots: &[usize]) -> Vec<Solution> {
        let graph = self.graph();
        let constant = |slot: &Slot| match slot {
            Slot::Const(t) => Some(t.clone()),
            Slot::Var(_) => None,
        };
        let (sc, pc, oc) = (constant(s), constant(p), constant(o));
        let rows: Vec<Solution> = self
            .store
            .match_pattern(sc.as_ref(), pc.as_ref(), oc.as_ref(), graph.as_ref())
            .filter_map(|quad| {
                let mut row = Solution::default();
                (bind(&mut row, s, &quad.subject)
                    && bind(&mut row, p, &quad.predicate)
                    && bind(&mut row, o, &quad.object))
                .then_some(row)
            })
            .collect();
        let mut table: HashMap<Vec<Term>, Vec<usize>> = HashMap::new();
        for (i, row) in rows.iter().enumerate() {
            let key: Option<Vec<Term>> = key_slots.iter().map(|k| row.get(*k).cloned()).collect();
            if let Some(key) = key {
                table.entry(key).or_default().push(i);
            }
        }
        let mut out = Vec::new();
        for left in &input {
            let key: Option<Vec<Term>> = key_slots.iter().map(|k| left.get(*k).cloned()).collect();
            let Some(matches) = key.and_then(|k| table.get(&k)) else {
                continue;
            };
            for &i in matches {
                if left.is_compatible(&rows[i]) {
                    out.push(left.merge(&rows[i]));
                }
            }
        }
        out
    }

    fn join_path(&self, input: Vec<Solution>, s: &Slot, path: &PathExpr, o: &Slot) -> QResult<Vec<Solution>> {
        let mut out = Vec::new();
        for solution in &input {
            let sv = bound(s, solution);
            let ov = bound(o, solution);
            for (start, end) in self.path_pairs(path, sv.as_ref(), ov.as_ref()) {
                let mut next = solution.clone();
                if bind(&mut next, s, &start) && bind(&mut next, o, &end) {
                    out.push(next);
                }
            }
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Query forms
    // ------------------------------------------------------------------

    fn select(&self, query: &Query, clause: &SelectClause, mut solutions: Vec<Solution>) -> QResult<QueryResult> {
        if query.is_aggregated() {
            let grouped = self.grouped_names(query);
            match &clause.projection {
                Projection::Wildcard => {
                    return Err(QueryError::syntax("SELECT * cannot be combined with GROUP BY or aggregates"));
                }
                Projection::Items(items) => {
                    for item in items {
                        if let ProjectionItem::Var(v) = item {
                            if !grouped.contains(v) {
                                return Err(QueryError::unbound(format!(
                                    "variable ?{v} is projected but not grouped"
                                )));
                            }
                        }
                    }
                }
            }
            solutions = self.group_solutions(query, solutions)?;
            if !query.modifiers.having.is_empty() {
                solutions.retain(|s| query.modifiers.having.iter().all(|h| self.ebv_of(h, s)));
            }
        }

        let vars: Vec<String> = match &clause.projection {
            Projection::Wildcard => visible_vars(&query.pattern),
            Projection::Items(items) => items
                .iter()
                .map(|item| match item {
                    ProjectionItem::Var(v) => v.clone(),
                    ProjectionItem::Expr(_, alias) => alias.clone(),
                })
                .collect(),
        };

        if let Projection::Items(items) = &clause.projection {
            for item in items {
                if let ProjectionItem::Expr(expr, alias) = item {
                    let slot = self.slot(alias);
                    for solution in solutions.iter_mut() {
                        if let Ok(term) = self.eval_expr(expr, solution) {
                            solution.set(slot, term);
                        }
                    }
                }
            }
        }

        self.order(&mut solutions, &query.modifiers.order_by);

        let slots: Vec<usize> = vars.iter().map(|v| self.slot(v)).collect();
        let mut rows: Vec<Vec<Option<Term>>> = solutions
            .iter()
            .map(|s| slots.iter().map(|slot| s.get(*slot).cloned()).collect())
            .collect();
        if clause.distinct || clause.reduced {
            let mut seen = HashSet::new();
            rows.retain(|row| seen.insert(row.clone()));
        }
        let rows = slice(rows, &query.modifiers);
        Ok(QueryResult::Select { vars, rows })
    }

    fn grouped_names(&self, query: &Query) -> HashSet<String> {
        query
            .modifiers
            .group_by
            .iter()
            .filter_map(|key| match key {
                GroupKey::Var(v) => Some(v.clone()),
                GroupKey::Expr(_, alias) => alias.clone(),
            })
            .collect()
    }

    pub(crate) fn order(&self, solutions: &mut Vec<Solution>, keys: &[OrderKey]) {
        if keys.is_empty() {
            return;
        }
        let mut keyed: Vec<(Vec<Option<Term>>, Solution)> = solutions
            .drain(..)
            .map(|s| {
                let values = keys.iter().map(|k| self.eval_expr(&k.expr, &s).ok()).collect();
                (values, s)
            })
            .collect();
        keyed.sort_by(|(a, _), (b, _)| {
            for ((x, y), key) in a.iter().zip(b.iter()).zip(keys) {
                let ord = super::expr::order_cmp(x.as_ref(), y.as_ref());
                let ord = if key.descending { ord.reverse() } else { ord };
                if ord.is_ne() {
                    return ord;
                }
            }
            std::cmp::Ordering::Equal
        });
        solutions.extend(keyed.into_iter().map(|(_, s)| s));
    }

    fn construct(&self, query: &Query, template: &[TriplePattern], mut solutions: Vec<Solution>) -> QueryResult {
        self.order(&mut solutions, &query.modifiers.order_by);
        let solutions = slice(solutions, &query.modifiers);
        let mut seen = HashSet::new();
        let mut quads = Vec::new();
        for (n, solution) in solutions.iter().enumerate() {
            for triple in template {
                let Some(predicate) = triple.verb.as_simple() else {
                    continue;
                };
                let parts = (
                    self.instantiate(&triple.subject, solution, n),
                    self.instantiate(&predicate, solution, n),
                    self.instantiate(&triple.object, solution, n),
                );
                if let (Some(s), Some(p), Some(o)) = parts {
                    let quad = Quad::new(s, p, o);
                    if quad.is_well_formed() && seen.insert(quad.clone()) {
                        quads.push(quad);
                    }
                }
            }
        }
        QueryResult::Construct(quads)
    }

    /// Template term under a solution; template blank nodes are fresh per
    /// solution.
    pub(crate) fn instantiate(&self, pattern: &TermPattern, solution: &Solution, n: usize) -> Option<Term> {
        match pattern {
            TermPattern::Var(v) => solution.get(self.slot(v)).cloned(),
            TermPattern::Term(Term::BlankNode(label)) => Some(Term::blank(format!("{label}_{n}"))),
            TermPattern::Term(t) => Some(t.clone()),
        }
    }

    fn describe(&self, targets: &[TermPattern], solutions: &[Solution], pattern: &GroupPattern) -> QueryResult {
        let mut resources: Vec<Term> = Vec::new();
        let push = |t: &Term, resources: &mut Vec<Term>| {
            if !t.is_literal() && !resources.contains(t) {
                resources.push(t.clone());
            }
        };
        if targets.is_empty() {
            let vars = visible_vars(pattern);
            for solution in solutions {
                for v in &vars {
                    if let Some(t) = self.lookup(solution, v) {
                        push(&t, &mut resources);
                    }
                }
            }
        }
        for target in targets {
            match target {
                TermPattern::Term(t) => push(t, &mut resources),
                TermPattern::Var(v) => {
                    for solution in solutions {
                        if let Some(t) = self.lookup(solution, v) {
                            push(&t, &mut resources);
                        }
                    }
                }
            }
        }

        let mut quads = Vec::new();
        let mut seen = HashSet::new();
        let mut visited = HashSet::new();
        let mut stack: Vec<Term> = resources.into_iter().rev().collect();
        while let Some(resource) = stack.pop() {
            if !visited.insert(resource.clone()) {
                continue;
            }
            let mut blanks = Vec::new();
            for quad in self.store.match_pattern(Some(&resource), None, None, None) {
                if seen.insert(quad.clone()) {
                    quads.push(quad.clone());
                }
                if quad.object.is_blank() {
                    blanks.push(quad.object.clone());
                }
            }
            stack.extend(blanks.into_iter().rev());
        }
        QueryResult::Describe(quads)
    }
}

fn bound(slot: &Slot, solution: &Solution) -> Option<Term> {
    match slot {
        Slot::Const(t) => Some(t.clone()),
        Slot::Var(i) => solution.get(*i).cloned(),
    }
}

fn bind(solution: &mut Solution, slot: &Slot, term: &Term) -> bool {
    match slot {
        Slot::Const(t) => t == term,
        Slot::Var(i) => match solution.get(*i) {
            Some(existing) => existing == term,
            None => {
                solution.set(*i, term.clone());
                true
            }
        },
    }
}

fn slice<T>(items: Vec<T>, modifiers: &Modifiers) -> Vec<T> {
    let iter = items.into_iter().skip(modifiers.offset);
    match modifiers.limit {
        Some(limit) => iter.take(limit).collect(),
        None => iter.collect(),
    }
}

/// Non-hidden variables of a pattern in order of first appearance.
pub(crate) fn visible_vars(group: &GroupPattern) -> Vec<String> {
    fn push(out: &mut Vec<String>, v: &str) {
        if !is_hidden_var(v) && !out.iter().any(|x| x == v) {
            out.push(v.to_string());
        }
    }
    fn term(out: &mut Vec<String>, t: &TermPattern) {
        if let TermPattern::Var(v) = t {
            push(out, v);
        }
    }
    fn walk(out: &mut Vec<String>, group: &GroupPattern) {
        for element in &group.elements {
            match element {
                Pattern::Triples(triples) => {
                    for t in triples {
                        term(out, &t.subject);
                        if let Verb::Var(v) = &t.verb {
                            push(out, v);
                        }
                        term(out, &t.object);
                    }
                }
                Pattern::Optional(g) | Pattern::Minus(g) | Pattern::Group(g) => walk(out, g),
                Pattern::Union(branches) => branches.iter().for_each(|b| walk(out, b)),
                Pattern::Bind(_, v) => push(out, v),
                Pattern::Values(block) => block.vars.iter().for_each(|v| push(out, v)),
                Pattern::Graph(g, inner) => {
                    term(out, g);
                    walk(out, inner);
                }
                Pattern::Filter(_) => {}
            }
        }
    }
    let mut out = Vec::new();
    walk(&mut out, group);
    out
}

pub fn evaluate_query(store: &QuadStore, query: &Query) -> Result<QueryResult, QueryError> {
    let evaluator = Evaluator::new(store);
    let mut solutions = evaluator.eval_group(&query.pattern, vec![Solution::default()])?;
    if let Some(values) = &query.values {
        solutions = evaluator.join_values(solutions, values);
    }
    Ok(match &query.form {
        QueryForm::Select(clause) => evaluator.select(query, clause, solutions)?,
        QueryForm::Ask => QueryResult::Ask(!solutions.is_empty()),
        QueryForm::Construct(template) => evaluator.construct(query, template, solutions),
        QueryForm::Describe(targets) => evaluator.describe(targets, &solutions, &query.pattern),
    })
}
