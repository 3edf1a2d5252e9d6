//! Time-indexed quad store.
//!
//! Quads live in an append-only arena of records. A record remembers the
//! epoch it was added in and, once removed, the epoch it was removed in.
//! Secondary indices hold arena positions (live and dead), so historical
//! lookups reuse them and current lookups skip dead records.

use crate::error::QueryError;
use crate::prefixes::PrefixMap;
use crate::sparql::{self, QueryResponse, QueryResult, Request};
use crate::term::{GraphName, Quad, Term};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

pub type Epoch = u64;

#[derive(Clone, Debug)]
struct Record {
    quad: Quad,
    added: Epoch,
    removed: Option<Epoch>,
}

impl Record {
    fn live_at(&self, epoch: Epoch) -> bool {
        self.added <= epoch && self.removed.map_or(true, |r| r > epoch)
    }
}

/// Quads added and removed between two epochs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Delta {
    pub from: Epoch,
    pub to: Epoch,
    pub added: Vec<Quad>,
    pub removed: Vec<Quad>,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub quads: usize,
    pub subjects: usize,
    pub predicates: usize,
    pub objects: usize,
    pub graphs: usize,
    pub epoch: Epoch,
}

impl StoreStats {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "quads": self.quads,
            "subjects": self.subjects,
            "predicates": self.predicates,
            "objects": self.objects,
            "graphs": self.graphs,
            "epoch": self.epoch,
        })
    }
}

#[derive(Clone, Debug, Default)]
pub struct QuadStore {
    records: Vec<Record>,
    live: HashMap<Quad, usize>,
    by_s: HashMap<Term, Vec<usize>>,
    by_p: HashMap<Term, Vec<usize>>,
    by_o: HashMap<Term, Vec<usize>>,
    by_sp: HashMap<(Term, Term), Vec<usize>>,
    by_po: HashMap<(Term, Term), Vec<usize>>,
    epoch: Epoch,
    blank_counter: u64,
}

const EMPTY: &[usize] = &[];

impl QuadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_quads(quads: impl IntoIterator<Item = Quad>) -> Self {
        let mut store = Self::new();
        store.add(quads);
        store
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn size(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Removed quads whose history is still held.
    pub fn retired(&self) -> usize {
        self.records.len() - self.live.len()
    }

    /// Adds quads; returns the new epoch if anything changed.
    pub fn add(&mut self, quads: impl IntoIterator<Item = Quad>) -> Option<Epoch> {
        let next = self.epoch + 1;
        let mut changed = 0usize;
        for quad in quads {
            if self.live.contains_key(&quad) {
                continue;
            }
            let idx = self.records.len();
            self.index(&quad, idx);
            self.live.insert(quad.clone(), idx);
            self.records.push(Record { quad, added: next, removed: None });
            changed += 1;
        }
        if changed == 0 {
            return None;
        }
        self.epoch = next;
        debug!(epoch = next, added = changed, "store batch added");
        Some(next)
    }

    /// Removes quads; returns the new epoch if anything changed.
    pub fn remove<'a>(&mut self, quads: impl IntoIterator<Item = &'a Quad>) -> Option<Epoch> {
        let next = self.epoch + 1;
        let mut changed = 0usize;
        for quad in quads {
            if let Some(idx) = self.live.remove(quad) {
                self.records[idx].removed = Some(next);
                changed += 1;
            }
        }
        if changed == 0 {
            return None;
        }
        self.epoch = next;
        debug!(epoch = next, removed = changed, "store batch removed");
        Some(next)
    }

    /// Applies removals then additions as a single epoch.
    pub fn apply(&mut self, remove: &[Quad], add: Vec<Quad>) -> Option<Epoch> {
        let next = self.epoch + 1;
        let mut changed = false;
        for quad in remove {
            if let Some(idx) = self.live.remove(quad) {
                self.records[idx].removed = Some(next);
                changed = true;
            }
        }
        for quad in add {
            if self.live.contains_key(&quad) {
                continue;
            }
            let idx = self.records.len();
            self.index(&quad, idx);
            self.live.insert(quad.clone(), idx);
            self.records.push(Record { quad, added: next, removed: None });
            changed = true;
        }
        if changed {
            self.epoch = next;
            Some(next)
        } else {
            None
        }
    }

    fn index(&mut self, quad: &Quad, idx: usize) {
        let Quad { subject: s, predicate: p, object: o, .. } = quad;
        self.by_s.entry(s.clone()).or_default().push(idx);
        self.by_p.entry(p.clone()).or_default().push(idx);
        self.by_o.entry(o.clone()).or_default().push(idx);
        self.by_sp.entry((s.clone(), p.clone())).or_default().push(idx);
        self.by_po.entry((p.clone(), o.clone())).or_default().push(idx);
    }

    /// Arena positions that may match; `None` means a full scan.
    fn candidates(&self, s: Option<&Term>, p: Option<&Term>, o: Option<&Term>) -> Option<&[usize]> {
        let found = match (s, p, o) {
            (Some(s), Some(p), _) => self.by_sp.get(&(s.clone(), p.clone())),
            (_, Some(p), Some(o)) => self.by_po.get(&(p.clone(), o.clone())),
            (Some(s), None, _) => self.by_s.get(s),
            (None, None, Some(o)) => self.by_o.get(o),
            (None, Some(p), None) => self.by_p.get(p),
            (None, None, None) => return None,
        };
        Some(found.map(|v| v.as_slice()).unwrap_or(EMPTY))
    }

    fn scan<'a>(
        &'a self,
        s: Option<&Term>,
        p: Option<&Term>,
        o: Option<&Term>,
        g: Option<&GraphName>,
        at: Option<Epoch>,
    ) -> impl Iterator<Item = &'a Quad> + 'a {
        let positions: Box<dyn Iterator<Item = usize> + 'a> = match self.candidates(s, p, o) {
            Some(slice) => Box::new(slice.iter().copied()),
            None => Box::new(0..self.records.len()),
        };
        let (s, p, o, g) = (s.cloned(), p.cloned(), o.cloned(), g.cloned());
        positions.filter_map(move |i| {
            let record = &self.records[i];
            let alive = match at {
                Some(epoch) => record.live_at(epoch),
                None => record.removed.is_none(),
            };
            let q = &record.quad;
            let hit = alive
                && s.as_ref().map_or(true, |t| &q.subject == t)
                && p.as_ref().map_or(true, |t| &q.predicate == t)
                && o.as_ref().map_or(true, |t| &q.object == t)
                && g.as_ref().map_or(true, |t| &q.graph == t);
            hit.then_some(q)
        })
    }

    /// Current quads matching the pattern, in insertion order.
    pub fn match_pattern<'a>(
        &'a self,
        s: Option<&Term>,
        p: Option<&Term>,
        o: Option<&Term>,
        g: Option<&GraphName>,
    ) -> impl Iterator<Item = &'a Quad> + 'a {
        self.scan(s, p, o, g, None)
    }

    /// Quads matching the pattern as the store stood at `epoch`.
    pub fn match_at<'a>(
        &'a self,
        s: Option<&Term>,
        p: Option<&Term>,
        o: Option<&Term>,
        g: Option<&GraphName>,
        epoch: Epoch,
    ) -> impl Iterator<Item = &'a Quad> + 'a {
        self.scan(s, p, o, g, Some(epoch))
    }

    pub fn has(&self, s: &Term, p: &Term, o: &Term, g: Option<&GraphName>) -> bool {
        match g {
            Some(graph) => self.contains(&Quad::in_graph(s.clone(), p.clone(), o.clone(), graph.clone())),
            None => self.match_pattern(Some(s), Some(p), Some(o), None).next().is_some(),
        }
    }

    pub fn contains(&self, quad: &Quad) -> bool {
        self.live.contains_key(quad)
    }

    /// All live quads in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Quad> {
        self.records
            .iter()
            .filter(|r| r.removed.is_none())
            .map(|r| &r.quad)
    }

    /// Named graphs in first-appearance order.
    pub fn graphs(&self) -> Vec<GraphName> {
        let mut seen = HashSet::new();
        self.iter()
            .filter(|q| !q.graph.is_default())
            .filter(|q| seen.insert(q.graph.clone()))
            .map(|q| q.graph.clone())
            .collect()
    }

    /// Changes between `epoch` and now. A quad removed and re-added in the
    /// window is in neither list.
    pub fn since(&self, epoch: Epoch) -> Delta {
        let before: HashSet<&Quad> = self
            .records
            .iter()
            .filter(|r| r.live_at(epoch))
            .map(|r| &r.quad)
            .collect();
        let added = self
            .records
            .iter()
            .filter(|r| r.removed.is_none() && r.added > epoch && !before.contains(&r.quad))
            .map(|r| r.quad.clone())
            .collect();
        let removed = self
            .records
            .iter()
            .filter(|r| r.live_at(epoch) && r.removed.is_some() && !self.live.contains_key(&r.quad))
            .map(|r| r.quad.clone())
            .collect();
        Delta { from: epoch, to: self.epoch, added, removed }
    }

    pub fn stats(&self) -> StoreStats {
        let mut subjects = HashSet::new();
        let mut predicates = HashSet::new();
        let mut objects = HashSet::new();
        let mut graphs = HashSet::new();
        for q in self.iter() {
            subjects.insert(&q.subject);
            predicates.insert(&q.predicate);
            objects.insert(&q.object);
            if !q.graph.is_default() {
                graphs.insert(&q.graph);
            }
        }
        StoreStats {
            quads: self.size(),
            subjects: subjects.len(),
            predicates: predicates.len(),
            objects: objects.len(),
            graphs: graphs.len(),
            epoch: self.epoch,
        }
    }

    /// Drops history for quads removed at or before `epoch` and rebuilds
    /// the indices. `since` and `match_at` for earlier epochs lose precision.
    pub fn compact(&mut self, epoch: Epoch) {
        let keep: Vec<Record> = self
            .records
            .drain(..)
            .filter(|r| r.removed.map_or(true, |e| e > epoch))
            .collect();
        self.live.clear();
        self.by_s.clear();
        self.by_p.clear();
        self.by_o.clear();
        self.by_sp.clear();
        self.by_po.clear();
        for (idx, record) in keep.iter().enumerate() {
            self.index(&record.quad, idx);
            if record.removed.is_none() {
                self.live.insert(record.quad.clone(), idx);
            }
        }
        self.records = keep;
    }

    /// Compacts at the current epoch once `threshold` removed quads have
    /// piled up. A zero threshold disables it.
    pub fn compact_retired(&mut self, threshold: usize) -> bool {
        let retired = self.retired();
        if threshold == 0 || retired < threshold {
            return false;
        }
        self.compact(self.epoch);
        debug!(epoch = self.epoch, dropped = retired, "store compacted");
        true
    }

    /// Fresh blank node label unique within this store.
    pub fn fresh_blank(&mut self, hint: &str) -> Term {
        self.blank_counter += 1;
        Term::blank(format!("{hint}{}e{}", self.blank_counter, self.epoch))
    }

    /// Parses and evaluates a read-only query.
    pub fn query(&self, text: &str) -> Result<QueryResult, QueryError> {
        let request = self.prepare(text)?;
        match &request {
            Request::Query(query) => sparql::eval::evaluate_query(self, query),
            Request::Update(_) => Err(QueryError::unsupported(
                "update operations need a mutable store; use update or execute",
            )),
        }
    }

    /// Parses and applies an update.
    pub fn update(&mut self, text: &str) -> Result<QueryResult, QueryError> {
        let request = self.prepare(text)?;
        match &request {
            Request::Update(update) => sparql::update::apply_update(self, update),
            Request::Query(_) => Err(QueryError::syntax("expected an update operation")),
        }
    }

    /// Query or update, whichever the text is.
    pub fn execute(&mut self, text: &str) -> Result<QueryResult, QueryError> {
        Ok(self.execute_detailed(text)?.result)
    }

    /// Like `execute`, also returning the prefixes in effect so callers can
    /// compact IRIs in results.
    pub fn execute_detailed(&mut self, text: &str) -> Result<QueryResponse, QueryError> {
        let request = self.prepare(text)?;
        let result = match &request {
            Request::Query(query) => sparql::eval::evaluate_query(self, query)?,
            Request::Update(update) => sparql::update::apply_update(self, update)?,
        };
        Ok(QueryResponse { result, prefixes: request.prefixes().clone() })
    }

    /// Parses with prefix injection: a request that declares no prefixes
    /// sees the well-known entries whose namespace occurs in the store.
    pub fn prepare(&self, text: &str) -> Result<Request, QueryError> {
        let injected = if sparql::declares_prefixes(text) {
            PrefixMap::new()
        } else {
            PrefixMap::well_known_in_use(self)
        };
        sparql::parse_request(text, injected)
    }
}

/// The store shared across workers. Reads run concurrently; updates hold
/// the write lock for their whole duration.
#[derive(Clone, Debug, Default)]
pub struct SharedStore {
    inner: Arc<RwLock<QuadStore>>,
}

impl SharedStore {
    pub fn new(store: QuadStore) -> Self {
        Self { inner: Arc::new(RwLock::new(store)) }
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, QuadStore> {
        self.inner.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, QuadStore> {
        self.inner.write().await
    }

    pub async fn epoch(&self) -> Epoch {
        self.inner.read().await.epoch()
    }

    /// Evaluates queries under the read lock and updates under the write
    /// lock. Parsing happens under the read lock because prefix injection
    /// looks at the store.
    pub async fn run(&self, text: &str) -> Result<QueryResponse, QueryError> {
        let request = {
            let guard = self.inner.read().await;
            let request = guard.prepare(text)?;
            if let Request::Query(query) = &request {
                let result = sparql::eval::evaluate_query(&guard, query)?;
                return Ok(QueryResponse { result, prefixes: request.prefixes().clone() });
            }
            request
        };
        let mut guard = self.inner.write().await;
        let result = match &request {
            Request::Update(update) => sparql::update::apply_update(&mut guard, update)?,
            Request::Query(query) => sparql::eval::evaluate_query(&guard, query)?,
        };
        Ok(QueryResponse { result, prefixes: request.prefixes().clone() })
    }

    pub async fn query(&self, text: &str) -> Result<QueryResult, QueryError> {
        Ok(self.run(text).await?.result)
    }

    pub async fn add(&self, quads: Vec<Quad>) -> Option<Epoch> {
        self.inner.write().await.add(quads)
    }

    pub async fn compact_retired(&self, threshold: usize) -> bool {
        self.inner.write().await.compact_retired(threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iri(s: &str) -> Term {
        Term::iri(format!("http://example.org/{s}"))
    }

    fn q(s: &str, p: &str, o: &str) -> Quad {
        Quad::new(iri(s), iri(p), iri(o))
    }

    #[test]
    fn add_collapses_duplicates_and_bumps_epoch() {
        let mut store = QuadStore::new();
        assert_eq!(store.add(vec![q("a", "p", "b"), q("a", "p", "b")]), Some(1));
        assert_eq!(store.size(), 1);
        assert_eq!(store.add(vec![q("a", "p", "b")]), None);
        assert_eq!(store.epoch(), 1);
    }

    #[test]
    fn match_uses_all_index_shapes() {
        let store = QuadStore::from_quads(vec![q("a", "p", "b"), q("a", "r", "c"), q("d", "p", "b")]);
        assert_eq!(store.match_pattern(Some(&iri("a")), None, None, None).count(), 2);
        assert_eq!(store.match_pattern(None, Some(&iri("p")), None, None).count(), 2);
        assert_eq!(store.match_pattern(None, None, Some(&iri("b")), None).count(), 2);
        assert_eq!(store.match_pattern(Some(&iri("a")), Some(&iri("p")), None, None).count(), 1);
        assert_eq!(store.match_pattern(None, Some(&iri("p")), Some(&iri("b")), None).count(), 2);
        assert_eq!(store.match_pattern(None, None, None, None).count(), 3);
        assert_eq!(store.match_pattern(Some(&iri("zz")), None, None, None).count(), 0);
    }

    #[test]
    fn since_and_match_at_see_history() {
        let mut store = QuadStore::new();
        store.add(vec![q("a", "p", "b")]);
        let e1 = store.epoch();
        store.add(vec![q("c", "p", "d")]);
        store.remove(&[q("a", "p", "b")]);

        let delta = store.since(e1);
        assert_eq!(delta.added, vec![q("c", "p", "d")]);
        assert_eq!(delta.removed, vec![q("a", "p", "b")]);
        assert_eq!(store.match_at(None, Some(&iri("p")), None, None, e1).count(), 1);
        assert!(!store.has(&iri("a"), &iri("p"), &iri("b"), None));
    }

    #[test]
    fn readding_in_window_is_no_change() {
        let mut store = QuadStore::new();
        store.add(vec![q("a", "p", "b")]);
        let e1 = store.epoch();
        store.remove(&[q("a", "p", "b")]);
        store.add(vec![q("a", "p", "b")]);
        assert!(store.since(e1).is_empty());
        assert_eq!(store.size(), 1);
    }

    #[test]
    fn compact_keeps_live_quads() {
        let mut store = QuadStore::from_quads(vec![q("a", "p", "b"), q("c", "p", "d")]);
        store.remove(&[q("a", "p", "b")]);
        store.compact(store.epoch());
        assert_eq!(store.size(), 1);
        assert_eq!(store.match_pattern(None, Some(&iri("p")), None, None).count(), 1);
    }

    #[test]
    fn compact_retired_waits_for_threshold() {
        let mut store = QuadStore::from_quads(vec![q("a", "p", "b"), q("c", "p", "d"), q("e", "p", "f")]);
        store.remove(&[q("a", "p", "b")]);
        assert_eq!(store.retired(), 1);
        assert!(!store.compact_retired(2));
        assert!(!store.compact_retired(0));
        assert_eq!(store.retired(), 1);

        store.remove(&[q("c", "p", "d")]);
        let epoch = store.epoch();
        assert!(store.compact_retired(2));
        assert_eq!(store.retired(), 0);
        assert_eq!(store.size(), 1);
        assert_eq!(store.epoch(), epoch);
        assert!(store.contains(&q("e", "p", "f")));
    }
}
