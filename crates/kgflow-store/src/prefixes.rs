//! Prefix maps: expansion of prefixed names and compaction of IRIs.

use crate::store::QuadStore;
use crate::term::Term;
use kgflow_core::vocab::WELL_KNOWN_PREFIXES;

/// Ordered prefix → namespace table. Re-inserting a prefix replaces it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PrefixMap {
    entries: Vec<(String, String)>,
}

impl PrefixMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// The full well-known registry.
    pub fn well_known() -> Self {
        let mut map = Self::new();
        for (prefix, ns) in WELL_KNOWN_PREFIXES {
            map.insert(*prefix, *ns);
        }
        map
    }

    /// Registry entries whose namespace occurs in some IRI of the store.
    pub fn well_known_in_use(store: &QuadStore) -> Self {
        let mut used = vec![false; WELL_KNOWN_PREFIXES.len()];
        let mut check = |term: &Term| {
            if let Term::Iri(iri) = term {
                for (i, (_, ns)) in WELL_KNOWN_PREFIXES.iter().enumerate() {
                    if !used[i] && iri.starts_with(ns) {
                        used[i] = true;
                    }
                }
            }
        };
        for quad in store.iter() {
            check(&quad.subject);
            check(&quad.predicate);
            check(&quad.object);
            if let Some(g) = quad.graph.as_term() {
                check(&g);
            }
        }
        let mut map = Self::new();
        for (i, (prefix, ns)) in WELL_KNOWN_PREFIXES.iter().enumerate() {
            if used[i] {
                map.insert(*prefix, *ns);
            }
        }
        map
    }

    pub fn insert(&mut self, prefix: impl Into<String>, namespace: impl Into<String>) {
        let prefix = prefix.into();
        let namespace = namespace.into();
        match self.entries.iter_mut().find(|(p, _)| *p == prefix) {
            Some(entry) => entry.1 = namespace,
            None => self.entries.push((prefix, namespace)),
        }
    }

    pub fn get(&self, prefix: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(p, _)| p == prefix)
            .map(|(_, ns)| ns.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(p, ns)| (p.as_str(), ns.as_str()))
    }

    /// Adds entries from `other` whose prefix is not yet bound.
    pub fn extend_missing(&mut self, other: &PrefixMap) {
        for (prefix, ns) in other.iter() {
            if self.get(prefix).is_none() {
                self.insert(prefix, ns);
            }
        }
    }

    /// `ex:foo` → full IRI, if the prefix is bound.
    pub fn expand(&self, pname: &str) -> Option<String> {
        let (prefix, local) = pname.split_once(':')?;
        self.get(prefix).map(|ns| format!("{ns}{local}"))
    }

    /// Full IRI → `prefix:local` using the longest matching namespace.
    pub fn compact(&self, iri: &str) -> Option<String> {
        self.entries
            .iter()
            .filter(|(_, ns)| iri.starts_with(ns.as_str()))
            .max_by_key(|(_, ns)| ns.len())
            .and_then(|(prefix, ns)| {
                let local = &iri[ns.len()..];
                is_valid_local(local).then(|| format!("{prefix}:{local}"))
            })
    }

    /// Compacted form when possible, otherwise the IRI itself.
    pub fn compact_or_full(&self, iri: &str) -> String {
        self.compact(iri).unwrap_or_else(|| iri.to_string())
    }
}

/// Conservative PN_LOCAL check: local parts that round-trip through both
/// Turtle and SPARQL without escapes.
pub fn is_valid_local(local: &str) -> bool {
    if local.is_empty() {
        return true;
    }
    if local.starts_with('.') || local.ends_with('.') || local.starts_with('-') {
        return false;
    }
    local
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Resolves a relative IRI reference against `base`. Absolute references
/// pass through untouched.
pub fn resolve_relative(base: Option<&str>, reference: &str) -> String {
    let Some(base) = base else {
        return reference.to_string();
    };
    if has_scheme(reference) {
        return reference.to_string();
    }
    if reference.is_empty() {
        return strip_fragment(base).to_string();
    }
    if reference.starts_with('#') {
        return format!("{}{reference}", strip_fragment(base));
    }
    if reference.starts_with("//") {
        let scheme = base.split_once(':').map(|(s, _)| s).unwrap_or("http");
        return format!("{scheme}:{reference}");
    }
    if reference.starts_with('/') {
        return match base.find("://") {
            Some(i) => {
                let authority_end = base[i + 3..].find('/').map(|j| i + 3 + j).unwrap_or(base.len());
                format!("{}{reference}", &base[..authority_end])
            }
            None => reference.to_string(),
        };
    }
    let dir = match strip_fragment(base).rfind('/') {
        Some(i) => &base[..=i],
        None => base,
    };
    format!("{dir}{reference}")
}

fn strip_fragment(iri: &str) -> &str {
    iri.split('#').next().unwrap_or(iri)
}

fn has_scheme(iri: &str) -> bool {
    match iri.find(':') {
        Some(i) => {
            let scheme = &iri[..i];
            !scheme.is_empty()
                && scheme.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
                && scheme.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}
