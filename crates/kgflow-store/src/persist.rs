//! Graph persistence: directory loads, atomic saves, URI resolution.
//!
//! A graph directory holds any number of Turtle files. Loading merges them
//! into one store; files that fail to parse are skipped and reported. The
//! default graph file is always written whole, through a temp file and a
//! rename, so readers never see a half-written graph.

use crate::prefixes::PrefixMap;
use crate::store::QuadStore;
use crate::term::{Quad, Term};
use crate::turtle::{parse_turtle, TurtleOptions};
use globset::{Glob, GlobSetBuilder};
use kgflow_core::vocab::{KGF_NS, RDF_NS, XSD_NS};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// A Turtle file that was found but not loaded.
#[derive(Clone, Debug)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct LoadOutcome {
    pub store: QuadStore,
    pub loaded_files: Vec<PathBuf>,
    pub skipped: Vec<SkippedFile>,
    /// Prefixes declared across the loaded files; the first declaration of
    /// a prefix wins.
    pub prefixes: PrefixMap,
}

/// All `*.ttl` files under `dir`, sorted by path.
pub fn list_turtle_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    list_turtle_files_matching(dir, &["**/*.ttl".to_string()])
}

/// Files under `dir` whose path relative to `dir` matches any pattern.
pub fn list_turtle_files_matching(dir: &Path, patterns: &[String]) -> io::Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
        builder.add(glob);
    }
    let set = builder
        .build()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(dir).unwrap_or(entry.path());
        if set.is_match(relative) {
            files.push(entry.path().to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

/// Loads every Turtle file under `dir` into one store. A missing directory
/// is an empty store.
pub fn load_directory(dir: &Path) -> io::Result<LoadOutcome> {
    load_files(&list_turtle_files(dir)?)
}

/// Loads the given files in order. Blank node labels are scoped per file:
/// a label already used by an earlier file is renamed for this one.
pub fn load_files(files: &[PathBuf]) -> io::Result<LoadOutcome> {
    let mut outcome = LoadOutcome::default();
    let mut seen_blanks: HashSet<String> = HashSet::new();

    for (index, path) in files.iter().enumerate() {
        let text = match fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable turtle file");
                outcome.skipped.push(SkippedFile { path: path.clone(), error: e.to_string() });
                continue;
            }
        };
        let base = file_base(path);
        let parsed = match parse_turtle(&text, &TurtleOptions::with_base(base)) {
            Ok(p) => p,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping malformed turtle file");
                outcome.skipped.push(SkippedFile { path: path.clone(), error: e.to_string() });
                continue;
            }
        };

        let renames = scope_blanks(&parsed.quads, &mut seen_blanks, index);
        let quads = parsed.quads.into_iter().map(|q| rename_quad(q, &renames));
        outcome.store.add(quads);
        outcome.prefixes.extend_missing(&parsed.prefixes);
        outcome.loaded_files.push(path.clone());
        debug!(path = %path.display(), "loaded turtle file");
    }

    info!(
        files = outcome.loaded_files.len(),
        skipped = outcome.skipped.len(),
        quads = outcome.store.size(),
        "graph loaded"
    );
    Ok(outcome)
}

fn file_base(path: &Path) -> String {
    let absolute = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    format!("file://{}", absolute.display())
}

/// Labels of this file that collide with earlier files, mapped to fresh ones.
fn scope_blanks(quads: &[Quad], seen: &mut HashSet<String>, index: usize) -> HashMap<String, String> {
    let mut local: Vec<String> = Vec::new();
    let mut local_set = HashSet::new();
    for quad in quads {
        for term in [&quad.subject, &quad.object] {
            if let Term::BlankNode(label) = term {
                if local_set.insert(label.to_string()) {
                    local.push(label.to_string());
                }
            }
        }
    }

    let mut renames = HashMap::new();
    for label in &local {
        if seen.contains(label) {
            let mut candidate = format!("{label}_{index}");
            while seen.contains(&candidate) || local_set.contains(&candidate) {
                candidate.push('_');
            }
            seen.insert(candidate.clone());
            renames.insert(label.clone(), candidate);
        }
    }
    for label in local {
        seen.insert(label);
    }
    renames
}

fn rename_quad(quad: Quad, renames: &HashMap<String, String>) -> Quad {
    if renames.is_empty() {
        return quad;
    }
    let rename = |term: Term| {
        let renamed = match &term {
            Term::BlankNode(label) => renames.get(&**label).map(Term::blank),
            _ => None,
        };
        renamed.unwrap_or(term)
    };
    Quad::in_graph(rename(quad.subject), quad.predicate, rename(quad.object), quad.graph)
}

/// Writes `text` to `path` atomically. With `backup`, an existing file is
/// first copied to `<path>.bak`.
pub fn save_default(path: &Path, text: &str, backup: bool) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    if backup && path.exists() {
        fs::copy(path, sibling(path, ".bak"))?;
    }
    let tmp = sibling(path, &format!(".tmp-{}", std::process::id()));
    fs::write(&tmp, text)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    debug!(path = %path.display(), bytes = text.len(), "graph saved");
    Ok(())
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

const BOOTSTRAP: &str = "# Default knowledge graph.\n";

/// Creates `path` with an empty default graph if it does not exist yet.
/// Returns true when the file was created.
pub fn ensure_default_graph(path: &Path) -> io::Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    let mut text = String::from(BOOTSTRAP);
    for (prefix, ns) in [("rdf", RDF_NS), ("xsd", XSD_NS), ("kgf", KGF_NS)] {
        text.push_str(&format!("@prefix {prefix}: <{ns}> .\n"));
    }
    save_default(path, &text, false)?;
    info!(path = %path.display(), "bootstrapped default graph");
    Ok(true)
}

/// Maps body references in the graph to filesystem paths.
///
/// `graph://x` resolves under the graph directory, other registered
/// schemes under their roots, `file:///x` to `/x`. Plain relative paths
/// resolve against the graph directory.
#[derive(Clone, Debug)]
pub struct UriResolver {
    graph_dir: PathBuf,
    roots: BTreeMap<String, PathBuf>,
}

impl UriResolver {
    pub fn new(graph_dir: impl Into<PathBuf>) -> Self {
        let graph_dir = graph_dir.into();
        let mut roots = BTreeMap::new();
        roots.insert("graph://".to_string(), graph_dir.clone());
        Self { graph_dir, roots }
    }

    /// Registers `scheme` (e.g. `templates://`) to resolve under `root`.
    pub fn with_root(mut self, scheme: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        let mut scheme = scheme.into();
        if !scheme.ends_with("://") {
            scheme.push_str("://");
        }
        self.roots.insert(scheme, root.into());
        self
    }

    pub fn graph_dir(&self) -> &Path {
        &self.graph_dir
    }

    pub fn resolve(&self, reference: &str) -> PathBuf {
        for (scheme, root) in &self.roots {
            if let Some(rest) = reference.strip_prefix(scheme.as_str()) {
                return root.join(rest.trim_start_matches('/'));
            }
        }
        if let Some(rest) = reference.strip_prefix("file://") {
            return PathBuf::from(rest);
        }
        let path = Path::new(reference);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.graph_dir.join(path)
        }
    }

    pub async fn read_to_string(&self, reference: &str) -> io::Result<String> {
        tokio::fs::read_to_string(self.resolve(reference)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolver_schemes() {
        let r = UriResolver::new("/kg/graph").with_root("templates", "/kg/tpl");
        assert_eq!(r.resolve("graph://q/a.rq"), PathBuf::from("/kg/graph/q/a.rq"));
        assert_eq!(r.resolve("templates://r.md"), PathBuf::from("/kg/tpl/r.md"));
        assert_eq!(r.resolve("file:///etc/x"), PathBuf::from("/etc/x"));
        assert_eq!(r.resolve("q/b.rq"), PathBuf::from("/kg/graph/q/b.rq"));
        assert_eq!(r.resolve("/abs/c"), PathBuf::from("/abs/c"));
    }

    #[test]
    fn colliding_blank_labels_are_renamed() {
        let mut seen = HashSet::new();
        let a = vec![Quad::new(Term::blank("x"), Term::iri("http://e/p"), Term::integer(1))];
        assert!(scope_blanks(&a, &mut seen, 0).is_empty());
        let renames = scope_blanks(&a, &mut seen, 1);
        assert_eq!(renames.get("x").map(String::as_str), Some("x_1"));
    }

    #[test]
    fn atomic_save_keeps_backup() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("deep/default.ttl");
        assert!(ensure_default_graph(&path).unwrap());
        assert!(!ensure_default_graph(&path).unwrap());
        save_default(&path, "# v2\n", true).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "# v2\n");
        let backup = fs::read_to_string(tmp.path().join("deep/default.ttl.bak")).unwrap();
        assert!(backup.starts_with(BOOTSTRAP));
    }
}
