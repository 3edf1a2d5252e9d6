//! Loading the graph directory and writing changes back to the default
//! graph file.
//!
//! Quads that came from files other than the default graph are left where
//! they are; the default file receives everything else, so reloading the
//! directory reproduces the store.

use kgflow_core::{EngineConfig, Error, Result};
use kgflow_durable::SnapshotStore;
use kgflow_store::{
    ensure_default_graph, list_turtle_files_matching, load_files, save_default, serialize_turtle, LoadOutcome,
    PrefixMap, Quad, QuadStore, SharedStore,
};
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{debug, info};

/// A loaded graph directory.
#[derive(Debug)]
pub struct LoadedGraph {
    pub outcome: LoadOutcome,
    /// Quads owned by files other than the default graph.
    pub external: HashSet<Quad>,
}

/// Loads every Turtle file matching `graph.include`, the default graph
/// last. Bootstraps the default graph when it is missing.
pub fn load_graph(config: &EngineConfig) -> Result<LoadedGraph> {
    let default_path = config.default_graph_path();
    ensure_default_graph(&default_path)?;
    let files = list_turtle_files_matching(&config.graph_dir(), &config.graph.include)?;
    let (mut ordered, defaults): (Vec<PathBuf>, Vec<PathBuf>) = files.into_iter().partition(|f| f != &default_path);
    // Blank node scoping depends only on earlier files, so loading the
    // others alone yields the same quads they contribute to the full load.
    let external = load_files(&ordered)?.store.iter().cloned().collect();
    ordered.extend(defaults);
    let outcome = load_files(&ordered)?;
    Ok(LoadedGraph { outcome, external })
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistReport {
    pub path: PathBuf,
    pub quads: usize,
    pub epoch: u64,
    /// Content hash of the snapshot taken of the written file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,
}

pub struct GraphPersister {
    store: SharedStore,
    path: PathBuf,
    backup: bool,
    external: HashSet<Quad>,
    prefixes: PrefixMap,
    snapshots: Option<SnapshotStore>,
}

impl GraphPersister {
    pub fn new(store: SharedStore, path: PathBuf, backup: bool, external: HashSet<Quad>, prefixes: PrefixMap) -> Self {
        Self { store, path, backup, external, prefixes, snapshots: None }
    }

    /// Also keep a content-addressed snapshot of every write.
    pub fn with_snapshots(mut self, snapshots: SnapshotStore) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Serializes the quads the default graph owns and writes them
    /// atomically.
    pub async fn persist(&self) -> Result<PersistReport> {
        let (text, quads, epoch) = {
            let store = self.store.read().await;
            let owned: Vec<Quad> = store.iter().filter(|q| !self.external.contains(*q)).cloned().collect();
            let count = owned.len();
            (serialize_turtle(&QuadStore::from_quads(owned), Some(&self.prefixes)), count, store.epoch())
        };

        let (path, backup, body) = (self.path.clone(), self.backup, text.clone());
        tokio::task::spawn_blocking(move || save_default(&path, &body, backup))
            .await
            .map_err(|e| Error::durable(format!("graph write task failed: {e}")))??;

        let snapshot = match &self.snapshots {
            Some(store) => Some(store.store("graph", text.as_bytes()).await?.content_hash),
            None => None,
        };
        debug!(path = %self.path.display(), quads, epoch, "default graph written");
        info!(quads, "graph persisted");
        Ok(PersistReport { path: self.path.clone(), quads, epoch, snapshot })
    }
}
