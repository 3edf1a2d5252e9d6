//! Engine configuration
//!
//! All tunable parameters in one place. Loaded from TOML at startup,
//! falls back to defaults if no config file exists. A handful of
//! environment variables override the file (see `apply_env`).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "KGFLOW_CONFIG";
pub const LOG_ENV: &str = "KGFLOW_LOG";
pub const GRAPH_DIR_ENV: &str = "KGFLOW_GRAPH_DIR";
pub const DEFAULT_CONFIG_FILE: &str = "kgflow.toml";

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root that relative paths (graph dir, durable root, step paths) resolve against.
    pub workspace: PathBuf,
    pub graph: GraphConfig,
    pub durable: DurableConfig,
    pub execution: ExecutionConfig,
    pub hooks: HookConfig,
    pub templates: TemplateConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Directory scanned for Turtle files.
    pub dir: PathBuf,
    /// File (inside `dir`) that holds the default graph.
    pub default_file: String,
    /// Glob patterns (relative to `dir`) selecting Turtle files.
    pub include: Vec<String>,
    /// Keep a `.bak` copy when the default graph is overwritten.
    pub backup_on_save: bool,
    /// Write the store back to the default graph after a run that changed it.
    pub persist_on_change: bool,
    /// Extra URI scheme roots, e.g. `templates://` -> `./templates`.
    pub uri_roots: BTreeMap<String, PathBuf>,
    /// Drop removal history once this many removed quads are held; 0 keeps it all.
    pub compact_after: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DurableConfig {
    /// Reserved namespace holding locks, queues, receipts, snapshots.
    pub root: PathBuf,
    /// HMAC key for receipt signatures. Unsigned receipts when absent.
    pub signing_key: Option<String>,
    pub lock_ttl_ms: u64,
    pub lock_wait_ms: u64,
    /// A claimed job with no completion after this long is stranded.
    pub stranded_grace_ms: u64,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub step_timeout_ms: u64,
    pub workflow_timeout_ms: u64,
    /// Run the steps of one wave concurrently.
    pub parallel_waves: bool,
    /// WorkerPool size.
    pub workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HookConfig {
    pub tick_interval_ms: u64,
    /// Fired hooks of one tick that may run at the same time.
    pub max_concurrent: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    /// Undefined variables are an error instead of rendering empty.
    pub strict: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub filter: String,
    pub json: bool,
    /// Directory for a daily-rolling log file.
    pub dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workspace: PathBuf::from("."),
            graph: GraphConfig::default(),
            durable: DurableConfig::default(),
            execution: ExecutionConfig::default(),
            hooks: HookConfig::default(),
            templates: TemplateConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("graph"),
            default_file: "default.ttl".into(),
            include: vec!["**/*.ttl".into()],
            backup_on_save: true,
            persist_on_change: true,
            uri_roots: BTreeMap::new(),
            compact_after: 10_000,
        }
    }
}

impl Default for DurableConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(".kgflow"),
            signing_key: None,
            lock_ttl_ms: 60_000,
            lock_wait_ms: 30_000,
            stranded_grace_ms: 300_000,
            poll_interval_ms: 250,
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            step_timeout_ms: 30_000,
            workflow_timeout_ms: 300_000,
            parallel_waves: true,
            workers: 4,
        }
    }
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
            max_concurrent: 4,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "kgflow=info".into(),
            json: false,
            dir: None,
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load from `path`, or defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("no config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Load from `KGFLOW_CONFIG` or `./kgflow.toml`, then apply env overrides.
    pub fn discover() -> Result<Self> {
        let path = std::env::var(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
        let mut config = Self::load(&path)?;
        config.apply_env();
        Ok(config)
    }

    /// Apply `KGFLOW_LOG` and `KGFLOW_GRAPH_DIR`.
    pub fn apply_env(&mut self) {
        if let Ok(filter) = std::env::var(LOG_ENV) {
            if !filter.trim().is_empty() {
                self.log.filter = filter;
            }
        }
        if let Ok(dir) = std::env::var(GRAPH_DIR_ENV) {
            if !dir.trim().is_empty() {
                self.graph.dir = PathBuf::from(dir);
            }
        }
    }

    fn resolve(&self, p: &Path) -> PathBuf {
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.workspace.join(p)
        }
    }

    pub fn graph_dir(&self) -> PathBuf {
        self.resolve(&self.graph.dir)
    }

    pub fn default_graph_path(&self) -> PathBuf {
        self.graph_dir().join(&self.graph.default_file)
    }

    pub fn durable_root(&self) -> PathBuf {
        self.resolve(&self.durable.root)
    }

    pub fn uri_roots(&self) -> BTreeMap<String, PathBuf> {
        self.graph
            .uri_roots
            .iter()
            .map(|(k, v)| (k.clone(), self.resolve(v)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_timeouts() {
        let c = EngineConfig::default();
        assert_eq!(c.execution.step_timeout_ms, 30_000);
        assert_eq!(c.execution.workflow_timeout_ms, 300_000);
        assert_eq!(c.graph.default_file, "default.ttl");
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c = EngineConfig::from_toml(
            r#"
            workspace = "/srv/kg"
            [execution]
            workers = 8
            [durable]
            signing_key = "s3cret"
            "#,
        )
        .unwrap();
        assert_eq!(c.execution.workers, 8);
        assert_eq!(c.execution.step_timeout_ms, 30_000);
        assert_eq!(c.durable.signing_key.as_deref(), Some("s3cret"));
        assert_eq!(c.graph_dir(), PathBuf::from("/srv/kg/graph"));
        assert_eq!(c.durable_root(), PathBuf::from("/srv/kg/.kgflow"));
    }

    #[test]
    fn bad_toml_is_config_error() {
        let err = EngineConfig::from_toml("workspace = [").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let c = EngineConfig::load(&tmp.path().join("nope.toml")).unwrap();
        assert_eq!(c.hooks.max_concurrent, 4);
    }
}
