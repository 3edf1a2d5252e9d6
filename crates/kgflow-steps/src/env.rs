//! Everything a handler may touch besides its step and inputs.

use crate::fs::{FileSystem, OsFileSystem};
use crate::http::{HttpClient, ReqwestClient};
use crate::process::{ProcessLauncher, ShellLauncher};
use crate::template::TemplateRenderer;
use kgflow_core::{EngineConfig, SharedClock, SystemClock};
use kgflow_store::{SharedStore, UriResolver};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Debug)]
pub struct StepEnv {
    pub store: SharedStore,
    pub renderer: Arc<TemplateRenderer>,
    pub http: Arc<dyn HttpClient>,
    pub process: Arc<dyn ProcessLauncher>,
    pub fs: Arc<dyn FileSystem>,
    pub clock: SharedClock,
    /// Relative paths in step config resolve against this directory.
    pub workspace: PathBuf,
    pub resolver: UriResolver,
    pub cancel: CancellationToken,
    pub step_timeout: Duration,
}

impl StepEnv {
    /// Real filesystem, HTTP and processes; system clock; lenient templates.
    pub fn new(store: SharedStore, workspace: impl Into<PathBuf>) -> Self {
        let workspace = workspace.into();
        let clock: SharedClock = Arc::new(SystemClock);
        Self {
            store,
            renderer: Arc::new(TemplateRenderer::new(clock.clone(), false)),
            http: Arc::new(ReqwestClient::new()),
            process: Arc::new(ShellLauncher),
            fs: Arc::new(OsFileSystem),
            clock,
            resolver: UriResolver::new(workspace.join("graph")),
            workspace,
            cancel: CancellationToken::new(),
            step_timeout: Duration::from_millis(30_000),
        }
    }

    /// Environment configured from the engine config: workspace, graph
    /// directory and URI roots, template strictness, default step timeout.
    pub fn from_config(store: SharedStore, config: &EngineConfig, clock: SharedClock) -> Self {
        let workspace = config.workspace.clone();
        let mut resolver = UriResolver::new(config.graph_dir());
        for (scheme, root) in config.uri_roots() {
            resolver = resolver.with_root(scheme, root);
        }
        Self {
            renderer: Arc::new(TemplateRenderer::new(clock.clone(), config.templates.strict)),
            clock,
            resolver,
            step_timeout: Duration::from_millis(config.execution.step_timeout_ms),
            ..Self::new(store, workspace)
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.renderer = Arc::new(TemplateRenderer::new(clock.clone(), self.renderer.is_strict()));
        self.clock = clock;
        self
    }

    pub fn with_strict_templates(mut self, strict: bool) -> Self {
        self.renderer = Arc::new(TemplateRenderer::new(self.clock.clone(), strict));
        self
    }

    pub fn with_http(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = http;
        self
    }

    pub fn with_process(mut self, process: Arc<dyn ProcessLauncher>) -> Self {
        self.process = process;
        self
    }

    pub fn with_fs(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    pub fn with_resolver(mut self, resolver: UriResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// A path from step config: scheme references (`graph://`, ...) go
    /// through the resolver, relative paths join the workspace.
    pub fn resolve_path(&self, reference: &str) -> PathBuf {
        if reference.contains("://") {
            return self.resolver.resolve(reference);
        }
        let path = Path::new(reference);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace.join(path.strip_prefix("./").unwrap_or(path))
        }
    }

    /// The same environment with its own child cancellation token.
    pub fn child(&self) -> Self {
        Self { cancel: self.cancel.child_token(), ..self.clone() }
    }
}
