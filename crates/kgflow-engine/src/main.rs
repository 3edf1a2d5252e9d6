//! kgflow CLI - run knowledge-graph workflows and hooks.

use anyhow::Context;
use clap::{Parser, Subcommand};
use kgflow_core::EngineConfig;
use kgflow_durable::Priority;
use kgflow_engine::{init_logging, Engine, RunOptions};
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "kgflow", version = env!("CARGO_PKG_VERSION"), about = "Knowledge-graph workflow engine")]
struct Cli {
    /// Config file (default: $KGFLOW_CONFIG or ./kgflow.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Workspace root; relative config paths resolve against it
    #[arg(short, long, global = true)]
    workspace: Option<PathBuf>,

    /// Log as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a workflow once
    Run {
        /// Workflow IRI, prefixed name or unique local name
        workflow: String,
        /// Input variable as key=value (value parsed as JSON when it can be)
        #[arg(short, long = "input")]
        inputs: Vec<String>,
        /// Hold this lock for the whole run
        #[arg(long)]
        lock: Option<String>,
    },
    /// Check a workflow without running it
    Validate { workflow: String },
    /// List hooks and pipelines
    List,
    /// Run a SPARQL query or update
    Query {
        /// Query text
        query: Option<String>,
        /// Read the query from a file
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Evaluate every hook once
    Tick,
    /// Tick until interrupted
    Watch {
        /// Override hooks.tick_interval_ms
        #[arg(long)]
        interval_ms: Option<u64>,
    },
    /// Queue a workflow run
    Enqueue {
        workflow: String,
        #[arg(short, long, default_value = "normal")]
        priority: Priority,
        #[arg(short, long = "input")]
        inputs: Vec<String>,
        #[arg(long)]
        lock: Option<String>,
    },
    /// Process queued runs
    Worker {
        /// Override execution.workers
        #[arg(long)]
        workers: Option<usize>,
        /// Stop once the queue is empty
        #[arg(long)]
        drain: bool,
    },
    /// Release expired locks, requeue stranded jobs, chain pending receipts
    Reconcile,
    /// Write the default graph file
    Persist,
    /// List receipts, or verify the chain
    Receipts {
        #[arg(long)]
        verify: bool,
    },
}

fn parse_inputs(pairs: &[String]) -> anyhow::Result<Map<String, Value>> {
    let mut inputs = Map::new();
    for pair in pairs {
        let (key, raw) = pair.split_once('=').with_context(|| format!("input {pair:?} is not key=value"))?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        inputs.insert(key.trim().to_string(), value);
    }
    Ok(inputs)
}

fn print<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let mut config = EngineConfig::load(path)?;
            config.apply_env();
            config
        }
        None => EngineConfig::discover()?,
    };
    if let Some(workspace) = &cli.workspace {
        config.workspace = workspace.clone();
    }
    if cli.json_logs {
        config.log.json = true;
    }
    Ok(config)
}

/// Runs the command; the returned code is the process exit code.
async fn run(cli: Cli) -> anyhow::Result<i32> {
    let mut config = load_config(&cli)?;
    let _log_guard = init_logging(&config.log)?;

    if let Command::Watch { interval_ms: Some(ms) } = &cli.command {
        config.hooks.tick_interval_ms = *ms;
    }
    let workers = match &cli.command {
        Command::Worker { workers: Some(n), .. } => *n,
        _ => config.execution.workers,
    };
    let engine = Engine::open(config).await?;

    let code = match cli.command {
        Command::Run { workflow, inputs, lock } => {
            let options = RunOptions { inputs: parse_inputs(&inputs)?, lock, ..RunOptions::default() };
            let execution = engine.run_with(&workflow, options).await?;
            print(&execution)?;
            execution.status.exit_code()
        }
        Command::Validate { workflow } => {
            let report = engine.validate(&workflow).await?;
            print(&report)?;
            if report.valid {
                kgflow_core::ExitCode::Success.code()
            } else {
                kgflow_core::ExitCode::Validation.code()
            }
        }
        Command::List => {
            print(&engine.list().await)?;
            0
        }
        Command::Query { query, file } => {
            let text = match (query, file) {
                (Some(q), _) => q,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("cannot read {}", path.display()))?,
                (None, None) => anyhow::bail!("query needs a query string or --file"),
            };
            print(&engine.query(&text).await?)?;
            0
        }
        Command::Tick => {
            let report = engine.tick().await;
            print(&report)?;
            i32::from(!report.errors.is_empty())
        }
        Command::Watch { .. } => {
            let cancel = engine.cancel_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            });
            let ticks = engine.watch().await;
            tracing::info!(ticks, "watch stopped");
            0
        }
        Command::Enqueue { workflow, priority, inputs, lock } => {
            let job = engine.enqueue(&workflow, priority, parse_inputs(&inputs)?, lock).await?;
            print(&job)?;
            0
        }
        Command::Worker { drain, .. } => {
            let cancel = engine.cancel_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            });
            let report = engine.work(workers, drain).await?;
            print(&report)?;
            i32::from(report.failed > 0)
        }
        Command::Reconcile => {
            print(&engine.reconcile().await?)?;
            0
        }
        Command::Persist => {
            print(&engine.persist().await?)?;
            0
        }
        Command::Receipts { verify } => {
            if verify {
                print(&engine.verify_receipts().await?)?;
            } else {
                print(&engine.receipts().await?)?;
            }
            0
        }
    };
    Ok(code)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => ExitCode::from(code as u8),
        Err(err) => {
            eprintln!("error: {err:#}");
            let code = err.downcast_ref::<kgflow_core::Error>().map(|e| e.exit_code()).unwrap_or(1);
            ExitCode::from(code as u8)
        }
    }
}
