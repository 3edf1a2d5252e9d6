//! kgflow engine - knowledge-graph workflow execution
//!
//! Ties the crates together: the graph is loaded from the configured
//! directory, workflows are executed wave by wave with every run chained
//! into the receipt log, and hooks are ticked against the shared store.

pub mod engine;
pub mod executor;
pub mod logging;
pub mod persist;

pub use engine::{Engine, EngineBuilder};
pub use executor::{Execution, Executor, RunOptions};
pub use logging::init_logging;
pub use persist::{load_graph, GraphPersister, LoadedGraph, PersistReport};
