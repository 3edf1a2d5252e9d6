//! kgflow workflow - workflows described in the graph
//!
//! Extracts hooks, pipelines and steps from the store, validates them,
//! orders them into a dependency DAG, and carries the per-execution context
//! that steps read from and write to.

pub mod context;
pub mod error;
pub mod graph;
pub mod model;
pub mod parser;
pub mod planner;

pub use context::{ContextInit, ContextSnapshot, ExecutionContext, StepFailure, StepResult};
pub use error::WorkflowError;
pub use model::{
    ErrorPolicy, Mapping, PipelineInfo, Step, StepKind, ValidationIssue, ValidationReport, Workflow,
    WorkflowSummary,
};
pub use parser::{list, parse, resolve_id, validate};
pub use planner::{plan, CostClass, Plan, PlannedStep};
