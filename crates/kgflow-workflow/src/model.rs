//! Workflow model: hooks and pipelines flattened into an arena of steps.
//!
//! Steps refer to each other by IRI; the planner turns those into indices
//! into `Workflow::steps`, so no step owns another.

use crate::error::WorkflowError;
use kgflow_core::vocab::kgf;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The six step variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Sparql,
    Template,
    File,
    Http,
    Cli,
    Output,
}

impl StepKind {
    pub const ALL: [StepKind; 6] = [
        StepKind::Sparql,
        StepKind::Template,
        StepKind::File,
        StepKind::Http,
        StepKind::Cli,
        StepKind::Output,
    ];

    pub fn from_type_iri(iri: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.type_iri() == iri)
    }

    pub fn type_iri(self) -> &'static str {
        match self {
            Self::Sparql => kgf::SPARQL_STEP,
            Self::Template => kgf::TEMPLATE_STEP,
            Self::File => kgf::FILE_STEP,
            Self::Http => kgf::HTTP_STEP,
            Self::Cli => kgf::CLI_STEP,
            Self::Output => kgf::OUTPUT_STEP,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sparql => "sparql",
            Self::Template => "template",
            Self::File => "file",
            Self::Http => "http",
            Self::Cli => "cli",
            Self::Output => "output",
        }
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `from -> to` pair of an input or output mapping.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    pub from: String,
    pub to: String,
}

/// Retry and continuation behavior when a step fails.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPolicy {
    pub retries: u32,
    pub backoff_ms: u64,
    pub continue_on_error: bool,
}

impl ErrorPolicy {
    pub fn is_default(&self) -> bool {
        self == &Self::default()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Step IRI.
    pub id: String,
    /// Local name of the IRI; keys the step's output in the context.
    pub name: String,
    pub kind: StepKind,
    /// Type-specific configuration keyed by predicate local name.
    pub config: Map<String, Value>,
    pub depends_on: Vec<String>,
    pub input_mapping: Vec<Mapping>,
    pub output_mapping: Vec<Mapping>,
    #[serde(skip_serializing_if = "ErrorPolicy::is_default", default)]
    pub error_policy: ErrorPolicy,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub timeout_ms: Option<u64>,
    /// Declaration order across the whole workflow.
    pub index: usize,
    /// Pipeline the step was declared in.
    pub pipeline: String,
}

impl Step {
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }

    pub fn config_u64(&self, key: &str) -> Option<u64> {
        match self.config.get(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn has_config(&self, key: &str) -> bool {
        self.config.get(key).map(|v| !v.is_null()).unwrap_or(false)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineInfo {
    pub id: String,
    pub steps: Vec<String>,
}

/// A workflow rooted at a hook (or at a bare pipeline).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: String,
    pub title: Option<String>,
    /// Hook predicate node, when the root is a hook that declares one.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub predicate: Option<String>,
    pub pipelines: Vec<PipelineInfo>,
    pub steps: Vec<Step>,
}

impl Workflow {
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSummary {
    pub id: String,
    pub title: Option<String>,
    /// `hook` or `pipeline`.
    pub kind: String,
    pub pipelines: usize,
    pub steps: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    pub kind: String,
    pub step_ids: Vec<String>,
    pub message: String,
}

impl From<&WorkflowError> for ValidationIssue {
    fn from(err: &WorkflowError) -> Self {
        Self {
            kind: err.kind_name().to_string(),
            step_ids: err.step_ids(),
            message: err.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub workflow_id: String,
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn has_kind(&self, kind: &str) -> bool {
        self.errors.iter().any(|e| e.kind == kind)
    }
}
