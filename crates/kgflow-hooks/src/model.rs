//! Hooks and their predicates.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "=")]
    Eq,
}

impl Comparator {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            ">=" | "≥" | "gte" | "ge" => Some(Self::Ge),
            ">" | "gt" => Some(Self::Gt),
            "<=" | "≤" | "lte" | "le" => Some(Self::Le),
            "<" | "lt" => Some(Self::Lt),
            "=" | "==" | "eq" => Some(Self::Eq),
            _ => None,
        }
    }

    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Ge => value >= threshold,
            Self::Gt => value > threshold,
            Self::Le => value <= threshold,
            Self::Lt => value < threshold,
            Self::Eq => value == threshold,
        }
    }
}

/// How a threshold predicate tests its count.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "test", rename_all = "camelCase")]
pub enum ThresholdTest {
    Compare { operator: Comparator, value: f64 },
    /// Inclusive bounds; either may be open.
    Range { min: Option<f64>, max: Option<f64> },
}

impl ThresholdTest {
    pub fn holds(&self, count: f64) -> bool {
        match self {
            Self::Compare { operator, value } => operator.holds(count, *value),
            Self::Range { min, max } => {
                min.map(|m| count >= m).unwrap_or(true) && max.map(|m| count <= m).unwrap_or(true)
            }
        }
    }
}

/// One property constraint checked on every focus node.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Constraint {
    pub target_class: Option<String>,
    pub focus_node: Option<String>,
    pub path: String,
    pub min_count: Option<usize>,
    pub max_count: Option<usize>,
    /// N-Triples form of the required value.
    pub has_value: Option<String>,
    pub datatype: Option<String>,
    /// N-Triples forms of the allowed values; empty means unrestricted.
    pub allowed: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Predicate {
    Ask { query: String },
    Threshold { query: String, test: ThresholdTest },
    ResultDelta { query: String },
    ShapeConformance { constraints: Vec<Constraint> },
}

impl Predicate {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Ask { .. } => "ask",
            Self::Threshold { .. } => "threshold",
            Self::ResultDelta { .. } => "resultDelta",
            Self::ShapeConformance { .. } => "shapeConformance",
        }
    }

    /// Whether firing is edge-triggered and latched until the predicate
    /// stops holding.
    pub fn is_latched(&self) -> bool {
        !matches!(self, Self::ResultDelta { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hook {
    /// IRI of the hook; also the id of the workflow it runs.
    pub id: String,
    pub title: Option<String>,
    pub predicate: Predicate,
    pub pipelines: Vec<String>,
}
