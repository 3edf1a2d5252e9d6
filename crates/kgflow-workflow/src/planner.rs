//! Dependency planning: topological order, parallel waves, step metadata.

use crate::error::WorkflowError;
use crate::model::{Step, StepKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Rough cost of running a step, by type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostClass {
    Low,
    Medium,
    High,
}

impl CostClass {
    pub fn of(kind: StepKind) -> Self {
        match kind {
            StepKind::Sparql | StepKind::Template | StepKind::File => Self::Low,
            StepKind::Output => Self::Medium,
            StepKind::Http | StepKind::Cli => Self::High,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedStep {
    /// Index into the planned step slice (declaration order).
    pub index: usize,
    pub id: String,
    pub kind: StepKind,
    /// Indices of the steps this one waits for.
    pub dependencies: Vec<usize>,
    pub dependents: Vec<usize>,
    pub wave: usize,
    pub cost: CostClass,
    /// Some later step depends on this one.
    pub blocking: bool,
    pub priority: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Steps in execution order.
    pub steps: Vec<PlannedStep>,
    /// Declaration indices grouped into waves that may run together.
    pub waves: Vec<Vec<usize>>,
}

impl Plan {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Declaration indices in execution order.
    pub fn order(&self) -> Vec<usize> {
        self.steps.iter().map(|s| s.index).collect()
    }
}

/// Orders `steps` with Kahn's algorithm; among ready steps the earliest
/// declared goes first. Dependencies outside `steps` are ignored here;
/// validation reports them.
pub fn plan(steps: &[Step]) -> Result<Plan, WorkflowError> {
    let n = steps.len();
    let position: HashMap<&str, usize> = steps.iter().enumerate().map(|(i, s)| (s.id.as_str(), i)).collect();

    let mut dependencies: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, step) in steps.iter().enumerate() {
        for dep in &step.depends_on {
            if let Some(&d) = position.get(dep.as_str()) {
                if !dependencies[i].contains(&d) {
                    dependencies[i].push(d);
                    dependents[d].push(i);
                }
            }
        }
    }

    let mut in_degree: Vec<usize> = dependencies.iter().map(Vec::len).collect();
    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(i) = ready.pop_first() {
        order.push(i);
        for &d in &dependents[i] {
            in_degree[d] -= 1;
            if in_degree[d] == 0 {
                ready.insert(d);
            }
        }
    }

    if order.len() != n {
        let remaining = (0..n).filter(|&i| in_degree[i] > 0).map(|i| steps[i].id.clone()).collect();
        return Err(WorkflowError::Cycle { remaining });
    }

    // Greedy waves over the topological order.
    let mut wave_of = vec![0usize; n];
    let mut waves: Vec<Vec<usize>> = Vec::new();
    let mut current: Vec<usize> = Vec::new();
    for &i in &order {
        if dependencies[i].iter().any(|d| current.contains(d)) {
            waves.push(std::mem::take(&mut current));
        }
        wave_of[i] = waves.len();
        current.push(i);
    }
    if !current.is_empty() {
        waves.push(current);
    }

    let planned = order
        .iter()
        .map(|&i| PlannedStep {
            index: i,
            id: steps[i].id.clone(),
            kind: steps[i].kind,
            dependencies: dependencies[i].clone(),
            dependents: dependents[i].clone(),
            wave: wave_of[i],
            cost: CostClass::of(steps[i].kind),
            blocking: !dependents[i].is_empty(),
            priority: (n - i) as i64 + dependents[i].len() as i64,
        })
        .collect();

    Ok(Plan { steps: planned, waves })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ErrorPolicy;
    use serde_json::Map;

    fn step(id: &str, kind: StepKind, deps: &[&str]) -> Step {
        Step {
            id: id.to_string(),
            name: id.to_string(),
            kind,
            config: Map::new(),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            input_mapping: Vec::new(),
            output_mapping: Vec::new(),
            error_policy: ErrorPolicy::default(),
            timeout_ms: None,
            index: 0,
            pipeline: "p".to_string(),
        }
    }

    #[test]
    fn ties_break_by_declaration_order() {
        let steps = vec![
            step("c", StepKind::Cli, &["a"]),
            step("a", StepKind::Sparql, &[]),
            step("b", StepKind::Http, &[]),
        ];
        let plan = plan(&steps).unwrap();
        assert_eq!(plan.order(), vec![1, 2, 0]);
        assert_eq!(plan.waves, vec![vec![1, 2], vec![0]]);
        assert!(plan.steps[0].blocking);
        assert_eq!(plan.steps[0].cost, CostClass::Low);
        assert_eq!(plan.steps[1].cost, CostClass::High);
    }

    #[test]
    fn cycle_lists_remaining() {
        let steps = vec![
            step("a", StepKind::Cli, &["b"]),
            step("b", StepKind::Cli, &["a"]),
            step("c", StepKind::Cli, &[]),
        ];
        match plan(&steps) {
            Err(WorkflowError::Cycle { remaining }) => assert_eq!(remaining, vec!["a", "b"]),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn priority_counts_dependents() {
        let steps = vec![
            step("a", StepKind::Sparql, &[]),
            step("b", StepKind::Sparql, &["a"]),
            step("c", StepKind::Sparql, &["a"]),
        ];
        let plan = plan(&steps).unwrap();
        assert_eq!(plan.steps[0].priority, 3 + 2);
        assert_eq!(plan.steps[1].priority, 2);
        assert!(!plan.steps[2].blocking);
    }

    #[test]
    fn empty_plan() {
        let plan = plan(&[]).unwrap();
        assert!(plan.is_empty());
        assert!(plan.waves.is_empty());
    }
}
