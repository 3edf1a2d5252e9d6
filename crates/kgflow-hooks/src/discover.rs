//! Reads hooks and their predicates out of the store.

use crate::error::HookError;
use crate::model::{Comparator, Constraint, Hook, Predicate, ThresholdTest};
use kgflow_core::vocab::{kgf, rdf};
use kgflow_store::{QuadStore, Term};
use kgflow_workflow::graph::{first_object, has_type, members, node_id, objects, subjects_of_type};
use tracing::{debug, warn};

fn text(store: &QuadStore, node: &Term, predicate: &str) -> Option<String> {
    first_object(store, node, predicate).map(|t| t.lexical().to_string())
}

fn number(store: &QuadStore, node: &Term, predicate: &str) -> Option<f64> {
    first_object(store, node, predicate).and_then(|t| match &t {
        Term::Literal(lit) => lit.as_f64().or_else(|| lit.lexical().trim().parse().ok()),
        _ => None,
    })
}

fn count(store: &QuadStore, node: &Term, predicate: &str) -> Option<usize> {
    number(store, node, predicate).map(|n| n.max(0.0) as usize)
}

/// SPARQL body of a predicate: `kgf:query`, or the deprecated `kgf:text`.
fn query(store: &QuadStore, hook: &str, node: &Term) -> Result<String, HookError> {
    if let Some(q) = text(store, node, kgf::QUERY) {
        return Ok(q);
    }
    if let Some(q) = text(store, node, kgf::TEXT) {
        warn!(hook, "kgf:text on a predicate is deprecated, use kgf:query");
        return Ok(q);
    }
    Err(HookError::malformed(hook, "predicate has no kgf:query"))
}

fn constraint(store: &QuadStore, hook: &str, node: &Term) -> Result<Constraint, HookError> {
    let path = first_object(store, node, kgf::ON_PATH)
        .and_then(|t| t.as_iri().map(str::to_string))
        .ok_or_else(|| HookError::malformed(hook, format!("constraint {} has no kgf:onPath", node_id(node))))?;
    let allowed = members(store, node, kgf::IN)
        .map_err(|e| HookError::malformed(hook, e.to_string()))?
        .iter()
        .map(|t| t.to_string())
        .collect();
    Ok(Constraint {
        target_class: first_object(store, node, kgf::TARGET_CLASS).map(|t| node_id(&t)),
        focus_node: first_object(store, node, kgf::FOCUS_NODE).map(|t| node_id(&t)),
        path,
        min_count: count(store, node, kgf::MIN_COUNT),
        max_count: count(store, node, kgf::MAX_COUNT),
        has_value: first_object(store, node, kgf::HAS_VALUE).map(|t| t.to_string()),
        datatype: first_object(store, node, kgf::DATATYPE).map(|t| node_id(&t)),
        allowed,
    })
}

fn predicate(store: &QuadStore, hook: &str, node: &Term) -> Result<Predicate, HookError> {
    if has_type(store, node, kgf::ASK) {
        return Ok(Predicate::Ask { query: query(store, hook, node)? });
    }
    if has_type(store, node, kgf::THRESHOLD) {
        let query = query(store, hook, node)?;
        let test = match number(store, node, kgf::THRESHOLD_VALUE) {
            Some(value) => {
                let operator = match text(store, node, kgf::OPERATOR) {
                    Some(op) => Comparator::parse(&op)
                        .ok_or_else(|| HookError::malformed(hook, format!("unknown operator {op:?}")))?,
                    None => Comparator::Ge,
                };
                ThresholdTest::Compare { operator, value }
            }
            None => {
                let (min, max) = (number(store, node, kgf::MIN), number(store, node, kgf::MAX));
                if min.is_none() && max.is_none() {
                    return Err(HookError::malformed(hook, "threshold needs kgf:threshold or kgf:min/kgf:max"));
                }
                ThresholdTest::Range { min, max }
            }
        };
        return Ok(Predicate::Threshold { query, test });
    }
    if has_type(store, node, kgf::RESULT_DELTA) {
        return Ok(Predicate::ResultDelta { query: query(store, hook, node)? });
    }
    if has_type(store, node, kgf::SHAPE_CONFORMANCE) {
        let nodes = members(store, node, kgf::CONSTRAINT).map_err(|e| HookError::malformed(hook, e.to_string()))?;
        if nodes.is_empty() {
            return Err(HookError::malformed(hook, "shape conformance needs at least one kgf:constraint"));
        }
        let constraints = nodes.iter().map(|c| constraint(store, hook, c)).collect::<Result<Vec<_>, _>>()?;
        return Ok(Predicate::ShapeConformance { constraints });
    }
    let types: Vec<String> = objects(store, node, rdf::TYPE).iter().map(node_id).collect();
    Err(HookError::malformed(hook, format!("unknown predicate type {types:?}")))
}

/// One hook by IRI. Hooks without `kgf:hasPredicate` are `Ok(None)`: they
/// run only when triggered explicitly.
pub fn read_hook(store: &QuadStore, id: &str) -> Result<Option<Hook>, HookError> {
    let node = kgflow_workflow::graph::node_term(id);
    let Some(predicate_node) = first_object(store, &node, kgf::HAS_PREDICATE) else {
        return Ok(None);
    };
    let predicate = predicate(store, id, &predicate_node)?;
    let pipelines = members(store, &node, kgf::ORDERED_PIPELINES)
        .map_err(|e| HookError::malformed(id, e.to_string()))?
        .iter()
        .map(node_id)
        .collect();
    Ok(Some(Hook { id: id.to_string(), title: text(store, &node, kgf::TITLE), predicate, pipelines }))
}

/// All hooks with a predicate, in insertion order. Malformed hooks are
/// skipped with a warning.
pub fn discover(store: &QuadStore) -> Vec<Hook> {
    let mut hooks = Vec::new();
    for node in subjects_of_type(store, kgf::HOOK) {
        let id = node_id(&node);
        match read_hook(store, &id) {
            Ok(Some(hook)) => hooks.push(hook),
            Ok(None) => debug!(hook = %id, "hook has no predicate"),
            Err(e) => warn!(hook = %id, error = %e, "skipping hook"),
        }
    }
    hooks
}
