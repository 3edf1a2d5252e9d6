//! Extracts workflows from the graph.
//!
//! A workflow is rooted at a `kgf:Hook` (whose `kgf:orderedPipelines` name
//! the pipelines to run) or at a bare `kgf:Pipeline`. Each pipeline carries
//! its steps as an RDF list; steps are classified by `rdf:type` and their
//! configuration harvested according to that type.

use crate::error::WorkflowError;
use crate::graph::{
    first_object, has_type, is_list, members, node_id, node_term, objects, read_list, subjects_of_type,
};
use crate::model::{
    ErrorPolicy, Mapping, PipelineInfo, Step, StepKind, ValidationIssue, ValidationReport, Workflow,
    WorkflowSummary,
};
use crate::planner;
use kgflow_core::vocab::{kgf, local_name, rdf, xsd, KGF_NS};
use kgflow_store::{PrefixMap, QuadStore, Term};
use serde_json::{Map, Number, Value};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// JSON rendering of a config value. Blank nodes become objects keyed by
/// predicate local name.
fn term_to_value(store: &QuadStore, term: &Term, depth: usize) -> Value {
    match term {
        Term::Literal(lit) => {
            if lit.is_integer_type() {
                if let Some(n) = lit.as_i64() {
                    return Value::Number(n.into());
                }
            }
            if lit.datatype() == xsd::BOOLEAN {
                if let Some(b) = lit.as_bool() {
                    return Value::Bool(b);
                }
            }
            if lit.is_numeric() {
                if let Some(n) = lit.as_f64().and_then(Number::from_f64) {
                    return Value::Number(n);
                }
            }
            Value::String(lit.lexical().to_string())
        }
        Term::BlankNode(_) if depth < 8 && !is_list(store, term) => {
            let mut map = Map::new();
            for quad in store.match_pattern(Some(term), None, None, None) {
                let key = local_name(quad.predicate.lexical()).to_string();
                map.insert(key, term_to_value(store, &quad.object, depth + 1));
            }
            Value::Object(map)
        }
        other if is_list(store, other) && depth < 8 => match read_list(store, other) {
            Ok(items) => Value::Array(items.iter().map(|t| term_to_value(store, t, depth + 1)).collect()),
            Err(_) => Value::String(node_id(other)),
        },
        other => Value::String(node_id(other)),
    }
}

/// Literals holding a JSON object are decoded for keys that expect one.
fn config_value(store: &QuadStore, term: &Term, key: &str) -> Value {
    let value = term_to_value(store, term, 0);
    if matches!(key, "headers" | "env") {
        if let Value::String(text) = &value {
            if let Ok(parsed @ Value::Object(_)) = serde_json::from_str::<Value>(text) {
                return parsed;
            }
        }
    }
    value
}

// ============================================================================
// Workflow resolution
// ============================================================================

/// Hook IRIs first, then pipeline IRIs, each in insertion order.
fn roots(store: &QuadStore) -> Vec<(String, &'static str)> {
    let mut out: Vec<(String, &'static str)> = Vec::new();
    for hook in subjects_of_type(store, kgf::HOOK) {
        out.push((node_id(&hook), "hook"));
    }
    for pipeline in subjects_of_type(store, kgf::PIPELINE) {
        let id = node_id(&pipeline);
        if !out.iter().any(|(r, _)| *r == id) {
            out.push((id, "pipeline"));
        }
    }
    out
}

/// Resolves a workflow id given as a full IRI, a prefixed name, or a
/// local name that is unique among hooks and pipelines.
pub fn resolve_id(store: &QuadStore, id: &str) -> Result<String, WorkflowError> {
    let id = id.trim().trim_start_matches('<').trim_end_matches('>');
    let roots = roots(store);
    if roots.iter().any(|(r, _)| r == id) {
        return Ok(id.to_string());
    }
    if let Some(expanded) = PrefixMap::well_known().expand(id) {
        if roots.iter().any(|(r, _)| *r == expanded) {
            return Ok(expanded);
        }
    }
    let matches: Vec<&String> = roots
        .iter()
        .filter(|(r, _)| local_name(r) == id)
        .map(|(r, _)| r)
        .collect();
    match matches.as_slice() {
        [] => Err(WorkflowError::NotFound(id.to_string())),
        [only] => Ok((*only).clone()),
        many => Err(WorkflowError::Ambiguous {
            id: id.to_string(),
            candidates: many.iter().map(|s| s.to_string()).collect(),
        }),
    }
}

struct Extraction {
    workflow: Workflow,
    errors: Vec<WorkflowError>,
}

fn extract(store: &QuadStore, id: &str) -> Result<Extraction, WorkflowError> {
    let root_id = resolve_id(store, id)?;
    let root = node_term(&root_id);
    let mut errors = Vec::new();

    let title = first_object(store, &root, kgf::TITLE).map(|t| t.lexical().to_string());
    let (pipeline_terms, predicate) = if has_type(store, &root, kgf::HOOK) {
        let pipelines = members(store, &root, kgf::ORDERED_PIPELINES).unwrap_or_else(|e| {
            errors.push(e);
            Vec::new()
        });
        let predicate = first_object(store, &root, kgf::HAS_PREDICATE).map(|t| node_id(&t));
        (pipelines, predicate)
    } else {
        (vec![root.clone()], None)
    };

    let mut pipelines = Vec::new();
    let mut steps: Vec<Step> = Vec::new();
    let mut seen = HashSet::new();
    for pipeline in &pipeline_terms {
        let pipeline_id = node_id(pipeline);
        let declared = has_type(store, pipeline, kgf::PIPELINE)
            || first_object(store, pipeline, kgf::STEPS).is_some();
        if !declared {
            errors.push(WorkflowError::malformed(format!("pipeline {pipeline_id} is not declared")));
            continue;
        }
        let step_terms = members(store, pipeline, kgf::STEPS).unwrap_or_else(|e| {
            errors.push(e);
            Vec::new()
        });
        let mut info = PipelineInfo { id: pipeline_id.clone(), steps: Vec::new() };
        for term in step_terms {
            let step_id = node_id(&term);
            info.steps.push(step_id.clone());
            if !seen.insert(step_id.clone()) {
                errors.push(WorkflowError::DuplicateStep(step_id));
                continue;
            }
            if let Some(step) = read_step(store, &term, steps.len(), &pipeline_id, &mut errors) {
                steps.push(step);
            }
        }
        pipelines.push(info);
    }

    // Pipelines run one after another, so a step may wait on its own
    // pipeline or an earlier one, never a later one.
    let stage: HashMap<&str, usize> = pipelines.iter().enumerate().map(|(i, p)| (p.id.as_str(), i)).collect();
    let owner: HashMap<&str, usize> =
        steps.iter().map(|s| (s.id.as_str(), stage.get(s.pipeline.as_str()).copied().unwrap_or(0))).collect();
    for step in &steps {
        for dependency in &step.depends_on {
            match owner.get(dependency.as_str()) {
                None => errors.push(WorkflowError::DanglingDependency {
                    step_id: step.id.clone(),
                    dependency: dependency.clone(),
                }),
                Some(&at) if at > owner.get(step.id.as_str()).copied().unwrap_or(0) => {
                    errors.push(WorkflowError::ForwardDependency {
                        step_id: step.id.clone(),
                        dependency: dependency.clone(),
                    })
                }
                Some(_) => {}
            }
        }
    }

    debug!(workflow = %root_id, steps = steps.len(), errors = errors.len(), "workflow extracted");
    Ok(Extraction {
        workflow: Workflow { id: root_id, title, predicate, pipelines, steps },
        errors,
    })
}

// ============================================================================
// Steps
// ============================================================================

fn config_keys(kind: StepKind) -> &'static [&'static str] {
    match kind {
        StepKind::Sparql => &["query", "path"],
        StepKind::Template => &["template", "templatePath", "outputPath"],
        StepKind::File => &["operation", "filePath", "content", "sourcePath", "targetPath"],
        StepKind::Http => &["url", "method", "headers", "body"],
        StepKind::Cli => &["command", "cwd", "env"],
        StepKind::Output => &["template", "templatePath", "outputPath", "format"],
    }
}

/// Required keys absent from a step's config.
fn missing_config(kind: StepKind, step: &Step) -> Vec<String> {
    let need = |keys: &[&str]| -> Vec<String> {
        keys.iter().filter(|k| !step.has_config(k)).map(|k| k.to_string()).collect()
    };
    let either = |a: &str, b: &str| -> Vec<String> {
        if step.has_config(a) || step.has_config(b) {
            Vec::new()
        } else {
            vec![a.to_string()]
        }
    };
    match kind {
        StepKind::Sparql => either("query", "path"),
        StepKind::Template => either("template", "templatePath"),
        StepKind::File => match step.config_str("operation") {
            Some("read" | "write" | "delete") => need(&["filePath"]),
            Some("copy" | "move") => need(&["sourcePath", "targetPath"]),
            _ => vec!["operation".to_string()],
        },
        StepKind::Http => need(&["url", "method"]),
        StepKind::Cli => need(&["command"]),
        StepKind::Output => {
            let mut missing = either("template", "templatePath");
            missing.extend(need(&["outputPath"]));
            missing
        }
    }
}

fn classify(store: &QuadStore, term: &Term) -> Result<StepKind, WorkflowError> {
    let types = objects(store, term, rdf::TYPE);
    if let Some(kind) = types.iter().filter_map(|t| t.as_iri()).find_map(StepKind::from_type_iri) {
        return Ok(kind);
    }
    let type_iri = match types.first() {
        Some(t) => node_id(t),
        None if store.match_pattern(Some(term), None, None, None).next().is_none() => "(undeclared)".to_string(),
        None => "(none)".to_string(),
    };
    Err(WorkflowError::UnknownType { step_id: node_id(term), type_iri })
}

fn read_mappings(store: &QuadStore, term: &Term, predicate: &str) -> Result<Vec<Mapping>, WorkflowError> {
    let step_id = node_id(term);
    let mut out = Vec::new();
    for object in objects(store, term, predicate) {
        match &object {
            Term::Literal(lit) => {
                let parsed: Map<String, Value> = serde_json::from_str(lit.lexical()).map_err(|e| {
                    WorkflowError::malformed(format!("{step_id}: {} is not a JSON object: {e}", local_name(predicate)))
                })?;
                for (from, to) in parsed {
                    let to = match to {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    out.push(Mapping { from, to });
                }
            }
            node => {
                let from = first_object(store, node, kgf::FROM);
                let to = first_object(store, node, kgf::TO);
                match (from, to) {
                    (Some(from), Some(to)) => out.push(Mapping {
                        from: from.lexical().to_string(),
                        to: to.lexical().to_string(),
                    }),
                    _ => {
                        return Err(WorkflowError::malformed(format!(
                            "{step_id}: {} entry needs kgf:from and kgf:to",
                            local_name(predicate)
                        )))
                    }
                }
            }
        }
    }
    Ok(out)
}

fn integer(store: &QuadStore, term: &Term, predicate: &str) -> Option<i64> {
    let object = first_object(store, term, predicate)?;
    let lit = object.as_literal()?;
    lit.as_i64().or_else(|| lit.lexical().trim().parse().ok())
}

fn read_step(
    store: &QuadStore,
    term: &Term,
    index: usize,
    pipeline: &str,
    errors: &mut Vec<WorkflowError>,
) -> Option<Step> {
    let id = node_id(term);
    let kind = match classify(store, term) {
        Ok(kind) => kind,
        Err(e) => {
            errors.push(e);
            return None;
        }
    };

    let mut config = Map::new();
    for key in config_keys(kind) {
        if let Some(object) = first_object(store, term, &format!("{KGF_NS}{key}")) {
            config.insert(key.to_string(), config_value(store, &object, key));
        }
    }
    if kind == StepKind::Sparql && !config.contains_key("query") {
        if let Some(text) = first_object(store, term, kgf::TEXT) {
            warn!(step = %id, "kgf:text is deprecated for SPARQL bodies; use kgf:query");
            config.insert("query".to_string(), Value::String(text.lexical().to_string()));
        }
    }

    let mut mapping = |predicate: &str| match read_mappings(store, term, predicate) {
        Ok(m) => m,
        Err(e) => {
            errors.push(e);
            Vec::new()
        }
    };
    let input_mapping = mapping(kgf::INPUT_MAPPING);
    let output_mapping = mapping(kgf::OUTPUT_MAPPING);

    let depends_on = match members(store, term, kgf::DEPENDS_ON) {
        Ok(deps) => deps.iter().map(node_id).collect(),
        Err(e) => {
            errors.push(e);
            Vec::new()
        }
    };

    let error_policy = ErrorPolicy {
        retries: integer(store, term, kgf::RETRY).map(|n| n.max(0) as u32).unwrap_or(0),
        backoff_ms: integer(store, term, kgf::BACKOFF).map(|n| n.max(0) as u64).unwrap_or(0),
        continue_on_error: first_object(store, term, kgf::CONTINUE_ON_ERROR)
            .and_then(|t| t.as_literal().and_then(|l| l.as_bool()))
            .unwrap_or(false),
    };

    let step = Step {
        name: local_name(&id).to_string(),
        id,
        kind,
        config,
        depends_on,
        input_mapping,
        output_mapping,
        error_policy,
        timeout_ms: integer(store, term, kgf::TIMEOUT).map(|n| n.max(0) as u64),
        index,
        pipeline: pipeline.to_string(),
    };

    let missing = missing_config(kind, &step);
    if !missing.is_empty() {
        errors.push(WorkflowError::config(step.id.clone(), missing));
    }
    Some(step)
}

// ============================================================================
// Public operations
// ============================================================================

/// Extracts the workflow `id`. Any structural problem is an error; use
/// [`validate`] to collect all of them.
pub fn parse(store: &QuadStore, id: &str) -> Result<Workflow, WorkflowError> {
    let extraction = extract(store, id)?;
    match extraction.errors.into_iter().next() {
        Some(err) => Err(err),
        None => Ok(extraction.workflow),
    }
}

/// Every hook and pipeline in the store.
pub fn list(store: &QuadStore) -> Vec<WorkflowSummary> {
    roots(store)
        .into_iter()
        .map(|(id, kind)| {
            let (title, pipelines, steps) = match extract(store, &id) {
                Ok(x) => (x.workflow.title, x.workflow.pipelines.len(), x.workflow.steps.len()),
                Err(_) => (None, 0, 0),
            };
            WorkflowSummary { id, title, kind: kind.to_string(), pipelines, steps }
        })
        .collect()
}

/// Collects every structural problem of the workflow, including cycles.
/// Only an unresolvable id is an `Err`.
pub fn validate(store: &QuadStore, id: &str) -> Result<ValidationReport, WorkflowError> {
    let extraction = extract(store, id)?;
    let mut errors = extraction.errors;
    if let Err(cycle) = planner::plan(&extraction.workflow.steps) {
        errors.push(cycle);
    }
    Ok(ValidationReport {
        workflow_id: extraction.workflow.id,
        valid: errors.is_empty(),
        errors: errors.iter().map(ValidationIssue::from).collect(),
    })
}
