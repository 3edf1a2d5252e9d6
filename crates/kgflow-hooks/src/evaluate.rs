//! Predicate evaluation. Pure over the store: no state, no side effects.

use crate::error::HookError;
use crate::model::{Constraint, Predicate};
use kgflow_durable::sha256_hex;
use kgflow_store::{QuadStore, QueryResult, Term};
use kgflow_workflow::graph::{node_term, subjects_of_type};
use serde_json::{json, Value};

/// Outcome of checking a predicate once.
#[derive(Clone, Debug, PartialEq)]
pub struct Check {
    pub holds: bool,
    /// Row-set fingerprint, for result-delta predicates.
    pub fingerprint: Option<String>,
    pub evidence: Value,
}

/// Rows or quads of a result, as a count.
fn result_count(result: &QueryResult) -> usize {
    match result {
        QueryResult::Ask(b) => usize::from(*b),
        other => other.len(),
    }
}

/// SHA-256 over the result in canonical form. Variables are taken in name
/// order and rows sorted by their terms in store order (IRIs before blank
/// nodes before literals; literals by datatype, lexical form, then language
/// tag, unbound first). Each row is then rendered as `var=term` pairs with
/// full N-Triples terms, so datatypes count.
pub fn fingerprint(result: &QueryResult) -> String {
    let lines: Vec<String> = match result {
        QueryResult::Select { vars, rows } => {
            let mut order: Vec<usize> = (0..vars.len()).collect();
            order.sort_by(|a, b| vars[*a].cmp(&vars[*b]));
            let mut keyed: Vec<Vec<Option<&Term>>> = rows
                .iter()
                .map(|row| order.iter().map(|&i| row.get(i).and_then(Option::as_ref)).collect())
                .collect();
            keyed.sort();
            keyed
                .iter()
                .map(|row| {
                    order
                        .iter()
                        .zip(row)
                        .map(|(&i, term)| format!("{}={}", vars[i], term.map(ToString::to_string).unwrap_or_default()))
                        .collect::<Vec<_>>()
                        .join("\t")
                })
                .collect()
        }
        QueryResult::Ask(b) => vec![format!("ask={b}")],
        QueryResult::Construct(quads) | QueryResult::Describe(quads) => {
            let mut sorted: Vec<_> = quads.iter().collect();
            sorted.sort();
            sorted.iter().map(|q| format!("{} {} {} {:?}", q.subject, q.predicate, q.object, q.graph)).collect()
        }
        QueryResult::Update(summary) => vec![format!("update={}/{}", summary.inserted, summary.deleted)],
    };
    sha256_hex(lines.join("\n").as_bytes())
}

fn run_query(store: &QuadStore, hook: &str, query: &str) -> Result<QueryResult, HookError> {
    store.query(query).map_err(|source| HookError::Query { hook: hook.to_string(), source })
}

fn focus_nodes(store: &QuadStore, constraint: &Constraint) -> Vec<Term> {
    if let Some(focus) = &constraint.focus_node {
        return vec![node_term(focus)];
    }
    match &constraint.target_class {
        Some(class) => subjects_of_type(store, class),
        None => Vec::new(),
    }
}

/// Violations of one constraint, one message per failing focus node check.
fn violations(store: &QuadStore, constraint: &Constraint) -> (usize, Vec<String>) {
    let path = Term::iri(&constraint.path);
    let nodes = focus_nodes(store, constraint);
    let mut out = Vec::new();
    for node in &nodes {
        let values: Vec<Term> = store
            .match_pattern(Some(node), Some(&path), None, None)
            .map(|q| q.object.clone())
            .collect();
        if let Some(min) = constraint.min_count {
            if values.len() < min {
                out.push(format!("{node} has {} values for <{}>, fewer than {min}", values.len(), constraint.path));
            }
        }
        if let Some(max) = constraint.max_count {
            if values.len() > max {
                out.push(format!("{node} has {} values for <{}>, more than {max}", values.len(), constraint.path));
            }
        }
        if let Some(required) = &constraint.has_value {
            if !values.iter().any(|v| &v.to_string() == required) {
                out.push(format!("{node} lacks {required} for <{}>", constraint.path));
            }
        }
        if let Some(datatype) = &constraint.datatype {
            let wrong = values.iter().filter(|v| v.as_literal().map(|l| l.datatype() != datatype).unwrap_or(true));
            for value in wrong {
                out.push(format!("{node} value {value} is not a <{datatype}>"));
            }
        }
        if !constraint.allowed.is_empty() {
            for value in values.iter().filter(|v| !constraint.allowed.contains(&v.to_string())) {
                out.push(format!("{node} value {value} is not an allowed value"));
            }
        }
    }
    (nodes.len(), out)
}

pub fn check(store: &QuadStore, hook: &str, predicate: &Predicate) -> Result<Check, HookError> {
    match predicate {
        Predicate::Ask { query } => {
            let result = run_query(store, hook, query)?;
            let holds = match &result {
                QueryResult::Ask(b) => *b,
                other => !other.is_empty(),
            };
            Ok(Check { holds, fingerprint: None, evidence: json!({ "kind": "ask", "holds": holds }) })
        }
        Predicate::Threshold { query, test } => {
            let result = run_query(store, hook, query)?;
            let count = result_count(&result);
            let holds = test.holds(count as f64);
            Ok(Check {
                holds,
                fingerprint: None,
                evidence: json!({ "kind": "threshold", "holds": holds, "rowCount": count, "test": test }),
            })
        }
        Predicate::ResultDelta { query } => {
            let result = run_query(store, hook, query)?;
            let fp = fingerprint(&result);
            Ok(Check {
                holds: true,
                evidence: json!({ "kind": "resultDelta", "fingerprint": fp, "rowCount": result_count(&result) }),
                fingerprint: Some(fp),
            })
        }
        Predicate::ShapeConformance { constraints } => {
            let mut focus = 0;
            let mut all = Vec::new();
            for constraint in constraints {
                let (nodes, v) = violations(store, constraint);
                focus += nodes;
                all.extend(v);
            }
            let holds = all.is_empty();
            Ok(Check {
                holds,
                fingerprint: None,
                evidence: json!({ "kind": "shapeConformance", "holds": holds, "focusNodes": focus, "violations": all }),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kgflow_store::{parse_turtle, TurtleOptions};

    fn store(body: &str) -> QuadStore {
        let text = format!("@prefix ex: <http://example.org/> .\n@prefix xsd: <http://www.w3.org/2001/XMLSchema#> .\n{body}");
        QuadStore::from_quads(parse_turtle(&text, &TurtleOptions::default()).unwrap().quads)
    }

    #[test]
    fn fingerprint_ignores_row_and_variable_order() {
        let s = store("ex:a ex:p 1 . ex:b ex:p 2 .");
        let one = s.query("SELECT ?s ?o WHERE { ?s ex:p ?o } ORDER BY ?s").unwrap();
        let two = s.query("SELECT ?o ?s WHERE { ?s ex:p ?o } ORDER BY DESC(?s)").unwrap();
        assert_eq!(fingerprint(&one), fingerprint(&two));
    }

    #[test]
    fn fingerprint_rows_follow_term_order() {
        // As strings the literal would sort first.
        let mixed = store("ex:a ex:p \"b\" . ex:a ex:p ex:z .");
        let q = "SELECT ?o WHERE { ?s ex:p ?o }";
        let expected = [
            "o=<http://example.org/z>".to_string(),
            format!("o={}", Term::Literal(kgflow_store::Literal::string("b"))),
        ]
        .join("\n");
        assert_eq!(fingerprint(&mixed.query(q).unwrap()), sha256_hex(expected.as_bytes()));
    }

    #[test]
    fn fingerprint_sees_datatypes() {
        let a = store("ex:a ex:p 1 .");
        let b = store("ex:a ex:p \"1\" .");
        let q = "SELECT ?o WHERE { ?s ex:p ?o }";
        assert_ne!(fingerprint(&a.query(q).unwrap()), fingerprint(&b.query(q).unwrap()));
    }

    #[test]
    fn shape_constraints() {
        let s = store(
            "ex:t1 a ex:Task ; ex:status \"open\" ; ex:size 3 .
             ex:t2 a ex:Task ; ex:status \"done\" ; ex:size \"big\" .",
        );
        let status = Constraint {
            target_class: Some("http://example.org/Task".into()),
            path: "http://example.org/status".into(),
            min_count: Some(1),
            max_count: Some(1),
            allowed: vec!["\"open\"".into(), "\"done\"".into()],
            ..Constraint::default()
        };
        let size = Constraint {
            target_class: Some("http://example.org/Task".into()),
            path: "http://example.org/size".into(),
            datatype: Some("http://www.w3.org/2001/XMLSchema#integer".into()),
            ..Constraint::default()
        };
        let ok = check(&s, "h", &Predicate::ShapeConformance { constraints: vec![status.clone()] }).unwrap();
        assert!(ok.holds);
        let bad = check(&s, "h", &Predicate::ShapeConformance { constraints: vec![status, size] }).unwrap();
        assert!(!bad.holds);
        assert_eq!(bad.evidence["violations"].as_array().unwrap().len(), 1);
    }
}
