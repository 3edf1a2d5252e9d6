//! JSON shaping of query results.
//!
//! IRIs are compacted through the prefixes in effect. Numeric and boolean
//! literals become JSON numbers and booleans; everything else is a string.

use super::QueryResult;
use crate::prefixes::PrefixMap;
use crate::term::{Quad, Term};
use kgflow_core::vocab::xsd;
use serde_json::{json, Map, Value};

pub fn term_to_json(term: &Term, prefixes: &PrefixMap) -> Value {
    match term {
        Term::Iri(iri) => Value::String(prefixes.compact_or_full(iri)),
        Term::BlankNode(label) => Value::String(format!("_:{label}")),
        Term::Literal(lit) => {
            if let Some(i) = lit.as_i64() {
                return json!(i);
            }
            if lit.is_numeric() {
                if let Some(n) = lit.as_f64().and_then(serde_json::Number::from_f64) {
                    return Value::Number(n);
                }
            }
            if lit.datatype() == xsd::BOOLEAN {
                if let Some(b) = lit.as_bool() {
                    return Value::Bool(b);
                }
            }
            Value::String(lit.lexical().to_string())
        }
    }
}

/// Rows as objects keyed by variable name; unbound variables are omitted.
pub fn rows_to_json(vars: &[String], rows: &[Vec<Option<Term>>], prefixes: &PrefixMap) -> Vec<Value> {
    rows.iter()
        .map(|row| {
            let mut object = Map::new();
            for (var, value) in vars.iter().zip(row) {
                if let Some(term) = value {
                    object.insert(var.clone(), term_to_json(term, prefixes));
                }
            }
            Value::Object(object)
        })
        .collect()
}

pub fn quads_to_json(quads: &[Quad], prefixes: &PrefixMap) -> Vec<Value> {
    quads
        .iter()
        .map(|q| {
            let mut object = Map::new();
            object.insert("subject".into(), term_to_json(&q.subject, prefixes));
            object.insert("predicate".into(), term_to_json(&q.predicate, prefixes));
            object.insert("object".into(), term_to_json(&q.object, prefixes));
            if let Some(graph) = q.graph.as_term() {
                object.insert("graph".into(), term_to_json(&graph, prefixes));
            }
            Value::Object(object)
        })
        .collect()
}

impl QueryResult {
    /// `{type, variables?, results?, count?, bool?, quads?}` as reported by
    /// the sparql step.
    pub fn to_json(&self, prefixes: &PrefixMap) -> Value {
        match self {
            QueryResult::Select { vars, rows } => json!({
                "type": "select",
                "variables": vars,
                "results": rows_to_json(vars, rows, prefixes),
                "count": rows.len(),
            }),
            QueryResult::Ask(b) => json!({ "type": "ask", "bool": b }),
            QueryResult::Construct(quads) | QueryResult::Describe(quads) => json!({
                "type": self.kind(),
                "quads": quads_to_json(quads, prefixes),
                "count": quads.len(),
            }),
            QueryResult::Update(summary) => json!({
                "type": "update",
                "ok": summary.ok,
                "inserted": summary.inserted,
                "deleted": summary.deleted,
            }),
        }
    }
}
