//! Read helpers over the quad store shared by workflow and hook
//! extraction.

use crate::error::WorkflowError;
use kgflow_core::vocab::rdf;
use kgflow_store::{QuadStore, Term};
use std::collections::HashSet;

pub fn objects(store: &QuadStore, subject: &Term, predicate: &str) -> Vec<Term> {
    let predicate = Term::iri(predicate);
    store
        .match_pattern(Some(subject), Some(&predicate), None, None)
        .map(|q| q.object.clone())
        .collect()
}

pub fn first_object(store: &QuadStore, subject: &Term, predicate: &str) -> Option<Term> {
    let predicate = Term::iri(predicate);
    store
        .match_pattern(Some(subject), Some(&predicate), None, None)
        .next()
        .map(|q| q.object.clone())
}

pub fn subjects_of_type(store: &QuadStore, class: &str) -> Vec<Term> {
    let (rdf_type, class) = (Term::iri(rdf::TYPE), Term::iri(class));
    let mut seen = HashSet::new();
    store
        .match_pattern(None, Some(&rdf_type), Some(&class), None)
        .filter(|q| seen.insert(q.subject.clone()))
        .map(|q| q.subject.clone())
        .collect()
}

pub fn has_type(store: &QuadStore, subject: &Term, class: &str) -> bool {
    store.has(subject, &Term::iri(rdf::TYPE), &Term::iri(class), None)
}

/// Stable identifier of a node: the IRI, or `_:label` for blank nodes.
pub fn node_id(term: &Term) -> String {
    match term {
        Term::BlankNode(label) => format!("_:{label}"),
        other => other.lexical().to_string(),
    }
}

pub fn is_list(store: &QuadStore, term: &Term) -> bool {
    match term {
        Term::Iri(iri) if &**iri == rdf::NIL => true,
        Term::Literal(_) => false,
        _ => first_object(store, term, rdf::FIRST).is_some(),
    }
}

/// Members of an RDF collection, in list order.
pub fn read_list(store: &QuadStore, head: &Term) -> Result<Vec<Term>, WorkflowError> {
    let nil = Term::iri(rdf::NIL);
    let mut members = Vec::new();
    let mut visited = HashSet::new();
    let mut node = head.clone();
    while node != nil {
        if !visited.insert(node.clone()) {
            return Err(WorkflowError::malformed(format!("RDF list at {} is cyclic", node_id(head))));
        }
        let first = first_object(store, &node, rdf::FIRST)
            .ok_or_else(|| WorkflowError::malformed(format!("list node {} has no rdf:first", node_id(&node))))?;
        members.push(first);
        node = first_object(store, &node, rdf::REST)
            .ok_or_else(|| WorkflowError::malformed(format!("list node {} has no rdf:rest", node_id(&node))))?;
    }
    Ok(members)
}

/// Values of a predicate given either as one RDF list or as repeated values.
pub fn members(store: &QuadStore, subject: &Term, predicate: &str) -> Result<Vec<Term>, WorkflowError> {
    let mut out = Vec::new();
    for object in objects(store, subject, predicate) {
        if is_list(store, &object) {
            out.extend(read_list(store, &object)?);
        } else {
            out.push(object);
        }
    }
    Ok(out)
}

/// Inverse of [`node_id`].
pub fn node_term(id: &str) -> Term {
    match id.strip_prefix("_:") {
        Some(label) => Term::blank(label),
        None => Term::iri(id),
    }
}
