//! SPARQL Update execution.

use super::ast::*;
use super::eval::{Evaluator, Solution};
use super::{QueryResult, UpdateSummary};
use crate::error::QueryError;
use crate::store::QuadStore;
use crate::term::{GraphName, Quad, Term};
use std::collections::HashSet;
use tracing::debug;

pub fn apply_update(store: &mut QuadStore, update: &Update) -> Result<QueryResult, QueryError> {
    let mut summary = UpdateSummary { ok: true, inserted: 0, deleted: 0 };
    for op in &update.ops {
        let (remove, add) = plan_op(store, op)?;
        let before = store.size();
        let removed_now: Vec<Quad> = remove.into_iter().filter(|q| store.contains(q)).collect();
        let added_now: Vec<Quad> = add.into_iter().filter(|q| !store.contains(q) || removed_now.contains(q)).collect();
        store.apply(&removed_now, added_now.clone());
        summary.deleted += removed_now.len();
        summary.inserted += store.size() + removed_now.len() - before;
        debug!(removed = removed_now.len(), added = added_now.len(), "update applied");
    }
    Ok(QueryResult::Update(summary))
}

/// Computes removals and additions for one operation against the store as
/// it stands before the operation.
fn plan_op(store: &mut QuadStore, op: &UpdateOp) -> Result<(Vec<Quad>, Vec<Quad>), QueryError> {
    match op {
        UpdateOp::InsertData(templates) => {
            let quads = ground(store, templates)?;
            Ok((Vec::new(), quads))
        }
        UpdateOp::DeleteData(templates) => {
            let quads = ground(store, templates)?;
            Ok((quads, Vec::new()))
        }
        UpdateOp::DeleteWhere(templates) => {
            let pattern = templates_as_pattern(templates);
            let solutions = {
                let evaluator = Evaluator::new(store);
                let solutions = evaluator.eval_group(&pattern, vec![Solution::default()])?;
                instantiate_all(&evaluator, templates, &solutions, None)
            };
            Ok((solutions, Vec::new()))
        }
        UpdateOp::Modify { delete, insert, pattern } => {
            let salt = store.fresh_blank("u");
            let (remove, add) = {
                let evaluator = Evaluator::new(store);
                let solutions = evaluator.eval_group(pattern, vec![Solution::default()])?;
                (
                    instantiate_all(&evaluator, delete, &solutions, None),
                    instantiate_all(&evaluator, insert, &solutions, Some(salt.lexical())),
                )
            };
            Ok((remove, add))
        }
        UpdateOp::Clear { target, .. } => {
            let quads = store
                .iter()
                .filter(|q| match target {
                    ClearTarget::Default => q.graph.is_default(),
                    ClearTarget::Named(Term::Iri(iri)) => q.graph == GraphName::Named(iri.clone()),
                    ClearTarget::Named(_) => false,
                    ClearTarget::AllNamed => !q.graph.is_default(),
                    ClearTarget::All => true,
                })
                .cloned()
                .collect();
            Ok((quads, Vec::new()))
        }
    }
}

/// Ground quads of a DATA block. Blank node labels are scoped to this
/// update so repeated inserts create distinct nodes.
fn ground(store: &mut QuadStore, templates: &[QuadTemplate]) -> Result<Vec<Quad>, QueryError> {
    let valid = templates.iter().all(|t| {
        !matches!(&t.triple.subject, TermPattern::Term(Term::Literal(_)))
            && matches!(t.triple.verb.as_simple(), Some(TermPattern::Term(Term::Iri(_))))
    });
    if !valid {
        return Err(QueryError::syntax("DATA block contains an invalid triple"));
    }
    let salt = store.fresh_blank("d");
    let evaluator = Evaluator::new(store);
    Ok(instantiate_all(&evaluator, templates, &[Solution::default()], Some(salt.lexical())))
}

fn templates_as_pattern(templates: &[QuadTemplate]) -> GroupPattern {
    let mut elements = Vec::new();
    for template in templates {
        let triple = Pattern::Triples(vec![template.triple.clone()]);
        match &template.graph {
            Some(graph) => elements.push(Pattern::Graph(graph.clone(), GroupPattern { elements: vec![triple] })),
            None => elements.push(triple),
        }
    }
    GroupPattern { elements }
}

fn instantiate_all(
    evaluator: &Evaluator<'_>,
    templates: &[QuadTemplate],
    solutions: &[Solution],
    blank_salt: Option<&str>,
) -> Vec<Quad> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    for (n, solution) in solutions.iter().enumerate() {
        for template in templates {
            let Some(predicate) = template.triple.verb.as_simple() else {
                continue;
            };
            let term = |pattern: &TermPattern| match (pattern, blank_salt) {
                (TermPattern::Term(Term::BlankNode(label)), Some(salt)) => {
                    Some(Term::blank(format!("{label}_{salt}_{n}")))
                }
                _ => evaluator.instantiate(pattern, solution, n),
            };
            let graph = match &template.graph {
                None => Some(GraphName::Default),
                Some(pattern) => match term(pattern) {
                    Some(Term::Iri(iri)) => Some(GraphName::Named(iri)),
                    _ => None,
                },
            };
            if let (Some(s), Some(p), Some(o), Some(g)) =
                (term(&template.triple.subject), term(&predicate), term(&template.triple.object), graph)
            {
                let quad = Quad::in_graph(s, p, o, g);
                if quad.is_well_formed() && seen.insert(quad.clone()) {
                    out.push(quad);
                }
            }
        }
    }
    out
}
