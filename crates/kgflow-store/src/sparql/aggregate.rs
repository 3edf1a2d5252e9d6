//! Sort-based GROUP BY and aggregate functions.

use super::ast::*;
use super::eval::{Evaluator, QResult, Solution};
use super::expr::{aggregate_var, arith, order_cmp, Num};
use crate::error::QueryError;
use crate::term::{Literal, Term};
use std::collections::HashSet;

impl<'a> Evaluator<'a> {
    /// Collapses solutions into one per group, binding the group keys and
    /// one hidden variable per aggregate. Without GROUP BY everything is a
    /// single group, even when there are no solutions.
    pub(crate) fn group_solutions(&self, query: &Query, solutions: Vec<Solution>) -> QResult<Vec<Solution>> {
        let keys: Vec<(usize, &GroupKey)> = query
            .modifiers
            .group_by
            .iter()
            .enumerate()
            .map(|(i, key)| {
                let slot = match key {
                    GroupKey::Var(v) => self.slot(v),
                    GroupKey::Expr(_, Some(alias)) => self.slot(alias),
                    GroupKey::Expr(_, None) => self.slot(&format!("{HIDDEN_VAR_PREFIX}group{i}")),
                };
                (slot, key)
            })
            .collect();

        let groups: Vec<(Vec<Option<Term>>, Vec<Solution>)> = if keys.is_empty() {
            vec![(Vec::new(), solutions)]
        } else {
            let mut keyed: Vec<(Vec<Option<Term>>, Solution)> = solutions
                .into_iter()
                .map(|s| {
                    let key = keys
                        .iter()
                        .map(|(_, key)| match key {
                            GroupKey::Var(v) => self.lookup(&s, v),
                            GroupKey::Expr(e, _) => self.eval_expr(e, &s).ok(),
                        })
                        .collect();
                    (key, s)
                })
                .collect();
            keyed.sort_by(|(a, _), (b, _)| a.cmp(b));
            let mut groups: Vec<(Vec<Option<Term>>, Vec<Solution>)> = Vec::new();
            for (key, solution) in keyed {
                match groups.last_mut() {
                    Some((last, members)) if *last == key => members.push(solution),
                    _ => groups.push((key, vec![solution])),
                }
            }
            groups
        };

        let mut out = Vec::with_capacity(groups.len());
        for (key, members) in groups {
            let mut row = Solution::default();
            for ((slot, _), value) in keys.iter().zip(key) {
                if let Some(value) = value {
                    row.set(*slot, value);
                }
            }
            for (i, aggregate) in query.aggregates.iter().enumerate() {
                if let Some(value) = self.aggregate(aggregate, &members)? {
                    row.set(self.slot(&aggregate_var(i)), value);
                }
            }
            out.push(row);
        }
        Ok(out)
    }

    fn aggregate(&self, aggregate: &Aggregate, members: &[Solution]) -> QResult<Option<Term>> {
        let Some(expr) = &aggregate.expr else {
            let count = if aggregate.distinct {
                let mut seen = HashSet::new();
                members.iter().filter(|s| seen.insert(s.key().to_vec())).count()
            } else {
                members.len()
            };
            return Ok(Some(Term::integer(count as i64)));
        };

        let mut values: Vec<Term> = members
            .iter()
            .filter_map(|s| self.eval_expr(expr, s).ok())
            .collect();
        if aggregate.distinct {
            let mut seen = HashSet::new();
            values.retain(|v| seen.insert(v.clone()));
        }

        Ok(match aggregate.func {
            AggFunc::Count => Some(Term::integer(values.len() as i64)),
            AggFunc::Sum => Some(sum(&values)?.to_term()),
            AggFunc::Avg => {
                if values.is_empty() {
                    Some(Term::integer(0))
                } else {
                    let total = sum(&values)?;
                    let avg = arith(ArithOp::Div, total, Num::Int(values.len() as i64))
                        .map_err(|e| QueryError::type_mismatch(e.0))?;
                    Some(avg.to_term())
                }
            }
            AggFunc::Min => values.into_iter().min_by(|a, b| order_cmp(Some(a), Some(b))),
            AggFunc::Max => values.into_iter().max_by(|a, b| order_cmp(Some(a), Some(b))),
            AggFunc::Sample => values.into_iter().next(),
            AggFunc::GroupConcat => {
                let parts: Vec<&str> = values.iter().map(|v| v.lexical()).collect();
                Some(Term::Literal(Literal::string(parts.join(&aggregate.separator))))
            }
        })
    }
}

fn sum(values: &[Term]) -> QResult<Num> {
    let mut total = Num::Int(0);
    for value in values {
        let n = Num::of(value).ok_or_else(|| {
            QueryError::type_mismatch(format!("cannot sum non-numeric value {value}"))
        })?;
        total = arith(ArithOp::Add, total, n).map_err(|e| QueryError::type_mismatch(e.0))?;
    }
    Ok(total)
}
