//! SPARQL subset: parsing, evaluation, updates and JSON result shaping.

pub mod aggregate;
pub mod ast;
pub mod eval;
pub mod expr;
pub mod lexer;
pub mod parser;
pub mod path;
pub mod results;
pub mod update;

pub use ast::Request;
pub use parser::parse_request;

use crate::prefixes::PrefixMap;
use crate::term::{Quad, Term};
use lexer::Tok;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdateSummary {
    pub ok: bool,
    pub inserted: usize,
    pub deleted: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueryResult {
    Select { vars: Vec<String>, rows: Vec<Vec<Option<Term>>> },
    Ask(bool),
    Construct(Vec<Quad>),
    Describe(Vec<Quad>),
    Update(UpdateSummary),
}

impl QueryResult {
    pub fn kind(&self) -> &'static str {
        match self {
            QueryResult::Select { .. } => "select",
            QueryResult::Ask(_) => "ask",
            QueryResult::Construct(_) => "construct",
            QueryResult::Describe(_) => "describe",
            QueryResult::Update(_) => "update",
        }
    }

    /// Row count for SELECT, quad count for graph results.
    pub fn len(&self) -> usize {
        match self {
            QueryResult::Select { rows, .. } => rows.len(),
            QueryResult::Ask(b) => usize::from(*b),
            QueryResult::Construct(q) | QueryResult::Describe(q) => q.len(),
            QueryResult::Update(s) => s.inserted + s.deleted,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            QueryResult::Ask(b) => Some(*b),
            _ => None,
        }
    }
}

/// A result together with the prefixes that were in effect, so callers can
/// compact IRIs the same way the query spelled them.
#[derive(Clone, Debug)]
pub struct QueryResponse {
    pub result: QueryResult,
    pub prefixes: PrefixMap,
}

/// True when the request's prologue declares PREFIX or BASE.
pub fn declares_prefixes(text: &str) -> bool {
    match lexer::tokenize(text) {
        Ok(tokens) => tokens.first().is_some_and(|t| {
            matches!(&t.tok, Tok::Word(w) if w.eq_ignore_ascii_case("PREFIX") || w.eq_ignore_ascii_case("BASE"))
        }),
        Err(_) => false,
    }
}
