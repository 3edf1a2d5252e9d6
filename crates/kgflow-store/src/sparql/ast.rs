//! Parsed form of the supported SPARQL subset.

use crate::prefixes::PrefixMap;
use crate::term::Term;

#[derive(Clone, Debug, PartialEq)]
pub enum TermPattern {
    Var(String),
    Term(Term),
}

impl TermPattern {
    pub fn as_var(&self) -> Option<&str> {
        match self {
            TermPattern::Var(v) => Some(v),
            TermPattern::Term(_) => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum PathExpr {
    Iri(Term),
    Inverse(Box<PathExpr>),
    Sequence(Vec<PathExpr>),
    Alternative(Vec<PathExpr>),
    ZeroOrMore(Box<PathExpr>),
    OneOrMore(Box<PathExpr>),
    ZeroOrOne(Box<PathExpr>),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Verb {
    Var(String),
    Path(PathExpr),
}

impl Verb {
    /// The predicate as a plain term pattern, when it is not a complex path.
    pub fn as_simple(&self) -> Option<TermPattern> {
        match self {
            Verb::Var(v) => Some(TermPattern::Var(v.clone())),
            Verb::Path(PathExpr::Iri(t)) => Some(TermPattern::Term(t.clone())),
            Verb::Path(_) => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TriplePattern {
    pub subject: TermPattern,
    pub verb: Verb,
    pub object: TermPattern,
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct GroupPattern {
    pub elements: Vec<Pattern>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Pattern {
    Triples(Vec<TriplePattern>),
    Filter(Expr),
    Optional(GroupPattern),
    Union(Vec<GroupPattern>),
    Minus(GroupPattern),
    Bind(Expr, String),
    Values(ValuesBlock),
    Group(GroupPattern),
    Graph(TermPattern, GroupPattern),
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct ValuesBlock {
    pub vars: Vec<String>,
    pub rows: Vec<Vec<Option<Term>>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Func {
    Regex,
    Str,
    Lang,
    LangMatches,
    Datatype,
    IsIri,
    IsBlank,
    IsLiteral,
    IsNumeric,
    Contains,
    StrStarts,
    StrEnds,
    LCase,
    UCase,
    StrLen,
    SubStr,
    Replace,
    Concat,
    If,
    Coalesce,
    Abs,
    Ceil,
    Floor,
    Round,
    SameTerm,
    Iri,
}

impl Func {
    pub fn from_name(name: &str) -> Option<Func> {
        Some(match name.to_ascii_uppercase().as_str() {
            "REGEX" => Func::Regex,
            "STR" => Func::Str,
            "LANG" => Func::Lang,
            "LANGMATCHES" => Func::LangMatches,
            "DATATYPE" => Func::Datatype,
            "ISIRI" | "ISURI" => Func::IsIri,
            "ISBLANK" => Func::IsBlank,
            "ISLITERAL" => Func::IsLiteral,
            "ISNUMERIC" => Func::IsNumeric,
            "CONTAINS" => Func::Contains,
            "STRSTARTS" => Func::StrStarts,
            "STRENDS" => Func::StrEnds,
            "LCASE" => Func::LCase,
            "UCASE" => Func::UCase,
            "STRLEN" => Func::StrLen,
            "SUBSTR" => Func::SubStr,
            "REPLACE" => Func::Replace,
            "CONCAT" => Func::Concat,
            "IF" => Func::If,
            "COALESCE" => Func::Coalesce,
            "ABS" => Func::Abs,
            "CEIL" => Func::Ceil,
            "FLOOR" => Func::Floor,
            "ROUND" => Func::Round,
            "SAMETERM" => Func::SameTerm,
            "IRI" | "URI" => Func::Iri,
            _ => return None,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Var(String),
    Const(Term),
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Cmp(CmpOp, Box<Expr>, Box<Expr>),
    Arith(ArithOp, Box<Expr>, Box<Expr>),
    In { expr: Box<Expr>, list: Vec<Expr>, negated: bool },
    Call(Func, Vec<Expr>),
    /// Cast target datatype IRI and its argument.
    Cast(String, Box<Expr>),
    Bound(String),
    Exists { pattern: GroupPattern, negated: bool },
    /// Placeholder for the n-th aggregate of the enclosing query.
    Aggregate(usize),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggFunc {
    Count,
    Sum,
    Min,
    Max,
    Avg,
    Sample,
    GroupConcat,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Aggregate {
    pub func: AggFunc,
    pub distinct: bool,
    /// `None` for `COUNT(*)`.
    pub expr: Option<Expr>,
    pub separator: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ProjectionItem {
    Var(String),
    Expr(Expr, String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Projection {
    Wildcard,
    Items(Vec<ProjectionItem>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct SelectClause {
    pub distinct: bool,
    pub reduced: bool,
    pub projection: Projection,
}

#[derive(Clone, Debug, PartialEq)]
pub enum GroupKey {
    Var(String),
    Expr(Expr, Option<String>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderKey {
    pub expr: Expr,
    pub descending: bool,
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct Modifiers {
    pub group_by: Vec<GroupKey>,
    pub having: Vec<Expr>,
    pub order_by: Vec<OrderKey>,
    pub limit: Option<usize>,
    pub offset: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub enum QueryForm {
    Select(SelectClause),
    Ask,
    Construct(Vec<TriplePattern>),
    /// Resources to describe; empty means `DESCRIBE *`.
    Describe(Vec<TermPattern>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    pub form: QueryForm,
    pub pattern: GroupPattern,
    pub modifiers: Modifiers,
    pub values: Option<ValuesBlock>,
    pub aggregates: Vec<Aggregate>,
    pub prefixes: PrefixMap,
}

impl Query {
    pub fn is_aggregated(&self) -> bool {
        !self.aggregates.is_empty() || !self.modifiers.group_by.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct QuadTemplate {
    pub triple: TriplePattern,
    pub graph: Option<TermPattern>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ClearTarget {
    Default,
    Named(Term),
    AllNamed,
    All,
}

#[derive(Clone, Debug, PartialEq)]
pub enum UpdateOp {
    InsertData(Vec<QuadTemplate>),
    DeleteData(Vec<QuadTemplate>),
    DeleteWhere(Vec<QuadTemplate>),
    Modify { delete: Vec<QuadTemplate>, insert: Vec<QuadTemplate>, pattern: GroupPattern },
    Clear { target: ClearTarget, silent: bool },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Update {
    pub ops: Vec<UpdateOp>,
    pub prefixes: PrefixMap,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Request {
    Query(Query),
    Update(Update),
}

impl Request {
    pub fn prefixes(&self) -> &PrefixMap {
        match self {
            Request::Query(q) => &q.prefixes,
            Request::Update(u) => &u.prefixes,
        }
    }

    pub fn is_update(&self) -> bool {
        matches!(self, Request::Update(_))
    }
}

/// Blank nodes in query patterns act as variables hidden from `SELECT *`.
pub const HIDDEN_VAR_PREFIX: &str = ".";

pub fn is_hidden_var(name: &str) -> bool {
    name.starts_with(HIDDEN_VAR_PREFIX)
}
