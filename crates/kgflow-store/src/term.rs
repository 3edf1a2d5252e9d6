//! RDF terms and quads.
//!
//! `Term` derives its ordering: IRIs sort before blank nodes, blank nodes
//! before literals, and literals compare by datatype, then lexical form,
//! then language tag. Fingerprints and group-by both rely on that order.

use kgflow_core::vocab::{rdf, xsd};
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Literal {
    datatype: Arc<str>,
    lexical: Arc<str>,
    language: Option<Arc<str>>,
}

impl Literal {
    pub fn string(value: impl AsRef<str>) -> Self {
        Self::typed(value, xsd::STRING)
    }

    pub fn typed(lexical: impl AsRef<str>, datatype: impl AsRef<str>) -> Self {
        Self {
            datatype: Arc::from(datatype.as_ref()),
            lexical: Arc::from(lexical.as_ref()),
            language: None,
        }
    }

    pub fn lang(lexical: impl AsRef<str>, language: impl AsRef<str>) -> Self {
        Self {
            datatype: Arc::from(rdf::LANG_STRING),
            lexical: Arc::from(lexical.as_ref()),
            language: Some(Arc::from(language.as_ref().to_ascii_lowercase().as_str())),
        }
    }

    pub fn integer(value: i64) -> Self {
        Self::typed(value.to_string(), xsd::INTEGER)
    }

    pub fn decimal(value: f64) -> Self {
        Self::typed(format_decimal(value), xsd::DECIMAL)
    }

    pub fn double(value: f64) -> Self {
        Self::typed(format_double(value), xsd::DOUBLE)
    }

    pub fn boolean(value: bool) -> Self {
        Self::typed(if value { "true" } else { "false" }, xsd::BOOLEAN)
    }

    pub fn lexical(&self) -> &str {
        &self.lexical
    }

    pub fn datatype(&self) -> &str {
        &self.datatype
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    /// Simple literal or `xsd:string`.
    pub fn is_plain_string(&self) -> bool {
        &*self.datatype == xsd::STRING
    }

    pub fn is_integer_type(&self) -> bool {
        is_integer_datatype(&self.datatype)
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer_type()
            || matches!(&*self.datatype, xsd::DECIMAL | xsd::DOUBLE | xsd::FLOAT)
    }

    pub fn as_i64(&self) -> Option<i64> {
        if self.is_integer_type() {
            self.lexical.trim().trim_start_matches('+').parse().ok()
        } else {
            None
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        if !self.is_numeric() {
            return None;
        }
        let text = self.lexical.trim();
        match text {
            "INF" | "+INF" => Some(f64::INFINITY),
            "-INF" => Some(f64::NEG_INFINITY),
            "NaN" => Some(f64::NAN),
            _ => text.trim_start_matches('+').parse().ok(),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        if &*self.datatype != xsd::BOOLEAN {
            return None;
        }
        match &*self.lexical {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        }
    }
}

pub fn is_integer_datatype(datatype: &str) -> bool {
    matches!(
        datatype,
        xsd::INTEGER
            | xsd::INT
            | xsd::LONG
            | xsd::SHORT
            | xsd::NON_NEGATIVE_INTEGER
            | xsd::POSITIVE_INTEGER
    )
}

/// Decimal lexical form: always carries a fractional part.
pub fn format_decimal(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

pub fn format_double(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "INF" } else { "-INF" }.to_string()
    } else {
        format!("{value:E}")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Term {
    Iri(Arc<str>),
    BlankNode(Arc<str>),
    Literal(Literal),
}

impl Term {
    pub fn iri(value: impl AsRef<str>) -> Self {
        Term::Iri(Arc::from(value.as_ref()))
    }

    pub fn blank(label: impl AsRef<str>) -> Self {
        Term::BlankNode(Arc::from(label.as_ref()))
    }

    pub fn string(value: impl AsRef<str>) -> Self {
        Term::Literal(Literal::string(value))
    }

    pub fn integer(value: i64) -> Self {
        Term::Literal(Literal::integer(value))
    }

    pub fn boolean(value: bool) -> Self {
        Term::Literal(Literal::boolean(value))
    }

    pub fn is_iri(&self) -> bool {
        matches!(self, Term::Iri(_))
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, Term::BlankNode(_))
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Term::Literal(_))
    }

    pub fn as_iri(&self) -> Option<&str> {
        match self {
            Term::Iri(iri) => Some(iri),
            _ => None,
        }
    }

    pub fn as_literal(&self) -> Option<&Literal> {
        match self {
            Term::Literal(lit) => Some(lit),
            _ => None,
        }
    }

    /// The "string value" of a term: IRI text, blank label, or lexical form.
    pub fn lexical(&self) -> &str {
        match self {
            Term::Iri(iri) => iri,
            Term::BlankNode(label) => label,
            Term::Literal(lit) => lit.lexical(),
        }
    }
}

impl From<Literal> for Term {
    fn from(lit: Literal) -> Self {
        Term::Literal(lit)
    }
}

/// N-Triples rendering.
impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Iri(iri) => write!(f, "<{iri}>"),
            Term::BlankNode(label) => write!(f, "_:{label}"),
            Term::Literal(lit) => {
                write!(f, "\"{}\"", escape_string(lit.lexical()))?;
                if let Some(lang) = lit.language() {
                    write!(f, "@{lang}")
                } else if lit.is_plain_string() {
                    Ok(())
                } else {
                    write!(f, "^^<{}>", lit.datatype())
                }
            }
        }
    }
}

pub fn escape_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum GraphName {
    #[default]
    Default,
    Named(Arc<str>),
}

impl GraphName {
    pub fn named(iri: impl AsRef<str>) -> Self {
        GraphName::Named(Arc::from(iri.as_ref()))
    }

    pub fn is_default(&self) -> bool {
        matches!(self, GraphName::Default)
    }

    pub fn as_term(&self) -> Option<Term> {
        match self {
            GraphName::Default => None,
            GraphName::Named(iri) => Some(Term::Iri(iri.clone())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Quad {
    pub subject: Term,
    pub predicate: Term,
    pub object: Term,
    pub graph: GraphName,
}

impl Quad {
    pub fn new(subject: Term, predicate: Term, object: Term) -> Self {
        Self { subject, predicate, object, graph: GraphName::Default }
    }

    pub fn in_graph(subject: Term, predicate: Term, object: Term, graph: GraphName) -> Self {
        Self { subject, predicate, object, graph }
    }

    /// Subjects are IRIs or blank nodes, predicates are IRIs.
    pub fn is_well_formed(&self) -> bool {
        !self.subject.is_literal() && self.predicate.is_iri()
    }
}

impl fmt::Display for Quad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.subject, self.predicate, self.object)?;
        if let GraphName::Named(g) = &self.graph {
            write!(f, " <{g}>")?;
        }
        write!(f, " .")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_puts_iris_first() {
        let mut terms = vec![
            Term::string("a"),
            Term::blank("b0"),
            Term::iri("http://example.org/z"),
        ];
        terms.sort();
        assert!(terms[0].is_iri());
        assert!(terms[1].is_blank());
        assert!(terms[2].is_literal());
    }

    #[test]
    fn literals_order_by_datatype_then_lexical() {
        let a = Literal::integer(10);
        let b = Literal::string("1");
        // xsd:integer < xsd:string by IRI
        assert!(a < b);
        assert!(Literal::string("a") < Literal::string("b"));
    }

    #[test]
    fn numeric_accessors() {
        assert_eq!(Literal::integer(-4).as_i64(), Some(-4));
        assert_eq!(Literal::decimal(2.0).lexical(), "2.0");
        assert_eq!(Literal::typed("1.5E0", xsd::DOUBLE).as_f64(), Some(1.5));
        assert_eq!(Literal::string("3").as_f64(), None);
        assert_eq!(Literal::boolean(true).as_bool(), Some(true));
    }

    #[test]
    fn display_is_ntriples() {
        let q = Quad::new(
            Term::iri("http://e/s"),
            Term::iri("http://e/p"),
            Term::Literal(Literal::lang("hi \"x\"", "EN")),
        );
        assert_eq!(q.to_string(), "<http://e/s> <http://e/p> \"hi \\\"x\\\"\"@en .");
    }
}
