//! Turtle reading and writing.

mod parser;
mod writer;

pub use parser::parse_turtle;
pub use writer::serialize_turtle;

use crate::prefixes::PrefixMap;
use crate::term::Quad;

#[derive(Clone, Debug, Default)]
pub struct TurtleOptions {
    /// Base IRI for relative references before any `@base`.
    pub base: Option<String>,
    /// Prepended to every blank node label, both labelled and generated.
    pub blank_prefix: Option<String>,
}

impl TurtleOptions {
    pub fn with_base(base: impl Into<String>) -> Self {
        Self { base: Some(base.into()), blank_prefix: None }
    }
}

/// Quads in document order plus the directives seen along the way.
#[derive(Clone, Debug, Default)]
pub struct ParsedTurtle {
    pub quads: Vec<Quad>,
    pub prefixes: PrefixMap,
    pub base: Option<String>,
}
