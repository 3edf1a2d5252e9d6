//! Turtle writer for the default graph.

use crate::prefixes::PrefixMap;
use crate::store::QuadStore;
use crate::term::{escape_string, Literal, Term};
use kgflow_core::vocab::{rdf, xsd};
use std::collections::HashMap;
use std::fmt::Write;

/// Serializes the default graph. Subjects appear in first-appearance
/// order with `rdf:type` written first as `a`. Without explicit prefixes
/// the well-known entries in use are declared.
pub fn serialize_turtle(store: &QuadStore, prefixes: Option<&PrefixMap>) -> String {
    let prefixes = match prefixes {
        Some(p) => p.clone(),
        None => PrefixMap::well_known_in_use(store),
    };

    let mut out = String::new();
    for (prefix, ns) in prefixes.iter() {
        let _ = writeln!(out, "@prefix {prefix}: <{ns}> .");
    }
    if !prefixes.is_empty() {
        out.push('\n');
    }

    // subject -> predicate -> objects, all in first-appearance order
    let mut subjects: Vec<(&Term, Vec<(&Term, Vec<&Term>)>)> = Vec::new();
    let mut subject_pos: HashMap<&Term, usize> = HashMap::new();
    for quad in store.iter().filter(|q| q.graph.is_default()) {
        let idx = *subject_pos.entry(&quad.subject).or_insert_with(|| {
            subjects.push((&quad.subject, Vec::new()));
            subjects.len() - 1
        });
        let predicates = &mut subjects[idx].1;
        match predicates.iter_mut().find(|(p, _)| *p == &quad.predicate) {
            Some((_, objects)) => objects.push(&quad.object),
            None => predicates.push((&quad.predicate, vec![&quad.object])),
        }
    }

    let rdf_type = Term::iri(rdf::TYPE);
    for (subject, mut predicates) in subjects {
        predicates.sort_by_key(|(p, _)| **p != rdf_type);
        let _ = write!(out, "{}", render(subject, &prefixes));
        let last = predicates.len().saturating_sub(1);
        for (i, (predicate, objects)) in predicates.iter().enumerate() {
            let verb = if **predicate == rdf_type {
                "a".to_string()
            } else {
                render(predicate, &prefixes)
            };
            let objects: Vec<String> = objects.iter().map(|o| render(o, &prefixes)).collect();
            let sep = if i == last { " ." } else { " ;" };
            let _ = write!(out, "\n    {verb} {}{sep}", objects.join(", "));
        }
        out.push_str("\n\n");
    }
    out
}

fn render(term: &Term, prefixes: &PrefixMap) -> String {
    match term {
        Term::Iri(iri) => iri_text(iri, prefixes),
        Term::BlankNode(label) => format!("_:{}", blank_label(label)),
        Term::Literal(lit) => literal_text(lit, prefixes),
    }
}

fn iri_text(iri: &str, prefixes: &PrefixMap) -> String {
    match prefixes.compact(iri) {
        Some(pname) => pname,
        None => format!("<{iri}>"),
    }
}

fn blank_label(label: &str) -> String {
    let mut out: String = label
        .chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '_' | '-') { c } else { '_' })
        .collect();
    if out.starts_with('-') || out.is_empty() {
        out.insert(0, 'b');
    }
    out
}

fn digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn unsigned(s: &str) -> &str {
    s.strip_prefix(['+', '-']).unwrap_or(s)
}

fn is_integer_lexical(s: &str) -> bool {
    digits(unsigned(s))
}

fn is_decimal_lexical(s: &str) -> bool {
    match unsigned(s).split_once('.') {
        Some((whole, frac)) => (whole.is_empty() || digits(whole)) && digits(frac),
        None => false,
    }
}

fn is_double_lexical(s: &str) -> bool {
    let Some((mantissa, exp)) = s.split_once(['e', 'E']) else {
        return false;
    };
    let mantissa_ok = match unsigned(mantissa).split_once('.') {
        Some((whole, frac)) => {
            (digits(whole) && (frac.is_empty() || digits(frac))) || (whole.is_empty() && digits(frac))
        }
        None => digits(unsigned(mantissa)),
    };
    mantissa_ok && digits(unsigned(exp))
}

fn literal_text(lit: &Literal, prefixes: &PrefixMap) -> String {
    let lexical = lit.lexical();
    match lit.datatype() {
        xsd::INTEGER if is_integer_lexical(lexical) => return lexical.to_string(),
        xsd::DECIMAL if is_decimal_lexical(lexical) => return lexical.to_string(),
        xsd::DOUBLE if is_double_lexical(lexical) => return lexical.to_string(),
        xsd::BOOLEAN if lexical == "true" || lexical == "false" => return lexical.to_string(),
        _ => {}
    }
    let quoted = format!("\"{}\"", escape_string(lexical));
    if let Some(lang) = lit.language() {
        format!("{quoted}@{lang}")
    } else if lit.is_plain_string() {
        quoted
    } else {
        format!("{quoted}^^{}", iri_text(lit.datatype(), prefixes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::Quad;
    use crate::turtle::{parse_turtle, TurtleOptions};
    use std::collections::HashSet;

    #[test]
    fn type_first_and_shorthands() {
        let ex = |s: &str| Term::iri(format!("http://example.org/{s}"));
        let store = QuadStore::from_quads(vec![
            Quad::new(ex("c1"), ex("count"), Term::integer(3)),
            Quad::new(ex("c1"), Term::iri(rdf::TYPE), Term::iri("http://example.org/git#Commit")),
            Quad::new(ex("c1"), ex("label"), Term::string("a \"b\"")),
        ]);
        let text = serialize_turtle(&store, None);
        assert!(text.contains("@prefix ex: <http://example.org/> ."));
        assert!(text.contains("ex:c1\n    a git:Commit ;\n    ex:count 3 ;\n    ex:label \"a \\\"b\\\"\" ."));
    }

    #[test]
    fn reparse_gives_same_quads() {
        let source = r#"@prefix ex: <http://example.org/> .
            ex:s ex:p 1.5, -2, 4.0E2, false, "x"@en, "7"^^ex:custom ;
                 ex:list ( ex:a "b" ) ;
                 ex:node [ ex:k ex:v ] .
            _:n ex:p "line\nbreak" ."#;
        let first = parse_turtle(source, &TurtleOptions::default()).unwrap();
        let store = QuadStore::from_quads(first.quads.clone());
        let text = serialize_turtle(&store, Some(&first.prefixes));
        let second = parse_turtle(&text, &TurtleOptions::default()).unwrap();
        let a: HashSet<Quad> = first.quads.into_iter().collect();
        let b: HashSet<Quad> = second.quads.into_iter().collect();
        assert_eq!(a, b);
    }
}
