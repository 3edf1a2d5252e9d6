//! Hand-written Turtle reader.

use super::{ParsedTurtle, TurtleOptions};
use crate::error::TurtleError;
use crate::prefixes::{resolve_relative, PrefixMap};
use crate::term::{Literal, Quad, Term};
use kgflow_core::vocab::{rdf, xsd};

type TResult<T> = Result<T, TurtleError>;

/// Parses a Turtle document into default-graph quads.
pub fn parse_turtle(text: &str, options: &TurtleOptions) -> Result<ParsedTurtle, TurtleError> {
    let mut parser = Parser {
        chars: text.chars().collect(),
        pos: 0,
        line: 1,
        column: 1,
        prefixes: PrefixMap::new(),
        base: options.base.clone(),
        blank_prefix: options.blank_prefix.clone().unwrap_or_default(),
        generated: 0,
        quads: Vec::new(),
    };
    parser.document()?;
    Ok(ParsedTurtle { quads: parser.quads, prefixes: parser.prefixes, base: parser.base })
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    prefixes: PrefixMap,
    base: Option<String>,
    blank_prefix: String,
    generated: usize,
    quads: Vec<Quad>,
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || (c as u32 >= 0xC0 && !c.is_whitespace())
}

fn is_name_char(c: char) -> bool {
    is_name_start(c) || c.is_ascii_digit() || c == '-' || c == '\u{B7}'
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> TurtleError {
        TurtleError { line: self.line, column: self.column, message: message.into() }
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
            } else if c == '#' {
                while let Some(c) = self.bump() {
                    if c == '\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    fn expect(&mut self, want: char) -> TResult<()> {
        self.skip_ws();
        match self.peek() {
            Some(c) if c == want => {
                self.bump();
                Ok(())
            }
            Some(c) => Err(self.error(format!("expected '{want}', found '{c}'"))),
            None => Err(self.error(format!("expected '{want}', found end of input"))),
        }
    }

    /// True when the input continues with `word` followed by a character
    /// that cannot continue a name.
    fn at_word(&self, word: &str, ignore_case: bool) -> bool {
        let n = word.chars().count();
        let matches = word.chars().enumerate().all(|(i, w)| match self.peek_at(i) {
            Some(c) if ignore_case => c.eq_ignore_ascii_case(&w),
            Some(c) => c == w,
            None => false,
        });
        matches && self.peek_at(n).map_or(true, |c| !is_name_char(c) && c != ':')
    }

    fn advance(&mut self, n: usize) {
        for _ in 0..n {
            self.bump();
        }
    }

    fn fresh_blank(&mut self) -> Term {
        self.generated += 1;
        Term::blank(format!("{}genid-{}", self.blank_prefix, self.generated))
    }

    fn emit(&mut self, subject: Term, predicate: Term, object: Term) {
        self.quads.push(Quad::new(subject, predicate, object));
    }

    fn document(&mut self) -> TResult<()> {
        loop {
            self.skip_ws();
            if self.peek().is_none() {
                return Ok(());
            }
            self.statement()?;
        }
    }

    fn statement(&mut self) -> TResult<()> {
        if self.at_word("@prefix", false) {
            self.advance(7);
            self.prefix_decl()?;
            return self.expect('.');
        }
        if self.at_word("@base", false) {
            self.advance(5);
            self.base_decl()?;
            return self.expect('.');
        }
        if self.at_word("PREFIX", true) {
            self.advance(6);
            return self.prefix_decl();
        }
        if self.at_word("BASE", true) {
            self.advance(4);
            return self.base_decl();
        }
        self.triples()?;
        self.expect('.')
    }

    fn prefix_decl(&mut self) -> TResult<()> {
        self.skip_ws();
        let start = self.pos;
        while self.peek().is_some_and(|c| is_name_char(c) || c == '.') {
            self.bump();
        }
        let prefix: String = self.chars[start..self.pos].iter().collect();
        if prefix.ends_with('.') {
            return Err(self.error("prefix name may not end with '.'"));
        }
        self.expect(':')?;
        self.skip_ws();
        let namespace = self.iri_ref()?;
        self.prefixes.insert(prefix, namespace);
        Ok(())
    }

    fn base_decl(&mut self) -> TResult<()> {
        self.skip_ws();
        let base = self.iri_ref()?;
        self.base = Some(base);
        Ok(())
    }

    fn triples(&mut self) -> TResult<()> {
        self.skip_ws();
        if self.peek() == Some('[') {
            let subject = self.blank_property_list()?;
            self.skip_ws();
            if self.peek() != Some('.') {
                self.predicate_object_list(&subject)?;
            }
            return Ok(());
        }
        let subject = self.subject()?;
        self.predicate_object_list(&subject)
    }

    fn subject(&mut self) -> TResult<Term> {
        self.skip_ws();
        match self.peek() {
            Some('(') => self.collection(),
            Some('_') if self.peek_at(1) == Some(':') => self.blank_label(),
            Some('<') => Ok(Term::iri(self.iri_ref()?)),
            Some(_) => Ok(Term::iri(self.prefixed_name()?)),
            None => Err(self.error("expected subject, found end of input")),
        }
    }

    fn predicate_object_list(&mut self, subject: &Term) -> TResult<()> {
        loop {
            let predicate = self.verb()?;
            self.object_list(subject, &predicate)?;
            self.skip_ws();
            if self.peek() != Some(';') {
                return Ok(());
            }
            while self.peek() == Some(';') {
                self.bump();
                self.skip_ws();
            }
            if matches!(self.peek(), Some('.') | Some(']') | None) {
                return Ok(());
            }
        }
    }

    fn verb(&mut self) -> TResult<Term> {
        self.skip_ws();
        if self.peek() == Some('a') && self.peek_at(1).map_or(true, |c| !is_name_char(c) && c != ':') {
            self.bump();
            return Ok(Term::iri(rdf::TYPE));
        }
        match self.peek() {
            Some('<') => Ok(Term::iri(self.iri_ref()?)),
            Some(_) => Ok(Term::iri(self.prefixed_name()?)),
            None => Err(self.error("expected predicate, found end of input")),
        }
    }

    fn object_list(&mut self, subject: &Term, predicate: &Term) -> TResult<()> {
        loop {
            let object = self.object()?;
            self.emit(subject.clone(), predicate.clone(), object);
            self.skip_ws();
            if self.peek() != Some(',') {
                return Ok(());
            }
            self.bump();
        }
    }

    fn object(&mut self) -> TResult<Term> {
        self.skip_ws();
        let c = self.peek().ok_or_else(|| self.error("expected object, found end of input"))?;
        match c {
            '<' => Ok(Term::iri(self.iri_ref()?)),
            '_' if self.peek_at(1) == Some(':') => self.blank_label(),
            '[' => self.blank_property_list(),
            '(' => self.collection(),
            '"' | '\'' => self.literal(),
            '+' | '-' => self.number(),
            '.' if self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) => self.number(),
            c if c.is_ascii_digit() => self.number(),
            _ if self.at_word("true", false) => {
                self.advance(4);
                Ok(Term::boolean(true))
            }
            _ if self.at_word("false", false) => {
                self.advance(5);
                Ok(Term::boolean(false))
            }
            _ => Ok(Term::iri(self.prefixed_name()?)),
        }
    }

    fn blank_property_list(&mut self) -> TResult<Term> {
        self.expect('[')?;
        let node = self.fresh_blank();
        self.skip_ws();
        if self.peek() != Some(']') {
            self.predicate_object_list(&node)?;
        }
        self.expect(']')?;
        Ok(node)
    }

    fn collection(&mut self) -> TResult<Term> {
        self.expect('(')?;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                Some(')') => {
                    self.bump();
                    break;
                }
                None => return Err(self.error("unterminated collection")),
                _ => items.push(self.object()?),
            }
        }
        if items.is_empty() {
            return Ok(Term::iri(rdf::NIL));
        }
        let cells: Vec<Term> = items.iter().map(|_| self.fresh_blank()).collect();
        for (i, item) in items.into_iter().enumerate() {
            let rest = cells.get(i + 1).cloned().unwrap_or_else(|| Term::iri(rdf::NIL));
            self.emit(cells[i].clone(), Term::iri(rdf::FIRST), item);
            self.emit(cells[i].clone(), Term::iri(rdf::REST), rest);
        }
        Ok(cells[0].clone())
    }

    fn blank_label(&mut self) -> TResult<Term> {
        self.advance(2);
        let start = self.pos;
        let mut end = start;
        while self.chars.get(end).is_some_and(|&c| is_name_char(c) || c == '.') {
            end += 1;
        }
        while end > start && self.chars[end - 1] == '.' {
            end -= 1;
        }
        if end == start {
            return Err(self.error("empty blank node label"));
        }
        let label: String = self.chars[start..end].iter().collect();
        self.advance(end - start);
        Ok(Term::blank(format!("{}{label}", self.blank_prefix)))
    }

    fn iri_ref(&mut self) -> TResult<String> {
        if self.peek() != Some('<') {
            return Err(self.error("expected IRI"));
        }
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('>') => break,
                Some('\\') => out.push(self.unicode_escape()?),
                Some(c) if c.is_whitespace() || matches!(c, '<' | '"' | '{' | '}' | '|' | '^' | '`') => {
                    return Err(self.error(format!("illegal character '{c}' in IRI")));
                }
                Some(c) => out.push(c),
                None => return Err(self.error("unterminated IRI")),
            }
        }
        Ok(resolve_relative(self.base.as_deref(), &out))
    }

    fn unicode_escape(&mut self) -> TResult<char> {
        let width = match self.bump() {
            Some('u') => 4,
            Some('U') => 8,
            _ => return Err(self.error("invalid escape")),
        };
        let mut hex = String::with_capacity(width);
        for _ in 0..width {
            match self.bump() {
                Some(c) if c.is_ascii_hexdigit() => hex.push(c),
                _ => return Err(self.error("invalid unicode escape")),
            }
        }
        u32::from_str_radix(&hex, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| self.error(format!("invalid code point U+{hex}")))
    }

    fn prefixed_name(&mut self) -> TResult<String> {
        let start = self.pos;
        let mut i = start;
        while self.chars.get(i).is_some_and(|&c| is_name_char(c) || c == '.') {
            i += 1;
        }
        let prefix: String = self.chars[start..i].iter().collect();
        if self.chars.get(i) != Some(&':') || prefix.ends_with('.') {
            let found: String = self.chars[start..(i + 1).min(self.chars.len())].iter().collect();
            return Err(self.error(format!("unexpected token '{found}'")));
        }
        self.advance(i - start + 1);
        let namespace = self
            .prefixes
            .get(&prefix)
            .map(str::to_string)
            .ok_or_else(|| self.error(format!("undeclared prefix '{prefix}:'")))?;

        let mut local = String::new();
        loop {
            match self.peek() {
                Some('\\') => {
                    self.bump();
                    match self.bump() {
                        Some(c) if "_~.-!$&'()*+,;=/?#@%".contains(c) => local.push(c),
                        _ => return Err(self.error("invalid local name escape")),
                    }
                }
                Some('%') => {
                    local.push('%');
                    self.bump();
                    for _ in 0..2 {
                        match self.bump() {
                            Some(h) if h.is_ascii_hexdigit() => local.push(h),
                            _ => return Err(self.error("invalid percent escape")),
                        }
                    }
                }
                Some('.') if self.peek_at(1).is_some_and(|c| is_name_char(c) || c == ':' || c == '.') => {
                    if self.local_continues_after_dots() {
                        local.push('.');
                        self.bump();
                    } else {
                        break;
                    }
                }
                Some(c) if is_name_char(c) || c == ':' => {
                    local.push(c);
                    self.bump();
                }
                _ => break,
            }
        }
        Ok(format!("{namespace}{local}"))
    }

    /// A run of dots belongs to the local name only if a name character
    /// follows it.
    fn local_continues_after_dots(&self) -> bool {
        let mut i = self.pos;
        while self.chars.get(i) == Some(&'.') {
            i += 1;
        }
        self.chars.get(i).is_some_and(|&c| is_name_char(c) || c == ':')
    }

    fn literal(&mut self) -> TResult<Term> {
        let lexical = self.string()?;
        match self.peek() {
            Some('@') => {
                self.bump();
                let start = self.pos;
                while self.peek().is_some_and(|c| c.is_ascii_alphanumeric() || c == '-') {
                    self.bump();
                }
                let tag: String = self.chars[start..self.pos].iter().collect();
                if tag.is_empty() {
                    return Err(self.error("empty language tag"));
                }
                Ok(Term::Literal(Literal::lang(lexical, tag)))
            }
            Some('^') if self.peek_at(1) == Some('^') => {
                self.advance(2);
                let datatype = match self.peek() {
                    Some('<') => self.iri_ref()?,
                    _ => self.prefixed_name()?,
                };
                Ok(Term::Literal(Literal::typed(lexical, datatype)))
            }
            _ => Ok(Term::Literal(Literal::string(lexical))),
        }
    }

    fn string(&mut self) -> TResult<String> {
        let quote = self.bump().ok_or_else(|| self.error("expected string"))?;
        let long = self.peek() == Some(quote) && self.peek_at(1) == Some(quote);
        if long {
            self.advance(2);
        }
        let mut out = String::new();
        loop {
            let c = self.bump().ok_or_else(|| self.error("unterminated string"))?;
            match c {
                '\\' => out.push(self.string_escape()?),
                c if c == quote && !long => return Ok(out),
                c if c == quote && self.peek() == Some(quote) && self.peek_at(1) == Some(quote) => {
                    // Up to two extra quotes may close a long string.
                    let mut extra = 0;
                    while self.peek_at(2 + extra) == Some(quote) && extra < 2 {
                        extra += 1;
                    }
                    for _ in 0..extra {
                        out.push(quote);
                    }
                    self.advance(2 + extra);
                    return Ok(out);
                }
                '\n' | '\r' if !long => return Err(self.error("line break in short string")),
                c => out.push(c),
            }
        }
    }

    fn string_escape(&mut self) -> TResult<char> {
        match self.peek() {
            Some('u') | Some('U') => self.unicode_escape(),
            Some(c) => {
                self.bump();
                match c {
                    't' => Ok('\t'),
                    'b' => Ok('\u{8}'),
                    'n' => Ok('\n'),
                    'r' => Ok('\r'),
                    'f' => Ok('\u{C}'),
                    '"' => Ok('"'),
                    '\'' => Ok('\''),
                    '\\' => Ok('\\'),
                    other => Err(self.error(format!("invalid escape '\\{other}'"))),
                }
            }
            None => Err(self.error("unterminated escape")),
        }
    }

    fn number(&mut self) -> TResult<Term> {
        let start = self.pos;
        if matches!(self.peek(), Some('+') | Some('-')) {
            self.bump();
        }
        let mut digits = 0;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
            digits += 1;
        }
        let mut fraction = false;
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            fraction = true;
            self.bump();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
                digits += 1;
            }
        }
        let mut exponent = false;
        if matches!(self.peek(), Some('e') | Some('E')) {
            let sign = usize::from(matches!(self.peek_at(1), Some('+') | Some('-')));
            if self.peek_at(1 + sign).is_some_and(|c| c.is_ascii_digit()) {
                exponent = true;
                self.advance(1 + sign);
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.bump();
                }
            }
        }
        if digits == 0 {
            return Err(self.error("malformed number"));
        }
        let lexical: String = self.chars[start..self.pos].iter().collect();
        let datatype = if exponent {
            xsd::DOUBLE
        } else if fraction {
            xsd::DECIMAL
        } else {
            xsd::INTEGER
        };
        Ok(Term::Literal(Literal::typed(lexical, datatype)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> ParsedTurtle {
        parse_turtle(text, &TurtleOptions::default()).unwrap()
    }

    #[test]
    fn prefixes_and_type_shorthand() {
        let doc = parse(
            "@prefix ex: <http://example.org/> .\nPREFIX git: <http://example.org/git#>\nex:c1 a git:Commit .",
        );
        assert_eq!(doc.quads.len(), 1);
        assert_eq!(doc.quads[0].predicate, Term::iri(rdf::TYPE));
        assert_eq!(doc.quads[0].object, Term::iri("http://example.org/git#Commit"));
        assert_eq!(doc.prefixes.get("git"), Some("http://example.org/git#"));
    }

    #[test]
    fn lists_and_shorthands() {
        let doc = parse(
            r#"@prefix ex: <http://example.org/> .
               ex:s ex:p 1, 2.5, 1e3, true ; ex:q "x"@EN , 'y'^^ex:T ; .
               ex:s ex:r """multi
line "quoted" """ ."#,
        );
        let objects: Vec<String> = doc.quads.iter().map(|q| q.object.to_string()).collect();
        assert_eq!(objects[0], format!("\"1\"^^<{}>", xsd::INTEGER));
        assert_eq!(objects[1], format!("\"2.5\"^^<{}>", xsd::DECIMAL));
        assert_eq!(objects[2], format!("\"1e3\"^^<{}>", xsd::DOUBLE));
        assert_eq!(objects[3], format!("\"true\"^^<{}>", xsd::BOOLEAN));
        assert_eq!(objects[4], "\"x\"@en");
        assert_eq!(objects[5], "\"y\"^^<http://example.org/T>");
        assert_eq!(doc.quads[6].object.lexical(), "multi\nline \"quoted\" ");
    }

    #[test]
    fn integer_before_statement_dot() {
        let doc = parse("@prefix ex: <http://example.org/> . ex:s ex:p 42.");
        assert_eq!(doc.quads[0].object.lexical(), "42");
    }

    #[test]
    fn collections_and_property_lists() {
        let doc = parse("@prefix ex: <http://example.org/> . ex:s ex:steps ( ex:a ex:b ) ; ex:meta [ ex:k \"v\" ] .");
        let firsts = doc.quads.iter().filter(|q| q.predicate == Term::iri(rdf::FIRST)).count();
        assert_eq!(firsts, 2);
        assert!(doc.quads.iter().any(|q| q.object == Term::iri(rdf::NIL)));
        assert!(doc.quads.iter().any(|q| q.subject.is_blank() && q.object.lexical() == "v"));
        assert!(parse("@prefix ex: <http://example.org/> . ex:s ex:p () .").quads[0].object == Term::iri(rdf::NIL));
    }

    #[test]
    fn base_resolution_and_local_dots() {
        let doc = parse("@base <http://example.org/dir/> . @prefix : <http://example.org/> . <a> :p :v1.2 .");
        assert_eq!(doc.quads[0].subject, Term::iri("http://example.org/dir/a"));
        assert_eq!(doc.quads[0].object, Term::iri("http://example.org/v1.2"));
    }

    #[test]
    fn errors_carry_position() {
        let err = parse_turtle("ex:s ex:p ex:o .", &TurtleOptions::default()).unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.message.contains("undeclared prefix"));
        let err = parse_turtle("@prefix ex: <http://example.org/> .\nex:s ex:p \"open", &TurtleOptions::default())
            .unwrap_err();
        assert_eq!(err.line, 2);
    }

    #[test]
    fn blank_prefix_scopes_labels() {
        let options = TurtleOptions { base: None, blank_prefix: Some("f1_".into()) };
        let doc = parse_turtle("@prefix ex: <http://example.org/> . _:x ex:p [] .", &options).unwrap();
        assert_eq!(doc.quads[0].subject, Term::blank("f1_x"));
        assert_eq!(doc.quads[0].object, Term::blank("f1_genid-1"));
    }
}
