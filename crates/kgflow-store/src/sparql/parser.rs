//! Recursive-descent parser for the SPARQL subset.

use super::ast::*;
use super::lexer::{tokenize, Tok, Token};
use crate::error::QueryError;
use crate::prefixes::{resolve_relative, PrefixMap};
use crate::term::{Literal, Term};
use kgflow_core::vocab::{rdf, xsd, XSD_NS};

type PResult<T> = Result<T, QueryError>;

pub fn parse_request(text: &str, injected: PrefixMap) -> PResult<Request> {
    let toks = tokenize(text)?;
    let mut parser = Parser {
        toks,
        pos: 0,
        prefixes: injected,
        base: None,
        aggregates: Vec::new(),
        allow_aggregates: false,
        blank_as_term: false,
        fresh: 0,
    };
    parser.request()
}

struct Parser {
    toks: Vec<Token>,
    pos: usize,
    prefixes: PrefixMap,
    base: Option<String>,
    aggregates: Vec<Aggregate>,
    allow_aggregates: bool,
    /// Inside templates and DATA blocks blank nodes are terms, not variables.
    blank_as_term: bool,
    fresh: usize,
}

impl Parser {
    // ------------------------------------------------------------------
    // Token plumbing
    // ------------------------------------------------------------------

    fn peek(&self) -> &Tok {
        &self.toks[self.pos.min(self.toks.len() - 1)].tok
    }

    fn peek_at(&self, n: usize) -> &Tok {
        &self.toks[(self.pos + n).min(self.toks.len() - 1)].tok
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.toks.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn err(&self, message: impl Into<String>) -> QueryError {
        let offset = self.toks[self.pos.min(self.toks.len() - 1)].offset;
        QueryError::syntax(format!("{} at offset {offset}", message.into()))
    }

    fn is_word(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Word(w) if w.eq_ignore_ascii_case(kw))
    }

    fn is_word_at(&self, n: usize, kw: &str) -> bool {
        matches!(self.peek_at(n), Tok::Word(w) if w.eq_ignore_ascii_case(kw))
    }

    fn eat_word(&mut self, kw: &str) -> bool {
        if self.is_word(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_word(&mut self, kw: &str) -> PResult<()> {
        if self.eat_word(kw) {
            Ok(())
        } else {
            Err(self.err(format!("expected {kw}, found {:?}", self.peek())))
        }
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == tok {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: &Tok) -> PResult<()> {
        if self.eat(tok) {
            Ok(())
        } else {
            Err(self.err(format!("expected {tok:?}, found {:?}", self.peek())))
        }
    }

    fn fresh_node(&mut self) -> TermPattern {
        self.fresh += 1;
        if self.blank_as_term {
            TermPattern::Term(Term::blank(format!("t{}", self.fresh)))
        } else {
            TermPattern::Var(format!("{HIDDEN_VAR_PREFIX}anon{}", self.fresh))
        }
    }

    // ------------------------------------------------------------------
    // Top level
    // ------------------------------------------------------------------

    fn request(&mut self) -> PResult<Request> {
        self.prologue()?;
        let request = if self.is_word("SELECT")
            || self.is_word("ASK")
            || self.is_word("CONSTRUCT")
            || self.is_word("DESCRIBE")
        {
            Request::Query(self.query()?)
        } else {
            Request::Update(self.update()?)
        };
        if self.peek() != &Tok::Eof {
            return Err(self.err(format!("unexpected trailing {:?}", self.peek())));
        }
        Ok(request)
    }

    fn prologue(&mut self) -> PResult<()> {
        loop {
            if self.eat_word("PREFIX") {
                let prefix = match self.advance() {
                    Tok::PName(p, local) if local.is_empty() => p,
                    other => return Err(self.err(format!("expected prefix name, found {other:?}"))),
                };
                let ns = match self.advance() {
                    Tok::Iri(iri) => resolve_relative(self.base.as_deref(), &iri),
                    other => return Err(self.err(format!("expected namespace IRI, found {other:?}"))),
                };
                self.prefixes.insert(prefix, ns);
            } else if self.eat_word("BASE") {
                match self.advance() {
                    Tok::Iri(iri) => self.base = Some(iri),
                    other => return Err(self.err(format!("expected base IRI, found {other:?}"))),
                }
            } else {
                return Ok(());
            }
        }
    }

    fn query(&mut self) -> PResult<Query> {
        let form = if self.eat_word("SELECT") {
            QueryForm::Select(self.select_clause()?)
        } else if self.eat_word("ASK") {
            QueryForm::Ask
        } else if self.eat_word("CONSTRUCT") {
            if self.is_word("WHERE") {
                QueryForm::Construct(Vec::new())
            } else {
                QueryForm::Construct(self.template_block()?)
            }
        } else {
            self.expect_word("DESCRIBE")?;
            QueryForm::Describe(self.describe_targets()?)
        };

        if self.is_word("FROM") {
            return Err(QueryError::unsupported("FROM dataset clauses are not supported"));
        }

        let pattern = match &form {
            QueryForm::Describe(_) if !self.is_word("WHERE") && self.peek() != &Tok::LBrace => {
                GroupPattern::default()
            }
            _ => {
                self.eat_word("WHERE");
                self.group()?
            }
        };

        let form = match form {
            QueryForm::Construct(template) if template.is_empty() => {
                QueryForm::Construct(construct_where_template(&pattern)?)
            }
            other => other,
        };

        let modifiers = self.modifiers()?;
        let values = if self.eat_word("VALUES") { Some(self.values_block()?) } else { None };

        Ok(Query {
            form,
            pattern,
            modifiers,
            values,
            aggregates: std::mem::take(&mut self.aggregates),
            prefixes: self.prefixes.clone(),
        })
    }

    fn select_clause(&mut self) -> PResult<SelectClause> {
        let distinct = self.eat_word("DISTINCT");
        let reduced = !distinct && self.eat_word("REDUCED");
        if self.eat(&Tok::Star) {
            return Ok(SelectClause { distinct, reduced, projection: Projection::Wildcard });
        }
        let mut items = Vec::new();
        loop {
            match self.peek().clone() {
                Tok::Var(v) => {
                    self.advance();
                    items.push(ProjectionItem::Var(v));
                }
                Tok::LParen => {
                    self.advance();
                    self.allow_aggregates = true;
                    let expr = self.expr();
                    self.allow_aggregates = false;
                    let expr = expr?;
                    self.expect_word("AS")?;
                    let var = self.var()?;
                    self.expect(&Tok::RParen)?;
                    items.push(ProjectionItem::Expr(expr, var));
                }
                _ => break,
            }
        }
        if items.is_empty() {
            return Err(self.err("SELECT needs at least one variable or *"));
        }
        Ok(SelectClause { distinct, reduced, projection: Projection::Items(items) })
    }

    fn describe_targets(&mut self) -> PResult<Vec<TermPattern>> {
        if self.eat(&Tok::Star) {
            return Ok(Vec::new());
        }
        let mut targets = Vec::new();
        while matches!(self.peek(), Tok::Var(_) | Tok::Iri(_) | Tok::PName(..)) {
            targets.push(self.var_or_term()?);
        }
        if targets.is_empty() {
            return Err(self.err("DESCRIBE needs a resource, variable or *"));
        }
        Ok(targets)
    }

    fn modifiers(&mut self) -> PResult<Modifiers> {
        let mut m = Modifiers::default();
        if self.is_word("GROUP") {
            self.advance();
            self.expect_word("BY")?;
            loop {
                match self.peek().clone() {
                    Tok::Var(v) => {
                        self.advance();
                        m.group_by.push(GroupKey::Var(v));
                    }
                    Tok::LParen => {
                        self.advance();
                        let expr = self.expr()?;
                        let alias = if self.eat_word("AS") { Some(self.var()?) } else { None };
                        self.expect(&Tok::RParen)?;
                        m.group_by.push(GroupKey::Expr(expr, alias));
                    }
                    Tok::Word(w) if Func::from_name(&w).is_some() => {
                        let expr = self.primary()?;
                        m.group_by.push(GroupKey::Expr(expr, None));
                    }
                    _ => break,
                }
            }
            if m.group_by.is_empty() {
                return Err(self.err("GROUP BY needs at least one key"));
            }
        }
        if self.eat_word("HAVING") {
            self.allow_aggregates = true;
            let result = (|| {
                let mut having = Vec::new();
                while self.peek() == &Tok::LParen || matches!(self.peek(), Tok::Word(w) if is_call_word(w)) {
                    having.push(self.primary()?);
                }
                Ok::<_, QueryError>(having)
            })();
            self.allow_aggregates = false;
            m.having = result?;
            if m.having.is_empty() {
                return Err(self.err("HAVING needs a constraint"));
            }
        }
        if self.is_word("ORDER") {
            self.advance();
            self.expect_word("BY")?;
            self.allow_aggregates = true;
            let result = self.order_keys();
            self.allow_aggregates = false;
            m.order_by = result?;
        }
        loop {
            if self.eat_word("LIMIT") {
                m.limit = Some(self.usize_literal()?);
            } else if self.eat_word("OFFSET") {
                m.offset = self.usize_literal()?;
            } else {
                break;
            }
        }
        Ok(m)
    }

    fn order_keys(&mut self) -> PResult<Vec<OrderKey>> {
        let mut keys = Vec::new();
        loop {
            if self.is_word("ASC") || self.is_word("DESC") {
                let descending = self.is_word("DESC");
                self.advance();
                self.expect(&Tok::LParen)?;
                let expr = self.expr()?;
                self.expect(&Tok::RParen)?;
                keys.push(OrderKey { expr, descending });
            } else if let Tok::Var(v) = self.peek().clone() {
                self.advance();
                keys.push(OrderKey { expr: Expr::Var(v), descending: false });
            } else if self.peek() == &Tok::LParen
                || matches!(self.peek(), Tok::Word(w) if is_call_word(w))
            {
                keys.push(OrderKey { expr: self.primary()?, descending: false });
            } else {
                break;
            }
        }
        if keys.is_empty() {
            return Err(self.err("ORDER BY needs at least one key"));
        }
        Ok(keys)
    }

    fn usize_literal(&mut self) -> PResult<usize> {
        match self.advance() {
            Tok::Integer(n) => n.parse().map_err(|_| self.err(format!("bad count '{n}'"))),
            other => Err(self.err(format!("expected integer, found {other:?}"))),
        }
    }

    fn var(&mut self) -> PResult<String> {
        match self.advance() {
            Tok::Var(v) => Ok(v),
            other => Err(self.err(format!("expected variable, found {other:?}"))),
        }
    }

    // ------------------------------------------------------------------
    // Updates
    // ------------------------------------------------------------------

    fn update(&mut self) -> PResult<Update> {
        let mut ops = Vec::new();
        loop {
            if self.peek() == &Tok::Eof {
                break;
            }
            ops.push(self.update_op()?);
            if !self.eat(&Tok::Semi) {
                break;
            }
            self.prologue()?;
        }
        if ops.is_empty() {
            return Err(self.err("expected a query or update"));
        }
        Ok(Update { ops, prefixes: self.prefixes.clone() })
    }

    fn update_op(&mut self) -> PResult<UpdateOp> {
        if self.eat_word("INSERT") {
            if self.eat_word("DATA") {
                return Ok(UpdateOp::InsertData(self.quad_data()?));
            }
            let insert = self.quad_template()?;
            self.expect_word("WHERE")?;
            let pattern = self.group()?;
            return Ok(UpdateOp::Modify { delete: Vec::new(), insert, pattern });
        }
        if self.eat_word("DELETE") {
            if self.eat_word("DATA") {
                return Ok(UpdateOp::DeleteData(self.quad_data()?));
            }
            if self.eat_word("WHERE") {
                return Ok(UpdateOp::DeleteWhere(self.quad_template()?));
            }
            let delete = self.quad_template()?;
            let insert = if self.eat_word("INSERT") { self.quad_template()? } else { Vec::new() };
            self.expect_word("WHERE")?;
            let pattern = self.group()?;
            return Ok(UpdateOp::Modify { delete, insert, pattern });
        }
        if self.eat_word("CLEAR") {
            let silent = self.eat_word("SILENT");
            let target = if self.eat_word("DEFAULT") {
                ClearTarget::Default
            } else if self.eat_word("NAMED") {
                ClearTarget::AllNamed
            } else if self.eat_word("ALL") {
                ClearTarget::All
            } else {
                self.expect_word("GRAPH")?;
                ClearTarget::Named(self.iri()?)
            };
            return Ok(UpdateOp::Clear { target, silent });
        }
        for kw in ["LOAD", "DROP", "CREATE", "ADD", "MOVE", "COPY", "WITH"] {
            if self.is_word(kw) {
                return Err(QueryError::unsupported(format!("{kw} is not supported")));
            }
        }
        Err(self.err(format!("expected a query or update, found {:?}", self.peek())))
    }

    fn quad_data(&mut self) -> PResult<Vec<QuadTemplate>> {
        let quads = self.quad_template()?;
        let ground = quads.iter().all(|q| {
            q.triple.subject.as_var().is_none()
                && q.triple.object.as_var().is_none()
                && !matches!(q.triple.verb, Verb::Var(_))
                && q.graph.as_ref().map_or(true, |g| g.as_var().is_none())
        });
        if !ground {
            return Err(self.err("variables are not allowed in DATA blocks"));
        }
        Ok(quads)
    }

    fn quad_template(&mut self) -> PResult<Vec<QuadTemplate>> {
        self.expect(&Tok::LBrace)?;
        let previous = std::mem::replace(&mut self.blank_as_term, true);
        let result = self.quad_template_body();
        self.blank_as_term = previous;
        result
    }

    fn quad_template_body(&mut self) -> PResult<Vec<QuadTemplate>> {
        let mut out = Vec::new();
        loop {
            if self.eat(&Tok::RBrace) {
                return Ok(out);
            }
            if self.eat(&Tok::Dot) {
                continue;
            }
            if self.eat_word("GRAPH") {
                let graph = self.var_or_term()?;
                self.expect(&Tok::LBrace)?;
                let mut triples = Vec::new();
                while !self.eat(&Tok::RBrace) {
                    if self.eat(&Tok::Dot) {
                        continue;
                    }
                    self.triples_same_subject(&mut triples)?;
                }
                out.extend(triples.into_iter().map(|triple| QuadTemplate { triple, graph: Some(graph.clone()) }));
                continue;
            }
            let mut triples = Vec::new();
            self.triples_same_subject(&mut triples)?;
            out.extend(triples.into_iter().map(|triple| QuadTemplate { triple, graph: None }));
        }
    }

    fn template_block(&mut self) -> PResult<Vec<TriplePattern>> {
        self.expect(&Tok::LBrace)?;
        let previous = std::mem::replace(&mut self.blank_as_term, true);
        let result: PResult<Vec<TriplePattern>> = (|| {
            let mut triples = Vec::new();
            loop {
                if self.eat(&Tok::RBrace) {
                    return Ok(triples);
                }
                if self.eat(&Tok::Dot) {
                    continue;
                }
                self.triples_same_subject(&mut triples)?;
            }
        })();
        self.blank_as_term = previous;
        let triples = result?;
        if triples.iter().any(|t| t.verb.as_simple().is_none()) {
            return Err(self.err("property paths are not allowed in templates"));
        }
        Ok(triples)
    }

    // ------------------------------------------------------------------
    // Graph patterns
    // ------------------------------------------------------------------

    fn group(&mut self) -> PResult<GroupPattern> {
        self.expect(&Tok::LBrace)?;
        if self.is_word("SELECT") {
            return Err(QueryError::unsupported("subqueries are not supported"));
        }
        let mut elements: Vec<Pattern> = Vec::new();
        loop {
            match self.peek().clone() {
                Tok::RBrace => {
                    self.advance();
                    return Ok(GroupPattern { elements });
                }
                Tok::Dot => {
                    self.advance();
                }
                Tok::Eof => return Err(self.err("unterminated group pattern")),
                Tok::LBrace => {
                    let first = self.group()?;
                    let mut branches = vec![first];
                    while self.eat_word("UNION") {
                        branches.push(self.group()?);
                    }
                    if branches.len() == 1 {
                        elements.extend(branches.pop().map(Pattern::Group));
                    } else {
                        elements.push(Pattern::Union(branches));
                    }
                }
                Tok::Word(w) if w.eq_ignore_ascii_case("OPTIONAL") => {
                    self.advance();
                    elements.push(Pattern::Optional(self.group()?));
                }
                Tok::Word(w) if w.eq_ignore_ascii_case("MINUS") => {
                    self.advance();
                    elements.push(Pattern::Minus(self.group()?));
                }
                Tok::Word(w) if w.eq_ignore_ascii_case("FILTER") => {
                    self.advance();
                    elements.push(Pattern::Filter(self.constraint()?));
                }
                Tok::Word(w) if w.eq_ignore_ascii_case("BIND") => {
                    self.advance();
                    self.expect(&Tok::LParen)?;
                    let expr = self.expr()?;
                    self.expect_word("AS")?;
                    let var = self.var()?;
                    self.expect(&Tok::RParen)?;
                    elements.push(Pattern::Bind(expr, var));
                }
                Tok::Word(w) if w.eq_ignore_ascii_case("VALUES") => {
                    self.advance();
                    elements.push(Pattern::Values(self.values_block()?));
                }
                Tok::Word(w) if w.eq_ignore_ascii_case("GRAPH") => {
                    self.advance();
                    let graph = self.var_or_term()?;
                    elements.push(Pattern::Graph(graph, self.group()?));
                }
                Tok::Word(w) if w.eq_ignore_ascii_case("SERVICE") => {
                    return Err(QueryError::unsupported("SERVICE is not supported"));
                }
                _ => {
                    let mut triples = Vec::new();
                    self.triples_same_subject(&mut triples)?;
                    match elements.last_mut() {
                        Some(Pattern::Triples(existing)) => existing.extend(triples),
                        _ => elements.push(Pattern::Triples(triples)),
                    }
                }
            }
        }
    }

    fn constraint(&mut self) -> PResult<Expr> {
        if self.peek() == &Tok::LParen {
            self.advance();
            let expr = self.expr()?;
            self.expect(&Tok::RParen)?;
            Ok(expr)
        } else {
            self.primary()
        }
    }

    fn values_block(&mut self) -> PResult<ValuesBlock> {
        let mut block = ValuesBlock::default();
        if let Tok::Var(v) = self.peek().clone() {
            self.advance();
            block.vars.push(v);
            self.expect(&Tok::LBrace)?;
            while !self.eat(&Tok::RBrace) {
                block.rows.push(vec![self.values_cell()?]);
            }
            return Ok(block);
        }
        self.expect(&Tok::LParen)?;
        while let Tok::Var(v) = self.peek().clone() {
            self.advance();
            block.vars.push(v);
        }
        self.expect(&Tok::RParen)?;
        self.expect(&Tok::LBrace)?;
        while !self.eat(&Tok::RBrace) {
            self.expect(&Tok::LParen)?;
            let mut row = Vec::new();
            while !self.eat(&Tok::RParen) {
                row.push(self.values_cell()?);
            }
            if row.len() != block.vars.len() {
                return Err(self.err("VALUES row width does not match its variables"));
            }
            block.rows.push(row);
        }
        Ok(block)
    }

    fn values_cell(&mut self) -> PResult<Option<Term>> {
        if self.eat_word("UNDEF") {
            return Ok(None);
        }
        match self.var_or_term()? {
            TermPattern::Term(t) => Ok(Some(t)),
            TermPattern::Var(_) => Err(self.err("variables are not allowed in VALUES")),
        }
    }

    fn triples_same_subject(&mut self, out: &mut Vec<TriplePattern>) -> PResult<()> {
        let subject = match self.peek() {
            Tok::LBracket | Tok::LParen => {
                let node = self.graph_node(out)?;
                if matches!(self.peek(), Tok::Dot | Tok::RBrace) {
                    return Ok(());
                }
                node
            }
            _ => self.var_or_term()?,
        };
        self.property_list(subject, out)
    }

    fn property_list(&mut self, subject: TermPattern, out: &mut Vec<TriplePattern>) -> PResult<()> {
        loop {
            let verb = self.verb()?;
            self.object_list(&subject, &verb, out)?;
            if !self.eat(&Tok::Semi) {
                return Ok(());
            }
            while self.eat(&Tok::Semi) {}
            if matches!(self.peek(), Tok::Dot | Tok::RBrace | Tok::RBracket | Tok::Eof) {
                return Ok(());
            }
        }
    }

    fn object_list(&mut self, subject: &TermPattern, verb: &Verb, out: &mut Vec<TriplePattern>) -> PResult<()> {
        loop {
            let object = self.graph_node(out)?;
            out.push(TriplePattern { subject: subject.clone(), verb: verb.clone(), object });
            if !self.eat(&Tok::Comma) {
                return Ok(());
            }
        }
    }

    fn graph_node(&mut self, out: &mut Vec<TriplePattern>) -> PResult<TermPattern> {
        match self.peek() {
            Tok::LBracket => {
                self.advance();
                let node = self.fresh_node();
                if !self.eat(&Tok::RBracket) {
                    self.property_list(node.clone(), out)?;
                    self.expect(&Tok::RBracket)?;
                }
                Ok(node)
            }
            Tok::LParen => {
                self.advance();
                let mut items = Vec::new();
                while !self.eat(&Tok::RParen) {
                    items.push(self.graph_node(out)?);
                }
                let mut head = TermPattern::Term(Term::iri(rdf::NIL));
                for item in items.into_iter().rev() {
                    let node = self.fresh_node();
                    out.push(TriplePattern {
                        subject: node.clone(),
                        verb: Verb::Path(PathExpr::Iri(Term::iri(rdf::FIRST))),
                        object: item,
                    });
                    out.push(TriplePattern {
                        subject: node.clone(),
                        verb: Verb::Path(PathExpr::Iri(Term::iri(rdf::REST))),
                        object: head,
                    });
                    head = node;
                }
                Ok(head)
            }
            _ => self.var_or_term(),
        }
    }

    fn verb(&mut self) -> PResult<Verb> {
        match self.peek().clone() {
            Tok::Var(v) => {
                self.advance();
                Ok(Verb::Var(v))
            }
            _ => Ok(Verb::Path(self.path()?)),
        }
    }

    fn path(&mut self) -> PResult<PathExpr> {
        let mut alts = vec![self.path_sequence()?];
        while self.eat(&Tok::Pipe) {
            alts.push(self.path_sequence()?);
        }
        Ok(if alts.len() == 1 { alts.remove(0) } else { PathExpr::Alternative(alts) })
    }

    fn path_sequence(&mut self) -> PResult<PathExpr> {
        let mut parts = vec![self.path_elt_or_inverse()?];
        while self.eat(&Tok::Slash) {
            parts.push(self.path_elt_or_inverse()?);
        }
        Ok(if parts.len() == 1 { parts.remove(0) } else { PathExpr::Sequence(parts) })
    }

    fn path_elt_or_inverse(&mut self) -> PResult<PathExpr> {
        if self.eat(&Tok::Caret) {
            Ok(PathExpr::Inverse(Box::new(self.path_elt()?)))
        } else {
            self.path_elt()
        }
    }

    fn path_elt(&mut self) -> PResult<PathExpr> {
        let primary = match self.peek().clone() {
            Tok::Word(w) if w == "a" => {
                self.advance();
                PathExpr::Iri(Term::iri(rdf::TYPE))
            }
            Tok::LParen => {
                self.advance();
                let inner = self.path()?;
                self.expect(&Tok::RParen)?;
                inner
            }
            Tok::Bang => return Err(QueryError::unsupported("negated property sets are not supported")),
            Tok::Iri(_) | Tok::PName(..) => PathExpr::Iri(self.iri()?),
            other => return Err(self.err(format!("expected predicate, found {other:?}"))),
        };
        Ok(match self.peek() {
            Tok::Star => {
                self.advance();
                PathExpr::ZeroOrMore(Box::new(primary))
            }
            Tok::Plus => {
                self.advance();
                PathExpr::OneOrMore(Box::new(primary))
            }
            Tok::Question => {
                self.advance();
                PathExpr::ZeroOrOne(Box::new(primary))
            }
            _ => primary,
        })
    }

    // ------------------------------------------------------------------
    // Terms
    // ------------------------------------------------------------------

    fn iri(&mut self) -> PResult<Term> {
        match self.advance() {
            Tok::Iri(iri) => Ok(Term::iri(resolve_relative(self.base.as_deref(), &iri))),
            Tok::PName(prefix, local) => self.expand(&prefix, &local).map(Term::iri),
            other => Err(self.err(format!("expected IRI, found {other:?}"))),
        }
    }

    fn expand(&self, prefix: &str, local: &str) -> PResult<String> {
        self.prefixes
            .get(prefix)
            .map(|ns| format!("{ns}{local}"))
            .ok_or_else(|| self.err(format!("undeclared prefix '{prefix}:'")))
    }

    fn var_or_term(&mut self) -> PResult<TermPattern> {
        match self.peek().clone() {
            Tok::Var(v) => {
                self.advance();
                Ok(TermPattern::Var(v))
            }
            Tok::Blank(label) => {
                self.advance();
                if self.blank_as_term {
                    Ok(TermPattern::Term(Term::blank(label)))
                } else {
                    Ok(TermPattern::Var(format!("{HIDDEN_VAR_PREFIX}b_{label}")))
                }
            }
            Tok::LBracket if self.peek_at(1) == &Tok::RBracket => {
                self.advance();
                self.advance();
                Ok(self.fresh_node())
            }
            _ => Ok(TermPattern::Term(self.term()?)),
        }
    }

    fn term(&mut self) -> PResult<Term> {
        match self.peek().clone() {
            Tok::Iri(_) | Tok::PName(..) => self.iri(),
            Tok::Str(s) => {
                self.advance();
                self.literal_tail(s)
            }
            Tok::Integer(_) | Tok::Decimal(_) | Tok::Double(_) => self.number(false),
            Tok::Minus | Tok::Plus
                if matches!(self.peek_at(1), Tok::Integer(_) | Tok::Decimal(_) | Tok::Double(_)) =>
            {
                let negative = self.advance() == Tok::Minus;
                self.number(negative)
            }
            Tok::Word(w) if w == "true" || w == "false" => {
                self.advance();
                Ok(Term::boolean(w == "true"))
            }
            other => Err(self.err(format!("expected term, found {other:?}"))),
        }
    }

    fn literal_tail(&mut self, lexical: String) -> PResult<Term> {
        match self.peek().clone() {
            Tok::LangTag(tag) => {
                self.advance();
                Ok(Term::Literal(Literal::lang(lexical, tag)))
            }
            Tok::DoubleCaret => {
                self.advance();
                let datatype = self.iri()?;
                Ok(Term::Literal(Literal::typed(lexical, datatype.lexical())))
            }
            _ => Ok(Term::string(lexical)),
        }
    }

    fn number(&mut self, negative: bool) -> PResult<Term> {
        let sign = if negative { "-" } else { "" };
        Ok(match self.advance() {
            Tok::Integer(n) => Term::Literal(Literal::typed(format!("{sign}{n}"), xsd::INTEGER)),
            Tok::Decimal(n) => Term::Literal(Literal::typed(format!("{sign}{n}"), xsd::DECIMAL)),
            Tok::Double(n) => Term::Literal(Literal::typed(format!("{sign}{n}"), xsd::DOUBLE)),
            other => return Err(self.err(format!("expected number, found {other:?}"))),
        })
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn expr(&mut self) -> PResult<Expr> {
        let mut left = self.and_expr()?;
        while self.eat(&Tok::Or) {
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> PResult<Expr> {
        let mut left = self.relational()?;
        while self.eat(&Tok::And) {
            let right = self.relational()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn relational(&mut self) -> PResult<Expr> {
        let left = self.additive()?;
        let op = match self.peek() {
            Tok::Eq => Some(CmpOp::Eq),
            Tok::Ne => Some(CmpOp::Ne),
            Tok::Lt => Some(CmpOp::Lt),
            Tok::Gt => Some(CmpOp::Gt),
            Tok::Le => Some(CmpOp::Le),
            Tok::Ge => Some(CmpOp::Ge),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let right = self.additive()?;
            return Ok(Expr::Cmp(op, Box::new(left), Box::new(right)));
        }
        let negated = if self.is_word("NOT") && self.is_word_at(1, "IN") {
            self.advance();
            true
        } else {
            false
        };
        if self.eat_word("IN") {
            let list = self.arg_list()?;
            return Ok(Expr::In { expr: Box::new(left), list, negated });
        }
        Ok(left)
    }

    fn additive(&mut self) -> PResult<Expr> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Tok::Plus => ArithOp::Add,
                Tok::Minus => ArithOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.multiplicative()?;
            left = Expr::Arith(op, Box::new(left), Box::new(right));
        }
    }

    fn multiplicative(&mut self) -> PResult<Expr> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Tok::Star => ArithOp::Mul,
                Tok::Slash => ArithOp::Div,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.unary()?;
            left = Expr::Arith(op, Box::new(left), Box::new(right));
        }
    }

    fn unary(&mut self) -> PResult<Expr> {
        match self.peek() {
            Tok::Bang => {
                self.advance();
                Ok(Expr::Not(Box::new(self.unary()?)))
            }
            Tok::Minus => {
                self.advance();
                Ok(Expr::Neg(Box::new(self.unary()?)))
            }
            Tok::Plus => {
                self.advance();
                self.unary()
            }
            _ => self.primary(),
        }
    }

    fn arg_list(&mut self) -> PResult<Vec<Expr>> {
        self.expect(&Tok::LParen)?;
        let mut args = Vec::new();
        if self.eat(&Tok::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            if self.eat(&Tok::RParen) {
                return Ok(args);
            }
            self.expect(&Tok::Comma)?;
        }
    }

    fn primary(&mut self) -> PResult<Expr> {
        match self.peek().clone() {
            Tok::LParen => {
                self.advance();
                let expr = self.expr()?;
                self.expect(&Tok::RParen)?;
                Ok(expr)
            }
            Tok::Var(v) => {
                self.advance();
                Ok(Expr::Var(v))
            }
            Tok::Iri(_) | Tok::PName(..) => {
                let iri = self.iri()?;
                if self.peek() != &Tok::LParen {
                    return Ok(Expr::Const(iri));
                }
                let datatype = iri.lexical().to_string();
                if !datatype.starts_with(XSD_NS) {
                    return Err(QueryError::unsupported(format!("function <{datatype}> is not supported")));
                }
                let mut args = self.arg_list()?;
                if args.len() != 1 {
                    return Err(self.err("casts take exactly one argument"));
                }
                Ok(Expr::Cast(datatype, Box::new(args.remove(0))))
            }
            Tok::Str(_) | Tok::Integer(_) | Tok::Decimal(_) | Tok::Double(_) => Ok(Expr::Const(self.term()?)),
            Tok::Word(w) if w == "true" || w == "false" => Ok(Expr::Const(self.term()?)),
            Tok::Word(w) => self.call(&w),
            other => Err(self.err(format!("expected expression, found {other:?}"))),
        }
    }

    fn call(&mut self, word: &str) -> PResult<Expr> {
        let upper = word.to_ascii_uppercase();
        self.advance();
        match upper.as_str() {
            "BOUND" => {
                self.expect(&Tok::LParen)?;
                let var = self.var()?;
                self.expect(&Tok::RParen)?;
                Ok(Expr::Bound(var))
            }
            "EXISTS" => Ok(Expr::Exists { pattern: self.group()?, negated: false }),
            "NOT" => {
                self.expect_word("EXISTS")?;
                Ok(Expr::Exists { pattern: self.group()?, negated: true })
            }
            "COUNT" | "SUM" | "MIN" | "MAX" | "AVG" | "SAMPLE" | "GROUP_CONCAT" => self.aggregate(&upper),
            _ => match Func::from_name(&upper) {
                Some(func) => {
                    let args = self.arg_list()?;
                    Ok(Expr::Call(func, args))
                }
                None => Err(QueryError::unsupported(format!("function {word} is not supported"))),
            },
        }
    }

    fn aggregate(&mut self, name: &str) -> PResult<Expr> {
        if !self.allow_aggregates {
            return Err(self.err(format!("aggregate {name} is not allowed here")));
        }
        let func = match name {
            "COUNT" => AggFunc::Count,
            "SUM" => AggFunc::Sum,
            "MIN" => AggFunc::Min,
            "MAX" => AggFunc::Max,
            "AVG" => AggFunc::Avg,
            "SAMPLE" => AggFunc::Sample,
            _ => AggFunc::GroupConcat,
        };
        self.expect(&Tok::LParen)?;
        let distinct = self.eat_word("DISTINCT");
        let expr = if func == AggFunc::Count && self.eat(&Tok::Star) {
            None
        } else {
            self.allow_aggregates = false;
            let inner = self.expr();
            self.allow_aggregates = true;
            Some(inner?)
        };
        let mut separator = " ".to_string();
        if func == AggFunc::GroupConcat && self.eat(&Tok::Semi) {
            self.expect_word("SEPARATOR")?;
            self.expect(&Tok::Eq)?;
            separator = match self.advance() {
                Tok::Str(s) => s,
                other => return Err(self.err(format!("expected separator string, found {other:?}"))),
            };
        }
        self.expect(&Tok::RParen)?;
        self.aggregates.push(Aggregate { func, distinct, expr, separator });
        Ok(Expr::Aggregate(self.aggregates.len() - 1))
    }
}

fn is_call_word(word: &str) -> bool {
    let upper = word.to_ascii_uppercase();
    Func::from_name(&upper).is_some()
        || matches!(
            upper.as_str(),
            "BOUND" | "EXISTS" | "NOT" | "COUNT" | "SUM" | "MIN" | "MAX" | "AVG" | "SAMPLE" | "GROUP_CONCAT"
        )
}

/// `CONSTRUCT WHERE { ... }` uses its basic graph pattern as the template.
fn construct_where_template(pattern: &GroupPattern) -> PResult<Vec<TriplePattern>> {
    let mut template = Vec::new();
    for element in &pattern.elements {
        match element {
            Pattern::Triples(triples) => template.extend(triples.iter().cloned()),
            _ => {
                return Err(QueryError::syntax(
                    "CONSTRUCT WHERE allows only a basic graph pattern",
                ))
            }
        }
    }
    if template.iter().any(|t| t.verb.as_simple().is_none()) {
        return Err(QueryError::syntax("CONSTRUCT WHERE does not allow property paths"));
    }
    Ok(template)
}
