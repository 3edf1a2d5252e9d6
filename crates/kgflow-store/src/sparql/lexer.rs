//! SPARQL tokenizer.

use crate::error::QueryError;

#[derive(Clone, Debug, PartialEq)]
pub enum Tok {
    Iri(String),
    PName(String, String),
    Var(String),
    Blank(String),
    Str(String),
    LangTag(String),
    Integer(String),
    Decimal(String),
    Double(String),
    Word(String),
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    Semi,
    Comma,
    Star,
    Plus,
    Minus,
    Slash,
    Question,
    Caret,
    DoubleCaret,
    Pipe,
    Bang,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
    Eof,
}

#[derive(Clone, Debug)]
pub struct Token {
    pub tok: Tok,
    pub offset: usize,
}

pub fn tokenize(text: &str) -> Result<Vec<Token>, QueryError> {
    Lexer { chars: text.chars().collect(), pos: 0 }.run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

impl Lexer {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.chars.get(self.pos + n).copied()
    }

    fn err(&self, message: impl Into<String>) -> QueryError {
        QueryError::syntax(format!("{} at offset {}", message.into(), self.pos))
    }

    fn run(mut self) -> Result<Vec<Token>, QueryError> {
        let mut out = Vec::new();
        loop {
            self.skip_trivia();
            let offset = self.pos;
            let Some(c) = self.peek() else {
                out.push(Token { tok: Tok::Eof, offset });
                return Ok(out);
            };
            let tok = self.next_token(c)?;
            out.push(Token { tok, offset });
        }
    }

    fn skip_trivia(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.pos += 1;
            } else if c == '#' {
                while let Some(c) = self.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.pos += 1;
                }
            } else {
                break;
            }
        }
    }

    fn next_token(&mut self, c: char) -> Result<Tok, QueryError> {
        match c {
            '{' => self.emit(Tok::LBrace, 1),
            '}' => self.emit(Tok::RBrace, 1),
            '(' => self.emit(Tok::LParen, 1),
            ')' => self.emit(Tok::RParen, 1),
            '[' => self.emit(Tok::LBracket, 1),
            ']' => self.emit(Tok::RBracket, 1),
            ';' => self.emit(Tok::Semi, 1),
            ',' => self.emit(Tok::Comma, 1),
            '*' => self.emit(Tok::Star, 1),
            '+' => self.emit(Tok::Plus, 1),
            '-' => self.emit(Tok::Minus, 1),
            '/' => self.emit(Tok::Slash, 1),
            '=' => self.emit(Tok::Eq, 1),
            '.' if !self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) => self.emit(Tok::Dot, 1),
            '^' if self.peek_at(1) == Some('^') => self.emit(Tok::DoubleCaret, 2),
            '^' => self.emit(Tok::Caret, 1),
            '|' if self.peek_at(1) == Some('|') => self.emit(Tok::Or, 2),
            '|' => self.emit(Tok::Pipe, 1),
            '&' if self.peek_at(1) == Some('&') => self.emit(Tok::And, 2),
            '!' if self.peek_at(1) == Some('=') => self.emit(Tok::Ne, 2),
            '!' => self.emit(Tok::Bang, 1),
            '>' if self.peek_at(1) == Some('=') => self.emit(Tok::Ge, 2),
            '>' => self.emit(Tok::Gt, 1),
            '<' => self.lex_angle(),
            '?' | '$' => {
                if self.peek_at(1).is_some_and(|n| is_name_start(n) || n.is_ascii_digit()) {
                    self.pos += 1;
                    Ok(Tok::Var(self.take_while(is_name_char)))
                } else if c == '?' {
                    self.emit(Tok::Question, 1)
                } else {
                    Err(self.err("expected variable name after '$'"))
                }
            }
            '"' | '\'' => self.lex_string(c),
            '@' => {
                self.pos += 1;
                let tag = self.take_while(|c| c.is_ascii_alphanumeric() || c == '-');
                if tag.is_empty() {
                    return Err(self.err("empty language tag"));
                }
                Ok(Tok::LangTag(tag.to_ascii_lowercase()))
            }
            '_' if self.peek_at(1) == Some(':') => {
                self.pos += 2;
                let label = self.take_while(is_name_char);
                Ok(Tok::Blank(label))
            }
            ':' => {
                self.pos += 1;
                Ok(Tok::PName(String::new(), self.take_local()))
            }
            c if c.is_ascii_digit() || c == '.' => self.lex_number(),
            c if is_name_start(c) => {
                let word = self.take_while(|c| is_name_char(c) || c == '.');
                // A trailing dot belongs to the statement, not the name.
                let word = self.give_back_dots(word);
                if self.peek() == Some(':') {
                    self.pos += 1;
                    let local = self.take_local();
                    Ok(Tok::PName(word, local))
                } else {
                    Ok(Tok::Word(word))
                }
            }
            other => Err(self.err(format!("unexpected character '{other}'"))),
        }
    }

    fn emit(&mut self, tok: Tok, len: usize) -> Result<Tok, QueryError> {
        self.pos += len;
        Ok(tok)
    }

    fn give_back_dots(&mut self, mut word: String) -> String {
        while word.ends_with('.') {
            word.pop();
            self.pos -= 1;
        }
        word
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let start = self.pos;
        while self.peek().is_some_and(&pred) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn take_local(&mut self) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if is_name_char(c) || c == '.' || c == ':' || c == '%' {
                out.push(c);
                self.pos += 1;
            } else if c == '\\' && self.peek_at(1).is_some() {
                if let Some(escaped) = self.peek_at(1) {
                    out.push(escaped);
                }
                self.pos += 2;
            } else {
                break;
            }
        }
        while out.ends_with('.') {
            out.pop();
            self.pos -= 1;
        }
        out
    }

    fn lex_angle(&mut self) -> Result<Tok, QueryError> {
        let mut end = self.pos + 1;
        while let Some(&c) = self.chars.get(end) {
            if c == '>' {
                let iri: String = self.chars[self.pos + 1..end].iter().collect();
                self.pos = end + 1;
                return Ok(Tok::Iri(iri));
            }
            if c.is_whitespace() || matches!(c, '<' | '"' | '{' | '}' | '|' | '^' | '`' | '\\') {
                break;
            }
            end += 1;
        }
        if self.peek_at(1) == Some('=') {
            self.pos += 2;
            Ok(Tok::Le)
        } else {
            self.pos += 1;
            Ok(Tok::Lt)
        }
    }

    fn lex_number(&mut self) -> Result<Tok, QueryError> {
        let start = self.pos;
        let mut has_dot = false;
        let mut has_exp = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.pos += 1;
            } else if c == '.' && !has_dot && !has_exp && self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) {
                has_dot = true;
                self.pos += 1;
            } else if (c == 'e' || c == 'E') && !has_exp {
                let sign = matches!(self.peek_at(1), Some('+') | Some('-'));
                let digit_at = if sign { 2 } else { 1 };
                if self.peek_at(digit_at).is_some_and(|d| d.is_ascii_digit()) {
                    has_exp = true;
                    self.pos += digit_at;
                } else {
                    break;
                }
            } else {
                break;
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        if text.is_empty() {
            return Err(self.err("malformed number"));
        }
        Ok(if has_exp {
            Tok::Double(text)
        } else if has_dot {
            Tok::Decimal(text)
        } else {
            Tok::Integer(text)
        })
    }

    fn lex_string(&mut self, quote: char) -> Result<Tok, QueryError> {
        let long = self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote);
        self.pos += if long { 3 } else { 1 };
        let mut out = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(self.err("unterminated string"));
            };
            if long {
                if c == quote && self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                    self.pos += 3;
                    return Ok(Tok::Str(out));
                }
            } else if c == quote {
                self.pos += 1;
                return Ok(Tok::Str(out));
            } else if c == '\n' || c == '\r' {
                return Err(self.err("newline in short string"));
            }
            if c == '\\' {
                self.pos += 1;
                out.push(self.escape()?);
                continue;
            }
            out.push(c);
            self.pos += 1;
        }
    }

    fn escape(&mut self) -> Result<char, QueryError> {
        let Some(c) = self.peek() else {
            return Err(self.err("dangling escape"));
        };
        self.pos += 1;
        Ok(match c {
            't' => '\t',
            'n' => '\n',
            'r' => '\r',
            'b' => '\u{8}',
            'f' => '\u{c}',
            '"' => '"',
            '\'' => '\'',
            '\\' => '\\',
            'u' | 'U' => {
                let len = if c == 'u' { 4 } else { 8 };
                let hex: String = self.chars.iter().skip(self.pos).take(len).collect();
                self.pos += len;
                u32::from_str_radix(&hex, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| self.err(format!("bad unicode escape '{hex}'")))?
            }
            other => return Err(self.err(format!("unknown escape '\\{other}'"))),
        })
    }
}
