use serde_json::{Number, Value};

use super::{Builtin, Comparison, Filter, QueryError};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Dot,
    Ident(String),
    Str(String),
    Number(Number),
    LBracket,
    RBracket,
    LParen,
    RParen,
    Pipe,
    Comma,
    Question,
    Minus,
    Compare(Comparison),
}

fn error(message: impl Into<String>, offset: usize) -> QueryError {
    QueryError::Parse {
        message: message.into(),
        offset,
    }
}

fn tokenize(source: &str) -> Result<Vec<(Token, usize)>, QueryError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (offset, c) = chars[i];
        let next = chars.get(i + 1).map(|(_, c)| *c);
        let token = match c {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '.' => Token::Dot,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '|' => Token::Pipe,
            ',' => Token::Comma,
            '?' => Token::Question,
            '-' => Token::Minus,
            '=' | '!' if next == Some('=') => {
                i += 1;
                Token::Compare(if c == '=' { Comparison::Eq } else { Comparison::Ne })
            }
            '<' | '>' => {
                let or_equal = next == Some('=');
                if or_equal {
                    i += 1;
                }
                Token::Compare(match (c, or_equal) {
                    ('<', false) => Comparison::Lt,
                    ('<', true) => Comparison::Le,
                    ('>', false) => Comparison::Gt,
                    _ => Comparison::Ge,
                })
            }
            '"' => {
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i).map(|(_, c)| *c) {
                        None => return Err(error("unterminated string", offset)),
                        Some('"') => break,
                        Some('\\') => {
                            i += 1;
                            match chars.get(i).map(|(_, c)| *c) {
                                Some('n') => s.push('\n'),
                                Some('t') => s.push('\t'),
                                Some(other @ ('"' | '\\' | '/')) => s.push(other),
                                _ => return Err(error("invalid escape in string", offset)),
                            }
                        }
                        Some(other) => s.push(other),
                    }
                    i += 1;
                }
                Token::Str(s)
            }
            '0'..='9' => {
                let start = i;
                while i < chars.len() {
                    let c = chars[i].1;
                    // `.` belongs to the number only when a digit follows, so
                    // `.[0].name` still reads as a field access.
                    let fraction = c == '.' && chars.get(i + 1).is_some_and(|(_, d)| d.is_ascii_digit());
                    if !c.is_ascii_digit() && !fraction {
                        break;
                    }
                    i += 1;
                }
                let text: String = chars[start..i].iter().map(|(_, c)| c).collect();
                let number = if text.contains('.') {
                    text.parse::<f64>().ok().and_then(Number::from_f64)
                } else {
                    text.parse::<i64>().ok().map(Number::from)
                };
                let number = number.ok_or_else(|| error(format!("invalid number `{}`", text), offset))?;
                tokens.push((Token::Number(number), offset));
                continue;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].1.is_alphanumeric() || chars[i].1 == '_') {
                    i += 1;
                }
                let ident: String = chars[start..i].iter().map(|(_, c)| c).collect();
                tokens.push((Token::Ident(ident), offset));
                continue;
            }
            other => return Err(error(format!("unexpected character `{}`", other), offset)),
        };
        tokens.push((token, offset));
        i += 1;
    }
    Ok(tokens)
}

pub(super) fn parse(source: &str) -> Result<Filter, QueryError> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(error("empty query", 0));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: source.len(),
    };
    let filter = parser.parse_pipe()?;
    match parser.tokens.get(parser.pos) {
        Some((token, offset)) => Err(error(format!("unexpected {:?}", token), *offset)),
        None => Ok(filter),
    }
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_at(&self, ahead: usize) -> Option<&Token> {
        self.tokens.get(self.pos + ahead).map(|(t, _)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|(_, o)| *o).unwrap_or(self.end)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token, what: &str) -> Result<(), QueryError> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(error(format!("expected {}", what), self.offset()))
        }
    }

    fn parse_pipe(&mut self) -> Result<Filter, QueryError> {
        let mut left = self.parse_comma()?;
        while self.eat(&Token::Pipe) {
            let right = self.parse_comma()?;
            left = Filter::Pipe(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_comma(&mut self) -> Result<Filter, QueryError> {
        let mut left = self.parse_comparison()?;
        while self.eat(&Token::Comma) {
            let right = self.parse_comparison()?;
            left = Filter::Comma(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Filter, QueryError> {
        let left = self.parse_postfix()?;
        if let Some(Token::Compare(op)) = self.peek() {
            let op = *op;
            self.pos += 1;
            let right = self.parse_postfix()?;
            return Ok(Filter::Compare(op, Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    fn parse_postfix(&mut self) -> Result<Filter, QueryError> {
        let mut filter = self.parse_term()?;
        loop {
            match self.peek() {
                Some(Token::Question) => {
                    self.pos += 1;
                    filter = Filter::Optional(Box::new(filter));
                }
                Some(Token::Dot) if matches!(self.peek_at(1), Some(Token::Ident(_) | Token::Str(_))) => {
                    self.pos += 1;
                    let field = self.parse_field_name()?;
                    filter = pipe(filter, Filter::Field(field));
                }
                Some(Token::Dot) if self.peek_at(1) == Some(&Token::LBracket) => {
                    self.pos += 1;
                    let step = self.parse_bracket()?;
                    filter = pipe(filter, step);
                }
                Some(Token::LBracket) => {
                    let step = self.parse_bracket()?;
                    filter = pipe(filter, step);
                }
                _ => return Ok(filter),
            }
        }
    }

    fn parse_field_name(&mut self) -> Result<String, QueryError> {
        match self.advance() {
            Some(Token::Ident(name) | Token::Str(name)) => Ok(name),
            _ => Err(error("expected field name", self.offset())),
        }
    }

    /// `[]`, `[n]`, `[-n]` or `["field"]`, starting at the `[`.
    fn parse_bracket(&mut self) -> Result<Filter, QueryError> {
        self.expect(Token::LBracket, "'['")?;
        if self.eat(&Token::RBracket) {
            return Ok(Filter::Iterate);
        }
        let negative = self.eat(&Token::Minus);
        let step = match self.advance() {
            Some(Token::Number(n)) => match n.as_i64() {
                Some(i) => Filter::Index(if negative { -i } else { i }),
                None => return Err(error("index must be an integer", self.offset())),
            },
            Some(Token::Str(field)) if !negative => Filter::Field(field),
            _ => return Err(error("expected index", self.offset())),
        };
        self.expect(Token::RBracket, "']'")?;
        Ok(step)
    }

    fn parse_term(&mut self) -> Result<Filter, QueryError> {
        let offset = self.offset();
        match self.peek().cloned() {
            Some(Token::Dot) => {
                self.pos += 1;
                match self.peek() {
                    Some(Token::Ident(_) | Token::Str(_)) => Ok(Filter::Field(self.parse_field_name()?)),
                    Some(Token::LBracket) => self.parse_bracket(),
                    _ => Ok(Filter::Identity),
                }
            }
            Some(Token::Number(n)) => {
                self.pos += 1;
                Ok(Filter::Literal(Value::Number(n)))
            }
            Some(Token::Minus) => {
                self.pos += 1;
                match self.advance() {
                    Some(Token::Number(n)) => {
                        let negated = n
                            .as_i64()
                            .map(|i| Number::from(-i))
                            .or_else(|| n.as_f64().and_then(|f| Number::from_f64(-f)));
                        negated
                            .map(|n| Filter::Literal(Value::Number(n)))
                            .ok_or_else(|| error("invalid number", offset))
                    }
                    _ => Err(error("expected number after '-'", offset)),
                }
            }
            Some(Token::Str(s)) => {
                self.pos += 1;
                Ok(Filter::Literal(Value::String(s)))
            }
            Some(Token::LBracket) => {
                self.pos += 1;
                if self.eat(&Token::RBracket) {
                    return Ok(Filter::Literal(Value::Array(Vec::new())));
                }
                let inner = self.parse_pipe()?;
                self.expect(Token::RBracket, "']'")?;
                Ok(Filter::Collect(Box::new(inner)))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.parse_pipe()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                self.pos += 1;
                self.parse_named(&name, offset)
            }
            Some(token) => Err(error(format!("unexpected {:?}", token), offset)),
            None => Err(error("unexpected end of query", offset)),
        }
    }

    fn parse_named(&mut self, name: &str, offset: usize) -> Result<Filter, QueryError> {
        Ok(match name {
            "true" => Filter::Literal(Value::Bool(true)),
            "false" => Filter::Literal(Value::Bool(false)),
            "null" => Filter::Literal(Value::Null),
            "keys" => Filter::Builtin(Builtin::Keys),
            "length" => Filter::Builtin(Builtin::Length),
            "first" => Filter::Builtin(Builtin::First),
            "last" => Filter::Builtin(Builtin::Last),
            "not" => Filter::Builtin(Builtin::Not),
            "map" | "select" => {
                self.expect(Token::LParen, "'('")?;
                let inner = Box::new(self.parse_pipe()?);
                self.expect(Token::RParen, "')'")?;
                if name == "map" {
                    Filter::Map(inner)
                } else {
                    Filter::Select(inner)
                }
            }
            other => return Err(error(format!("unknown function `{}`", other), offset)),
        })
    }
}

fn pipe(left: Filter, right: Filter) -> Filter {
    match left {
        Filter::Identity => right,
        left => Filter::Pipe(Box::new(left), Box::new(right)),
    }
}
