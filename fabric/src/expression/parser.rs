use std::ops::Range;

use serde_json::{Number, Value};

use crate::expression::{BinaryOperator, Expression, TemplatePart, UnaryOperator};

/// Expression syntax error. `span` is a byte range within the parsed text.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct ParseError {
    pub message: String,
    pub span: Range<usize>,
}

impl ParseError {
    fn new(message: impl Into<String>, span: Range<usize>) -> Self {
        ParseError {
            message: message.into(),
            span,
        }
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Parse a bare expression such as `upper(env("USER"))` or `content.text.intro`.
pub fn parse_expression(source: &str) -> Result<Expression, ParseError> {
    let tokens = tokenize(source, 0)?;
    let mut parser = ExprParser::new(tokens, source.len());
    let expr = parser.parse_expr(0)?;
    if let Some(token) = parser.peek() {
        return Err(ParseError::new("unexpected tokens after expression", token.span.clone()));
    }
    Ok(expr)
}

/// Parse string content with `${expr}` interpolations.
///
/// A string that is exactly one interpolation yields the inner expression
/// itself, so `"${content.text.intro}"` is a traversal rather than a string.
/// `$${` escapes a literal `${`.
pub fn parse_template(source: &str) -> Result<Expression, ParseError> {
    let parts = parse_template_parts(source, 0)?;
    Ok(template_from_parts(parts))
}

fn template_from_parts(mut parts: Vec<TemplatePart>) -> Expression {
    if parts.len() == 1 {
        match parts.remove(0) {
            TemplatePart::Interpolation(expr) => return expr,
            TemplatePart::Literal(s) => return Expression::Literal(Value::String(s)),
        }
    }
    if parts.is_empty() {
        return Expression::Literal(Value::String(String::new()));
    }
    Expression::Template(parts)
}

// ---------------------------------------------------------------------------
// Template scanning
// ---------------------------------------------------------------------------

fn parse_template_parts(s: &str, base_offset: usize) -> Result<Vec<TemplatePart>, ParseError> {
    let mut parts = Vec::new();
    let mut current_literal = String::new();
    let bytes = s.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if s[i..].starts_with("$${") {
            current_literal.push_str("${");
            i += 3;
        } else if s[i..].starts_with("${") {
            if !current_literal.is_empty() {
                parts.push(TemplatePart::Literal(std::mem::take(&mut current_literal)));
            }
            let start = i + 2;
            let end = find_closing_brace(s, start).ok_or_else(|| {
                ParseError::new("unterminated interpolation", base_offset + i..base_offset + s.len())
            })?;
            let inner = &s[start..end];
            let tokens = tokenize(inner, base_offset + start)?;
            let mut parser = ExprParser::new(tokens, base_offset + end);
            let expr = parser.parse_expr(0)?;
            if let Some(token) = parser.peek() {
                return Err(ParseError::new(
                    "unexpected tokens in interpolation",
                    token.span.clone(),
                ));
            }
            parts.push(TemplatePart::Interpolation(expr));
            i = end + 1;
        } else {
            let ch = s[i..].chars().next().unwrap_or_default();
            current_literal.push(ch);
            i += ch.len_utf8().max(1);
        }
    }

    if !current_literal.is_empty() {
        parts.push(TemplatePart::Literal(current_literal));
    }
    Ok(parts)
}

/// Find the `}` closing an interpolation that starts at `start`, skipping
/// nested braces and quoted strings.
fn find_closing_brace(s: &str, start: usize) -> Option<usize> {
    let mut depth = 1u32;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in s[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Number(Number),
    StringLit(Vec<TemplatePart>),
    Ident(String),
    True,
    False,
    Null,

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eq,
    EqEq,
    BangEq,
    Gt,
    Lt,
    GtEq,
    LtEq,
    AmpAmp,
    PipePipe,
    Bang,
    Question,
    Colon,
    Comma,
    Dot,

    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    span: Range<usize>,
}

fn tokenize(text: &str, base_offset: usize) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let len = chars.len();
    let mut i = 0;

    let offset_at = |idx: usize| -> usize {
        base_offset + chars.get(idx).map(|(o, _)| *o).unwrap_or(text.len())
    };

    while i < len {
        let (_, c) = chars[i];
        let start = i;
        let kind = match c {
            ' ' | '\t' | '\n' | '\r' => {
                i += 1;
                continue;
            }

            '"' => {
                i += 1;
                let content_start = i;
                let mut raw = String::new();
                let mut closed = false;
                while i < len {
                    let (_, ch) = chars[i];
                    if ch == '\\' && i + 1 < len {
                        let (_, next) = chars[i + 1];
                        match next {
                            'n' => raw.push('\n'),
                            't' => raw.push('\t'),
                            '"' => raw.push('"'),
                            '\\' => raw.push('\\'),
                            other => {
                                raw.push('\\');
                                raw.push(other);
                            }
                        }
                        i += 2;
                        continue;
                    }
                    if ch == '"' {
                        closed = true;
                        break;
                    }
                    raw.push(ch);
                    i += 1;
                }
                if !closed {
                    return Err(ParseError::new(
                        "unterminated string literal",
                        offset_at(start)..offset_at(len),
                    ));
                }
                i += 1;
                TokenKind::StringLit(parse_template_parts(&raw, offset_at(content_start))?)
            }

            '0'..='9' => {
                while i < len && chars[i].1.is_ascii_digit() {
                    i += 1;
                }
                let mut is_float = false;
                if i + 1 < len && chars[i].1 == '.' && chars[i + 1].1.is_ascii_digit() {
                    is_float = true;
                    i += 1;
                    while i < len && chars[i].1.is_ascii_digit() {
                        i += 1;
                    }
                }
                let num_str = &text[chars[start].0..chars.get(i).map(|(o, _)| *o).unwrap_or(text.len())];
                let number = if is_float {
                    num_str.parse::<f64>().ok().and_then(Number::from_f64)
                } else {
                    num_str.parse::<i64>().ok().map(Number::from)
                };
                match number {
                    Some(n) => TokenKind::Number(n),
                    None => {
                        return Err(ParseError::new(
                            format!("invalid number literal: {}", num_str),
                            offset_at(start)..offset_at(i),
                        ));
                    }
                }
            }

            'a'..='z' | 'A'..='Z' | '_' => {
                while i < len && (chars[i].1.is_alphanumeric() || chars[i].1 == '_' || chars[i].1 == '-') {
                    i += 1;
                }
                let ident = &text[chars[start].0..chars.get(i).map(|(o, _)| *o).unwrap_or(text.len())];
                match ident {
                    "true" => TokenKind::True,
                    "false" => TokenKind::False,
                    "null" => TokenKind::Null,
                    _ => TokenKind::Ident(ident.to_string()),
                }
            }

            '=' | '!' | '>' | '<' => {
                i += 1;
                let followed_by_eq = i < len && chars[i].1 == '=';
                if followed_by_eq {
                    i += 1;
                }
                match (c, followed_by_eq) {
                    ('=', true) => TokenKind::EqEq,
                    ('=', false) => TokenKind::Eq,
                    ('!', true) => TokenKind::BangEq,
                    ('!', false) => TokenKind::Bang,
                    ('>', true) => TokenKind::GtEq,
                    ('>', false) => TokenKind::Gt,
                    ('<', true) => TokenKind::LtEq,
                    _ => TokenKind::Lt,
                }
            }
            '&' | '|' => {
                i += 1;
                if i < len && chars[i].1 == c {
                    i += 1;
                    if c == '&' { TokenKind::AmpAmp } else { TokenKind::PipePipe }
                } else {
                    return Err(ParseError::new(
                        format!("unexpected character '{}'", c),
                        offset_at(start)..offset_at(i),
                    ));
                }
            }

            '+' => { i += 1; TokenKind::Plus }
            '-' => { i += 1; TokenKind::Minus }
            '*' => { i += 1; TokenKind::Star }
            '/' => { i += 1; TokenKind::Slash }
            '%' => { i += 1; TokenKind::Percent }
            '?' => { i += 1; TokenKind::Question }
            ':' => { i += 1; TokenKind::Colon }
            ',' => { i += 1; TokenKind::Comma }
            '.' => { i += 1; TokenKind::Dot }
            '(' => { i += 1; TokenKind::LParen }
            ')' => { i += 1; TokenKind::RParen }
            '[' => { i += 1; TokenKind::LBracket }
            ']' => { i += 1; TokenKind::RBracket }
            '{' => { i += 1; TokenKind::LBrace }
            '}' => { i += 1; TokenKind::RBrace }

            other => {
                return Err(ParseError::new(
                    format!("unexpected character '{}'", other),
                    offset_at(start)..offset_at(start + 1),
                ));
            }
        };
        tokens.push(Token {
            kind,
            span: offset_at(start)..offset_at(i),
        });
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Pratt parser
// ---------------------------------------------------------------------------

struct ExprParser {
    tokens: Vec<Token>,
    pos: usize,
    /// Offset reported for "unexpected end" errors.
    end: usize,
}

// Binding powers (precedence). Higher = tighter binding.
const BP_CONDITIONAL: u8 = 2;
const BP_OR: u8 = 4;
const BP_AND: u8 = 6;
const BP_EQUALITY: u8 = 8;
const BP_COMPARISON: u8 = 10;
const BP_ADDITIVE: u8 = 12;
const BP_MULTIPLICATIVE: u8 = 14;
const BP_UNARY: u8 = 16;

impl ExprParser {
    fn new(tokens: Vec<Token>, end: usize) -> Self {
        ExprParser { tokens, pos: 0, end }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.peek().map(|t| &t.kind)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn error_here(&self, message: impl Into<String>) -> ParseError {
        let span = self
            .peek()
            .map(|t| t.span.clone())
            .unwrap_or(self.end..self.end);
        ParseError::new(message, span)
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<(), ParseError> {
        if self.eat(&kind) {
            Ok(())
        } else {
            Err(self.error_here(format!("expected {}", what)))
        }
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek_kind() == Some(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_expr(&mut self, min_bp: u8) -> Result<Expression, ParseError> {
        let mut left = self.parse_prefix()?;

        loop {
            let Some(kind) = self.peek_kind() else { break };
            let Some((l_bp, r_bp)) = infix_bp(kind) else { break };
            if l_bp < min_bp {
                break;
            }

            if *kind == TokenKind::Question {
                self.advance();
                let true_branch = self.parse_expr(0)?;
                self.expect(TokenKind::Colon, "':' in conditional expression")?;
                let false_branch = self.parse_expr(r_bp)?;
                left = Expression::Conditional {
                    condition: Box::new(left),
                    true_branch: Box::new(true_branch),
                    false_branch: Box::new(false_branch),
                };
                continue;
            }

            let operator = match kind {
                TokenKind::Plus => BinaryOperator::Addition,
                TokenKind::Minus => BinaryOperator::Subtraction,
                TokenKind::Star => BinaryOperator::Multiplication,
                TokenKind::Slash => BinaryOperator::Division,
                TokenKind::Percent => BinaryOperator::Modulo,
                TokenKind::EqEq => BinaryOperator::Equality,
                TokenKind::BangEq => BinaryOperator::Inequality,
                TokenKind::Gt => BinaryOperator::GreaterThan,
                TokenKind::Lt => BinaryOperator::LessThan,
                TokenKind::GtEq => BinaryOperator::GreaterThanOrEqual,
                TokenKind::LtEq => BinaryOperator::LessThanOrEqual,
                TokenKind::AmpAmp => BinaryOperator::LogicalAnd,
                TokenKind::PipePipe => BinaryOperator::LogicalOr,
                _ => return Err(self.error_here("unexpected infix operator")),
            };
            self.advance();
            let right = self.parse_expr(r_bp)?;
            left = Expression::BinaryOperation {
                operator,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_prefix(&mut self) -> Result<Expression, ParseError> {
        let token = self
            .advance()
            .ok_or_else(|| ParseError::new("unexpected end of expression", self.end..self.end))?;

        match token.kind {
            TokenKind::Number(n) => Ok(Expression::Literal(Value::Number(n))),
            TokenKind::StringLit(parts) => Ok(template_from_parts(parts)),
            TokenKind::True => Ok(Expression::Literal(Value::Bool(true))),
            TokenKind::False => Ok(Expression::Literal(Value::Bool(false))),
            TokenKind::Null => Ok(Expression::Literal(Value::Null)),

            TokenKind::Ident(name) => {
                if self.eat(&TokenKind::LParen) {
                    let arguments = self.parse_sequence(TokenKind::RParen, "')'")?;
                    return Ok(Expression::Call { name, arguments });
                }
                let mut segments = vec![name];
                while self.eat(&TokenKind::Dot) {
                    match self.advance() {
                        Some(Token {
                            kind: TokenKind::Ident(segment),
                            ..
                        }) => segments.push(segment),
                        _ => return Err(ParseError::new("expected attribute name after '.'", token.span)),
                    }
                }
                Ok(Expression::Traversal(segments))
            }

            TokenKind::Bang => Ok(Expression::UnaryOperation {
                operator: UnaryOperator::LogicalNot,
                operand: Box::new(self.parse_expr(BP_UNARY)?),
            }),
            TokenKind::Minus => Ok(Expression::UnaryOperation {
                operator: UnaryOperator::Negation,
                operand: Box::new(self.parse_expr(BP_UNARY)?),
            }),

            TokenKind::LParen => {
                let expr = self.parse_expr(0)?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(expr)
            }

            TokenKind::LBracket => Ok(Expression::List(self.parse_sequence(TokenKind::RBracket, "']'")?)),

            TokenKind::LBrace => {
                let mut entries = Vec::new();
                loop {
                    if self.eat(&TokenKind::RBrace) {
                        break;
                    }
                    let key = match self.advance() {
                        Some(Token {
                            kind: TokenKind::Ident(key),
                            ..
                        }) => key,
                        Some(Token {
                            kind: TokenKind::StringLit(parts),
                            span,
                        }) => match template_from_parts(parts) {
                            Expression::Literal(Value::String(key)) => key,
                            _ => return Err(ParseError::new("object keys cannot be interpolated", span)),
                        },
                        _ => return Err(self.error_here("expected object key")),
                    };
                    if !self.eat(&TokenKind::Eq) && !self.eat(&TokenKind::Colon) {
                        return Err(self.error_here("expected '=' or ':' after object key"));
                    }
                    entries.push((key, self.parse_expr(0)?));
                    self.eat(&TokenKind::Comma);
                }
                Ok(Expression::Object(entries))
            }

            other => Err(ParseError::new(format!("unexpected token: {:?}", other), token.span)),
        }
    }

    /// Parse comma-separated expressions up to (and including) `close`.
    fn parse_sequence(&mut self, close: TokenKind, what: &str) -> Result<Vec<Expression>, ParseError> {
        let mut items = Vec::new();
        loop {
            if self.eat(&close) {
                return Ok(items);
            }
            if self.peek().is_none() {
                return Err(self.error_here(format!("expected {}", what)));
            }
            items.push(self.parse_expr(0)?);
            if !self.eat(&TokenKind::Comma) {
                self.expect(close.clone(), what)?;
                return Ok(items);
            }
        }
    }
}

/// Infix binding powers: returns (left_bp, right_bp) or None if not infix.
fn infix_bp(kind: &TokenKind) -> Option<(u8, u8)> {
    match kind {
        TokenKind::Question => Some((BP_CONDITIONAL, BP_CONDITIONAL)),
        TokenKind::PipePipe => Some((BP_OR, BP_OR + 1)),
        TokenKind::AmpAmp => Some((BP_AND, BP_AND + 1)),
        TokenKind::EqEq | TokenKind::BangEq => Some((BP_EQUALITY, BP_EQUALITY + 1)),
        TokenKind::Gt | TokenKind::Lt | TokenKind::GtEq | TokenKind::LtEq => Some((BP_COMPARISON, BP_COMPARISON + 1)),
        TokenKind::Plus | TokenKind::Minus => Some((BP_ADDITIVE, BP_ADDITIVE + 1)),
        TokenKind::Star | TokenKind::Slash | TokenKind::Percent => Some((BP_MULTIPLICATIVE, BP_MULTIPLICATIVE + 1)),
        _ => None,
    }
}
