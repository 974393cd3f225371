use indexmap::IndexMap;

use crate::diagnostic::Span;
use crate::expression::Expression;

/// An unevaluated attribute as handed over by the parser.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub expr: Expression,
    pub span: Option<Span>,
}

impl Attribute {
    pub fn new(name: impl Into<String>, expr: Expression) -> Self {
        Attribute {
            name: name.into(),
            expr,
            span: None,
        }
    }
}

/// Attributes keyed by name, in source order.
pub type Attributes = IndexMap<String, Attribute>;

/// A block label such as the `type` or `name` of a content block.
#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    pub value: String,
    pub span: Option<Span>,
}

/// The not-yet-decoded body of a block: its attributes and nested blocks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawBody {
    pub attributes: Attributes,
    pub blocks: Vec<RawBlock>,
}

impl RawBody {
    pub fn new() -> Self {
        RawBody::default()
    }

    pub fn with_attribute(mut self, name: &str, expr: Expression) -> Self {
        self.attributes.insert(name.to_string(), Attribute::new(name, expr));
        self
    }

    pub fn with_block(mut self, block: RawBlock) -> Self {
        self.blocks.push(block);
        self
    }
}

/// A nested block as produced by the parser, e.g. `content text "intro" { ... }`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBlock {
    pub keyword: String,
    pub labels: Vec<Label>,
    pub body: RawBody,
    pub span: Option<Span>,
}

impl RawBlock {
    pub fn new(keyword: impl Into<String>, labels: &[&str], body: RawBody) -> Self {
        RawBlock {
            keyword: keyword.into(),
            labels: labels
                .iter()
                .map(|value| Label {
                    value: value.to_string(),
                    span: None,
                })
                .collect(),
            body,
            span: None,
        }
    }
}
