use std::fmt;

use crate::diagnostic::Span;
use crate::expression::Expression;

/// A dotted path to another block, e.g. `document.report.content.text.intro`.
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    pub segments: Vec<String>,
    pub span: Option<Span>,
}

impl Reference {
    /// Build a reference from a `ref` attribute. Only bare traversals qualify.
    pub fn from_expression(expr: &Expression, span: Option<Span>) -> Option<Self> {
        expr.as_traversal().map(|segments| Reference {
            segments: segments.to_vec(),
            span,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}
