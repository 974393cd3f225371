pub mod block;
pub mod body;
pub mod diagnostic;
pub mod document;
pub mod expression;
pub mod loader;

pub use serde_json::Value;

pub use crate::block::{Block, BlockKind, ContentBlock, DataBlock, Meta};
pub use crate::body::{Attribute, Attributes, RawBlock, RawBody};
pub use crate::diagnostic::{Diagnostic, Diagnostics, Severity, Span};
pub use crate::document::{Config, Document};
pub use crate::expression::{EvalError, Expression};
