use crate::block::{ContentBlock, DataBlock, Meta};
use crate::diagnostic::Span;

/// A named container of data blocks and a tree of content blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub name: String,
    pub meta: Option<Meta>,
    pub data: Vec<DataBlock>,
    pub content: Vec<ContentBlock>,
    pub span: Option<Span>,
}

impl Document {
    pub fn new(name: impl Into<String>) -> Self {
        Document {
            name: name.into(),
            meta: None,
            data: Vec::new(),
            content: Vec::new(),
            span: None,
        }
    }
}

/// The decoded file: documents plus globally addressable blocks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    pub documents: Vec<Document>,
    pub data: Vec<DataBlock>,
    pub content: Vec<ContentBlock>,
}

impl Config {
    pub fn document(&self, name: &str) -> Option<&Document> {
        self.documents.iter().find(|d| d.name == name)
    }
}
