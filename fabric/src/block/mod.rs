pub mod reference;

use std::fmt;

use crate::block::reference::Reference;
use crate::body::Attributes;
use crate::diagnostic::Span;

/// Block type that borrows its fields from another block via `ref`.
pub const REF_TYPE: &str = "ref";

/// Content block type that renders nothing itself and only groups children.
pub const GROUP_TYPE: &str = "group";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    Content,
    Data,
    /// Container-only kind; never evaluated by a plugin.
    Document,
}

impl BlockKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BlockKind::Content => "content",
            BlockKind::Data => "data",
            BlockKind::Document => "document",
        }
    }

    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "content" => Some(BlockKind::Content),
            "data" => Some(BlockKind::Data),
            "document" => Some(BlockKind::Document),
            _ => None,
        }
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descriptive metadata from an optional `meta` sub-block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Meta {
    pub name: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
}

/// Fields shared by content and data blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub kind: BlockKind,
    /// Selects the plugin that evaluates the block.
    pub block_type: String,
    /// Disambiguates blocks of the same type.
    pub name: String,
    pub meta: Option<Meta>,
    /// Free-form, unevaluated attributes.
    pub attrs: Attributes,
    /// The `ref` path of a ref block, kept after resolution for reporting.
    pub reference: Option<Reference>,
    /// Set once decoding succeeded. A decoded block is never mutated again.
    pub decoded: bool,
    pub span: Option<Span>,
}

impl Block {
    pub fn new(kind: BlockKind, block_type: impl Into<String>, name: impl Into<String>) -> Self {
        Block {
            kind,
            block_type: block_type.into(),
            name: name.into(),
            meta: None,
            attrs: Attributes::new(),
            reference: None,
            decoded: false,
            span: None,
        }
    }

    pub fn is_ref(&self) -> bool {
        self.block_type == REF_TYPE
    }

    /// Dotted address such as `content.text.intro`.
    pub fn address(&self) -> String {
        format!("{}.{}.{}", self.kind, self.block_type, self.name)
    }
}

/// A content block: rendered to text by a content plugin.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentBlock {
    pub block: Block,
    /// Query narrowing the data dictionary for this block.
    pub query: Option<String>,
    pub title: Option<String>,
    pub children: Vec<ContentBlock>,
}

impl ContentBlock {
    pub fn new(block_type: impl Into<String>, name: impl Into<String>) -> Self {
        ContentBlock {
            block: Block::new(BlockKind::Content, block_type, name),
            query: None,
            title: None,
            children: Vec::new(),
        }
    }

    pub fn is_group(&self) -> bool {
        self.block.block_type == GROUP_TYPE
    }

    /// Visit this block and its descendants in document (pre-)order,
    /// passing each block's nesting depth.
    pub fn walk<'a>(&'a self, depth: usize, visit: &mut dyn FnMut(&'a ContentBlock, usize)) {
        visit(self, depth);
        for child in &self.children {
            child.walk(depth + 1, visit);
        }
    }
}

/// A data block: executed by a data plugin; never nests.
#[derive(Debug, Clone, PartialEq)]
pub struct DataBlock {
    pub block: Block,
}

impl DataBlock {
    pub fn new(block_type: impl Into<String>, name: impl Into<String>) -> Self {
        DataBlock {
            block: Block::new(BlockKind::Data, block_type, name),
        }
    }
}
