//! Path traversal over the decoded tree.
//!
//! A path starts at the file root and alternates kind names with labels:
//! `document.<name>`, `content.<type>.<name>`, `data.<type>.<name>`.
//! Documents give access to their content and data blocks; content blocks
//! to their nested content blocks. Every block passed through, including
//! the last one, must already be decoded.

use fabric::block::reference::Reference;
use fabric::{BlockKind, Config, ContentBlock, DataBlock, Diagnostic, Document, Span};

#[derive(Debug, Clone, Copy)]
pub enum Target<'a> {
    Document(&'a Document),
    Content(&'a ContentBlock),
    Data(&'a DataBlock),
}

impl Target<'_> {
    pub fn kind(&self) -> BlockKind {
        match self {
            Target::Document(_) => BlockKind::Document,
            Target::Content(_) => BlockKind::Content,
            Target::Data(_) => BlockKind::Data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TraversalError {
    #[error("reference `{path}` ends early: expected {expected}")]
    Incomplete { path: String, expected: &'static str },
    #[error("`{segment}` in `{path}` is not a block kind; expected document, content or data")]
    UnknownKind { path: String, segment: String },
    #[error("`{address}` does not exist; a block can only reference blocks defined before it")]
    NotFound { path: String, address: String },
    #[error("`{path}` points to a {found} block, but a {expected} block is required")]
    KindMismatch {
        path: String,
        expected: BlockKind,
        found: BlockKind,
    },
    #[error("`{address}` failed to decode or is not decoded yet")]
    NotDecoded { path: String, address: String },
    #[error("a {from} cannot contain {into} blocks (in `{path}`)")]
    CannotDescend {
        path: String,
        from: &'static str,
        into: String,
    },
}

impl TraversalError {
    pub fn to_diagnostic(&self, subject: Option<Span>) -> Diagnostic {
        Diagnostic::error("Invalid reference")
            .with_detail(self.to_string())
            .with_subject(subject)
    }
}

#[derive(Clone, Copy)]
enum Cursor<'a> {
    Root,
    Document(&'a Document),
    Content(&'a ContentBlock),
    Data(&'a DataBlock),
}

/// Follow `reference` from the root of `config`.
pub fn traverse<'a>(config: &'a Config, reference: &Reference) -> Result<Target<'a>, TraversalError> {
    let path = reference.to_string();
    let segments = &reference.segments;
    if segments.is_empty() {
        return Err(TraversalError::Incomplete {
            path,
            expected: "a block kind",
        });
    }

    let mut cursor = Cursor::Root;
    let mut address = String::new();
    let mut i = 0;

    while i < segments.len() {
        let kind = segments[i].as_str();
        let label = |offset: usize, expected: &'static str| {
            segments.get(i + offset).map(String::as_str).ok_or(TraversalError::Incomplete {
                path: path.clone(),
                expected,
            })
        };

        match BlockKind::from_keyword(kind) {
            None => {
                return Err(TraversalError::UnknownKind {
                    path,
                    segment: kind.to_string(),
                });
            }
            Some(BlockKind::Document) => {
                if !matches!(cursor, Cursor::Root) {
                    return Err(cannot_descend(&path, cursor, kind));
                }
                let name = label(1, "a document name")?;
                address = format!("document.{}", name);
                let document = config.document(name).ok_or_else(|| TraversalError::NotFound {
                    path: path.clone(),
                    address: address.clone(),
                })?;
                cursor = Cursor::Document(document);
                i += 2;
            }
            Some(BlockKind::Content) => {
                let block_type = label(1, "a block type")?;
                let name = label(2, "a block name")?;
                let candidates: &[ContentBlock] = match cursor {
                    Cursor::Root => &config.content,
                    Cursor::Document(document) => &document.content,
                    Cursor::Content(parent) => &parent.children,
                    Cursor::Data(_) => return Err(cannot_descend(&path, cursor, kind)),
                };
                address = join_address(&address, kind, block_type, name);
                let found = candidates
                    .iter()
                    .find(|c| c.block.block_type == block_type && c.block.name == name)
                    .ok_or_else(|| TraversalError::NotFound {
                        path: path.clone(),
                        address: address.clone(),
                    })?;
                if !found.block.decoded {
                    return Err(TraversalError::NotDecoded { path, address });
                }
                cursor = Cursor::Content(found);
                i += 3;
            }
            Some(BlockKind::Data) => {
                let block_type = label(1, "a block type")?;
                let name = label(2, "a block name")?;
                let candidates: &[DataBlock] = match cursor {
                    Cursor::Root => &config.data,
                    Cursor::Document(document) => &document.data,
                    Cursor::Content(_) | Cursor::Data(_) => return Err(cannot_descend(&path, cursor, kind)),
                };
                address = join_address(&address, kind, block_type, name);
                let found = candidates
                    .iter()
                    .find(|d| d.block.block_type == block_type && d.block.name == name)
                    .ok_or_else(|| TraversalError::NotFound {
                        path: path.clone(),
                        address: address.clone(),
                    })?;
                if !found.block.decoded {
                    return Err(TraversalError::NotDecoded { path, address });
                }
                cursor = Cursor::Data(found);
                i += 3;
            }
        }
    }

    Ok(match cursor {
        Cursor::Document(document) => Target::Document(document),
        Cursor::Content(content) => Target::Content(content),
        Cursor::Data(data) => Target::Data(data),
        // The loop runs at least once and every arm moves the cursor.
        Cursor::Root => {
            return Err(TraversalError::Incomplete {
                path,
                expected: "a block kind",
            });
        }
    })
}

/// Follow `reference` and require a content block at the end.
pub fn find_content<'a>(config: &'a Config, reference: &Reference) -> Result<&'a ContentBlock, TraversalError> {
    match traverse(config, reference)? {
        Target::Content(content) => Ok(content),
        other => Err(mismatch(reference, BlockKind::Content, other.kind())),
    }
}

/// Follow `reference` and require a data block at the end.
pub fn find_data<'a>(config: &'a Config, reference: &Reference) -> Result<&'a DataBlock, TraversalError> {
    match traverse(config, reference)? {
        Target::Data(data) => Ok(data),
        other => Err(mismatch(reference, BlockKind::Data, other.kind())),
    }
}

fn mismatch(reference: &Reference, expected: BlockKind, found: BlockKind) -> TraversalError {
    TraversalError::KindMismatch {
        path: reference.to_string(),
        expected,
        found,
    }
}

fn cannot_descend(path: &str, cursor: Cursor<'_>, into: &str) -> TraversalError {
    let from = match cursor {
        Cursor::Root => "file",
        Cursor::Document(_) => "document",
        Cursor::Content(_) => "content block",
        Cursor::Data(_) => "data block",
    };
    TraversalError::CannotDescend {
        path: path.to_string(),
        from,
        into: into.to_string(),
    }
}

fn join_address(prefix: &str, kind: &str, block_type: &str, name: &str) -> String {
    if prefix.is_empty() {
        format!("{}.{}.{}", kind, block_type, name)
    } else {
        format!("{}.{}.{}.{}", prefix, kind, block_type, name)
    }
}
