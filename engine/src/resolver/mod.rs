//! Decodes raw blocks into typed blocks and resolves `ref` links.
//!
//! Decoding is a single forward pass over the file: root blocks in order,
//! and each document's children in order. A document is attached to the
//! tree before its children are decoded, so a block may reference any
//! block decoded before it and nothing else. This is what keeps reference
//! chains acyclic.
//!
//! Blocks that fail to decode stay in the tree with `decoded == false`;
//! referencing or evaluating them is an error later on.

pub mod merge;
pub mod traversal;

use fabric::block::GROUP_TYPE;
use fabric::block::reference::Reference;
use fabric::expression::{Expression, stringify, type_name};
use fabric::{
    Attributes, Block, BlockKind, Config, ContentBlock, DataBlock, Diagnostic, Diagnostics, Document, Meta, RawBlock,
    RawBody, Value,
};

use crate::plugin::Registry;

pub use traversal::{Target, TraversalError, find_content, find_data, traverse};

/// Nested block names that belong to plugin configuration and variable
/// definitions. They are skipped rather than rejected.
pub const TOLERATED_BLOCKS: &[&str] = &["config", "vars"];

pub struct Resolver<'r> {
    registry: &'r Registry,
    config: Config,
    diagnostics: Diagnostics,
}

impl<'r> Resolver<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Resolver {
            registry,
            config: Config::default(),
            diagnostics: Diagnostics::new(),
        }
    }

    /// Continue decoding on top of an already decoded tree.
    pub fn with_config(registry: &'r Registry, config: Config) -> Self {
        Resolver {
            registry,
            config,
            diagnostics: Diagnostics::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Decode every block of a file body, appending to the tree built so far.
    pub fn decode_body(&mut self, body: &RawBody) {
        for attr in body.attributes.values() {
            self.diagnostics.push(
                Diagnostic::warning("Unused attribute")
                    .with_detail(format!("`{}` is not allowed at the top level and is ignored", attr.name))
                    .with_subject(attr.span.clone()),
            );
        }
        for raw in &body.blocks {
            match raw.keyword.as_str() {
                "document" => self.decode_document(raw),
                "content" => {
                    let (block, diagnostics) = decode_content(self.registry, &self.config, raw);
                    self.diagnostics.extend(diagnostics);
                    self.config.content.push(block);
                }
                "data" => {
                    let (block, diagnostics) = decode_data(self.registry, &self.config, raw);
                    self.diagnostics.extend(diagnostics);
                    self.config.data.push(block);
                }
                keyword if TOLERATED_BLOCKS.contains(&keyword) => {
                    tracing::debug!(keyword, "skipping block outside the evaluation core");
                }
                keyword => self.diagnostics.push(unexpected_block(raw, keyword, "the top level")),
            }
        }
    }

    pub fn finish(self) -> (Config, Diagnostics) {
        (self.config, self.diagnostics)
    }

    fn decode_document(&mut self, raw: &RawBlock) {
        let Some(name) = labels(raw, 1, &mut self.diagnostics).and_then(|labels| labels.into_iter().next()) else {
            return;
        };
        if self.config.document(&name).is_some() {
            self.diagnostics.push(
                Diagnostic::error("Duplicate document")
                    .with_detail(format!("a document named `{}` is already defined", name))
                    .with_subject(raw.span.clone()),
            );
            return;
        }

        let mut document = Document::new(&name);
        document.span = raw.span.clone();
        document.meta = decode_meta_blocks(raw, &mut self.diagnostics);
        for attr in raw.body.attributes.values() {
            self.diagnostics.push(
                Diagnostic::warning("Unused attribute")
                    .with_detail(format!("documents take no attributes; `{}` is ignored", attr.name))
                    .with_subject(attr.span.clone()),
            );
        }

        // Attach first so later children can reference earlier siblings
        // through `document.<name>`.
        self.config.documents.push(document);
        let index = self.config.documents.len() - 1;

        for child in &raw.body.blocks {
            match child.keyword.as_str() {
                "content" => {
                    let (block, diagnostics) = decode_content(self.registry, &self.config, child);
                    self.diagnostics.extend(diagnostics);
                    self.config.documents[index].content.push(block);
                }
                "data" => {
                    let (block, diagnostics) = decode_data(self.registry, &self.config, child);
                    self.diagnostics.extend(diagnostics);
                    self.config.documents[index].data.push(block);
                }
                "meta" => {}
                keyword if TOLERATED_BLOCKS.contains(&keyword) => {
                    tracing::debug!(document = %name, keyword, "skipping block outside the evaluation core");
                }
                keyword => self.diagnostics.push(unexpected_block(child, keyword, "a document")),
            }
        }
        tracing::debug!(document = %name, "decoded document");
    }
}

/// Decode a whole file body in one pass.
pub fn decode(registry: &Registry, body: &RawBody) -> (Config, Diagnostics) {
    let mut resolver = Resolver::new(registry);
    resolver.decode_body(body);
    resolver.finish()
}

// ---------------------------------------------------------------------------
// Block decoding
// ---------------------------------------------------------------------------

/// Fields consumed before the free-form attributes.
#[derive(Default)]
struct Fields {
    reference: Option<Reference>,
    query: Option<String>,
    title: Option<String>,
    meta: Option<Meta>,
}

/// Decode a content block and, recursively, its nested content blocks.
pub fn decode_content(registry: &Registry, config: &Config, raw: &RawBlock) -> (ContentBlock, Diagnostics) {
    let mut diagnostics = Diagnostics::new();
    let (block_type, name) = type_and_name(raw, &mut diagnostics);
    let mut content = ContentBlock::new(block_type, name);
    content.block.span = raw.span.clone();
    if diagnostics.has_errors() {
        return (content, diagnostics);
    }

    let fields = decode_fields(BlockKind::Content, raw, &mut diagnostics);
    if diagnostics.has_errors() {
        return (content, diagnostics);
    }
    content.block.reference = fields.reference;
    content.block.meta = fields.meta;
    content.query = fields.query;
    content.title = fields.title;

    // Children first; their messages are reported after this block's own.
    let mut deferred = Diagnostics::new();
    for child in raw.body.blocks.iter().filter(|b| b.keyword == "content") {
        let (child, child_diagnostics) = decode_content(registry, config, child);
        deferred.extend(child_diagnostics);
        content.children.push(child);
    }

    let mut own = Diagnostics::new();
    content.block.attrs = remaining_attributes(BlockKind::Content, raw, &mut own);
    let failed = own.has_errors();
    diagnostics.extend(own);
    diagnostics.extend(deferred);
    if failed {
        return (content, diagnostics);
    }

    if content.block.is_ref() {
        match follow(&content.block, &mut diagnostics) {
            Some(reference) => match find_content(config, &reference) {
                Ok(target) => merge::merge_content(&mut content, target),
                Err(error) => {
                    diagnostics.push(error.to_diagnostic(reference.span.clone()));
                    return (content, diagnostics);
                }
            },
            None => return (content, diagnostics),
        }
    } else {
        check_plain_block(registry, &mut content.block, &mut diagnostics);
    }
    content.block.decoded = true;
    tracing::debug!(block = %content.block.address(), "decoded block");
    (content, diagnostics)
}

/// Decode a data block. Data blocks never nest.
pub fn decode_data(registry: &Registry, config: &Config, raw: &RawBlock) -> (DataBlock, Diagnostics) {
    let mut diagnostics = Diagnostics::new();
    let (block_type, name) = type_and_name(raw, &mut diagnostics);
    let mut data = DataBlock::new(block_type, name);
    data.block.span = raw.span.clone();
    if diagnostics.has_errors() {
        return (data, diagnostics);
    }

    let fields = decode_fields(BlockKind::Data, raw, &mut diagnostics);
    if diagnostics.has_errors() {
        return (data, diagnostics);
    }
    data.block.reference = fields.reference;
    data.block.meta = fields.meta;

    data.block.attrs = remaining_attributes(BlockKind::Data, raw, &mut diagnostics);
    if diagnostics.has_errors() {
        return (data, diagnostics);
    }

    if data.block.is_ref() {
        let Some(reference) = follow(&data.block, &mut diagnostics) else {
            return (data, diagnostics);
        };
        match find_data(config, &reference) {
            Ok(target) => merge::merge_data(&mut data, target),
            Err(error) => {
                diagnostics.push(error.to_diagnostic(reference.span.clone()));
                return (data, diagnostics);
            }
        }
    } else {
        check_plain_block(registry, &mut data.block, &mut diagnostics);
    }
    data.block.decoded = true;
    tracing::debug!(block = %data.block.address(), "decoded block");
    (data, diagnostics)
}

fn labels(raw: &RawBlock, expected: usize, diagnostics: &mut Diagnostics) -> Option<Vec<String>> {
    if raw.labels.len() == expected {
        return Some(raw.labels.iter().map(|l| l.value.clone()).collect());
    }
    let wanted = match raw.keyword.as_str() {
        "document" => "a name",
        _ => "a type and a name",
    };
    diagnostics.push(
        Diagnostic::error("Invalid block labels")
            .with_detail(format!(
                "a {} block needs {}, found {} label(s)",
                raw.keyword,
                wanted,
                raw.labels.len()
            ))
            .with_subject(raw.span.clone()),
    );
    None
}

fn type_and_name(raw: &RawBlock, diagnostics: &mut Diagnostics) -> (String, String) {
    match labels(raw, 2, diagnostics) {
        Some(labels) => {
            let mut labels = labels.into_iter();
            (labels.next().unwrap_or_default(), labels.next().unwrap_or_default())
        }
        None => {
            let mut values = raw.labels.iter().map(|l| l.value.clone());
            (values.next().unwrap_or_default(), values.next().unwrap_or_default())
        }
    }
}

fn decode_fields(kind: BlockKind, raw: &RawBlock, diagnostics: &mut Diagnostics) -> Fields {
    let mut fields = Fields {
        meta: decode_meta_blocks(raw, diagnostics),
        ..Fields::default()
    };

    if let Some(attr) = raw.body.attributes.get("ref") {
        match &attr.expr {
            Expression::Traversal(_) => fields.reference = Reference::from_expression(&attr.expr, attr.span.clone()),
            // An explicitly empty ref counts as no ref at all.
            Expression::Literal(Value::Null) => {}
            Expression::Literal(Value::String(s)) if s.is_empty() => {}
            other => diagnostics.push(
                Diagnostic::error("Invalid reference")
                    .with_detail(format!(
                        "`ref` must be a block path such as \"${{content.text.intro}}\", found {}",
                        other
                    ))
                    .with_subject(attr.span.clone()),
            ),
        }
    }

    if kind == BlockKind::Content {
        fields.query = string_field(raw, "query", diagnostics);
        fields.title = string_field(raw, "title", diagnostics);
    }
    fields
}

fn string_field(raw: &RawBlock, name: &str, diagnostics: &mut Diagnostics) -> Option<String> {
    let attr = raw.body.attributes.get(name)?;
    match attr.expr.evaluate() {
        Ok(Value::String(s)) => Some(s),
        Ok(other) => {
            diagnostics.push(
                Diagnostic::error(format!("Invalid `{}`", name))
                    .with_detail(format!("`{}` must be a string, got {}", name, type_name(&other)))
                    .with_subject(attr.span.clone()),
            );
            None
        }
        Err(error) => {
            diagnostics.push(
                Diagnostic::error(format!("Failed to evaluate `{}`", name))
                    .with_detail(error.to_string())
                    .with_subject(attr.span.clone()),
            );
            None
        }
    }
}

fn decode_meta_blocks(raw: &RawBlock, diagnostics: &mut Diagnostics) -> Option<Meta> {
    let mut metas = raw.body.blocks.iter().filter(|b| b.keyword == "meta");
    let first = metas.next()?;
    if let Some(extra) = metas.next() {
        diagnostics.push(
            Diagnostic::error("Duplicate meta block")
                .with_detail("a block can have at most one `meta` block")
                .with_subject(extra.span.clone()),
        );
        return None;
    }
    Some(decode_meta(first, diagnostics))
}

fn decode_meta(raw: &RawBlock, diagnostics: &mut Diagnostics) -> Meta {
    let mut meta = Meta::default();
    for (name, attr) in &raw.body.attributes {
        let value = match attr.expr.evaluate() {
            Ok(value) => value,
            Err(error) => {
                diagnostics.push(
                    Diagnostic::error("Failed to evaluate meta attribute")
                        .with_detail(format!("`{}`: {}", name, error))
                        .with_subject(attr.span.clone()),
                );
                continue;
            }
        };
        match (name.as_str(), value) {
            ("name", Value::String(s)) => meta.name = Some(s),
            ("description", Value::String(s)) => meta.description = Some(s),
            ("tags", Value::Array(items)) => meta.tags = items.iter().map(stringify).collect(),
            ("name" | "description" | "tags", other) => diagnostics.push(
                Diagnostic::error("Invalid meta attribute")
                    .with_detail(format!("`{}` has the wrong type ({})", name, type_name(&other)))
                    .with_subject(attr.span.clone()),
            ),
            _ => diagnostics.push(
                Diagnostic::warning("Unknown meta attribute")
                    .with_detail(format!("`{}` is ignored", name))
                    .with_subject(attr.span.clone()),
            ),
        }
    }
    meta
}

/// Everything step one did not consume becomes a free-form attribute.
fn remaining_attributes(kind: BlockKind, raw: &RawBlock, diagnostics: &mut Diagnostics) -> Attributes {
    let consumed: &[&str] = match kind {
        BlockKind::Content => &["ref", "query", "title"],
        _ => &["ref"],
    };
    let attrs = raw
        .body
        .attributes
        .iter()
        .filter(|(name, _)| !consumed.contains(&name.as_str()))
        .map(|(name, attr)| (name.clone(), attr.clone()))
        .collect();

    for block in &raw.body.blocks {
        match block.keyword.as_str() {
            "meta" => {}
            "content" if kind == BlockKind::Content => {}
            keyword if TOLERATED_BLOCKS.contains(&keyword) => {
                tracing::debug!(keyword, "skipping block outside the evaluation core");
            }
            keyword => diagnostics.push(unexpected_block(block, keyword, &format!("a {} block", kind))),
        }
    }
    attrs
}

fn unexpected_block(raw: &RawBlock, keyword: &str, place: &str) -> Diagnostic {
    Diagnostic::error("Unexpected block")
        .with_detail(format!("`{}` blocks are not allowed in {}", keyword, place))
        .with_subject(raw.span.clone())
}

/// The reference of a ref block, or an error if it has none.
fn follow(block: &Block, diagnostics: &mut Diagnostics) -> Option<Reference> {
    match &block.reference {
        Some(reference) if !reference.is_empty() => Some(reference.clone()),
        _ => {
            diagnostics.push(
                Diagnostic::error("Missing reference")
                    .with_detail(format!(
                        "{} blocks of type `ref` need a `ref` attribute naming the target block",
                        block.kind
                    ))
                    .with_subject(block.span.clone()),
            );
            None
        }
    }
}

/// Steps for a block that is not a ref: the type must name a plugin (a
/// warning otherwise) and a stray `ref` attribute is dropped with a warning.
fn check_plain_block(registry: &Registry, block: &mut Block, diagnostics: &mut Diagnostics) {
    let transparent = block.kind == BlockKind::Content && block.block_type == GROUP_TYPE;
    if !transparent && !registry.knows(block.kind, &block.block_type) {
        let known = registry.types(block.kind).join(", ");
        diagnostics.push(
            Diagnostic::warning("Unknown block type")
                .with_detail(format!(
                    "no {} plugin named `{}` (known: {}); evaluating `{}` will fail",
                    block.kind,
                    block.block_type,
                    if known.is_empty() { "none" } else { known.as_str() },
                    block.address()
                ))
                .with_subject(block.span.clone()),
        );
    }
    if let Some(reference) = block.reference.take() {
        diagnostics.push(
            Diagnostic::warning("Unused reference")
                .with_detail(format!(
                    "`ref = {}` is ignored because `{}` is not of type `ref`",
                    reference,
                    block.address()
                ))
                .with_subject(reference.span.clone()),
        );
    }
}
