use engine::Registry;
use engine::attributes::evaluate_attributes;
use engine::resolver::{Target, decode, traverse};
use fabric::block::reference::Reference;
use fabric::loader::load_str;
use fabric::{Config, Diagnostics, Severity};
use pretty_assertions::assert_eq;
use serde_json::json;

fn decode_toml(source: &str) -> (Config, Diagnostics) {
    let body = load_str(source, 0).expect("load failed");
    decode(&Registry::builtin(), &body)
}

fn summaries(diagnostics: &Diagnostics) -> Vec<(Severity, String)> {
    diagnostics.iter().map(|d| (d.severity, d.summary.clone())).collect()
}

fn reference(path: &str) -> Reference {
    Reference {
        segments: path.split('.').map(str::to_string).collect(),
        span: None,
    }
}

#[test]
fn ref_block_merges_target_fields() {
    let (config, diagnostics) = decode_toml(
        r#"
[[data]]
type = "inline"
name = "target"
a = 2
b = 3

[[data]]
type = "ref"
name = "copy"
ref = "${data.inline.target}"
a = 1
"#,
    );
    assert!(diagnostics.is_empty(), "{}", diagnostics);

    let copy = &config.data[1].block;
    assert!(copy.decoded);
    assert_eq!(copy.block_type, "inline");
    assert_eq!(copy.name, "copy");
    assert_eq!(copy.reference.as_ref().map(ToString::to_string).as_deref(), Some("data.inline.target"));
    let (attrs, warnings) = evaluate_attributes(copy);
    assert!(warnings.is_empty());
    assert_eq!(attrs, json!({"a": 1, "b": 3}));
}

#[test]
fn content_ref_copies_query_and_title_only_when_absent() {
    let (config, diagnostics) = decode_toml(
        r#"
[[content]]
type = "text"
name = "target"
title = "Target title"
query = ".data"
text = "target text"

[[content]]
type = "ref"
name = "copy"
ref = "${content.text.target}"
title = "Own title"
"#,
    );
    assert!(diagnostics.is_empty(), "{}", diagnostics);
    let copy = &config.content[1];
    assert_eq!(copy.block.block_type, "text");
    assert_eq!(copy.title.as_deref(), Some("Own title"));
    assert_eq!(copy.query.as_deref(), Some(".data"));
    assert!(copy.block.attrs.contains_key("text"));
}

#[test]
fn forward_reference_is_rejected() {
    let (config, diagnostics) = decode_toml(
        r#"
[[data]]
type = "ref"
name = "early"
ref = "${data.inline.late}"

[[data]]
type = "inline"
name = "late"
"#,
    );
    assert_eq!(summaries(&diagnostics), vec![(Severity::Error, "Invalid reference".to_string())]);
    assert!(!config.data[0].block.decoded);
    assert!(config.data[1].block.decoded);
}

#[test]
fn self_reference_is_rejected() {
    let (config, diagnostics) = decode_toml(
        r#"
[[content]]
type = "ref"
name = "me"
ref = "${content.ref.me}"
"#,
    );
    assert!(diagnostics.has_errors());
    assert!(!config.content[0].block.decoded);
}

#[test]
fn reference_to_failed_block_is_rejected() {
    let (config, diagnostics) = decode_toml(
        r#"
[[data]]
type = "inline"
name = "broken"

[[data.document]]
name = "nope"

[[data]]
type = "ref"
name = "copy"
ref = "${data.inline.broken}"
"#,
    );
    assert_eq!(
        summaries(&diagnostics),
        vec![
            (Severity::Error, "Unexpected block".to_string()),
            (Severity::Error, "Invalid reference".to_string()),
        ]
    );
    let detail = diagnostics.iter().nth(1).and_then(|d| d.detail.clone()).unwrap_or_default();
    assert!(detail.contains("not decoded"), "{}", detail);
    assert!(!config.data[0].block.decoded);
    assert!(!config.data[1].block.decoded);
}

#[test]
fn content_ref_cannot_target_data() {
    let (config, diagnostics) = decode_toml(
        r#"
[[data]]
type = "inline"
name = "numbers"

[[content]]
type = "ref"
name = "copy"
ref = "${data.inline.numbers}"
"#,
    );
    assert_eq!(summaries(&diagnostics), vec![(Severity::Error, "Invalid reference".to_string())]);
    assert!(!config.content[0].block.decoded);
}

#[test]
fn ref_without_path_is_an_error() {
    let (config, diagnostics) = decode_toml(
        r#"
[[content]]
type = "ref"
name = "dangling"
"#,
    );
    assert_eq!(summaries(&diagnostics), vec![(Severity::Error, "Missing reference".to_string())]);
    assert!(!config.content[0].block.decoded);
}

#[test]
fn ref_must_be_a_path() {
    let (_, diagnostics) = decode_toml(
        r#"
[[content]]
type = "ref"
name = "literal"
ref = "content.text.intro"
"#,
    );
    assert_eq!(summaries(&diagnostics), vec![(Severity::Error, "Invalid reference".to_string())]);
}

#[test]
fn traversal_through_documents_and_nested_content() {
    let (config, diagnostics) = decode_toml(
        r#"
[[document]]
name = "report"

[[document.content]]
type = "text"
name = "intro"
text = "Hello"

[[document.content.content]]
type = "text"
name = "nested"
text = "Inner"

[[content]]
type = "ref"
name = "copy"
ref = "${document.report.content.text.intro.content.text.nested}"
"#,
    );
    assert!(diagnostics.is_empty(), "{}", diagnostics);
    let copy = &config.content[0];
    assert!(copy.block.decoded);
    let (attrs, _) = evaluate_attributes(&copy.block);
    assert_eq!(attrs, json!({"text": "Inner"}));

    match traverse(&config, &reference("document.report")) {
        Ok(Target::Document(document)) => assert_eq!(document.name, "report"),
        other => panic!("expected the document, got {:?}", other),
    }
}

#[test]
fn later_document_children_can_reference_earlier_siblings() {
    let (config, diagnostics) = decode_toml(
        r#"
[[document]]
name = "report"

[[document.data]]
type = "inline"
name = "base"
x = 1

[[document.data]]
type = "ref"
name = "derived"
ref = "${document.report.data.inline.base}"
"#,
    );
    assert!(diagnostics.is_empty(), "{}", diagnostics);
    let document = config.document("report").expect("document exists");
    assert!(document.data[1].block.decoded);
    assert_eq!(document.data[1].block.block_type, "inline");
}

#[test]
fn traversal_errors() {
    let (config, _) = decode_toml(
        r#"
[[data]]
type = "inline"
name = "numbers"

[[document]]
name = "report"
"#,
    );
    let cases = [
        ("content.text", "ends early"),
        ("widget.text.intro", "not a block kind"),
        ("content.text.missing", "does not exist"),
        ("data.inline.numbers.content.text.x", "cannot contain"),
        ("document.report.document.other", "cannot contain"),
    ];
    for (path, expected) in cases {
        let error = traverse(&config, &reference(path)).expect_err(path);
        assert!(error.to_string().contains(expected), "{}: {}", path, error);
    }
}

#[test]
fn nested_children_are_inherited_only_when_none_declared() {
    let (config, diagnostics) = decode_toml(
        r#"
[[content]]
type = "group"
name = "section"

[[content.content]]
type = "text"
name = "a"
text = "A"

[[content]]
type = "ref"
name = "inherits"
ref = "${content.group.section}"

[[content]]
type = "ref"
name = "overrides"
ref = "${content.group.section}"

[[content.content]]
type = "text"
name = "own"
text = "Own"
"#,
    );
    assert!(diagnostics.is_empty(), "{}", diagnostics);
    let names = |i: usize| -> Vec<String> { config.content[i].children.iter().map(|c| c.block.name.clone()).collect() };
    assert_eq!(names(1), vec!["a"]);
    assert_eq!(names(2), vec!["own"]);
}

#[test]
fn unknown_type_is_a_warning_and_block_still_decodes() {
    let (config, diagnostics) = decode_toml(
        r#"
[[content]]
type = "chart"
name = "sales"
"#,
    );
    assert_eq!(summaries(&diagnostics), vec![(Severity::Warning, "Unknown block type".to_string())]);
    assert!(config.content[0].block.decoded);
}

#[test]
fn ref_on_plain_block_is_ignored_with_a_warning() {
    let (config, diagnostics) = decode_toml(
        r#"
[[content]]
type = "text"
name = "a"
text = "A"

[[content]]
type = "text"
name = "b"
text = "B"
ref = "${content.text.a}"
"#,
    );
    assert_eq!(summaries(&diagnostics), vec![(Severity::Warning, "Unused reference".to_string())]);
    let b = &config.content[1].block;
    assert!(b.decoded);
    assert!(b.reference.is_none());
    assert!(!b.attrs.contains_key("ref"));
}

#[test]
fn config_and_vars_blocks_are_tolerated() {
    let (config, diagnostics) = decode_toml(
        r#"
[[content]]
type = "text"
name = "a"
text = "A"

[content.config]
flavor = "plain"

[content.vars]
x = 1
"#,
    );
    assert!(diagnostics.is_empty(), "{}", diagnostics);
    assert!(config.content[0].block.decoded);
    assert_eq!(config.content[0].block.attrs.keys().collect::<Vec<_>>(), vec!["text"]);
}

#[test]
fn own_messages_come_before_nested_block_messages() {
    let (config, diagnostics) = decode_toml(
        r#"
[[content]]
type = "group"
name = "parent"

[[content.content]]
type = "chart"
name = "child"

[[content.data]]
type = "inline"
name = "misplaced"
"#,
    );
    assert_eq!(
        summaries(&diagnostics),
        vec![
            (Severity::Error, "Unexpected block".to_string()),
            (Severity::Warning, "Unknown block type".to_string()),
        ]
    );
    let parent = &config.content[0];
    assert!(!parent.block.decoded);
    assert!(parent.children[0].block.decoded);
}

#[test]
fn labels_meta_and_fields_are_validated() {
    let (config, diagnostics) = decode_toml(
        r#"
[[content]]
type = "text"

[[content]]
type = "text"
name = "bad-title"
title = 42

[[content]]
type = "text"
name = "described"
text = "x"

[content.meta]
name = "Described"
description = "A block with metadata"
tags = ["a", "b"]
"#,
    );
    assert_eq!(
        summaries(&diagnostics),
        vec![
            (Severity::Error, "Invalid block labels".to_string()),
            (Severity::Error, "Invalid `title`".to_string()),
        ]
    );
    let meta = config.content[2].block.meta.clone().expect("meta decoded");
    assert_eq!(meta.name.as_deref(), Some("Described"));
    assert_eq!(meta.tags, vec!["a", "b"]);
}

#[test]
fn duplicate_documents_are_rejected() {
    let (config, diagnostics) = decode_toml(
        r#"
[[document]]
name = "report"

[[document]]
name = "report"
"#,
    );
    assert_eq!(summaries(&diagnostics), vec![(Severity::Error, "Duplicate document".to_string())]);
    assert_eq!(config.documents.len(), 1);
}
