use fabric::expression::Expression;
use fabric::loader::load_str;
use pretty_assertions::assert_eq;
use serde_json::json;

#[test]
fn blocks_and_attributes_in_document_order() {
    let body = load_str(
        r#"
title = "Report"

[[data]]
type = "inline"
name = "numbers"
items = [1, 2, 3]

[[document]]
name = "report"

[[document.content]]
type = "text"
name = "intro"
text = "Hello"

[[document.content]]
type = "text"
name = "outro"
text = "Bye"
"#,
        0,
    )
    .expect("load failed");

    assert_eq!(body.attributes.keys().collect::<Vec<_>>(), vec!["title"]);
    let keywords: Vec<_> = body.blocks.iter().map(|b| b.keyword.as_str()).collect();
    assert_eq!(keywords, vec!["data", "document"]);

    let data = &body.blocks[0];
    let labels: Vec<_> = data.labels.iter().map(|l| l.value.as_str()).collect();
    assert_eq!(labels, vec!["inline", "numbers"]);
    assert_eq!(data.body.attributes.keys().collect::<Vec<_>>(), vec!["items"]);
    assert_eq!(data.body.attributes["items"].expr.evaluate(), Ok(json!([1, 2, 3])));

    let document = &body.blocks[1];
    assert_eq!(document.labels[0].value, "report");
    let names: Vec<_> = document
        .body
        .blocks
        .iter()
        .map(|b| b.labels[1].value.as_str())
        .collect();
    assert_eq!(names, vec!["intro", "outro"]);
}

#[test]
fn ref_is_written_as_an_interpolated_traversal() {
    let body = load_str(
        r#"
[[content]]
type = "ref"
name = "copy"
ref = "${content.text.intro}"
"#,
        0,
    )
    .expect("load failed");
    let expr = &body.blocks[0].body.attributes["ref"].expr;
    assert_eq!(
        expr,
        &Expression::Traversal(vec!["content".into(), "text".into(), "intro".into()])
    );
}

#[test]
fn block_keyword_with_scalar_value_is_an_attribute() {
    let body = load_str("meta = \"not a block\"\n", 0).expect("load failed");
    assert!(body.blocks.is_empty());
    assert!(body.attributes.contains_key("meta"));
}

#[test]
fn missing_labels_are_left_for_decoding() {
    let body = load_str("[[content]]\ntype = \"text\"\n", 0).expect("load failed");
    assert_eq!(body.blocks[0].labels.len(), 1);
}

#[test]
fn toml_syntax_error_has_a_subject() {
    let diags = load_str("title = \n", 3).expect_err("load should fail");
    assert!(diags.has_errors());
    let first = diags.iter().next().expect("one diagnostic");
    assert_eq!(first.summary, "Failed to parse the file");
    assert_eq!(first.subject.as_ref().map(|s| s.file_id), Some(3));
}

#[test]
fn invalid_expression_is_reported() {
    let diags = load_str("[[data]]\ntype = \"inline\"\nname = \"x\"\nv = \"${1 +}\"\n", 0)
        .expect_err("load should fail");
    assert_eq!(diags.error_count(), 1);
    assert_eq!(diags.iter().next().map(|d| d.summary.as_str()), Some("Invalid expression"));
}

#[test]
fn non_string_label_is_reported() {
    let diags = load_str("[[data]]\ntype = 1\nname = \"x\"\n", 0).expect_err("load should fail");
    assert_eq!(diags.iter().next().map(|d| d.summary.as_str()), Some("Invalid block label"));
}
