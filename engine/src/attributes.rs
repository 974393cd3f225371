use fabric::{Block, Diagnostic, Diagnostics, Value};
use serde_json::Map;

/// Force every attribute of `block` into a concrete value.
///
/// An attribute that fails to evaluate is reported as a warning and left
/// out of the result; it never fails the block as a whole.
pub fn evaluate_attributes(block: &Block) -> (Value, Diagnostics) {
    let mut values = Map::new();
    let mut diagnostics = Diagnostics::new();
    for (name, attr) in &block.attrs {
        match attr.expr.evaluate() {
            Ok(value) => {
                values.insert(name.clone(), value);
            }
            Err(error) => diagnostics.push(
                Diagnostic::warning("Failed to evaluate attribute")
                    .with_detail(format!("`{}` of {}: {}; the attribute is omitted", name, block.address(), error))
                    .with_subject(attr.span.clone()),
            ),
        }
    }
    (Value::Object(values), diagnostics)
}

#[cfg(test)]
mod tests {
    use fabric::expression::parse_expression;
    use fabric::{Attribute, BlockKind};
    use serde_json::json;

    use super::*;

    #[test]
    fn failing_attribute_is_omitted_with_a_warning() {
        let mut block = Block::new(BlockKind::Data, "inline", "mixed");
        for (name, source) in [("ok", "1 + 1"), ("broken", "1 / 0"), ("text", "upper(\"x\")")] {
            let expr = parse_expression(source).expect("parse failed");
            block.attrs.insert(name.to_string(), Attribute::new(name, expr));
        }

        let (values, diagnostics) = evaluate_attributes(&block);

        assert_eq!(values, json!({"ok": 2, "text": "X"}));
        assert_eq!(diagnostics.len(), 1);
        assert!(!diagnostics.has_errors());
    }
}
