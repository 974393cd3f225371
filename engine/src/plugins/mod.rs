//! Builtin plugins registered by [`Registry::builtin`](crate::plugin::Registry::builtin).

use fabric::expression::stringify;
use serde_json::Value;

use crate::plugin::{ContentPlugin, DataPlugin, PluginError};
use crate::query;

/// Data plugin `inline`: the block's evaluated attributes are its result.
pub struct Inline;

impl DataPlugin for Inline {
    fn execute(&self, attrs: &Value) -> Result<Value, PluginError> {
        match attrs {
            Value::Object(_) => Ok(attrs.clone()),
            _ => Err(PluginError::new("Invalid attributes").with_detail("inline data expects an attribute map")),
        }
    }
}

/// Content plugin `text`: renders the `text` attribute, replacing each
/// `{{ query }}` with the query's output against the block's context.
pub struct Text;

impl ContentPlugin for Text {
    fn execute(&self, attrs: &Value, context: &Value) -> Result<String, PluginError> {
        let text = required_str(attrs, "text")?;
        render_placeholders(text, context)
    }
}

/// Content plugin `json`: renders `value`, or the context's `query_result`,
/// as a fenced JSON code block.
pub struct Json;

impl ContentPlugin for Json {
    fn execute(&self, attrs: &Value, context: &Value) -> Result<String, PluginError> {
        let value = attrs
            .get("value")
            .or_else(|| context.get("query_result"))
            .ok_or_else(|| {
                PluginError::new("Nothing to render")
                    .with_detail("json content needs a `value` attribute or a `query` on the block")
            })?;
        let pretty = serde_json::to_string_pretty(value)
            .map_err(|e| PluginError::new("Failed to encode JSON").with_detail(e.to_string()))?;
        Ok(format!("```json\n{}\n```", pretty))
    }
}

fn required_str<'a>(attrs: &'a Value, name: &str) -> Result<&'a str, PluginError> {
    match attrs.get(name) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(PluginError::new("Invalid attribute")
            .with_detail(format!("`{}` must be a string, got {}", name, fabric::expression::type_name(other)))),
        None => Err(PluginError::new("Missing required attribute").with_detail(format!("`{}` is required", name))),
    }
}

fn render_placeholders(text: &str, context: &Value) -> Result<String, PluginError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            return Err(PluginError::new("Unterminated placeholder").with_detail(format!("no `}}}}` after `{}`", rest)));
        };
        let source = after[..end].trim();
        let values = query::run(source, context).map_err(|e| {
            PluginError::new("Failed to render placeholder").with_detail(format!("`{}`: {}", source, e))
        })?;
        let rendered: Vec<String> = values.iter().map(stringify).collect();
        out.push_str(&rendered.join(", "));
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn placeholders_are_replaced() {
        let context = json!({"data": {"inline": {"user": {"name": "Ada", "langs": ["en", "fr"]}}}});
        let rendered = render_placeholders(
            "Hi {{ .data.inline.user.name }} ({{.data.inline.user.langs[]}})",
            &context,
        );
        assert_eq!(rendered, Ok("Hi Ada (en, fr)".to_string()));
    }

    #[test]
    fn text_without_placeholders_is_verbatim() {
        assert_eq!(render_placeholders("plain", &json!({})), Ok("plain".to_string()));
    }

    #[test]
    fn unterminated_placeholder_fails() {
        assert!(render_placeholders("oops {{ .a", &json!({})).is_err());
    }
}
