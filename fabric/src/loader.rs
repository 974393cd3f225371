//! Builds the raw attribute tree from a TOML document.
//!
//! Keys naming a block keyword (`document`, `content`, `data`, `meta`,
//! `config`, `vars`) whose value is a table or an array of tables become
//! nested blocks; every other key is an attribute. String values are
//! templates: `"${expr}"` embeds an expression.

use serde_json::{Number, Value};

use crate::body::{Attribute, Label, RawBlock, RawBody};
use crate::diagnostic::{Diagnostic, Diagnostics, Span};
use crate::expression::{Expression, ParseError, parse_template};

pub const BLOCK_KEYWORDS: &[&str] = &["document", "content", "data", "meta", "config", "vars"];

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("{}", .0.message())]
    Toml(#[from] toml::de::Error),
    #[error("invalid expression in `{key}`: {source}")]
    Expression {
        key: String,
        #[source]
        source: ParseError,
    },
    #[error("label `{label}` of a {keyword} block must be a string")]
    Label { keyword: String, label: String },
}

impl LoadError {
    fn to_diagnostic(&self, file_id: usize) -> Diagnostic {
        let subject = match self {
            LoadError::Toml(error) => error.span().map(|range| Span::new(file_id, range)),
            _ => None,
        };
        let summary = match self {
            LoadError::Toml(_) => "Failed to parse the file",
            LoadError::Expression { .. } => "Invalid expression",
            LoadError::Label { .. } => "Invalid block label",
        };
        Diagnostic::error(summary)
            .with_detail(self.to_string())
            .with_subject(subject)
    }
}

/// Parse TOML source text into the root body of a file.
pub fn load_str(source: &str, file_id: usize) -> Result<RawBody, Diagnostics> {
    let table: toml::Table = toml::from_str(source)
        .map_err(|e| Diagnostics::from(LoadError::from(e).to_diagnostic(file_id)))?;
    load_table(table, file_id)
}

/// Convert an already-parsed TOML table into a root body.
pub fn load_table(table: toml::Table, file_id: usize) -> Result<RawBody, Diagnostics> {
    let mut errors = Vec::new();
    let body = body_from_table(table, &[], &mut errors);
    if errors.is_empty() {
        Ok(body)
    } else {
        Err(errors.iter().map(|e| e.to_diagnostic(file_id)).collect())
    }
}

fn label_keys(keyword: &str) -> &'static [&'static str] {
    match keyword {
        "document" => &["name"],
        "content" | "data" => &["type", "name"],
        _ => &[],
    }
}

fn is_block_value(key: &str, value: &toml::Value) -> bool {
    if !BLOCK_KEYWORDS.contains(&key) {
        return false;
    }
    match value {
        toml::Value::Table(_) => true,
        toml::Value::Array(items) => !items.is_empty() && items.iter().all(toml::Value::is_table),
        _ => false,
    }
}

fn body_from_table(table: toml::Table, skip: &[&str], errors: &mut Vec<LoadError>) -> RawBody {
    let mut body = RawBody::new();
    for (key, value) in table {
        if skip.contains(&key.as_str()) {
            continue;
        }
        if is_block_value(&key, &value) {
            let tables = match value {
                toml::Value::Table(t) => vec![t],
                toml::Value::Array(items) => items
                    .into_iter()
                    .filter_map(|item| match item {
                        toml::Value::Table(t) => Some(t),
                        _ => None,
                    })
                    .collect(),
                _ => Vec::new(),
            };
            for table in tables {
                body.blocks.push(block_from_table(&key, table, errors));
            }
            continue;
        }
        match expression_from_toml(value) {
            Ok(expr) => {
                body.attributes.insert(key.clone(), Attribute::new(key, expr));
            }
            Err(source) => errors.push(LoadError::Expression { key, source }),
        }
    }
    body
}

fn block_from_table(keyword: &str, table: toml::Table, errors: &mut Vec<LoadError>) -> RawBlock {
    let label_keys = label_keys(keyword);
    let mut labels = Vec::new();
    for label in label_keys {
        match table.get(*label) {
            Some(toml::Value::String(value)) => labels.push(Label {
                value: value.clone(),
                span: None,
            }),
            Some(_) => errors.push(LoadError::Label {
                keyword: keyword.to_string(),
                label: label.to_string(),
            }),
            // A missing label is reported when the block is decoded.
            None => {}
        }
    }
    RawBlock {
        keyword: keyword.to_string(),
        labels,
        body: body_from_table(table, label_keys, errors),
        span: None,
    }
}

fn expression_from_toml(value: toml::Value) -> Result<Expression, ParseError> {
    Ok(match value {
        toml::Value::String(s) if s.contains("${") => parse_template(&s)?,
        toml::Value::String(s) => Expression::Literal(Value::String(s)),
        toml::Value::Integer(i) => Expression::Literal(Value::Number(Number::from(i))),
        toml::Value::Float(f) => Expression::Literal(Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)),
        toml::Value::Boolean(b) => Expression::Literal(Value::Bool(b)),
        toml::Value::Datetime(dt) => Expression::Literal(Value::String(dt.to_string())),
        toml::Value::Array(items) => Expression::List(
            items
                .into_iter()
                .map(expression_from_toml)
                .collect::<Result<_, _>>()?,
        ),
        toml::Value::Table(table) => Expression::Object(
            table
                .into_iter()
                .map(|(k, v)| expression_from_toml(v).map(|e| (k, e)))
                .collect::<Result<_, _>>()?,
        ),
    })
}
