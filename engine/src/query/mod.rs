//! A small jq-like query language for narrowing the data dictionary.
//!
//! Supported: `.`, `.field`, `."field"`, `.[n]` (negative counts from the
//! end), `.[]`, postfix `?`, `|`, `,`, `[ f ]`, literals, comparisons
//! (`== != < <= > >=`), parentheses, and the builtins `keys`, `length`,
//! `first`, `last`, `not`, `map(f)` and `select(f)`.
//!
//! A query yields a stream of values, represented as a `Vec<Value>`.

mod eval;
mod parser;

use std::fmt;

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueryError {
    #[error("{message} at offset {offset}")]
    Parse { message: String, offset: usize },
    #[error("{0}")]
    Runtime(String),
}

impl QueryError {
    pub fn is_parse(&self) -> bool {
        matches!(self, QueryError::Parse { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Keys,
    Length,
    First,
    Last,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Identity,
    Field(String),
    Index(i64),
    Iterate,
    Literal(Value),
    Pipe(Box<Filter>, Box<Filter>),
    Comma(Box<Filter>, Box<Filter>),
    /// `f?`: errors become an empty stream.
    Optional(Box<Filter>),
    /// `[f]`
    Collect(Box<Filter>),
    Compare(Comparison, Box<Filter>, Box<Filter>),
    Builtin(Builtin),
    Map(Box<Filter>),
    Select(Box<Filter>),
}

/// A parsed query, reusable against any number of inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    source: String,
    filter: Filter,
}

impl Query {
    pub fn parse(source: &str) -> Result<Self, QueryError> {
        Ok(Query {
            source: source.to_string(),
            filter: parser::parse(source)?,
        })
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    /// Run the query and collect every output.
    pub fn run(&self, input: &Value) -> Result<Vec<Value>, QueryError> {
        eval::eval(&self.filter, input)
    }

    /// The first output, if the query produced any.
    pub fn first(&self, input: &Value) -> Result<Option<Value>, QueryError> {
        Ok(self.run(input)?.into_iter().next())
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Parse and run `source` against `input` in one step.
pub fn run(source: &str, input: &Value) -> Result<Vec<Value>, QueryError> {
    Query::parse(source)?.run(input)
}
