pub mod functions;
pub mod parser;

use std::fmt;

use serde_json::{Map, Number, Value};

pub use parser::{ParseError, parse_expression, parse_template};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    /// Arithmetic negation: -x
    Negation,
    /// Logical not: !x
    LogicalNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Addition,
    Subtraction,
    Multiplication,
    Division,
    Modulo,
    LogicalAnd,
    LogicalOr,
    Equality,
    Inequality,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    Literal(String),
    Interpolation(Expression),
}

/// An unevaluated attribute expression.
///
/// Forcing an expression with [`Expression::evaluate`] yields a concrete
/// [`Value`] or an [`EvalError`]; every attribute is forced independently.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Value),
    /// `"text ${expr} text"`
    Template(Vec<TemplatePart>),
    /// Bare dotted path such as `content.text.intro`.
    Traversal(Vec<String>),
    List(Vec<Expression>),
    Object(Vec<(String, Expression)>),
    Call {
        name: String,
        arguments: Vec<Expression>,
    },
    UnaryOperation {
        operator: UnaryOperator,
        operand: Box<Expression>,
    },
    BinaryOperation {
        operator: BinaryOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Conditional {
        condition: Box<Expression>,
        true_branch: Box<Expression>,
        false_branch: Box<Expression>,
    },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("unknown variable: {0}")]
    UnknownVariable(String),
    #[error("unknown function: {0}")]
    UnknownFunction(String),
    #[error("function {name} expects {expected} argument(s), got {got}")]
    Arity { name: String, expected: usize, got: usize },
    #[error("type error: expected {expected}, got {got}")]
    TypeError { expected: &'static str, got: &'static str },
    #[error("environment variable {0} is not set")]
    MissingEnvironmentVariable(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("{0}")]
    Custom(String),
}

impl Expression {
    pub fn string(s: impl Into<String>) -> Self {
        Expression::Literal(Value::String(s.into()))
    }

    /// Returns the path segments if this expression is a bare traversal.
    pub fn as_traversal(&self) -> Option<&[String]> {
        match self {
            Expression::Traversal(segments) => Some(segments),
            _ => None,
        }
    }

    /// Force the expression into a concrete value.
    pub fn evaluate(&self) -> Result<Value, EvalError> {
        match self {
            Expression::Literal(value) => Ok(value.clone()),
            Expression::Template(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Literal(s) => out.push_str(s),
                        TemplatePart::Interpolation(expr) => out.push_str(&stringify(&expr.evaluate()?)),
                    }
                }
                Ok(Value::String(out))
            }
            Expression::Traversal(segments) => Err(EvalError::UnknownVariable(segments.join("."))),
            Expression::List(items) => Ok(Value::Array(
                items.iter().map(Expression::evaluate).collect::<Result<_, _>>()?,
            )),
            Expression::Object(entries) => {
                let mut map = Map::new();
                for (key, expr) in entries {
                    map.insert(key.clone(), expr.evaluate()?);
                }
                Ok(Value::Object(map))
            }
            Expression::Call { name, arguments } => {
                let args = arguments
                    .iter()
                    .map(Expression::evaluate)
                    .collect::<Result<Vec<_>, _>>()?;
                functions::call(name, args)
            }
            Expression::UnaryOperation { operator, operand } => {
                let value = operand.evaluate()?;
                match operator {
                    UnaryOperator::Negation => number_value(-coerce_number(&value)?),
                    UnaryOperator::LogicalNot => Ok(Value::Bool(!coerce_bool(&value)?)),
                }
            }
            Expression::BinaryOperation { operator, left, right } => {
                // Short-circuit the logical operators before touching the right side.
                match operator {
                    BinaryOperator::LogicalAnd => {
                        if !coerce_bool(&left.evaluate()?)? {
                            return Ok(Value::Bool(false));
                        }
                        return Ok(Value::Bool(coerce_bool(&right.evaluate()?)?));
                    }
                    BinaryOperator::LogicalOr => {
                        if coerce_bool(&left.evaluate()?)? {
                            return Ok(Value::Bool(true));
                        }
                        return Ok(Value::Bool(coerce_bool(&right.evaluate()?)?));
                    }
                    _ => {}
                }
                let l = left.evaluate()?;
                let r = right.evaluate()?;
                eval_binary_op(*operator, &l, &r)
            }
            Expression::Conditional {
                condition,
                true_branch,
                false_branch,
            } => {
                if coerce_bool(&condition.evaluate()?)? {
                    true_branch.evaluate()
                } else {
                    false_branch.evaluate()
                }
            }
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Literal(value) => write!(f, "{}", value),
            Expression::Template(parts) => {
                write!(f, "\"")?;
                for part in parts {
                    match part {
                        TemplatePart::Literal(s) => write!(f, "{}", s)?,
                        TemplatePart::Interpolation(expr) => write!(f, "${{{}}}", expr)?,
                    }
                }
                write!(f, "\"")
            }
            Expression::Traversal(segments) => write!(f, "{}", segments.join(".")),
            Expression::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Expression::Object(entries) => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} = {}", key, value)?;
                }
                write!(f, "}}")
            }
            Expression::Call { name, arguments } => {
                write!(f, "{}(", name)?;
                for (i, arg) in arguments.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            Expression::UnaryOperation { operator, operand } => match operator {
                UnaryOperator::Negation => write!(f, "-{}", operand),
                UnaryOperator::LogicalNot => write!(f, "!{}", operand),
            },
            Expression::BinaryOperation { operator, left, right } => {
                write!(f, "({} {} {})", left, operator_symbol(*operator), right)
            }
            Expression::Conditional {
                condition,
                true_branch,
                false_branch,
            } => write!(f, "{} ? {} : {}", condition, true_branch, false_branch),
        }
    }
}

fn operator_symbol(operator: BinaryOperator) -> &'static str {
    match operator {
        BinaryOperator::Addition => "+",
        BinaryOperator::Subtraction => "-",
        BinaryOperator::Multiplication => "*",
        BinaryOperator::Division => "/",
        BinaryOperator::Modulo => "%",
        BinaryOperator::LogicalAnd => "&&",
        BinaryOperator::LogicalOr => "||",
        BinaryOperator::Equality => "==",
        BinaryOperator::Inequality => "!=",
        BinaryOperator::GreaterThan => ">",
        BinaryOperator::LessThan => "<",
        BinaryOperator::GreaterThanOrEqual => ">=",
        BinaryOperator::LessThanOrEqual => "<=",
    }
}

/// Name of a value's type, for error messages.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

/// Render a value for string interpolation: strings verbatim, everything else as JSON.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn coerce_number(value: &Value) -> Result<f64, EvalError> {
    value.as_f64().ok_or(EvalError::TypeError {
        expected: "number",
        got: type_name(value),
    })
}

fn coerce_bool(value: &Value) -> Result<bool, EvalError> {
    value.as_bool().ok_or(EvalError::TypeError {
        expected: "bool",
        got: type_name(value),
    })
}

/// Integral results stay integers so `1 + 2` renders as `3`, not `3.0`.
fn number_value(n: f64) -> Result<Value, EvalError> {
    if n.is_finite() && n == n.trunc() && n.abs() < 1e15 {
        return Ok(Value::Number(Number::from(n as i64)));
    }
    Number::from_f64(n)
        .map(Value::Number)
        .ok_or_else(|| EvalError::Custom(format!("{} is not a representable number", n)))
}

fn eval_binary_op(operator: BinaryOperator, l: &Value, r: &Value) -> Result<Value, EvalError> {
    match operator {
        BinaryOperator::Addition => match (l, r) {
            (Value::String(a), b) => Ok(Value::String(format!("{}{}", a, stringify(b)))),
            (a, Value::String(b)) => Ok(Value::String(format!("{}{}", stringify(a), b))),
            _ => number_value(coerce_number(l)? + coerce_number(r)?),
        },
        BinaryOperator::Subtraction => number_value(coerce_number(l)? - coerce_number(r)?),
        BinaryOperator::Multiplication => number_value(coerce_number(l)? * coerce_number(r)?),
        BinaryOperator::Division => {
            let divisor = coerce_number(r)?;
            if divisor == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            number_value(coerce_number(l)? / divisor)
        }
        BinaryOperator::Modulo => {
            let divisor = coerce_number(r)?;
            if divisor == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            number_value(coerce_number(l)? % divisor)
        }
        BinaryOperator::Equality => Ok(Value::Bool(values_equal(l, r))),
        BinaryOperator::Inequality => Ok(Value::Bool(!values_equal(l, r))),
        BinaryOperator::GreaterThan => Ok(Value::Bool(coerce_number(l)? > coerce_number(r)?)),
        BinaryOperator::LessThan => Ok(Value::Bool(coerce_number(l)? < coerce_number(r)?)),
        BinaryOperator::GreaterThanOrEqual => Ok(Value::Bool(coerce_number(l)? >= coerce_number(r)?)),
        BinaryOperator::LessThanOrEqual => Ok(Value::Bool(coerce_number(l)? <= coerce_number(r)?)),
        BinaryOperator::LogicalAnd => Ok(Value::Bool(coerce_bool(l)? && coerce_bool(r)?)),
        BinaryOperator::LogicalOr => Ok(Value::Bool(coerce_bool(l)? || coerce_bool(r)?)),
    }
}

/// Numbers compare by value so `1 == 1.0` holds.
fn values_equal(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => l == r,
    }
}
