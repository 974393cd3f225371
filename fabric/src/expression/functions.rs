use serde_json::Value;

use crate::expression::{EvalError, stringify, type_name};

/// Names of the functions callable from attribute expressions.
pub const FUNCTIONS: &[&str] = &["env", "upper", "lower", "join", "length", "jsonencode", "jsondecode"];

pub fn call(name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
    match name {
        "env" => {
            let [variable] = expect_args::<1>(name, args)?;
            let variable = expect_string(&variable)?;
            std::env::var(variable)
                .map(Value::String)
                .map_err(|_| EvalError::MissingEnvironmentVariable(variable.to_string()))
        }
        "upper" => {
            let [s] = expect_args::<1>(name, args)?;
            Ok(Value::String(expect_string(&s)?.to_uppercase()))
        }
        "lower" => {
            let [s] = expect_args::<1>(name, args)?;
            Ok(Value::String(expect_string(&s)?.to_lowercase()))
        }
        "join" => {
            let [separator, list] = expect_args::<2>(name, args)?;
            let separator = expect_string(&separator)?;
            let Value::Array(items) = &list else {
                return Err(EvalError::TypeError {
                    expected: "list",
                    got: type_name(&list),
                });
            };
            let parts: Vec<String> = items.iter().map(stringify).collect();
            Ok(Value::String(parts.join(separator)))
        }
        "length" => {
            let [value] = expect_args::<1>(name, args)?;
            let len = match &value {
                Value::String(s) => s.chars().count(),
                Value::Array(items) => items.len(),
                Value::Object(map) => map.len(),
                other => {
                    return Err(EvalError::TypeError {
                        expected: "string, list or object",
                        got: type_name(other),
                    });
                }
            };
            Ok(Value::from(len))
        }
        "jsonencode" => {
            let [value] = expect_args::<1>(name, args)?;
            Ok(Value::String(value.to_string()))
        }
        "jsondecode" => {
            let [s] = expect_args::<1>(name, args)?;
            serde_json::from_str(expect_string(&s)?).map_err(|e| EvalError::Custom(format!("invalid JSON: {}", e)))
        }
        _ => Err(EvalError::UnknownFunction(name.to_string())),
    }
}

fn expect_args<const N: usize>(name: &str, args: Vec<Value>) -> Result<[Value; N], EvalError> {
    let got = args.len();
    args.try_into().map_err(|_| EvalError::Arity {
        name: name.to_string(),
        expected: N,
        got,
    })
}

fn expect_string(value: &Value) -> Result<&str, EvalError> {
    value.as_str().ok_or(EvalError::TypeError {
        expected: "string",
        got: type_name(value),
    })
}
