use std::cmp::Ordering;

use fabric::expression::type_name;
use serde_json::Value;

use super::{Builtin, Comparison, Filter, QueryError};

pub(super) fn eval(filter: &Filter, input: &Value) -> Result<Vec<Value>, QueryError> {
    match filter {
        Filter::Identity => Ok(vec![input.clone()]),
        Filter::Field(name) => match input {
            Value::Object(map) => Ok(vec![map.get(name).cloned().unwrap_or(Value::Null)]),
            Value::Null => Ok(vec![Value::Null]),
            other => Err(runtime(format!("cannot index {} with \"{}\"", type_name(other), name))),
        },
        Filter::Index(index) => match input {
            Value::Array(items) => {
                let resolved = if *index < 0 {
                    items.len().checked_sub(index.unsigned_abs() as usize)
                } else {
                    Some(*index as usize)
                };
                Ok(vec![resolved.and_then(|i| items.get(i)).cloned().unwrap_or(Value::Null)])
            }
            Value::Null => Ok(vec![Value::Null]),
            other => Err(runtime(format!("cannot index {} with a number", type_name(other)))),
        },
        Filter::Iterate => match input {
            Value::Array(items) => Ok(items.clone()),
            Value::Object(map) => Ok(map.values().cloned().collect()),
            other => Err(runtime(format!("cannot iterate over {}", type_name(other)))),
        },
        Filter::Literal(value) => Ok(vec![value.clone()]),
        Filter::Pipe(left, right) => {
            let mut out = Vec::new();
            for value in eval(left, input)? {
                out.extend(eval(right, &value)?);
            }
            Ok(out)
        }
        Filter::Comma(left, right) => {
            let mut out = eval(left, input)?;
            out.extend(eval(right, input)?);
            Ok(out)
        }
        Filter::Optional(inner) => Ok(eval(inner, input).unwrap_or_default()),
        Filter::Collect(inner) => Ok(vec![Value::Array(eval(inner, input)?)]),
        Filter::Compare(op, left, right) => {
            let rights = eval(right, input)?;
            let lefts = eval(left, input)?;
            let mut out = Vec::with_capacity(lefts.len() * rights.len());
            for r in &rights {
                for l in &lefts {
                    out.push(Value::Bool(compare(*op, l, r)));
                }
            }
            Ok(out)
        }
        Filter::Builtin(builtin) => builtin_call(*builtin, input).map(|v| vec![v]),
        Filter::Map(inner) => match input {
            Value::Array(items) => {
                let mut out = Vec::new();
                for item in items {
                    out.extend(eval(inner, item)?);
                }
                Ok(vec![Value::Array(out)])
            }
            other => Err(runtime(format!("cannot map over {}", type_name(other)))),
        },
        Filter::Select(predicate) => {
            let mut out = Vec::new();
            for result in eval(predicate, input)? {
                if truthy(&result) {
                    out.push(input.clone());
                }
            }
            Ok(out)
        }
    }
}

fn runtime(message: String) -> QueryError {
    QueryError::Runtime(message)
}

fn truthy(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false))
}

fn builtin_call(builtin: Builtin, input: &Value) -> Result<Value, QueryError> {
    match builtin {
        Builtin::Keys => match input {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                Ok(Value::Array(keys.into_iter().map(|k| Value::String(k.clone())).collect()))
            }
            Value::Array(items) => Ok(Value::Array((0..items.len()).map(Value::from).collect())),
            other => Err(runtime(format!("{} has no keys", type_name(other)))),
        },
        Builtin::Length => match input {
            Value::Null => Ok(Value::from(0)),
            Value::Bool(_) => Err(runtime("boolean has no length".to_string())),
            Value::Number(n) => Ok(n
                .as_i64()
                .map(|i| Value::from(i.abs()))
                .unwrap_or_else(|| Value::from(n.as_f64().unwrap_or(0.0).abs()))),
            Value::String(s) => Ok(Value::from(s.chars().count())),
            Value::Array(items) => Ok(Value::from(items.len())),
            Value::Object(map) => Ok(Value::from(map.len())),
        },
        Builtin::First => eval(&Filter::Index(0), input).map(first_or_null),
        Builtin::Last => eval(&Filter::Index(-1), input).map(first_or_null),
        Builtin::Not => Ok(Value::Bool(!truthy(input))),
    }
}

fn first_or_null(values: Vec<Value>) -> Value {
    values.into_iter().next().unwrap_or(Value::Null)
}

fn compare(op: Comparison, l: &Value, r: &Value) -> bool {
    let ordering = order(l, r);
    match op {
        Comparison::Eq => ordering == Ordering::Equal,
        Comparison::Ne => ordering != Ordering::Equal,
        Comparison::Lt => ordering == Ordering::Less,
        Comparison::Le => ordering != Ordering::Greater,
        Comparison::Gt => ordering == Ordering::Greater,
        Comparison::Ge => ordering != Ordering::Less,
    }
}

/// Total order over values: null < false < true < numbers < strings < arrays < objects.
fn order(l: &Value, r: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(false) => 1,
            Value::Bool(true) => 2,
            Value::Number(_) => 3,
            Value::String(_) => 4,
            Value::Array(_) => 5,
            Value::Object(_) => 6,
        }
    }

    match (l, r) {
        (Value::Number(a), Value::Number(b)) => {
            let (a, b) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Array(a), Value::Array(b)) => {
            for (x, y) in a.iter().zip(b) {
                let ordering = order(x, y);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            a.len().cmp(&b.len())
        }
        (Value::Object(a), Value::Object(b)) => {
            if a == b {
                Ordering::Equal
            } else {
                a.len().cmp(&b.len()).then(Ordering::Less)
            }
        }
        _ => rank(l).cmp(&rank(r)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numbers_compare_by_value() {
        assert_eq!(order(&json!(1), &json!(1.0)), Ordering::Equal);
        assert_eq!(order(&json!(2), &json!(10)), Ordering::Less);
    }

    #[test]
    fn types_are_ranked() {
        assert_eq!(order(&json!(null), &json!(false)), Ordering::Less);
        assert_eq!(order(&json!(true), &json!(0)), Ordering::Less);
        assert_eq!(order(&json!("a"), &json!([])), Ordering::Less);
    }

    #[test]
    fn negative_index_past_start_is_null() {
        assert_eq!(eval(&Filter::Index(-5), &json!([1, 2])), Ok(vec![Value::Null]));
    }
}
