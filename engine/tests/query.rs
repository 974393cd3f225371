use engine::query::{Query, QueryError, run};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

fn input() -> Value {
    json!({
        "data": {
            "inline": {
                "team": {
                    "members": [
                        {"name": "Ada", "age": 36},
                        {"name": "Grace", "age": 45},
                        {"name": "Linus", "age": 21}
                    ],
                    "lead": "Grace"
                }
            }
        }
    })
}

fn query(source: &str) -> Vec<Value> {
    run(source, &input()).expect("query failed")
}

#[test]
fn paths() {
    assert_eq!(query(".data.inline.team.lead"), vec![json!("Grace")]);
    assert_eq!(query(".data.\"inline\".team.lead"), vec![json!("Grace")]);
    assert_eq!(query(".data.inline.team.members[0].name"), vec![json!("Ada")]);
    assert_eq!(query(".data.inline.team.members[-1].name"), vec![json!("Linus")]);
    assert_eq!(query(".data.inline.team.missing"), vec![Value::Null]);
    assert_eq!(query(".").len(), 1);
}

#[test]
fn iteration_pipes_and_collection() {
    assert_eq!(
        query("[.data.inline.team.members[] | .name]"),
        vec![json!(["Ada", "Grace", "Linus"])]
    );
    assert_eq!(
        query(".data.inline.team.members[].age"),
        vec![json!(36), json!(45), json!(21)]
    );
    assert_eq!(query(".data.inline.team.lead, 1"), vec![json!("Grace"), json!(1)]);
}

#[test]
fn select_map_and_comparisons() {
    assert_eq!(
        query(".data.inline.team.members | map(select(.age > 30) | .name)"),
        vec![json!(["Ada", "Grace"])]
    );
    assert_eq!(
        query(".data.inline.team.members[] | select(.name == \"Linus\") | .age"),
        vec![json!(21)]
    );
    assert_eq!(query("1 <= 1, 2 != 2"), vec![json!(true), json!(false)]);
}

#[test]
fn builtins() {
    assert_eq!(query(".data.inline.team | keys"), vec![json!(["lead", "members"])]);
    assert_eq!(query(".data.inline.team.members | length"), vec![json!(3)]);
    assert_eq!(query(".data.inline.team.members | first | .name"), vec![json!("Ada")]);
    assert_eq!(query(".data.inline.team.members | last | .name"), vec![json!("Linus")]);
    assert_eq!(query(".data.inline.team.lead | not"), vec![json!(false)]);
}

#[test]
fn optional_swallows_errors() {
    assert!(run(".data.inline.team.lead[0]", &input()).is_err());
    assert_eq!(query(".data.inline.team.lead[0]?"), Vec::<Value>::new());
    assert_eq!(query("[.data.inline.team.members[].name[]?]"), vec![json!([])]);
}

#[test]
fn runtime_and_parse_errors() {
    let runtime = run(".data[]|.x", &json!({"data": [1]})).expect_err("indexing a number fails");
    assert!(matches!(runtime, QueryError::Runtime(_)));
    assert!(!runtime.is_parse());

    for source in ["", ".data[", "map(.x", "unknown", ".[1.5]", "\"open"] {
        let error = Query::parse(source).expect_err(source);
        assert!(error.is_parse(), "{}: {}", source, error);
    }
}

#[test]
fn parsed_query_is_reusable() {
    let query = Query::parse(".n").expect("parse failed");
    assert_eq!(query.first(&json!({"n": 1})), Ok(Some(json!(1))));
    assert_eq!(query.first(&json!({"n": 2})), Ok(Some(json!(2))));
    assert_eq!(query.to_string(), ".n");
}
