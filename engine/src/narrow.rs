//! Query narrowing: derives each content block's local context.
//!
//! Blocks are numbered in pre-order. A block without a query shares the
//! dictionary itself. A block with a query gets its own copy of the
//! dictionary with `query_result` set to the query's first output. Queries
//! always run against the shared dictionary, never a parent's view.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use fabric::{ContentBlock, Diagnostic, Diagnostics, Span, Value};

use crate::executor::{Command, Executor, panic_message};
use crate::limiter::Limiter;
use crate::plugin::lost_results;
use crate::query::{Query, QueryError};

/// Key under which a block's query output is exposed to its plugin.
pub const QUERY_RESULT_KEY: &str = "query_result";

/// Per-block contexts, indexed by pre-order position in the content tree.
#[derive(Debug, Clone, Default)]
pub struct LocalContexts {
    contexts: Vec<Option<Arc<Value>>>,
}

impl LocalContexts {
    pub fn get(&self, position: usize) -> Option<&Arc<Value>> {
        self.contexts.get(position).and_then(Option::as_ref)
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    fn set(&mut self, position: usize, context: Arc<Value>) {
        if self.contexts.len() <= position {
            self.contexts.resize(position + 1, None);
        }
        self.contexts[position] = Some(context);
    }
}

struct Outcome {
    position: usize,
    address: String,
    subject: Option<Span>,
    result: Result<Option<Value>, QueryError>,
}

#[derive(Default)]
struct State {
    contexts: LocalContexts,
    diagnostics: Diagnostics,
    processed: usize,
    failed: bool,
}

/// Run every block's query against `dictionary`.
pub fn evaluate_queries(
    dictionary: &Arc<Value>,
    limiter: Option<Arc<Limiter>>,
    blocks: &[ContentBlock],
) -> Result<(LocalContexts, Diagnostics), Diagnostics> {
    let executor = Executor::new("query", limiter, State::default(), |state: &mut State, outcome: Outcome, _| {
        state.processed += 1;
        match outcome.result {
            Ok(Some(context)) => {
                state.contexts.set(outcome.position, Arc::new(context));
                Command::Proceed
            }
            Ok(None) => {
                state.diagnostics.push(
                    Diagnostic::warning("Empty query result")
                        .with_detail(format!("the query of {} matched nothing", outcome.address))
                        .with_subject(outcome.subject),
                );
                Command::Proceed
            }
            Err(error) => {
                let summary = if error.is_parse() {
                    "Invalid query"
                } else {
                    "Failed to run query"
                };
                state.diagnostics.push(
                    Diagnostic::error(summary)
                        .with_detail(format!("{}: {}", outcome.address, error))
                        .with_subject(outcome.subject),
                );
                state.failed = true;
                Command::Stop
            }
        }
    });

    // Blocks without a query alias the dictionary; those are filled in
    // directly, the rest are scheduled.
    let mut aliases = Vec::new();
    let mut position = 0;
    let mut submitted = 0;
    for block in blocks {
        block.walk(0, &mut |content, _depth| {
            let current = position;
            position += 1;
            let Some(source) = content.query.clone() else {
                aliases.push(current);
                return;
            };
            let dictionary = Arc::clone(dictionary);
            let address = content.block.address();
            let subject = content.block.span.clone();
            executor.go(move || Outcome {
                position: current,
                result: catch_unwind(AssertUnwindSafe(|| narrow(&source, &dictionary))).unwrap_or_else(|payload| {
                    Err(QueryError::Runtime(format!("query panicked: {}", panic_message(payload.as_ref()))))
                }),
                address,
                subject,
            });
            submitted += 1;
        });
    }

    let mut guard = executor.wait_done_and_lock();
    let mut state = std::mem::take(&mut *guard);
    guard.unlock();

    if !state.failed && state.processed < submitted {
        state.diagnostics.push(lost_results("query", submitted - state.processed));
        state.failed = true;
    }
    if state.failed {
        return Err(state.diagnostics);
    }
    for current in aliases {
        state.contexts.set(current, Arc::clone(dictionary));
    }
    // Trailing blocks whose query matched nothing still need a slot.
    if state.contexts.len() < position {
        state.contexts.contexts.resize(position, None);
    }
    Ok((state.contexts, state.diagnostics))
}

/// The block-local view for one query, or `None` if it produced nothing.
fn narrow(source: &str, dictionary: &Value) -> Result<Option<Value>, QueryError> {
    let query = Query::parse(source)?;
    let Some(first) = query.first(dictionary)? else {
        return Ok(None);
    };
    let mut local = match dictionary {
        Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    local.insert(QUERY_RESULT_KEY.to_string(), first);
    Ok(Some(Value::Object(local)))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn narrowed_view_keeps_the_dictionary() {
        let dictionary = json!({"data": {"inline": {"a": {"x": 1}}}});
        let local = narrow(".data.inline.a.x", &dictionary).expect("query failed");
        assert_eq!(local, Some(json!({"data": {"inline": {"a": {"x": 1}}}, "query_result": 1})));
    }

    #[test]
    fn empty_stream_is_none() {
        let dictionary = json!({"data": {"list": []}});
        assert_eq!(narrow(".data.list[]", &dictionary), Ok(None));
    }
}
