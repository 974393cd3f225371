//! Data stage: runs every data block of a document in parallel and
//! assembles the dictionary `{"data": {<type>: {<name>: <result>}}}`.

use std::collections::HashMap;
use std::sync::Arc;

use fabric::{DataBlock, Diagnostic, Diagnostics, Value};
use serde_json::Map;

use crate::attributes::evaluate_attributes;
use crate::executor::{Command, Executor};
use crate::limiter::Limiter;
use crate::plugin::{Registry, call_plugin, lost_results};

/// Top-level key of the dictionary under which data results live.
pub const DATA_KEY: &str = "data";

struct Outcome {
    block_type: String,
    name: String,
    result: Option<Value>,
    diagnostics: Diagnostics,
}

#[derive(Default)]
struct State {
    data: Map<String, Value>,
    /// Submission index of the block whose result occupies each slot.
    placed: HashMap<(String, String), usize>,
    diagnostics: Diagnostics,
    processed: usize,
    failed: bool,
}

impl State {
    fn insert(&mut self, block_type: String, name: String, result: Value, index: usize) {
        let key = (block_type, name);
        // Same type and name twice: the later block in document order wins.
        if self.placed.get(&key).is_some_and(|&previous| previous > index) {
            return;
        }
        let by_name = self
            .data
            .entry(key.0.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(by_name) = by_name {
            by_name.insert(key.1.clone(), result);
        }
        self.placed.insert(key, index);
    }
}

/// Evaluate `blocks`, bounded by `limiter`.
///
/// Returns the dictionary and any warnings, or every diagnostic collected
/// before the first error stopped the stage.
pub fn evaluate_data_blocks(
    registry: &Arc<Registry>,
    limiter: Option<Arc<Limiter>>,
    blocks: &[DataBlock],
) -> Result<(Value, Diagnostics), Diagnostics> {
    let executor = Executor::new("data", limiter, State::default(), |state: &mut State, outcome: Outcome, index| {
        let Outcome {
            block_type,
            name,
            result,
            diagnostics,
        } = outcome;
        state.processed += 1;
        let failed = diagnostics.has_errors();
        state.diagnostics.extend(diagnostics);
        match result {
            Some(result) if !failed => {
                state.insert(block_type, name, result, index);
                Command::Proceed
            }
            _ => {
                state.failed = true;
                Command::Stop
            }
        }
    });

    let registry = Arc::clone(registry);
    let blocks: Arc<[DataBlock]> = blocks.to_vec().into();
    let submitted = executor
        .map_ref(Arc::clone(&blocks), move |block| evaluate_block(&registry, block))
        .len();

    let mut guard = executor.wait_done_and_lock();
    let mut state = std::mem::take(&mut *guard);
    guard.unlock();

    if !state.failed && state.processed < submitted {
        state.diagnostics.push(lost_results("data", submitted - state.processed));
        state.failed = true;
    }
    if state.failed {
        return Err(state.diagnostics);
    }
    let mut dictionary = Map::new();
    dictionary.insert(DATA_KEY.to_string(), Value::Object(in_block_order(&blocks, state.data)));
    Ok((Value::Object(dictionary), state.diagnostics))
}

fn evaluate_block(registry: &Registry, data: &DataBlock) -> Outcome {
    let block = &data.block;
    let mut outcome = Outcome {
        block_type: block.block_type.clone(),
        name: block.name.clone(),
        result: None,
        diagnostics: Diagnostics::new(),
    };

    if !block.decoded {
        outcome.diagnostics.push(
            Diagnostic::error("Block not decoded")
                .with_detail(format!("{} failed to decode and cannot be evaluated", block.address()))
                .with_subject(block.span.clone()),
        );
        return outcome;
    }
    let Some(plugin) = registry.data(&block.block_type) else {
        outcome.diagnostics.push(
            Diagnostic::error("Missing plugin")
                .with_detail(format!("no data plugin is registered for type `{}`", block.block_type))
                .with_subject(block.span.clone()),
        );
        return outcome;
    };

    let (attrs, warnings) = evaluate_attributes(block);
    outcome.diagnostics.extend(warnings);
    match call_plugin(|| plugin.execute(&attrs)) {
        Ok(result) => {
            tracing::debug!(block = %block.address(), "evaluated data block");
            outcome.result = Some(result);
        }
        Err(error) => outcome.diagnostics.push(error.into_diagnostic(block)),
    }
    outcome
}

/// Rebuild the data map in document order so the output does not depend
/// on which task finished first.
fn in_block_order(blocks: &[DataBlock], mut data: Map<String, Value>) -> Map<String, Value> {
    let mut ordered = Map::new();
    for data_block in blocks {
        let block = &data_block.block;
        let Some(Value::Object(by_name)) = data.get_mut(&block.block_type) else {
            continue;
        };
        let Some(result) = by_name.remove(&block.name) else {
            continue;
        };
        if let Value::Object(target) = ordered
            .entry(block.block_type.clone())
            .or_insert_with(|| Value::Object(Map::new()))
        {
            target.insert(block.name.clone(), result);
        }
    }
    ordered
}
