//! Content stage: renders every content block in parallel and joins the
//! results in document order.

use std::sync::Arc;

use fabric::{Block, ContentBlock, Diagnostic, Diagnostics, Value};

use crate::attributes::evaluate_attributes;
use crate::executor::{Command, Executor};
use crate::limiter::Limiter;
use crate::narrow::LocalContexts;
use crate::plugin::{Registry, call_plugin, lost_results};

const MAX_HEADING_LEVEL: usize = 6;

struct Job {
    block: Block,
    title: Option<String>,
    depth: usize,
    context: Option<Arc<Value>>,
}

struct Outcome {
    text: Option<String>,
    diagnostics: Diagnostics,
}

#[derive(Default)]
struct State {
    /// Rendered text by submission index.
    slots: Vec<Option<String>>,
    diagnostics: Diagnostics,
    processed: usize,
    failed: bool,
}

/// Render `blocks` with their local `contexts` and join the output with
/// newlines. `group` blocks render nothing but their children are rendered.
pub fn evaluate_content_blocks(
    registry: &Arc<Registry>,
    limiter: Option<Arc<Limiter>>,
    blocks: &[ContentBlock],
    contexts: &LocalContexts,
) -> Result<(String, Diagnostics), Diagnostics> {
    let executor = Executor::new("content", limiter, State::default(), |state: &mut State, outcome: Outcome, index| {
        state.processed += 1;
        let failed = outcome.diagnostics.has_errors();
        state.diagnostics.extend(outcome.diagnostics);
        match outcome.text {
            Some(text) if !failed => {
                if state.slots.len() <= index {
                    state.slots.resize(index + 1, None);
                }
                state.slots[index] = Some(text);
                Command::Proceed
            }
            _ => {
                state.failed = true;
                Command::Stop
            }
        }
    });

    let mut position = 0;
    let mut submitted = 0;
    for block in blocks {
        block.walk(0, &mut |content, depth| {
            let current = position;
            position += 1;
            if content.is_group() && content.block.decoded {
                return;
            }
            let job = Job {
                block: content.block.clone(),
                title: content.title.clone(),
                depth,
                context: contexts.get(current).cloned(),
            };
            let registry = Arc::clone(registry);
            executor.go(move || render(&registry, job));
            submitted += 1;
        });
    }

    let mut guard = executor.wait_done_and_lock();
    let mut state = std::mem::take(&mut *guard);
    guard.unlock();

    if !state.failed && state.processed < submitted {
        state.diagnostics.push(lost_results("content", submitted - state.processed));
        state.failed = true;
    }
    if state.failed {
        return Err(state.diagnostics);
    }
    let text: Vec<String> = state.slots.into_iter().flatten().collect();
    Ok((text.join("\n"), state.diagnostics))
}

fn render(registry: &Registry, job: Job) -> Outcome {
    let block = &job.block;
    let mut outcome = Outcome {
        text: None,
        diagnostics: Diagnostics::new(),
    };

    if !block.decoded {
        outcome.diagnostics.push(
            Diagnostic::error("Block not decoded")
                .with_detail(format!("{} failed to decode and cannot be rendered", block.address()))
                .with_subject(block.span.clone()),
        );
        return outcome;
    }
    let Some(plugin) = registry.content(&block.block_type) else {
        outcome.diagnostics.push(
            Diagnostic::error("Missing plugin")
                .with_detail(format!("no content plugin is registered for type `{}`", block.block_type))
                .with_subject(block.span.clone()),
        );
        return outcome;
    };

    let (attrs, warnings) = evaluate_attributes(block);
    outcome.diagnostics.extend(warnings);
    let null = Value::Null;
    let context = job.context.as_deref().unwrap_or(&null);
    match call_plugin(|| plugin.execute(&attrs, context)) {
        Ok(text) => {
            tracing::debug!(block = %block.address(), "rendered content block");
            outcome.text = Some(match &job.title {
                Some(title) => with_heading(title, job.depth, &text),
                None => text,
            });
        }
        Err(error) => outcome.diagnostics.push(error.into_diagnostic(block)),
    }
    outcome
}

fn with_heading(title: &str, depth: usize, text: &str) -> String {
    let level = (depth + 1).min(MAX_HEADING_LEVEL);
    let heading = format!("{} {}", "#".repeat(level), title);
    if text.is_empty() {
        heading
    } else {
        format!("{}\n{}", heading, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heading_level_follows_depth() {
        assert_eq!(with_heading("Intro", 0, "body"), "# Intro\nbody");
        assert_eq!(with_heading("Deep", 2, ""), "### Deep");
        assert_eq!(with_heading("Deeper", 9, "x"), "###### Deeper\nx");
    }
}
