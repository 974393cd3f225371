//! Plugin capabilities and the type → plugin registry.
//!
//! Data plugins turn evaluated attributes into a value for the dictionary;
//! content plugins turn evaluated attributes plus a block's local context
//! into text. Plugins are shared across worker threads, hence `Send + Sync`.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use fabric::{Block, BlockKind, Diagnostic, Value};

use crate::executor::panic_message;
use crate::plugins;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{summary}")]
pub struct PluginError {
    pub summary: String,
    pub detail: Option<String>,
}

impl PluginError {
    pub fn new(summary: impl Into<String>) -> Self {
        PluginError {
            summary: summary.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Report the failure against the block whose plugin raised it.
    pub fn into_diagnostic(self, block: &Block) -> Diagnostic {
        let detail = match self.detail {
            Some(detail) => format!("{}: {}", block.address(), detail),
            None => format!("plugin `{}` failed on {}", block.block_type, block.address()),
        };
        Diagnostic::error(self.summary)
            .with_detail(detail)
            .with_subject(block.span.clone())
    }
}

/// Error for tasks that ended without handing a result to their stage.
pub(crate) fn lost_results(stage: &str, missing: usize) -> Diagnostic {
    Diagnostic::error("Task panicked")
        .with_detail(format!("{} {} task(s) ended without a result", missing, stage))
}

/// Run one plugin call. A panic becomes a `Plugin panicked` error so the
/// block fails its stage instead of vanishing from the output.
pub(crate) fn call_plugin<R>(call: impl FnOnce() -> Result<R, PluginError>) -> Result<R, PluginError> {
    catch_unwind(AssertUnwindSafe(call))
        .unwrap_or_else(|payload| Err(PluginError::new("Plugin panicked").with_detail(panic_message(payload.as_ref()))))
}

pub trait DataPlugin: Send + Sync {
    fn execute(&self, attrs: &Value) -> Result<Value, PluginError>;
}

pub trait ContentPlugin: Send + Sync {
    fn execute(&self, attrs: &Value, context: &Value) -> Result<String, PluginError>;
}

impl<F> DataPlugin for F
where
    F: Fn(&Value) -> Result<Value, PluginError> + Send + Sync,
{
    fn execute(&self, attrs: &Value) -> Result<Value, PluginError> {
        self(attrs)
    }
}

impl<F> ContentPlugin for F
where
    F: Fn(&Value, &Value) -> Result<String, PluginError> + Send + Sync,
{
    fn execute(&self, attrs: &Value, context: &Value) -> Result<String, PluginError> {
        self(attrs, context)
    }
}

#[derive(Clone, Default)]
pub struct Registry {
    data: HashMap<String, Arc<dyn DataPlugin>>,
    content: HashMap<String, Arc<dyn ContentPlugin>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// A registry holding the builtin `inline` data plugin and the `text`
    /// and `json` content plugins.
    pub fn builtin() -> Self {
        let mut registry = Registry::new();
        registry.register_data("inline", plugins::Inline);
        registry.register_content("text", plugins::Text);
        registry.register_content("json", plugins::Json);
        registry
    }

    pub fn register_data(&mut self, block_type: impl Into<String>, plugin: impl DataPlugin + 'static) {
        self.data.insert(block_type.into(), Arc::new(plugin));
    }

    pub fn register_content(&mut self, block_type: impl Into<String>, plugin: impl ContentPlugin + 'static) {
        self.content.insert(block_type.into(), Arc::new(plugin));
    }

    pub fn data(&self, block_type: &str) -> Option<Arc<dyn DataPlugin>> {
        self.data.get(block_type).cloned()
    }

    pub fn content(&self, block_type: &str) -> Option<Arc<dyn ContentPlugin>> {
        self.content.get(block_type).cloned()
    }

    /// Whether a plugin is registered for `block_type` under `kind`.
    pub fn knows(&self, kind: BlockKind, block_type: &str) -> bool {
        match kind {
            BlockKind::Data => self.data.contains_key(block_type),
            BlockKind::Content => self.content.contains_key(block_type),
            BlockKind::Document => false,
        }
    }

    /// Registered type names for `kind`, sorted.
    pub fn types(&self, kind: BlockKind) -> Vec<&str> {
        let mut types: Vec<&str> = match kind {
            BlockKind::Data => self.data.keys().map(String::as_str).collect(),
            BlockKind::Content => self.content.keys().map(String::as_str).collect(),
            BlockKind::Document => Vec::new(),
        };
        types.sort_unstable();
        types
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("data", &self.types(BlockKind::Data))
            .field("content", &self.types(BlockKind::Content))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panics_become_plugin_errors() {
        let result: Result<(), PluginError> = call_plugin(|| panic!("kaboom"));
        let error = result.expect_err("panic should be caught");
        assert_eq!(error.summary, "Plugin panicked");
        assert_eq!(error.detail.as_deref(), Some("kaboom"));
    }

    #[test]
    fn plain_results_pass_through() {
        assert_eq!(call_plugin(|| Ok::<_, PluginError>(3)), Ok(3));
        assert_eq!(
            call_plugin(|| Err::<(), _>(PluginError::new("nope"))),
            Err(PluginError::new("nope"))
        );
    }
}
