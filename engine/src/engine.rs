//! Top-level evaluation of a named document.

use std::sync::Arc;

use fabric::{Config, Diagnostic, Diagnostics, RawBody};

use crate::content::evaluate_content_blocks;
use crate::data::evaluate_data_blocks;
use crate::limiter::{Limiter, default_parallelism};
use crate::narrow::evaluate_queries;
use crate::plugin::Registry;
use crate::resolver::Resolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Upper bound on plugin calls running at once, across all stages.
    pub max_parallel: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            max_parallel: default_parallelism(),
        }
    }
}

/// Holds the decoded tree and evaluates documents from it.
pub struct Engine {
    registry: Arc<Registry>,
    limiter: Arc<Limiter>,
    config: Config,
}

impl Engine {
    pub fn new(registry: Registry, options: EngineOptions) -> Self {
        Engine {
            registry: Arc::new(registry),
            limiter: Limiter::shared(options.max_parallel),
            config: Config::default(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn limiter(&self) -> &Arc<Limiter> {
        &self.limiter
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Decode a file body into the tree. Blocks of later calls may
    /// reference blocks of earlier ones.
    pub fn load(&mut self, body: &RawBody) -> Diagnostics {
        let mut resolver = Resolver::with_config(&self.registry, std::mem::take(&mut self.config));
        resolver.decode_body(body);
        let (config, diagnostics) = resolver.finish();
        self.config = config;
        tracing::debug!(
            documents = self.config.documents.len(),
            errors = diagnostics.error_count(),
            "loaded configuration"
        );
        diagnostics
    }

    /// Run the data, query and content stages for `document`.
    ///
    /// The first failing stage ends the evaluation; its error carries every
    /// diagnostic produced so far.
    pub fn evaluate(&self, document: &str) -> Result<(String, Diagnostics), Diagnostics> {
        let Some(doc) = self.config.document(document) else {
            let available: Vec<&str> = self.config.documents.iter().map(|d| d.name.as_str()).collect();
            return Err(Diagnostic::error("Document not found")
                .with_detail(format!(
                    "no document named `{}` (available: {})",
                    document,
                    if available.is_empty() {
                        "none".to_string()
                    } else {
                        available.join(", ")
                    }
                ))
                .into());
        };

        let mut diagnostics = Diagnostics::new();
        let limiter = Some(Arc::clone(&self.limiter));

        let dictionary = {
            let _span = tracing::info_span!("data", document).entered();
            let (dictionary, warnings) =
                evaluate_data_blocks(&self.registry, limiter.clone(), &doc.data).map_err(|e| prepend(&diagnostics, e))?;
            diagnostics.extend(warnings);
            Arc::new(dictionary)
        };

        let contexts = {
            let _span = tracing::info_span!("query", document).entered();
            let (contexts, warnings) =
                evaluate_queries(&dictionary, limiter.clone(), &doc.content).map_err(|e| prepend(&diagnostics, e))?;
            diagnostics.extend(warnings);
            contexts
        };

        let _span = tracing::info_span!("content", document).entered();
        let (text, warnings) = evaluate_content_blocks(&self.registry, limiter, &doc.content, &contexts)
            .map_err(|e| prepend(&diagnostics, e))?;
        diagnostics.extend(warnings);
        Ok((text, diagnostics))
    }
}

fn prepend(earlier: &Diagnostics, later: Diagnostics) -> Diagnostics {
    let mut all = earlier.clone();
    all.extend(later);
    all
}
