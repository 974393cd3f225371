pub mod attributes;
pub mod content;
pub mod data;
pub mod engine;
pub mod executor;
pub mod limiter;
pub mod narrow;
pub mod plugin;
pub mod plugins;
pub mod query;
pub mod resolver;

pub use crate::content::evaluate_content_blocks;
pub use crate::data::evaluate_data_blocks;
pub use crate::engine::{Engine, EngineOptions};
pub use crate::executor::{Command, Executor, ExecutorGuard, Status};
pub use crate::limiter::{Limiter, LimiterPermit};
pub use crate::narrow::{LocalContexts, evaluate_queries};
pub use crate::plugin::{ContentPlugin, DataPlugin, PluginError, Registry};
pub use crate::query::{Query, QueryError};
pub use crate::resolver::{Resolver, decode};
