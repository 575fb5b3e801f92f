//! planchat - an LLM chat assistant grounded in cached Planfix data
//!
//! This library wraps the Planfix REST API behind a file-backed cache
//! pipeline (a primary task snapshot plus derived views), and enriches LLM
//! prompts with facts pulled from those views.

pub mod cache;
pub mod config;
pub mod enrich;
pub mod llm;
pub mod planfix;
pub mod utils;

// Re-export commonly used types
pub use cache::{CacheService, CacheStats, ProjectAggregate, UserAggregate};
pub use config::{Config, ConfigManager, ProviderConfig};
pub use enrich::ContextEnricher;
pub use llm::{LlmError, LlmProvider, LlmProviderFactory, Message, MessageRole};
pub use planfix::{PlanfixClient, PlanfixService, Task};
pub use utils::errors::{ConfigError, PlanchatError};

/// The main result type used throughout the application
pub type Result<T> = std::result::Result<T, PlanchatError>;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "planchat";
