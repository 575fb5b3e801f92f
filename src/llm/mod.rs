//! LLM provider abstraction and implementations

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub mod claude;
pub mod gemini;
pub mod openai;

pub use claude::ClaudeProvider;
pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;

/// Error types for LLM operations
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    #[error("Rate limit exceeded: {retry_after:?}")]
    RateLimit { retry_after: Option<u64> },

    #[error("Invalid model: {model}")]
    InvalidModel { model: String },

    #[error("Request failed: {status}: {message}")]
    RequestFailed { status: u16, message: String },

    #[error("Invalid response format: {message}")]
    InvalidResponse { message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown error: {message}")]
    Unknown { message: String },
}

impl LlmError {
    /// Whether a retry might succeed
    fn is_retryable(&self) -> bool {
        match self {
            LlmError::RateLimit { .. } | LlmError::Network(_) => true,
            LlmError::RequestFailed { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Represents a message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Role of a message in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// The main LLM provider trait that all implementations must implement
///
/// Providers receive the conversation history plus an optional system prompt
/// and return the assistant's reply text. Provider-specific wire formats
/// (message shapes, header schemes, system-prompt placement) stay inside the
/// implementations.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Get the provider name (e.g., "claude", "openai", "gemini")
    fn provider_name(&self) -> &str;

    /// The model used when the caller does not name one
    fn default_model(&self) -> &str;

    /// Send a conversation to the model and return the reply text
    async fn send_message(
        &self,
        messages: &[Message],
        system: Option<&str>,
        model: &str,
    ) -> Result<String, LlmError>;
}

/// Retry policy shared by the provider implementations: exponential backoff
/// on rate limits, network failures, and 5xx responses; everything else
/// fails immediately.
pub(crate) async fn with_retry<F, Fut, T>(
    attempts: usize,
    base_delay: Duration,
    operation: F,
) -> Result<T, LlmError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, LlmError>> + Send,
{
    let mut last_error = None;

    for attempt in 0..=attempts {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if attempt < attempts && e.is_retryable() {
                    let factor = match &e {
                        // Rate limits get a longer pause
                        LlmError::RateLimit { .. } => 2 * (attempt as u32 + 1),
                        _ => attempt as u32 + 1,
                    };
                    warn!("LLM request failed (attempt {}): {}", attempt + 1, e);
                    tokio::time::sleep(base_delay * factor).await;
                    last_error = Some(e);
                } else {
                    return Err(e);
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| LlmError::Unknown {
        message: "Retry operation failed with no error".to_string(),
    }))
}

/// Factory for creating LLM providers
pub struct LlmProviderFactory;

impl LlmProviderFactory {
    /// Create a provider by name
    pub fn create_provider(
        provider_name: &str,
        config: HashMap<String, String>,
    ) -> Result<Box<dyn LlmProvider>, LlmError> {
        let api_key = |name: &str| {
            config
                .get("api_key")
                .cloned()
                .ok_or_else(|| LlmError::Authentication {
                    message: format!("{} API key not provided", name),
                })
        };

        match provider_name.to_lowercase().as_str() {
            "claude" => Ok(Box::new(ClaudeProvider::new(api_key("Claude")?))),
            "openai" => Ok(Box::new(OpenAiProvider::new(api_key("OpenAI")?))),
            "gemini" => Ok(Box::new(GeminiProvider::new(api_key("Gemini")?))),
            _ => Err(LlmError::Unknown {
                message: format!("Unknown provider: {}", provider_name),
            }),
        }
    }

    /// List all available provider names
    pub fn list_providers() -> Vec<&'static str> {
        vec!["claude", "openai", "gemini"]
    }
}
