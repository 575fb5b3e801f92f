//! Anthropic Claude LLM provider implementation

use super::{with_retry, LlmError, LlmProvider, Message, MessageRole};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-3-opus-20240229";
const MAX_TOKENS: u32 = 4000;
const TEMPERATURE: f32 = 0.7;

/// Anthropic Claude API provider
pub struct ClaudeProvider {
    client: Client,
    api_key: String,
    base_url: String,
    retry_attempts: usize,
    retry_delay: Duration,
}

/// Claude-specific request structures
#[derive(Debug, Serialize)]
struct ClaudeRequest<'a> {
    model: &'a str,
    messages: Vec<ClaudeMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct ClaudeMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    content: Vec<ClaudeContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ClaudeContentBlock {
    #[serde(default)]
    text: Option<String>,
}

impl ClaudeProvider {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_else(|_| Client::new()),
            api_key,
            base_url,
            retry_attempts: 3,
            retry_delay: Duration::from_millis(1000),
        }
    }

    /// Convert our Message format to Claude's. The messages array carries
    /// only user/assistant turns; system text goes in the request's
    /// top-level `system` field.
    fn convert_messages(messages: &[Message]) -> Vec<ClaudeMessage<'_>> {
        messages
            .iter()
            .filter_map(|m| {
                let role = match m.role {
                    MessageRole::User => "user",
                    MessageRole::Assistant => "assistant",
                    MessageRole::System => return None,
                };
                Some(ClaudeMessage {
                    role,
                    content: &m.content,
                })
            })
            .collect()
    }
}

#[async_trait]
impl LlmProvider for ClaudeProvider {
    fn provider_name(&self) -> &str {
        "claude"
    }

    fn default_model(&self) -> &str {
        DEFAULT_MODEL
    }

    async fn send_message(
        &self,
        messages: &[Message],
        system: Option<&str>,
        model: &str,
    ) -> Result<String, LlmError> {
        let operation = || async {
            let request = ClaudeRequest {
                model,
                messages: Self::convert_messages(messages),
                max_tokens: MAX_TOKENS,
                temperature: TEMPERATURE,
                system,
            };

            let url = format!("{}/messages", self.base_url);
            let response = self
                .client
                .post(&url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("Content-Type", "application/json")
                .json(&request)
                .send()
                .await?;

            if !response.status().is_success() {
                let status = response.status().as_u16();
                let text = response.text().await.unwrap_or_default();

                return match status {
                    429 => Err(LlmError::RateLimit {
                        retry_after: Some(60),
                    }),
                    401 | 403 => Err(LlmError::Authentication {
                        message: "Invalid API key".to_string(),
                    }),
                    404 if text.contains("model") => Err(LlmError::InvalidModel {
                        model: model.to_string(),
                    }),
                    _ => Err(LlmError::RequestFailed {
                        status,
                        message: text,
                    }),
                };
            }

            let claude_response: ClaudeResponse =
                response.json().await.map_err(|e| LlmError::InvalidResponse {
                    message: format!("Failed to parse Claude response: {}", e),
                })?;

            claude_response
                .content
                .into_iter()
                .find_map(|block| block.text)
                .ok_or_else(|| LlmError::InvalidResponse {
                    message: "No text content in Claude response".to_string(),
                })
        };

        with_retry(self.retry_attempts, self.retry_delay, operation).await
    }
}
