//! OpenAI chat completions provider implementation

use super::{with_retry, LlmError, LlmProvider, Message, MessageRole};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o";
const MAX_TOKENS: u32 = 512;
const TEMPERATURE: f32 = 0.7;

/// OpenAI API provider
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    retry_attempts: usize,
    retry_delay: Duration,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiProvider {
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

    /// Build the messages array; the system prompt, when present, leads it
    /// as a `system` role turn.
    fn convert_messages<'a>(
        messages: &'a [Message],
        system: Option<&'a str>,
    ) -> Vec<ChatMessage<'a>> {
        let mut converted = Vec::with_capacity(messages.len() + 1);
        if let Some(system) = system {
            converted.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        for m in messages {
            let role = match m.role {
                MessageRole::System => "system",
                MessageRole::User => "user",
                MessageRole::Assistant => "assistant",
            };
            converted.push(ChatMessage {
                role,
                content: &m.content,
            });
        }
        converted
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn provider_name(&self) -> &str {
        "openai"
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
            let request = ChatRequest {
                model,
                messages: Self::convert_messages(messages, system),
                max_tokens: MAX_TOKENS,
                temperature: TEMPERATURE,
            };

            let url = format!("{}/chat/completions", self.base_url);
            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
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

            let chat_response: ChatResponse =
                response.json().await.map_err(|e| LlmError::InvalidResponse {
                    message: format!("Failed to parse OpenAI response: {}", e),
                })?;

            chat_response
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.message.content)
                .ok_or_else(|| LlmError::InvalidResponse {
                    message: "No choices in OpenAI response".to_string(),
                })
        };

        with_retry(self.retry_attempts, self.retry_delay, operation).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_leads_the_messages_array() {
        let messages = vec![Message::user("hello")];
        let converted = OpenAiProvider::convert_messages(&messages, Some("be brief"));
        assert_eq!(converted.len(), 2);
        assert_eq!(converted[0].role, "system");
        assert_eq!(converted[0].content, "be brief");
        assert_eq!(converted[1].role, "user");
    }

    #[test]
    fn no_system_prompt_means_no_system_turn() {
        let messages = vec![Message::user("hello"), Message::assistant("hi")];
        let converted = OpenAiProvider::convert_messages(&messages, None);
        assert_eq!(converted.len(), 2);
        assert_eq!(converted[0].role, "user");
    }
}
