//! Google Gemini LLM provider implementation

use super::{with_retry, LlmError, LlmProvider, Message, MessageRole};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-1.5-pro";
const MAX_OUTPUT_TOKENS: u32 = 2048;
const TEMPERATURE: f32 = 0.7;

/// Google Gemini API provider
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    retry_attempts: usize,
    retry_delay: Duration,
}

/// Gemini-specific request structures
#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
struct GeminiGenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

impl GeminiProvider {
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

    /// Convert our Message format to Gemini's. Assistant turns map to the
    /// "model" role; the system prompt rides in `systemInstruction`.
    fn convert_messages(
        messages: &[Message],
        system: Option<&str>,
    ) -> (Option<GeminiContent>, Vec<GeminiContent>) {
        let system_instruction = system.map(|text| GeminiContent {
            parts: vec![GeminiPart {
                text: Some(text.to_string()),
            }],
            role: None,
        });

        let contents = messages
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .map(|m| {
                let role = match m.role {
                    MessageRole::Assistant => "model",
                    _ => "user",
                };
                GeminiContent {
                    parts: vec![GeminiPart {
                        text: Some(m.content.clone()),
                    }],
                    role: Some(role.to_string()),
                }
            })
            .collect();

        (system_instruction, contents)
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn provider_name(&self) -> &str {
        "gemini"
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
            let (system_instruction, contents) = Self::convert_messages(messages, system);
            let request = GeminiRequest {
                contents,
                generation_config: GeminiGenerationConfig {
                    temperature: TEMPERATURE,
                    max_output_tokens: MAX_OUTPUT_TOKENS,
                },
                system_instruction,
            };

            // Gemini authenticates with a key query parameter
            let url = format!(
                "{}/models/{}:generateContent?key={}",
                self.base_url, model, self.api_key
            );

            let response = self
                .client
                .post(&url)
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
                    400 | 404 if text.contains("model") => Err(LlmError::InvalidModel {
                        model: model.to_string(),
                    }),
                    _ => Err(LlmError::RequestFailed {
                        status,
                        message: text,
                    }),
                };
            }

            let gemini_response: GeminiResponse =
                response.json().await.map_err(|e| LlmError::InvalidResponse {
                    message: format!("Failed to parse Gemini response: {}", e),
                })?;

            gemini_response
                .candidates
                .into_iter()
                .next()
                .and_then(|candidate| {
                    candidate
                        .content
                        .parts
                        .into_iter()
                        .find_map(|part| part.text)
                })
                .ok_or_else(|| LlmError::InvalidResponse {
                    message: "No candidates in Gemini response".to_string(),
                })
        };

        with_retry(self.retry_attempts, self.retry_delay, operation).await
    }
}
