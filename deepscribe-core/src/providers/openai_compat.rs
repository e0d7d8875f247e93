//! OpenAI-compatible chat completions adapter.
//!
//! Works with any endpoint that speaks the `/chat/completions` protocol.
//! Structured requests use JSON mode and carry the schema in the system prompt.

use crate::brain::TextGenerationService;
use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::types::{GenerationOutput, GenerationRequest};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;

/// Generation service backed by an OpenAI-compatible HTTP API.
pub struct OpenAiCompatibleService {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: usize,
    temperature: f32,
    timeout_secs: u64,
}

impl OpenAiCompatibleService {
    /// Create a new service from configuration.
    ///
    /// Reads the API key from `config.api_key`, then from the environment variable
    /// named by `config.api_key_env`. Local endpoints work without a key.
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let is_local = config
            .base_url
            .as_ref()
            .map(|u| u.contains("localhost") || u.contains("127.0.0.1"))
            .unwrap_or(false);

        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var(&config.api_key_env).ok())
            .or_else(|| {
                if is_local {
                    debug!("No API key set for local provider; using dummy bearer token");
                    Some("local".to_string())
                } else {
                    None
                }
            })
            .ok_or_else(|| LlmError::AuthFailed {
                provider: format!(
                    "OpenAI-compatible: env var '{}' not set",
                    config.api_key_env
                ),
            })?;

        Self::new_with_key(config, api_key)
    }

    /// Create a new service with an explicit API key.
    pub fn new_with_key(config: &LlmConfig, api_key: String) -> Result<Self, LlmError> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
            .trim_end_matches('/')
            .to_string();

        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| LlmError::Connection {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url,
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout_secs: config.timeout_secs,
        })
    }

    /// Build the request body for a generation request.
    fn build_body(&self, request: &GenerationRequest) -> Value {
        let mut system = request.prompt.clone();
        if let Some(schema) = &request.constraints.structured_schema {
            system.push_str(
                "\n\nRespond with a single JSON object that conforms to this JSON schema:\n",
            );
            system.push_str(&schema.to_string());
        }

        let mut messages = vec![json!({ "role": "system", "content": system })];
        if !request.context.is_empty() {
            messages.push(json!({ "role": "user", "content": request.context }));
        }

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": request.constraints.temperature.unwrap_or(self.temperature),
            "max_tokens": request.constraints.max_length.unwrap_or(self.max_tokens),
            "stream": false,
        });
        if request.is_structured() {
            body["response_format"] = json!({ "type": "json_object" });
        }
        body
    }

    /// Extract the assistant text from a chat completion response.
    fn parse_response(json: &Value) -> Result<String, LlmError> {
        let choice = json
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or_else(|| LlmError::ResponseParse {
                message: "No choices in response".to_string(),
            })?;

        choice
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| LlmError::ResponseParse {
                message: "No message content in response".to_string(),
            })
    }

    /// Map HTTP error status codes to appropriate LlmError variants.
    fn map_http_error(status: reqwest::StatusCode, body: &str, retry_after: Option<u64>) -> LlmError {
        match status.as_u16() {
            401 | 403 => {
                debug!(body = %body, "Authentication failed");
                LlmError::AuthFailed {
                    provider: "OpenAI-compatible".to_string(),
                }
            }
            429 => LlmError::RateLimited {
                retry_after_secs: retry_after.unwrap_or(5),
            },
            code if code >= 500 => LlmError::ApiRequest {
                message: format!("Server error ({}): {}", status, body),
            },
            _ => LlmError::ApiRequest {
                message: format!("HTTP {}: {}", status, body),
            },
        }
    }
}

#[async_trait]
impl TextGenerationService for OpenAiCompatibleService {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationOutput, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(&request);

        debug!(url = %url, model = %self.model, task = %request.task, "Sending chat completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout {
                        timeout_secs: self.timeout_secs,
                    }
                } else {
                    LlmError::Connection {
                        message: format!("Request failed: {}", e),
                    }
                }
            })?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let response_body = response.text().await.map_err(|e| LlmError::Connection {
            message: format!("Failed to read response body: {}", e),
        })?;

        if !status.is_success() {
            return Err(Self::map_http_error(status, &response_body, retry_after));
        }

        let json: Value =
            serde_json::from_str(&response_body).map_err(|e| LlmError::ResponseParse {
                message: format!("Invalid JSON: {}", e),
            })?;
        let text = Self::parse_response(&json)?;

        if request.is_structured() {
            return match serde_json::from_str::<Value>(text.trim()) {
                Ok(value) => Ok(GenerationOutput {
                    text,
                    structured: Some(value),
                }),
                Err(e) => Err(LlmError::MalformedOutput {
                    message: e.to_string(),
                    raw: text,
                }),
            };
        }
        Ok(GenerationOutput::text(text))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
