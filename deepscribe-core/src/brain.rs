//! Brain module: text generation service abstraction and interaction.
//!
//! Defines the `TextGenerationService` trait for model-agnostic generation calls,
//! the `Brain` wrapper that adds per-call timeouts, bounded retries and
//! structured-output recovery, and a scriptable mock for tests.

use crate::config::RetryConfig;
use crate::error::LlmError;
use crate::providers::with_retry;
use crate::recovery::RecoveryChain;
use crate::types::{GenerationOutput, GenerationRequest, GenerationTask};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

/// Trait for text generation backends.
#[async_trait]
pub trait TextGenerationService: Send + Sync {
    /// Generate a response for the request.
    ///
    /// When the request carries a structured schema and the response does not
    /// parse, implementations return `LlmError::MalformedOutput` with the raw text.
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationOutput, LlmError>;

    /// Return the model name.
    fn model_name(&self) -> &str;
}

/// Generation front-end used by the orchestrator and the report assembler.
///
/// Retries live here and only here: callers never re-issue a failed call themselves.
#[derive(Clone)]
pub struct Brain {
    service: Arc<dyn TextGenerationService>,
    retry: RetryConfig,
    call_timeout: Duration,
}

impl Brain {
    pub fn new(
        service: Arc<dyn TextGenerationService>,
        retry: RetryConfig,
        call_timeout: Duration,
    ) -> Self {
        Self {
            service,
            retry,
            call_timeout,
        }
    }

    pub fn model_name(&self) -> &str {
        self.service.model_name()
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Send a request with timeout and retry on transient errors.
    pub async fn generate(&self, request: GenerationRequest) -> Result<GenerationOutput, LlmError> {
        let task = request.task;
        debug!(
            task = %task,
            model = self.service.model_name(),
            structured = request.is_structured(),
            "Sending generation request"
        );
        with_retry(&self.retry, task, || self.call_once(request.clone())).await
    }

    /// Send a request and return non-empty trimmed text.
    pub async fn generate_text(&self, request: GenerationRequest) -> Result<String, LlmError> {
        non_empty_text(self.generate(request).await?)
    }

    /// Like [`Brain::generate_text`] but a single attempt: no retry on transient
    /// errors. For callers that run their own bounded attempt loop.
    pub async fn generate_text_once(&self, request: GenerationRequest) -> Result<String, LlmError> {
        debug!(task = %request.task, model = self.service.model_name(), "Sending single-attempt request");
        non_empty_text(self.call_once(request).await?)
    }

    /// Send a structured request and decode it into `T`.
    ///
    /// A schema-conforming response is decoded directly. Otherwise the raw text,
    /// whether it came back as plain output or inside a malformed-output error,
    /// is handed to `chain`.
    pub async fn generate_structured<T: DeserializeOwned>(
        &self,
        request: GenerationRequest,
        chain: &RecoveryChain<T>,
    ) -> Result<T, LlmError> {
        let task = request.task;
        let raw = match self.generate(request).await {
            Ok(output) => {
                if let Some(value) = output.structured {
                    match serde_json::from_value::<T>(value) {
                        Ok(decoded) => return Ok(decoded),
                        Err(e) => {
                            debug!(task = %task, error = %e, "Structured output did not match target shape");
                        }
                    }
                }
                output.text
            }
            Err(LlmError::MalformedOutput { raw, .. }) => raw,
            Err(e) => return Err(e),
        };

        chain.recover(&raw).ok_or_else(|| {
            warn!(task = %task, "Structured output could not be recovered");
            LlmError::MalformedOutput {
                message: format!("no recovery strategy matched for {task}"),
                raw,
            }
        })
    }

    async fn call_once(&self, request: GenerationRequest) -> Result<GenerationOutput, LlmError> {
        match tokio::time::timeout(self.call_timeout, self.service.generate(request)).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout {
                timeout_secs: self.call_timeout.as_secs(),
            }),
        }
    }
}

fn non_empty_text(output: GenerationOutput) -> Result<String, LlmError> {
    let text = output.text.trim();
    if text.is_empty() {
        return Err(LlmError::MalformedOutput {
            message: "empty response".to_string(),
            raw: output.text,
        });
    }
    Ok(text.to_string())
}

type Responder = dyn Fn(&GenerationRequest) -> Result<String, LlmError> + Send + Sync;

/// A scriptable generation service for testing.
///
/// Queued replies are returned first, in order; afterwards the responder decides.
/// Requests with a schema get JSON-mode semantics: text that does not parse as
/// JSON comes back as `LlmError::MalformedOutput`.
pub struct MockTextGenerator {
    model: String,
    responder: Box<Responder>,
    queued: Mutex<Vec<Result<String, LlmError>>>,
    calls: Mutex<Vec<GenerationRequest>>,
}

impl MockTextGenerator {
    /// A mock that answers every request with a fixed placeholder.
    pub fn new() -> Self {
        Self::with_handler(|request| {
            if request.is_structured() {
                Ok("{}".to_string())
            } else {
                Ok("Mock response.".to_string())
            }
        })
    }

    /// A mock that answers every request with `text`.
    pub fn with_response(text: &str) -> Self {
        let text = text.to_string();
        Self::with_handler(move |_| Ok(text.clone()))
    }

    /// A mock driven by a closure over the request.
    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&GenerationRequest) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        Self {
            model: "mock-model".to_string(),
            responder: Box::new(handler),
            queued: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A mock whose every call fails with `error`.
    pub fn always_failing(error: LlmError) -> Self {
        Self::with_handler(move |_| Err(error.clone()))
    }

    /// Queue a reply for the next call.
    pub fn queue_response(&self, reply: Result<String, LlmError>) {
        self.queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(reply);
    }

    /// All requests received so far, in arrival order.
    pub fn calls(&self) -> Vec<GenerationRequest> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of requests received for `task`.
    pub fn call_count(&self, task: GenerationTask) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.task == task)
            .count()
    }
}

impl Default for MockTextGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextGenerationService for MockTextGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationOutput, LlmError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        let queued = {
            let mut queued = self.queued.lock().unwrap_or_else(PoisonError::into_inner);
            (!queued.is_empty()).then(|| queued.remove(0))
        };
        let text = match queued {
            Some(reply) => reply?,
            None => (self.responder)(&request)?,
        };

        if request.is_structured() {
            return match serde_json::from_str::<serde_json::Value>(text.trim()) {
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
