//! Error types for the Deepscribe core library.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering text generation, search, research input validation and configuration.
//!
//! Report assembly never surfaces an error to the caller: generation failures
//! inside the report pipeline degrade to fallback values, and structural
//! problems are recorded in the quality report instead.

/// Top-level error type for the Deepscribe core library.
#[derive(Debug, thiserror::Error)]
pub enum ScribeError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Research error: {0}")]
    Research(#[from] ResearchError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the text generation service.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Malformed structured output: {message}")]
    MalformedOutput { message: String, raw: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },

    #[error("Gave up after {attempts} attempts: {last_error}")]
    ExhaustedRetries { attempts: u32, last_error: String },
}

impl LlmError {
    /// Whether the failure is transient and worth another attempt.
    ///
    /// Server-side 5xx responses surface as `ApiRequest` with a "Server error"
    /// prefix and are treated as transient as well.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::RateLimited { .. } | LlmError::Timeout { .. } | LlmError::Connection { .. } => {
                true
            }
            LlmError::ApiRequest { message } => message.starts_with("Server error"),
            _ => false,
        }
    }

    /// Raw response text carried by a malformed-output failure.
    pub fn raw_output(&self) -> Option<&str> {
        match self {
            LlmError::MalformedOutput { raw, .. } => Some(raw),
            _ => None,
        }
    }
}

/// Errors from a search backend.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SearchError {
    #[error("Search request for '{query}' failed: {message}")]
    Request { query: String, message: String },

    #[error("Failed to parse search response for '{query}': {message}")]
    ResponseParse { query: String, message: String },

    #[error("Search for '{query}' timed out after {timeout_secs}s")]
    Timeout { query: String, timeout_secs: u64 },
}

/// Fatal errors of a research run, raised before any external call is made.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResearchError {
    #[error("Research query is empty")]
    EmptyQuery,

    #[error("Parameter '{name}' = {value} is outside [{min}, {max}]")]
    InvalidParameter {
        name: String,
        value: u32,
        min: u32,
        max: u32,
    },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration for '{key}': {message}")]
    Invalid { key: String, message: String },

    #[error("Configuration load failed: {0}")]
    Load(#[from] Box<figment::Error>),
}

/// Convenience type alias for results using `ScribeError`.
pub type Result<T> = std::result::Result<T, ScribeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_llm() {
        let err = ScribeError::Llm(LlmError::RateLimited {
            retry_after_secs: 30,
        });
        assert_eq!(
            err.to_string(),
            "LLM error: Rate limited by provider, retry after 30s"
        );
    }

    #[test]
    fn test_error_display_research() {
        let err = ScribeError::Research(ResearchError::InvalidParameter {
            name: "breadth".into(),
            value: 12,
            min: 2,
            max: 10,
        });
        assert_eq!(
            err.to_string(),
            "Research error: Parameter 'breadth' = 12 is outside [2, 10]"
        );
    }

    #[test]
    fn test_error_display_search() {
        let err = SearchError::Timeout {
            query: "rust async".into(),
            timeout_secs: 10,
        };
        assert!(err.to_string().contains("rust async"));
        assert!(err.to_string().contains("10s"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: ScribeError = io_err.into();
        assert!(matches!(err, ScribeError::Io(_)));
    }

    #[test]
    fn test_transient_classification() {
        assert!(LlmError::Timeout { timeout_secs: 5 }.is_transient());
        assert!(
            LlmError::Connection {
                message: "reset".into()
            }
            .is_transient()
        );
        assert!(
            LlmError::ApiRequest {
                message: "Server error (503): busy".into()
            }
            .is_transient()
        );
        assert!(
            !LlmError::ApiRequest {
                message: "HTTP 400: bad".into()
            }
            .is_transient()
        );
        assert!(
            !LlmError::MalformedOutput {
                message: "no json".into(),
                raw: "plain".into()
            }
            .is_transient()
        );
        assert!(
            !LlmError::AuthFailed {
                provider: "openai".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn test_raw_output_only_for_malformed() {
        let err = LlmError::MalformedOutput {
            message: "expected object".into(),
            raw: "## Heading".into(),
        };
        assert_eq!(err.raw_output(), Some("## Heading"));
        assert_eq!(LlmError::Timeout { timeout_secs: 1 }.raw_output(), None);
    }
}
