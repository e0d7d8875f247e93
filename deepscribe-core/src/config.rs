//! Configuration system for Deepscribe.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> CLI args.
//! Configuration is loaded from `~/.config/deepscribe/config.toml` and/or
//! `.deepscribe/config.toml` in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::report::assembler::MAX_EXPANSION_PASSES;
use crate::types::{DetailLevel, Language, ReportStyle};

/// Allowed range for the exploration depth.
pub const DEPTH_RANGE: (u32, u32) = (1, 5);
/// Allowed range for the number of queries per level.
pub const BREADTH_RANGE: (u32, u32) = (2, 10);

/// Top-level configuration for a Deepscribe run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeepscribeConfig {
    pub llm: LlmConfig,
    pub search: SearchConfig,
    pub research: ResearchConfig,
    pub report: ReportConfig,
    pub retry: RetryConfig,
}

impl DeepscribeConfig {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("research.depth", self.research.depth, DEPTH_RANGE)?;
        check_range("research.breadth", self.research.breadth, BREADTH_RANGE)?;

        if self.research.max_concurrent_searches == 0 {
            return Err(invalid("research.max_concurrent_searches", "must be at least 1"));
        }
        if self.research.max_results_per_query == 0 {
            return Err(invalid("research.max_results_per_query", "must be at least 1"));
        }
        if self.report.max_concurrent_sections == 0 {
            return Err(invalid("report.max_concurrent_sections", "must be at least 1"));
        }
        if self.report.max_themes == 0 {
            return Err(invalid("report.max_themes", "must be at least 1"));
        }
        if self.report.expansion_passes > MAX_EXPANSION_PASSES {
            return Err(invalid("report.expansion_passes", "at most 2 passes are allowed"));
        }
        if self.report.title_attempts == 0 {
            return Err(invalid("report.title_attempts", "must be at least 1"));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(invalid("llm.temperature", "must be within [0, 2]"));
        }
        Ok(())
    }
}

fn check_range(key: &str, value: u32, (min, max): (u32, u32)) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(invalid(key, &format!("{value} is outside [{min}, {max}]")));
    }
    Ok(())
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        message: message.to_string(),
    }
}

/// Configuration for the OpenAI-compatible text generation endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Model identifier (e.g., "gpt-4o-2024-08-06").
    pub model: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Explicit API key; takes precedence over `api_key_env`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Optional base URL override for the API endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Maximum tokens to generate in a response.
    pub max_tokens: usize,
    /// Default temperature for generation.
    pub temperature: f32,
    /// Per-call timeout.
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-2024-08-06".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            api_key: None,
            base_url: None,
            max_tokens: 4096,
            temperature: 0.6,
            timeout_secs: 120,
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Configuration for the web search backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    pub user_agent: String,
    /// Per-query timeout.
    pub timeout_secs: u64,
    /// Maximum results requested from the backend per query.
    pub max_results: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("deepscribe/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 15,
            max_results: 10,
        }
    }
}

impl SearchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Configuration for the depth/breadth exploration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchConfig {
    /// Number of exploration levels, within `DEPTH_RANGE`.
    pub depth: u32,
    /// Queries planned per level, within `BREADTH_RANGE`.
    pub breadth: u32,
    /// Bound on concurrent external calls during a level.
    pub max_concurrent_searches: usize,
    /// Results ingested from each query, in backend order.
    pub max_results_per_query: usize,
    /// Learnings kept from a single source.
    pub max_learnings_per_source: usize,
    /// Most recent learnings included in planning and reflection prompts.
    pub max_context_learnings: usize,
    /// Ask the model to sharpen the root query into a research brief before planning.
    pub refine_query: bool,
    /// Report length target carried by the run into assembly.
    pub detail_level: DetailLevel,
    /// Output language; also fixes the run's length convention.
    pub language: Language,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            depth: 2,
            breadth: 4,
            max_concurrent_searches: 4,
            max_results_per_query: 3,
            max_learnings_per_source: 5,
            max_context_learnings: 40,
            refine_query: false,
            detail_level: DetailLevel::Standard,
            language: Language::default(),
        }
    }
}

/// Configuration for report assembly.
///
/// Length target and language are not set here: they belong to the run
/// (`ResearchConfig`) and reach the assembler through the research outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportConfig {
    pub style: ReportStyle,
    /// Upper bound on extracted themes (sections).
    pub max_themes: usize,
    /// Bound on concurrent section generation calls.
    pub max_concurrent_sections: usize,
    /// Expansion passes for sections still below their floor (0-2).
    pub expansion_passes: u32,
    /// Attempts at title generation before the fallback title is used.
    pub title_attempts: u32,
    /// Sources whose learnings are kept for the report, ranked by credibility.
    pub max_sources_in_prompt: usize,
    /// Characters of the finished report sent to quality evaluation.
    pub max_evaluation_chars: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            style: ReportStyle::Standard,
            max_themes: 7,
            max_concurrent_sections: 3,
            expansion_passes: 2,
            title_attempts: 3,
            max_sources_in_prompt: 25,
            max_evaluation_chars: 15_000,
        }
    }
}

/// Backoff policy for transient failures at the service adapter boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts in total, including the first call.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 32_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// A policy that retries immediately; used by tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            backoff_multiplier: 1.0,
        }
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `DEEPSCRIBE_`)
/// 3. Workspace-local config (`.deepscribe/config.toml`)
/// 4. User config (`~/.config/deepscribe/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&DeepscribeConfig>,
) -> Result<DeepscribeConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(DeepscribeConfig::default()));

    if let Some(dirs) = directories::ProjectDirs::from("dev", "deepscribe", "deepscribe") {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".deepscribe").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // DEEPSCRIBE_RESEARCH__DEPTH, DEEPSCRIBE_LLM__MODEL, etc.
    figment = figment.merge(Env::prefixed("DEEPSCRIBE_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Load configuration and reject values outside their allowed ranges.
pub fn load_validated_config(
    workspace: Option<&Path>,
    overrides: Option<&DeepscribeConfig>,
) -> Result<DeepscribeConfig, ConfigError> {
    let config = load_config(workspace, overrides)?;
    config.validate()?;
    Ok(config)
}
