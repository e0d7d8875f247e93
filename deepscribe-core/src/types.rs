//! Core types shared across the research and report subsystems.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Target length of the generated report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DetailLevel {
    Brief,
    #[default]
    Standard,
    Detailed,
    /// Total length for the whole report, in the run's length units.
    Custom(u32),
}

impl fmt::Display for DetailLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetailLevel::Brief => write!(f, "brief"),
            DetailLevel::Standard => write!(f, "standard"),
            DetailLevel::Detailed => write!(f, "detailed"),
            DetailLevel::Custom(n) => write!(f, "custom_{n}"),
        }
    }
}

impl FromStr for DetailLevel {
    type Err = String;

    /// Accepts `brief`, `standard`, `detailed`, `custom_<n>` and `custom(<n>)`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        match lower.as_str() {
            "brief" => return Ok(DetailLevel::Brief),
            "standard" => return Ok(DetailLevel::Standard),
            "detailed" => return Ok(DetailLevel::Detailed),
            _ => {}
        }

        let count = lower
            .strip_prefix("custom_")
            .or_else(|| {
                lower
                    .strip_prefix("custom(")
                    .and_then(|rest| rest.strip_suffix(')'))
            })
            .ok_or_else(|| format!("unknown detail level '{s}'"))?;

        match count.trim().parse::<u32>() {
            Ok(n) if n > 0 => Ok(DetailLevel::Custom(n)),
            _ => Err(format!("invalid custom length in '{s}'")),
        }
    }
}

impl TryFrom<String> for DetailLevel {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DetailLevel> for String {
    fn from(level: DetailLevel) -> Self {
        level.to_string()
    }
}

/// How text length is measured for floors and the final report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LengthConvention {
    /// Whitespace-delimited words.
    Words,
    /// Letters and ideographs, ignoring whitespace and punctuation.
    Characters,
}

impl LengthConvention {
    /// Measure `text` in this convention's units.
    pub fn count(&self, text: &str) -> usize {
        match self {
            LengthConvention::Words => text.split_whitespace().count(),
            LengthConvention::Characters => text.chars().filter(|c| c.is_alphanumeric()).count(),
        }
    }

    /// Unit name used in prompts and suggestions.
    pub fn unit(&self) -> &'static str {
        match self {
            LengthConvention::Words => "words",
            LengthConvention::Characters => "characters",
        }
    }
}

/// The first `max_chars` characters of `text`, cut on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Output language, stored as a lowercase language code (`en`, `zh`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Language(String);

impl Language {
    pub fn new(code: impl AsRef<str>) -> Self {
        let code = code.as_ref().trim().to_lowercase();
        if code.is_empty() {
            Self::default()
        } else {
            Self(code)
        }
    }

    pub fn code(&self) -> &str {
        &self.0
    }

    /// Languages written without word separators are measured in characters.
    pub fn length_convention(&self) -> LengthConvention {
        let primary = self.0.split(['-', '_']).next().unwrap_or_default();
        match primary {
            "zh" | "ja" | "ko" => LengthConvention::Characters,
            _ => LengthConvention::Words,
        }
    }

    /// Human-readable name for prompt instructions.
    pub fn display_name(&self) -> &str {
        let primary = self.0.split(['-', '_']).next().unwrap_or_default();
        match primary {
            "en" => "English",
            "zh" => "Chinese",
            "ja" => "Japanese",
            "ko" => "Korean",
            "es" => "Spanish",
            "fr" => "French",
            "de" => "German",
            "pt" => "Portuguese",
            "it" => "Italian",
            _ => &self.0,
        }
    }
}

impl Default for Language {
    fn default() -> Self {
        Self("en".to_string())
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Report writing style; only influences prompt content and citation style.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStyle {
    #[default]
    Standard,
    Academic,
    Business,
    LiteratureReview,
}

impl ReportStyle {
    pub fn citation_style(&self) -> CitationStyle {
        match self {
            ReportStyle::Academic | ReportStyle::LiteratureReview => CitationStyle::Apa,
            ReportStyle::Standard | ReportStyle::Business => CitationStyle::Web,
        }
    }
}

impl FromStr for ReportStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "standard" => Ok(ReportStyle::Standard),
            "academic" => Ok(ReportStyle::Academic),
            "business" => Ok(ReportStyle::Business),
            "literature_review" => Ok(ReportStyle::LiteratureReview),
            other => Err(format!("unknown report style '{other}'")),
        }
    }
}

/// Rendering style for bibliography entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CitationStyle {
    /// `[n] *domain*, "title", url`
    #[default]
    Web,
    /// `[n] title. (n.d.). domain. url`
    Apa,
}

/// A single result returned by a search backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub snippet: String,
    /// Full page text when the backend provides it.
    #[serde(default)]
    pub raw_content: Option<String>,
}

impl SearchHit {
    pub fn new(url: impl Into<String>, title: impl Into<String>, snippet: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            snippet: snippet.into(),
            raw_content: None,
        }
    }

    /// Best available text for learning extraction.
    pub fn content(&self) -> &str {
        self.raw_content
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(&self.snippet)
    }
}

/// What a generation call is for. Used for logging and to route scripted test responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationTask {
    Clarify,
    PlanQueries,
    ExtractLearnings,
    Reflect,
    Title,
    Themes,
    DraftSection,
    EnhanceSection,
    ExpandSection,
    EvaluateQuality,
}

impl fmt::Display for GenerationTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GenerationTask::Clarify => "clarify",
            GenerationTask::PlanQueries => "plan_queries",
            GenerationTask::ExtractLearnings => "extract_learnings",
            GenerationTask::Reflect => "reflect",
            GenerationTask::Title => "title",
            GenerationTask::Themes => "themes",
            GenerationTask::DraftSection => "draft_section",
            GenerationTask::EnhanceSection => "enhance_section",
            GenerationTask::ExpandSection => "expand_section",
            GenerationTask::EvaluateQuality => "evaluate_quality",
        };
        f.write_str(name)
    }
}

/// Limits and output shape for one generation call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationConstraints {
    /// Maximum tokens to generate.
    pub max_length: Option<usize>,
    pub temperature: Option<f32>,
    /// JSON schema the response should conform to.
    pub structured_schema: Option<serde_json::Value>,
}

/// A request to the text generation service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub task: GenerationTask,
    /// Instruction for the model (system role).
    pub prompt: String,
    /// Material the instruction applies to (user role).
    pub context: String,
    pub constraints: GenerationConstraints,
}

impl GenerationRequest {
    pub fn new(task: GenerationTask, prompt: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            task,
            prompt: prompt.into(),
            context: context.into(),
            constraints: GenerationConstraints::default(),
        }
    }

    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.constraints.structured_schema = Some(schema);
        self
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.constraints.max_length = Some(max_length);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.constraints.temperature = Some(temperature);
        self
    }

    pub fn is_structured(&self) -> bool {
        self.constraints.structured_schema.is_some()
    }
}

/// Result of a generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOutput {
    pub text: String,
    /// Parsed object when a schema was requested and the response conformed.
    pub structured: Option<serde_json::Value>,
}

impl GenerationOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            structured: None,
        }
    }
}
