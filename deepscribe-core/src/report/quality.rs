//! Quality evaluation of a finished report.
//!
//! Combines one model-scored review with deterministic checks. The model review
//! may fail; the structural checks and their suggestions never do.

use super::citations::CitationValidation;
use super::document::FinalDocument;
use super::prompts::{QUALITY_PROMPT, language_instruction, style_guidelines};
use crate::brain::Brain;
use crate::error::LlmError;
use crate::recovery::RecoveryChain;
use crate::types::{GenerationRequest, GenerationTask, Language, ReportStyle, truncate_chars};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::LazyLock;
use tracing::{info, warn};

pub const MAX_SCORE: f64 = 10.0;

static OVERALL_SCORE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)overall[_ ]?score\W{0,5}(\d+(?:\.\d+)?)").expect("score pattern is valid")
});

/// Fixed scoring dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityDimension {
    ContentCompleteness,
    LogicalConsistency,
    StyleConformance,
    CitationPresence,
}

impl QualityDimension {
    pub const ALL: [QualityDimension; 4] = [
        QualityDimension::ContentCompleteness,
        QualityDimension::LogicalConsistency,
        QualityDimension::StyleConformance,
        QualityDimension::CitationPresence,
    ];

    /// Map a loosely named dimension from model output.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.to_lowercase();
        if label.contains("complete") || label.contains("content") {
            Some(Self::ContentCompleteness)
        } else if label.contains("logic") || label.contains("consisten") {
            Some(Self::LogicalConsistency)
        } else if label.contains("style") || label.contains("language") {
            Some(Self::StyleConformance)
        } else if label.contains("citation") {
            Some(Self::CitationPresence)
        } else {
            None
        }
    }
}

impl fmt::Display for QualityDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ContentCompleteness => "content_completeness",
            Self::LogicalConsistency => "logical_consistency",
            Self::StyleConformance => "style_conformance",
            Self::CitationPresence => "citation_presence",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub area: String,
    pub suggestion: String,
}

impl Suggestion {
    pub fn new(area: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self {
            area: area.into(),
            suggestion: suggestion.into(),
        }
    }
}

/// Structural problems found in the finished report. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StructuralViolation {
    OutOfRangeCitations { ids: Vec<u32> },
    UnregisteredCitations { ids: Vec<u32> },
    PlaceholderSection { heading: String },
    SectionBelowFloor { heading: String, length: usize, target: usize },
}

impl fmt::Display for StructuralViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfRangeCitations { ids } => write!(f, "citation ids out of range: {ids:?}"),
            Self::UnregisteredCitations { ids } => write!(f, "unregistered citation ids: {ids:?}"),
            Self::PlaceholderSection { heading } => write!(f, "placeholder section '{heading}'"),
            Self::SectionBelowFloor {
                heading,
                length,
                target,
            } => write!(f, "section '{heading}' has {length} of {target} required"),
        }
    }
}

/// Scores, citation checks and suggestions for one report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    /// `None` when the model evaluation was unavailable.
    pub overall_score: Option<f64>,
    pub dimension_scores: BTreeMap<QualityDimension, f64>,
    pub citation_validation: CitationValidation,
    pub suggestions: Vec<Suggestion>,
    /// Headings of sections still below their floor.
    pub flagged_sections: Vec<String>,
    pub violations: Vec<StructuralViolation>,
}

impl QualityReport {
    pub fn evaluation_available(&self) -> bool {
        self.overall_score.is_some()
    }

    pub fn is_flagged(&self, heading: &str) -> bool {
        self.flagged_sections.iter().any(|h| h == heading)
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawSuggestion {
    Structured {
        #[serde(default, alias = "section", alias = "dimension")]
        area: String,
        #[serde(alias = "text", alias = "recommendation")]
        suggestion: String,
    },
    Plain(String),
}

#[derive(Debug, Deserialize)]
struct RawEvaluation {
    #[serde(alias = "overall", alias = "score")]
    overall_score: f64,
    #[serde(default, alias = "scores", alias = "dimensions")]
    dimension_scores: HashMap<String, f64>,
    #[serde(default)]
    suggestions: Vec<RawSuggestion>,
}

fn evaluation_chain() -> RecoveryChain<RawEvaluation> {
    RecoveryChain::json("evaluation").then("score_line", |raw| {
        let caps = OVERALL_SCORE_LINE.captures(raw)?;
        let overall_score = caps[1].parse::<f64>().ok()?;
        Some(RawEvaluation {
            overall_score,
            dimension_scores: HashMap::new(),
            suggestions: Vec::new(),
        })
    })
}

fn clamp_score(score: f64) -> Option<f64> {
    score.is_finite().then(|| score.clamp(0.0, MAX_SCORE))
}

fn format_ids(ids: &BTreeSet<u32>) -> String {
    ids.iter().map(|id| format!("[{id}]")).collect::<Vec<_>>().join(", ")
}

/// Structural checks over the finished document and its citation validation.
pub fn structural_violations(
    document: &FinalDocument,
    validation: &CitationValidation,
) -> Vec<StructuralViolation> {
    let mut violations = Vec::new();
    if !validation.out_of_range_ids_in_text.is_empty() {
        violations.push(StructuralViolation::OutOfRangeCitations {
            ids: validation.out_of_range_ids_in_text.iter().copied().collect(),
        });
    }
    if !validation.unregistered_ids_in_text.is_empty() {
        violations.push(StructuralViolation::UnregisteredCitations {
            ids: validation.unregistered_ids_in_text.iter().copied().collect(),
        });
    }
    for section in document.sections() {
        if section.placeholder {
            violations.push(StructuralViolation::PlaceholderSection {
                heading: section.heading.clone(),
            });
        } else if section.below_floor {
            violations.push(StructuralViolation::SectionBelowFloor {
                heading: section.heading.clone(),
                length: section.word_count(document.convention()),
                target: section.target_min_words,
            });
        }
    }
    violations
}

/// Suggestions that follow directly from the structural checks.
pub fn deterministic_suggestions(
    document: &FinalDocument,
    validation: &CitationValidation,
    violations: &[StructuralViolation],
) -> Vec<Suggestion> {
    let unit = document.convention().unit();
    let mut suggestions: Vec<Suggestion> = violations
        .iter()
        .map(|violation| match violation {
            StructuralViolation::OutOfRangeCitations { ids }
            | StructuralViolation::UnregisteredCitations { ids } => Suggestion::new(
                "citations",
                format!(
                    "Citation markers {} do not match any reference entry; correct or remove them.",
                    format_ids(&ids.iter().copied().collect::<BTreeSet<u32>>())
                ),
            ),
            StructuralViolation::PlaceholderSection { heading } => Suggestion::new(
                heading.clone(),
                "This section could not be generated; regenerate it from the findings.",
            ),
            StructuralViolation::SectionBelowFloor {
                heading,
                length,
                target,
            } => Suggestion::new(
                heading.clone(),
                format!(
                    "Section has {length} {unit}, below its target of {target} {unit}; expand it with further findings."
                ),
            ),
        })
        .collect();

    if !validation.unused_registered_ids.is_empty() {
        suggestions.push(Suggestion::new(
            "citations",
            format!(
                "References {} are listed but never cited in the text.",
                format_ids(&validation.unused_registered_ids)
            ),
        ));
    }
    suggestions
}

/// Runs the quality pass.
pub struct QualityEvaluator {
    max_chars: usize,
}

impl QualityEvaluator {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    pub async fn evaluate(
        &self,
        brain: &Brain,
        document: &FinalDocument,
        topic: &str,
        style: ReportStyle,
        language: &Language,
        validation: CitationValidation,
    ) -> QualityReport {
        let violations = structural_violations(document, &validation);
        for violation in &violations {
            warn!(violation = %violation, "Structural violation in report");
        }

        let mut report = QualityReport {
            flagged_sections: document
                .sections()
                .iter()
                .filter(|s| s.below_floor)
                .map(|s| s.heading.clone())
                .collect(),
            ..Default::default()
        };

        match self.model_review(brain, document, topic, style, language).await {
            Ok(raw) => {
                report.overall_score = clamp_score(raw.overall_score);
                for (label, score) in raw.dimension_scores {
                    if let (Some(dimension), Some(score)) =
                        (QualityDimension::from_label(&label), clamp_score(score))
                    {
                        report.dimension_scores.insert(dimension, score);
                    }
                }
                report.suggestions = raw
                    .suggestions
                    .into_iter()
                    .map(|s| match s {
                        RawSuggestion::Structured { area, suggestion } => {
                            let area = if area.trim().is_empty() { "general".to_string() } else { area };
                            Suggestion::new(area, suggestion)
                        }
                        RawSuggestion::Plain(text) => Suggestion::new("general", text),
                    })
                    .filter(|s| !s.suggestion.trim().is_empty())
                    .collect();
                info!(score = ?report.overall_score, "Quality evaluation complete");
            }
            Err(e) => {
                warn!(error = %e, "Quality evaluation unavailable");
            }
        }

        report
            .suggestions
            .extend(deterministic_suggestions(document, &validation, &violations));
        report.citation_validation = validation;
        report.violations = violations;
        report
    }

    async fn model_review(
        &self,
        brain: &Brain,
        document: &FinalDocument,
        topic: &str,
        style: ReportStyle,
        language: &Language,
    ) -> Result<RawEvaluation, LlmError> {
        let context = format!(
            "Report topic: {topic}\nExpected style: {}\n{}\n\nReport:\n{}",
            style_guidelines(style),
            language_instruction(language),
            truncate_chars(document.markdown(), self.max_chars),
        );
        let dimension_properties: serde_json::Map<String, serde_json::Value> = QualityDimension::ALL
            .iter()
            .map(|d| (d.to_string(), json!({ "type": "number" })))
            .collect();
        let request = GenerationRequest::new(GenerationTask::EvaluateQuality, QUALITY_PROMPT, context)
            .with_temperature(0.2)
            .with_schema(json!({
                "type": "object",
                "properties": {
                    "overall_score": { "type": "number" },
                    "dimension_scores": { "type": "object", "properties": dimension_properties },
                    "suggestions": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "area": { "type": "string" },
                                "suggestion": { "type": "string" }
                            }
                        }
                    }
                },
                "required": ["overall_score"]
            }));
        brain.generate_structured(request, &evaluation_chain()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::MockTextGenerator;
    use crate::config::RetryConfig;
    use crate::report::citations::validate_against;
    use crate::report::document::{ReportDocument, Section};
    use crate::types::LengthConvention;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;

    fn make_brain(mock: MockTextGenerator) -> Brain {
        Brain::new(Arc::new(mock), RetryConfig::immediate(1), Duration::from_secs(5))
    }

    fn make_final() -> FinalDocument {
        let mut doc = ReportDocument::new("T", LengthConvention::Words);
        let mut ok = Section::new("Costs", "", 2);
        ok.set_body("Cheap storage [1] [7].".to_string());
        let mut short = Section::new("Outlook", "", 50);
        short.set_body("Brief.".to_string());
        short.below_floor = true;
        let mut failed = Section::new("Policy", "", 50);
        failed.set_placeholder();
        doc.push_section(ok);
        doc.push_section(short);
        doc.push_section(failed);
        doc.finalize(&[])
    }

    fn make_validation(doc: &FinalDocument) -> CitationValidation {
        validate_against(&doc.body_text(), &[1, 2].into_iter().collect())
    }

    #[test]
    fn test_from_label() {
        assert_eq!(
            QualityDimension::from_label("Content Completeness"),
            Some(QualityDimension::ContentCompleteness)
        );
        assert_eq!(
            QualityDimension::from_label("language_style"),
            Some(QualityDimension::StyleConformance)
        );
        assert_eq!(QualityDimension::from_label("novelty"), None);
    }

    #[test]
    fn test_structural_violations() {
        let doc = make_final();
        let violations = structural_violations(&doc, &make_validation(&doc));
        assert_eq!(
            violations,
            vec![
                StructuralViolation::OutOfRangeCitations { ids: vec![7] },
                StructuralViolation::SectionBelowFloor {
                    heading: "Outlook".into(),
                    length: 1,
                    target: 50
                },
                StructuralViolation::PlaceholderSection {
                    heading: "Policy".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_evaluate_with_model_scores() {
        let brain = make_brain(MockTextGenerator::with_response(
            r#"{"overall_score": 12, "dimension_scores": {"content_completeness": 7.5, "Citation presence": -1, "novelty": 3},
                "suggestions": [{"area": "Costs", "suggestion": "Add regional data."}, "Tighten the outlook."]}"#,
        ));
        let doc = make_final();
        let validation = make_validation(&doc);
        let report = QualityEvaluator::new(1000)
            .evaluate(&brain, &doc, "grid", ReportStyle::Standard, &Language::default(), validation)
            .await;

        assert_eq!(report.overall_score, Some(10.0));
        assert_eq!(report.dimension_scores.get(&QualityDimension::ContentCompleteness), Some(&7.5));
        assert_eq!(report.dimension_scores.get(&QualityDimension::CitationPresence), Some(&0.0));
        assert_eq!(report.dimension_scores.len(), 2);
        assert_eq!(report.suggestions[0], Suggestion::new("Costs", "Add regional data."));
        assert_eq!(report.suggestions[1].area, "general");
        assert!(report.is_flagged("Outlook"));
        assert!(!report.is_flagged("Policy"));
        assert!(report.suggestions.iter().any(|s| s.area == "Outlook"));
        assert!(report.suggestions.iter().any(|s| s.suggestion.contains("[7]")));
        assert!(report.suggestions.iter().any(|s| s.suggestion.contains("[2]")));
    }

    #[tokio::test]
    async fn test_evaluate_unavailable_keeps_checks() {
        let brain = make_brain(MockTextGenerator::always_failing(LlmError::Connection {
            message: "down".into(),
        }));
        let doc = make_final();
        let validation = make_validation(&doc);
        let report = QualityEvaluator::new(1000)
            .evaluate(&brain, &doc, "grid", ReportStyle::Standard, &Language::default(), validation.clone())
            .await;

        assert!(!report.evaluation_available());
        assert!(report.dimension_scores.is_empty());
        assert_eq!(report.citation_validation, validation);
        assert_eq!(report.violations.len(), 3);
        assert!(report.suggestions.iter().any(|s| s.area == "Outlook"));
        assert!(report.suggestions.iter().any(|s| s.area == "Policy"));
    }

    #[tokio::test]
    async fn test_evaluate_asks_for_global_consistency() {
        let mock = Arc::new(MockTextGenerator::with_response(
            r#"{"overall_score": 7, "suggestions": [{"area": "global_consistency", "suggestion": "Costs and Outlook disagree on 2030 prices."}]}"#,
        ));
        let brain = Brain::new(mock.clone(), RetryConfig::immediate(1), Duration::from_secs(5));
        let doc = make_final();
        let report = QualityEvaluator::new(1000)
            .evaluate(&brain, &doc, "grid", ReportStyle::Standard, &Language::default(), make_validation(&doc))
            .await;

        let request = &mock.calls()[0];
        for topic in ["coherence", "transitions", "contradictions", "redundant"] {
            assert!(request.prompt.contains(topic), "prompt lacks {topic}");
        }
        assert_eq!(report.suggestions[0].area, "global_consistency");
    }

    #[tokio::test]
    async fn test_evaluate_from_score_line() {
        let brain = make_brain(MockTextGenerator::with_response("Overall score: 6.5 / 10. Decent report."));
        let doc = make_final();
        let report = QualityEvaluator::new(1000)
            .evaluate(&brain, &doc, "grid", ReportStyle::Business, &Language::default(), make_validation(&doc))
            .await;
        assert_eq!(report.overall_score, Some(6.5));
    }

    #[test]
    fn test_report_serializes() {
        let mut report = QualityReport::default();
        report.dimension_scores.insert(QualityDimension::StyleConformance, 8.0);
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["dimension_scores"]["style_conformance"], 8.0);
        assert!(value["overall_score"].is_null());
    }
}
