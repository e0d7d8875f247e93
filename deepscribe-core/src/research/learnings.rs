//! Learning extraction from a single source.

use super::sources::{Reliability, SourceRecord};
use crate::brain::Brain;
use crate::error::LlmError;
use crate::recovery::{RecoveryChain, parse_line_list};
use crate::types::{GenerationRequest, GenerationTask, SearchHit, truncate_chars};
use serde::Deserialize;
use serde_json::json;

const EXTRACT_PROMPT: &str = "You are a meticulous research assistant. Extract the key \
learnings from the source below that are relevant to the research query. Each learning \
must be a single self-contained factual statement that includes concrete entities, \
numbers and dates where the source gives them. Also rate the source's reliability as \
HIGH, MEDIUM or LOW.";

/// Characters of source content sent to the model.
const MAX_CONTENT_CHARS: usize = 6_000;

/// Learnings and reliability rating extracted from one source.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub learnings: Vec<String>,
    pub reliability: Option<Reliability>,
}

#[derive(Debug, Deserialize)]
struct RawExtraction {
    #[serde(alias = "facts", alias = "findings")]
    learnings: Vec<String>,
    #[serde(default)]
    reliability: Option<String>,
}

fn extraction_chain() -> RecoveryChain<RawExtraction> {
    RecoveryChain::json("learnings").then("line_list", |raw| {
        let learnings: Vec<String> = parse_line_list(raw)
            .into_iter()
            .filter(|line| !line.ends_with(':'))
            .collect();
        (!learnings.is_empty()).then_some(RawExtraction {
            learnings,
            reliability: None,
        })
    })
}

/// Extracts learnings from newly admitted sources.
pub struct LearningExtractor {
    max_learnings: usize,
}

impl LearningExtractor {
    pub fn new(max_learnings: usize) -> Self {
        Self { max_learnings }
    }

    pub async fn extract(
        &self,
        brain: &Brain,
        query: &str,
        record: &SourceRecord,
        hit: &SearchHit,
    ) -> Result<Extraction, LlmError> {
        let context = format!(
            "Research query: {}\nSource title: {}\nSource URL: {}\nReturn at most {} learnings.\n\n\
             Source content:\n{}",
            query,
            record.title,
            record.url,
            self.max_learnings,
            truncate_chars(hit.content(), MAX_CONTENT_CHARS),
        );
        let request = GenerationRequest::new(GenerationTask::ExtractLearnings, EXTRACT_PROMPT, context)
            .with_schema(json!({
                "type": "object",
                "properties": {
                    "learnings": { "type": "array", "items": { "type": "string" } },
                    "reliability": { "type": "string", "enum": ["HIGH", "MEDIUM", "LOW"] }
                },
                "required": ["learnings"]
            }));

        let raw = brain.generate_structured(request, &extraction_chain()).await?;

        let mut learnings: Vec<String> = Vec::new();
        for text in raw.learnings {
            let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
            if text.is_empty() || learnings.iter().any(|l| l.eq_ignore_ascii_case(&text)) {
                continue;
            }
            learnings.push(text);
            if learnings.len() >= self.max_learnings {
                break;
            }
        }

        Ok(Extraction {
            learnings,
            reliability: raw.reliability.as_deref().and_then(Reliability::parse),
        })
    }
}
