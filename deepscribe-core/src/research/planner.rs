//! Query planning and reflection.
//!
//! Both steps ask the model for a short list of strings, recover the list from
//! whatever shape the answer takes, and clean it up: list markers and preamble
//! lines are stripped, whitespace is normalized and duplicates collapse.
//! A failed call yields an empty list; the orchestrator treats that as an
//! exhausted branch rather than an error.

use super::session::ResearchState;
use crate::brain::Brain;
use crate::recovery::{RecoveryChain, parse_line_list};
use crate::types::{GenerationRequest, GenerationTask, LengthConvention};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use tracing::{debug, warn};

const PLAN_PROMPT: &str = "You are a research strategist. Propose focused web search queries \
that advance research on the topic. Build on what is already known, pursue the open \
directions, and avoid repeating earlier queries. Write each query as plain search terms, \
in natural language, without numbering or commentary.";

const REFLECT_PROMPT: &str = "You are a research analyst. Given the topic and the newest \
findings, list the most important open questions that further research should answer. \
Each question must be specific and self-contained.";

/// Shortest usable query or direction, in the run's length units.
const MIN_QUERY_LENGTH: usize = 2;

const CLARIFY_PROMPT: &str = "You prepare research briefs. Restate the research topic as one \
precise paragraph: name the core question, the scope and the aspects worth investigating. Do not \
ask questions back and do not add commentary.";

/// Longest accepted research brief, in characters.
const MAX_FOCUS_CHARS: usize = 600;

const PREAMBLE_PREFIXES: &[&str] = &[
    "here are",
    "here is",
    "here's",
    "i will",
    "i'll",
    "i would",
    "sure",
    "certainly",
    "below are",
    "the following",
    "these queries",
    "these questions",
];

#[derive(Debug, Deserialize)]
struct QueryList {
    #[serde(alias = "directions", alias = "questions", alias = "items")]
    queries: Vec<String>,
}

fn list_chain(name: &'static str) -> RecoveryChain<QueryList> {
    RecoveryChain::json(name)
        .then("string_array", |raw| {
            serde_json::from_str::<Vec<String>>(raw.trim())
                .ok()
                .map(|queries| QueryList { queries })
        })
        .then("line_list", |raw| {
            let queries = parse_line_list(raw);
            (!queries.is_empty()).then_some(QueryList { queries })
        })
}

/// Collapse internal whitespace and strip wrapping quotes.
pub fn normalize_query(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .trim()
        .to_string()
}

pub(crate) fn is_preamble(line: &str) -> bool {
    let lower = line.to_lowercase();
    lower.ends_with(':') || PREAMBLE_PREFIXES.iter().any(|p| lower.starts_with(p))
}

/// Clean a generated list: drop preambles and fragments, collapse duplicates,
/// skip anything in `exclude`, and keep at most `limit` entries in order.
///
/// Fragments are entries shorter than `min_length` units of `convention`, so
/// queries in scripts without word separators are measured in characters.
pub fn clean_list(
    items: impl IntoIterator<Item = String>,
    exclude: &[String],
    convention: LengthConvention,
    min_length: usize,
    limit: usize,
) -> Vec<String> {
    let mut seen: HashSet<String> = exclude.iter().map(|q| normalize_query(q).to_lowercase()).collect();
    let mut cleaned = Vec::new();
    for item in items {
        let query = normalize_query(crate::recovery::strip_list_marker(&item));
        if query.is_empty() || is_preamble(&query) || convention.count(&query) < min_length {
            continue;
        }
        if seen.insert(query.to_lowercase()) {
            cleaned.push(query);
        }
        if cleaned.len() >= limit {
            break;
        }
    }
    cleaned
}

fn bullet_list<'a>(items: impl IntoIterator<Item = &'a str>) -> String {
    let mut out = String::new();
    for item in items {
        out.push_str("- ");
        out.push_str(item);
        out.push('\n');
    }
    if out.is_empty() {
        out.push_str("(none)\n");
    }
    out
}

/// Generates queries for each level and directions after it.
pub struct QueryPlanner {
    max_context_learnings: usize,
}

impl QueryPlanner {
    pub fn new(max_context_learnings: usize) -> Self {
        Self {
            max_context_learnings,
        }
    }

    fn planning_context(&self, state: &ResearchState) -> String {
        let learnings = state
            .recent_learnings(self.max_context_learnings)
            .iter()
            .map(|l| l.text.as_str());
        let focus = state
            .focus
            .as_deref()
            .map(|f| format!("Research focus: {f}\n"))
            .unwrap_or_default();
        format!(
            "Topic: {}\n{focus}Research level: {} of {}\nReturn up to {} queries.\n\n\
             Known learnings:\n{}\nOpen directions:\n{}\nQueries already issued:\n{}",
            state.query,
            state.current_level(),
            state.depth,
            state.breadth,
            bullet_list(learnings),
            bullet_list(state.directions.iter().map(String::as_str)),
            bullet_list(state.issued_queries.iter().map(String::as_str)),
        )
    }

    /// Sharpen the root query into a one-paragraph research brief.
    ///
    /// Runs without user interaction. Any failure or unusable reply leaves the
    /// run on the original query.
    pub async fn clarify(&self, brain: &Brain, state: &ResearchState) -> Option<String> {
        let context = format!(
            "Research topic: {}\nWrite the brief in {}.",
            state.query,
            state.language.display_name()
        );
        let request = GenerationRequest::new(GenerationTask::Clarify, CLARIFY_PROMPT, context).with_max_length(256);
        match brain.generate_text(request).await {
            Ok(raw) => {
                let brief = raw
                    .split("\n\n")
                    .map(normalize_query)
                    .find(|p| !p.is_empty() && !is_preamble(p));
                match brief {
                    Some(brief) if brief.chars().count() <= MAX_FOCUS_CHARS => {
                        debug!(focus = %brief, "Research query refined");
                        Some(brief)
                    }
                    _ => {
                        warn!("Query refinement reply unusable; keeping the original query");
                        None
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Query refinement failed; keeping the original query");
                None
            }
        }
    }

    /// Up to `breadth` distinct, non-empty queries not issued before.
    pub async fn plan(&self, brain: &Brain, state: &ResearchState) -> Vec<String> {
        let request = GenerationRequest::new(
            GenerationTask::PlanQueries,
            PLAN_PROMPT,
            self.planning_context(state),
        )
        .with_schema(json!({
            "type": "object",
            "properties": { "queries": { "type": "array", "items": { "type": "string" } } },
            "required": ["queries"]
        }));

        match brain.generate_structured(request, &list_chain("queries")).await {
            Ok(list) => {
                let queries = clean_list(
                    list.queries,
                    &state.issued_queries,
                    state.language.length_convention(),
                    MIN_QUERY_LENGTH,
                    state.breadth as usize,
                );
                debug!(level = state.current_level(), count = queries.len(), "Planned queries");
                queries
            }
            Err(e) => {
                warn!(level = state.current_level(), error = %e, "Query planning failed; branch exhausted");
                Vec::new()
            }
        }
    }

    /// Follow-up questions given the learnings gathered at this level.
    pub async fn reflect(
        &self,
        brain: &Brain,
        state: &ResearchState,
        new_learnings_from: usize,
    ) -> Vec<String> {
        let fresh = &state.learnings[new_learnings_from.min(state.learnings.len())..];
        let prior = state
            .recent_learnings(self.max_context_learnings)
            .iter()
            .filter(|l| !fresh.contains(l))
            .map(|l| l.text.as_str());
        let context = format!(
            "Topic: {}\nReturn up to {} questions.\n\nNew learnings:\n{}\nEarlier learnings:\n{}",
            state.query,
            state.breadth,
            bullet_list(fresh.iter().map(|l| l.text.as_str())),
            bullet_list(prior),
        );
        let request = GenerationRequest::new(GenerationTask::Reflect, REFLECT_PROMPT, context)
            .with_schema(json!({
                "type": "object",
                "properties": { "directions": { "type": "array", "items": { "type": "string" } } },
                "required": ["directions"]
            }));

        match brain.generate_structured(request, &list_chain("directions")).await {
            Ok(list) => clean_list(
                list.queries,
                &[],
                state.language.length_convention(),
                MIN_QUERY_LENGTH,
                state.breadth as usize,
            ),
            Err(e) => {
                warn!(level = state.current_level(), error = %e, "Reflection failed; no new directions");
                Vec::new()
            }
        }
    }
}
