//! The report assembly pipeline.
//!
//! Stages run strictly in order: title, themes, citations, draft, enhancement,
//! expansion, finalization and quality evaluation. Every stage that talks to
//! the model has a fallback, so assembly always yields a document.

use super::citations::{CitationEntry, CitationRegistry};
use super::document::{FinalDocument, LengthTargets, ReportDocument, Section, clean_section_body};
use super::prompts::{
    DRAFT_PROMPT, ENHANCE_PROMPT, EXPAND_PROMPT, THEMES_PROMPT, TITLE_PROMPT, language_instruction,
    length_instruction, section_context, shortfall_instruction,
};
use super::quality::{QualityEvaluator, QualityReport};
use crate::brain::Brain;
use crate::config::ReportConfig;
use crate::error::LlmError;
use crate::providers::compute_exponential_backoff;
use crate::recovery::{RecoveryChain, parse_line_list, parse_markdown_headings, strip_list_marker};
use crate::research::planner::is_preamble;
use crate::research::session::{Learning, ResearchOutcome};
use crate::research::sources::SourceId;
use crate::types::{GenerationRequest, GenerationTask, Language, ReportStyle};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Hard bound on expansion passes, whatever the configuration says.
pub const MAX_EXPANSION_PASSES: u32 = 2;

const MAX_TITLE_CHARS: usize = 200;
const FALLBACK_TITLE_CHARS: usize = 80;
const TITLE_CONTEXT_LEARNINGS: usize = 20;

/// A section theme: heading plus what it should cover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Theme {
    #[serde(alias = "heading", alias = "name")]
    pub title: String,
    #[serde(default, alias = "summary")]
    pub description: String,
}

impl Theme {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ThemeList {
    #[serde(alias = "sections", alias = "topics")]
    themes: Vec<Theme>,
}

fn theme_chain() -> RecoveryChain<ThemeList> {
    RecoveryChain::json("themes")
        .then("theme_array", |raw| {
            serde_json::from_str::<Vec<Theme>>(raw.trim())
                .ok()
                .map(|themes| ThemeList { themes })
        })
        .then("markdown_headings", |raw| {
            let themes: Vec<Theme> = parse_markdown_headings(raw)
                .into_iter()
                .map(|(title, description)| Theme::new(title, description))
                .collect();
            (!themes.is_empty()).then_some(ThemeList { themes })
        })
        .then("line_list", |raw| {
            let themes: Vec<Theme> = parse_line_list(raw)
                .into_iter()
                .filter(|line| !is_preamble(line) && line.chars().any(char::is_alphanumeric))
                .map(|line| match line.split_once(':') {
                    Some((title, description)) => Theme::new(title.trim(), description.trim()),
                    None => Theme::new(line, ""),
                })
                .collect();
            (!themes.is_empty()).then_some(ThemeList { themes })
        })
}

/// Normalize theme headings, drop blanks and duplicates, cap the count.
pub fn clean_themes(themes: Vec<Theme>, max_themes: usize) -> Vec<Theme> {
    let mut seen = HashSet::new();
    let mut cleaned = Vec::new();
    for theme in themes {
        let title = strip_list_marker(&theme.title)
            .trim_matches(|c: char| c == '*' || c == '#' || c == '"' || c == '`')
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        if !title.chars().any(char::is_alphanumeric) || !seen.insert(title.to_lowercase()) {
            continue;
        }
        cleaned.push(Theme::new(title, theme.description.trim()));
        if cleaned.len() >= max_themes.max(1) {
            break;
        }
    }
    cleaned
}

/// The single theme used when extraction fails.
pub fn fallback_theme(topic: &str, language: &Language) -> Theme {
    let title = match language.code().split(['-', '_']).next() {
        Some("zh") => "主要发现",
        Some("ja") => "主な調査結果",
        _ => "Key Findings",
    };
    Theme::new(title, format!("All findings on {topic}"))
}

/// Pull a usable title out of a model reply.
pub fn clean_title(raw: &str) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty())?;
    let line = line.trim_start_matches('#').trim();
    let line = match line.get(..6) {
        Some(prefix) if prefix.eq_ignore_ascii_case("title:") => &line[6..],
        _ => line,
    };
    let title = line
        .trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '*' | '`' | '“' | '”'))
        .trim()
        .trim_end_matches('.')
        .trim();
    (!title.is_empty() && title.chars().count() <= MAX_TITLE_CHARS).then(|| title.to_string())
}

/// Deterministic title derived from the research query.
pub fn fallback_title(topic: &str) -> String {
    let topic = topic.split_whitespace().collect::<Vec<_>>().join(" ");
    if topic.is_empty() {
        return "Research Report".to_string();
    }
    let mut title = if topic.chars().count() > FALLBACK_TITLE_CHARS {
        let cut: String = topic.chars().take(FALLBACK_TITLE_CHARS).collect();
        match cut.rfind(' ') {
            Some(idx) if idx > 0 => cut[..idx].to_string(),
            _ => cut,
        }
    } else {
        topic
    };
    if let Some(first) = title.chars().next() {
        let upper: String = first.to_uppercase().collect();
        title.replace_range(..first.len_utf8(), &upper);
    }
    title
}

/// Learnings whose sources make it into the report.
///
/// When more than `max_sources` distinct sources back the learnings, only the
/// most credible ones are kept; ties keep first-appearance order.
pub fn select_learnings(outcome: &ResearchOutcome, max_sources: usize) -> Vec<&Learning> {
    let mut order: Vec<SourceId> = Vec::new();
    for learning in &outcome.learnings {
        if outcome.source(learning.source_id).is_some() && !order.contains(&learning.source_id) {
            order.push(learning.source_id);
        }
    }
    if order.len() > max_sources {
        let credibility: HashMap<SourceId, f64> = outcome
            .sources
            .iter()
            .map(|s| (s.id, s.credibility_score))
            .collect();
        let score = |id: &SourceId| credibility.get(id).copied().unwrap_or(0.0);
        order.sort_by(|a, b| score(b).total_cmp(&score(a)));
        order.truncate(max_sources);
        debug!(kept = max_sources, "Source selection capped by credibility");
    }
    let kept: HashSet<SourceId> = order.into_iter().collect();
    outcome
        .learnings
        .iter()
        .filter(|l| kept.contains(&l.source_id))
        .collect()
}

/// A finding with the citation number of its source.
#[derive(Debug, Clone, PartialEq)]
struct CitedFinding {
    citation: u32,
    text: String,
}

fn findings_block(findings: &[CitedFinding]) -> String {
    if findings.is_empty() {
        return "(no findings were gathered)".to_string();
    }
    findings
        .iter()
        .map(|f| format!("[{}] {}", f.citation, f.text))
        .collect::<Vec<_>>()
        .join("\n")
}

fn learnings_block(learnings: &[&Learning], limit: usize) -> String {
    if learnings.is_empty() {
        return "(none)".to_string();
    }
    learnings
        .iter()
        .take(limit)
        .map(|l| format!("- {}", l.text))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Values every section request needs.
struct SectionFrame<'a> {
    topic: &'a str,
    style: ReportStyle,
    language: &'a Language,
    targets: LengthTargets,
    findings: String,
}

impl SectionFrame<'_> {
    fn context(&self, section: &Section) -> String {
        format!(
            "{}\n\n{}",
            section_context(
                self.topic,
                &section.heading,
                &section.description,
                &self.findings,
                self.style,
                self.language,
            ),
            length_instruction(&self.targets),
        )
    }

    fn token_budget(&self) -> usize {
        (self.targets.section_floor * 2).clamp(1024, 16_384)
    }

    fn draft_request(&self, task: GenerationTask, section: &Section) -> GenerationRequest {
        GenerationRequest::new(task, DRAFT_PROMPT, self.context(section)).with_max_length(self.token_budget())
    }

    fn enhance_request(&self, section: &Section) -> GenerationRequest {
        if section.placeholder {
            return self.draft_request(GenerationTask::EnhanceSection, section);
        }
        let context = format!("{}\n\nCurrent section:\n{}", self.context(section), section.body);
        GenerationRequest::new(GenerationTask::EnhanceSection, ENHANCE_PROMPT, context)
            .with_max_length(self.token_budget())
    }

    fn expand_request(&self, section: &Section) -> GenerationRequest {
        if section.placeholder {
            return self.draft_request(GenerationTask::ExpandSection, section);
        }
        let convention = self.targets.convention;
        let context = format!(
            "{}\n{}\n\nCurrent section:\n{}",
            self.context(section),
            shortfall_instruction(section.word_count(convention), section.target_min_words, convention),
            section.body
        );
        GenerationRequest::new(GenerationTask::ExpandSection, EXPAND_PROMPT, context)
            .with_max_length(self.token_budget())
    }
}

/// Output of a full assembly.
#[derive(Debug, Clone, Serialize)]
pub struct AssembledReport {
    pub document: FinalDocument,
    pub markdown: String,
    /// Ordered by numeric id.
    pub citations: Vec<CitationEntry>,
    pub quality: QualityReport,
}

impl AssembledReport {
    /// Write the rendered Markdown report.
    pub fn write_markdown(&self, path: &Path) -> crate::Result<()> {
        std::fs::write(path, &self.markdown)?;
        info!(
            path = %path.display(),
            sections = self.document.sections().len(),
            citations = self.citations.len(),
            "Report written"
        );
        Ok(())
    }

    /// Write the quality report as pretty-printed JSON.
    pub fn write_quality_json(&self, path: &Path) -> crate::Result<()> {
        let json = serde_json::to_string_pretty(&self.quality)?;
        std::fs::write(path, json)?;
        debug!(path = %path.display(), "Quality report written");
        Ok(())
    }
}

/// Builds a cited, length-controlled report from a research outcome.
pub struct ReportAssembler {
    brain: Brain,
    config: ReportConfig,
    evaluator: QualityEvaluator,
}

impl ReportAssembler {
    pub fn new(brain: Brain, config: ReportConfig) -> Self {
        let evaluator = QualityEvaluator::new(config.max_evaluation_chars);
        Self {
            brain,
            config,
            evaluator,
        }
    }

    pub fn config(&self) -> &ReportConfig {
        &self.config
    }

    /// Run every stage. Never fails; degraded stages fall back and are
    /// reported through the quality report.
    pub async fn assemble(&self, outcome: &ResearchOutcome) -> AssembledReport {
        let topic = outcome.query.as_str();
        let language = &outcome.language;
        let style = self.config.style;
        let convention = language.length_convention();
        let retained = select_learnings(outcome, self.config.max_sources_in_prompt);
        info!(
            topic,
            learnings = retained.len(),
            detail = %outcome.detail_level,
            language = %language,
            "Assembling report"
        );

        // 1. Title
        let title = self.generate_title(topic, &retained, language).await;

        // 2. Themes
        let themes = self.extract_themes(topic, &retained, language).await;
        let targets = LengthTargets::derive(outcome.detail_level, themes.len(), convention);
        debug!(
            themes = themes.len(),
            section_floor = targets.section_floor,
            unit = convention.unit(),
            "Length targets derived"
        );

        // 3. Citations
        let registry = CitationRegistry::new(style.citation_style());
        let mut findings = Vec::with_capacity(retained.len());
        for learning in &retained {
            let Some(record) = outcome.source(learning.source_id) else {
                continue;
            };
            let citation = registry.register_source(record);
            registry.record_context(citation, &learning.text);
            findings.push(CitedFinding {
                citation,
                text: learning.text.clone(),
            });
        }
        info!(citations = registry.len(), "Citations registered");

        let frame = SectionFrame {
            topic,
            style,
            language,
            targets,
            findings: findings_block(&findings),
        };
        let mut document = ReportDocument::new(title, convention);
        for theme in themes {
            document.push_section(Section::new(theme.title, theme.description, targets.section_floor));
        }

        // 4-6. Sections
        self.draft_sections(&mut document, &frame).await;
        self.enhance_sections(&mut document, &frame).await;
        self.expand_sections(&mut document, &frame).await;

        // 7. Finalization
        let citations = registry.entries();
        let final_document = document.finalize(&citations);
        info!(
            sections = final_document.sections().len(),
            length = final_document.total_word_count(),
            unit = convention.unit(),
            "Report finalized"
        );

        // 8. Quality
        let validation = registry.validate(&final_document.body_text());
        let quality = self
            .evaluator
            .evaluate(&self.brain, &final_document, topic, style, language, validation)
            .await;

        AssembledReport {
            markdown: final_document.markdown().to_string(),
            document: final_document,
            citations,
            quality,
        }
    }

    async fn generate_title(&self, topic: &str, learnings: &[&Learning], language: &Language) -> String {
        let context = format!(
            "Research topic: {topic}\n{}\n\nKey findings:\n{}",
            language_instruction(language),
            learnings_block(learnings, TITLE_CONTEXT_LEARNINGS)
        );
        let request = GenerationRequest::new(GenerationTask::Title, TITLE_PROMPT, context).with_max_length(64);

        let attempts = self.config.title_attempts.max(1);
        for attempt in 0..attempts {
            // One call per attempt; this loop is the only retry layer for titles
            match self.brain.generate_text_once(request.clone()).await {
                Ok(raw) => match clean_title(&raw) {
                    Some(title) => {
                        info!(title = %title, "Title generated");
                        return title;
                    }
                    None => warn!(attempt = attempt + 1, "Generated title unusable"),
                },
                Err(e) => warn!(attempt = attempt + 1, error = %e, "Title generation failed"),
            }
            if attempt + 1 < attempts {
                let backoff = compute_exponential_backoff(self.brain.retry_config(), attempt);
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }
        }

        let title = fallback_title(topic);
        warn!(title = %title, "Using fallback title");
        title
    }

    async fn extract_themes(&self, topic: &str, learnings: &[&Learning], language: &Language) -> Vec<Theme> {
        let context = format!(
            "Research topic: {topic}\nReturn between 2 and {} themes.\n{}\n\nFindings:\n{}",
            self.config.max_themes,
            language_instruction(language),
            learnings_block(learnings, usize::MAX),
        );
        let request = GenerationRequest::new(GenerationTask::Themes, THEMES_PROMPT, context).with_schema(json!({
            "type": "object",
            "properties": {
                "themes": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "title": { "type": "string" },
                            "description": { "type": "string" }
                        },
                        "required": ["title"]
                    }
                }
            },
            "required": ["themes"]
        }));

        let themes = match self.brain.generate_structured(request, &theme_chain()).await {
            Ok(list) => clean_themes(list.themes, self.config.max_themes),
            Err(e) => {
                warn!(error = %e, "Theme extraction failed; using a single theme");
                Vec::new()
            }
        };
        if themes.is_empty() {
            return vec![fallback_theme(topic, language)];
        }
        info!(count = themes.len(), "Themes extracted");
        themes
    }

    async fn draft_sections(&self, document: &mut ReportDocument, frame: &SectionFrame<'_>) {
        let requests = document
            .sections
            .iter()
            .enumerate()
            .map(|(i, s)| (i, frame.draft_request(GenerationTask::DraftSection, s)))
            .collect();

        for (index, result) in self.generate_bounded(requests).await {
            let section = &mut document.sections[index];
            match result.map(|raw| clean_section_body(&raw, &section.heading)) {
                Ok(body) if !body.is_empty() => section.set_body(body),
                Ok(_) => {
                    warn!(section = %section.heading, "Section draft was empty; using placeholder");
                    section.set_placeholder();
                }
                Err(e) => {
                    warn!(section = %section.heading, error = %e, "Section draft failed; using placeholder");
                    section.set_placeholder();
                }
            }
        }
    }

    async fn enhance_sections(&self, document: &mut ReportDocument, frame: &SectionFrame<'_>) {
        let convention = document.convention;
        let requests = document
            .sections
            .iter()
            .enumerate()
            .map(|(i, s)| (i, frame.enhance_request(s)))
            .collect();

        for (index, result) in self.generate_bounded(requests).await {
            let section = &mut document.sections[index];
            match result {
                Ok(raw) => {
                    let body = clean_section_body(&raw, &section.heading);
                    let before = section.word_count(convention);
                    let after = convention.count(&body);
                    if body.is_empty() {
                        debug!(section = %section.heading, "Enhancement empty; keeping draft");
                    } else if section.placeholder || after >= before {
                        if section.placeholder {
                            info!(section = %section.heading, "Placeholder section regenerated");
                        }
                        section.set_body(body);
                    } else {
                        debug!(section = %section.heading, before, after, "Enhancement shorter; keeping draft");
                    }
                }
                Err(e) => {
                    warn!(section = %section.heading, error = %e, "Section enhancement failed; keeping draft");
                }
            }
        }
    }

    /// Bounded expansion: at most `expansion_passes` passes (never more than
    /// `MAX_EXPANSION_PASSES`), then flag.
    async fn expand_sections(&self, document: &mut ReportDocument, frame: &SectionFrame<'_>) {
        let convention = document.convention;
        for pass in 1..=self.config.expansion_passes.min(MAX_EXPANSION_PASSES) {
            let below = document.sections_below_floor();
            if below.is_empty() {
                break;
            }
            info!(pass, sections = below.len(), "Expanding sections below floor");
            let requests = below
                .into_iter()
                .map(|i| (i, frame.expand_request(&document.sections[i])))
                .collect();

            for (index, result) in self.generate_bounded(requests).await {
                let section = &mut document.sections[index];
                match result {
                    Ok(raw) => {
                        let body = clean_section_body(&raw, &section.heading);
                        let before = section.word_count(convention);
                        let after = convention.count(&body);
                        if !body.is_empty() && (section.placeholder || after > before) {
                            debug!(section = %section.heading, pass, before, after, "Section expanded");
                            section.set_body(body);
                        }
                    }
                    Err(e) => {
                        warn!(section = %section.heading, pass, error = %e, "Section expansion failed");
                    }
                }
            }
        }

        for section in &mut document.sections {
            if !section.meets_floor(convention) {
                section.below_floor = true;
                warn!(
                    section = %section.heading,
                    length = section.word_count(convention),
                    target = section.target_min_words,
                    "Section accepted below its length floor"
                );
            }
        }
    }

    /// Run section requests with bounded concurrency, keyed by section index.
    async fn generate_bounded(
        &self,
        requests: Vec<(usize, GenerationRequest)>,
    ) -> Vec<(usize, Result<String, LlmError>)> {
        let semaphore = Semaphore::new(self.config.max_concurrent_sections.max(1));
        let tasks = requests.into_iter().map(|(index, request)| {
            let semaphore = &semaphore;
            async move {
                let _permit = semaphore.acquire().await.ok();
                (index, self.brain.generate_text(request).await)
            }
        });
        join_all(tasks).await
    }
}
