//! Prompt text for the report stages.

use super::document::LengthTargets;
use crate::types::{Language, LengthConvention, ReportStyle};

pub const TITLE_PROMPT: &str = "You write titles for research reports. Reply with one concise, \
informative title and nothing else.";

pub const THEMES_PROMPT: &str = "You organize research findings into report sections. Group the \
findings into distinct themes that together cover the topic without overlap. Order the themes \
so the report reads logically. Each theme needs a short heading and a one-sentence description.";

pub const DRAFT_PROMPT: &str = "You write one section of a research report. Use only the numbered \
findings provided. Support claims with the bracketed citation number of the finding they come \
from, for example [3]. Write flowing paragraphs, not bullet lists, and do not repeat the section \
heading.";

pub const ENHANCE_PROMPT: &str = "You revise one section of a research report. Add depth: \
explain mechanisms, compare perspectives and bring in further supporting findings. Keep every \
existing citation and cite new claims with bracketed numbers. Return the full revised section \
without its heading.";

pub const EXPAND_PROMPT: &str = "The section below is shorter than required. Expand it with \
additional analysis, examples and implications drawn from the findings. Keep all existing \
content and citations. Return the full expanded section without its heading.";

pub const QUALITY_PROMPT: &str = "You review research reports. Score the report from 0 to 10 on \
content_completeness, logical_consistency, style_conformance and citation_presence, give an \
overall_score, and list concrete suggestions, each with the area it concerns. Also check the \
report as a whole for global consistency: coherence of the argument across sections, transitions \
between sections, contradictions between statements and redundant passages. Report each such \
problem as a suggestion with the area \"global_consistency\".";

/// Writing guidance for a report style.
pub fn style_guidelines(style: ReportStyle) -> &'static str {
    match style {
        ReportStyle::Standard => {
            "Write for an informed general reader. Be clear and objective, define technical terms \
             and favour concrete figures over generalities."
        }
        ReportStyle::Academic => {
            "Write in a formal academic register. Use precise terminology, situate claims in the \
             literature and state limitations of the evidence."
        }
        ReportStyle::Business => {
            "Write for decision makers. Lead with implications, quantify impact where the \
             findings allow and keep the tone direct."
        }
        ReportStyle::LiteratureReview => {
            "Write as a literature review. Synthesize rather than summarize sources one by one, \
             contrast findings across sources and point out gaps."
        }
    }
}

pub fn language_instruction(language: &Language) -> String {
    format!("Write the entire text in {}.", language.display_name())
}

/// Length requirement for one section.
pub fn length_instruction(targets: &LengthTargets) -> String {
    let unit = targets.convention.unit();
    format!(
        "The section must contain at least {} {unit}. Each paragraph should have at least {} {unit}.",
        targets.section_floor, targets.paragraph_floor
    )
}

/// Length requirement for a section that is still short of its floor.
pub fn shortfall_instruction(current: usize, target: usize, convention: LengthConvention) -> String {
    let unit = convention.unit();
    format!(
        "The section currently has {current} {unit}; it needs at least {target} {unit}. \
         Add at least {} more {unit}.",
        target.saturating_sub(current)
    )
}

/// Shared framing for every section-level request.
pub fn section_context(
    topic: &str,
    heading: &str,
    description: &str,
    findings: &str,
    style: ReportStyle,
    language: &Language,
) -> String {
    format!(
        "Report topic: {topic}\nSection heading: {heading}\nSection focus: {description}\n\n\
         Style: {}\n{}\n\nNumbered findings:\n{findings}",
        style_guidelines(style),
        language_instruction(language),
    )
}
