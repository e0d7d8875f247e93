//! Report document model, length targets and Markdown rendering.

use super::citations::CitationEntry;
use crate::types::{DetailLevel, LengthConvention};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Bibliography heading appended by finalization.
pub const REFERENCES_HEADING: &str = "References";

/// Body text of a section whose draft failed.
pub const PLACEHOLDER_BODY: &str = "_This section could not be generated._";

static RENDER_ARTIFACT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[/?(?:PDF|Text|Image[A-Za-z]*|Page \d+)[^\]\n]*\]").expect("artifact pattern is valid")
});
static TOP_LEVEL_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#{1,2}\s+").expect("heading pattern is valid"));
static BLANK_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("blank run pattern is valid"));

/// Per-section and per-paragraph length floors for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LengthTargets {
    pub section_floor: usize,
    pub paragraph_floor: usize,
    pub convention: LengthConvention,
}

impl LengthTargets {
    /// Derive the floors for `sections` sections.
    ///
    /// Named levels use fixed floors, doubled when length is counted in
    /// characters. `Custom(n)` splits `n` evenly (rounding up) and sets the
    /// paragraph floor to `n / 12`.
    pub fn derive(detail: DetailLevel, sections: usize, convention: LengthConvention) -> Self {
        let scale = match convention {
            LengthConvention::Words => 1,
            LengthConvention::Characters => 2,
        };
        let (section_floor, paragraph_floor) = match detail {
            DetailLevel::Brief => (150 * scale, 40 * scale),
            DetailLevel::Standard => (400 * scale, 80 * scale),
            DetailLevel::Detailed => (800 * scale, 120 * scale),
            DetailLevel::Custom(total) => {
                let total = total as usize;
                (total.div_ceil(sections.max(1)), (total / 12).max(1))
            }
        };
        Self {
            section_floor,
            paragraph_floor,
            convention,
        }
    }
}

/// One themed section of the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub heading: String,
    /// What the theme covers; guides drafting.
    pub description: String,
    pub body: String,
    pub target_min_words: usize,
    /// Drafting failed and `body` holds a placeholder.
    pub placeholder: bool,
    /// Still below its floor after every expansion pass.
    pub below_floor: bool,
}

impl Section {
    pub fn new(heading: impl Into<String>, description: impl Into<String>, target_min_words: usize) -> Self {
        Self {
            heading: heading.into(),
            description: description.into(),
            body: String::new(),
            target_min_words,
            placeholder: false,
            below_floor: false,
        }
    }

    /// Length of the body in the given convention, recomputed on every call.
    pub fn word_count(&self, convention: LengthConvention) -> usize {
        if self.placeholder {
            return 0;
        }
        convention.count(&self.body)
    }

    pub fn meets_floor(&self, convention: LengthConvention) -> bool {
        self.word_count(convention) >= self.target_min_words
    }

    pub(crate) fn set_placeholder(&mut self) {
        self.body = PLACEHOLDER_BODY.to_string();
        self.placeholder = true;
    }

    pub(crate) fn set_body(&mut self, body: String) {
        self.body = body;
        self.placeholder = false;
    }
}

/// The report while it is being assembled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDocument {
    pub title: String,
    pub sections: Vec<Section>,
    pub convention: LengthConvention,
}

impl ReportDocument {
    pub fn new(title: impl Into<String>, convention: LengthConvention) -> Self {
        Self {
            title: title.into(),
            sections: Vec::new(),
            convention,
        }
    }

    pub fn push_section(&mut self, section: Section) {
        self.sections.push(section);
    }

    /// Indices of sections under their floor, in section order.
    pub fn sections_below_floor(&self) -> Vec<usize> {
        self.sections
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.meets_floor(self.convention))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn total_word_count(&self) -> usize {
        self.sections.iter().map(|s| s.word_count(self.convention)).sum()
    }

    /// Close the document: append the bibliography and render Markdown.
    pub fn finalize(self, citations: &[CitationEntry]) -> FinalDocument {
        let mut bibliography = citations.to_vec();
        bibliography.sort_by_key(|c| c.numeric_id);
        let markdown = render_markdown(&self, &bibliography);
        FinalDocument {
            document: self,
            bibliography,
            markdown,
        }
    }
}

/// A finalized, read-only report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalDocument {
    document: ReportDocument,
    bibliography: Vec<CitationEntry>,
    markdown: String,
}

impl FinalDocument {
    pub fn title(&self) -> &str {
        &self.document.title
    }

    pub fn sections(&self) -> &[Section] {
        &self.document.sections
    }

    pub fn convention(&self) -> LengthConvention {
        self.document.convention
    }

    /// Entries ordered by numeric id.
    pub fn bibliography(&self) -> &[CitationEntry] {
        &self.bibliography
    }

    pub fn markdown(&self) -> &str {
        &self.markdown
    }

    /// Section headings and bodies without the bibliography.
    pub fn body_text(&self) -> String {
        self.document
            .sections
            .iter()
            .map(|s| format!("## {}\n\n{}", s.heading, s.body))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn total_word_count(&self) -> usize {
        self.document.total_word_count()
    }
}

/// Render a document with its bibliography as Markdown.
pub fn render_markdown(document: &ReportDocument, bibliography: &[CitationEntry]) -> String {
    let mut out = format!("# {}\n\n", document.title.trim());
    for section in &document.sections {
        out.push_str(&format!("## {}\n\n{}\n\n", section.heading.trim(), section.body.trim()));
    }
    if !bibliography.is_empty() {
        out.push_str(&format!("## {REFERENCES_HEADING}\n\n"));
        for entry in bibliography {
            out.push_str(&format!("[{}] {}\n", entry.numeric_id, entry.formatted_string));
        }
    }
    format!("{}\n", out.trim_end())
}

/// Tidy a generated section body.
///
/// Drops leading lines that repeat the heading, strips rendering artifacts,
/// demotes `#`/`##` headings to `###` so sections stay the top structure,
/// and collapses blank-line runs.
pub fn clean_section_body(raw: &str, heading: &str) -> String {
    let heading_key = normalize_heading(heading);
    let mut lines: Vec<&str> = raw.trim().lines().collect();
    while let Some(first) = lines.first() {
        let trimmed = first.trim();
        let is_heading_echo = trimmed.starts_with('#') && normalize_heading(trimmed) == heading_key;
        let is_bold_echo = normalize_heading(trimmed.trim_matches('*')) == heading_key && !heading_key.is_empty();
        if trimmed.is_empty() || is_heading_echo || is_bold_echo {
            lines.remove(0);
        } else {
            break;
        }
    }
    let body = lines.join("\n");
    let body = RENDER_ARTIFACT.replace_all(&body, "");
    let body = TOP_LEVEL_HEADING.replace_all(&body, "### ");
    let body = BLANK_RUN.replace_all(&body, "\n\n");
    body.trim().to_string()
}

fn normalize_heading(text: &str) -> String {
    text.trim_start_matches('#')
        .trim()
        .trim_end_matches(':')
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::research::sources::SourceId;
    use pretty_assertions::assert_eq;

    fn make_document() -> ReportDocument {
        let mut doc = ReportDocument::new("Grid Storage", LengthConvention::Words);
        let mut first = Section::new("Costs", "", 3);
        first.set_body("Iron-air is cheap [1].".to_string());
        let mut second = Section::new("Outlook", "", 10);
        second.set_body("Growing fast [2].".to_string());
        doc.push_section(first);
        doc.push_section(second);
        doc
    }

    fn make_entry(id: u32) -> CitationEntry {
        CitationEntry {
            numeric_id: id,
            source_id: SourceId::new(id + 10),
            formatted_string: format!("*site{id}.org*, \"Page {id}\", https://site{id}.org"),
        }
    }

    #[test]
    fn test_named_floors() {
        let t = LengthTargets::derive(DetailLevel::Standard, 5, LengthConvention::Words);
        assert_eq!((t.section_floor, t.paragraph_floor), (400, 80));
        let t = LengthTargets::derive(DetailLevel::Brief, 5, LengthConvention::Characters);
        assert_eq!((t.section_floor, t.paragraph_floor), (300, 80));
        let t = LengthTargets::derive(DetailLevel::Detailed, 1, LengthConvention::Words);
        assert_eq!(t.section_floor, 800);
    }

    #[test]
    fn test_custom_floors() {
        let t = LengthTargets::derive(DetailLevel::Custom(9000), 3, LengthConvention::Words);
        assert_eq!((t.section_floor, t.paragraph_floor), (3000, 750));
        let t = LengthTargets::derive(DetailLevel::Custom(1000), 3, LengthConvention::Words);
        assert_eq!(t.section_floor, 334);
        let t = LengthTargets::derive(DetailLevel::Custom(5), 0, LengthConvention::Characters);
        assert_eq!((t.section_floor, t.paragraph_floor), (5, 1));
    }

    #[test]
    fn test_word_count_recomputed() {
        let mut section = Section::new("A", "", 4);
        section.set_body("one two three".to_string());
        assert_eq!(section.word_count(LengthConvention::Words), 3);
        assert!(!section.meets_floor(LengthConvention::Words));
        section.body.push_str(" four");
        assert!(section.meets_floor(LengthConvention::Words));
    }

    #[test]
    fn test_placeholder_counts_zero() {
        let mut section = Section::new("A", "", 1);
        section.set_placeholder();
        assert!(section.placeholder);
        assert_eq!(section.word_count(LengthConvention::Words), 0);
        section.set_body("real text".to_string());
        assert!(!section.placeholder);
    }

    #[test]
    fn test_sections_below_floor() {
        assert_eq!(make_document().sections_below_floor(), vec![1]);
    }

    #[test]
    fn test_finalize_orders_bibliography() {
        let final_doc = make_document().finalize(&[make_entry(2), make_entry(1)]);
        let md = final_doc.markdown();
        assert!(md.starts_with("# Grid Storage\n\n## Costs\n\nIron-air is cheap [1]."));
        let refs = md.split("## References").nth(1).unwrap();
        let first = refs.find("[1] ").unwrap();
        let second = refs.find("[2] ").unwrap();
        assert!(first < second);
        assert_eq!(final_doc.bibliography()[0].numeric_id, 1);
        assert!(!final_doc.body_text().contains("References"));
    }

    #[test]
    fn test_no_references_without_citations() {
        let md = make_document().finalize(&[]).markdown().to_string();
        assert!(!md.contains(REFERENCES_HEADING));
        assert!(md.ends_with("Growing fast [2].\n"));
    }

    #[test]
    fn test_clean_section_body() {
        let raw = "## Costs\n\n**Costs**\nIron-air [PDF] storage is cheap [1].\n\n\n\n# Detail\nMore [/Text] text.";
        assert_eq!(
            clean_section_body(raw, "Costs"),
            "Iron-air  storage is cheap [1].\n\n### Detail\nMore  text."
        );
    }

    #[test]
    fn test_clean_keeps_citations() {
        assert_eq!(clean_section_body("Fact [1, 2]. Other [3].", "X"), "Fact [1, 2]. Other [3].");
    }
}
