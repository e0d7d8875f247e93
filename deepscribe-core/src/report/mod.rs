//! Citation-aware, section-based report assembly.

pub mod assembler;
pub mod citations;
pub mod document;
pub mod prompts;
pub mod quality;

pub use assembler::{AssembledReport, ReportAssembler, Theme};
pub use citations::{CitationEntry, CitationRegistry, CitationValidation, format_citation};
pub use document::{FinalDocument, LengthTargets, ReportDocument, Section, render_markdown};
pub use quality::{QualityDimension, QualityReport, StructuralViolation, Suggestion};
