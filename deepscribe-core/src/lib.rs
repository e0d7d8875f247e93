//! # Deepscribe Core
//!
//! Core library for the Deepscribe research assistant.
//! Provides the iterative research orchestrator, the citation-aware report
//! assembler, the text generation and search abstractions, configuration,
//! and fundamental types.

pub mod brain;
pub mod config;
pub mod error;
pub mod providers;
pub mod recovery;
pub mod report;
pub mod research;
pub mod search;
pub mod types;

// Re-export commonly used types at the crate root.
pub use brain::{Brain, MockTextGenerator, TextGenerationService};
pub use config::{DeepscribeConfig, load_config, load_validated_config};
pub use error::{LlmError, Result, ScribeError, SearchError};
pub use providers::OpenAiCompatibleService;
pub use recovery::RecoveryChain;
pub use report::{AssembledReport, CitationRegistry, QualityReport, ReportAssembler};
pub use research::{ResearchOrchestrator, ResearchOutcome, ResearchParams, ResearchProgress, SourceRegistry};
pub use search::{DuckDuckGoSearch, MockSearchBackend, SearchBackend};
pub use types::{CitationStyle, DetailLevel, Language, LengthConvention, ReportStyle, SearchHit};
