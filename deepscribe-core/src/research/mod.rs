//! Iterative multi-source research.
//!
//! A run explores a topic level by level:
//! 1. **Clarify**: validate the root query and depth/breadth, and optionally
//!    refine the query into a research brief.
//! 2. **PlanQueries**: generate up to `breadth` distinct queries.
//! 3. **SearchFanOut**: run them concurrently; failed queries are dropped.
//! 4. **Ingest**: dedup sources by canonical URL and extract learnings.
//! 5. **Reflect**: produce follow-up directions and decrement the depth.
//!
//! The loop ends in **Terminal** after exactly `depth` levels.

pub mod engine;
pub mod learnings;
pub mod planner;
pub mod session;
pub mod sources;

pub use engine::ResearchOrchestrator;
pub use learnings::{Extraction, LearningExtractor};
pub use planner::{QueryPlanner, clean_list, normalize_query};
pub use session::{
    Learning, LevelSummary, NoOpProgress, ResearchOutcome, ResearchParams, ResearchPhase,
    ResearchProgress, ResearchState,
};
pub use sources::{
    Admission, RejectReason, Reliability, SourceId, SourceRecord, SourceRegistry,
    canonicalize_url, domain_of, is_relevant_url,
};
