//! Research run state and its phases.
//!
//! A [`ResearchState`] is created from validated [`ResearchParams`], owned by the
//! orchestrator for the whole run, and frozen into a [`ResearchOutcome`] when the
//! run reaches [`ResearchPhase::Terminal`].

use super::sources::{SourceId, SourceRecord, SourceRegistry};
use crate::config::{BREADTH_RANGE, DEPTH_RANGE, ResearchConfig};
use crate::error::ResearchError;
use crate::types::{DetailLevel, Language};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;
use uuid::Uuid;

/// Current phase of a research run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResearchPhase {
    /// Validating the root query and parameters.
    Clarify,
    /// Generating this level's queries.
    PlanQueries,
    /// Running the level's queries concurrently.
    SearchFanOut,
    /// Deduplicating sources and extracting learnings.
    Ingest,
    /// Generating follow-up directions.
    Reflect,
    /// Run complete; state is frozen.
    Terminal,
}

impl std::fmt::Display for ResearchPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ResearchPhase::Clarify => "clarify",
            ResearchPhase::PlanQueries => "plan_queries",
            ResearchPhase::SearchFanOut => "search_fan_out",
            ResearchPhase::Ingest => "ingest",
            ResearchPhase::Reflect => "reflect",
            ResearchPhase::Terminal => "terminal",
        };
        f.write_str(name)
    }
}

/// Run parameters handed to the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchParams {
    pub query: String,
    pub depth: u32,
    pub breadth: u32,
    pub detail_level: DetailLevel,
    pub language: Language,
}

impl ResearchParams {
    pub fn new(query: impl Into<String>) -> Self {
        let defaults = ResearchConfig::default();
        Self {
            query: query.into(),
            depth: defaults.depth,
            breadth: defaults.breadth,
            detail_level: DetailLevel::default(),
            language: Language::default(),
        }
    }

    /// Parameters with depth, breadth, detail level and language taken from configuration.
    pub fn from_config(query: impl Into<String>, config: &ResearchConfig) -> Self {
        Self {
            query: query.into(),
            depth: config.depth,
            breadth: config.breadth,
            detail_level: config.detail_level,
            language: config.language.clone(),
        }
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_breadth(mut self, breadth: u32) -> Self {
        self.breadth = breadth;
        self
    }

    pub fn with_detail_level(mut self, detail_level: DetailLevel) -> Self {
        self.detail_level = detail_level;
        self
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }

    /// Reject an empty query or out-of-range depth/breadth.
    pub fn validate(&self) -> Result<(), ResearchError> {
        if self.query.trim().is_empty() {
            return Err(ResearchError::EmptyQuery);
        }
        check_range("depth", self.depth, DEPTH_RANGE)?;
        check_range("breadth", self.breadth, BREADTH_RANGE)?;
        Ok(())
    }
}

fn check_range(name: &str, value: u32, (min, max): (u32, u32)) -> Result<(), ResearchError> {
    if value < min || value > max {
        return Err(ResearchError::InvalidParameter {
            name: name.to_string(),
            value,
            min,
            max,
        });
    }
    Ok(())
}

/// A synthesized fact and the source it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Learning {
    pub text: String,
    pub source_id: SourceId,
    /// Level (1-based) at which it was extracted.
    pub depth: u32,
}

/// Per-level bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LevelSummary {
    pub level: u32,
    pub queries: Vec<String>,
    pub failed_queries: Vec<String>,
    pub new_sources: usize,
    pub duplicate_hits: usize,
    pub rejected_hits: usize,
    pub new_learnings: usize,
}

impl LevelSummary {
    pub fn new(level: u32, queries: Vec<String>) -> Self {
        Self {
            level,
            queries,
            ..Default::default()
        }
    }
}

/// Mutable state of one research run.
#[derive(Debug)]
pub struct ResearchState {
    pub id: Uuid,
    pub query: String,
    /// Research brief produced by query refinement, if it ran and succeeded.
    pub focus: Option<String>,
    pub depth: u32,
    pub depth_remaining: u32,
    pub breadth: u32,
    /// Append-only, in insertion order.
    pub learnings: Vec<Learning>,
    /// Replaced at every Reflect.
    pub directions: Vec<String>,
    pub sources: SourceRegistry,
    pub detail_level: DetailLevel,
    pub language: Language,
    pub phase: ResearchPhase,
    /// Every query issued so far, in order.
    pub issued_queries: Vec<String>,
    pub levels: Vec<LevelSummary>,
    pub started_at: DateTime<Utc>,
}

impl ResearchState {
    /// Create a state in the `Clarify` phase. `params` must already be validated.
    pub fn new(params: ResearchParams) -> Self {
        Self {
            id: Uuid::new_v4(),
            query: params.query.trim().to_string(),
            focus: None,
            depth: params.depth,
            depth_remaining: params.depth,
            breadth: params.breadth,
            learnings: Vec::new(),
            directions: Vec::new(),
            sources: SourceRegistry::new(),
            detail_level: params.detail_level,
            language: params.language,
            phase: ResearchPhase::Clarify,
            issued_queries: Vec::new(),
            levels: Vec::new(),
            started_at: Utc::now(),
        }
    }

    /// Transition to a new phase.
    pub fn transition(&mut self, phase: ResearchPhase) {
        debug!(run = %self.id, from = %self.phase, to = %phase, level = self.current_level(), "Research phase change");
        self.phase = phase;
    }

    /// 1-based level currently being explored.
    pub fn current_level(&self) -> u32 {
        self.depth - self.depth_remaining + 1
    }

    /// The most recent `limit` learnings, oldest first.
    pub fn recent_learnings(&self, limit: usize) -> &[Learning] {
        let start = self.learnings.len().saturating_sub(limit);
        &self.learnings[start..]
    }

    /// Whether `text` is already a known learning (case-insensitive).
    pub fn has_learning(&self, text: &str) -> bool {
        let needle = text.trim().to_lowercase();
        self.learnings
            .iter()
            .any(|l| l.text.trim().to_lowercase() == needle)
    }

    /// Total search calls issued so far.
    pub fn search_calls(&self) -> usize {
        self.issued_queries.len()
    }

    /// Freeze the state for handoff to report assembly.
    pub fn freeze(self) -> ResearchOutcome {
        ResearchOutcome {
            id: self.id,
            query: self.query,
            focus: self.focus,
            depth: self.depth,
            breadth: self.breadth,
            learnings: self.learnings,
            sources: self.sources.snapshot(),
            open_directions: self.directions,
            levels: self.levels,
            detail_level: self.detail_level,
            language: self.language,
            search_calls: self.issued_queries.len(),
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Frozen result of a research run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchOutcome {
    pub id: Uuid,
    pub query: String,
    #[serde(default)]
    pub focus: Option<String>,
    pub depth: u32,
    pub breadth: u32,
    pub learnings: Vec<Learning>,
    /// Unique sources in id order.
    pub sources: Vec<SourceRecord>,
    /// Directions produced by the final Reflect.
    pub open_directions: Vec<String>,
    pub levels: Vec<LevelSummary>,
    pub detail_level: DetailLevel,
    pub language: Language,
    pub search_calls: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ResearchOutcome {
    pub fn source(&self, id: SourceId) -> Option<&SourceRecord> {
        self.sources.iter().find(|s| s.id == id)
    }

    /// Sources keyed by canonical URL.
    pub fn sources_by_url(&self) -> BTreeMap<&str, &SourceRecord> {
        self.sources
            .iter()
            .map(|s| (s.canonical_url.as_str(), s))
            .collect()
    }

    /// Write the outcome as pretty-printed JSON.
    pub fn write_json(&self, path: &Path) -> crate::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        debug!(path = %path.display(), learnings = self.learnings.len(), "Research outcome written");
        Ok(())
    }
}

/// Callback trait for progressive research updates.
pub trait ResearchProgress: Send + Sync {
    /// Called when the run enters a new phase.
    fn on_phase_change(&self, _phase: ResearchPhase, _level: u32) {}
    /// Called when a query's search completes; `hits` is `None` on failure.
    fn on_query_complete(&self, _query: &str, _hits: Option<usize>) {}
    /// Called after each Reflect.
    fn on_level_complete(&self, _summary: &LevelSummary) {}
}

/// No-op progress callback.
pub struct NoOpProgress;

impl ResearchProgress for NoOpProgress {}
