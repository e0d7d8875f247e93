//! Research orchestrator: drives the depth/breadth exploration loop.
//!
//! Each level runs PlanQueries -> SearchFanOut -> Ingest -> Reflect and
//! decrements the remaining depth exactly once, whatever failed along the way.
//! A run therefore issues at most `depth * breadth` search calls and never
//! retries a search.

use super::learnings::LearningExtractor;
use super::planner::QueryPlanner;
use super::session::{
    Learning, LevelSummary, NoOpProgress, ResearchOutcome, ResearchParams, ResearchPhase,
    ResearchProgress, ResearchState,
};
use super::sources::{Admission, SourceRecord};
use crate::brain::Brain;
use crate::config::ResearchConfig;
use crate::error::{ResearchError, SearchError};
use crate::search::SearchBackend;
use crate::types::SearchHit;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// The main research engine.
pub struct ResearchOrchestrator {
    brain: Brain,
    search: Arc<dyn SearchBackend>,
    config: ResearchConfig,
    planner: QueryPlanner,
    extractor: LearningExtractor,
    search_timeout: Duration,
    progress: Arc<dyn ResearchProgress>,
}

impl ResearchOrchestrator {
    /// Create a new orchestrator.
    pub fn new(brain: Brain, search: Arc<dyn SearchBackend>, config: ResearchConfig) -> Self {
        Self {
            planner: QueryPlanner::new(config.max_context_learnings),
            extractor: LearningExtractor::new(config.max_learnings_per_source),
            brain,
            search,
            config,
            search_timeout: Duration::from_secs(15),
            progress: Arc::new(NoOpProgress),
        }
    }

    /// Timeout applied to every search call.
    pub fn with_search_timeout(mut self, timeout: Duration) -> Self {
        self.search_timeout = timeout;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ResearchProgress>) -> Self {
        self.progress = progress;
        self
    }

    /// Get the research config.
    pub fn config(&self) -> &ResearchConfig {
        &self.config
    }

    /// Run a full exploration.
    ///
    /// The only errors are invalid parameters, reported before any external call.
    pub async fn run(&self, params: ResearchParams) -> Result<ResearchOutcome, ResearchError> {
        params.validate()?;
        let mut state = ResearchState::new(params);
        self.enter(&mut state, ResearchPhase::Clarify);
        if self.config.refine_query {
            state.focus = self.planner.clarify(&self.brain, &state).await;
        }
        info!(
            run = %state.id,
            query = %state.query,
            depth = state.depth,
            breadth = state.breadth,
            "Starting research"
        );

        while state.depth_remaining > 0 {
            let level = state.current_level();

            self.enter(&mut state, ResearchPhase::PlanQueries);
            let queries = self.planner.plan(&self.brain, &state).await;
            let mut summary = LevelSummary::new(level, queries.clone());
            let first_new = state.learnings.len();

            if queries.is_empty() {
                warn!(level, "No queries planned; skipping to reflection");
            } else {
                self.enter(&mut state, ResearchPhase::SearchFanOut);
                state.issued_queries.extend(queries.iter().cloned());
                let results = self.fan_out(&queries).await;

                self.enter(&mut state, ResearchPhase::Ingest);
                self.ingest(&mut state, results, &mut summary).await;
            }
            summary.new_learnings = state.learnings.len() - first_new;

            self.enter(&mut state, ResearchPhase::Reflect);
            state.directions = self.planner.reflect(&self.brain, &state, first_new).await;
            state.depth_remaining -= 1;

            info!(
                level,
                queries = summary.queries.len(),
                failed = summary.failed_queries.len(),
                new_sources = summary.new_sources,
                new_learnings = summary.new_learnings,
                directions = state.directions.len(),
                "Research level complete"
            );
            self.progress.on_level_complete(&summary);
            state.levels.push(summary);
        }

        self.enter(&mut state, ResearchPhase::Terminal);
        let outcome = state.freeze();
        info!(
            run = %outcome.id,
            sources = outcome.sources.len(),
            learnings = outcome.learnings.len(),
            search_calls = outcome.search_calls,
            "Research complete"
        );
        Ok(outcome)
    }

    fn enter(&self, state: &mut ResearchState, phase: ResearchPhase) {
        state.transition(phase);
        self.progress.on_phase_change(phase, state.current_level());
    }

    /// Run all queries concurrently; results come back in query order.
    async fn fan_out(&self, queries: &[String]) -> Vec<(String, Result<Vec<SearchHit>, SearchError>)> {
        let semaphore = Semaphore::new(self.config.max_concurrent_searches.max(1));
        let tasks = queries.iter().enumerate().map(|(index, query)| {
            let semaphore = &semaphore;
            async move {
                let _permit = semaphore.acquire().await.ok();
                let result = match tokio::time::timeout(self.search_timeout, self.search.search(query)).await {
                    Ok(result) => result,
                    Err(_) => Err(SearchError::Timeout {
                        query: query.clone(),
                        timeout_secs: self.search_timeout.as_secs(),
                    }),
                };
                self.progress
                    .on_query_complete(query, result.as_ref().ok().map(Vec::len));
                (index, query.clone(), result)
            }
        });

        let mut results = join_all(tasks).await;
        results.sort_by_key(|(index, _, _)| *index);
        results
            .into_iter()
            .map(|(_, query, result)| (query, result))
            .collect()
    }

    /// Admit hits in query order, then extract learnings from new sources concurrently.
    async fn ingest(
        &self,
        state: &mut ResearchState,
        results: Vec<(String, Result<Vec<SearchHit>, SearchError>)>,
        summary: &mut LevelSummary,
    ) {
        let level = state.current_level();
        let mut admitted: Vec<(String, SourceRecord, SearchHit)> = Vec::new();

        for (query, result) in results {
            let hits = match result {
                Ok(hits) => hits,
                Err(e) => {
                    warn!(query = %query, error = %e, "Search failed; query dropped for this level");
                    summary.failed_queries.push(query);
                    continue;
                }
            };
            for hit in hits.into_iter().take(self.config.max_results_per_query) {
                match state.sources.admit(&hit, level, &query) {
                    Admission::New(record) => admitted.push((query.clone(), record, hit)),
                    Admission::Duplicate(id) => {
                        debug!(url = %hit.url, source = %id, "Duplicate source skipped");
                        summary.duplicate_hits += 1;
                    }
                    Admission::Rejected(reason) => {
                        debug!(url = %hit.url, ?reason, "Source rejected");
                        summary.rejected_hits += 1;
                    }
                }
            }
        }
        summary.new_sources = admitted.len();

        let semaphore = Semaphore::new(self.config.max_concurrent_searches.max(1));
        let extractions = join_all(admitted.iter().map(|(query, record, hit)| {
            let semaphore = &semaphore;
            async move {
                let _permit = semaphore.acquire().await.ok();
                (record.id, self.extractor.extract(&self.brain, query, record, hit).await)
            }
        }))
        .await;

        for (source_id, result) in extractions {
            match result {
                Ok(extraction) => {
                    if let Some(rating) = extraction.reliability {
                        state.sources.refine_credibility(source_id, rating);
                    }
                    for text in extraction.learnings {
                        if state.has_learning(&text) {
                            continue;
                        }
                        state.learnings.push(Learning {
                            text,
                            source_id,
                            depth: level,
                        });
                    }
                }
                Err(e) => {
                    warn!(source = %source_id, error = %e, "Learning extraction failed; source kept without learnings");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::MockTextGenerator;
    use crate::config::RetryConfig;
    use crate::error::LlmError;
    use crate::search::MockSearchBackend;
    use crate::types::{GenerationRequest, GenerationTask};

    fn make_brain(mock: Arc<MockTextGenerator>) -> Brain {
        Brain::new(mock, RetryConfig::immediate(1), Duration::from_secs(5))
    }

    fn scripted(request: &GenerationRequest) -> Result<String, LlmError> {
        Ok(match request.task {
            GenerationTask::PlanQueries if request.context.contains("Research level: 1") => {
                r#"{"queries": ["alpha topic one", "beta topic two"]}"#.to_string()
            }
            GenerationTask::PlanQueries => r#"{"queries": ["gamma topic three"]}"#.to_string(),
            GenerationTask::ExtractLearnings => {
                let url = request
                    .context
                    .lines()
                    .find_map(|l| l.strip_prefix("Source URL: "))
                    .unwrap_or("unknown");
                format!(r#"{{"learnings": ["Fact from {url}"], "reliability": "HIGH"}}"#)
            }
            GenerationTask::Reflect => r#"{"directions": ["what comes next here"]}"#.to_string(),
            _ => "{}".to_string(),
        })
    }

    fn make_search() -> MockSearchBackend {
        MockSearchBackend::new()
            .with_results(
                "alpha topic one",
                vec![
                    SearchHit::new("https://a.example/1", "A1", "a1"),
                    SearchHit::new("https://a.example/2", "A2", "a2"),
                ],
            )
            .with_results(
                "beta topic two",
                vec![
                    SearchHit::new("https://a.example/2/", "A2 again", "a2"),
                    SearchHit::new("https://www.youtube.com/watch?v=x", "Video", "v"),
                ],
            )
            .with_results(
                "gamma topic three",
                vec![SearchHit::new("https://c.example/3", "C3", "c3")],
            )
    }

    #[tokio::test]
    async fn test_run_two_levels() {
        let mock = Arc::new(MockTextGenerator::with_handler(scripted));
        let search = Arc::new(make_search());
        let orchestrator =
            ResearchOrchestrator::new(make_brain(mock.clone()), search.clone(), ResearchConfig::default());

        let outcome = orchestrator
            .run(ResearchParams::new("topic").with_depth(2).with_breadth(2))
            .await
            .unwrap();

        assert_eq!(outcome.sources.len(), 3);
        assert_eq!(outcome.learnings.len(), 3);
        assert_eq!(outcome.learnings[0].text, "Fact from https://a.example/1");
        assert_eq!(outcome.levels.len(), 2);
        assert_eq!(outcome.levels[0].duplicate_hits, 1);
        assert_eq!(outcome.levels[0].rejected_hits, 1);
        assert_eq!(outcome.levels[1].new_sources, 1);
        assert_eq!(outcome.search_calls, 3);
        assert_eq!(outcome.open_directions, vec!["what comes next here"]);
        assert_eq!(mock.call_count(GenerationTask::Reflect), 2);
        // Credibility refined by the HIGH rating: (0.5 + 0.9) / 2
        assert!((outcome.sources[0].credibility_score - 0.7).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_run_researches_chinese_queries() {
        let mock = Arc::new(MockTextGenerator::with_handler(|request| {
            Ok(match request.task {
                GenerationTask::PlanQueries if request.context.contains("Research level: 1") => {
                    r#"{"queries": ["海洋碳捕获成本", "海洋碳捕获风险"]}"#.to_string()
                }
                GenerationTask::PlanQueries => r#"{"queries": ["海洋碳捕获政策"]}"#.to_string(),
                GenerationTask::ExtractLearnings => {
                    let url = request
                        .context
                        .lines()
                        .find_map(|l| l.strip_prefix("Source URL: "))
                        .unwrap_or("unknown");
                    format!(r#"{{"learnings": ["来自 {url} 的发现"]}}"#)
                }
                GenerationTask::Reflect => r#"{"directions": ["海洋碱度增强的长期影响"]}"#.to_string(),
                _ => "{}".to_string(),
            })
        }));
        let search = Arc::new(
            MockSearchBackend::new()
                .with_results("海洋碳捕获成本", vec![SearchHit::new("https://zh.example/cost", "成本", "c")])
                .with_results("海洋碳捕获风险", vec![SearchHit::new("https://zh.example/risk", "风险", "r")])
                .with_results("海洋碳捕获政策", vec![SearchHit::new("https://zh.example/policy", "政策", "p")]),
        );
        let orchestrator =
            ResearchOrchestrator::new(make_brain(mock), search.clone(), ResearchConfig::default());

        let outcome = orchestrator
            .run(
                ResearchParams::new("海洋碳捕获")
                    .with_depth(2)
                    .with_breadth(2)
                    .with_language(crate::types::Language::new("zh")),
            )
            .await
            .unwrap();

        assert_eq!(outcome.levels[0].queries, vec!["海洋碳捕获成本", "海洋碳捕获风险"]);
        assert_eq!(outcome.levels[1].queries, vec!["海洋碳捕获政策"]);
        assert_eq!(outcome.search_calls, 3);
        assert_eq!(search.calls().len(), 3);
        assert_eq!(outcome.sources.len(), 3);
        assert_eq!(outcome.learnings.len(), 3);
        assert_eq!(outcome.open_directions, vec!["海洋碱度增强的长期影响"]);
    }

    #[tokio::test]
    async fn test_refined_query_seeds_planning() {
        let mock = Arc::new(MockTextGenerator::with_handler(|request| match request.task {
            GenerationTask::Clarify => Ok("Costs and cycle life of grid batteries".to_string()),
            _ => scripted(request),
        }));
        let config = ResearchConfig {
            refine_query: true,
            ..ResearchConfig::default()
        };
        let orchestrator = ResearchOrchestrator::new(make_brain(mock.clone()), Arc::new(make_search()), config);

        let outcome = orchestrator
            .run(ResearchParams::new("topic").with_depth(1).with_breadth(2))
            .await
            .unwrap();

        assert_eq!(outcome.query, "topic");
        assert_eq!(outcome.focus.as_deref(), Some("Costs and cycle life of grid batteries"));
        assert_eq!(mock.call_count(GenerationTask::Clarify), 1);
        let plan = mock
            .calls()
            .into_iter()
            .find(|r| r.task == GenerationTask::PlanQueries)
            .unwrap();
        assert!(plan.context.contains("Research focus: Costs and cycle life of grid batteries"));
    }

    #[tokio::test]
    async fn test_refinement_is_off_by_default() {
        let mock = Arc::new(MockTextGenerator::with_handler(scripted));
        let orchestrator =
            ResearchOrchestrator::new(make_brain(mock.clone()), Arc::new(make_search()), ResearchConfig::default());
        let outcome = orchestrator
            .run(ResearchParams::new("topic").with_depth(1).with_breadth(2))
            .await
            .unwrap();
        assert_eq!(outcome.focus, None);
        assert_eq!(mock.call_count(GenerationTask::Clarify), 0);
    }

    #[tokio::test]
    async fn test_run_rejects_invalid_params_before_any_call() {
        let mock = Arc::new(MockTextGenerator::with_handler(scripted));
        let search = Arc::new(make_search());
        let orchestrator =
            ResearchOrchestrator::new(make_brain(mock.clone()), search.clone(), ResearchConfig::default());

        let err = orchestrator.run(ResearchParams::new("  ")).await.unwrap_err();
        assert_eq!(err, ResearchError::EmptyQuery);
        assert!(mock.calls().is_empty());
        assert!(search.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_queries_are_not_retried() {
        let mock = Arc::new(MockTextGenerator::with_handler(scripted));
        let search = Arc::new(make_search().failing_on("beta"));
        let orchestrator =
            ResearchOrchestrator::new(make_brain(mock), search.clone(), ResearchConfig::default());

        let outcome = orchestrator
            .run(ResearchParams::new("topic").with_depth(1).with_breadth(2))
            .await
            .unwrap();

        assert_eq!(outcome.levels[0].failed_queries, vec!["beta topic two"]);
        assert_eq!(outcome.sources.len(), 2);
        let beta_calls = search.calls().iter().filter(|q| q.contains("beta")).count();
        assert_eq!(beta_calls, 1);
    }

    #[tokio::test]
    async fn test_search_timeout_counts_as_failure() {
        struct Hanging;

        #[async_trait::async_trait]
        impl SearchBackend for Hanging {
            async fn search(&self, _query: &str) -> Result<Vec<SearchHit>, SearchError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(Vec::new())
            }
            fn name(&self) -> &str {
                "hanging"
            }
        }

        let mock = Arc::new(MockTextGenerator::with_handler(scripted));
        let orchestrator =
            ResearchOrchestrator::new(make_brain(mock), Arc::new(Hanging), ResearchConfig::default())
                .with_search_timeout(Duration::from_millis(10));

        let outcome = orchestrator
            .run(ResearchParams::new("topic").with_depth(1).with_breadth(2))
            .await
            .unwrap();
        assert_eq!(outcome.levels[0].failed_queries.len(), 2);
        assert!(outcome.sources.is_empty());
    }
}
