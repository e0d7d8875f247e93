//! Terminal progress output for research runs.

use deepscribe_core::research::{LevelSummary, ResearchPhase, ResearchProgress};

pub(crate) struct CliProgress {
    quiet: bool,
}

impl CliProgress {
    pub(crate) fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

impl ResearchProgress for CliProgress {
    fn on_phase_change(&self, phase: ResearchPhase, level: u32) {
        if self.quiet {
            return;
        }
        match phase {
            ResearchPhase::PlanQueries => eprintln!("\x1b[36m[level {level}]\x1b[0m planning queries"),
            ResearchPhase::Terminal => eprintln!("\x1b[32mResearch complete.\x1b[0m Writing report..."),
            _ => {}
        }
    }

    fn on_query_complete(&self, query: &str, hits: Option<usize>) {
        if self.quiet {
            return;
        }
        match hits {
            Some(n) => eprintln!("  \x1b[90msearch:\x1b[0m {query} ({n} results)"),
            None => eprintln!("  \x1b[31msearch failed:\x1b[0m {query}"),
        }
    }

    fn on_level_complete(&self, summary: &LevelSummary) {
        if self.quiet {
            return;
        }
        eprintln!(
            "\x1b[36m[level {}]\x1b[0m {} new sources, {} duplicates, {} new learnings",
            summary.level, summary.new_sources, summary.duplicate_hits, summary.new_learnings
        );
    }
}
