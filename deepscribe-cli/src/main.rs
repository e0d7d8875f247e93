//! Deepscribe CLI: research a topic and write a cited Markdown report.

mod progress;

use clap::Parser;
use deepscribe_core::config::{DeepscribeConfig, load_config};
use deepscribe_core::error::ConfigError;
use deepscribe_core::research::{ResearchOrchestrator, ResearchParams};
use deepscribe_core::types::{DetailLevel, Language, ReportStyle};
use deepscribe_core::{Brain, DuckDuckGoSearch, OpenAiCompatibleService, ReportAssembler};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Deepscribe: iterative web research with cited reports
#[derive(Parser, Debug)]
#[command(name = "deepscribe", version, about, long_about = None)]
struct Cli {
    /// Topic or question to research
    query: String,

    /// Research depth (levels, 1-5)
    #[arg(short, long)]
    depth: Option<u32>,

    /// Research breadth (queries per level, 2-10)
    #[arg(short, long)]
    breadth: Option<u32>,

    /// Report length: brief, standard, detailed or custom_<words>
    #[arg(long)]
    detail: Option<DetailLevel>,

    /// Output language code (en, zh, ja, ...)
    #[arg(short, long)]
    language: Option<String>,

    /// Report style: standard, academic, business, literature_review
    #[arg(short, long)]
    style: Option<ReportStyle>,

    /// Refine the query into a research brief before planning
    #[arg(long)]
    refine: bool,

    /// LLM model to use
    #[arg(short, long)]
    model: Option<String>,

    /// Output path for the Markdown report
    #[arg(short, long, default_value = "report.md")]
    output: PathBuf,

    /// Also write the quality report as JSON to this path
    #[arg(long)]
    quality_json: Option<PathBuf>,

    /// Also write the research outcome (learnings and sources) as JSON
    #[arg(long)]
    outcome_json: Option<PathBuf>,

    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,
}

/// `OPENAI_API_BASE` and `OPENAI_MODEL_NAME` take precedence over config files.
fn apply_env_overrides(config: &mut DeepscribeConfig) {
    if let Ok(base) = std::env::var("OPENAI_API_BASE")
        && !base.trim().is_empty()
    {
        config.llm.base_url = Some(base);
    }
    if let Ok(model) = std::env::var("OPENAI_MODEL_NAME")
        && !model.trim().is_empty()
    {
        config.llm.model = model;
    }
}

fn apply_cli_overrides(config: &mut DeepscribeConfig, cli: &Cli) {
    if let Some(depth) = cli.depth {
        config.research.depth = depth;
    }
    if let Some(breadth) = cli.breadth {
        config.research.breadth = breadth;
    }
    if let Some(detail) = cli.detail {
        config.research.detail_level = detail;
    }
    if let Some(language) = &cli.language {
        config.research.language = Language::new(language);
    }
    if cli.refine {
        config.research.refine_query = true;
    }
    if let Some(style) = cli.style {
        config.report.style = style;
    }
    if let Some(model) = &cli.model {
        config.llm.model = model.clone();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let stderr_filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(filter)
    };
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(stderr_filter);

    let log_dir = directories::ProjectDirs::from("dev", "deepscribe", "deepscribe")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "deepscribe.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let mut config = load_config(Some(&workspace), None).map_err(ConfigError::from)?;
    apply_env_overrides(&mut config);
    apply_cli_overrides(&mut config, &cli);
    config.validate()?;

    let service = OpenAiCompatibleService::new(&config.llm)
        .map_err(|e| anyhow::anyhow!("LLM provider init failed: {}", e))?;
    let brain = Brain::new(Arc::new(service), config.retry.clone(), config.llm.timeout());
    let search = DuckDuckGoSearch::new(&config.search)
        .map_err(|e| anyhow::anyhow!("Search backend init failed: {}", e))?;

    let params = ResearchParams::from_config(cli.query.clone(), &config.research);
    let orchestrator = ResearchOrchestrator::new(brain.clone(), Arc::new(search), config.research.clone())
        .with_search_timeout(config.search.timeout())
        .with_progress(Arc::new(progress::CliProgress::new(cli.quiet)));

    let outcome = orchestrator.run(params).await?;
    if let Some(path) = &cli.outcome_json {
        outcome.write_json(path)?;
    }

    let report = ReportAssembler::new(brain, config.report.clone())
        .assemble(&outcome)
        .await;

    report.write_markdown(&cli.output)?;
    if let Some(path) = &cli.quality_json {
        report.write_quality_json(path)?;
    }

    let document = &report.document;
    info!(
        output = %cli.output.display(),
        words = document.total_word_count(),
        citations = report.citations.len(),
        learnings = outcome.learnings.len(),
        sources = outcome.sources.len(),
        "Research complete"
    );
    match report.quality.overall_score {
        Some(score) => info!(score, "Quality evaluated"),
        None => warn!("Quality evaluation unavailable"),
    }
    for flagged in &report.quality.flagged_sections {
        warn!(section = %flagged, "Section flagged by quality review");
    }

    if !cli.quiet {
        println!(
            "\n\x1b[32mReport written:\x1b[0m {} ({} sections, {} {}, {} citations)",
            cli.output.display(),
            document.sections().len(),
            document.total_word_count(),
            document.convention().unit(),
            report.citations.len()
        );
        match report.quality.overall_score {
            Some(score) => println!("  \x1b[90mQuality score:\x1b[0m {:.1}/10", score),
            None => println!("  \x1b[90mQuality score:\x1b[0m unavailable"),
        }
        for suggestion in &report.quality.suggestions {
            println!("  \x1b[33m{}:\x1b[0m {}", suggestion.area, suggestion.suggestion);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_run_parameters() {
        let cli = Cli::try_parse_from([
            "deepscribe",
            "grid storage",
            "--depth",
            "3",
            "--detail",
            "custom_2000",
            "--style",
            "academic",
            "-l",
            "ZH",
        ])
        .unwrap();
        assert_eq!(cli.query, "grid storage");
        assert_eq!(cli.depth, Some(3));
        assert_eq!(cli.detail, Some(DetailLevel::Custom(2000)));
        assert_eq!(cli.style, Some(ReportStyle::Academic));

        let mut config = DeepscribeConfig::default();
        apply_cli_overrides(&mut config, &cli);
        assert_eq!(config.research.depth, 3);
        assert_eq!(config.research.language.code(), "zh");
        assert_eq!(config.research.detail_level, DetailLevel::Custom(2000));
        assert!(!config.research.refine_query);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_refine_flag_enables_query_refinement() {
        let cli = Cli::try_parse_from(["deepscribe", "ocean carbon removal", "--refine"]).unwrap();
        let mut config = DeepscribeConfig::default();
        apply_cli_overrides(&mut config, &cli);
        assert!(config.research.refine_query);
    }

    #[test]
    fn test_cli_rejects_bad_detail() {
        assert!(Cli::try_parse_from(["deepscribe", "q", "--detail", "huge"]).is_err());
    }
}
