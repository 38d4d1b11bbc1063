//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use vignette_core::assembler::write_document;
use vignette_core::{Pipeline, ProgressReporter};
use vignette_providers::{HttpSearchClient, OpenRouterClient, OpenRouterConfig, SearchConfig};
use vignette_shared::{
    AppConfig, Document, MAX_LOOKBACK_DAYS, PipelineConfig, PipelineStage, UnitStatus,
    config_file_path, init_config, load_config, load_config_from, validate_api_key,
};

use crate::input::load_interactions;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Vignette: a personalized page from your recent activity.
#[derive(Parser)]
#[command(
    name = "vignette",
    version,
    about = "Turn interaction history into a themed, personalized content document.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Use this config file instead of ~/.vignette/vignette.toml.
    #[arg(long, global = true, env = "VIGNETTE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Generate a document from an interactions JSON file.
    Generate {
        /// Interactions file (JSON array, or object with `interactions`).
        #[arg(short, long)]
        input: PathBuf,

        /// Where to write the document.
        #[arg(short, long, default_value = "document.json")]
        out: PathBuf,

        /// Override `pipeline.lookback_days`.
        #[arg(long)]
        lookback_days: Option<u32>,

        /// Override `pipeline.top_k`.
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "vignette=info",
        1 => "vignette=debug",
        _ => "vignette=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    match cli.command {
        Command::Generate {
            input,
            out,
            lookback_days,
            top_k,
        } => {
            let overrides = Overrides {
                lookback_days,
                top_k,
            };
            cmd_generate(config_path.as_deref(), &input, &out, overrides).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path.as_deref()),
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    })
}

/// CLI flags that override config file values.
#[derive(Debug, Default)]
struct Overrides {
    lookback_days: Option<u32>,
    top_k: Option<usize>,
}

fn pipeline_config(config: &AppConfig, overrides: &Overrides) -> Result<PipelineConfig> {
    let mut pipeline = PipelineConfig::from(config);
    if let Some(days) = overrides.lookback_days {
        if days > MAX_LOOKBACK_DAYS {
            return Err(eyre!("--lookback-days must be at most {MAX_LOOKBACK_DAYS}"));
        }
        pipeline.lookback_days = days;
    }
    if let Some(k) = overrides.top_k {
        if k == 0 {
            return Err(eyre!("--top-k must be at least 1"));
        }
        pipeline.top_k = k;
    }
    Ok(pipeline)
}

async fn cmd_generate(
    config_path: Option<&Path>,
    input: &Path,
    out: &Path,
    overrides: Overrides,
) -> Result<()> {
    let config = resolve_config(config_path)?;
    validate_api_key(&config)?;
    let pipeline_config = pipeline_config(&config, &overrides)?;

    let interactions = load_interactions(input)?;

    let model = Arc::new(OpenRouterClient::new(OpenRouterConfig::from_app_config(&config)?)?);
    let search = Arc::new(HttpSearchClient::new(SearchConfig::from_app_config(&config))?);
    let pipeline = Pipeline::new(pipeline_config, model, search);

    info!(
        input = %input.display(),
        interactions = interactions.len(),
        lookback_days = pipeline.config().lookback_days,
        top_k = pipeline.config().top_k,
        "generating document"
    );

    let started = std::time::Instant::now();
    let reporter = CliProgress::new();
    let document = pipeline.run(&interactions, &reporter).await?;
    write_document(out, &document)?;

    print_summary(&document, out, started.elapsed());
    Ok(())
}

fn print_summary(document: &Document, out: &Path, elapsed: std::time::Duration) {
    let meta = &document.metadata;
    let ok = document
        .units
        .iter()
        .filter(|u| u.status == UnitStatus::Ok)
        .count();

    println!();
    println!("  Document generated.");
    println!("  Theme:       {} ({})", document.theme.mood, document.theme.primary);
    println!("  Patterns:    {}{}", meta.pattern_count, fallback_tag(meta.used_fallback_patterns));
    println!(
        "  Queries:     {} issued, {} failed, {} cached",
        meta.queries_issued, meta.queries_failed, meta.cache_hits
    );
    println!(
        "  Units:       {} ({ok} ok, {} fallback, {} duplicate removed)",
        document.units.len(),
        meta.fallback_units,
        meta.duplicates_removed
    );
    println!("  Diagnostics: {}", meta.diagnostics.len());
    println!("  Digest:      {}", meta.content_digest);
    println!("  Path:        {}", out.display());
    println!("  Time:        {:.1}s", elapsed.as_secs_f64());
    println!();
}

fn fallback_tag(used: bool) -> &'static str {
    if used { " (fallback)" } else { "" }
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .map(|s| s.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]))
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

fn stage_label(stage: PipelineStage) -> &'static str {
    match stage {
        PipelineStage::Init => "Starting",
        PipelineStage::Fetching => "Reading interactions",
        PipelineStage::Patterning => "Finding patterns",
        PipelineStage::Theming => "Choosing a theme",
        PipelineStage::Enriching => "Searching for context",
        PipelineStage::Fabricating => "Writing widgets",
        PipelineStage::Deduping => "Removing duplicates",
        PipelineStage::Assembled => "Assembling document",
        PipelineStage::Failed => "Failed",
    }
}

impl ProgressReporter for CliProgress {
    fn stage(&self, stage: PipelineStage) {
        if stage == PipelineStage::Failed {
            self.spinner.abandon_with_message(stage_label(stage));
        } else {
            self.spinner.set_message(stage_label(stage));
        }
    }

    fn detail(&self, message: &str) {
        self.spinner.println(format!("  {message}"));
    }

    fn done(&self, _document: &Document) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// Config commands
// ---------------------------------------------------------------------------

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = resolve_config(path)?;
    let source = match path {
        Some(p) => p.to_path_buf(),
        None => config_file_path()?,
    };
    println!("# {}", source.display());
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
