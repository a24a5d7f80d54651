//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use cogreader_core::glossary::DefinitionGenerator;
use cogreader_core::openrouter::{LlmDefinitionGenerator, OpenRouterClient, OpenRouterSummarizer};
use cogreader_core::pipeline::{ReadConfig, ReadExtras, ReadResult, ReadingProgress};
use cogreader_core::summarizer::{CachedSummarizer, DryRunSummarizer, Summarizer};
use cogreader_shared::{
    AppConfig, ReadingConfig, SectionKind, SectionTree, init_config, load_config, validate_api_key,
};
use cogreader_storage::Storage;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// cogreader: read long documents the way a careful human does.
#[derive(Parser)]
#[command(
    name = "cogreader",
    version,
    about = "Read hierarchical documents in multiple sequential passes and emit structured knowledge.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Flags of the `read` subcommand.
#[derive(clap::Args, Debug, Default)]
pub(crate) struct ReadArgs {
    /// Markdown file or JSON section tree to read.
    pub input: PathBuf,

    /// Number of reading passes (overrides config).
    #[arg(short, long)]
    pub passes: Option<u32>,

    /// Output directory (defaults to `[defaults].output_dir`).
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Document title (defaults to front matter, H1, or file name; also overrides JSON trees).
    #[arg(short, long)]
    pub title: Option<String>,

    /// Use the offline extractive summarizer; no API key needed.
    #[arg(long)]
    pub dry_run: bool,

    /// Do not inject the glossary into enriched context.
    #[arg(long)]
    pub no_glossary: bool,

    /// Never use enriched context; every pass is cumulative only.
    #[arg(long)]
    pub cumulative_only: bool,

    /// Bypass the summary cache.
    #[arg(long)]
    pub no_cache: bool,

    /// OpenRouter model ID (overrides config).
    #[arg(short, long, env = "COGREADER_MODEL")]
    pub model: Option<String>,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Read a document and write its knowledge artifacts.
    Read(ReadArgs),

    /// Parse and validate a document, then print its section outline.
    Inspect {
        /// Markdown file or JSON section tree.
        input: PathBuf,

        /// Print the parsed section tree as JSON instead.
        #[arg(long)]
        json: bool,
    },

    /// List recorded reading runs.
    History {
        /// Maximum number of runs to show.
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },

    /// Summary cache management.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Cache subcommands.
#[derive(Subcommand)]
pub(crate) enum CacheAction {
    /// Delete every cached summarizer response.
    Clear,
}

/// Config subcommands.
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
        0 => "cogreader=info",
        1 => "cogreader=debug",
        _ => "cogreader=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
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

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Read(args) => cmd_read(args).await,
        Command::Inspect { input, json } => cmd_inspect(&input, json),
        Command::History { limit } => cmd_history(limit).await,
        Command::Cache { action } => match action {
            CacheAction::Clear => cmd_cache_clear().await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// read
// ---------------------------------------------------------------------------

/// Layer CLI flags over the configured reading settings.
fn apply_overrides(mut reading: ReadingConfig, args: &ReadArgs) -> ReadingConfig {
    if let Some(passes) = args.passes {
        reading.num_passes = passes;
    }
    if args.dry_run {
        reading.dry_run = true;
    }
    if args.no_glossary {
        reading.inject_glossary = false;
    }
    if args.cumulative_only {
        reading.enriched_context = false;
        reading.inject_glossary = false;
    }
    reading
}

async fn cmd_read(args: ReadArgs) -> Result<()> {
    let config = load_config()?;
    let reading = apply_overrides(config.reading.clone(), &args);
    reading.validate()?;

    if !args.input.exists() {
        return Err(eyre!("input '{}' does not exist", args.input.display()));
    }

    let output_root = match &args.out {
        Some(p) => p.clone(),
        None => std::env::current_dir()
            .map_err(|e| eyre!("cannot determine working directory: {e}"))?
            .join(&config.defaults.output_dir),
    };

    let read_config = ReadConfig {
        input: args.input.clone(),
        title: args.title.clone(),
        output_root,
        reading,
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
    };

    let storage = open_storage(&config).await;
    let use_cache = !args.no_cache;

    info!(
        input = %args.input.display(),
        passes = read_config.reading.num_passes,
        dry_run = read_config.reading.dry_run,
        cache = use_cache && storage.is_some(),
        "reading document"
    );

    let result = if read_config.reading.dry_run {
        let inner = DryRunSummarizer::new();
        match storage {
            Some(st) if use_cache => {
                let cached = CachedSummarizer::new(inner, st);
                execute(&read_config, &cached, Some(cached.storage()), None).await?
            }
            other => execute(&read_config, &inner, other.as_ref(), None).await?,
        }
    } else {
        let api_key = validate_api_key(&config)?;
        let client = OpenRouterClient::new(&config.openrouter, api_key, args.model.as_deref())?;
        let definitions = LlmDefinitionGenerator::new(client.clone());
        let inner = OpenRouterSummarizer::new(client);
        match storage {
            Some(st) if use_cache => {
                let cached = CachedSummarizer::new(inner, st);
                execute(&read_config, &cached, Some(cached.storage()), Some(&definitions as &dyn DefinitionGenerator)).await?
            }
            other => execute(&read_config, &inner, other.as_ref(), Some(&definitions as &dyn DefinitionGenerator)).await?,
        }
    };

    print_read_summary(&result);
    Ok(())
}

/// The cache database doubles as run history; failing to open it is not fatal.
async fn open_storage(config: &AppConfig) -> Option<Storage> {
    if !config.cache.enabled {
        return None;
    }
    let path = match config.cache.resolved_path() {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "cache path unavailable, continuing without cache");
            return None;
        }
    };
    match Storage::open(&path).await {
        Ok(storage) => Some(storage),
        Err(e) => {
            warn!(error = %e, path = %path.display(), "could not open cache, continuing without it");
            None
        }
    }
}

async fn execute(
    config: &ReadConfig,
    summarizer: &dyn Summarizer,
    history: Option<&Storage>,
    definitions: Option<&dyn DefinitionGenerator>,
) -> Result<ReadResult> {
    let reporter = CliProgress::new();
    let extras = ReadExtras {
        definitions,
        history,
    };
    match cogreader_core::pipeline::read_document(config, summarizer, extras, &reporter).await {
        Ok(result) => Ok(result),
        Err(e) => {
            reporter.spinner.finish_and_clear();
            Err(e.into())
        }
    }
}

fn print_read_summary(result: &ReadResult) {
    let stats = &result.knowledge.stats;
    println!();
    println!("  Document read successfully!");
    println!("  Run:       {}", result.run_id);
    println!("  Title:     {}", result.knowledge.document_title);
    println!("  Sections:  {}", stats.section_count);
    println!("  Passes:    {}", stats.passes);
    println!("  Concepts:  {}", stats.concept_count);
    println!("  Degraded:  {}", stats.degraded_count);
    for id in &stats.degraded_section_ids {
        println!("             - {id}");
    }
    println!("  Path:      {}", result.run_dir.display());
    println!(
        "  Time:      {:.1}s",
        result.elapsed.as_secs_f64()
    );
    println!();
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
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ReadingProgress for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn section_progress(&self, pass: u32, current: usize, total: usize, title: &str) {
        self.spinner.set_message(format!(
            "Pass {pass} [{current}/{total}] {title}"
        ));
    }

    fn done(&self, _result: &ReadResult) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// inspect / history / cache / config
// ---------------------------------------------------------------------------

fn cmd_inspect(input: &Path, json: bool) -> Result<()> {
    let tree = cogreader_markdown::load_tree(input, None)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&tree)?);
        return Ok(());
    }

    println!("{}", tree.title());
    println!(
        "{} sections, max depth {}",
        tree.len(),
        tree.max_depth()
    );
    println!();
    print!("{}", render_kinds(&tree));
    Ok(())
}

/// One indented line per section with its reading kind.
fn render_kinds(tree: &SectionTree) -> String {
    let mut out = String::new();
    for section in tree.document_order() {
        let kind = match section.kind() {
            SectionKind::Leaf => "leaf",
            SectionKind::ContentBearingParent => "parent",
            SectionKind::ContentlessParent => "content-less",
        };
        out.push_str(&format!(
            "{}{} [{}] ({kind}, {} chars)\n",
            "  ".repeat(section.depth as usize),
            section.title,
            section.id,
            section.text.chars().count(),
        ));
    }
    out
}

async fn cmd_history(limit: u32) -> Result<()> {
    let config = load_config()?;
    let path = config.cache.resolved_path()?;
    if !path.exists() {
        println!("No runs recorded yet.");
        return Ok(());
    }

    let storage = Storage::open_readonly(&path).await?;
    let runs = storage.list_runs(limit).await?;
    if runs.is_empty() {
        println!("No runs recorded yet.");
        return Ok(());
    }

    for run in runs {
        let status = match (run.finished_at, run.degraded_count) {
            (Some(_), Some(0)) => "ok".to_string(),
            (Some(_), Some(n)) => format!("{n} degraded"),
            (Some(_), None) => "finished".to_string(),
            (None, _) => "incomplete".to_string(),
        };
        println!(
            "{}  {}  {:<40}  passes={}  sections={}  {}  ({})",
            run.id,
            run.started_at.format("%Y-%m-%d %H:%M"),
            run.title,
            run.passes,
            run.section_count.map(|n| n.to_string()).unwrap_or_else(|| "-".into()),
            status,
            run.model_id,
        );
    }
    Ok(())
}

async fn cmd_cache_clear() -> Result<()> {
    let config = load_config()?;
    let path = config.cache.resolved_path()?;
    if !path.exists() {
        println!("Cache is empty.");
        return Ok(());
    }
    let storage = Storage::open(&path).await?;
    let removed = storage.clear_summary_cache().await?;
    println!("Removed {removed} cached responses.");
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
