//! CLI binary for pagetree.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `AssemblyConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pagetree::{
    convert, load_input, write_output, AssemblyConfig, AssemblyStats, CorrectionProgressCallback,
    OutputFormat, PageSelection, PageSeparator, ProgressCallback,
};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar over correction tasks. Tasks finish out of order, so
/// the bar only counts; failures are printed above it as they arrive.
struct CliProgressCallback {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Assembling");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }
}

impl CorrectionProgressCallback for CliProgressCallback {
    fn on_correction_start(&self, total_tasks: usize) {
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {pos:>3}/{len} tasks  \
                 ⏱ {elapsed_precise}  ETA {eta_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        self.bar.set_length(total_tasks as u64);
        self.bar.set_prefix("Correcting");
        self.bar.reset_eta();
    }

    fn on_task_complete(&self, task: &str, block: &str, _done: usize, _total: usize) {
        self.bar.set_message(format!("{task} {block}"));
        self.bar.inc(1);
    }

    fn on_task_error(&self, task: &str, block: &str, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:<22} {}  {}",
            red("✗"),
            task,
            dim(block),
            red(&msg)
        ));
        self.bar.inc(1);
    }

    fn on_correction_complete(&self, total_tasks: usize, applied: usize) {
        self.bar.finish_and_clear();
        let errors = self.errors.load(Ordering::SeqCst);
        eprintln!(
            "{} {}/{} correction tasks applied{}",
            if errors == 0 { green("✔") } else { cyan("⚠") },
            bold(&applied.to_string()),
            total_tasks,
            if errors > 0 {
                format!("  ({} failed)", red(&errors.to_string()))
            } else {
                String::new()
            }
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Markdown to stdout
  pagetree detections.json

  # HTML to a file, page images written next to it
  pagetree detections.json --format html -o out/doc.html

  # Pages 2-4 only, with a comment between pages
  pagetree --pages 2-4 --separator comment detections.json

  # LLM correction of tables, inline math and equations
  pagetree --llm --provider openai --model gpt-4.1-mini detections.json -o doc.md

INPUT:
  A JSON file with one entry per page: page size, an optional page raster
  (`image_path`, relative to the JSON file), layout boxes, text lines with
  spans, and optional table/equation/form recognitions.

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  RUST_LOG                Override the log filter
"#;

/// Assemble detector output into a document and render it.
#[derive(Parser, Debug)]
#[command(
    name = "pagetree",
    version,
    about = "Assemble PDF detector output into Markdown, HTML or JSON",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Detector output JSON file.
    input: PathBuf,

    /// Write output to this file instead of stdout. Extracted images are
    /// written only in this mode.
    #[arg(short, long, env = "PAGETREE_OUTPUT")]
    output: Option<PathBuf>,

    /// Output format.
    #[arg(short, long, env = "PAGETREE_FORMAT", value_enum, default_value = "markdown")]
    format: FormatArg,

    /// Run LLM correction tasks.
    #[arg(long, env = "PAGETREE_LLM")]
    llm: bool,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1-mini).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Also describe pictures and figures (implies --llm).
    #[arg(long)]
    describe_images: bool,

    /// Do not crop pictures into image files; render descriptions only.
    #[arg(long)]
    no_images: bool,

    /// Page selection: all, 5, 3-15, or 1,3,5,7.
    #[arg(long, env = "PAGETREE_PAGES", default_value = "all")]
    pages: String,

    /// Page separator: none, hr, comment, or custom string.
    #[arg(long, env = "PAGETREE_SEPARATOR", default_value = "none")]
    separator: String,

    /// Number of concurrent correction tasks.
    #[arg(short, long, env = "PAGETREE_CONCURRENCY", default_value_t = 3)]
    concurrency: usize,

    /// Retries per correction call on provider failure.
    #[arg(long, default_value_t = 2)]
    max_retries: u32,

    /// Per-call LLM timeout in seconds.
    #[arg(long, default_value_t = 60)]
    api_timeout: u64,

    /// Print assembly statistics as JSON to stderr.
    #[arg(long)]
    stats: bool,

    /// Disable progress bar.
    #[arg(long)]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PAGETREE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Markdown,
    Html,
    Json,
}

impl From<FormatArg> for OutputFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Markdown => OutputFormat::Markdown,
            FormatArg::Html => OutputFormat::Html,
            FormatArg::Json => OutputFormat::Json,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let use_llm = cli.llm || cli.describe_images;
    let show_progress = use_llm && !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn CorrectionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, use_llm, progress_cb)?;

    let input = load_input(&cli.input)
        .await
        .with_context(|| format!("Failed to load {}", cli.input.display()))?;
    let output = convert(input, &config).await.context("Assembly failed")?;

    if let Some(ref path) = cli.output {
        write_output(&output, path)
            .await
            .context("Failed to write output")?;
        if !cli.quiet {
            eprintln!(
                "{}  {} pages  {} blocks  {} images  {}ms  →  {}",
                green("✔"),
                output.stats.pages,
                output.stats.blocks,
                output.stats.images,
                output.stats.total_duration_ms,
                bold(&path.display().to_string()),
            );
        }
    } else {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(output.content.as_bytes())
            .context("Failed to write to stdout")?;
        if !output.content.ends_with('\n') {
            handle.write_all(b"\n").ok();
        }
    }

    if use_llm && !cli.quiet {
        eprintln!("{}", correction_line(&output.stats));
    }
    if cli.stats {
        eprintln!(
            "{}",
            serde_json::to_string_pretty(&output.stats).context("Failed to serialise stats")?
        );
    }

    Ok(())
}

/// Map CLI args to `AssemblyConfig`.
fn build_config(cli: &Cli, use_llm: bool, progress: Option<ProgressCallback>) -> Result<AssemblyConfig> {
    let mut builder = AssemblyConfig::builder()
        .output_format(cli.format.into())
        .pages(parse_pages(&cli.pages)?)
        .page_separator(parse_separator(&cli.separator))
        .use_llm(use_llm)
        .describe_images(cli.describe_images)
        .extract_images(!cli.no_images)
        .max_concurrency(cli.concurrency)
        .max_retries(cli.max_retries)
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Parse `--pages` string into `PageSelection`.
fn parse_pages(s: &str) -> Result<PageSelection> {
    let s = s.trim().to_lowercase();

    if s == "all" {
        return Ok(PageSelection::All);
    }

    // Range: "3-15"
    if let Some((start, end)) = s.split_once('-') {
        let start: usize = start
            .trim()
            .parse()
            .context("Invalid start page in range")?;
        let end: usize = end.trim().parse().context("Invalid end page in range")?;
        if start < 1 {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", start);
        }
        if start > end {
            anyhow::bail!("Invalid page range '{}-{}': start must be <= end", start, end);
        }
        return Ok(PageSelection::Range(start, end));
    }

    // Set: "1,3,5,7"
    if s.contains(',') {
        let pages: Vec<usize> = s
            .split(',')
            .map(|p| {
                p.trim()
                    .parse::<usize>()
                    .context(format!("Invalid page number: '{}'", p.trim()))
            })
            .collect::<Result<Vec<_>>>()?;
        if let Some(&p) = pages.iter().find(|&&p| p < 1) {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", p);
        }
        return Ok(PageSelection::Set(pages));
    }

    let page: usize = s.parse().context("Invalid page number")?;
    if page < 1 {
        anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", page);
    }
    Ok(PageSelection::Single(page))
}

/// Parse `--separator` string into `PageSeparator`.
fn correction_line(stats: &AssemblyStats) -> String {
    format!(
        "   {} tokens  {}ms correcting",
        dim(&stats.tokens_used.to_string()),
        stats.correction_duration_ms,
    )
}

fn parse_separator(s: &str) -> PageSeparator {
    match s.to_lowercase().as_str() {
        "none" => PageSeparator::None,
        "hr" | "---" => PageSeparator::HorizontalRule,
        "comment" => PageSeparator::Comment,
        _ => PageSeparator::Custom(s.to_string()),
    }
}
