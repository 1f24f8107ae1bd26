//! CLI binary for ocr-ledger.
//!
//! A thin shim over the library crate: flags map to `PipelineConfig`, the
//! clients are built here and handed to the orchestrator or reconciler, and
//! reports are printed as text or JSON.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use ocr_ledger::pipeline::input::DEFAULT_SOURCE_DIR;
use ocr_ledger::{
    Backoff, BatchReport, DocumentReport, DocumentStatus, LlmRecognizer, Orchestrator,
    PageSeparator, PdfiumSource, PipelineConfig, PipelineProgressCallback, ProgressCallback,
    Reconciler, ResumePolicy, SqliteLedger,
};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar for the whole batch. Its length grows as each document reports
/// how many pages it still needs, since pages complete out of order across
/// documents.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>4}/{len} pages  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        bar.set_style(style);
        bar.set_prefix("Recognising");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self { bar })
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, documents: usize) {
        self.bar.set_message(format!("{documents} documents"));
    }

    fn on_document_start(&self, filename: &str, total_pages: u32, pending: usize) {
        self.bar.inc_length(pending as u64);
        self.bar.println(format!(
            "  {} {:<40} {}",
            dim("◆"),
            filename,
            dim(&format!("{pending}/{total_pages} pages pending")),
        ));
    }

    fn on_page_complete(&self, _filename: &str, _page_number: u32, _chars: usize) {
        self.bar.inc(1);
    }

    fn on_page_error(&self, filename: &str, page_number: u32, error: &str) {
        let msg = if error.chars().count() > 80 {
            let cut: String = error.chars().take(79).collect();
            format!("{cut}\u{2026}")
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {} p.{:<4} {}",
            red("✗"),
            filename,
            page_number,
            red(&msg)
        ));
        self.bar.inc(1);
    }

    fn on_document_complete(&self, report: &DocumentReport) {
        if let DocumentStatus::Aborted { reason } = &report.status {
            self.bar.println(format!(
                "  {} {}  {}",
                red("✘"),
                report.filename,
                red(reason)
            ));
        }
    }

    fn on_batch_complete(&self, report: &BatchReport) {
        self.bar.finish_and_clear();
        let failed = report.failed() + report.lost();
        let marker = if failed == 0 && report.aborted_documents() == 0 {
            green("✔")
        } else {
            yellow("⚠")
        };
        eprintln!(
            "{} {} pages recognised, {} failed, {} lost across {} documents  {}",
            marker,
            bold(&report.recognized().to_string()),
            report.failed(),
            report.lost(),
            report.documents.len(),
            dim(&format!("{:.1}s", report.total_duration_ms as f64 / 1000.0)),
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Recognise every PDF under ./WECs, resuming from the ledger
  ocr-ledger run

  # Another directory, narrower pools, retry pages that failed last time
  ocr-ledger run scans/ --documents 2 --pages 5 --retry-failed

  # Compare ledger rows against each PDF's page count
  ocr-ledger check

  # Write one Markdown file per complete issue
  ocr-ledger assemble --output assembled/

  # Overall completion
  ocr-ledger progress --json

ENVIRONMENT VARIABLES:
  DATABASE_URL            Ledger location (default: sqlite://ocr-ledger.db)
  OCR_LEDGER_DIR          Source directory (default: WECs)
  EDGEQUAKE_PROVIDER      Recognition provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Model ID (default: gemini-2.0-flash)
  GEMINI_API_KEY          Google Gemini API key
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  PDFIUM_LIB_PATH         Directory containing libpdfium (default: system library)
  RUST_LOG                Log filter, overrides --verbose / --quiet

A .env file in the working directory is loaded before flags are parsed.
"#;

/// Resumable page-by-page OCR of PDF collections into a SQLite ledger.
#[derive(Parser, Debug)]
#[command(
    name = "ocr-ledger",
    version,
    about = "Resumable page-by-page OCR of PDF collections into a SQLite ledger",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Ledger database URL.
    #[arg(
        long,
        global = true,
        env = "DATABASE_URL",
        default_value = "sqlite://ocr-ledger.db"
    )]
    database_url: String,

    /// Directory containing the pdfium shared library.
    #[arg(long, global = true, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Print reports as JSON on stdout.
    #[arg(long, global = true)]
    json: bool,

    /// Debug-level logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Errors only.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Recognise every pending page of every PDF in a directory.
    Run(RunArgs),
    /// Compare persisted rows with each issue's page count.
    Check(SourceDirArg),
    /// Write one Markdown file per complete issue.
    Assemble(AssembleArgs),
    /// Show persisted rows against declared pages.
    Progress,
}

#[derive(Args, Debug)]
struct SourceDirArg {
    /// Directory holding the source PDFs.
    #[arg(env = "OCR_LEDGER_DIR", default_value = DEFAULT_SOURCE_DIR)]
    dir: PathBuf,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    source: SourceDirArg,

    /// Recognition provider: openai, anthropic, gemini, ollama.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Model ID.
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Rendering DPI (72–600).
    #[arg(long, default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Documents processed at once.
    #[arg(long = "documents", default_value_t = 3)]
    document_concurrency: usize,

    /// Pages per document processed at once.
    #[arg(long = "pages", default_value_t = 10)]
    page_concurrency: usize,

    /// Recognition attempts per page.
    #[arg(long, default_value_t = 3)]
    max_attempts: u32,

    /// Base delay between attempts, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    retry_delay_ms: u64,

    /// How the delay grows between attempts.
    #[arg(long, value_enum, default_value_t = BackoffArg::Linear)]
    backoff: BackoffArg,

    /// Per-call recognition deadline in seconds.
    #[arg(long)]
    api_timeout: Option<u64>,

    /// Clear pages recorded as failed and recognise them again.
    #[arg(long)]
    retry_failed: bool,

    /// Hide the progress bar.
    #[arg(long)]
    no_progress: bool,
}

#[derive(Args, Debug)]
struct AssembleArgs {
    /// Output directory for assembled Markdown.
    #[arg(short, long, default_value = "assembled")]
    output: PathBuf,

    /// Separator between pages.
    #[arg(long, value_enum, default_value_t = SeparatorArg::Blank)]
    separator: SeparatorArg,
}

#[derive(ValueEnum, Clone, Debug)]
enum BackoffArg {
    Constant,
    Linear,
    Exponential,
}

impl From<BackoffArg> for Backoff {
    fn from(v: BackoffArg) -> Self {
        match v {
            BackoffArg::Constant => Backoff::Constant,
            BackoffArg::Linear => Backoff::Linear,
            BackoffArg::Exponential => Backoff::Exponential,
        }
    }
}

#[derive(ValueEnum, Clone, Debug)]
enum SeparatorArg {
    Blank,
    Rule,
    Comment,
}

impl From<SeparatorArg> for PageSeparator {
    fn from(v: SeparatorArg) -> Self {
        match v {
            SeparatorArg::Blank => PageSeparator::Blank,
            SeparatorArg::Rule => PageSeparator::HorizontalRule,
            SeparatorArg::Comment => PageSeparator::Comment,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO output for `run` unless verbose.
    let show_progress = matches!(&cli.command, Command::Run(a) if !a.no_progress)
        && !cli.quiet
        && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let ledger = Arc::new(
        SqliteLedger::connect(&cli.database_url)
            .await
            .with_context(|| format!("Failed to open ledger at {}", cli.database_url))?,
    );

    match &cli.command {
        Command::Run(args) => run(&cli, args, ledger, show_progress).await,
        Command::Check(args) => check(&cli, &args.dir, ledger).await,
        Command::Assemble(args) => assemble(&cli, args, ledger).await,
        Command::Progress => progress(&cli, ledger).await,
    }
}

fn pdfium(cli: &Cli) -> Result<Arc<PdfiumSource>> {
    let source = PdfiumSource::new(cli.pdfium_lib.as_deref())
        .context("Failed to load pdfium; set PDFIUM_LIB_PATH to the directory holding it")?;
    Ok(Arc::new(source))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to serialise report")?;
    println!("{text}");
    Ok(())
}

async fn run(
    cli: &Cli,
    args: &RunArgs,
    ledger: Arc<SqliteLedger>,
    show_progress: bool,
) -> Result<ExitCode> {
    let recognizer = LlmRecognizer::from_env(args.provider.as_deref(), args.model.as_deref())
        .context("Failed to configure recognition provider")?
        .with_timeout_secs(args.api_timeout);

    let mut builder = PipelineConfig::builder()
        .dpi(args.dpi)
        .document_concurrency(args.document_concurrency)
        .page_concurrency(args.page_concurrency)
        .max_attempts(args.max_attempts)
        .retry_delay(Duration::from_millis(args.retry_delay_ms))
        .backoff(args.backoff.clone().into())
        .resume_policy(if args.retry_failed {
            ResumePolicy::RetryFailed
        } else {
            ResumePolicy::SkipFailed
        });
    if show_progress {
        let cb: ProgressCallback = CliProgressCallback::new();
        builder = builder.progress_callback(cb);
    }
    let config = builder.build()?;

    let orchestrator = Orchestrator::new(pdfium(cli)?, Arc::new(recognizer), ledger, config);
    let report = orchestrator
        .run_directory(&args.source.dir)
        .await
        .with_context(|| format!("Failed to process {}", args.source.dir.display()))?;

    if cli.json {
        print_json(&report)?;
    } else if !show_progress {
        for doc in &report.documents {
            match &doc.status {
                DocumentStatus::Aborted { reason } => {
                    println!("{} {:<40} {}", red("✘"), doc.filename, reason)
                }
                DocumentStatus::Skipped => {
                    println!("{} {:<40} {}", dim("·"), doc.filename, dim("nothing pending"))
                }
                DocumentStatus::Processed => println!(
                    "{} {:<40} {} recognised, {} failed, {} already recorded, {} lost",
                    green("✓"),
                    doc.filename,
                    doc.recognized(),
                    doc.failed(),
                    doc.already_recorded(),
                    doc.lost()
                ),
            }
        }
        eprintln!(
            "{} pages recognised, {} failed, {} lost, {} documents aborted",
            report.recognized(),
            report.failed(),
            report.lost(),
            report.aborted_documents()
        );
    }

    Ok(if report.aborted_documents() > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

async fn check(cli: &Cli, dir: &Path, ledger: Arc<SqliteLedger>) -> Result<ExitCode> {
    let reconciler = match pdfium(cli) {
        Ok(source) => Reconciler::new(ledger).with_source(source),
        Err(e) => {
            tracing::warn!("{:#}; page counts will not be backfilled", e);
            Reconciler::new(ledger)
        }
    };
    let checks = reconciler.check_counts(dir).await?;
    let incomplete = checks.iter().filter(|c| !c.is_complete()).count();

    if cli.json {
        print_json(&checks)?;
    } else {
        for c in &checks {
            let expected = c
                .num_pages
                .map(|n| n.to_string())
                .unwrap_or_else(|| "?".to_string());
            let mark = if c.is_complete() { green("✓") } else { red("✗") };
            let backfill = if c.backfilled { dim(" (page count set)") } else { String::new() };
            println!(
                "{} {:<40} {:>5}/{:<5}{}",
                mark, c.filename, c.persisted, expected, backfill
            );
        }
        eprintln!(
            "{} issues checked, {} incomplete",
            checks.len(),
            incomplete
        );
    }

    Ok(if incomplete > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

async fn assemble(cli: &Cli, args: &AssembleArgs, ledger: Arc<SqliteLedger>) -> Result<ExitCode> {
    if args.output.is_file() {
        bail!("{} is a file, expected a directory", args.output.display());
    }
    let reconciler = Reconciler::new(ledger);
    let separator: PageSeparator = args.separator.clone().into();
    let reports = reconciler.assemble_all(&args.output, &separator).await?;

    if cli.json {
        print_json(&reports)?;
    } else {
        use ocr_ledger::AssemblyOutcome::*;
        let mut written = 0usize;
        for r in &reports {
            match &r.outcome {
                Written { path, pages } => {
                    written += 1;
                    println!("{} {} → {} ({} pages)", green("✓"), r.filename, path.display(), pages);
                }
                AlreadyAssembled { path } => {
                    println!("{} {} {}", dim("·"), r.filename, dim(&path.display().to_string()));
                }
                Incomplete { expected, persisted } => {
                    println!("{} {} {}/{} pages", yellow("…"), r.filename, persisted, expected);
                }
                UnknownPageCount => {
                    println!("{} {} page count unknown, run `check` first", yellow("?"), r.filename);
                }
            }
        }
        eprintln!("{} written, {} issues total", written, reports.len());
    }
    Ok(ExitCode::SUCCESS)
}

async fn progress(cli: &Cli, ledger: Arc<SqliteLedger>) -> Result<ExitCode> {
    let reconciler = Reconciler::new(ledger);
    let summary = reconciler.completion_summary().await?;

    if cli.json {
        print_json(&summary)?;
    } else {
        println!(
            "{} issues, {} pages persisted of {} declared ({:.2}%)",
            summary.issues,
            summary.persisted_pages,
            summary.declared_pages,
            summary.percent_complete
        );
        if summary.issues_without_page_count > 0 {
            println!(
                "{} issues have no page count yet; run `check` to resolve them",
                summary.issues_without_page_count
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}
