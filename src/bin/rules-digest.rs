//! CLI binary for rules-digest.
//!
//! Loads `.env`, maps flags and environment variables to `PipelineConfig`,
//! connects to PostgreSQL and runs one batch of pending jobs.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use rules_digest::{
    build_http_client, run_batch, store, ConverterExtractor, HttpOcrClient, JobProcessor,
    JobProgressCallback, JobStage, PgJobStore, PipelineConfig, ProgressCallback,
    StreamingSummarizer,
};
use std::io;
use std::path::PathBuf;
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
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar for the batch, one log line per finished or failed job.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} jobs  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(style);
        bar.set_prefix("Digesting");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl JobProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_jobs: usize) {
        self.bar.set_length(total_jobs as u64);
        self.bar.reset_eta();
    }

    fn on_stage(&self, worker: usize, job_id: i64, stage: JobStage) {
        self.bar.set_message(format!("w{worker} job {job_id}: {stage}"));
    }

    fn on_job_complete(&self, worker: usize, job_id: i64) {
        self.bar.println(format!(
            "  {} job {:>6}  {}",
            green("✓"),
            job_id,
            dim(&format!("worker {worker}"))
        ));
        self.bar.inc(1);
    }

    fn on_job_error(&self, worker: usize, job_id: i64, error: &str) {
        let msg = match error.char_indices().nth(80) {
            Some((cut, _)) => format!("{}\u{2026}", &error[..cut]),
            None => error.to_string(),
        };
        self.bar.println(format!(
            "  {} job {:>6}  {}  {}",
            red("✗"),
            job_id,
            red(&msg),
            dim(&format!("worker {worker}"))
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, finished: usize, failed: usize) {
        self.bar.finish_and_clear();
        if failed == 0 {
            eprintln!("{} {} jobs finished", green("✔"), bold(&finished.to_string()));
        } else {
            eprintln!(
                "{} {} jobs finished, {} left pending",
                red("✘"),
                bold(&finished.to_string()),
                failed
            );
        }
    }
}

/// Summarise board-game rule PDFs: convert, OCR, summarise, store.
#[derive(Parser, Debug)]
#[command(
    name = "rules-digest",
    version,
    about = "OCR and summarise pending board-game rule PDFs",
    color = clap::ColorChoice::Auto
)]
struct Cli {
    /// PostgreSQL connection URL.
    #[arg(long, env = "PG_URL")]
    pg_url: String,

    /// Directory holding `<id>.pdf` rule files.
    #[arg(long, env = "RULES_PDF_PATH")]
    pdf_root: Option<PathBuf>,

    /// Directory receiving `<id>/page-N.png` images.
    #[arg(long, env = "RULES_IMG_PATH")]
    image_root: Option<PathBuf>,

    /// PDF-to-image converter command, e.g. "pdftoppm" or "wsl pdftoppm".
    #[arg(long, env = "PDF_CONVERTER", default_value = "pdftoppm")]
    converter: String,

    /// The PDF directory as the converter sees it, e.g. "/mnt/c/files/rules/" under WSL.
    #[arg(long, env = "WSL_PDF_PATH")]
    converter_pdf_prefix: Option<String>,

    /// The image directory as the converter sees it.
    #[arg(long, env = "WSL_IMG_OUTPUT_PATH")]
    converter_image_prefix: Option<String>,

    /// Base URL of the OCR service.
    #[arg(long, env = "OCR_URL", default_value = "http://localhost:8000")]
    ocr_url: String,

    /// Streaming generation endpoint.
    #[arg(long, env = "SUMMARY_URL", default_value = "https://ollama.com/api/generate")]
    summary_url: String,

    /// Model used for summaries.
    #[arg(long, env = "SUMMARY_MODEL", default_value = "qwen3-vl:235b")]
    model: String,

    /// Bearer token for the generation endpoint.
    #[arg(long, env = "OLLAMA_API", hide_env_values = true)]
    api_key: Option<String>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long)]
    system_prompt: Option<PathBuf>,

    /// Number of concurrent workers.
    #[arg(short, long, env = "DIGEST_WORKERS", default_value_t = 3)]
    workers: usize,

    /// Pending jobs fetched per run.
    #[arg(short, long, env = "DIGEST_BATCH_SIZE", default_value_t = 30)]
    batch_size: i64,

    /// Timeout applied to every outbound HTTP request, in seconds.
    #[arg(long, env = "DIGEST_HTTP_TIMEOUT", default_value_t = 300)]
    http_timeout: u64,

    /// Table holding game-detail records.
    #[arg(long, env = "DIGEST_TABLE", default_value = "game_detail")]
    table: String,

    /// Keep OCR results only together with the summary (all-or-nothing).
    #[arg(long)]
    no_eager_ocr: bool,

    /// Download missing PDFs from the record's rules link.
    #[arg(long)]
    fetch_missing: bool,

    /// Disable progress bar.
    #[arg(long)]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; explicit environment still applies.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress;
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

    let config = Arc::new(build_config(&cli).await?);
    let client = build_http_client(&config)?;

    let pool = store::connect(&cli.pg_url, pool_size(config.workers))
        .await
        .context("Failed to connect to PostgreSQL")?;
    let store = Arc::new(PgJobStore::new(pool, &config.table));

    let mut processor = JobProcessor::new(
        Arc::new(ConverterExtractor::new(config.clone(), client.clone())),
        Arc::new(HttpOcrClient::new(client.clone(), &config.ocr_url)),
        Arc::new(StreamingSummarizer::new(config.clone(), client)),
        store.clone(),
        config.clone(),
    );
    if show_progress {
        processor = processor.with_progress(CliProgressCallback::new() as ProgressCallback);
    }

    let summary = run_batch(store.as_ref(), Arc::new(processor), &config).await?;

    if !cli.quiet && !show_progress {
        eprintln!(
            "{} finished, {} failed, {} skipped",
            summary.finished(),
            summary.failed(),
            summary.skipped()
        );
    }
    Ok(())
}

/// One connection per worker plus one for the producer.
fn pool_size(workers: usize) -> u32 {
    u32::try_from(workers).unwrap_or(u32::MAX).saturating_add(1)
}

async fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .converter(cli.converter.split_whitespace())
        .converter_pdf_prefix(cli.converter_pdf_prefix.clone())
        .converter_image_prefix(cli.converter_image_prefix.clone())
        .ocr_url(&cli.ocr_url)
        .summary_url(&cli.summary_url)
        .summary_model(&cli.model)
        .summary_api_key(cli.api_key.clone())
        .workers(cli.workers)
        .batch_size(cli.batch_size)
        .http_timeout_secs(cli.http_timeout)
        .table(&cli.table)
        .persist_ocr_eagerly(!cli.no_eager_ocr)
        .fetch_missing_pdfs(cli.fetch_missing);

    if let Some(root) = &cli.pdf_root {
        builder = builder.pdf_root(root);
    }
    if let Some(root) = &cli.image_root {
        builder = builder.image_root(root);
    }
    if let Some(path) = &cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt: {}", path.display()))?;
        builder = builder.system_prompt(prompt);
    }

    Ok(builder.build()?)
}
