//! CLI binary for edgequake-pdf2md-jobs.
//!
//! A thin shim over the library crate: maps flags to `ServiceConfig`,
//! drives a `JobService` for `run` / `resume`, and reads the registry
//! snapshot directly for `status` / `list` / `result`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use edgequake_pdf2md_jobs::{
    DocumentSource, Job, JobId, JobProgressCallback, JobRegistry, JobService, JobStatus,
    ProgressCallback, ServiceConfig, SubmitRequest,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
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
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar for every batch of every job in flight. Its length grows as
/// workers discover how many batches each job has.
struct CliProgressCallback {
    bar: ProgressBar,
    exhausted: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} batches  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Converting");
        bar.set_message("rendering…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            exhausted: AtomicUsize::new(0),
        })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
        let exhausted = self.exhausted.load(Ordering::SeqCst);
        if exhausted > 0 {
            eprintln!(
                "{} {} batch(es) replaced by a placeholder",
                yellow("⚠"),
                bold(&exhausted.to_string())
            );
        }
    }
}

fn short(id: &JobId) -> String {
    id.as_str().chars().take(8).collect()
}

impl JobProgressCallback for CliProgressCallback {
    fn on_job_start(&self, job: &JobId, page_count: usize, batches_total: usize) {
        self.bar.inc_length(batches_total as u64);
        self.bar.println(format!(
            "{} {}  {} pages, {} batches",
            bold("◆"),
            short(job),
            page_count,
            batches_total
        ));
    }

    fn on_batch_complete(&self, job: &JobId, done: usize, total: usize, attempts: u32) {
        self.bar.inc(1);
        self.bar
            .set_message(format!("{} batch {done}/{total}", short(job)));
        if attempts > 1 {
            self.bar.println(format!(
                "  {} {} batch {done}/{total}  {}",
                dim("↻"),
                short(job),
                dim(&format!("{attempts} attempts"))
            ));
        }
    }

    fn on_batch_exhausted(&self, job: &JobId, batch: usize, total: usize, error: &str) {
        self.exhausted.fetch_add(1, Ordering::SeqCst);
        let msg: String = error.chars().take(80).collect();
        self.bar.println(format!(
            "  {} {} batch {batch}/{total}  {}",
            yellow("⚠"),
            short(job),
            red(&msg)
        ));
    }

    fn on_job_complete(&self, job: &JobId, result_path: &Path) {
        self.bar.println(format!(
            "{} {}  → {}",
            green("✔"),
            short(job),
            result_path.display()
        ));
    }

    fn on_job_failed(&self, job: &JobId, error: &str) {
        self.bar
            .println(format!("{} {}  {}", red("✘"), short(job), red(error)));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert two documents with 4 workers, 10 pages per VLM call
  pdf2md-jobs run report.pdf https://arxiv.org/pdf/1706.03762

  # Smaller batches, more retries, keep the rendered pages
  pdf2md-jobs run --batch-size 5 --retry 4 --keep-images slides.pdf

  # Finish jobs interrupted by a crash or restart
  pdf2md-jobs resume

  # Inspect the registry
  pdf2md-jobs list
  pdf2md-jobs status 3f2b8c1e-...
  pdf2md-jobs result 3f2b8c1e-... -o report.md

STORAGE LAYOUT:
  <storage-dir>/jobs.json               job registry snapshot
  <storage-dir>/<job id>/input.pdf      staged document
  <storage-dir>/<job id>/images/        page images (--keep-images)
  <storage-dir>/<job id>/result_<id>.md Markdown artifact

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Directory (or file) of an existing libpdfium
"#;

/// Queue PDF-to-Markdown jobs and run them with Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2md-jobs",
    version,
    about = "Durable PDF-to-Markdown job queue using Vision LLMs",
    long_about = "Convert PDF documents to Markdown in page batches using Vision Language \
Models. Jobs are recorded in a JSON registry so that work interrupted by a crash or \
restart is picked up again by the next run.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Root directory for the registry and job working directories.
    #[arg(long, global = true, env = "PDF2MD_STORAGE_DIR", default_value = "pdf_jobs")]
    storage_dir: PathBuf,

    /// Number of concurrent workers (jobs in flight).
    #[arg(short, long, global = true, env = "PDF2MD_WORKERS", default_value_t = 4)]
    workers: usize,

    /// Rendering DPI (72–400).
    #[arg(long, global = true, env = "PDF2MD_DPI", default_value_t = 200,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Default pages per VLM call.
    #[arg(long, global = true, env = "PDF2MD_BATCH_SIZE", default_value_t = 10)]
    batch_size: usize,

    /// Default extra attempts per batch.
    #[arg(long, global = true, env = "PDF2MD_RETRY", default_value_t = 2)]
    retry: u32,

    /// Keep rendered page images in <job dir>/images/.
    #[arg(long, global = true, env = "PDF2MD_KEEP_IMAGES")]
    keep_images: bool,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, global = true, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, global = true, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, global = true, env = "PDF2MD_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Max LLM output tokens per batch.
    #[arg(long, global = true, env = "PDF2MD_MAX_TOKENS", default_value_t = 8192)]
    max_tokens: usize,

    /// Per-call LLM timeout in seconds.
    #[arg(long, global = true, env = "PDF2MD_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, global = true, env = "PDF2MD_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Directory holding libpdfium.
    #[arg(long, global = true, env = "PDFIUM_LIB_PATH")]
    pdfium_lib_path: Option<PathBuf>,

    /// Machine-readable JSON output.
    #[arg(long, global = true, env = "PDF2MD_JSON")]
    json: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PDF2MD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PDF2MD_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit documents, process them and wait for the results.
    Run {
        /// Local PDF paths or HTTP/HTTPS URLs.
        #[arg(required = true)]
        inputs: Vec<String>,

        /// Display name for the job (single input only).
        #[arg(long)]
        name: Option<String>,
    },
    /// Re-run jobs left PENDING or RUNNING by an earlier process.
    Resume,
    /// Show one job.
    Status { id: String },
    /// List all jobs, newest first.
    List,
    /// Print a finished job's Markdown.
    Result {
        id: String,
        /// Copy the artifact here instead of printing it.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // While the progress bar is active, INFO lines would tear it; the bar
    // and its println output carry the same information.
    let drives_workers = matches!(cli.command, Command::Run { .. } | Command::Resume);
    let show_progress = drives_workers && !cli.quiet && !cli.json;
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

    match &cli.command {
        Command::Run { inputs, name } => {
            let progress = show_progress.then(CliProgressCallback::new);
            let config = build_config(&cli, progress.clone().map(|p| p as ProgressCallback)).await?;
            let service = JobService::start(config)
                .await
                .context("Failed to start job service")?;

            let mut ids = Vec::with_capacity(inputs.len());
            for input in inputs {
                let mut request = SubmitRequest::new(DocumentSource::parse(input));
                if let (Some(n), 1) = (name, inputs.len()) {
                    request = request.display_name(n.clone());
                }
                let id = service
                    .submit(request)
                    .await
                    .with_context(|| format!("Failed to submit '{input}'"))?;
                if !cli.quiet && !cli.json {
                    eprintln!("{} {}  {}", dim("+"), id, input);
                }
                ids.push(id);
            }

            let jobs = wait_all(&service, &ids).await?;
            service.shutdown().await;
            if let Some(p) = progress {
                p.finish();
            }
            report(&cli, &jobs)?;
            exit_on_failure(&jobs);
        }

        Command::Resume => {
            let progress = show_progress.then(CliProgressCallback::new);
            let config = build_config(&cli, progress.clone().map(|p| p as ProgressCallback)).await?;
            let service = JobService::start(config)
                .await
                .context("Failed to start job service")?;

            let ids: Vec<JobId> = service
                .list()
                .await
                .into_iter()
                .filter(|j| !j.is_terminal())
                .map(|j| j.id)
                .collect();
            if !cli.quiet && !cli.json {
                eprintln!("Resuming {} job(s)", bold(&service.recovered().to_string()));
            }

            let jobs = wait_all(&service, &ids).await?;
            service.shutdown().await;
            if let Some(p) = progress {
                p.finish();
            }
            report(&cli, &jobs)?;
            exit_on_failure(&jobs);
        }

        Command::Status { id } => {
            let registry = open_registry(&cli).await?;
            let job = registry
                .get(&id.parse()?)
                .await
                .with_context(|| format!("Job '{id}' not found"))?;
            report(&cli, std::slice::from_ref(&job))?;
        }

        Command::List => {
            let registry = open_registry(&cli).await?;
            report(&cli, &registry.list().await)?;
        }

        Command::Result { id, output } => {
            let registry = open_registry(&cli).await?;
            let job = registry
                .get(&id.parse()?)
                .await
                .with_context(|| format!("Job '{id}' not found"))?;
            let path = job.artifact_path()?;
            match output {
                Some(dest) => {
                    tokio::fs::copy(path, dest)
                        .await
                        .with_context(|| format!("Failed to copy result to {}", dest.display()))?;
                    if !cli.quiet {
                        eprintln!("{} {}", green("✔"), bold(&dest.display().to_string()));
                    }
                }
                None => {
                    let markdown = tokio::fs::read_to_string(path)
                        .await
                        .with_context(|| format!("Failed to read {}", path.display()))?;
                    io::stdout()
                        .lock()
                        .write_all(markdown.as_bytes())
                        .context("Failed to write to stdout")?;
                }
            }
        }
    }

    Ok(())
}

/// Map CLI args to `ServiceConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ServiceConfig> {
    let mut builder = ServiceConfig::builder()
        .storage_dir(&cli.storage_dir)
        .workers(cli.workers)
        .dpi(cli.dpi)
        .default_batch_size(cli.batch_size)
        .default_retry_limit(cli.retry)
        .keep_images(cli.keep_images)
        .max_tokens(cli.max_tokens)
        .api_timeout_secs(cli.api_timeout)
        .download_timeout_secs(cli.download_timeout);

    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref dir) = cli.pdfium_lib_path {
        builder = builder.pdfium_lib_path(dir);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

async fn open_registry(cli: &Cli) -> Result<JobRegistry> {
    let config = ServiceConfig::builder()
        .storage_dir(&cli.storage_dir)
        .build()
        .context("Invalid configuration")?;
    JobRegistry::open(config.registry_path())
        .await
        .context("Failed to open job registry")
}

async fn wait_all(service: &JobService, ids: &[JobId]) -> Result<Vec<Job>> {
    let mut jobs = Vec::with_capacity(ids.len());
    for id in ids {
        let job = service
            .wait_for(id, Duration::from_millis(250))
            .await
            .with_context(|| format!("Lost track of job {id}"))?;
        jobs.push(job);
    }
    Ok(jobs)
}

fn report(cli: &Cli, jobs: &[Job]) -> Result<()> {
    if cli.json {
        let json = serde_json::to_string_pretty(jobs).context("Failed to serialise jobs")?;
        println!("{json}");
        return Ok(());
    }
    for job in jobs {
        println!("{}", format_job(job));
    }
    Ok(())
}

fn format_job(job: &Job) -> String {
    let status = match job.status {
        JobStatus::Done => green("DONE"),
        JobStatus::Failed => red("FAILED"),
        JobStatus::Running => yellow("RUNNING"),
        JobStatus::Pending => dim("PENDING"),
    };
    let progress = match (job.batches_total, job.progress_percent()) {
        (Some(total), Some(pct)) => format!("{}/{} batches ({pct}%)", job.batches_done, total),
        _ => "-".to_string(),
    };
    let detail = match job.status {
        JobStatus::Done => job
            .result_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
        JobStatus::Failed => job.error.clone().unwrap_or_default(),
        _ => String::new(),
    };
    format!(
        "{}  {:<18}  {:<24}  {}  {}",
        job.id,
        status,
        progress,
        bold(&job.display_name),
        dim(&detail)
    )
}

fn exit_on_failure(jobs: &[Job]) {
    if jobs.iter().any(|j| j.status == JobStatus::Failed) {
        std::process::exit(1);
    }
}
