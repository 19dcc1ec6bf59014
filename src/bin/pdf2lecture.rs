//! pdf2lecture CLI — turn a PDF into a narrated audio lecture, or run the
//! HTTP service that does the same thing for uploads.

use std::collections::HashMap;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use pdf2lecture::config::{AnalysisMode, PageSelection, PipelineConfig};
use pdf2lecture::job::StageKind;
use pdf2lecture::progress::LectureProgressCallback;
use pdf2lecture::server::{self, ServerConfig};

// ── ANSI helpers ─────────────────────────────────────────────────────────

fn use_color() -> bool {
    io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none()
}

fn paint(code: &str, s: &str) -> String {
    if use_color() {
        format!("\x1b[{code}m{s}\x1b[0m")
    } else {
        s.to_string()
    }
}

fn green(s: &str) -> String {
    paint("32", s)
}

fn red(s: &str) -> String {
    paint("31", s)
}

fn yellow(s: &str) -> String {
    paint("33", s)
}

fn cyan(s: &str) -> String {
    paint("36", s)
}

fn dim(s: &str) -> String {
    paint("2", s)
}

fn bold(s: &str) -> String {
    paint("1", s)
}

// ── Progress bar ─────────────────────────────────────────────────────────

/// Drives one indicatif bar per pipeline stage.
///
/// Units within a stage complete concurrently and out of order, so the bar
/// counts completions rather than positions. Unit errors are printed above
/// the bar as they happen; the stage summary line replaces the bar when the
/// stage finishes.
struct CliProgress {
    bar: Mutex<Option<ProgressBar>>,
    stage_started: Mutex<HashMap<StageKind, Instant>>,
    errors: AtomicUsize,
}

impl CliProgress {
    fn new() -> Self {
        Self {
            bar: Mutex::new(None),
            stage_started: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        }
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::with_template(
            "{prefix:>8} {bar:30.cyan/dim} {pos}/{len} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
    }
}

impl LectureProgressCallback for CliProgress {
    fn on_stage_start(&self, stage: StageKind, total_units: usize) {
        self.stage_started
            .lock()
            .unwrap()
            .insert(stage, Instant::now());
        let bar = ProgressBar::new(total_units as u64);
        bar.set_style(Self::bar_style());
        bar.set_prefix(stage.label().to_string());
        *self.bar.lock().unwrap() = Some(bar);
    }

    fn on_unit_complete(&self, _stage: StageKind, _unit: usize, _total_units: usize) {
        if let Some(bar) = self.bar.lock().unwrap().as_ref() {
            bar.inc(1);
        }
    }

    fn on_unit_error(&self, stage: StageKind, unit: usize, error: &str) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        let line = format!(
            "  {} {} unit {}: {}",
            red("✗"),
            stage.label(),
            unit,
            error
        );
        match self.bar.lock().unwrap().as_ref() {
            Some(bar) => bar.println(line),
            None => eprintln!("{line}"),
        }
    }

    fn on_stage_complete(&self, stage: StageKind, succeeded: usize, total_units: usize) {
        let elapsed = self
            .stage_started
            .lock()
            .unwrap()
            .get(&stage)
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        let mark = if succeeded == total_units {
            green("✔")
        } else {
            yellow("⚠")
        };
        let line = format!(
            "{mark} {:>8}  {}/{} units in {:.1}s",
            stage.label(),
            succeeded,
            total_units,
            elapsed
        );
        if let Some(bar) = self.bar.lock().unwrap().take() {
            bar.finish_and_clear();
        }
        eprintln!("{line}");
    }
}

// ── CLI definition ───────────────────────────────────────────────────────

const AFTER_HELP: &str = "\
EXAMPLES:
    # Turn a paper into a lecture narrated by the default professor agent
    pdf2lecture paper.pdf

    # Pick an agent, restrict to pages 3-15, write artefacts to ./out
    pdf2lecture paper.pdf --agent explainer --pages 3-15 -o out

    # Use the text-extraction path instead of per-page vision analysis
    pdf2lecture scanned-notes.pdf --mode legacy

    # Sequential scripting with cross-segment transitions
    pdf2lecture course.pdf --continuity

    # Show document metadata without running the pipeline
    pdf2lecture paper.pdf --inspect

    # Run the HTTP service (upload, poll, playback endpoints)
    pdf2lecture --serve --addr 0.0.0.0:8080 --data-dir ./data

ENVIRONMENT VARIABLES:
    OPENAI_API_KEY             OpenAI API key (or ANTHROPIC_API_KEY etc.)
    EDGEQUAKE_LLM_PROVIDER     Force an LLM provider (openai, anthropic, ollama)
    EDGEQUAKE_MODEL            Default model identifier
    PDF2LECTURE_ADDR           Listen address for --serve (default 0.0.0.0:8080)
    PDF2LECTURE_DATA_DIR       On-disk store directory for --serve
    PDFIUM_DYNAMIC_LIB_PATH    Directory containing the pdfium library
    RUST_LOG                   Log filter (e.g. pdf2lecture=debug)
    NO_COLOR                   Disable coloured output
";

#[derive(Parser, Debug)]
#[command(
    name = "pdf2lecture",
    version,
    about = "Turn PDF documents into narrated audio lectures",
    long_about = "Turn PDF documents into narrated audio lectures with \
                  synchronised word timings.\n\nPages are rendered with \
                  pdfium, analysed by a vision LLM into ordered topic \
                  segments, scripted in the voice of a lecture agent, and \
                  synthesised to speech.",
    arg_required_else_help = true,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Input PDF: a file path or an http(s) URL.
    input: Option<String>,

    /// Directory for the output artefacts (audio, script, timings, segments).
    #[arg(short, long, default_value = "lecture", value_name = "DIR")]
    out_dir: PathBuf,

    /// Lecture agent to narrate with.
    #[arg(long, default_value = "professor")]
    agent: String,

    /// Analysis path: 'vision' (per-page VLM) or 'legacy' (text extraction).
    #[arg(long, default_value = "vision")]
    mode: String,

    /// Script segments sequentially, passing each block to the next call.
    #[arg(long)]
    continuity: bool,

    /// Pages to lecture on: 'all', a page ('7'), a range ('3-15') or a
    /// set ('1,3,5').
    #[arg(long, default_value = "all")]
    pages: String,

    /// Rendering DPI (72-400).
    #[arg(long, default_value_t = 150)]
    dpi: u32,

    /// Concurrent LLM/TTS calls.
    #[arg(long, default_value_t = 10)]
    concurrency: usize,

    /// LLM model identifier (defaults to the provider's default).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider name (auto-detected from the environment if unset).
    #[arg(long, env = "EDGEQUAKE_LLM_PROVIDER")]
    provider: Option<String>,

    /// Maximum tokens per LLM call.
    #[arg(long, default_value_t = 4096)]
    max_tokens: usize,

    /// Retries per LLM/TTS call before a unit is declared failed.
    #[arg(long, default_value_t = 3)]
    max_retries: u32,

    /// Password for encrypted PDFs.
    #[arg(long)]
    password: Option<String>,

    /// Skip reading title/author from PDF metadata.
    #[arg(long)]
    no_metadata: bool,

    /// Print document metadata and exit without running the pipeline.
    #[arg(long)]
    inspect: bool,

    /// Run the HTTP service instead of a one-shot composition.
    #[arg(long)]
    serve: bool,

    /// Listen address for --serve (overrides PDF2LECTURE_ADDR).
    #[arg(long, value_name = "HOST:PORT")]
    addr: Option<String>,

    /// On-disk store directory for --serve (overrides PDF2LECTURE_DATA_DIR).
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Print the run summary as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Suppress the progress bar and per-stage lines.
    #[arg(long)]
    no_progress: bool,

    /// Only print errors.
    #[arg(short, long)]
    quiet: bool,

    /// Verbose logging (equivalent to RUST_LOG=pdf2lecture=debug).
    #[arg(short, long)]
    verbose: bool,
}

fn parse_pages(spec: &str) -> Result<PageSelection> {
    let spec = spec.trim();
    if spec.eq_ignore_ascii_case("all") {
        return Ok(PageSelection::All);
    }
    if let Some((start, end)) = spec.split_once('-') {
        let start: usize = start.trim().parse().context("invalid page range start")?;
        let end: usize = end.trim().parse().context("invalid page range end")?;
        if start == 0 || end < start {
            bail!("page range '{spec}' is not valid (pages are 1-indexed)");
        }
        return Ok(PageSelection::Range(start, end));
    }
    if spec.contains(',') {
        let pages = spec
            .split(',')
            .map(|p| p.trim().parse::<usize>())
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("invalid page set '{spec}'"))?;
        if pages.iter().any(|&p| p == 0) {
            bail!("page set '{spec}' contains page 0 (pages are 1-indexed)");
        }
        return Ok(PageSelection::Set(pages));
    }
    let page: usize = spec.parse().with_context(|| format!("invalid page '{spec}'"))?;
    if page == 0 {
        bail!("pages are 1-indexed; there is no page 0");
    }
    Ok(PageSelection::Single(page))
}

fn build_config(
    cli: &Cli,
    progress: Option<Arc<dyn LectureProgressCallback>>,
) -> Result<PipelineConfig> {
    let mode: AnalysisMode = cli.mode.parse()?;
    let mut builder = PipelineConfig::builder()
        .dpi(cli.dpi)
        .concurrency(cli.concurrency)
        .max_tokens(cli.max_tokens)
        .max_retries(cli.max_retries)
        .mode(mode)
        .continuity(cli.continuity)
        .pages(parse_pages(&cli.pages)?)
        .extract_metadata(!cli.no_metadata);

    if let Some(model) = &cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(provider) = &cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(password) = &cli.password {
        builder = builder.password(password.clone());
    }
    if let Some(progress) = progress {
        builder = builder.progress_callback(progress);
    }
    Ok(builder.build()?)
}

fn init_logging(cli: &Cli) {
    let default = if cli.verbose {
        "pdf2lecture=debug"
    } else if cli.quiet {
        "error"
    } else {
        "pdf2lecture=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(io::stderr)
        .init();
}

async fn run_serve(cli: &Cli) -> Result<()> {
    let mut server_config = ServerConfig::from_env()?;
    if let Some(addr) = &cli.addr {
        server_config.addr = addr
            .parse()
            .with_context(|| format!("invalid listen address '{addr}'"))?;
    }
    if let Some(dir) = &cli.data_dir {
        server_config.data_dir = Some(dir.clone());
    }
    let pipeline = build_config(cli, None)?;
    server::serve(server_config, pipeline).await?;
    Ok(())
}

async fn run_inspect(input: &str, cli: &Cli) -> Result<()> {
    let config = build_config(cli, None)?;
    let meta = pdf2lecture::inspect(input, &config).await?;

    println!("{}", bold(input));
    println!("  pages:    {}", meta.page_count);
    if let Some(title) = &meta.title {
        println!("  title:    {title}");
    }
    if let Some(author) = &meta.author {
        println!("  author:   {author}");
    }
    if let Some(subject) = &meta.subject {
        println!("  subject:  {subject}");
    }
    if let Some(creator) = &meta.creator {
        println!("  creator:  {creator}");
    }
    Ok(())
}

async fn run_compose(input: &str, cli: &Cli) -> Result<()> {
    let show_progress =
        !cli.quiet && !cli.no_progress && !cli.json && io::stderr().is_terminal();
    let progress = show_progress.then(|| Arc::new(CliProgress::new()));
    let config = build_config(
        cli,
        progress.clone().map(|p| p as Arc<dyn LectureProgressCallback>),
    )?;

    if !cli.quiet && !cli.json {
        eprintln!(
            "{} {} {}",
            cyan("▶"),
            bold(input),
            dim(&format!("(agent: {}, mode: {})", cli.agent, cli.mode))
        );
    }

    let started = Instant::now();
    let (output, written) =
        pdf2lecture::compose_to_dir(input, &cli.agent, &cli.out_dir, &config).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&output.stats)?);
        return Ok(());
    }

    if !cli.quiet {
        eprintln!();
        eprintln!(
            "{} {} {}",
            green("✔"),
            output.stats.summary(),
            dim(&format!("in {:.1}s", started.elapsed().as_secs_f64()))
        );
        if output.stats.degraded_blocks > 0 || output.stats.warning_count > 0 {
            eprintln!(
                "{} {} degraded blocks, {} warnings — see script.json",
                yellow("⚠"),
                output.stats.degraded_blocks,
                output.stats.warning_count
            );
        }
        for path in &written {
            eprintln!("  {}", dim(&path.display().to_string()));
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    if cli.serve {
        return run_serve(&cli).await;
    }

    let Some(input) = cli.input.clone() else {
        bail!("an input PDF is required unless --serve is given");
    };

    if cli.inspect {
        return run_inspect(&input, &cli).await;
    }

    run_compose(&input, &cli).await.map_err(|e| {
        eprintln!("{} {e:#}", red("✘"));
        std::process::exit(1);
    })
}
