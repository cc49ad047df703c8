//! CLI binary for deckscan.
//!
//! Opens a deck, runs the strategic pass, prints coverage and per-category
//! findings, then answers each `--ask` question from the session cache.

use anyhow::{Context, Result};
use clap::Parser;
use deckscan::{
    AnalysisConfig, AnalysisOutcome, Answer, DeckAnalyzer, DocumentHandle,
    ExtractionProgressCallback, ExtractionStatus, PageError, ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

const SESSION_ID: &str = "cli";

const SPINNER_TICKS: [&str; 11] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── Progress bar ─────────────────────────────────────────────────────────────

/// Live bar over the (at most seven) pages of one extraction pass.
struct CliProgress {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgress {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&SPINNER_TICKS),
        );
        bar.set_prefix("Selecting");
        bar.set_message("scanning slide text…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn elapsed_secs(&self, page: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&page))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ExtractionProgressCallback for CliProgress {
    fn on_extraction_start(&self, total_pages: usize) {
        self.bar.set_length(total_pages as u64);
        self.bar.set_position(0);
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:30.green/238}] {pos}/{len} slides  ⏱ {elapsed_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(&SPINNER_TICKS),
        );
        self.bar.set_prefix("Extracting");
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(page_num, Instant::now());
        }
        self.bar.set_message(format!("slide {page_num}"));
    }

    fn on_page_complete(&self, page_num: usize, _total: usize, content_len: usize) {
        let secs = self.elapsed_secs(page_num);
        self.bar.println(format!(
            "  {} Slide {:>3}  {}  {}",
            green("✓"),
            page_num,
            dim(&format!("{content_len:>5} chars")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_skipped(&self, page_num: usize, _total: usize, error: &PageError) {
        let secs = self.elapsed_secs(page_num);
        let msg: String = error.to_string().chars().take(80).collect();
        self.bar.println(format!(
            "  {} Slide {:>3}  {}  {}",
            red("✗"),
            page_num,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_extraction_complete(&self, _total_pages: usize, _success_count: usize) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Strategic pass over a deck
  deckscan deck.pdf

  # Follow-up questions (answered from cache, extended on a miss)
  deckscan deck.pdf --ask "What is the burn rate?" --ask "Who are the competitors?"

  # Tighter limits, two connection slots
  deckscan deck.pdf --max-pages 5 --page-timeout 8 --concurrency 2

  # Structured output
  deckscan deck.pdf --json > analysis.json

HARD LIMITS:
  At most 7 slides per pass, at most 2 concurrent model calls, and at most
  3 extra slides per unanswered question. Larger values are clamped.

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium if it is not next to the binary
  RUST_LOG                Log filter; overrides --verbose / --quiet
"#;

/// Extract the charts and tables that matter from a pitch deck.
#[derive(Parser, Debug)]
#[command(
    name = "deckscan",
    version,
    about = "Strategic visual extraction for pitch decks using Vision LLMs",
    long_about = "Pick the few slides of a pitch deck that carry financials, traction, market, \
competition and team data, read them with a Vision Language Model under strict time and \
connection limits, and answer follow-up questions from the cached results.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF deck.
    input: PathBuf,

    /// Follow-up question; repeat for several.
    #[arg(long = "ask", value_name = "QUESTION")]
    questions: Vec<String>,

    /// Slides sent to the model in the initial pass (0–7).
    #[arg(long, env = "DECKSCAN_MAX_PAGES", default_value_t = 7)]
    max_pages: usize,

    /// Per-slide deadline in seconds (render + inference).
    #[arg(long, env = "DECKSCAN_PAGE_TIMEOUT", default_value_t = 5,
          value_parser = clap::value_parser!(u64).range(1..=120))]
    page_timeout: u64,

    /// Concurrent model calls (1 or 2).
    #[arg(short, long, env = "DECKSCAN_CONCURRENCY", default_value_t = 1,
          value_parser = clap::value_parser!(u64).range(1..=2))]
    concurrency: u64,

    /// Extra slides extracted per unanswered question (1–3).
    #[arg(long, env = "DECKSCAN_PAGES_PER_MISS", default_value_t = 3)]
    pages_per_miss: usize,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "DECKSCAN_PROVIDER")]
    provider: Option<String>,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1-mini).
    #[arg(long, env = "DECKSCAN_MODEL")]
    model: Option<String>,

    /// PDF user password for encrypted decks.
    #[arg(long, env = "DECKSCAN_PASSWORD")]
    password: Option<String>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "DECKSCAN_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Max LLM output tokens per slide.
    #[arg(long, env = "DECKSCAN_MAX_TOKENS", default_value_t = 1024)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "DECKSCAN_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Output the analysis and answers as JSON.
    #[arg(long, env = "DECKSCAN_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "DECKSCAN_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DECKSCAN_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DECKSCAN_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The bar replaces INFO logs unless --verbose asks for them.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
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

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgress::new() as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress).await?;

    let deck = DocumentHandle::open(&cli.input, &config)
        .await
        .with_context(|| format!("Failed to open {}", cli.input.display()))?;
    let analyzer = DeckAnalyzer::new(config).context("Failed to set up the vision provider")?;

    let outcome = analyzer.analyze(SESSION_ID, &deck).await;

    let mut answers = Vec::with_capacity(cli.questions.len());
    for question in &cli.questions {
        answers.push((question.clone(), analyzer.ask(SESSION_ID, &deck, question).await));
    }

    if cli.json {
        let answers: Vec<_> = answers
            .iter()
            .map(|(q, a)| serde_json::json!({ "question": q, "answer": a }))
            .collect();
        let doc = serde_json::json!({
            "deck": deck.reference(),
            "page_count": deck.page_count(),
            "coverage": outcome.report.coverage(),
            "text_only": outcome.report.needs_text_fallback(),
            "analysis": outcome,
            "answers": answers,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&doc).context("Failed to serialise output")?
        );
    } else {
        print_outcome(&deck, &outcome, cli.quiet);
        for (question, answer) in &answers {
            print_answer(question, answer);
        }
    }

    Ok(())
}

/// Map CLI args to `AnalysisConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<AnalysisConfig> {
    let mut builder = AnalysisConfig::builder()
        .max_pages(cli.max_pages)
        .per_page_timeout_secs(cli.page_timeout)
        .concurrency(cli.concurrency as usize)
        .max_pages_per_miss(cli.pages_per_miss)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature);

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
    if let Some(ref password) = cli.password {
        builder = builder.password(password);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn print_outcome(deck: &DocumentHandle, outcome: &AnalysisOutcome, quiet: bool) {
    let report = &outcome.report;
    let mark = match report.status {
        ExtractionStatus::Complete => green("✔"),
        ExtractionStatus::Partial | ExtractionStatus::Cancelled => yellow("⚠"),
        ExtractionStatus::TotalFailure | ExtractionStatus::NoPages => red("✘"),
    };
    eprintln!(
        "{} {}  {}",
        mark,
        bold(&report.coverage()),
        dim(&format!(
            "({} slides in deck, {}ms)",
            deck.page_count(),
            report.duration_ms
        ))
    );
    if quiet {
        return;
    }
    eprintln!(
        "   {} tokens in  /  {} tokens out",
        dim(&report.total_input_tokens.to_string()),
        dim(&report.total_output_tokens.to_string()),
    );

    for (category, pages) in &outcome.selection.by_category {
        println!();
        println!("{}", bold(&cyan(&format!("## {category}"))));
        for page in pages {
            match report.results.get(page) {
                Some(r) => println!(
                    "{} {}\n{}",
                    bold(&format!("Slide {page}")),
                    dim(&format!("(confidence {:.2})", r.confidence)),
                    r.content
                ),
                None => println!("{}", dim(&format!("Slide {page}: not extracted"))),
            }
        }
    }
}

fn print_answer(question: &str, answer: &Answer) {
    println!();
    println!("{} {}", cyan("?"), bold(question));
    if !answer.extended_pages.is_empty() {
        println!(
            "{}",
            dim(&format!("  extracted slides {:?} on demand", answer.extended_pages))
        );
    }
    match answer.matched.content {
        Some(ref content) if answer.matched.cache_hit => {
            println!(
                "{}",
                dim(&format!(
                    "  slides {:?}, confidence {:.2}",
                    answer.matched.relevant_pages, answer.matched.confidence
                ))
            );
            println!("{content}");
        }
        _ => println!(
            "{}",
            yellow(&format!(
                "  no cached answer ({:?}); text-only analysis recommended",
                answer.matched.reason
            ))
        ),
    }
}
