//! CLI binary for histocase.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ExtractionConfig`, drives the batch pipeline, and prints results.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use histocase::{
    import, inspect, run_batch, to_json, BatchProgress, CaseStore, ExtractionConfig,
    PageSelection, Provenance,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar tick per chunk. Chunks are processed
/// sequentially, so the bar only ever moves forward.
struct CliBatchProgress {
    bar: ProgressBar,
}

impl CliBatchProgress {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0); // length set in on_batch_start

        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Encoding pages…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self { bar })
    }
}

impl BatchProgress for CliBatchProgress {
    fn on_batch_start(&self, total_chunks: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} chunks  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.set_length(total_chunks as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Extracting");
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Starting extraction over {total_chunks} chunks…"))
        ));
    }

    fn on_chunk_start(&self, completed: usize, total_chunks: usize) {
        self.bar
            .set_message(format!("chunk {}/{}", completed + 1, total_chunks));
    }

    fn on_chunk_complete(&self, completed: usize, total_chunks: usize, drafts: usize) {
        self.bar.println(format!(
            "  {} Chunk {:>2}/{:<2}  {}",
            green("✓"),
            completed,
            total_chunks,
            dim(&format!("{drafts} drafts")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_error(&self, message: &str) {
        self.bar.println(format!("  {} {}", red("✗"), red(message)));
    }

    fn on_batch_complete(&self, total_chunks: usize, drafts_total: usize) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {} drafts extracted from {} chunks",
            green("✔"),
            bold(&drafts_total.to_string()),
            total_chunks,
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract every page of a scanned chapter into draft records
  histocase extract chapter7.pdf

  # Specific pages, a specific model
  histocase extract --pages 12-18 --model gpt-4.1 --provider openai chapter7.pdf

  # Extract from a URL, tagging the operator
  histocase extract --owner annotator-02 https://example.org/atlas.pdf

  # Inspect document metadata (no API key needed)
  histocase inspect chapter7.pdf

  # Review lifecycle
  histocase history
  histocase confirm 0b8e7e0a-63f8-4b3e-9d1c-2f6a01e5c9aa
  histocase export Case-7-3 > case_7_3.json
  histocase delete 0b8e7e0a-63f8-4b3e-9d1c-2f6a01e5c9aa

SUPPORTED PROVIDERS:
  openai (default when OPENAI_API_KEY is set), anthropic, gemini, azure,
  ollama, or any OpenAI-compatible endpoint.

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY           OpenAI API key
  ANTHROPIC_API_KEY        Anthropic API key
  GEMINI_API_KEY           Google Gemini API key
  HISTOCASE_LLM_PROVIDER   Override provider (openai, anthropic, gemini, …)
  HISTOCASE_MODEL          Override model ID
  HISTOCASE_DB             Override the case-store path
"#;

/// Extract structured pathology case records from scanned textbook pages.
#[derive(Parser, Debug)]
#[command(
    name = "histocase",
    version,
    about = "Extract structured pathology case records from scanned pages using Vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Path to the SQLite case store.
    #[arg(long, env = "HISTOCASE_DB", global = true)]
    db: Option<PathBuf>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "HISTOCASE_VERBOSE", global = true)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "HISTOCASE_QUIET", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import a document and run batch extraction into draft records.
    Extract {
        /// Local PDF/image path or HTTP/HTTPS URL.
        input: String,

        /// Page selection: all, 5, 3-15, or 1,3,5,7.
        #[arg(long, env = "HISTOCASE_PAGES", default_value = "all")]
        pages: String,

        /// Pages per extraction call. Sequential chunks bound service load.
        #[arg(long, env = "HISTOCASE_CHUNK_SIZE", default_value_t = 2)]
        chunk_size: usize,

        /// Vision model ID (e.g. gpt-4.1-nano, claude-sonnet-4-20250514).
        #[arg(long, env = "HISTOCASE_MODEL")]
        model: Option<String>,

        /// Provider: openai, anthropic, gemini, azure, ollama.
        #[arg(long, env = "HISTOCASE_PROVIDER")]
        provider: Option<String>,

        /// Rendering DPI (72–400).
        #[arg(long, env = "HISTOCASE_DPI", default_value_t = 150,
              value_parser = clap::value_parser!(u32).range(72..=400))]
        dpi: u32,

        /// Operator id stamped onto extracted drafts.
        #[arg(long, env = "HISTOCASE_OWNER", default_value = "local")]
        owner: String,

        /// Max model output tokens per chunk.
        #[arg(long, env = "HISTOCASE_MAX_TOKENS", default_value_t = 8192)]
        max_tokens: usize,

        /// Model temperature (0.0–2.0).
        #[arg(long, env = "HISTOCASE_TEMPERATURE", default_value_t = 0.1)]
        temperature: f32,

        /// Path to a text file containing a custom instruction prompt.
        #[arg(long, env = "HISTOCASE_SYSTEM_PROMPT")]
        system_prompt: Option<PathBuf>,

        /// HTTP download timeout in seconds.
        #[arg(long, env = "HISTOCASE_DOWNLOAD_TIMEOUT", default_value_t = 120)]
        download_timeout: u64,

        /// Disable the progress bar.
        #[arg(long, env = "HISTOCASE_NO_PROGRESS")]
        no_progress: bool,

        /// Output batch stats as JSON instead of human-readable text.
        #[arg(long)]
        json: bool,
    },

    /// Print document metadata without extracting (no API key needed).
    Inspect {
        /// Local PDF/image path or HTTP/HTTPS URL.
        input: String,

        /// Output metadata as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List drafts and confirmed cases, newest first.
    History {
        /// Output full records as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print the training-data JSON for a confirmed case (or a draft).
    Export {
        /// Case id (`Case-7-3`), or a draft id with --draft.
        id: String,

        /// Treat the id as a draft id instead of a case id.
        #[arg(long)]
        draft: bool,
    },

    /// Confirm a draft into durable storage, keyed by its case id.
    Confirm {
        /// Draft id (UUID) as shown by `history`.
        draft_id: Uuid,
    },

    /// Delete a draft (or, with --case, a confirmed case).
    Delete {
        /// Draft id (UUID), or a case id with --case.
        id: String,

        /// Treat the id as a confirmed case id.
        #[arg(long)]
        case: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active; the
    // bar provides all the feedback that matters to the user.
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        match cli.command {
            Command::Extract { no_progress, .. } if !no_progress => "error",
            _ => "info",
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let store = open_store(cli.db.clone())?;

    match cli.command {
        Command::Extract {
            ref input,
            ref pages,
            chunk_size,
            ref model,
            ref provider,
            dpi,
            ref owner,
            max_tokens,
            temperature,
            ref system_prompt,
            download_timeout,
            no_progress,
            json,
        } => {
            let show_progress = !cli.quiet && !no_progress && !json;

            let prompt_text = match system_prompt {
                Some(path) => Some(
                    tokio::fs::read_to_string(path)
                        .await
                        .with_context(|| format!("Failed to read prompt from {:?}", path))?,
                ),
                None => None,
            };

            let mut builder = ExtractionConfig::builder()
                .chunk_size(chunk_size)
                .dpi(dpi)
                .pages(parse_pages(pages)?)
                .owner(owner.clone())
                .max_tokens(max_tokens)
                .temperature(temperature)
                .download_timeout_secs(download_timeout);

            if let Some(m) = model.clone() {
                builder = builder.model(m);
            }
            if let Some(p) = provider.clone() {
                builder = builder.provider_name(p);
            }
            if let Some(prompt) = prompt_text {
                builder = builder.system_prompt(prompt);
            }
            if show_progress {
                builder = builder.progress(CliBatchProgress::new());
            }

            let config = builder.build().context("Invalid configuration")?;

            let mut queue = import(input, &config).await.context("Import failed")?;
            if !cli.quiet && !json {
                eprintln!(
                    "{} Imported {} pages from {}",
                    cyan("◆"),
                    queue.len(),
                    bold(input)
                );
            }

            let outcome = run_batch(&mut queue, &store, &config)
                .await
                .context("Batch extraction failed to start")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&outcome.stats)?);
            } else {
                for draft in &outcome.drafts {
                    println!(
                        "{}  {}  {}",
                        draft.draft_id,
                        bold(&draft.record.case_id),
                        dim(&format!(
                            "{} sections, {} figures",
                            draft.record.sections.len(),
                            draft.record.images.len()
                        )),
                    );
                }
            }

            if let Some(failure) = outcome.failure {
                eprintln!(
                    "{} Chunk {} failed: {}",
                    red("✘"),
                    failure.chunk,
                    failure.message
                );
                std::process::exit(1);
            }
        }

        Command::Inspect { ref input, json } => {
            let meta = inspect(input).await.context("Failed to inspect document")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&meta)?);
            } else {
                println!("File:         {}", input);
                if let Some(ref t) = meta.title {
                    println!("Title:        {}", t);
                }
                if let Some(ref a) = meta.author {
                    println!("Author:       {}", a);
                }
                println!("Pages:        {}", meta.page_count);
                if !meta.pdf_version.is_empty() {
                    println!("PDF Version:  {}", meta.pdf_version);
                }
            }
        }

        Command::History { json } => {
            let history = store.history().context("Failed to read history")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&history)?);
            } else if history.is_empty() {
                println!("No records yet. Run `histocase extract <document>` first.");
            } else {
                for entry in history {
                    let status = match entry.provenance {
                        Provenance::Confirmed => green("confirmed"),
                        Provenance::Draft => cyan("draft    "),
                    };
                    let when = entry
                        .timestamp
                        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_else(|| "unknown".into());
                    let id = entry
                        .draft_id
                        .map(|d| d.to_string())
                        .unwrap_or_else(|| entry.record.case_id.clone());
                    println!(
                        "{}  {}  {}  {}",
                        status,
                        dim(&when),
                        bold(&entry.record.case_id),
                        dim(&id),
                    );
                }
            }
        }

        Command::Export { ref id, draft } => {
            let record = if draft {
                let draft_id: Uuid = id.parse().context("Draft id must be a UUID")?;
                store
                    .get_draft(draft_id)
                    .context("Failed to read draft")?
                    .with_context(|| format!("Draft '{}' not found", id))?
                    .record
            } else {
                store
                    .get_case(id)
                    .context("Failed to read case")?
                    .with_context(|| format!("Case '{}' not found", id))?
                    .record
            };

            let json = to_json(&record).context("Failed to build training record")?;
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle.write_all(json.as_bytes())?;
            handle.write_all(b"\n").ok();
        }

        Command::Confirm { draft_id } => {
            if let Some(draft) = store.get_draft(draft_id).context("Failed to read draft")? {
                let missing = draft.record.missing_required();
                if !missing.is_empty() && !cli.quiet {
                    eprintln!(
                        "{} Required sections still empty: {}",
                        cyan("⚠"),
                        missing
                            .iter()
                            .map(|l| l.as_str())
                            .collect::<Vec<_>>()
                            .join(", ")
                    );
                }
            }
            let confirmed = store.confirm(draft_id).context("Confirmation failed")?;
            println!(
                "{} Confirmed as {}",
                green("✔"),
                bold(&confirmed.record.case_id)
            );
        }

        Command::Delete { ref id, case } => {
            if case {
                store.delete_case(id).context("Delete failed")?;
                println!("{} Deleted case {}", green("✔"), bold(id));
            } else {
                let draft_id: Uuid = id.parse().context("Draft id must be a UUID")?;
                store.delete_draft(draft_id).context("Delete failed")?;
                println!("{} Deleted draft {}", green("✔"), bold(id));
            }
        }
    }

    Ok(())
}

/// Open the store at --db, $HISTOCASE_DB, or the platform data directory.
fn open_store(db: Option<PathBuf>) -> Result<CaseStore> {
    let path = match db {
        Some(path) => path,
        None => {
            let dir = dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("histocase");
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
            dir.join("cases.db")
        }
    };
    CaseStore::open(&path).with_context(|| format!("Failed to open store at {}", path.display()))
}

/// Parse a `--pages` string into `PageSelection`.
fn parse_pages(s: &str) -> Result<PageSelection> {
    let s = s.trim().to_lowercase();

    if s == "all" {
        return Ok(PageSelection::All);
    }

    // Range: "3-15"
    if let Some((start, end)) = s.split_once('-') {
        let start: usize = start.trim().parse().context("Invalid start page in range")?;
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

        for &p in &pages {
            if p < 1 {
                anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", p);
            }
        }

        return Ok(PageSelection::Set(pages));
    }

    // Single page: "5"
    let page: usize = s.parse().context("Invalid page number")?;
    if page < 1 {
        anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", page);
    }

    Ok(PageSelection::Single(page))
}
