//! CLI binary for doc2regions.
//!
//! A thin layer over the library: flags become an `ExtractConfig`, results
//! become terminal output or a JSON file.

use anyhow::{Context, Result};
use clap::Parser;
use doc2regions::{
    extract, spawn_extract, DocumentImage, ExtractConfig, ExtractOutput, ExtractProgressCallback,
    ProgressCallback, RunMode, DEFAULT_ASSET_ENDPOINT, DEFAULT_ENDPOINT, DEFAULT_MODEL,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── Terminal colour helpers ──────────────────────────────────────────────────

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

/// Terminal progress callback: renders a live progress bar and per-document
/// log lines using [indicatif]. Designed to work correctly when documents
/// complete out-of-order (concurrent mode).
struct CliProgressCallback {
    /// Bar pinned at the bottom of the terminal; log lines print above it.
    bar: ProgressBar,
    /// Per-document wall-clock start times for elapsed reporting.
    start_times: Mutex<HashMap<usize, Instant>>,
    /// Documents that fell back after exhausting their retries.
    fallbacks: AtomicUsize,
}

impl CliProgressCallback {
    /// Build the callback in its spinner phase; the bar length arrives
    /// later, via `on_run_start`.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0); // length set in on_run_start

        // Spinner-only style until the document count is known.
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Loading images…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            fallbacks: AtomicUsize::new(0),
        })
    }

    /// Swap the spinner for the counting bar once `total` is known.
    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} docs  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Extracting");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, index: usize) -> f64 {
        self.start_times
            .lock()
            .unwrap()
            .remove(&index)
            .map(|t| t.elapsed().as_millis() as f64 / 1000.0)
            .unwrap_or(0.0)
    }
}

impl ExtractProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_documents: usize) {
        self.activate_bar(total_documents);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!(
                "Starting extraction of {total_documents} documents…"
            ))
        ));
    }

    fn on_document_start(&self, index: usize, _total: usize, doc_id: &str) {
        self.start_times
            .lock()
            .unwrap()
            .insert(index, Instant::now());
        self.bar.set_message(doc_id.to_string());
    }

    fn on_document_complete(&self, index: usize, total: usize, doc_id: &str, regions: usize) {
        let elapsed = self.elapsed_secs(index);
        self.bar.println(format!(
            "  {} Doc {:>3}/{:<3}  {:<32}  {:<12}  {}",
            green("✓"),
            index,
            total,
            doc_id,
            dim(&format!("{regions:>3} regions")),
            dim(&format!("{elapsed:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_document_fallback(&self, index: usize, total: usize, doc_id: &str, error: String) {
        let elapsed = self.elapsed_secs(index);
        self.fallbacks.fetch_add(1, Ordering::SeqCst);

        // Keep long failure messages to a single line.
        let msg = if error.chars().count() > 80 {
            let cut: String = error.chars().take(79).collect();
            format!("{cut}\u{2026}")
        } else {
            error
        };

        self.bar.println(format!(
            "  {} Doc {:>3}/{:<3}  {:<32}  {}  {}",
            red("✗"),
            index,
            total,
            doc_id,
            red(&msg),
            dim(&format!("{elapsed:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, total_documents: usize, extracted_count: usize) {
        let fell_back = total_documents.saturating_sub(extracted_count);
        self.bar.finish_and_clear();

        if fell_back == 0 {
            eprintln!(
                "{} {} documents extracted successfully",
                green("✔"),
                bold(&extracted_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} documents extracted  ({} fell back)",
                if fell_back == total_documents {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&extracted_count.to_string()),
                total_documents,
                red(&fell_back.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract one page image (human-readable region listing to stdout)
  doc2regions page-001.png

  # Whole document, shell glob, results to a JSON file
  doc2regions scans/page-*.png -o regions.json

  # Structured JSON on stdout
  doc2regions --json page-001.png > regions.json

  # Long batch in the background with a status line
  doc2regions --background scans/*.png -o regions.json

  # More parallel calls, deeper retry budget
  doc2regions -c 8 --max-retries 5 scans/*.png -o regions.json

REGION LABELS:
  Title          Section-header   Text            List-item
  Table          Picture          Caption         Footnote
  Formula        Page-header      Page-footer

  Unrecognised labels are passed through verbatim. Bounding boxes are
  normalized to [0,1] relative to the page (x, y, width, height).

ENVIRONMENT VARIABLES:
  NVIDIA_API_KEY              API credential (nvapi-...)
  DOC2REGIONS_ENDPOINT        Override the chat-completions endpoint
  DOC2REGIONS_ASSET_ENDPOINT  Override the asset-upload endpoint
  DOC2REGIONS_MODEL           Override the model ID
  DOC2REGIONS_CONCURRENCY     Concurrent service calls (default 4)

SETUP:
  1. Get a key:   https://build.nvidia.com (nvapi-...)
  2. Export it:   export NVIDIA_API_KEY=nvapi-...
  3. Extract:     doc2regions page-001.png -o regions.json

  Images larger than the inline payload limit are uploaded to the asset
  service automatically; no flag is needed.
"#;

/// Extract labelled text regions from document images.
#[derive(Parser, Debug)]
#[command(
    name = "doc2regions",
    version,
    about = "Extract labelled text regions from document images",
    long_about = "Send document page images (PNG, JPEG, BMP, TIFF, WebP) to a remote \
vision-language parsing service and receive every text region with a layout label, a \
normalized bounding box, and the transcribed text. One aligned result per input image, \
always, even when individual documents fail.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Document image files, one per page.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Write the structured JSON output to this file instead of stdout.
    #[arg(short, long, env = "DOC2REGIONS_OUTPUT")]
    output: Option<PathBuf>,

    /// API credential (nvapi-...). Falls back to the NVIDIA_API_KEY env var.
    #[arg(long, env = "NVIDIA_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Chat-completions endpoint URL.
    #[arg(long, env = "DOC2REGIONS_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Asset-upload endpoint URL for oversize images.
    #[arg(long, env = "DOC2REGIONS_ASSET_ENDPOINT", default_value = DEFAULT_ASSET_ENDPOINT)]
    asset_endpoint: String,

    /// Model ID to request.
    #[arg(long, env = "DOC2REGIONS_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// Number of concurrent service calls.
    #[arg(short, long, env = "DOC2REGIONS_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Retries per document on a retryable service failure.
    #[arg(long, env = "DOC2REGIONS_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Base backoff between retries in milliseconds (doubles per attempt).
    #[arg(long, env = "DOC2REGIONS_RETRY_BACKOFF_MS", default_value_t = 500)]
    retry_backoff_ms: u64,

    /// Per-call service timeout in seconds.
    #[arg(long, env = "DOC2REGIONS_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Asset-upload timeout in seconds.
    #[arg(long, env = "DOC2REGIONS_UPLOAD_TIMEOUT", default_value_t = 300)]
    upload_timeout: u64,

    /// Run in the background and poll for status instead of awaiting inline.
    #[arg(long, env = "DOC2REGIONS_BACKGROUND")]
    background: bool,

    /// Output structured JSON (ExtractOutput) on stdout.
    #[arg(long, env = "DOC2REGIONS_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "DOC2REGIONS_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOC2REGIONS_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DOC2REGIONS_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Library INFO logs interleave badly with bar redraws, so while the
    // bar is active only errors pass through.
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

    // ── Load inputs ──────────────────────────────────────────────────────
    let mut docs = Vec::with_capacity(cli.inputs.len());
    for input in &cli.inputs {
        let doc = DocumentImage::from_path(input)
            .with_context(|| format!("Failed to load {}", input.display()))?;
        docs.push(doc);
    }

    // ── Build config ─────────────────────────────────────────────────────
    let api_key = cli
        .api_key
        .clone()
        .filter(|k| !k.trim().is_empty())
        .context("No API credential. Set NVIDIA_API_KEY or pass --api-key")?;

    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn ExtractProgressCallback>)
    } else {
        None
    };

    let run_mode = if cli.background {
        RunMode::Background
    } else {
        RunMode::Synchronous
    };

    let mut builder = ExtractConfig::builder()
        .credential(api_key)
        .endpoint(&cli.endpoint)
        .asset_endpoint(&cli.asset_endpoint)
        .model(&cli.model)
        .concurrency(cli.concurrency)
        .max_retries(cli.max_retries)
        .retry_backoff_ms(cli.retry_backoff_ms)
        .api_timeout_secs(cli.api_timeout)
        .upload_timeout_secs(cli.upload_timeout)
        .run_mode(run_mode);

    if let Some(cb) = progress_cb {
        builder = builder.progress_callback(cb);
    }

    let config = builder.build().context("Invalid configuration")?;

    // ── Run extraction ───────────────────────────────────────────────────
    let output = match config.run_mode {
        RunMode::Synchronous => extract(&docs, &config).await.context("Extraction failed")?,
        RunMode::Background => {
            let handle =
                spawn_extract(docs, config.clone()).context("Failed to start background run")?;

            // Without the bar there is no other feedback, so poll the handle
            // and print a status line until the run finishes.
            if !show_progress && !cli.quiet {
                while !handle.is_finished() {
                    let p = handle.progress();
                    eprintln!(
                        "  {} {}/{} documents  ({} fallback)",
                        dim("…"),
                        p.completed_documents,
                        p.total_documents,
                        p.fallback_documents,
                    );
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
            }

            handle.join().await.context("Extraction failed")?
        }
    };

    // ── Emit results ─────────────────────────────────────────────────────
    if let Some(ref output_path) = cli.output {
        write_output_file(&output, output_path)
            .await
            .with_context(|| format!("Failed to write {}", output_path.display()))?;

        // Summary line (callback already printed the per-document log).
        if !cli.quiet {
            eprintln!(
                "{}  {}/{} documents  {}ms  →  {}",
                if output.stats.fallback_documents == 0 {
                    green("✔")
                } else {
                    cyan("⚠")
                },
                output.stats.extracted_documents,
                output.stats.total_documents,
                output.stats.total_duration_ms,
                bold(&output_path.display().to_string()),
            );
            eprintln!(
                "   {} prompt tokens  /  {} completion tokens",
                dim(&output.stats.total_prompt_tokens.to_string()),
                dim(&output.stats.total_completion_tokens.to_string()),
            );
        }
    } else if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    } else {
        print_samples(&output).context("Failed to write to stdout")?;

        if !cli.quiet && !show_progress {
            // The bar callback already printed per-document lines.
            eprintln!(
                "Extracted {}/{} documents in {}ms",
                output.stats.extracted_documents,
                output.stats.total_documents,
                output.stats.total_duration_ms
            );
            if output.stats.fallback_documents > 0 {
                eprintln!("  {} documents fell back", output.stats.fallback_documents);
            }
        } else if !cli.quiet {
            eprintln!(
                "   {} prompt tokens  /  {} completion tokens  —  {}ms total",
                dim(&output.stats.total_prompt_tokens.to_string()),
                dim(&output.stats.total_completion_tokens.to_string()),
                output.stats.total_duration_ms,
            );
        }
    }

    Ok(())
}

/// Human-readable region listing, one block per document.
fn print_samples(output: &ExtractOutput) -> io::Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();

    for sample in &output.samples {
        if let Some(ref failure) = sample.failure {
            writeln!(handle, "{}  [fallback: {}]", sample.doc_id, failure)?;
            continue;
        }
        writeln!(
            handle,
            "{}  ({} regions, {} tokens)",
            sample.doc_id,
            sample.detections.len(),
            sample.usage.total_tokens
        )?;
        for det in &sample.detections {
            let b = &det.bounding_box;
            let text = det.text.replace('\n', " ");
            let text = if text.chars().count() > 60 {
                let cut: String = text.chars().take(59).collect();
                format!("{cut}\u{2026}")
            } else {
                text
            };
            writeln!(
                handle,
                "  {:<16} ({:.3}, {:.3}, {:.3}, {:.3})  {}",
                det.label.as_str(),
                b.x,
                b.y,
                b.width,
                b.height,
                text
            )?;
        }
    }
    Ok(())
}

/// Serialize the output and write it atomically (temp file + rename).
async fn write_output_file(output: &ExtractOutput, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(output).context("Failed to serialise output")?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json.as_bytes()).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
