//! CLI binary for ocr-embed.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, runs one upload (plus optional model switches) and
//! prints the extracted text and embedding.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use ocr_embed::{
    ConfigError, ModelCatalog, PersistOutcome, PipelineConfig, PipelineObserver, PipelineSnapshot,
    PipelineStatus, RunKind, RunOutcome, SharedObserver, UploadedImage,
};
use std::io;
use std::path::PathBuf;
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

// ── CLI observer using indicatif ─────────────────────────────────────────────

/// Terminal observer: a spinner whose message follows the pipeline status,
/// plus a warning line when a record could not be saved.
struct CliObserver {
    bar: ProgressBar,
}

impl CliObserver {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Idle");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl PipelineObserver for CliObserver {
    fn on_run_started(&self, _token: u64, kind: RunKind) {
        self.bar.set_prefix(match kind {
            RunKind::Upload => "Processing",
            RunKind::ModelChange => "Re-embedding",
        });
    }

    fn on_status_change(&self, _token: u64, status: PipelineStatus) {
        self.bar.set_message(status.to_string());
    }

    fn on_run_failed(&self, _token: u64, detail: &str) {
        self.bar.println(format!("  {} {}", red("✗"), dim(detail)));
    }

    fn on_persist_failed(&self, error: &str) {
        self.bar
            .println(format!("  {} record not saved: {}", cyan("⚠"), dim(error)));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract text and embed it with the default model
  ocr-embed --ocr-endpoint https://ocr.example.com/analyzeImage receipt.png

  # Pick a model, then re-embed the same text with two others (one OCR call)
  ocr-embed --model sentence-transformers/all-mpnet-base-v2 \
            --rerun-with BAAI/bge-small-en-v1.5 \
            --rerun-with sentence-transformers/all-MiniLM-L6-v2 receipt.png

  # Structured output
  ocr-embed --json receipt.png > result.json

  # Show the model catalog
  ocr-embed --list-models

ENVIRONMENT VARIABLES:
  OCR_ENDPOINT            OCR gateway URL (POST {"image": base64} → {"text": ...});
                          without it, local Tesseract is used (tesseract feature)
  OCR_LANGUAGE            Tesseract language(s) for local OCR (default: eng)
  OCR_TESSDATA_DIR        Directory with Tesseract .traineddata files
  EMBEDDING_ENDPOINT      Feature-extraction URL; {model} is replaced by the model id
  HF_API_KEY / HF_TOKEN   Bearer token for the embedding service
  EMBEDDING_MODELS        Model catalog as id=label;id=label (first is default)
  EMBEDDING_MODEL         Initially selected model id
  RECORD_ENDPOINT         POST records here instead of writing a local file
  OCR_RECORDS_PATH        JSON Lines file for records (default: ocr_results.jsonl)
  OCR_MAX_IMAGE_BYTES     Request-body ceiling in bytes (default: 10 MiB)
  RUST_LOG                Log filter, e.g. ocr_embed=debug
"#;

/// Extract text from an image and embed it with a selectable model.
#[derive(Parser, Debug)]
#[command(
    name = "ocr-embed",
    version,
    about = "Extract text from an image and embed it with a selectable model",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Image file to process.
    #[arg(required_unless_present = "list_models")]
    image: Option<PathBuf>,

    /// Embedding model id for the upload run.
    #[arg(short, long, env = "EMBEDDING_MODEL")]
    model: Option<String>,

    /// After the upload, switch to this model and re-embed (repeatable).
    #[arg(long = "rerun-with", value_name = "MODEL")]
    rerun_with: Vec<String>,

    /// OCR gateway URL.
    #[arg(long, env = "OCR_ENDPOINT")]
    ocr_endpoint: Option<String>,

    /// Tesseract language(s) for local OCR, e.g. eng+fra.
    #[arg(long, env = "OCR_LANGUAGE")]
    ocr_language: Option<String>,

    /// Directory with Tesseract .traineddata files.
    #[arg(long, env = "OCR_TESSDATA_DIR")]
    tessdata_dir: Option<PathBuf>,

    /// Feature-extraction URL template.
    #[arg(long, env = "EMBEDDING_ENDPOINT")]
    embedding_endpoint: Option<String>,

    /// JSON Lines file to append records to.
    #[arg(long, env = "OCR_RECORDS_PATH")]
    records: Option<PathBuf>,

    /// POST records to this URL instead of a local file.
    #[arg(long, env = "RECORD_ENDPOINT")]
    record_endpoint: Option<String>,

    /// Maximum base64-encoded image size in bytes.
    #[arg(long, env = "OCR_MAX_IMAGE_BYTES")]
    max_image_bytes: Option<usize>,

    /// Print a bar chart of the embedding values.
    #[arg(long)]
    show_embedding: bool,

    /// Print one JSON snapshot per run instead of text.
    #[arg(long)]
    json: bool,

    /// List the model catalog and exit.
    #[arg(long)]
    list_models: bool,

    /// Disable the spinner.
    #[arg(long, env = "OCR_EMBED_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "OCR_EMBED_VERBOSE")]
    verbose: bool,

    /// Suppress all output except results and errors.
    #[arg(short, long, env = "OCR_EMBED_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner provides the feedback that matters; keep library INFO
    // logs out of its way unless asked for.
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

    let config = PipelineConfig::from_env().context("Invalid environment configuration")?;
    let config = apply_overrides(config, &cli).context("Invalid configuration")?;

    if cli.list_models {
        print_catalog(&config.catalog, config.default_model.as_deref());
        return Ok(());
    }

    let Some(ref image_path) = cli.image else {
        anyhow::bail!("An image path is required");
    };
    let bytes = tokio::fs::read(image_path)
        .await
        .with_context(|| format!("Failed to read image {:?}", image_path))?;

    let observer = show_progress.then(CliObserver::new);
    let controller = config
        .into_controller(observer.clone().map(|o| o as SharedObserver))
        .context("Failed to set up pipeline")?;

    // ── Upload run ───────────────────────────────────────────────────────
    let mut snapshots: Vec<PipelineSnapshot> = Vec::new();
    controller.upload(UploadedImage::new(bytes)).await;
    snapshots.push(controller.snapshot());

    // ── Model switches ───────────────────────────────────────────────────
    for id in &cli.rerun_with {
        let outcome = controller
            .on_model_changed(id)
            .await
            .context("Model switch failed")?;
        if outcome == RunOutcome::Skipped && !cli.quiet {
            eprintln!("{} {} skipped (no text to re-embed)", dim("·"), id);
        }
        snapshots.push(controller.snapshot());
    }

    if let Some(ref o) = observer {
        o.finish();
    }

    // ── Output ───────────────────────────────────────────────────────────
    if cli.json {
        let json = serde_json::to_string_pretty(&snapshots).context("Failed to serialise output")?;
        println!("{json}");
    } else {
        for (i, snap) in snapshots.iter().enumerate() {
            print_snapshot(snap, controller.catalog(), i == 0, cli.show_embedding, cli.quiet);
        }
    }

    let last = controller.snapshot();
    if last.status == PipelineStatus::Error {
        anyhow::bail!(
            "{}",
            last.error_message.as_deref().unwrap_or("Processing failed")
        );
    }
    Ok(())
}

/// Fold explicit CLI flags over the environment-derived config and
/// validate the result.
fn apply_overrides(config: PipelineConfig, cli: &Cli) -> Result<PipelineConfig, ConfigError> {
    let mut builder = config.into_builder();
    if let Some(ref v) = cli.ocr_endpoint {
        builder = builder.ocr_endpoint(v.clone());
    }
    if let Some(ref v) = cli.ocr_language {
        builder = builder.ocr_language(v.clone());
    }
    if let Some(ref v) = cli.tessdata_dir {
        builder = builder.tessdata_dir(v.clone());
    }
    if let Some(ref v) = cli.embedding_endpoint {
        builder = builder.embedding_endpoint(v.clone());
    }
    if let Some(ref v) = cli.records {
        builder = builder.records_path(v.clone());
    }
    if let Some(ref v) = cli.record_endpoint {
        builder = builder.record_endpoint(v.clone());
    }
    if let Some(v) = cli.max_image_bytes {
        builder = builder.max_image_bytes(v);
    }
    if let Some(ref v) = cli.model {
        builder = builder.default_model(v.clone());
    }
    builder.build()
}

fn print_catalog(catalog: &ModelCatalog, selected: Option<&str>) {
    let selected = selected.unwrap_or(&catalog.default_model().id);
    for model in catalog.models() {
        let marker = if model.id == selected { green("●") } else { dim("○") };
        println!("{marker} {:<62} {}", model.id, dim(&model.label));
    }
}

fn print_snapshot(
    snap: &PipelineSnapshot,
    catalog: &ModelCatalog,
    show_text: bool,
    show_embedding: bool,
    quiet: bool,
) {
    if show_text {
        if let Some(text) = snap.text() {
            println!("{}", bold("Extracted text"));
            println!("{text}");
            println!();
        }
    }

    match snap.status {
        PipelineStatus::Error => {
            eprintln!(
                "{} {}",
                red("✘"),
                snap.error_message.as_deref().unwrap_or("Processing failed")
            );
        }
        _ => {
            if let Some(ref embedding) = snap.embedding {
                // Label from the vector's own model, never the current selection.
                let label = catalog
                    .get(embedding.model_id())
                    .map(|m| m.label.as_str())
                    .unwrap_or(embedding.model_id());
                println!(
                    "{} {}-dimensional embedding from {}",
                    green("✔"),
                    bold(&embedding.dimensions().to_string()),
                    label
                );
                if show_embedding {
                    println!("  {}", sparkline(embedding.values(), 64));
                }
            }
        }
    }

    if !quiet {
        match &snap.persistence {
            PersistOutcome::Saved => eprintln!("  {}", dim("record saved")),
            PersistOutcome::Failed(e) => eprintln!("  {} {}", cyan("⚠"), dim(&format!("record not saved: {e}"))),
            PersistOutcome::Pending | PersistOutcome::NotAttempted => {}
        }
    }
}

/// Render up to `width` bars, averaging buckets of adjacent dimensions.
fn sparkline(values: &[f32], width: usize) -> String {
    const BARS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
    if values.is_empty() || width == 0 {
        return String::new();
    }
    let bucket = values.len().div_ceil(width);
    let means: Vec<f32> = values
        .chunks(bucket)
        .map(|c| c.iter().sum::<f32>() / c.len() as f32)
        .collect();
    let min = means.iter().copied().fold(f32::INFINITY, f32::min);
    let max = means.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let span = (max - min).max(f32::EPSILON);
    means
        .iter()
        .map(|v| {
            let idx = (((v - min) / span) * (BARS.len() - 1) as f32).round() as usize;
            BARS[idx.min(BARS.len() - 1)]
        })
        .collect()
}
