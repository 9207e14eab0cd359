//! CLI binary for receipt-intake.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `IngestConfig`, then either serves the HTTP API or processes one file.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use receipt_intake::{run_server, IngestConfig, Ingestor};
use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Serve the upload API on port 8000
  receipt-intake serve

  # Process one receipt and print the JSON
  receipt-intake process receipt.pdf

  # Write the result to a file, with the answering stage
  receipt-intake process photo.jpg --with-source -o result.json

  # Use a self-hosted OpenAI-compatible model
  OPENAI_BASE_URL=http://localhost:7777/v1 OPENAI_API_KEY=dummy \
    receipt-intake --model deepseek-v3 serve

ENVIRONMENT VARIABLES:
  API_TOKEN               Token for the receipt-verification service
  OPENAI_API_KEY          OpenAI (or compatible) API key
  OPENAI_BASE_URL         Base URL of an OpenAI-compatible server
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Directory containing libpdfium
  RECEIPT_INTAKE_MODEL_DIR  Directory with the ONNX models (default ./models)
  RUST_LOG                Log filter (overrides --verbose / --quiet)

A .env file in the working directory is loaded before flags are parsed.
"#;

/// Turn receipts (PDF or photo) into structured JSON.
#[derive(Parser, Debug)]
#[command(
    name = "receipt-intake",
    version,
    about = "Turn receipts (PDF or photo) into structured JSON",
    long_about = "Resolve a receipt through its fiscal QR code when possible, otherwise \
extract tables and text with Tesseract and oar-ocr models and structure them with an LLM.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    pipeline: PipelineArgs,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "RECEIPT_INTAKE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "RECEIPT_INTAKE_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API (POST /process-file/, GET /health).
    Serve {
        /// Address to bind.
        #[arg(long, env = "RECEIPT_INTAKE_HOST", default_value = "0.0.0.0")]
        host: String,

        /// Port to listen on.
        #[arg(short, long, env = "RECEIPT_INTAKE_PORT", default_value_t = 8000)]
        port: u16,
    },
    /// Process one local file and print the resulting JSON.
    Process {
        /// Receipt file (.pdf, .png, .jpg, .jpeg).
        input: PathBuf,

        /// Write JSON to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Wrap the result as {"source": ..., "body": ...}.
        #[arg(long)]
        with_source: bool,
    },
}

#[derive(Args, Debug)]
struct PipelineArgs {
    /// Directory under which per-request workspaces are created.
    #[arg(long, global = true, env = "RECEIPT_INTAKE_WORK_DIR")]
    work_dir: Option<PathBuf>,

    /// Directory containing the pdfium shared library.
    #[arg(long, global = true, env = "PDFIUM_LIB_PATH")]
    pdfium_lib_path: Option<PathBuf>,

    /// Rendering DPI for OCR (72–600).
    #[arg(long, global = true, env = "RECEIPT_INTAKE_DPI", default_value_t = 200,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Tesseract executable.
    #[arg(long, global = true, env = "TESSERACT_PATH", default_value = "tesseract")]
    tesseract: String,

    /// Tesseract language list.
    #[arg(long, global = true, env = "RECEIPT_INTAKE_OCR_LANGS", default_value = "rus+eng")]
    ocr_languages: String,

    /// Minimum word confidence for table cells (0–100).
    #[arg(long, global = true, env = "RECEIPT_INTAKE_MIN_CONFIDENCE", default_value_t = 50,
          value_parser = clap::value_parser!(u8).range(0..=100))]
    min_confidence: u8,

    /// Directory holding the ONNX models (layout, table structure, orientation).
    #[arg(long, global = true, env = "RECEIPT_INTAKE_MODEL_DIR")]
    model_dir: Option<PathBuf>,

    /// Layout model, overriding the one in --model-dir.
    #[arg(long, global = true, env = "RECEIPT_INTAKE_LAYOUT_MODEL")]
    layout_model: Option<PathBuf>,

    /// Layout model family, e.g. pp_doclayout_plus_l or pp_doclayout_l.
    #[arg(long, global = true, env = "RECEIPT_INTAKE_LAYOUT_MODEL_NAME")]
    layout_model_name: Option<String>,

    /// Table structure model (SLANet).
    #[arg(long, global = true, env = "RECEIPT_INTAKE_TABLE_MODEL")]
    table_structure_model: Option<PathBuf>,

    /// Token dictionary for the table structure model.
    #[arg(long, global = true, env = "RECEIPT_INTAKE_TABLE_DICT")]
    table_structure_dict: Option<PathBuf>,

    /// Minimum layout score for a table region (0.0–1.0).
    #[arg(long, global = true, env = "RECEIPT_INTAKE_TABLE_SCORE", default_value_t = 0.5)]
    table_score_threshold: f32,

    /// Document orientation model.
    #[arg(long, global = true, env = "RECEIPT_INTAKE_ORIENTATION_MODEL")]
    orientation_model: Option<PathBuf>,

    /// Treat every page as upright (EXIF rotation still applies).
    #[arg(long, global = true, env = "RECEIPT_INTAKE_NO_ORIENTATION",
          conflicts_with = "orientation_model")]
    no_orientation: bool,

    /// Receipt-verification endpoint.
    #[arg(long, global = true, env = "RECEIPT_INTAKE_LOOKUP_URL",
          default_value = receipt_intake::config::DEFAULT_LOOKUP_URL)]
    lookup_url: String,

    /// Lookup request timeout in seconds.
    #[arg(long, global = true, env = "RECEIPT_INTAKE_LOOKUP_TIMEOUT", default_value_t = 30)]
    lookup_timeout: u64,

    /// LLM model ID.
    #[arg(long, global = true, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, global = true, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// LLM temperature (0.0–2.0).
    #[arg(long, global = true, env = "RECEIPT_INTAKE_TEMPERATURE", default_value_t = 0.55)]
    temperature: f32,

    /// Max LLM output tokens.
    #[arg(long, global = true, env = "RECEIPT_INTAKE_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// Text file with a custom instruction template (must contain {data}).
    #[arg(long, global = true, env = "RECEIPT_INTAKE_TEMPLATE")]
    template: Option<PathBuf>,

    /// Maximum upload size in MiB.
    #[arg(long, global = true, env = "RECEIPT_INTAKE_MAX_UPLOAD_MB", default_value_t = 25)]
    max_upload_mb: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Missing .env is the normal case.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
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

    // ── Build config and pipeline ────────────────────────────────────────
    let config = build_config(&cli.pipeline).await?;
    let ingestor = Ingestor::new(config)
        .await
        .context("Failed to initialise the ingestion pipeline")?;

    match cli.command {
        Command::Serve { host, port } => {
            let addr: SocketAddr = format!("{host}:{port}")
                .parse()
                .with_context(|| format!("Invalid address {host}:{port}"))?;
            run_server(addr, Arc::new(ingestor))
                .await
                .context("Server error")?;
        }
        Command::Process {
            input,
            output,
            with_source,
        } => {
            let outcome = ingestor
                .ingest_path(&input)
                .await
                .with_context(|| format!("Failed to process {}", input.display()))?;

            let json = if with_source {
                serde_json::to_string_pretty(&outcome)
            } else {
                serde_json::to_string_pretty(&outcome.body)
            }
            .context("Failed to serialise result")?;

            match output {
                Some(path) => {
                    tokio::fs::write(&path, format!("{json}\n"))
                        .await
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    if !cli.quiet {
                        eprintln!("{:?} → {}", outcome.source, path.display());
                    }
                }
                None => {
                    let stdout = io::stdout();
                    let mut handle = stdout.lock();
                    writeln!(handle, "{json}").context("Failed to write to stdout")?;
                }
            }
        }
    }

    Ok(())
}

/// Map CLI args to `IngestConfig`.
async fn build_config(args: &PipelineArgs) -> Result<IngestConfig> {
    let mut builder = IngestConfig::builder()
        .dpi(args.dpi)
        .tesseract_path(&args.tesseract)
        .ocr_languages(&args.ocr_languages)
        .min_confidence(args.min_confidence)
        .table_score_threshold(args.table_score_threshold)
        .lookup_url(&args.lookup_url)
        .lookup_timeout_secs(args.lookup_timeout)
        .temperature(args.temperature)
        .max_tokens(args.max_tokens)
        .max_upload_bytes(args.max_upload_mb * 1024 * 1024);

    if let Some(ref dir) = args.work_dir {
        builder = builder.work_dir(dir);
    }
    if let Some(ref dir) = args.pdfium_lib_path {
        builder = builder.pdfium_lib_path(dir);
    }

    // Single-model flags win over --model-dir.
    if let Some(ref dir) = args.model_dir {
        builder = builder.model_dir(dir);
    }
    if let Some(ref path) = args.layout_model {
        builder = builder.layout_model(path);
    }
    if let Some(ref name) = args.layout_model_name {
        builder = builder.layout_model_name(name);
    }
    if let Some(ref path) = args.table_structure_model {
        builder = builder.table_structure_model(path);
    }
    if let Some(ref path) = args.table_structure_dict {
        builder = builder.table_structure_dict(path);
    }
    if args.no_orientation {
        builder = builder.orientation_model(None);
    } else if let Some(ref path) = args.orientation_model {
        builder = builder.orientation_model(Some(path.clone()));
    }
    if let Ok(token) = std::env::var(receipt_intake::config::API_TOKEN_ENV) {
        if !token.is_empty() {
            builder = builder.api_token(token);
        }
    }
    if let Some(ref model) = args.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = args.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref path) = args.template {
        let template = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read template from {:?}", path))?;
        builder = builder.system_template(template);
    }

    builder.build().context("Invalid configuration")
}
