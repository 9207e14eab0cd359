//! # receipt-intake
//!
//! Turn an uploaded receipt (PDF or photo) into structured JSON.
//!
//! ## Why two paths?
//!
//! Fiscal receipts usually carry a QR code that the tax-verification service
//! can resolve into an exact, signed record. When that works there is
//! nothing to guess. Only when no code decodes, or no lookup answers, does
//! the crate fall back to OCR: tables and free text are extracted from the
//! page images and a language model turns them into a receipt record.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload (.pdf / .png / .jpg / .jpeg)
//!  │
//!  ├─ 1. Input    allow-list check, per-request workspace
//!  ├─ 2. QR       embedded images → rqrr → verification service
//!  │              first usable response is returned as-is
//!  ├─ 3. OCR      pdfium render → upright page → Tesseract words → tables
//!  ├─ 4. LLM      extraction JSON templated into one system message
//!  └─ 5. Output   model answer parsed as JSON
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use receipt_intake::{IngestConfig, Ingestor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // API_TOKEN for the lookup service; LLM provider from OPENAI_API_KEY etc.
//!     let ingestor = Ingestor::new(IngestConfig::from_env()).await?;
//!     let outcome = ingestor.ingest_path("receipt.pdf").await?;
//!     println!("{}", serde_json::to_string_pretty(&outcome.body)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `receipt-intake` binary (clap + anyhow + tracing-subscriber + dotenvy) |
//!
//! ## External Tools
//!
//! * **pdfium**: bound at runtime from `PDFIUM_LIB_PATH` or the system
//!   library path.
//! * **Tesseract** with the `rus` and `eng` language data, on `PATH` or at
//!   [`IngestConfig::tesseract_path`].
//! * **ONNX models** for oar-ocr: PP-DocLayout_plus-L (layout), SLANet-plus
//!   with its token dictionary (table structure) and PP-LCNet document
//!   orientation. They are looked up in `models/` unless
//!   [`IngestConfigBuilder::model_dir`] says otherwise; a missing file fails
//!   [`Ingestor::new`].

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod ingest;
pub mod output;
pub mod pipeline;
pub mod prompts;
pub mod server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{IngestConfig, IngestConfigBuilder};
pub use error::{IngestError, QrError};
pub use ingest::{Components, Ingestor};
pub use output::{
    BoundingBox, ExtractedDocument, ExtractedTable, IngestOutcome, OutcomeSource, TextFragment,
};
pub use pipeline::extract::extract_tables_from_file;
pub use pipeline::input::allowed_file;
pub use pipeline::llm::{parse_structured, process_data_with_llm, Structurer};
pub use server::{router, run_server};
