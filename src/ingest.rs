//! Request orchestration: QR lookup first, OCR + LLM as the fallback.
//!
//! [`Ingestor`] owns the configuration and one instance of every pipeline
//! collaborator. A request runs strictly in sequence:
//!
//! 1. validate the file name (no I/O yet)
//! 2. stage the upload in a fresh per-request workspace
//! 3. collect candidate images, decode QR payloads, look them up; the first
//!    usable response is the answer
//! 4. otherwise extract tables and text, hand them to the model and parse
//!    its JSON answer
//!
//! The workspace is removed on every exit path. Blocking stages hold their
//! own handle to it, so a request that is dropped mid-flight (client gone)
//! leaves removal to whichever stage finishes last.

use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::output::{IngestOutcome, OutcomeSource};
use crate::pipeline::extract::{extract_tables_from_file, Engines};
use crate::pipeline::images::candidate_images;
use crate::pipeline::input::{file_kind, sanitize_file_name, FileKind, Workspace};
use crate::pipeline::llm::{parse_structured, process_data_with_llm, LlmStructurer, Structurer};
use crate::pipeline::lookup::{resolve_first, HttpReceiptLookup, ReceiptLookup};
use crate::pipeline::ocr::{OcrEngine, TesseractCli};
use crate::pipeline::orient::{AssumeUpright, OarOrientationClassifier, OrientationClassifier};
use crate::pipeline::qr::{decode_qr_codes, QrDecoder, RqrrDecoder};
use crate::pipeline::tables::{OarTableDetector, TableDetector};
use crate::prompts::DEFAULT_SYSTEM_TEMPLATE;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// The pipeline collaborators an [`Ingestor`] drives.
#[derive(Clone)]
pub struct Components {
    pub qr: Arc<dyn QrDecoder>,
    pub lookup: Arc<dyn ReceiptLookup>,
    pub ocr: Arc<dyn OcrEngine>,
    pub orientation: Arc<dyn OrientationClassifier>,
    pub tables: Arc<dyn TableDetector>,
    pub structurer: Arc<dyn Structurer>,
}

impl Components {
    /// Production collaborators built from `config`.
    ///
    /// Loads the table and orientation models and resolves the LLM provider,
    /// so this fails when a model file is missing or no provider is configured.
    pub async fn from_config(config: &IngestConfig) -> Result<Self, IngestError> {
        let ocr = TesseractCli::from_config(config);
        if !ocr.is_available() {
            warn!(
                "'{}' could not be executed; OCR requests will fail until Tesseract is installed",
                ocr.binary
            );
        }
        let orientation: Arc<dyn OrientationClassifier> = match config.orientation_model {
            Some(ref path) => Arc::new(OarOrientationClassifier::from_model(path)?),
            None => Arc::new(AssumeUpright),
        };
        Ok(Self {
            qr: Arc::new(RqrrDecoder),
            lookup: Arc::new(HttpReceiptLookup::from_config(config)?),
            ocr: Arc::new(ocr),
            orientation,
            tables: Arc::new(OarTableDetector::from_config(config)?),
            structurer: Arc::new(LlmStructurer::from_config(config).await?),
        })
    }
}

/// Receipt ingestion entry point, shared across requests.
pub struct Ingestor {
    config: IngestConfig,
    components: Components,
}

impl std::fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingestor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Ingestor {
    /// Build an ingestor with the production collaborators.
    pub async fn new(config: IngestConfig) -> Result<Self, IngestError> {
        let components = Components::from_config(&config).await?;
        Ok(Self::with_components(config, components))
    }

    pub fn with_components(config: IngestConfig, components: Components) -> Self {
        Self { config, components }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Process one uploaded file.
    ///
    /// # Errors
    /// [`IngestError::is_client_error`] tells bad input apart from
    /// processing failures.
    pub async fn ingest(&self, file_name: &str, bytes: &[u8]) -> Result<IngestOutcome, IngestError> {
        let request_id = Uuid::new_v4();
        let span = info_span!("ingest", %request_id, file = %file_name);
        async move {
            let start = Instant::now();
            let result = self.ingest_inner(file_name, bytes).await;
            match &result {
                Ok(outcome) => info!(
                    source = ?outcome.source,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Request complete"
                ),
                Err(e) if e.is_client_error() => warn!("Request rejected: {}", e),
                Err(e) => error!("Request failed: {}", e),
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Process a local file, as if it had been uploaded under its own name.
    pub async fn ingest_path(&self, path: impl AsRef<Path>) -> Result<IngestOutcome, IngestError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or(IngestError::MissingFileName)?;
        file_kind(name)?;
        let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => IngestError::FileNotFound {
                path: path.to_path_buf(),
            },
            _ => IngestError::io(path, e),
        })?;
        self.ingest(name, &bytes).await
    }

    async fn ingest_inner(&self, file_name: &str, bytes: &[u8]) -> Result<IngestOutcome, IngestError> {
        let name = sanitize_file_name(file_name).ok_or(IngestError::MissingFileName)?;
        let kind = file_kind(&name)?;

        let workspace = Workspace::create(&self.config.work_dir)?;
        let result = self.run(workspace.clone(), &name, kind, bytes).await;

        let dir = workspace.path().to_path_buf();
        if let Err(e) = workspace.close() {
            warn!("Could not remove workspace {}: {}", dir.display(), e);
        }
        result
    }

    async fn run(
        &self,
        workspace: Workspace,
        name: &str,
        kind: FileKind,
        bytes: &[u8],
    ) -> Result<IngestOutcome, IngestError> {
        let upload = workspace.stage_upload(name, bytes).await?;

        // ── Stage 1: QR lookup ───────────────────────────────────────────
        let payloads = self
            .decode_payloads(workspace.clone(), upload.clone(), kind)
            .instrument(info_span!("stage", stage = "qr"))
            .await?;

        if !payloads.is_empty() {
            if let Some(body) = resolve_first(self.components.lookup.as_ref(), &payloads)
                .instrument(info_span!("stage", stage = "lookup"))
                .await
            {
                return Ok(IngestOutcome {
                    source: OutcomeSource::QrLookup,
                    body,
                });
            }
            info!("No usable lookup response; falling back to OCR");
        } else {
            info!("No QR code found; falling back to OCR");
        }

        // ── Stage 2: OCR extraction ──────────────────────────────────────
        let output_path = workspace.extraction_output(name);
        let json_path = self
            .extract(workspace, upload, output_path)
            .instrument(info_span!("stage", stage = "ocr"))
            .await?;

        // ── Stage 3: LLM structuring ─────────────────────────────────────
        let template = self
            .config
            .system_template
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_TEMPLATE);
        let answer = process_data_with_llm(&json_path, template, self.components.structurer.as_ref())
            .instrument(info_span!("stage", stage = "llm"))
            .await?;
        let body = parse_structured(&answer)?;

        Ok(IngestOutcome {
            source: OutcomeSource::OcrLlm,
            body,
        })
    }

    /// Collect candidate images and decode their QR payloads.
    ///
    /// The images directory is removed before returning.
    async fn decode_payloads(
        &self,
        workspace: Workspace,
        upload: PathBuf,
        kind: FileKind,
    ) -> Result<Vec<String>, IngestError> {
        let decoder = Arc::clone(&self.components.qr);
        let lib_dir = self.config.pdfium_lib_path.clone();

        tokio::task::spawn_blocking(move || {
            let images_dir = workspace.images_dir();
            let result = collect_payloads(decoder.as_ref(), &upload, kind, &images_dir, lib_dir.as_deref());
            if images_dir.exists() {
                if let Err(e) = std::fs::remove_dir_all(&images_dir) {
                    warn!("Could not remove {}: {}", images_dir.display(), e);
                }
            }
            drop(workspace);
            result
        })
        .await
        .map_err(|e| IngestError::Internal(format!("QR task panicked: {e}")))?
    }

    async fn extract(
        &self,
        workspace: Workspace,
        upload: PathBuf,
        output_path: PathBuf,
    ) -> Result<PathBuf, IngestError> {
        let config = self.config.clone();
        let components = self.components.clone();

        tokio::task::spawn_blocking(move || {
            let engines = Engines {
                ocr: components.ocr.as_ref(),
                orientation: components.orientation.as_ref(),
                tables: components.tables.as_ref(),
            };
            let result = extract_tables_from_file(&upload, &output_path, &config, engines);
            drop(workspace);
            result
        })
        .await
        .map_err(|e| IngestError::Internal(format!("extraction task panicked: {e}")))?
    }
}

fn collect_payloads(
    decoder: &dyn QrDecoder,
    upload: &Path,
    kind: FileKind,
    images_dir: &Path,
    lib_dir: Option<&Path>,
) -> Result<Vec<String>, IngestError> {
    let images = candidate_images(upload, kind, images_dir, lib_dir)?;
    debug!("{} candidate image(s) for QR scanning", images.len());
    Ok(decode_qr_codes(decoder, &images))
}
