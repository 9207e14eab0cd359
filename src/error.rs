//! Error types for the receipt-intake library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`IngestError`] is **fatal**: the request cannot produce an answer
//!   (unsupported file, corrupt document, OCR engine or model missing, LLM
//!   failure). Returned as `Err(IngestError)` from [`crate::ingest::Ingestor::ingest`].
//!
//! * [`QrError`] is **non-fatal**: one image could not be decoded or one
//!   payload could not be looked up. Logged and skipped; the QR stage keeps
//!   going and the OCR stage takes over if nothing usable comes back.
//!
//! [`IngestError::is_client_error`] splits fatal errors into "the upload was
//! bad" and "we failed", which the HTTP layer maps to `400` and `500`.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the receipt-intake library.
#[derive(Debug, Error)]
pub enum IngestError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The upload carried no file name, so its type cannot be determined.
    #[error("Uploaded file has no name")]
    MissingFileName,

    /// The file extension is not in the allow-list.
    #[error("Unsupported file format '{name}'. Allowed: .pdf, .png, .jpg, .jpeg")]
    UnsupportedFileType { name: String },

    /// The file to extract from does not exist.
    #[error("File not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// The image bytes could not be decoded.
    #[error("Image '{path}' could not be decoded: {detail}")]
    UndecodableImage { path: PathBuf, detail: String },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    // ── OCR errors ────────────────────────────────────────────────────────
    /// The OCR engine could not be started or exited with an error.
    #[error("OCR engine failed: {detail}")]
    OcrFailed { detail: String },

    // ── Model errors ──────────────────────────────────────────────────────
    /// An ONNX model or its dictionary could not be loaded.
    #[error("Failed to load model '{path}': {detail}")]
    ModelLoadFailed { path: PathBuf, detail: String },

    /// Layout, table-structure or orientation inference failed on a page.
    #[error("{stage} inference failed: {detail}")]
    InferenceFailed { stage: &'static str, detail: String },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The LLM API returned an error.
    #[error("LLM API error: {message}")]
    LlmApiError { message: String },

    /// The model answered, but not with JSON.
    #[error("Model output is not valid JSON: {detail}")]
    MalformedModelOutput { detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Reading or writing a working file failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH to the directory containing libpdfium, or install it system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IngestError {
    /// Whether the failure is attributable to the uploaded input.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            IngestError::MissingFileName
                | IngestError::UnsupportedFileType { .. }
                | IngestError::FileNotFound { .. }
                | IngestError::CorruptPdf { .. }
                | IngestError::UndecodableImage { .. }
                | IngestError::RasterisationFailed { .. }
                | IngestError::MalformedModelOutput { .. }
        )
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IngestError::Io {
            path: path.into(),
            source,
        }
    }
}

/// A non-fatal failure inside the QR stage.
///
/// Logged where it happens and then dropped; it never reaches the caller.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum QrError {
    /// The image file could not be opened or decoded.
    #[error("Could not load image '{path}': {detail}")]
    ImageLoad { path: PathBuf, detail: String },

    /// A QR grid was found but its content could not be decoded.
    #[error("QR grid in '{path}' could not be decoded: {detail}")]
    Decode { path: PathBuf, detail: String },

    /// The verification service could not be reached or answered garbage.
    #[error("Lookup for QR payload '{payload}' failed: {detail}")]
    Lookup { payload: String, detail: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_type_is_client_error() {
        let e = IngestError::UnsupportedFileType {
            name: "receipt.gif".into(),
        };
        assert!(e.is_client_error());
        assert!(e.to_string().contains("receipt.gif"));
        assert!(e.to_string().contains(".jpeg"));
    }

    #[test]
    fn malformed_model_output_is_client_error() {
        let e = IngestError::MalformedModelOutput {
            detail: "expected value at line 1 column 1".into(),
        };
        assert!(e.is_client_error());
    }

    #[test]
    fn engine_failures_are_server_errors() {
        assert!(!IngestError::OcrFailed {
            detail: "tesseract not found".into()
        }
        .is_client_error());
        assert!(!IngestError::LlmApiError {
            message: "502".into()
        }
        .is_client_error());
        assert!(!IngestError::PdfiumBindingFailed("missing".into()).is_client_error());
        assert!(!IngestError::InferenceFailed {
            stage: "table structure",
            detail: "shape mismatch".into()
        }
        .is_client_error());
        assert!(!IngestError::io("/tmp/x", std::io::Error::other("disk full")).is_client_error());
    }

    #[test]
    fn lookup_error_display() {
        let e = QrError::Lookup {
            payload: "t=20240101T1200&s=100.00".into(),
            detail: "connection refused".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("t=20240101T1200"), "got: {msg}");
        assert!(msg.contains("connection refused"), "got: {msg}");
    }
}
