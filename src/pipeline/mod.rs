//! Pipeline stages for receipt ingestion.
//!
//! Each submodule implements one step. Stages that call out to something
//! external (QR decoder, verification service, OCR engine, orientation and
//! table models, language model) do it through a trait so the orchestrator in
//! [`crate::ingest`] can be exercised with fakes.
//!
//! ## Data Flow
//!
//! ```text
//!                    ┌─▶ images ──▶ qr ──▶ lookup ──▶ answer
//! input ──(upload)───┤                        │ (nothing usable)
//!                    └────────────────────────┴─▶ render ──▶ orient ──▶ ocr ──▶ tables
//!                                                  ──▶ extract (JSON) ──▶ llm ──▶ answer
//! ```
//!
//! 1. [`input`]   : extension allow-list and the per-request workspace
//! 2. [`images`]  : embedded images of a PDF, or the upload itself
//! 3. [`qr`]      : decode QR payloads from those images
//! 4. [`lookup`]  : resolve payloads against the verification service
//! 5. [`render`]  : rasterise PDF pages; blocking, pdfium is not async-safe
//! 6. [`orient`]  : EXIF and model-detected rotation, undone before OCR
//! 7. [`ocr`]     : word boxes and confidences from Tesseract
//! 8. [`tables`]  : layout regions and SLANet cell structure via oar-ocr
//! 9. [`extract`] : tables plus outside-table text, written as JSON
//! 10. [`llm`]    : template the JSON into an instruction and call the model
//! 11. [`postprocess`] : cleanup of the model answer before JSON parsing

pub mod extract;
pub mod images;
pub mod input;
pub mod llm;
pub mod lookup;
pub mod ocr;
pub mod orient;
pub mod postprocess;
pub mod qr;
pub mod render;
pub mod tables;
