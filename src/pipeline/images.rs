//! Embedded-image extraction for QR scanning.
//!
//! Fiscal QR codes in PDF receipts are embedded raster images and are
//! extracted at native resolution. A plain image upload is its own only
//! candidate.

use crate::error::IngestError;
use crate::pipeline::input::FileKind;
use crate::pipeline::render::{bind_pdfium, open_document};
use image::{DynamicImage, ImageFormat};
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Return the images to scan for QR codes.
///
/// For a PDF, every embedded image is written as a PNG into `out_dir`; for a
/// plain image, `file` itself is returned and nothing is written.
pub fn candidate_images(
    file: &Path,
    kind: FileKind,
    out_dir: &Path,
    lib_dir: Option<&Path>,
) -> Result<Vec<PathBuf>, IngestError> {
    match kind {
        FileKind::Image => Ok(vec![file.to_path_buf()]),
        FileKind::Pdf => extract_images_from_pdf(file, out_dir, lib_dir),
    }
}

/// Write every embedded raster image of `pdf_path` to a new `out_dir`.
///
/// Files are named `{stem}_page_{p}_image_{i}.png`, both numbers 1-indexed,
/// and returned in page order. An image that pdfium cannot decode is skipped
/// with a warning; a PDF that cannot be opened fails the whole call.
///
/// `out_dir` must not exist yet and its parent must, so a workspace that has
/// already been removed is never recreated.
pub fn extract_images_from_pdf(
    pdf_path: &Path,
    out_dir: &Path,
    lib_dir: Option<&Path>,
) -> Result<Vec<PathBuf>, IngestError> {
    std::fs::create_dir(out_dir).map_err(|e| IngestError::io(out_dir, e))?;

    let stem = pdf_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("document");

    let pdfium = bind_pdfium(lib_dir)?;
    let document = open_document(&pdfium, pdf_path)?;

    let mut paths = Vec::new();
    for (page_idx, page) in document.pages().iter().enumerate() {
        let mut image_no = 0usize;
        for object in page.objects().iter() {
            let Some(image_object) = object.as_image_object() else {
                continue;
            };
            image_no += 1;

            let raw = match image_object.get_raw_image() {
                Ok(img) => img,
                Err(e) => {
                    warn!(
                        "Page {} image {}: could not decode embedded image: {:?}",
                        page_idx + 1,
                        image_no,
                        e
                    );
                    continue;
                }
            };

            let path = out_dir.join(format!(
                "{stem}_page_{}_image_{image_no}.png",
                page_idx + 1
            ));
            normalise_for_png(raw)
                .save_with_format(&path, ImageFormat::Png)
                .map_err(|e| IngestError::Internal(format!("Failed to write {}: {e}", path.display())))?;
            debug!("Extracted {}", path.display());
            paths.push(path);
        }
    }

    info!("Extracted {} embedded images from {}", paths.len(), pdf_path.display());
    Ok(paths)
}

/// Convert pixel layouts PNG cannot hold (CMYK-derived, 16-bit, float) to 8-bit RGB(A).
pub fn normalise_for_png(img: DynamicImage) -> DynamicImage {
    match img {
        DynamicImage::ImageLuma8(_)
        | DynamicImage::ImageLumaA8(_)
        | DynamicImage::ImageRgb8(_)
        | DynamicImage::ImageRgba8(_) => img,
        other if other.color().has_alpha() => DynamicImage::ImageRgba8(other.to_rgba8()),
        other => DynamicImage::ImageRgb8(other.to_rgb8()),
    }
}
