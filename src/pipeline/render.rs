//! PDF rasterisation: render every page to a `DynamicImage` via pdfium.
//!
//! pdfium is not async-safe, so every entry point here is a blocking
//! function; async callers go through `spawn_blocking`. `max_rendered_pixels`
//! caps the longest edge regardless of physical page size, which keeps a
//! stray A0 scan from exhausting memory.

use crate::error::IngestError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::{debug, info};

/// Bind to pdfium, preferring a library in `lib_dir` over the system one.
pub fn bind_pdfium(lib_dir: Option<&Path>) -> Result<Pdfium, IngestError> {
    let bindings = match lib_dir {
        Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir)),
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| IngestError::PdfiumBindingFailed(format!("{:?}", e)))?;
    Ok(Pdfium::new(bindings))
}

/// Open a PDF, mapping load failures to a client-facing error.
pub fn open_document<'a>(
    pdfium: &'a Pdfium,
    pdf_path: &Path,
) -> Result<PdfDocument<'a>, IngestError> {
    pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(|e| IngestError::CorruptPdf {
            path: pdf_path.to_path_buf(),
            detail: format!("{:?}", e),
        })
}

/// Render settings for a given DPI and pixel cap.
pub fn render_config(dpi: u32, max_pixels: u32) -> PdfRenderConfig {
    PdfRenderConfig::new()
        .scale_page_by_factor(dpi as f32 / 72.0)
        .set_maximum_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32)
}

/// Rasterise every page of a PDF.
///
/// # Returns
/// A vector of `(page_index_0based, DynamicImage)` tuples in page order.
pub fn render_pages_blocking(
    pdf_path: &Path,
    lib_dir: Option<&Path>,
    dpi: u32,
    max_pixels: u32,
) -> Result<Vec<(usize, DynamicImage)>, IngestError> {
    let pdfium = bind_pdfium(lib_dir)?;
    let document = open_document(&pdfium, pdf_path)?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("PDF loaded: {} pages", total_pages);

    let config = render_config(dpi, max_pixels);
    let mut results = Vec::with_capacity(total_pages);

    for idx in 0..total_pages {
        let page = pages
            .get(idx as u16)
            .map_err(|e| IngestError::RasterisationFailed {
                page: idx + 1,
                detail: format!("{:?}", e),
            })?;

        let bitmap =
            page.render_with_config(&config)
                .map_err(|e| IngestError::RasterisationFailed {
                    page: idx + 1,
                    detail: format!("{:?}", e),
                })?;

        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            idx + 1,
            image.width(),
            image.height()
        );

        results.push((idx, image));
    }

    Ok(results)
}
