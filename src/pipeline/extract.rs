//! OCR extraction: tables plus free text, written to a JSON file.
//!
//! Every page (or the single uploaded image) is turned upright, written as a
//! scratch PNG and recognised once. The words feed table detection, and every
//! word that does not overlap a detected table is kept as a free-text
//! fragment. The result is serialised as
//!
//! ```json
//! {
//!   "tables": [{"page": 1, "table_index": 0, "data": [{"0": "Хлеб", "1": "45.00"}]}],
//!   "text":   [{"text": "ИТОГ", "bbox": [40, 900, 120, 930], "confidence": 94.1, "page": 1}]
//! }
//! ```
//!
//! `page` is 1-indexed and only present for PDF input. Boxes refer to the
//! upright page.

use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::output::{ExtractedDocument, ExtractedTable, TableRow, TextFragment};
use crate::pipeline::input::{file_kind, FileKind};
use crate::pipeline::ocr::{OcrEngine, OcrWord};
use crate::pipeline::orient::{make_upright, open_upright, OrientationClassifier, Rotation};
use crate::pipeline::render::render_pages_blocking;
use crate::pipeline::tables::{DetectedTable, TableDetector};
use image::{DynamicImage, ImageFormat, RgbImage};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// The engines the extraction stage drives.
#[derive(Clone, Copy)]
pub struct Engines<'a> {
    pub ocr: &'a dyn OcrEngine,
    pub orientation: &'a dyn OrientationClassifier,
    pub tables: &'a dyn TableDetector,
}

/// Extract tables and text from `file` and write them to `output_path`.
///
/// Scratch images go next to `output_path` and are removed again. Blocking;
/// run it inside `spawn_blocking` from async code. Returns `output_path` on
/// success.
pub fn extract_tables_from_file(
    file: &Path,
    output_path: &Path,
    config: &IngestConfig,
    engines: Engines<'_>,
) -> Result<PathBuf, IngestError> {
    let name = file
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or(IngestError::MissingFileName)?;
    let kind = file_kind(name)?;
    if !file.is_file() {
        return Err(IngestError::FileNotFound {
            path: file.to_path_buf(),
        });
    }

    let pages: Vec<(Option<usize>, DynamicImage)> = match kind {
        FileKind::Image => vec![(None, open_upright(file)?)],
        FileKind::Pdf => render_pages_blocking(
            file,
            config.pdfium_lib_path.as_deref(),
            config.dpi,
            config.max_rendered_pixels,
        )?
        .into_iter()
        .map(|(idx, image)| (Some(idx + 1), image))
        .collect(),
    };

    let scratch = output_path.parent().unwrap_or_else(|| Path::new("."));
    let stem = file.file_stem().and_then(|s| s.to_str()).unwrap_or("page");
    let document = extract_pages(pages, scratch, stem, engines)?;

    if document.is_empty() {
        warn!("Nothing recognised in {}", file.display());
    }
    info!(
        "Extracted {} tables and {} text fragments from {}",
        document.tables.len(),
        document.text.len(),
        file.display()
    );

    let json = serde_json::to_vec_pretty(&document)
        .map_err(|e| IngestError::Internal(format!("serialising extraction: {e}")))?;
    std::fs::write(output_path, json).map_err(|e| IngestError::io(output_path, e))?;
    Ok(output_path.to_path_buf())
}

/// Orient, recognise and detect tables on every page, in order.
///
/// `page` is `None` for a single image. Each page is written to
/// `{scratch}/{stem}_render_{n}.png` for the OCR engine and removed right
/// after, whether or not recognition succeeded.
pub fn extract_pages(
    pages: Vec<(Option<usize>, DynamicImage)>,
    scratch: &Path,
    stem: &str,
    engines: Engines<'_>,
) -> Result<ExtractedDocument, IngestError> {
    let mut document = ExtractedDocument::default();
    for (page, image) in pages {
        let image = image.to_rgb8();
        let rotation = engines.orientation.classify(&image)?;
        if rotation != Rotation::None {
            debug!("Page {}: turning back {}°", page.unwrap_or(1), rotation.degrees());
        }
        let upright = make_upright(image, rotation);

        let page_path = scratch.join(format!("{stem}_render_{}.png", page.unwrap_or(1)));
        upright
            .save_with_format(&page_path, ImageFormat::Png)
            .map_err(|e| IngestError::Internal(format!("writing {}: {e}", page_path.display())))?;

        let words = engines.ocr.recognize(&page_path);
        if let Err(e) = std::fs::remove_file(&page_path) {
            debug!("Could not remove {}: {}", page_path.display(), e);
        }
        let words = words?;

        let extracted = extract_page(&upright, &words, page, engines.tables)?;
        debug!(
            "Page {}: {} words, {} tables",
            page.unwrap_or(1),
            words.len(),
            extracted.tables.len()
        );
        document.tables.extend(extracted.tables);
        document.text.extend(extracted.text);
    }
    Ok(document)
}

/// Detect tables on one upright page and keep the words outside them.
///
/// `table_index` restarts at 0 on every page.
pub fn extract_page(
    image: &RgbImage,
    words: &[OcrWord],
    page: Option<usize>,
    detector: &dyn TableDetector,
) -> Result<ExtractedDocument, IngestError> {
    let tables: Vec<ExtractedTable> = detector
        .detect(image, words)?
        .into_iter()
        .enumerate()
        .map(|(table_index, DetectedTable { bbox, rows })| ExtractedTable {
            page,
            table_index,
            data: rows.into_iter().map(to_record).collect(),
            bbox,
        })
        .collect();

    let text = words
        .iter()
        .filter(|w| !w.text.trim().is_empty())
        .filter(|w| !tables.iter().any(|t| t.bbox.overlaps(&w.bbox)))
        .map(|w| TextFragment {
            text: w.text.clone(),
            bbox: w.bbox,
            confidence: w.confidence,
            page,
        })
        .collect();

    Ok(ExtractedDocument { tables, text })
}

/// One row as a record keyed by column index.
fn to_record(cells: Vec<Option<String>>) -> TableRow {
    cells
        .into_iter()
        .enumerate()
        .map(|(i, cell)| (i.to_string(), cell.map_or(Value::Null, Value::String)))
        .collect()
}
