//! Table detection through oar-ocr.
//!
//! [`OarTableDetector`] runs a layout model over the upright page and keeps
//! the regions labelled `table`. Each region is cropped and handed to the
//! SLANet structure model, which answers with the table's HTML skeleton and
//! one box per cell. The skeleton gives every cell its row and column; the
//! box picks the OCR words that belong in it.
//!
//! Words below `min_confidence` never reach a cell. A cell spanning several
//! rows or columns repeats its text in every slot it covers.

use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::output::BoundingBox;
use crate::pipeline::ocr::OcrWord;
use image::RgbImage;
use once_cell::sync::Lazy;
use oar_ocr::predictors::{LayoutDetectionPredictor, TableStructureRecognitionPredictor};
use oar_ocr::processors::BoundingBox as ModelBox;
use oar_ocr::utils::BBoxCrop;
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, warn};

/// A table found on a page, cells in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedTable {
    pub bbox: BoundingBox,
    pub rows: Vec<Vec<Option<String>>>,
}

/// Locates tables on an upright page. Implementations block.
pub trait TableDetector: Send + Sync {
    fn detect(&self, page: &RgbImage, words: &[OcrWord]) -> Result<Vec<DetectedTable>, IngestError>;
}

/// Layout detection plus SLANet structure recognition.
pub struct OarTableDetector {
    layout: LayoutDetectionPredictor,
    structure: TableStructureRecognitionPredictor,
    min_confidence: f64,
}

impl std::fmt::Debug for OarTableDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OarTableDetector")
            .field("min_confidence", &self.min_confidence)
            .finish_non_exhaustive()
    }
}

fn require_file(path: &Path) -> Result<(), IngestError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(IngestError::ModelLoadFailed {
            path: path.to_path_buf(),
            detail: "file not found".into(),
        })
    }
}

impl OarTableDetector {
    /// Load the layout and structure models named in `config`.
    pub fn from_config(config: &IngestConfig) -> Result<Self, IngestError> {
        require_file(&config.layout_model)?;
        require_file(&config.table_structure_model)?;
        require_file(&config.table_structure_dict)?;

        let layout = LayoutDetectionPredictor::builder()
            .model_name(config.layout_model_name.clone())
            .score_threshold(config.table_score_threshold)
            .build(&config.layout_model)
            .map_err(|e| IngestError::ModelLoadFailed {
                path: config.layout_model.clone(),
                detail: e.to_string(),
            })?;

        let structure = TableStructureRecognitionPredictor::builder()
            .score_threshold(config.table_score_threshold)
            .dict_path(&config.table_structure_dict)
            .build(&config.table_structure_model)
            .map_err(|e| IngestError::ModelLoadFailed {
                path: config.table_structure_model.clone(),
                detail: e.to_string(),
            })?;

        Ok(Self {
            layout,
            structure,
            min_confidence: f64::from(config.min_confidence),
        })
    }

    fn table_regions(&self, page: &RgbImage) -> Result<Vec<ModelBox>, IngestError> {
        let result = self
            .layout
            .predict(vec![page.clone()])
            .map_err(|e| IngestError::InferenceFailed {
                stage: "layout",
                detail: e.to_string(),
            })?;
        Ok(result
            .elements
            .into_iter()
            .next()
            .unwrap_or_default()
            .into_iter()
            .filter(|e| e.element_type.eq_ignore_ascii_case("table"))
            .map(|e| e.bbox)
            .collect())
    }
}

impl TableDetector for OarTableDetector {
    fn detect(&self, page: &RgbImage, words: &[OcrWord]) -> Result<Vec<DetectedTable>, IngestError> {
        let regions = self.table_regions(page)?;
        debug!("Layout: {} table region(s)", regions.len());

        let mut tables = Vec::with_capacity(regions.len());
        for region in regions {
            let crop = match BBoxCrop::crop_bounding_box(page, &region) {
                Ok(crop) => crop,
                Err(e) => {
                    warn!("Skipping table region that cannot be cropped: {}", e);
                    continue;
                }
            };

            let recognised = self
                .structure
                .predict(vec![crop])
                .map_err(|e| IngestError::InferenceFailed {
                    stage: "table structure",
                    detail: e.to_string(),
                })?;
            let (Some(tokens), Some(cell_boxes)) =
                (recognised.structures.first(), recognised.bboxes.first())
            else {
                continue;
            };

            // Crops start at the truncated region corner.
            let offset = (px(region.x_min()), px(region.y_min()));
            let extent = BoundingBox::new(
                offset.0,
                offset.1,
                px(region.x_max()),
                px(region.y_max()),
            );
            let confident: Vec<&OcrWord> = words
                .iter()
                .filter(|w| w.confidence >= self.min_confidence)
                .collect();

            match assemble_table(extent, tokens, cell_boxes, offset, &confident) {
                Some(table) => tables.push(table),
                None => debug!("Table region at {:?} has no cells", extent),
            }
        }

        tables.sort_by_key(|t| (t.bbox.y1, t.bbox.x1));
        Ok(tables)
    }
}

fn px(v: f32) -> u32 {
    v.max(0.0).floor() as u32
}

// ── Structure tokens → grid ──────────────────────────────────────────────────

/// Where a cell sits in the grid and how far it reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CellSlot {
    row: usize,
    col: usize,
    row_span: usize,
    col_span: usize,
}

static RE_SPAN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(colspan|rowspan)\s*=\s*"?(\d+)"#).unwrap());

fn spans_in(token: &str, row_span: &mut usize, col_span: &mut usize) {
    for caps in RE_SPAN.captures_iter(token) {
        let n = caps[2].parse::<usize>().unwrap_or(1).max(1);
        match &caps[1] {
            "colspan" => *col_span = n,
            _ => *row_span = n,
        }
    }
}

/// Grid slot of every `<td>` in the token stream, in token order.
///
/// Cells already covered by a row span from above are skipped over when
/// placing later cells in the same row.
fn cell_slots(tokens: &[String]) -> Vec<CellSlot> {
    let mut slots = Vec::new();
    let mut occupied: HashSet<(usize, usize)> = HashSet::new();
    let mut row: Option<usize> = None;
    let mut col = 0usize;
    let mut pending: Option<(usize, usize)> = None;

    let mut place = |row: &mut Option<usize>, col: &mut usize, row_span: usize, col_span: usize| {
        let r = *row.get_or_insert(0);
        while occupied.contains(&(r, *col)) {
            *col += 1;
        }
        for dr in 0..row_span {
            for dc in 0..col_span {
                occupied.insert((r + dr, *col + dc));
            }
        }
        slots.push(CellSlot {
            row: r,
            col: *col,
            row_span,
            col_span,
        });
        *col += col_span;
    };

    for token in tokens {
        let t = token.trim();
        if t == "<tr>" {
            row = Some(row.map_or(0, |r| r + 1));
            col = 0;
        } else if t == "<td" {
            pending = Some((1, 1));
        } else if let Some((mut rs, mut cs)) = pending {
            if t.starts_with('>') {
                place(&mut row, &mut col, rs, cs);
                pending = None;
            } else {
                spans_in(t, &mut rs, &mut cs);
                pending = Some((rs, cs));
            }
        } else if t.starts_with("<td") {
            // "<td></td>", "<td>" or a whole cell with attributes.
            let (mut rs, mut cs) = (1, 1);
            spans_in(t, &mut rs, &mut cs);
            place(&mut row, &mut col, rs, cs);
        }
    }
    slots
}

/// Axis-aligned page box from a model cell box in crop coordinates.
///
/// The model reports either four corners (8 values) or two (4 values).
fn cell_box(coords: &[f32], offset: (u32, u32)) -> Option<BoundingBox> {
    let (xs, ys): (Vec<f32>, Vec<f32>) = match coords.len() {
        n if n >= 8 => (
            vec![coords[0], coords[2], coords[4], coords[6]],
            vec![coords[1], coords[3], coords[5], coords[7]],
        ),
        n if n >= 4 => (vec![coords[0], coords[2]], vec![coords[1], coords[3]]),
        _ => return None,
    };
    let min = |v: &[f32]| v.iter().copied().fold(f32::INFINITY, f32::min);
    let max = |v: &[f32]| v.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    Some(BoundingBox::new(
        px(min(&xs)) + offset.0,
        px(min(&ys)) + offset.1,
        px(max(&xs)) + offset.0,
        px(max(&ys)) + offset.1,
    ))
}

/// Build the table grid and fill it with `words`.
///
/// Returns `None` when the structure has no cells.
fn assemble_table(
    extent: BoundingBox,
    tokens: &[String],
    cell_boxes: &[Vec<f32>],
    offset: (u32, u32),
    words: &[&OcrWord],
) -> Option<DetectedTable> {
    let slots = cell_slots(tokens);
    if slots.is_empty() {
        return None;
    }
    if slots.len() != cell_boxes.len() {
        debug!(
            "Structure has {} cells but {} boxes; unmatched cells stay empty",
            slots.len(),
            cell_boxes.len()
        );
    }

    let n_rows = slots.iter().map(|s| s.row + s.row_span).max().unwrap_or(0);
    let n_cols = slots.iter().map(|s| s.col + s.col_span).max().unwrap_or(0);
    let mut rows: Vec<Vec<Option<String>>> = vec![vec![None; n_cols]; n_rows];
    let mut used = vec![false; words.len()];

    for (slot, coords) in slots.iter().zip(cell_boxes) {
        let Some(bbox) = cell_box(coords, offset) else {
            continue;
        };
        let mut inside: Vec<&OcrWord> = Vec::new();
        for (i, &w) in words.iter().enumerate() {
            let (cx, cy) = w.bbox.center();
            if !used[i] && bbox.contains_point(cx, cy) {
                used[i] = true;
                inside.push(w);
            }
        }
        let Some(text) = join_cell(inside) else {
            continue;
        };
        for r in slot.row..slot.row + slot.row_span {
            for c in slot.col..slot.col + slot.col_span {
                rows[r][c] = Some(text.clone());
            }
        }
    }

    Some(DetectedTable { bbox: extent, rows })
}

/// Words of one cell in reading order: lines top to bottom, words left to right.
fn join_cell(mut words: Vec<&OcrWord>) -> Option<String> {
    if words.is_empty() {
        return None;
    }
    words.sort_by_key(|w| w.bbox.center().1);

    let mut lines: Vec<Vec<&OcrWord>> = Vec::new();
    for w in words {
        let cy = w.bbox.center().1;
        match lines.last_mut() {
            Some(line) if cy.abs_diff(line[0].bbox.center().1) <= line[0].bbox.height() / 2 => {
                line.push(w)
            }
            _ => lines.push(vec![w]),
        }
    }

    let text = lines
        .into_iter()
        .map(|mut line| {
            line.sort_by_key(|w| w.bbox.x1);
            line.iter().map(|w| w.text.as_str()).collect::<Vec<_>>().join(" ")
        })
        .collect::<Vec<_>>()
        .join(" ");
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}
