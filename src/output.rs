//! Output types: the extracted document and the final ingestion outcome.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Axis-aligned box in page pixels, serialised as `[x1, y1, x2, y2]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "[u32; 4]", into = "[u32; 4]")]
pub struct BoundingBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl BoundingBox {
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Build from a `left, top, width, height` quadruple.
    pub fn from_ltwh(left: u32, top: u32, width: u32, height: u32) -> Self {
        Self::new(left, top, left + width, top + height)
    }

    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }

    pub fn center(&self) -> (u32, u32) {
        ((self.x1 + self.x2) / 2, (self.y1 + self.y2) / 2)
    }

    /// Whether the boxes share any point; touching edges count as overlap.
    pub fn overlaps(&self, other: &BoundingBox) -> bool {
        !(self.x2 < other.x1 || self.x1 > other.x2 || self.y2 < other.y1 || self.y1 > other.y2)
    }

    pub fn contains_point(&self, x: u32, y: u32) -> bool {
        x >= self.x1 && x <= self.x2 && y >= self.y1 && y <= self.y2
    }
}

impl From<[u32; 4]> for BoundingBox {
    fn from(v: [u32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BoundingBox> for [u32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// One table row: column index (as a string) → cell text, `null` when empty.
pub type TableRow = Map<String, Value>;

/// A detected table with its rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedTable {
    /// 1-indexed page number (PDF input only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<usize>,
    /// 0-indexed position of the table on its page.
    pub table_index: usize,
    pub data: Vec<TableRow>,
    /// Table extent on the page; used for text filtering, not serialised.
    #[serde(skip)]
    pub bbox: BoundingBox,
}

/// A recognised word lying outside every detected table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextFragment {
    pub text: String,
    pub bbox: BoundingBox,
    pub confidence: f64,
    /// 1-indexed page number (PDF input only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<usize>,
}

/// Everything the OCR stage found in a document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedDocument {
    pub tables: Vec<ExtractedTable>,
    pub text: Vec<TextFragment>,
}

impl ExtractedDocument {
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.text.is_empty()
    }
}

/// Which stage produced the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeSource {
    /// A decoded QR payload was resolved by the verification service.
    QrLookup,
    /// OCR extraction followed by LLM structuring.
    OcrLlm,
}

/// Result of one ingestion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestOutcome {
    pub source: OutcomeSource,
    /// Lookup response or structured record, returned to the caller as-is.
    pub body: Value,
}
