//! Instruction template for the structuring stage.
//!
//! The template is the only prompt in the crate. Callers can override it via
//! [`crate::config::IngestConfig::system_template`]; the constant here is used
//! only when no override is provided.
//!
//! Templates follow f-string conventions: `{data}` is the placeholder and
//! `{{` / `}}` stand for literal braces. A lone brace is kept as written, so
//! templates that never escape their JSON examples work too.

/// Placeholder replaced with the extracted-document JSON.
pub const DATA_PLACEHOLDER: &str = "{data}";

/// Default instruction template for turning OCR output into a receipt record.
pub const DEFAULT_SYSTEM_TEMPLATE: &str = r#"You are an accounting assistant. You receive the raw OCR output of a receipt or invoice as JSON with two keys:
- "tables": detected tables, each with an optional "page", a "table_index" and "data" (rows keyed by column number)
- "text": text fragments found outside the tables, each with "text", "bbox", "confidence" and an optional "page"

Convert it into a single JSON object with this shape:

{{
  "merchant": {{"name": string|null, "inn": string|null, "address": string|null}},
  "document": {{"type": "receipt"|"invoice"|"other", "number": string|null, "date": string|null}},
  "items": [{{"name": string, "quantity": number|null, "price": number|null, "sum": number|null}}],
  "totals": {{"total": number|null, "vat": number|null, "currency": string|null}},
  "payment": {{"method": string|null}}
}}

Rules:
- Use only values present in the input; use null when a value is missing.
- Numbers use a dot as decimal separator and no thousands separators.
- Dates use ISO 8601 (YYYY-MM-DD or YYYY-MM-DDTHH:MM).
- Output ONLY the JSON object, with no commentary and no Markdown fences.

Input:
{data}"#;

/// Substitute the extracted document into the template.
///
/// `data` is inserted verbatim; brace escapes are only resolved in the
/// template text around it.
pub fn render_template(template: &str, data: &str) -> String {
    let mut out = String::with_capacity(template.len() + data.len());
    let mut rest = template;
    while let Some(c) = rest.chars().next() {
        if rest.starts_with("{{") || rest.starts_with("}}") {
            out.push(c);
            rest = &rest[2..];
        } else if rest.starts_with(DATA_PLACEHOLDER) {
            out.push_str(data);
            rest = &rest[DATA_PLACEHOLDER.len()..];
        } else {
            out.push(c);
            rest = &rest[c.len_utf8()..];
        }
    }
    out
}
