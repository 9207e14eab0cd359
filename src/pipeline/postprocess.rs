//! Post-processing: deterministic cleanup of model output before JSON parsing.
//!
//! Models are told to answer with a bare JSON object, but they occasionally
//! wrap it in a ```` ```json ```` fence, prefix a BOM or scatter zero-width
//! characters between its tokens. The rules here undo those quirks; text
//! inside JSON string literals is left exactly as the model wrote it.
//!
//! ## Rule Order
//!
//! Invisible characters go first so a BOM in front of the fence does not
//! hide it from the fence rule.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all cleanup rules to raw model output.
///
/// Rules (applied in order):
/// 1. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens) outside
///    string literals
/// 2. Normalise line endings (CRLF → LF)
/// 3. Strip an outer code fence, with or without a `json` tag
/// 4. Trim surrounding whitespace
pub fn clean_model_output(input: &str) -> String {
    let s = remove_invisible_chars(input);
    let s = normalise_line_endings(&s);
    let s = strip_code_fences(&s);
    s.trim().to_string()
}

// ── Rule 1: Remove invisible Unicode characters ─────────────────────────────

const INVISIBLE: [char; 6] = [
    '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
];

fn remove_invisible_chars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_string = false;
    let mut escaped = false;
    for c in input.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
        } else if c == '"' {
            in_string = true;
        } else if INVISIBLE.contains(&c) {
            continue;
        }
        out.push(c);
    }
    out
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Strip outer code fences ──────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[ \t]*(?i:json)?[ \t]*\n(.*?)\n?```\s*$").unwrap());

fn strip_code_fences(input: &str) -> String {
    match RE_OUTER_FENCES.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}
