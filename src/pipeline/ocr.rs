//! Word-level OCR through the Tesseract command-line tool.
//!
//! Tesseract's `tsv` output config gives one row per recognised word with
//! its box and confidence. The same word list feeds table detection and the
//! outside-table text filter.

use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::output::BoundingBox;
use std::path::Path;
use std::process::Command;
use tracing::debug;

/// A recognised word.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrWord {
    pub text: String,
    pub bbox: BoundingBox,
    /// 0–100, as reported by the engine.
    pub confidence: f64,
}

/// Recognises words in an image file. Implementations block.
pub trait OcrEngine: Send + Sync {
    fn recognize(&self, image_path: &Path) -> Result<Vec<OcrWord>, IngestError>;
}

/// Tesseract invoked as a subprocess.
#[derive(Debug, Clone)]
pub struct TesseractCli {
    pub binary: String,
    pub languages: String,
    pub psm: u8,
}

impl TesseractCli {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            binary: config.tesseract_path.clone(),
            languages: config.ocr_languages.clone(),
            psm: config.ocr_psm,
        }
    }

    /// Check that the binary can be executed.
    pub fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }
}

impl OcrEngine for TesseractCli {
    fn recognize(&self, image_path: &Path) -> Result<Vec<OcrWord>, IngestError> {
        // tesseract <image> stdout -l rus+eng --psm 1 tsv
        let output = Command::new(&self.binary)
            .arg(image_path.as_os_str())
            .arg("stdout")
            .arg("-l")
            .arg(&self.languages)
            .arg("--psm")
            .arg(self.psm.to_string())
            .arg("tsv")
            .output()
            .map_err(|e| IngestError::OcrFailed {
                detail: format!("could not run '{}' (is it installed?): {e}", self.binary),
            })?;

        if !output.status.success() {
            return Err(IngestError::OcrFailed {
                detail: format!(
                    "exit code {}: {}",
                    output.status.code().unwrap_or(-1),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        let words = parse_tsv(&String::from_utf8_lossy(&output.stdout));
        debug!("OCR: {} words in {}", words.len(), image_path.display());
        Ok(words)
    }
}

/// Parse Tesseract TSV output into words.
///
/// Only word-level rows (level 5) with non-blank text are kept. Malformed
/// rows are skipped.
pub fn parse_tsv(tsv: &str) -> Vec<OcrWord> {
    tsv.lines()
        .filter(|line| !line.starts_with("level"))
        .filter_map(|line| {
            let cols: Vec<&str> = line.split('\t').collect();
            if cols.len() < 11 || cols[0].trim() != "5" {
                return None;
            }
            let text = cols.get(11).map(|t| t.trim()).unwrap_or("");
            if text.is_empty() {
                return None;
            }
            let num = |i: usize| cols[i].trim().parse::<i64>().ok().map(|v| v.max(0) as u32);
            let (left, top, width, height) = (num(6)?, num(7)?, num(8)?, num(9)?);
            let confidence = cols[10].trim().parse::<f64>().ok()?;
            Some(OcrWord {
                text: text.to_string(),
                bbox: BoundingBox::from_ltwh(left, top, width, height),
                confidence,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext
1\t1\t0\t0\t0\t0\t0\t0\t800\t600\t-1\t
4\t1\t1\t1\t1\t0\t40\t30\t300\t20\t-1\t
5\t1\t1\t1\t1\t1\t40\t30\t120\t20\t96.418\tКАССОВЫЙ
5\t1\t1\t1\t1\t2\t170\t30\t60\t20\t91.5\tЧЕК
5\t1\t1\t1\t1\t3\t240\t30\t10\t20\t12\t
5\t1\t1\t1\t2\t1\t40\t60\t80\tbad\t90\tbroken
5\t1\t1\t1\t2\t2\t130\t60\t50\t20\t88";

    #[test]
    fn parses_word_rows_only() {
        let words = parse_tsv(SAMPLE);
        assert_eq!(words.len(), 2);
        assert_eq!(words[0].text, "КАССОВЫЙ");
        assert_eq!(words[0].bbox, BoundingBox::new(40, 30, 160, 50));
        assert!((words[0].confidence - 96.418).abs() < 1e-9);
        assert_eq!(words[1].text, "ЧЕК");
    }

    #[test]
    fn empty_output_is_no_words() {
        assert!(parse_tsv("").is_empty());
        assert!(parse_tsv("level\tpage_num\n").is_empty());
    }

    #[test]
    fn missing_binary_is_a_server_error() {
        let engine = TesseractCli {
            binary: "/nonexistent/tesseract".into(),
            languages: "eng".into(),
            psm: 1,
        };
        assert!(!engine.is_available());
        let err = engine.recognize(Path::new("page.png")).unwrap_err();
        assert!(matches!(err, IngestError::OcrFailed { .. }));
        assert!(!err.is_client_error());
    }
}
