//! QR detection and decoding.
//!
//! The decoder sits behind [`QrDecoder`] so the orchestrator can be driven
//! by a fake in tests. One decoder instance is created per process and
//! shared across requests; [`RqrrDecoder`] holds no state.

use crate::error::QrError;
use image::DynamicImage;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Finds and decodes a QR code in an image.
pub trait QrDecoder: Send + Sync {
    /// Payload of the first decodable QR code, `Ok(None)` if there is none.
    ///
    /// `Err` means a code was located but could not be decoded.
    fn decode(&self, image: &DynamicImage) -> Result<Option<String>, String>;
}

/// Pure-Rust decoder backed by `rqrr`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RqrrDecoder;

impl QrDecoder for RqrrDecoder {
    fn decode(&self, image: &DynamicImage) -> Result<Option<String>, String> {
        let luma = image.to_luma8();
        let (width, height) = luma.dimensions();
        let mut prepared =
            rqrr::PreparedImage::prepare_from_greyscale(width as usize, height as usize, |x, y| {
                luma.get_pixel(x as u32, y as u32).0[0]
            });

        let mut last_err = None;
        for grid in prepared.detect_grids() {
            match grid.decode() {
                Ok((_meta, content)) if !content.is_empty() => return Ok(Some(content)),
                Ok(_) => {}
                Err(e) => last_err = Some(format!("{e:?}")),
            }
        }

        match last_err {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }
}

/// Load one image file and decode it.
pub fn decode_file(decoder: &dyn QrDecoder, path: &Path) -> Result<Option<String>, QrError> {
    let image = image::open(path).map_err(|e| QrError::ImageLoad {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    decoder.decode(&image).map_err(|detail| QrError::Decode {
        path: path.to_path_buf(),
        detail,
    })
}

/// Decode every image, logging and skipping failures.
///
/// Payloads keep image order; a payload seen twice (the same code on two
/// pages) is kept once.
pub fn decode_qr_codes(decoder: &dyn QrDecoder, images: &[PathBuf]) -> Vec<String> {
    let mut payloads: Vec<String> = Vec::new();
    for path in images {
        match decode_file(decoder, path) {
            Ok(Some(payload)) => {
                debug!("QR found in {}", path.display());
                if !payloads.contains(&payload) {
                    payloads.push(payload);
                }
            }
            Ok(None) => debug!("No QR in {}", path.display()),
            Err(e) => warn!("{}", e),
        }
    }
    info!("Decoded {} QR payload(s) from {} image(s)", payloads.len(), images.len());
    payloads
}

static RE_PAGE_IMAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"_page_(\d+)_image_(\d+)\.[A-Za-z]+$").unwrap());

/// Sort key: `(page, image)` for extracted images, numeric; other names after.
fn scan_order(path: &Path) -> (u8, u64, u64, String) {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match RE_PAGE_IMAGE.captures(&name) {
        Some(caps) => (
            0,
            caps[1].parse().unwrap_or(u64::MAX),
            caps[2].parse().unwrap_or(u64::MAX),
            name,
        ),
        None => (1, 0, 0, name),
    }
}

/// All `.png` files directly inside `dir`, in page then image order.
pub fn png_files_in(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case("png"))
        })
        .collect();
    files.sort_by_cached_key(|p| scan_order(p));
    Ok(files)
}
