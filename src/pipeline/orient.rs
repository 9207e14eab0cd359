//! Page orientation.
//!
//! Photos carry their rotation in EXIF, which [`open_upright`] applies while
//! decoding. Scans and rendered PDF pages have no such tag, so every page is
//! also run through an [`OrientationClassifier`] before OCR and table
//! detection.

use crate::error::IngestError;
use image::metadata::Orientation;
use image::{imageops, DynamicImage, ImageDecoder, ImageReader, RgbImage};
use oar_ocr::predictors::DocumentOrientationPredictor;
use std::path::Path;
use tracing::debug;

/// How far the page content is turned clockwise from upright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    None,
    Cw90,
    Cw180,
    Cw270,
}

impl Rotation {
    /// Map the classifier's class id: 0=0°, 1=90°, 2=180°, 3=270°.
    pub fn from_class_id(id: usize) -> Self {
        match id {
            1 => Rotation::Cw90,
            2 => Rotation::Cw180,
            3 => Rotation::Cw270,
            _ => Rotation::None,
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Rotation::None => 0,
            Rotation::Cw90 => 90,
            Rotation::Cw180 => 180,
            Rotation::Cw270 => 270,
        }
    }
}

/// Decides how a page is rotated. Implementations block.
pub trait OrientationClassifier: Send + Sync {
    fn classify(&self, page: &RgbImage) -> Result<Rotation, IngestError>;
}

/// Treats every page as upright.
#[derive(Debug, Default, Clone, Copy)]
pub struct AssumeUpright;

impl OrientationClassifier for AssumeUpright {
    fn classify(&self, _: &RgbImage) -> Result<Rotation, IngestError> {
        Ok(Rotation::None)
    }
}

/// oar-ocr's four-way document orientation model.
pub struct OarOrientationClassifier {
    predictor: DocumentOrientationPredictor,
}

impl std::fmt::Debug for OarOrientationClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OarOrientationClassifier").finish_non_exhaustive()
    }
}

impl OarOrientationClassifier {
    pub fn from_model(path: &Path) -> Result<Self, IngestError> {
        if !path.is_file() {
            return Err(IngestError::ModelLoadFailed {
                path: path.to_path_buf(),
                detail: "file not found".into(),
            });
        }
        let predictor = DocumentOrientationPredictor::builder()
            .topk(1)
            .build(path)
            .map_err(|e| IngestError::ModelLoadFailed {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;
        Ok(Self { predictor })
    }
}

impl OrientationClassifier for OarOrientationClassifier {
    fn classify(&self, page: &RgbImage) -> Result<Rotation, IngestError> {
        let result = self
            .predictor
            .predict(vec![page.clone()])
            .map_err(|e| IngestError::InferenceFailed {
                stage: "orientation",
                detail: e.to_string(),
            })?;
        let rotation = result
            .orientations
            .first()
            .and_then(|classes| classes.first())
            .map_or(Rotation::None, |c| Rotation::from_class_id(c.class_id));
        debug!("Page orientation: {}°", rotation.degrees());
        Ok(rotation)
    }
}

/// Turn `page` back so its content reads upright.
pub fn make_upright(page: RgbImage, rotation: Rotation) -> RgbImage {
    match rotation {
        Rotation::None => page,
        Rotation::Cw90 => imageops::rotate270(&page),
        Rotation::Cw180 => imageops::rotate180(&page),
        Rotation::Cw270 => imageops::rotate90(&page),
    }
}

/// Decode an image file with its EXIF orientation applied.
pub fn open_upright(path: &Path) -> Result<DynamicImage, IngestError> {
    let undecodable = |detail: String| IngestError::UndecodableImage {
        path: path.to_path_buf(),
        detail,
    };

    let mut decoder = ImageReader::open(path)
        .map_err(|e| IngestError::io(path, e))?
        .with_guessed_format()
        .map_err(|e| IngestError::io(path, e))?
        .into_decoder()
        .map_err(|e| undecodable(e.to_string()))?;
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);

    let mut image = DynamicImage::from_decoder(decoder).map_err(|e| undecodable(e.to_string()))?;
    if orientation != Orientation::NoTransforms {
        debug!("Applying EXIF orientation {:?} to {}", orientation, path.display());
        image.apply_orientation(orientation);
    }
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::jpeg::JpegEncoder;
    use image::Rgb;

    const INK: Rgb<u8> = Rgb([0, 0, 0]);

    /// 30×10 page with one dark pixel in the top-left corner.
    fn marked_page() -> RgbImage {
        let mut page = RgbImage::from_pixel(30, 10, Rgb([255, 255, 255]));
        page.put_pixel(0, 0, INK);
        page
    }

    #[test]
    fn class_ids_map_to_quarter_turns() {
        assert_eq!(Rotation::from_class_id(0), Rotation::None);
        assert_eq!(Rotation::from_class_id(1).degrees(), 90);
        assert_eq!(Rotation::from_class_id(3), Rotation::Cw270);
        assert_eq!(Rotation::from_class_id(7), Rotation::None);
    }

    #[test]
    fn every_rotation_is_undone() {
        for (turned, rotation) in [
            (imageops::rotate90(&marked_page()), Rotation::Cw90),
            (imageops::rotate180(&marked_page()), Rotation::Cw180),
            (imageops::rotate270(&marked_page()), Rotation::Cw270),
            (marked_page(), Rotation::None),
        ] {
            let upright = make_upright(turned, rotation);
            assert_eq!(upright.dimensions(), (30, 10), "{rotation:?}");
            assert_eq!(*upright.get_pixel(0, 0), INK, "{rotation:?}");
        }
    }

    /// Insert an EXIF block with only an Orientation tag right after SOI.
    fn with_exif_orientation(jpeg: &[u8], orientation: u8) -> Vec<u8> {
        let mut tiff = vec![b'M', b'M', 0, 42, 0, 0, 0, 8];
        tiff.extend([0, 1]);
        tiff.extend([0x01, 0x12, 0, 3, 0, 0, 0, 1, 0, orientation, 0, 0]);
        tiff.extend([0, 0, 0, 0]);

        let mut payload = b"Exif\0\0".to_vec();
        payload.extend(tiff);
        let len = (payload.len() + 2) as u16;

        let mut out = jpeg[..2].to_vec();
        out.extend([0xFF, 0xE1]);
        out.extend(len.to_be_bytes());
        out.extend(payload);
        out.extend(&jpeg[2..]);
        out
    }

    #[test]
    fn exif_rotation_is_applied_on_open() {
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, 95)
            .encode_image(&RgbImage::from_pixel(40, 20, Rgb([200, 200, 200])))
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("plain.jpg");
        std::fs::write(&plain, &jpeg).unwrap();
        assert_eq!(open_upright(&plain).unwrap().to_rgb8().dimensions(), (40, 20));

        // 6 = displayed after a 90° clockwise turn.
        let sideways = dir.path().join("sideways.jpg");
        std::fs::write(&sideways, with_exif_orientation(&jpeg, 6)).unwrap();
        assert_eq!(open_upright(&sideways).unwrap().to_rgb8().dimensions(), (20, 40));
    }

    #[test]
    fn garbage_is_undecodable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.png");
        std::fs::write(&path, b"\x89PNG but not really").unwrap();
        let err = open_upright(&path).unwrap_err();
        assert!(matches!(err, IngestError::UndecodableImage { .. }));
    }

    #[test]
    fn missing_model_fails_to_load() {
        let err = OarOrientationClassifier::from_model(Path::new("/nonexistent/doc_ori.onnx"))
            .err()
            .expect("no model file");
        assert!(matches!(err, IngestError::ModelLoadFailed { .. }));
        assert!(!err.is_client_error());
    }
}
