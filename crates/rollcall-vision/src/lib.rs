//! rollcall-vision — Face detection and recognition for attendance photos.
//!
//! Uses SCRFD for face detection and ArcFace for embedding extraction, both
//! running via ONNX Runtime for CPU inference. [`FaceVision`] bundles the two
//! sessions behind the pair of capabilities the attendance service consumes:
//! photo screening and best-match search over an enrolled gallery snapshot.

pub mod alignment;
pub mod detector;
pub mod recognizer;
pub mod types;

use std::path::{Path, PathBuf};

use image::RgbImage;
use thiserror::Error;

use detector::{DetectorError, FaceDetector};
use recognizer::{EmbedderError, FaceEmbedder};
pub use types::{
    BestMatch, BoundingBox, DetectionReport, DistanceMatcher, DistanceMetric, Embedding,
    GalleryEntry, GalleryMatcher,
};

pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
pub const EMBEDDER_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("could not decode photo: {0}")]
    Decode(String),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("embedder error: {0}")]
    Embedder(#[from] EmbedderError),
    #[error("no face detected in photo")]
    NoFaceDetected,
}

/// Default location for the ONNX model files.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall/models")
}

/// Both recognition sessions plus the gallery matcher.
///
/// Sessions hold mutable ONNX state, so a `FaceVision` lives on a single
/// owning thread; the daemon fronts it with a request channel.
pub struct FaceVision {
    detector: FaceDetector,
    embedder: FaceEmbedder,
    matcher: DistanceMatcher,
}

impl FaceVision {
    /// Load both models from `model_dir`.
    pub fn load(model_dir: &Path, metric: DistanceMetric) -> Result<Self, VisionError> {
        let detector_path = model_dir.join(DETECTOR_MODEL_FILE);
        let embedder_path = model_dir.join(EMBEDDER_MODEL_FILE);

        let detector = FaceDetector::load(&detector_path.to_string_lossy())?;
        let embedder = FaceEmbedder::load(&embedder_path.to_string_lossy())?;

        Ok(Self {
            detector,
            embedder,
            matcher: DistanceMatcher { metric },
        })
    }

    /// Decode a photo and report how many faces it contains and how clear
    /// the best one is. Never fails for "no face" — that is a report, not an
    /// error — but undecodable bytes are.
    pub fn detect_and_verify(&mut self, photo: &[u8]) -> Result<DetectionReport, VisionError> {
        let img = decode_photo(photo)?;
        let faces = self.detector.detect(&img)?;

        Ok(DetectionReport {
            face_count: faces.len(),
            confidence: faces.first().map(|f| f.confidence).unwrap_or(0.0),
            width: img.width(),
            height: img.height(),
        })
    }

    /// Extract the embedding of the best (highest-confidence) face in a photo.
    /// Used at enroll time; fails when no face is present.
    pub fn extract_embedding(&mut self, photo: &[u8]) -> Result<Embedding, VisionError> {
        let img = decode_photo(photo)?;
        let faces = self.detector.detect(&img)?;
        let face = faces.first().ok_or(VisionError::NoFaceDetected)?;
        Ok(self.embedder.extract(&img, face)?)
    }

    /// Find the gallery entry closest to the face in `photo`.
    ///
    /// Returns `None` for an empty gallery or when no face is detectable.
    /// The returned distance is raw; callers apply their own threshold.
    pub fn find_best_match(
        &mut self,
        photo: &[u8],
        gallery: &[GalleryEntry],
    ) -> Result<Option<BestMatch>, VisionError> {
        if gallery.is_empty() {
            return Ok(None);
        }

        let img = decode_photo(photo)?;
        let faces = self.detector.detect(&img)?;
        let Some(face) = faces.first() else {
            return Ok(None);
        };

        let probe = self.embedder.extract(&img, face)?;
        Ok(self.matcher.best_match(&probe, gallery))
    }
}

fn decode_photo(bytes: &[u8]) -> Result<RgbImage, VisionError> {
    let img = image::load_from_memory(bytes).map_err(|e| VisionError::Decode(e.to_string()))?;
    Ok(img.to_rgb8())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_photo_rejects_garbage() {
        let err = decode_photo(b"definitely not an image").unwrap_err();
        assert!(matches!(err, VisionError::Decode(_)));
    }

    #[test]
    fn test_decode_photo_accepts_png() {
        let img = image::RgbImage::from_pixel(4, 4, image::Rgb([10, 20, 30]));
        let mut bytes = Vec::new();
        img.write_to(
            &mut std::io::Cursor::new(&mut bytes),
            image::ImageFormat::Png,
        )
        .unwrap();

        let decoded = decode_photo(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (4, 4));
        assert_eq!(decoded.get_pixel(0, 0).0, [10, 20, 30]);
    }
}
