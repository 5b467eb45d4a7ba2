//! Face localization: decode, detect, crop the largest face.

use crate::detector::FaceDetector;
use crate::types::BoundingBox;
use image::{imageops, GrayImage};
use std::sync::Mutex;

/// Output of [`FaceLocator::detect_and_crop`].
#[derive(Debug, Default)]
pub struct Localized {
    /// Crop of the largest detected face.
    pub face: Option<GrayImage>,
    /// The full decoded grayscale frame.
    pub frame: Option<GrayImage>,
}

/// Shares one detector between threads and turns raw image bytes into face crops.
pub struct FaceLocator {
    detector: Mutex<Box<dyn FaceDetector>>,
}

impl FaceLocator {
    pub fn new(detector: Box<dyn FaceDetector>) -> Self {
        Self {
            detector: Mutex::new(detector),
        }
    }

    /// Decode `bytes` to grayscale and crop the largest detected face.
    ///
    /// Undecodable input yields neither image. Detector failures are
    /// logged and treated as "no face".
    pub fn detect_and_crop(&self, bytes: &[u8]) -> Localized {
        let frame = match image::load_from_memory(bytes) {
            Ok(img) => img.to_luma8(),
            Err(e) => {
                tracing::debug!(error = %e, len = bytes.len(), "image decode failed");
                return Localized::default();
            }
        };

        let candidates = {
            let mut detector = self
                .detector
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            detector.detect(&frame)
        };

        let candidates = match candidates {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "face detection failed");
                Vec::new()
            }
        };

        let face = largest(&candidates)
            .and_then(|b| b.clamp_to(frame.width(), frame.height()))
            .map(|(x, y, w, h)| imageops::crop_imm(&frame, x, y, w, h).to_image());

        tracing::debug!(
            candidates = candidates.len(),
            found = face.is_some(),
            "face localization"
        );

        Localized {
            face,
            frame: Some(frame),
        }
    }
}

/// Largest candidate by area; the first one wins ties.
fn largest(candidates: &[BoundingBox]) -> Option<&BoundingBox> {
    candidates.iter().fold(None, |best: Option<&BoundingBox>, b| match best {
        Some(cur) if cur.area() >= b.area() => Some(cur),
        _ => Some(b),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::DetectorError;
    use image::{ImageFormat, Luma};
    use std::io::Cursor;

    struct FixedDetector(Vec<BoundingBox>);

    impl FaceDetector for FixedDetector {
        fn detect(&mut self, _image: &GrayImage) -> Result<Vec<BoundingBox>, DetectorError> {
            Ok(self.0.clone())
        }
    }

    struct BrokenDetector;

    impl FaceDetector for BrokenDetector {
        fn detect(&mut self, _image: &GrayImage) -> Result<Vec<BoundingBox>, DetectorError> {
            Err(DetectorError::InferenceFailed("boom".into()))
        }
    }

    fn bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: 0.9 }
    }

    fn png(img: &GrayImage) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    /// 120x80 frame whose pixel value encodes its x coordinate.
    fn frame_bytes() -> Vec<u8> {
        png(&GrayImage::from_fn(120, 80, |x, _| Luma([x as u8])))
    }

    #[test]
    fn test_picks_larger_of_two_faces() {
        let locator = FaceLocator::new(Box::new(FixedDetector(vec![
            bbox(0.0, 0.0, 20.0, 20.0),
            bbox(50.0, 10.0, 40.0, 30.0),
        ])));

        let out = locator.detect_and_crop(&frame_bytes());
        let face = out.face.expect("face");
        assert_eq!(face.dimensions(), (40, 30));
        // Left edge of the crop comes from x = 50 in the frame
        assert_eq!(face.get_pixel(0, 0)[0], 50);
        assert_eq!(out.frame.map(|f| f.dimensions()), Some((120, 80)));
    }

    #[test]
    fn test_tie_keeps_first() {
        let boxes = vec![bbox(0.0, 0.0, 10.0, 10.0), bbox(30.0, 0.0, 10.0, 10.0)];
        assert_eq!(largest(&boxes).map(|b| b.x), Some(0.0));
    }

    #[test]
    fn test_no_face_returns_frame_only() {
        let locator = FaceLocator::new(Box::new(FixedDetector(Vec::new())));
        let out = locator.detect_and_crop(&frame_bytes());
        assert!(out.face.is_none());
        assert!(out.frame.is_some());
    }

    #[test]
    fn test_undecodable_returns_nothing() {
        let locator = FaceLocator::new(Box::new(FixedDetector(vec![bbox(0.0, 0.0, 5.0, 5.0)])));
        let out = locator.detect_and_crop(b"definitely not an image");
        assert!(out.face.is_none());
        assert!(out.frame.is_none());
    }

    #[test]
    fn test_detector_error_is_no_face() {
        let locator = FaceLocator::new(Box::new(BrokenDetector));
        let out = locator.detect_and_crop(&frame_bytes());
        assert!(out.face.is_none());
        assert!(out.frame.is_some());
    }
}
