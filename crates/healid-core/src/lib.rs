//! healid-core: Face localization and recognition capabilities.
//!
//! Detection (SCRFD via ONNX Runtime) and recognition (LBPH histograms)
//! sit behind the [`FaceDetector`] and [`Recognizer`] traits so the
//! identity subsystem can swap them for fakes or other algorithms.

pub mod detector;
pub mod lbph;
pub mod locate;
pub mod recognizer;
pub mod types;

pub use detector::{DetectorError, FaceDetector, ScrfdDetector};
pub use lbph::{LbphParams, LbphRecognizer};
pub use locate::{FaceLocator, Localized};
pub use recognizer::{Recognizer, RecognitionError, TrainedModel};
pub use types::{BoundingBox, Label, Prediction};

/// Grayscale image type shared by every capability.
pub use image::GrayImage;
