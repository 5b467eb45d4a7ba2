//! Recognition capability: train a matchable model from labeled faces,
//! then ask it which label a probe face belongs to.

use crate::types::{Label, Prediction};
use image::GrayImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecognitionError {
    #[error("no training examples supplied")]
    EmptyTrainingSet,
    #[error("{faces} faces but {labels} labels")]
    LabelCountMismatch { faces: usize, labels: usize },
    #[error("model has not been trained")]
    NotTrained,
    #[error("feature dimension mismatch: model has {expected}, probe has {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("face image too small: {width}x{height}")]
    FaceTooSmall { width: u32, height: u32 },
    #[error("malformed model data: {0}")]
    MalformedModel(String),
}

/// A trained, immutable model that can be shared across threads.
pub trait TrainedModel: Send + Sync {
    /// Closest label for `face` together with its dissimilarity score.
    fn predict(&self, face: &GrayImage) -> Result<Prediction, RecognitionError>;

    /// Distinct labels the model was trained on, ascending.
    fn labels(&self) -> Vec<Label>;

    /// Serialize the model for durable storage.
    fn to_bytes(&self) -> Vec<u8>;
}

/// Training capability. Produces fresh models; never mutates an existing one.
pub trait Recognizer: Send + Sync {
    /// Build a model from `faces[i]` labeled `labels[i]`.
    fn train(
        &self,
        faces: &[GrayImage],
        labels: &[Label],
    ) -> Result<Box<dyn TrainedModel>, RecognitionError>;

    /// Restore a model previously produced by [`TrainedModel::to_bytes`].
    fn load(&self, bytes: &[u8]) -> Result<Box<dyn TrainedModel>, RecognitionError>;
}
