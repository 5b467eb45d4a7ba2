use healid_core::RecognitionError;
use std::path::PathBuf;
use thiserror::Error;

/// Failure of a single identity operation. None of these are fatal to the process.
#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("record store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("remote record service unavailable: {0}")]
    RemoteUnavailable(String),
    #[error("invalid patient id: {0:?}")]
    InvalidPatientId(String),
    #[error("image could not be decoded")]
    DecodeFailure,
    #[error("no face detected")]
    NoFaceDetected,
    #[error("no valid training data")]
    NoTrainingData,
    #[error("model not trained")]
    ModelNotTrained,
    #[error("training already in progress")]
    TrainingInProgress,
    #[error("recognition: {0}")]
    Recognition(#[from] RecognitionError),
    #[error("model artifact {}: {reason}", path.display())]
    Artifact { path: PathBuf, reason: String },
    #[error("face sample {}: {source}", path.display())]
    SampleIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("face sample {}: {source}", path.display())]
    SampleImage {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

impl From<rusqlite::Error> for IdentityError {
    fn from(e: rusqlite::Error) -> Self {
        IdentityError::StoreUnavailable(e.to_string())
    }
}

impl From<reqwest::Error> for IdentityError {
    fn from(e: reqwest::Error) -> Self {
        IdentityError::RemoteUnavailable(e.to_string())
    }
}
