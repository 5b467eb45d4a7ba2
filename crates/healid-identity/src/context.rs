//! The identity context: one owner for every component of the subsystem.
//!
//! Built once per process with [`IdentityContext::open`] and torn down by
//! drop. All operations take `&self` and are safe to call from many
//! threads at once.

use crate::artifact::{ArtifactFile, ModelSlot};
use crate::cache::IdentityCache;
use crate::clock::{Clock, SystemClock};
use crate::config::IdentityConfig;
use crate::error::IdentityError;
use crate::matcher::{Identification, Matcher};
use crate::patient::PatientId;
use crate::remote::{FhirClient, NewPatient, OfflineRemote, RemoteRecords};
use crate::samples::FaceSamples;
use crate::store::{RecordStore, SqliteRecordStore};
use crate::sync::{RecordSync, Registration, Resolution};
use crate::training::{Trainer, TrainingReport};
use chrono::{DateTime, Utc};
use healid_core::{
    DetectorError, FaceDetector, FaceLocator, GrayImage, LbphRecognizer, Recognizer, ScrfdDetector,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// The pluggable capabilities the context is built from.
pub struct Capabilities {
    pub detector: Box<dyn FaceDetector>,
    pub recognizer: Arc<dyn Recognizer>,
    pub remote: Arc<dyn RemoteRecords>,
    pub clock: Arc<dyn Clock>,
}

impl Capabilities {
    /// SCRFD detection, LBPH recognition, the configured FHIR server (or
    /// none) and the system clock.
    pub fn standard(config: &IdentityConfig) -> Result<Self, DetectorError> {
        let detector = ScrfdDetector::load(&config.detector_path())?;
        let remote: Arc<dyn RemoteRecords> = match &config.fhir_url {
            Some(url) => Arc::new(FhirClient::new(
                url,
                Duration::from_secs(config.remote_timeout_secs),
                Duration::from_secs(config.create_timeout_secs),
            )),
            None => {
                tracing::info!("no FHIR server configured, running offline");
                Arc::new(OfflineRemote)
            }
        };
        Ok(Self {
            detector: Box::new(detector),
            recognizer: Arc::new(LbphRecognizer::default()),
            remote,
            clock: Arc::new(SystemClock),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatientCheck {
    #[serde(flatten)]
    pub resolution: Resolution,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Enrollment {
    pub patient: PatientId,
    pub sample: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PurgeReport {
    pub record_removed: bool,
    pub samples_deleted: usize,
    pub artifact_deleted: bool,
    pub model_unloaded: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub patients: usize,
    pub labelled_patients: usize,
    pub cached_entries: usize,
    pub model_loaded: bool,
    pub model_labels: usize,
    pub model_samples: Option<usize>,
    pub model_built_at: Option<DateTime<Utc>>,
    pub match_threshold: f64,
}

pub struct IdentityContext {
    store: Arc<dyn RecordStore>,
    sync: RecordSync,
    samples: Arc<FaceSamples>,
    slot: Arc<ModelSlot>,
    trainer: Trainer,
    matcher: Matcher,
    locator: FaceLocator,
}

impl IdentityContext {
    /// Open the SQLite store named in `config` and build the context on it.
    pub fn open(config: &IdentityConfig, caps: Capabilities) -> Result<Self, IdentityError> {
        let store = Arc::new(SqliteRecordStore::open(&config.database_path())?);
        Self::with_store(config, store, caps)
    }

    /// Build the context around an existing store. A persisted model is
    /// loaded and published if one is present and intact.
    pub fn with_store(
        config: &IdentityConfig,
        store: Arc<dyn RecordStore>,
        caps: Capabilities,
    ) -> Result<Self, IdentityError> {
        let samples = Arc::new(FaceSamples::open(
            &config.faces_path(),
            store.clone(),
            caps.clock.clone(),
        )?);
        let slot = Arc::new(ModelSlot::default());

        let sync = RecordSync::new(
            store.clone(),
            caps.remote,
            IdentityCache::new(config.cache_ttl()),
            caps.clock.clone(),
        );
        let trainer = Trainer::new(
            store.clone(),
            samples.clone(),
            caps.recognizer,
            ArtifactFile::new(config.artifact_path()),
            slot.clone(),
            caps.clock,
        );
        trainer.load_persisted();
        let matcher = Matcher::new(slot.clone(), store.clone(), config.match_threshold);

        tracing::info!(
            faces = %samples.dir().display(),
            model = %trainer.artifact_file().path().display(),
            threshold = config.match_threshold,
            "identity context ready"
        );

        Ok(Self {
            store,
            sync,
            samples,
            slot,
            trainer,
            matcher,
            locator: FaceLocator::new(caps.detector),
        })
    }

    pub fn resolve_existence(&self, id: PatientId) -> Resolution {
        self.sync.resolve_existence(id)
    }

    /// Existence check plus the remote display name when the patient exists.
    pub fn check_patient(&self, id: PatientId) -> PatientCheck {
        let resolution = self.sync.resolve_existence(id);
        let name = if resolution.exists {
            self.sync.patient_name(id)
        } else {
            None
        };
        PatientCheck { resolution, name }
    }

    pub fn register_or_update(&self, id: PatientId) -> Result<Registration, IdentityError> {
        self.sync.register_or_update(id)
    }

    pub fn create_patient(&self, patient: &NewPatient) -> Result<Registration, IdentityError> {
        self.sync.create_patient(patient)
    }

    pub fn patient_name(&self, id: PatientId) -> Option<String> {
        self.sync.patient_name(id)
    }

    /// Register `id`, find the largest face in `image` and store it as a
    /// new sample. The model is not retrained.
    pub fn enroll_face(&self, id: PatientId, image: &[u8]) -> Result<Enrollment, IdentityError> {
        self.register_or_update(id)?;

        let located = self.locator.detect_and_crop(image);
        if located.frame.is_none() {
            return Err(IdentityError::DecodeFailure);
        }
        let face = located.face.ok_or(IdentityError::NoFaceDetected)?;

        let sample = self.samples.append_sample(id, &face)?;
        Ok(Enrollment { patient: id, sample })
    }

    pub fn train(&self) -> Result<TrainingReport, IdentityError> {
        self.trainer.train()
    }

    /// Identify the largest face in an encoded camera frame.
    pub fn identify_frame(&self, image: &[u8]) -> Identification {
        let located = self.locator.detect_and_crop(image);
        match (located.face, located.frame) {
            (Some(face), _) => self.matcher.identify(&face),
            (None, Some(_)) => Identification::NoFace,
            (None, None) => Identification::Undecodable,
        }
    }

    /// Identify an already cropped grayscale face.
    pub fn identify(&self, face: &GrayImage) -> Identification {
        self.matcher.identify(face)
    }

    pub fn list_samples(&self, id: PatientId) -> Result<Vec<PathBuf>, IdentityError> {
        self.samples.list_samples(id)
    }

    /// Remove every trace of `id`: record, cache entry, samples and the
    /// trained model (which still contains the patient's face). The
    /// matcher reports "model not trained" until the next training run.
    ///
    /// A training run already in progress is waited for, so a model built
    /// from the patient's samples cannot be published after the purge.
    pub fn purge_patient(&self, id: PatientId) -> Result<PurgeReport, IdentityError> {
        let _training = self.trainer.exclusive();

        let record_removed = self.store.delete_record(id)?;
        self.sync.forget(id);
        let samples_deleted = self.samples.delete_all_samples(id)?;
        let artifact_deleted = self.trainer.artifact_file().delete()?;
        let model_unloaded = self.slot.clear();

        let report = PurgeReport {
            record_removed,
            samples_deleted,
            artifact_deleted,
            model_unloaded,
        };
        tracing::info!(
            patient = %id,
            record_removed,
            samples_deleted,
            artifact_deleted,
            "patient purged, retraining required"
        );
        Ok(report)
    }

    pub fn status(&self) -> Result<Status, IdentityError> {
        let records = self.store.list_records()?;
        let artifact = self.slot.current();
        Ok(Status {
            patients: records.len(),
            labelled_patients: records.iter().filter(|r| r.label.is_some()).count(),
            cached_entries: self.sync.cache().len(),
            model_loaded: artifact.is_some(),
            model_labels: artifact.as_ref().map_or(0, |a| a.model.labels().len()),
            model_samples: artifact.as_ref().and_then(|a| a.sample_count),
            model_built_at: artifact.as_ref().map(|a| a.built_at),
            match_threshold: self.matcher.threshold(),
        })
    }
}
