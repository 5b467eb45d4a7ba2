//! Model training engine: full rebuild of the recognition model from every
//! stored face sample.
//!
//! There is no incremental path. A patient's samples disappearing only
//! leaves the model when the whole artifact is rebuilt.

use crate::artifact::{ArtifactFile, ModelArtifact, ModelSlot};
use crate::clock::Clock;
use crate::error::IdentityError;
use crate::patient::PatientId;
use crate::samples::FaceSamples;
use crate::store::RecordStore;
use healid_core::{Label, Recognizer};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

/// Outcome of a successful training run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingReport {
    pub samples: usize,
    /// Patients that received a label, ascending.
    pub patients: Vec<PatientId>,
    pub skipped_samples: usize,
}

impl fmt::Display for TrainingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "trained on {} samples from {} patients",
            self.samples,
            self.patients.len()
        )
    }
}

pub struct Trainer {
    store: Arc<dyn RecordStore>,
    samples: Arc<FaceSamples>,
    recognizer: Arc<dyn Recognizer>,
    artifact_file: ArtifactFile,
    slot: Arc<ModelSlot>,
    clock: Arc<dyn Clock>,
    in_flight: Mutex<()>,
}

impl Trainer {
    pub fn new(
        store: Arc<dyn RecordStore>,
        samples: Arc<FaceSamples>,
        recognizer: Arc<dyn Recognizer>,
        artifact_file: ArtifactFile,
        slot: Arc<ModelSlot>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            samples,
            recognizer,
            artifact_file,
            slot,
            clock,
            in_flight: Mutex::new(()),
        }
    }

    pub fn artifact_file(&self) -> &ArtifactFile {
        &self.artifact_file
    }

    /// Wait for any running training to finish and keep new runs out
    /// while the guard is held.
    pub fn exclusive(&self) -> MutexGuard<'_, ()> {
        self.in_flight
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Publish the artifact file's model, if there is one. A missing or
    /// damaged file leaves the slot empty until the next training run.
    pub fn load_persisted(&self) -> bool {
        match self.artifact_file.load(self.recognizer.as_ref()) {
            Ok(Some(model)) => {
                tracing::info!(
                    path = %self.artifact_file.path().display(),
                    labels = model.labels().len(),
                    "loaded persisted model"
                );
                self.slot.publish(Arc::new(ModelArtifact {
                    model,
                    sample_count: None,
                    built_at: self.clock.now(),
                }));
                true
            }
            Ok(None) => {
                tracing::info!("no persisted model, training required");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "persisted model unusable, training required");
                false
            }
        }
    }

    /// Rebuild the model from all stored samples.
    ///
    /// Labels are reassigned from scratch: only patients with at least one
    /// readable sample keep one. On failure the published model and the
    /// stored labels are left as they were.
    pub fn train(&self) -> Result<TrainingReport, IdentityError> {
        let _guard = match self.in_flight.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return Err(IdentityError::TrainingInProgress),
        };

        let records = self.store.list_records()?;
        tracing::info!(records = records.len(), "scanning face samples for training");

        let mut faces = Vec::new();
        let mut labels: Vec<Label> = Vec::new();
        let mut trained = Vec::new();
        let mut skipped = 0;

        for record in &records {
            let paths = match self.samples.list_samples(record.id) {
                Ok(paths) => paths,
                Err(e) => {
                    tracing::warn!(patient = %record.id, error = %e, "cannot list samples");
                    continue;
                }
            };

            let before = faces.len();
            for path in paths {
                match FaceSamples::load_sample(&path) {
                    Ok(face) => {
                        faces.push(face);
                        labels.push(record.id.label());
                    }
                    Err(e) => {
                        skipped += 1;
                        tracing::warn!(error = %e, "skipping unreadable face sample");
                    }
                }
            }

            let usable = faces.len() - before;
            if usable > 0 {
                trained.push(record.id);
            }
            tracing::debug!(patient = %record.id, usable, "samples gathered");
        }

        if faces.is_empty() {
            tracing::warn!(skipped, "training aborted: no valid training data");
            return Err(IdentityError::NoTrainingData);
        }

        let model = self.recognizer.train(&faces, &labels)?;

        // The file on disk and the label map change together or not at all
        let staged = self.artifact_file.stage(model.as_ref())?;
        self.store.replace_labels(&trained)?;
        if let Err(e) = staged.commit() {
            let previous: Vec<PatientId> = records
                .iter()
                .filter(|r| r.label.is_some())
                .map(|r| r.id)
                .collect();
            if let Err(restore) = self.store.replace_labels(&previous) {
                tracing::error!(error = %restore, "failed to restore previous labels");
            }
            return Err(e);
        }
        self.slot.publish(Arc::new(ModelArtifact {
            model,
            sample_count: Some(faces.len()),
            built_at: self.clock.now(),
        }));

        let report = TrainingReport {
            samples: faces.len(),
            patients: trained,
            skipped_samples: skipped,
        };
        tracing::info!(
            samples = report.samples,
            patients = report.patients.len(),
            skipped,
            "model training complete"
        );
        Ok(report)
    }
}
