//! Recognition matcher: confidence-gated prediction against the published model.

use crate::artifact::ModelSlot;
use crate::patient::PatientId;
use crate::store::RecordStore;
use healid_core::GrayImage;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Outcome of an identification attempt. Every failure mode is a value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Identification {
    /// `resolved` is false when the label had no record in the label map
    /// and the raw label was returned as the id.
    Matched {
        patient: PatientId,
        distance: f64,
        resolved: bool,
    },
    LowConfidence { distance: f64 },
    NotTrained,
    NoFace,
    Undecodable,
}

impl Identification {
    pub fn patient(&self) -> Option<PatientId> {
        match self {
            Identification::Matched { patient, .. } => Some(*patient),
            _ => None,
        }
    }
}

impl fmt::Display for Identification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identification::Matched { patient, .. } => write!(f, "{patient}"),
            Identification::LowConfidence { .. } => f.write_str("Low Confidence"),
            Identification::NotTrained => f.write_str("model not trained"),
            Identification::NoFace => f.write_str("no face detected"),
            Identification::Undecodable => f.write_str("image could not be decoded"),
        }
    }
}

pub struct Matcher {
    slot: Arc<ModelSlot>,
    store: Arc<dyn RecordStore>,
    threshold: f64,
}

impl Matcher {
    pub fn new(slot: Arc<ModelSlot>, store: Arc<dyn RecordStore>, threshold: f64) -> Self {
        Self { slot, store, threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Identify a cropped grayscale face. Never fails: missing model,
    /// prediction errors and weak matches all map to an outcome.
    pub fn identify(&self, face: &GrayImage) -> Identification {
        let Some(artifact) = self.slot.current() else {
            return Identification::NotTrained;
        };

        let prediction = match artifact.model.predict(face) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "prediction failed");
                return Identification::NotTrained;
            }
        };

        if prediction.distance >= self.threshold {
            tracing::debug!(
                label = prediction.label,
                distance = prediction.distance,
                threshold = self.threshold,
                "match rejected"
            );
            return Identification::LowConfidence {
                distance: prediction.distance,
            };
        }

        let mapped = match self.store.label_map() {
            Ok(map) => map.get(&prediction.label).copied(),
            Err(e) => {
                tracing::warn!(error = %e, "label map unavailable");
                None
            }
        };

        let (patient, resolved) = match mapped {
            Some(id) => (id, true),
            None => {
                tracing::warn!(label = prediction.label, "label not in record store, using raw label");
                (PatientId::from_label(prediction.label), false)
            }
        };

        tracing::info!(patient = %patient, distance = prediction.distance, "face identified");
        Identification::Matched {
            patient,
            distance: prediction.distance,
            resolved,
        }
    }
}
