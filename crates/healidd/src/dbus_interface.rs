use crate::engine::{EngineError, EngineHandle, IdentifyResult};
use healid_identity::{IdentityError, NewPatient, PatientId};
use serde_json::json;
use zbus::interface;

pub const BUS_NAME: &str = "org.healid.Identity1";
pub const OBJECT_PATH: &str = "/org/healid/Identity1";

/// D-Bus interface for the HealID identity daemon.
///
/// Bus name: org.healid.Identity1
/// Object path: /org/healid/Identity1
///
/// Every method replies with a JSON document.
pub struct IdentityService {
    engine: EngineHandle,
}

impl IdentityService {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }
}

#[interface(name = "org.healid.Identity1")]
impl IdentityService {
    /// Whether the patient exists locally or remotely, with the display
    /// name when the record service knows it.
    async fn check_patient(&self, patient_id: &str) -> zbus::fdo::Result<String> {
        let id = parse_id(patient_id)?;
        let check = self.engine.check(id).await.map_err(to_fdo)?;
        tracing::info!(
            patient = %id,
            exists = check.resolution.exists,
            named = check.name.is_some(),
            "check_patient"
        );
        to_json(&check)
    }

    async fn register_patient(&self, patient_id: &str) -> zbus::fdo::Result<String> {
        let id = parse_id(patient_id)?;
        let reg = self.engine.register(id).await.map_err(to_fdo)?;
        to_json(&reg)
    }

    /// Create a patient on the remote record service from camelCase JSON
    /// demographics and register the assigned id.
    async fn create_patient(&self, demographics: &str) -> zbus::fdo::Result<String> {
        let patient: NewPatient = serde_json::from_str(demographics)
            .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("demographics: {e}")))?;
        let reg = self.engine.create(patient).await.map_err(to_fdo)?;
        tracing::info!(patient = %reg.id, "create_patient");
        to_json(&reg)
    }

    /// Store the largest face in `image` as a new sample for the patient.
    async fn enroll_face(&self, patient_id: &str, image: Vec<u8>) -> zbus::fdo::Result<String> {
        let id = parse_id(patient_id)?;
        let sample = self.engine.enroll(id, image).await.map_err(to_fdo)?;
        Ok(json!({ "patient": id, "sample": sample.display().to_string() }).to_string())
    }

    async fn train(&self) -> zbus::fdo::Result<String> {
        let report = self.engine.train().await.map_err(to_fdo)?;
        to_json(&report)
    }

    async fn identify(&self, image: Vec<u8>) -> zbus::fdo::Result<String> {
        let result = self.engine.identify(image).await.map_err(to_fdo)?;
        Ok(identify_reply(&result).to_string())
    }

    async fn list_samples(&self, patient_id: &str) -> zbus::fdo::Result<String> {
        let id = parse_id(patient_id)?;
        let paths = self.engine.samples(id).await.map_err(to_fdo)?;
        let paths: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
        Ok(json!(paths).to_string())
    }

    /// Delete the patient and every sample; the model must be retrained.
    async fn purge_patient(&self, patient_id: &str) -> zbus::fdo::Result<String> {
        let id = parse_id(patient_id)?;
        let report = self.engine.purge(id).await.map_err(to_fdo)?;
        to_json(&report)
    }

    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.engine.status().await.map_err(to_fdo)?;
        Ok(json!({
            "version": env!("CARGO_PKG_VERSION"),
            "identity": status,
        })
        .to_string())
    }
}

fn parse_id(raw: &str) -> zbus::fdo::Result<PatientId> {
    raw.parse()
        .map_err(|e: IdentityError| zbus::fdo::Error::InvalidArgs(e.to_string()))
}

fn to_json<T: serde::Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

fn to_fdo(e: EngineError) -> zbus::fdo::Error {
    tracing::warn!(error = %e, "request failed");
    match e {
        EngineError::Identity(
            IdentityError::InvalidPatientId(_)
            | IdentityError::DecodeFailure
            | IdentityError::NoFaceDetected,
        ) => zbus::fdo::Error::InvalidArgs(e.to_string()),
        EngineError::Identity(IdentityError::TrainingInProgress) => {
            zbus::fdo::Error::LimitsExceeded(e.to_string())
        }
        _ => zbus::fdo::Error::Failed(e.to_string()),
    }
}

/// The outcome plus a human-readable `message` ("Low Confidence", the id, ...).
fn identify_reply(result: &IdentifyResult) -> serde_json::Value {
    let mut reply = json!(result.outcome);
    if let Some(obj) = reply.as_object_mut() {
        obj.insert("message".into(), json!(result.outcome.to_string()));
        if let Some(name) = &result.name {
            obj.insert("name".into(), json!(name));
        }
    }
    reply
}

#[cfg(test)]
mod tests {
    use super::*;
    use healid_identity::{Identification, PatientCheck, Resolution};

    #[test]
    fn test_check_reply_carries_name() {
        let check = PatientCheck {
            resolution: Resolution {
                exists: true,
                detail: "2026-05-04T08:30:00+00:00".into(),
            },
            name: Some("Ana Ruiz".into()),
        };
        let reply: serde_json::Value = serde_json::from_str(&to_json(&check).unwrap()).unwrap();
        assert_eq!(reply["exists"], true);
        assert_eq!(reply["detail"], "2026-05-04T08:30:00+00:00");
        assert_eq!(reply["name"], "Ana Ruiz");

        let missing = PatientCheck {
            resolution: Resolution { exists: false, detail: "not found".into() },
            name: None,
        };
        let reply: serde_json::Value = serde_json::from_str(&to_json(&missing).unwrap()).unwrap();
        assert_eq!(reply["exists"], false);
        assert!(reply.get("name").is_none());
    }

    #[test]
    fn test_identify_reply_for_match() {
        let reply = identify_reply(&IdentifyResult {
            outcome: Identification::Matched {
                patient: PatientId::new(12),
                distance: 31.5,
                resolved: true,
            },
            name: Some("Ana Ruiz".into()),
        });
        assert_eq!(reply["outcome"], "matched");
        assert_eq!(reply["patient"], 12);
        assert_eq!(reply["message"], "12");
        assert_eq!(reply["name"], "Ana Ruiz");
    }

    #[test]
    fn test_identify_reply_low_confidence() {
        let reply = identify_reply(&IdentifyResult {
            outcome: Identification::LowConfidence { distance: 140.0 },
            name: None,
        });
        assert_eq!(reply["outcome"], "low_confidence");
        assert_eq!(reply["message"], "Low Confidence");
        assert!(reply.get("name").is_none());
    }

    #[test]
    fn test_bad_id_is_invalid_args() {
        assert!(matches!(
            parse_id("12a"),
            Err(zbus::fdo::Error::InvalidArgs(_))
        ));
        assert_eq!(parse_id(" １２ ").unwrap(), PatientId::new(12));
    }

    #[test]
    fn test_error_mapping() {
        let busy = to_fdo(EngineError::Identity(IdentityError::TrainingInProgress));
        assert!(matches!(busy, zbus::fdo::Error::LimitsExceeded(_)));
        let store = to_fdo(EngineError::Identity(IdentityError::StoreUnavailable("locked".into())));
        assert!(matches!(store, zbus::fdo::Error::Failed(_)));
    }
}
