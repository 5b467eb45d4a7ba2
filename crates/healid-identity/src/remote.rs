//! Remote clinical-record service (FHIR `Patient` resources).
//!
//! Only two operations matter to identity resolution: existence lookup
//! and creation. The service is best-effort: callers treat any failure
//! as "not found" for that attempt.

use crate::error::IdentityError;
use crate::patient::PatientId;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const HOSPITAL_EXTENSION_BASE: &str = "http://hospital.org";

/// What the remote service knows about an existing patient.
#[derive(Debug, Clone, PartialEq)]
pub struct RemotePatient {
    pub id: PatientId,
    /// Display name, if the record carries one.
    pub name: Option<String>,
}

/// Demographics for a patient to be created remotely.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPatient {
    pub name: Option<String>,
    pub city: Option<String>,
    pub gender: Option<String>,
    pub birth_date: Option<String>,
    pub blood_type: Option<String>,
    pub pregnancy_status: Option<String>,
    pub allergies: Option<String>,
    pub medications: Option<String>,
    pub diagnosis: Option<String>,
}

pub trait RemoteRecords: Send + Sync {
    /// `Ok(None)` when the service answers that the patient does not exist.
    fn get_patient(&self, id: PatientId) -> Result<Option<RemotePatient>, IdentityError>;

    /// Create a patient and return the id the service assigned.
    fn create_patient(&self, patient: &NewPatient) -> Result<PatientId, IdentityError>;
}

/// Blocking FHIR client with per-operation timeouts.
pub struct FhirClient {
    base_url: String,
    client: reqwest::blocking::Client,
    lookup_timeout: Duration,
    create_timeout: Duration,
}

impl FhirClient {
    pub fn new(base_url: &str, lookup_timeout: Duration, create_timeout: Duration) -> Self {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(lookup_timeout)
            .build()
            .unwrap_or_else(|err| {
                tracing::warn!("failed to build FHIR HTTP client: {err}");
                reqwest::blocking::Client::new()
            });

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            lookup_timeout,
            create_timeout,
        }
    }

    fn patient_url(&self) -> String {
        format!("{}/Patient", self.base_url)
    }
}

impl RemoteRecords for FhirClient {
    fn get_patient(&self, id: PatientId) -> Result<Option<RemotePatient>, IdentityError> {
        let response = self
            .client
            .get(format!("{}/{id}", self.patient_url()))
            .timeout(self.lookup_timeout)
            .send()?;

        match response.status() {
            StatusCode::OK => {
                let body: Value = response.json()?;
                Ok(Some(RemotePatient {
                    id,
                    name: extract_patient_name(&body),
                }))
            }
            StatusCode::NOT_FOUND | StatusCode::GONE => Ok(None),
            status => Err(IdentityError::RemoteUnavailable(format!(
                "GET Patient/{id} returned {status}"
            ))),
        }
    }

    fn create_patient(&self, patient: &NewPatient) -> Result<PatientId, IdentityError> {
        let response = self
            .client
            .post(self.patient_url())
            .json(&patient_resource(patient))
            .timeout(self.create_timeout)
            .send()?;

        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::CREATED {
            let detail = response.text().unwrap_or_default();
            return Err(IdentityError::RemoteUnavailable(format!(
                "POST Patient returned {status}: {detail}"
            )));
        }

        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body: Option<Value> = response.json().ok();

        let id = created_patient_id(location.as_deref(), body.as_ref()).ok_or_else(|| {
            IdentityError::RemoteUnavailable("created patient has no usable id".into())
        })?;
        tracing::info!(patient = %id, "created remote patient record");
        Ok(id)
    }
}

/// Stand-in used when no remote service is configured: nothing exists remotely.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineRemote;

impl RemoteRecords for OfflineRemote {
    fn get_patient(&self, _id: PatientId) -> Result<Option<RemotePatient>, IdentityError> {
        Ok(None)
    }

    fn create_patient(&self, _patient: &NewPatient) -> Result<PatientId, IdentityError> {
        Err(IdentityError::RemoteUnavailable(
            "no clinical record service configured".into(),
        ))
    }
}

/// Build the FHIR `Patient` resource for a new registration.
pub fn patient_resource(p: &NewPatient) -> Value {
    let or_unknown = |v: &Option<String>| {
        v.as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or("Unknown")
            .to_string()
    };

    let extensions: Vec<Value> = [
        ("blood-type", &p.blood_type),
        ("pregnancy", &p.pregnancy_status),
        ("allergy-summary", &p.allergies),
        ("medication-summary", &p.medications),
        ("condition-summary", &p.diagnosis),
    ]
    .into_iter()
    .filter_map(|(suffix, value)| {
        let value = value.as_deref().filter(|s| !s.is_empty())?;
        Some(json!({
            "url": format!("{HOSPITAL_EXTENSION_BASE}/{suffix}"),
            "valueString": value,
        }))
    })
    .collect();

    json!({
        "resourceType": "Patient",
        "active": true,
        "name": [{ "use": "official", "family": or_unknown(&p.name), "given": ["NFN"] }],
        "gender": p.gender.as_deref().unwrap_or("unknown"),
        "birthDate": p.birth_date.as_deref().unwrap_or("1900-01-01"),
        "address": [{ "use": "home", "line": ["Unknown"], "city": or_unknown(&p.city) }],
        "telecom": [{ "system": "phone", "value": "000-0000-0000", "use": "mobile" }],
        "extension": extensions,
    })
}

/// Display name of a FHIR `Patient`: `name[0].text`, else `"family given[0]"`.
pub fn extract_patient_name(resource: &Value) -> Option<String> {
    let name = resource.get("name")?.get(0)?;

    if let Some(text) = name.get("text").and_then(Value::as_str).filter(|s| !s.is_empty()) {
        return Some(text.to_string());
    }

    let family = name.get("family").and_then(Value::as_str).unwrap_or("");
    let given = name
        .get("given")
        .and_then(|g| g.get(0))
        .and_then(Value::as_str)
        .unwrap_or("");
    let full = format!("{family} {given}").trim().to_string();
    (!full.is_empty()).then_some(full)
}

/// Id assigned by the server: `.../Patient/<id>[/_history/..]` in the
/// `Location` header, else the body's `id`.
fn created_patient_id(location: Option<&str>, body: Option<&Value>) -> Option<PatientId> {
    let from_location = location
        .and_then(|loc| loc.rsplit_once("Patient/"))
        .and_then(|(_, rest)| rest.split('/').next())
        .and_then(|raw| raw.parse().ok());

    from_location.or_else(|| {
        body?
            .get("id")
            .and_then(|v| match v {
                Value::String(s) => s.parse().ok(),
                Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()).map(PatientId::new),
                _ => None,
            })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_prefers_text() {
        let r = json!({ "name": [{ "text": "Kim Minji", "family": "Kim", "given": ["M"] }] });
        assert_eq!(extract_patient_name(&r).as_deref(), Some("Kim Minji"));
    }

    #[test]
    fn test_name_from_family_and_given() {
        let r = json!({ "name": [{ "family": "Park", "given": ["Jisoo", "X"] }] });
        assert_eq!(extract_patient_name(&r).as_deref(), Some("Park Jisoo"));

        let family_only = json!({ "name": [{ "family": "Lee" }] });
        assert_eq!(extract_patient_name(&family_only).as_deref(), Some("Lee"));
    }

    #[test]
    fn test_name_missing() {
        assert_eq!(extract_patient_name(&json!({})), None);
        assert_eq!(extract_patient_name(&json!({ "name": [] })), None);
        assert_eq!(extract_patient_name(&json!({ "name": [{}] })), None);
    }

    #[test]
    fn test_created_id_from_location() {
        let loc = "http://fhir.example/Patient/1234/_history/1";
        assert_eq!(created_patient_id(Some(loc), None), Some(PatientId::new(1234)));
    }

    #[test]
    fn test_created_id_falls_back_to_body() {
        let body = json!({ "resourceType": "Patient", "id": "88" });
        assert_eq!(created_patient_id(Some(""), Some(&body)), Some(PatientId::new(88)));
        assert_eq!(created_patient_id(None, Some(&json!({ "id": 9 }))), Some(PatientId::new(9)));
        assert_eq!(created_patient_id(None, Some(&json!({ "id": "abc" }))), None);
    }

    #[test]
    fn test_resource_extensions_skip_empty() {
        let p = NewPatient {
            name: Some("Choi".into()),
            blood_type: Some("A+".into()),
            allergies: Some(String::new()),
            ..Default::default()
        };
        let r = patient_resource(&p);
        assert_eq!(r["name"][0]["family"], "Choi");
        assert_eq!(r["address"][0]["city"], "Unknown");
        assert_eq!(r["gender"], "unknown");
        let ext = r["extension"].as_array().unwrap();
        assert_eq!(ext.len(), 1);
        assert_eq!(ext[0]["url"], "http://hospital.org/blood-type");
        assert_eq!(ext[0]["valueString"], "A+");
    }

    #[test]
    fn test_new_patient_accepts_camel_case() {
        let p: NewPatient =
            serde_json::from_str(r#"{"name":"Han","birthDate":"1990-02-03","pregnancyStatus":"no"}"#)
                .unwrap();
        assert_eq!(p.birth_date.as_deref(), Some("1990-02-03"));
        assert_eq!(p.pregnancy_status.as_deref(), Some("no"));
    }

    #[test]
    fn test_offline_remote() {
        assert_eq!(OfflineRemote.get_patient(PatientId::new(1)).unwrap(), None);
        assert!(OfflineRemote.create_patient(&NewPatient::default()).is_err());
    }
}
