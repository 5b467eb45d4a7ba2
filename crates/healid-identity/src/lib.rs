//! healid-identity: Biometric identity resolution for walk-in patients.
//!
//! Keeps a local patient record store in step with a remote clinical
//! record service, stores enrolled face samples, rebuilds the
//! recognition model from them and answers "who is this face".

pub mod artifact;
pub mod cache;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod matcher;
pub mod patient;
pub mod remote;
pub mod samples;
pub mod store;
pub mod sync;
pub mod training;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, IdentityConfig};
pub use context::{Capabilities, Enrollment, IdentityContext, PatientCheck, PurgeReport, Status};
pub use error::IdentityError;
pub use matcher::Identification;
pub use patient::{PatientId, PatientRecord};
pub use remote::{FhirClient, NewPatient, OfflineRemote, RemotePatient, RemoteRecords};
pub use store::{RecordStore, SqliteRecordStore};
pub use sync::{Registration, Resolution};
pub use training::TrainingReport;
