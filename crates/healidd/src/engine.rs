use healid_identity::{
    Capabilities, Identification, IdentityConfig, IdentityContext, IdentityError, NewPatient,
    PatientCheck, PatientId, PurgeReport, Registration, Status, TrainingReport,
};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error("detector error: {0}")]
    Detector(#[from] healid_core::DetectorError),
    #[error("engine task failed: {0}")]
    TaskFailed(String),
}

/// A successful identification, with the remote display name when known.
pub struct IdentifyResult {
    pub outcome: Identification,
    pub name: Option<String>,
}

/// Clone-safe handle to the identity context.
///
/// Every operation touches SQLite, the filesystem or the remote record
/// service, so each one runs on tokio's blocking pool.
#[derive(Clone)]
pub struct EngineHandle {
    ctx: Arc<IdentityContext>,
}

impl EngineHandle {
    async fn run<T, F>(&self, op: F) -> Result<T, EngineError>
    where
        F: FnOnce(&IdentityContext) -> T + Send + 'static,
        T: Send + 'static,
    {
        let ctx = self.ctx.clone();
        tokio::task::spawn_blocking(move || op(&ctx))
            .await
            .map_err(|e| EngineError::TaskFailed(e.to_string()))
    }

    pub async fn check(&self, id: PatientId) -> Result<PatientCheck, EngineError> {
        self.run(move |ctx| ctx.check_patient(id)).await
    }

    pub async fn register(&self, id: PatientId) -> Result<Registration, EngineError> {
        Ok(self.run(move |ctx| ctx.register_or_update(id)).await??)
    }

    pub async fn create(&self, patient: NewPatient) -> Result<Registration, EngineError> {
        Ok(self.run(move |ctx| ctx.create_patient(&patient)).await??)
    }

    pub async fn enroll(&self, id: PatientId, image: Vec<u8>) -> Result<PathBuf, EngineError> {
        let enrollment = self.run(move |ctx| ctx.enroll_face(id, &image)).await??;
        Ok(enrollment.sample)
    }

    pub async fn train(&self) -> Result<TrainingReport, EngineError> {
        Ok(self.run(|ctx| ctx.train()).await??)
    }

    pub async fn identify(&self, image: Vec<u8>) -> Result<IdentifyResult, EngineError> {
        self.run(move |ctx| {
            let outcome = ctx.identify_frame(&image);
            let name = outcome.patient().and_then(|id| ctx.patient_name(id));
            IdentifyResult { outcome, name }
        })
        .await
    }

    pub async fn samples(&self, id: PatientId) -> Result<Vec<PathBuf>, EngineError> {
        Ok(self.run(move |ctx| ctx.list_samples(id)).await??)
    }

    pub async fn purge(&self, id: PatientId) -> Result<PurgeReport, EngineError> {
        Ok(self.run(move |ctx| ctx.purge_patient(id)).await??)
    }

    pub async fn status(&self) -> Result<Status, EngineError> {
        Ok(self.run(|ctx| ctx.status()).await??)
    }
}

/// Load the detector, open the record store and restore the persisted
/// model. Fails fast if the detector model or the store is unavailable.
pub async fn spawn_engine(config: IdentityConfig) -> Result<EngineHandle, EngineError> {
    let ctx = tokio::task::spawn_blocking(move || -> Result<_, EngineError> {
        let caps = Capabilities::standard(&config)?;
        tracing::info!(path = %config.detector_path().display(), "SCRFD detector loaded");
        Ok(IdentityContext::open(&config, caps)?)
    })
    .await
    .map_err(|e| EngineError::TaskFailed(e.to_string()))??;

    Ok(EngineHandle { ctx: Arc::new(ctx) })
}
