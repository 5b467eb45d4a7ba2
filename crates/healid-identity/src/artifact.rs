//! The trained model artifact: the in-memory published instance and its
//! durable file.
//!
//! File layout: 8-byte magic, SHA-256 of the payload, payload (the
//! recognizer's own serialization). Files are written next to the
//! target and renamed into place, so a reader never sees a partial file.

use crate::error::IdentityError;
use chrono::{DateTime, Utc};
use healid_core::{Recognizer, TrainedModel};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

const ARTIFACT_MAGIC: &[u8; 8] = b"HEALID01";
const DIGEST_LEN: usize = 32;

/// A trained model plus what it was built from.
pub struct ModelArtifact {
    pub model: Box<dyn TrainedModel>,
    /// Number of face samples, or `None` when restored from disk.
    pub sample_count: Option<usize>,
    pub built_at: DateTime<Utc>,
}

/// The single published artifact. Readers take a cheap `Arc` snapshot;
/// training swaps in a fully built replacement.
#[derive(Default)]
pub struct ModelSlot {
    current: RwLock<Option<Arc<ModelArtifact>>>,
}

impl ModelSlot {
    pub fn current(&self) -> Option<Arc<ModelArtifact>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn publish(&self, artifact: Arc<ModelArtifact>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(artifact);
    }

    /// Drop the published artifact; returns whether one was loaded.
    pub fn clear(&self) -> bool {
        self.current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }
}

/// Durable location of the artifact.
#[derive(Debug, Clone)]
pub struct ArtifactFile {
    path: PathBuf,
}

impl ArtifactFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    fn error(&self, reason: impl ToString) -> IdentityError {
        IdentityError::Artifact {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }

    /// Write the model atomically (temp file + rename).
    pub fn save(&self, model: &dyn TrainedModel) -> Result<(), IdentityError> {
        self.stage(model)?.commit()
    }

    /// Write the model next to the target without replacing it. The
    /// current file is untouched until [`StagedArtifact::commit`]; dropping
    /// the stage removes the temp file.
    pub fn stage(&self, model: &dyn TrainedModel) -> Result<StagedArtifact, IdentityError> {
        let payload = model.to_bytes();
        let digest = Sha256::digest(&payload);

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| self.error(e))?;
        }

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let staged = StagedArtifact {
            file: self.clone(),
            tmp: PathBuf::from(tmp_name),
            bytes: payload.len(),
            committed: false,
        };

        let write = || -> std::io::Result<()> {
            let mut file = std::fs::File::create(&staged.tmp)?;
            file.write_all(ARTIFACT_MAGIC)?;
            file.write_all(&digest)?;
            file.write_all(&payload)?;
            file.sync_all()
        };
        write().map_err(|e| self.error(e))?;
        Ok(staged)
    }

    /// Read and verify the artifact; `Ok(None)` if there is no file.
    pub fn load(&self, recognizer: &dyn Recognizer) -> Result<Option<Box<dyn TrainedModel>>, IdentityError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.error(e)),
        };

        let header = ARTIFACT_MAGIC.len() + DIGEST_LEN;
        if bytes.len() < header || &bytes[..ARTIFACT_MAGIC.len()] != ARTIFACT_MAGIC {
            return Err(self.error("not a model artifact"));
        }
        let (digest, payload) = bytes[ARTIFACT_MAGIC.len()..].split_at(DIGEST_LEN);
        if Sha256::digest(payload).as_slice() != digest {
            return Err(self.error("checksum mismatch"));
        }

        let model = recognizer.load(payload).map_err(|e| self.error(e))?;
        Ok(Some(model))
    }

    /// Returns whether a file was removed.
    pub fn delete(&self) -> Result<bool, IdentityError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(self.error(e)),
        }
    }
}

/// A fully written artifact waiting to replace the current file.
pub struct StagedArtifact {
    file: ArtifactFile,
    tmp: PathBuf,
    bytes: usize,
    committed: bool,
}

impl StagedArtifact {
    pub fn commit(mut self) -> Result<(), IdentityError> {
        std::fs::rename(&self.tmp, &self.file.path).map_err(|e| self.file.error(e))?;
        self.committed = true;
        tracing::info!(path = %self.file.path.display(), bytes = self.bytes, "model artifact saved");
        Ok(())
    }
}

impl Drop for StagedArtifact {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.tmp);
        }
    }
}
