//! Face sample repository: cropped grayscale faces on disk as `<id>_<seq>.png`.
//!
//! Sequence numbers come from the per-patient counter in the record
//! store, so concurrent appends for one patient never collide.

use crate::clock::Clock;
use crate::error::IdentityError;
use crate::patient::PatientId;
use crate::store::RecordStore;
use image::{GrayImage, ImageFormat};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Extensions accepted when listing; new samples are always PNG.
const SAMPLE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

pub struct FaceSamples {
    dir: PathBuf,
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
}

impl FaceSamples {
    pub fn open(dir: &Path, store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>) -> Result<Self, IdentityError> {
        std::fs::create_dir_all(dir).map_err(|source| IdentityError::SampleIo {
            path: dir.to_path_buf(),
            source,
        })?;
        Ok(Self {
            dir: dir.to_path_buf(),
            store,
            clock,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Store a new face sample for `id` and return its path.
    pub fn append_sample(&self, id: PatientId, face: &GrayImage) -> Result<PathBuf, IdentityError> {
        let path = loop {
            let seq = self.store.allocate_sample_seq(id, self.clock.now())?;
            let candidate = self.dir.join(format!("{id}_{seq}.png"));
            if !candidate.exists() {
                break candidate;
            }
            tracing::warn!(path = %candidate.display(), "sample slot already taken, skipping");
        };

        face.save_with_format(&path, ImageFormat::Png)
            .map_err(|source| IdentityError::SampleImage {
                path: path.clone(),
                source,
            })?;

        tracing::info!(patient = %id, path = %path.display(), "face sample stored");
        Ok(path)
    }

    /// Every sample for `id`, ordered by sequence number.
    pub fn list_samples(&self, id: PatientId) -> Result<Vec<PathBuf>, IdentityError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(IdentityError::SampleIo {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        let mut samples: Vec<(u32, PathBuf)> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter_map(|path| match parse_sample_name(&path) {
                Some((owner, seq)) if owner == id => Some((seq, path)),
                _ => None,
            })
            .collect();

        samples.sort_by_key(|(seq, _)| *seq);
        Ok(samples.into_iter().map(|(_, path)| path).collect())
    }

    /// Remove every sample for `id`. Individual failures are logged and skipped.
    pub fn delete_all_samples(&self, id: PatientId) -> Result<usize, IdentityError> {
        let mut deleted = 0;
        for path in self.list_samples(id)? {
            match std::fs::remove_file(&path) {
                Ok(()) => deleted += 1,
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to delete face sample"),
            }
        }
        tracing::info!(patient = %id, deleted, "face samples deleted");
        Ok(deleted)
    }

    /// Decode a stored sample as grayscale.
    pub fn load_sample(path: &Path) -> Result<GrayImage, IdentityError> {
        image::open(path)
            .map(|img| img.to_luma8())
            .map_err(|source| IdentityError::SampleImage {
                path: path.to_path_buf(),
                source,
            })
    }
}

/// `(patient, seq)` from a file named `<patient>_<seq>.<ext>`.
fn parse_sample_name(path: &Path) -> Option<(PatientId, u32)> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    if !SAMPLE_EXTENSIONS.contains(&ext.as_str()) {
        return None;
    }
    let (owner, seq) = path.file_stem()?.to_str()?.split_once('_')?;
    if !owner.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((owner.parse().ok()?, seq.parse().ok()?))
}
