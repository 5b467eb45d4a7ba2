use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Identity subsystem configuration.
///
/// Resolved in three layers: built-in defaults, then the TOML file named
/// by `HEALID_CONFIG` (if set), then `HEALID_*` environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IdentityConfig {
    /// Base directory for everything below that is not set explicitly.
    pub data_dir: PathBuf,
    /// SQLite record store (default: `<data_dir>/patients.db`).
    pub db_path: Option<PathBuf>,
    /// Face sample directory (default: `<data_dir>/faces`).
    pub faces_dir: Option<PathBuf>,
    /// Trained model artifact (default: `<data_dir>/model.bin`).
    pub model_path: Option<PathBuf>,
    /// SCRFD ONNX model (default: `<data_dir>/models/det_10g.onnx`).
    pub detector_model: Option<PathBuf>,
    /// Lifetime of a positive existence answer in the identity cache.
    pub cache_ttl_secs: u64,
    /// A prediction is accepted when its distance is strictly below this.
    pub match_threshold: f64,
    /// Base URL of the FHIR server; unset runs without a remote service.
    pub fhir_url: Option<String>,
    pub remote_timeout_secs: u64,
    pub create_timeout_secs: u64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            db_path: None,
            faces_dir: None,
            model_path: None,
            detector_model: None,
            cache_ttl_secs: 300,
            match_threshold: 100.0,
            fhir_url: None,
            remote_timeout_secs: 3,
            create_timeout_secs: 5,
        }
    }
}

impl IdentityConfig {
    /// Load from the config file and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let base = match std::env::var_os("HEALID_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        Ok(base.with_overrides(|key| std::env::var(key).ok()))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `HEALID_*` overrides read through `lookup`. Values that fail to
    /// parse are ignored with a warning.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let path = |key: &str| lookup(key).filter(|v| !v.is_empty()).map(PathBuf::from);

        if let Some(v) = path("HEALID_DATA_DIR") {
            self.data_dir = v;
        }
        self.db_path = path("HEALID_DB_PATH").or(self.db_path);
        self.faces_dir = path("HEALID_FACES_DIR").or(self.faces_dir);
        self.model_path = path("HEALID_MODEL_PATH").or(self.model_path);
        self.detector_model = path("HEALID_DETECTOR_MODEL").or(self.detector_model);
        self.fhir_url = lookup("HEALID_FHIR_URL")
            .filter(|v| !v.is_empty())
            .or(self.fhir_url);

        self.cache_ttl_secs = parsed(&lookup, "HEALID_CACHE_TTL_SECS", self.cache_ttl_secs);
        self.match_threshold = parsed(&lookup, "HEALID_MATCH_THRESHOLD", self.match_threshold);
        self.remote_timeout_secs =
            parsed(&lookup, "HEALID_REMOTE_TIMEOUT_SECS", self.remote_timeout_secs);
        self.create_timeout_secs =
            parsed(&lookup, "HEALID_CREATE_TIMEOUT_SECS", self.create_timeout_secs);
        self
    }

    pub fn database_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("patients.db"))
    }

    pub fn faces_path(&self) -> PathBuf {
        self.faces_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("faces"))
    }

    pub fn artifact_path(&self) -> PathBuf {
        self.model_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("model.bin"))
    }

    pub fn detector_path(&self) -> PathBuf {
        self.detector_model
            .clone()
            .unwrap_or_else(|| self.data_dir.join("models").join("det_10g.onnx"))
    }

    pub fn cache_ttl(&self) -> chrono::Duration {
        let secs = i64::try_from(self.cache_ttl_secs).unwrap_or(i64::MAX);
        chrono::Duration::seconds(secs.min(i64::MAX / 1000))
    }
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring unparsable config override");
            default
        }),
        None => default,
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("healid")
}
