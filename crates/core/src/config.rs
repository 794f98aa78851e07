//! Configuration for the backup jobs
//!
//! Two layers of configuration exist. The per-invocation [`JobConfig`] is
//! handed over by the orchestrator as a JSON string. The process-wide
//! [`Config`] holds storage credentials and archiver settings and is read
//! from a TOML file, with environment variables taking precedence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Environment variable overriding the configuration directory
pub const CONFIG_DIR_ENV: &str = "BJ_CONFIG_DIR";

const CONFIG_FILE_NAME: &str = "config.toml";
const DEFAULT_ARCHIVE_NAME: &str = "backup";

/// Smallest part size accepted by S3 multipart uploads
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;
const DEFAULT_PART_SIZE: u64 = 8 * 1024 * 1024;

/// Write backend used by the copy job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// Mirror files under a local target root
    #[default]
    Local,
    /// Upload files to the target bucket
    ObjectStore,
}

impl std::str::FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" | "local" => Ok(BackendKind::Local),
            "s3" => Ok(BackendKind::ObjectStore),
            other => Err(Error::Config(format!("unsupported backend '{other}'"))),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Local => write!(f, "local"),
            BackendKind::ObjectStore => write!(f, "s3"),
        }
    }
}

// Absent and `null` fields both fall back to their defaults.
#[derive(Debug, Default, Deserialize)]
struct RawJobConfig {
    #[serde(default)]
    files: Option<Vec<String>>,
    #[serde(default)]
    compression: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    backend: Option<String>,
}

/// Job configuration passed through the `-config` flag
///
/// Immutable once parsed. `compression` and `name` are only read by the
/// tar job, `backend` only by the copy job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobConfig {
    pub files: Vec<PathBuf>,
    pub compression: String,
    pub name: String,
    pub backend: BackendKind,
}

impl JobConfig {
    /// Decode the JSON job configuration
    pub fn parse(json: &str) -> Result<Self> {
        let raw: RawJobConfig = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("parse job configuration: {e}")))?;

        let name = raw
            .name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| DEFAULT_ARCHIVE_NAME.to_string());

        Ok(Self {
            files: raw
                .files
                .unwrap_or_default()
                .into_iter()
                .map(PathBuf::from)
                .collect(),
            compression: raw.compression.unwrap_or_default(),
            name,
            backend: raw.backend.as_deref().unwrap_or_default().parse()?,
        })
    }
}

/// Connection settings for the S3-compatible storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Endpoint URL, e.g. `http://localhost:9000`
    pub endpoint: String,

    pub access_key: String,

    pub secret_key: String,

    #[serde(default = "default_region")]
    pub region: String,

    /// Bucket lookup style: auto, path, or dns
    #[serde(default = "default_bucket_lookup")]
    pub bucket_lookup: String,

    /// Size of each multipart part for streaming uploads, in bytes
    #[serde(default = "default_part_size")]
    pub part_size: u64,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_bucket_lookup() -> String {
    "auto".to_string()
}

fn default_part_size() -> u64 {
    DEFAULT_PART_SIZE
}

impl StorageConfig {
    /// Create storage settings with default region, lookup and part size
    pub fn new(
        endpoint: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            region: default_region(),
            bucket_lookup: default_bucket_lookup(),
            part_size: DEFAULT_PART_SIZE,
        }
    }

    /// Check that the settings can be used to build a client
    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.endpoint)
            .map_err(|e| Error::Config(format!("invalid endpoint '{}': {e}", self.endpoint)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "endpoint '{}' must use http or https",
                self.endpoint
            )));
        }
        if self.access_key.is_empty() || self.secret_key.is_empty() {
            return Err(Error::Config("storage credentials are empty".to_string()));
        }
        if !matches!(self.bucket_lookup.as_str(), "auto" | "path" | "dns") {
            return Err(Error::Config(format!(
                "invalid bucket lookup '{}'",
                self.bucket_lookup
            )));
        }
        Ok(())
    }

    /// Part size clamped to the S3 multipart minimum
    pub fn effective_part_size(&self) -> u64 {
        self.part_size.max(MIN_PART_SIZE)
    }
}

/// Settings for the external archiver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiverSettings {
    #[serde(default = "default_archiver")]
    pub program: String,
}

fn default_archiver() -> String {
    "tar".to_string()
}

impl Default for ArchiverSettings {
    fn default() -> Self {
        Self {
            program: default_archiver(),
        }
    }
}

/// Process-wide configuration file contents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageConfig>,

    #[serde(default)]
    pub archiver: ArchiverSettings,
}

impl Config {
    /// Apply `BJ_S3_*` overrides using the given variable lookup
    ///
    /// Storage settings are created from the environment alone when the
    /// file has none and at least endpoint and both keys are set.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let endpoint = lookup("BJ_S3_ENDPOINT");
        let access_key = lookup("BJ_S3_ACCESS_KEY");
        let secret_key = lookup("BJ_S3_SECRET_KEY");
        let region = lookup("BJ_S3_REGION");

        if self.storage.is_none() {
            if let (Some(e), Some(a), Some(s)) = (&endpoint, &access_key, &secret_key) {
                self.storage = Some(StorageConfig::new(e, a, s));
            } else {
                return;
            }
        }

        if let Some(storage) = self.storage.as_mut() {
            if let Some(e) = endpoint {
                storage.endpoint = e;
            }
            if let Some(a) = access_key {
                storage.access_key = a;
            }
            if let Some(s) = secret_key {
                storage.secret_key = s;
            }
            if let Some(r) = region {
                storage.region = r;
            }
        }
    }

    /// Storage settings, or a configuration error if none are available
    pub fn require_storage(&self) -> Result<&StorageConfig> {
        let storage = self.storage.as_ref().ok_or_else(|| {
            Error::Config(
                "no storage configured; add a [storage] section or set BJ_S3_ENDPOINT".to_string(),
            )
        })?;
        storage.validate()?;
        Ok(storage)
    }
}

/// Locates and loads the configuration file
#[derive(Debug, Clone)]
pub struct ConfigManager {
    path: PathBuf,
}

impl ConfigManager {
    /// Use `$BJ_CONFIG_DIR/config.toml`, or the platform config directory
    pub fn new() -> Result<Self> {
        let dir = match std::env::var_os(CONFIG_DIR_ENV) {
            Some(dir) => PathBuf::from(dir),
            None => dirs::config_dir()
                .ok_or_else(|| Error::Config("cannot determine config directory".to_string()))?
                .join("backup-jobs"),
        };
        Ok(Self::with_path(dir.join(CONFIG_FILE_NAME)))
    }

    /// Use an explicit configuration file
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the file, returning defaults when it does not exist
    pub fn load(&self) -> Result<Config> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "No config file, using defaults");
                return Ok(Config::default());
            }
            Err(e) => {
                return Err(Error::Config(format!(
                    "read '{}': {e}",
                    self.path.display()
                )));
            }
        };

        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("parse '{}': {e}", self.path.display())))
    }

    /// Load the file and apply environment overrides
    pub fn load_with_env(&self) -> Result<Config> {
        let mut config = self.load()?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }
}
