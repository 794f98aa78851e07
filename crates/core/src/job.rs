//! Job-runner contract
//!
//! Each job kind turns a parsed [`JobConfig`] and a target into artifacts.
//! Collaborators (filesystem, object store) are passed in at construction;
//! a job is run once and aborts on the first error.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::archive::{ArchivePipeline, ArchivePlan};
use crate::backend::{LocalMirror, ObjectStoreBackend, WriteBackend};
use crate::config::{BackendKind, JobConfig};
use crate::error::{Error, Result};
use crate::fs::Filesystem;
use crate::traits::ObjectStore;
use crate::traversal::{TransferStats, transfer};

/// The two job kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Copy,
    Tar,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::Copy => write!(f, "copy"),
            JobKind::Tar => write!(f, "tar"),
        }
    }
}

/// Summary of a successful job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobReport {
    pub job: JobKind,
    /// Number of destination artifacts produced
    pub files: u64,
    pub bytes: u64,
}

/// A one-shot backup job
#[async_trait]
pub trait Job: Send + Sync {
    fn kind(&self) -> JobKind;

    /// Run the job against `target`
    async fn run(&self, config: &JobConfig, target: &str) -> Result<JobReport>;
}

/// Recursively copies the configured files to a local root or a bucket
pub struct CopyJob {
    fs: Arc<dyn Filesystem>,
    store: Option<Arc<dyn ObjectStore>>,
}

impl CopyJob {
    pub fn new(fs: Arc<dyn Filesystem>) -> Self {
        Self { fs, store: None }
    }

    /// Object store used when the configuration selects the `s3` backend
    pub fn with_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    fn backend(&self, kind: BackendKind, target: &str) -> Result<Box<dyn WriteBackend>> {
        match kind {
            BackendKind::Local => Ok(Box::new(LocalMirror::new(self.fs.clone(), target))),
            BackendKind::ObjectStore => {
                let store = self.store.clone().ok_or_else(|| {
                    Error::Config("the s3 backend requires a configured object store".to_string())
                })?;
                Ok(Box::new(ObjectStoreBackend::new(self.fs.clone(), store, target)))
            }
        }
    }
}

#[async_trait]
impl Job for CopyJob {
    fn kind(&self) -> JobKind {
        JobKind::Copy
    }

    async fn run(&self, config: &JobConfig, target: &str) -> Result<JobReport> {
        if target.is_empty() {
            return Err(Error::Config("target must not be empty".to_string()));
        }
        let backend = self.backend(config.backend, target)?;
        tracing::info!(
            sources = config.files.len(),
            backend = %config.backend,
            target = %backend.describe(),
            "Starting copy job"
        );

        let mut stats = TransferStats::default();
        for source in &config.files {
            stats += transfer(self.fs.as_ref(), backend.as_ref(), source).await?;
        }

        tracing::info!(files = stats.files, bytes = stats.bytes, "Copy job finished");
        Ok(JobReport {
            job: JobKind::Copy,
            files: stats.files,
            bytes: stats.bytes,
        })
    }
}

/// Streams a tar archive of the configured files into a bucket
pub struct ArchiveJob {
    store: Arc<dyn ObjectStore>,
    pipeline: ArchivePipeline,
}

impl ArchiveJob {
    pub fn new(store: Arc<dyn ObjectStore>, pipeline: ArchivePipeline) -> Self {
        Self { store, pipeline }
    }
}

#[async_trait]
impl Job for ArchiveJob {
    fn kind(&self) -> JobKind {
        JobKind::Tar
    }

    async fn run(&self, config: &JobConfig, target: &str) -> Result<JobReport> {
        let plan = ArchivePlan::new(&config.compression, &config.name, &config.files)?;
        if target.is_empty() {
            return Err(Error::Config("target bucket must not be empty".to_string()));
        }
        tracing::info!(
            sources = plan.files.len(),
            bucket = target,
            key = %plan.key,
            "Starting tar job"
        );

        let info = self.pipeline.run(&plan, self.store.as_ref(), target).await?;

        tracing::info!(key = %info.key, bytes = info.size_bytes, etag = ?info.etag, "Tar job finished");
        Ok(JobReport {
            job: JobKind::Tar,
            files: 1,
            bytes: info.size_bytes,
        })
    }
}
