//! Write backends for the copy job
//!
//! A backend persists one source file under the job target. The traversal
//! engine is generic over [`WriteBackend`]; the local mirror and the
//! object store differ only in how a destination is resolved and written.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::fs::Filesystem;
use crate::path::{RemotePath, mirror_path, object_key};
use crate::traits::{ObjectStore, content_type_for};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Persists a single regular file under the job target
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WriteBackend: Send + Sync {
    /// Human-readable description of the target
    fn describe(&self) -> String;

    /// Write `source` to its destination, returning the bytes transferred
    async fn write(&self, source: &Path) -> Result<u64>;
}

/// Mirrors files under a local root, keeping the full source path
pub struct LocalMirror {
    fs: Arc<dyn Filesystem>,
    root: PathBuf,
}

impl LocalMirror {
    pub fn new(fs: Arc<dyn Filesystem>, root: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            root: root.into(),
        }
    }

    async fn is_source(&self, source: &Path, destination: &Path) -> Result<bool> {
        if source == destination {
            return Ok(true);
        }
        let source = self
            .fs
            .canonicalize(source)
            .await
            .map_err(|e| Error::source_access(source, e))?;
        // A destination that does not exist yet cannot alias the source.
        Ok(self
            .fs
            .canonicalize(destination)
            .await
            .is_ok_and(|destination| destination == source))
    }
}

#[async_trait]
impl WriteBackend for LocalMirror {
    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    async fn write(&self, source: &Path) -> Result<u64> {
        let destination = mirror_path(&self.root, source)?;

        // Opened first so a missing source leaves nothing behind.
        let mut reader = self
            .fs
            .open(source)
            .await
            .map_err(|e| Error::source_access(source, e))?;

        // Creating the destination would truncate the file being read.
        if self.is_source(source, &destination).await? {
            return Err(Error::destination(
                &destination,
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "destination is the source file itself",
                ),
            ));
        }

        if let Some(parent) = destination.parent() {
            self.fs
                .create_dir_all(parent)
                .await
                .map_err(|e| Error::destination(parent, e))?;
        }

        let mut writer = self
            .fs
            .create(&destination)
            .await
            .map_err(|e| Error::destination(&destination, e))?;

        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        let mut copied = 0u64;
        loop {
            let n = reader
                .read(&mut buf)
                .await
                .map_err(|e| Error::source_access(source, e))?;
            if n == 0 {
                break;
            }
            writer
                .write_all(&buf[..n])
                .await
                .map_err(|e| Error::destination(&destination, e))?;
            copied += n as u64;
        }

        writer
            .flush()
            .await
            .map_err(|e| Error::destination(&destination, e))?;
        writer
            .sync_all()
            .await
            .map_err(|e| Error::destination(&destination, e))?;

        tracing::debug!(
            source = %source.display(),
            destination = %destination.display(),
            bytes = copied,
            "Copied file"
        );
        Ok(copied)
    }
}

/// Uploads each file as one object keyed by its source path
pub struct ObjectStoreBackend {
    fs: Arc<dyn Filesystem>,
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl ObjectStoreBackend {
    pub fn new(fs: Arc<dyn Filesystem>, store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            fs,
            store,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl WriteBackend for ObjectStoreBackend {
    fn describe(&self) -> String {
        format!("bucket '{}'", self.bucket)
    }

    async fn write(&self, source: &Path) -> Result<u64> {
        let path = RemotePath::new(&self.bucket, object_key(source));

        let mut reader = self
            .fs
            .open(source)
            .await
            .map_err(|e| Error::source_access(source, e))?;
        let mut data = Vec::new();
        reader
            .read_to_end(&mut data)
            .await
            .map_err(|e| Error::source_access(source, e))?;

        let content_type = content_type_for(&path.key);
        let info = self
            .store
            .put_object(&path, data, content_type.as_deref())
            .await?;

        tracing::debug!(source = %source.display(), object = %path, bytes = info.size_bytes, etag = ?info.etag, "Uploaded file");
        Ok(info.size_bytes)
    }
}
