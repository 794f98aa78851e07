//! Object storage capability
//!
//! Defines the narrow set of storage operations the jobs need. The S3
//! adapter lives in a separate crate so the engine can be exercised with
//! substitute stores.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::path::RemotePath;

/// Metadata about an uploaded object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size_bytes: u64,
    /// Entity tag returned by the store, without quotes
    pub etag: Option<String>,
}

impl ObjectInfo {
    pub fn new(key: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            key: key.into(),
            size_bytes,
            etag: None,
        }
    }
}

/// Incremental writer for an object of unknown length
///
/// Nothing is visible in the bucket until [`ObjectSink::finish`] succeeds.
#[async_trait]
pub trait ObjectSink: Send {
    /// Append a chunk to the object
    async fn write(&mut self, chunk: Bytes) -> Result<()>;

    /// Complete the upload
    async fn finish(self: Box<Self>) -> Result<ObjectInfo>;

    /// Discard everything written so far
    async fn abort(self: Box<Self>) -> Result<()>;
}

/// Storage operations used by the object-store backend and the archive pipeline
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload a complete object in one call
    async fn put_object(
        &self,
        path: &RemotePath,
        data: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<ObjectInfo>;

    /// Begin a streaming upload
    ///
    /// `content_length` is a hint; `None` means the total size is unknown
    /// and the store must accept chunks until `finish` is called.
    async fn put_stream(
        &self,
        path: &RemotePath,
        content_length: Option<u64>,
        content_type: Option<&str>,
    ) -> Result<Box<dyn ObjectSink>>;
}

/// Guess a content type from an object key
pub fn content_type_for(key: &str) -> Option<String> {
    mime_guess::from_path(key).first_raw().map(str::to_string)
}
