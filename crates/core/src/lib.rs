//! bj-core: Transfer engine for the backup jobs
//!
//! This crate provides the core functionality for the `bj` job runner, including:
//! - Job and storage configuration
//! - Path normalization for mirrored files and object keys
//! - Filesystem and ObjectStore traits for the two write backends
//! - The recursive traversal engine used by the copy job
//! - The archiver-to-upload streaming pipeline used by the tar job
//!
//! This crate is designed to be independent of any specific S3 SDK,
//! allowing the jobs to run against substitute collaborators in tests.

pub mod archive;
pub mod backend;
pub mod config;
pub mod error;
pub mod fs;
pub mod job;
pub mod path;
pub mod traits;
pub mod traversal;

#[cfg(test)]
mod testing;

pub use archive::{ArchivePipeline, ArchivePlan, Compression, STREAM_CHUNK_SIZE};
pub use backend::{LocalMirror, ObjectStoreBackend, WriteBackend};
pub use config::{ArchiverSettings, BackendKind, Config, ConfigManager, JobConfig, StorageConfig};
pub use error::{Error, ProcessStage, Result};
pub use fs::{EntryKind, Filesystem, MemoryFs, OsFs, WritableFile};
pub use job::{ArchiveJob, CopyJob, Job, JobKind, JobReport};
pub use path::{RemotePath, mirror_path, object_key};
pub use traits::{ObjectInfo, ObjectSink, ObjectStore};
pub use traversal::{TransferStats, transfer};
