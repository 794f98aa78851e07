//! Recursive traversal driving a write backend
//!
//! Directories only contribute structure: each child is visited with its
//! own full path, so nesting is carried by the path itself and the backend
//! always receives the same target. The first failure aborts the walk.

use std::path::Path;

use futures::future::BoxFuture;

use crate::backend::WriteBackend;
use crate::error::{Error, Result};
use crate::fs::{EntryKind, Filesystem};

/// Totals for a completed traversal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    pub files: u64,
    pub bytes: u64,
}

impl std::ops::AddAssign for TransferStats {
    fn add_assign(&mut self, other: Self) {
        self.files += other.files;
        self.bytes += other.bytes;
    }
}

/// Transfer `source` (a file or a whole directory tree) through `backend`
///
/// Children are visited in name order.
pub fn transfer<'a>(
    fs: &'a dyn Filesystem,
    backend: &'a dyn WriteBackend,
    source: &'a Path,
) -> BoxFuture<'a, Result<TransferStats>> {
    Box::pin(async move {
        let kind = fs
            .stat(source)
            .await
            .map_err(|e| Error::source_access(source, e))?;

        match kind {
            EntryKind::File => {
                let bytes = backend.write(source).await?;
                Ok(TransferStats { files: 1, bytes })
            }
            EntryKind::Dir => {
                let mut children = fs
                    .read_dir(source)
                    .await
                    .map_err(|e| Error::source_access(source, e))?;
                children.sort();

                tracing::debug!(dir = %source.display(), entries = children.len(), "Walking directory");

                let mut stats = TransferStats::default();
                for child in &children {
                    stats += transfer(fs, backend, child).await?;
                }
                Ok(stats)
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{LocalMirror, MockWriteBackend};
    use crate::fs::MemoryFs;
    use mockall::Sequence;

    #[tokio::test]
    async fn test_transfer_single_file() {
        let fs = MemoryFs::new();
        fs.create_dir_all(Path::new("/minio/bucket-1")).await.unwrap();
        fs.write_file("/test/subdir/1.txt", "ok boomer").unwrap();
        let backend = LocalMirror::new(std::sync::Arc::new(fs.clone()), "/minio/bucket-1");

        let stats = transfer(&fs, &backend, Path::new("/test/subdir/1.txt")).await.unwrap();

        assert_eq!(stats, TransferStats { files: 1, bytes: 9 });
        assert_eq!(
            fs.read_file("/minio/bucket-1/test/subdir/1.txt").unwrap(),
            b"ok boomer"
        );
    }

    #[tokio::test]
    async fn test_transfer_directory() {
        let fs = MemoryFs::new();
        fs.create_dir_all(Path::new("/minio/bucket-1")).await.unwrap();
        fs.write_file("/test/subdir/1.txt", "ok boomer").unwrap();
        fs.write_file("/test/subdir/2.txt", "ok b00mer").unwrap();
        let backend = LocalMirror::new(std::sync::Arc::new(fs.clone()), "/minio/bucket-1");

        let stats = transfer(&fs, &backend, Path::new("/test")).await.unwrap();

        assert_eq!(stats.files, 2);
        assert_eq!(
            fs.read_file("/minio/bucket-1/test/subdir/1.txt").unwrap(),
            b"ok boomer"
        );
        assert_eq!(
            fs.read_file("/minio/bucket-1/test/subdir/2.txt").unwrap(),
            b"ok b00mer"
        );
    }

    #[tokio::test]
    async fn test_transfer_missing_source() {
        let fs = MemoryFs::new();
        fs.create_dir_all(Path::new("/minio/bucket-1")).await.unwrap();
        let backend = LocalMirror::new(std::sync::Arc::new(fs.clone()), "/minio/bucket-1");

        let err = transfer(&fs, &backend, Path::new("/test/subdir/1.txt"))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("/test/subdir/1.txt"));
        assert!(matches!(err, Error::SourceAccess { .. }));
        assert!(!fs.exists("/minio/bucket-1/test"));
    }

    #[tokio::test]
    async fn test_transfer_empty_directory() {
        let fs = MemoryFs::new();
        fs.create_dir_all(Path::new("/empty")).await.unwrap();
        let mut backend = MockWriteBackend::new();
        backend.expect_write().never();

        let stats = transfer(&fs, &backend, Path::new("/empty")).await.unwrap();
        assert_eq!(stats, TransferStats::default());
    }

    #[tokio::test]
    async fn test_transfer_visits_children_in_name_order() {
        let fs = MemoryFs::new();
        fs.write_file("/src/b.txt", "b").unwrap();
        fs.write_file("/src/a/inner.txt", "inner").unwrap();
        fs.write_file("/src/c.txt", "c").unwrap();

        let mut seq = Sequence::new();
        let mut backend = MockWriteBackend::new();
        for name in ["inner.txt", "b.txt", "c.txt"] {
            backend
                .expect_write()
                .withf(move |path| path.ends_with(name))
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_| Ok(1));
        }

        let stats = transfer(&fs, &backend, Path::new("/src")).await.unwrap();
        assert_eq!(stats.files, 3);
    }

    #[tokio::test]
    async fn test_transfer_aborts_on_first_failure() {
        let fs = MemoryFs::new();
        fs.write_file("/src/1.txt", "1").unwrap();
        fs.write_file("/src/2.txt", "2").unwrap();

        let mut backend = MockWriteBackend::new();
        backend
            .expect_write()
            .withf(|path| path.ends_with("1.txt"))
            .times(1)
            .returning(|path| {
                Err(Error::Destination {
                    path: path.to_path_buf(),
                    source: std::io::Error::other("disk full"),
                })
            });
        backend
            .expect_write()
            .withf(|path| path.ends_with("2.txt"))
            .never();

        let err = transfer(&fs, &backend, Path::new("/src")).await.unwrap_err();
        assert!(matches!(err, Error::Destination { .. }));
    }
}
