//! Destination path and object key derivation
//!
//! The local mirror keeps the full source path under the target root, so
//! `/test/subdir/1.txt` copied to `/minio/bucket-1` lands at
//! `/minio/bucket-1/test/subdir/1.txt`. Object keys are the source path
//! with exactly one leading separator removed.

use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// A bucket and key pair addressing one object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePath {
    pub bucket: String,
    pub key: String,
}

impl RemotePath {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl std::fmt::Display for RemotePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Join `source` under `root`, keeping every component of `source`
///
/// Unlike [`Path::join`], an absolute `source` does not replace the root.
/// The source is cleaned lexically; a `..` that would climb above the
/// root is rejected.
pub fn mirror_path(root: &Path, source: &Path) -> Result<PathBuf> {
    let mut relative: Vec<&std::ffi::OsStr> = Vec::new();

    for component in source.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
            Component::ParentDir => {
                if relative.pop().is_none() {
                    return Err(Error::InvalidPath(format!(
                        "'{}' escapes the target root",
                        source.display()
                    )));
                }
            }
            Component::Normal(part) => relative.push(part),
        }
    }

    let mut destination = root.to_path_buf();
    destination.extend(relative);
    Ok(destination)
}

/// Object key for a source file
pub fn object_key(source: &Path) -> String {
    let source = source.to_string_lossy();
    match source.strip_prefix('/') {
        Some(stripped) => stripped.to_string(),
        None => source.into_owned(),
    }
}
