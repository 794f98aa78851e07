//! Error types for the backup jobs
//!
//! Every failure aborts the running job. Each variant carries the path,
//! object key or pipeline stage needed to make the final diagnostic
//! actionable, and maps to a distinct process exit code.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;

/// Stage of the archive pipeline in which the archiver subprocess failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStage {
    /// Acquiring the subprocess standard output
    Pipe,
    /// Starting the subprocess
    Spawn,
    /// Reading the archive stream from the subprocess
    Read,
    /// Waiting for the subprocess to terminate
    Wait,
    /// The subprocess terminated unsuccessfully
    ExitStatus,
}

impl std::fmt::Display for ProcessStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessStage::Pipe => write!(f, "pipe"),
            ProcessStage::Spawn => write!(f, "spawn"),
            ProcessStage::Read => write!(f, "read"),
            ProcessStage::Wait => write!(f, "wait"),
            ProcessStage::ExitStatus => write!(f, "exit status"),
        }
    }
}

/// Errors produced by the transfer engine
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed configuration or an unsupported option
    #[error("Configuration error: {0}")]
    Config(String),

    /// A source path that cannot be mapped under the target
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// A source path could not be statted, listed, opened or read
    #[error("Source '{}': {source}", .path.display())]
    SourceAccess {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A destination directory or file could not be created, written or synced
    #[error("Destination '{}': {source}", .path.display())]
    Destination {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The archiver subprocess failed
    #[error("Archiver {stage} failed: {message}")]
    Process { stage: ProcessStage, message: String },

    /// The object store rejected or failed a put
    #[error("Upload of '{key}' failed: {message}")]
    Upload { key: String, message: String },
}

impl Error {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config(_) | Error::InvalidPath(_) => 2,
            Error::Upload { .. } => 3,
            Error::SourceAccess { .. } => 4,
            Error::Destination { .. } => 6,
            Error::Process { .. } => 7,
        }
    }

    pub(crate) fn source_access(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::SourceAccess {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn destination(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Destination {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn process(stage: ProcessStage, message: impl Into<String>) -> Self {
        Error::Process {
            stage,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_access_names_path() {
        let err = Error::source_access(
            "/test/subdir/1.txt",
            std::io::Error::new(std::io::ErrorKind::NotFound, "file does not exist"),
        );
        assert_eq!(
            err.to_string(),
            "Source '/test/subdir/1.txt': file does not exist"
        );
    }

    #[test]
    fn test_process_names_stage() {
        let err = Error::process(ProcessStage::ExitStatus, "exit status: 2");
        assert_eq!(err.to_string(), "Archiver exit status failed: exit status: 2");
    }

    #[test]
    fn test_exit_codes_are_distinct() {
        let io = || std::io::Error::other("boom");
        let codes = [
            Error::Config("x".into()).exit_code(),
            Error::Upload {
                key: "k".into(),
                message: "m".into(),
            }
            .exit_code(),
            Error::source_access("/a", io()).exit_code(),
            Error::destination("/b", io()).exit_code(),
            Error::process(ProcessStage::Spawn, "m").exit_code(),
        ];
        let mut unique = codes.to_vec();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), codes.len());
        assert!(codes.iter().all(|c| *c != 0));
    }
}
