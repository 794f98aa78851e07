//! Process exit codes
//!
//! The orchestrator only sees the exit status and the diagnostic on
//! stderr, so every failure class gets its own code.

/// Exit status of a job run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// The job completed
    Success = 0,
    /// Unclassified failure
    GeneralError = 1,
    /// Bad flags or job configuration
    UsageError = 2,
    /// The object store rejected or failed an upload
    UploadError = 3,
    /// A source path could not be read
    SourceError = 4,
    /// A local destination could not be written
    DestinationError = 6,
    /// The archiver could not be run or exited unsuccessfully
    ProcessError = 7,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(code: i32) -> Option<Self> {
        match code {
            0 => Some(ExitCode::Success),
            1 => Some(ExitCode::GeneralError),
            2 => Some(ExitCode::UsageError),
            3 => Some(ExitCode::UploadError),
            4 => Some(ExitCode::SourceError),
            6 => Some(ExitCode::DestinationError),
            7 => Some(ExitCode::ProcessError),
            _ => None,
        }
    }

    /// Exit code for a job error
    pub fn from_error(error: &bj_core::Error) -> Self {
        Self::from_i32(error.exit_code()).unwrap_or(ExitCode::GeneralError)
    }
}
