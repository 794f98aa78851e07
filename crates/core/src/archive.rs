//! Archive pipeline for the tar job
//!
//! The archiver writes the archive to its standard output; that pipe is
//! forwarded chunk by chunk into a streaming upload of unknown length while
//! the archiver is still running. The pipe provides the only flow control:
//! when the upload falls behind, the archiver blocks on write.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;

use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;

use crate::error::{Error, ProcessStage, Result};
use crate::path::RemotePath;
use crate::traits::{ObjectInfo, ObjectSink, ObjectStore, content_type_for};

/// Largest chunk forwarded from the archiver to the upload
pub const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Compression applied by the archiver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Bzip2,
}

impl std::str::FromStr for Compression {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" | "none" => Ok(Compression::None),
            "gzip" | "gz" => Ok(Compression::Gzip),
            "bzip2" | "bz2" => Ok(Compression::Bzip2),
            other => Err(Error::Config(format!(
                "unsupported compression algorithm '{other}'"
            ))),
        }
    }
}

impl Compression {
    /// Archiver flag letter selecting the compression
    pub fn flag(&self) -> &'static str {
        match self {
            Compression::None => "",
            Compression::Gzip => "z",
            Compression::Bzip2 => "j",
        }
    }

    /// Suffix of the uploaded object
    pub fn extension(&self) -> &'static str {
        match self {
            Compression::None => ".tar",
            Compression::Gzip => ".tar.gz",
            Compression::Bzip2 => ".tar.bz2",
        }
    }
}

/// Everything decided before the archiver is started
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivePlan {
    pub compression: Compression,
    pub key: String,
    pub files: Vec<PathBuf>,
}

impl ArchivePlan {
    /// Validate the options; fails before any side effect
    pub fn new(compression: &str, name: &str, files: &[PathBuf]) -> Result<Self> {
        let compression: Compression = compression.parse()?;
        Ok(Self {
            key: format!("{name}{}", compression.extension()),
            compression,
            files: files.to_vec(),
        })
    }

    /// Archiver arguments: create mode, output to stdout, then the sources
    pub fn archiver_args(&self) -> Vec<OsString> {
        let mut args = vec![
            OsString::from(format!("{}cf", self.compression.flag())),
            OsString::from("-"),
        ];
        args.extend(self.files.iter().map(|f| f.as_os_str().to_os_string()));
        args
    }
}

/// Runs the archiver and streams its output to an object store
pub struct ArchivePipeline {
    program: OsString,
}

impl ArchivePipeline {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Archive the planned files and upload them to `bucket`
    ///
    /// Succeeds only if both the upload and the archiver succeed. Once the
    /// upload returns the pipe is closed and the archiver is always reaped.
    pub async fn run(
        &self,
        plan: &ArchivePlan,
        store: &dyn ObjectStore,
        bucket: &str,
    ) -> Result<ObjectInfo> {
        let path = RemotePath::new(bucket, &plan.key);

        let mut command = Command::new(&self.program);
        command
            .args(plan.archiver_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            Error::process(
                ProcessStage::Spawn,
                format!("start '{}': {e}", self.program.to_string_lossy()),
            )
        })?;
        tracing::debug!(pid = ?child.id(), object = %path, "Archiver started");

        let diagnostics = child.stderr.take().map(|stderr| tokio::spawn(log_diagnostics(stderr)));

        let upload = match child.stdout.take() {
            Some(stdout) => self.upload(stdout, store, &path).await,
            None => Err(Error::process(
                ProcessStage::Pipe,
                "archiver stdout is not captured",
            )),
        };

        let status = child.wait().await;
        let first_diagnostic = match diagnostics {
            Some(task) => task.await.unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Archiver diagnostics task failed");
                None
            }),
            None => None,
        };

        let info = match upload {
            Ok(info) => info,
            Err(e) => {
                match &status {
                    Ok(status) => tracing::warn!(%status, "Archiver reaped after failed upload"),
                    Err(wait_err) => tracing::warn!(error = %wait_err, "Failed to reap archiver"),
                }
                return Err(e);
            }
        };

        let status = status.map_err(|e| Error::process(ProcessStage::Wait, e.to_string()))?;
        if !status.success() {
            let message = match first_diagnostic {
                Some(line) => format!("{status}: {line}"),
                None => status.to_string(),
            };
            return Err(Error::process(ProcessStage::ExitStatus, message));
        }

        tracing::debug!(object = %path, bytes = info.size_bytes, "Archiver exited cleanly");
        Ok(info)
    }

    async fn upload<R>(&self, reader: R, store: &dyn ObjectStore, path: &RemotePath) -> Result<ObjectInfo>
    where
        R: AsyncRead + Unpin + Send,
    {
        let content_type = content_type_for(&path.key);
        let sink = store
            .put_stream(path, None, content_type.as_deref())
            .await?;
        forward(reader, sink, STREAM_CHUNK_SIZE).await
    }
}

/// Log each line the archiver writes to its standard error
///
/// Returns the first non-empty line, which is where the archiver names the
/// cause of a failure.
async fn log_diagnostics<R>(reader: R) -> Option<String>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut first = None;
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim_end().to_string();
                if line.is_empty() {
                    continue;
                }
                tracing::warn!(archiver = %line, "Archiver diagnostic");
                if first.is_none() {
                    first = Some(line);
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "Stopped reading archiver diagnostics");
                break;
            }
        }
    }
    first
}

/// Copy `reader` into `sink` in chunks of at most `chunk_size` bytes
///
/// The sink is aborted on any read or write failure. `reader` is dropped
/// before returning.
pub async fn forward<R>(mut reader: R, mut sink: Box<dyn ObjectSink>, chunk_size: usize) -> Result<ObjectInfo>
where
    R: AsyncRead + Unpin + Send,
{
    let mut buf = vec![0u8; chunk_size];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                abort_quietly(sink).await;
                return Err(Error::process(ProcessStage::Read, e.to_string()));
            }
        };
        if let Err(e) = sink.write(Bytes::copy_from_slice(&buf[..n])).await {
            abort_quietly(sink).await;
            return Err(e);
        }
    }
    drop(reader);
    sink.finish().await
}

async fn abort_quietly(sink: Box<dyn ObjectSink>) {
    if let Err(e) = sink.abort().await {
        tracing::warn!(error = %e, "Failed to abort streaming upload");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingStore;
    use tempfile::TempDir;

    #[test]
    fn test_compression_dispatch() {
        let cases = [
            ("", Compression::None, "", ".tar"),
            ("none", Compression::None, "", ".tar"),
            ("gzip", Compression::Gzip, "z", ".tar.gz"),
            ("gz", Compression::Gzip, "z", ".tar.gz"),
            ("bzip2", Compression::Bzip2, "j", ".tar.bz2"),
            ("bz2", Compression::Bzip2, "j", ".tar.bz2"),
        ];
        for (input, compression, flag, ext) in cases {
            let parsed: Compression = input.parse().unwrap();
            assert_eq!(parsed, compression, "input {input:?}");
            assert_eq!(parsed.flag(), flag);
            assert_eq!(parsed.extension(), ext);
        }
    }

    #[test]
    fn test_compression_is_case_sensitive() {
        for input in ["GZIP", "xz", "zstd", " gz"] {
            assert!(matches!(input.parse::<Compression>(), Err(Error::Config(_))));
        }
    }

    #[test]
    fn test_plan_args() {
        let files = vec![PathBuf::from("/etc"), PathBuf::from("/var/log")];
        let plan = ArchivePlan::new("gzip", "daily", &files).unwrap();
        assert_eq!(plan.key, "daily.tar.gz");
        assert_eq!(
            plan.archiver_args(),
            vec![
                OsString::from("zcf"),
                OsString::from("-"),
                OsString::from("/etc"),
                OsString::from("/var/log"),
            ]
        );

        let plan = ArchivePlan::new("", "plain", &files).unwrap();
        assert_eq!(plan.archiver_args()[0], OsString::from("cf"));
        let plan = ArchivePlan::new("bz2", "b", &files).unwrap();
        assert_eq!(plan.archiver_args()[0], OsString::from("jcf"));
    }

    #[tokio::test]
    async fn test_forward_bounds_chunks() {
        let store = RecordingStore::capped(1024);
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 256) as u8).collect();
        let sink = store
            .put_stream(&RemotePath::new("b", "k"), None, None)
            .await
            .unwrap();

        let info = forward(std::io::Cursor::new(data.clone()), sink, 1024)
            .await
            .unwrap();

        assert_eq!(info.size_bytes, data.len() as u64);
        let stream = &store.streams()[0];
        assert!(stream.finished);
        assert!(stream.largest_chunk <= 1024);
        assert_eq!(stream.data, data);
    }

    #[tokio::test]
    async fn test_forward_aborts_on_write_failure() {
        let store = RecordingStore::default().fail_after(10);
        let sink = store
            .put_stream(&RemotePath::new("b", "k"), None, None)
            .await
            .unwrap();

        let err = forward(std::io::Cursor::new(vec![7u8; 64]), sink, 8)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Upload { .. }));
        let stream = &store.streams()[0];
        assert!(stream.aborted);
        assert!(!stream.finished);
    }

    #[tokio::test]
    async fn test_pipeline_spawn_failure() {
        let store = RecordingStore::default();
        let plan = ArchivePlan::new("", "backup", &[PathBuf::from("/tmp")]).unwrap();

        let err = ArchivePipeline::new("/nonexistent/archiver-binary")
            .run(&plan, &store, "bucket-1")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Process {
                stage: ProcessStage::Spawn,
                ..
            }
        ));
        assert_eq!(store.put_stream_calls(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pipeline_nonzero_exit_fails_after_upload() {
        let store = RecordingStore::default();
        let plan = ArchivePlan::new("", "backup", &[PathBuf::from("/tmp")]).unwrap();

        // `false` ignores its arguments, writes nothing and exits 1
        let err = ArchivePipeline::new("false")
            .run(&plan, &store, "bucket-1")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Process {
                stage: ProcessStage::ExitStatus,
                ..
            }
        ));
        assert!(store.streams()[0].finished);
    }

    #[tokio::test]
    async fn test_log_diagnostics_keeps_first_line() {
        let stderr = std::io::Cursor::new(b"\ntar: /etc/shadow: Cannot open\ntar: Exiting with failure status\n".to_vec());
        assert_eq!(
            log_diagnostics(stderr).await.as_deref(),
            Some("tar: /etc/shadow: Cannot open")
        );
        assert_eq!(log_diagnostics(std::io::Cursor::new(Vec::new())).await, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pipeline_captures_archiver_stderr() {
        // Relative, so the archiver has no leading `/` to warn about first
        let store = RecordingStore::default();
        let plan = ArchivePlan::new("", "backup", &[PathBuf::from("bj-missing-source")]).unwrap();

        let err = ArchivePipeline::new("tar")
            .run(&plan, &store, "bucket-1")
            .await
            .unwrap_err();

        match err {
            Error::Process {
                stage: ProcessStage::ExitStatus,
                message,
            } => assert!(message.contains("bj-missing-source"), "message: {message}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pipeline_upload_failure_reaps_archiver() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("data.bin"), vec![1u8; 256 * 1024]).unwrap();

        let store = RecordingStore::failing("bucket does not exist");
        let plan = ArchivePlan::new("", "backup", &[temp_dir.path().to_path_buf()]).unwrap();

        let err = ArchivePipeline::new("tar")
            .run(&plan, &store, "bucket-1")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Upload { ref key, .. } if key == "backup.tar"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pipeline_streams_tar_with_bounded_chunks() {
        let temp_dir = TempDir::new().unwrap();
        let payload: Vec<u8> = (0..(1024 * 1024u32)).map(|i| (i * 7 % 256) as u8).collect();
        std::fs::write(temp_dir.path().join("big.bin"), &payload).unwrap();
        std::fs::write(temp_dir.path().join("small.txt"), "ok boomer").unwrap();

        let store = RecordingStore::capped(STREAM_CHUNK_SIZE);
        let plan = ArchivePlan::new("none", "nightly", &[temp_dir.path().to_path_buf()]).unwrap();

        let info = ArchivePipeline::new("tar")
            .run(&plan, &store, "bucket-1")
            .await
            .unwrap();

        assert_eq!(info.key, "nightly.tar");
        let stream = &store.streams()[0];
        assert_eq!(stream.path, Some(RemotePath::new("bucket-1", "nightly.tar")));
        assert!(stream.finished);
        assert!(stream.largest_chunk <= STREAM_CHUNK_SIZE);
        assert!(stream.data.len() > payload.len());
        assert_eq!(stream.data.len() % 512, 0);
    }
}
