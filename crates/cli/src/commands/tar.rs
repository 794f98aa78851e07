//! tar job - Stream a tar archive of the configured files into a bucket

use std::sync::Arc;

use bj_core::{ArchiveJob, ArchivePipeline, ArchivePlan, Job, JobConfig, Result};
use bj_s3::S3Client;

use super::SettingsLoader;

/// Build the tar job
///
/// The archive options are validated before settings are read or a client
/// is created.
pub(super) async fn build(config: &JobConfig, loader: &SettingsLoader) -> Result<Box<dyn Job>> {
    let plan = ArchivePlan::new(&config.compression, &config.name, &config.files)?;
    tracing::debug!(key = %plan.key, "Archive options accepted");

    let settings = loader.load()?;
    let client = S3Client::new(settings.require_storage()?).await?;
    let pipeline = ArchivePipeline::new(&settings.archiver.program);

    Ok(Box::new(ArchiveJob::new(Arc::new(client), pipeline)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bj_core::{Error, JobKind};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_unsupported_compression_rejected_first() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        // Unreadable settings would be a different error
        std::fs::write(&path, "[storage\n").unwrap();

        let config = JobConfig::parse(r#"{"files":["/etc"],"compression":"lzma"}"#).unwrap();
        let err = build(&config, &SettingsLoader::from_path(&path))
            .await
            .err()
            .unwrap();

        match err {
            Error::Config(message) => assert!(message.contains("lzma")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_builds_with_storage_settings() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[storage]\nendpoint = \"http://127.0.0.1:9000\"\naccess_key = \"ak\"\nsecret_key = \"sk\"\n",
        )
        .unwrap();

        let config = JobConfig::parse(r#"{"files":["/etc"],"compression":"gz"}"#).unwrap();
        let job = build(&config, &SettingsLoader::from_path(&path)).await.unwrap();
        assert_eq!(job.kind(), JobKind::Tar);
    }
}
