//! copy job - Recursively mirror files to a local root or a bucket

use std::sync::Arc;

use bj_core::{BackendKind, CopyJob, Job, JobConfig, OsFs, Result};
use bj_s3::S3Client;

use super::SettingsLoader;

/// Build the copy job; storage settings are only loaded for the s3 backend
pub(super) async fn build(config: &JobConfig, loader: &SettingsLoader) -> Result<Box<dyn Job>> {
    let job = CopyJob::new(Arc::new(OsFs));

    match config.backend {
        BackendKind::Local => Ok(Box::new(job)),
        BackendKind::ObjectStore => {
            let settings = loader.load()?;
            let client = S3Client::new(settings.require_storage()?).await?;
            Ok(Box::new(job.with_store(Arc::new(client))))
        }
    }
}
