//! S3 client implementation
//!
//! Wraps aws-sdk-s3 and implements the ObjectStore trait from bj-core.

use async_trait::async_trait;

use bj_core::{Error, ObjectInfo, ObjectSink, ObjectStore, RemotePath, Result, StorageConfig};

use crate::multipart::MultipartSink;

/// S3 client wrapper
pub struct S3Client {
    inner: aws_sdk_s3::Client,
    part_size: usize,
}

impl S3Client {
    /// Create a new S3 client from the storage configuration
    pub async fn new(storage: &StorageConfig) -> Result<Self> {
        storage.validate()?;

        // Build credentials provider
        let credentials = aws_credential_types::Credentials::new(
            storage.access_key.clone(),
            storage.secret_key.clone(),
            None, // session token
            None, // expiry
            "bj-static-credentials",
        );

        // Build SDK config
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(aws_config::Region::new(storage.region.clone()))
            .endpoint_url(&storage.endpoint)
            .load()
            .await;

        // Build S3 client with path-style addressing for compatibility
        let s3_config = aws_sdk_s3::config::Builder::from(&config)
            .force_path_style(uses_path_style(&storage.bucket_lookup))
            .build();

        let part_size = usize::try_from(storage.effective_part_size())
            .map_err(|_| Error::Config(format!("part size {} is too large", storage.part_size)))?;

        Ok(Self {
            inner: aws_sdk_s3::Client::from_conf(s3_config),
            part_size,
        })
    }

    /// Format AWS SDK error into a detailed error message
    pub(crate) fn format_sdk_error<E: std::fmt::Display>(
        error: &aws_sdk_s3::error::SdkError<E>,
    ) -> String {
        match error {
            aws_sdk_s3::error::SdkError::ServiceError(service_err) => {
                let err = service_err.err();
                let meta = service_err.raw();
                let mut msg = format!("Service error: {}", err);
                if let Some(code) = meta.headers().get("x-amz-error-code") {
                    msg.push_str(&format!(" (code: {})", code));
                }
                msg
            }
            aws_sdk_s3::error::SdkError::ConstructionFailure(err) => {
                format!("Request construction failed: {:?}", err)
            }
            aws_sdk_s3::error::SdkError::TimeoutError(_) => "Request timeout".to_string(),
            aws_sdk_s3::error::SdkError::DispatchFailure(err) => {
                format!("Network dispatch error: {:?}", err)
            }
            aws_sdk_s3::error::SdkError::ResponseError(err) => {
                format!("Response error: {:?}", err)
            }
            _ => error.to_string(),
        }
    }
}

/// Whether the bucket lookup style needs path-style addressing
pub(crate) fn uses_path_style(bucket_lookup: &str) -> bool {
    bucket_lookup == "path" || bucket_lookup == "auto"
}

pub(crate) fn upload_error(path: &RemotePath, message: impl Into<String>) -> Error {
    Error::Upload {
        key: path.key.clone(),
        message: message.into(),
    }
}

#[async_trait]
impl ObjectStore for S3Client {
    async fn put_object(
        &self,
        path: &RemotePath,
        data: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<ObjectInfo> {
        let size = data.len() as u64;
        let body = aws_sdk_s3::primitives::ByteStream::from(data);

        let mut request = self
            .inner
            .put_object()
            .bucket(&path.bucket)
            .key(&path.key)
            .body(body);

        if let Some(ct) = content_type {
            request = request.content_type(ct);
        }

        let response = request
            .send()
            .await
            .map_err(|e| upload_error(path, Self::format_sdk_error(&e)))?;

        let mut info = ObjectInfo::new(&path.key, size);
        if let Some(etag) = response.e_tag() {
            info.etag = Some(etag.trim_matches('"').to_string());
        }

        Ok(info)
    }

    async fn put_stream(
        &self,
        path: &RemotePath,
        content_length: Option<u64>,
        content_type: Option<&str>,
    ) -> Result<Box<dyn ObjectSink>> {
        tracing::debug!(object = %path, ?content_length, "Opening streaming upload");
        Ok(Box::new(MultipartSink::new(
            self.inner.clone(),
            path.clone(),
            content_type.map(str::to_string),
            self.part_size,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uses_path_style() {
        assert!(uses_path_style("auto"));
        assert!(uses_path_style("path"));
        assert!(!uses_path_style("dns"));
    }

    #[test]
    fn test_upload_error_names_key() {
        let err = upload_error(&RemotePath::new("bucket-1", "daily.tar"), "Request timeout");
        assert_eq!(err.to_string(), "Upload of 'daily.tar' failed: Request timeout");
        assert_eq!(err.exit_code(), 3);
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_endpoint() {
        let storage = StorageConfig::new("not a url", "ak", "sk");
        assert!(matches!(S3Client::new(&storage).await, Err(Error::Config(_))));
    }
}
