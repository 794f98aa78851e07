//! Streaming uploads of unknown length
//!
//! Chunks are buffered until a full part is available and then sent with
//! `UploadPart`, so memory use is bounded by one part regardless of the
//! object size. The multipart upload is only created once the first part
//! is full; smaller streams finish with a single `PutObject`.
//!
//! S3 caps an upload at 10,000 parts. Since the total size is unknown up
//! front, the part size doubles every 1,000 parts, which lifts the limit
//! from 10,000 base parts to several TiB.

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use bytes::{Bytes, BytesMut};

use bj_core::{ObjectInfo, ObjectSink, RemotePath, Result};

use crate::client::{S3Client, upload_error};

/// Most parts S3 accepts in one multipart upload
pub(crate) const MAX_PARTS: usize = 10_000;

/// Parts sent at one size before the size doubles
const PARTS_PER_STEP: usize = 1_000;

/// Largest part S3 accepts
const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Size of the 1-based `part_number` for a stream starting at `base` bytes
pub(crate) fn part_size_for(base: usize, part_number: usize) -> usize {
    let step = (part_number.saturating_sub(1) / PARTS_PER_STEP).min(MAX_PARTS / PARTS_PER_STEP);
    let size = (base as u64)
        .saturating_mul(1u64 << step)
        .min(MAX_PART_SIZE);
    usize::try_from(size).unwrap_or(usize::MAX)
}

/// Splits a byte stream into parts following [`part_size_for`]
#[derive(Debug)]
pub(crate) struct PartBuffer {
    buffer: BytesMut,
    base: usize,
    emitted: usize,
}

impl PartBuffer {
    pub(crate) fn new(base: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            base,
            emitted: 0,
        }
    }

    pub(crate) fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Size the next full part must reach
    pub(crate) fn part_size(&self) -> usize {
        part_size_for(self.base, self.emitted + 1)
    }

    /// Next full part, if one is buffered
    pub(crate) fn next_part(&mut self) -> Option<Bytes> {
        let size = self.part_size();
        if self.buffer.len() < size {
            return None;
        }
        self.emitted += 1;
        Some(self.buffer.split_to(size).freeze())
    }

    /// Everything still buffered
    pub(crate) fn take_rest(&mut self) -> Bytes {
        self.buffer.split().freeze()
    }

    pub(crate) fn len(&self) -> usize {
        self.buffer.len()
    }
}

/// [`ObjectSink`] backed by an S3 multipart upload
pub struct MultipartSink {
    client: aws_sdk_s3::Client,
    path: RemotePath,
    content_type: Option<String>,
    parts: PartBuffer,
    upload_id: Option<String>,
    completed: Vec<CompletedPart>,
    total: u64,
}

impl MultipartSink {
    pub(crate) fn new(
        client: aws_sdk_s3::Client,
        path: RemotePath,
        content_type: Option<String>,
        part_size: usize,
    ) -> Self {
        Self {
            client,
            path,
            content_type,
            parts: PartBuffer::new(part_size),
            upload_id: None,
            completed: Vec::new(),
            total: 0,
        }
    }

    async fn ensure_upload(&mut self) -> Result<String> {
        if let Some(id) = &self.upload_id {
            return Ok(id.clone());
        }

        let mut request = self
            .client
            .create_multipart_upload()
            .bucket(&self.path.bucket)
            .key(&self.path.key);
        if let Some(ct) = &self.content_type {
            request = request.content_type(ct);
        }

        let response = request
            .send()
            .await
            .map_err(|e| upload_error(&self.path, S3Client::format_sdk_error(&e)))?;
        let id = response
            .upload_id()
            .ok_or_else(|| upload_error(&self.path, "server returned no upload id"))?
            .to_string();

        tracing::debug!(object = %self.path, upload_id = %id, "Multipart upload created");
        self.upload_id = Some(id.clone());
        Ok(id)
    }

    async fn upload_part(&mut self, body: Bytes) -> Result<()> {
        if self.completed.len() >= MAX_PARTS {
            return Err(upload_error(
                &self.path,
                format!("stream exceeds {MAX_PARTS} parts"),
            ));
        }
        let upload_id = self.ensure_upload().await?;
        let part_number = i32::try_from(self.completed.len() + 1)
            .map_err(|_| upload_error(&self.path, "too many parts"))?;
        let size = body.len();

        let response = self
            .client
            .upload_part()
            .bucket(&self.path.bucket)
            .key(&self.path.key)
            .upload_id(&upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| upload_error(&self.path, S3Client::format_sdk_error(&e)))?;

        self.completed.push(
            CompletedPart::builder()
                .set_e_tag(response.e_tag().map(str::to_string))
                .part_number(part_number)
                .build(),
        );
        tracing::debug!(object = %self.path, part_number, bytes = size, "Uploaded part");
        Ok(())
    }

    async fn put_single(&self, body: Bytes) -> Result<ObjectInfo> {
        let size = body.len() as u64;
        let mut request = self
            .client
            .put_object()
            .bucket(&self.path.bucket)
            .key(&self.path.key)
            .body(ByteStream::from(body));
        if let Some(ct) = &self.content_type {
            request = request.content_type(ct);
        }

        let response = request
            .send()
            .await
            .map_err(|e| upload_error(&self.path, S3Client::format_sdk_error(&e)))?;

        let mut info = ObjectInfo::new(&self.path.key, size);
        info.etag = response.e_tag().map(|e| e.trim_matches('"').to_string());
        Ok(info)
    }

    /// Upload the remainder and complete the started multipart upload
    async fn complete(&mut self, rest: Bytes) -> Result<ObjectInfo> {
        if !rest.is_empty() {
            self.upload_part(rest).await?;
        }

        let upload_id = self.ensure_upload().await?;
        let parts = std::mem::take(&mut self.completed);
        let response = self
            .client
            .complete_multipart_upload()
            .bucket(&self.path.bucket)
            .key(&self.path.key)
            .upload_id(&upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| upload_error(&self.path, S3Client::format_sdk_error(&e)))?;

        let mut info = ObjectInfo::new(&self.path.key, self.total);
        info.etag = response.e_tag().map(|e| e.trim_matches('"').to_string());
        Ok(info)
    }

    /// Discard the started multipart upload, if any
    async fn abort_upload(&self) -> Result<()> {
        let Some(upload_id) = &self.upload_id else {
            return Ok(());
        };

        tracing::debug!(object = %self.path, upload_id = %upload_id, buffered = self.parts.len(), "Aborting multipart upload");
        self.client
            .abort_multipart_upload()
            .bucket(&self.path.bucket)
            .key(&self.path.key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| upload_error(&self.path, S3Client::format_sdk_error(&e)))?;
        Ok(())
    }
}

#[async_trait]
impl ObjectSink for MultipartSink {
    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        self.total += chunk.len() as u64;
        self.parts.push(&chunk);
        while let Some(part) = self.parts.next_part() {
            self.upload_part(part).await?;
        }
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<ObjectInfo> {
        let rest = self.parts.take_rest();

        if self.upload_id.is_none() {
            return self.put_single(rest).await;
        }

        match self.complete(rest).await {
            Ok(info) => Ok(info),
            Err(e) => {
                if let Err(abort_err) = self.abort_upload().await {
                    tracing::warn!(object = %self.path, error = %abort_err, "Failed to abort multipart upload");
                }
                Err(e)
            }
        }
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        self.abort_upload().await
    }
}
