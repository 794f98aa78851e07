//! Substitute object store for unit tests

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Error, Result};
use crate::path::RemotePath;
use crate::traits::{ObjectInfo, ObjectSink, ObjectStore};

/// Outcome of one streaming upload
#[derive(Debug, Clone, Default)]
pub struct StreamRecord {
    pub path: Option<RemotePath>,
    pub data: Vec<u8>,
    pub largest_chunk: usize,
    pub finished: bool,
    pub aborted: bool,
}

#[derive(Default)]
struct State {
    objects: Vec<(RemotePath, Vec<u8>, Option<String>)>,
    streams: Vec<StreamRecord>,
    put_stream_calls: usize,
}

/// Records every put and enforces the streaming contract
///
/// Streaming puts with a declared length are refused, and so is any chunk
/// larger than `max_chunk`.
#[derive(Clone, Default)]
pub struct RecordingStore {
    state: Arc<Mutex<State>>,
    failure: Option<String>,
    max_chunk: Option<usize>,
    fail_after: Option<usize>,
}

impl RecordingStore {
    /// Every put fails with `message`
    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Default::default()
        }
    }

    /// Reject chunks larger than `max_chunk` bytes
    pub fn capped(max_chunk: usize) -> Self {
        Self {
            max_chunk: Some(max_chunk),
            ..Default::default()
        }
    }

    /// Streaming writes fail once `bytes` have been accepted
    pub fn fail_after(mut self, bytes: usize) -> Self {
        self.fail_after = Some(bytes);
        self
    }

    pub fn objects(&self) -> Vec<(RemotePath, Vec<u8>, Option<String>)> {
        self.state.lock().unwrap().objects.clone()
    }

    pub fn streams(&self) -> Vec<StreamRecord> {
        self.state.lock().unwrap().streams.clone()
    }

    pub fn put_stream_calls(&self) -> usize {
        self.state.lock().unwrap().put_stream_calls
    }

    fn upload_error(key: &str, message: &str) -> Error {
        Error::Upload {
            key: key.to_string(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for RecordingStore {
    async fn put_object(
        &self,
        path: &RemotePath,
        data: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<ObjectInfo> {
        if let Some(message) = &self.failure {
            return Err(Self::upload_error(&path.key, message));
        }
        let size = data.len() as u64;
        self.state.lock().unwrap().objects.push((
            path.clone(),
            data,
            content_type.map(str::to_string),
        ));
        Ok(ObjectInfo::new(&path.key, size))
    }

    async fn put_stream(
        &self,
        path: &RemotePath,
        content_length: Option<u64>,
        _content_type: Option<&str>,
    ) -> Result<Box<dyn ObjectSink>> {
        let mut state = self.state.lock().unwrap();
        state.put_stream_calls += 1;
        if let Some(len) = content_length {
            return Err(Self::upload_error(
                &path.key,
                &format!("pre-declared content length {len} refused"),
            ));
        }
        if let Some(message) = &self.failure {
            return Err(Self::upload_error(&path.key, message));
        }
        let index = state.streams.len();
        state.streams.push(StreamRecord {
            path: Some(path.clone()),
            ..Default::default()
        });
        Ok(Box::new(RecordingSink {
            store: self.clone(),
            key: path.key.clone(),
            index,
        }))
    }
}

struct RecordingSink {
    store: RecordingStore,
    key: String,
    index: usize,
}

#[async_trait]
impl ObjectSink for RecordingSink {
    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        if let Some(max) = self.store.max_chunk
            && chunk.len() > max
        {
            return Err(RecordingStore::upload_error(
                &self.key,
                &format!("chunk of {} bytes exceeds {max}", chunk.len()),
            ));
        }
        let mut state = self.store.state.lock().unwrap();
        let record = &mut state.streams[self.index];
        if let Some(limit) = self.store.fail_after
            && record.data.len() + chunk.len() > limit
        {
            return Err(RecordingStore::upload_error(&self.key, "connection reset"));
        }
        record.largest_chunk = record.largest_chunk.max(chunk.len());
        record.data.extend_from_slice(&chunk);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<ObjectInfo> {
        let mut state = self.store.state.lock().unwrap();
        let record = &mut state.streams[self.index];
        record.finished = true;
        Ok(ObjectInfo::new(&self.key, record.data.len() as u64))
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        self.store.state.lock().unwrap().streams[self.index].aborted = true;
        Ok(())
    }
}
