//! In-memory fakes of the remote collaborators

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use quickbuild_cloud::{
    BlobLocation, BlobReceipt, BlobStore, BuildHandle, BuildRequest, BuildService, BuildStatus,
    ByteStream, CloudError, LogLocation, RegistryIdentity, Result, UploadDestination,
};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

pub(crate) const UPLOAD_URL: &str =
    "https://myregistry.blob.core.windows.net/source/202401/upload.tar.gz?sv=2018-03-28&sig=abc";
pub(crate) const LOG_URL: &str =
    "https://myregistry.blob.core.windows.net/logs/aa1/rawtext.log?sv=2018-03-28&sig=def";

pub(crate) fn registry() -> RegistryIdentity {
    RegistryIdentity::new("sub-1", "rg-1", "myregistry")
}

fn unavailable(what: &str) -> CloudError {
    CloudError::ApiError {
        status: 503,
        message: format!("{} unavailable", what),
    }
}

pub(crate) struct FakeBuildService {
    pub build_id: String,
    pub fail_upload_target: bool,
    pub fail_submit: bool,
    statuses: Mutex<VecDeque<BuildStatus>>,
    calls: Mutex<Vec<String>>,
    submitted: Mutex<Vec<BuildRequest>>,
}

impl FakeBuildService {
    pub fn new() -> Self {
        Self {
            build_id: "aa1".to_string(),
            fail_upload_target: false,
            fail_submit: false,
            statuses: Mutex::new(VecDeque::from([BuildStatus::Succeeded])),
            calls: Mutex::new(Vec::new()),
            submitted: Mutex::new(Vec::new()),
        }
    }

    /// Statuses returned in order; the last one repeats
    pub fn with_statuses(self, statuses: Vec<BuildStatus>) -> Self {
        *self.statuses.lock().unwrap() = statuses.into();
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn submitted(&self) -> Vec<BuildRequest> {
        self.submitted.lock().unwrap().clone()
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }
}

#[async_trait]
impl BuildService for FakeBuildService {
    async fn get_upload_target(&self, _registry: &RegistryIdentity) -> Result<UploadDestination> {
        self.record("get_upload_target");
        if self.fail_upload_target {
            return Err(CloudError::AuthenticationFailed("token expired".to_string()));
        }
        Ok(UploadDestination {
            upload_url: UPLOAD_URL.to_string(),
            relative_path: "source/202401/upload.tar.gz".to_string(),
        })
    }

    async fn submit_build(
        &self,
        _registry: &RegistryIdentity,
        request: &BuildRequest,
    ) -> Result<BuildHandle> {
        self.record("submit_build");
        if self.fail_submit {
            return Err(unavailable("queueBuild"));
        }
        self.submitted.lock().unwrap().push(request.clone());
        Ok(BuildHandle::new(self.build_id.clone()))
    }

    async fn get_log_location(
        &self,
        _registry: &RegistryIdentity,
        _build: &BuildHandle,
    ) -> Result<LogLocation> {
        self.record("get_log_location");
        Ok(LogLocation {
            log_link: LOG_URL.to_string(),
        })
    }

    async fn get_build_status(
        &self,
        _registry: &RegistryIdentity,
        _build: &BuildHandle,
    ) -> Result<BuildStatus> {
        self.record("get_build_status");
        let mut statuses = self.statuses.lock().unwrap();
        let status = if statuses.len() > 1 {
            statuses.pop_front()
        } else {
            statuses.front().copied()
        };
        Ok(status.unwrap_or(BuildStatus::Unknown))
    }
}

/// Blob store whose log blob grows by one batch per open
pub(crate) struct FakeBlobStore {
    pub fail_open: bool,
    pub fail_after_first_chunk: bool,
    missing_opens: Mutex<usize>,
    log: Mutex<Vec<Vec<u8>>>,
    batches: Mutex<VecDeque<Vec<Vec<u8>>>>,
    opens: Mutex<Vec<u64>>,
    written: Mutex<Vec<(String, Vec<u8>)>>,
}

impl FakeBlobStore {
    pub fn new() -> Self {
        Self {
            fail_open: false,
            fail_after_first_chunk: false,
            missing_opens: Mutex::new(0),
            log: Mutex::new(Vec::new()),
            batches: Mutex::new(VecDeque::new()),
            opens: Mutex::new(Vec::new()),
            written: Mutex::new(Vec::new()),
        }
    }

    pub fn with_log_batches(self, batches: Vec<Vec<&str>>) -> Self {
        *self.batches.lock().unwrap() = batches
            .into_iter()
            .map(|batch| batch.into_iter().map(|c| c.as_bytes().to_vec()).collect())
            .collect();
        self
    }

    /// The first `count` opens fail as if the log blob did not exist yet
    pub fn with_missing_opens(self, count: usize) -> Self {
        *self.missing_opens.lock().unwrap() = count;
        self
    }

    pub fn opens(&self) -> Vec<u64> {
        self.opens.lock().unwrap().clone()
    }

    pub fn written(&self) -> Vec<(String, Vec<u8>)> {
        self.written.lock().unwrap().clone()
    }
}

#[async_trait]
impl BlobStore for FakeBlobStore {
    async fn write_blob(&self, location: &BlobLocation, source: &Path) -> Result<BlobReceipt> {
        let bytes = tokio::fs::read(source).await?;
        let len = bytes.len() as u64;
        self.written
            .lock()
            .unwrap()
            .push((location.blob_name().to_string(), bytes));
        Ok(BlobReceipt {
            content_length: len,
            etag: None,
        })
    }

    async fn open_read_stream(&self, _location: &BlobLocation, offset: u64) -> Result<ByteStream> {
        self.opens.lock().unwrap().push(offset);
        if self.fail_open {
            return Err(CloudError::AuthenticationFailed(
                "AuthenticationFailed".to_string(),
            ));
        }
        {
            let mut missing = self.missing_opens.lock().unwrap();
            if *missing > 0 {
                *missing -= 1;
                return Err(CloudError::ResourceNotFound("BlobNotFound".to_string()));
            }
        }

        let mut log = self.log.lock().unwrap();
        if let Some(batch) = self.batches.lock().unwrap().pop_front() {
            log.extend(batch);
        }

        // offset 以降のチャンクを返す
        let mut position = 0u64;
        let mut chunks: Vec<Result<Bytes>> = Vec::new();
        for chunk in log.iter() {
            let end = position + chunk.len() as u64;
            if end > offset {
                let start = offset.saturating_sub(position) as usize;
                chunks.push(Ok(Bytes::copy_from_slice(&chunk[start..])));
            }
            position = end;
        }

        if self.fail_after_first_chunk && !chunks.is_empty() {
            chunks.truncate(1);
            chunks.push(Err(CloudError::StorageError {
                status: 500,
                message: "connection reset".to_string(),
            }));
        }

        Ok(futures_util::stream::iter(chunks).boxed())
    }
}
