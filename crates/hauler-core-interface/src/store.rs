//! Object store boundary: request/response types and the [`ObjectStore`] trait

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::time::SystemTime;
use thiserror::Error;
use tokio::io::AsyncRead;

/// Streaming response body
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors reported by an [`ObjectStore`] implementation
///
/// Payloads are plain strings so the error can be cloned into every listener
/// and latched by several workers at once.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Object not found in bucket
    #[error("Object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    /// Multipart upload id is unknown or already finished
    #[error("No such upload: {0}")]
    NoSuchUpload(String),

    /// Requested range cannot be satisfied
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    /// Access denied error
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Service error with specific error code
    #[error("Service error ({code}): {message}")]
    Service { code: String, message: String },

    /// Network error
    #[error("Network error: {0}")]
    Network(String),

    /// Timeout error
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Response body could not be read to the end
    #[error("Failed to read response body: {0}")]
    BodyRead(String),

    #[error("{0}")]
    Other(String),
}

impl StoreError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Network(_) => true,
            StoreError::Timeout(_) => true,
            StoreError::BodyRead(_) => true,
            StoreError::Service { code, .. } => is_retryable_code(code),
            StoreError::Other(msg) => {
                let lower = msg.to_lowercase();
                lower.contains("connection reset")
                    || lower.contains("connection timed out")
                    || lower.contains("broken pipe")
                    || lower.contains("temporarily unavailable")
            }
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::BodyRead(err.to_string())
    }
}

/// Check if a service error code is retryable
pub fn is_retryable_code(code: &str) -> bool {
    matches!(
        code,
        "RequestTimeout"
            | "ServiceUnavailable"
            | "InternalError"
            | "SlowDown"
            | "RequestTimeTooSkewed"
    )
}

/// Fetch an object, a byte range of it, or one of its native parts
#[derive(Debug, Clone, Default)]
pub struct GetObjectRequest {
    pub bucket: String,
    pub key: String,
    /// HTTP byte range, `bytes=start-end` or `bytes=start-`
    pub range: Option<String>,
    /// 1-based native part number
    pub part_number: Option<u32>,
    pub version_id: Option<String>,
    /// Fail with a precondition error if the current etag differs
    pub if_match: Option<String>,
    /// Ask the store to validate response checksums
    pub checksum_enabled: bool,
}

impl GetObjectRequest {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            ..Default::default()
        }
    }
}

pub struct GetObjectResponse {
    pub body: ByteStream,
    /// Length of this response's body, not of the whole object
    pub content_length: u64,
    /// `bytes start-end/total` when a range or part was served
    pub content_range: Option<String>,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub version_id: Option<String>,
    pub parts_count: Option<u32>,
    pub last_modified: Option<SystemTime>,
}

impl fmt::Debug for GetObjectResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GetObjectResponse")
            .field("content_length", &self.content_length)
            .field("content_range", &self.content_range)
            .field("etag", &self.etag)
            .field("version_id", &self.version_id)
            .field("parts_count", &self.parts_count)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct HeadObjectRequest {
    pub bucket: String,
    pub key: String,
    pub part_number: Option<u32>,
    pub version_id: Option<String>,
}

impl HeadObjectRequest {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HeadObjectResponse {
    /// Object size, or the size of the requested part when `part_number` was set
    pub content_length: u64,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub version_id: Option<String>,
    /// Number of native parts for objects created by multipart upload
    pub parts_count: Option<u32>,
    pub last_modified: Option<SystemTime>,
}

#[derive(Debug, Clone, Default)]
pub struct PutObjectRequest {
    pub bucket: String,
    pub key: String,
    pub body: Bytes,
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct PutObjectResponse {
    pub etag: Option<String>,
    pub version_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CreateMultipartUploadRequest {
    pub bucket: String,
    pub key: String,
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct CreateMultipartUploadResponse {
    pub upload_id: String,
}

#[derive(Debug, Clone)]
pub struct UploadPartRequest {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    /// 1-based, at most 10 000
    pub part_number: u32,
    pub body: Bytes,
}

#[derive(Debug, Clone, Default)]
pub struct UploadPartResponse {
    pub etag: Option<String>,
}

/// Receipt of one uploaded part, echoed back on completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CompleteMultipartUploadRequest {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    /// Must be sorted by ascending part number
    pub parts: Vec<CompletedPart>,
}

#[derive(Debug, Clone, Default)]
pub struct CompleteMultipartUploadResponse {
    pub etag: Option<String>,
    pub version_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AbortMultipartUploadRequest {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct ListObjectsRequest {
    pub bucket: String,
    pub prefix: Option<String>,
    pub continuation_token: Option<String>,
    pub max_keys: Option<u32>,
}

impl ListObjectsRequest {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            ..Default::default()
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub etag: Option<String>,
    pub last_modified: Option<SystemTime>,
}

#[derive(Debug, Clone, Default)]
pub struct ListObjectsResponse {
    pub objects: Vec<ObjectSummary>,
    pub next_continuation_token: Option<String>,
    pub is_truncated: bool,
}

/// Remote blob store operations used by the transfer engine
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync + 'static` to work across async boundaries.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Fetch an object body, a range of it or a single native part
    async fn get_object(&self, request: GetObjectRequest) -> StoreResult<GetObjectResponse>;

    /// Fetch object metadata without a body
    async fn head_object(&self, request: HeadObjectRequest) -> StoreResult<HeadObjectResponse>;

    /// Store a whole object in one request
    async fn put_object(&self, request: PutObjectRequest) -> StoreResult<PutObjectResponse>;

    async fn create_multipart_upload(
        &self,
        request: CreateMultipartUploadRequest,
    ) -> StoreResult<CreateMultipartUploadResponse>;

    async fn upload_part(&self, request: UploadPartRequest) -> StoreResult<UploadPartResponse>;

    async fn complete_multipart_upload(
        &self,
        request: CompleteMultipartUploadRequest,
    ) -> StoreResult<CompleteMultipartUploadResponse>;

    /// Discard an in-progress multipart upload and its uploaded parts
    async fn abort_multipart_upload(&self, request: AbortMultipartUploadRequest) -> StoreResult<()>;

    /// List one page of objects under a prefix
    async fn list_objects(&self, request: ListObjectsRequest) -> StoreResult<ListObjectsResponse>;
}
