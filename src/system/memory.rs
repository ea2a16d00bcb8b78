//! In-memory object store for tests and dry runs
//!
//! Keeps objects and open multipart uploads in memory, records every call,
//! and can inject failures, delays, truncated bodies and mid-download object
//! replacement.

use async_trait::async_trait;
use bytes::Bytes;
use hauler_core_interface::{
    AbortMultipartUploadRequest, CompleteMultipartUploadRequest, CompleteMultipartUploadResponse,
    CreateMultipartUploadRequest, CreateMultipartUploadResponse, GetObjectRequest,
    GetObjectResponse, HeadObjectRequest, HeadObjectResponse, ListObjectsRequest,
    ListObjectsResponse, ObjectStore, ObjectSummary, PutObjectRequest, PutObjectResponse,
    StoreError, StoreResult, UploadPartRequest, UploadPartResponse,
};
use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

/// Store operations, as recorded in the call log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    GetObject,
    HeadObject,
    PutObject,
    CreateMultipartUpload,
    UploadPart,
    CompleteMultipartUpload,
    AbortMultipartUpload,
    ListObjects,
}

/// Misbehaviour to inject into a [`MemoryStore`]
#[derive(Debug, Clone)]
pub enum Fault {
    /// Fail the next `times` calls of `operation` on `key`
    Fail {
        operation: Operation,
        key: String,
        error: StoreError,
        times: u32,
    },
    /// Return half the body for the next `times` reads of `key` starting at `offset`
    TruncateBody { key: String, offset: u64, times: u32 },
    /// Report a different etag for reads of `key` starting at `offset`
    ChangeEtag { key: String, offset: u64 },
    /// Sleep before serving data calls on `key`
    Delay { key: String, delay: Duration },
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    etag: String,
    version_id: String,
    content_type: Option<String>,
    /// Native part sizes for objects assembled from a multipart upload
    part_sizes: Vec<usize>,
    last_modified: SystemTime,
}

impl StoredObject {
    /// Byte span of native part `number` (1-based)
    fn part_span(&self, number: u32) -> Option<(usize, usize)> {
        if self.part_sizes.is_empty() {
            return (number == 1).then_some((0, self.data.len()));
        }
        let index = usize::try_from(number).ok()?.checked_sub(1)?;
        let size = *self.part_sizes.get(index)?;
        let start: usize = self.part_sizes[..index].iter().sum();
        Some((start, start + size))
    }

    fn parts_count(&self) -> Option<u32> {
        (!self.part_sizes.is_empty()).then(|| self.part_sizes.len() as u32)
    }
}

#[derive(Debug)]
struct PendingUpload {
    bucket: String,
    key: String,
    content_type: Option<String>,
    parts: BTreeMap<u32, Bytes>,
}

#[derive(Debug, Default)]
struct State {
    objects: HashMap<(String, String), StoredObject>,
    uploads: HashMap<String, PendingUpload>,
    calls: Vec<(Operation, String)>,
    get_requests: Vec<GetObjectRequest>,
    completed: HashMap<String, Vec<u32>>,
    faults: Vec<Fault>,
    generation: u64,
    page_size: Option<usize>,
}

impl State {
    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    fn record(&mut self, operation: Operation, key: &str) {
        self.calls.push((operation, key.to_string()));
    }

    fn take_failure(&mut self, operation: Operation, key: &str) -> Option<StoreError> {
        for fault in &mut self.faults {
            if let Fault::Fail {
                operation: op,
                key: k,
                error,
                times,
            } = fault
            {
                if *op == operation && k == key && *times > 0 {
                    *times -= 1;
                    return Some(error.clone());
                }
            }
        }
        None
    }

    fn take_truncation(&mut self, key: &str, at: u64) -> bool {
        for fault in &mut self.faults {
            if let Fault::TruncateBody { key: k, offset, times } = fault {
                if k == key && *offset == at && *times > 0 {
                    *times -= 1;
                    return true;
                }
            }
        }
        false
    }

    fn etag_changed(&self, key: &str, at: u64) -> bool {
        self.faults.iter().any(|fault| {
            matches!(fault, Fault::ChangeEtag { key: k, offset } if k == key && *offset == at)
        })
    }

    fn delay_for(&self, key: &str) -> Option<Duration> {
        self.faults.iter().find_map(|fault| match fault {
            Fault::Delay { key: k, delay } if k == key => Some(*delay),
            _ => None,
        })
    }

    fn object(&self, bucket: &str, key: &str) -> StoreResult<&StoredObject> {
        self.objects
            .get(&(bucket.to_string(), key.to_string()))
            .ok_or_else(|| StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    fn insert(
        &mut self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: Option<String>,
        part_sizes: Vec<usize>,
    ) -> (String, String) {
        let generation = self.next_generation();
        let object = StoredObject {
            data,
            etag: format!("\"etag-{}\"", generation),
            version_id: format!("v{}", generation),
            content_type,
            part_sizes,
            last_modified: SystemTime::now(),
        };
        let tags = (object.etag.clone(), object.version_id.clone());
        self.objects.insert((bucket.to_string(), key.to_string()), object);
        tags
    }
}

/// Object store kept entirely in memory
///
/// # Example
///
/// ```rust
/// use hauler::MemoryStore;
///
/// let store = MemoryStore::new();
/// store.insert("bucket", "hello.txt", b"Hello, World!".to_vec());
/// assert_eq!(store.object("bucket", "hello.txt").unwrap(), b"Hello, World!");
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store an object as if by a single put
    pub fn insert(&self, bucket: &str, key: &str, data: Vec<u8>) {
        self.state().insert(bucket, key, Bytes::from(data), None, Vec::new());
    }

    /// Store an object as if assembled from parts of `part_size` bytes
    pub fn insert_multipart(&self, bucket: &str, key: &str, data: &[u8], part_size: usize) {
        let part_size = part_size.max(1);
        let mut sizes: Vec<usize> = data.chunks(part_size).map(<[u8]>::len).collect();
        if sizes.is_empty() {
            sizes.push(0);
        }
        self.state()
            .insert(bucket, key, Bytes::copy_from_slice(data), None, sizes);
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.state()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|object| object.data.to_vec())
    }

    /// Keys in `bucket`, sorted
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .state()
            .objects
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn inject(&self, fault: Fault) {
        self.state().faults.push(fault);
    }

    /// Limit list pages to `size` keys
    pub fn set_page_size(&self, size: usize) {
        self.state().page_size = Some(size.max(1));
    }

    /// Operations in the order they were called
    pub fn operations(&self) -> Vec<Operation> {
        self.state().calls.iter().map(|(op, _)| *op).collect()
    }

    pub fn count(&self, operation: Operation) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|(op, _)| *op == operation)
            .count()
    }

    /// Keys touched by `operation`, in call order
    pub fn keys_for(&self, operation: Operation) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter(|(op, _)| *op == operation)
            .map(|(_, key)| key.clone())
            .collect()
    }

    pub fn get_requests(&self) -> Vec<GetObjectRequest> {
        self.state().get_requests.clone()
    }

    /// Part numbers, as sent, of the last completed upload of `key`
    pub fn completed_part_numbers(&self, key: &str) -> Option<Vec<u32>> {
        self.state().completed.get(key).cloned()
    }

    /// Multipart uploads created but neither completed nor aborted
    pub fn open_uploads(&self) -> usize {
        self.state().uploads.len()
    }

    async fn maybe_delay(&self, key: &str) {
        let delay = self.state().delay_for(key);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Parse `bytes=a-b`, `bytes=a-` or `bytes=-n` into `[start, end)`
fn parse_range(range: &str, len: usize) -> Option<(usize, usize)> {
    let (first, last) = range.strip_prefix("bytes=")?.split_once('-')?;
    let (start, end) = match (first.is_empty(), last.is_empty()) {
        (true, false) => (len.saturating_sub(last.parse().ok()?), len),
        (false, true) => (first.parse().ok()?, len),
        (false, false) => {
            let last: usize = last.parse().ok()?;
            (first.parse().ok()?, (last + 1).min(len))
        }
        (true, true) => return None,
    };
    (start < end && start < len).then_some((start, end))
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get_object(&self, request: GetObjectRequest) -> StoreResult<GetObjectResponse> {
        {
            let mut state = self.state();
            state.record(Operation::GetObject, &request.key);
            state.get_requests.push(request.clone());
        }
        self.maybe_delay(&request.key).await;

        let mut state = self.state();
        if let Some(err) = state.take_failure(Operation::GetObject, &request.key) {
            return Err(err);
        }
        let object = state.object(&request.bucket, &request.key)?.clone();
        let total = object.data.len();

        let (start, end) = if let Some(number) = request.part_number {
            object
                .part_span(number)
                .ok_or_else(|| StoreError::InvalidRange(format!("part {}", number)))?
        } else if let Some(range) = &request.range {
            parse_range(range, total).ok_or_else(|| StoreError::InvalidRange(range.clone()))?
        } else {
            (0, total)
        };

        let offset = start as u64;
        let mut body = object.data.slice(start..end);
        if state.take_truncation(&request.key, offset) {
            body = body.slice(..body.len() / 2);
        }
        let etag = if state.etag_changed(&request.key, offset) {
            "\"changed\"".to_string()
        } else {
            object.etag.clone()
        };
        let partial = request.part_number.is_some() || request.range.is_some();

        Ok(GetObjectResponse {
            body: Box::new(Cursor::new(body)),
            content_length: (end - start) as u64,
            content_range: (partial && end > start)
                .then(|| format!("bytes {}-{}/{}", start, end - 1, total)),
            content_type: object.content_type.clone(),
            etag: Some(etag),
            version_id: Some(object.version_id.clone()),
            parts_count: object.parts_count(),
            last_modified: Some(object.last_modified),
        })
    }

    async fn head_object(&self, request: HeadObjectRequest) -> StoreResult<HeadObjectResponse> {
        let mut state = self.state();
        state.record(Operation::HeadObject, &request.key);
        if let Some(err) = state.take_failure(Operation::HeadObject, &request.key) {
            return Err(err);
        }
        let object = state.object(&request.bucket, &request.key)?;

        let content_length = match request.part_number {
            Some(number) => {
                let (start, end) = object
                    .part_span(number)
                    .ok_or_else(|| StoreError::InvalidRange(format!("part {}", number)))?;
                end - start
            }
            None => object.data.len(),
        };

        Ok(HeadObjectResponse {
            content_length: content_length as u64,
            content_type: object.content_type.clone(),
            etag: Some(object.etag.clone()),
            version_id: Some(object.version_id.clone()),
            parts_count: object.parts_count(),
            last_modified: Some(object.last_modified),
        })
    }

    async fn put_object(&self, request: PutObjectRequest) -> StoreResult<PutObjectResponse> {
        self.state().record(Operation::PutObject, &request.key);
        self.maybe_delay(&request.key).await;

        let mut state = self.state();
        if let Some(err) = state.take_failure(Operation::PutObject, &request.key) {
            return Err(err);
        }
        let (etag, version_id) = state.insert(
            &request.bucket,
            &request.key,
            request.body,
            request.content_type,
            Vec::new(),
        );
        Ok(PutObjectResponse {
            etag: Some(etag),
            version_id: Some(version_id),
        })
    }

    async fn create_multipart_upload(
        &self,
        request: CreateMultipartUploadRequest,
    ) -> StoreResult<CreateMultipartUploadResponse> {
        let mut state = self.state();
        state.record(Operation::CreateMultipartUpload, &request.key);
        if let Some(err) = state.take_failure(Operation::CreateMultipartUpload, &request.key) {
            return Err(err);
        }
        let upload_id = format!("upload-{}", state.next_generation());
        state.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                bucket: request.bucket,
                key: request.key,
                content_type: request.content_type,
                parts: BTreeMap::new(),
            },
        );
        Ok(CreateMultipartUploadResponse { upload_id })
    }

    async fn upload_part(&self, request: UploadPartRequest) -> StoreResult<UploadPartResponse> {
        self.state().record(Operation::UploadPart, &request.key);
        self.maybe_delay(&request.key).await;

        let mut state = self.state();
        if let Some(err) = state.take_failure(Operation::UploadPart, &request.key) {
            return Err(err);
        }
        let generation = state.next_generation();
        let upload = state
            .uploads
            .get_mut(&request.upload_id)
            .ok_or_else(|| StoreError::NoSuchUpload(request.upload_id.clone()))?;
        upload.parts.insert(request.part_number, request.body);
        Ok(UploadPartResponse {
            etag: Some(format!("\"part-{}\"", generation)),
        })
    }

    async fn complete_multipart_upload(
        &self,
        request: CompleteMultipartUploadRequest,
    ) -> StoreResult<CompleteMultipartUploadResponse> {
        let mut state = self.state();
        state.record(Operation::CompleteMultipartUpload, &request.key);
        if let Some(err) = state.take_failure(Operation::CompleteMultipartUpload, &request.key) {
            return Err(err);
        }

        let numbers: Vec<u32> = request.parts.iter().map(|p| p.part_number).collect();
        state.completed.insert(request.key.clone(), numbers.clone());

        let upload = state
            .uploads
            .remove(&request.upload_id)
            .ok_or_else(|| StoreError::NoSuchUpload(request.upload_id.clone()))?;

        let mut data = Vec::new();
        let mut sizes = Vec::with_capacity(numbers.len());
        for number in &numbers {
            let part = upload.parts.get(number).ok_or_else(|| StoreError::Service {
                code: "InvalidPart".to_string(),
                message: format!("part {} was never uploaded", number),
            })?;
            data.extend_from_slice(part);
            sizes.push(part.len());
        }

        let (etag, version_id) = state.insert(
            &upload.bucket,
            &upload.key,
            Bytes::from(data),
            upload.content_type,
            sizes,
        );
        Ok(CompleteMultipartUploadResponse {
            etag: Some(etag),
            version_id: Some(version_id),
        })
    }

    async fn abort_multipart_upload(&self, request: AbortMultipartUploadRequest) -> StoreResult<()> {
        let mut state = self.state();
        state.record(Operation::AbortMultipartUpload, &request.key);
        state
            .uploads
            .remove(&request.upload_id)
            .map(|_| ())
            .ok_or(StoreError::NoSuchUpload(request.upload_id))
    }

    async fn list_objects(&self, request: ListObjectsRequest) -> StoreResult<ListObjectsResponse> {
        let mut state = self.state();
        let prefix = request.prefix.clone().unwrap_or_default();
        state.record(Operation::ListObjects, &prefix);
        if let Some(err) = state.take_failure(Operation::ListObjects, &prefix) {
            return Err(err);
        }

        let mut matching: Vec<ObjectSummary> = state
            .objects
            .iter()
            .filter(|((bucket, key), _)| *bucket == request.bucket && key.starts_with(&prefix))
            .map(|((_, key), object)| ObjectSummary {
                key: key.clone(),
                size: object.data.len() as u64,
                etag: Some(object.etag.clone()),
                last_modified: Some(object.last_modified),
            })
            .collect();
        matching.sort_by(|a, b| a.key.cmp(&b.key));

        let start = match &request.continuation_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| StoreError::Other(format!("bad continuation token {}", token)))?,
            None => 0,
        };
        let page_size = request
            .max_keys
            .map(|n| n as usize)
            .or(state.page_size)
            .unwrap_or(1000)
            .max(1);
        let end = (start + page_size).min(matching.len());
        let is_truncated = end < matching.len();

        Ok(ListObjectsResponse {
            objects: matching.get(start..end).map(<[_]>::to_vec).unwrap_or_default(),
            next_continuation_token: is_truncated.then(|| end.to_string()),
            is_truncated,
        })
    }
}
