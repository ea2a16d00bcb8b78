/*!
 * Single and multipart object upload
 *
 * The source stream is read once, in order, into pooled part buffers. Bodies
 * that end before the multipart threshold go out in one `PutObject`. Larger
 * bodies open a multipart upload and feed parts through a bounded channel to
 * `concurrency` workers. Any failure or cancellation aborts the upload so no
 * partial object is left behind.
 */

use crate::client::Options;
use crate::config::MAX_UPLOAD_PARTS;
use crate::core::buffer_pool::{BufferPool, PooledBuffer};
use crate::core::plan::TransferPlan;
use crate::core::progress::{
    BytesTransferredEvent, ProgressListeners, TransferCompleteEvent, TransferFailedEvent,
    TransferStartEvent,
};
use crate::core::retry::{Backoff, ShouldRetry};
use crate::error::{Result, TransferError};
use bytes::Bytes;
use hauler_core_interface::{
    AbortMultipartUploadRequest, CompleteMultipartUploadRequest, CompletedPart,
    CreateMultipartUploadRequest, ObjectStore, PutObjectRequest, UploadPartRequest,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Request to upload one object
pub struct PutObjectInput {
    pub bucket: String,
    pub key: String,
    pub body: Box<dyn AsyncRead + Send + Unpin>,
    /// Length of `body` when known; lets large uploads pick a part size that
    /// stays within the part limit
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl PutObjectInput {
    pub fn new(
        bucket: impl Into<String>,
        key: impl Into<String>,
        body: impl AsyncRead + Send + Unpin + 'static,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            body: Box::new(body),
            content_length: None,
            content_type: None,
            metadata: HashMap::new(),
        }
    }

    /// Upload an in-memory buffer
    pub fn from_bytes(bucket: impl Into<String>, key: impl Into<String>, data: Vec<u8>) -> Self {
        let len = data.len() as u64;
        Self::new(bucket, key, std::io::Cursor::new(data)).with_content_length(len)
    }

    pub fn with_content_length(mut self, len: u64) -> Self {
        self.content_length = Some(len);
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl fmt::Debug for PutObjectInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PutObjectInput")
            .field("bucket", &self.bucket)
            .field("key", &self.key)
            .field("content_length", &self.content_length)
            .field("content_type", &self.content_type)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Result of a finished upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutObjectOutput {
    pub etag: Option<String>,
    pub version_id: Option<String>,
    /// Set when the body went through a multipart upload
    pub upload_id: Option<String>,
    pub parts_count: u32,
    pub bytes_transferred: u64,
}

/// Upload a body, choosing single or multipart by the configured threshold
pub async fn put_object(
    store: Arc<dyn ObjectStore>,
    options: &Options,
    mut input: PutObjectInput,
    cancel: &CancellationToken,
) -> Result<PutObjectOutput> {
    options.config.validate()?;
    let plan = TransferPlan::upload(input.content_length, options.config.part_size_bytes)?;
    let upload_cancel = cancel.child_token();

    let progress = Arc::new(UploadProgress {
        listeners: options.progress.clone(),
        bucket: input.bucket.clone(),
        key: input.key.clone(),
        total_bytes: input.content_length,
        transferred: Mutex::new(0),
    });
    progress.start();

    let result = upload(store, options, &mut input, plan, &progress, &upload_cancel).await;
    // stop anything still running for this upload
    upload_cancel.cancel();

    match &result {
        Ok(output) => {
            info!(
                key = %input.key,
                bytes = output.bytes_transferred,
                parts = output.parts_count,
                "upload complete"
            );
            progress.complete();
        }
        Err(err) => {
            error!(key = %input.key, error = %err, "upload failed");
            progress.failed(err);
        }
    }
    result
}

/// Where an upload lands, split from the body so it can be shared across tasks
struct UploadTarget {
    bucket: String,
    key: String,
    content_type: Option<String>,
    metadata: HashMap<String, String>,
}

impl UploadTarget {
    fn of(input: &PutObjectInput) -> Self {
        Self {
            bucket: input.bucket.clone(),
            key: input.key.clone(),
            content_type: input.content_type.clone(),
            metadata: input.metadata.clone(),
        }
    }
}

async fn upload(
    store: Arc<dyn ObjectStore>,
    options: &Options,
    input: &mut PutObjectInput,
    plan: TransferPlan,
    progress: &Arc<UploadProgress>,
    cancel: &CancellationToken,
) -> Result<PutObjectOutput> {
    let target = UploadTarget::of(input);
    let body = &mut input.body;
    let config = &options.config;
    let part_size = plan.part_size as usize;
    let threshold = config.multipart_upload_threshold.max(1);

    // Parts read before the single/multipart decision is made
    let prefix_parts = usize::try_from(threshold.div_ceil(plan.part_size)).unwrap_or(usize::MAX);
    let pool = match &options.buffer_pool {
        Some(pool) if pool.capacity() < prefix_parts => {
            return Err(TransferError::Config(format!(
                "buffer pool of {} buffers cannot hold the {} parts read before the multipart threshold",
                pool.capacity(),
                prefix_parts
            )));
        }
        Some(pool) => pool.clone(),
        None => BufferPool::new(config.concurrency.max(prefix_parts) + 1, part_size),
    };

    // Reserve every prefix buffer in one step; a shared pool is all-or-nothing
    let mut reserved = pool.get_many(prefix_parts, cancel).await?.into_iter();
    let mut prefix = Vec::new();
    let mut buffered: u64 = 0;
    let mut eof = false;
    while buffered < threshold {
        let Some(mut buffer) = reserved.next() else {
            break;
        };
        let n = read_part(&mut **body, &mut buffer, part_size, cancel).await?;
        buffered += n as u64;
        if n > 0 {
            prefix.push(buffer);
        }
        if n < part_size {
            eof = true;
            break;
        }
    }

    drop(reserved);

    if eof && buffered < threshold {
        return single_put(store, &target, prefix, buffered, progress, cancel).await;
    }

    multipart_put(store, options, &target, body, prefix, eof, part_size, pool, progress, cancel).await
}

async fn single_put(
    store: Arc<dyn ObjectStore>,
    input: &UploadTarget,
    parts: Vec<PooledBuffer>,
    len: u64,
    progress: &UploadProgress,
    cancel: &CancellationToken,
) -> Result<PutObjectOutput> {
    let body = match parts.len() {
        0 => Bytes::new(),
        1 => Bytes::copy_from_slice(&parts[0]),
        _ => {
            let mut joined = Vec::with_capacity(len as usize);
            for part in &parts {
                joined.extend_from_slice(part);
            }
            Bytes::from(joined)
        }
    };
    drop(parts);

    debug!(key = %input.key, bytes = len, "single request upload");
    let request = PutObjectRequest {
        bucket: input.bucket.clone(),
        key: input.key.clone(),
        body,
        content_type: input.content_type.clone(),
        metadata: input.metadata.clone(),
    };
    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(TransferError::Aborted),
        response = store.put_object(request) => response?,
    };
    progress.record(len);

    Ok(PutObjectOutput {
        etag: response.etag,
        version_id: response.version_id,
        upload_id: None,
        parts_count: 1,
        bytes_transferred: len,
    })
}

#[allow(clippy::too_many_arguments)]
async fn multipart_put(
    store: Arc<dyn ObjectStore>,
    options: &Options,
    input: &UploadTarget,
    body: &mut Box<dyn AsyncRead + Send + Unpin>,
    prefix: Vec<PooledBuffer>,
    mut eof: bool,
    part_size: usize,
    pool: BufferPool,
    progress: &Arc<UploadProgress>,
    cancel: &CancellationToken,
) -> Result<PutObjectOutput> {
    if cancel.is_cancelled() {
        return Err(TransferError::Aborted);
    }
    let created = store
        .create_multipart_upload(CreateMultipartUploadRequest {
            bucket: input.bucket.clone(),
            key: input.key.clone(),
            content_type: input.content_type.clone(),
            metadata: input.metadata.clone(),
        })
        .await?;
    let upload_id = created.upload_id;
    info!(key = %input.key, upload_id = %upload_id, part_size, "started multipart upload");

    let uploader = Arc::new(PartUploader {
        store: store.clone(),
        bucket: input.bucket.clone(),
        key: input.key.clone(),
        upload_id: upload_id.clone(),
        decider: options.retry_decider.clone(),
        backoff: options.backoff(),
        max_retries: options.config.part_body_max_retries,
        progress: progress.clone(),
        completed: Mutex::new(Vec::new()),
        first_error: Mutex::new(None),
        cancel: cancel.clone(),
    });

    let concurrency = options.config.concurrency.max(1);
    let (tx, rx) = async_channel::bounded::<PendingPart>(concurrency);
    let mut workers = JoinSet::new();
    for _ in 0..concurrency {
        workers.spawn(uploader.clone().run(rx.clone()));
    }
    drop(rx);

    // Producer: the body is consumed here, sequentially
    let produced: Result<u32> = async {
        let mut part_number: u32 = 0;
        let mut queue = prefix.into_iter();
        loop {
            let buffer = match queue.next() {
                Some(buffer) => buffer,
                None if eof => break,
                None => {
                    let mut buffer = pool.get(cancel).await?;
                    let n = read_part(&mut **body, &mut buffer, part_size, cancel).await?;
                    if n < part_size {
                        eof = true;
                    }
                    if n == 0 {
                        break;
                    }
                    buffer
                }
            };

            part_number += 1;
            if part_number > MAX_UPLOAD_PARTS {
                return Err(TransferError::Config(format!(
                    "body needs more than {} parts of {} bytes",
                    MAX_UPLOAD_PARTS, part_size
                )));
            }

            let part = PendingPart {
                part_number,
                buffer,
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransferError::Aborted),
                sent = tx.send(part) => {
                    if sent.is_err() {
                        // every worker has stopped; the latched error says why
                        return Err(TransferError::Aborted);
                    }
                }
            }
        }
        Ok(part_number)
    }
    .await;
    drop(tx);

    if let Err(err) = &produced {
        uploader.fail(err.clone());
    }
    while workers.join_next().await.is_some() {}

    let outcome = match uploader.take_error() {
        Some(err) => Err(err),
        None if cancel.is_cancelled() => Err(TransferError::Aborted),
        None => produced,
    };

    let parts_count = match outcome {
        Ok(count) => count,
        Err(err) => {
            abort(store.as_ref(), input, &upload_id).await;
            return Err(err);
        }
    };

    let mut parts = uploader.completed_parts();
    parts.sort_by_key(|part| part.part_number);

    let completed = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TransferError::Aborted),
        response = store.complete_multipart_upload(CompleteMultipartUploadRequest {
            bucket: input.bucket.clone(),
            key: input.key.clone(),
            upload_id: upload_id.clone(),
            parts,
        }) => response.map_err(TransferError::from),
    };

    match completed {
        Ok(response) => Ok(PutObjectOutput {
            etag: response.etag,
            version_id: response.version_id,
            upload_id: Some(upload_id),
            parts_count,
            bytes_transferred: progress.transferred(),
        }),
        Err(err) => {
            abort(store.as_ref(), input, &upload_id).await;
            Err(err)
        }
    }
}

/// Abort an upload; runs to completion even when the transfer was cancelled
async fn abort(store: &dyn ObjectStore, input: &UploadTarget, upload_id: &str) {
    warn!(key = %input.key, upload_id, "aborting multipart upload");
    let request = AbortMultipartUploadRequest {
        bucket: input.bucket.clone(),
        key: input.key.clone(),
        upload_id: upload_id.to_string(),
    };
    if let Err(err) = store.abort_multipart_upload(request).await {
        error!(key = %input.key, upload_id, error = %err, "failed to abort multipart upload");
    }
}

/// Fill `buffer` with up to `part_size` bytes; fewer means the body ended
async fn read_part<R>(
    body: &mut R,
    buffer: &mut PooledBuffer,
    part_size: usize,
    cancel: &CancellationToken,
) -> Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    buffer.clear();
    let mut limited = (&mut *body).take(part_size as u64);
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TransferError::Aborted),
        read = limited.read_to_end(buffer) => Ok(read?),
    }
}

struct PendingPart {
    part_number: u32,
    buffer: PooledBuffer,
}

struct PartUploader {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    key: String,
    upload_id: String,
    decider: Arc<dyn ShouldRetry>,
    backoff: Backoff,
    max_retries: u32,
    progress: Arc<UploadProgress>,
    completed: Mutex<Vec<CompletedPart>>,
    first_error: Mutex<Option<TransferError>>,
    cancel: CancellationToken,
}

impl PartUploader {
    async fn run(self: Arc<Self>, rx: async_channel::Receiver<PendingPart>) {
        loop {
            let part = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                part = rx.recv() => match part {
                    Ok(part) => part,
                    Err(_) => return,
                },
            };
            if let Err(err) = self.upload(part).await {
                self.fail(err);
                return;
            }
        }
    }

    /// Upload one part; the buffer stays checked out until the store acknowledges it
    async fn upload(&self, part: PendingPart) -> Result<()> {
        // copy out so the buffer keeps its allocation for the next part
        let body = Bytes::copy_from_slice(&part.buffer);
        let len = body.len() as u64;

        let mut attempt = 0;
        let response = loop {
            attempt += 1;
            let request = UploadPartRequest {
                bucket: self.bucket.clone(),
                key: self.key.clone(),
                upload_id: self.upload_id.clone(),
                part_number: part.part_number,
                body: body.clone(),
            };
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(TransferError::Aborted),
                result = self.store.upload_part(request) => result,
            };

            match result {
                Ok(response) => break response,
                Err(err) if attempt <= self.max_retries && self.decider.should_retry(&err) => {
                    let delay = self.backoff.delay(attempt);
                    warn!(
                        key = %self.key,
                        part = part.part_number,
                        attempt,
                        error = %err,
                        "retrying part upload after {:?}",
                        delay
                    );
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Err(TransferError::Aborted),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(err) if attempt > 1 => {
                    return Err(TransferError::ChunkRetriesExhausted {
                        part: part.part_number,
                        attempts: attempt,
                        cause: err,
                    });
                }
                Err(err) => return Err(err.into()),
            }
        };
        let part_number = part.part_number;
        drop(part);

        debug!(key = %self.key, part = part_number, bytes = len, "part uploaded");
        self.progress.record(len);
        self.completed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(CompletedPart {
                part_number,
                etag: response.etag,
            });
        Ok(())
    }

    /// Latch the first failure and stop the other workers and the producer
    fn fail(&self, err: TransferError) {
        let mut first = self.first_error.lock().unwrap_or_else(PoisonError::into_inner);
        if first.is_none() && !(matches!(err, TransferError::Aborted) && self.cancel.is_cancelled()) {
            *first = Some(err);
        }
        drop(first);
        self.cancel.cancel();
    }

    fn take_error(&self) -> Option<TransferError> {
        self.first_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn completed_parts(&self) -> Vec<CompletedPart> {
        std::mem::take(&mut *self.completed.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

struct UploadProgress {
    listeners: ProgressListeners,
    bucket: String,
    key: String,
    total_bytes: Option<u64>,
    transferred: Mutex<u64>,
}

impl UploadProgress {
    fn start(&self) {
        self.listeners.emit_transfer_start(&TransferStartEvent {
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            total_bytes: self.total_bytes,
        });
    }

    fn record(&self, n: u64) {
        let mut so_far = self.transferred.lock().unwrap_or_else(PoisonError::into_inner);
        *so_far += n;
        self.listeners.emit_bytes_transferred(&BytesTransferredEvent {
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            bytes_transferred: *so_far,
            total_bytes: self.total_bytes,
        });
    }

    fn transferred(&self) -> u64 {
        *self.transferred.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn complete(&self) {
        self.listeners.emit_transfer_complete(&TransferCompleteEvent {
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            bytes_transferred: self.transferred(),
        });
    }

    fn failed(&self, err: &TransferError) {
        self.listeners.emit_transfer_failed(&TransferFailedEvent {
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            error: err.clone(),
            bytes_transferred: self.transferred(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransferConfig;
    use crate::system::memory::{Fault, MemoryStore, Operation};
    use hauler_core_interface::StoreError;
    use std::time::Duration;

    const MIB: usize = 1024 * 1024;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 253) as u8).collect()
    }

    fn options(part_size: usize, concurrency: usize) -> Options {
        Options::new(TransferConfig {
            part_size_bytes: part_size as u64,
            multipart_upload_threshold: 16 * MIB as u64,
            concurrency,
            retry_initial_delay_ms: 1,
            retry_max_delay_ms: 5,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_small_body_uses_single_put() {
        let store = Arc::new(MemoryStore::new());
        let output = put_object(
            store.clone(),
            &options(8 * MIB, 3),
            PutObjectInput::from_bytes("bucket", "small.txt", b"tiny".to_vec()),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(output.parts_count, 1);
        assert!(output.upload_id.is_none());
        assert_eq!(store.object("bucket", "small.txt").unwrap(), b"tiny");
        assert_eq!(store.count(Operation::PutObject), 1);
        assert_eq!(store.count(Operation::CreateMultipartUpload), 0);
    }

    #[tokio::test]
    async fn test_parts_completed_in_order() {
        let data = pattern(21 * MIB);
        let store = Arc::new(MemoryStore::new());
        // make the first part the slowest to finish
        store.inject(Fault::Fail {
            operation: Operation::UploadPart,
            key: "big.bin".into(),
            error: StoreError::Timeout("slow".into()),
            times: 1,
        });

        let output = put_object(
            store.clone(),
            &options(8 * MIB, 3),
            PutObjectInput::from_bytes("bucket", "big.bin", data.clone()),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(output.parts_count, 3);
        assert_eq!(output.bytes_transferred, data.len() as u64);
        assert_eq!(store.completed_part_numbers("big.bin").unwrap(), vec![1, 2, 3]);
        assert!(store.object("bucket", "big.bin").unwrap() == data);
    }

    #[tokio::test]
    async fn test_unsized_stream_goes_multipart() {
        let data = pattern(17 * MIB);
        let store = Arc::new(MemoryStore::new());
        let (mut writer, reader) = tokio::io::duplex(64 * 1024);
        let feeder = {
            let data = data.clone();
            tokio::spawn(async move {
                use tokio::io::AsyncWriteExt;
                writer.write_all(&data).await.unwrap();
            })
        };

        let output = put_object(
            store.clone(),
            &options(5 * MIB, 2),
            PutObjectInput::new("bucket", "stream.bin", reader),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        feeder.await.unwrap();

        assert_eq!(output.parts_count, 4);
        assert!(store.object("bucket", "stream.bin").unwrap() == data);
    }

    #[tokio::test]
    async fn test_failed_part_aborts_upload() {
        let store = Arc::new(MemoryStore::new());
        store.inject(Fault::Fail {
            operation: Operation::UploadPart,
            key: "doomed.bin".into(),
            error: StoreError::AccessDenied("no".into()),
            times: u32::MAX,
        });

        let err = put_object(
            store.clone(),
            &options(8 * MIB, 3),
            PutObjectInput::from_bytes("bucket", "doomed.bin", pattern(20 * MIB)),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, TransferError::TransferFailed { .. }));
        assert_eq!(store.count(Operation::AbortMultipartUpload), 1);
        assert_eq!(store.count(Operation::CompleteMultipartUpload), 0);
        assert_eq!(store.open_uploads(), 0);
        assert!(store.object("bucket", "doomed.bin").is_none());
    }

    #[tokio::test]
    async fn test_cancel_aborts_upload() {
        let store = Arc::new(MemoryStore::new());
        store.inject(Fault::Delay {
            key: "slow.bin".into(),
            delay: Duration::from_secs(5),
        });
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let err = tokio::time::timeout(
            Duration::from_secs(2),
            put_object(
                store.clone(),
                &options(8 * MIB, 3),
                PutObjectInput::from_bytes("bucket", "slow.bin", pattern(20 * MIB)),
                &cancel,
            ),
        )
        .await
        .expect("cancellation should end the upload promptly")
        .unwrap_err();

        assert!(matches!(err, TransferError::Aborted));
        assert_eq!(store.count(Operation::AbortMultipartUpload), 1);
        assert_eq!(store.open_uploads(), 0);
    }

    #[tokio::test]
    async fn test_shared_pool_too_small() {
        let mut opts = options(8 * MIB, 3);
        opts.buffer_pool = Some(BufferPool::new(1, 8 * MIB));
        let err = put_object(
            Arc::new(MemoryStore::new()),
            &opts,
            PutObjectInput::from_bytes("bucket", "x", vec![1; 10]),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TransferError::Config(_)));
    }

    #[tokio::test]
    async fn test_concurrent_uploads_share_one_pool() {
        let store = Arc::new(MemoryStore::new());
        let pool = BufferPool::new(3, 8 * MIB);
        let mut opts = options(8 * MIB, 3);
        opts.buffer_pool = Some(pool.clone());

        // each upload reads two parts before choosing multipart; four of them
        // contend for three buffers
        let mut uploads = tokio::task::JoinSet::new();
        for i in 0..4 {
            let store = store.clone();
            let opts = opts.clone();
            uploads.spawn(async move {
                put_object(
                    store,
                    &opts,
                    PutObjectInput::from_bytes("bucket", format!("file{}.bin", i), pattern(20 * MIB)),
                    &CancellationToken::new(),
                )
                .await
            });
        }

        tokio::time::timeout(Duration::from_secs(20), async {
            while let Some(joined) = uploads.join_next().await {
                assert_eq!(joined.unwrap().unwrap().parts_count, 3);
            }
        })
        .await
        .expect("uploads sharing a pool must all finish");

        assert_eq!(store.keys("bucket").len(), 4);
        assert_eq!(pool.available(), 3);
    }

    #[tokio::test]
    async fn test_part_buffers_return_to_pool() {
        let store = Arc::new(MemoryStore::new());
        // buffers start empty, so any capacity seen later came from an upload
        let pool = BufferPool::new(4, 0);
        let mut opts = options(8 * MIB, 2);
        opts.buffer_pool = Some(pool.clone());

        put_object(
            store,
            &opts,
            PutObjectInput::from_bytes("bucket", "reuse.bin", pattern(20 * MIB)),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let buffers = pool.get_many(4, &CancellationToken::new()).await.unwrap();
        let recycled = buffers.iter().filter(|b| b.capacity() >= 4 * MIB).count();
        assert!(recycled >= 2, "only {} buffers kept their allocation", recycled);
    }
}
