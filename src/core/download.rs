/*!
 * Concurrent object download
 *
 * A metadata probe decides between a single request and a multi-part plan.
 * Multi-part downloads run `concurrency` workers that claim part indices in
 * order, wait for the reader's window, check out a pooled buffer and fetch
 * the part, retrying failed or truncated bodies. Parts flow to a
 * [`ChunkedReader`] which hands bytes back in order.
 */

use crate::client::Options;
use crate::config::GetObjectType;
use crate::core::buffer_pool::{BufferPool, PooledBuffer};
use crate::core::chunked_reader::{deliver, ChunkDescriptor, ChunkSender, ChunkedReader, WindowGate};
use crate::core::plan::{parse_range, PartAddressing, TransferPlan};
use crate::core::progress::{BytesTransferredEvent, ProgressListeners, TransferStartEvent};
use crate::core::retry::{Backoff, ShouldRetry};
use crate::error::{Result, TransferError};
use hauler_core_interface::{
    GetObjectRequest, GetObjectResponse, HeadObjectRequest, HeadObjectResponse, ObjectStore,
    StoreError,
};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Request to download one object
#[derive(Debug, Clone, Default)]
pub struct GetObjectInput {
    pub bucket: String,
    pub key: String,
    /// `bytes=start-end`, `bytes=start-` or `bytes=-suffix`
    pub range: Option<String>,
    /// Fetch just this native part in one request
    pub part_number: Option<u32>,
    pub version_id: Option<String>,
}

impl GetObjectInput {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn with_range(mut self, range: impl Into<String>) -> Self {
        self.range = Some(range.into());
        self
    }

    pub fn with_part_number(mut self, part_number: u32) -> Self {
        self.part_number = Some(part_number);
        self
    }

    pub fn with_version_id(mut self, version_id: impl Into<String>) -> Self {
        self.version_id = Some(version_id.into());
        self
    }
}

/// A started download
#[derive(Debug)]
pub struct GetObjectOutput {
    /// Ordered bytes of the object (or requested range)
    pub body: ChunkedReader,
    /// Bytes the body will yield, when known up front
    pub content_length: Option<u64>,
    pub content_range: Option<String>,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub version_id: Option<String>,
    pub parts_count: Option<u32>,
    pub last_modified: Option<SystemTime>,
    pub plan: TransferPlan,
}

/// Result of [`download_object`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadObjectOutput {
    pub bytes_written: u64,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub version_id: Option<String>,
    pub parts_count: Option<u32>,
}

/// Probe, plan and start a download
pub async fn get_object(
    store: Arc<dyn ObjectStore>,
    options: &Options,
    input: GetObjectInput,
    cancel: &CancellationToken,
) -> Result<GetObjectOutput> {
    options.config.validate()?;
    let transfer_cancel = cancel.child_token();
    let fetcher = PartFetcher::new(store, options, &input, transfer_cancel.clone());

    if input.part_number.is_some() {
        return single_download(fetcher, options, input, transfer_cancel).await;
    }

    let config = &options.config;
    match config.get_object_type {
        GetObjectType::Parts => {
            if input.range.is_some() {
                return single_download(fetcher, options, input, transfer_cancel).await;
            }

            let head = fetcher
                .head(HeadObjectRequest {
                    bucket: input.bucket.clone(),
                    key: input.key.clone(),
                    part_number: Some(1),
                    version_id: input.version_id.clone(),
                })
                .await?;
            let plan = TransferPlan::native_parts(
                head.content_length,
                head.parts_count.unwrap_or(1),
                config.get_buffer_size,
            );
            Ok(multipart_download(fetcher, options, &input, head, plan, transfer_cancel))
        }
        GetObjectType::Ranges => {
            let head = fetcher
                .head(HeadObjectRequest {
                    bucket: input.bucket.clone(),
                    key: input.key.clone(),
                    part_number: None,
                    version_id: input.version_id.clone(),
                })
                .await?;

            let total = head.content_length;
            if total == 0 {
                return single_download(fetcher, options, input, transfer_cancel).await;
            }

            let (start, end) = match &input.range {
                Some(range) => parse_range(range, total)?,
                None => (0, total),
            };
            let span = end - start;
            if span <= config.part_size_bytes {
                return single_download(fetcher, options, input, transfer_cancel).await;
            }

            let plan = TransferPlan::ranges(start, span, config.part_size_bytes, config.get_buffer_size);
            Ok(multipart_download(fetcher, options, &input, head, plan, transfer_cancel))
        }
    }
}

/// Download an object into `writer`, returning the bytes written
pub async fn download_object<W>(
    store: Arc<dyn ObjectStore>,
    options: &Options,
    input: GetObjectInput,
    writer: &mut W,
    cancel: &CancellationToken,
) -> Result<DownloadObjectOutput>
where
    W: AsyncWrite + Unpin + Send + ?Sized,
{
    let mut output = get_object(store, options, input, cancel).await?;
    let bytes_written = tokio::io::copy(&mut output.body, writer).await?;
    writer.flush().await?;

    Ok(DownloadObjectOutput {
        bytes_written,
        content_type: output.content_type,
        etag: output.etag,
        version_id: output.version_id,
        parts_count: output.parts_count,
    })
}

/// Fetch the whole request in one call and present it as a one-part stream
async fn single_download(
    fetcher: PartFetcher,
    options: &Options,
    input: GetObjectInput,
    cancel: CancellationToken,
) -> Result<GetObjectOutput> {
    let mut request = fetcher.base_request();
    request.range = input.range.clone();
    request.part_number = input.part_number;

    let mut body = PooledBuffer::detached(Vec::new());
    let response = fetcher.fetch(0, request, None, &mut body).await?;

    let len = body.len() as u64;
    fetcher.emit_start(Some(len));
    fetcher.record_bytes(len, Some(len));

    let (tx, _gate, reader) = ChunkedReader::channel(1, 1, cancel.clone());
    let reader = reader.with_progress(options.progress.clone(), &input.bucket, &input.key);
    deliver(&tx, Ok(ChunkDescriptor::new(0, body, response.etag.clone())), &cancel).await?;

    debug!(key = %input.key, bytes = len, "single request download");
    Ok(GetObjectOutput {
        body: reader,
        content_length: Some(len),
        content_range: response.content_range,
        content_type: response.content_type,
        etag: response.etag,
        version_id: response.version_id,
        parts_count: response.parts_count,
        last_modified: response.last_modified,
        plan: TransferPlan::ranges(0, len, len.max(1), len.max(1)),
    })
}

fn multipart_download(
    mut fetcher: PartFetcher,
    options: &Options,
    input: &GetObjectInput,
    head: HeadObjectResponse,
    plan: TransferPlan,
    cancel: CancellationToken,
) -> GetObjectOutput {
    info!(
        key = %input.key,
        parts = plan.parts_count,
        part_size = plan.part_size,
        window = plan.window_size,
        "starting multi-part download"
    );

    // Every part is pinned to what the probe saw
    fetcher.expected_etag = head.etag.clone();
    fetcher.version_id = head.version_id.clone().or_else(|| input.version_id.clone());
    fetcher.emit_start(plan.total_bytes);

    let (tx, gate, reader) = ChunkedReader::channel(plan.parts_count, plan.window_size, cancel.clone());
    let reader = reader.with_progress(options.progress.clone(), &input.bucket, &input.key);

    let pool = options
        .buffer_pool
        .clone()
        .unwrap_or_else(|| BufferPool::new(plan.window_size as usize, plan.part_size as usize));

    let shared = Arc::new(DownloadWorkers {
        fetcher,
        plan,
        gate,
        pool,
        next_part: Mutex::new(0),
        cancel,
    });
    let workers = options.config.concurrency.min(plan.parts_count as usize).max(1);
    for _ in 0..workers {
        tokio::spawn(shared.clone().run(tx.clone()));
    }

    let content_range = plan.total_bytes.and_then(|span| match plan.addressing {
        PartAddressing::Ranges { start_offset } => Some(format!(
            "bytes {}-{}/{}",
            start_offset,
            start_offset + span - 1,
            head.content_length
        )),
        PartAddressing::Parts => None,
    });

    GetObjectOutput {
        body: reader,
        content_length: plan.total_bytes,
        content_range,
        content_type: head.content_type,
        etag: head.etag,
        version_id: head.version_id,
        parts_count: head.parts_count,
        last_modified: head.last_modified,
        plan,
    }
}

struct DownloadWorkers {
    fetcher: PartFetcher,
    plan: TransferPlan,
    gate: WindowGate,
    pool: BufferPool,
    /// Next unclaimed part; held across admission and checkout so buffers
    /// are handed out in part order
    next_part: Mutex<u32>,
    cancel: CancellationToken,
}

impl DownloadWorkers {
    async fn run(self: Arc<Self>, tx: ChunkSender) {
        loop {
            let (index, mut buffer) = match self.claim().await {
                Ok(Some(claim)) => claim,
                Ok(None) => return,
                Err(err) => {
                    self.report(&tx, err).await;
                    return;
                }
            };

            let mut request = self.fetcher.base_request();
            match self.plan.addressing {
                PartAddressing::Ranges { .. } => request.range = self.plan.range_header(index),
                PartAddressing::Parts => request.part_number = Some(index + 1),
            }

            let expected_len = self.plan.part_len(index);
            match self.fetcher.fetch(index, request, expected_len, &mut buffer).await {
                Ok(response) => {
                    self.fetcher
                        .record_bytes(buffer.len() as u64, self.plan.total_bytes);
                    let chunk = ChunkDescriptor::new(index, buffer, response.etag);
                    if deliver(&tx, Ok(chunk), &self.cancel).await.is_err() {
                        return;
                    }
                }
                Err(err) => {
                    self.report(&tx, err).await;
                    return;
                }
            }
        }
    }

    async fn claim(&self) -> Result<Option<(u32, PooledBuffer)>> {
        let mut next = self.next_part.lock().await;
        if *next >= self.plan.parts_count || self.cancel.is_cancelled() {
            return Ok(None);
        }
        let index = *next;
        self.gate.admit(index, &self.cancel).await?;
        let buffer = self.pool.get(&self.cancel).await?;
        *next += 1;
        Ok(Some((index, buffer)))
    }

    /// Hand a failure to the reader, then stop the other workers
    async fn report(&self, tx: &ChunkSender, err: TransferError) {
        if matches!(err, TransferError::Aborted) && self.cancel.is_cancelled() {
            return;
        }
        let _ = deliver(tx, Err(err), &self.cancel).await;
        self.cancel.cancel();
    }
}

/// Issues part requests with retries and progress accounting
struct PartFetcher {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    key: String,
    version_id: Option<String>,
    expected_etag: Option<String>,
    checksum_enabled: bool,
    max_retries: u32,
    decider: Arc<dyn ShouldRetry>,
    backoff: Backoff,
    listeners: ProgressListeners,
    /// Running total; held while emitting so listeners see it grow monotonically
    transferred: std::sync::Mutex<u64>,
    cancel: CancellationToken,
}

enum Attempt {
    Retry(StoreError),
    Fatal(TransferError),
}

impl PartFetcher {
    fn new(
        store: Arc<dyn ObjectStore>,
        options: &Options,
        input: &GetObjectInput,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            bucket: input.bucket.clone(),
            key: input.key.clone(),
            version_id: input.version_id.clone(),
            expected_etag: None,
            checksum_enabled: !options.config.disable_checksum_validation,
            max_retries: options.config.part_body_max_retries,
            decider: options.retry_decider.clone(),
            backoff: options.backoff(),
            listeners: options.progress.clone(),
            transferred: std::sync::Mutex::new(0),
            cancel,
        }
    }

    fn base_request(&self) -> GetObjectRequest {
        GetObjectRequest {
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            range: None,
            part_number: None,
            version_id: self.version_id.clone(),
            if_match: None,
            checksum_enabled: self.checksum_enabled,
        }
    }

    async fn head(&self, request: HeadObjectRequest) -> Result<HeadObjectResponse> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(TransferError::Aborted),
            head = self.store.head_object(request) => head.map_err(TransferError::from),
        }
    }

    fn emit_start(&self, total_bytes: Option<u64>) {
        self.listeners.emit_transfer_start(&TransferStartEvent {
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            total_bytes,
        });
    }

    fn record_bytes(&self, n: u64, total_bytes: Option<u64>) {
        let mut so_far = self
            .transferred
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *so_far += n;
        self.listeners.emit_bytes_transferred(&BytesTransferredEvent {
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            bytes_transferred: *so_far,
            total_bytes,
        });
    }

    /// Fetch one part into `buffer`, retrying body failures and retryable errors
    async fn fetch(
        &self,
        index: u32,
        request: GetObjectRequest,
        expected_len: Option<u64>,
        buffer: &mut PooledBuffer,
    ) -> Result<PartResponse> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(TransferError::Aborted),
                outcome = self.fetch_once(request.clone(), expected_len, buffer) => outcome,
            };

            match outcome {
                Ok(response) => return Ok(response),
                Err(Attempt::Fatal(err)) => return Err(err),
                Err(Attempt::Retry(cause)) if attempt <= self.max_retries => {
                    let delay = self.backoff.delay(attempt);
                    warn!(
                        key = %self.key,
                        part = index + 1,
                        attempt,
                        error = %cause,
                        "retrying part after {:?}",
                        delay
                    );
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Err(TransferError::Aborted),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(Attempt::Retry(cause)) => {
                    return Err(TransferError::ChunkRetriesExhausted {
                        part: index + 1,
                        attempts: attempt,
                        cause,
                    });
                }
            }
        }
    }

    async fn fetch_once(
        &self,
        request: GetObjectRequest,
        expected_len: Option<u64>,
        buffer: &mut PooledBuffer,
    ) -> std::result::Result<PartResponse, Attempt> {
        let response = match self.store.get_object(request).await {
            Ok(response) => response,
            Err(err) if self.decider.should_retry(&err) => return Err(Attempt::Retry(err)),
            Err(err) => return Err(Attempt::Fatal(err.into())),
        };

        if let (Some(expected), Some(actual)) = (&self.expected_etag, &response.etag) {
            if expected != actual {
                return Err(Attempt::Fatal(TransferError::ObjectChanged {
                    key: self.key.clone(),
                    expected: expected.clone(),
                    actual: actual.clone(),
                }));
            }
        }

        let GetObjectResponse {
            mut body,
            content_length,
            content_range,
            content_type,
            etag,
            version_id,
            parts_count,
            last_modified,
        } = response;

        buffer.clear();
        if let Err(err) = body.read_to_end(buffer).await {
            return Err(Attempt::Retry(StoreError::BodyRead(err.to_string())));
        }

        let want = expected_len.unwrap_or(content_length);
        if buffer.len() as u64 != want {
            return Err(Attempt::Retry(StoreError::BodyRead(format!(
                "expected {} bytes, got {}",
                want,
                buffer.len()
            ))));
        }

        Ok(PartResponse {
            content_range,
            content_type,
            etag,
            version_id,
            parts_count,
            last_modified,
        })
    }
}

struct PartResponse {
    content_range: Option<String>,
    content_type: Option<String>,
    etag: Option<String>,
    version_id: Option<String>,
    parts_count: Option<u32>,
    last_modified: Option<SystemTime>,
}
