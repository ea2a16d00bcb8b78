/*!
 * Order-preserving reader over concurrently fetched chunks
 *
 * Workers deliver chunks in any order through a bounded channel. The reader
 * buffers chunks that arrive ahead of the read position and copies bytes out
 * strictly in index order. A window limits how many chunks may be in flight
 * or buffered at once: part `i` is only admitted while
 * `i < min(parts_count, (read / window + 1) * window)`.
 */

use crate::core::buffer_pool::PooledBuffer;
use crate::core::progress::{ProgressListeners, TransferCompleteEvent, TransferFailedEvent};
use crate::error::TransferError;
use std::collections::BTreeMap;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// One fetched part, handed from a worker to the reader
#[derive(Debug)]
pub struct ChunkDescriptor {
    pub index: u32,
    pub body: PooledBuffer,
    pub etag: Option<String>,
    pos: usize,
}

impl ChunkDescriptor {
    pub fn new(index: u32, body: PooledBuffer, etag: Option<String>) -> Self {
        Self {
            index,
            body,
            etag,
            pos: 0,
        }
    }

    pub fn len(&self) -> u64 {
        self.body.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

pub type ChunkResult = std::result::Result<ChunkDescriptor, TransferError>;

pub type ChunkSender = mpsc::Sender<ChunkResult>;

/// Hand a chunk (or a terminal error) to the reader
///
/// Fails with `Aborted` if the transfer is cancelled or the reader is gone.
pub async fn deliver(
    tx: &ChunkSender,
    item: ChunkResult,
    cancel: &CancellationToken,
) -> Result<(), TransferError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TransferError::Aborted),
        sent = tx.send(item) => sent.map_err(|_| TransferError::Aborted),
    }
}

/// Lets workers wait until the reader has made room for a part
#[derive(Debug, Clone)]
pub struct WindowGate {
    read_rx: watch::Receiver<u32>,
    window_size: u32,
    parts_count: u32,
}

impl WindowGate {
    /// Exclusive upper bound on admissible part indices for a read position
    pub fn limit(&self, read: u32) -> u32 {
        let window_end = (read / self.window_size + 1).saturating_mul(self.window_size);
        window_end.min(self.parts_count)
    }

    /// Wait until part `index` may be fetched
    pub async fn admit(&self, index: u32, cancel: &CancellationToken) -> Result<(), TransferError> {
        let mut read_rx = self.read_rx.clone();
        loop {
            let read = *read_rx.borrow_and_update();
            if index < self.limit(read) {
                return Ok(());
            }
            trace!(index, read, "part waiting for window");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransferError::Aborted),
                changed = read_rx.changed() => {
                    if changed.is_err() {
                        // reader dropped
                        return Err(TransferError::Aborted);
                    }
                }
            }
        }
    }
}

struct ReaderProgress {
    listeners: ProgressListeners,
    bucket: String,
    key: String,
}

/// Sequential [`AsyncRead`] over parts fetched out of order
pub struct ChunkedReader {
    rx: mpsc::Receiver<ChunkResult>,
    buffered: BTreeMap<u32, ChunkDescriptor>,
    parts_count: u32,
    window_size: u32,
    received: u32,
    read: u32,
    written: u64,
    read_tx: watch::Sender<u32>,
    cancel: CancellationToken,
    error: Option<TransferError>,
    progress: Option<ReaderProgress>,
    finished: bool,
}

impl ChunkedReader {
    /// Create a reader for `parts_count` parts, plus the sender and gate the
    /// producing side uses
    ///
    /// `cancel` is triggered when the reader fails or is dropped early.
    pub fn channel(
        parts_count: u32,
        window_size: u32,
        cancel: CancellationToken,
    ) -> (ChunkSender, WindowGate, ChunkedReader) {
        let parts_count = parts_count.max(1);
        let window_size = window_size.clamp(1, parts_count);
        let (tx, rx) = mpsc::channel(window_size as usize);
        let (read_tx, read_rx) = watch::channel(0);

        let gate = WindowGate {
            read_rx,
            window_size,
            parts_count,
        };
        let reader = ChunkedReader {
            rx,
            buffered: BTreeMap::new(),
            parts_count,
            window_size,
            received: 0,
            read: 0,
            written: 0,
            read_tx,
            cancel,
            error: None,
            progress: None,
            finished: false,
        };
        (tx, gate, reader)
    }

    /// Report completion or failure of the stream to `listeners`
    pub fn with_progress(
        mut self,
        listeners: ProgressListeners,
        bucket: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        if !listeners.is_empty() {
            self.progress = Some(ReaderProgress {
                listeners,
                bucket: bucket.into(),
                key: key.into(),
            });
        }
        self
    }

    pub fn parts_count(&self) -> u32 {
        self.parts_count
    }

    pub fn window_size(&self) -> u32 {
        self.window_size
    }

    /// Bytes handed to the caller so far
    pub fn bytes_read(&self) -> u64 {
        self.written
    }

    /// Parts received but not yet fully drained
    pub fn buffered_parts(&self) -> usize {
        self.buffered.len()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// The latched terminal error, if the stream failed
    pub fn terminal_error(&self) -> Option<&TransferError> {
        self.error.as_ref()
    }

    fn accept(&mut self, chunk: ChunkDescriptor) {
        if chunk.index < self.read
            || chunk.index >= self.parts_count
            || self.buffered.contains_key(&chunk.index)
        {
            debug!(index = chunk.index, "discarding duplicate or out-of-range part");
            return;
        }
        trace!(index = chunk.index, len = chunk.len(), "part received");
        self.received += 1;
        self.buffered.insert(chunk.index, chunk);
    }

    /// Latch the first error and tear down the producing side
    fn fail(&mut self, err: TransferError) {
        if self.error.is_some() {
            return;
        }
        debug!(error = %err, read = self.read, "chunked reader failed");
        self.rx.close();
        self.buffered.clear();
        self.cancel.cancel();
        if let Some(progress) = &self.progress {
            progress.listeners.emit_transfer_failed(&TransferFailedEvent {
                bucket: progress.bucket.clone(),
                key: progress.key.clone(),
                error: err.clone(),
                bytes_transferred: self.written,
            });
        }
        self.error = Some(err);
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.rx.close();
        if let Some(progress) = &self.progress {
            progress.listeners.emit_transfer_complete(&TransferCompleteEvent {
                bucket: progress.bucket.clone(),
                key: progress.key.clone(),
                bytes_transferred: self.written,
            });
        }
    }

    /// Copy from the part at the read position; returns false if it has not arrived
    fn drain_current(&mut self, buf: &mut ReadBuf<'_>) -> bool {
        let Some(chunk) = self.buffered.get_mut(&self.read) else {
            return false;
        };

        let remaining = &chunk.body[chunk.pos..];
        let n = remaining.len().min(buf.remaining());
        buf.put_slice(&remaining[..n]);
        chunk.pos += n;
        self.written += n as u64;

        if chunk.pos >= chunk.body.len() {
            // dropping the descriptor returns its buffer
            self.buffered.remove(&self.read);
            self.read += 1;
            self.read_tx.send_replace(self.read);
        }
        true
    }
}

impl AsyncRead for ChunkedReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if let Some(err) = &this.error {
            return Poll::Ready(Err(err.clone().into()));
        }
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        let start = buf.filled().len();
        loop {
            if this.read >= this.parts_count {
                this.finish();
                return Poll::Ready(Ok(()));
            }

            if this.drain_current(buf) {
                if buf.remaining() == 0 {
                    return Poll::Ready(Ok(()));
                }
                continue;
            }

            match this.rx.poll_recv(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.accept(chunk);
                    continue;
                }
                Poll::Ready(Some(Err(err))) => this.fail(err),
                Poll::Ready(None) => {
                    let err = if this.cancel.is_cancelled() {
                        TransferError::Aborted
                    } else {
                        TransferError::IncompleteDownload {
                            received: this.received,
                            expected: this.parts_count,
                        }
                    };
                    this.fail(err);
                }
                Poll::Pending => {
                    return if buf.filled().len() > start {
                        Poll::Ready(Ok(()))
                    } else {
                        Poll::Pending
                    };
                }
            }

            // An error was just latched. Bytes already copied go out first.
            if buf.filled().len() > start {
                return Poll::Ready(Ok(()));
            }
            return match &this.error {
                Some(err) => Poll::Ready(Err(err.clone().into())),
                None => Poll::Ready(Ok(())),
            };
        }
    }
}

impl Drop for ChunkedReader {
    fn drop(&mut self) {
        if !self.finished && self.error.is_none() {
            self.rx.close();
            self.buffered.clear();
            self.cancel.cancel();
        }
    }
}

impl std::fmt::Debug for ChunkedReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedReader")
            .field("parts_count", &self.parts_count)
            .field("window_size", &self.window_size)
            .field("received", &self.received)
            .field("read", &self.read)
            .field("written", &self.written)
            .field("error", &self.error)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hauler_core_interface::StoreError;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::time::timeout;

    const PART: usize = 7;

    fn part_bytes(index: u32, parts: u32, last_len: usize) -> Vec<u8> {
        let len = if index + 1 == parts { last_len } else { PART };
        let offset = index as usize * PART;
        (0..len).map(|i| ((offset + i) % 251) as u8).collect()
    }

    fn expected_stream(parts: u32, last_len: usize) -> Vec<u8> {
        (0..parts)
            .flat_map(|i| part_bytes(i, parts, last_len))
            .collect()
    }

    /// Sends every part, shuffled within each window, honouring the gate
    async fn produce_shuffled(tx: ChunkSender, gate: WindowGate, parts: u32, window: u32, seed: u64) {
        let cancel = CancellationToken::new();
        let mut rng = StdRng::seed_from_u64(seed);
        let mut start = 0;
        while start < parts {
            let end = (start + window).min(parts);
            let mut indices: Vec<u32> = (start..end).collect();
            indices.shuffle(&mut rng);
            for index in indices {
                gate.admit(index, &cancel).await.unwrap();
                let body = PooledBuffer::detached(part_bytes(index, parts, 3));
                deliver(&tx, Ok(ChunkDescriptor::new(index, body, None)), &cancel)
                    .await
                    .unwrap();
            }
            start = end;
        }
    }

    #[tokio::test]
    async fn test_ordering_across_windows() {
        for parts in [1u32, 5, 1000] {
            for window in [1u32, 6, parts] {
                let cancel = CancellationToken::new();
                let (tx, gate, mut reader) = ChunkedReader::channel(parts, window, cancel);
                let producer = tokio::spawn(produce_shuffled(tx, gate, parts, window.min(parts), 42));

                let mut out = Vec::new();
                reader.read_to_end(&mut out).await.unwrap();
                producer.await.unwrap();

                assert_eq!(
                    out,
                    expected_stream(parts, 3),
                    "parts={} window={}",
                    parts,
                    window
                );
                assert!(reader.is_finished());
            }
        }
    }

    #[tokio::test]
    async fn test_window_bounds_admission() {
        let cancel = CancellationToken::new();
        let (tx, gate, mut reader) = ChunkedReader::channel(20, 4, cancel.clone());
        assert_eq!(gate.limit(0), 4);

        // part 4 is outside the first window
        assert!(timeout(Duration::from_millis(50), gate.admit(4, &cancel))
            .await
            .is_err());

        for index in (0..4).rev() {
            gate.admit(index, &cancel).await.unwrap();
            let body = PooledBuffer::detached(part_bytes(index, 20, PART));
            deliver(&tx, Ok(ChunkDescriptor::new(index, body, None)), &cancel)
                .await
                .unwrap();
        }

        // reading 3 full parts is not enough to move the window
        let mut first = vec![0u8; PART * 3];
        reader.read_exact(&mut first).await.unwrap();
        assert!(reader.buffered_parts() <= 4);
        assert!(timeout(Duration::from_millis(50), gate.admit(4, &cancel))
            .await
            .is_err());

        let mut fourth = vec![0u8; PART];
        reader.read_exact(&mut fourth).await.unwrap();
        assert_eq!(reader.buffered_parts(), 0);
        timeout(Duration::from_secs(1), gate.admit(4, &cancel))
            .await
            .expect("window should advance after the fourth part")
            .unwrap();
        assert_eq!(gate.limit(4), 8);
    }

    #[tokio::test]
    async fn test_read_after_eof_keeps_returning_zero() {
        let cancel = CancellationToken::new();
        let (tx, _gate, mut reader) = ChunkedReader::channel(2, 2, cancel.clone());
        for index in [1, 0] {
            let body = PooledBuffer::detached(part_bytes(index, 2, 3));
            deliver(&tx, Ok(ChunkDescriptor::new(index, body, None)), &cancel)
                .await
                .unwrap();
        }

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out.len(), PART + 3);

        let mut buf = [0u8; 16];
        for _ in 0..3 {
            assert_eq!(reader.read(&mut buf).await.unwrap(), 0);
        }
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_partial_bytes_then_error() {
        let cancel = CancellationToken::new();
        let (tx, _gate, mut reader) = ChunkedReader::channel(3, 3, cancel.clone());

        let body = PooledBuffer::detached(part_bytes(0, 3, 3));
        deliver(&tx, Ok(ChunkDescriptor::new(0, body, None)), &cancel)
            .await
            .unwrap();
        tx.send(Err(TransferError::ChunkRetriesExhausted {
            part: 2,
            attempts: 4,
            cause: StoreError::Timeout("slow".into()),
        }))
        .await
        .unwrap();

        let mut buf = vec![0u8; 64];
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(n, PART);
        assert_eq!(&buf[..n], &part_bytes(0, 3, 3)[..]);

        let err = reader.read(&mut buf).await.unwrap_err();
        assert!(matches!(
            TransferError::from(err),
            TransferError::ChunkRetriesExhausted { part: 2, .. }
        ));
        assert!(cancel.is_cancelled());
        assert!(reader.terminal_error().is_some());
        assert_eq!(reader.bytes_read(), PART as u64);
    }

    #[tokio::test]
    async fn test_producers_gone_early() {
        let cancel = CancellationToken::new();
        let (tx, _gate, mut reader) = ChunkedReader::channel(3, 3, cancel.clone());
        let body = PooledBuffer::detached(part_bytes(0, 3, 3));
        deliver(&tx, Ok(ChunkDescriptor::new(0, body, None)), &cancel)
            .await
            .unwrap();
        drop(tx);

        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).await.unwrap_err();
        assert!(matches!(
            TransferError::from(err),
            TransferError::IncompleteDownload {
                received: 1,
                expected: 3
            }
        ));
    }

    #[tokio::test]
    async fn test_drop_cancels_and_unblocks_gate() {
        let cancel = CancellationToken::new();
        let (_tx, gate, reader) = ChunkedReader::channel(10, 2, cancel.clone());

        let waiter = {
            let cancel = CancellationToken::new();
            tokio::spawn(async move { gate.admit(5, &cancel).await })
        };
        drop(reader);

        assert!(cancel.is_cancelled());
        let result = timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert!(matches!(result, Err(TransferError::Aborted)));
    }

    #[tokio::test]
    async fn test_zero_length_single_part() {
        let cancel = CancellationToken::new();
        let (tx, _gate, mut reader) = ChunkedReader::channel(1, 1, cancel.clone());
        deliver(
            &tx,
            Ok(ChunkDescriptor::new(0, PooledBuffer::detached(Vec::new()), None)),
            &cancel,
        )
        .await
        .unwrap();

        let mut out = Vec::new();
        assert_eq!(reader.read_to_end(&mut out).await.unwrap(), 0);
        assert!(reader.is_finished());
    }
}
